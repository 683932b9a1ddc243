//! The calendar sync facade.
//!
//! A [`SyncService`] starts uninitialized, becomes ready once it holds a
//! usable token (persisted, or obtained through the PKCE handshake), and
//! hands every `sync`/`delete_after` to a single background worker through a
//! bounded queue. Callers only ever wait for queue space.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uplog_auth::{AuthError, Authenticator, TokenSet, TokenStore};

use crate::backend::BackendConnector;
use crate::backing::BackingClient;
use crate::error::SyncError;
use crate::event::Event;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Quiet period between the first buffered update and the flush
    pub debounce: Duration,
    /// Commands that may wait for the worker before `sync` blocks
    pub queue_capacity: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Work accepted by the facade, run later by the worker.
#[derive(Debug)]
enum DeferredCommand {
    UpsertBuffered(Event),
    DeleteAfter(DateTime<Utc>),
}

type Job = (Arc<BackingClient>, DeferredCommand);

/// State token -> PKCE verifier, one entry per handshake in flight.
type AuthSession = HashMap<String, String>;

enum ServiceState {
    Uninitialized(AuthSession),
    Ready(Arc<BackingClient>),
    Closed,
}

struct Inner {
    state: ServiceState,
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

pub struct SyncService {
    inner: Mutex<Inner>,
    connector: Arc<dyn BackendConnector>,
    authenticator: Option<Arc<dyn Authenticator>>,
    token_store: Option<TokenStore>,
    options: ServiceOptions,
    cancel: CancellationToken,
}

/// Assembles a [`SyncService`].
pub struct SyncServiceBuilder {
    connector: Arc<dyn BackendConnector>,
    authenticator: Option<Arc<dyn Authenticator>>,
    token_store: Option<TokenStore>,
    options: ServiceOptions,
    cancel: CancellationToken,
}

impl SyncServiceBuilder {
    /// Provider for the browser handshake. Without one the service can only
    /// become ready from a persisted or supplied token.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Where the token is read from at startup and saved after a handshake.
    pub fn token_store(mut self, store: TokenStore) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    /// Cancelling `cancel` flushes buffered updates without waiting out the
    /// debounce interval.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Spawn the worker and try the persisted token. Must run inside a tokio
    /// runtime.
    pub async fn start(self) -> SyncService {
        let (sender, receiver) = mpsc::channel(self.options.queue_capacity.max(1));
        let worker = tokio::spawn(run_worker(receiver));

        let service = SyncService {
            inner: Mutex::new(Inner {
                state: ServiceState::Uninitialized(AuthSession::new()),
                sender: Some(sender),
                worker: Some(worker),
            }),
            connector: self.connector,
            authenticator: self.authenticator,
            token_store: self.token_store,
            options: self.options,
            cancel: self.cancel,
        };

        service.restore_token().await;
        service
    }
}

impl SyncService {
    pub fn builder(connector: Arc<dyn BackendConnector>) -> SyncServiceBuilder {
        SyncServiceBuilder {
            connector,
            authenticator: None,
            token_store: None,
            options: ServiceOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    async fn restore_token(&self) {
        let Some(store) = &self.token_store else {
            return;
        };

        let token = match store.load() {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!(error = %e, "no usable persisted token");
                return;
            }
        };

        match self.init_with_token(token).await {
            Ok(()) => tracing::info!(path = %store.path().display(), "initialized from persisted token"),
            Err(e) => tracing::warn!(error = %e, "failed to initialize from persisted token"),
        }
    }

    /// A constructed service can always be initialized.
    pub fn initializable(&self) -> bool {
        true
    }

    pub fn initialized(&self) -> bool {
        matches!(self.inner.lock().state, ServiceState::Ready(_))
    }

    /// Start a handshake and return the URL to send the user to.
    ///
    /// Every call opens a new session; any of them can complete [`init`](Self::init).
    pub fn auth_code_url(&self) -> Result<String, SyncError> {
        let mut inner = self.inner.lock();
        let ServiceState::Uninitialized(session) = &mut inner.state else {
            return Err(SyncError::AlreadyInitialized);
        };

        let authenticator = self.authenticator.as_ref().ok_or_else(|| {
            SyncError::Authorization(AuthError::InvalidCredentials(
                "no OAuth client configured".to_string(),
            ))
        })?;
        let pending = authenticator
            .begin_authorization()
            .map_err(SyncError::Authorization)?;

        tracing::debug!(state = %pending.state, sessions = session.len() + 1, "started authorization");
        session.insert(pending.state, pending.verifier);
        Ok(pending.url)
    }

    /// Complete the handshake identified by `state` with the provider's
    /// authorization `code`.
    pub async fn init(&self, code: &str, state: &str) -> Result<(), SyncError> {
        let verifier = {
            let inner = self.inner.lock();
            match &inner.state {
                ServiceState::Ready(_) => return Ok(()),
                ServiceState::Closed => return Err(SyncError::Closed),
                ServiceState::Uninitialized(session) => session
                    .get(state)
                    .cloned()
                    .ok_or_else(|| SyncError::NoVerifierForState(state.to_string()))?,
            }
        };

        // A session only exists if an authenticator created it.
        let Some(authenticator) = &self.authenticator else {
            return Err(SyncError::NoVerifierForState(state.to_string()));
        };

        let token = authenticator
            .exchange_code(code, &verifier)
            .await
            .map_err(SyncError::TokenExchangeFailed)?;

        if let Some(store) = &self.token_store {
            if let Err(e) = store.save(&token) {
                tracing::warn!(error = %e, "failed to save oauth token");
            }
        }

        self.init_with_token(token).await
    }

    /// Become ready with `token` directly, skipping the handshake. The token
    /// is not persisted.
    pub async fn init_with_token(&self, token: TokenSet) -> Result<(), SyncError> {
        let backend = self
            .connector
            .connect(&token)
            .await
            .map_err(SyncError::Connect)?;
        let client = BackingClient::new(backend, self.options.debounce, self.cancel.child_token());

        let mut inner = self.inner.lock();
        match inner.state {
            ServiceState::Closed => return Err(SyncError::Closed),
            ServiceState::Ready(_) => {
                tracing::debug!("calendar service initialized concurrently, discarding client");
                return Ok(());
            }
            ServiceState::Uninitialized(_) => {}
        }

        inner.state = ServiceState::Ready(client);
        tracing::info!("calendar service initialized");
        Ok(())
    }

    /// Queue `event` to be buffered and reconciled. Waits only while the
    /// queue is full.
    pub async fn sync(&self, event: Event) -> Result<(), SyncError> {
        self.submit(|client| (client, DeferredCommand::UpsertBuffered(event)))
            .await
    }

    /// Queue deletion of every managed event ending after `threshold`.
    pub async fn delete_after(&self, threshold: DateTime<Utc>) -> Result<(), SyncError> {
        self.submit(|client| (client, DeferredCommand::DeleteAfter(threshold)))
            .await
    }

    async fn submit(&self, job: impl FnOnce(Arc<BackingClient>) -> Job) -> Result<(), SyncError> {
        let (sender, client) = {
            let inner = self.inner.lock();
            let client = match &inner.state {
                ServiceState::Ready(client) => client.clone(),
                ServiceState::Uninitialized(_) => return Err(SyncError::NotInitialized),
                ServiceState::Closed => return Err(SyncError::Closed),
            };
            let sender = inner.sender.clone().ok_or(SyncError::Closed)?;
            (sender, client)
        };

        sender.send(job(client)).await.map_err(|_| SyncError::Closed)
    }

    /// Stop accepting commands, run everything already queued, and wait for
    /// the buffered updates to be flushed. Later calls return immediately.
    pub async fn close(&self) {
        let (sender, worker, client) = {
            let mut inner = self.inner.lock();
            let client = match std::mem::replace(&mut inner.state, ServiceState::Closed) {
                ServiceState::Ready(client) => Some(client),
                ServiceState::Uninitialized(_) => None,
                ServiceState::Closed => return,
            };
            (inner.sender.take(), inner.worker.take(), client)
        };

        tracing::info!("closing calendar service");
        drop(sender);

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "dispatch worker failed");
            }
        }
        if let Some(client) = client {
            client.wait_for_flush().await;
        }

        tracing::info!("calendar service closed");
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<Job>) {
    while let Some((client, command)) = receiver.recv().await {
        match command {
            DeferredCommand::UpsertBuffered(event) => client.enqueue_event(event).await,
            DeferredCommand::DeleteAfter(threshold) => {
                if let Err(e) = client.delete_after(threshold).await {
                    tracing::warn!(error = %e, "failed to run deferred calendar command");
                }
            }
        }
    }
    tracing::debug!("dispatch worker stopped");
}
