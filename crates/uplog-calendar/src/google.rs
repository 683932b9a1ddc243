//! Google Calendar as a [`CalendarBackend`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uplog_auth::{AuthError, Authenticator, TokenSet, TokenStore};

use crate::backend::{BackendConnector, CalendarBackend};
use crate::client::CalendarClient;
use crate::error::CalendarError;
use crate::event::{Event, EventQuery, RemoteEvent};

const CANCELLED_STATUS: &str = "cancelled";

/// One calendar on one Google account, refreshing its own access token.
pub struct GoogleCalendar {
    client: CalendarClient,
    calendar_id: String,
    authenticator: Arc<dyn Authenticator>,
    token: Mutex<TokenSet>,
    token_store: Option<TokenStore>,
}

impl GoogleCalendar {
    pub fn new(
        client: CalendarClient,
        calendar_id: impl Into<String>,
        authenticator: Arc<dyn Authenticator>,
        token: TokenSet,
    ) -> Self {
        client.set_access_token(&token.access_token);
        Self {
            client,
            calendar_id: calendar_id.into(),
            authenticator,
            token: Mutex::new(token),
            token_store: None,
        }
    }

    /// Persist refreshed tokens to `store`.
    pub fn with_token_store(mut self, store: TokenStore) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Refresh ahead of time when the token is about to expire.
    async fn ensure_fresh_token(&self) -> Result<(), CalendarError> {
        let mut token = self.token.lock().await;
        if token.needs_refresh() {
            self.refresh_locked(&mut token).await?;
        }
        Ok(())
    }

    async fn refresh_locked(&self, token: &mut TokenSet) -> Result<(), CalendarError> {
        let refresh_token = token
            .refresh_token
            .clone()
            .ok_or(AuthError::MissingRefreshToken)
            .map_err(refresh_failed)?;

        let refreshed = self
            .authenticator
            .refresh(&refresh_token)
            .await
            .map_err(refresh_failed)?;

        self.client.set_access_token(&refreshed.access_token);
        *token = refreshed;
        tracing::debug!(expires_at = token.expires_at, "refreshed calendar access token");

        if let Some(store) = &self.token_store {
            if let Err(e) = store.save(token) {
                tracing::warn!(error = %e, "failed to persist refreshed token");
            }
        }
        Ok(())
    }

    /// Run `op`, refreshing the token and retrying once if it is rejected.
    async fn authorized<T, F, Fut>(&self, op: F) -> Result<T, CalendarError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CalendarError>>,
    {
        self.ensure_fresh_token().await?;

        match op().await {
            Err(e) if e.should_refresh_token() => {
                tracing::debug!(error = %e, "calendar rejected token, refreshing");
                {
                    let mut token = self.token.lock().await;
                    self.refresh_locked(&mut token).await?;
                }
                op().await
            }
            other => other,
        }
    }
}

fn refresh_failed(e: AuthError) -> CalendarError {
    if e.requires_reauthentication() {
        tracing::warn!(error = %e, "calendar token can no longer be refreshed, re-authorization needed");
    }
    CalendarError::Credentials(e.to_string())
}

#[async_trait]
impl CalendarBackend for GoogleCalendar {
    async fn list(&self, query: &EventQuery) -> Result<Vec<RemoteEvent>, CalendarError> {
        let client = &self.client;
        let calendar_id = self.calendar_id.as_str();
        let properties = query.shared_properties();
        let properties = properties.as_slice();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = page_token.as_deref();
            let response = self
                .authorized(move || {
                    client.list_events(calendar_id, query.time_min, query.time_max, properties, page)
                })
                .await?;

            events.extend(
                response
                    .items
                    .iter()
                    .filter(|e| e.status.as_deref() != Some(CANCELLED_STATUS))
                    .map(RemoteEvent::from),
            );

            match response.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(events)
    }

    async fn insert(&self, event: &Event) -> Result<RemoteEvent, CalendarError> {
        let body = event
            .to_api()
            .map_err(|e| CalendarError::InvalidEventData(e.to_string()))?;
        let client = &self.client;
        let calendar_id = self.calendar_id.as_str();
        let body = &body;

        let created = self
            .authorized(move || client.insert_event(calendar_id, body))
            .await?;
        Ok(RemoteEvent::from(&created))
    }

    async fn delete(&self, id: &str) -> Result<(), CalendarError> {
        let client = &self.client;
        let calendar_id = self.calendar_id.as_str();

        match self
            .authorized(move || client.delete_event(calendar_id, id))
            .await
        {
            Err(CalendarError::Gone(_)) => {
                tracing::debug!(id, "event already deleted");
                Ok(())
            }
            other => other,
        }
    }
}

/// Builds [`GoogleCalendar`]s for the configured calendar.
pub struct GoogleConnector {
    authenticator: Arc<dyn Authenticator>,
    calendar_id: String,
    token_store: Option<TokenStore>,
    base_url: Option<String>,
}

impl GoogleConnector {
    pub fn new(authenticator: Arc<dyn Authenticator>, calendar_id: impl Into<String>) -> Self {
        Self {
            authenticator,
            calendar_id: calendar_id.into(),
            token_store: None,
            base_url: None,
        }
    }

    pub fn with_token_store(mut self, store: TokenStore) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Talk to a different API root, e.g. a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

#[async_trait]
impl BackendConnector for GoogleConnector {
    async fn connect(&self, token: &TokenSet) -> Result<Arc<dyn CalendarBackend>, CalendarError> {
        if token.access_token.is_empty() {
            return Err(CalendarError::Credentials("empty access token".to_string()));
        }
        if token.is_expired() && token.refresh_token.is_none() {
            return Err(CalendarError::Credentials(
                "token expired and has no refresh token".to_string(),
            ));
        }

        let client = match &self.base_url {
            Some(url) => CalendarClient::new_with_base_url(&token.access_token, url),
            None => CalendarClient::new(&token.access_token),
        };

        let mut calendar = GoogleCalendar::new(
            client,
            self.calendar_id.clone(),
            self.authenticator.clone(),
            token.clone(),
        );
        if let Some(store) = &self.token_store {
            calendar = calendar.with_token_store(store.clone());
        }

        tracing::info!(calendar_id = %self.calendar_id, "connected to Google Calendar");
        Ok(Arc::new(calendar))
    }
}
