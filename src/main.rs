use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uplog_auth::{
    wait_for_callback, Authenticator, GoogleOAuth2Provider, OAuth2Config, TokenSet, TokenStore,
    CALENDAR_EVENTS_SCOPE,
};
use uplog_calendar::{
    load_schedule, sync_schedule, GoogleConnector, MemoryCalendar, MemoryConnector,
    ServiceOptions, SyncService,
};
use uplog_core::{AppError, BackendKind, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    uplog_core::init()?;

    if let Err(e) = run().await {
        tracing::error!(error = %e, "uplog failed");
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }

    Ok(())
}

fn sync_error(e: impl std::fmt::Display) -> AppError {
    AppError::Sync(e.to_string())
}

async fn run() -> Result<(), AppError> {
    let (config, _) = Config::load_validated()?;
    let store = TokenStore::new(&config.auth.token_path);

    if std::env::args().nth(1).as_deref() == Some("logout") {
        store.delete()?;
        println!("Removed {}", store.path().display());
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    let options = ServiceOptions {
        debounce: Duration::from_secs(config.calendar.debounce_secs),
        queue_capacity: config.calendar.queue_capacity,
    };

    let (service, dry_run) = match config.calendar.backend {
        BackendKind::Google => {
            let service = google_service(&config, store, options, cancel.clone()).await?;
            if !service.initialized() {
                authorize(&service, config.auth.callback_port, &cancel).await?;
            }
            (service, None)
        }
        BackendKind::Memory => {
            let calendar = Arc::new(MemoryCalendar::new());
            let service = SyncService::builder(Arc::new(MemoryConnector::new(calendar.clone())))
                .options(options)
                .cancellation(cancel.clone())
                .start()
                .await;
            service
                .init_with_token(dry_run_token())
                .await
                .map_err(sync_error)?;
            (service, Some(calendar))
        }
    };

    let entries = match &config.schedule_path {
        Some(path) => load_schedule(path).map_err(sync_error)?,
        None => {
            tracing::warn!("no schedule_path configured, nothing to sync");
            Vec::new()
        }
    };

    let result = sync_schedule(&service, &entries, &config.calendar.description).await;
    service.close().await;
    let queued = result.map_err(sync_error)?;

    println!("Synced {} scheduled workouts", queued);
    if let Some(calendar) = dry_run {
        for remote in calendar.events() {
            println!("  {}  {}", remote.event.iso_date, remote.event.summary);
        }
    }

    Ok(())
}

async fn google_service(
    config: &Config,
    store: TokenStore,
    options: ServiceOptions,
    cancel: CancellationToken,
) -> Result<SyncService, AppError> {
    let credentials = config.auth.credentials_json()?;
    let mut oauth = OAuth2Config::from_google_credentials(&credentials, &[CALENDAR_EVENTS_SCOPE])
        .map_err(sync_error)?;
    if let Some(redirect_uri) = &config.auth.redirect_uri {
        oauth = oauth.with_redirect_uri(redirect_uri.clone());
    }

    let authenticator: Arc<dyn Authenticator> = Arc::new(GoogleOAuth2Provider::new(oauth));
    let connector = GoogleConnector::new(authenticator.clone(), config.calendar.calendar_id.clone())
        .with_token_store(store.clone());

    Ok(SyncService::builder(Arc::new(connector))
        .authenticator(authenticator)
        .token_store(store)
        .options(options)
        .cancellation(cancel)
        .start()
        .await)
}

/// Walk the user through the browser handshake.
async fn authorize(
    service: &SyncService,
    port: u16,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    let url = service.auth_code_url().map_err(sync_error)?;

    println!("Authorize uplog to manage your calendar:\n\n  {}\n", url);
    if let Err(e) = webbrowser::open(&url) {
        tracing::debug!(error = %e, "could not open browser");
    }

    let callback = tokio::select! {
        callback = wait_for_callback(port) => callback.map_err(sync_error)?,
        _ = cancel.cancelled() => return Err(AppError::Sync("authorization cancelled".to_string())),
    };

    service
        .init(&callback.code, &callback.state)
        .await
        .map_err(sync_error)?;
    println!("Authorization complete.");
    Ok(())
}

/// Token accepted by the in-memory backend.
fn dry_run_token() -> TokenSet {
    TokenSet {
        access_token: "dry-run".to_string(),
        refresh_token: None,
        expires_at: i64::MAX,
        scopes: Vec::new(),
    }
}
