//! Calendar-specific error types.

use thiserror::Error;
use uplog_auth::AuthError;

/// Failures talking to the remote calendar.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Token expired")]
    TokenExpired,

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Event not found: {0}")]
    NotFound(String),

    #[error("Event already deleted: {0}")]
    Gone(String),

    #[error("Invalid event data: {0}")]
    InvalidEventData(String),

    #[error("Conflict: event was modified")]
    Conflict,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Credentials rejected: {0}")]
    Credentials(String),

    #[error("Injected failure: {0}")]
    Injected(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl CalendarError {
    /// Whether this error should trigger a token refresh.
    pub fn should_refresh_token(&self) -> bool {
        matches!(self, Self::TokenExpired | Self::AuthRequired)
    }
}

/// Errors surfaced by the sync engine.
///
/// Lifecycle and handshake errors go straight back to the caller; the
/// reconciliation variants only ever reach the logs.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("calendar service not initialized")]
    NotInitialized,

    #[error("calendar service is closed")]
    Closed,

    #[error("calendar service is already initialized")]
    AlreadyInitialized,

    #[error("no verifier found for state {0}")]
    NoVerifierForState(String),

    #[error("unable to begin authorization: {0}")]
    Authorization(#[source] AuthError),

    #[error("unable to retrieve token from provider: {0}")]
    TokenExchangeFailed(#[source] AuthError),

    #[error("unable to initialize calendar client with token: {0}")]
    Connect(#[source] CalendarError),

    #[error("unable to parse iso8601 date {date}: {source}")]
    InvalidDate {
        date: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("unable to retrieve events {scope}: {source}")]
    List {
        scope: String,
        #[source]
        source: CalendarError,
    },

    #[error("unable to create event for {date}: {source}")]
    Insert {
        date: String,
        #[source]
        source: CalendarError,
    },

    #[error("failed to delete event {id:?}: {source}")]
    Delete {
        id: String,
        #[source]
        source: CalendarError,
    },

    #[error("failed to sync event {date}: {source}")]
    Event {
        date: String,
        #[source]
        source: Box<SyncError>,
    },
}

/// Failure reading a schedule file.
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("failed to read schedule {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schedule {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SyncError {
    /// Errors a caller gets back synchronously, as opposed to ones produced
    /// by deferred work.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::Closed | Self::AlreadyInitialized
        )
    }
}
