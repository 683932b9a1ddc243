//! The remote calendar seen by the sync engine.

use std::sync::Arc;

use async_trait::async_trait;
use uplog_auth::TokenSet;

use crate::error::CalendarError;
use crate::event::{Event, EventQuery, RemoteEvent};

/// Operations the reconciliation needs from a calendar. Every query is
/// implicitly restricted to events carrying the uplog marker tag.
#[async_trait]
pub trait CalendarBackend: Send + Sync {
    /// All managed events matching `query`, across every page.
    async fn list(&self, query: &EventQuery) -> Result<Vec<RemoteEvent>, CalendarError>;

    /// Create an all-day event for `event` tagged with its date.
    async fn insert(&self, event: &Event) -> Result<RemoteEvent, CalendarError>;

    async fn delete(&self, id: &str) -> Result<(), CalendarError>;
}

/// Turns a freshly obtained or persisted token into a usable backend.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, token: &TokenSet) -> Result<Arc<dyn CalendarBackend>, CalendarError>;
}
