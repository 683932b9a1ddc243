//! An in-process calendar with Google's query semantics.
//!
//! Backs the `memory` dry-run mode and the test suite. Failures can be
//! injected per operation, and every call is counted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uplog_auth::TokenSet;

use crate::backend::{BackendConnector, CalendarBackend};
use crate::error::CalendarError;
use crate::event::{
    midnight_utc, parse_date, Event, EventQuery, RemoteEvent, DATE_TAG, MARKER_TAG, MARKER_VALUE,
};

/// How many times each operation was called.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub insert: usize,
    pub delete: usize,
}

#[derive(Debug, Clone)]
struct StoredEvent {
    id: String,
    event: Event,
    shared: HashMap<String, String>,
}

impl StoredEvent {
    fn matches(&self, query: &EventQuery) -> bool {
        if self.shared.get(MARKER_TAG).map(String::as_str) != Some(MARKER_VALUE) {
            return false;
        }
        if let Some(date) = &query.date_tag {
            if self.shared.get(DATE_TAG) != Some(date) {
                return false;
            }
        }

        // All-day events span [date, date + 1d).
        let Ok(date) = parse_date(&self.event.iso_date) else {
            return false;
        };
        let start = midnight_utc(date);
        let end = start + chrono::Duration::days(1);

        end > query.time_min && query.time_max.map_or(true, |max| start < max)
    }
}

#[derive(Debug, Default)]
struct Inner {
    events: Vec<StoredEvent>,
    next_id: u64,
    calls: CallCounts,
    failing_deletes: HashSet<String>,
    fail_inserts: bool,
    latency: Option<Duration>,
}

impl Inner {
    fn store(&mut self, event: Event, shared: HashMap<String, String>) -> String {
        self.next_id += 1;
        let id = format!("mem-{}", self.next_id);
        self.events.push(StoredEvent {
            id: id.clone(),
            event,
            shared,
        });
        id
    }
}

fn managed_tags(iso_date: &str) -> HashMap<String, String> {
    HashMap::from([
        (MARKER_TAG.to_string(), MARKER_VALUE.to_string()),
        (DATE_TAG.to_string(), iso_date.to_string()),
    ])
}

#[derive(Debug, Default)]
pub struct MemoryCalendar {
    inner: Mutex<Inner>,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a managed event directly, bypassing call counting.
    pub fn seed(&self, event: Event) -> String {
        let tags = managed_tags(&event.iso_date);
        self.inner.lock().store(event, tags)
    }

    /// Add an event without the uplog marker, as another application would.
    pub fn seed_unmanaged(&self, event: Event) -> String {
        self.inner.lock().store(event, HashMap::new())
    }

    /// Every stored event, managed or not, in insertion order.
    pub fn events(&self) -> Vec<RemoteEvent> {
        self.inner
            .lock()
            .events
            .iter()
            .map(|e| RemoteEvent {
                id: e.id.clone(),
                event: e.event.clone(),
            })
            .collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.inner.lock().calls
    }

    /// Make every delete of `id` fail.
    pub fn fail_delete(&self, id: impl Into<String>) {
        self.inner.lock().failing_deletes.insert(id.into());
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.inner.lock().fail_inserts = fail;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = Some(latency);
    }

    async fn simulate_latency(&self) {
        let latency = self.inner.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl CalendarBackend for MemoryCalendar {
    async fn list(&self, query: &EventQuery) -> Result<Vec<RemoteEvent>, CalendarError> {
        self.simulate_latency().await;

        let mut inner = self.inner.lock();
        inner.calls.list += 1;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.matches(query))
            .map(|e| RemoteEvent {
                id: e.id.clone(),
                event: e.event.clone(),
            })
            .collect())
    }

    async fn insert(&self, event: &Event) -> Result<RemoteEvent, CalendarError> {
        self.simulate_latency().await;

        let mut inner = self.inner.lock();
        inner.calls.insert += 1;
        if inner.fail_inserts {
            return Err(CalendarError::Injected(format!("insert {}", event.iso_date)));
        }

        let id = inner.store(event.clone(), managed_tags(&event.iso_date));
        tracing::debug!(%id, date = %event.iso_date, "memory calendar insert");
        Ok(RemoteEvent {
            id,
            event: event.clone(),
        })
    }

    async fn delete(&self, id: &str) -> Result<(), CalendarError> {
        self.simulate_latency().await;

        let mut inner = self.inner.lock();
        inner.calls.delete += 1;
        if inner.failing_deletes.contains(id) {
            return Err(CalendarError::Injected(format!("delete {}", id)));
        }

        let before = inner.events.len();
        inner.events.retain(|e| e.id != id);
        if inner.events.len() == before {
            return Err(CalendarError::NotFound(id.to_string()));
        }
        tracing::debug!(id, "memory calendar delete");
        Ok(())
    }
}

/// Hands out the same [`MemoryCalendar`] for any non-empty token.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    calendar: Arc<MemoryCalendar>,
}

impl MemoryConnector {
    pub fn new(calendar: Arc<MemoryCalendar>) -> Self {
        Self { calendar }
    }

    pub fn calendar(&self) -> &Arc<MemoryCalendar> {
        &self.calendar
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect(&self, token: &TokenSet) -> Result<Arc<dyn CalendarBackend>, CalendarError> {
        if token.access_token.is_empty() {
            return Err(CalendarError::Credentials("empty access token".to_string()));
        }
        Ok(self.calendar.clone())
    }
}
