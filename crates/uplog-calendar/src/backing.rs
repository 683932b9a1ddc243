//! Reconciliation against the remote calendar.
//!
//! Upserts are buffered per date and flushed together once the debounce
//! interval after the first buffered event has passed; deletion sweeps run
//! immediately. Both hold the buffer lock across their remote calls, so at
//! most one of them talks to the backend at a time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backend::CalendarBackend;
use crate::error::SyncError;
use crate::event::{Event, EventQuery};

enum FlushState {
    Idle,
    /// A flush is scheduled; pending events keyed by ISO date.
    Armed(BTreeMap<String, Event>),
}

pub struct BackingClient {
    backend: Arc<dyn CalendarBackend>,
    state: Mutex<FlushState>,
    flushes: TaskTracker,
    debounce: Duration,
    cancel: CancellationToken,
}

impl BackingClient {
    /// `cancel` cuts an armed debounce short; the buffer is still flushed.
    pub fn new(
        backend: Arc<dyn CalendarBackend>,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            state: Mutex::new(FlushState::Idle),
            flushes: TaskTracker::new(),
            debounce,
            cancel,
        })
    }

    /// Buffer `event`, replacing anything pending for its date, and arm the
    /// flush timer if it isn't already.
    pub async fn enqueue_event(self: &Arc<Self>, event: Event) {
        let mut state = self.state.lock().await;

        match &mut *state {
            FlushState::Armed(pending) => {
                tracing::debug!(date = %event.iso_date, pending = pending.len(), "buffering event");
                pending.insert(event.iso_date.clone(), event);
            }
            FlushState::Idle => {
                tracing::debug!(date = %event.iso_date, debounce = ?self.debounce, "arming flush timer");
                *state = FlushState::Armed(BTreeMap::from([(event.iso_date.clone(), event)]));

                let client = Arc::clone(self);
                self.flushes.spawn(async move { client.flush_after_debounce().await });
            }
        }
    }

    async fn flush_after_debounce(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.debounce) => {}
            _ = self.cancel.cancelled() => {
                tracing::debug!("shutdown requested, flushing buffered events early");
            }
        }

        if let Err(e) = self.sync_buffer().await {
            tracing::warn!(error = %e, "failed to sync buffered events");
        }
    }

    /// Reconcile every buffered date in date order and return to idle.
    ///
    /// Each failure is logged; only the last one is returned.
    pub async fn sync_buffer(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        let FlushState::Armed(pending) = std::mem::replace(&mut *state, FlushState::Idle) else {
            return Ok(());
        };

        tracing::info!(events = pending.len(), "syncing buffered events");

        let mut last_error = None;
        for (date, event) in pending {
            if let Err(e) = self.sync_event(&event).await {
                tracing::warn!(%date, error = %e, "failed to sync event");
                last_error = Some(SyncError::Event {
                    date,
                    source: Box::new(e),
                });
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Make the remote calendar hold exactly `event` for its date: keep the
    /// first identical remote event, delete every other one, and insert when
    /// nothing matched (unless the event is the rest-day sentinel).
    pub async fn sync_event(&self, event: &Event) -> Result<(), SyncError> {
        let date = event.date()?;
        let remote = self
            .backend
            .list(&EventQuery::around(date, &event.iso_date))
            .await
            .map_err(|source| SyncError::List {
                scope: format!("for {}", event.iso_date),
                source,
            })?;

        let mut found = false;
        for candidate in remote {
            if !found && candidate.event == *event {
                found = true;
                continue;
            }

            if let Err(e) = self.backend.delete(&candidate.id).await {
                tracing::warn!(id = %candidate.id, date = %event.iso_date, error = %e, "failed to delete stale event");
            }
        }

        if found || event.is_sentinel() {
            return Ok(());
        }

        let created = self
            .backend
            .insert(event)
            .await
            .map_err(|source| SyncError::Insert {
                date: event.iso_date.clone(),
                source,
            })?;
        tracing::debug!(id = %created.id, date = %event.iso_date, "created event");
        Ok(())
    }

    /// Delete every managed event ending after `threshold`.
    ///
    /// Per-event failures are logged and skipped; the last one is returned.
    pub async fn delete_after(&self, threshold: DateTime<Utc>) -> Result<(), SyncError> {
        let _state = self.state.lock().await;

        let remote = self
            .backend
            .list(&EventQuery::starting_at(threshold))
            .await
            .map_err(|source| SyncError::List {
                scope: format!("after {}", threshold.to_rfc3339()),
                source,
            })?;

        tracing::info!(events = remote.len(), %threshold, "deleting events");

        let mut last_error = None;
        for candidate in remote {
            if let Err(source) = self.backend.delete(&candidate.id).await {
                tracing::warn!(id = %candidate.id, error = %source, "failed to delete event");
                last_error = Some(SyncError::Delete {
                    id: candidate.id,
                    source,
                });
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wait for the armed flush, if any, to finish. No new timer may be armed
    /// afterwards.
    pub async fn wait_for_flush(&self) {
        self.flushes.close();
        self.flushes.wait().await;
    }
}
