//! Calendar sync engine for uplog.
//!
//! [`SyncService`] is the entry point: it owns the OAuth lifecycle and a
//! single worker that feeds schedule updates into a [`BackingClient`], which
//! debounces them and reconciles each date against a [`CalendarBackend`].

pub mod backend;
pub mod backing;
pub mod client;
pub mod error;
pub mod event;
pub mod google;
pub mod memory;
pub mod schedule;
pub mod service;
pub mod types;

pub use backend::{BackendConnector, CalendarBackend};
pub use backing::BackingClient;
pub use client::CalendarClient;
pub use error::{CalendarError, ScheduleError, SyncError};
pub use event::{Event, EventQuery, RemoteEvent};
pub use google::{GoogleCalendar, GoogleConnector};
pub use memory::{CallCounts, MemoryCalendar, MemoryConnector};
pub use schedule::{load_schedule, sync_schedule, ScheduleEntry};
pub use service::{ServiceOptions, SyncService, SyncServiceBuilder};
