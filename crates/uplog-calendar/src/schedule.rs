//! Pushing a workout schedule into the calendar at startup.

use std::path::Path;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{ScheduleError, SyncError};
use crate::event::{midnight_utc, parse_date, Event};
use crate::service::SyncService;

/// One day of the schedule; `workout` is absent on days with nothing planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub date: String,
    #[serde(default)]
    pub workout: Option<String>,
}

/// Read a JSON array of [`ScheduleEntry`].
pub fn load_schedule(path: &Path) -> Result<Vec<ScheduleEntry>, ScheduleError> {
    let json = std::fs::read_to_string(path).map_err(|source| ScheduleError::Io {
        path: path.display().to_string(),
        source,
    })?;

    serde_json::from_str(&json).map_err(|source| ScheduleError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Queue a sync for every scheduled workout, then clear managed events more
/// than a day past the last one.
///
/// Returns how many entries were queued; an uninitialized service queues
/// nothing.
pub async fn sync_schedule(
    service: &SyncService,
    entries: &[ScheduleEntry],
    description: &str,
) -> Result<usize, SyncError> {
    if !service.initialized() {
        tracing::warn!("calendar service not initialized, skipping schedule sync");
        return Ok(0);
    }

    let mut queued = 0;
    let mut last_date: Option<NaiveDate> = None;

    for entry in entries {
        let Some(workout) = &entry.workout else {
            continue;
        };
        let date = match parse_date(&entry.date) {
            Ok(date) => date,
            Err(e) => {
                tracing::warn!(error = %e, "skipping schedule entry");
                continue;
            }
        };

        service
            .sync(Event::new(workout.clone(), entry.date.clone(), description))
            .await?;
        queued += 1;
        last_date = last_date.max(Some(date));
    }

    if let Some(last) = last_date {
        service
            .delete_after(midnight_utc(last) + Duration::hours(48))
            .await?;
    }

    tracing::info!(queued, "queued schedule sync");
    Ok(queued)
}
