//! The value type the sync engine reconciles, and how it maps onto remote
//! calendar events.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::{ApiEvent, ApiEventTime, ExtendedProperties, NewApiEvent};

/// Shared property marking an event as managed by uplog.
pub const MARKER_TAG: &str = "uplog";
pub const MARKER_VALUE: &str = "true";
/// Shared property holding the schedule date the event stands for.
pub const DATE_TAG: &str = "date";
/// Summary of a rest day; like an empty summary it means "no event".
pub const REST_SUMMARY: &str = "REST";

const EVENT_COLOR_ID: &str = "7";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One logical calendar entry for one date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub summary: String,
    /// `YYYY-MM-DD`
    pub iso_date: String,
    pub description: String,
}

impl Event {
    pub fn new(
        summary: impl Into<String>,
        iso_date: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            summary: summary.into(),
            iso_date: iso_date.into(),
            description: description.into(),
        }
    }

    /// An event asking for the date to be left empty.
    pub fn cleared(iso_date: impl Into<String>) -> Self {
        Self {
            iso_date: iso_date.into(),
            ..Self::default()
        }
    }

    /// True for the empty / `REST` summary: no remote event should exist.
    pub fn is_sentinel(&self) -> bool {
        self.summary.is_empty() || self.summary == REST_SUMMARY
    }

    pub fn date(&self) -> Result<NaiveDate, SyncError> {
        parse_date(&self.iso_date)
    }

    /// Insert body: an all-day event on this date carrying the marker and
    /// date tags.
    pub fn to_api(&self) -> Result<NewApiEvent, SyncError> {
        let start = self.date()?;
        let end = start + Duration::days(1);

        Ok(NewApiEvent {
            summary: self.summary.clone(),
            description: self.description.clone(),
            color_id: EVENT_COLOR_ID.to_string(),
            start: ApiEventTime::date(self.iso_date.clone()),
            end: ApiEventTime::date(end.format(DATE_FORMAT).to_string()),
            extended_properties: ExtendedProperties {
                shared: HashMap::from([
                    (MARKER_TAG.to_string(), MARKER_VALUE.to_string()),
                    (DATE_TAG.to_string(), self.iso_date.clone()),
                ]),
                private: HashMap::new(),
            },
        })
    }

    /// Read a remote event back. Timed events have no all-day start date and
    /// come back with an empty `iso_date`, so they never compare equal.
    pub fn from_api(api: &ApiEvent) -> Self {
        Self {
            summary: api.summary.clone().unwrap_or_default(),
            iso_date: api
                .start
                .as_ref()
                .and_then(|t| t.date.clone())
                .unwrap_or_default(),
            description: api.description.clone().unwrap_or_default(),
        }
    }
}

pub fn parse_date(iso_date: &str) -> Result<NaiveDate, SyncError> {
    NaiveDate::parse_from_str(iso_date, DATE_FORMAT).map_err(|source| SyncError::InvalidDate {
        date: iso_date.to_string(),
        source,
    })
}

pub fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// A managed event as it exists on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    /// Backend-assigned identifier
    pub id: String,
    pub event: Event,
}

impl From<&ApiEvent> for RemoteEvent {
    fn from(api: &ApiEvent) -> Self {
        Self {
            id: api.id.clone(),
            event: Event::from_api(api),
        }
    }
}

/// A List request: the time window plus the optional date tag. The marker
/// tag is always applied by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// Lower bound on event end
    pub time_min: DateTime<Utc>,
    /// Upper bound on event start
    pub time_max: Option<DateTime<Utc>>,
    pub date_tag: Option<String>,
}

impl EventQuery {
    /// The events tagged for `iso_date` in the window one day either side of it.
    pub fn around(date: NaiveDate, iso_date: &str) -> Self {
        let midnight = midnight_utc(date);
        Self {
            time_min: midnight - Duration::days(1),
            time_max: Some(midnight + Duration::days(1)),
            date_tag: Some(iso_date.to_string()),
        }
    }

    /// Every managed event from `threshold` on.
    pub fn starting_at(threshold: DateTime<Utc>) -> Self {
        Self {
            time_min: threshold,
            time_max: None,
            date_tag: None,
        }
    }

    /// The `sharedExtendedProperty` constraints of this query.
    pub fn shared_properties(&self) -> Vec<(String, String)> {
        let mut props = vec![(MARKER_TAG.to_string(), MARKER_VALUE.to_string())];
        if let Some(date) = &self.date_tag {
            props.push((DATE_TAG.to_string(), date.clone()));
        }
        props
    }
}
