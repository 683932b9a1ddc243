//! Google Calendar API client.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::instrument;

use crate::error::CalendarError;
use crate::types::*;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

pub struct CalendarClient {
    client: reqwest::Client,
    access_token: RwLock<String>,
    base_url: String,
}

impl CalendarClient {
    pub fn new(access_token: &str) -> Self {
        Self::new_with_base_url(access_token, CALENDAR_API_BASE)
    }

    pub fn new_with_base_url(access_token: &str, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: RwLock::new(access_token.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Swap in a refreshed access token for subsequent requests.
    pub fn set_access_token(&self, access_token: &str) {
        *self.access_token.write() = access_token.to_string();
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token.read())
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id),
        )
    }

    /// List one page of events ending after `time_min` (and starting before
    /// `time_max`, when given) that carry every `(key, value)` shared property.
    #[instrument(skip(self), level = "info")]
    pub async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: Option<DateTime<Utc>>,
        shared_properties: &[(String, String)],
        page_token: Option<&str>,
    ) -> Result<EventListResponse, CalendarError> {
        let mut url = format!(
            "{}?timeMin={}&singleEvents=true",
            self.events_url(calendar_id),
            urlencoding::encode(&time_min.to_rfc3339()),
        );

        if let Some(max) = time_max {
            url.push_str(&format!(
                "&timeMax={}",
                urlencoding::encode(&max.to_rfc3339())
            ));
        }
        for (key, value) in shared_properties {
            url.push_str(&format!(
                "&sharedExtendedProperty={}",
                urlencoding::encode(&format!("{}={}", key, value))
            ));
        }
        if let Some(pt) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(pt)));
        }

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Create a new event.
    #[instrument(skip(self, event), fields(summary = %event.summary), level = "info")]
    pub async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewApiEvent,
    ) -> Result<ApiEvent, CalendarError> {
        let response = self
            .client
            .post(self.events_url(calendar_id))
            .header("Authorization", self.auth_header())
            .json(event)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Delete an event.
    #[instrument(skip(self), level = "info")]
    pub async fn delete_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), CalendarError> {
        let url = format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id),
        );

        let response = self
            .client
            .delete(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        // Delete returns 204 No Content on success
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.error_for(response, event_id).await)
        }
    }

    /// Helper to handle API responses and errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CalendarError> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CalendarError::ApiError(format!("JSON parse error: {}", e)))
        } else {
            Err(self.error_for(response, "").await)
        }
    }

    async fn error_for(&self, response: reqwest::Response, subject: &str) -> CalendarError {
        let status = response.status();

        match status.as_u16() {
            401 => CalendarError::TokenExpired,
            403 => CalendarError::AuthRequired,
            404 => CalendarError::NotFound(subject.to_string()),
            409 => CalendarError::Conflict,
            410 => CalendarError::Gone(subject.to_string()),
            429 => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60);
                CalendarError::RateLimited(retry_after)
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                CalendarError::ApiError(format!("{}: {}", status, text))
            }
        }
    }
}
