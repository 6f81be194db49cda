//! Holiday gate — decides whether a scheduled broadcast should go out today.
//!
//! Any event on the configured public holiday calendar for the local day
//! means "holiday, skip". What happens when the calendar itself cannot be
//! read is governed by [`CalendarFailurePolicy`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;

use pushcast_common::config::{CalendarConfig, CalendarFailurePolicy};

const GOOGLE_CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("calendar responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid calendar request: {0}")]
    InvalidRequest(String),
}

/// Source of per-day calendar events.
#[async_trait]
pub trait HolidayCalendar: Send + Sync {
    /// Number of events on `day` in the calendar's local timezone.
    async fn events_on(&self, day: NaiveDate, timezone: Tz) -> Result<usize, CalendarError>;
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

/// Google Calendar v3 events API, authenticated with an API key.
pub struct GoogleCalendar {
    client: reqwest::Client,
    api_key: String,
    calendar_id: String,
}

impl GoogleCalendar {
    pub fn new(api_key: impl Into<String>, calendar_id: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            calendar_id: calendar_id.into(),
        })
    }

    fn events_url(&self) -> Result<reqwest::Url, CalendarError> {
        let mut url = reqwest::Url::parse(GOOGLE_CALENDAR_API)
            .map_err(|e| CalendarError::InvalidRequest(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| CalendarError::InvalidRequest("base URL cannot have a path".into()))?
            .extend(["calendars", self.calendar_id.as_str(), "events"]);
        Ok(url)
    }
}

/// `[start, end)` of `day` in `timezone`, as RFC 3339 strings.
pub fn day_bounds(day: NaiveDate, timezone: Tz) -> Option<(String, String)> {
    let local_midnight = |d: NaiveDate| {
        d.and_hms_opt(0, 0, 0)
            .and_then(|naive| timezone.from_local_datetime(&naive).earliest())
    };
    let start = local_midnight(day)?;
    let end = local_midnight(day.succ_opt()?)?;
    Some((start.to_rfc3339(), end.to_rfc3339()))
}

#[async_trait]
impl HolidayCalendar for GoogleCalendar {
    async fn events_on(&self, day: NaiveDate, timezone: Tz) -> Result<usize, CalendarError> {
        let (time_min, time_max) = day_bounds(day, timezone)
            .ok_or_else(|| CalendarError::InvalidRequest(format!("no local midnight on {}", day)))?;

        let response = self
            .client
            .get(self.events_url()?)
            .query(&[
                ("key", self.api_key.as_str()),
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("maxResults", "10"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let events: EventsResponse = response.json().await?;
        tracing::debug!(%day, events = events.items.len(), "Fetched calendar events");
        Ok(events.items.len())
    }
}

/// Verdict of the holiday gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    SkipHoliday { events: usize },
    SkipCalendarError { detail: String },
    ProceedDespiteCalendarError { detail: String },
}

impl GateDecision {
    pub fn should_send(&self) -> bool {
        matches!(
            self,
            GateDecision::Proceed | GateDecision::ProceedDespiteCalendarError { .. }
        )
    }

    /// Human-readable explanation for skipped runs.
    pub fn reason(&self) -> Option<String> {
        match self {
            GateDecision::Proceed => None,
            GateDecision::SkipHoliday { events } => {
                Some(format!("holiday: {} calendar event(s) today", events))
            }
            GateDecision::SkipCalendarError { detail } => {
                Some(format!("holiday calendar unavailable: {}", detail))
            }
            GateDecision::ProceedDespiteCalendarError { detail } => {
                Some(format!("holiday calendar unavailable, sending anyway: {}", detail))
            }
        }
    }
}

pub struct HolidayGate {
    calendar: Option<Arc<dyn HolidayCalendar>>,
    timezone: Tz,
    policy: CalendarFailurePolicy,
}

impl HolidayGate {
    pub fn new(
        calendar: Arc<dyn HolidayCalendar>,
        timezone: Tz,
        policy: CalendarFailurePolicy,
    ) -> Self {
        Self {
            calendar: Some(calendar),
            timezone,
            policy,
        }
    }

    /// Gate that always proceeds.
    pub fn disabled() -> Self {
        Self {
            calendar: None,
            timezone: chrono_tz::UTC,
            policy: CalendarFailurePolicy::default(),
        }
    }

    pub fn from_config(config: Option<&CalendarConfig>) -> Result<Self, reqwest::Error> {
        match config {
            Some(cfg) => {
                let calendar = GoogleCalendar::new(&cfg.api_key, &cfg.calendar_id)?;
                Ok(Self::new(Arc::new(calendar), cfg.timezone, cfg.failure_policy))
            }
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.calendar.is_some()
    }

    pub async fn check(&self, now: DateTime<Utc>) -> GateDecision {
        let Some(calendar) = &self.calendar else {
            return GateDecision::Proceed;
        };

        let today = now.with_timezone(&self.timezone).date_naive();
        match calendar.events_on(today, self.timezone).await {
            Ok(0) => GateDecision::Proceed,
            Ok(events) => {
                tracing::info!(%today, events, "Holiday detected, skipping broadcast");
                GateDecision::SkipHoliday { events }
            }
            Err(e) => {
                tracing::warn!(%today, error = %e, policy = %self.policy, "Holiday calendar check failed");
                match self.policy {
                    CalendarFailurePolicy::FailClosed => GateDecision::SkipCalendarError {
                        detail: e.to_string(),
                    },
                    CalendarFailurePolicy::FailOpen => GateDecision::ProceedDespiteCalendarError {
                        detail: e.to_string(),
                    },
                }
            }
        }
    }
}
