//! Google Calendar v3 client.

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, Utc};
use gwrap_core::ApiResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ServiceClient;
use crate::connection::{ApiRequest, Connector};
use crate::manager::CredentialManager;
use crate::scope::ServiceScope;

/// Calendar used when the query names none.
pub const PRIMARY_CALENDAR: &str = "primary";

/// A calendar of the user's calendar list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    #[serde(alias = "summary")]
    pub name: String,
    pub id: String,
}

/// Start or end of an event: a date for all-day events, a date-time otherwise.
///
/// Values are kept exactly as the provider sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventTime {
    /// Returns true for all-day events.
    pub fn is_all_day(&self) -> bool {
        self.date_time.is_none() && self.date.is_some()
    }

    /// Parses `dateTime`; None for all-day events or an unparsable value.
    pub fn parsed_date_time(&self) -> Option<DateTime<FixedOffset>> {
        let raw = self.date_time.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map_err(|e| warn!("failed to parse event time {}: {}", raw, e))
            .ok()
    }

    /// Parses `date`; None for timed events or an unparsable value.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        let raw = self.date.as_deref()?;
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| warn!("failed to parse event date {}: {}", raw, e))
            .ok()
    }
}

/// The reduced view of an event returned by [`CalendarClient::list_events`].
///
/// `description` and `location` are left out entirely when the event has none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimplifiedEvent {
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// An event as listed by the provider, reduced to the fields we read.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    start: EventTime,
    #[serde(default)]
    end: EventTime,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

impl RawEvent {
    fn is_cancelled(&self) -> bool {
        self.status.as_deref() == Some("cancelled")
    }

    fn simplify(self) -> SimplifiedEvent {
        SimplifiedEvent {
            summary: self.summary,
            start: self.start,
            end: self.end,
            description: self.description,
            location: self.location,
        }
    }
}

/// Parameters of an event listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub calendar_id: Option<String>,
    pub time_min: Option<DateTime<Utc>>,
    pub time_max: Option<DateTime<Utc>>,
    pub time_zone: Option<String>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calendar(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = Some(calendar_id.into());
        self
    }

    /// Lower bound (exclusive) on event end times.
    #[must_use]
    pub fn time_min(mut self, time_min: DateTime<Utc>) -> Self {
        self.time_min = Some(time_min);
        self
    }

    /// Upper bound (exclusive) on event start times.
    #[must_use]
    pub fn time_max(mut self, time_max: DateTime<Utc>) -> Self {
        self.time_max = Some(time_max);
        self
    }

    /// Time zone used in the response, e.g. `Europe/Paris`.
    #[must_use]
    pub fn time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    fn calendar_id(&self) -> &str {
        self.calendar_id.as_deref().unwrap_or(PRIMARY_CALENDAR)
    }
}

/// Reads calendars and events.
#[derive(Debug)]
pub struct CalendarClient {
    client: ServiceClient,
}

impl CalendarClient {
    pub fn connect(
        application_name: Option<&str>,
        manager: &mut CredentialManager,
        connector: &dyn Connector,
    ) -> ApiResult<Self> {
        let client =
            ServiceClient::connect(ServiceScope::Calendar, application_name, manager, connector)?;
        Ok(Self { client })
    }

    /// Returns every calendar in the user's calendar list.
    pub fn list_calendars(&self) -> ApiResult<Vec<CalendarEntry>> {
        let connection = self.client.connection();
        let request = ApiRequest::get(connection.url("users/me/calendarList"));
        let calendars: Vec<CalendarEntry> = connection.list(&request, "items")?;
        debug!("found {} calendar(s)", calendars.len());
        Ok(calendars)
    }

    /// Returns the events of a calendar, recurring events expanded.
    ///
    /// Events come back in the provider's start-time order; cancelled events
    /// are dropped.
    pub fn list_events(&self, query: &EventQuery) -> ApiResult<Vec<SimplifiedEvent>> {
        let connection = self.client.connection();
        let url = connection.url(&format!(
            "calendars/{}/events",
            urlencoding::encode(query.calendar_id())
        ));

        let mut request = ApiRequest::get(url)
            .with_query("showDeleted", "false")
            .with_query("orderBy", "startTime")
            .with_query("singleEvents", "true");
        if let Some(time_min) = query.time_min {
            request = request.with_query("timeMin", rfc3339(time_min));
        }
        if let Some(time_max) = query.time_max {
            request = request.with_query("timeMax", rfc3339(time_max));
        }
        if let Some(time_zone) = &query.time_zone {
            request = request.with_query("timeZone", time_zone);
        }

        let raw: Vec<RawEvent> = connection.list(&request, "items")?;
        let events: Vec<SimplifiedEvent> = raw
            .into_iter()
            .filter(|event| !event.is_cancelled())
            .map(RawEvent::simplify)
            .collect();

        debug!(
            "found {} event(s) in calendar {}",
            events.len(),
            query.calendar_id()
        );
        Ok(events)
    }

    pub fn service(&self) -> &ServiceClient {
        &self.client
    }
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
