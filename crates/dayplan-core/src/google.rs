//! Google Calendar v3 client.
//!
//! Only the two read endpoints the planner needs are covered: the calendar
//! list and a calendar's events inside a time window.

use std::time::Duration;

use anyhow::{Context, anyhow};
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::calendar::{AuthRejected, CalendarEvent, CalendarInfo, CalendarSource, EventTime};
use crate::datetime::DayWindow;
use crate::session::ConnectedAccount;

const MAX_PAGES: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListEntry {
    id: String,
    summary: Option<String>,
    summary_override: Option<String>,
    background_color: Option<String>,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsResponse {
    #[serde(default)]
    items: Vec<WireEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    id: String,
    summary: Option<String>,
    status: Option<String>,
    start: Option<WireEventTime>,
    end: Option<WireEventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEventTime {
    date_time: Option<DateTime<FixedOffset>>,
    date: Option<NaiveDate>,
}

impl WireEventTime {
    fn normalize(self) -> Option<EventTime> {
        match (self.date_time, self.date) {
            (Some(dt), _) => Some(EventTime::Timed(dt)),
            (None, Some(date)) => Some(EventTime::AllDay(date)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    api_base: Url,
}

impl GoogleCalendarClient {
    pub fn new(api_base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let api_base =
            Url::parse(api_base).with_context(|| format!("invalid calendar api base: {api_base}"))?;
        if api_base.cannot_be_a_base() {
            return Err(anyhow!("calendar api base must be a hierarchical URL: {api_base}"));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building HTTP client for calendar sync")?;
        Ok(Self { http, api_base })
    }

    fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("calendar api base cannot take a path: {}", self.api_base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    #[instrument(skip(self, account), fields(account = %account.email, url = %url))]
    async fn get_json<T: DeserializeOwned>(
        &self,
        account: &ConnectedAccount,
        url: Url,
    ) -> anyhow::Result<T> {
        let response = self
            .http
            .get(url.clone())
            .bearer_auth(&account.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("failed requesting {}", redact(&url)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(status = %status, "calendar provider rejected access token");
            return Err(AuthRejected {
                account: account.email.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("failed reading response body from {}", redact(&url)))?;
        if !status.is_success() {
            return Err(anyhow!(
                "calendar request returned HTTP {} for {}",
                status,
                redact(&url)
            ));
        }

        debug!(bytes = body.len(), "calendar response received");
        serde_json::from_str(&body)
            .with_context(|| format!("failed parsing calendar response from {}", redact(&url)))
    }
}

impl CalendarSource for GoogleCalendarClient {
    async fn list_calendars(&self, account: &ConnectedAccount) -> anyhow::Result<Vec<CalendarInfo>> {
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut url = self.endpoint(&["users", "me", "calendarList"])?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: CalendarListResponse = self.get_json(account, url).await?;
            calendars.extend(
                page.items
                    .into_iter()
                    .map(|entry| normalize_calendar(entry, &account.email)),
            );
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!(account = %account.email, count = calendars.len(), "listed calendars");
        Ok(calendars)
    }

    async fn list_events(
        &self,
        account: &ConnectedAccount,
        calendar: &CalendarInfo,
        window: &DayWindow,
    ) -> anyhow::Result<Vec<CalendarEvent>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut url = self.endpoint(&["calendars", calendar.id.as_str(), "events"])?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("timeMin", &window.time_min_rfc3339())
                    .append_pair("timeMax", &window.time_max_rfc3339())
                    .append_pair("singleEvents", "true")
                    .append_pair("orderBy", "startTime");
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }
            let page: EventsResponse = self
                .get_json(account, url)
                .await
                .with_context(|| format!("calendar {}", calendar.summary))?;
            events.extend(normalize_events(page.items, calendar));
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!(calendar = %calendar.summary, count = events.len(), "listed events");
        Ok(events)
    }
}

fn normalize_calendar(entry: CalendarListEntry, account_email: &str) -> CalendarInfo {
    let summary = entry
        .summary_override
        .or(entry.summary)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| entry.id.clone());
    CalendarInfo {
        id: entry.id,
        summary,
        background_color: entry.background_color,
        account_email: account_email.to_string(),
        primary: entry.primary,
    }
}

fn normalize_events(items: Vec<WireEvent>, calendar: &CalendarInfo) -> Vec<CalendarEvent> {
    items
        .into_iter()
        .filter(|item| item.status.as_deref() != Some("cancelled"))
        .filter_map(|item| {
            let Some(start) = item.start.and_then(WireEventTime::normalize) else {
                debug!(event = %item.id, "event without a start; skipping");
                return None;
            };
            Some(CalendarEvent {
                id: item.id,
                summary: item.summary.unwrap_or_default(),
                start,
                end: item.end.and_then(WireEventTime::normalize),
                calendar_id: calendar.id.clone(),
                calendar_name: calendar.summary.clone(),
                calendar_color: calendar.background_color.clone(),
                account_email: calendar.account_email.clone(),
            })
        })
        .collect()
}

/// URL without its query string, for error messages.
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}
