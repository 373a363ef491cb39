use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::datetime::DayWindow;
use crate::grid::Placement;
use crate::schedule::{DaySchedule, EntryKind, ScheduleEntry};
use crate::session::{ConnectedAccount, SessionState};
use crate::slot::{self, GRID_END_MINUTES, TimeOfDay};

/// Row that all-day events are pinned to.
pub const ALL_DAY_SLOT: TimeOfDay = TimeOfDay::FIRST;

const UNTITLED_EVENT: &str = "(No title)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    #[serde(rename = "dateTime")]
    Timed(DateTime<FixedOffset>),
    #[serde(rename = "date")]
    AllDay(NaiveDate),
}

/// An event as normalized from any calendar provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: EventTime,
    #[serde(default)]
    pub end: Option<EventTime>,
    pub calendar_id: String,
    pub calendar_name: String,
    #[serde(default)]
    pub calendar_color: Option<String>,
    pub account_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarInfo {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub background_color: Option<String>,
    pub account_email: String,
    #[serde(default)]
    pub primary: bool,
}

impl CalendarEvent {
    pub fn is_all_day(&self) -> bool {
        matches!(self.start, EventTime::AllDay(_))
    }

    /// Grid position on `date`, or `None` when the event does not start on
    /// the visible part of that day.
    pub fn placement(&self, date: NaiveDate, tz: &Tz) -> Option<Placement> {
        match &self.start {
            EventTime::AllDay(start) => {
                let end = match &self.end {
                    Some(EventTime::AllDay(end)) => *end,
                    _ => start.succ_opt()?,
                };
                (*start <= date && date < end.max(start.succ_opt()?)).then_some(Placement {
                    anchor: ALL_DAY_SLOT,
                    end_minutes: None,
                })
            }
            EventTime::Timed(start) => {
                let local_start = start.with_timezone(tz);
                if local_start.date_naive() != date {
                    return None;
                }
                let anchor = TimeOfDay::floor_minutes(minutes_of(local_start.time()))?;
                let end_minutes = match &self.end {
                    Some(EventTime::Timed(end)) => {
                        let local_end = end.with_timezone(tz);
                        match local_end.date_naive().cmp(&date) {
                            Ordering::Equal => Some(minutes_of(local_end.time())),
                            Ordering::Greater => Some(GRID_END_MINUTES),
                            Ordering::Less => None,
                        }
                    }
                    _ => None,
                }
                .filter(|end| *end > anchor.minutes_since_midnight());
                Some(Placement {
                    anchor,
                    end_minutes,
                })
            }
        }
    }

    fn to_entry(&self, placement: Placement) -> ScheduleEntry {
        let name = if self.summary.trim().is_empty() {
            UNTITLED_EVENT.to_string()
        } else {
            self.summary.trim().to_string()
        };
        let duration_minutes = placement
            .end_minutes
            .map(|end| end - placement.anchor.minutes_since_midnight());
        ScheduleEntry {
            name,
            kind: EntryKind::Calendar,
            duration_minutes,
            end_time: placement.end_minutes.map(slot::format_minutes),
            calendar_name: Some(self.calendar_name.clone()),
            event_id: Some(self.id.clone()),
            all_day: self.is_all_day(),
            ..ScheduleEntry::custom(String::new())
        }
    }

    fn sort_key(&self) -> (i64, &str, &str) {
        let ts = match &self.start {
            EventTime::Timed(dt) => dt.timestamp(),
            EventTime::AllDay(date) => date
                .and_hms_opt(0, 0, 0)
                .map(|ndt| ndt.and_utc().timestamp())
                .unwrap_or(i64::MIN),
        };
        (ts, self.calendar_name.as_str(), self.id.as_str())
    }
}

fn minutes_of(time: chrono::NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Grid placements of all events that land on `date`.
pub fn placements(events: &[CalendarEvent], date: NaiveDate, tz: &Tz) -> Vec<Placement> {
    events
        .iter()
        .filter_map(|event| event.placement(date, tz))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub schedule: DaySchedule,
    pub imported: Vec<TimeOfDay>,
    pub skipped: usize,
}

/// Imports events into empty slots. Occupied slots and events that are
/// already present keep what they have, so repeated merges are no-ops.
pub fn merge_events(
    existing: &DaySchedule,
    events: &[CalendarEvent],
    date: NaiveDate,
    tz: &Tz,
) -> MergeOutcome {
    let mut schedule = existing.clone();
    let mut imported = Vec::new();
    let mut skipped = 0;

    for event in events {
        let Some(placement) = event.placement(date, tz) else {
            debug!(event = %event.id, "event outside the visible grid; dropped");
            skipped += 1;
            continue;
        };
        if schedule.contains_event(&event.id) {
            skipped += 1;
            continue;
        }
        if schedule.insert_if_empty(placement.anchor, event.to_entry(placement)) {
            imported.push(placement.anchor);
        } else {
            debug!(event = %event.id, slot = %placement.anchor, "slot occupied; keeping existing entry");
            skipped += 1;
        }
    }

    MergeOutcome {
        schedule,
        imported,
        skipped,
    }
}

/// Merges a fetched batch into the schedule for `view_date`, refusing
/// batches fetched for another day.
pub fn merge_fetched_day(
    view_date: NaiveDate,
    existing: &DaySchedule,
    fetched: &FetchedDay,
    tz: &Tz,
) -> Option<MergeOutcome> {
    if fetched.date != view_date {
        warn!(
            fetched = %fetched.date,
            viewing = %view_date,
            "discarding calendar results for a different day"
        );
        return None;
    }
    Some(merge_events(existing, &fetched.events, view_date, tz))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    Fetch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub account: String,
    pub calendar: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

/// Raised by sources when the provider rejects the account's token.
#[derive(Debug, Clone)]
pub struct AuthRejected {
    pub account: String,
    pub status: u16,
}

impl fmt::Display for AuthRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "calendar provider rejected the token for {} (HTTP {}); re-authenticate",
            self.account, self.status
        )
    }
}

impl std::error::Error for AuthRejected {}

fn classify(err: &anyhow::Error) -> FailureKind {
    if err.downcast_ref::<AuthRejected>().is_some() {
        FailureKind::Auth
    } else {
        FailureKind::Fetch
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDay {
    pub date: NaiveDate,
    pub calendars: Vec<CalendarInfo>,
    pub events: Vec<CalendarEvent>,
    pub failures: Vec<FetchFailure>,
}

pub trait CalendarSource: Send + Sync + 'static {
    fn list_calendars(
        &self,
        account: &ConnectedAccount,
    ) -> impl Future<Output = anyhow::Result<Vec<CalendarInfo>>> + Send;

    fn list_events(
        &self,
        account: &ConnectedAccount,
        calendar: &CalendarInfo,
        window: &DayWindow,
    ) -> impl Future<Output = anyhow::Result<Vec<CalendarEvent>>> + Send;
}

/// Lists calendars for every account with a live token. Accounts that fail
/// are reported and skipped.
#[instrument(skip(source, session))]
pub async fn list_calendars<S: CalendarSource>(
    source: Arc<S>,
    session: &SessionState,
    now: DateTime<Utc>,
) -> (Vec<CalendarInfo>, Vec<FetchFailure>) {
    let mut failures = Vec::new();
    let mut set = JoinSet::new();

    for account in &session.accounts {
        if account.is_token_expired(now, session.token_ttl) {
            warn!(account = %account.email, "access token expired; skipping account");
            failures.push(FetchFailure {
                account: account.email.clone(),
                calendar: None,
                kind: FailureKind::Auth,
                message: "access token expired; re-authenticate".to_string(),
            });
            continue;
        }
        let source = Arc::clone(&source);
        let account = account.clone();
        set.spawn(async move {
            let result = source.list_calendars(&account).await;
            (account.email, result)
        });
    }

    let mut calendars = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, Ok(mut listed))) => calendars.append(&mut listed),
            Ok((email, Err(err))) => {
                warn!(account = %email, error = %format!("{err:#}"), "failed to list calendars");
                failures.push(FetchFailure {
                    account: email,
                    calendar: None,
                    kind: classify(&err),
                    message: format!("{err:#}"),
                });
            }
            Err(err) => {
                warn!(error = %err, "calendar list task failed");
                failures.push(FetchFailure {
                    account: String::new(),
                    calendar: None,
                    kind: FailureKind::Fetch,
                    message: err.to_string(),
                });
            }
        }
    }

    calendars.sort_by(|a, b| {
        (a.account_email.as_str(), !a.primary, a.summary.as_str())
            .cmp(&(b.account_email.as_str(), !b.primary, b.summary.as_str()))
    });
    (calendars, failures)
}

/// Fetches the selected calendars of every connected account for one day.
/// Requests run concurrently; a failing account or calendar is recorded and
/// the rest still contribute their events.
#[instrument(skip(source, session, window), fields(accounts = session.accounts.len()))]
pub async fn fetch_day<S: CalendarSource>(
    source: Arc<S>,
    session: &SessionState,
    date: NaiveDate,
    window: DayWindow,
    now: DateTime<Utc>,
) -> FetchedDay {
    let (calendars, mut failures) = list_calendars(Arc::clone(&source), session, now).await;
    let selected: Vec<CalendarInfo> = calendars
        .iter()
        .filter(|cal| session.is_calendar_selected(&cal.id))
        .cloned()
        .collect();
    debug!(available = calendars.len(), selected = selected.len(), "fetching events");

    let mut set = JoinSet::new();
    for calendar in selected {
        let Some(account) = session.account(&calendar.account_email).cloned() else {
            continue;
        };
        let source = Arc::clone(&source);
        let window = window.clone();
        set.spawn(async move {
            let result = source.list_events(&account, &calendar, &window).await;
            (account.email, calendar, result)
        });
    }

    let mut events = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((_, _, Ok(mut fetched))) => events.append(&mut fetched),
            Ok((email, calendar, Err(err))) => {
                warn!(
                    account = %email,
                    calendar = %calendar.summary,
                    error = %format!("{err:#}"),
                    "failed to fetch events"
                );
                failures.push(FetchFailure {
                    account: email,
                    calendar: Some(calendar.summary),
                    kind: classify(&err),
                    message: format!("{err:#}"),
                });
            }
            Err(err) => {
                warn!(error = %err, "event fetch task failed");
                failures.push(FetchFailure {
                    account: String::new(),
                    calendar: None,
                    kind: FailureKind::Fetch,
                    message: err.to_string(),
                });
            }
        }
    }

    events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    info!(
        %date,
        events = events.len(),
        failures = failures.len(),
        "calendar fetch finished"
    );

    FetchedDay {
        date,
        calendars,
        events,
        failures,
    }
}
