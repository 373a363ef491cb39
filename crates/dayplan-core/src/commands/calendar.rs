use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{info, instrument, warn};

use super::{required, subcommand};
use crate::calendar::{self, FetchedDay, MergeOutcome, merge_fetched_day};
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{day_window, planner_timezone, today_in};
use crate::google::GoogleCalendarClient;
use crate::render::Renderer;
use crate::session::SessionState;

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime for calendar sync")
}

fn client(cfg: &Config) -> anyhow::Result<Arc<GoogleCalendarClient>> {
    let client = GoogleCalendarClient::new(&cfg.api_base(), cfg.calendar_timeout()?)?;
    Ok(Arc::new(client))
}

fn load_session(store: &DataStore, cfg: &Config) -> anyhow::Result<SessionState> {
    store.load_session(cfg.token_ttl()?)
}

fn require_accounts(session: &SessionState) -> anyhow::Result<()> {
    if session.accounts.is_empty() {
        bail!("no connected calendar accounts; add one with `dayplan account add <EMAIL> <TOKEN>`");
    }
    Ok(())
}

pub(super) fn cmd_accounts(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let session = load_session(store, cfg)?;
    renderer.print_accounts(&session, now)
}

#[instrument(skip(store, cfg, args, now))]
pub(super) fn cmd_account(
    store: &DataStore,
    cfg: &Config,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let mut session = load_session(store, cfg)?;
    match subcommand(args, "account", &["add", "remove"])? {
        "add" => {
            let email = required(args, 1, "account email")?;
            let token = required(args, 2, "access token")?;
            session.connect(email, token, now)?;
            store.save_session(&session)?;
            let expires = now + session.token_ttl;
            println!(
                "Connected {email}; token treated as valid until {}.",
                expires.with_timezone(planner_timezone()).format("%H:%M")
            );
        }
        _ => {
            let email = required(args, 1, "account email")?;
            let removed = session.disconnect(email)?;
            store.save_session(&session)?;
            println!("Disconnected {}.", removed.email);
        }
    }
    Ok(())
}

#[instrument(skip(store, cfg, renderer, now))]
pub(super) fn cmd_calendars(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let session = load_session(store, cfg)?;
    require_accounts(&session)?;
    let source = client(cfg)?;
    let (calendars, failures) = runtime()?.block_on(calendar::list_calendars(source, &session, now));
    renderer.print_calendars(&calendars, &session)?;
    renderer.print_failures(&failures)
}

#[instrument(skip(store, cfg, args))]
pub(super) fn cmd_calendar(store: &DataStore, cfg: &Config, args: &[String]) -> anyhow::Result<()> {
    let mut session = load_session(store, cfg)?;
    let sub = subcommand(args, "calendar", &["select", "deselect"])?;
    let id = required(args, 1, "calendar id")?;
    match sub {
        "select" => {
            if !session.select_calendar(id) {
                println!("Calendar {id} is already selected.");
                return Ok(());
            }
            println!("Selected calendar {id}.");
        }
        _ => {
            session.deselect_calendar(id)?;
            if session.selected_calendars.is_empty() {
                println!("Deselected calendar {id}; every calendar will be synced.");
            } else {
                println!("Deselected calendar {id}.");
            }
        }
    }
    store.save_session(&session)
}

/// Merges a fetched batch into whichever day is active now. Another
/// invocation may have switched days while the fetch was running.
fn merge_into_active_day(
    store: &DataStore,
    fetched: &FetchedDay,
    tz: &Tz,
    now: DateTime<Utc>,
) -> anyhow::Result<(NaiveDate, Option<MergeOutcome>)> {
    let viewing = store.load_view(today_in(tz, now))?.date;
    let existing = store.load_schedule(viewing)?;
    let outcome = merge_fetched_day(viewing, &existing, fetched, tz);
    if let Some(merged) = &outcome
        && !merged.imported.is_empty()
    {
        store.save_schedule(viewing, &merged.schedule)?;
    }
    Ok((viewing, outcome))
}

#[instrument(skip(store, cfg, renderer, now))]
pub(super) fn cmd_sync(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let tz = planner_timezone();
    let date = store.load_view(today_in(tz, now))?.date;
    let session = load_session(store, cfg)?;
    require_accounts(&session)?;

    let source = client(cfg)?;
    let window = day_window(date, tz)?;
    let fetched = runtime()?.block_on(calendar::fetch_day(source, &session, date, window, now));
    store.save_events(date, &fetched.events)?;

    match merge_into_active_day(store, &fetched, tz, now)? {
        (viewing, Some(outcome)) => {
            info!(
                %viewing,
                imported = outcome.imported.len(),
                skipped = outcome.skipped,
                "calendar sync merged"
            );
            println!(
                "Fetched {} events; imported {}, skipped {}.",
                fetched.events.len(),
                outcome.imported.len(),
                outcome.skipped
            );
        }
        (viewing, None) => {
            warn!(%date, %viewing, "sync results were for a different day");
            println!(
                "Fetched {} events for {date}; the active day is now {viewing}, so nothing was merged.",
                fetched.events.len()
            );
        }
    }

    renderer.print_failures(&fetched.failures)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::calendar::{CalendarEvent, EventTime};
    use crate::slot::TimeOfDay;
    use crate::view::DayView;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).expect("valid date")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0)
            .single()
            .expect("valid now")
    }

    fn fetched_for(date: NaiveDate) -> FetchedDay {
        let start = date
            .and_hms_opt(9, 0, 0)
            .expect("valid start")
            .and_utc()
            .fixed_offset();
        FetchedDay {
            date,
            calendars: vec![],
            events: vec![CalendarEvent {
                id: "standup".to_string(),
                summary: "Standup".to_string(),
                start: EventTime::Timed(start),
                end: None,
                calendar_id: "primary".to_string(),
                calendar_name: "Work".to_string(),
                calendar_color: None,
                account_email: "me@example.com".to_string(),
            }],
            failures: vec![],
        }
    }

    #[test]
    fn batch_for_the_active_day_is_merged_and_saved() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), "local").expect("open");

        let (viewing, outcome) =
            merge_into_active_day(&store, &fetched_for(day(10)), &chrono_tz::UTC, now())
                .expect("merge");

        assert_eq!(viewing, day(10));
        assert_eq!(outcome.expect("merged").imported.len(), 1);
        let slot: TimeOfDay = "09:00".parse().expect("slot");
        assert!(store.load_schedule(day(10)).expect("load").is_occupied(slot));
    }

    #[test]
    fn batch_for_another_day_leaves_the_store_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), "local").expect("open");
        store.save_view(&DayView::new(day(11))).expect("save view");

        let (viewing, outcome) =
            merge_into_active_day(&store, &fetched_for(day(10)), &chrono_tz::UTC, now())
                .expect("merge");

        assert_eq!(viewing, day(11));
        assert!(outcome.is_none());
        assert!(store.load_schedule(day(10)).expect("load").is_empty());
        assert!(store.load_schedule(day(11)).expect("load").is_empty());
    }
}
