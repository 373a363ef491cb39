use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, instrument};

use super::{parse_minutes, parse_slot, required, resolve_id, split_mods};
use crate::calendar::{self, CalendarEvent};
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{format_day_heading, parse_day_expr, planner_timezone, today_in};
use crate::grid;
use crate::planner::Project;
use crate::render::Renderer;
use crate::schedule::DaySchedule;
use crate::slot::TimeOfDay;
use crate::view::DayView;

fn load_view(store: &DataStore, now: DateTime<Utc>) -> anyhow::Result<DayView> {
    store.load_view(today_in(planner_timezone(), now))
}

fn visible_rows(store: &DataStore, view: &DayView) -> anyhow::Result<Vec<TimeOfDay>> {
    let schedule = store.load_schedule(view.date)?;
    let events = store.load_events(view.date)?;
    let placements = calendar::placements(&events, view.date, planner_timezone());
    let coverage = grid::resolve_coverage(&schedule, &placements);
    Ok(grid::visible_slots(&coverage, &view.expansion))
}

fn render_view(store: &DataStore, renderer: &mut Renderer, view: &DayView) -> anyhow::Result<()> {
    let tz = planner_timezone();
    let planner = store.load_planner()?;
    let schedule = store.load_schedule(view.date)?;
    let events = store.load_events(view.date)?;

    let placements = calendar::placements(&events, view.date, tz);
    let rows = grid::build_rows(&schedule, &placements, &view.expansion);

    let mut by_anchor: BTreeMap<TimeOfDay, &CalendarEvent> = BTreeMap::new();
    for event in &events {
        if let Some(placement) = event.placement(view.date, tz) {
            by_anchor.entry(placement.anchor).or_insert(event);
        }
    }

    renderer.print_day(view.date, &rows, &planner, &by_anchor)
}

/// Loads the active day's schedule, applies `change`, and saves it.
fn update_schedule<F>(store: &DataStore, now: DateTime<Utc>, change: F) -> anyhow::Result<NaiveDate>
where
    F: FnOnce(&mut DaySchedule) -> anyhow::Result<()>,
{
    let date = load_view(store, now)?.date;
    let mut schedule = store.load_schedule(date)?;
    change(&mut schedule)?;
    store.save_schedule(date, &schedule)?;
    Ok(date)
}

#[instrument(skip(store, renderer, args, now))]
pub(super) fn cmd_show(
    store: &DataStore,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let active = load_view(store, now)?;
    let view = match args.first() {
        Some(expr) => {
            let date = parse_day_expr(expr, today_in(planner_timezone(), now))?;
            if date == active.date {
                active
            } else {
                DayView::new(date)
            }
        }
        None => active,
    };
    render_view(store, renderer, &view)
}

#[instrument(skip(store, renderer, args, now))]
pub(super) fn cmd_date(
    store: &DataStore,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let expr = required(args, 0, "date expression")?;
    let date = parse_day_expr(expr, today_in(planner_timezone(), now))?;
    let mut view = load_view(store, now)?;
    if view.set_date(date) {
        store.save_view(&view)?;
        info!(%date, "active date changed");
    }
    render_view(store, renderer, &view)
}

#[instrument(skip(store, renderer, args, now))]
pub(super) fn cmd_click(
    store: &DataStore,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let slot = parse_slot(args, 0, "row")?;
    let mut view = load_view(store, now)?;
    let visible = visible_rows(store, &view)?;
    view.click(slot, &visible)?;
    store.save_view(&view)?;
    render_view(store, renderer, &view)
}

#[instrument(skip(store, renderer, now))]
pub(super) fn cmd_collapse(
    store: &DataStore,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let mut view = load_view(store, now)?;
    view.expansion.clear();
    store.save_view(&view)?;
    render_view(store, renderer, &view)
}

#[instrument(skip(store, args, now))]
pub(super) fn cmd_place(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    let slot = parse_slot(args, 0, "slot")?;
    let token = required(args, 1, "task id")?;
    let planner = store.load_planner()?;
    let task_ids = planner
        .projects
        .values()
        .flatten()
        .flat_map(|p| p.tasks.iter().map(|t| t.id.as_str()));
    let task_id = resolve_id(token, task_ids, "task")?;
    let found = planner
        .find_task(&task_id)
        .ok_or_else(|| anyhow!("task not found: {task_id}"))?;

    let date = update_schedule(store, now, |schedule| {
        schedule.place_task(slot, found.area_id, found.project, found.task)
    })?;
    println!(
        "Placed \"{}\" at {slot} on {}.",
        found.task.name,
        format_day_heading(date)
    );
    Ok(())
}

#[instrument(skip(store, args, now))]
pub(super) fn cmd_add(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    let slot = parse_slot(args, 0, "slot")?;
    let text = args.get(1..).unwrap_or_default().join(" ");
    update_schedule(store, now, |schedule| schedule.add_custom(slot, &text))?;
    println!("Added \"{}\" at {slot}.", text.trim());
    Ok(())
}

#[instrument(skip(store, args, now))]
pub(super) fn cmd_edit(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    let slot = parse_slot(args, 0, "slot")?;
    let (words, mods) = split_mods(args.get(1..).unwrap_or_default(), &["name", "duration"]);
    if !words.is_empty() {
        return Err(anyhow!("unexpected arguments: {} (use name:TEXT or duration:MIN)", words.join(" ")));
    }
    if mods.is_empty() {
        return Err(anyhow!("nothing to change; use name:TEXT or duration:MIN"));
    }
    let duration = mods.get("duration").map(|raw| parse_minutes(raw)).transpose()?;
    let name = mods.get("name").map(String::as_str);

    update_schedule(store, now, |schedule| schedule.edit(slot, name, duration))?;
    println!("Updated entry at {slot}.");
    Ok(())
}

#[instrument(skip(store, args, now))]
pub(super) fn cmd_move(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    let from = parse_slot(args, 0, "source slot")?;
    let to = parse_slot(args, 1, "target slot")?;
    update_schedule(store, now, |schedule| schedule.move_entry(from, to))?;
    println!("Moved entry from {from} to {to}.");
    Ok(())
}

#[instrument(skip(store, args, now))]
pub(super) fn cmd_remove(store: &DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    let slot = parse_slot(args, 0, "slot")?;
    let mut removed = None;
    update_schedule(store, now, |schedule| {
        removed = Some(schedule.remove(slot)?);
        Ok(())
    })?;
    if let Some(entry) = removed {
        println!("Removed \"{}\" from {slot}.", entry.name);
    }
    Ok(())
}

/// Links an entry to a project. With only a slot, lists the recently used
/// projects to pick from.
#[instrument(skip(store, cfg, renderer, args, now))]
pub(super) fn cmd_assign(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let slot = parse_slot(args, 0, "slot")?;
    let planner = store.load_planner()?;
    let mut session = store.load_session(cfg.token_ttl()?)?;

    let Some(token) = args.get(1) else {
        let recent: Vec<(&str, &Project)> = session
            .recent_projects
            .iter()
            .filter_map(|id| planner.find_project(id))
            .collect();
        if recent.is_empty() {
            println!("No recently used projects; run `dayplan projects` to find one.");
            return Ok(());
        }
        println!("Recent projects for {slot}:");
        return renderer.print_recent_projects(&planner, &recent);
    };

    let project_ids = planner.projects.values().flatten().map(|p| p.id.as_str());
    let project_id = resolve_id(token, project_ids, "project")?;
    let (area_id, project) = planner
        .find_project(&project_id)
        .ok_or_else(|| anyhow!("project not found: {project_id}"))?;

    update_schedule(store, now, |schedule| {
        schedule.assign_project(slot, area_id, project)
    })?;
    session.note_recent_project(&project_id);
    store.save_session(&session)?;
    println!("Linked entry at {slot} to project \"{}\".", project.name);
    Ok(())
}
