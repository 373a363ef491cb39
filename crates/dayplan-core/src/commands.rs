mod calendar;
mod day;
mod planner;

use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use chrono::Utc;
use tracing::{debug, instrument};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::render::Renderer;
use crate::slot::TimeOfDay;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "show",
        "date",
        "click",
        "collapse",
        "place",
        "add",
        "edit",
        "move",
        "remove",
        "assign",
        "areas",
        "area",
        "projects",
        "project",
        "tasks",
        "task",
        "accounts",
        "account",
        "calendars",
        "calendar",
        "sync",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();
    let args = inv.command_args.as_slice();

    debug!(command, args = ?args, "dispatching command");

    match command {
        "show" => day::cmd_show(store, renderer, args, now),
        "date" => day::cmd_date(store, renderer, args, now),
        "click" => day::cmd_click(store, renderer, args, now),
        "collapse" => day::cmd_collapse(store, renderer, now),
        "place" => day::cmd_place(store, args, now),
        "add" => day::cmd_add(store, args, now),
        "edit" => day::cmd_edit(store, args, now),
        "move" => day::cmd_move(store, args, now),
        "remove" => day::cmd_remove(store, args, now),
        "assign" => day::cmd_assign(store, cfg, renderer, args, now),
        "areas" => planner::cmd_areas(store, renderer),
        "area" => planner::cmd_area(store, args),
        "projects" => planner::cmd_projects(store, renderer, args),
        "project" => planner::cmd_project(store, args),
        "tasks" => planner::cmd_tasks(store, renderer, args),
        "task" => planner::cmd_task(store, args),
        "accounts" => calendar::cmd_accounts(store, cfg, renderer, now),
        "account" => calendar::cmd_account(store, cfg, args, now),
        "calendars" => calendar::cmd_calendars(store, cfg, renderer, now),
        "calendar" => calendar::cmd_calendar(store, cfg, args),
        "sync" => calendar::cmd_sync(store, cfg, renderer, now),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "\
usage: dayplan [-v|-q] [--rc key=value] [--rcfile FILE] [--data DIR] <command> [args]

day grid
  show [DATE]                       show the active day (or DATE)
  date <EXPR>                       switch day: today, tomorrow, friday, +2d, 2026-03-10
  click <HH:MM>                     open or close the rows under an hour
  collapse                          close every hour
  place <HH:MM> <TASK>              schedule a planner task
  add <HH:MM> <TEXT...>             add a custom entry
  edit <HH:MM> [name:TEXT] [duration:MIN]
  move <FROM> <TO>                  move an entry to an empty slot
  remove <HH:MM>                    delete an entry
  assign <HH:MM> [PROJECT]          link an entry to a project (no project: recent ones)

planner
  areas | area add <NAME...> [color:#rrggbb] | area edit <AREA> [name:..] [color:..] | area delete <AREA>
  projects [AREA] | project add <AREA> <NAME...> | project rename <PROJECT> <NAME...> | project delete <PROJECT>
  tasks [area:A,B] [project:P] [TEXT...]   (most often scheduled first)
  task add <PROJECT> <NAME...> [priority:P] [duration:MIN] | task edit <TASK> [name:..] [priority:..] [duration:..]
  task done <TASK> | task delete <TASK>

calendar
  accounts | account add <EMAIL> <ACCESS_TOKEN> | account remove <EMAIL>
  calendars | calendar select <ID> | calendar deselect <ID>
  sync                              fetch the active day's events and merge them

Commands may be abbreviated when unambiguous. Ids may be given by prefix."
    );
    Ok(())
}

fn parse_slot(args: &[String], idx: usize, what: &str) -> anyhow::Result<TimeOfDay> {
    let raw = args
        .get(idx)
        .ok_or_else(|| anyhow!("missing {what} (HH:MM)"))?;
    raw.parse()
        .with_context(|| format!("invalid {what}: {raw}"))
}

fn required<'a>(args: &'a [String], idx: usize, what: &str) -> anyhow::Result<&'a str> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing {what}"))
}

fn subcommand<'a>(args: &'a [String], what: &str, known: &[&'a str]) -> anyhow::Result<&'a str> {
    let token = required(args, 0, &format!("{what} subcommand ({})", known.join("/")))?;
    expand_command_abbrev(token, known)
        .ok_or_else(|| anyhow!("unknown {what} subcommand: {token} ({})", known.join("/")))
}

/// Matches an id exactly or by unique prefix.
fn resolve_id<'a, I>(token: &str, ids: I, what: &str) -> anyhow::Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let ids: Vec<&str> = ids.into_iter().collect();
    if ids.contains(&token) {
        return Ok(token.to_string());
    }
    let matches: Vec<&str> = ids
        .iter()
        .copied()
        .filter(|id| id.starts_with(token))
        .collect();
    match matches.as_slice() {
        [only] => Ok((*only).to_string()),
        [] => Err(anyhow!("{what} not found: {token}")),
        _ => Err(anyhow!("{what} id prefix is ambiguous: {token}")),
    }
}

/// Separates `key:value` modifiers for the given keys from plain words.
fn split_mods(args: &[String], keys: &[&str]) -> (Vec<String>, BTreeMap<String, String>) {
    let mut words = Vec::new();
    let mut mods = BTreeMap::new();
    for arg in args {
        match arg.split_once(':') {
            Some((key, value)) if keys.contains(&key) => {
                mods.insert(key.to_string(), value.to_string());
            }
            _ => words.push(arg.clone()),
        }
    }
    (words, mods)
}

fn parse_minutes(raw: &str) -> anyhow::Result<u32> {
    raw.trim()
        .trim_end_matches('m')
        .parse()
        .with_context(|| format!("invalid duration in minutes: {raw}"))
}
