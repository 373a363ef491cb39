use anyhow::anyhow;
use tracing::instrument;

use super::{parse_minutes, required, resolve_id, split_mods, subcommand};
use crate::datastore::DataStore;
use crate::planner::{Planner, Priority, TaskFilter};
use crate::render::Renderer;

fn area_id(planner: &Planner, token: &str) -> anyhow::Result<String> {
    resolve_id(token, planner.areas.areas.iter().map(|a| a.id.as_str()), "life area")
}

fn project_id(planner: &Planner, token: &str) -> anyhow::Result<String> {
    resolve_id(
        token,
        planner.projects.values().flatten().map(|p| p.id.as_str()),
        "project",
    )
}

fn task_id(planner: &Planner, token: &str) -> anyhow::Result<String> {
    resolve_id(
        token,
        planner
            .projects
            .values()
            .flatten()
            .flat_map(|p| p.tasks.iter().map(|t| t.id.as_str())),
        "task",
    )
}

pub(super) fn cmd_areas(store: &DataStore, renderer: &mut Renderer) -> anyhow::Result<()> {
    let planner = store.load_planner()?;
    renderer.print_areas(&planner)
}

#[instrument(skip(store, args))]
pub(super) fn cmd_area(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    let mut planner = store.load_planner()?;
    match subcommand(args, "area", &["add", "edit", "delete"])? {
        "add" => {
            let (words, mods) = split_mods(&args[1..], &["color"]);
            let id = planner.add_area(&words.join(" "), mods.get("color").map(String::as_str))?;
            store.save_planner(&planner)?;
            println!("Created life area {id}.");
        }
        "edit" => {
            let id = area_id(&planner, required(args, 1, "life area id")?)?;
            let (words, mods) = split_mods(&args[2..], &["name", "color"]);
            if !words.is_empty() || mods.is_empty() {
                return Err(anyhow!("usage: area edit <AREA> [name:TEXT] [color:#rrggbb]"));
            }
            planner.edit_area(
                &id,
                mods.get("name").map(String::as_str),
                mods.get("color").map(String::as_str),
            )?;
            store.save_planner(&planner)?;
            println!("Updated life area {id}.");
        }
        _ => {
            let id = area_id(&planner, required(args, 1, "life area id")?)?;
            let removed = planner.delete_area(&id)?;
            store.save_planner(&planner)?;
            println!("Deleted life area \"{}\" and its projects.", removed.name);
        }
    }
    Ok(())
}

pub(super) fn cmd_projects(store: &DataStore, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    let planner = store.load_planner()?;
    let area = args.first().map(|token| area_id(&planner, token)).transpose()?;
    renderer.print_projects(&planner, area.as_deref())
}

#[instrument(skip(store, args))]
pub(super) fn cmd_project(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    let mut planner = store.load_planner()?;
    match subcommand(args, "project", &["add", "rename", "delete"])? {
        "add" => {
            let area = area_id(&planner, required(args, 1, "life area id")?)?;
            let id = planner.add_project(&area, &args[2..].join(" "))?;
            store.save_planner(&planner)?;
            println!("Created project {id}.");
        }
        "rename" => {
            let id = project_id(&planner, required(args, 1, "project id")?)?;
            planner.rename_project(&id, &args[2..].join(" "))?;
            store.save_planner(&planner)?;
            println!("Renamed project {id}.");
        }
        _ => {
            let id = project_id(&planner, required(args, 1, "project id")?)?;
            let removed = planner.delete_project(&id)?;
            store.save_planner(&planner)?;
            println!(
                "Deleted project \"{}\" ({} tasks).",
                removed.name,
                removed.tasks.len()
            );
        }
    }
    Ok(())
}

/// `tasks [area:A[,B]] [project:P] [TEXT...]`, most often scheduled first.
pub(super) fn cmd_tasks(store: &DataStore, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    let planner = store.load_planner()?;
    let filter = task_filter(&planner, args)?;
    let frequency = store.task_frequency()?;
    let listed = planner.pick_tasks(&filter, &frequency);
    renderer.print_tasks(&listed)
}

fn task_filter(planner: &Planner, args: &[String]) -> anyhow::Result<TaskFilter> {
    let (words, mods) = split_mods(args, &["area", "project"]);
    let areas = mods
        .get("area")
        .map(|raw| {
            raw.split(',')
                .filter(|token| !token.trim().is_empty())
                .map(|token| area_id(planner, token.trim()))
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    let project = mods
        .get("project")
        .map(|token| project_id(planner, token))
        .transpose()?;
    let search = Some(words.join(" ")).filter(|text| !text.trim().is_empty());
    Ok(TaskFilter {
        search,
        areas,
        project,
    })
}

#[instrument(skip(store, args))]
pub(super) fn cmd_task(store: &DataStore, args: &[String]) -> anyhow::Result<()> {
    let mut planner = store.load_planner()?;
    match subcommand(args, "task", &["add", "edit", "done", "delete"])? {
        "add" => {
            let project = project_id(&planner, required(args, 1, "project id")?)?;
            let (words, mods) = split_mods(&args[2..], &["priority", "duration"]);
            let priority = mods
                .get("priority")
                .map(|raw| raw.parse::<Priority>())
                .transpose()?
                .unwrap_or_default();
            let duration = mods.get("duration").map(|raw| parse_minutes(raw)).transpose()?;
            let id = planner.add_task(&project, &words.join(" "), priority, duration)?;
            store.save_planner(&planner)?;
            println!("Created task {id}.");
        }
        "edit" => {
            let id = task_id(&planner, required(args, 1, "task id")?)?;
            let (words, mods) = split_mods(&args[2..], &["name", "priority", "duration"]);
            if !words.is_empty() || mods.is_empty() {
                return Err(anyhow!(
                    "usage: task edit <TASK> [name:TEXT] [priority:P] [duration:MIN]"
                ));
            }
            let priority = mods
                .get("priority")
                .map(|raw| raw.parse::<Priority>())
                .transpose()?;
            let duration = mods.get("duration").map(|raw| parse_minutes(raw)).transpose()?;
            planner.edit_task(&id, mods.get("name").map(String::as_str), priority, duration)?;
            store.save_planner(&planner)?;
            println!("Updated task {id}.");
        }
        "done" => {
            let id = task_id(&planner, required(args, 1, "task id")?)?;
            let completed = planner.toggle_task(&id)?;
            store.save_planner(&planner)?;
            let state = if completed { "completed" } else { "reopened" };
            println!("Task {id} {state}.");
        }
        _ => {
            let id = task_id(&planner, required(args, 1, "task id")?)?;
            let removed = planner.delete_task(&id)?;
            store.save_planner(&planner)?;
            println!("Deleted task \"{}\".", removed.name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn task_filter_reads_modifiers_and_search_words() {
        let mut planner = Planner::new(crate::planner::LifeAreasDoc::seeded(), Default::default());
        let project = planner.add_project("health", "Gym").expect("project");
        let prefix = &project[..8];

        let filter = task_filter(
            &planner,
            &strings(&["area:he,mon", "leg", "day", &format!("project:{prefix}")]),
        )
        .expect("filter");

        assert_eq!(filter.areas, vec!["health", "money"]);
        assert_eq!(filter.project.as_deref(), Some(project.as_str()));
        assert_eq!(filter.search.as_deref(), Some("leg day"));

        let empty = task_filter(&planner, &[]).expect("empty");
        assert_eq!(empty, TaskFilter::default());
        assert!(task_filter(&planner, &strings(&["area:nowhere"])).is_err());
    }
}
