use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::schedule::DEFAULT_DURATION_MINUTES;

pub const MAX_AREA_NAME_LEN: usize = 50;
pub const MAX_PROJECT_NAME_LEN: usize = 100;
pub const MAX_TASK_NAME_LEN: usize = 100;
pub const MIN_TASK_DURATION: u32 = 15;
pub const MAX_TASK_DURATION: u32 = 240;

pub const LIFE_AREA_COLORS: [&str; 12] = [
    "#2196f3", "#4caf50", "#ff9800", "#9c27b0", "#009688", "#e91e63", "#f44336", "#00bcd4",
    "#8bc34a", "#ff5722", "#3f51b5", "#ffc107",
];

const DEFAULT_AREAS: [(&str, &str, &str); 6] = [
    ("education", "Education", "#2196f3"),
    ("health", "Health", "#4caf50"),
    ("family", "Family", "#ff9800"),
    ("friends", "Friends", "#9c27b0"),
    ("money", "Money", "#009688"),
    ("relationship", "Relationship", "#e91e63"),
];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    #[default]
    Medium,
    Low,
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urgent" | "u" => Ok(Self::Urgent),
            "high" | "h" => Ok(Self::High),
            "medium" | "m" => Ok(Self::Medium),
            "low" | "l" => Ok(Self::Low),
            other => Err(anyhow!("invalid priority: {other} (urgent, high, medium, low)")),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifeArea {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlannerTask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<PlannerTask>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifeAreasDoc {
    pub areas: Vec<LifeArea>,
}

impl LifeAreasDoc {
    pub fn seeded() -> Self {
        Self {
            areas: DEFAULT_AREAS
                .iter()
                .map(|(id, name, color)| LifeArea {
                    id: (*id).to_string(),
                    name: (*name).to_string(),
                    color: (*color).to_string(),
                })
                .collect(),
        }
    }
}

/// Projects grouped by life-area id, each list kept in insertion order.
pub type ProjectsDoc = BTreeMap<String, Vec<Project>>;

/// In-memory planner: life areas plus their projects and tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Planner {
    pub areas: LifeAreasDoc,
    pub projects: ProjectsDoc,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskRef<'a> {
    pub area_id: &'a str,
    pub project: &'a Project,
    pub task: &'a PlannerTask,
}

/// Narrows the task list the way the picker does: free-text search over
/// task, project and area names, plus optional area and project limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub search: Option<String>,
    pub areas: Vec<String>,
    pub project: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskListing<'a> {
    pub area: &'a LifeArea,
    pub project: &'a Project,
    pub task: &'a PlannerTask,
    /// How many stored schedule entries were placed from this task.
    pub scheduled: usize,
}

impl TaskFilter {
    fn matches(&self, area: &LifeArea, project: &Project, task: &PlannerTask) -> bool {
        if !self.areas.is_empty() && !self.areas.contains(&area.id) {
            return false;
        }
        if self.project.as_deref().is_some_and(|id| id != project.id) {
            return false;
        }
        match self.search.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            Some(query) => {
                let query = query.to_lowercase();
                [&task.name, &project.name, &area.name]
                    .iter()
                    .any(|name| name.to_lowercase().contains(&query))
            }
            None => true,
        }
    }
}

impl Planner {
    pub fn new(areas: LifeAreasDoc, projects: ProjectsDoc) -> Self {
        Self { areas, projects }
    }

    pub fn area(&self, id: &str) -> Option<&LifeArea> {
        self.areas.areas.iter().find(|area| area.id == id)
    }

    pub fn projects_in(&self, area_id: &str) -> &[Project] {
        self.projects
            .get(area_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn find_project(&self, project_id: &str) -> Option<(&str, &Project)> {
        self.projects.iter().find_map(|(area_id, projects)| {
            projects
                .iter()
                .find(|p| p.id == project_id)
                .map(|p| (area_id.as_str(), p))
        })
    }

    pub fn find_task(&self, task_id: &str) -> Option<TaskRef<'_>> {
        self.projects.iter().find_map(|(area_id, projects)| {
            projects.iter().find_map(|project| {
                project
                    .tasks
                    .iter()
                    .find(|t| t.id == task_id)
                    .map(|task| TaskRef {
                        area_id: area_id.as_str(),
                        project,
                        task,
                    })
            })
        })
    }

    /// Tasks passing `filter`, most often scheduled first, then by name.
    pub fn pick_tasks(
        &self,
        filter: &TaskFilter,
        frequency: &HashMap<String, usize>,
    ) -> Vec<TaskListing<'_>> {
        let mut listed: Vec<TaskListing<'_>> = self
            .areas
            .areas
            .iter()
            .flat_map(move |area| {
                self.projects_in(&area.id).iter().flat_map(move |project| {
                    project.tasks.iter().map(move |task| TaskListing {
                        area,
                        project,
                        task,
                        scheduled: frequency.get(&task.id).copied().unwrap_or(0),
                    })
                })
            })
            .filter(|l| filter.matches(l.area, l.project, l.task))
            .collect();
        listed.sort_by(|a, b| {
            b.scheduled
                .cmp(&a.scheduled)
                .then_with(|| a.task.name.to_lowercase().cmp(&b.task.name.to_lowercase()))
                .then_with(|| a.task.id.cmp(&b.task.id))
        });
        listed
    }

    pub fn add_area(&mut self, name: &str, color: Option<&str>) -> anyhow::Result<String> {
        let name = validate_name(name, "life area", MAX_AREA_NAME_LEN)?;
        if self
            .areas
            .areas
            .iter()
            .any(|a| a.name.eq_ignore_ascii_case(&name))
        {
            bail!("a life area named \"{name}\" already exists");
        }
        let color = match color {
            Some(raw) => validate_color(raw)?,
            None => LIFE_AREA_COLORS[self.areas.areas.len() % LIFE_AREA_COLORS.len()].to_string(),
        };
        let id = new_id();
        info!(%id, %name, %color, "adding life area");
        self.areas.areas.push(LifeArea {
            id: id.clone(),
            name,
            color,
        });
        self.projects.entry(id.clone()).or_default();
        Ok(id)
    }

    pub fn edit_area(
        &mut self,
        id: &str,
        name: Option<&str>,
        color: Option<&str>,
    ) -> anyhow::Result<()> {
        let name = name
            .map(|n| validate_name(n, "life area", MAX_AREA_NAME_LEN))
            .transpose()?;
        let color = color.map(validate_color).transpose()?;
        if let Some(name) = &name
            && self
                .areas
                .areas
                .iter()
                .any(|a| a.id != id && a.name.eq_ignore_ascii_case(name))
        {
            bail!("a life area named \"{name}\" already exists");
        }
        let area = self
            .areas
            .areas
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow!("life area not found: {id}"))?;
        if let Some(name) = name {
            area.name = name;
        }
        if let Some(color) = color {
            area.color = color;
        }
        Ok(())
    }

    /// Removes the area together with all of its projects.
    pub fn delete_area(&mut self, id: &str) -> anyhow::Result<LifeArea> {
        let idx = self
            .areas
            .areas
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| anyhow!("life area not found: {id}"))?;
        let removed_projects = self.projects.remove(id).map(|p| p.len()).unwrap_or(0);
        info!(%id, removed_projects, "deleting life area");
        Ok(self.areas.areas.remove(idx))
    }

    pub fn add_project(&mut self, area_id: &str, name: &str) -> anyhow::Result<String> {
        let area_name = self
            .area(area_id)
            .map(|a| a.name.clone())
            .ok_or_else(|| anyhow!("life area not found: {area_id}"))?;
        let name = validate_name(name, "project", MAX_PROJECT_NAME_LEN)?;
        let projects = self.projects.entry(area_id.to_string()).or_default();
        if projects.iter().any(|p| p.name.eq_ignore_ascii_case(&name)) {
            bail!("a project named \"{name}\" already exists in {area_name}");
        }
        let id = new_id();
        debug!(%id, area = %area_id, %name, "adding project");
        projects.push(Project {
            id: id.clone(),
            name,
            tasks: vec![],
        });
        Ok(id)
    }

    pub fn rename_project(&mut self, project_id: &str, name: &str) -> anyhow::Result<()> {
        let name = validate_name(name, "project", MAX_PROJECT_NAME_LEN)?;
        let area_id = self
            .find_project(project_id)
            .map(|(area_id, _)| area_id.to_string())
            .ok_or_else(|| anyhow!("project not found: {project_id}"))?;
        let projects = self.projects.entry(area_id).or_default();
        if projects
            .iter()
            .any(|p| p.id != project_id && p.name.eq_ignore_ascii_case(&name))
        {
            bail!("a project named \"{name}\" already exists in this life area");
        }
        if let Some(project) = projects.iter_mut().find(|p| p.id == project_id) {
            project.name = name;
        }
        Ok(())
    }

    pub fn delete_project(&mut self, project_id: &str) -> anyhow::Result<Project> {
        for projects in self.projects.values_mut() {
            if let Some(idx) = projects.iter().position(|p| p.id == project_id) {
                return Ok(projects.remove(idx));
            }
        }
        Err(anyhow!("project not found: {project_id}"))
    }

    pub fn add_task(
        &mut self,
        project_id: &str,
        name: &str,
        priority: Priority,
        duration_minutes: Option<u32>,
    ) -> anyhow::Result<String> {
        let name = validate_name(name, "task", MAX_TASK_NAME_LEN)?;
        let duration = duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
        validate_duration(duration)?;
        let project = self
            .project_mut(project_id)
            .ok_or_else(|| anyhow!("project not found: {project_id}"))?;
        let id = new_id();
        project.tasks.push(PlannerTask {
            id: id.clone(),
            name,
            completed: false,
            priority,
            duration_minutes: Some(duration),
        });
        Ok(id)
    }

    pub fn edit_task(
        &mut self,
        task_id: &str,
        name: Option<&str>,
        priority: Option<Priority>,
        duration_minutes: Option<u32>,
    ) -> anyhow::Result<()> {
        let name = name
            .map(|n| validate_name(n, "task", MAX_TASK_NAME_LEN))
            .transpose()?;
        if let Some(minutes) = duration_minutes {
            validate_duration(minutes)?;
        }
        let task = self
            .task_mut(task_id)
            .ok_or_else(|| anyhow!("task not found: {task_id}"))?;
        if let Some(name) = name {
            task.name = name;
        }
        if let Some(priority) = priority {
            task.priority = priority;
        }
        if duration_minutes.is_some() {
            task.duration_minutes = duration_minutes;
        }
        Ok(())
    }

    pub fn toggle_task(&mut self, task_id: &str) -> anyhow::Result<bool> {
        let task = self
            .task_mut(task_id)
            .ok_or_else(|| anyhow!("task not found: {task_id}"))?;
        task.completed = !task.completed;
        Ok(task.completed)
    }

    pub fn delete_task(&mut self, task_id: &str) -> anyhow::Result<PlannerTask> {
        for project in self.projects.values_mut().flatten() {
            if let Some(idx) = project.tasks.iter().position(|t| t.id == task_id) {
                return Ok(project.tasks.remove(idx));
            }
        }
        Err(anyhow!("task not found: {task_id}"))
    }

    fn project_mut(&mut self, project_id: &str) -> Option<&mut Project> {
        self.projects
            .values_mut()
            .flatten()
            .find(|p| p.id == project_id)
    }

    fn task_mut(&mut self, task_id: &str) -> Option<&mut PlannerTask> {
        self.projects
            .values_mut()
            .flatten()
            .flat_map(|p| p.tasks.iter_mut())
            .find(|t| t.id == task_id)
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn validate_name(raw: &str, what: &str, max_len: usize) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("{what} name cannot be empty");
    }
    if trimmed.chars().count() > max_len {
        bail!("{what} name must be at most {max_len} characters");
    }
    Ok(trimmed.to_string())
}

pub fn validate_entry_name(raw: &str) -> anyhow::Result<String> {
    validate_name(raw, "entry", MAX_TASK_NAME_LEN)
}

/// Durations come in quarter-hour steps from 15 minutes to 4 hours.
pub fn validate_duration(minutes: u32) -> anyhow::Result<()> {
    if !(MIN_TASK_DURATION..=MAX_TASK_DURATION).contains(&minutes) || minutes % 15 != 0 {
        bail!(
            "duration must be a multiple of 15 between {MIN_TASK_DURATION} and \
             {MAX_TASK_DURATION} minutes, got {minutes}"
        );
    }
    Ok(())
}

fn validate_color(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    let valid = trimmed.len() == 7
        && trimmed.starts_with('#')
        && trimmed[1..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        bail!("color must look like #rrggbb, got: {trimmed}");
    }
    Ok(trimmed.to_ascii_lowercase())
}

/// Formats minutes as `45m`, `2h` or `1h 30m`.
pub fn format_duration(minutes: u32) -> String {
    let hours = minutes / 60;
    let mins = minutes % 60;
    match (hours, mins) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Planner {
        let areas = LifeAreasDoc::seeded();
        let projects = areas
            .areas
            .iter()
            .map(|a| (a.id.clone(), Vec::new()))
            .collect();
        Planner::new(areas, projects)
    }

    #[test]
    fn seeds_six_life_areas() {
        let planner = seeded();
        assert_eq!(planner.areas.areas.len(), 6);
        assert_eq!(planner.area("money").expect("money").color, "#009688");
    }

    #[test]
    fn project_names_are_unique_per_area_case_insensitively() {
        let mut planner = seeded();
        planner.add_project("health", "Marathon").expect("add");
        let err = planner
            .add_project("health", "  marathon ")
            .expect_err("duplicate");
        assert!(err.to_string().contains("already exists in Health"));
        planner
            .add_project("education", "Marathon")
            .expect("same name in another area");
    }

    #[test]
    fn rejects_empty_and_overlong_names() {
        let mut planner = seeded();
        assert!(planner.add_project("health", "   ").is_err());
        assert!(planner.add_project("health", &"x".repeat(101)).is_err());
        assert!(planner.add_project("health", &"x".repeat(100)).is_ok());
        assert!(planner.add_area(&"y".repeat(51), None).is_err());
        assert!(planner.add_area("Health", None).is_err());
        assert!(planner.add_project("nope", "Orphan").is_err());
    }

    #[test]
    fn task_lifecycle() {
        let mut planner = seeded();
        let project_id = planner.add_project("money", "Budget").expect("project");
        let task_id = planner
            .add_task(&project_id, "Review spending", Priority::Urgent, Some(45))
            .expect("task");

        let found = planner.find_task(&task_id).expect("find");
        assert_eq!(found.area_id, "money");
        assert_eq!(found.task.duration_minutes, Some(45));

        assert!(planner.edit_task(&task_id, None, None, Some(250)).is_err());
        planner
            .edit_task(&task_id, Some("Review budget"), Some(Priority::Low), Some(90))
            .expect("edit");
        assert!(planner.toggle_task(&task_id).expect("toggle"));
        let task = planner.delete_task(&task_id).expect("delete");
        assert_eq!(task.name, "Review budget");
        assert!(task.completed);
        assert!(planner.find_task(&task_id).is_none());
    }

    #[test]
    fn deleting_area_drops_its_projects() {
        let mut planner = seeded();
        let project_id = planner.add_project("family", "Reunion").expect("project");
        planner.delete_area("family").expect("delete");
        assert!(planner.find_project(&project_id).is_none());
        assert!(planner.area("family").is_none());
    }

    #[test]
    fn new_areas_cycle_through_palette() {
        let mut planner = Planner::default();
        let id = planner.add_area("Craft", None).expect("add");
        assert_eq!(planner.area(&id).expect("area").color, LIFE_AREA_COLORS[0]);
        assert!(planner.add_area("Music", Some("blue")).is_err());
    }

    #[test]
    fn picker_filters_by_search_and_area() {
        let mut planner = seeded();
        let thesis = planner.add_project("education", "Thesis").expect("project");
        let gym = planner.add_project("health", "Gym").expect("project");
        planner
            .add_task(&thesis, "Write chapter", Priority::High, None)
            .expect("task");
        planner
            .add_task(&gym, "Leg day", Priority::Medium, None)
            .expect("task");
        planner
            .add_task(&gym, "Stretch after writing", Priority::Low, Some(15))
            .expect("task");
        let none = HashMap::new();

        let names = |filter: &TaskFilter| -> Vec<String> {
            planner
                .pick_tasks(filter, &none)
                .iter()
                .map(|l| l.task.name.clone())
                .collect()
        };

        let search = TaskFilter {
            search: Some("WRIT".to_string()),
            ..TaskFilter::default()
        };
        assert_eq!(names(&search), vec!["Stretch after writing", "Write chapter"]);

        let by_area_name = TaskFilter {
            search: Some("health".to_string()),
            ..TaskFilter::default()
        };
        assert_eq!(names(&by_area_name), vec!["Leg day", "Stretch after writing"]);

        let health_only = TaskFilter {
            search: Some("writ".to_string()),
            areas: vec!["health".to_string()],
            ..TaskFilter::default()
        };
        assert_eq!(names(&health_only), vec!["Stretch after writing"]);

        let in_thesis = TaskFilter {
            project: Some(thesis),
            ..TaskFilter::default()
        };
        assert_eq!(names(&in_thesis), vec!["Write chapter"]);
    }

    #[test]
    fn picker_puts_frequently_scheduled_tasks_first() {
        let mut planner = seeded();
        let project = planner.add_project("money", "Budget").expect("project");
        let audit = planner
            .add_task(&project, "audit", Priority::Low, None)
            .expect("task");
        planner
            .add_task(&project, "Bills", Priority::Low, None)
            .expect("task");
        let receipts = planner
            .add_task(&project, "Receipts", Priority::Low, None)
            .expect("task");
        let frequency = HashMap::from([(receipts.clone(), 3), (audit.clone(), 1)]);

        let listed = planner.pick_tasks(&TaskFilter::default(), &frequency);
        let order: Vec<(&str, usize)> = listed
            .iter()
            .map(|l| (l.task.name.as_str(), l.scheduled))
            .collect();
        assert_eq!(order, vec![("Receipts", 3), ("audit", 1), ("Bills", 0)]);
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(45), "45m");
        assert_eq!(format_duration(120), "2h");
        assert_eq!(format_duration(90), "1h 30m");
    }
}
