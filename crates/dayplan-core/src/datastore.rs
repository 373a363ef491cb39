use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::calendar::CalendarEvent;
use crate::planner::{LifeAreasDoc, Planner, ProjectsDoc};
use crate::schedule::DaySchedule;
use crate::session::SessionState;
use crate::view::DayView;

/// Per-user JSON documents under the data directory.
///
/// ```text
/// users/{uid}/data/lifeAreas.json
/// users/{uid}/data/projects.json
/// users/{uid}/schedules/{yyyy-mm-dd}.json
/// users/{uid}/events/{yyyy-mm-dd}.json
/// session.json
/// view.json
/// ```
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub user: String,
    pub areas_path: PathBuf,
    pub projects_path: PathBuf,
    pub schedules_dir: PathBuf,
    pub events_dir: PathBuf,
    pub session_path: PathBuf,
    pub view_path: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, user: &str) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        let user_dir = data_dir.join("users").join(user);
        let docs_dir = user_dir.join("data");
        let schedules_dir = user_dir.join("schedules");
        let events_dir = user_dir.join("events");

        for dir in [&docs_dir, &schedules_dir, &events_dir] {
            fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let store = Self {
            areas_path: docs_dir.join("lifeAreas.json"),
            projects_path: docs_dir.join("projects.json"),
            session_path: data_dir.join("session.json"),
            view_path: data_dir.join("view.json"),
            data_dir,
            user: user.to_string(),
            schedules_dir,
            events_dir,
        };

        info!(
            data_dir = %store.data_dir.display(),
            user = %store.user,
            "opened datastore"
        );
        Ok(store)
    }

    pub fn schedule_path(&self, date: NaiveDate) -> PathBuf {
        self.schedules_dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    pub fn events_path(&self, date: NaiveDate) -> PathBuf {
        self.events_dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Life areas, seeding the defaults on first use.
    #[tracing::instrument(skip(self))]
    pub fn load_areas(&self) -> anyhow::Result<LifeAreasDoc> {
        if let Some(doc) = read_json(&self.areas_path)? {
            return Ok(doc);
        }
        let seeded = LifeAreasDoc::seeded();
        info!(count = seeded.areas.len(), "seeding default life areas");
        self.save_areas(&seeded)?;
        Ok(seeded)
    }

    pub fn save_areas(&self, doc: &LifeAreasDoc) -> anyhow::Result<()> {
        write_json_atomic(&self.areas_path, doc).context("failed to save life areas")
    }

    pub fn load_projects(&self) -> anyhow::Result<ProjectsDoc> {
        Ok(read_json(&self.projects_path)?.unwrap_or_default())
    }

    pub fn save_projects(&self, doc: &ProjectsDoc) -> anyhow::Result<()> {
        write_json_atomic(&self.projects_path, doc).context("failed to save projects")
    }

    pub fn load_planner(&self) -> anyhow::Result<Planner> {
        Ok(Planner::new(self.load_areas()?, self.load_projects()?))
    }

    #[tracing::instrument(skip(self, planner))]
    pub fn save_planner(&self, planner: &Planner) -> anyhow::Result<()> {
        self.save_areas(&planner.areas)?;
        self.save_projects(&planner.projects)
    }

    #[tracing::instrument(skip(self))]
    pub fn load_schedule(&self, date: NaiveDate) -> anyhow::Result<DaySchedule> {
        let schedule: DaySchedule = read_json(&self.schedule_path(date))?.unwrap_or_default();
        debug!(%date, entries = schedule.len(), "loaded schedule");
        Ok(schedule)
    }

    #[tracing::instrument(skip(self, schedule), fields(entries = schedule.len()))]
    pub fn save_schedule(&self, date: NaiveDate, schedule: &DaySchedule) -> anyhow::Result<()> {
        write_json_atomic(&self.schedule_path(date), schedule)
            .with_context(|| format!("failed to save schedule for {date}"))
    }

    /// Counts, per planner task id, the stored schedule entries placed from it.
    /// Unreadable day documents are skipped with a warning.
    #[tracing::instrument(skip(self))]
    pub fn task_frequency(&self) -> anyhow::Result<HashMap<String, usize>> {
        let mut counts = HashMap::new();
        let dir = fs::read_dir(&self.schedules_dir)
            .with_context(|| format!("failed listing {}", self.schedules_dir.display()))?;

        for item in dir {
            let path = item
                .with_context(|| format!("failed listing {}", self.schedules_dir.display()))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let schedule: DaySchedule = match read_json(&path) {
                Ok(doc) => doc.unwrap_or_default(),
                Err(err) => {
                    warn!(file = %path.display(), error = %format!("{err:#}"), "skipping unreadable schedule");
                    continue;
                }
            };
            for (_, entry) in schedule.iter() {
                if let Some(task_id) = &entry.task_id {
                    *counts.entry(task_id.clone()).or_insert(0) += 1;
                }
            }
        }

        debug!(tasks = counts.len(), "counted scheduled tasks");
        Ok(counts)
    }

    pub fn load_events(&self, date: NaiveDate) -> anyhow::Result<Vec<CalendarEvent>> {
        Ok(read_json(&self.events_path(date))?.unwrap_or_default())
    }

    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    pub fn save_events(&self, date: NaiveDate, events: &[CalendarEvent]) -> anyhow::Result<()> {
        write_json_atomic(&self.events_path(date), &events)
            .with_context(|| format!("failed to save calendar events for {date}"))
    }

    pub fn load_session(&self, token_ttl: chrono::Duration) -> anyhow::Result<SessionState> {
        let session: SessionState = read_json(&self.session_path)?.unwrap_or_default();
        Ok(session.with_token_ttl(token_ttl))
    }

    pub fn save_session(&self, session: &SessionState) -> anyhow::Result<()> {
        write_json_atomic(&self.session_path, session).context("failed to save session")
    }

    /// The persisted view, or a fresh one on `today` if none was saved.
    pub fn load_view(&self, today: NaiveDate) -> anyhow::Result<DayView> {
        Ok(read_json(&self.view_path)?.unwrap_or_else(|| DayView::new(today)))
    }

    pub fn save_view(&self, view: &DayView) -> anyhow::Result<()> {
        write_json_atomic(&self.view_path, view).context("failed to save view state")
    }
}

/// Reads a JSON document; a missing or blank file is `None`.
#[tracing::instrument(skip(path))]
fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(anyhow::Error::new(err).context(format!("failed reading {}", path.display())));
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    debug!(file = %path.display(), bytes = raw.len(), "loading json document");
    serde_json::from_str(&raw)
        .map(Some)
        .with_context(|| format!("failed parsing {}", path.display()))
}

#[tracing::instrument(skip(path, value))]
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    debug!(file = %path.display(), "saving json document atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Priority;
    use crate::slot::TimeOfDay;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).expect("valid date")
    }

    #[test]
    fn lays_out_documents_per_user() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), "alice").expect("open");
        assert_eq!(
            store.schedule_path(date()),
            temp.path().join("users/alice/schedules/2026-03-10.json")
        );
        assert!(store.areas_path.ends_with("users/alice/data/lifeAreas.json"));
        assert!(temp.path().join("users/alice/events").is_dir());
    }

    #[test]
    fn seeds_areas_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), "local").expect("open");
        let areas = store.load_areas().expect("seed");
        assert_eq!(areas.areas.len(), 6);
        assert!(store.areas_path.exists());

        let mut planner = store.load_planner().expect("planner");
        planner.delete_area(&areas.areas[0].id).expect("delete");
        store.save_planner(&planner).expect("save");
        assert_eq!(store.load_areas().expect("reload").areas.len(), 5);
    }

    #[test]
    fn schedule_document_uses_slot_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), "local").expect("open");
        let slot: TimeOfDay = "09:30".parse().expect("slot");

        assert!(store.load_schedule(date()).expect("missing").is_empty());

        let mut schedule = DaySchedule::new();
        schedule.add_custom(slot, "Standup").expect("add");
        store.save_schedule(date(), &schedule).expect("save");

        let raw = fs::read_to_string(store.schedule_path(date())).expect("read");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(json["09:30"]["name"], "Standup");
        assert_eq!(json["09:30"]["type"], "custom");
        assert_eq!(store.load_schedule(date()).expect("reload"), schedule);
    }

    #[test]
    fn corrupt_document_reports_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), "local").expect("open");
        fs::write(store.schedule_path(date()), "{not json").expect("write");
        let err = store.load_schedule(date()).expect_err("corrupt");
        assert!(format!("{err:#}").contains("2026-03-10.json"));
    }

    #[test]
    fn counts_task_placements_across_days() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), "local").expect("open");
        let mut planner = store.load_planner().expect("planner");
        let project_id = planner.add_project("health", "Gym").expect("project");
        let task_id = planner
            .add_task(&project_id, "Leg day", Priority::Medium, None)
            .expect("task");
        let found = planner.find_task(&task_id).expect("task");

        for (day, at) in [(10, "07:00"), (10, "18:00"), (11, "07:00")] {
            let date = NaiveDate::from_ymd_opt(2026, 3, day).expect("date");
            let mut schedule = store.load_schedule(date).expect("load");
            let slot: TimeOfDay = at.parse().expect("slot");
            schedule
                .place_task(slot, found.area_id, found.project, found.task)
                .expect("place");
            store.save_schedule(date, &schedule).expect("save");
        }
        fs::write(store.schedules_dir.join("2026-03-12.json"), "{broken").expect("write");
        fs::write(store.schedules_dir.join("notes.txt"), "ignored").expect("write");

        let counts = store.task_frequency().expect("count");
        assert_eq!(counts.get(&task_id), Some(&3));
        assert_eq!(counts.len(), 1);
    }

    #[test]
    fn view_defaults_to_today() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = DataStore::open(temp.path(), "local").expect("open");
        let view = store.load_view(date()).expect("view");
        assert_eq!(view, DayView::new(date()));
    }
}
