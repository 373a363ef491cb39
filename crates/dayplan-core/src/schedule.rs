use std::collections::BTreeMap;

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::planner::{PlannerTask, Project, validate_duration, validate_entry_name};
use crate::slot::{self, TimeOfDay};

/// Duration assumed for scheduled tasks that carry none, and for sizing rows.
pub const DEFAULT_DURATION_MINUTES: u32 = 60;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Task,
    Custom,
    Calendar,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub name: String,

    #[serde(rename = "type", default)]
    pub kind: EntryKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub all_day: bool,
}

impl ScheduleEntry {
    pub fn custom(name: String) -> Self {
        Self {
            name,
            kind: EntryKind::Custom,
            duration_minutes: None,
            end_time: None,
            project_id: None,
            project_name: None,
            task_id: None,
            area: None,
            calendar_name: None,
            event_id: None,
            all_day: false,
        }
    }

    pub fn from_task(area_id: &str, project: &Project, task: &PlannerTask) -> Self {
        Self {
            name: task.name.clone(),
            kind: EntryKind::Task,
            duration_minutes: duration_for_new_entry(EntryKind::Task, task.duration_minutes),
            project_id: Some(project.id.clone()),
            project_name: Some(project.name.clone()),
            task_id: Some(task.id.clone()),
            area: Some(area_id.to_string()),
            ..Self::custom(String::new())
        }
    }

    pub fn is_calendar_sourced(&self) -> bool {
        self.kind == EntryKind::Calendar
    }

    /// Duration the entry actually carries: explicit minutes, else the span to
    /// `end_time`. Never reaches past the end of the grid.
    pub fn known_duration(&self, start: TimeOfDay) -> Option<u32> {
        let remaining = slot::GRID_END_MINUTES - start.minutes_since_midnight();
        if let Some(minutes) = self.duration_minutes.filter(|m| *m > 0) {
            return Some(minutes.min(remaining));
        }
        let end = self.end_time.as_deref().and_then(parse_end_minutes)?;
        end.checked_sub(start.minutes_since_midnight())
            .filter(|span| *span > 0)
    }

    /// Duration used for sizing the rendered row.
    pub fn display_duration(&self, start: TimeOfDay) -> u32 {
        self.known_duration(start)
            .unwrap_or(DEFAULT_DURATION_MINUTES)
    }

    pub fn end_minutes(&self, start: TimeOfDay) -> Option<u32> {
        self.known_duration(start)
            .map(|d| start.minutes_since_midnight() + d)
    }
}

/// Duration written on a freshly created entry of the given kind.
pub fn duration_for_new_entry(kind: EntryKind, requested: Option<u32>) -> Option<u32> {
    match kind {
        EntryKind::Custom => requested,
        EntryKind::Task | EntryKind::Calendar => {
            Some(requested.unwrap_or(DEFAULT_DURATION_MINUTES))
        }
    }
}

/// `HH:MM` end boundary; accepts the 24:00 grid end.
fn parse_end_minutes(raw: &str) -> Option<u32> {
    let (h, m) = raw.trim().split_once(':')?;
    let minute = m.parse::<u32>().ok().filter(|m| *m < 60)?;
    let minutes = h.parse::<u32>().ok()?.checked_mul(60)?.checked_add(minute)?;
    (minutes <= slot::GRID_END_MINUTES).then_some(minutes)
}

/// One user's schedule for one calendar day, keyed by slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct DaySchedule {
    entries: BTreeMap<TimeOfDay, ScheduleEntry>,
}

impl DaySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: TimeOfDay) -> Option<&ScheduleEntry> {
        self.entries.get(&slot)
    }

    pub fn is_occupied(&self, slot: TimeOfDay) -> bool {
        self.entries.contains_key(&slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimeOfDay, &ScheduleEntry)> {
        self.entries.iter().map(|(slot, entry)| (*slot, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_event(&self, event_id: &str) -> bool {
        self.entries
            .values()
            .any(|entry| entry.event_id.as_deref() == Some(event_id))
    }

    /// Writes only into an empty slot; returns whether the write happened.
    pub fn insert_if_empty(&mut self, slot: TimeOfDay, entry: ScheduleEntry) -> bool {
        if self.entries.contains_key(&slot) {
            return false;
        }
        self.entries.insert(slot, entry);
        true
    }

    /// Drops a planner task onto a slot. Manual entries are replaced, imported ones are not.
    pub fn place_task(
        &mut self,
        slot: TimeOfDay,
        area_id: &str,
        project: &Project,
        task: &PlannerTask,
    ) -> anyhow::Result<()> {
        if let Some(existing) = self.entries.get(&slot)
            && existing.is_calendar_sourced()
        {
            bail!("{slot} holds calendar event \"{}\"", existing.name);
        }
        debug!(%slot, task = %task.id, "placing task");
        self.entries
            .insert(slot, ScheduleEntry::from_task(area_id, project, task));
        Ok(())
    }

    pub fn add_custom(&mut self, slot: TimeOfDay, name: &str) -> anyhow::Result<()> {
        let name = validate_entry_name(name)?;
        if let Some(existing) = self.entries.get(&slot)
            && existing.is_calendar_sourced()
        {
            bail!("{slot} holds calendar event \"{}\"", existing.name);
        }
        self.entries.insert(slot, ScheduleEntry::custom(name));
        Ok(())
    }

    pub fn edit(
        &mut self,
        slot: TimeOfDay,
        name: Option<&str>,
        duration_minutes: Option<u32>,
    ) -> anyhow::Result<()> {
        let name = name.map(validate_entry_name).transpose()?;
        if let Some(minutes) = duration_minutes {
            validate_duration(minutes)?;
            if slot.minutes_since_midnight() + minutes > slot::GRID_END_MINUTES {
                bail!("a {minutes}-minute entry at {slot} would run past the end of the day");
            }
        }
        let entry = self
            .entries
            .get_mut(&slot)
            .ok_or_else(|| anyhow!("no entry scheduled at {slot}"))?;
        if let Some(name) = name {
            entry.name = name;
        }
        if let Some(minutes) = duration_minutes {
            entry.duration_minutes = Some(minutes);
            entry.end_time = None;
        }
        Ok(())
    }

    pub fn remove(&mut self, slot: TimeOfDay) -> anyhow::Result<ScheduleEntry> {
        match self.entries.get(&slot) {
            None => bail!("no entry scheduled at {slot}"),
            Some(entry) if entry.is_calendar_sourced() => {
                bail!("{slot} holds a calendar event; it cannot be removed from the grid")
            }
            Some(_) => {}
        }
        self.entries
            .remove(&slot)
            .ok_or_else(|| anyhow!("no entry scheduled at {slot}"))
    }

    /// Drags a manual entry to an empty slot.
    pub fn move_entry(&mut self, from: TimeOfDay, to: TimeOfDay) -> anyhow::Result<()> {
        if from == to {
            return Ok(());
        }
        if self.entries.contains_key(&to) {
            bail!("{to} is already occupied");
        }
        let entry = self.remove(from)?;
        self.entries.insert(to, entry);
        Ok(())
    }

    pub fn assign_project(
        &mut self,
        slot: TimeOfDay,
        area_id: &str,
        project: &Project,
    ) -> anyhow::Result<()> {
        let entry = self
            .entries
            .get_mut(&slot)
            .ok_or_else(|| anyhow!("no entry scheduled at {slot}"))?;
        entry.project_id = Some(project.id.clone());
        entry.project_name = Some(project.name.clone());
        entry.area = Some(area_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Priority;

    fn slot(raw: &str) -> TimeOfDay {
        raw.parse().expect("valid slot")
    }

    fn sample_project() -> (Project, PlannerTask) {
        let task = PlannerTask {
            id: "t1".to_string(),
            name: "Deep work".to_string(),
            completed: false,
            priority: Priority::High,
            duration_minutes: None,
        };
        let project = Project {
            id: "p1".to_string(),
            name: "Thesis".to_string(),
            tasks: vec![task.clone()],
        };
        (project, task)
    }

    #[test]
    fn placed_task_defaults_to_an_hour_but_custom_has_no_duration() {
        let (project, task) = sample_project();
        let mut schedule = DaySchedule::new();
        schedule
            .place_task(slot("09:00"), "education", &project, &task)
            .expect("place");
        schedule.add_custom(slot("11:00"), "  Lunch  ").expect("custom");

        let placed = schedule.get(slot("09:00")).expect("placed");
        assert_eq!(placed.duration_minutes, Some(DEFAULT_DURATION_MINUTES));
        assert_eq!(placed.project_name.as_deref(), Some("Thesis"));

        let custom = schedule.get(slot("11:00")).expect("custom");
        assert_eq!(custom.name, "Lunch");
        assert_eq!(custom.known_duration(slot("11:00")), None);
        assert_eq!(custom.display_duration(slot("11:00")), DEFAULT_DURATION_MINUTES);
    }

    #[test]
    fn known_duration_falls_back_to_end_time() {
        let mut entry = ScheduleEntry::custom("Standup".to_string());
        entry.end_time = Some("10:45".to_string());
        assert_eq!(entry.known_duration(slot("10:00")), Some(45));
        entry.end_time = Some("09:00".to_string());
        assert_eq!(entry.known_duration(slot("10:00")), None);
        entry.end_time = Some("10:75".to_string());
        assert_eq!(entry.known_duration(slot("10:00")), None);
        entry.end_time = Some("99999999:00".to_string());
        assert_eq!(entry.known_duration(slot("10:00")), None);
    }

    #[test]
    fn stored_durations_stop_at_the_end_of_the_grid() {
        let mut entry = ScheduleEntry::custom("Night shift".to_string());
        entry.duration_minutes = Some(u32::MAX);
        assert_eq!(entry.known_duration(slot("23:00")), Some(60));
        assert_eq!(entry.end_minutes(slot("23:00")), Some(slot::GRID_END_MINUTES));
        assert_eq!(entry.display_duration(slot("06:00")), 18 * 60);
    }

    #[test]
    fn calendar_entries_cannot_be_removed_or_moved() {
        let mut schedule = DaySchedule::new();
        let mut imported = ScheduleEntry::custom("Dentist".to_string());
        imported.kind = EntryKind::Calendar;
        imported.event_id = Some("evt".to_string());
        assert!(schedule.insert_if_empty(slot("15:00"), imported));

        assert!(schedule.remove(slot("15:00")).is_err());
        assert!(schedule.move_entry(slot("15:00"), slot("16:00")).is_err());
        assert!(schedule.add_custom(slot("15:00"), "Gym").is_err());
        assert!(schedule.contains_event("evt"));
    }

    #[test]
    fn move_refuses_occupied_target() {
        let mut schedule = DaySchedule::new();
        schedule.add_custom(slot("08:00"), "Run").expect("add");
        schedule.add_custom(slot("09:00"), "Read").expect("add");
        assert!(schedule.move_entry(slot("08:00"), slot("09:00")).is_err());
        schedule
            .move_entry(slot("08:00"), slot("08:30"))
            .expect("move");
        assert!(!schedule.is_occupied(slot("08:00")));
        assert_eq!(schedule.get(slot("08:30")).expect("moved").name, "Run");
    }

    #[test]
    fn edit_validates_duration_and_day_end() {
        let mut schedule = DaySchedule::new();
        schedule.add_custom(slot("23:00"), "Wind down").expect("add");
        assert!(schedule.edit(slot("23:00"), None, Some(50)).is_err());
        assert!(schedule.edit(slot("23:00"), None, Some(90)).is_err());
        schedule
            .edit(slot("23:00"), Some("Sleep prep"), Some(60))
            .expect("edit");
        let entry = schedule.get(slot("23:00")).expect("entry");
        assert_eq!(entry.name, "Sleep prep");
        assert_eq!(entry.duration_minutes, Some(60));
    }

    #[test]
    fn document_uses_camel_case_keys() {
        let mut schedule = DaySchedule::new();
        let (project, task) = sample_project();
        schedule
            .place_task(slot("14:30"), "health", &project, &task)
            .expect("place");
        let json = serde_json::to_value(&schedule).expect("serialize");
        assert_eq!(json["14:30"]["durationMinutes"], 60);
        assert_eq!(json["14:30"]["projectId"], "p1");
        assert_eq!(json["14:30"]["type"], "task");

        let back: DaySchedule = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, schedule);
    }
}
