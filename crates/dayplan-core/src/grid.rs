//! Day-grid row computation: which quarter-hour rows are displayed, and how
//! row clicks open and close the sub-hour rows under an hour.
//!
//! Everything here is pure. Callers pass in the persisted schedule, the
//! placements of fetched calendar events and the current expansion state, and
//! get back the ordered rows to draw.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::schedule::{DaySchedule, ScheduleEntry};
use crate::slot::{self, SLOT_MINUTES, TimeOfDay};

/// Where a calendar event lands on the grid for the viewed day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub anchor: TimeOfDay,
    /// Exclusive end in minutes since midnight; `None` when the event has no end.
    pub end_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    pub occupied: BTreeSet<TimeOfDay>,
    pub covered: BTreeSet<TimeOfDay>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ExpansionLevel {
    /// Show the :30 row under the hour.
    Half,
    /// Show :15, :30 and :45.
    Quarter,
}

impl From<ExpansionLevel> for u8 {
    fn from(level: ExpansionLevel) -> Self {
        match level {
            ExpansionLevel::Half => 30,
            ExpansionLevel::Quarter => 15,
        }
    }
}

impl TryFrom<u8> for ExpansionLevel {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            30 => Ok(Self::Half),
            15 => Ok(Self::Quarter),
            other => Err(anyhow!("invalid expansion level {other} (expected 30 or 15)")),
        }
    }
}

/// Per-hour expansion. An hour without a key is collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpansionState {
    levels: BTreeMap<TimeOfDay, ExpansionLevel>,
}

impl ExpansionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, slot: TimeOfDay) -> Option<ExpansionLevel> {
        self.levels.get(&slot.hour_key()).copied()
    }

    pub fn is_collapsed(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimeOfDay, ExpansionLevel)> + '_ {
        self.levels.iter().map(|(slot, level)| (*slot, *level))
    }

    /// Applies a click on a displayed row to the hour that row belongs to.
    pub fn click(&mut self, slot: TimeOfDay) {
        let hour = slot.hour_key();
        let current = self.levels.get(&hour).copied();
        match next_level(current, slot.is_hourly()) {
            Some(level) => {
                self.levels.insert(hour, level);
            }
            None => {
                self.levels.remove(&hour);
            }
        }
        trace!(%slot, from = ?current, to = ?self.levels.get(&hour), "row click");
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}

/// Row-click transition for one hour.
///
/// The hourly row cycles collapsed → 30 → 15 → collapsed. A sub-hour row can
/// only step forward from 30 to 15 or close a 15 expansion; on a collapsed
/// hour it changes nothing.
pub fn next_level(current: Option<ExpansionLevel>, on_hourly_row: bool) -> Option<ExpansionLevel> {
    match (current, on_hourly_row) {
        (None, true) => Some(ExpansionLevel::Half),
        (None, false) => None,
        (Some(ExpansionLevel::Half), _) => Some(ExpansionLevel::Quarter),
        (Some(ExpansionLevel::Quarter), _) => None,
    }
}

/// Marks occupied slots and the slots hidden inside multi-slot items.
pub fn resolve_coverage(schedule: &DaySchedule, placements: &[Placement]) -> Coverage {
    let mut coverage = Coverage::default();

    for (start, entry) in schedule.iter() {
        coverage.occupied.insert(start);
        if let Some(end) = entry.end_minutes(start) {
            mark_span(&mut coverage.covered, start.minutes_since_midnight(), end);
        }
    }

    for placement in placements {
        coverage.occupied.insert(placement.anchor);
        if let Some(end) = placement.end_minutes {
            mark_span(
                &mut coverage.covered,
                placement.anchor.minutes_since_midnight(),
                end,
            );
        }
    }

    coverage
}

fn mark_span(covered: &mut BTreeSet<TimeOfDay>, start: u32, end: u32) {
    if end <= start || end - start <= SLOT_MINUTES {
        return;
    }
    covered.extend(slot::slot_universe().into_iter().filter(|slot| {
        let m = slot.minutes_since_midnight();
        start < m && m < end
    }));
}

/// Whether a slot gets its own row. The checks run in a fixed order: coverage
/// first, so an hourly row inside a longer item is hidden as well.
pub fn is_visible(slot: TimeOfDay, coverage: &Coverage, expansion: &ExpansionState) -> bool {
    if coverage.covered.contains(&slot) {
        return false;
    }
    if slot.is_hourly() {
        return true;
    }
    if coverage.occupied.contains(&slot) {
        return true;
    }
    match expansion.level(slot) {
        Some(ExpansionLevel::Half) => slot.minute() == 30,
        Some(ExpansionLevel::Quarter) => true,
        None => false,
    }
}

pub fn visible_slots(coverage: &Coverage, expansion: &ExpansionState) -> Vec<TimeOfDay> {
    slot::slot_universe()
        .into_iter()
        .filter(|slot| is_visible(*slot, coverage, expansion))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridRow<'a> {
    pub slot: TimeOfDay,
    pub entry: Option<&'a ScheduleEntry>,
    /// Vertical size in quarter-hour units.
    pub height: u32,
    pub end_minutes: Option<u32>,
    pub expansion: Option<ExpansionLevel>,
}

/// Rows to draw, sized by each entry's duration.
pub fn build_rows<'a>(
    schedule: &'a DaySchedule,
    placements: &[Placement],
    expansion: &ExpansionState,
) -> Vec<GridRow<'a>> {
    let coverage = resolve_coverage(schedule, placements);
    visible_slots(&coverage, expansion)
        .into_iter()
        .map(|slot| {
            let entry = schedule.get(slot);
            let height = entry
                .map(|e| e.display_duration(slot).div_ceil(SLOT_MINUTES).max(1))
                .unwrap_or(1);
            GridRow {
                slot,
                entry,
                height,
                end_minutes: entry.and_then(|e| e.end_minutes(slot)),
                expansion: expansion.level(slot),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(raw: &str) -> TimeOfDay {
        raw.parse().expect("valid slot")
    }

    fn names(slots: &[TimeOfDay]) -> Vec<String> {
        slots.iter().map(ToString::to_string).collect()
    }

    fn with_duration(schedule: &mut DaySchedule, at: &str, minutes: u32) {
        let mut entry = ScheduleEntry::custom(format!("item at {at}"));
        entry.duration_minutes = Some(minutes);
        assert!(schedule.insert_if_empty(slot(at), entry));
    }

    #[test]
    fn collapsed_empty_day_shows_only_hours() {
        let coverage = resolve_coverage(&DaySchedule::new(), &[]);
        let visible = visible_slots(&coverage, &ExpansionState::new());
        assert_eq!(visible.len(), 18);
        assert!(visible.iter().all(|s| s.is_hourly()));
        assert_eq!(visible[0].to_string(), "06:00");
        assert_eq!(visible[17].to_string(), "23:00");
    }

    #[test]
    fn ninety_minute_entry_hides_its_inner_slots() {
        let mut schedule = DaySchedule::new();
        with_duration(&mut schedule, "09:00", 90);
        let coverage = resolve_coverage(&schedule, &[]);
        assert_eq!(
            names(&coverage.covered.iter().copied().collect::<Vec<_>>()),
            vec!["09:15", "09:30", "09:45", "10:00", "10:15"]
        );

        let mut expansion = ExpansionState::new();
        expansion.click(slot("09:00"));
        expansion.click(slot("09:00"));
        for state in [ExpansionState::new(), expansion] {
            let visible = visible_slots(&coverage, &state);
            assert!(visible.contains(&slot("09:00")));
            assert!(!visible.contains(&slot("09:15")));
            assert!(!visible.contains(&slot("09:30")));
            assert!(!visible.contains(&slot("10:00")));
            assert!(visible.contains(&slot("11:00")));
        }
    }

    #[test]
    fn oversized_stored_durations_do_not_break_coverage() {
        let schedule: DaySchedule =
            serde_json::from_str(r#"{"22:00": {"name": "x", "durationMinutes": 4294967295}}"#)
                .expect("parse");
        let coverage = resolve_coverage(&schedule, &[]);
        assert_eq!(coverage.covered.len(), 7);
        assert!(coverage.covered.contains(&slot("23:45")));

        for end in ["99999999:00", "10:75"] {
            let raw = format!(r#"{{"09:00": {{"name": "x", "endTime": "{end}"}}}}"#);
            let schedule: DaySchedule = serde_json::from_str(&raw).expect("parse");
            let coverage = resolve_coverage(&schedule, &[]);
            assert!(coverage.covered.is_empty(), "end {end}");
        }
    }

    #[test]
    fn short_or_unknown_durations_cover_nothing() {
        let mut schedule = DaySchedule::new();
        with_duration(&mut schedule, "08:00", 15);
        schedule.add_custom(slot("12:00"), "Lunch").expect("custom");
        let coverage = resolve_coverage(&schedule, &[]);
        assert!(coverage.covered.is_empty());
        assert_eq!(coverage.occupied.len(), 2);
    }

    #[test]
    fn half_expansion_shows_only_the_half_hour() {
        let mut expansion = ExpansionState::new();
        expansion.click(slot("10:00"));
        assert_eq!(expansion.level(slot("10:00")), Some(ExpansionLevel::Half));

        let coverage = resolve_coverage(&DaySchedule::new(), &[]);
        let visible = visible_slots(&coverage, &expansion);
        assert!(visible.contains(&slot("10:30")));
        assert!(!visible.contains(&slot("10:15")));
        assert!(!visible.contains(&slot("10:45")));
        assert_eq!(visible.len(), 19);
    }

    #[test]
    fn quarter_expansion_shows_every_sub_slot() {
        let mut expansion = ExpansionState::new();
        expansion.click(slot("07:00"));
        expansion.click(slot("07:00"));
        let coverage = resolve_coverage(&DaySchedule::new(), &[]);
        let visible = visible_slots(&coverage, &expansion);
        for raw in ["07:00", "07:15", "07:30", "07:45"] {
            assert!(visible.contains(&slot(raw)), "{raw} should be visible");
        }
        assert!(!visible.contains(&slot("08:15")));
    }

    #[test]
    fn three_hourly_clicks_return_to_collapsed() {
        let mut expansion = ExpansionState::new();
        expansion.click(slot("10:00"));
        expansion.click(slot("10:00"));
        assert_eq!(expansion.level(slot("10:00")), Some(ExpansionLevel::Quarter));
        expansion.click(slot("10:00"));
        assert_eq!(expansion.level(slot("10:00")), None);
        assert!(expansion.is_collapsed());
    }

    #[test]
    fn sub_hour_clicks_advance_or_close_but_never_open() {
        let mut expansion = ExpansionState::new();
        expansion.click(slot("13:30"));
        assert!(expansion.is_collapsed());

        expansion.click(slot("13:00"));
        expansion.click(slot("13:30"));
        assert_eq!(expansion.level(slot("13:00")), Some(ExpansionLevel::Quarter));
        expansion.click(slot("13:45"));
        assert!(expansion.is_collapsed());
    }

    #[test]
    fn hours_expand_independently() {
        let mut expansion = ExpansionState::new();
        expansion.click(slot("08:00"));
        expansion.click(slot("09:00"));
        expansion.click(slot("09:00"));
        assert_eq!(expansion.level(slot("08:45")), Some(ExpansionLevel::Half));
        assert_eq!(expansion.level(slot("09:15")), Some(ExpansionLevel::Quarter));
    }

    #[test]
    fn orphaned_sub_hour_entry_stays_visible() {
        let mut schedule = DaySchedule::new();
        with_duration(&mut schedule, "14:30", 15);
        with_duration(&mut schedule, "16:15", 15);
        let coverage = resolve_coverage(&schedule, &[]);

        let visible = visible_slots(&coverage, &ExpansionState::new());
        assert!(visible.contains(&slot("14:30")));

        let mut expansion = ExpansionState::new();
        expansion.click(slot("16:00"));
        let visible = visible_slots(&coverage, &expansion);
        assert!(visible.contains(&slot("16:15")));
        assert!(visible.contains(&slot("16:30")));
        assert!(!visible.contains(&slot("16:45")));
    }

    #[test]
    fn coverage_hides_an_hourly_row_inside_a_span() {
        let mut schedule = DaySchedule::new();
        with_duration(&mut schedule, "09:00", 120);
        with_duration(&mut schedule, "14:30", 15);
        let coverage = resolve_coverage(&schedule, &[]);
        let visible = visible_slots(&coverage, &ExpansionState::new());

        let mut expected: Vec<String> = (6..=23)
            .filter(|h| *h != 10)
            .map(|h| format!("{h:02}:00"))
            .collect();
        expected.push("14:30".to_string());
        expected.sort();
        assert_eq!(names(&visible), expected);
        assert!(!visible.contains(&slot("10:00")));
    }

    #[test]
    fn event_placements_occupy_and_cover() {
        let placements = [
            Placement {
                anchor: slot("17:15"),
                end_minutes: Some(18 * 60 + 30),
            },
            Placement {
                anchor: slot("20:45"),
                end_minutes: None,
            },
        ];
        let coverage = resolve_coverage(&DaySchedule::new(), &placements);
        assert!(coverage.covered.contains(&slot("18:00")));
        assert!(coverage.covered.contains(&slot("18:15")));
        assert!(!coverage.covered.contains(&slot("18:30")));

        let visible = visible_slots(&coverage, &ExpansionState::new());
        assert!(visible.contains(&slot("17:15")));
        assert!(visible.contains(&slot("20:45")));
        assert!(!visible.contains(&slot("18:00")));
    }

    #[test]
    fn rows_are_sized_by_duration() {
        let mut schedule = DaySchedule::new();
        with_duration(&mut schedule, "06:00", 45);
        schedule.add_custom(slot("07:00"), "Breakfast").expect("custom");
        let rows = build_rows(&schedule, &[], &ExpansionState::new());
        assert_eq!(rows[0].height, 3);
        assert_eq!(rows[0].end_minutes, Some(6 * 60 + 45));
        assert_eq!(rows[1].height, 4);
        assert_eq!(rows[1].end_minutes, None);
        assert_eq!(rows[2].entry, None);
        assert_eq!(rows[2].height, 1);
    }

    #[test]
    fn expansion_state_serializes_levels_as_minutes() {
        let mut expansion = ExpansionState::new();
        expansion.click(slot("10:00"));
        let json = serde_json::to_string(&expansion).expect("serialize");
        assert_eq!(json, r#"{"10:00":30}"#);
        let back: ExpansionState = serde_json::from_str(r#"{"11:00":15}"#).expect("parse");
        assert_eq!(back.level(slot("11:30")), Some(ExpansionLevel::Quarter));
        assert!(serde_json::from_str::<ExpansionState>(r#"{"11:00":20}"#).is_err());
    }
}
