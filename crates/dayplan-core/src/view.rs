use anyhow::bail;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::grid::ExpansionState;
use crate::slot::TimeOfDay;

/// The day being looked at and which of its hours are opened up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayView {
    pub date: NaiveDate,
    #[serde(default)]
    pub expansion: ExpansionState,
}

impl DayView {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            expansion: ExpansionState::new(),
        }
    }

    /// Switches the active day. Expansion belongs to a single day, so it is
    /// dropped whenever the date actually changes.
    pub fn set_date(&mut self, date: NaiveDate) -> bool {
        if self.date == date {
            return false;
        }
        debug!(from = %self.date, to = %date, "changing active date");
        self.date = date;
        self.expansion.clear();
        true
    }

    /// Clicks a row. Only rows currently on screen can be clicked.
    pub fn click(&mut self, slot: TimeOfDay, visible: &[TimeOfDay]) -> anyhow::Result<()> {
        if !visible.contains(&slot) {
            bail!("row {slot} is not displayed; click its hour first");
        }
        self.expansion.click(slot);
        Ok(())
    }
}
