use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const FIRST_HOUR: u8 = 6;
pub const LAST_HOUR: u8 = 23;
pub const SLOT_MINUTES: u32 = 15;
pub const SLOTS_PER_HOUR: usize = 4;
pub const SLOTS_PER_DAY: usize = (LAST_HOUR - FIRST_HOUR + 1) as usize * SLOTS_PER_HOUR;

/// Exclusive end of the grid (24:00), in minutes since local midnight.
pub const GRID_END_MINUTES: u32 = (LAST_HOUR as u32 + 1) * 60;
pub const GRID_START_MINUTES: u32 = FIRST_HOUR as u32 * 60;

/// A quarter-hour row of the day grid, 06:00 through 23:45.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// The top row of the grid.
    pub const FIRST: Self = Self {
        hour: FIRST_HOUR,
        minute: 0,
    };

    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if !(FIRST_HOUR..=LAST_HOUR).contains(&hour) {
            return None;
        }
        if minute % SLOT_MINUTES as u8 != 0 || minute >= 60 {
            return None;
        }
        Some(Self { hour, minute })
    }

    /// Exact slot for a minute offset; `None` unless aligned and on the grid.
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        if minutes % SLOT_MINUTES != 0 {
            return None;
        }
        let hour = u8::try_from(minutes / 60).ok()?;
        let minute = u8::try_from(minutes % 60).ok()?;
        Self::new(hour, minute)
    }

    /// Slot containing the given minute offset, rounding down to the quarter hour.
    pub fn floor_minutes(minutes: u32) -> Option<Self> {
        Self::from_minutes(minutes - minutes % SLOT_MINUTES)
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn minutes_since_midnight(self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }

    pub fn is_hourly(self) -> bool {
        self.minute == 0
    }

    pub fn hour_key(self) -> Self {
        Self {
            hour: self.hour,
            minute: 0,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (h, m) = trimmed
            .split_once(':')
            .ok_or_else(|| anyhow!("expected HH:MM, got: {trimmed}"))?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(anyhow!("expected HH:MM, got: {trimmed}"));
        }
        let hour: u8 = h
            .parse()
            .map_err(|_| anyhow!("invalid hour in time slot: {trimmed}"))?;
        let minute: u8 = m
            .parse()
            .map_err(|_| anyhow!("invalid minute in time slot: {trimmed}"))?;
        Self::new(hour, minute).ok_or_else(|| {
            anyhow!(
                "time slot {trimmed} is outside the grid \
                 ({FIRST_HOUR:02}:00-{LAST_HOUR:02}:45 in {SLOT_MINUTES}-minute steps)"
            )
        })
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Every slot of the day, ascending.
pub fn slot_universe() -> Vec<TimeOfDay> {
    (FIRST_HOUR..=LAST_HOUR)
        .flat_map(|hour| {
            (0..SLOTS_PER_HOUR).map(move |q| TimeOfDay {
                hour,
                minute: (q as u32 * SLOT_MINUTES) as u8,
            })
        })
        .collect()
}

/// Formats a minute offset as `HH:MM`, allowing the 24:00 grid end.
pub fn format_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universe_has_72_ascending_quarter_hours() {
        let slots = slot_universe();
        assert_eq!(slots.len(), SLOTS_PER_DAY);
        assert_eq!(slots.len(), 72);
        assert_eq!(slots[0].to_string(), "06:00");
        assert_eq!(slots[71].to_string(), "23:45");
        for pair in slots.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(
                pair[1].minutes_since_midnight() - pair[0].minutes_since_midnight(),
                SLOT_MINUTES
            );
        }
    }

    #[test]
    fn parses_and_rejects_slots() {
        assert_eq!(
            "09:30".parse::<TimeOfDay>().expect("parse").to_string(),
            "09:30"
        );
        assert_eq!("9:15".parse::<TimeOfDay>().expect("parse").to_string(), "09:15");
        assert!("05:00".parse::<TimeOfDay>().is_err());
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("10:10".parse::<TimeOfDay>().is_err());
        assert!("1000".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn floors_to_quarter_hour() {
        let slot = TimeOfDay::floor_minutes(9 * 60 + 44).expect("on grid");
        assert_eq!(slot.to_string(), "09:30");
        assert!(TimeOfDay::floor_minutes(5 * 60 + 59).is_none());
        assert_eq!(slot.hour_key().to_string(), "09:00");
    }

    #[test]
    fn serializes_as_string_key() {
        let slot = TimeOfDay::new(14, 30).expect("valid");
        let json = serde_json::to_string(&slot).expect("serialize");
        assert_eq!(json, "\"14:30\"");
        let back: TimeOfDay = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, slot);
    }
}
