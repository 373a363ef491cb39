use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, anyhow};
use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone,
    Utc, Weekday,
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str = "dayplan-time.toml";
const TIMEZONE_ENV_VAR: &str = "DAYPLAN_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str = "DAYPLAN_TIME_CONFIG";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
    timezone: Option<String>,
    time: Option<TimezoneSection>,
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
    timezone: Option<String>,
}

/// Half-open UTC interval covering one local day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayWindow {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
}

impl DayWindow {
    pub fn time_min_rfc3339(&self) -> String {
        self.time_min.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn time_max_rfc3339(&self) -> String {
        self.time_max.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Timezone every grid computation is done in.
pub fn planner_timezone() -> &'static Tz {
    static PLANNER_TZ: OnceLock<Tz> = OnceLock::new();
    PLANNER_TZ.get_or_init(resolve_planner_timezone)
}

#[must_use]
pub fn today_in(tz: &Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(tz).date_naive()
}

fn resolve_planner_timezone() -> Tz {
    if let Ok(raw) = std::env::var(TIMEZONE_ENV_VAR)
        && let Some(tz) = parse_timezone(&raw, TIMEZONE_ENV_VAR)
    {
        return tz;
    }

    if let Some(path) = timezone_config_path()
        && let Some(tz) = load_timezone_from_file(&path)
    {
        return tz;
    }

    tracing::debug!("no planner timezone configured; using UTC");
    chrono_tz::UTC
}

fn timezone_config_path() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var(TIMEZONE_CONFIG_ENV_VAR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    std::env::current_dir()
        .ok()
        .map(|dir| dir.join(TIMEZONE_CONFIG_FILE))
}

fn load_timezone_from_file(path: &Path) -> Option<Tz> {
    if !path.exists() {
        tracing::debug!(file = %path.display(), "timezone config file not found");
        return None;
    }

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(file = %path.display(), error = %err, "failed reading timezone config file");
            return None;
        }
    };

    let parsed = match toml::from_str::<TimezoneConfig>(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::error!(file = %path.display(), error = %err, "failed parsing timezone config file");
            return None;
        }
    };

    let Some(timezone) = parsed
        .timezone
        .or_else(|| parsed.time.and_then(|section| section.timezone))
    else {
        tracing::warn!(file = %path.display(), "timezone config had no timezone field");
        return None;
    };

    parse_timezone(&timezone, &format!("file:{}", path.display()))
}

fn parse_timezone(raw: &str, source: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!(source, "timezone source was empty");
        return None;
    }

    match trimmed.parse::<Tz>() {
        Ok(tz) => {
            tracing::info!(source, timezone = %trimmed, "configured planner timezone");
            Some(tz)
        }
        Err(err) => {
            tracing::error!(source, timezone = %trimmed, error = %err, "failed to parse timezone id");
            None
        }
    }
}

fn to_utc_from_local(tz: &Tz, local_naive: NaiveDateTime) -> anyhow::Result<DateTime<Utc>> {
    match tz.from_local_datetime(&local_naive) {
        LocalResult::Single(local_dt) => Ok(local_dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => {
            tracing::warn!(first = %first, second = %second, "ambiguous local datetime; using earliest");
            Ok(first.min(second).with_timezone(&Utc))
        }
        LocalResult::None => {
            // Midnight skipped by a DST jump; the day starts at the first valid hour.
            let shifted = local_naive + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| anyhow!("local time {local_naive} does not exist in {tz}"))
        }
    }
}

/// The fetch window for `date`: local midnight up to the next local midnight.
pub fn day_window(date: NaiveDate, tz: &Tz) -> anyhow::Result<DayWindow> {
    let next = date
        .succ_opt()
        .ok_or_else(|| anyhow!("date out of range: {date}"))?;
    let time_min = to_utc_from_local(tz, date.and_time(chrono::NaiveTime::MIN))?;
    let time_max = to_utc_from_local(tz, next.and_time(chrono::NaiveTime::MIN))?;
    Ok(DayWindow { time_min, time_max })
}

/// Resolves a day expression relative to `today`.
///
/// Accepts `today`, `tomorrow`, `yesterday`, weekday names (the next such
/// day), `+Nd`/`-Nd`/`+Nw`/`-Nw` offsets and `YYYY-MM-DD`.
#[tracing::instrument(skip(today))]
pub fn parse_day_expr(input: &str, today: NaiveDate) -> anyhow::Result<NaiveDate> {
    let token = input.trim();
    let lower = token.to_ascii_lowercase();

    match lower.as_str() {
        "today" | "now" => return Ok(today),
        "tomorrow" => return shift_days(today, 1),
        "yesterday" => return shift_days(today, -1),
        _ => {}
    }

    if let Some(weekday) = parse_weekday_name(&lower) {
        return Ok(next_weekday_date(today, weekday));
    }

    let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
    if let Some(caps) = rel_re.captures(&lower) {
        let num: i64 = caps["num"]
            .parse()
            .with_context(|| format!("invalid relative amount: {token}"))?;
        let days = if &caps["unit"] == "w" { num * 7 } else { num };
        let signed = if &caps["sign"] == "-" { -days } else { days };
        return shift_days(today, signed);
    }

    NaiveDate::parse_from_str(token, "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "unrecognized date expression: {token} (expected today, tomorrow, yesterday, \
             a weekday name, +Nd/-Nd/+Nw, or YYYY-MM-DD)"
        )
    })
}

fn shift_days(date: NaiveDate, days: i64) -> anyhow::Result<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
        .ok_or_else(|| anyhow!("date out of range: {date} {days:+} days"))
}

fn parse_weekday_name(token: &str) -> Option<Weekday> {
    match token {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

fn next_weekday_date(from: NaiveDate, target: Weekday) -> NaiveDate {
    let from_idx = i64::from(from.weekday().num_days_from_monday());
    let target_idx = i64::from(target.num_days_from_monday());
    let mut delta = (7 + target_idx - from_idx) % 7;
    if delta == 0 {
        delta = 7;
    }
    from.checked_add_signed(Duration::days(delta)).unwrap_or(from)
}

/// Long heading form, e.g. `Tuesday, March 10, 2026`.
pub fn format_day_heading(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}
