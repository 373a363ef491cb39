use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use unicode_width::UnicodeWidthStr;

use crate::calendar::{CalendarEvent, CalendarInfo, FailureKind, FetchFailure};
use crate::config::Config;
use crate::datetime::format_day_heading;
use crate::grid::{ExpansionLevel, GridRow};
use crate::planner::{Planner, Priority, Project, TaskListing, format_duration};
use crate::schedule::EntryKind;
use crate::session::SessionState;
use crate::slot::{self, TimeOfDay};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    /// Prints the visible rows of one day. `events` holds fetched events by
    /// anchor so rows without a stored entry can still show what sits there.
    #[tracing::instrument(skip_all, fields(%date, rows = rows.len()))]
    pub fn print_day(
        &mut self,
        date: NaiveDate,
        rows: &[GridRow<'_>],
        planner: &Planner,
        events: &BTreeMap<TimeOfDay, &CalendarEvent>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", self.paint(&format_day_heading(date), "1"))?;
        writeln!(out)?;

        let headers = vec![
            "Time".to_string(),
            " ".to_string(),
            "Entry".to_string(),
            "Until".to_string(),
            "Length".to_string(),
            "Area".to_string(),
        ];
        let mut table = Vec::with_capacity(rows.len());

        for row in rows {
            let time = if row.slot.is_hourly() {
                self.paint(&row.slot.to_string(), "33")
            } else {
                row.slot.to_string()
            };

            let (name, area, until, length) = match (row.entry, events.get(&row.slot)) {
                (Some(entry), _) => {
                    let mut name = entry.name.clone();
                    if let Some(project) = &entry.project_name {
                        name = format!("{name} ({project})");
                    }
                    let name = match entry.kind {
                        EntryKind::Calendar => {
                            let label = entry
                                .calendar_name
                                .as_deref()
                                .map(|cal| format!("{name} @{cal}"))
                                .unwrap_or(name);
                            self.paint(&label, "36")
                        }
                        EntryKind::Custom => name,
                        EntryKind::Task => self.paint(&name, "1"),
                    };
                    let area = entry
                        .area
                        .as_deref()
                        .and_then(|id| planner.area(id))
                        .map(|a| self.paint_hex(&a.name, &a.color))
                        .unwrap_or_default();
                    let until = row.end_minutes.map(slot::format_minutes).unwrap_or_default();
                    let length = if entry.all_day {
                        "all day".to_string()
                    } else {
                        entry
                            .known_duration(row.slot)
                            .map(format_duration)
                            .unwrap_or_default()
                    };
                    (name, area, until, length)
                }
                (None, Some(event)) => {
                    let label = format!("{} @{}", event.summary, event.calendar_name);
                    (self.paint(&label, "2"), String::new(), String::new(), String::new())
                }
                (None, None) => Default::default(),
            };

            table.push(vec![
                time,
                expansion_marker(row.slot, row.expansion).to_string(),
                name,
                until,
                length,
                area,
            ]);
        }

        write_table(&mut out, headers, table)?;
        Ok(())
    }

    pub fn print_areas(&mut self, planner: &Planner) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec![
            "ID".to_string(),
            "Name".to_string(),
            "Color".to_string(),
            "Projects".to_string(),
        ];
        let rows = planner
            .areas
            .areas
            .iter()
            .map(|area| {
                vec![
                    self.paint(short_id(&area.id), "33"),
                    self.paint_hex(&area.name, &area.color),
                    area.color.clone(),
                    planner.projects_in(&area.id).len().to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_projects(&mut self, planner: &Planner, area_id: Option<&str>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec![
            "ID".to_string(),
            "Area".to_string(),
            "Project".to_string(),
            "Open".to_string(),
            "Done".to_string(),
        ];
        let mut rows = Vec::new();
        for area in &planner.areas.areas {
            if area_id.is_some_and(|id| id != area.id) {
                continue;
            }
            for project in planner.projects_in(&area.id) {
                let done = project.tasks.iter().filter(|t| t.completed).count();
                rows.push(vec![
                    self.paint(short_id(&project.id), "33"),
                    self.paint_hex(&area.name, &area.color),
                    project.name.clone(),
                    (project.tasks.len() - done).to_string(),
                    done.to_string(),
                ]);
            }
        }
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_tasks(&mut self, listed: &[TaskListing<'_>]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec![
            "ID".to_string(),
            "Area".to_string(),
            "Project".to_string(),
            "Task".to_string(),
            "Priority".to_string(),
            "Length".to_string(),
            "Used".to_string(),
        ];
        let rows = listed
            .iter()
            .map(|item| {
                let task = item.task;
                let name = if task.completed {
                    self.paint(&format!("[x] {}", task.name), "2")
                } else {
                    format!("[ ] {}", task.name)
                };
                let priority = match task.priority {
                    Priority::Urgent => self.paint("urgent", "31"),
                    Priority::High => self.paint("high", "33"),
                    other => other.to_string(),
                };
                vec![
                    self.paint(short_id(&task.id), "33"),
                    self.paint_hex(&item.area.name, &item.area.color),
                    item.project.name.clone(),
                    name,
                    priority,
                    task.duration_minutes.map(format_duration).unwrap_or_default(),
                    item.scheduled.to_string(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_recent_projects(
        &mut self,
        planner: &Planner,
        recent: &[(&str, &Project)],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec!["ID".to_string(), "Area".to_string(), "Project".to_string()];
        let rows = recent
            .iter()
            .map(|(area_id, project)| {
                let area = planner
                    .area(area_id)
                    .map(|a| self.paint_hex(&a.name, &a.color))
                    .unwrap_or_default();
                vec![
                    self.paint(short_id(&project.id), "33"),
                    area,
                    project.name.clone(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_accounts(&mut self, session: &SessionState, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec!["Account".to_string(), "Token".to_string()];
        let rows = session
            .accounts
            .iter()
            .map(|account| {
                let status = if account.is_token_expired(now, session.token_ttl) {
                    self.paint("expired", "31")
                } else {
                    let left = (account.token_expires_at(session.token_ttl) - now).num_minutes();
                    format!("valid ({left}m left)")
                };
                vec![account.email.clone(), status]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_calendars(
        &mut self,
        calendars: &[CalendarInfo],
        session: &SessionState,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec![
            " ".to_string(),
            "Calendar".to_string(),
            "Account".to_string(),
            "ID".to_string(),
        ];
        let rows = calendars
            .iter()
            .map(|cal| {
                let mark = if session.is_calendar_selected(&cal.id) { "*" } else { " " };
                let name = match &cal.background_color {
                    Some(color) => self.paint_hex(&cal.summary, color),
                    None => cal.summary.clone(),
                };
                vec![mark.to_string(), name, cal.account_email.clone(), cal.id.clone()]
            })
            .collect();
        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_failures(&mut self, failures: &[FetchFailure]) -> anyhow::Result<()> {
        let mut err = io::stderr().lock();
        for failure in failures {
            let kind = match failure.kind {
                FailureKind::Auth => "auth",
                FailureKind::Fetch => "fetch",
            };
            let target = match &failure.calendar {
                Some(calendar) => format!("{} / {calendar}", failure.account),
                None => failure.account.clone(),
            };
            writeln!(err, "warning: {kind} failure for {target}: {}", failure.message)?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }

    fn paint_hex(&self, text: &str, hex: &str) -> String {
        match hex_to_ansi(hex) {
            Some(code) => self.paint(text, &code),
            None => text.to_string(),
        }
    }
}

fn expansion_marker(slot: TimeOfDay, level: Option<ExpansionLevel>) -> &'static str {
    if !slot.is_hourly() {
        return " ";
    }
    match level {
        None => "+",
        Some(ExpansionLevel::Half) => "-",
        Some(ExpansionLevel::Quarter) => "=",
    }
}

/// Generated ids are shown by their first block; seeded slugs are shown whole.
fn short_id(id: &str) -> &str {
    match id.split_once('-') {
        Some((head, _)) if id.len() == 36 => head,
        _ => id,
    }
}

/// 24-bit foreground escape for a `#rrggbb` color.
fn hex_to_ansi(hex: &str) -> Option<String> {
    let digits = hex.strip_prefix('#').filter(|d| d.len() == 6)?;
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(digits.get(range)?, 16).ok();
    Some(format!(
        "38;2;{};{};{}",
        channel(0..2)?,
        channel(2..4)?,
        channel(4..6)?
    ))
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths).take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_become_truecolor_codes() {
        assert_eq!(hex_to_ansi("#2196f3").as_deref(), Some("38;2;33;150;243"));
        assert_eq!(hex_to_ansi("2196f3"), None);
        assert_eq!(hex_to_ansi("#21zz"), None);
    }

    #[test]
    fn table_pads_by_visible_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["Time".to_string(), "Entry".to_string()],
            vec![
                vec!["\x1b[33m09:00\x1b[0m".to_string(), "Café".to_string()],
                vec!["09:30".to_string(), "Standup".to_string()],
            ],
        )
        .expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Time  Entry   ");
        assert_eq!(lines[1], "----- ------- ");
        assert_eq!(strip_ansi(lines[2]), "09:00 Café    ");
    }
}
