use std::collections::BTreeSet;

use anyhow::{anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 50;
pub const RECENT_PROJECT_LIMIT: usize = 5;

fn default_token_ttl() -> Duration {
    Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedAccount {
    pub email: String,
    pub access_token: String,
    pub token_acquired_at: DateTime<Utc>,
}

impl ConnectedAccount {
    pub fn is_token_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.token_acquired_at >= ttl
    }

    pub fn token_expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.token_acquired_at + ttl
    }
}

/// Connected accounts and the calendar selection. Loaded once per run and
/// handed to the fetch routine; nothing reads it from ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub accounts: Vec<ConnectedAccount>,
    /// Calendar ids to fetch. Empty means every calendar of every account.
    #[serde(default)]
    pub selected_calendars: BTreeSet<String>,
    /// Project ids most recently linked to entries, newest first.
    #[serde(default)]
    pub recent_projects: Vec<String>,
    #[serde(skip, default = "default_token_ttl")]
    pub token_ttl: Duration,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            selected_calendars: BTreeSet::new(),
            recent_projects: Vec::new(),
            token_ttl: default_token_ttl(),
        }
    }
}

impl SessionState {
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn account(&self, email: &str) -> Option<&ConnectedAccount> {
        self.accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
    }

    /// Adds an account or refreshes the token of an existing one.
    pub fn connect(&mut self, email: &str, access_token: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let email = email.trim();
        let token = access_token.trim();
        if email.is_empty() || !email.contains('@') {
            bail!("invalid account email: {email:?}");
        }
        if token.is_empty() {
            bail!("access token cannot be empty");
        }

        match self
            .accounts
            .iter_mut()
            .find(|a| a.email.eq_ignore_ascii_case(email))
        {
            Some(existing) => {
                existing.access_token = token.to_string();
                existing.token_acquired_at = now;
                info!(account = %email, "refreshed account token");
            }
            None => {
                self.accounts.push(ConnectedAccount {
                    email: email.to_string(),
                    access_token: token.to_string(),
                    token_acquired_at: now,
                });
                info!(account = %email, "connected account");
            }
        }
        Ok(())
    }

    pub fn disconnect(&mut self, email: &str) -> anyhow::Result<ConnectedAccount> {
        let idx = self
            .accounts
            .iter()
            .position(|a| a.email.eq_ignore_ascii_case(email.trim()))
            .ok_or_else(|| anyhow!("no connected account: {email}"))?;
        let removed = self.accounts.remove(idx);
        info!(account = %removed.email, "disconnected account");
        Ok(removed)
    }

    pub fn is_calendar_selected(&self, calendar_id: &str) -> bool {
        self.selected_calendars.is_empty() || self.selected_calendars.contains(calendar_id)
    }

    /// Returns false when the calendar was already selected.
    pub fn select_calendar(&mut self, calendar_id: &str) -> bool {
        self.selected_calendars.insert(calendar_id.to_string())
    }

    pub fn note_recent_project(&mut self, project_id: &str) {
        self.recent_projects.retain(|id| id != project_id);
        self.recent_projects.insert(0, project_id.to_string());
        self.recent_projects.truncate(RECENT_PROJECT_LIMIT);
    }

    pub fn deselect_calendar(&mut self, calendar_id: &str) -> anyhow::Result<()> {
        if !self.selected_calendars.remove(calendar_id) {
            bail!("calendar is not selected: {calendar_id}");
        }
        Ok(())
    }
}
