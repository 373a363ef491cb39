use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::{debug, info, trace, warn};

pub const DEFAULT_USER: &str = "local";
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

const DEFAULTS: [(&str, &str); 7] = [
    ("data.location", "~/.dayplan"),
    ("user", DEFAULT_USER),
    ("default.command", "show"),
    ("color", "on"),
    ("calendar.token_ttl_minutes", "50"),
    ("calendar.timeout_seconds", "30"),
    ("calendar.api_base", DEFAULT_API_BASE),
];

#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            map: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            loaded_files: vec![],
        }
    }
}

impl Config {
    #[tracing::instrument(skip(rc_override))]
    pub fn load(rc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        match resolve_rc_path(rc_override)? {
            Some(path) => {
                info!(rcfile = %path.display(), "loading rc file");
                cfg.load_file(&path)?;
            }
            None => debug!("no rc file found; using defaults"),
        }

        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.map.get(key).map(|v| parse_bool(v))
    }

    pub fn get_u32(&self, key: &str) -> anyhow::Result<Option<u32>> {
        self.map
            .get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .with_context(|| format!("config key {key} must be a whole number, got: {raw}"))
            })
            .transpose()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.map.iter()
    }

    /// The user whose documents are read and written.
    pub fn user(&self) -> anyhow::Result<String> {
        let user = self
            .get("user")
            .map(|u| u.trim().to_string())
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        if user.is_empty() || user.contains(['/', '\\']) || user.starts_with('.') {
            return Err(anyhow!("invalid user id in config: {user:?}"));
        }
        Ok(user)
    }

    pub fn token_ttl(&self) -> anyhow::Result<chrono::Duration> {
        let minutes = self.get_u32("calendar.token_ttl_minutes")?.unwrap_or(50);
        Ok(chrono::Duration::minutes(i64::from(minutes)))
    }

    pub fn calendar_timeout(&self) -> anyhow::Result<Duration> {
        let seconds = self.get_u32("calendar.timeout_seconds")?.unwrap_or(30);
        Ok(Duration::from_secs(u64::from(seconds.max(1))))
    }

    pub fn api_base(&self) -> String {
        self.get("calendar.api_base")
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.loaded_files.push(path.clone());

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for (line_num, raw_line) in text.lines().enumerate() {
            let line = raw_line
                .split_once('#')
                .map_or(raw_line, |(before, _)| before)
                .trim();
            if line.is_empty() {
                continue;
            }

            if let Some(include_rest) = line.strip_prefix("include ") {
                let include_path = resolve_include_path(&base_dir, include_rest.trim())?;
                debug!(
                    file = %path.display(),
                    include = %include_path.display(),
                    line = line_num + 1,
                    "processing include"
                );
                if include_path.exists() {
                    self.load_file(&include_path)?;
                } else {
                    warn!(include = %include_path.display(), "include file does not exist; skipping");
                }
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        Ok(())
    }
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(path) = override_dir {
        path.to_path_buf()
    } else if let Some(cfg_value) = cfg.get("data.location") {
        expand_tilde(Path::new(&cfg_value))
    } else {
        default_data_dir()?
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

fn resolve_rc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(rc_env) = std::env::var("DAYPLANRC") {
        if rc_env == "/dev/null" || rc_env.trim().is_empty() {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(rc_env)));
    }

    let Some(home) = dirs::home_dir() else {
        warn!("cannot determine home directory; skipping rc file");
        return Ok(None);
    };
    let candidate = home.join(".dayplanrc");
    Ok(candidate.exists().then_some(candidate))
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".dayplan"))
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.trim().is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let expanded = expand_tilde(Path::new(include));
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "on" | "true"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc_file_with_include_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let extra = dir.path().join("extra.rc");
        fs::write(&extra, "calendar.token_ttl_minutes = 20\n").expect("write include");
        let rc = dir.path().join("dayplanrc");
        fs::write(
            &rc,
            "# planner settings\nuser = alice   # trailing comment\ninclude extra.rc\ncolor=off\n",
        )
        .expect("write rc");

        let cfg = Config::load(Some(&rc)).expect("load");
        assert_eq!(cfg.user().expect("user"), "alice");
        assert_eq!(cfg.get_bool("color"), Some(false));
        assert_eq!(cfg.token_ttl().expect("ttl"), chrono::Duration::minutes(20));
        assert_eq!(cfg.get("default.command").as_deref(), Some("show"));
        assert_eq!(cfg.loaded_files.len(), 2);
    }

    #[test]
    fn overrides_strip_rc_prefix() {
        let mut cfg = Config::default();
        cfg.apply_overrides([
            ("rc.calendar.timeout_seconds".to_string(), "5".to_string()),
            ("calendar.api_base".to_string(), "http://localhost:9000/".to_string()),
        ]);
        assert_eq!(cfg.calendar_timeout().expect("timeout"), Duration::from_secs(5));
        assert_eq!(cfg.api_base(), "http://localhost:9000");
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.apply_overrides([
            ("user".to_string(), "../escape".to_string()),
            ("calendar.token_ttl_minutes".to_string(), "soon".to_string()),
        ]);
        assert!(cfg.user().is_err());
        assert!(cfg.token_ttl().is_err());
    }

    #[test]
    fn malformed_line_names_location() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rc = dir.path().join("rc");
        fs::write(&rc, "user = bob\nnot a setting\n").expect("write");
        let err = Config::load(Some(&rc)).expect_err("malformed");
        assert!(err.to_string().contains(":2:"));
    }
}
