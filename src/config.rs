//! Configuration loading and management
//!
//! Handles parsing of `duewatch.toml`. Every field has a default, so a
//! missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lock::DEFAULT_LOCK_TIMEOUT_MS;
use crate::policy::{ReminderPolicy, MAX_HIT_WINDOW_SECS};
use crate::sink::BellOptions;
use crate::watcher::WatchSettings;

pub const CONFIG_FILE_NAME: &str = "duewatch.toml";
pub const TASKS_FILE_NAME: &str = "tasks.json";

const MAX_BELL_REPEATS: u32 = 10;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Task storage configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Watcher timing
    #[serde(default)]
    pub watch: WatchConfig,

    /// Alarm rendering
    #[serde(default)]
    pub alarm: AlarmConfig,
}

/// Task storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Task file; defaults to the per-user data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// How long to wait for another process holding the task file
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Watcher timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Delay between two polls of one task
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Width of each advance-warning window
    #[serde(default = "default_hit_window_secs")]
    pub hit_window_secs: u64,

    /// How often `watch` re-reads the task file for tasks added elsewhere
    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_hit_window_secs() -> u64 {
    60
}

fn default_rescan_interval_ms() -> u64 {
    10_000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            hit_window_secs: default_hit_window_secs(),
            rescan_interval_ms: default_rescan_interval_ms(),
        }
    }
}

/// Alarm rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmConfig {
    /// Ring the terminal bell for overdue tasks
    #[serde(default = "default_true")]
    pub bell: bool,

    #[serde(default = "default_bell_repeats")]
    pub bell_repeats: u32,

    #[serde(default = "default_bell_gap_ms")]
    pub bell_gap_ms: u64,

    /// Mirror every alarm as JSON lines to this file (`-` for stdout)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_file: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_bell_repeats() -> u32 {
    3
}

fn default_bell_gap_ms() -> u64 {
    500
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            bell: default_true(),
            bell_repeats: default_bell_repeats(),
            bell_gap_ms: default_bell_gap_ms(),
            events_file: None,
        }
    }
}

impl Config {
    /// Load configuration from a `duewatch.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, or return defaults when it is absent.
    ///
    /// Unlike a missing file, an invalid one is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            poll_interval: Duration::from_millis(self.watch.poll_interval_ms),
            policy: ReminderPolicy::new(
                i64::try_from(self.watch.hit_window_secs).unwrap_or(MAX_HIT_WINDOW_SECS),
            ),
        }
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.watch.rescan_interval_ms)
    }

    pub fn bell_options(&self) -> BellOptions {
        BellOptions {
            enabled: self.alarm.bell,
            repeats: self.alarm.bell_repeats,
            gap: Duration::from_millis(self.alarm.bell_gap_ms),
        }
    }

    /// Task file: the configured path, else the per-user data directory,
    /// else `tasks.json` in the working directory.
    pub fn tasks_path(&self) -> PathBuf {
        if let Some(path) = &self.store.path {
            return path.clone();
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join(TASKS_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(TASKS_FILE_NAME))
    }

    fn validate(&self) -> Result<()> {
        if self.store.lock_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "store.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        self.watch.validate()?;
        self.alarm.validate()?;
        Ok(())
    }
}

impl WatchConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "watch.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.hit_window_secs == 0 {
            return Err(Error::InvalidConfig(
                "watch.hit_window_secs must be > 0".to_string(),
            ));
        }
        if self.hit_window_secs > MAX_HIT_WINDOW_SECS as u64 {
            return Err(Error::InvalidConfig(format!(
                "watch.hit_window_secs must be <= {MAX_HIT_WINDOW_SECS}"
            )));
        }
        // A window narrower than the poll interval can be stepped over.
        if self.poll_interval_ms >= self.hit_window_secs.saturating_mul(1000) {
            return Err(Error::InvalidConfig(format!(
                "watch.poll_interval_ms ({}) must be shorter than watch.hit_window_secs ({}s)",
                self.poll_interval_ms, self.hit_window_secs
            )));
        }
        if self.rescan_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "watch.rescan_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl AlarmConfig {
    fn validate(&self) -> Result<()> {
        if self.bell_repeats > MAX_BELL_REPEATS {
            return Err(Error::InvalidConfig(format!(
                "alarm.bell_repeats must be <= {MAX_BELL_REPEATS}"
            )));
        }
        Ok(())
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "duewatch")
}

/// Config file location: the per-user config directory, else the working
/// directory.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert!(cfg.store.path.is_none());
        assert_eq!(cfg.store.lock_timeout_ms, 5000);
        assert_eq!(cfg.watch.poll_interval_ms, 10_000);
        assert_eq!(cfg.watch.hit_window_secs, 60);
        assert_eq!(cfg.watch.rescan_interval_ms, 10_000);
        assert!(cfg.alarm.bell);
        assert_eq!(cfg.alarm.bell_repeats, 3);
        assert_eq!(cfg.alarm.bell_gap_ms, 500);
        assert!(cfg.alarm.events_file.is_none());

        let settings = cfg.watch_settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.policy.hit_window_secs(), 60);
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        let content = r#"
[store]
path = "/tmp/school/tasks.json"
lock_timeout_ms = 250

[watch]
poll_interval_ms = 5000
hit_window_secs = 30
rescan_interval_ms = 2000

[alarm]
bell = false
bell_repeats = 1
bell_gap_ms = 100
events_file = "alarms.jsonl"
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.tasks_path(), PathBuf::from("/tmp/school/tasks.json"));
        assert_eq!(cfg.store.lock_timeout_ms, 250);
        assert_eq!(cfg.watch.poll_interval_ms, 5000);
        assert_eq!(cfg.watch.hit_window_secs, 30);
        assert_eq!(cfg.rescan_interval(), Duration::from_secs(2));
        assert!(!cfg.bell_options().enabled);
        assert_eq!(cfg.bell_options().repeats, 1);
        assert_eq!(cfg.alarm.events_file.as_deref(), Some("alarms.jsonl"));
    }

    #[test]
    fn poll_interval_must_fit_in_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[watch]\npoll_interval_ms = 60000\nhit_window_secs = 60\n")
            .expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            Error::InvalidConfig(msg) => assert!(msg.contains("poll_interval_ms")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn hit_window_capped_below_one_hour() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);

        fs::write(&path, "[watch]\nhit_window_secs = 3600\n").expect("write config");
        match Config::load(&path).expect_err("window too wide") {
            Error::InvalidConfig(msg) => assert!(msg.contains("hit_window_secs")),
            other => panic!("unexpected error: {other:?}"),
        }

        fs::write(&path, "[watch]\nhit_window_secs = 9223372036854775807\n")
            .expect("write config");
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));

        fs::write(&path, "[watch]\nhit_window_secs = 3599\n").expect("write config");
        let cfg = Config::load(&path).expect("widest window");
        assert_eq!(cfg.watch_settings().policy.hit_window_secs(), 3599);
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[watch]\npoll_interval_ms = 0\n").expect("write config");
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn too_many_bells_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[alarm]\nbell_repeats = 50\n").expect("write config");
        assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn load_or_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_or_default(&dir.path().join("absent.toml")).expect("defaults");
        assert_eq!(cfg.watch.poll_interval_ms, 10_000);
    }

    #[test]
    fn load_or_default_still_rejects_bad_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "this = [not valid").expect("write config");
        assert!(matches!(
            Config::load_or_default(&path),
            Err(Error::TomlParse(_))
        ));
    }
}
