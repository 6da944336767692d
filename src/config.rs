use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{clog_debug, Error, Result};

/// Default hard timeout for a single worker execution (5 minutes).
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

/// Default heartbeat scan interval for the session monitor.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Default maximum number of concurrently busy sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Override directory for task worktrees (defaults to ~/.conductor/worktrees).
    pub worktree_dir: Option<String>,
    /// Worker command line (defaults to "claude").
    pub command: Option<String>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_task_timeout_secs() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worktree_dir: None,
            command: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
        }
    }
}

impl Config {
    pub fn app_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::app_dir()?.join("conductor.toml"))
    }

    /// Directory for advisory per-execution records.
    pub fn state_dir() -> Result<PathBuf> {
        Ok(Self::app_dir()?.join("state"))
    }

    pub fn worktrees_dir() -> Result<PathBuf> {
        let config = Self::load()?;
        match config.worktree_dir {
            Some(dir) => Ok(expand_tilde(&dir)),
            None => Ok(Self::app_dir()?.join("worktrees")),
        }
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        clog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        clog_debug!(
            "Config loaded: command={:?}, max_sessions={}, task_timeout_secs={}",
            config.command,
            config.max_sessions,
            config.task_timeout_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let app_dir = Self::app_dir()?;
        clog_debug!("Config::save app_dir={}", app_dir.display());
        if !app_dir.exists() {
            fs::create_dir_all(&app_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs() -> Result<()> {
        let app_dir = Self::app_dir()?;
        let worktrees_dir = Self::worktrees_dir()?;
        let state_dir = Self::state_dir()?;
        clog_debug!(
            "Config::ensure_dirs app={} worktrees={}",
            app_dir.display(),
            worktrees_dir.display()
        );
        for dir in [&app_dir, &worktrees_dir, &state_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
