//! Configuration loading and management
//!
//! Handles parsing of `.fcoord.toml` configuration files and resolving them
//! into the concrete [`Settings`] a [`crate::service::CoordinationService`]
//! runs with.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Name of the project configuration file
pub const CONFIG_FILE: &str = ".fcoord.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Timing of leases, handshakes, sync and polling
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Where snapshots and backups live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Agent identity defaults
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Coordination timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// How long a granted lock lasts before it becomes reclaimable
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl: String,

    /// Upper bound on waiting for a coordination reply
    #[serde(default = "default_coordination_timeout")]
    pub coordination_timeout: String,

    /// Interval of the periodic shared-context sync
    #[serde(default = "default_sync_interval")]
    pub sync_interval: String,

    /// Polling interval for tracked files
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

fn default_lease_ttl() -> String {
    "5m".to_string()
}

fn default_coordination_timeout() -> String {
    "10s".to_string()
}

fn default_sync_interval() -> String {
    "5s".to_string()
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            lease_ttl: default_lease_ttl(),
            coordination_timeout: default_coordination_timeout(),
            sync_interval: default_sync_interval(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State directory, relative to the directory holding the config file
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Backup directory for auto-merge snapshots, relative to `state_dir`
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,

    /// How long to wait for the on-disk store lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_state_dir() -> String {
    ".fcoord".to_string()
}

fn default_backup_dir() -> String {
    "backups".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            backup_dir: default_backup_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Agent-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default agent id when none specified
    #[serde(default = "default_agent")]
    pub default: String,
}

fn default_agent() -> String {
    "unknown".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default: default_agent(),
        }
    }
}

impl Config {
    /// Load configuration from a `.fcoord.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve durations and directories relative to `root`.
    pub fn settings(&self, root: &Path) -> Result<Settings> {
        let state_dir = root.join(&self.storage.state_dir);
        Ok(Settings {
            lease_ttl: parse_duration(&self.coordination.lease_ttl)?,
            coordination_timeout: to_std(parse_duration(
                &self.coordination.coordination_timeout,
            )?)?,
            sync_interval: to_std(parse_duration(&self.coordination.sync_interval)?)?,
            poll_interval: to_std(parse_duration(&self.coordination.poll_interval)?)?,
            backup_dir: state_dir.join(&self.storage.backup_dir),
            state_dir,
            lock_timeout_ms: self.storage.lock_timeout_ms,
        })
    }

    fn validate(&self) -> Result<()> {
        let fields = [
            ("coordination.lease_ttl", &self.coordination.lease_ttl),
            (
                "coordination.coordination_timeout",
                &self.coordination.coordination_timeout,
            ),
            ("coordination.sync_interval", &self.coordination.sync_interval),
            ("coordination.poll_interval", &self.coordination.poll_interval),
        ];
        for (field, raw) in fields {
            let duration = parse_duration(raw)
                .map_err(|err| Error::InvalidConfig(format!("{field}: {err}")))?;
            if duration <= chrono::Duration::zero() {
                return Err(Error::InvalidConfig(format!("{field} must be > 0")));
            }
        }

        if self.storage.state_dir.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "storage.state_dir cannot be empty".to_string(),
            ));
        }
        if self.storage.backup_dir.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "storage.backup_dir cannot be empty".to_string(),
            ));
        }
        if self.agent.default.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "agent.default cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Resolved settings
// =============================================================================

/// Concrete runtime settings for a coordination service.
#[derive(Debug, Clone)]
pub struct Settings {
    pub lease_ttl: chrono::Duration,
    pub coordination_timeout: std::time::Duration,
    pub sync_interval: std::time::Duration,
    pub poll_interval: std::time::Duration,
    pub state_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub lock_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let state_dir = PathBuf::from(default_state_dir());
        Self {
            lease_ttl: chrono::Duration::minutes(5),
            coordination_timeout: std::time::Duration::from_secs(10),
            sync_interval: std::time::Duration::from_secs(5),
            poll_interval: std::time::Duration::from_secs(1),
            backup_dir: state_dir.join(default_backup_dir()),
            state_dir,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Settings {
    /// Default settings rooted at a specific state directory.
    pub fn in_dir(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            backup_dir: state_dir.join(default_backup_dir()),
            state_dir,
            ..Self::default()
        }
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a duration string like `"30s"`, `"5m"`, `"2h"`, `"1d"` or `"250ms"`.
///
/// A bare number is taken as minutes.
pub fn parse_duration(s: &str) -> Result<chrono::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, "m"),
    };

    let num: i64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid duration number: {}", num_str)))?;

    let duration = match unit.trim().to_lowercase().as_str() {
        "ms" | "millis" => chrono::Duration::milliseconds(num),
        "s" | "sec" | "second" | "seconds" => chrono::Duration::seconds(num),
        "m" | "min" | "minute" | "minutes" => chrono::Duration::minutes(num),
        "h" | "hr" | "hour" | "hours" => chrono::Duration::hours(num),
        "d" | "day" | "days" => chrono::Duration::days(num),
        "w" | "week" | "weeks" => chrono::Duration::weeks(num),
        other => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{}'. Expected: ms, s, m, h, d, w",
                other
            )));
        }
    };

    Ok(duration)
}

/// [`parse_duration`] as a `std::time::Duration` (negative is an error).
pub fn parse_std_duration(s: &str) -> Result<std::time::Duration> {
    to_std(parse_duration(s)?)
}

fn to_std(duration: chrono::Duration) -> Result<std::time::Duration> {
    duration
        .to_std()
        .map_err(|_| Error::InvalidConfig(format!("duration out of range: {duration}")))
}
