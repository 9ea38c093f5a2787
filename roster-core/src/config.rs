//! `~/.roster/config.yaml`: facility, feed and schedule settings.
//!
//! Same `_at(home)` / convenience-wrapper split as [`crate::store`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable that overrides `feed.api_key`.
pub const API_KEY_ENV: &str = "ROSTER_FEED_API_KEY";

pub const MIN_INTERVAL_MINUTES: u64 = 10;
pub const MAX_INTERVAL_MINUTES: u64 = 30;

/// What happens to a local record whose cid left the authoritative roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemovalPolicy {
    /// Soft-delete the record and release its initials.
    #[default]
    Retire,
    /// Keep the record and its initials, flag it non-member.
    Demote,
}

impl std::fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalPolicy::Retire => write!(f, "retire"),
            RemovalPolicy::Demote => write!(f, "demote"),
        }
    }
}

impl std::str::FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retire" => Ok(Self::Retire),
            "demote" => Ok(Self::Demote),
            other => Err(format!(
                "unknown removal policy '{other}'; expected: retire, demote"
            )),
        }
    }
}

/// Where the authoritative roster comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// `http(s)://` URL, `file://` URL or plain filesystem path.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Root of the YAML config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterConfig {
    pub facility: String,
    pub feed: FeedConfig,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default)]
    pub removal: RemovalPolicy,
}

fn default_interval_minutes() -> u64 {
    MAX_INTERVAL_MINUTES
}

impl RosterConfig {
    pub fn new(facility: impl Into<String>, feed_url: impl Into<String>) -> Self {
        Self {
            facility: facility.into(),
            feed: FeedConfig {
                url: feed_url.into(),
                api_key: None,
                timeout_secs: default_timeout_secs(),
            },
            interval_minutes: default_interval_minutes(),
            removal: RemovalPolicy::default(),
        }
    }

    /// Pass cadence, clamped to 10..=30 minutes.
    pub fn interval(&self) -> std::time::Duration {
        let minutes = self
            .interval_minutes
            .clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES);
        std::time::Duration::from_secs(minutes * 60)
    }

    /// Replace the stored key with `ROSTER_FEED_API_KEY` when it is set.
    pub fn apply_env(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.feed.api_key = Some(key);
            }
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.facility.trim().is_empty() {
            return Err(ConfigError::Invalid("facility must not be empty".to_string()));
        }
        if self.feed.url.trim().is_empty() {
            return Err(ConfigError::Invalid("feed.url must not be empty".to_string()));
        }
        Ok(())
    }
}

/// `<home>/.roster/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".roster").join("config.yaml")
}

/// Load and validate the config, then apply environment overrides.
pub fn load_at(home: &Path) -> Result<RosterConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: RosterConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config.apply_env())
}

/// Atomically write the config (`.yaml.tmp` → `chmod 0600` → rename).
pub fn save_at(home: &Path, config: &RosterConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let path = config_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, serde_yaml::to_string(config)?)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Write `config` unless a config file already exists.
///
/// Idempotent: an existing file is loaded and returned unchanged.
pub fn init_at(home: &Path, config: RosterConfig) -> Result<RosterConfig, ConfigError> {
    if config_path_at(home).exists() {
        return load_at(home);
    }
    save_at(home, &config)?;
    Ok(config)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
