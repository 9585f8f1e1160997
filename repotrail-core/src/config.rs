//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/repotrail/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/repotrail/` (~/.config/repotrail/)
//! - Data: `$XDG_DATA_HOME/repotrail/` (~/.local/share/repotrail/)
//! - State/Logs: `$XDG_STATE_HOME/repotrail/` (~/.local/state/repotrail/)

use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable consulted when `upstream.token` is not set
pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Upper bound the upstream API accepts for `per_page`
pub const MAX_PER_PAGE: u32 = 100;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Upstream API configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Sync loop configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to do when the upstream reports an exhausted rate limit
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPolicy {
    /// Log the wait until reset and keep going
    #[default]
    Advisory,
    /// Sleep until the reset time (capped) before the next request
    Wait,
}

/// Upstream API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token (falls back to `GITHUB_TOKEN`)
    pub token: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Commits requested per page (1..=100)
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Behaviour on exhausted quota
    #[serde(default)]
    pub rate_limit_policy: RateLimitPolicy,

    /// Longest wait honoured under the `wait` policy
    #[serde(default = "default_max_rate_limit_wait")]
    pub max_rate_limit_wait_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout(),
            per_page: default_per_page(),
            rate_limit_policy: RateLimitPolicy::default(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait(),
        }
    }
}

impl UpstreamConfig {
    /// Configured token, or the `GITHUB_TOKEN` environment variable.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.max_rate_limit_wait_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("upstream.base_url must not be empty".to_string()));
        }
        if self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            return Err(Error::Config(format!(
                "upstream.per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "upstream.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_per_page() -> u32 {
    MAX_PER_PAGE
}

fn default_max_rate_limit_wait() -> u64 {
    900
}

/// Sync loop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Seconds between ingestion passes for each repository
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Start of the commit window (defaults to now minus `lookback_days`)
    pub start_date: Option<DateTime<Utc>>,

    /// Days of history to fetch when `start_date` is not set
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// End of the initial commit window (defaults to now at pass start)
    pub end_date: Option<DateTime<Utc>>,

    /// Repository added on `serve` startup, if any
    pub default_repository: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            start_date: None,
            lookback_days: default_lookback_days(),
            end_date: None,
            default_repository: None,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(Error::Config(
                "sync.interval_secs must be greater than 0".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end <= start {
                return Err(Error::Config(
                    "sync.end_date must be after sync.start_date".to_string(),
                ));
            }
        }
        if self.checked_since(Utc::now()).is_none() {
            return Err(Error::Config(format!(
                "sync.lookback_days = {} reaches past the earliest supported date",
                self.lookback_days
            )));
        }
        Ok(())
    }

    /// Commit window start for a pass beginning at `now`.
    ///
    /// A lookback reaching past the earliest representable date clamps to it.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.checked_since(now).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn checked_since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.start_date {
            Some(start) => Some(start),
            None => ChronoDuration::try_days(i64::from(self.lookback_days))
                .and_then(|lookback| now.checked_sub_signed(lookback)),
        }
    }
}

fn default_interval() -> u64 {
    3600
}

fn default_lookback_days() -> u32 {
    240
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.upstream.validate()?;
        self.sync.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/repotrail/config.toml` (~/.config/repotrail/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("repotrail").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/repotrail/` (~/.local/share/repotrail/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("repotrail")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/repotrail/` (~/.local/state/repotrail/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("repotrail")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/repotrail/data.db` (~/.local/share/repotrail/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/repotrail/repotrail.log` (~/.local/state/repotrail/repotrail.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("repotrail.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.upstream.base_url, "https://api.github.com");
        assert_eq!(config.upstream.per_page, 100);
        assert_eq!(config.upstream.rate_limit_policy, RateLimitPolicy::Advisory);
        assert_eq!(config.sync.interval_secs, 3600);
        assert!(config.sync.default_repository.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[upstream]
base_url = "https://github.example.com/api/v3"
token = "ghp_test"
per_page = 50
rate_limit_policy = "wait"

[sync]
interval_secs = 600
start_date = "2024-01-01T00:00:00Z"
default_repository = "golang/go"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.upstream.base_url, "https://github.example.com/api/v3");
        assert_eq!(config.upstream.resolved_token().as_deref(), Some("ghp_test"));
        assert_eq!(config.upstream.per_page, 50);
        assert_eq!(config.upstream.rate_limit_policy, RateLimitPolicy::Wait);
        assert_eq!(config.sync.interval(), Duration::from_secs(600));
        assert_eq!(config.sync.default_repository.as_deref(), Some("golang/go"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_upstream_validation() {
        let config = UpstreamConfig {
            per_page: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = UpstreamConfig {
            per_page: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = UpstreamConfig {
            base_url: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sync_validation() {
        let config = SyncConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let start = Utc::now();
        let config = SyncConfig {
            start_date: Some(start),
            end_date: Some(start - ChronoDuration::days(1)),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            lookback_days: 4_000_000_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("lookback_days")));
        assert_eq!(config.since(Utc::now()), DateTime::<Utc>::MIN_UTC);

        // An explicit start date makes the lookback irrelevant.
        let config = SyncConfig {
            lookback_days: 4_000_000_000,
            start_date: Some(Utc::now()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = SyncConfig {
            lookback_days: 36_500,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_lookback_is_rejected_on_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\nlookback_days = 4000000000\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_commit_window_defaults() {
        let now = Utc::now();
        let config = SyncConfig::default();
        assert_eq!(config.since(now), now - ChronoDuration::days(240));

        let start = now - ChronoDuration::days(3);
        let config = SyncConfig {
            start_date: Some(start),
            ..Default::default()
        };
        assert_eq!(config.since(now), start);
    }

    #[test]
    fn test_load_from_rejects_invalid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[upstream]\nper_page = 500\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
