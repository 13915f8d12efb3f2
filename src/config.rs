//! Configuration management for Groupcast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Main configuration structure for Groupcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Anti-throttle and pacing knobs for the posting engine
    #[serde(default)]
    pub engine: EngineConfig,

    /// Session client behaviour
    #[serde(default)]
    pub client: ClientConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    /// Supports ~ expansion and environment variable override via GROUPCAST_DB_PATH
    pub path: String,
}

/// Anti-throttle and pacing configuration.
///
/// All durations are milliseconds. The defaults are the conservative variant;
/// integrators tune them per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum delay between two sends on the same session.
    #[serde(default = "default_min_group_delay_ms")]
    pub min_group_delay_ms: u64,

    /// Maximum delay between two sends on the same session.
    #[serde(default = "default_max_group_delay_ms")]
    pub max_group_delay_ms: u64,

    /// Base pause between rounds; jittered by `round_pause_jitter_ms`.
    #[serde(default = "default_round_pause_ms")]
    pub round_pause_ms: u64,

    #[serde(default = "default_round_pause_jitter_ms")]
    pub round_pause_jitter_ms: u64,

    /// Sends on one session before a cooldown is armed.
    #[serde(default = "default_session_message_limit")]
    pub session_message_limit: u32,

    /// Cooldown armed after `session_message_limit` sends.
    #[serde(default = "default_session_cooldown_ms")]
    pub session_cooldown_ms: u64,

    /// Flood signals tolerated before the long freeze kicks in.
    #[serde(default = "default_max_flood_per_session")]
    pub max_flood_per_session: u32,

    #[serde(default = "default_flood_freeze_ms")]
    pub flood_freeze_ms: u64,

    /// Consecutive transient errors before a defensive cooldown.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// Minimum spacing between two posts into the same group.
    #[serde(default = "default_group_cooldown_ms")]
    pub group_cooldown_ms: u64,

    /// Every N successful sends, take a long pause instead of a short one.
    #[serde(default = "default_long_pause_interval")]
    pub long_pause_interval: u32,

    #[serde(default = "default_long_pause_min_ms")]
    pub long_pause_min_ms: u64,

    #[serde(default = "default_long_pause_max_ms")]
    pub long_pause_max_ms: u64,

    /// Ring buffer trim threshold for per-job logs.
    #[serde(default = "default_max_job_log_entries")]
    pub max_job_log_entries: usize,

    /// Entries kept after a trim.
    #[serde(default = "default_job_log_trim_to")]
    pub job_log_trim_to: usize,

    /// Groups marked priority per session by the recompute loop.
    #[serde(default = "default_priority_top_n")]
    pub priority_top_n: u32,

    /// Stop-flag poll step during long sleeps.
    #[serde(default = "default_stop_poll_ms")]
    pub stop_poll_ms: u64,

    /// Pause-flag poll step while a job is paused.
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
}

/// Session client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connect attempts before a session is excluded from a job.
    #[serde(default = "default_connection_retries")]
    pub connection_retries: u32,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

// Default value functions for serde
fn default_min_group_delay_ms() -> u64 {
    5_000
}

fn default_max_group_delay_ms() -> u64 {
    20_000
}

fn default_round_pause_ms() -> u64 {
    15 * 60 * 1000
}

fn default_round_pause_jitter_ms() -> u64 {
    3 * 60 * 1000
}

fn default_session_message_limit() -> u32 {
    30
}

fn default_session_cooldown_ms() -> u64 {
    5 * 60 * 1000
}

fn default_max_flood_per_session() -> u32 {
    3
}

fn default_flood_freeze_ms() -> u64 {
    30 * 60 * 1000
}

fn default_max_consecutive_errors() -> u32 {
    5
}

fn default_group_cooldown_ms() -> u64 {
    10 * 60 * 1000
}

fn default_long_pause_interval() -> u32 {
    10
}

fn default_long_pause_min_ms() -> u64 {
    30_000
}

fn default_long_pause_max_ms() -> u64 {
    90_000
}

fn default_max_job_log_entries() -> usize {
    500
}

fn default_job_log_trim_to() -> usize {
    300
}

fn default_priority_top_n() -> u32 {
    50
}

fn default_stop_poll_ms() -> u64 {
    2_000
}

fn default_pause_poll_ms() -> u64 {
    5_000
}

fn default_connection_retries() -> u32 {
    3
}

fn default_connect_timeout_ms() -> u64 {
    60_000
}

fn default_send_timeout_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_group_delay_ms: default_min_group_delay_ms(),
            max_group_delay_ms: default_max_group_delay_ms(),
            round_pause_ms: default_round_pause_ms(),
            round_pause_jitter_ms: default_round_pause_jitter_ms(),
            session_message_limit: default_session_message_limit(),
            session_cooldown_ms: default_session_cooldown_ms(),
            max_flood_per_session: default_max_flood_per_session(),
            flood_freeze_ms: default_flood_freeze_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            group_cooldown_ms: default_group_cooldown_ms(),
            long_pause_interval: default_long_pause_interval(),
            long_pause_min_ms: default_long_pause_min_ms(),
            long_pause_max_ms: default_long_pause_max_ms(),
            max_job_log_entries: default_max_job_log_entries(),
            job_log_trim_to: default_job_log_trim_to(),
            priority_top_n: default_priority_top_n(),
            stop_poll_ms: default_stop_poll_ms(),
            pause_poll_ms: default_pause_poll_ms(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_retries: default_connection_retries(),
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// If the configuration file doesn't exist, creates a default one
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadError(std::io::Error::new(
                e.kind(),
                format!("Failed to read config from {}: {}", path.display(), e),
            ))
        })?;

        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;

        Ok(config)
    }

    /// Create a default configuration file at the specified path
    ///
    /// Creates parent directories if they don't exist
    pub fn create_default_config(path: &PathBuf) -> Result<()> {
        let default_config = Self::default_config();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::ReadError)?;
        }

        let toml_content = toml::to_string_pretty(&default_config).map_err(|e| {
            ConfigError::MissingField(format!("Failed to serialize default config: {}", e))
        })?;

        std::fs::write(path, toml_content).map_err(ConfigError::ReadError)?;

        Ok(())
    }

    /// Get a default configuration structure
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/groupcast/groupcast.db".to_string(),
            },
            engine: EngineConfig::default(),
            client: ClientConfig::default(),
        }
    }

    /// Reject configurations the engine cannot run with.
    fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if e.min_group_delay_ms > e.max_group_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "engine.min_group_delay_ms".to_string(),
                reason: "must not exceed max_group_delay_ms".to_string(),
            }
            .into());
        }
        if e.long_pause_min_ms > e.long_pause_max_ms {
            return Err(ConfigError::InvalidValue {
                field: "engine.long_pause_min_ms".to_string(),
                reason: "must not exceed long_pause_max_ms".to_string(),
            }
            .into());
        }
        if e.job_log_trim_to > e.max_job_log_entries {
            return Err(ConfigError::InvalidValue {
                field: "engine.job_log_trim_to".to_string(),
                reason: "must not exceed max_job_log_entries".to_string(),
            }
            .into());
        }
        if e.round_pause_jitter_ms > e.round_pause_ms {
            return Err(ConfigError::InvalidValue {
                field: "engine.round_pause_jitter_ms".to_string(),
                reason: "must not exceed round_pause_ms".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
///
/// Priority order:
/// 1. GROUPCAST_CONFIG environment variable (if set)
/// 2. XDG_CONFIG_HOME/groupcast/config.toml
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("GROUPCAST_CONFIG") {
        let expanded = shellexpand::full(&path)
            .map_err(|e| ConfigError::MissingField(format!("Failed to expand path: {}", e)))?;
        return Ok(PathBuf::from(expanded.as_ref()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("XDG config directory not found".to_string()))?;

    Ok(config_dir.join("groupcast").join("config.toml"))
}

/// Resolve the database path with environment variable override support
///
/// Priority order:
/// 1. GROUPCAST_DB_PATH environment variable (if set)
/// 2. Path from configuration (with ~ expansion)
pub fn resolve_db_path(configured: Option<&str>) -> Result<PathBuf> {
    if let Ok(path) = std::env::var("GROUPCAST_DB_PATH") {
        let expanded = shellexpand::full(&path)
            .map_err(|e| ConfigError::MissingField(format!("Failed to expand path: {}", e)))?;
        return Ok(PathBuf::from(expanded.as_ref()));
    }

    let path = configured.ok_or_else(|| {
        ConfigError::MissingField("database.path not set in configuration".to_string())
    })?;
    let expanded = shellexpand::tilde(path);
    Ok(PathBuf::from(expanded.as_ref()))
}
