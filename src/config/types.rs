//! Configuration type definitions.
//!
//! All the sub-config structs used by the main Config.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use super::defaults::{
    default_coup_window_s, default_database_path, default_max_actions,
    default_max_concurrent_rooms, default_max_voice_errors_before_resync,
    default_reconcile_period_s, default_room_creation_delay_ms, default_room_name_template,
    default_time_window_ms,
};
use crate::platform::ChannelId;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Daemon-level settings (logging, metrics).
    #[serde(default)]
    pub server: ServerConfig,
    /// The managed realm and its channel sets.
    pub realm: RealmConfig,
    /// Room creation and ownership behavior.
    #[serde(default)]
    pub rooms: RoomsConfig,
    /// Drift-repair timer.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Persistent store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cache hygiene configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Per-(user, action) command rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Daemon-level settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus metrics HTTP port (0 disables, default: 9090).
    pub metrics_port: Option<u16>,
}

/// The realm this deployment manages. A single deployment serves one realm.
#[derive(Debug, Clone, Deserialize)]
pub struct RealmConfig {
    /// Realm (guild) id to manage.
    pub guild_id: u64,
    /// Voice channels that trigger room creation on entry.
    #[serde(default)]
    pub spawn_channel_ids: Vec<u64>,
    /// Rooms tracked for presence but never mutated.
    #[serde(default)]
    pub excluded_channel_ids: Vec<u64>,
    /// AFK rooms by id; rooms whose name contains "afk"/"away"/"idle"
    /// are skipped regardless.
    #[serde(default)]
    pub afk_channel_ids: Vec<u64>,
}

impl RealmConfig {
    pub fn is_spawn(&self, channel: ChannelId) -> bool {
        self.spawn_channel_ids.contains(&channel.0)
    }

    pub fn is_excluded(&self, channel: ChannelId) -> bool {
        self.excluded_channel_ids.contains(&channel.0)
    }

    pub fn is_afk_id(&self, channel: ChannelId) -> bool {
        self.afk_channel_ids.contains(&channel.0)
    }
}

/// Room creation and ownership behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Cap on concurrently existing user-rooms per guild (default: 50).
    #[serde(default = "default_max_concurrent_rooms")]
    pub max_concurrent_rooms: usize,
    /// Spacing between successive room creates, in ms (default: 100).
    #[serde(default = "default_room_creation_delay_ms")]
    pub room_creation_delay_ms: u64,
    /// Room name template; `{display_name}` is substituted (default:
    /// `"{display_name}'s Channel"`).
    #[serde(default = "default_room_name_template")]
    pub room_name_template: String,
    /// Voice-handler failures for one user before a force resync
    /// (default: 5).
    #[serde(default = "default_max_voice_errors_before_resync")]
    pub max_voice_errors_before_resync: u32,
    /// Coup vote window, in seconds (default: 300).
    #[serde(default = "default_coup_window_s")]
    pub coup_window_s: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rooms: default_max_concurrent_rooms(),
            room_creation_delay_ms: default_room_creation_delay_ms(),
            room_name_template: default_room_name_template(),
            max_voice_errors_before_resync: default_max_voice_errors_before_resync(),
            coup_window_s: default_coup_window_s(),
        }
    }
}

impl RoomsConfig {
    /// Render the room name for a display name, honoring the template.
    pub fn room_name_for(&self, display_name: &str) -> String {
        self.room_name_template
            .replace("{display_name}", display_name)
    }
}

/// Drift-repair timer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Seconds between reconciliation passes (default: 120).
    #[serde(default = "default_reconcile_period_s")]
    pub period_s: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            period_s: default_reconcile_period_s(),
        }
    }
}

/// Persistent store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Cache hygiene configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CacheConfig {
    /// Keys force-deleted at startup, before the malformed-entry sweep.
    #[serde(default)]
    pub force_delete_keys: Vec<String>,
}

/// Per-(user, action) command rate limiting.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Actions allowed per window (default: 5).
    #[serde(default = "default_max_actions")]
    pub max_actions: u32,
    /// Window length in ms (default: 60000).
    #[serde(default = "default_time_window_ms")]
    pub time_window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_actions: default_max_actions(),
            time_window_ms: default_time_window_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
