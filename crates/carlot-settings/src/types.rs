//! Settings types. Every field has a default so partial files deserialize.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarlotSettings {
    pub server: ServerSettings,
    pub presence: PresenceSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per connection before pushes are dropped.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this long without a pong or any frame.
    pub heartbeat_timeout_secs: u64,
    /// Max message content size in bytes. Enforced by validation so the
    /// sender gets an `invalid_message` reply.
    pub max_message_size: usize,
    /// Max inbound WebSocket frame size in bytes. Must leave room for the
    /// JSON envelope and escaping around a maximal message.
    pub max_frame_size: usize,
    /// Upper bound on any single registry or store call.
    pub store_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3033,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
            max_frame_size: 256 * 1024,
            store_timeout_ms: 2_000,
        }
    }
}

impl ServerSettings {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceBackend {
    #[default]
    Memory,
    Redis,
}

/// Whether a live connection re-binds its presence entry periodically.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceRefresh {
    /// TTL set once at bind time and never extended.
    #[default]
    Fixed,
    /// Re-bind every `refresh_interval_secs` while connected.
    Heartbeat,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSettings {
    pub backend: PresenceBackend,
    pub redis_url: String,
    pub key_prefix: String,
    pub ttl_secs: u64,
    pub refresh: PresenceRefresh,
    pub refresh_interval_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            backend: PresenceBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".into(),
            key_prefix: "presence:".into(),
            ttl_secs: 14_400,
            refresh: PresenceRefresh::Fixed,
            refresh_interval_secs: 3_600,
        }
    }
}

impl PresenceSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub db_path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: carlot_home().join("database").join("messages.db"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
    /// Per-module level overrides, e.g. `("carlot_presence", "debug")`.
    pub module_levels: Vec<(String, String)>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Json,
            module_levels: Vec::new(),
        }
    }
}

/// `~/.carlot`, falling back to `/tmp/.carlot` without `HOME`.
pub fn carlot_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".carlot")
}
