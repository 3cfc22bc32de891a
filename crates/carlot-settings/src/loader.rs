//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{carlot_home, CarlotSettings, PresenceBackend, PresenceRefresh};

/// Resolve the path to the settings file (`~/.carlot/settings.json`).
pub fn settings_path() -> PathBuf {
    carlot_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CarlotSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<CarlotSettings> {
    let malformed = |source| SettingsError::Malformed {
        path: path.to_owned(),
        source,
    };
    let defaults = serde_json::to_value(CarlotSettings::default()).map_err(malformed)?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(malformed)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CarlotSettings = serde_json::from_value(merged).map_err(malformed)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `CARLOT_*` overrides. Invalid values are ignored with a warning.
///
/// `lookup` is injected so tests need not touch the process environment.
pub fn apply_env_overrides<F>(settings: &mut CarlotSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("CARLOT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("CARLOT_PORT", 0, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.u64_in("CARLOT_STORE_TIMEOUT_MS", 10, 60_000) {
        settings.server.store_timeout_ms = v;
    }
    if let Some(v) = env.string("CARLOT_REDIS_URL") {
        settings.presence.redis_url = v;
    }
    if let Some(v) = env.string("CARLOT_PRESENCE_BACKEND") {
        match v.to_lowercase().as_str() {
            "memory" => settings.presence.backend = PresenceBackend::Memory,
            "redis" => settings.presence.backend = PresenceBackend::Redis,
            _ => env.warn_invalid("CARLOT_PRESENCE_BACKEND", &v),
        }
    }
    if let Some(v) = env.string("CARLOT_PRESENCE_REFRESH") {
        match v.to_lowercase().as_str() {
            "fixed" => settings.presence.refresh = PresenceRefresh::Fixed,
            "heartbeat" => settings.presence.refresh = PresenceRefresh::Heartbeat,
            _ => env.warn_invalid("CARLOT_PRESENCE_REFRESH", &v),
        }
    }
    if let Some(v) = env.u64_in("CARLOT_PRESENCE_TTL_SECS", 1, 7 * 24 * 3600) {
        settings.presence.ttl_secs = v;
    }
    if let Some(v) = env.string("CARLOT_DB_PATH") {
        settings.store.db_path = PathBuf::from(v);
    }
    if let Some(v) = env.string("CARLOT_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

fn validate(settings: &CarlotSettings) -> Result<()> {
    let server = &settings.server;
    let presence = &settings.presence;
    if presence.ttl_secs == 0 {
        return Err(SettingsError::out_of_range("presence.ttl_secs", "must be positive"));
    }
    if presence.refresh == PresenceRefresh::Heartbeat && presence.refresh_interval_secs == 0 {
        return Err(SettingsError::out_of_range(
            "presence.refresh_interval_secs",
            "must be positive with heartbeat refresh",
        ));
    }
    if server.max_send_queue == 0 {
        return Err(SettingsError::out_of_range("server.max_send_queue", "must be positive"));
    }
    if server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::out_of_range(
            "server.heartbeat_interval_secs",
            "must be positive",
        ));
    }
    if server.max_frame_size <= server.max_message_size {
        return Err(SettingsError::out_of_range(
            "server.max_frame_size",
            format!(
                "{} must exceed max_message_size {} to leave room for the JSON envelope",
                server.max_frame_size, server.max_message_size
            ),
        ));
    }
    Ok(())
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            self.warn_invalid(name, &val);
        }
        result
    }

    fn warn_invalid(&self, name: &str, val: &str) {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
}
