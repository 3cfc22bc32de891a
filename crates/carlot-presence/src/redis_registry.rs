//! Presence stored in Redis so it outlives dispatcher restarts and can be
//! shared between processes. Each entry is a plain `SET key handle EX ttl`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use carlot_core::{ChatError, ConnectionHandle, ConnectionRegistry, Identity};

use crate::error::RegistryError;

/// Deletes the key only while it still holds the expected handle.
const UNBIND_IF_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

pub struct RedisRegistry {
    conn: ConnectionManager,
    key_prefix: String,
    unbind_if: Script,
}

impl RedisRegistry {
    /// Connect to Redis. Supports both `redis://` and `rediss://` URLs.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self, RegistryError> {
        if url.starts_with("rediss://") {
            info!("Redis TLS enabled (rediss://)");
        }
        let client =
            redis::Client::open(url).map_err(|e| RegistryError::InvalidUrl(e.to_string()))?;
        let conn = ConnectionManager::new(client).await?;
        let key_prefix = key_prefix.into();
        info!(key_prefix = %key_prefix, "presence registry connected to Redis");
        Ok(Self {
            conn,
            key_prefix,
            unbind_if: Script::new(UNBIND_IF_SCRIPT),
        })
    }

    pub async fn ping(&self) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn key(&self, identity: &Identity) -> String {
        presence_key(&self.key_prefix, identity)
    }
}

/// Redis key for an identity's presence entry.
pub fn presence_key(prefix: &str, identity: &Identity) -> String {
    format!("{prefix}{identity}")
}

/// `PX` value for a TTL; never zero, which Redis rejects.
pub fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl ConnectionRegistry for RedisRegistry {
    async fn bind(
        &self,
        identity: &Identity,
        handle: &ConnectionHandle,
        ttl: Duration,
    ) -> Result<(), ChatError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .pset_ex(self.key(identity), handle.as_str(), ttl_millis(ttl))
            .await
            .map_err(RegistryError::from)?;
        debug!(identity = %identity, handle = %handle, "presence bound");
        Ok(())
    }

    async fn resolve(&self, identity: &Identity) -> Result<Option<ConnectionHandle>, ChatError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(self.key(identity))
            .await
            .map_err(RegistryError::from)?;
        Ok(raw.filter(|h| !h.is_empty()).map(ConnectionHandle::from_raw))
    }

    async fn unbind(&self, identity: &Identity) -> Result<(), ChatError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .del(self.key(identity))
            .await
            .map_err(RegistryError::from)?;
        Ok(())
    }

    async fn unbind_if(
        &self,
        identity: &Identity,
        handle: &ConnectionHandle,
    ) -> Result<bool, ChatError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .unbind_if
            .key(self.key(identity))
            .arg(handle.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(RegistryError::from)?;
        Ok(removed > 0)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
