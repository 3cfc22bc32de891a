//! Process-local presence registry with lazy TTL expiry.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use carlot_core::{ChatError, ConnectionHandle, ConnectionRegistry, Identity};

#[derive(Clone, Debug)]
struct PresenceEntry {
    handle: ConnectionHandle,
    expires_at: Instant,
}

impl PresenceEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Presence held in a sharded map. Each key is updated atomically by the
/// shard lock, which is never held across an await.
#[derive(Default)]
pub struct MemoryRegistry {
    entries: DashMap<Identity, PresenceEntry>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet observed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweep expired entries every `period` until the registry is dropped.
    ///
    /// Lookups already ignore expired entries; this only bounds memory held
    /// by identities that never reconnect.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let removed = registry.sweep_expired();
                if removed > 0 {
                    debug!(removed, remaining = registry.len(), "swept expired presence");
                }
            }
        })
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryRegistry {
    async fn bind(
        &self,
        identity: &Identity,
        handle: &ConnectionHandle,
        ttl: Duration,
    ) -> Result<(), ChatError> {
        let entry = PresenceEntry {
            handle: handle.clone(),
            expires_at: Instant::now() + ttl,
        };
        if let Some(previous) = self.entries.insert(identity.clone(), entry) {
            if &previous.handle != handle {
                debug!(identity = %identity, old = %previous.handle, new = %handle, "presence superseded");
            }
        }
        Ok(())
    }

    async fn resolve(&self, identity: &Identity) -> Result<Option<ConnectionHandle>, ChatError> {
        let now = Instant::now();
        let live = self
            .entries
            .get(identity)
            .and_then(|entry| (!entry.is_expired(now)).then(|| entry.handle.clone()));
        if live.is_none() {
            // Only the entry observed as expired is removed; a concurrent re-bind survives.
            self.entries.remove_if(identity, |_, entry| entry.is_expired(now));
        }
        Ok(live)
    }

    async fn unbind(&self, identity: &Identity) -> Result<(), ChatError> {
        self.entries.remove(identity);
        Ok(())
    }

    async fn unbind_if(
        &self,
        identity: &Identity,
        handle: &ConnectionHandle,
    ) -> Result<bool, ChatError> {
        Ok(self
            .entries
            .remove_if(identity, |_, entry| &entry.handle == handle)
            .is_some())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
