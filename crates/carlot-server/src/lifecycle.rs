//! Connection lifecycle: handshake, presence bind, refresh and release.
//!
//! The manager is the only writer of presence entries. Each accepted
//! connection receives a [`PresenceLease`]; releasing it (on disconnect or
//! at shutdown) removes the entry at most once, and only while it still
//! points at that connection.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use carlot_core::deadline::bounded;
use carlot_core::{ChatError, ConnectionHandle, ConnectionRegistry, Identity};
use carlot_settings::{PresenceRefresh, PresenceSettings};

/// Whether live connections extend their presence TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// TTL set at bind time and never extended.
    Fixed,
    /// Re-bind every `interval` while the connection is open.
    Heartbeat { interval: Duration },
}

impl RefreshPolicy {
    pub fn from_settings(settings: &PresenceSettings) -> Self {
        match settings.refresh {
            PresenceRefresh::Fixed => Self::Fixed,
            PresenceRefresh::Heartbeat => Self::Heartbeat {
                interval: settings.refresh_interval(),
            },
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Fixed => None,
            Self::Heartbeat { interval } => Some(*interval),
        }
    }
}

/// Presence as seen by one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceState {
    /// The registry holds an entry for this connection.
    Bound,
    /// Bind failed; the connection stays up but is not reachable by push.
    Degraded,
}

/// A connection's claim on its identity's presence entry.
#[derive(Debug)]
pub struct PresenceLease {
    identity: Identity,
    handle: ConnectionHandle,
    state: PresenceState,
}

impl PresenceLease {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }
}

/// Validate the identity presented at handshake. Missing or blank refuses
/// the connection before it touches the registry.
pub fn handshake(raw: Option<&str>) -> Result<Identity, ChatError> {
    match raw.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(Identity::from_raw(id)),
        _ => Err(ChatError::HandshakeRejected("identity is required".into())),
    }
}

pub struct LifecycleManager {
    registry: Arc<dyn ConnectionRegistry>,
    ttl: Duration,
    timeout: Duration,
    /// Connections holding a lease. Removal from this map gates the unbind.
    active: DashMap<ConnectionHandle, Identity>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            ttl,
            timeout,
            active: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.registry
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Bind `identity` to `handle`. Never fails: a registry error or
    /// timeout yields a degraded lease.
    pub async fn connect(&self, identity: Identity, handle: ConnectionHandle) -> PresenceLease {
        // Tracked before binding so a bind that lands after its timeout is
        // still cleaned up on disconnect.
        self.active.insert(handle.clone(), identity.clone());

        let mut state = match bounded(
            self.timeout,
            "bind",
            self.registry.bind(&identity, &handle, self.ttl),
        )
        .await
        {
            Ok(()) => {
                info!(identity = %identity, handle = %handle, backend = self.registry.backend(), "presence bound");
                PresenceState::Bound
            }
            Err(error) => {
                warn!(identity = %identity, handle = %handle, error = %error, "presence bind failed, connection degraded");
                PresenceState::Degraded
            }
        };

        // Released while the bind was in flight: undo it.
        if !self.active.contains_key(&handle) {
            self.unbind(&identity, &handle).await;
            state = PresenceState::Degraded;
        }

        PresenceLease {
            identity,
            handle,
            state,
        }
    }

    /// Re-bind the lease to extend its TTL. Returns false once the lease
    /// has been released.
    pub async fn refresh(&self, lease: &mut PresenceLease) -> bool {
        if !self.active.contains_key(&lease.handle) {
            return false;
        }

        match bounded(
            self.timeout,
            "bind",
            self.registry.bind(&lease.identity, &lease.handle, self.ttl),
        )
        .await
        {
            Ok(()) => {
                debug!(identity = %lease.identity, handle = %lease.handle, "presence refreshed");
                lease.state = PresenceState::Bound;
            }
            Err(error) => {
                warn!(identity = %lease.identity, handle = %lease.handle, error = %error, "presence refresh failed");
                lease.state = PresenceState::Degraded;
            }
        }

        // Released while the bind was in flight: undo it.
        if !self.active.contains_key(&lease.handle) {
            self.unbind(&lease.identity, &lease.handle).await;
            return false;
        }
        true
    }

    /// Release the lease on disconnect. Returns whether this call performed
    /// the cleanup.
    pub async fn disconnect(&self, lease: PresenceLease) -> bool {
        self.release(&lease.handle).await
    }

    /// Release every lease still held. Used at shutdown.
    pub async fn release_all(&self) -> usize {
        let handles: Vec<ConnectionHandle> =
            self.active.iter().map(|entry| entry.key().clone()).collect();
        let mut released = 0;
        for handle in handles {
            if self.release(&handle).await {
                released += 1;
            }
        }
        if released > 0 {
            info!(released, "released presence for open connections");
        }
        released
    }

    async fn release(&self, handle: &ConnectionHandle) -> bool {
        let Some((handle, identity)) = self.active.remove(handle) else {
            return false;
        };
        self.unbind(&identity, &handle).await;
        true
    }

    async fn unbind(&self, identity: &Identity, handle: &ConnectionHandle) {
        match bounded(
            self.timeout,
            "unbind",
            self.registry.unbind_if(identity, handle),
        )
        .await
        {
            Ok(true) => info!(identity = %identity, handle = %handle, "presence released"),
            Ok(false) => {
                debug!(identity = %identity, handle = %handle, "presence already superseded or expired")
            }
            Err(error) => {
                warn!(identity = %identity, handle = %handle, error = %error, "presence release failed, entry left to expire")
            }
        }
    }
}
