use std::time::Duration;

use async_trait::async_trait;

use crate::errors::ChatError;
use crate::ids::{ConnectionHandle, Identity};

/// Default lifetime of a presence entry (4 hours).
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(14_400);

/// Shared mapping from identity to its current connection handle.
///
/// At most one live entry exists per identity; `bind` overwrites. Entries
/// expire passively after their TTL and are only observed as gone on the
/// next `resolve`. Implementations must be safe under arbitrary concurrent
/// use and must not hold cross-key locks across await points.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Bind `identity` to `handle`, replacing any previous entry.
    async fn bind(
        &self,
        identity: &Identity,
        handle: &ConnectionHandle,
        ttl: Duration,
    ) -> Result<(), ChatError>;

    /// Current handle for `identity`, or `None` if absent or expired.
    async fn resolve(&self, identity: &Identity) -> Result<Option<ConnectionHandle>, ChatError>;

    /// Remove the entry for `identity`. No error if already absent.
    async fn unbind(&self, identity: &Identity) -> Result<(), ChatError>;

    /// Remove the entry only if it still points at `handle`.
    /// Returns whether an entry was removed.
    async fn unbind_if(
        &self,
        identity: &Identity,
        handle: &ConnectionHandle,
    ) -> Result<bool, ChatError>;

    /// Short backend name for health output and logs.
    fn backend(&self) -> &'static str;
}
