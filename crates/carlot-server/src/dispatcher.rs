//! Delivery dispatcher: persist, resolve the receiver, push best-effort.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use carlot_core::deadline::bounded;
use carlot_core::{
    ChatError, ChatMessage, ConnectionHandle, ConnectionRegistry, DeliveryOutcome, MessageStore,
    NewMessage, StoredOnlyReason,
};

/// Somewhere a persisted message can be pushed to by connection handle.
pub trait PushTarget: Send + Sync {
    fn push(&self, handle: &ConnectionHandle, message: &ChatMessage) -> Result<(), ChatError>;
}

/// Stateless coordinator between the message store, the presence registry
/// and the push target.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    registry: Arc<dyn ConnectionRegistry>,
    push: Arc<dyn PushTarget>,
    store_timeout: Duration,
    max_message_size: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<dyn ConnectionRegistry>,
        push: Arc<dyn PushTarget>,
        store_timeout: Duration,
        max_message_size: usize,
    ) -> Self {
        Self {
            store,
            registry,
            push,
            store_timeout,
            max_message_size,
        }
    }

    /// Handle one inbound send. Never retries. Only persistence failures
    /// and validation errors come back as `Failed`.
    pub async fn dispatch(&self, message: NewMessage) -> DeliveryOutcome {
        if let Err(error) = message.validate(self.max_message_size) {
            debug!(sender = %message.sender, error = %error, "rejected invalid message");
            return DeliveryOutcome::Failed { error };
        }

        let stored = match bounded(self.store_timeout, "append", self.store.append(message)).await
        {
            Ok(stored) => stored,
            Err(error) => {
                warn!(error = %error, "message not persisted");
                return DeliveryOutcome::Failed { error };
            }
        };

        let handle = match bounded(
            self.store_timeout,
            "resolve",
            self.registry.resolve(&stored.receiver),
        )
        .await
        {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!(message_id = %stored.id, receiver = %stored.receiver, "receiver offline");
                return DeliveryOutcome::StoredOnly {
                    message: stored,
                    reason: StoredOnlyReason::Offline,
                };
            }
            Err(error) => {
                warn!(
                    message_id = %stored.id,
                    receiver = %stored.receiver,
                    error = %error,
                    "presence lookup failed, message stored only"
                );
                return DeliveryOutcome::StoredOnly {
                    message: stored,
                    reason: StoredOnlyReason::PresenceUnavailable,
                };
            }
        };

        match self.push.push(&handle, &stored) {
            Ok(()) => {
                info!(message_id = %stored.id, receiver = %stored.receiver, handle = %handle, "message delivered");
                DeliveryOutcome::Delivered { message: stored }
            }
            Err(error) => {
                warn!(
                    message_id = %stored.id,
                    receiver = %stored.receiver,
                    handle = %handle,
                    error = %error,
                    "push failed, message stored only"
                );
                DeliveryOutcome::StoredOnly {
                    message: stored,
                    reason: StoredOnlyReason::PushFailed,
                }
            }
        }
    }
}
