use serde::Serialize;

use crate::errors::ChatError;
use crate::messages::ChatMessage;

/// Why a persisted message was not pushed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredOnlyReason {
    /// No presence entry for the receiver.
    Offline,
    /// The registry could not be queried in time.
    PresenceUnavailable,
    /// A handle was found but the push was rejected.
    PushFailed,
}

/// Terminal state of one inbound send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        message: ChatMessage,
    },
    StoredOnly {
        message: ChatMessage,
        reason: StoredOnlyReason,
    },
    Failed {
        error: ChatError,
    },
}

impl DeliveryOutcome {
    /// The persisted message, if persistence succeeded.
    pub fn message(&self) -> Option<&ChatMessage> {
        match self {
            Self::Delivered { message } | Self::StoredOnly { message, .. } => Some(message),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::StoredOnly { .. } => "stored_only",
            Self::Failed { .. } => "failed",
        }
    }
}
