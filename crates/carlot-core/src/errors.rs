/// Failure taxonomy for the presence and delivery layer.
///
/// Only `StoreUnavailable` on append and `InvalidMessage` ever reach the
/// sending client. Everything else is logged and absorbed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("push failed: {0}")]
    PushFailed(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ChatError {
    /// Stable wire code for error frames and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::HandshakeRejected(_) => "handshake_rejected",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::PushFailed(_) => "push_failed",
            Self::InvalidMessage(_) => "invalid_message",
        }
    }

    /// Whether the sender of a message should be told about this error.
    pub fn is_reported_to_sender(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::InvalidMessage(_))
    }
}
