use carlot_core::ChatError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry backend error: {0}")]
    Backend(String),

    #[error("invalid registry url: {0}")]
    InvalidUrl(String),
}

impl From<redis::RedisError> for RegistryError {
    fn from(e: redis::RedisError) -> Self {
        RegistryError::Backend(e.to_string())
    }
}

impl From<RegistryError> for ChatError {
    fn from(e: RegistryError) -> Self {
        ChatError::StoreUnavailable(e.to_string())
    }
}
