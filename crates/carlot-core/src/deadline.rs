use std::future::Future;
use std::time::Duration;

use crate::errors::ChatError;

/// Run a store or registry call with an upper bound on how long it may take.
/// Elapsed deadlines surface as `StoreUnavailable`.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::StoreUnavailable(format!(
            "{operation} timed out after {limit:?}"
        ))),
    }
}
