pub mod error;
pub mod memory;
pub mod redis_registry;

use std::sync::Arc;
use std::time::Duration;

use carlot_core::ConnectionRegistry;
use carlot_settings::{PresenceBackend, PresenceSettings};

pub use error::RegistryError;
pub use memory::MemoryRegistry;
pub use redis_registry::RedisRegistry;

/// How often the in-process backend drops expired entries.
const MEMORY_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Build the configured registry backend.
pub async fn connect_registry(
    settings: &PresenceSettings,
) -> Result<Arc<dyn ConnectionRegistry>, RegistryError> {
    match settings.backend {
        PresenceBackend::Memory => {
            let registry = Arc::new(MemoryRegistry::new());
            registry.spawn_sweeper(MEMORY_SWEEP_PERIOD);
            Ok(registry)
        }
        PresenceBackend::Redis => {
            let registry =
                RedisRegistry::connect(&settings.redis_url, settings.key_prefix.clone()).await?;
            registry.ping().await?;
            Ok(Arc::new(registry))
        }
    }
}
