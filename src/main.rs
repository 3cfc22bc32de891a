//! # carlot
//!
//! Chat presence and delivery server binary: loads settings, opens the
//! message store and presence registry, and serves WebSocket connections
//! until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use carlot_presence::connect_registry;
use carlot_server::ServerConfig;
use carlot_settings::{CarlotSettings, LogFormat, PresenceBackend};
use carlot_store::{Database, SqliteMessageStore};
use carlot_telemetry::{init_telemetry, TelemetryConfig};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Carlot chat server.
#[derive(Parser, Debug)]
#[command(name = "carlot", about = "Real-time chat presence and delivery server")]
struct Cli {
    /// Settings file (defaults to ~/.carlot/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Redis URL for the presence registry. Selects the Redis backend.
    #[arg(long)]
    redis_url: Option<String>,

    /// Path to the `SQLite` message database.
    #[arg(long = "db")]
    db_path: Option<PathBuf>,
}

impl Cli {
    /// CLI flags win over file and environment settings.
    fn apply(&self, settings: &mut CarlotSettings) {
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.redis_url {
            settings.presence.backend = PresenceBackend::Redis;
            settings.presence.redis_url = url.clone();
        }
        if let Some(path) = &self.db_path {
            settings.store.db_path = path.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(carlot_settings::settings_path);
    let mut settings = carlot_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);

    let telemetry = init_telemetry(TelemetryConfig::from_levels(
        &settings.logging.level,
        &settings.logging.module_levels,
        settings.logging.format == LogFormat::Json,
    ));
    tracing::debug!(
        filter = telemetry.directive(),
        from_env = telemetry.from_env(),
        "telemetry initialized"
    );

    let db = Database::open(&settings.store.db_path).context("Failed to open message database")?;
    let store = Arc::new(SqliteMessageStore::new(db));

    let registry = connect_registry(&settings.presence)
        .await
        .context("Failed to connect presence registry")?;

    let config = ServerConfig::from_settings(&settings);
    let server = carlot_server::start(config, store, registry)
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        port = server.port,
        presence_backend = ?settings.presence.backend,
        refresh = ?settings.presence.refresh,
        "carlot listening"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown(Some(SHUTDOWN_TIMEOUT)).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
