use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use axum::http::StatusCode;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use carlot_core::{ConnectionRegistry, MessageStore};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::hub::ConnectionHub;
use crate::lifecycle::{self, LifecycleManager};
use crate::routes::{self, ApiError};
use crate::session;
use crate::shutdown::Shutdown;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the identity when the query parameter is absent.
pub const IDENTITY_HEADER: &str = "x-carlot-identity";

/// Shared state handed to every route and connection task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub hub: Arc<ConnectionHub>,
    pub lifecycle: Arc<LifecycleManager>,
    pub dispatcher: Dispatcher,
    pub store: Arc<dyn MessageStore>,
    pub shutdown: Shutdown,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn MessageStore>,
        registry: Arc<dyn ConnectionRegistry>,
        shutdown: Shutdown,
    ) -> Self {
        let hub = Arc::new(ConnectionHub::new(config.max_send_queue));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&registry),
            config.presence_ttl,
            config.store_timeout,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            registry,
            hub.clone(),
            config.store_timeout,
            config.max_message_size,
        );
        Self {
            config: Arc::new(config),
            hub,
            lifecycle,
            dispatcher,
            store,
            shutdown,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(routes::health))
        .route(
            "/conversations/{subject}/messages",
            get(routes::conversation_history),
        )
        .route(
            "/conversations/{subject}/participants/{identity}/messages",
            axum::routing::delete(routes::delete_participant_messages),
        )
        .route(
            "/conversations/{subject}/messages/count",
            get(routes::conversation_count),
        )
        .route("/messages/{id}", get(routes::message_by_id))
        .route("/presence/{identity}", get(routes::presence))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the listener and serve until [`ServerHandle::shutdown`].
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn MessageStore>,
    registry: Arc<dyn ConnectionRegistry>,
) -> Result<ServerHandle, std::io::Error> {
    let shutdown = Shutdown::new();
    let addr = config.bind_addr();
    let state = AppState::new(config, store, registry, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, backend = state.lifecycle.registry().backend(), "carlot server started");

    let router = build_router(state.clone());
    let token = shutdown.token();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            warn!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        state,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    state: AppState,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop accepting, close every connection and release presence still
    /// held by this process.
    ///
    /// Sessions get up to `timeout` to run their own disconnect before the
    /// remaining leases are swept.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.state.shutdown.drain(self.server, timeout).await;
        self.state.lifecycle.release_all().await;
        info!("carlot server stopped");
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub identity: Option<String>,
}

/// WebSocket upgrade. A missing identity is refused before upgrading.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let raw = query
        .identity
        .as_deref()
        .or_else(|| headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok()));

    if state.shutdown.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    match lifecycle::handshake(raw) {
        Ok(identity) => {
            let shutdown = state.shutdown.clone();
            ws.max_message_size(state.config.max_frame_size)
                .max_frame_size(state.config.max_frame_size)
                .on_upgrade(move |socket| shutdown.track(session::run(socket, identity, state)))
        }
        Err(error) => {
            warn!(error = %error, "websocket handshake refused");
            ApiError(error).into_response()
        }
    }
}
