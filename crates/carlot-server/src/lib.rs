//! WebSocket chat server: connection lifecycle, delivery and history routes.

pub mod config;
pub mod dispatcher;
pub mod hub;
pub mod lifecycle;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, PushTarget};
pub use lifecycle::{LifecycleManager, PresenceLease, PresenceState, RefreshPolicy};
pub use server::{build_router, start, AppState, ServerHandle};
pub use shutdown::Shutdown;
