//! SQLite persistence for chat messages.
//!
//! [`MessageRepo`] is the synchronous repository; [`SqliteMessageStore`]
//! adapts it to the async [`carlot_core::MessageStore`] port.

pub mod database;
pub mod error;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod sqlite_store;

pub use database::Database;
pub use error::StoreError;
pub use messages::MessageRepo;
pub use sqlite_store::SqliteMessageStore;
