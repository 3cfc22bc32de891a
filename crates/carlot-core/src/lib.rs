pub mod deadline;
pub mod delivery;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod presence;
pub mod store;

pub use delivery::{DeliveryOutcome, StoredOnlyReason};
pub use errors::ChatError;
pub use ids::{ConnectionHandle, Identity, MessageId, SubjectId};
pub use messages::{ChatMessage, NewMessage, Page};
pub use presence::ConnectionRegistry;
pub use store::MessageStore;
