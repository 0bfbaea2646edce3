//! Core domain types for the recoin messaging engine: branded ids, the
//! error taxonomy, participant/item value types, and broadcast events.

pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;
pub mod pair;

pub use errors::ChatError;
pub use events::ChatEvent;
pub use identity::{AuthenticatedUser, ItemKind, ItemRef};
pub use ids::{ConversationId, ItemId, MessageId, UserId};
pub use pair::ParticipantPair;
