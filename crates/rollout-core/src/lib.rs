pub mod ids;
pub mod items;

pub use ids::ConversationId;
pub use items::{RolloutItem, RolloutItemKind};
