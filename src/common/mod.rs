pub mod events;
pub mod types;

pub use events::LifecycleEvent;
pub use types::{
    ConversationId, ConversationScope, HistoryId, MessageId, NotificationId, Timestamp, UserId,
};
