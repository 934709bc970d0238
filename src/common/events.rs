use serde::Serialize;

use crate::lifecycle::{CascadeReport, DispatchOutcome};

use super::types::{MessageId, UserId};

/// Facts published by the messaging handle after a call commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    MessageRecorded {
        message_id: MessageId,
        sender: UserId,
        receiver: Option<UserId>,
        dispatch: DispatchOutcome,
    },
    MessageEdited {
        message_id: MessageId,
        editor: UserId,
        /// False when the new content matched the stored content.
        changed: bool,
    },
    UserRemoved {
        user_id: UserId,
        report: CascadeReport,
    },
}
