use rusqlite::{Result as SqlResult, Row};
use serde::Serialize;

use crate::common::{
    ConversationId, ConversationScope, HistoryId, MessageId, NotificationId, Timestamp, UserId,
};

/// Registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: Timestamp,
}

impl User {
    pub(crate) const COLUMNS: &'static str = "id, username, created_at";

    pub(crate) fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            created_at: row.get(2)?,
        })
    }
}

/// Chat message; `content` is the only field that changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    /// Absent for broadcast/group messages.
    pub receiver: Option<UserId>,
    pub conversation: Option<ConversationId>,
    pub content: String,
    pub parent: Option<MessageId>,
    pub created_at: Timestamp,
    pub edited: bool,
    pub edited_at: Option<Timestamp>,
    pub edited_by: Option<UserId>,
    /// Bumped on every content change.
    pub version: i64,
}

impl Message {
    pub(crate) const COLUMNS: &'static str = "id, sender_id, receiver_id, conversation_id, \
        content, parent_id, created_at, edited, edited_at, edited_by, version";

    pub(crate) fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender: row.get(1)?,
            receiver: row.get(2)?,
            conversation: row.get(3)?,
            content: row.get(4)?,
            parent: row.get(5)?,
            created_at: row.get(6)?,
            edited: row.get(7)?,
            edited_at: row.get(8)?,
            edited_by: row.get(9)?,
            version: row.get(10)?,
        })
    }

    pub fn scope(&self) -> Option<ConversationScope> {
        ConversationScope::of(
            &self.sender,
            self.receiver.as_ref(),
            self.conversation.as_ref(),
        )
    }
}

/// Request to create a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: UserId,
    pub receiver: Option<UserId>,
    pub conversation: Option<ConversationId>,
    pub content: String,
    pub parent: Option<MessageId>,
}

impl NewMessage {
    pub fn direct(sender: UserId, receiver: UserId, content: impl Into<String>) -> Self {
        Self {
            sender,
            receiver: Some(receiver),
            conversation: None,
            content: content.into(),
            parent: None,
        }
    }

    /// Group message without a receiver.
    pub fn broadcast(
        sender: UserId,
        conversation: ConversationId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            receiver: None,
            conversation: Some(conversation),
            content: content.into(),
            parent: None,
        }
    }

    pub fn in_reply_to(mut self, parent: MessageId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn in_conversation(mut self, conversation: ConversationId) -> Self {
        self.conversation = Some(conversation);
        self
    }

    pub fn scope(&self) -> Option<ConversationScope> {
        ConversationScope::of(
            &self.sender,
            self.receiver.as_ref(),
            self.conversation.as_ref(),
        )
    }

    pub(crate) fn into_message(self, created_at: Timestamp) -> Message {
        Message {
            id: MessageId::generate(),
            sender: self.sender,
            receiver: self.receiver,
            conversation: self.conversation,
            content: self.content,
            parent: self.parent,
            created_at,
            edited: false,
            edited_at: None,
            edited_by: None,
            version: 0,
        }
    }
}

/// Tells a recipient about a message addressed to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    pub message: MessageId,
    pub is_read: bool,
    pub created_at: Timestamp,
}

impl Notification {
    pub(crate) const COLUMNS: &'static str = "id, recipient_id, message_id, is_read, created_at";

    pub fn unread(recipient: UserId, message: MessageId, created_at: Timestamp) -> Self {
        Self {
            id: NotificationId::generate(),
            recipient,
            message,
            is_read: false,
            created_at,
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            recipient: row.get(1)?,
            message: row.get(2)?,
            is_read: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

/// Snapshot of a message's content taken just before an edit replaced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageHistory {
    pub id: HistoryId,
    pub message: MessageId,
    pub previous_content: String,
    pub edited_by: Option<UserId>,
    pub recorded_at: Timestamp,
}

impl MessageHistory {
    pub(crate) const COLUMNS: &'static str =
        "id, message_id, previous_content, edited_by, recorded_at";

    pub(crate) fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            message: row.get(1)?,
            previous_content: row.get(2)?,
            edited_by: row.get(3)?,
            recorded_at: row.get(4)?,
        })
    }
}
