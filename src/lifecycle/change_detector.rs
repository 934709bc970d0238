use rusqlite::Connection;
use serde::Serialize;

use crate::common::MessageId;
use crate::error::{Error, Result};
use crate::storage::Message;

/// What a message write amounts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    New,
    Unchanged,
    Changed { previous_content: String },
}

impl Classification {
    pub fn is_change(&self) -> bool {
        matches!(self, Classification::Changed { .. })
    }
}

/// Classify a write of `incoming` to `message_id`.
///
/// Must be called inside the write transaction and before the new content is
/// written, so the previous content is the value being replaced.
pub fn classify(
    conn: &Connection,
    message_id: &MessageId,
    incoming: &str,
    is_new_record: bool,
) -> Result<Classification> {
    if is_new_record {
        return Ok(Classification::New);
    }

    let persisted = Message::content_of(conn, message_id)?
        .ok_or_else(|| Error::MessageVanished(message_id.clone()))?;

    if persisted.as_bytes() == incoming.as_bytes() {
        Ok(Classification::Unchanged)
    } else {
        Ok(Classification::Changed {
            previous_content: persisted,
        })
    }
}
