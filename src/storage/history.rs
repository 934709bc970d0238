use rusqlite::{Connection, Result as SqlResult, params};

use crate::common::{MessageId, UserId};

use super::id_set;
use super::models::MessageHistory;

impl MessageHistory {
    pub fn insert(conn: &Connection, entry: &MessageHistory) -> SqlResult<()> {
        conn.execute(
            "INSERT INTO message_history (id, message_id, previous_content, edited_by, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.message,
                entry.previous_content,
                entry.edited_by,
                entry.recorded_at
            ],
        )?;
        Ok(())
    }

    /// Edits of one message, oldest first.
    pub fn for_message(conn: &Connection, message: &MessageId) -> SqlResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM message_history
             WHERE message_id = ?1
             ORDER BY recorded_at ASC, rowid ASC",
            Self::COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![message], Self::from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn delete_by_editor(conn: &Connection, user: &UserId) -> SqlResult<usize> {
        conn.execute(
            "DELETE FROM message_history WHERE edited_by = ?1",
            params![user],
        )
    }

    pub fn delete_by_messages(conn: &Connection, ids: &[MessageId]) -> SqlResult<usize> {
        conn.execute(
            "DELETE FROM message_history WHERE message_id IN (SELECT value FROM json_each(?1))",
            params![id_set(ids)?],
        )
    }
}
