use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};

use crate::common::{ConversationScope, MessageId, Timestamp, UserId};

use super::id_set;
use super::models::Message;

impl Message {
    pub fn insert(conn: &Connection, message: &Message) -> SqlResult<()> {
        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, conversation_id, content, parent_id,
                                   created_at, edited, edited_at, edited_by, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id,
                message.sender,
                message.receiver,
                message.conversation,
                message.content,
                message.parent,
                message.created_at,
                message.edited,
                message.edited_at,
                message.edited_by,
                message.version
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &MessageId) -> SqlResult<Option<Self>> {
        conn.query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", Self::COLUMNS),
            params![id],
            Self::from_row,
        )
        .optional()
    }

    /// Currently persisted content, without loading the whole row.
    pub fn content_of(conn: &Connection, id: &MessageId) -> SqlResult<Option<String>> {
        conn.query_row(
            "SELECT content FROM messages WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
    }

    /// Creation time for the next message: now, or just after the newest
    /// stored message when the clock has not moved past it.
    pub fn next_created_at(conn: &Connection) -> SqlResult<Timestamp> {
        let latest: Option<Timestamp> =
            conn.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
        let now = Timestamp::now();
        Ok(match latest {
            Some(latest) if latest >= now => latest.plus_micros(1),
            _ => now,
        })
    }

    /// Replace `expected` with `content`. Returns false when the stored
    /// content is no longer `expected`.
    pub fn swap_content(
        conn: &Connection,
        id: &MessageId,
        expected: &str,
        content: &str,
    ) -> SqlResult<bool> {
        let updated = conn.execute(
            "UPDATE messages SET content = ?1, version = version + 1
             WHERE id = ?2 AND content = ?3",
            params![content, id, expected],
        )?;
        Ok(updated == 1)
    }

    pub fn mark_edited(
        conn: &Connection,
        id: &MessageId,
        edited_at: Timestamp,
        edited_by: &UserId,
    ) -> SqlResult<usize> {
        conn.execute(
            "UPDATE messages SET edited = 1, edited_at = ?1, edited_by = ?2 WHERE id = ?3",
            params![edited_at, edited_by, id],
        )
    }

    /// Every message in `scope`, oldest first. Ties on `created_at` fall back
    /// to insertion order so the result is stable.
    pub fn find_in_scope(conn: &Connection, scope: &ConversationScope) -> SqlResult<Vec<Self>> {
        let rows = match (scope.conversation_id(), scope.participants()) {
            (Some(conversation), _) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at ASC, rowid ASC",
                    Self::COLUMNS
                ))?;
                stmt.query_map(params![conversation], Self::from_row)?
                    .collect::<SqlResult<Vec<_>>>()?
            }
            (None, Some((a, b))) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE conversation_id IS NULL
                       AND ((sender_id = ?1 AND receiver_id = ?2)
                         OR (sender_id = ?2 AND receiver_id = ?1))
                     ORDER BY created_at ASC, rowid ASC",
                    Self::COLUMNS
                ))?;
                stmt.query_map(params![a, b], Self::from_row)?
                    .collect::<SqlResult<Vec<_>>>()?
            }
            (None, None) => Vec::new(),
        };
        Ok(rows)
    }

    /// Ids of every message the user sent or received, plus every reply
    /// beneath those messages, in one recursive query.
    pub fn subtree_ids_for_participant(
        conn: &Connection,
        user: &UserId,
    ) -> SqlResult<Vec<MessageId>> {
        let mut stmt = conn.prepare(
            "WITH RECURSIVE doomed(id) AS (
                 SELECT id FROM messages WHERE sender_id = ?1 OR receiver_id = ?1
                 UNION
                 SELECT m.id FROM messages m JOIN doomed d ON m.parent_id = d.id
             )
             SELECT id FROM doomed",
        )?;
        let ids = stmt
            .query_map(params![user], |row| row.get(0))?
            .collect::<SqlResult<Vec<MessageId>>>()?;
        Ok(ids)
    }

    pub fn delete_by_ids(conn: &Connection, ids: &[MessageId]) -> SqlResult<usize> {
        conn.execute(
            "DELETE FROM messages WHERE id IN (SELECT value FROM json_each(?1))",
            params![id_set(ids)?],
        )
    }

    /// Clear `edited_by` on messages last edited by `user`.
    pub fn detach_editor(conn: &Connection, user: &UserId) -> SqlResult<usize> {
        conn.execute(
            "UPDATE messages SET edited_by = NULL WHERE edited_by = ?1",
            params![user],
        )
    }

    /// Reset the edited flag on messages that no longer have any history,
    /// which happens when every recorded edit belonged to a removed user.
    pub fn clear_unrecorded_edits(conn: &Connection) -> SqlResult<usize> {
        conn.execute(
            "UPDATE messages SET edited = 0, edited_at = NULL, edited_by = NULL
             WHERE edited = 1
               AND NOT EXISTS (SELECT 1 FROM message_history h WHERE h.message_id = messages.id)",
            [],
        )
    }
}
