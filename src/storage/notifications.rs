use rusqlite::{Connection, Result as SqlResult, params};

use crate::common::{MessageId, UserId};

use super::id_set;
use super::models::Notification;

impl Notification {
    pub fn insert(conn: &Connection, notification: &Notification) -> SqlResult<()> {
        conn.execute(
            "INSERT INTO notifications (id, recipient_id, message_id, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                notification.id,
                notification.recipient,
                notification.message,
                notification.is_read,
                notification.created_at
            ],
        )?;
        Ok(())
    }

    /// Unread notifications for a user, newest first.
    pub fn unread_for_user(conn: &Connection, user: &UserId) -> SqlResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notifications
             WHERE recipient_id = ?1 AND is_read = 0
             ORDER BY created_at DESC, rowid DESC",
            Self::COLUMNS
        ))?;
        let notifications = stmt
            .query_map(params![user], Self::from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(notifications)
    }

    pub fn for_message(conn: &Connection, message: &MessageId) -> SqlResult<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM notifications WHERE message_id = ?1 ORDER BY rowid",
            Self::COLUMNS
        ))?;
        let notifications = stmt
            .query_map(params![message], Self::from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(notifications)
    }

    pub fn delete_by_recipient(conn: &Connection, user: &UserId) -> SqlResult<usize> {
        conn.execute(
            "DELETE FROM notifications WHERE recipient_id = ?1",
            params![user],
        )
    }

    pub fn delete_by_messages(conn: &Connection, ids: &[MessageId]) -> SqlResult<usize> {
        conn.execute(
            "DELETE FROM notifications WHERE message_id IN (SELECT value FROM json_each(?1))",
            params![id_set(ids)?],
        )
    }
}
