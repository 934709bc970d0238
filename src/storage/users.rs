use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};

use crate::common::UserId;

use super::models::User;

impl User {
    pub fn insert(conn: &Connection, user: &User) -> SqlResult<()> {
        conn.execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
            params![user.id, user.username, user.created_at],
        )?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &UserId) -> SqlResult<Option<Self>> {
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", Self::COLUMNS),
            params![id],
            Self::from_row,
        )
        .optional()
    }

    pub fn find_by_username(conn: &Connection, username: &str) -> SqlResult<Option<Self>> {
        conn.query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", Self::COLUMNS),
            params![username],
            Self::from_row,
        )
        .optional()
    }

    pub fn exists(conn: &Connection, id: &UserId) -> SqlResult<bool> {
        conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM users WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )
    }

    /// Returns the number of rows removed (0 or 1).
    pub fn delete(conn: &Connection, id: &UserId) -> SqlResult<usize> {
        conn.execute("DELETE FROM users WHERE id = ?1", params![id])
    }
}
