pub mod database;
mod history;
mod messages;
pub mod models;
mod notifications;
mod users;

pub use database::Database;
pub use models::{Message, MessageHistory, NewMessage, Notification, User};

use std::fs;
use std::path::Path;

use crate::common::MessageId;

/// Ensure the directory holding a database file exists
pub fn ensure_parent_dir<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// JSON array of ids, bound as one parameter and expanded with `json_each`.
fn id_set(ids: &[MessageId]) -> rusqlite::Result<String> {
    serde_json::to_string(ids).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}
