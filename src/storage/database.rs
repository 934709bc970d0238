use rusqlite::{Connection, Result as SqlResult, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        sender_id TEXT NOT NULL REFERENCES users(id),
        receiver_id TEXT REFERENCES users(id),
        conversation_id TEXT,
        content TEXT NOT NULL,
        parent_id TEXT REFERENCES messages(id),
        created_at INTEGER NOT NULL,
        edited INTEGER NOT NULL DEFAULT 0,
        edited_at INTEGER,
        edited_by TEXT REFERENCES users(id),
        version INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        recipient_id TEXT NOT NULL REFERENCES users(id),
        message_id TEXT NOT NULL REFERENCES messages(id),
        is_read INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        UNIQUE (recipient_id, message_id)
    );

    CREATE TABLE IF NOT EXISTS message_history (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL REFERENCES messages(id),
        previous_content TEXT NOT NULL,
        edited_by TEXT REFERENCES users(id),
        recorded_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
    CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_id);
    CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_id);
    CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id);
    CREATE INDEX IF NOT EXISTS idx_messages_edited_by ON messages(edited_by);
    CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id, is_read);
    CREATE INDEX IF NOT EXISTS idx_notifications_message ON notifications(message_id);
    CREATE INDEX IF NOT EXISTS idx_history_message ON message_history(message_id);
    CREATE INDEX IF NOT EXISTS idx_history_editor ON message_history(edited_by);
";

/// Connection wrapper holding the entity store schema.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database file. The file runs in WAL mode so that
    /// readers on other connections are not blocked by a writer.
    pub fn new<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        log::debug!("SQLite journal mode: {mode}");
        Self::prepare(conn)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        self.conn.execute_batch(SCHEMA)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction that takes the write lock up front, so every read
    /// inside it sees the state the writes will be applied to.
    pub fn write_transaction(&mut self) -> SqlResult<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
    }
}
