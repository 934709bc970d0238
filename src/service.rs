//! Exposed message operations.
//!
//! Each operation is an explicit sequence over one transaction:
//! classify, write, dispatch derived state, commit.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tokio_util::sync::CancellationToken;

use crate::common::{ConversationScope, MessageId, Timestamp, UserId};
use crate::error::{Error, Result};
use crate::lifecycle::{
    self, CascadeReport, Classification, DispatchOutcome, StepLog, ThreadNode,
};
use crate::storage::{
    Database, Message, MessageHistory, NewMessage, Notification, User, ensure_parent_dir,
};

/// Message operations over one store connection.
pub struct MessageService {
    db: Database,
}

impl MessageService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (creating if needed) a database file.
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        ensure_parent_dir(&path)
            .map_err(|err| Error::unavailable(format!("cannot create data directory: {err}")))?;
        Ok(Self::new(Database::new(path, busy_timeout)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn register_user(&mut self, username: &str) -> Result<User> {
        if User::find_by_username(self.db.connection(), username)?.is_some() {
            return Err(Error::InvalidReference(format!(
                "username {username} is already taken"
            )));
        }
        let user = User {
            id: UserId::generate(),
            username: username.to_string(),
            created_at: Timestamp::now(),
        };
        User::insert(self.db.connection(), &user)?;
        log::info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    pub fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(User::find_by_id(self.db.connection(), id)?)
    }

    pub fn find_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(Message::find_by_id(self.db.connection(), id)?)
    }

    /// Store a new message and notify its receiver.
    ///
    /// A failed notification is logged and does not undo the message.
    pub fn record_message(&mut self, new: NewMessage) -> Result<Message> {
        self.record_message_with(new, &CancellationToken::new())
            .map(|(message, _)| message)
    }

    /// Replace a message's content on behalf of `editor`.
    ///
    /// Identical content is a no-op. A change appends one history row holding
    /// the replaced content and flags the message as edited, all or nothing.
    pub fn edit_message(
        &mut self,
        id: &MessageId,
        new_content: &str,
        editor: &UserId,
    ) -> Result<Message> {
        self.edit_message_with(id, new_content, editor, &CancellationToken::new())
            .map(|(message, _)| message)
    }

    /// Delete a user with every message, notification and history row that
    /// depends on them. Removing an unknown user returns an empty report.
    pub fn remove_user(&mut self, user: &UserId) -> Result<CascadeReport> {
        self.remove_user_with(user, &CancellationToken::new())
    }

    /// Reply forest for a conversation scope.
    pub fn get_thread(&self, scope: &ConversationScope) -> Result<Vec<ThreadNode>> {
        lifecycle::fetch_thread(self.db.connection(), scope)
    }

    /// Unread notifications, newest first.
    pub fn unread_notifications(&self, user: &UserId) -> Result<Vec<Notification>> {
        Ok(Notification::unread_for_user(self.db.connection(), user)?)
    }

    /// Edit history of a message, oldest first.
    pub fn message_history(&self, id: &MessageId) -> Result<Vec<MessageHistory>> {
        Ok(MessageHistory::for_message(self.db.connection(), id)?)
    }

    /// [`record_message`](Self::record_message) under a caller-supplied
    /// cancellation token. A token tripped before commit returns
    /// [`Error::Cancelled`] and leaves nothing written.
    pub fn record_message_with(
        &mut self,
        new: NewMessage,
        cancel: &CancellationToken,
    ) -> Result<(Message, DispatchOutcome)> {
        let mut tx = self.db.write_transaction()?;

        require_user(&tx, &new.sender)?;
        if let Some(receiver) = &new.receiver {
            require_user(&tx, receiver)?;
        }
        if let Some(parent) = &new.parent {
            require_same_scope(&tx, &new, parent)?;
        }

        let message = new.into_message(Message::next_created_at(&tx)?);
        let classification = lifecycle::classify(&tx, &message.id, &message.content, true)?;

        let mut steps = StepLog::new("record_message", cancel);
        steps.run("insert message", || Ok(Message::insert(&tx, &message)?))?;
        let outcome =
            lifecycle::on_write(&mut tx, &message, &classification, &message.sender, &mut steps)?;
        steps.finish()?;
        tx.commit()?;

        log::info!(
            "Recorded message {} from {} ({:?})",
            message.id,
            message.sender,
            outcome
        );
        Ok((message, outcome))
    }

    /// [`edit_message`](Self::edit_message) under a caller-supplied token.
    pub fn edit_message_with(
        &mut self,
        id: &MessageId,
        new_content: &str,
        editor: &UserId,
        cancel: &CancellationToken,
    ) -> Result<(Message, Classification)> {
        let mut tx = self.db.write_transaction()?;
        require_user(&tx, editor)?;

        let classification = lifecycle::classify(&tx, id, new_content, false)?;
        let Classification::Changed { previous_content } = &classification else {
            log::debug!("Edit of message {id} by {editor} left content unchanged");
            let message = Message::find_by_id(&tx, id)?
                .ok_or_else(|| Error::MessageVanished(id.clone()))?;
            return Ok((message, classification));
        };

        let mut steps = StepLog::new("edit_message", cancel);
        steps.run("write content", || {
            if Message::swap_content(&tx, id, previous_content, new_content)? {
                Ok(())
            } else {
                Err(Error::Conflict(format!(
                    "content of message {id} changed while it was being edited"
                )))
            }
        })?;
        let current = steps.run("reload message", || {
            Message::find_by_id(&tx, id)?.ok_or_else(|| Error::MessageVanished(id.clone()))
        })?;
        lifecycle::on_write(&mut tx, &current, &classification, editor, &mut steps)?;
        let updated = steps.run("reload message", || {
            Message::find_by_id(&tx, id)?.ok_or_else(|| Error::MessageVanished(id.clone()))
        })?;
        steps.finish()?;
        tx.commit()?;

        Ok((updated, classification))
    }

    /// [`remove_user`](Self::remove_user) under a caller-supplied token.
    pub fn remove_user_with(
        &mut self,
        user: &UserId,
        cancel: &CancellationToken,
    ) -> Result<CascadeReport> {
        let tx = self.db.write_transaction()?;
        let mut steps = StepLog::new("remove_user", cancel);
        let report = lifecycle::on_user_removed(&tx, user, &mut steps)?;
        steps.finish()?;
        tx.commit()?;

        if report.is_empty() {
            log::debug!("Removal of user {user} found nothing to delete");
        } else {
            log::info!("Removed user {user}: {report:?}");
        }
        Ok(report)
    }
}

fn require_user(conn: &Connection, id: &UserId) -> Result<()> {
    if User::exists(conn, id)? {
        Ok(())
    } else {
        Err(Error::not_found("user", id))
    }
}

/// A reply must stay inside the conversation scope of the message it answers.
fn require_same_scope(conn: &Connection, new: &NewMessage, parent_id: &MessageId) -> Result<()> {
    let parent = Message::find_by_id(conn, parent_id)?
        .ok_or_else(|| Error::not_found("message", parent_id))?;
    match (new.scope(), parent.scope()) {
        (Some(scope), Some(parent_scope)) if scope == parent_scope => Ok(()),
        (Some(scope), parent_scope) => Err(Error::InvalidReference(format!(
            "parent {parent_id} belongs to {}, reply belongs to {scope}",
            parent_scope.map_or_else(|| "no conversation".to_string(), |s| s.to_string())
        ))),
        (None, _) => Err(Error::InvalidReference(
            "a reply needs a receiver or a conversation".to_string(),
        )),
    }
}
