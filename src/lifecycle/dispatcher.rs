use rusqlite::{Connection, Result as SqlResult, Transaction};
use serde::Serialize;

use crate::common::{HistoryId, NotificationId, Timestamp, UserId};
use crate::error::{Error, Result};
use crate::storage::{Message, MessageHistory, Notification};

use super::change_detector::Classification;
use super::steps::StepLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Broadcast message, nobody to notify.
    NoReceiver,
    SelfMessage,
}

/// Derived state produced for one classified write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Notified { notification: NotificationId },
    NotificationSkipped { reason: SkipReason },
    /// Notification insert failed; the message write itself stands.
    NotificationFailed { reason: String },
    HistoryRecorded { history: HistoryId },
    NoChange,
}

/// Apply the derived-state updates for `message` according to its
/// classification. `actor` is the editor for changed writes.
pub fn on_write(
    tx: &mut Transaction<'_>,
    message: &Message,
    classification: &Classification,
    actor: &UserId,
    steps: &mut StepLog<'_>,
) -> Result<DispatchOutcome> {
    match classification {
        Classification::New => Ok(notify_receiver(tx, message)),
        Classification::Changed { previous_content } => {
            record_edit(tx, message, previous_content, actor, steps)
        }
        Classification::Unchanged => Ok(DispatchOutcome::NoChange),
    }
}

fn notify_receiver(tx: &mut Transaction<'_>, message: &Message) -> DispatchOutcome {
    let Some(recipient) = message.receiver.as_ref() else {
        log::debug!("No receiver on message {}; skipping notification", message.id);
        return DispatchOutcome::NotificationSkipped {
            reason: SkipReason::NoReceiver,
        };
    };
    if recipient == &message.sender {
        log::debug!("Message {} sent to self; skipping notification", message.id);
        return DispatchOutcome::NotificationSkipped {
            reason: SkipReason::SelfMessage,
        };
    }

    let notification =
        Notification::unread(recipient.clone(), message.id.clone(), message.created_at);
    match insert_isolated(tx, &notification) {
        Ok(()) => DispatchOutcome::Notified {
            notification: notification.id,
        },
        Err(err) => {
            log::warn!(
                "Failed to create notification for {recipient} about message {}: {err}",
                message.id
            );
            DispatchOutcome::NotificationFailed {
                reason: err.to_string(),
            }
        }
    }
}

/// Insert inside a savepoint so a failure leaves the enclosing message write intact.
fn insert_isolated(tx: &mut Transaction<'_>, notification: &Notification) -> SqlResult<()> {
    let savepoint = tx.savepoint()?;
    Notification::insert(&savepoint, notification)?;
    savepoint.commit()
}

fn record_edit(
    conn: &Connection,
    message: &Message,
    previous_content: &str,
    editor: &UserId,
    steps: &mut StepLog<'_>,
) -> Result<DispatchOutcome> {
    let now = Timestamp::now();
    let entry = MessageHistory {
        id: HistoryId::generate(),
        message: message.id.clone(),
        previous_content: previous_content.to_string(),
        edited_by: Some(editor.clone()),
        recorded_at: now,
    };

    steps.run("append history", || Ok(MessageHistory::insert(conn, &entry)?))?;
    steps.run("mark edited", || {
        match Message::mark_edited(conn, &message.id, now, editor)? {
            0 => Err(Error::MessageVanished(message.id.clone())),
            _ => Ok(()),
        }
    })?;

    log::info!(
        "Recorded edit of message {} by {editor} (history {})",
        message.id,
        entry.id
    );
    Ok(DispatchOutcome::HistoryRecorded { history: entry.id })
}
