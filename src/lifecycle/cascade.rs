use rusqlite::Connection;
use serde::Serialize;

use crate::common::UserId;
use crate::error::Result;
use crate::storage::{Message, MessageHistory, Notification, User};

use super::steps::StepLog;

/// What removing a user deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub messages_deleted: usize,
    pub notifications_deleted: usize,
    pub history_deleted: usize,
    /// Surviving messages whose `edited_by` pointed at the user.
    pub edits_detached: usize,
    /// Surviving messages left without history, no longer flagged as edited.
    pub edit_flags_cleared: usize,
    pub user_deleted: bool,
}

impl CascadeReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Remove a user and everything that depends on them.
///
/// Runs inside the caller's transaction; the caller commits only if this
/// returns `Ok`, so a failure at any step leaves nothing deleted. Messages the
/// user sent or received are removed together with their whole reply subtree.
/// A surviving message whose only recorded edits were the user's loses its
/// edited flag along with that history.
pub fn on_user_removed(
    conn: &Connection,
    user: &UserId,
    steps: &mut StepLog<'_>,
) -> Result<CascadeReport> {
    let mut report = CascadeReport::default();

    report.history_deleted += steps.run("delete history edited by user", || {
        Ok(MessageHistory::delete_by_editor(conn, user)?)
    })?;
    report.notifications_deleted += steps.run("delete notifications for user", || {
        Ok(Notification::delete_by_recipient(conn, user)?)
    })?;

    let doomed = steps.run("collect message subtrees", || {
        Ok(Message::subtree_ids_for_participant(conn, user)?)
    })?;
    if !doomed.is_empty() {
        report.history_deleted += steps.run("delete history of removed messages", || {
            Ok(MessageHistory::delete_by_messages(conn, &doomed)?)
        })?;
        report.notifications_deleted +=
            steps.run("delete notifications of removed messages", || {
                Ok(Notification::delete_by_messages(conn, &doomed)?)
            })?;
        report.messages_deleted = steps.run("delete messages", || {
            Ok(Message::delete_by_ids(conn, &doomed)?)
        })?;
    }

    report.edits_detached = steps.run("detach user from edited messages", || {
        Ok(Message::detach_editor(conn, user)?)
    })?;
    report.edit_flags_cleared = steps.run("clear edit flags without history", || {
        Ok(Message::clear_unrecorded_edits(conn)?)
    })?;
    report.user_deleted = steps.run("delete user", || Ok(User::delete(conn, user)? > 0))?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ConversationId, MessageId, Timestamp};
    use tokio_util::sync::CancellationToken;
    use crate::storage::{Database, NewMessage};

    struct Fixture {
        db: Database,
        alice: UserId,
        bob: UserId,
        carol: UserId,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Database::in_memory().unwrap();
            let mut ids = Vec::new();
            for name in ["alice", "bob", "carol"] {
                let user = User {
                    id: UserId::generate(),
                    username: name.to_string(),
                    created_at: Timestamp::now(),
                };
                User::insert(db.connection(), &user).unwrap();
                ids.push(user.id);
            }
            Self {
                db,
                alice: ids[0].clone(),
                bob: ids[1].clone(),
                carol: ids[2].clone(),
            }
        }

        fn send(&self, new: NewMessage) -> MessageId {
            let conn = self.db.connection();
            let message = new.into_message(Message::next_created_at(conn).unwrap());
            Message::insert(conn, &message).unwrap();
            if let Some(receiver) = &message.receiver {
                if receiver != &message.sender {
                    let n = Notification::unread(
                        receiver.clone(),
                        message.id.clone(),
                        message.created_at,
                    );
                    Notification::insert(conn, &n).unwrap();
                }
            }
            message.id
        }

        fn edit(&self, id: &MessageId, content: &str, editor: &UserId) {
            let conn = self.db.connection();
            let previous = Message::content_of(conn, id).unwrap().unwrap();
            assert!(Message::swap_content(conn, id, &previous, content).unwrap());
            MessageHistory::insert(
                conn,
                &MessageHistory {
                    id: crate::common::HistoryId::generate(),
                    message: id.clone(),
                    previous_content: previous,
                    edited_by: Some(editor.clone()),
                    recorded_at: Timestamp::now(),
                },
            )
            .unwrap();
            Message::mark_edited(conn, id, Timestamp::now(), editor).unwrap();
        }

        fn remove(&mut self, user: &UserId) -> Result<CascadeReport> {
            let cancel = CancellationToken::new();
            let tx = self.db.write_transaction()?;
            let mut steps = StepLog::new("remove_user", &cancel);
            let report = on_user_removed(&tx, user, &mut steps)?;
            steps.finish()?;
            tx.commit()?;
            Ok(report)
        }

        fn count(&self, sql: &str, user: &UserId) -> i64 {
            self.db
                .connection()
                .query_row(sql, [user], |row| row.get(0))
                .unwrap()
        }

        fn references_to(&self, user: &UserId) -> i64 {
            self.count(
                "SELECT (SELECT COUNT(*) FROM messages
                          WHERE sender_id = ?1 OR receiver_id = ?1 OR edited_by = ?1)
                      + (SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1)
                      + (SELECT COUNT(*) FROM message_history WHERE edited_by = ?1)",
                user,
            )
        }

        fn total(&self, table: &str) -> i64 {
            self.db
                .connection()
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .unwrap()
        }
    }

    #[test]
    fn test_removes_direct_messages_and_subtrees() {
        let mut fx = Fixture::new();
        let (alice, bob, carol) = (fx.alice.clone(), fx.bob.clone(), fx.carol.clone());
        let room = ConversationId::from("room");

        let m1 = fx.send(NewMessage::direct(alice.clone(), bob.clone(), "Hi"));
        let m2 = fx.send(
            NewMessage::direct(bob.clone(), alice.clone(), "Hey").in_reply_to(m1.clone()),
        );
        let opener = fx.send(
            NewMessage::direct(alice.clone(), carol.clone(), "Room").in_conversation(room.clone()),
        );
        let carol_reply = fx.send(
            NewMessage::broadcast(carol.clone(), room.clone(), "reply").in_reply_to(opener.clone()),
        );
        fx.edit(&carol_reply, "reply (edited)", &carol);
        let survivor = fx.send(NewMessage::direct(bob.clone(), carol.clone(), "unrelated"));

        let report = fx.remove(&alice).unwrap();

        assert_eq!(report.messages_deleted, 4);
        assert_eq!(report.history_deleted, 1);
        // bob's notification for m1, alice's for m2, carol's for the opener.
        assert_eq!(report.notifications_deleted, 3);
        assert!(report.user_deleted);

        for id in [&m1, &m2, &opener, &carol_reply] {
            assert!(Message::find_by_id(fx.db.connection(), id).unwrap().is_none());
        }
        assert!(Message::find_by_id(fx.db.connection(), &survivor).unwrap().is_some());
        assert_eq!(fx.references_to(&alice), 0);
        assert_eq!(fx.total("messages"), 1);
        assert_eq!(fx.total("notifications"), 1);
    }

    #[test]
    fn test_detaches_edits_on_other_users_messages() {
        let mut fx = Fixture::new();
        let (alice, bob, carol) = (fx.alice.clone(), fx.bob.clone(), fx.carol.clone());
        let m = fx.send(NewMessage::direct(bob.clone(), carol.clone(), "draft"));
        fx.edit(&m, "draft v2", &alice);

        let report = fx.remove(&alice).unwrap();

        assert_eq!(report.messages_deleted, 0);
        assert_eq!(report.history_deleted, 1);
        assert_eq!(report.edits_detached, 1);
        assert_eq!(report.edit_flags_cleared, 1);
        let stored = Message::find_by_id(fx.db.connection(), &m).unwrap().unwrap();
        assert_eq!(stored.content, "draft v2");
        assert_eq!(stored.edited_by, None);
        assert_eq!(stored.edited_at, None);
        assert!(!stored.edited);
        assert_eq!(fx.references_to(&alice), 0);
    }

    #[test]
    fn test_second_removal_is_empty() {
        let mut fx = Fixture::new();
        let (alice, bob) = (fx.alice.clone(), fx.bob.clone());
        fx.send(NewMessage::direct(alice.clone(), bob, "Hi"));

        let first = fx.remove(&alice).unwrap();
        assert!(!first.is_empty());
        let second = fx.remove(&alice).unwrap();
        assert!(second.is_empty());
        assert!(!second.user_deleted);
    }

    #[test]
    fn test_failure_rolls_back_every_step() {
        let mut fx = Fixture::new();
        let (alice, bob) = (fx.alice.clone(), fx.bob.clone());
        let m1 = fx.send(NewMessage::direct(alice.clone(), bob.clone(), "Hi"));
        fx.send(NewMessage::direct(bob.clone(), alice.clone(), "Hello"));
        fx.db
            .connection()
            .execute_batch(
                "CREATE TEMP TRIGGER block_message_delete BEFORE DELETE ON messages
                 BEGIN SELECT RAISE(ABORT, 'message store read-only'); END;",
            )
            .unwrap();

        let err = fx.remove(&alice).unwrap_err();
        assert!(err.rolled_back_partial_work());
        match &err {
            crate::error::Error::PartialFailureRolledBack { step, .. } => {
                assert_eq!(*step, "delete messages")
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(fx.total("messages"), 2);
        assert_eq!(fx.total("notifications"), 2);
        assert!(Message::find_by_id(fx.db.connection(), &m1).unwrap().is_some());
        assert!(User::exists(fx.db.connection(), &alice).unwrap());
    }

    #[test]
    fn test_cancel_before_commit_rolls_back() {
        let mut fx = Fixture::new();
        let (alice, bob) = (fx.alice.clone(), fx.bob.clone());
        fx.send(NewMessage::direct(alice.clone(), bob, "Hi"));

        let cancel = CancellationToken::new();
        {
            let tx = fx.db.write_transaction().unwrap();
            let mut steps = StepLog::new("remove_user", &cancel);
            on_user_removed(&tx, &alice, &mut steps).unwrap();
            cancel.cancel();
            assert!(steps.finish().is_err());
        }

        assert_eq!(fx.total("messages"), 1);
        assert!(User::exists(fx.db.connection(), &alice).unwrap());
    }
}
