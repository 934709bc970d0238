//! Async handle over [`MessageService`].
//!
//! SQLite work runs on the blocking pool. Each call gets a deadline, retries
//! retryable failures, keeps the thread cache coherent and publishes a
//! [`LifecycleEvent`] once its transaction has committed.
//!
//! The `*_with` variants also take a caller's [`CancellationToken`]. Tripping
//! it before commit makes the call return [`Error::Cancelled`] with nothing
//! written; the handle's own deadline cancels a child token and never trips
//! the caller's.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::cache::{Forest, ThreadCache};
use crate::common::{ConversationScope, LifecycleEvent, MessageId, UserId};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::lifecycle::CascadeReport;
use crate::service::MessageService;
use crate::storage::{Message, MessageHistory, NewMessage, Notification, User};

/// Deadline and retry settings applied to every handle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    /// Multiplied by the attempt number between retries.
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        AppConfig::default().call_policy()
    }
}

#[derive(Clone)]
pub struct MessagingHandle {
    service: Arc<Mutex<MessageService>>,
    cache: Arc<Mutex<ThreadCache>>,
    events: Option<mpsc::Sender<LifecycleEvent>>,
    policy: CallPolicy,
}

impl MessagingHandle {
    pub fn new(service: MessageService, cache: ThreadCache, policy: CallPolicy) -> Self {
        Self {
            service: Arc::new(Mutex::new(service)),
            cache: Arc::new(Mutex::new(cache)),
            events: None,
            policy,
        }
    }

    /// Open the configured database with the configured cache and policy.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let service = MessageService::open(&config.database_path, config.busy_timeout())?;
        Ok(Self::new(
            service,
            config.thread_cache(),
            config.call_policy(),
        ))
    }

    /// Publish lifecycle events to `sender`. Events are dropped with a warning
    /// when the channel is full or closed; a slow subscriber never holds up a
    /// committed call.
    pub fn with_events(mut self, sender: mpsc::Sender<LifecycleEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub async fn register_user(&self, username: &str) -> Result<User> {
        let username = username.to_string();
        self.call("register_user", &CancellationToken::new(), move |service, _| {
            service.register_user(&username)
        })
        .await
    }

    pub async fn record_message(&self, new: NewMessage) -> Result<Message> {
        self.record_message_with(new, &CancellationToken::new()).await
    }

    pub async fn record_message_with(
        &self,
        new: NewMessage,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let (message, dispatch) = self
            .call("record_message", cancel, move |service, cancel| {
                service.record_message_with(new.clone(), cancel)
            })
            .await?;

        self.cache().invalidate_message(&message);
        self.publish(LifecycleEvent::MessageRecorded {
            message_id: message.id.clone(),
            sender: message.sender.clone(),
            receiver: message.receiver.clone(),
            dispatch,
        });
        Ok(message)
    }

    pub async fn edit_message(
        &self,
        id: &MessageId,
        content: &str,
        editor: &UserId,
    ) -> Result<Message> {
        self.edit_message_with(id, content, editor, &CancellationToken::new()).await
    }

    pub async fn edit_message_with(
        &self,
        id: &MessageId,
        content: &str,
        editor: &UserId,
        cancel: &CancellationToken,
    ) -> Result<Message> {
        let (call_id, call_content, call_editor) =
            (id.clone(), content.to_string(), editor.clone());
        let (message, classification) = self
            .call("edit_message", cancel, move |service, cancel| {
                service.edit_message_with(&call_id, &call_content, &call_editor, cancel)
            })
            .await?;

        let changed = classification.is_change();
        if changed {
            self.cache().invalidate_message(&message);
        }
        self.publish(LifecycleEvent::MessageEdited {
            message_id: message.id.clone(),
            editor: editor.clone(),
            changed,
        });
        Ok(message)
    }

    pub async fn remove_user(&self, user: &UserId) -> Result<CascadeReport> {
        self.remove_user_with(user, &CancellationToken::new()).await
    }

    pub async fn remove_user_with(
        &self,
        user: &UserId,
        cancel: &CancellationToken,
    ) -> Result<CascadeReport> {
        let call_user = user.clone();
        let report = self
            .call("remove_user", cancel, move |service, cancel| {
                service.remove_user_with(&call_user, cancel)
            })
            .await?;

        self.cache().clear();
        self.publish(LifecycleEvent::UserRemoved {
            user_id: user.clone(),
            report,
        });
        Ok(report)
    }

    /// Cached thread for `scope`, loading it on a miss.
    pub async fn get_thread(&self, scope: &ConversationScope) -> Result<Forest> {
        let generation = {
            let mut cache = self.cache();
            if let Some(forest) = cache.get(scope) {
                log::debug!("Thread cache hit for {scope}");
                return Ok(forest);
            }
            cache.generation()
        };

        let call_scope = scope.clone();
        let forest: Forest = Arc::new(
            self.call("get_thread", &CancellationToken::new(), move |service, _| {
                service.get_thread(&call_scope)
            })
            .await?,
        );

        if !self.cache().insert(scope, generation, Arc::clone(&forest)) {
            log::debug!("Not caching thread {scope}; it changed while loading");
        }
        Ok(forest)
    }

    pub async fn find_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let id = id.clone();
        self.call("find_message", &CancellationToken::new(), move |service, _| {
            service.find_message(&id)
        })
        .await
    }

    pub async fn unread_notifications(&self, user: &UserId) -> Result<Vec<Notification>> {
        let user = user.clone();
        self.call(
            "unread_notifications",
            &CancellationToken::new(),
            move |service, _| service.unread_notifications(&user),
        )
        .await
    }

    pub async fn message_history(&self, id: &MessageId) -> Result<Vec<MessageHistory>> {
        let id = id.clone();
        self.call("message_history", &CancellationToken::new(), move |service, _| {
            service.message_history(&id)
        })
        .await
    }

    async fn call<T, F>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut MessageService, &CancellationToken) -> Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut attempt = 0;
        loop {
            let attempt_fn = Arc::clone(&f);
            match self
                .call_once(operation, cancel, move |service, cancel| {
                    attempt_fn(service, cancel)
                })
                .await
            {
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "{operation} failed (attempt {attempt} of {}): {err}; retrying",
                        self.policy.max_retries + 1
                    );
                    tokio::time::sleep(self.policy.backoff * attempt).await;
                }
                result => return result,
            }
        }
    }

    /// Run one attempt on the blocking pool. On timeout the attempt is
    /// cancelled and awaited, so its result reflects what actually committed.
    async fn call_once<T, F>(
        &self,
        operation: &'static str,
        caller: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut MessageService, &CancellationToken) -> Result<T> + Send + 'static,
    {
        let cancel = caller.child_token();
        let worker_cancel = cancel.clone();
        let service = Arc::clone(&self.service);
        let mut task = tokio::task::spawn_blocking(move || {
            let mut service = lock(&service);
            f(&mut service, &worker_cancel)
        });

        match tokio::time::timeout(self.policy.timeout, &mut task).await {
            Ok(joined) => joined.map_err(worker_failed)?,
            Err(_) => {
                log::warn!(
                    "{operation} exceeded {:?}; cancelling",
                    self.policy.timeout
                );
                cancel.cancel();
                task.await.map_err(worker_failed)?
            }
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        let Some(events) = &self.events else {
            return;
        };
        match events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("Lifecycle event channel full; dropping {event:?}")
            }
            Err(TrySendError::Closed(event)) => {
                log::warn!("Lifecycle event channel closed; dropping {event:?}")
            }
        }
    }

    fn cache(&self) -> MutexGuard<'_, ThreadCache> {
        lock(&self.cache)
    }
}

/// A panic while holding the lock leaves no open transaction behind, so the
/// guarded value is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("Recovering poisoned lock");
        poisoned.into_inner()
    })
}

fn worker_failed(err: JoinError) -> Error {
    Error::unavailable(format!("worker task failed: {err}"))
}
