//! Message lifecycle events over an SQLite entity store: change detection,
//! notification and edit-history dispatch, cascading user removal and
//! reply-thread assembly.

pub mod cache;
pub mod common;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod runtime;
pub mod service;
pub mod storage;

pub use cache::ThreadCache;
pub use common::{ConversationId, ConversationScope, LifecycleEvent, MessageId, UserId};
pub use error::{Error, ErrorKind, Result};
pub use lifecycle::{CascadeReport, Classification, DispatchOutcome, ThreadNode};
pub use runtime::{CallPolicy, MessagingHandle};
pub use service::MessageService;
pub use storage::{Database, Message, MessageHistory, NewMessage, Notification, User};
