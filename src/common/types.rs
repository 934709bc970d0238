use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Serialize, Serializer};
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                String::column_result(value).map(Self)
            }
        }
    };
}

opaque_id!(
    /// Identity of a user; issued and owned outside the core.
    UserId
);
opaque_id!(MessageId);
opaque_id!(NotificationId);
opaque_id!(HistoryId);
opaque_id!(
    /// Groups messages that do not form a plain two-party exchange.
    ConversationId
);

/// Wall-clock instant with microsecond precision, stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_micros())
    }

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn plus_micros(&self, micros: i64) -> Self {
        Self(self.0.saturating_add(micros))
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(at) => f.write_str(&at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            None => write!(f, "@{}us", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ScopeKey {
    /// Unordered pair, stored low/high so both directions compare equal.
    Direct { low: UserId, high: UserId },
    Conversation(ConversationId),
}

/// Which messages belong to one thread view.
///
/// A message with a conversation id belongs to that conversation; otherwise a
/// message with a receiver belongs to the direct scope of its two participants.
/// Broadcasts without a conversation belong to no scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationScope {
    key: ScopeKey,
}

impl ConversationScope {
    pub fn direct(a: UserId, b: UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            key: ScopeKey::Direct { low, high },
        }
    }

    pub fn conversation(id: ConversationId) -> Self {
        Self {
            key: ScopeKey::Conversation(id),
        }
    }

    /// Scope a message with these attributes belongs to.
    pub fn of(
        sender: &UserId,
        receiver: Option<&UserId>,
        conversation: Option<&ConversationId>,
    ) -> Option<Self> {
        match (conversation, receiver) {
            (Some(conversation), _) => Some(Self::conversation(conversation.clone())),
            (None, Some(receiver)) => Some(Self::direct(sender.clone(), receiver.clone())),
            (None, None) => None,
        }
    }

    pub fn participants(&self) -> Option<(&UserId, &UserId)> {
        match &self.key {
            ScopeKey::Direct { low, high } => Some((low, high)),
            ScopeKey::Conversation(_) => None,
        }
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match &self.key {
            ScopeKey::Conversation(id) => Some(id),
            ScopeKey::Direct { .. } => None,
        }
    }

    /// Stable cache key.
    pub fn fingerprint(&self) -> String {
        match &self.key {
            ScopeKey::Direct { low, high } => format!("direct:{low}:{high}"),
            ScopeKey::Conversation(id) => format!("conversation:{id}"),
        }
    }
}

impl fmt::Display for ConversationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}
