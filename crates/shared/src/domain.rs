use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::{NoContext, Timestamp, Uuid};

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(AccountId, i64);
id_newtype!(ConnectionId, u64);

/// Durable message identifier.
///
/// Message ids are UUIDv7 values, so the leading 48 bits carry the creation
/// time in milliseconds and ids sort in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Builds an id whose embedded creation time is `at`.
    pub fn at(at: DateTime<Utc>) -> Self {
        let seconds = u64::try_from(at.timestamp()).unwrap_or_default();
        let timestamp = Timestamp::from_unix(NoContext, seconds, at.timestamp_subsec_nanos());
        Self(Uuid::new_v7(timestamp))
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let (seconds, nanos) = self.0.get_timestamp()?.to_unix();
        DateTime::from_timestamp(i64::try_from(seconds).ok()?, nanos)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque session capability handed to the browser in the `session` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Authenticated identity attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    #[serde(rename = "_id")]
    pub id: AccountId,
    pub email: String,
    pub username: String,
}

/// Public projection of an account used by search and favorites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    #[serde(rename = "_id")]
    pub id: AccountId,
    pub username: String,
}

impl From<&AccountProfile> for AccountSummary {
    fn from(value: &AccountProfile) -> Self {
        Self {
            id: value.id,
            username: value.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub from: AccountId,
    pub to: AccountId,
    pub content: String,
}

impl ChatMessage {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.id.created_at()
    }

    /// True when the message belongs to the unordered pair `{a, b}`.
    pub fn is_between(&self, a: AccountId, b: AccountId) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }
}
