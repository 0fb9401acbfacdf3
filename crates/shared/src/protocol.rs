use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{AccountId, AccountProfile, AccountSummary, ChatMessage, SessionToken};

/// Most recent messages returned by a history fetch.
pub const HISTORY_LIMIT: u32 = 1024;
pub const SEARCH_LIMIT: u32 = 64;
pub const FAVORITES_LIMIT: u32 = 64;
/// Display blocks kept per open conversation.
pub const TRANSCRIPT_CAPACITY: usize = 1024;
/// Same-side messages closer than this to a block's start join that block.
pub const COALESCE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_id: AccountId,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRequest {
    pub target_id: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub user_id: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub username: String,
}

/// Identity of the calling session; account fields are absent when anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoAmI {
    pub session: SessionToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_no: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl WhoAmI {
    pub fn new(session: SessionToken, account: Option<&AccountProfile>) -> Self {
        Self {
            session,
            account_no: account.map(|a| a.id),
            email: account.map(|a| a.email.clone()),
            username: account.map(|a| a.username.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub session: SessionToken,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FavoritesResponse {
    pub favorites: Vec<AccountSummary>,
}

/// Body of a successful `POST /message`; intentionally empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageResponse {}

/// Frames a live connection may send to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Declares which session the connection belongs to.
    Init { session: SessionToken },
}

/// Events pushed from the server over a live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "EventFrame", try_from = "EventFrame")]
pub enum ServerEvent {
    /// A message the session's own account sent, echoed back to its tabs.
    Echo { message: ChatMessage },
    /// A message addressed to the session's account.
    Delivery {
        message: ChatMessage,
        from_username: String,
    },
    AnnounceAck { session: SessionToken },
}

impl ServerEvent {
    pub fn message(&self) -> Option<&ChatMessage> {
        match self {
            Self::Echo { message } | Self::Delivery { message, .. } => Some(message),
            Self::AnnounceAck { .. } => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum EventFrame {
    Message(MessageFrame),
    Ack(AckFrame),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageFrame {
    #[serde(flatten)]
    message: ChatMessage,
    my_message: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from_username: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct AckFrame {
    action: String,
    session: SessionToken,
}

const ACK_ACTION: &str = "init";

impl From<ServerEvent> for EventFrame {
    fn from(value: ServerEvent) -> Self {
        match value {
            ServerEvent::Echo { message } => Self::Message(MessageFrame {
                message,
                my_message: true,
                from_username: None,
            }),
            ServerEvent::Delivery {
                message,
                from_username,
            } => Self::Message(MessageFrame {
                message,
                my_message: false,
                from_username: Some(from_username),
            }),
            ServerEvent::AnnounceAck { session } => Self::Ack(AckFrame {
                action: ACK_ACTION.to_string(),
                session,
            }),
        }
    }
}

impl TryFrom<EventFrame> for ServerEvent {
    type Error = String;

    fn try_from(value: EventFrame) -> Result<Self, Self::Error> {
        match value {
            EventFrame::Message(frame) if frame.my_message => Ok(Self::Echo {
                message: frame.message,
            }),
            EventFrame::Message(frame) => {
                let from_username = frame
                    .from_username
                    .ok_or_else(|| "delivery event without fromUsername".to_string())?;
                Ok(Self::Delivery {
                    message: frame.message,
                    from_username,
                })
            }
            EventFrame::Ack(frame) if frame.action == ACK_ACTION => Ok(Self::AnnounceAck {
                session: frame.session,
            }),
            EventFrame::Ack(frame) => Err(format!("unknown event action '{}'", frame.action)),
        }
    }
}
