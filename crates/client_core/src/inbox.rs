use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{AccountId, AccountSummary, ChatMessage},
    protocol::ServerEvent,
};
use tracing::debug;

use crate::transcript::{PushOutcome, Transcript};

/// A delivery for a conversation that is not open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub from: AccountSummary,
    /// Content of the most recent unseen message.
    pub preview: String,
    pub unread: usize,
    pub last_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxUpdate {
    Displayed { peer: AccountId, outcome: PushOutcome },
    Notified { from: AccountId },
    Ignored,
}

/// Open conversations and pending notifications of the signed-in account.
#[derive(Debug, Default)]
pub struct Inbox {
    conversations: HashMap<AccountId, Transcript>,
    notifications: Vec<Notification>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or refreshes) the conversation with `peer`, seeding it from
    /// `history`, and clears any notification from that peer.
    pub fn open_conversation(
        &mut self,
        peer: AccountSummary,
        history: Vec<ChatMessage>,
    ) -> &mut Transcript {
        self.notifications.retain(|n| n.from.id != peer.id);
        let transcript = self
            .conversations
            .entry(peer.id)
            .or_insert_with(|| Transcript::new(peer));
        transcript.seed(history);
        transcript
    }

    pub fn close_conversation(&mut self, peer: AccountId) -> bool {
        self.conversations.remove(&peer).is_some()
    }

    pub fn conversation(&self, peer: AccountId) -> Option<&Transcript> {
        self.conversations.get(&peer)
    }

    pub fn conversation_mut(&mut self, peer: AccountId) -> Option<&mut Transcript> {
        self.conversations.get_mut(&peer)
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Applies a pushed event. Echoes of our own messages only matter to an
    /// open conversation; deliveries for closed ones become notifications.
    pub fn handle_event(&mut self, event: &ServerEvent) -> InboxUpdate {
        match event {
            ServerEvent::Echo { message } => match self.conversations.get_mut(&message.to) {
                Some(transcript) => InboxUpdate::Displayed {
                    peer: message.to,
                    outcome: transcript.push_message(message, true),
                },
                None => InboxUpdate::Ignored,
            },
            ServerEvent::Delivery {
                message,
                from_username,
            } => {
                if let Some(transcript) = self.conversations.get_mut(&message.from) {
                    return InboxUpdate::Displayed {
                        peer: message.from,
                        outcome: transcript.push_message(message, true),
                    };
                }
                self.notify(message, from_username);
                InboxUpdate::Notified { from: message.from }
            }
            ServerEvent::AnnounceAck { .. } => InboxUpdate::Ignored,
        }
    }

    fn notify(&mut self, message: &ChatMessage, from_username: &str) {
        let at = message.created_at().unwrap_or_else(Utc::now);
        if let Some(existing) = self
            .notifications
            .iter_mut()
            .find(|n| n.from.id == message.from)
        {
            existing.preview = message.content.clone();
            existing.unread += 1;
            existing.last_at = existing.last_at.max(at);
            return;
        }
        debug!(from = %message.from, "new notification");
        self.notifications.push(Notification {
            from: AccountSummary {
                id: message.from,
                username: from_username.to_string(),
            },
            preview: message.content.clone(),
            unread: 1,
            last_at: at,
        });
    }

    /// Opens the conversation a notification points at and clears it.
    /// Returns `None` when there is no pending notification from `from`.
    pub fn open_notification(
        &mut self,
        from: AccountId,
        history: Vec<ChatMessage>,
    ) -> Option<&mut Transcript> {
        let notification = self.notifications.iter().find(|n| n.from.id == from)?.clone();
        Some(self.open_conversation(notification.from, history))
    }
}

#[cfg(test)]
#[path = "tests/inbox_tests.rs"]
mod tests;
