use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use shared::domain::{AccountId, AccountProfile, ConnectionId, SessionToken};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Server-side record behind a session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: SessionToken,
    /// Address of the most recent request made with this token.
    pub origin: Option<String>,
    pub created_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
    pub account: Option<AccountProfile>,
    /// The single live connection currently bound to this session.
    pub connection: Option<ConnectionId>,
}

impl Session {
    fn new(token: SessionToken, origin: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            token,
            origin,
            created_at: now,
            touched_at: now,
            account: None,
            connection: None,
        }
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account.as_ref().map(|account| account.id)
    }

    pub fn is_anonymous(&self) -> bool {
        self.account.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Bound {
        /// Connection that held the session before this one, if any.
        displaced: Option<ConnectionId>,
    },
    UnknownSession,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionToken, Session>,
    by_connection: HashMap<ConnectionId, SessionToken>,
    by_account: HashMap<AccountId, HashSet<SessionToken>>,
}

impl SessionTable {
    fn unindex_account(&mut self, account_id: AccountId, token: &SessionToken) {
        if let Some(tokens) = self.by_account.get_mut(&account_id) {
            tokens.remove(token);
            if tokens.is_empty() {
                self.by_account.remove(&account_id);
            }
        }
    }

    fn clear_connection(&mut self, connection_id: ConnectionId) -> Option<SessionToken> {
        let token = self.by_connection.remove(&connection_id)?;
        if let Some(session) = self.sessions.get_mut(&token) {
            if session.connection == Some(connection_id) {
                session.connection = None;
            }
        }
        Some(token)
    }
}

/// In-memory session state. Sessions are never expired.
///
/// All mutations go through one lock, so the forward map and both indexes
/// (connection -> token, account -> tokens) always change together.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<SessionTable>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `token`, minting a fresh anonymous one when
    /// the token is absent or unknown. Known sessions get their touch time
    /// and origin refreshed.
    pub async fn resolve_or_create(&self, token: Option<&str>, origin: Option<String>) -> Session {
        let mut table = self.inner.write().await;
        if let Some(token) = token {
            if let Some(session) = table.sessions.get_mut(&SessionToken::from(token)) {
                session.touched_at = Utc::now();
                if origin.is_some() {
                    session.origin = origin;
                }
                return session.clone();
            }
        }

        let token = SessionToken::generate();
        let session = Session::new(token.clone(), origin);
        table.sessions.insert(token.clone(), session.clone());
        debug!(session = %token, "created anonymous session");
        session
    }

    pub async fn get(&self, token: &SessionToken) -> Option<Session> {
        self.inner.read().await.sessions.get(token).cloned()
    }

    pub async fn contains(&self, token: &SessionToken) -> bool {
        self.inner.read().await.sessions.contains_key(token)
    }

    /// Attaches an account to the session. Unknown tokens are ignored.
    pub async fn authenticate(&self, token: &SessionToken, account: AccountProfile) -> bool {
        let mut table = self.inner.write().await;
        let Some(session) = table.sessions.get_mut(token) else {
            debug!(session = %token, "authenticate for unknown session ignored");
            return false;
        };
        let account_id = account.id;
        let previous = session.account.replace(account).map(|a| a.id);
        if let Some(previous) = previous.filter(|previous| *previous != account_id) {
            table.unindex_account(previous, token);
        }
        table
            .by_account
            .entry(account_id)
            .or_default()
            .insert(token.clone());
        info!(session = %token, %account_id, "session authenticated");
        true
    }

    pub async fn deauthenticate(&self, token: &SessionToken) -> bool {
        let mut table = self.inner.write().await;
        let Some(session) = table.sessions.get_mut(token) else {
            return false;
        };
        let Some(account) = session.account.take() else {
            return true;
        };
        table.unindex_account(account.id, token);
        info!(session = %token, account_id = %account.id, "session deauthenticated");
        true
    }

    /// Binds a live connection to the session, replacing any earlier one.
    pub async fn attach_connection(
        &self,
        token: &SessionToken,
        connection_id: ConnectionId,
    ) -> AttachOutcome {
        let mut table = self.inner.write().await;
        if !table.sessions.contains_key(token) {
            warn!(session = %token, %connection_id, "attach for unknown session ignored");
            return AttachOutcome::UnknownSession;
        }

        // A connection re-announcing under another token leaves its old session.
        if table.by_connection.get(&connection_id) != Some(token) {
            table.clear_connection(connection_id);
        }

        let displaced = table
            .sessions
            .get_mut(token)
            .and_then(|session| session.connection.replace(connection_id))
            .filter(|previous| *previous != connection_id);
        if let Some(previous) = displaced {
            table.by_connection.remove(&previous);
        }
        table.by_connection.insert(connection_id, token.clone());
        AttachOutcome::Bound { displaced }
    }

    /// Clears whichever session `connection_id` is bound to.
    pub async fn detach_connection(&self, connection_id: ConnectionId) -> Option<SessionToken> {
        let token = self.inner.write().await.clear_connection(connection_id)?;
        debug!(session = %token, %connection_id, "connection detached from session");
        Some(token)
    }

    pub async fn session_for_connection(&self, connection_id: ConnectionId) -> Option<Session> {
        let table = self.inner.read().await;
        let token = table.by_connection.get(&connection_id)?;
        table.sessions.get(token).cloned()
    }

    /// Sessions authenticated as `account_id` that have a live connection.
    pub async fn sessions_for_account(&self, account_id: AccountId) -> Vec<Session> {
        let table = self.inner.read().await;
        let Some(tokens) = table.by_account.get(&account_id) else {
            return Vec::new();
        };
        tokens
            .iter()
            .filter_map(|token| table.sessions.get(token))
            .filter(|session| {
                session.connection.is_some() && session.account_id() == Some(account_id)
            })
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.sessions.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/session_store_tests.rs"]
mod tests;
