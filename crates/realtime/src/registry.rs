use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use shared::{
    domain::{AccountId, ConnectionId, SessionToken},
    protocol::{ClientFrame, ServerEvent},
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::{
    router::TransportFailure,
    session_store::{AttachOutcome, SessionStore},
};

/// Serialized frames queued for one connection's writer task.
pub type Outbound = mpsc::Sender<Arc<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    OpenUnbound,
    Bound,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceOutcome {
    Bound {
        session: SessionToken,
        displaced: Option<ConnectionId>,
    },
    UnknownSession,
    /// The connection closed before the announce was applied.
    ConnectionClosed,
}

struct LiveConnection {
    outbound: Outbound,
    state: ConnectionState,
}

/// A bound connection selected as a push target.
#[derive(Clone)]
pub(crate) struct Target {
    pub(crate) connection_id: ConnectionId,
    pub(crate) session: SessionToken,
    pub(crate) outbound: Outbound,
}

/// Tracks open transport connections and binds them to sessions.
#[derive(Clone)]
pub struct ConnectionRegistry {
    sessions: SessionStore,
    connections: Arc<RwLock<HashMap<ConnectionId, LiveConnection>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new(sessions: SessionStore) -> Self {
        Self {
            sessions,
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Registers a freshly opened, still anonymous connection.
    pub async fn open(&self, outbound: Outbound) -> ConnectionId {
        let connection_id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.write().await.insert(
            connection_id,
            LiveConnection {
                outbound,
                state: ConnectionState::OpenUnbound,
            },
        );
        info!(%connection_id, "live connection opened");
        connection_id
    }

    /// Handles one raw text frame from the client. Malformed frames and
    /// unknown actions are logged and dropped; there is no negative reply.
    pub async fn handle_frame(
        &self,
        connection_id: ConnectionId,
        raw: &str,
    ) -> Option<AnnounceOutcome> {
        match serde_json::from_str::<ClientFrame>(raw) {
            Ok(frame) => Some(self.announce(connection_id, frame).await),
            Err(error) => {
                warn!(%connection_id, %error, frame = raw, "ignoring unrecognised frame");
                None
            }
        }
    }

    pub async fn announce(
        &self,
        connection_id: ConnectionId,
        frame: ClientFrame,
    ) -> AnnounceOutcome {
        let ClientFrame::Init { session } = frame;
        if !self.connections.read().await.contains_key(&connection_id) {
            return AnnounceOutcome::ConnectionClosed;
        }

        let displaced = match self.sessions.attach_connection(&session, connection_id).await {
            AttachOutcome::Bound { displaced } => displaced,
            AttachOutcome::UnknownSession => {
                warn!(%connection_id, session = %session, "announce for unknown session ignored");
                return AnnounceOutcome::UnknownSession;
            }
        };

        let outbound = {
            let mut connections = self.connections.write().await;
            let outbound = match connections.get_mut(&connection_id) {
                Some(live) => {
                    live.state = ConnectionState::Bound;
                    Some(live.outbound.clone())
                }
                None => None,
            };
            // The displaced connection stays open but no session owns it now.
            if let Some(previous) = displaced.filter(|_| outbound.is_some()) {
                if let Some(live) = connections.get_mut(&previous) {
                    live.state = ConnectionState::OpenUnbound;
                }
            }
            outbound
        };
        let Some(outbound) = outbound else {
            // Closed while we were attaching; undo so no stale binding remains.
            self.sessions.detach_connection(connection_id).await;
            return AnnounceOutcome::ConnectionClosed;
        };

        if let Some(previous) = displaced {
            info!(%connection_id, %previous, session = %session, "announce displaced earlier connection");
        }
        info!(%connection_id, session = %session, "connection bound to session");

        let ack = ServerEvent::AnnounceAck {
            session: session.clone(),
        };
        if let Err(error) = push_event(connection_id, &outbound, &ack) {
            warn!(%connection_id, %error, "failed to acknowledge announce");
        }

        AnnounceOutcome::Bound { session, displaced }
    }

    /// Removes the connection and severs its session binding. Idempotent.
    pub async fn close(&self, connection_id: ConnectionId) {
        let removed = self.connections.write().await.remove(&connection_id).is_some();
        let session = self.sessions.detach_connection(connection_id).await;
        if removed {
            info!(%connection_id, session = ?session, "live connection closed");
        }
    }

    pub async fn state(&self, connection_id: ConnectionId) -> ConnectionState {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|live| live.state)
            .unwrap_or(ConnectionState::Closed)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// The connection currently bound to `token`, if it is still open.
    pub async fn connection_for_session(&self, token: &SessionToken) -> Option<ConnectionId> {
        let connection_id = self.sessions.get(token).await?.connection?;
        self.connections
            .read()
            .await
            .contains_key(&connection_id)
            .then_some(connection_id)
    }

    /// Open connections bound to sessions authenticated as `account_id`.
    pub async fn connections_for_account(&self, account_id: AccountId) -> Vec<ConnectionId> {
        self.targets_for_account(account_id)
            .await
            .into_iter()
            .map(|target| target.connection_id)
            .collect()
    }

    pub(crate) async fn targets_for_account(&self, account_id: AccountId) -> Vec<Target> {
        let sessions = self.sessions.sessions_for_account(account_id).await;
        if sessions.is_empty() {
            return Vec::new();
        }

        let connections = self.connections.read().await;
        let mut targets = Vec::with_capacity(sessions.len());
        for session in sessions {
            let Some(connection_id) = session.connection else {
                continue;
            };
            match connections.get(&connection_id) {
                Some(live) => targets.push(Target {
                    connection_id,
                    session: session.token,
                    outbound: live.outbound.clone(),
                }),
                None => debug!(
                    %connection_id,
                    session = %session.token,
                    "session points at a closed connection"
                ),
            }
        }
        targets
    }
}

/// Non-blocking push of an already encoded frame.
pub(crate) fn push_payload(
    connection_id: ConnectionId,
    outbound: &Outbound,
    payload: Arc<String>,
) -> Result<(), TransportFailure> {
    outbound.try_send(payload).map_err(|error| match error {
        mpsc::error::TrySendError::Full(_) => TransportFailure::Backpressure(connection_id),
        mpsc::error::TrySendError::Closed(_) => TransportFailure::Closed(connection_id),
    })
}

fn push_event(
    connection_id: ConnectionId,
    outbound: &Outbound,
    event: &ServerEvent,
) -> Result<(), TransportFailure> {
    let payload = Arc::new(serde_json::to_string(event)?);
    push_payload(connection_id, outbound, payload)
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
