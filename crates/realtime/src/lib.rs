//! Live session routing: which browser session belongs to which account,
//! which WebSocket connection belongs to which session, and fan-out of new
//! chat messages to every bound connection of the parties involved.

pub mod registry;
pub mod router;
pub mod session_store;

pub use registry::{AnnounceOutcome, ConnectionRegistry, ConnectionState, Outbound};
pub use router::{DeliveryReport, DeliveryStats, MessageRouter, TransportFailure};
pub use session_store::{AttachOutcome, Session, SessionStore};

/// The three realtime components wired over shared state.
#[derive(Clone)]
pub struct Realtime {
    pub sessions: SessionStore,
    pub registry: ConnectionRegistry,
    pub router: MessageRouter,
}

impl Realtime {
    pub fn new() -> Self {
        let sessions = SessionStore::new();
        let registry = ConnectionRegistry::new(sessions.clone());
        let router = MessageRouter::new(registry.clone());
        Self {
            sessions,
            registry,
            router,
        }
    }
}

impl Default for Realtime {
    fn default() -> Self {
        Self::new()
    }
}
