use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::Serialize;
use shared::{
    domain::{ChatMessage, ConnectionId},
    protocol::ServerEvent,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::registry::{push_payload, ConnectionRegistry, Target};

/// A push to one live connection failed. Never fatal to the fan-out.
#[derive(Debug, Error)]
pub enum TransportFailure {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("outbound queue of connection {0} is full")]
    Backpressure(ConnectionId),
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of routing one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    fn record(&mut self, result: &Result<(), TransportFailure>) {
        self.attempted += 1;
        match result {
            Ok(()) => self.delivered += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Cumulative counters across all routed messages.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    attempted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryStats {
    fn add(&self, report: &DeliveryReport) {
        self.attempted
            .fetch_add(report.attempted as u64, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    /// Returns `(attempted, delivered, failed)`.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.attempted.load(Ordering::Relaxed),
            self.delivered.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Fans newly persisted messages out to the live connections of both parties.
#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
    stats: Arc<DeliveryStats>,
}

impl MessageRouter {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    /// Pushes an echo to every bound session of the sender and a delivery to
    /// every bound session of the recipient. Must only be called once the
    /// message is persisted. Per-connection failures are counted and logged;
    /// closed targets are dropped from the registry.
    pub async fn route_new_message(
        &self,
        message: &ChatMessage,
        sender_username: &str,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let echo_targets = self.registry.targets_for_account(message.from).await;
        let echo = ServerEvent::Echo {
            message: message.clone(),
        };
        self.fan_out(&echo, &echo_targets, &mut report).await;

        // A note to self is already covered by the echo.
        if message.to != message.from {
            let delivery_targets = self.registry.targets_for_account(message.to).await;
            let delivery = ServerEvent::Delivery {
                message: message.clone(),
                from_username: sender_username.to_string(),
            };
            self.fan_out(&delivery, &delivery_targets, &mut report).await;
        }

        self.stats.add(&report);
        debug!(
            message_id = %message.id,
            from = %message.from,
            to = %message.to,
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "routed message"
        );
        report
    }

    async fn fan_out(&self, event: &ServerEvent, targets: &[Target], report: &mut DeliveryReport) {
        if targets.is_empty() {
            return;
        }

        let payload = match serde_json::to_string(event) {
            Ok(json) => Arc::new(json),
            Err(error) => {
                let failure = TransportFailure::from(error);
                warn!(error = %failure, targets = targets.len(), "failed to serialize event");
                report.attempted += targets.len();
                report.failed += targets.len();
                return;
            }
        };

        for target in targets {
            let result = push_payload(target.connection_id, &target.outbound, Arc::clone(&payload));
            report.record(&result);
            match result {
                Ok(()) => {}
                Err(failure @ TransportFailure::Closed(_)) => {
                    warn!(
                        connection_id = %target.connection_id,
                        session = %target.session,
                        error = %failure,
                        "dropping stale connection"
                    );
                    self.registry.close(target.connection_id).await;
                }
                Err(failure) => {
                    warn!(
                        connection_id = %target.connection_id,
                        session = %target.session,
                        error = %failure,
                        "failed to push event"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
