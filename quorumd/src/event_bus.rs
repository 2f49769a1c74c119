//! Event bus for internal daemon communication.
//!
//! The event bus allows decoupled observation of:
//! - Consensus engine → emitted and refused intents, frozen-feed warnings
//! - Bracket controller → order events applied to the trading state
//! - Reconciler → consistency violations and lock releases
//!
//! Uses tokio broadcast channels for fan-out to multiple receivers.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use quorum_domain::{GroupId, TradingIntent};
use quorum_engine::StaticFeatureWarning;
use quorum_exec::{OrderEvent, RejectReason};

use crate::reconciler::ConsistencyViolation;

// =============================================================================
// Event Types
// =============================================================================

/// Events that flow through the daemon event bus.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Consensus produced an intent
    IntentEmitted(TradingIntent),

    /// Bracket group accepted by the gateway
    BracketSubmitted {
        group_id: GroupId,
        timestamp: DateTime<Utc>,
    },

    /// Intent refused by the controller
    IntentRejected {
        reason: RejectReason,
        timestamp: DateTime<Utc>,
    },

    /// Broker order event that changed the trading state
    OrderUpdate(OrderEvent),

    /// Feature feed looks frozen
    StaticFeatureWarning(StaticFeatureWarning),

    /// Reconciler corrected a drift
    ConsistencyViolation(ConsistencyViolation),

    /// Trading lock freed
    LockReleased { timestamp: DateTime<Utc> },

    /// Daemon is stopping; publishing it asks the main loop to stop
    Shutdown,
}

// =============================================================================
// Event Bus
// =============================================================================

/// Event bus for daemon-wide communication.
///
/// Multiple producers can send events, and multiple consumers can receive.
/// Uses broadcast channels for fan-out pattern.
pub struct EventBus {
    sender: broadcast::Sender<DaemonEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    ///
    /// Capacity determines how many events can be buffered before
    /// slow receivers start missing events (lagging).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event.
    pub fn send(&self, event: DaemonEvent) -> usize {
        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events sent after this call.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Receiver for daemon events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<DaemonEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the sender has been dropped.
    /// Returns error description if the receiver lagged (missed events).
    pub async fn recv(&mut self) -> Option<Result<DaemonEvent, String>> {
        match self.receiver.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<Result<DaemonEvent, String>> {
        match self.receiver.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(broadcast::error::TryRecvError::Empty) => None,
            Err(broadcast::error::TryRecvError::Closed) => None,
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                Some(Err(format!("Receiver lagged, missed {} events", count)))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_domain::{OrderStatus, Side};

    #[tokio::test]
    async fn test_event_bus_send_recv() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.send(DaemonEvent::IntentRejected {
            reason: RejectReason::CooldownActive,
            timestamp: Utc::now(),
        });

        match receiver.recv().await.unwrap().unwrap() {
            DaemonEvent::IntentRejected { reason, .. } => {
                assert_eq!(reason, RejectReason::CooldownActive);
            }
            other => panic!("Expected IntentRejected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_event_bus_multiple_receivers() {
        let bus = EventBus::new(10);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();

        assert_eq!(bus.receiver_count(), 2);

        bus.send(DaemonEvent::OrderUpdate(OrderEvent::terminal(
            "STUB-1",
            OrderStatus::Cancelled,
            Utc::now(),
        )));

        let event1 = receiver1.recv().await.unwrap().unwrap();
        let event2 = receiver2.recv().await.unwrap().unwrap();

        assert!(matches!(event1, DaemonEvent::OrderUpdate(_)));
        assert!(matches!(event2, DaemonEvent::OrderUpdate(_)));
    }

    #[tokio::test]
    async fn test_event_bus_no_receivers() {
        let bus = EventBus::new(10);

        let count = bus.send(DaemonEvent::Shutdown);
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_event_bus_violation() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.send(DaemonEvent::ConsistencyViolation(
            ConsistencyViolation::PhantomPosition {
                side: Side::Short,
                quantity: 2,
            },
        ));

        let event = receiver.recv().await.unwrap().unwrap();
        assert!(matches!(
            event,
            DaemonEvent::ConsistencyViolation(ConsistencyViolation::PhantomPosition { quantity: 2, .. })
        ));
    }

    #[test]
    fn test_lagged_receiver_reports_gap() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for _ in 0..4 {
            bus.send(DaemonEvent::Shutdown);
        }

        assert!(matches!(receiver.try_recv(), Some(Err(_))));
    }

    #[test]
    fn test_try_recv_empty() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        assert!(receiver.try_recv().is_none());
    }
}
