//! Domain events published while a session runs.
//!
//! Events are observational: nothing in the orchestrator reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A user message started a turn
    TurnStarted {
        session_id: String,
        agent: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// The completion service answered
    ResponseGenerated {
        session_id: String,
        model: String,
        messages: usize,
        tokens_used: Option<u32>,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed (or could not be)
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Control moved to another agent
    HandoffOccurred {
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    /// A termination rule stopped the loop
    TerminationTriggered {
        rule: String,
        timestamp: DateTime<Utc>,
    },

    /// The turn finished
    TurnCompleted {
        session_id: String,
        new_messages: usize,
        agent: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Short snake_case label, handy as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::TurnStarted { .. } => "turn_started",
            DomainEvent::ResponseGenerated { .. } => "response_generated",
            DomainEvent::ToolExecuted { .. } => "tool_executed",
            DomainEvent::HandoffOccurred { .. } => "handoff_occurred",
            DomainEvent::TerminationTriggered { .. } => "termination_triggered",
            DomainEvent::TurnCompleted { .. } => "turn_completed",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::TurnStarted { timestamp, .. }
            | DomainEvent::ResponseGenerated { timestamp, .. }
            | DomainEvent::ToolExecuted { timestamp, .. }
            | DomainEvent::HandoffOccurred { timestamp, .. }
            | DomainEvent::TerminationTriggered { timestamp, .. }
            | DomainEvent::TurnCompleted { timestamp, .. } => *timestamp,
        }
    }
}

/// Fan-out of [`DomainEvent`]s over `tokio::sync::broadcast`.
///
/// Slow subscribers lag and lose the oldest events; the orchestrator never
/// waits on them.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // Sending only fails when nobody listens.
        if self.sender.send(Arc::new(event)).is_err() {
            trace!("Domain event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_handoffs() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::HandoffOccurred {
            from: "triage".into(),
            to: "billing".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "handoff_occurred");
        let DomainEvent::HandoffOccurred { from, to, .. } = event.as_ref() else {
            panic!("Expected HandoffOccurred, got {event:?}");
        };
        assert_eq!((from.as_str(), to.as_str()), ("triage", "billing"));
    }

    #[test]
    fn publishing_without_listeners_is_fine() {
        let bus = EventBus::default();
        let at = Utc::now();
        let event = DomainEvent::TerminationTriggered {
            rule: "RepeatCheck(n=3)".into(),
            timestamp: at,
        };
        assert_eq!(event.timestamp(), at);
        bus.publish(event);

        // Late subscribers only see what comes after them.
        let mut rx = bus.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
