//! Typed lifecycle event fan-out.
//!
//! Components publish [`SwarmEvent`]s without blocking: the bus is a
//! bounded broadcast channel, slow subscribers lose the oldest events, and
//! publishing with no subscribers is a no-op.

use serde::Serialize;
use tokio::sync::broadcast;

/// Default channel capacity before lagging subscribers start losing events.
const DEFAULT_CAPACITY: usize = 256;

/// Lifecycle notifications emitted by the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    SessionCreated {
        session_id: String,
    },
    SessionStarted {
        session_id: String,
    },
    SessionPaused {
        session_id: String,
        reason: Option<String>,
    },
    SessionResumed {
        session_id: String,
        checkpoint_id: String,
    },
    SessionCompleted {
        session_id: String,
    },
    SessionFailed {
        session_id: String,
        reason: String,
    },
    TaskStarted {
        session_id: String,
        task_id: String,
        agent_id: String,
    },
    TaskCompleted {
        session_id: String,
        task_id: String,
    },
    TaskFailed {
        session_id: String,
        task_id: String,
        error: String,
    },
    TaskRework {
        session_id: String,
        task_id: String,
        retry_count: u32,
    },
    CheckpointCreated {
        session_id: String,
        checkpoint_id: String,
        trigger: String,
    },
    JudgeVerdict {
        session_id: String,
        task_id: String,
        passed: bool,
        score: f64,
    },
    ScaleUp {
        previous_count: usize,
        new_count: usize,
        reason: String,
    },
    ScaleDown {
        previous_count: usize,
        new_count: usize,
        reason: String,
    },
    AgentFailed {
        agent_id: String,
        error: String,
    },
    ExcessiveFailures {
        consecutive_failures: u32,
    },
    PoolShutdown,
}

/// Broadcast bus carrying [`SwarmEvent`]s to zero or more subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SwarmEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Never blocks; returns the number of subscribers
    /// that will observe it.
    pub fn publish(&self, event: SwarmEvent) -> usize {
        tracing::trace!(event = ?event, "Publishing swarm event");
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        assert_eq!(
            bus.publish(SwarmEvent::SessionCreated {
                session_id: "s1".to_string()
            }),
            0
        );
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SwarmEvent::TaskCompleted {
            session_id: "s1".to_string(),
            task_id: "t1".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SwarmEvent::TaskCompleted {
                session_id: "s1".to_string(),
                task_id: "t1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_lagging_subscriber_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for i in 0..4 {
            bus.publish(SwarmEvent::SessionCreated {
                session_id: format!("s{i}"),
            });
        }

        // The first recv reports the lag, subsequent recvs see the newest
        let result = rx.recv().await;
        assert!(matches!(
            result,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SwarmEvent::SessionCreated {
                session_id: "s2".to_string()
            }
        );
    }
}
