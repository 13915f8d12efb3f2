//! Event system for job progress tracking
//!
//! An in-process broadcast bus: the engine emits lifecycle events during a
//! broadcast and any number of subscribers (bot UI, API pushers, tests) can
//! watch without blocking the drivers. If nobody subscribes, events are
//! dropped immediately.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{GroupId, SessionId};

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer; lagging subscribers lose the
    /// oldest events, emitters never block.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // send() errs when no receivers exist; that is fine
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Events emitted while a job runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    JobStarted {
        job_id: String,
        post_id: String,
        total_groups: u64,
    },
    RoundStarted {
        job_id: String,
        round: u64,
    },
    RoundCompleted {
        job_id: String,
        round: u64,
        sent: u64,
    },
    GroupDelivered {
        job_id: String,
        session_id: SessionId,
        group_id: GroupId,
    },
    JobPaused {
        job_id: String,
    },
    JobResumed {
        job_id: String,
    },
    JobFinished {
        job_id: String,
        status: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit(Event::JobStarted {
            job_id: "j1".to_string(),
            post_id: "p1".to_string(),
            total_groups: 5,
        });

        match rx.recv().await.unwrap() {
            Event::JobStarted {
                job_id,
                total_groups,
                ..
            } => {
                assert_eq!(job_id, "j1");
                assert_eq!(total_groups, 5);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_does_not_block() {
        let bus = EventBus::new(10);
        bus.emit(Event::JobPaused {
            job_id: "j1".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_serialization() {
        let event = Event::RoundCompleted {
            job_id: "j1".to_string(),
            round: 2,
            sent: 17,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("round_completed"));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Event::RoundCompleted { sent: 17, .. }));
    }
}
