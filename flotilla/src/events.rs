use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::build::{BuildId, BuildStatus};

/// Metadata envelope attached to every dispatch event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub platform: String,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            version: 1,
            platform: platform.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Dispatch lifecycle event with metadata and payload.
#[derive(Clone, Debug)]
pub struct DispatchEvent {
    pub meta: EventMeta,
    pub payload: DispatchEventPayload,
}

/// Event payload emitted for worker-build lifecycle transitions.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum DispatchEventPayload {
    /// A worker build was created on a cluster.
    Launched { cluster: String, build_id: BuildId },
    /// One line of remote build log output.
    LogLine { build_id: BuildId, line: String },
    /// A worker build reached a terminal state.
    Finished {
        build_id: BuildId,
        status: BuildStatus,
    },
    /// A platform settled without a successful build.
    Failed { reason: String },
    /// A worker build received a cancellation request.
    Canceled { build_id: BuildId },
}

/// In-process event bus using a tokio broadcast channel.
///
/// Fan-out to all active subscribers; a subscriber that lags receives
/// `RecvError::Lagged` but never blocks the publisher. Events published
/// with no subscribers are dropped.
pub struct InProcEventBus {
    sender: broadcast::Sender<DispatchEvent>,
    capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    /// Publish an event to all subscribers. Non-blocking.
    pub fn publish(&self, event: DispatchEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to dispatch events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = InProcEventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let build_id = BuildId::new();
        bus.publish(DispatchEvent {
            meta: EventMeta::new("x86_64"),
            payload: DispatchEventPayload::Launched {
                cluster: "worker01".into(),
                build_id,
            },
        });

        for rx in [&mut rx1, &mut rx2] {
            let event = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("event within timeout")
                .expect("event received");
            assert_eq!(event.meta.platform, "x86_64");
            assert!(matches!(
                event.payload,
                DispatchEventPayload::Launched { build_id: id, .. } if id == build_id
            ));
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = InProcEventBus::new(4);
        // Must not error or block.
        bus.publish(DispatchEvent {
            meta: EventMeta::new("s390x"),
            payload: DispatchEventPayload::Failed {
                reason: "no cluster".into(),
            },
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
