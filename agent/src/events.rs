//! Events emitted for UI and observability collaborators.
//!
//! Events are fanned out on a broadcast channel; a lagging or absent
//! subscriber never blocks the engine.

use serde::Serialize;
use tokio::sync::broadcast;

/// A sync lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    #[serde(rename_all = "camelCase")]
    SyncStarted {
        attempt_id: String,
        table: String,
        operation: String,
    },
    #[serde(rename_all = "camelCase")]
    SyncCompleted {
        attempt_id: String,
        table: String,
        operation: String,
    },
    #[serde(rename_all = "camelCase")]
    SyncFailed {
        attempt_id: String,
        table: String,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    RetryScheduled {
        table: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// User-facing, non-blocking notification.
    #[serde(rename_all = "camelCase")]
    Notice { table: String, message: String },
}

/// Broadcast sender for [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers reached.
    pub fn emit(&self, event: SyncEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        let sent = bus.emit(SyncEvent::Notice {
            table: "documents".into(),
            message: "sync failed".into(),
        });
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::SyncStarted {
            attempt_id: "a1".into(),
            table: "documents".into(),
            operation: "manual".into(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SyncEvent::SyncStarted { ref table, .. } if table == "documents"));
    }

    #[test]
    fn serialization_format() {
        let event = SyncEvent::SyncFailed {
            attempt_id: "a1".into(),
            table: "documents".into(),
            error: "sync task timed out".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sync_failed");
        assert_eq!(json["attemptId"], "a1");
        assert_eq!(json["error"], "sync task timed out");
    }
}
