//! Broadcast event bus for distributing `WorkflowEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers. Publishing with no active subscribers is a no-op.
//! The audit sink is modeled as one more best-effort subscriber of the same
//! bus rather than a privileged listener.

use loomwork_types::event::WorkflowEvent;
use tokio::sync::broadcast;

/// Multi-consumer event bus for workflow execution lifecycle events.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning the bus clones the
/// sender, allowing multiple producers and consumers.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    /// Access the underlying broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<WorkflowEvent> {
        &self.sender
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_event() -> WorkflowEvent {
        WorkflowEvent::ExecutionStarted {
            execution_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            trigger_event: "order.created".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(sample_event());

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, WorkflowEvent::ExecutionStarted { .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(sample_event());

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert!(matches!(e1, WorkflowEvent::ExecutionStarted { .. }));
        assert!(matches!(e2, WorkflowEvent::ExecutionStarted { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(sample_event());
        bus.publish(sample_event());
    }

    #[tokio::test]
    async fn lagged_receiver_handles_gracefully() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.publish(WorkflowEvent::StepStarted {
                execution_id: Uuid::now_v7(),
                step_id: format!("step-{i}"),
                step_type: "execute".to_string(),
            });
        }

        let result = rx.try_recv();
        match result {
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(sample_event());

        let result = rx.try_recv();
        assert!(result.is_ok());
    }

    #[test]
    fn debug_impl() {
        let bus = EventBus::new(16);
        let _rx = bus.subscribe();
        let debug = format!("{bus:?}");
        assert!(debug.contains("EventBus"));
        assert!(debug.contains("receiver_count"));
    }
}
