use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::PublicationEvent;

/// In-process bus carrying committed publication events, backed by `tokio::broadcast`.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<PublicationEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of receivers. An event published with no
    /// subscriber is dropped and logged at debug level.
    pub fn publish(&self, event: PublicationEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!(
                    page_id = %event.page_id,
                    action = event.action.as_str(),
                    "No subscribers for publication event"
                );
                0
            }
        }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PublicationEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::audit::types::{PublicationAction, PublicationSource};

    fn event(action: PublicationAction) -> PublicationEvent {
        PublicationEvent {
            site_id: Uuid::new_v4(),
            page_id: Uuid::new_v4(),
            revision_id: None,
            actor_id: None,
            action,
            source: PublicationSource::Manual,
            metadata: json!({}),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(event(PublicationAction::Publish)), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.action, PublicationAction::Publish);
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(event(PublicationAction::Unpublish));

        assert_eq!(rx1.recv().await.unwrap().action, PublicationAction::Unpublish);
        assert_eq!(rx2.recv().await.unwrap().action, PublicationAction::Unpublish);
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(event(PublicationAction::Schedule)), 0);
    }
}
