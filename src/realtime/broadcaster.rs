use tokio::sync::broadcast;

use crate::realtime::events::PollEvent;
use crate::realtime::subscriptions::SubscriptionManager;

/// Fans every event out twice: once to the global channel that all live
/// connections read, and once to the members of the event's poll group.
/// Both paths are fire-and-forget so publishing never waits on a client.
#[derive(Clone)]
pub struct Broadcaster {
    global: broadcast::Sender<PollEvent>,
    subscriptions: SubscriptionManager,
}

impl Broadcaster {
    pub fn new(capacity: usize, subscriptions: SubscriptionManager) -> Self {
        let (global, _rx) = broadcast::channel(capacity.max(1));
        Self {
            global,
            subscriptions,
        }
    }

    pub fn publish(&self, event: PollEvent) {
        let poll_id = event.poll_id();
        let name = event.name();

        // Err only means nobody is listening right now
        let receivers = self.global.send(event.clone()).unwrap_or(0);
        self.subscriptions.deliver(event);

        debug!(poll_id = %poll_id, event = name, receivers, "published");
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<PollEvent> {
        self.global.subscribe()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn receiver_count(&self) -> usize {
        self.global.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn group_members_receive_on_both_paths() {
        let broadcaster = Broadcaster::new(16, SubscriptionManager::spawn(16));
        let mut global = broadcaster.subscribe_global();
        let (id, mut outbox) = broadcaster.subscriptions().connect();
        let poll_id = Uuid::new_v4();
        broadcaster.subscriptions().join(id, poll_id);

        broadcaster.publish(PollEvent::poll_deleted(poll_id));

        let from_global = global.recv().await.unwrap();
        let from_group = tokio::time::timeout(Duration::from_secs(1), outbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from_global, from_group);
        assert_eq!(from_global.name(), "pollDeleted");
    }

    #[tokio::test]
    async fn events_for_other_polls_skip_the_group() {
        let broadcaster = Broadcaster::new(16, SubscriptionManager::spawn(16));
        let mut global = broadcaster.subscribe_global();
        let (id, mut outbox) = broadcaster.subscriptions().connect();
        broadcaster.subscriptions().join(id, Uuid::new_v4());

        let other = Uuid::new_v4();
        broadcaster.publish(PollEvent::poll_deleted(other));

        assert_eq!(global.recv().await.unwrap().poll_id(), other);
        // a state round trip guarantees the delivery command was processed
        broadcaster.subscriptions().state(id).await;
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_listeners_is_not_an_error() {
        let broadcaster = Broadcaster::new(4, SubscriptionManager::spawn(4));
        assert_eq!(broadcaster.receiver_count(), 0);
        broadcaster.publish(PollEvent::poll_deleted(Uuid::new_v4()));
    }
}
