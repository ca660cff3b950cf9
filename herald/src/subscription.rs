//! Subscription registry.
//!
//! Maps each canonical topic to the connections subscribed to it. A
//! subscriber is a handle onto its connection's outbound queue; delivery
//! never waits on the socket. Any subscriber whose queue is closed or full is
//! dropped from the topic on the spot.

use crate::topic::TopicStore;
use hrd_core::canonical_topic;
use hrd_network::Message;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

pub type ConnectionId = u64;

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: ConnectionId,
    pub sender: mpsc::Sender<Message>,
}

impl Subscriber {
    fn deliver(&self, message: Message) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(target: "herald::subscription", connection = self.id, "Subscriber queue full");
                false
            },
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` on `topic` and hand it the topic's current value
    /// (or the "no value yet" sentinel) as its first delivery.
    ///
    /// The current value is read while the registry is locked, so an update
    /// racing with this call is either in the initial value or notified
    /// afterwards. Returns false if the initial delivery failed, in which case
    /// nothing is registered.
    pub fn subscribe(&self, topic: &str, subscriber: Subscriber, store: &TopicStore) -> bool {
        let topic = canonical_topic(topic);
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);

        let initial = Message::Update {
            topic: topic.clone(),
            message: store.get(&topic),
        };
        if !subscriber.deliver(initial) {
            return false;
        }

        debug!(
            target: "herald::subscription",
            topic = %topic,
            connection = subscriber.id,
            "Subscriber added"
        );
        topics.entry(topic).or_default().push(subscriber);
        hrd_metrics::increment_subscriptions();
        true
    }

    /// Deliver `message` to every subscriber of `topic`, pruning the ones
    /// that cannot accept it. Returns the number of successful deliveries.
    pub fn notify(&self, topic: &str, message: &str) -> usize {
        let topic = canonical_topic(topic);
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(subscribers) = topics.get_mut(&topic) else {
            return 0;
        };

        let update = Message::Update {
            topic: topic.clone(),
            message: Some(message.to_string()),
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.deliver(update.clone()));
        let delivered = subscribers.len();
        let pruned = before - delivered;

        if subscribers.is_empty() {
            topics.remove(&topic);
        }

        hrd_metrics::increment_notifications_delivered(delivered as u64);
        if pruned > 0 {
            hrd_metrics::increment_subscribers_pruned(pruned as u64);
            debug!(target: "herald::subscription", topic = %topic, pruned, "Pruned dead subscribers");
        }

        delivered
    }

    /// Drop every subscription held by a closed connection.
    pub fn remove_connection(&self, id: ConnectionId) -> usize {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        topics.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });
        removed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topic = canonical_topic(topic);
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn subscriber(id: ConnectionId, depth: usize) -> (Subscriber, mpsc::Receiver<Message>) {
        let (sender, rx) = mpsc::channel(depth);
        (Subscriber { id, sender }, rx)
    }

    fn update(topic: &str, message: Option<&str>) -> Message {
        Message::Update {
            topic: topic.to_string(),
            message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_subscribe_to_empty_topic_gets_sentinel() {
        let registry = SubscriptionRegistry::new();
        let store = TopicStore::new();
        let (sub, mut rx) = subscriber(1, 8);

        assert!(registry.subscribe("AAPL", sub, &store));
        assert_eq!(rx.try_recv().unwrap(), update("aapl", None));
        assert_eq!(registry.subscriber_count("aapl"), 1);
    }

    #[test]
    fn test_subscribe_gets_current_value() {
        let registry = SubscriptionRegistry::new();
        let store = TopicStore::new();
        store.put("aapl", "101");
        let (sub, mut rx) = subscriber(1, 8);

        registry.subscribe("aapl", sub, &store);
        assert_eq!(rx.try_recv().unwrap(), update("aapl", Some("101")));
    }

    #[test]
    fn test_notify_reaches_every_subscriber_once() {
        let registry = SubscriptionRegistry::new();
        let store = TopicStore::new();
        let (a, mut rx_a) = subscriber(1, 8);
        let (b, mut rx_b) = subscriber(2, 8);
        registry.subscribe("news", a, &store);
        registry.subscribe("news", b, &store);
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        assert_eq!(registry.notify("NEWS", "hello"), 2);
        assert_eq!(rx_a.try_recv().unwrap(), update("news", Some("hello")));
        assert_eq!(rx_b.try_recv().unwrap(), update("news", Some("hello")));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_failed_delivery_prunes_subscriber() {
        let registry = SubscriptionRegistry::new();
        let store = TopicStore::new();
        let (alive, mut rx_alive) = subscriber(1, 8);
        let (dead, rx_dead) = subscriber(2, 8);
        registry.subscribe("news", alive, &store);
        registry.subscribe("news", dead, &store);
        drop(rx_dead);

        assert_eq!(registry.notify("news", "first"), 1);
        assert_eq!(registry.subscriber_count("news"), 1);

        assert_eq!(registry.notify("news", "second"), 1);
        rx_alive.try_recv().unwrap();
        assert_eq!(rx_alive.try_recv().unwrap(), update("news", Some("first")));
        assert_eq!(rx_alive.try_recv().unwrap(), update("news", Some("second")));
    }

    #[test]
    fn test_stalled_subscriber_is_pruned() {
        let registry = SubscriptionRegistry::new();
        let store = TopicStore::new();
        // Room for the initial update only.
        let (stalled, _rx) = subscriber(1, 1);
        registry.subscribe("news", stalled, &store);

        assert_eq!(registry.notify("news", "x"), 0);
        assert_eq!(registry.subscriber_count("news"), 0);
    }

    #[test]
    fn test_duplicate_subscriptions_duplicate_delivery() {
        let registry = SubscriptionRegistry::new();
        let store = TopicStore::new();
        let (sub, mut rx) = subscriber(1, 8);
        registry.subscribe("news", sub.clone(), &store);
        registry.subscribe("news", sub, &store);

        assert_eq!(registry.notify("news", "x"), 2);
        let received: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(received.len(), 4);
    }

    #[test]
    fn test_remove_connection() {
        let registry = SubscriptionRegistry::new();
        let store = TopicStore::new();
        let (sub, _rx) = subscriber(7, 8);
        let (other, _rx_other) = subscriber(8, 8);
        registry.subscribe("a", sub.clone(), &store);
        registry.subscribe("b", sub, &store);
        registry.subscribe("b", other, &store);

        assert_eq!(registry.remove_connection(7), 2);
        assert_eq!(registry.subscriber_count("a"), 0);
        assert_eq!(registry.subscriber_count("b"), 1);
    }
}
