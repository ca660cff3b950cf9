//! In-memory last-value topic store.
//!
//! Holds at most one message per canonical (lower-cased) topic name. A `put`
//! only replaces the entry when the value differs, and reports whether it did;
//! callers persist and notify only on change.

use hrd_cluster::SnapshotSource;
use hrd_core::canonical_topic;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
pub struct TopicStore {
    topics: RwLock<BTreeMap<String, String>>,
}

impl TopicStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store from the durable log. Does not report changes.
    pub fn load(&self, entries: impl IntoIterator<Item = (String, String)>) -> usize {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        for (topic, message) in entries {
            topics.insert(canonical_topic(&topic), message);
        }
        debug!(target: "herald::topic", topics = topics.len(), "Topic store loaded");
        topics.len()
    }

    pub fn get(&self, topic: &str) -> Option<String> {
        let topic = canonical_topic(topic);
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .cloned()
    }

    /// Store `message` under `topic`. Returns true if the stored value changed.
    pub fn put(&self, topic: &str, message: &str) -> bool {
        let topic = canonical_topic(topic);
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);

        match topics.get(&topic) {
            Some(current) if current == message => false,
            _ => {
                topics.insert(topic, message.to_string());
                true
            },
        }
    }

    pub fn len(&self) -> usize {
        self.topics.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotSource for TopicStore {
    fn snapshot(&self) -> BTreeMap<String, String> {
        TopicStore::snapshot(self)
    }
}
