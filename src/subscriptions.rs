//! Topic subscription registry.
//!
//! The set of topics a session should be subscribed to, independent of
//! transport connectivity: subscribing while disconnected only affects the
//! replay performed after the next successful connect. The live
//! subscribe/unsubscribe side effects belong to the session manager.

use std::collections::BTreeSet;

/// Mutable set of topic names surviving reconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    topics: BTreeSet<String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry from a default topic list.
    pub fn with_topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    /// Idempotent add. Returns `true` if the topic was newly inserted.
    pub fn subscribe(&mut self, topic: impl Into<String>) -> bool {
        self.topics.insert(topic.into())
    }

    /// Idempotent remove. Returns `true` if the topic was present.
    pub fn unsubscribe(&mut self, topic: &str) -> bool {
        self.topics.remove(topic)
    }

    /// Clear the set unconditionally.
    pub fn clear(&mut self) {
        self.topics.clear();
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Snapshot of the current members, for replay after a connect.
    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().cloned().collect()
    }
}
