//! Deterministic topic generation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Topic, TopicGenerator};

/// Hands out `{prefix}-0001`, `{prefix}-0002`, ...
///
/// With a limit, `generate` returns `None` once the limit is reached. Two
/// generators with the same prefix produce colliding topics, which is how
/// tests exercise the uniqueness guard.
pub struct SequentialTopicGenerator {
    prefix: String,
    next: AtomicU64,
    limit: Option<u64>,
}

impl SequentialTopicGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Topic the `n`th call (1-based) produces.
    pub fn topic(&self, n: u64) -> Topic {
        Topic::new(format!("{}-{:04}", self.prefix, n))
    }
}

impl TopicGenerator for SequentialTopicGenerator {
    fn generate(&self) -> Option<Topic> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        match self.limit {
            Some(limit) if n > limit => None,
            _ => Some(self.topic(n)),
        }
    }
}

/// Always returns the same topic.
pub struct FixedTopicGenerator(pub Topic);

impl TopicGenerator for FixedTopicGenerator {
    fn generate(&self) -> Option<Topic> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_topics_respect_limit() {
        let gen = SequentialTopicGenerator::new("p").with_limit(2);
        assert_eq!(gen.generate(), Some(Topic::new("p-0001")));
        assert_eq!(gen.generate(), Some(Topic::new("p-0002")));
        assert_eq!(gen.generate(), None);
    }
}
