//! Proposal topic generation.

use rand::RngCore;

use crate::Topic;

/// Source of fresh proposal topics.
///
/// Returning `None` means the source is exhausted.
pub trait TopicGenerator: Send + Sync {
    fn generate(&self) -> Option<Topic>;
}

/// 32 random bytes, hex encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTopicGenerator;

impl TopicGenerator for RandomTopicGenerator {
    fn generate(&self) -> Option<Topic> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Some(Topic::new(hex::encode(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_topics_are_distinct_hex() {
        let a = RandomTopicGenerator.generate().unwrap();
        let b = RandomTopicGenerator.generate().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().bytes().all(|c| c.is_ascii_hexdigit()));
    }
}
