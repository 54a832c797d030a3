use heapless::{String, Vec};

pub const TOPIC_CAPACITY: usize = 10;
pub const TOPIC_LEN: usize = 20;

/// Fixed-capacity set of subscribed topic names.
#[derive(Debug, Default, Clone)]
pub struct TopicRegistry {
    topics: Vec<String<TOPIC_LEN>, TOPIC_CAPACITY>,
}

impl TopicRegistry {
    #[must_use]
    pub fn new() -> Self {
        TopicRegistry { topics: Vec::new() }
    }

    /// Returns `false` without changing the set if the topic is already present,
    /// longer than [`TOPIC_LEN`] bytes, or the registry is full.
    pub fn add(&mut self, topic: &str) -> bool {
        if self.contains(topic) {
            return false;
        }
        let mut name = String::new();
        if name.push_str(topic).is_err() {
            log::warn!("topic `{topic}` longer than {TOPIC_LEN} bytes, not recorded");
            return false;
        }
        if self.topics.push(name).is_err() {
            log::warn!("topic registry full, `{topic}` not recorded");
            return false;
        }
        true
    }

    pub fn remove(&mut self, topic: &str) -> bool {
        match self.topics.iter().position(|t| t.as_str() == topic) {
            Some(i) => {
                self.topics.swap_remove(i);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t.as_str() == topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|t| t.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove() {
        let mut topics = TopicRegistry::new();
        assert!(topics.add("led"));
        assert!(!topics.add("led"));
        assert!(topics.contains("led"));
        assert!(topics.remove("led"));
        assert!(!topics.remove("led"));
        assert!(topics.is_empty());
    }

    #[test]
    fn capacity_is_bounded() {
        let mut topics = TopicRegistry::new();
        for i in 0..TOPIC_CAPACITY {
            assert!(topics.add(&format!("t{i}")));
        }
        assert!(!topics.add("overflow"));
        assert_eq!(topics.len(), TOPIC_CAPACITY);
        assert!(!topics.contains("overflow"));
    }

    #[test]
    fn long_names_rejected() {
        let mut topics = TopicRegistry::new();
        assert!(topics.add("abcdefghijklmnopqrst"));
        assert!(!topics.add("abcdefghijklmnopqrstu"));
        assert_eq!(topics.iter().collect::<std::vec::Vec<_>>(), ["abcdefghijklmnopqrst"]);
    }
}
