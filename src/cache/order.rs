//! Insertion Order Module
//!
//! Tracks the order keys were first written so capacity eviction can drop the
//! oldest-inserted entry.

use std::collections::VecDeque;

// == Insertion Order ==
/// Keys in first-insertion order.
///
/// - Front = oldest insert
/// - Back = newest insert
///
/// Re-recording a key that is already tracked keeps its original position.
#[derive(Debug, Default)]
pub struct InsertionOrder {
    order: VecDeque<String>,
}

impl InsertionOrder {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Record ==
    /// Appends a key unless it is already tracked.
    pub fn record(&mut self, key: &str) {
        if !self.contains(key) {
            self.order.push_back(key.to_string());
        }
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        self.order.retain(|k| k != key);
    }

    // == Evict Oldest ==
    /// Returns and removes the oldest-inserted key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        self.order.pop_front()
    }

    pub fn retain(&mut self, keep: impl FnMut(&String) -> bool) {
        self.order.retain(keep);
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.order.iter().any(|k| k == key)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_new() {
        let mut order = InsertionOrder::new();
        assert!(!order.contains("a"));
        assert_eq!(order.evict_oldest(), None);
    }

    #[test]
    fn test_record_keeps_first_insert_position() {
        let mut order = InsertionOrder::new();

        order.record("a");
        order.record("b");
        order.record("c");
        order.record("a");

        assert_eq!(order.evict_oldest(), Some("a".to_string()));
        assert_eq!(order.evict_oldest(), Some("b".to_string()));
        assert_eq!(order.evict_oldest(), Some("c".to_string()));
        assert_eq!(order.evict_oldest(), None);
    }

    #[test]
    fn test_evict_oldest_in_insert_order() {
        let mut order = InsertionOrder::new();

        order.record("a");
        order.record("b");
        order.record("c");

        assert_eq!(order.evict_oldest(), Some("a".to_string()));
        assert_eq!(order.evict_oldest(), Some("b".to_string()));
        assert_eq!(order.evict_oldest(), Some("c".to_string()));
        assert_eq!(order.evict_oldest(), None);
    }

    #[test]
    fn test_remove_then_record_moves_to_back() {
        let mut order = InsertionOrder::new();

        order.record("a");
        order.record("b");
        order.remove("a");
        order.record("a");

        assert_eq!(order.evict_oldest(), Some("b".to_string()));
        assert_eq!(order.evict_oldest(), Some("a".to_string()));
    }

    #[test]
    fn test_remove_nonexistent_key() {
        let mut order = InsertionOrder::new();

        order.record("key1");
        order.remove("nonexistent");

        assert!(order.contains("key1"));
        assert_eq!(order.evict_oldest(), Some("key1".to_string()));
        assert_eq!(order.evict_oldest(), None);
    }
}
