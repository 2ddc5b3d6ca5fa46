//! Request-scoped deduplication cache
//!
//! A bounded map with first-in first-out eviction. Callers construct one per
//! request (or transaction) and pass it down by `&mut`, so nothing outlives
//! the unit of work that filled it.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Bounded FIFO cache keyed by natural idempotency keys
#[derive(Debug, Clone)]
pub struct DedupCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> DedupCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces; evicts the oldest key once full
    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl<K, V> Default for DedupCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_first() {
        let mut cache = DedupCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("c", 3);

        assert!(!cache.contains(&"a"));
        assert_eq!(cache.get(&"b"), Some(&2));
        assert_eq!(cache.get(&"c"), Some(&3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replacing_does_not_refresh_position() {
        let mut cache = DedupCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        cache.insert("c", 3);

        assert!(!cache.contains(&"a"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut cache = DedupCache::new(0);
        cache.insert(1, ());
        cache.insert(2, ());
        assert_eq!(cache.capacity(), 1);
        assert!(cache.contains(&2));
        assert!(!cache.contains(&1));
    }
}
