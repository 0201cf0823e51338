//! Bounded least-recently-used cache.
//!
//! Recency is tracked explicitly (most recent at the back of `order`) instead of
//! relying on map iteration order. Capacities here are small (tens of
//! entries), so the linear `retain` on touch stays cheap.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    /// Most recently used key at the back.
    order: VecDeque<K>,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Looks up `key`, marking it as most recently used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.entries.contains_key(key) {
            self.hits += 1;
            self.touch(key);
            self.entries.get(key)
        } else {
            self.misses += 1;
            None
        }
    }

    /// Inserts or replaces `key`, evicting the least recently used entries
    /// while over capacity. Returns the evicted keys.
    pub fn insert(&mut self, key: K, value: V) -> Vec<K> {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return Vec::new();
        }
        self.order.push_back(key);
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                    evicted.push(oldest);
                }
                None => break,
            }
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, key: &K) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::LruCache;

    #[test]
    fn evicts_least_recently_used_entry() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(&1));
        let evicted = cache.insert("c", 3);
        assert_eq!(evicted, vec!["b"]);
        assert!(cache.contains_key(&"a"));
        assert!(cache.contains_key(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn replacing_a_key_does_not_grow_the_cache() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("a", 5);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(&5));
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut cache = LruCache::new(3);
        for i in 0..50 {
            cache.insert(i, i * 2);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.get(&49), Some(&98));
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }
}
