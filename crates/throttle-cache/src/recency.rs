use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;

/// A bounded list of keys, ordered from most to least recently used.
///
/// Backed by a hash map over an intrusive doubly-linked list, so every operation is O(1).
pub struct Recency<K> {
    keys: LruCache<K, ()>,
}

impl<K: Hash + Eq> Recency<K> {
    /// Creates an empty list holding at most `capacity` keys, but at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            keys: LruCache::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.keys.cap().get()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// Moves `key` to the front of the list, inserting it if it is not yet present.
    ///
    /// Inserting into a full list first drops the least recently used key, which is returned so
    /// that the caller can release whatever belongs to it.
    pub fn touch(&mut self, key: K) -> Option<K> {
        if self.contains(&key) {
            self.keys.promote(&key);
            return None;
        }
        let evicted = if self.keys.len() == self.capacity() {
            self.keys.pop_lru().map(|(key, ())| key)
        } else {
            None
        };
        self.keys.put(key, ());
        evicted
    }

    pub fn remove(&mut self, key: &K) -> bool {
        self.keys.pop(key).is_some()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Iterates the keys from most to least recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter().map(|(key, ())| key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(recency: &Recency<&'static str>) -> Vec<&'static str> {
        recency.keys().copied().collect()
    }

    #[test]
    fn test_touch_order() {
        let mut recency = Recency::new(3);
        assert_eq!(recency.touch("a"), None);
        assert_eq!(recency.touch("b"), None);
        assert_eq!(recency.touch("c"), None);
        assert_eq!(order(&recency), ["c", "b", "a"]);

        assert_eq!(recency.touch("a"), None);
        assert_eq!(order(&recency), ["a", "c", "b"]);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut recency = Recency::new(2);
        recency.touch("a");
        recency.touch("b");
        recency.touch("a");

        assert_eq!(recency.touch("c"), Some("b"));
        assert_eq!(order(&recency), ["c", "a"]);
        assert_eq!(recency.len(), 2);
    }

    #[test]
    fn test_touching_present_key_at_capacity() {
        let mut recency = Recency::new(2);
        recency.touch("a");
        recency.touch("b");

        assert_eq!(recency.touch("a"), None);
        assert_eq!(recency.touch("b"), None);
        assert_eq!(order(&recency), ["b", "a"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut recency = Recency::new(3);
        recency.touch("a");
        recency.touch("b");

        assert!(recency.remove(&"a"));
        assert!(!recency.remove(&"a"));
        assert!(!recency.contains(&"a"));
        assert_eq!(order(&recency), ["b"]);

        recency.clear();
        assert_eq!(recency.len(), 0);
    }

    #[test]
    fn test_zero_capacity() {
        let mut recency = Recency::new(0);
        assert_eq!(recency.capacity(), 1);

        recency.touch("a");
        assert_eq!(recency.touch("b"), Some("a"));
        assert_eq!(order(&recency), ["b"]);
    }
}
