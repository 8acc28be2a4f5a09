//! Bounded read-through cache used in front of the sled trees.
//!
//! Least-recently-used eviction. Every entry carries the tick of its last
//! read or write; `recency` maps ticks back to keys so the oldest entry is
//! found in `O(log n)`.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::hash::Hash;

struct Inner<K, V> {
    entries: IndexMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn touch(&mut self, key: &K) -> Option<&V> {
        let next = self.tick;
        let (_, stamp) = self.entries.get_mut(key)?;
        let previous = std::mem::replace(stamp, next);
        self.tick += 1;
        self.recency.remove(&previous);
        self.recency.insert(next, key.clone());
        self.entries.get(key).map(|(v, _)| v)
    }
}

pub struct Cache<K, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: IndexMap::with_capacity(capacity),
                recency: BTreeMap::new(),
                tick: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A hit makes the entry the most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().touch(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some((slot, _)) = inner.entries.get_mut(&key) {
            *slot = value;
            inner.touch(&key);
            return;
        }
        if inner.entries.len() >= self.capacity {
            if let Some((_, oldest)) = inner.recency.pop_first() {
                inner.entries.swap_remove(&oldest);
            }
        }
        let tick = inner.tick;
        inner.tick += 1;
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(key, (value, tick));
    }

    /// Keep only the entries whose key satisfies `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        let mut inner = self.inner.lock();
        inner.entries.retain(|k, _| keep(k));
        let Inner {
            entries, recency, ..
        } = &mut *inner;
        recency.retain(|_, k| entries.contains_key(k));
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
