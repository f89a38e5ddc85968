//! Module implement an LRU cache with a write-back dirty set.
//!
//! The cache grows until a configured abstract size is reached and then
//! discards the least recently used entry on each insertion. Entries
//! can be marked dirty; a discarded dirty entry is handed back to the
//! caller as spill, which must write it out before carrying on. A
//! minimum item count overrides the size limit so that a handful of
//! oversized entries cannot thrash the cache.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash as StdHash;

/// LRU cache with explicit dirty tracking. `K` is the lookup key, `V`
/// the cached value; every entry carries a caller-supplied abstract
/// size.
pub struct Lru<K, V> {
    max_size: usize,
    min_items: usize,
    curr_size: usize,
    tick: u64,
    entries: HashMap<K, Entry<V>>,
    recency: BTreeMap<u64, K>,
    dirty: BTreeSet<K>,
}

struct Entry<V> {
    value: V,
    size: usize,
    tick: u64,
}

impl<K, V> Lru<K, V>
where
    K: Clone + Ord + StdHash,
    V: Clone,
{
    pub fn new(max_size: usize, min_items: usize) -> Lru<K, V> {
        Lru {
            max_size,
            min_items,
            curr_size: 0,
            tick: 0,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size(&self) -> usize {
        self.curr_size
    }

    pub fn exists(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Fetch a value, refreshing its recency.
    pub fn fetch(&mut self, key: &K) -> Option<V> {
        self.touch(key);
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Refresh an entry's recency without fetching it.
    pub fn touch(&mut self, key: &K) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    /// Insert a clean entry. Return evicted dirty entries; the caller
    /// must write them out.
    pub fn insert_clean(&mut self, key: K, value: V, size: usize) -> Vec<(K, V)> {
        self.insert(key, value, size, false)
    }

    /// Insert a dirty entry, to be written out on flush or eviction.
    /// Return evicted dirty entries; the caller must write them out.
    pub fn insert_dirty(&mut self, key: K, value: V, size: usize) -> Vec<(K, V)> {
        self.insert(key, value, size, true)
    }

    fn insert(&mut self, key: K, value: V, size: usize, dirty: bool) -> Vec<(K, V)> {
        self.remove(&key);
        self.tick += 1;
        let entry = Entry { value, size, tick: self.tick };
        self.recency.insert(self.tick, key.clone());
        self.entries.insert(key.clone(), entry);
        self.curr_size += size;
        if dirty {
            self.dirty.insert(key);
        }

        let mut spill = vec![];
        while self.curr_size > self.max_size && self.entries.len() > self.min_items {
            let oldest = match self.recency.keys().next() {
                Some(tick) => *tick,
                None => break,
            };
            let victim = self.recency.remove(&oldest).unwrap();
            let entry = self.entries.remove(&victim).unwrap();
            self.curr_size -= entry.size;
            if self.dirty.remove(&victim) {
                spill.push((victim, entry.value));
            }
        }
        spill
    }

    /// Drop an entry no matter its state; dirty contents are lost.
    pub fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.tick);
            self.curr_size -= entry.size;
            self.dirty.remove(key);
        }
    }

    pub fn is_dirty(&self, key: &K) -> bool {
        self.dirty.contains(key)
    }

    pub fn all_clean(&self) -> bool {
        self.dirty.is_empty()
    }

    pub fn mark_clean(&mut self, key: &K) {
        self.dirty.remove(key);
    }

    /// Take the dirty set for writing out; every entry is marked clean.
    pub fn take_dirty(&mut self) -> Vec<(K, V)> {
        let keys: Vec<K> = self.dirty.iter().cloned().collect();
        self.dirty.clear();
        keys.into_iter()
            .filter_map(|k| self.entries.get(&k).map(|e| (k.clone(), e.value.clone())))
            .collect()
    }

    /// Drop dirty entries without writing them out, used on rollback.
    pub fn drop_dirty(&mut self) {
        let keys: Vec<K> = self.dirty.iter().cloned().collect();
        for key in keys.iter() {
            self.remove(key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.dirty.clear();
        self.curr_size = 0;
    }
}

#[cfg(test)]
#[path = "lru_test.rs"]
mod lru_test;
