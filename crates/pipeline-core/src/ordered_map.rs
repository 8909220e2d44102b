//! A small insertion-ordered map: iteration order follows insertion
//! order, not key order.
//!
//! Grounded on the original's reliance on an ordered `std::map` for
//! `Signal::callbacks` (`original_source/src/lib_signals/core/
//! signal.hpp`) and a name-keyed filter table in `graph_builder.cpp`;
//! used here for the pipeline's filter table (iteration order used by
//! `Pipeline::dump()` and topology computation) and would be reused by
//! a graph loader that wants deterministic module iteration.

use std::collections::HashMap;
use std::hash::Hash;

pub struct OrderedMap<K, V> {
    index: HashMap<K, usize>,
    entries: Vec<(K, V)>,
}

impl<K, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value for `key`, preserving its original
    /// position on replace (matches `std::map::operator[]` semantics).
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(&idx) = self.index.get(&key) {
            self.entries[idx].1 = value;
        } else {
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&idx| &self.entries[idx].1)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes `key`, preserving the relative order of the rest.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        let (_, value) = self.entries.remove(idx);
        for (_, pos) in self.index.iter_mut() {
            if *pos > idx {
                *pos -= 1;
            }
        }
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(K, V)> {
        self.entries.iter()
    }
}
