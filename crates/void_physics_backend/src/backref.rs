//! Back-references from foreign objects to the engine wrappers around them
//!
//! Rapier hands back bare handles (in query hits, contact events, controller
//! collisions); these tables turn them into engine objects again. Entries are
//! weak and are invalidated by the wrapper's `Drop` before its foreign object
//! is released, so a lookup can never reach a destroyed wrapper.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Weak;

/// Side-table from a foreign key to the engine wrapper that owns it
pub struct BackRefTable<K, T> {
    entries: HashMap<K, Weak<T>>,
}

impl<K: Copy + Eq + Hash, T> BackRefTable<K, T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Point `key` back at `wrapper`, replacing any previous entry
    pub fn register(&mut self, key: K, wrapper: Weak<T>) {
        self.entries.insert(key, wrapper);
    }

    /// Weak reference registered for `key`.
    ///
    /// Callers upgrade after releasing whatever lock guards this table.
    pub fn resolve(&self, key: K) -> Option<Weak<T>> {
        self.entries.get(&key).cloned()
    }

    /// Drop the entry for `key`
    pub fn invalidate(&mut self, key: K) -> bool {
        self.entries.remove(&key).is_some()
    }

    /// Whether `key` currently has a back-reference
    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    /// Number of registered back-references
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Copy + Eq + Hash, T> Default for BackRefTable<K, T> {
    fn default() -> Self {
        Self::new()
    }
}
