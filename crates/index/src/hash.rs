//! Hash index implementation.
//!
//! This module provides a hash-based index for O(1) equality lookups on the
//! full key. It cannot answer range predicates or key prefixes.

use crate::stats::IndexStats;
use crate::traits::{Index, IndexError, IndexKey, KeyRange};
use alloc::vec::Vec;
use core::hash::Hash;
use hashbrown::HashMap;
use tern_core::RowId;

/// A hash-based index for equality lookups.
///
/// Supports both unique and non-unique keys. Row ids under one key keep their
/// insertion order.
#[derive(Clone, Debug)]
pub struct HashIndex<K> {
    /// The underlying map from keys to row IDs.
    map: HashMap<K, Vec<RowId>>,
    /// Whether this is a unique index.
    unique: bool,
    /// Statistics for this index.
    stats: IndexStats,
}

impl<K: IndexKey + Hash> HashIndex<K> {
    /// Creates a new hash index.
    pub fn new(unique: bool) -> Self {
        Self {
            map: HashMap::new(),
            unique,
            stats: IndexStats::new(),
        }
    }

    /// Returns whether this is a unique index.
    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

impl<K: IndexKey + Hash> Index<K> for HashIndex<K> {
    fn add(&mut self, key: K, row_id: RowId) -> Result<(), IndexError> {
        if self.unique && !key.has_null() && self.map.contains_key(&key) {
            return Err(IndexError::DuplicateKey);
        }

        let new_key = !self.map.contains_key(&key);
        self.map.entry(key).or_default().push(row_id);
        self.stats.on_add(new_key);
        Ok(())
    }

    fn get(&self, key: &K) -> Vec<RowId> {
        self.map.get(key).cloned().unwrap_or_default()
    }

    fn remove(&mut self, key: &K, row_id: RowId) -> bool {
        let Some(ids) = self.map.get_mut(key) else {
            return false;
        };
        let Some(pos) = ids.iter().position(|&id| id == row_id) else {
            return false;
        };
        ids.remove(pos);
        let key_gone = ids.is_empty();
        if key_gone {
            self.map.remove(key);
        }
        self.stats.on_remove(key_gone);
        true
    }

    fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    fn len(&self) -> usize {
        self.stats.total_rows()
    }

    fn clear(&mut self) {
        self.map.clear();
        self.stats.clear();
    }

    fn stats(&self) -> &IndexStats {
        &self.stats
    }

    fn entries(&self, range: &KeyRange<K>) -> Vec<(K, RowId)> {
        match range {
            KeyRange::Only(key) => self
                .get(key)
                .into_iter()
                .map(|id| (key.clone(), id))
                .collect(),
            KeyRange::All => {
                // Sorted so callers see a deterministic order
                let mut all: Vec<(K, RowId)> = self
                    .map
                    .iter()
                    .flat_map(|(k, ids)| ids.iter().map(move |&id| (k.clone(), id)))
                    .collect();
                all.sort();
                all
            }
            _ => Vec::new(),
        }
    }

    fn cost(&self, range: &KeyRange<K>) -> usize {
        match range {
            KeyRange::Only(key) => self.map.get(key).map(|v| v.len()).unwrap_or(0),
            _ => self.stats.total_rows(),
        }
    }

    fn next_entry(
        &self,
        range: &KeyRange<K>,
        after: Option<(&K, usize)>,
    ) -> Option<(K, RowId, usize)> {
        match range {
            KeyRange::Only(key) => {
                let offset = after.map_or(0, |(_, o)| o + 1);
                let id = self.map.get(key)?.get(offset)?;
                Some((key.clone(), *id, offset))
            }
            KeyRange::All => {
                if let Some((key, offset)) = after {
                    if let Some(&id) = self.map.get(key).and_then(|ids| ids.get(offset + 1)) {
                        return Some((key.clone(), id, offset + 1));
                    }
                }
                // No stored order to resume from: one pass per key for the
                // smallest key past the current one.
                let (key, ids) = self
                    .map
                    .iter()
                    .filter(|(k, _)| after.map_or(true, |(a, _)| *k > a))
                    .min_by(|a, b| a.0.cmp(b.0))?;
                ids.first().map(|&id| (key.clone(), id, 0))
            }
            _ => None,
        }
    }
}
