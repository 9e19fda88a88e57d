//! Ordered index implementation.
//!
//! Keys are kept in a `BTreeMap`, so lookups can use equality or range bounds
//! on any leading prefix of a composite key and results come back in key order.

use crate::stats::IndexStats;
use crate::traits::{Index, IndexError, IndexKey, KeyRange, RangeIndex};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ops::Bound;
use tern_core::RowId;

/// A range-capable index over ordered keys.
#[derive(Clone, Debug)]
pub struct OrderedIndex<K> {
    map: BTreeMap<K, Vec<RowId>>,
    unique: bool,
    stats: IndexStats,
}

impl<K: IndexKey> OrderedIndex<K> {
    /// Creates a new ordered index.
    pub fn new(unique: bool) -> Self {
        Self {
            map: BTreeMap::new(),
            unique,
            stats: IndexStats::new(),
        }
    }

    /// Returns whether this is a unique index.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Iterates `(key, row ids)` groups inside `range`, in ascending key order.
    fn scan<'a>(&'a self, range: &'a KeyRange<K>) -> impl Iterator<Item = (&'a K, &'a Vec<RowId>)> + 'a {
        // A bound sorts before every key it prefixes, so starting at the bound
        // itself covers exclusive lower bounds too; those are skipped below.
        let start = match range.lower() {
            Some((bound, _)) => Bound::Included(bound),
            None => Bound::Unbounded,
        };
        self.map
            .range((start, Bound::Unbounded))
            .skip_while(move |(k, _)| !range.above_lower(k))
            .take_while(move |(k, _)| range.below_upper(k))
    }
}

impl<K: IndexKey> Index<K> for OrderedIndex<K> {
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
        self.scan(range)
            .flat_map(|(k, ids)| ids.iter().map(move |&id| (k.clone(), id)))
            .collect()
    }

    fn cost(&self, range: &KeyRange<K>) -> usize {
        match range {
            KeyRange::All => self.stats.total_rows(),
            _ => self.scan(range).map(|(_, ids)| ids.len()).sum(),
        }
    }

    fn next_entry(
        &self,
        range: &KeyRange<K>,
        after: Option<(&K, usize)>,
    ) -> Option<(K, RowId, usize)> {
        let Some((key, offset)) = after else {
            let (key, ids) = self.scan(range).next()?;
            return ids.first().map(|&id| (key.clone(), id, 0));
        };
        if let Some(&id) = self.map.get(key).and_then(|ids| ids.get(offset + 1)) {
            return Some((key.clone(), id, offset + 1));
        }
        // Keys past one inside the range are above its lower bound too
        let (next, ids) = self
            .map
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()?;
        if !range.below_upper(next) {
            return None;
        }
        ids.first().map(|&id| (next.clone(), id, 0))
    }
}

impl<K: IndexKey> RangeIndex<K> for OrderedIndex<K> {
    fn get_range(&self, range: &KeyRange<K>, reverse: bool, limit: Option<usize>) -> Vec<RowId> {
        let limit = limit.unwrap_or(usize::MAX);
        if reverse {
            let mut all: Vec<RowId> = self.scan(range).flat_map(|(_, ids)| ids.iter().copied()).collect();
            all.reverse();
            all.truncate(limit);
            all
        } else {
            self.scan(range)
                .flat_map(|(_, ids)| ids.iter().copied())
                .take(limit)
                .collect()
        }
    }

    fn min_key(&self) -> Option<&K> {
        self.map.keys().next()
    }

    fn max_key(&self) -> Option<&K> {
        self.map.keys().next_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use tern_core::Value;

    fn prices() -> OrderedIndex<Vec<Value>> {
        let mut index = OrderedIndex::new(false);
        for (id, price) in [1299.99, 49.99, 159.99, 299.99, 79.99, 9.99, 49.99]
            .iter()
            .enumerate()
        {
            index.add(vec![Value::Decimal(*price)], id as RowId).unwrap();
        }
        index
    }

    #[test]
    fn test_range_in_key_order() {
        let index = prices();
        let range = KeyRange::bound(
            vec![Value::Decimal(40.0)],
            vec![Value::Integer(160)],
            false,
            true,
        );
        assert_eq!(index.get_range(&range, false, None), vec![1, 6, 4, 2]);
        assert_eq!(index.get_range(&range, true, Some(2)), vec![2, 4]);
        assert_eq!(index.cost(&range), 4);
    }

    #[test]
    fn test_next_entry_walks_range_lazily() {
        let index = prices();
        let range = KeyRange::bound(
            vec![Value::Decimal(40.0)],
            vec![Value::Integer(160)],
            false,
            true,
        );
        let mut walked = Vec::new();
        let mut position: Option<(Vec<Value>, usize)> = None;
        while let Some((key, id, offset)) =
            index.next_entry(&range, position.as_ref().map(|(k, o)| (k, *o)))
        {
            walked.push(id);
            position = Some((key, offset));
        }
        assert_eq!(walked, index.get_range(&range, false, None));
        assert_eq!(walked, vec![1, 6, 4, 2]);

        let empty = KeyRange::only(vec![Value::Decimal(1.0)]);
        assert_eq!(index.next_entry(&empty, None), None);
    }

    #[test]
    fn test_exclusive_lower_bound_skips_equal_keys() {
        let index = prices();
        let range = KeyRange::lower_bound(vec![Value::Decimal(49.99)], true);
        assert_eq!(index.get_range(&range, false, None), vec![4, 2, 3, 0]);
    }

    #[test]
    fn test_prefix_lookup_on_composite_key() {
        let mut index: OrderedIndex<Vec<Value>> = OrderedIndex::new(true);
        let rows = [(1, 1299.99), (1, 49.99), (3, 299.99), (3, 79.99), (5, 9.99)];
        for (id, (mfg, price)) in rows.iter().enumerate() {
            index
                .add(vec![Value::Integer(*mfg), Value::Decimal(*price)], id as RowId)
                .unwrap();
        }

        let eq = KeyRange::only(vec![Value::Integer(3)]);
        assert_eq!(index.get_range(&eq, false, None), vec![3, 2]);

        let mixed = KeyRange::bound(
            vec![Value::Integer(1), Value::Decimal(100.0)],
            vec![Value::Integer(1)],
            false,
            false,
        );
        let entries = index.entries(&mixed);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, 0);
        assert_eq!(entries[0].0[1], Value::Decimal(1299.99));

        let after = KeyRange::lower_bound(vec![Value::Integer(3)], true);
        assert_eq!(index.get_range(&after, false, None), vec![4]);
    }

    #[test]
    fn test_unique_and_remove() {
        let mut index: OrderedIndex<i64> = OrderedIndex::new(true);
        index.add(10, 1).unwrap();
        assert_eq!(index.add(10, 2), Err(IndexError::DuplicateKey));
        assert!(index.remove(&10, 1));
        assert!(index.is_empty());
        index.add(10, 2).unwrap();
        assert_eq!(index.get(&10), vec![2]);
    }

    #[test]
    fn test_min_max() {
        let index = prices();
        assert_eq!(index.min_key(), Some(&vec![Value::Decimal(9.99)]));
        assert_eq!(index.max_key(), Some(&vec![Value::Decimal(1299.99)]));
        assert_eq!(index.stats().distinct_keys(), 6);
        assert_eq!(index.len(), 7);
    }
}
