//! Index trait definitions.
//!
//! This module defines the key-range type used for lookups, the `IndexKey`
//! trait that makes ranges prefix-aware, and the `Index` / `RangeIndex` traits
//! that every index implementation satisfies.

use crate::stats::IndexStats;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use tern_core::{RowId, Value};

/// A key that can be stored in an index.
///
/// `cmp_bound` compares a stored key with a range bound. For scalar keys it is
/// plain `Ord`; composite keys compare only as many components as the bound
/// carries, so a bound on a leading prefix selects every key that extends it.
pub trait IndexKey: Ord + Clone {
    /// Compares this key with a (possibly shorter) bound.
    fn cmp_bound(&self, bound: &Self) -> Ordering {
        self.cmp(bound)
    }

    /// Returns true if the key contains a null component. Unique indexes
    /// accept any number of keys with nulls.
    fn has_null(&self) -> bool {
        false
    }
}

macro_rules! scalar_index_key {
    ($($t:ty),*) => {
        $(impl IndexKey for $t {})*
    };
}

scalar_index_key!(i32, i64, u32, u64, String, &str);

impl IndexKey for Value {
    fn has_null(&self) -> bool {
        self.is_null()
    }
}

impl<T: IndexKey> IndexKey for Vec<T> {
    fn cmp_bound(&self, bound: &Self) -> Ordering {
        for (k, b) in self.iter().zip(bound.iter()) {
            match k.cmp_bound(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        if self.len() < bound.len() {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }

    fn has_null(&self) -> bool {
        self.iter().any(IndexKey::has_null)
    }
}

/// A key range for index queries.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyRange<K> {
    /// All keys
    All,
    /// A single key (equality)
    Only(K),
    /// Keys >= lower bound
    LowerBound { value: K, exclusive: bool },
    /// Keys <= upper bound
    UpperBound { value: K, exclusive: bool },
    /// Keys between lower and upper bounds
    Bound {
        lower: K,
        upper: K,
        lower_exclusive: bool,
        upper_exclusive: bool,
    },
}

impl<K: IndexKey> KeyRange<K> {
    /// Creates a range for all keys.
    pub fn all() -> Self {
        KeyRange::All
    }

    /// Creates a range for a single key.
    pub fn only(key: K) -> Self {
        KeyRange::Only(key)
    }

    /// Creates a range with a lower bound.
    pub fn lower_bound(value: K, exclusive: bool) -> Self {
        KeyRange::LowerBound { value, exclusive }
    }

    /// Creates a range with an upper bound.
    pub fn upper_bound(value: K, exclusive: bool) -> Self {
        KeyRange::UpperBound { value, exclusive }
    }

    /// Creates a range with both bounds.
    pub fn bound(lower: K, upper: K, lower_exclusive: bool, upper_exclusive: bool) -> Self {
        KeyRange::Bound {
            lower,
            upper,
            lower_exclusive,
            upper_exclusive,
        }
    }

    /// Returns true if this range represents a single value (equality).
    pub fn is_only(&self) -> bool {
        matches!(self, KeyRange::Only(_))
    }

    /// Returns true if this range represents all values (unbounded).
    pub fn is_all(&self) -> bool {
        matches!(self, KeyRange::All)
    }

    /// Returns the lower bound as `(value, exclusive)`.
    pub fn lower(&self) -> Option<(&K, bool)> {
        match self {
            KeyRange::Only(k) => Some((k, false)),
            KeyRange::LowerBound { value, exclusive } => Some((value, *exclusive)),
            KeyRange::Bound {
                lower,
                lower_exclusive,
                ..
            } => Some((lower, *lower_exclusive)),
            KeyRange::All | KeyRange::UpperBound { .. } => None,
        }
    }

    /// Returns the upper bound as `(value, exclusive)`.
    pub fn upper(&self) -> Option<(&K, bool)> {
        match self {
            KeyRange::Only(k) => Some((k, false)),
            KeyRange::UpperBound { value, exclusive } => Some((value, *exclusive)),
            KeyRange::Bound {
                upper,
                upper_exclusive,
                ..
            } => Some((upper, *upper_exclusive)),
            KeyRange::All | KeyRange::LowerBound { .. } => None,
        }
    }

    fn from_bounds(lower: Option<(K, bool)>, upper: Option<(K, bool)>) -> Self {
        match (lower, upper) {
            (None, None) => KeyRange::All,
            (Some((value, exclusive)), None) => KeyRange::LowerBound { value, exclusive },
            (None, Some((value, exclusive))) => KeyRange::UpperBound { value, exclusive },
            (Some((l, le)), Some((u, ue))) => {
                if !le && !ue && l.cmp_bound(&u) == Ordering::Equal && u.cmp_bound(&l) == Ordering::Equal {
                    KeyRange::Only(l)
                } else {
                    KeyRange::bound(l, u, le, ue)
                }
            }
        }
    }

    /// Returns true if the key satisfies the lower bound.
    pub fn above_lower(&self, key: &K) -> bool {
        match self.lower() {
            None => true,
            Some((bound, exclusive)) => match key.cmp_bound(bound) {
                Ordering::Greater => true,
                Ordering::Equal => !exclusive,
                Ordering::Less => false,
            },
        }
    }

    /// Returns true if the key satisfies the upper bound.
    pub fn below_upper(&self, key: &K) -> bool {
        match self.upper() {
            None => true,
            Some((bound, exclusive)) => match key.cmp_bound(bound) {
                Ordering::Less => true,
                Ordering::Equal => !exclusive,
                Ordering::Greater => false,
            },
        }
    }

    /// Checks if a key is within this range.
    pub fn contains(&self, key: &K) -> bool {
        self.above_lower(key) && self.below_upper(key)
    }

    /// Returns the intersection of two ranges over keys of the same width.
    pub fn intersect(&self, other: &KeyRange<K>) -> KeyRange<K> {
        let lower = tighter(self.lower(), other.lower(), Ordering::Greater);
        let upper = tighter(self.upper(), other.upper(), Ordering::Less);
        Self::from_bounds(lower, upper)
    }

    /// Returns true if no key can satisfy the range.
    pub fn is_empty(&self) -> bool {
        match (self.lower(), self.upper()) {
            (Some((l, le)), Some((u, ue))) => match l.cmp_bound(u) {
                Ordering::Greater => true,
                // a longer lower bound under an equal prefix is still satisfiable
                Ordering::Equal => (le || ue) && u.cmp_bound(l) == Ordering::Equal,
                Ordering::Less => false,
            },
            _ => false,
        }
    }
}

/// Picks the more restrictive of two bounds. `prefer` is the ordering that
/// makes a bound value tighter (Greater for lower bounds, Less for upper).
fn tighter<K: IndexKey>(
    a: Option<(&K, bool)>,
    b: Option<(&K, bool)>,
    prefer: Ordering,
) -> Option<(K, bool)> {
    match (a, b) {
        (None, None) => None,
        (Some((v, e)), None) | (None, Some((v, e))) => Some((v.clone(), e)),
        (Some((va, ea)), Some((vb, eb))) => {
            let ord = va.cmp(vb);
            if ord == prefer {
                Some((va.clone(), ea))
            } else if ord == Ordering::Equal {
                Some((va.clone(), ea || eb))
            } else {
                Some((vb.clone(), eb))
            }
        }
    }
}

/// Core trait for all index implementations.
pub trait Index<K> {
    /// Adds a key/row pair to the index.
    /// For unique indexes, this fails if a non-null key already exists.
    fn add(&mut self, key: K, row_id: RowId) -> Result<(), IndexError>;

    /// Gets all row IDs associated with a key.
    fn get(&self, key: &K) -> Vec<RowId>;

    /// Removes one key/row pair. Returns true if it was present.
    fn remove(&mut self, key: &K, row_id: RowId) -> bool;

    /// Checks if the index contains the given key.
    fn contains_key(&self, key: &K) -> bool;

    /// Returns the number of key/row entries in the index.
    fn len(&self) -> usize;

    /// Returns true if the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all entries from the index.
    fn clear(&mut self);

    /// Returns the statistics for this index.
    fn stats(&self) -> &IndexStats;

    /// Returns the matching `(key, row_id)` entries for a range. Hash indexes
    /// answer `All` and `Only` only; other ranges yield nothing.
    fn entries(&self, range: &KeyRange<K>) -> Vec<(K, RowId)>;

    /// Returns the estimated number of rows a range lookup produces.
    fn cost(&self, range: &KeyRange<K>) -> usize;

    /// Steps through `range` one entry at a time. A position is a key plus
    /// the offset of a row id under that key; `after = None` starts at the
    /// first entry. Returns the next entry with its position, or `None` once
    /// the range is exhausted. Positions stay valid while the index is not
    /// mutated.
    fn next_entry(
        &self,
        range: &KeyRange<K>,
        after: Option<(&K, usize)>,
    ) -> Option<(K, RowId, usize)>;
}

/// Trait for indexes that support range queries.
pub trait RangeIndex<K>: Index<K> {
    /// Gets all row IDs within the given key range, in key order.
    fn get_range(&self, range: &KeyRange<K>, reverse: bool, limit: Option<usize>) -> Vec<RowId>;

    /// Returns the smallest key.
    fn min_key(&self) -> Option<&K>;

    /// Returns the largest key.
    fn max_key(&self) -> Option<&K>;
}

/// Error type for index operations.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexError {
    /// Attempted to insert a duplicate key in a unique index.
    DuplicateKey,
    /// Key not found.
    KeyNotFound,
}

impl core::fmt::Display for IndexError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IndexError::DuplicateKey => write!(f, "Duplicate key in unique index"),
            IndexError::KeyNotFound => write!(f, "Key not found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_key_range_all() {
        let range: KeyRange<i32> = KeyRange::all();
        assert!(range.contains(&-100));
        assert!(range.contains(&100));
    }

    #[test]
    fn test_key_range_bounds() {
        let range = KeyRange::lower_bound(5, true);
        assert!(!range.contains(&5));
        assert!(range.contains(&6));

        let range = KeyRange::upper_bound(5, false);
        assert!(range.contains(&5));
        assert!(!range.contains(&6));

        let range = KeyRange::bound(3, 7, false, true);
        assert!(range.contains(&3));
        assert!(!range.contains(&7));
        assert!(!range.contains(&2));
    }

    #[test]
    fn test_key_range_contains_string() {
        let range = KeyRange::bound("B", "D", false, false);
        assert!(!range.contains(&"A"));
        assert!(range.contains(&"C"));
        assert!(range.contains(&"D"));
        assert!(!range.contains(&"E"));
    }

    #[test]
    fn test_prefix_bounds_on_composite_keys() {
        let only = KeyRange::only(vec![1i64]);
        assert!(only.contains(&vec![1, 5]));
        assert!(only.contains(&vec![1, -3]));
        assert!(!only.contains(&vec![2, 0]));

        // (a = 1 AND b > 4) on an (a, b) index
        let range = KeyRange::bound(vec![1i64, 4], vec![1], true, false);
        assert!(range.contains(&vec![1, 5]));
        assert!(!range.contains(&vec![1, 4]));
        assert!(!range.contains(&vec![2, 9]));

        let lower = KeyRange::lower_bound(vec![1i64], true);
        assert!(!lower.contains(&vec![1, 100]));
        assert!(lower.contains(&vec![2, 0]));
    }

    #[test]
    fn test_intersect() {
        let a = KeyRange::lower_bound(10, false);
        let b = KeyRange::upper_bound(100, true);
        assert_eq!(a.intersect(&b), KeyRange::bound(10, 100, false, true));

        let a = KeyRange::lower_bound(10, false);
        let b = KeyRange::lower_bound(20, true);
        assert_eq!(a.intersect(&b), KeyRange::lower_bound(20, true));

        let a = KeyRange::bound(1, 5, false, false);
        let b = KeyRange::bound(5, 9, false, false);
        assert_eq!(a.intersect(&b), KeyRange::only(5));

        let a = KeyRange::upper_bound(3, false);
        let b = KeyRange::lower_bound(4, false);
        assert!(a.intersect(&b).is_empty());
        assert!(!KeyRange::<i32>::all().intersect(&KeyRange::all()).is_empty());
    }

    #[test]
    fn test_key_range_empty() {
        assert!(KeyRange::bound(10, 5, false, false).is_empty());
        assert!(KeyRange::bound(5, 5, true, false).is_empty());
        assert!(!KeyRange::only(5).is_empty());
    }

    #[test]
    fn test_null_keys() {
        assert!(Value::Null.has_null());
        assert!(vec![Value::Integer(1), Value::Null].has_null());
        assert!(!vec![Value::Integer(1)].has_null());
        assert!(!5i64.has_null());
    }

    #[test]
    fn test_is_only_is_all() {
        assert!(KeyRange::only(20).is_only());
        assert!(!KeyRange::lower_bound(20, false).is_only());
        assert!(KeyRange::<i32>::all().is_all());
        assert!(!KeyRange::only(20).is_all());
    }
}
