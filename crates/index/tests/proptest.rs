//! Property-based tests for tern-index using proptest.

use proptest::prelude::*;
use std::collections::BTreeSet;
use tern_core::Value;
use tern_index::{HashIndex, Index, KeyRange, OrderedIndex, RangeIndex};

fn composite_keys() -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec((0i64..8, -50i64..50), 1..120)
}

proptest! {
    /// Every range lookup returns exactly the keys a linear filter would,
    /// in ascending key order.
    #[test]
    fn ordered_range_matches_linear_filter(
        keys in prop::collection::vec(-1000i64..1000, 1..300),
        lower in -1200i64..1200,
        width in 0i64..800,
        lower_ex in any::<bool>(),
        upper_ex in any::<bool>(),
    ) {
        let mut index = OrderedIndex::new(false);
        for (i, &key) in keys.iter().enumerate() {
            index.add(key, i as u64).unwrap();
        }

        let range = KeyRange::bound(lower, lower + width, lower_ex, upper_ex);
        let got: Vec<u64> = index.get_range(&range, false, None);

        let mut expected: Vec<(i64, u64)> = keys
            .iter()
            .enumerate()
            .filter(|(_, k)| range.contains(k))
            .map(|(i, &k)| (k, i as u64))
            .collect();
        expected.sort();
        let expected: Vec<u64> = expected.into_iter().map(|(_, id)| id).collect();

        prop_assert_eq!(got, expected);
        prop_assert_eq!(index.cost(&range), index.get_range(&range, false, None).len());
    }

    /// A lookup on the leading column of a composite key returns every row
    /// whose first component matches.
    #[test]
    fn ordered_prefix_lookup(keys in composite_keys(), probe in 0i64..8) {
        let mut index: OrderedIndex<Vec<Value>> = OrderedIndex::new(false);
        for (i, &(a, b)) in keys.iter().enumerate() {
            index.add(vec![Value::Integer(a), Value::Integer(b)], i as u64).unwrap();
        }

        let got: BTreeSet<u64> = index
            .get_range(&KeyRange::only(vec![Value::Integer(probe)]), false, None)
            .into_iter()
            .collect();
        let expected: BTreeSet<u64> = keys
            .iter()
            .enumerate()
            .filter(|(_, (a, _))| *a == probe)
            .map(|(i, _)| i as u64)
            .collect();
        prop_assert_eq!(got, expected);
    }

    /// Unique indexes reject exactly the repeated keys.
    #[test]
    fn unique_constraint_holds(keys in prop::collection::vec(0i64..100, 10..80)) {
        let mut hash = HashIndex::new(true);
        let mut ordered = OrderedIndex::new(true);
        let mut seen = BTreeSet::new();

        for &key in &keys {
            let fresh = seen.insert(key);
            prop_assert_eq!(hash.add(key, key as u64).is_ok(), fresh);
            prop_assert_eq!(ordered.add(key, key as u64).is_ok(), fresh);
        }
        prop_assert_eq!(hash.stats().distinct_keys(), seen.len());
        prop_assert_eq!(ordered.stats().distinct_keys(), seen.len());
    }

    /// Removing every inserted entry leaves both index kinds empty.
    #[test]
    fn add_then_remove_all(keys in prop::collection::vec(-100i64..100, 1..150)) {
        let mut hash = HashIndex::new(false);
        let mut ordered = OrderedIndex::new(false);
        for (i, &key) in keys.iter().enumerate() {
            hash.add(key, i as u64).unwrap();
            ordered.add(key, i as u64).unwrap();
        }
        prop_assert_eq!(hash.len(), keys.len());
        prop_assert_eq!(ordered.len(), keys.len());

        for (i, &key) in keys.iter().enumerate() {
            prop_assert!(hash.remove(&key, i as u64));
            prop_assert!(ordered.remove(&key, i as u64));
        }
        prop_assert!(hash.is_empty());
        prop_assert!(ordered.is_empty());
        prop_assert_eq!(ordered.stats().distinct_keys(), 0);
        prop_assert!(ordered.min_key().is_none());
    }

    /// Intersecting two ranges accepts exactly the keys both accept.
    #[test]
    fn intersect_is_conjunction(
        a_lo in -50i64..50, a_w in 0i64..60, b_lo in -50i64..50, b_w in 0i64..60,
        flags in any::<(bool, bool, bool, bool)>(),
    ) {
        let a = KeyRange::bound(a_lo, a_lo + a_w, flags.0, flags.1);
        let b = KeyRange::bound(b_lo, b_lo + b_w, flags.2, flags.3);
        let both = a.intersect(&b);
        for key in -60i64..120 {
            prop_assert_eq!(both.contains(&key), a.contains(&key) && b.contains(&key));
        }
        if both.is_empty() {
            prop_assert!((-60i64..120).all(|k| !both.contains(&k)));
        }
    }
}
