//! Tern Index - Index implementations for the tern query engine.
//!
//! This crate provides the two index kinds the planner can choose from:
//!
//! - `HashIndex`: equality lookups on the full key
//! - `OrderedIndex`: equality and range lookups on any leading key prefix,
//!   returning row ids in key order
//!
//! # Example
//!
//! ```rust
//! use tern_index::{HashIndex, Index, KeyRange, OrderedIndex, RangeIndex};
//!
//! let mut ordered: OrderedIndex<i64> = OrderedIndex::new(true);
//! ordered.add(10, 100).unwrap();
//! ordered.add(20, 200).unwrap();
//! ordered.add(5, 50).unwrap();
//!
//! assert_eq!(ordered.get(&10), vec![100]);
//!
//! let range = KeyRange::lower_bound(10, false);
//! assert_eq!(ordered.get_range(&range, false, None), vec![100, 200]);
//!
//! let mut hash: HashIndex<i64> = HashIndex::new(true);
//! hash.add(10, 100).unwrap();
//! assert_eq!(hash.get(&10), vec![100]);
//! ```

#![no_std]

extern crate alloc;

pub mod hash;
pub mod ordered;
pub mod stats;
pub mod traits;

pub use hash::HashIndex;
pub use ordered::OrderedIndex;
pub use stats::IndexStats;
pub use traits::{Index, IndexError, IndexKey, KeyRange, RangeIndex};
