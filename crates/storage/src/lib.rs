//! Tern Storage - In-memory storage layer for the tern query engine.
//!
//! This crate provides the storage layer including:
//!
//! - `RowStore`: Row storage for one table with synchronously maintained indexes
//! - `Catalog`: Versioned, copy-on-write registry of tables and statistics
//! - `CatalogSnapshot`: Immutable view used by planning and execution
//! - `TableStatistics`: Row counts, distinct counts, null fractions and histograms
//!
//! # Example
//!
//! ```rust
//! use tern_core::schema::TableBuilder;
//! use tern_core::{DataType, Value};
//! use tern_index::KeyRange;
//! use tern_storage::Catalog;
//!
//! let mut catalog = Catalog::new();
//! let schema = TableBuilder::new("categories")
//!     .unwrap()
//!     .add_column("category_id", DataType::Integer)
//!     .unwrap()
//!     .add_column("name", DataType::Text)
//!     .unwrap()
//!     .add_primary_key(&["category_id"])
//!     .unwrap()
//!     .build()
//!     .unwrap();
//! catalog.register_table(schema).unwrap();
//! catalog
//!     .insert("categories", vec![Value::Integer(1), "Electronics".into()])
//!     .unwrap();
//! catalog.analyze("categories").unwrap();
//!
//! let snapshot = catalog.snapshot();
//! let ids = snapshot
//!     .lookup("categories", "pk_categories", &KeyRange::only(vec![Value::Integer(1)]))
//!     .unwrap();
//! assert_eq!(ids.count(), 1);
//! assert_eq!(snapshot.scan("categories").unwrap().count(), 1);
//! assert!(!snapshot.is_stale("categories"));
//! ```

pub mod catalog;
pub mod row_store;
pub mod statistics;

pub use catalog::{Catalog, CatalogSnapshot, IndexCursor, TableScan};
pub use row_store::{HashIndexStore, IndexKey, IndexStore, OrderedIndexStore, RowStore};
pub use statistics::{ColumnStatistics, Histogram, TableStatistics, DEFAULT_HISTOGRAM_BUCKETS};
