//! Tern Core - Core types and schema definitions for the tern query engine.
//!
//! This crate provides the foundational types shared by storage and query processing:
//!
//! - `DataType`: Supported scalar types (Integer, Decimal, Text, Boolean, Timestamp)
//! - `Value`: Runtime values, including the explicit null marker
//! - `Row`: A fixed-arity tuple of values with a row identifier
//! - `schema`: Schema definitions (Column, Table, IndexDef)
//! - `Error`: Error types for schema and storage operations
//!
//! # Example
//!
//! ```rust
//! use tern_core::{DataType, Value, Row};
//! use tern_core::schema::TableBuilder;
//!
//! let table = TableBuilder::new("products")
//!     .unwrap()
//!     .add_column("product_id", DataType::Integer)
//!     .unwrap()
//!     .add_column("name", DataType::Text)
//!     .unwrap()
//!     .add_primary_key(&["product_id"])
//!     .unwrap()
//!     .build()
//!     .unwrap();
//!
//! let row = Row::new(1, vec![
//!     Value::Integer(1),
//!     Value::Text("Wireless Mouse".into()),
//! ]);
//!
//! assert_eq!(table.columns().len(), row.len());
//! assert_eq!(row.get(1), Some(&Value::Text("Wireless Mouse".into())));
//! ```

#![no_std]

extern crate alloc;

mod error;
pub mod pattern_match;
mod row;
pub mod schema;
mod types;
mod value;

pub use error::{Error, Result};
pub use row::{Row, RowId, DUMMY_ROW_ID};
pub use types::DataType;
pub use value::Value;
