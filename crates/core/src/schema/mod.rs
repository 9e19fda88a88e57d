//! Schema module for the tern query engine.
//!
//! This module contains the schema definitions: columns, tables and indices.

mod column;
mod index;
mod table;

pub use column::Column;
pub use index::{IndexDef, IndexType};
pub use table::{Table, TableBuilder};
