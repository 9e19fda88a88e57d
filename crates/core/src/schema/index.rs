//! Index definition for table schemas.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

/// Index kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    /// Hash index - equality lookups on the full key only.
    Hash,
    /// Ordered index - equality and range lookups on any leading key prefix.
    Ordered,
}

impl IndexType {
    /// Returns true if the index can answer range predicates.
    #[inline]
    pub fn supports_range(&self) -> bool {
        matches!(self, IndexType::Ordered)
    }
}

/// An index definition in a table schema.
#[derive(Clone, Debug)]
pub struct IndexDef {
    /// Index name.
    name: String,
    /// Table name this index belongs to.
    table_name: String,
    /// Indexed column names, in key order.
    columns: Vec<String>,
    /// Whether this index enforces uniqueness.
    unique: bool,
    /// Index type.
    index_type: IndexType,
}

impl IndexDef {
    /// Creates a new ordered, non-unique index definition.
    pub fn new(name: impl Into<String>, table_name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            columns,
            unique: false,
            index_type: IndexType::Ordered,
        }
    }

    /// Sets whether this index is unique.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Sets the index type.
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Returns the index name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the table name.
    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Returns the normalized name (table.index).
    pub fn normalized_name(&self) -> String {
        format!("{}.{}", self.table_name, self.name)
    }

    /// Returns the indexed column names.
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the position of `column` within the key, if indexed.
    pub fn key_position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Returns whether this index is unique.
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns the index type.
    #[inline]
    pub fn get_index_type(&self) -> IndexType {
        self.index_type
    }
}

impl PartialEq for IndexDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.table_name == other.table_name
    }
}
