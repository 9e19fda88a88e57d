//! Data type definitions.
//!
//! This module defines the scalar types a column (or an intermediate
//! operator output) can carry.

use core::fmt;

/// Supported scalar data types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    /// Boolean type (true/false)
    Boolean,
    /// 64-bit signed integer
    Integer,
    /// Decimal number, stored as a 64-bit float
    Decimal,
    /// UTF-8 text
    Text,
    /// Point in time stored as Unix timestamp (milliseconds)
    Timestamp,
}

impl DataType {
    /// Returns the SQL-ish display name of this type.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Decimal => "decimal",
            DataType::Text => "text",
            DataType::Timestamp => "timestamp",
        }
    }

    /// Returns whether arithmetic is defined on this type.
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Decimal)
    }

    /// Returns whether values of this type can be compared with values of `other`.
    ///
    /// Integer and decimal compare numerically; every other type only
    /// compares with itself.
    pub fn is_comparable_with(&self, other: DataType) -> bool {
        *self == other || (self.is_numeric() && other.is_numeric())
    }

    /// Returns the common type two comparable types are promoted to.
    pub fn common_type(&self, other: DataType) -> Option<DataType> {
        if *self == other {
            Some(*self)
        } else if self.is_numeric() && other.is_numeric() {
            Some(DataType::Decimal)
        } else {
            None
        }
    }

    /// Returns whether this type can be used as an index key.
    #[inline]
    pub fn is_indexable(&self) -> bool {
        true
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_types() {
        assert!(DataType::Integer.is_numeric());
        assert!(DataType::Decimal.is_numeric());
        assert!(!DataType::Text.is_numeric());
        assert!(!DataType::Timestamp.is_numeric());
    }

    #[test]
    fn test_comparable() {
        assert!(DataType::Integer.is_comparable_with(DataType::Decimal));
        assert!(DataType::Text.is_comparable_with(DataType::Text));
        assert!(!DataType::Text.is_comparable_with(DataType::Integer));
        assert!(!DataType::Boolean.is_comparable_with(DataType::Timestamp));
    }

    #[test]
    fn test_common_type() {
        assert_eq!(DataType::Integer.common_type(DataType::Integer), Some(DataType::Integer));
        assert_eq!(DataType::Integer.common_type(DataType::Decimal), Some(DataType::Decimal));
        assert_eq!(DataType::Text.common_type(DataType::Boolean), None);
    }
}
