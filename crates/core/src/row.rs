//! Row structure for the tern query engine.
//!
//! This module defines the `Row` struct which represents a single tuple, either
//! stored in a table or produced by an operator.

use crate::value::Value;
use alloc::vec::Vec;

/// Unique identifier for a row within its table.
pub type RowId = u64;

/// A dummy row ID used for rows that don't correspond to a stored tuple
/// (e.g., the result of joining two rows).
pub const DUMMY_ROW_ID: RowId = u64::MAX;

/// A fixed-arity tuple of values.
#[derive(Clone, Debug)]
pub struct Row {
    /// Identifier assigned by the owning table, or `DUMMY_ROW_ID`.
    id: RowId,
    /// Values stored in this row, indexed by column position.
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row with the given ID and values.
    pub fn new(id: RowId, values: Vec<Value>) -> Self {
        Self { id, values }
    }

    /// Creates a dummy row (for join results, projections, etc.).
    pub fn dummy(values: Vec<Value>) -> Self {
        Self::new(DUMMY_ROW_ID, values)
    }

    /// Returns the row ID.
    #[inline]
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Returns a reference to the values.
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row and returns its values.
    #[inline]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Gets a value at the given column index.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Sets a value at the given column index.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        if index < self.values.len() {
            self.values[index] = value;
            true
        } else {
            false
        }
    }

    /// Returns the number of values in this row.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns true if this is a dummy row.
    #[inline]
    pub fn is_dummy(&self) -> bool {
        self.id == DUMMY_ROW_ID
    }

    /// Concatenates two rows into a dummy row, left values first.
    pub fn concat(left: &Row, right: &Row) -> Row {
        let mut values = Vec::with_capacity(left.len() + right.len());
        values.extend_from_slice(left.values());
        values.extend_from_slice(right.values());
        Row::dummy(values)
    }

    /// Concatenates `left` with `width` nulls (outer join padding).
    pub fn pad_right(left: &Row, width: usize) -> Row {
        let mut values = Vec::with_capacity(left.len() + width);
        values.extend_from_slice(left.values());
        values.resize(left.len() + width, Value::Null);
        Row::dummy(values)
    }

    /// Concatenates `width` nulls with `right` (outer join padding).
    pub fn pad_left(width: usize, right: &Row) -> Row {
        let mut values = Vec::with_capacity(width + right.len());
        values.resize(width, Value::Null);
        values.extend_from_slice(right.values());
        Row::dummy(values)
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_row_new() {
        let row = Row::new(1, vec![Value::Integer(42), Value::Text("Alice".into())]);
        assert_eq!(row.id(), 1);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(1), Some(&Value::Text("Alice".into())));
        assert_eq!(row.get(2), None);
    }

    #[test]
    fn test_row_set_value() {
        let mut row = Row::new(1, vec![Value::Integer(1)]);
        assert!(row.set(0, Value::Integer(100)));
        assert_eq!(row.get(0), Some(&Value::Integer(100)));
        assert!(!row.set(10, Value::Integer(999)));
    }

    #[test]
    fn test_row_dummy() {
        let row = Row::dummy(vec![Value::Integer(1)]);
        assert!(row.is_dummy());
        assert_eq!(row.id(), DUMMY_ROW_ID);
    }

    #[test]
    fn test_concat_and_padding() {
        let left = Row::new(1, vec![Value::Integer(1), Value::Text("a".into())]);
        let right = Row::new(2, vec![Value::Decimal(2.5)]);

        let joined = Row::concat(&left, &right);
        assert!(joined.is_dummy());
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.get(2), Some(&Value::Decimal(2.5)));

        let padded = Row::pad_right(&left, 2);
        assert_eq!(padded.values()[2..], [Value::Null, Value::Null]);

        let padded = Row::pad_left(2, &right);
        assert_eq!(padded.values(), &[Value::Null, Value::Null, Value::Decimal(2.5)]);
    }
}
