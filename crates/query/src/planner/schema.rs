//! Output schemas of plan nodes.

use core::fmt;

use tern_core::DataType;

use crate::ast::ColumnRef;
use crate::error::{QueryError, QueryResult};

/// Base-table column a field was read from, used to look up statistics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnOrigin {
    pub table: String,
    pub column: usize,
}

/// One output column of a plan node.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    /// Relation the column can be qualified with.
    pub relation: Option<String>,
    pub name: String,
    /// None when the column only ever holds null.
    pub data_type: Option<DataType>,
    pub nullable: bool,
    pub origin: Option<ColumnOrigin>,
}

impl Field {
    /// Creates a derived (non base-table) field.
    pub fn new(
        relation: Option<String>,
        name: impl Into<String>,
        data_type: Option<DataType>,
        nullable: bool,
    ) -> Self {
        Self {
            relation,
            name: name.into(),
            data_type,
            nullable,
            origin: None,
        }
    }

    /// Sets the base-table origin.
    pub fn with_origin(mut self, table: impl Into<String>, column: usize) -> Self {
        self.origin = Some(ColumnOrigin {
            table: table.into(),
            column,
        });
        self
    }

    fn matches(&self, column: &ColumnRef) -> bool {
        if self.name != column.name {
            return false;
        }
        match &column.relation {
            Some(relation) => self.relation.as_deref() == Some(relation.as_str()),
            None => true,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(r) => write!(f, "{}.{}", r, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Ordered list of output fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates a schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Returns the fields.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the field at `index`.
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolves a column reference to a field position.
    ///
    /// A qualified reference must match relation and name; an unqualified one
    /// must match exactly one field by name.
    pub fn resolve(&self, column: &ColumnRef) -> QueryResult<usize> {
        let mut found = None;
        for (i, field) in self.fields.iter().enumerate() {
            if field.matches(column) {
                if found.is_some() {
                    return Err(QueryError::ambiguous_column(&column.to_string()));
                }
                found = Some(i);
            }
        }
        found.ok_or_else(|| QueryError::unknown_column(&column.to_string()))
    }

    /// Like `resolve`, but None for both unknown and ambiguous references.
    pub fn try_resolve(&self, column: &ColumnRef) -> Option<usize> {
        self.resolve(column).ok()
    }

    /// Concatenates two schemas.
    pub fn join(&self, right: &Schema) -> Schema {
        let mut fields = self.fields.clone();
        fields.extend(right.fields.iter().cloned());
        Schema { fields }
    }

    /// Marks every field nullable, for the null-supplying side of an outer join.
    pub fn into_nullable(mut self) -> Schema {
        for field in &mut self.fields {
            field.nullable = true;
        }
        self
    }

    /// Replaces every field's relation.
    pub fn requalify(mut self, relation: Option<&str>) -> Schema {
        for field in &mut self.fields {
            field.relation = relation.map(str::to_string);
        }
        self
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new(Some("p".into()), "id", Some(DataType::Integer), false),
            Field::new(Some("m".into()), "id", Some(DataType::Integer), false),
            Field::new(Some("p".into()), "price", Some(DataType::Decimal), true),
        ])
    }

    #[test]
    fn test_resolve_qualified_and_unqualified() {
        let s = schema();
        assert_eq!(s.resolve(&ColumnRef::qualified("m", "id")).unwrap(), 1);
        assert_eq!(s.resolve(&ColumnRef::new("price")).unwrap(), 2);
    }

    #[test]
    fn test_resolve_errors() {
        let s = schema();
        assert!(matches!(s.resolve(&ColumnRef::new("id")), Err(QueryError::Schema(_))));
        assert!(matches!(
            s.resolve(&ColumnRef::qualified("x", "price")),
            Err(QueryError::Schema(_))
        ));
        assert_eq!(s.try_resolve(&ColumnRef::new("id")), None);
    }

    #[test]
    fn test_requalify_and_nullable() {
        let s = schema().requalify(Some("t")).into_nullable();
        assert!(s.fields().iter().all(|f| f.nullable));
        assert_eq!(s.to_string(), "t.id, t.id, t.price");
    }
}
