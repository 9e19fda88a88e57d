//! Table definition for schemas.

use super::column::Column;
use super::index::{IndexDef, IndexType};
use crate::error::{Error, Result};
use crate::types::DataType;
use crate::value::Value;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// A table definition.
#[derive(Clone, Debug)]
pub struct Table {
    /// Table name.
    name: String,
    /// Column definitions.
    columns: Vec<Column>,
    /// Index definitions, primary key included.
    indices: Vec<IndexDef>,
    /// Name of the primary key index, if any.
    primary_key: Option<String>,
}

impl Table {
    /// Creates a new table with the given name and columns and no indices.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, c)| c.with_index(i))
            .collect();

        Self {
            name: name.into(),
            columns,
            indices: Vec::new(),
            primary_key: None,
        }
    }

    /// Returns the table name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the columns.
    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the indices.
    #[inline]
    pub fn indices(&self) -> &[IndexDef] {
        &self.indices
    }

    /// Gets a column by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    /// Gets a column position by name.
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Gets an index by name.
    pub fn get_index(&self, name: &str) -> Option<&IndexDef> {
        self.indices.iter().find(|i| i.name() == name)
    }

    /// Returns the primary key index if defined.
    pub fn primary_key(&self) -> Option<&IndexDef> {
        self.primary_key.as_deref().and_then(|pk| self.get_index(pk))
    }

    /// Adds an index definition after validating it against the columns.
    pub fn add_index(&mut self, index: IndexDef) -> Result<()> {
        if self.get_index(index.name()).is_some() {
            return Err(Error::invalid_schema(format!(
                "Index already exists: {}",
                index.name()
            )));
        }
        if index.columns().is_empty() {
            return Err(Error::invalid_schema("Index must cover at least one column"));
        }
        for col in index.columns() {
            if self.get_column(col).is_none() {
                return Err(Error::column_not_found(&self.name, col.as_str()));
            }
        }
        self.indices.push(index);
        Ok(())
    }

    /// Checks that `values` conform to the column schema.
    pub fn validate_row(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::ArityMismatch {
                expected: self.columns.len(),
                got: values.len(),
            });
        }
        for (col, value) in self.columns.iter().zip(values) {
            match value.data_type() {
                None if !col.is_nullable() => return Err(Error::null_constraint(col.name())),
                None => {}
                Some(dt) if dt == col.data_type() => {}
                // Integer literals are accepted for decimal columns
                Some(DataType::Integer) if col.data_type() == DataType::Decimal => {}
                Some(dt) => return Err(Error::type_mismatch(col.name(), col.data_type(), dt)),
            }
        }
        Ok(())
    }
}

/// Builder for creating table definitions.
pub struct TableBuilder {
    name: String,
    columns: Vec<Column>,
    indices: Vec<IndexDef>,
    pk_name: Option<String>,
}

impl TableBuilder {
    /// Creates a new table builder.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::check_naming_rules(&name)?;
        Ok(Self {
            name,
            columns: Vec::new(),
            indices: Vec::new(),
            pk_name: None,
        })
    }

    /// Validates a name follows naming rules.
    fn check_naming_rules(name: &str) -> Result<()> {
        let first = match name.chars().next() {
            Some(c) => c,
            None => return Err(Error::invalid_schema("Name cannot be empty")),
        };
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(Error::invalid_schema(format!(
                "Name must start with letter or underscore: {}",
                name
            )));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::invalid_schema(format!(
                "Name contains invalid characters: {}",
                name
            )));
        }
        Ok(())
    }

    /// Adds a non-nullable column to the table.
    pub fn add_column(mut self, name: impl Into<String>, data_type: DataType) -> Result<Self> {
        let name = name.into();
        Self::check_naming_rules(&name)?;
        if self.columns.iter().any(|c| c.name() == name) {
            return Err(Error::invalid_schema(format!(
                "Column already exists: {}",
                name
            )));
        }
        self.columns.push(Column::new(name, data_type));
        Ok(self)
    }

    /// Marks existing columns as nullable.
    pub fn add_nullable(mut self, columns: &[&str]) -> Self {
        for name in columns {
            if let Some(col) = self.columns.iter_mut().find(|c| c.name() == *name) {
                *col = col.clone().nullable(true);
            }
        }
        self
    }

    fn index_columns(&self, columns: &[&str]) -> Result<Vec<String>> {
        if columns.is_empty() {
            return Err(Error::invalid_schema("Index must cover at least one column"));
        }
        columns
            .iter()
            .map(|name| {
                if self.columns.iter().any(|c| c.name() == *name) {
                    Ok(name.to_string())
                } else {
                    Err(Error::invalid_schema(format!("Column not found: {}", name)))
                }
            })
            .collect()
    }

    /// Sets the primary key, backed by a unique ordered index named `pk_<table>`.
    pub fn add_primary_key(mut self, columns: &[&str]) -> Result<Self> {
        let cols = self.index_columns(columns)?;
        let pk_name = format!("pk_{}", self.name);
        for col in self.columns.iter_mut() {
            if cols.iter().any(|c| c == col.name()) {
                *col = col.clone().nullable(false);
            }
        }
        self.indices
            .push(IndexDef::new(&pk_name, &self.name, cols).unique(true));
        self.pk_name = Some(pk_name);
        Ok(self)
    }

    /// Adds an ordered index.
    pub fn add_index(self, name: impl Into<String>, columns: &[&str], unique: bool) -> Result<Self> {
        self.add_index_of_type(name, columns, unique, IndexType::Ordered)
    }

    /// Adds an equality-only hash index.
    pub fn add_hash_index(
        self,
        name: impl Into<String>,
        columns: &[&str],
        unique: bool,
    ) -> Result<Self> {
        self.add_index_of_type(name, columns, unique, IndexType::Hash)
    }

    fn add_index_of_type(
        mut self,
        name: impl Into<String>,
        columns: &[&str],
        unique: bool,
        index_type: IndexType,
    ) -> Result<Self> {
        let name = name.into();
        Self::check_naming_rules(&name)?;
        if self.indices.iter().any(|i| i.name() == name) {
            return Err(Error::invalid_schema(format!(
                "Index already exists: {}",
                name
            )));
        }
        let cols = self.index_columns(columns)?;
        let idx = IndexDef::new(name, &self.name, cols)
            .unique(unique)
            .index_type(index_type);
        self.indices.push(idx);
        Ok(self)
    }

    /// Builds the table definition.
    pub fn build(self) -> Result<Table> {
        if self.columns.is_empty() {
            return Err(Error::invalid_schema(format!(
                "Table {} has no columns",
                self.name
            )));
        }
        let mut table = Table::new(self.name, self.columns);
        table.indices = self.indices;
        table.primary_key = self.pk_name;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn products() -> Table {
        TableBuilder::new("products")
            .unwrap()
            .add_column("product_id", DataType::Integer)
            .unwrap()
            .add_column("name", DataType::Text)
            .unwrap()
            .add_column("price", DataType::Decimal)
            .unwrap()
            .add_column("manufacturer_id", DataType::Integer)
            .unwrap()
            .add_nullable(&["manufacturer_id"])
            .add_primary_key(&["product_id"])
            .unwrap()
            .add_index("idx_price", &["price"], false)
            .unwrap()
            .add_hash_index("idx_name", &["name"], true)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_table_builder() {
        let table = products();
        assert_eq!(table.name(), "products");
        assert_eq!(table.columns().len(), 4);
        assert_eq!(table.indices().len(), 3);
        assert_eq!(table.get_column_index("price"), Some(2));

        let pk = table.primary_key().unwrap();
        assert_eq!(pk.name(), "pk_products");
        assert!(pk.is_unique());
        assert_eq!(pk.columns(), &["product_id".to_string()]);
        assert_eq!(
            table.get_index("idx_name").unwrap().get_index_type(),
            IndexType::Hash
        );
    }

    #[test]
    fn test_invalid_names() {
        assert!(TableBuilder::new("").is_err());
        assert!(TableBuilder::new("t")
            .unwrap()
            .add_column("123invalid", DataType::Integer)
            .is_err());
        assert!(TableBuilder::new("t")
            .unwrap()
            .add_column("id", DataType::Integer)
            .unwrap()
            .add_column("id", DataType::Integer)
            .is_err());
        assert!(TableBuilder::new("t")
            .unwrap()
            .add_column("id", DataType::Integer)
            .unwrap()
            .add_index("idx_missing", &["nope"], false)
            .is_err());
    }

    #[test]
    fn test_validate_row() {
        let table = products();
        let ok = vec![
            Value::Integer(1),
            Value::Text("Wireless Mouse".into()),
            Value::Decimal(49.99),
            Value::Null,
        ];
        assert!(table.validate_row(&ok).is_ok());

        let int_price = vec![
            Value::Integer(1),
            Value::Text("x".into()),
            Value::Integer(50),
            Value::Integer(1),
        ];
        assert!(table.validate_row(&int_price).is_ok());

        let null_name = vec![Value::Integer(1), Value::Null, Value::Decimal(1.0), Value::Null];
        assert!(matches!(
            table.validate_row(&null_name),
            Err(Error::NullConstraint { .. })
        ));

        let bad_type = vec![
            Value::Integer(1),
            Value::Integer(7),
            Value::Decimal(1.0),
            Value::Null,
        ];
        assert!(matches!(
            table.validate_row(&bad_type),
            Err(Error::TypeMismatch { .. })
        ));

        assert!(matches!(
            table.validate_row(&[Value::Integer(1)]),
            Err(Error::ArityMismatch { expected: 4, got: 1 })
        ));
    }

    #[test]
    fn test_add_index_after_build() {
        let mut table = products();
        let idx = IndexDef::new("idx_mfg", "products", vec!["manufacturer_id".to_string()]);
        table.add_index(idx.clone()).unwrap();
        assert!(table.get_index("idx_mfg").is_some());
        assert!(table.add_index(idx).is_err());
    }
}
