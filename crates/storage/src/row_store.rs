//! Row storage for a single table.
//!
//! `RowStore` owns the rows of one table plus every index defined on it, and
//! keeps the two consistent on each mutation: a mutation either updates the
//! rows and every affected index, or fails and leaves all of them untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use tern_core::schema::{IndexDef, IndexType, Table};
use tern_core::{DataType, Error, Result, Row, RowId, Value};
use tern_index::{HashIndex, Index, IndexError, IndexStats, KeyRange, OrderedIndex, RangeIndex};

/// Composite index key: the indexed column values in key order.
pub type IndexKey = Vec<Value>;

/// Object-safe view over the index kinds a table can hold.
pub trait IndexStore: Send + Sync {
    /// Adds a key/row pair.
    fn add(&mut self, key: IndexKey, row_id: RowId) -> std::result::Result<(), IndexError>;
    /// Removes a key/row pair. Returns true if it was present.
    fn remove(&mut self, key: &IndexKey, row_id: RowId) -> bool;
    /// Checks if the index contains a key.
    fn contains_key(&self, key: &IndexKey) -> bool;
    /// Returns whether this is a unique index.
    fn is_unique(&self) -> bool;
    /// Returns the index kind.
    fn kind(&self) -> IndexType;
    /// Row ids whose key falls in `range`. Ordered stores return key order.
    fn lookup(&self, range: &KeyRange<IndexKey>) -> Vec<RowId>;
    /// `(key, row_id)` pairs whose key falls in `range`.
    fn entries(&self, range: &KeyRange<IndexKey>) -> Vec<(IndexKey, RowId)>;
    /// The entry after position `after` in `range`, in the order of
    /// `entries`. See `Index::next_entry`.
    fn next_entry(
        &self,
        range: &KeyRange<IndexKey>,
        after: Option<(&IndexKey, usize)>,
    ) -> Option<(IndexKey, RowId, usize)>;
    /// Returns the maintained statistics.
    fn stats(&self) -> &IndexStats;
    /// Clears all entries.
    fn clear(&mut self);
    /// Clones the store behind a fresh box.
    fn clone_box(&self) -> Box<dyn IndexStore>;
}

impl Clone for Box<dyn IndexStore> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for dyn IndexStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexStore")
            .field("kind", &self.kind())
            .field("unique", &self.is_unique())
            .field("entries", &self.stats().total_rows())
            .finish()
    }
}

/// Wrapper for `OrderedIndex` that implements `IndexStore`.
#[derive(Clone)]
pub struct OrderedIndexStore {
    inner: OrderedIndex<IndexKey>,
}

impl OrderedIndexStore {
    /// Creates a new ordered index store.
    pub fn new(unique: bool) -> Self {
        Self {
            inner: OrderedIndex::new(unique),
        }
    }
}

impl IndexStore for OrderedIndexStore {
    fn add(&mut self, key: IndexKey, row_id: RowId) -> std::result::Result<(), IndexError> {
        self.inner.add(key, row_id)
    }

    fn remove(&mut self, key: &IndexKey, row_id: RowId) -> bool {
        self.inner.remove(key, row_id)
    }

    fn contains_key(&self, key: &IndexKey) -> bool {
        self.inner.contains_key(key)
    }

    fn is_unique(&self) -> bool {
        self.inner.is_unique()
    }

    fn kind(&self) -> IndexType {
        IndexType::Ordered
    }

    fn lookup(&self, range: &KeyRange<IndexKey>) -> Vec<RowId> {
        self.inner.get_range(range, false, None)
    }

    fn entries(&self, range: &KeyRange<IndexKey>) -> Vec<(IndexKey, RowId)> {
        self.inner.entries(range)
    }

    fn next_entry(
        &self,
        range: &KeyRange<IndexKey>,
        after: Option<(&IndexKey, usize)>,
    ) -> Option<(IndexKey, RowId, usize)> {
        self.inner.next_entry(range, after)
    }

    fn stats(&self) -> &IndexStats {
        self.inner.stats()
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn clone_box(&self) -> Box<dyn IndexStore> {
        Box::new(self.clone())
    }
}

/// Wrapper for `HashIndex` that implements `IndexStore`.
#[derive(Clone)]
pub struct HashIndexStore {
    inner: HashIndex<IndexKey>,
    width: usize,
}

impl HashIndexStore {
    /// Creates a new hash index store over keys of `width` columns.
    pub fn new(unique: bool, width: usize) -> Self {
        Self {
            inner: HashIndex::new(unique),
            width,
        }
    }
}

impl IndexStore for HashIndexStore {
    fn add(&mut self, key: IndexKey, row_id: RowId) -> std::result::Result<(), IndexError> {
        self.inner.add(key, row_id)
    }

    fn remove(&mut self, key: &IndexKey, row_id: RowId) -> bool {
        self.inner.remove(key, row_id)
    }

    fn contains_key(&self, key: &IndexKey) -> bool {
        self.inner.contains_key(key)
    }

    fn is_unique(&self) -> bool {
        self.inner.is_unique()
    }

    fn kind(&self) -> IndexType {
        IndexType::Hash
    }

    fn lookup(&self, range: &KeyRange<IndexKey>) -> Vec<RowId> {
        match range {
            KeyRange::Only(key) if key.len() == self.width => self.inner.get(key),
            _ => self.entries(range).into_iter().map(|(_, id)| id).collect(),
        }
    }

    fn entries(&self, range: &KeyRange<IndexKey>) -> Vec<(IndexKey, RowId)> {
        match range {
            KeyRange::Only(key) if key.len() == self.width => self.inner.entries(range),
            // Anything else degrades to a filtered full pass
            _ => self
                .inner
                .entries(&KeyRange::All)
                .into_iter()
                .filter(|(k, _)| range.contains(k))
                .collect(),
        }
    }

    fn next_entry(
        &self,
        range: &KeyRange<IndexKey>,
        after: Option<(&IndexKey, usize)>,
    ) -> Option<(IndexKey, RowId, usize)> {
        match range {
            KeyRange::Only(key) if key.len() == self.width => self.inner.next_entry(range, after),
            _ => {
                let mut after = after.map(|(k, o)| (k.clone(), o));
                loop {
                    let (key, id, offset) = self
                        .inner
                        .next_entry(&KeyRange::All, after.as_ref().map(|(k, o)| (k, *o)))?;
                    if range.contains(&key) {
                        return Some((key, id, offset));
                    }
                    after = Some((key, offset));
                }
            }
        }
    }

    fn stats(&self) -> &IndexStats {
        self.inner.stats()
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn clone_box(&self) -> Box<dyn IndexStore> {
        Box::new(self.clone())
    }
}

/// An index definition bound to column positions plus its store.
#[derive(Clone, Debug)]
struct TableIndex {
    columns: Vec<usize>,
    store: Box<dyn IndexStore>,
}

impl TableIndex {
    fn new(def: &IndexDef, schema: &Table) -> Result<Self> {
        let columns = def
            .columns()
            .iter()
            .map(|c| {
                schema
                    .get_column_index(c)
                    .ok_or_else(|| Error::column_not_found(schema.name(), c.as_str()))
            })
            .collect::<Result<Vec<_>>>()?;
        let store: Box<dyn IndexStore> = match def.get_index_type() {
            IndexType::Ordered => Box::new(OrderedIndexStore::new(def.is_unique())),
            IndexType::Hash => Box::new(HashIndexStore::new(def.is_unique(), columns.len())),
        };
        Ok(Self { columns, store })
    }

    fn key_of(&self, values: &[Value]) -> IndexKey {
        extract_key(values, &self.columns)
    }
}

/// Extracts the key for the given column positions.
fn extract_key(values: &[Value], col_indices: &[usize]) -> IndexKey {
    col_indices
        .iter()
        .map(|&i| values.get(i).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Row storage for a single table.
#[derive(Clone, Debug)]
pub struct RowStore {
    schema: Table,
    rows: BTreeMap<RowId, Arc<Row>>,
    indices: BTreeMap<String, TableIndex>,
    next_row_id: RowId,
    data_version: u64,
}

impl RowStore {
    /// Creates a new row store with every index the schema declares.
    pub fn new(schema: Table) -> Result<Self> {
        let mut indices = BTreeMap::new();
        for def in schema.indices() {
            indices.insert(def.name().to_string(), TableIndex::new(def, &schema)?);
        }
        Ok(Self {
            schema,
            rows: BTreeMap::new(),
            indices,
            next_row_id: 0,
            data_version: 0,
        })
    }

    /// Returns the table schema.
    pub fn schema(&self) -> &Table {
        &self.schema
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the version stamped by the last mutation.
    pub fn data_version(&self) -> u64 {
        self.data_version
    }

    pub(crate) fn set_data_version(&mut self, version: u64) {
        self.data_version = version;
    }

    /// Validates values against the schema, widening integers in decimal columns.
    fn conform(&self, mut values: Vec<Value>) -> Result<Vec<Value>> {
        self.schema.validate_row(&values)?;
        for (col, value) in self.schema.columns().iter().zip(values.iter_mut()) {
            if col.data_type() == DataType::Decimal {
                if let Value::Integer(i) = value {
                    *value = Value::Decimal(*i as f64);
                }
            }
        }
        Ok(values)
    }

    /// Inserts a row and returns its newly assigned id.
    pub fn insert(&mut self, values: Vec<Value>) -> Result<RowId> {
        let values = self.conform(values)?;
        let row_id = self.next_row_id;

        let mut added: Vec<String> = Vec::new();
        let mut failure = None;
        for (name, idx) in self.indices.iter_mut() {
            let key = idx.key_of(&values);
            if idx.store.add(key.clone(), row_id).is_err() {
                failure = Some(Error::unique_constraint(name.as_str(), key_value(key)));
                break;
            }
            added.push(name.clone());
        }

        if let Some(err) = failure {
            self.rollback_insert(&added, row_id, &values);
            return Err(err);
        }

        self.next_row_id += 1;
        self.rows.insert(row_id, Arc::new(Row::new(row_id, values)));
        Ok(row_id)
    }

    fn rollback_insert(&mut self, added: &[String], row_id: RowId, values: &[Value]) {
        for name in added {
            if let Some(idx) = self.indices.get_mut(name) {
                let key = idx.key_of(values);
                idx.store.remove(&key, row_id);
            }
        }
    }

    /// Replaces the values of an existing row.
    pub fn update(&mut self, row_id: RowId, values: Vec<Value>) -> Result<()> {
        let old = self
            .rows
            .get(&row_id)
            .cloned()
            .ok_or_else(|| Error::row_not_found(self.schema.name(), row_id))?;
        let values = self.conform(values)?;

        // Check every unique index before touching anything
        for (name, idx) in &self.indices {
            if !idx.store.is_unique() {
                continue;
            }
            let old_key = idx.key_of(old.values());
            let new_key = idx.key_of(&values);
            let has_null = new_key.iter().any(Value::is_null);
            if old_key != new_key && !has_null && idx.store.contains_key(&new_key) {
                return Err(Error::unique_constraint(name.as_str(), key_value(new_key)));
            }
        }

        for idx in self.indices.values_mut() {
            let old_key = idx.key_of(old.values());
            let new_key = idx.key_of(&values);
            if old_key != new_key {
                idx.store.remove(&old_key, row_id);
                // Uniqueness was checked above
                let _ = idx.store.add(new_key, row_id);
            }
        }

        self.rows.insert(row_id, Arc::new(Row::new(row_id, values)));
        Ok(())
    }

    /// Deletes a row and returns it.
    pub fn delete(&mut self, row_id: RowId) -> Result<Arc<Row>> {
        let row = self
            .rows
            .remove(&row_id)
            .ok_or_else(|| Error::row_not_found(self.schema.name(), row_id))?;

        for idx in self.indices.values_mut() {
            let key = idx.key_of(row.values());
            idx.store.remove(&key, row_id);
        }
        Ok(row)
    }

    /// Gets a row by ID.
    pub fn get(&self, row_id: RowId) -> Option<Arc<Row>> {
        self.rows.get(&row_id).cloned()
    }

    /// Returns an iterator over all rows in row-id order.
    pub fn scan(&self) -> impl Iterator<Item = &Arc<Row>> + '_ {
        self.rows.values()
    }

    /// Returns the first row with id strictly greater than `after`.
    pub fn next_after(&self, after: Option<RowId>) -> Option<&Arc<Row>> {
        let start = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        self.rows.range((start, Bound::Unbounded)).next().map(|(_, row)| row)
    }

    /// Adds an index and backfills it from the existing rows.
    pub fn create_index(&mut self, def: IndexDef) -> Result<()> {
        let mut schema = self.schema.clone();
        schema.add_index(def.clone())?;

        let mut idx = TableIndex::new(&def, &schema)?;
        for (row_id, row) in &self.rows {
            let key = idx.key_of(row.values());
            if idx.store.add(key.clone(), *row_id).is_err() {
                return Err(Error::unique_constraint(def.name(), key_value(key)));
            }
        }

        self.schema = schema;
        self.indices.insert(def.name().to_string(), idx);
        Ok(())
    }

    fn index(&self, name: &str) -> Result<&TableIndex> {
        self.indices
            .get(name)
            .ok_or_else(|| Error::index_not_found(self.schema.name(), name))
    }

    /// Row ids whose key for `index` falls in `range`.
    pub fn lookup(&self, index: &str, range: &KeyRange<IndexKey>) -> Result<Vec<RowId>> {
        Ok(self.index(index)?.store.lookup(range))
    }

    /// `(key, row_id)` pairs for `index` in `range`, without touching rows.
    pub fn lookup_entries(
        &self,
        index: &str,
        range: &KeyRange<IndexKey>,
    ) -> Result<Vec<(IndexKey, RowId)>> {
        Ok(self.index(index)?.store.entries(range))
    }

    /// The entry following `after` in `index` within `range`, with its
    /// position. `None` when the index is missing or the range is exhausted.
    pub fn next_entry(
        &self,
        index: &str,
        range: &KeyRange<IndexKey>,
        after: Option<(&IndexKey, usize)>,
    ) -> Option<(IndexKey, RowId, usize)> {
        self.indices.get(index)?.store.next_entry(range, after)
    }

    /// Returns true if the table has an index named `index`.
    pub fn has_index(&self, index: &str) -> bool {
        self.indices.contains_key(index)
    }

    /// Returns the maintained statistics of an index.
    pub fn index_stats(&self, index: &str) -> Result<&IndexStats> {
        Ok(self.index(index)?.store.stats())
    }

    /// Clears all rows and index entries.
    pub fn clear(&mut self) {
        self.rows.clear();
        for idx in self.indices.values_mut() {
            idx.store.clear();
        }
    }
}

/// Turns an index key into a single value for error reporting.
fn key_value(mut key: IndexKey) -> Value {
    if key.len() == 1 {
        key.pop().unwrap_or(Value::Null)
    } else {
        let parts: Vec<String> = key.iter().map(|v| v.to_string()).collect();
        Value::Text(format!("({})", parts.join(", ")))
    }
}
