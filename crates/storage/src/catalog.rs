//! Catalog and snapshots.
//!
//! The `Catalog` owns every table behind an `Arc`, so taking a snapshot is a
//! map clone and a mutation only copies the table it touches. Each mutation
//! bumps the catalog version; statistics remember the data version they were
//! computed from.

use std::collections::BTreeMap;
use std::sync::Arc;

use tern_core::schema::{IndexDef, IndexType, Table};
use tern_core::{Error, Result, Row, RowId, Value};
use tern_index::KeyRange;
use tracing::info;

use crate::row_store::{IndexKey, RowStore};
use crate::statistics::{TableStatistics, DEFAULT_HISTOGRAM_BUCKETS};

/// Mutable registry of tables, indexes and statistics.
#[derive(Clone, Debug)]
pub struct Catalog {
    tables: BTreeMap<String, Arc<RowStore>>,
    statistics: BTreeMap<String, Arc<TableStatistics>>,
    version: u64,
    histogram_buckets: usize,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            statistics: BTreeMap::new(),
            version: 0,
            histogram_buckets: DEFAULT_HISTOGRAM_BUCKETS,
        }
    }

    /// Sets the number of histogram buckets analyze builds.
    pub fn with_histogram_buckets(mut self, buckets: usize) -> Self {
        self.histogram_buckets = buckets.max(1);
        self
    }

    /// Returns the current catalog version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns all table names in order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Returns a table's store.
    pub fn table(&self, name: &str) -> Option<&RowStore> {
        self.tables.get(name).map(Arc::as_ref)
    }

    /// Registers a new table.
    pub fn register_table(&mut self, schema: Table) -> Result<()> {
        let name = schema.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(Error::TableExists { name });
        }
        let mut store = RowStore::new(schema)?;
        self.version += 1;
        store.set_data_version(self.version);
        info!(table = %name, indexes = store.schema().indices().len(), version = self.version, "registered table");
        self.tables.insert(name, Arc::new(store));
        Ok(())
    }

    /// Applies `f` to a private copy-on-write view of a table's store and
    /// stamps the new version on success.
    fn mutate<T>(&mut self, table: &str, f: impl FnOnce(&mut RowStore) -> Result<T>) -> Result<T> {
        let entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::table_not_found(table))?;
        let store = Arc::make_mut(entry);
        let out = f(store)?;
        self.version += 1;
        store.set_data_version(self.version);
        Ok(out)
    }

    /// Creates an index over existing columns and backfills it.
    pub fn create_index(
        &mut self,
        table: &str,
        name: &str,
        columns: &[&str],
        kind: IndexType,
        unique: bool,
    ) -> Result<()> {
        let def = IndexDef::new(name, table, columns.iter().map(|c| c.to_string()).collect())
            .unique(unique)
            .index_type(kind);
        self.mutate(table, |store| store.create_index(def))?;
        info!(table, index = name, ?kind, unique, version = self.version, "created index");
        Ok(())
    }

    /// Inserts a row.
    pub fn insert(&mut self, table: &str, values: Vec<Value>) -> Result<RowId> {
        self.mutate(table, |store| store.insert(values))
    }

    /// Inserts many rows, stopping at the first failure.
    pub fn insert_many(&mut self, table: &str, rows: Vec<Vec<Value>>) -> Result<Vec<RowId>> {
        self.mutate(table, |store| {
            rows.into_iter().map(|values| store.insert(values)).collect()
        })
    }

    /// Replaces the values of a row.
    pub fn update(&mut self, table: &str, row_id: RowId, values: Vec<Value>) -> Result<()> {
        self.mutate(table, |store| store.update(row_id, values))
    }

    /// Deletes a row.
    pub fn delete(&mut self, table: &str, row_id: RowId) -> Result<Arc<Row>> {
        self.mutate(table, |store| store.delete(row_id))
    }

    /// Recomputes statistics for one table.
    pub fn analyze(&mut self, table: &str) -> Result<TableStatistics> {
        let store = self
            .tables
            .get(table)
            .ok_or_else(|| Error::table_not_found(table))?;
        let stats = TableStatistics::analyze(store, self.histogram_buckets);
        info!(
            table,
            rows = stats.row_count,
            version = stats.analyzed_version,
            "analyzed table"
        );
        self.statistics.insert(table.to_string(), Arc::new(stats.clone()));
        Ok(stats)
    }

    /// Recomputes statistics for every table.
    pub fn analyze_all(&mut self) -> Result<()> {
        let names: Vec<String> = self.tables.keys().cloned().collect();
        for name in names {
            self.analyze(&name)?;
        }
        Ok(())
    }

    /// Returns the last computed statistics of a table.
    pub fn statistics(&self, table: &str) -> Option<&TableStatistics> {
        self.statistics.get(table).map(Arc::as_ref)
    }

    /// Takes an immutable snapshot of the current state.
    pub fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            tables: self.tables.clone(),
            statistics: self.statistics.clone(),
            version: self.version,
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable, cheaply clonable view of the catalog.
///
/// Planning and execution only ever read through a snapshot, so later catalog
/// mutations never affect a running query.
#[derive(Clone, Debug)]
pub struct CatalogSnapshot {
    tables: BTreeMap<String, Arc<RowStore>>,
    statistics: BTreeMap<String, Arc<TableStatistics>>,
    version: u64,
}

impl CatalogSnapshot {
    /// Returns the catalog version this snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns a table's store.
    pub fn table(&self, name: &str) -> Option<&RowStore> {
        self.tables.get(name).map(Arc::as_ref)
    }

    /// Returns a shared handle to a table's store.
    pub fn store(&self, name: &str) -> Result<Arc<RowStore>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::table_not_found(name))
    }

    /// Returns a table's schema.
    pub fn schema(&self, name: &str) -> Option<&Table> {
        self.table(name).map(RowStore::schema)
    }

    /// Returns a table's statistics, if it was ever analyzed.
    pub fn statistics(&self, name: &str) -> Option<&TableStatistics> {
        self.statistics.get(name).map(Arc::as_ref)
    }

    /// True when the table changed after its statistics were computed
    /// (or was never analyzed).
    pub fn is_stale(&self, name: &str) -> bool {
        match (self.table(name), self.statistics(name)) {
            (Some(store), Some(stats)) => stats.analyzed_version != store.data_version(),
            _ => true,
        }
    }

    /// Starts a lazy, restartable scan over a table in row-id order.
    pub fn scan(&self, table: &str) -> Result<TableScan> {
        Ok(TableScan::new(self.store(table)?))
    }

    /// Row ids for an index range, in index order, produced lazily.
    pub fn lookup(
        &self,
        table: &str,
        index: &str,
        range: &KeyRange<IndexKey>,
    ) -> Result<impl Iterator<Item = RowId>> {
        Ok(self.lookup_entries(table, index, range)?.map(|(_, id)| id))
    }

    /// A lazy cursor over `(key, row_id)` pairs for an index range, without
    /// touching rows.
    pub fn lookup_entries(
        &self,
        table: &str,
        index: &str,
        range: &KeyRange<IndexKey>,
    ) -> Result<IndexCursor> {
        let store = self.store(table)?;
        if !store.has_index(index) {
            return Err(Error::index_not_found(table, index));
        }
        Ok(IndexCursor {
            store,
            index: index.to_string(),
            range: range.clone(),
            last: None,
            done: false,
        })
    }

    /// Fetches a row by id.
    pub fn get(&self, table: &str, row_id: RowId) -> Result<Arc<Row>> {
        let store = self.table(table).ok_or_else(|| Error::table_not_found(table))?;
        store
            .get(row_id)
            .ok_or_else(|| Error::row_not_found(table, row_id))
    }
}

/// A cursor over one table's rows that owns its table handle.
#[derive(Clone, Debug)]
pub struct TableScan {
    store: Arc<RowStore>,
    last: Option<RowId>,
    done: bool,
}

impl TableScan {
    fn new(store: Arc<RowStore>) -> Self {
        Self {
            store,
            last: None,
            done: false,
        }
    }

    /// Rewinds the cursor to the first row.
    pub fn restart(&mut self) {
        self.last = None;
        self.done = false;
    }
}

/// A cursor over one index range that owns its table handle. Each step seeks
/// from the previous position, so nothing is collected up front.
#[derive(Clone, Debug)]
pub struct IndexCursor {
    store: Arc<RowStore>,
    index: String,
    range: KeyRange<IndexKey>,
    last: Option<(IndexKey, usize)>,
    done: bool,
}

impl Iterator for IndexCursor {
    type Item = (IndexKey, RowId);

    fn next(&mut self) -> Option<(IndexKey, RowId)> {
        if self.done {
            return None;
        }
        let after = self.last.as_ref().map(|(key, offset)| (key, *offset));
        match self.store.next_entry(&self.index, &self.range, after) {
            Some((key, id, offset)) => {
                self.last = Some((key.clone(), offset));
                Some((key, id))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl Iterator for TableScan {
    type Item = Arc<Row>;

    fn next(&mut self) -> Option<Arc<Row>> {
        if self.done {
            return None;
        }
        match self.store.next_after(self.last) {
            Some(row) => {
                self.last = Some(row.id());
                Some(Arc::clone(row))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::schema::TableBuilder;
    use tern_core::DataType;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let schema = TableBuilder::new("orders")
            .unwrap()
            .add_column("order_id", DataType::Integer)
            .unwrap()
            .add_column("status", DataType::Text)
            .unwrap()
            .add_primary_key(&["order_id"])
            .unwrap()
            .build()
            .unwrap();
        catalog.register_table(schema).unwrap();
        for (id, status) in [(1, "delivered"), (2, "shipped"), (3, "pending")] {
            catalog
                .insert("orders", vec![Value::Integer(id), status.into()])
                .unwrap();
        }
        catalog
    }

    #[test]
    fn test_register_twice_fails() {
        let mut catalog = catalog();
        let schema = catalog.table("orders").unwrap().schema().clone();
        assert!(matches!(
            catalog.register_table(schema),
            Err(Error::TableExists { .. })
        ));
        assert!(catalog.insert("nope", vec![]).is_err());
    }

    #[test]
    fn test_snapshot_isolation() {
        let mut catalog = catalog();
        let snapshot = catalog.snapshot();
        catalog
            .insert("orders", vec![Value::Integer(4), "cancelled".into()])
            .unwrap();

        assert_eq!(snapshot.scan("orders").unwrap().count(), 3);
        assert_eq!(catalog.snapshot().scan("orders").unwrap().count(), 4);
        assert!(catalog.version() > snapshot.version());
    }

    #[test]
    fn test_scan_restart() {
        let snapshot = catalog().snapshot();
        let mut scan = snapshot.scan("orders").unwrap();
        let first: Vec<RowId> = scan.by_ref().map(|r| r.id()).collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert!(scan.next().is_none());
        scan.restart();
        assert_eq!(scan.count(), 3);
    }

    #[test]
    fn test_staleness_tracking() {
        let mut catalog = catalog();
        assert!(catalog.snapshot().is_stale("orders"));

        catalog.analyze("orders").unwrap();
        assert!(!catalog.snapshot().is_stale("orders"));
        assert_eq!(catalog.statistics("orders").unwrap().row_count, 3);

        catalog.delete("orders", 0).unwrap();
        let snapshot = catalog.snapshot();
        assert!(snapshot.is_stale("orders"));
        // Stale statistics are still served
        assert_eq!(snapshot.statistics("orders").unwrap().row_count, 3);
    }

    #[test]
    fn test_create_index_and_lookup() {
        let mut catalog = catalog();
        catalog
            .create_index("orders", "idx_status", &["status"], IndexType::Hash, false)
            .unwrap();
        let snapshot = catalog.snapshot();
        let ids: Vec<RowId> = snapshot
            .lookup(
                "orders",
                "idx_status",
                &KeyRange::only(vec![Value::from("shipped")]),
            )
            .unwrap()
            .collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(snapshot.get("orders", 1).unwrap().get(0), Some(&Value::Integer(2)));
        assert!(snapshot.get("orders", 99).is_err());
        assert!(snapshot
            .lookup("orders", "idx_missing", &KeyRange::All)
            .is_err());
    }

    #[test]
    fn test_index_cursor_is_lazy_and_ordered() {
        let mut catalog = catalog();
        for i in 4..=200 {
            catalog
                .insert("orders", vec![Value::Integer(i), "pending".into()])
                .unwrap();
        }
        let snapshot = catalog.snapshot();
        let range = KeyRange::lower_bound(vec![Value::Integer(2)], true);
        let mut cursor = snapshot.lookup_entries("orders", "pk_orders", &range).unwrap();
        let first: Vec<(IndexKey, RowId)> = cursor.by_ref().take(2).collect();
        assert_eq!(first[0].0, vec![Value::Integer(3)]);
        assert_eq!(first[1].0, vec![Value::Integer(4)]);
        // the rest is still pending in the cursor
        assert_eq!(cursor.count(), 196);

        // a later mutation does not disturb a cursor over the older snapshot
        let mut cursor = snapshot.lookup_entries("orders", "pk_orders", &range).unwrap();
        assert!(cursor.next().is_some());
        catalog.delete("orders", 3).unwrap();
        assert_eq!(cursor.count(), 197);
        assert!(snapshot.lookup_entries("orders", "idx_missing", &range).is_err());
    }

    #[test]
    fn test_failed_mutation_keeps_version() {
        let mut catalog = catalog();
        let before = catalog.version();
        assert!(catalog
            .insert("orders", vec![Value::Integer(1), "dup".into()])
            .is_err());
        assert_eq!(catalog.version(), before);
    }
}
