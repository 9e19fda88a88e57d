//! Table access: sequential and index scans.

use std::rc::Rc;

use tern_core::{Row, RowId, Value};
use tern_index::KeyRange;
use tern_storage::{CatalogSnapshot, IndexCursor, IndexKey, TableScan};

use super::eval::{eval_all, passes};
use crate::error::{QueryError, QueryResult};
use crate::planner::{BoundExpr, IndexAccess};

/// Full scan in row-id order with an optional filter.
pub(crate) struct SeqScanExec {
    snapshot: Rc<CatalogSnapshot>,
    table: String,
    filter: Option<BoundExpr>,
    cursor: Option<TableScan>,
}

impl SeqScanExec {
    pub(crate) fn new(snapshot: Rc<CatalogSnapshot>, table: String, filter: Option<BoundExpr>) -> Self {
        Self {
            snapshot,
            table,
            filter,
            cursor: None,
        }
    }

    pub(crate) fn open(&mut self, _outer: Option<&Row>) -> QueryResult<()> {
        match &mut self.cursor {
            Some(cursor) => cursor.restart(),
            None => self.cursor = Some(self.snapshot.scan(&self.table)?),
        }
        Ok(())
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        let Some(cursor) = &mut self.cursor else {
            return Ok(None);
        };
        for row in cursor.by_ref() {
            if passes(self.filter.as_ref(), &row)? {
                return Ok(Some(Row::clone(&row)));
            }
        }
        Ok(None)
    }

    pub(crate) fn close(&mut self) {
        self.cursor = None;
    }
}

/// Index range, multi-point or outer-row-parameterized lookup.
///
/// Entries are pulled from the index one at a time; points are looked up in
/// order, each only once the previous one is exhausted. In index-only mode rows are rebuilt from the index key: key columns carry
/// their values, every other column is NULL and never read by the plan.
pub(crate) struct IndexScanExec {
    snapshot: Rc<CatalogSnapshot>,
    table: String,
    index: String,
    key_columns: Vec<usize>,
    access: IndexAccess,
    filter: Option<BoundExpr>,
    index_only: bool,
    width: usize,
    ranges: std::vec::IntoIter<KeyRange<IndexKey>>,
    cursor: Option<IndexCursor>,
}

impl IndexScanExec {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        snapshot: Rc<CatalogSnapshot>,
        table: String,
        index: String,
        key_columns: Vec<usize>,
        access: IndexAccess,
        filter: Option<BoundExpr>,
        index_only: bool,
        width: usize,
    ) -> Self {
        Self {
            snapshot,
            table,
            index,
            key_columns,
            access,
            filter,
            index_only,
            width,
            ranges: Vec::new().into_iter(),
            cursor: None,
        }
    }

    fn key_ranges(&self, outer: Option<&Row>) -> QueryResult<Vec<KeyRange<IndexKey>>> {
        Ok(match &self.access {
            IndexAccess::Range(range) => vec![range.clone()],
            IndexAccess::Points(keys) => keys.iter().cloned().map(KeyRange::only).collect(),
            IndexAccess::Param(exprs) => {
                let outer = outer.ok_or_else(|| {
                    QueryError::execution(format!(
                        "index scan on {} opened without an outer row",
                        self.index
                    ))
                })?;
                let key = eval_all(exprs, outer)?;
                // NULL never joins
                if key.iter().any(Value::is_null) {
                    Vec::new()
                } else {
                    vec![KeyRange::only(key)]
                }
            }
        })
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.ranges = self.key_ranges(outer)?.into_iter();
        self.cursor = None;
        Ok(())
    }

    fn next_entry(&mut self) -> QueryResult<Option<(IndexKey, RowId)>> {
        loop {
            if let Some(entry) = self.cursor.as_mut().and_then(Iterator::next) {
                return Ok(Some(entry));
            }
            let Some(range) = self.ranges.next() else {
                self.cursor = None;
                return Ok(None);
            };
            self.cursor = Some(self.snapshot.lookup_entries(&self.table, &self.index, &range)?);
        }
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        while let Some((key, id)) = self.next_entry()? {
            let row = if self.index_only {
                let mut values = vec![Value::Null; self.width];
                for (column, value) in self.key_columns.iter().zip(key) {
                    if let Some(slot) = values.get_mut(*column) {
                        *slot = value;
                    }
                }
                Row::new(id, values)
            } else {
                Row::clone(&*self.snapshot.get(&self.table, id)?)
            };
            if passes(self.filter.as_ref(), &row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    pub(crate) fn close(&mut self) {
        self.ranges = Vec::new().into_iter();
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use tern_core::schema::TableBuilder;
    use tern_core::DataType;
    use tern_storage::Catalog;

    fn snapshot() -> Rc<CatalogSnapshot> {
        let mut catalog = Catalog::new();
        let table = TableBuilder::new("items")
            .unwrap()
            .add_column("id", DataType::Integer)
            .unwrap()
            .add_column("qty", DataType::Integer)
            .unwrap()
            .add_primary_key(&["id"])
            .unwrap()
            .build()
            .unwrap();
        catalog.register_table(table).unwrap();
        for i in 1..=10 {
            catalog
                .insert("items", vec![Value::Integer(i), Value::Integer(i * 10)])
                .unwrap();
        }
        Rc::new(catalog.snapshot())
    }

    fn drain(mut next: impl FnMut() -> QueryResult<Option<Row>>) -> Vec<Vec<Value>> {
        let mut out = Vec::new();
        while let Some(row) = next().unwrap() {
            out.push(row.into_values());
        }
        out
    }

    #[test]
    fn test_seq_scan_filter_and_restart() {
        let filter = BoundExpr::Binary {
            op: BinaryOp::Gt,
            left: Box::new(BoundExpr::Column {
                index: 1,
                name: "qty".into(),
                data_type: Some(DataType::Integer),
            }),
            right: Box::new(BoundExpr::Literal(Value::Integer(70))),
        };
        let mut scan = SeqScanExec::new(snapshot(), "items".into(), Some(filter));
        scan.open(None).unwrap();
        assert_eq!(drain(|| scan.next()).len(), 3);
        scan.open(None).unwrap();
        assert_eq!(drain(|| scan.next()).len(), 3);
        scan.close();
    }

    #[test]
    fn test_index_points_and_param() {
        let snapshot = snapshot();
        let mut points = IndexScanExec::new(
            Rc::clone(&snapshot),
            "items".into(),
            "pk_items".into(),
            vec![0],
            IndexAccess::Points(vec![vec![Value::Integer(2)], vec![Value::Integer(9)]]),
            None,
            false,
            2,
        );
        points.open(None).unwrap();
        assert_eq!(
            points.next().unwrap().map(Row::into_values),
            Some(vec![Value::Integer(2), Value::Integer(20)])
        );
        // the second point is looked up only once the first is exhausted
        assert_eq!(points.ranges.len(), 1);
        points.open(None).unwrap();
        assert_eq!(
            drain(|| points.next()),
            vec![
                vec![Value::Integer(2), Value::Integer(20)],
                vec![Value::Integer(9), Value::Integer(90)]
            ]
        );

        let key = BoundExpr::Column {
            index: 0,
            name: "x".into(),
            data_type: Some(DataType::Integer),
        };
        let mut param = IndexScanExec::new(
            snapshot,
            "items".into(),
            "pk_items".into(),
            vec![0],
            IndexAccess::Param(vec![key]),
            None,
            true,
            2,
        );
        param.open(Some(&Row::dummy(vec![Value::Integer(4)]))).unwrap();
        assert_eq!(drain(|| param.next()), vec![vec![Value::Integer(4), Value::Null]]);
        param.open(Some(&Row::dummy(vec![Value::Null]))).unwrap();
        assert!(drain(|| param.next()).is_empty());
        assert!(param.open(None).is_err());
    }

    #[test]
    fn test_index_range_streams_in_key_order() {
        let snapshot = snapshot();
        let mut scan = IndexScanExec::new(
            snapshot,
            "items".into(),
            "pk_items".into(),
            vec![0],
            IndexAccess::Range(KeyRange::lower_bound(vec![Value::Integer(3)], true)),
            None,
            false,
            2,
        );
        scan.open(None).unwrap();
        assert_eq!(
            scan.next().unwrap().map(Row::into_values),
            Some(vec![Value::Integer(4), Value::Integer(40)])
        );
        assert!(scan.cursor.is_some());
        assert_eq!(drain(|| scan.next()).len(), 6);
        scan.close();
        assert!(scan.cursor.is_none());
    }
}
