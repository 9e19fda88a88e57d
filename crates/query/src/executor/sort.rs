//! Sort operator.

use core::cmp::Ordering;

use tern_core::{Row, Value};
use tracing::debug;

use super::eval::eval;
use super::node::Operator;
use crate::ast::SortOrder;
use crate::error::QueryResult;
use crate::planner::BoundSortKey;

/// Compares two key tuples; NULL sorts first ascending and last descending.
pub(crate) fn compare_keys(a: &[Value], b: &[Value], orders: &[SortOrder]) -> Ordering {
    for ((x, y), order) in a.iter().zip(b).zip(orders) {
        let ord = match order {
            SortOrder::Asc => x.cmp(y),
            SortOrder::Desc => y.cmp(x),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Evaluates sort keys for every row and sorts stably.
pub(crate) fn sort_rows(rows: Vec<Row>, keys: &[BoundSortKey]) -> QueryResult<Vec<Row>> {
    let orders: Vec<SortOrder> = keys.iter().map(|k| k.order).collect();
    let mut keyed = rows
        .into_iter()
        .map(|row| {
            let key = keys
                .iter()
                .map(|k| eval(&k.expr, &row))
                .collect::<QueryResult<Vec<_>>>()?;
            Ok((key, row))
        })
        .collect::<QueryResult<Vec<(Vec<Value>, Row)>>>()?;
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, &orders));
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

/// Buffers its input and returns it ordered by the sort keys.
pub(crate) struct SortExec {
    input: Box<Operator>,
    keys: Vec<BoundSortKey>,
    output: std::vec::IntoIter<Row>,
}

impl SortExec {
    pub(crate) fn new(input: Box<Operator>, keys: Vec<BoundSortKey>) -> Self {
        Self {
            input,
            keys,
            output: Vec::new().into_iter(),
        }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.input.open(outer)?;
        let rows = self.input.drain()?;
        self.input.close();
        debug!(rows = rows.len(), "sort input buffered");
        self.output = sort_rows(rows, &self.keys)?.into_iter();
        Ok(())
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        Ok(self.output.next())
    }

    pub(crate) fn close(&mut self) {
        self.input.close();
        self.output = Vec::new().into_iter();
    }
}
