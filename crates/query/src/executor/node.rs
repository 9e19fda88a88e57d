//! Operator tree.
//!
//! Every physical node becomes an `Operator`: an `ExecNode` variant wrapped
//! with its plan id and, when analyzing, a metrics slot. All operators follow
//! the same protocol:
//!
//! - `open(outer)` prepares the operator; `outer` is the current row of an
//!   enclosing nested loop and parameterizes index lookups.
//! - `next()` returns the next row, or `None` at the end.
//! - `close()` releases buffered rows. It is idempotent, and an operator may
//!   be opened again afterwards to restart.

use std::time::Instant;

use tern_core::Row;
use tracing::trace;

use super::aggregate::{GroupAggregateExec, HashAggregateExec};
use super::cte::{CteScanExec, WithExec};
use super::distinct::DistinctExec;
use super::filter::FilterExec;
use super::join::{HashJoinExec, MergeJoinExec, NestedLoopJoinExec};
use super::limit::LimitExec;
use super::metrics::SharedMetrics;
use super::project::ProjectExec;
use super::scan::{IndexScanExec, SeqScanExec};
use super::set_op::SetOpExec;
use super::sort::SortExec;
use super::window::WindowExec;
use crate::error::{QueryError, QueryResult};

/// Executable operator variants.
pub(crate) enum ExecNode {
    SeqScan(SeqScanExec),
    IndexScan(IndexScanExec),
    Filter(FilterExec),
    Project(ProjectExec),
    NestedLoopJoin(NestedLoopJoinExec),
    HashJoin(HashJoinExec),
    MergeJoin(MergeJoinExec),
    HashAggregate(HashAggregateExec),
    GroupAggregate(GroupAggregateExec),
    Sort(SortExec),
    Limit(LimitExec),
    SetOp(SetOpExec),
    Distinct(DistinctExec),
    Window(WindowExec),
    With(WithExec),
    CteScan(CteScanExec),
}

macro_rules! dispatch {
    ($node:expr, $exec:ident => $call:expr) => {
        match $node {
            ExecNode::SeqScan($exec) => $call,
            ExecNode::IndexScan($exec) => $call,
            ExecNode::Filter($exec) => $call,
            ExecNode::Project($exec) => $call,
            ExecNode::NestedLoopJoin($exec) => $call,
            ExecNode::HashJoin($exec) => $call,
            ExecNode::MergeJoin($exec) => $call,
            ExecNode::HashAggregate($exec) => $call,
            ExecNode::GroupAggregate($exec) => $call,
            ExecNode::Sort($exec) => $call,
            ExecNode::Limit($exec) => $call,
            ExecNode::SetOp($exec) => $call,
            ExecNode::Distinct($exec) => $call,
            ExecNode::Window($exec) => $call,
            ExecNode::With($exec) => $call,
            ExecNode::CteScan($exec) => $call,
        }
    };
}

/// A node of the executable tree.
pub(crate) struct Operator {
    id: usize,
    kind: &'static str,
    metrics: Option<SharedMetrics>,
    node: ExecNode,
    is_open: bool,
}

impl Operator {
    pub(crate) fn new(
        id: usize,
        kind: &'static str,
        metrics: Option<SharedMetrics>,
        node: ExecNode,
    ) -> Self {
        Self {
            id,
            kind,
            metrics,
            node,
            is_open: false,
        }
    }

    /// Opens (or reopens) the operator.
    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        trace!(id = self.id, kind = self.kind, "open");
        if self.is_open {
            self.close();
        }
        let start = self.metrics.as_ref().map(|_| Instant::now());
        let result = dispatch!(&mut self.node, exec => exec.open(outer));
        if let (Some(metrics), Some(start)) = (&self.metrics, start) {
            let mut m = metrics.borrow_mut();
            m.loops += 1;
            m.elapsed += start.elapsed();
        }
        if result.is_err() {
            // release whatever the failed open already acquired
            dispatch!(&mut self.node, exec => exec.close());
        }
        self.is_open = result.is_ok();
        result
    }

    /// Pulls the next row.
    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        if !self.is_open {
            return Err(QueryError::execution(format!(
                "{} #{} pulled before open",
                self.kind, self.id
            )));
        }
        let start = self.metrics.as_ref().map(|_| Instant::now());
        let result = dispatch!(&mut self.node, exec => exec.next());
        if let (Some(metrics), Some(start)) = (&self.metrics, start) {
            let mut m = metrics.borrow_mut();
            if let Ok(Some(_)) = &result {
                m.rows += 1;
            }
            m.elapsed += start.elapsed();
        }
        result
    }

    /// Releases resources; later calls do nothing.
    pub(crate) fn close(&mut self) {
        if !self.is_open {
            return;
        }
        trace!(id = self.id, kind = self.kind, "close");
        let start = self.metrics.as_ref().map(|_| Instant::now());
        dispatch!(&mut self.node, exec => exec.close());
        if let (Some(metrics), Some(start)) = (&self.metrics, start) {
            metrics.borrow_mut().elapsed += start.elapsed();
        }
        self.is_open = false;
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.is_open
    }

    /// Pulls every remaining row.
    pub(crate) fn drain(&mut self) -> QueryResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Operators over fixed rows for unit tests.

    use super::*;
    use crate::executor::cte::CteBuffer;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tern_core::Value;

    /// An operator yielding `rows` on every open.
    pub(crate) fn values(rows: Vec<Vec<Value>>) -> Box<Operator> {
        let rows = rows.into_iter().map(Row::dummy).collect();
        let buffer = Rc::new(RefCell::new(CteBuffer::from_rows(rows)));
        Box::new(Operator::new(
            0,
            "Values",
            None,
            ExecNode::CteScan(CteScanExec::new(buffer)),
        ))
    }

    pub(crate) fn ints(rows: &[&[i64]]) -> Box<Operator> {
        values(
            rows.iter()
                .map(|r| r.iter().map(|v| Value::Integer(*v)).collect())
                .collect(),
        )
    }

    pub(crate) fn run(op: &mut Operator) -> Vec<Vec<Value>> {
        op.open(None).unwrap();
        let rows = op.drain().unwrap();
        op.close();
        rows.into_iter().map(Row::into_values).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ints;
    use super::*;
    use crate::planner::{BoundExpr, IndexAccess, SetOpKind, SetOpStrategy};
    use std::rc::Rc;
    use tern_core::Value;
    use tern_storage::Catalog;

    #[test]
    fn test_failed_open_closes_opened_children() {
        // a parameterized lookup cannot open without an outer row
        let lookup = IndexScanExec::new(
            Rc::new(Catalog::new().snapshot()),
            "items".into(),
            "pk_items".into(),
            vec![0],
            IndexAccess::Param(vec![BoundExpr::Literal(Value::Integer(1))]),
            None,
            false,
            1,
        );
        let right = Box::new(Operator::new(2, "IndexScan", None, ExecNode::IndexScan(lookup)));
        let union = SetOpExec::new(
            ints(&[&[1]]),
            right,
            SetOpKind::Union,
            true,
            SetOpStrategy::Append,
        );
        let mut op = Operator::new(0, "Union", None, ExecNode::SetOp(union));

        assert!(op.open(None).is_err());
        assert!(!op.is_open());
        match &op.node {
            ExecNode::SetOp(exec) => assert!(!exec.left().is_open()),
            _ => unreachable!(),
        }
        assert!(op.next().is_err());
    }
}
