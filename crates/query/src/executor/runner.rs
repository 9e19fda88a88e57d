//! Plan execution entry points.

use std::collections::BTreeMap;
use std::rc::Rc;

use tern_core::Row;
use tern_storage::CatalogSnapshot;
use tracing::debug;

use super::build::Builder;
use super::metrics::{MetricsRegistry, NodeMetrics};
use super::node::Operator;
use crate::error::QueryResult;
use crate::planner::{PhysicalPlan, Schema};

/// Executes `plan` against `snapshot`.
///
/// Scalar subqueries run here, before the first row is requested. The
/// returned stream pulls rows lazily and releases every operator once it is
/// exhausted, fails or is dropped.
pub fn execute(plan: &PhysicalPlan, snapshot: &CatalogSnapshot) -> QueryResult<ResultStream> {
    let snapshot = Rc::new(snapshot.clone());
    let mut root = Builder::new(snapshot, None).build(plan)?;
    root.open(None)?;
    debug!(nodes = plan.node_count(), "execution started");
    Ok(ResultStream {
        root,
        schema: plan.schema.clone(),
        done: false,
    })
}

/// Runs `plan` to completion while recording per-node metrics.
pub(crate) fn execute_instrumented(
    plan: &PhysicalPlan,
    snapshot: &CatalogSnapshot,
) -> QueryResult<(Vec<Row>, BTreeMap<usize, NodeMetrics>)> {
    let snapshot = Rc::new(snapshot.clone());
    let mut registry = MetricsRegistry::default();
    let mut root = Builder::new(snapshot, Some(&mut registry)).build(plan)?;
    let result = root.open(None).and_then(|_| root.drain());
    root.close();
    let rows = result?;
    debug!(rows = rows.len(), "instrumented execution finished");
    Ok((rows, registry.snapshot()))
}

/// Lazily produced query result.
pub struct ResultStream {
    root: Box<Operator>,
    schema: Schema,
    done: bool,
}

impl ResultStream {
    /// Output columns.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Pulls every remaining row.
    pub fn collect_rows(mut self) -> QueryResult<Vec<Row>> {
        self.by_ref().collect()
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.root.close();
        }
    }
}

impl Iterator for ResultStream {
    type Item = QueryResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.root.next() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(err) => {
                self.finish();
                Some(Err(err))
            }
        }
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.finish();
    }
}
