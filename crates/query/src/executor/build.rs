//! Turns a physical plan into an operator tree.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tern_core::Value;
use tern_storage::CatalogSnapshot;
use tracing::debug;

use super::aggregate::{GroupAggregateExec, HashAggregateExec};
use super::cte::{CteBuffer, CteScanExec, SharedCte, WithExec};
use super::distinct::DistinctExec;
use super::filter::FilterExec;
use super::join::{HashJoinExec, JoinShape, MergeJoinExec, NestedLoopJoinExec};
use super::limit::LimitExec;
use super::metrics::MetricsRegistry;
use super::node::{ExecNode, Operator};
use super::project::ProjectExec;
use super::scan::{IndexScanExec, SeqScanExec};
use super::set_op::SetOpExec;
use super::sort::SortExec;
use super::window::WindowExec;
use crate::error::{QueryError, QueryResult};
use crate::planner::{
    BoundAggregate, BoundExpr, BoundSortKey, IndexAccess, IndexScanNode, JoinKind, PhysicalNode,
    PhysicalPlan,
};

pub(crate) struct Builder<'a> {
    snapshot: Rc<CatalogSnapshot>,
    metrics: Option<&'a mut MetricsRegistry>,
    scopes: Vec<BTreeMap<String, SharedCte>>,
}

impl<'a> Builder<'a> {
    pub(crate) fn new(snapshot: Rc<CatalogSnapshot>, metrics: Option<&'a mut MetricsRegistry>) -> Self {
        Self {
            snapshot,
            metrics,
            scopes: Vec::new(),
        }
    }

    pub(crate) fn build(&mut self, plan: &PhysicalPlan) -> QueryResult<Box<Operator>> {
        let node = match &plan.node {
            PhysicalNode::SeqScan { table, filter, .. } => ExecNode::SeqScan(SeqScanExec::new(
                Rc::clone(&self.snapshot),
                table.clone(),
                self.inline_opt(filter)?,
            )),
            PhysicalNode::IndexScan(scan) => self.index_scan(scan, false, plan.schema.len())?,
            PhysicalNode::IndexOnlyScan(scan) => self.index_scan(scan, true, plan.schema.len())?,
            PhysicalNode::Filter { input, predicate } => {
                ExecNode::Filter(FilterExec::new(self.build(input)?, self.inline(predicate)?))
            }
            PhysicalNode::Project { input, exprs } => {
                ExecNode::Project(ProjectExec::new(self.build(input)?, self.inline_all(exprs)?))
            }
            PhysicalNode::NestedLoopJoin {
                left,
                right,
                kind,
                condition,
            } => ExecNode::NestedLoopJoin(NestedLoopJoinExec::new(
                self.build(left)?,
                self.build(right)?,
                shape(*kind, left, right),
                self.inline_opt(condition)?,
                is_parameterized(right),
            )),
            PhysicalNode::HashJoin {
                left,
                right,
                kind,
                left_keys,
                right_keys,
                residual,
                build,
            } => ExecNode::HashJoin(HashJoinExec::new(
                self.build(left)?,
                self.build(right)?,
                shape(*kind, left, right),
                self.inline_all(left_keys)?,
                self.inline_all(right_keys)?,
                self.inline_opt(residual)?,
                *build,
            )),
            PhysicalNode::MergeJoin {
                left,
                right,
                kind,
                left_keys,
                right_keys,
                residual,
            } => {
                if kind.is_filtering() {
                    return Err(QueryError::unsupported(format!(
                        "merge join for {} joins",
                        kind.name()
                    )));
                }
                ExecNode::MergeJoin(MergeJoinExec::new(
                    self.build(left)?,
                    self.build(right)?,
                    shape(*kind, left, right),
                    left_keys.clone(),
                    right_keys.clone(),
                    self.inline_opt(residual)?,
                ))
            }
            PhysicalNode::HashAggregate {
                input,
                group_by,
                aggregates,
                having,
            } => ExecNode::HashAggregate(HashAggregateExec::new(
                self.build(input)?,
                self.inline_all(group_by)?,
                self.inline_aggregates(aggregates)?,
                self.inline_opt(having)?,
            )),
            PhysicalNode::GroupAggregate {
                input,
                group_by,
                aggregates,
                having,
            } => ExecNode::GroupAggregate(GroupAggregateExec::new(
                self.build(input)?,
                self.inline_all(group_by)?,
                self.inline_aggregates(aggregates)?,
                self.inline_opt(having)?,
            )),
            PhysicalNode::Sort { input, keys } => {
                ExecNode::Sort(SortExec::new(self.build(input)?, self.inline_keys(keys)?))
            }
            PhysicalNode::Limit {
                input,
                count,
                offset,
            } => ExecNode::Limit(LimitExec::new(self.build(input)?, *count, *offset)),
            PhysicalNode::SetOp {
                left,
                right,
                kind,
                all,
                strategy,
            } => ExecNode::SetOp(SetOpExec::new(
                self.build(left)?,
                self.build(right)?,
                *kind,
                *all,
                *strategy,
            )),
            PhysicalNode::Distinct { input, strategy } => {
                ExecNode::Distinct(DistinctExec::new(self.build(input)?, *strategy))
            }
            PhysicalNode::Window {
                input,
                partition_by,
                order_by,
                frame,
                functions,
                strategy,
            } => ExecNode::Window(WindowExec::new(
                self.build(input)?,
                self.inline_all(partition_by)?,
                self.inline_keys(order_by)?,
                *frame,
                functions.iter().map(|(f, _)| f.clone()).collect(),
                *strategy,
            )),
            PhysicalNode::With { ctes, body } => {
                self.scopes.push(BTreeMap::new());
                let built = self.build_with(ctes, body);
                self.scopes.pop();
                let (buffers, body) = built?;
                ExecNode::With(WithExec::new(buffers, body))
            }
            PhysicalNode::MaterializeCte { name } => {
                let buffer = self
                    .scopes
                    .iter()
                    .rev()
                    .find_map(|scope| scope.get(name))
                    .ok_or_else(|| QueryError::execution(format!("CTE {} is not in scope", name)))?;
                ExecNode::CteScan(CteScanExec::new(Rc::clone(buffer)))
            }
        };
        let metrics = self.metrics.as_mut().map(|m| m.register(plan.id));
        Ok(Box::new(Operator::new(plan.id, plan.kind(), metrics, node)))
    }

    fn build_with(
        &mut self,
        ctes: &[(String, PhysicalPlan)],
        body: &PhysicalPlan,
    ) -> QueryResult<(Vec<SharedCte>, Box<Operator>)> {
        let mut buffers = Vec::with_capacity(ctes.len());
        for (name, plan) in ctes {
            let source = self.build(plan)?;
            let buffer: SharedCte = Rc::new(RefCell::new(CteBuffer::new(name.clone(), source)));
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(name.clone(), Rc::clone(&buffer));
            }
            buffers.push(buffer);
        }
        Ok((buffers, self.build(body)?))
    }

    fn index_scan(&mut self, scan: &IndexScanNode, index_only: bool, width: usize) -> QueryResult<ExecNode> {
        let access = match &scan.access {
            IndexAccess::Param(exprs) => IndexAccess::Param(self.inline_all(exprs)?),
            other => other.clone(),
        };
        Ok(ExecNode::IndexScan(IndexScanExec::new(
            Rc::clone(&self.snapshot),
            scan.table.clone(),
            scan.index.clone(),
            scan.key_columns.clone(),
            access,
            self.inline_opt(&scan.filter)?,
            index_only,
            width,
        )))
    }

    /// Replaces every scalar subquery in `expr` by its value.
    fn inline(&mut self, expr: &BoundExpr) -> QueryResult<BoundExpr> {
        let mut expr = expr.clone();
        self.inline_in_place(&mut expr)?;
        Ok(expr)
    }

    fn inline_in_place(&mut self, expr: &mut BoundExpr) -> QueryResult<()> {
        if let BoundExpr::Subquery { plan, .. } = expr {
            let value = self.scalar(plan)?;
            *expr = BoundExpr::Literal(value);
            return Ok(());
        }
        for operand in expr.operands_mut() {
            self.inline_in_place(operand)?;
        }
        Ok(())
    }

    fn inline_opt(&mut self, expr: &Option<BoundExpr>) -> QueryResult<Option<BoundExpr>> {
        expr.as_ref().map(|e| self.inline(e)).transpose()
    }

    fn inline_all(&mut self, exprs: &[BoundExpr]) -> QueryResult<Vec<BoundExpr>> {
        exprs.iter().map(|e| self.inline(e)).collect()
    }

    fn inline_keys(&mut self, keys: &[BoundSortKey]) -> QueryResult<Vec<BoundSortKey>> {
        keys.iter()
            .map(|k| {
                Ok(BoundSortKey {
                    expr: self.inline(&k.expr)?,
                    order: k.order,
                })
            })
            .collect()
    }

    fn inline_aggregates(&mut self, aggregates: &[BoundAggregate]) -> QueryResult<Vec<BoundAggregate>> {
        aggregates
            .iter()
            .map(|a| {
                let mut a = a.clone();
                if let Some(arg) = &mut a.arg {
                    self.inline_in_place(arg)?;
                }
                if let Some(filter) = &mut a.filter {
                    self.inline_in_place(filter)?;
                }
                Ok(a)
            })
            .collect()
    }

    /// Runs a scalar subquery: no rows give NULL, more than one is an error.
    fn scalar(&mut self, plan: &PhysicalPlan) -> QueryResult<Value> {
        let mut op = self.build(plan)?;
        op.open(None)?;
        let first = op.next();
        let second = match &first {
            Ok(Some(_)) => op.next(),
            _ => Ok(None),
        };
        op.close();
        let value = match (first?, second?) {
            (Some(_), Some(_)) => {
                return Err(QueryError::execution(
                    "scalar subquery returned more than one row",
                ))
            }
            (Some(row), None) => row.get(0).cloned().unwrap_or(Value::Null),
            (None, _) => Value::Null,
        };
        debug!(id = plan.id, value = %value, "scalar subquery evaluated");
        Ok(value)
    }
}

fn shape(kind: JoinKind, left: &PhysicalPlan, right: &PhysicalPlan) -> JoinShape {
    JoinShape::new(kind, left.schema.len(), right.schema.len())
}

/// True if `plan` holds an index lookup keyed on the outer row.
fn is_parameterized(plan: &PhysicalPlan) -> bool {
    match &plan.node {
        PhysicalNode::IndexScan(scan) | PhysicalNode::IndexOnlyScan(scan) => {
            matches!(scan.access, IndexAccess::Param(_))
        }
        _ => plan.children().into_iter().any(is_parameterized),
    }
}
