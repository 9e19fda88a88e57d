//! Physical query plan definitions.
//!
//! A `PhysicalPlan` fixes every access method and algorithm. Each node carries
//! its output schema, a cost estimate and the order its rows come out in.

use core::fmt;

use tern_core::Value;
use tern_index::KeyRange;
use tern_storage::IndexKey;

use crate::ast::{FrameSpec, SortOrder};
use crate::planner::bind::{BoundAggregate, BoundExpr, BoundSortKey, BoundWindowFunc};
use crate::planner::cost::Estimate;
use crate::planner::logical::{JoinKind, SetOpKind};
use crate::planner::Schema;

/// How an index scan reaches its entries.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexAccess {
    /// One key range, possibly over a leading prefix of the index key.
    Range(KeyRange<IndexKey>),
    /// Several point lookups (IN lists), sorted and deduplicated.
    Points(Vec<IndexKey>),
    /// Equality on leading key columns, with values taken from the outer row
    /// of a nested loop join.
    Param(Vec<BoundExpr>),
}

impl fmt::Display for IndexAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn key(k: &[Value]) -> String {
            let parts: Vec<String> = k.iter().map(|v| v.to_string()).collect();
            format!("({})", parts.join(", "))
        }
        match self {
            IndexAccess::Range(range) => match range {
                KeyRange::All => f.write_str("full"),
                KeyRange::Only(k) => write!(f, "= {}", key(k)),
                _ => {
                    if let Some((lo, excl)) = range.lower() {
                        write!(f, "{} {}", if excl { ">" } else { ">=" }, key(lo))?;
                    }
                    if range.lower().is_some() && range.upper().is_some() {
                        f.write_str(" AND ")?;
                    }
                    if let Some((hi, excl)) = range.upper() {
                        write!(f, "{} {}", if excl { "<" } else { "<=" }, key(hi))?;
                    }
                    Ok(())
                }
            },
            IndexAccess::Points(points) => {
                let parts: Vec<String> = points.iter().map(|p| key(p)).collect();
                write!(f, "IN [{}]", parts.join(", "))
            }
            IndexAccess::Param(exprs) => {
                let parts: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
                write!(f, "= ({})", parts.join(", "))
            }
        }
    }
}

/// An index-based scan.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexScanNode {
    pub table: String,
    pub alias: Option<String>,
    pub index: String,
    /// Table column positions of the index key, in key order.
    pub key_columns: Vec<usize>,
    pub access: IndexAccess,
    /// Residual predicate over the scan's output.
    pub filter: Option<BoundExpr>,
}

/// Which join input a hash join builds its table from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinSide {
    Left,
    Right,
}

/// Duplicate elimination strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DedupStrategy {
    /// Remember every distinct row seen.
    Hash,
    /// Input is sorted on every column; compare neighbours.
    Sort,
}

/// Set operation strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOpStrategy {
    /// Concatenate inputs (UNION ALL).
    Append,
    /// Count rows in hash tables.
    Hash,
    /// Merge two inputs sorted on every column.
    Sort,
}

/// Window partitioning strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowStrategy {
    /// Input already ordered by partition and order keys.
    Sort,
    /// Buffer everything, partition by hashing, sort each partition.
    Hash,
}

/// Physical operator.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicalNode {
    SeqScan {
        table: String,
        alias: Option<String>,
        filter: Option<BoundExpr>,
    },
    IndexScan(IndexScanNode),
    /// Answers from index entries alone; uncovered columns read as null and
    /// are never referenced above.
    IndexOnlyScan(IndexScanNode),
    Filter {
        input: Box<PhysicalPlan>,
        predicate: BoundExpr,
    },
    Project {
        input: Box<PhysicalPlan>,
        exprs: Vec<BoundExpr>,
    },
    NestedLoopJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        kind: JoinKind,
        condition: Option<BoundExpr>,
    },
    HashJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        kind: JoinKind,
        /// Keys over the left input's columns.
        left_keys: Vec<BoundExpr>,
        /// Keys over the right input's columns.
        right_keys: Vec<BoundExpr>,
        /// Extra condition over the joined row.
        residual: Option<BoundExpr>,
        build: JoinSide,
    },
    MergeJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        kind: JoinKind,
        /// Left input positions; the left input is sorted ascending on them.
        left_keys: Vec<usize>,
        /// Right input positions; the right input is sorted ascending on them.
        right_keys: Vec<usize>,
        residual: Option<BoundExpr>,
    },
    HashAggregate {
        input: Box<PhysicalPlan>,
        group_by: Vec<BoundExpr>,
        aggregates: Vec<BoundAggregate>,
        having: Option<BoundExpr>,
    },
    /// Aggregation over input already ordered by the grouping keys.
    GroupAggregate {
        input: Box<PhysicalPlan>,
        group_by: Vec<BoundExpr>,
        aggregates: Vec<BoundAggregate>,
        having: Option<BoundExpr>,
    },
    Sort {
        input: Box<PhysicalPlan>,
        keys: Vec<BoundSortKey>,
    },
    Limit {
        input: Box<PhysicalPlan>,
        count: Option<usize>,
        offset: usize,
    },
    SetOp {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        kind: SetOpKind,
        all: bool,
        strategy: SetOpStrategy,
    },
    Distinct {
        input: Box<PhysicalPlan>,
        strategy: DedupStrategy,
    },
    Window {
        input: Box<PhysicalPlan>,
        partition_by: Vec<BoundExpr>,
        order_by: Vec<BoundSortKey>,
        frame: FrameSpec,
        functions: Vec<(BoundWindowFunc, String)>,
        strategy: WindowStrategy,
    },
    /// Common table expressions visible in `body`; each is materialized at
    /// most once, on first reference.
    With {
        ctes: Vec<(String, PhysicalPlan)>,
        body: Box<PhysicalPlan>,
    },
    MaterializeCte {
        name: String,
    },
}

/// A physical plan node with its annotations.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicalPlan {
    /// Pre-order position in the final tree, subqueries included.
    pub id: usize,
    pub node: PhysicalNode,
    pub schema: Schema,
    pub estimate: Estimate,
    /// Output positions the rows are sorted on, major key first.
    pub ordering: Vec<(usize, SortOrder)>,
}

impl PhysicalPlan {
    /// Creates an unordered node.
    pub fn new(node: PhysicalNode, schema: Schema, estimate: Estimate) -> Self {
        Self {
            id: 0,
            node,
            schema,
            estimate,
            ordering: Vec::new(),
        }
    }

    /// Sets the output ordering.
    pub fn with_ordering(mut self, ordering: Vec<(usize, SortOrder)>) -> Self {
        self.ordering = ordering;
        self
    }

    /// Operator name used by explain.
    pub fn kind(&self) -> &'static str {
        match &self.node {
            PhysicalNode::SeqScan { .. } => "SeqScan",
            PhysicalNode::IndexScan(_) => "IndexScan",
            PhysicalNode::IndexOnlyScan(_) => "IndexOnlyScan",
            PhysicalNode::Filter { .. } => "Filter",
            PhysicalNode::Project { .. } => "Project",
            PhysicalNode::NestedLoopJoin { .. } => "NestedLoopJoin",
            PhysicalNode::HashJoin { .. } => "HashJoin",
            PhysicalNode::MergeJoin { .. } => "MergeJoin",
            PhysicalNode::HashAggregate { .. } => "HashAggregate",
            PhysicalNode::GroupAggregate { .. } => "GroupAggregate",
            PhysicalNode::Sort { .. } => "Sort",
            PhysicalNode::Limit { .. } => "Limit",
            PhysicalNode::SetOp { kind, .. } => kind.name(),
            PhysicalNode::Distinct { .. } => "Distinct",
            PhysicalNode::Window { .. } => "WindowExec",
            PhysicalNode::With { .. } => "With",
            PhysicalNode::MaterializeCte { .. } => "MaterializeCTE",
        }
    }

    /// Child plans, CTE bodies before the main body.
    pub fn children(&self) -> Vec<&PhysicalPlan> {
        match &self.node {
            PhysicalNode::SeqScan { .. }
            | PhysicalNode::IndexScan(_)
            | PhysicalNode::IndexOnlyScan(_)
            | PhysicalNode::MaterializeCte { .. } => Vec::new(),
            PhysicalNode::Filter { input, .. }
            | PhysicalNode::Project { input, .. }
            | PhysicalNode::HashAggregate { input, .. }
            | PhysicalNode::GroupAggregate { input, .. }
            | PhysicalNode::Sort { input, .. }
            | PhysicalNode::Limit { input, .. }
            | PhysicalNode::Distinct { input, .. }
            | PhysicalNode::Window { input, .. } => vec![input.as_ref()],
            PhysicalNode::NestedLoopJoin { left, right, .. }
            | PhysicalNode::HashJoin { left, right, .. }
            | PhysicalNode::MergeJoin { left, right, .. }
            | PhysicalNode::SetOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            PhysicalNode::With { ctes, body } => {
                let mut out: Vec<&PhysicalPlan> = ctes.iter().map(|(_, p)| p).collect();
                out.push(body.as_ref());
                out
            }
        }
    }

    fn children_mut(&mut self) -> Vec<&mut PhysicalPlan> {
        match &mut self.node {
            PhysicalNode::SeqScan { .. }
            | PhysicalNode::IndexScan(_)
            | PhysicalNode::IndexOnlyScan(_)
            | PhysicalNode::MaterializeCte { .. } => Vec::new(),
            PhysicalNode::Filter { input, .. }
            | PhysicalNode::Project { input, .. }
            | PhysicalNode::HashAggregate { input, .. }
            | PhysicalNode::GroupAggregate { input, .. }
            | PhysicalNode::Sort { input, .. }
            | PhysicalNode::Limit { input, .. }
            | PhysicalNode::Distinct { input, .. }
            | PhysicalNode::Window { input, .. } => vec![input.as_mut()],
            PhysicalNode::NestedLoopJoin { left, right, .. }
            | PhysicalNode::HashJoin { left, right, .. }
            | PhysicalNode::MergeJoin { left, right, .. }
            | PhysicalNode::SetOp { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            PhysicalNode::With { ctes, body } => {
                let mut out: Vec<&mut PhysicalPlan> = ctes.iter_mut().map(|(_, p)| p).collect();
                out.push(body.as_mut());
                out
            }
        }
    }

    /// Expressions held directly by this node.
    pub fn expressions(&self) -> Vec<&BoundExpr> {
        let mut out: Vec<&BoundExpr> = Vec::new();
        match &self.node {
            PhysicalNode::SeqScan { filter, .. } => out.extend(filter.iter()),
            PhysicalNode::IndexScan(scan) | PhysicalNode::IndexOnlyScan(scan) => {
                if let IndexAccess::Param(exprs) = &scan.access {
                    out.extend(exprs.iter());
                }
                out.extend(scan.filter.iter());
            }
            PhysicalNode::Filter { predicate, .. } => out.push(predicate),
            PhysicalNode::Project { exprs, .. } => out.extend(exprs.iter()),
            PhysicalNode::NestedLoopJoin { condition, .. } => out.extend(condition.iter()),
            PhysicalNode::HashJoin {
                left_keys,
                right_keys,
                residual,
                ..
            } => {
                out.extend(left_keys.iter());
                out.extend(right_keys.iter());
                out.extend(residual.iter());
            }
            PhysicalNode::MergeJoin { residual, .. } => out.extend(residual.iter()),
            PhysicalNode::HashAggregate {
                group_by,
                aggregates,
                having,
                ..
            }
            | PhysicalNode::GroupAggregate {
                group_by,
                aggregates,
                having,
                ..
            } => {
                out.extend(group_by.iter());
                for agg in aggregates {
                    out.extend(agg.arg.iter());
                    out.extend(agg.filter.iter());
                }
                out.extend(having.iter());
            }
            PhysicalNode::Sort { keys, .. } => out.extend(keys.iter().map(|k| &k.expr)),
            PhysicalNode::Window {
                partition_by,
                order_by,
                functions,
                ..
            } => {
                out.extend(partition_by.iter());
                out.extend(order_by.iter().map(|k| &k.expr));
                for (func, _) in functions {
                    match func {
                        BoundWindowFunc::Lag { expr, .. } | BoundWindowFunc::Lead { expr, .. } => {
                            out.push(expr)
                        }
                        BoundWindowFunc::Aggregate { arg: Some(a), .. } => out.push(a),
                        _ => {}
                    }
                }
            }
            PhysicalNode::Limit { .. }
            | PhysicalNode::SetOp { .. }
            | PhysicalNode::Distinct { .. }
            | PhysicalNode::With { .. }
            | PhysicalNode::MaterializeCte { .. } => {}
        }
        out
    }

    fn expressions_mut(&mut self) -> Vec<&mut BoundExpr> {
        let mut out: Vec<&mut BoundExpr> = Vec::new();
        match &mut self.node {
            PhysicalNode::SeqScan { filter, .. } => out.extend(filter.iter_mut()),
            PhysicalNode::IndexScan(scan) | PhysicalNode::IndexOnlyScan(scan) => {
                if let IndexAccess::Param(exprs) = &mut scan.access {
                    out.extend(exprs.iter_mut());
                }
                out.extend(scan.filter.iter_mut());
            }
            PhysicalNode::Filter { predicate, .. } => out.push(predicate),
            PhysicalNode::Project { exprs, .. } => out.extend(exprs.iter_mut()),
            PhysicalNode::NestedLoopJoin { condition, .. } => out.extend(condition.iter_mut()),
            PhysicalNode::HashJoin {
                left_keys,
                right_keys,
                residual,
                ..
            } => {
                out.extend(left_keys.iter_mut());
                out.extend(right_keys.iter_mut());
                out.extend(residual.iter_mut());
            }
            PhysicalNode::MergeJoin { residual, .. } => out.extend(residual.iter_mut()),
            PhysicalNode::HashAggregate {
                group_by,
                aggregates,
                having,
                ..
            }
            | PhysicalNode::GroupAggregate {
                group_by,
                aggregates,
                having,
                ..
            } => {
                out.extend(group_by.iter_mut());
                for agg in aggregates {
                    out.extend(agg.arg.iter_mut());
                    out.extend(agg.filter.iter_mut());
                }
                out.extend(having.iter_mut());
            }
            PhysicalNode::Sort { keys, .. } => out.extend(keys.iter_mut().map(|k| &mut k.expr)),
            PhysicalNode::Window {
                partition_by,
                order_by,
                functions,
                ..
            } => {
                out.extend(partition_by.iter_mut());
                out.extend(order_by.iter_mut().map(|k| &mut k.expr));
                for (func, _) in functions {
                    match func {
                        BoundWindowFunc::Lag { expr, .. } | BoundWindowFunc::Lead { expr, .. } => {
                            out.push(expr)
                        }
                        BoundWindowFunc::Aggregate { arg: Some(a), .. } => out.push(a),
                        _ => {}
                    }
                }
            }
            PhysicalNode::Limit { .. }
            | PhysicalNode::SetOp { .. }
            | PhysicalNode::Distinct { .. }
            | PhysicalNode::With { .. }
            | PhysicalNode::MaterializeCte { .. } => {}
        }
        out
    }

    /// Subquery plans referenced by this node's expressions.
    pub fn subqueries(&self) -> Vec<&PhysicalPlan> {
        self.expressions()
            .into_iter()
            .flat_map(|e| e.subqueries())
            .collect()
    }

    /// Numbers every node in pre-order: a node, then its subqueries, then
    /// its children.
    pub fn assign_ids(&mut self) {
        let mut next = 0;
        self.assign_ids_from(&mut next);
    }

    fn assign_ids_from(&mut self, next: &mut usize) {
        self.id = *next;
        *next += 1;
        for expr in self.expressions_mut() {
            for sub in expr.subqueries_mut() {
                sub.assign_ids_from(next);
            }
        }
        for child in self.children_mut() {
            child.assign_ids_from(next);
        }
    }

    /// Number of nodes, subqueries included.
    pub fn node_count(&self) -> usize {
        1 + self
            .subqueries()
            .iter()
            .map(|s| s.node_count())
            .sum::<usize>()
            + self.children().iter().map(|c| c.node_count()).sum::<usize>()
    }

    /// True if rows come out sorted ascending or descending as `keys` asks.
    pub fn is_ordered_by(&self, keys: &[(usize, SortOrder)]) -> bool {
        keys.len() <= self.ordering.len() && self.ordering.iter().zip(keys).all(|(a, b)| a == b)
    }

    /// True if rows come out sorted on `columns` (in any direction per column),
    /// so equal values of those columns are adjacent.
    pub fn is_grouped_by(&self, columns: &[usize]) -> bool {
        columns.len() <= self.ordering.len()
            && columns
                .iter()
                .all(|c| self.ordering[..columns.len()].iter().any(|(o, _)| o == c))
    }
}
