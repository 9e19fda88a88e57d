//! Plan description for `EXPLAIN` and `EXPLAIN ANALYZE`.

use core::fmt;
use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tern_storage::CatalogSnapshot;
use tracing::debug;

use crate::error::QueryResult;
use crate::executor::{execute_instrumented, NodeMetrics};
use crate::planner::{
    BoundExpr, DedupStrategy, IndexScanNode, JoinSide, PhysicalNode, PhysicalPlan, Schema,
    SetOpStrategy, WindowStrategy,
};

/// Measured behaviour of one plan node.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ActualMetrics {
    /// Rows returned over all loops.
    pub rows: u64,
    /// Times the node was opened.
    pub loops: u64,
    /// Time spent in the node, children included.
    pub elapsed: Duration,
}

impl From<NodeMetrics> for ActualMetrics {
    fn from(m: NodeMetrics) -> Self {
        Self {
            rows: m.rows,
            loops: m.loops,
            elapsed: m.elapsed,
        }
    }
}

/// One node of a plan description, nested like the plan.
///
/// Scalar subqueries show up first among the children, with a detail
/// starting with `InitPlan`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExplainNode {
    pub kind: String,
    pub detail: String,
    pub estimated_rows: f64,
    pub startup_cost: f64,
    pub total_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<ActualMetrics>,
    pub children: Vec<ExplainNode>,
}

/// Describes `plan` from its estimates alone.
pub fn explain(plan: &PhysicalPlan) -> ExplainNode {
    describe(plan, None, false)
}

/// Runs `plan` to completion and describes it with measured row counts and
/// timings. The query's rows are discarded.
pub fn explain_analyze(plan: &PhysicalPlan, snapshot: &CatalogSnapshot) -> QueryResult<ExplainNode> {
    let (rows, metrics) = execute_instrumented(plan, snapshot)?;
    debug!(rows = rows.len(), nodes = metrics.len(), "analyzed plan");
    Ok(describe(plan, Some(&metrics), false))
}

fn describe(
    plan: &PhysicalPlan,
    metrics: Option<&BTreeMap<usize, NodeMetrics>>,
    init_plan: bool,
) -> ExplainNode {
    let detail = detail(plan);
    let detail = match (init_plan, detail.is_empty()) {
        (false, _) => detail,
        (true, true) => "InitPlan".to_string(),
        (true, false) => format!("InitPlan: {}", detail),
    };
    let mut children: Vec<ExplainNode> = plan
        .subqueries()
        .into_iter()
        .map(|sub| describe(sub, metrics, true))
        .collect();
    children.extend(plan.children().into_iter().map(|c| describe(c, metrics, false)));
    ExplainNode {
        kind: plan.kind().to_string(),
        detail,
        estimated_rows: plan.estimate.rows,
        startup_cost: plan.estimate.startup_cost,
        total_cost: plan.estimate.total_cost,
        actual: metrics.map(|m| m.get(&plan.id).copied().unwrap_or_default().into()),
        children,
    }
}

fn list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn with_filter(head: String, filter: &Option<BoundExpr>) -> String {
    match filter {
        Some(f) => format!("{} filter: {}", head, f),
        None => head,
    }
}

fn relation(table: &str, alias: &Option<String>) -> String {
    match alias {
        Some(a) if a != table => format!("{} {}", table, a),
        _ => table.to_string(),
    }
}

fn index_detail(scan: &IndexScanNode) -> String {
    with_filter(
        format!(
            "using {} on {} ({})",
            scan.index,
            relation(&scan.table, &scan.alias),
            scan.access
        ),
        &scan.filter,
    )
}

fn column_names(schema: &Schema, positions: &[usize]) -> Vec<String> {
    positions
        .iter()
        .map(|p| {
            schema
                .field(*p)
                .map(|f| f.to_string())
                .unwrap_or_else(|| format!("#{}", p))
        })
        .collect()
}

fn detail(plan: &PhysicalPlan) -> String {
    match &plan.node {
        PhysicalNode::SeqScan {
            table,
            alias,
            filter,
        } => with_filter(format!("on {}", relation(table, alias)), filter),
        PhysicalNode::IndexScan(scan) | PhysicalNode::IndexOnlyScan(scan) => index_detail(scan),
        PhysicalNode::Filter { predicate, .. } => predicate.to_string(),
        PhysicalNode::Project { exprs, .. } => list(exprs),
        PhysicalNode::NestedLoopJoin {
            kind, condition, ..
        } => match condition {
            Some(c) => format!("{} on {}", kind.name(), c),
            None => kind.name().to_string(),
        },
        PhysicalNode::HashJoin {
            kind,
            left_keys,
            right_keys,
            residual,
            build,
            ..
        } => {
            let keys: Vec<String> = left_keys
                .iter()
                .zip(right_keys)
                .map(|(l, r)| format!("{} = {}", l, r))
                .collect();
            let side = match build {
                JoinSide::Left => "left",
                JoinSide::Right => "right",
            };
            with_filter(
                format!("{} on {} build {}", kind.name(), keys.join(" AND "), side),
                residual,
            )
        }
        PhysicalNode::MergeJoin {
            left,
            right,
            kind,
            left_keys,
            right_keys,
            residual,
        } => {
            let keys: Vec<String> = column_names(&left.schema, left_keys)
                .into_iter()
                .zip(column_names(&right.schema, right_keys))
                .map(|(l, r)| format!("{} = {}", l, r))
                .collect();
            with_filter(format!("{} on {}", kind.name(), keys.join(" AND ")), residual)
        }
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
            let mut out = String::new();
            if !group_by.is_empty() {
                out = format!("group by {} ", list(group_by));
            }
            out.push_str(&list(aggregates));
            if let Some(h) = having {
                out.push_str(&format!(" having {}", h));
            }
            out
        }
        PhysicalNode::Sort { keys, .. } => list(keys),
        PhysicalNode::Limit { count, offset, .. } => match count {
            Some(c) => format!("{} offset {}", c, offset),
            None => format!("all offset {}", offset),
        },
        PhysicalNode::SetOp { all, strategy, .. } => {
            let strategy = match strategy {
                SetOpStrategy::Append => "append",
                SetOpStrategy::Hash => "hashed",
                SetOpStrategy::Sort => "sorted",
            };
            if *all {
                format!("all {}", strategy)
            } else {
                strategy.to_string()
            }
        }
        PhysicalNode::Distinct { strategy, .. } => match strategy {
            DedupStrategy::Hash => "hashed".to_string(),
            DedupStrategy::Sort => "sorted".to_string(),
        },
        PhysicalNode::Window {
            partition_by,
            order_by,
            frame,
            functions,
            strategy,
            ..
        } => {
            let funcs: Vec<String> = functions
                .iter()
                .map(|(f, alias)| format!("{} AS {}", f, alias))
                .collect();
            let mut out = funcs.join(", ");
            if !partition_by.is_empty() {
                out.push_str(&format!(" partition by {}", list(partition_by)));
            }
            if !order_by.is_empty() {
                out.push_str(&format!(" order by {}", list(order_by)));
            }
            let strategy = match strategy {
                WindowStrategy::Sort => "sorted",
                WindowStrategy::Hash => "hashed",
            };
            out.push_str(&format!(" {} {}", frame, strategy));
            out
        }
        PhysicalNode::With { ctes, .. } => {
            let names: Vec<&str> = ctes.iter().map(|(n, _)| n.as_str()).collect();
            names.join(", ")
        }
        PhysicalNode::MaterializeCte { name } => name.clone(),
    }
}

impl ExplainNode {
    /// Indented text, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        if depth > 0 {
            out.push_str(&" ".repeat((depth - 1) * 6));
            out.push_str("  ->  ");
        }
        out.push_str(&self.kind);
        if !self.detail.is_empty() {
            out.push(' ');
            out.push_str(&self.detail);
        }
        out.push_str(&format!(
            "  (cost={:.2}..{:.2} rows={:.0})",
            self.startup_cost, self.total_cost, self.estimated_rows
        ));
        if let Some(actual) = &self.actual {
            out.push_str(&format!(
                " (actual time={:.3} ms rows={} loops={})",
                actual.elapsed.as_secs_f64() * 1000.0,
                actual.rows,
                actual.loops
            ));
        }
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }

    /// Every node in pre-order.
    pub fn nodes(&self) -> Vec<&ExplainNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.nodes());
        }
        out
    }
}

impl fmt::Display for ExplainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
