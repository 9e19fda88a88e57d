//! Column usage analysis.
//!
//! Determines, per relation, which columns a query reads. The planner uses
//! this to decide whether an index covers everything a scan must produce.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::Expr;
use crate::planner::{JoinKind, LogicalPlan};

/// Columns of one relation read by a query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationUsage {
    /// Every column reaches the output.
    pub all: bool,
    /// Columns referenced by name.
    pub columns: BTreeSet<String>,
}

impl RelationUsage {
    /// Returns true if `column` may be read.
    pub fn uses(&self, column: &str) -> bool {
        self.all || self.columns.contains(column)
    }
}

/// Computes column usage for every relation referenced in `plan`.
///
/// Expects qualified column references.
pub fn column_usage(plan: &LogicalPlan) -> BTreeMap<String, RelationUsage> {
    let mut out = BTreeMap::new();
    walk(plan, true, &mut out);
    out
}

fn record_expr(expr: &Expr, out: &mut BTreeMap<String, RelationUsage>) {
    expr.for_each_column(&mut |c| {
        if let Some(relation) = &c.relation {
            out.entry(relation.clone())
                .or_default()
                .columns
                .insert(c.name.clone());
        }
    });
    expr.for_each_subquery(&mut |sub| walk(sub, true, out));
}

fn walk(plan: &LogicalPlan, needs_all: bool, out: &mut BTreeMap<String, RelationUsage>) {
    plan.for_each_expr(&mut |e| record_expr(e, out));

    match plan {
        LogicalPlan::Scan { table, alias, .. } => {
            let usage = out
                .entry(alias.clone().unwrap_or_else(|| table.clone()))
                .or_default();
            usage.all |= needs_all;
        }
        LogicalPlan::CteRef { .. } => {}
        LogicalPlan::Project { input, .. } | LogicalPlan::Aggregate { input, .. } => {
            walk(input, false, out)
        }
        LogicalPlan::Join {
            left, right, kind, ..
        } => {
            walk(left, needs_all, out);
            let right_needs_all = needs_all && !matches!(kind, JoinKind::Semi | JoinKind::Anti);
            walk(right, right_needs_all, out);
        }
        LogicalPlan::SetOp { left, right, .. } => {
            walk(left, true, out);
            walk(right, true, out);
        }
        LogicalPlan::With { ctes, body } => {
            for cte in ctes {
                walk(&cte.plan, true, out);
            }
            walk(body, needs_all, out);
        }
        LogicalPlan::Filter { input, .. }
        | LogicalPlan::Sort { input, .. }
        | LogicalPlan::Limit { input, .. }
        | LogicalPlan::Distinct { input }
        | LogicalPlan::Window { input, .. } => walk(input, needs_all, out),
    }
}
