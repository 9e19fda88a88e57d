//! EXISTS decorrelation.
//!
//! `Filter(input, [NOT] EXISTS (sub) AND rest)` becomes
//! `Filter(Join(input, sub, Semi|Anti, corr), rest)` where `corr` is the
//! conjunction of the subquery's conjuncts that reference the outer query.
//! Correlated conjuncts are collected from filters, scan predicates and
//! inner join conditions of the subquery. A correlated reference anywhere
//! else cannot be decorrelated and is reported as unsupported.

use std::collections::BTreeSet;

use crate::ast::{Expr, UnaryOp};
use crate::error::{QueryError, QueryResult};
use crate::optimizer::OptimizerPass;
use crate::planner::{JoinKind, LogicalPlan};

/// Rewrites EXISTS conjuncts into semi and anti joins.
pub struct ExistsToJoin;

impl OptimizerPass for ExistsToJoin {
    fn optimize(&self, plan: LogicalPlan) -> QueryResult<LogicalPlan> {
        rewrite(plan)
    }

    fn name(&self) -> &'static str {
        "exists_to_join"
    }
}

fn rewrite(plan: LogicalPlan) -> QueryResult<LogicalPlan> {
    let plan = plan.map_inputs(rewrite)?;
    match plan {
        LogicalPlan::Filter { input, predicate } => {
            let mut current = *input;
            let mut remaining = Vec::new();
            for conjunct in predicate.into_conjuncts() {
                match as_exists(conjunct) {
                    Ok((subquery, negated)) => {
                        current = decorrelate(current, subquery, negated)?;
                    }
                    Err(other) => remaining.push(other),
                }
            }
            Ok(match Expr::conjunction(remaining) {
                Some(predicate) => LogicalPlan::Filter {
                    input: Box::new(current),
                    predicate,
                },
                None => current,
            })
        }
        other => Ok(other),
    }
}

/// Splits `[NOT] EXISTS (sub)` into the subquery and its polarity.
fn as_exists(expr: Expr) -> Result<(LogicalPlan, bool), Expr> {
    match expr {
        Expr::Exists { subquery, negated } => Ok((*subquery, negated)),
        Expr::Unary {
            op: UnaryOp::Not,
            expr,
        } if matches!(*expr, Expr::Exists { .. }) => match *expr {
            Expr::Exists { subquery, negated } => Ok((*subquery, !negated)),
            other => Err(other.not()),
        },
        other => Err(other),
    }
}

fn decorrelate(outer: LogicalPlan, subquery: LogicalPlan, negated: bool) -> QueryResult<LogicalPlan> {
    let subquery = strip_output(rewrite(subquery)?);
    let local: BTreeSet<String> = defined_relations(&subquery);
    let mut correlated = Vec::new();
    let subquery = extract(subquery, &local, &mut correlated);

    if let Some(name) = outer_reference(&subquery, &local) {
        return Err(QueryError::unsupported(format!(
            "correlated reference to '{}' outside a filter of an EXISTS subquery",
            name
        )));
    }

    Ok(LogicalPlan::Join {
        left: Box::new(outer),
        right: Box::new(subquery),
        kind: if negated { JoinKind::Anti } else { JoinKind::Semi },
        condition: Expr::conjunction(correlated),
    })
}

/// The select list of an EXISTS subquery never matters.
fn strip_output(plan: LogicalPlan) -> LogicalPlan {
    match plan {
        LogicalPlan::Project { input, .. } | LogicalPlan::Distinct { input } => strip_output(*input),
        other => other,
    }
}

/// Every relation name introduced anywhere inside `plan`.
fn defined_relations(plan: &LogicalPlan) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_defined(plan, &mut out);
    out
}

fn collect_defined(plan: &LogicalPlan, out: &mut BTreeSet<String>) {
    match plan {
        LogicalPlan::Scan { table, alias, .. } => {
            out.insert(alias.clone().unwrap_or_else(|| table.clone()));
        }
        LogicalPlan::CteRef { name, alias } => {
            out.insert(alias.clone().unwrap_or_else(|| name.clone()));
        }
        _ => {}
    }
    for input in plan.inputs() {
        collect_defined(input, out);
    }
}

fn is_correlated(expr: &Expr, local: &BTreeSet<String>) -> bool {
    expr.referenced_relations()
        .iter()
        .any(|r| !local.contains(r))
}

/// Splits `expr` into local conjuncts (returned) and correlated ones (pushed to `out`).
fn split(expr: Expr, local: &BTreeSet<String>, out: &mut Vec<Expr>) -> Option<Expr> {
    let mut kept = Vec::new();
    for conjunct in expr.into_conjuncts() {
        if is_correlated(&conjunct, local) {
            out.push(conjunct);
        } else {
            kept.push(conjunct);
        }
    }
    Expr::conjunction(kept)
}

fn extract(plan: LogicalPlan, local: &BTreeSet<String>, out: &mut Vec<Expr>) -> LogicalPlan {
    match plan {
        LogicalPlan::Filter { input, predicate } => {
            let input = extract(*input, local, out);
            match split(predicate, local, out) {
                Some(predicate) => LogicalPlan::Filter {
                    input: Box::new(input),
                    predicate,
                },
                None => input,
            }
        }
        LogicalPlan::Scan {
            table,
            alias,
            predicate,
        } => LogicalPlan::Scan {
            table,
            alias,
            predicate: predicate.and_then(|p| split(p, local, out)),
        },
        LogicalPlan::Join {
            left,
            right,
            kind,
            condition,
        } if kind.is_reorderable() => {
            let left = extract(*left, local, out);
            let right = extract(*right, local, out);
            let condition = condition.and_then(|c| split(c, local, out));
            LogicalPlan::Join {
                left: Box::new(left),
                right: Box::new(right),
                kind,
                condition,
            }
        }
        LogicalPlan::Sort { input, keys } => LogicalPlan::Sort {
            input: Box::new(extract(*input, local, out)),
            keys,
        },
        other => other,
    }
}

/// First relation referenced in `plan` that it does not define.
fn outer_reference(plan: &LogicalPlan, local: &BTreeSet<String>) -> Option<String> {
    let mut found = None;
    plan.for_each_expr(&mut |e: &Expr| {
        if found.is_none() {
            found = e.referenced_relations().into_iter().find(|r| !local.contains(r));
        }
    });
    if found.is_some() {
        return found;
    }
    plan.inputs()
        .into_iter()
        .find_map(|input| outer_reference(input, local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit, AggregateExpr};

    fn correlated_sub() -> LogicalPlan {
        LogicalPlan::scan_as("order_items", "oi")
            .filter(
                col("oi.order_id")
                    .eq(col("o.order_id"))
                    .and(col("oi.quantity").gt(lit(2))),
            )
            .project(vec![col("oi.order_id")])
    }

    #[test]
    fn test_exists_becomes_semi_join() {
        let plan = LogicalPlan::scan_as("orders", "o")
            .filter(Expr::exists(correlated_sub()).and(col("o.status").eq(lit("open"))));

        let out = ExistsToJoin.optimize(plan).unwrap();
        let LogicalPlan::Filter { input, predicate } = out else {
            panic!("expected remaining filter");
        };
        assert_eq!(predicate, col("o.status").eq(lit("open")));
        let LogicalPlan::Join {
            right,
            kind,
            condition,
            ..
        } = *input
        else {
            panic!("expected join");
        };
        assert_eq!(kind, JoinKind::Semi);
        assert_eq!(condition, Some(col("oi.order_id").eq(col("o.order_id"))));
        assert_eq!(
            *right,
            LogicalPlan::scan_as("order_items", "oi").filter(col("oi.quantity").gt(lit(2)))
        );
    }

    #[test]
    fn test_not_exists_becomes_anti_join() {
        let plan = LogicalPlan::scan_as("orders", "o").filter(Expr::not_exists(correlated_sub()));
        let out = ExistsToJoin.optimize(plan).unwrap();
        assert!(matches!(out, LogicalPlan::Join { kind: JoinKind::Anti, .. }));

        let plan = LogicalPlan::scan_as("orders", "o").filter(Expr::exists(correlated_sub()).not());
        let out = ExistsToJoin.optimize(plan).unwrap();
        assert!(matches!(out, LogicalPlan::Join { kind: JoinKind::Anti, .. }));
    }

    #[test]
    fn test_uncorrelated_exists_has_no_condition() {
        let sub = LogicalPlan::scan("order_items");
        let plan = LogicalPlan::scan("orders").filter(Expr::exists(sub));
        let out = ExistsToJoin.optimize(plan).unwrap();
        assert!(matches!(
            out,
            LogicalPlan::Join {
                kind: JoinKind::Semi,
                condition: None,
                ..
            }
        ));
    }

    #[test]
    fn test_correlation_under_aggregate_is_unsupported() {
        let sub = LogicalPlan::scan_as("order_items", "oi")
            .filter(col("oi.order_id").eq(col("o.order_id")))
            .aggregate(vec![], vec![AggregateExpr::count_star("n")], None);
        let plan = LogicalPlan::scan_as("orders", "o").filter(Expr::exists(sub));
        assert!(matches!(
            ExistsToJoin.optimize(plan),
            Err(QueryError::Unsupported(_))
        ));
    }
}
