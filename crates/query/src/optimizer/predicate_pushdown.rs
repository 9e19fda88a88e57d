//! Predicate pushdown optimization pass.
//!
//! Moves filter conjuncts as close to the scans as the join semantics allow.
//! Conjuncts are classified by the relations they reference: a conjunct that
//! only touches one join input can be evaluated below the join, except where
//! that input is null-supplying. Pushdown stops at projections, aggregations,
//! windows, limits and set operations.

use core::convert::Infallible;

use crate::ast::Expr;
use crate::error::QueryResult;
use crate::optimizer::OptimizerPass;
use crate::planner::{CommonTableExpr, JoinKind, LogicalPlan};

/// Pushes predicates down the plan tree.
pub struct PredicatePushdown;

impl OptimizerPass for PredicatePushdown {
    fn optimize(&self, plan: LogicalPlan) -> QueryResult<LogicalPlan> {
        Ok(push(plan, Vec::new()))
    }

    fn name(&self) -> &'static str {
        "predicate_pushdown"
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
    Both,
}

fn classify(expr: &Expr, left: &[String], right: &[String]) -> Side {
    let relations = expr.referenced_relations();
    if relations.is_empty() || expr.has_unqualified_columns() {
        return Side::Both;
    }
    if relations.iter().all(|r| left.contains(r)) {
        Side::Left
    } else if relations.iter().all(|r| right.contains(r)) {
        Side::Right
    } else {
        Side::Both
    }
}

fn wrap(plan: LogicalPlan, preds: Vec<Expr>) -> LogicalPlan {
    match Expr::conjunction(preds) {
        Some(predicate) => LogicalPlan::Filter {
            input: Box::new(plan),
            predicate,
        },
        None => plan,
    }
}

fn conjuncts(expr: Option<Expr>) -> Vec<Expr> {
    expr.map(Expr::into_conjuncts).unwrap_or_default()
}

/// Pushes `preds` into `plan`, returning the rewritten plan.
fn push(plan: LogicalPlan, mut preds: Vec<Expr>) -> LogicalPlan {
    match plan {
        LogicalPlan::Scan {
            table,
            alias,
            predicate,
        } => {
            let mut all = conjuncts(predicate);
            all.extend(preds);
            LogicalPlan::Scan {
                table,
                alias,
                predicate: Expr::conjunction(all),
            }
        }
        LogicalPlan::Filter { input, predicate } => {
            preds.extend(predicate.into_conjuncts());
            push(*input, preds)
        }
        LogicalPlan::Sort { input, keys } => LogicalPlan::Sort {
            input: Box::new(push(*input, preds)),
            keys,
        },
        LogicalPlan::Distinct { input } => LogicalPlan::Distinct {
            input: Box::new(push(*input, preds)),
        },
        LogicalPlan::With { ctes, body } => LogicalPlan::With {
            ctes: ctes
                .into_iter()
                .map(|cte| CommonTableExpr {
                    name: cte.name,
                    plan: push(cte.plan, Vec::new()),
                })
                .collect(),
            body: Box::new(push(*body, preds)),
        },
        LogicalPlan::Join {
            left,
            right,
            kind,
            condition,
        } => push_join(*left, *right, kind, condition, preds),
        LogicalPlan::CteRef { .. } => wrap(plan, preds),
        other => {
            // Barrier: restart below with nothing to push.
            let rewritten = match other.map_inputs(|p| Ok::<_, Infallible>(push(p, Vec::new()))) {
                Ok(p) => p,
                Err(never) => match never {},
            };
            wrap(rewritten, preds)
        }
    }
}

fn push_join(
    left: LogicalPlan,
    right: LogicalPlan,
    kind: JoinKind,
    condition: Option<Expr>,
    preds: Vec<Expr>,
) -> LogicalPlan {
    let left_names = left.relation_names();
    let right_names = right.relation_names();
    let mut to_left = Vec::new();
    let mut to_right = Vec::new();
    let mut keep = Vec::new();
    let mut above = Vec::new();

    match kind {
        JoinKind::Inner | JoinKind::Cross => {
            for c in conjuncts(condition).into_iter().chain(preds) {
                match classify(&c, &left_names, &right_names) {
                    Side::Left => to_left.push(c),
                    Side::Right => to_right.push(c),
                    Side::Both => keep.push(c),
                }
            }
        }
        JoinKind::Left | JoinKind::Semi | JoinKind::Anti => {
            for p in preds {
                match classify(&p, &left_names, &right_names) {
                    Side::Left => to_left.push(p),
                    _ => above.push(p),
                }
            }
            for c in conjuncts(condition) {
                match classify(&c, &left_names, &right_names) {
                    Side::Right => to_right.push(c),
                    _ => keep.push(c),
                }
            }
        }
        JoinKind::Right => {
            for p in preds {
                match classify(&p, &left_names, &right_names) {
                    Side::Right => to_right.push(p),
                    _ => above.push(p),
                }
            }
            for c in conjuncts(condition) {
                match classify(&c, &left_names, &right_names) {
                    Side::Left => to_left.push(c),
                    _ => keep.push(c),
                }
            }
        }
        JoinKind::Full => {
            above = preds;
            keep = conjuncts(condition);
        }
    }

    let kind = if kind == JoinKind::Cross && !keep.is_empty() {
        JoinKind::Inner
    } else {
        kind
    };
    let join = LogicalPlan::Join {
        left: Box::new(push(left, to_left)),
        right: Box::new(push(right, to_right)),
        kind,
        condition: Expr::conjunction(keep),
    };
    wrap(join, above)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit};

    fn scan_with(table: &str, alias: &str, predicate: Expr) -> LogicalPlan {
        LogicalPlan::Scan {
            table: table.into(),
            alias: Some(alias.into()),
            predicate: Some(predicate),
        }
    }

    #[test]
    fn test_inner_join_pushes_both_sides() {
        let plan = LogicalPlan::scan_as("products", "p")
            .cross_join(LogicalPlan::scan_as("manufacturers", "m"))
            .filter(
                col("p.price")
                    .lt(lit(50))
                    .and(col("m.name").eq(lit("Acme")))
                    .and(col("p.manufacturer_id").eq(col("m.manufacturer_id"))),
            );

        let out = PredicatePushdown.optimize(plan).unwrap();
        assert_eq!(
            out,
            LogicalPlan::Join {
                left: Box::new(scan_with("products", "p", col("p.price").lt(lit(50)))),
                right: Box::new(scan_with("manufacturers", "m", col("m.name").eq(lit("Acme")))),
                kind: JoinKind::Inner,
                condition: Some(col("p.manufacturer_id").eq(col("m.manufacturer_id"))),
            }
        );
    }

    #[test]
    fn test_left_join_keeps_null_supplying_predicates_above() {
        let plan = LogicalPlan::scan_as("manufacturers", "m")
            .left_join(
                LogicalPlan::scan_as("products", "p"),
                col("p.manufacturer_id")
                    .eq(col("m.manufacturer_id"))
                    .and(col("p.price").gt(lit(10))),
            )
            .filter(col("p.product_id").is_null().and(col("m.name").eq(lit("Acme"))));

        let out = PredicatePushdown.optimize(plan).unwrap();
        let LogicalPlan::Filter { input, predicate } = out else {
            panic!("expected filter above the join");
        };
        assert_eq!(predicate, col("p.product_id").is_null());
        let LogicalPlan::Join {
            left,
            right,
            condition,
            ..
        } = *input
        else {
            panic!("expected join");
        };
        assert_eq!(*left, scan_with("manufacturers", "m", col("m.name").eq(lit("Acme"))));
        assert_eq!(*right, scan_with("products", "p", col("p.price").gt(lit(10))));
        assert_eq!(
            condition,
            Some(col("p.manufacturer_id").eq(col("m.manufacturer_id")))
        );
    }

    #[test]
    fn test_limit_is_a_barrier() {
        let plan = LogicalPlan::scan_as("products", "p")
            .limit(Some(3), 0)
            .filter(col("p.price").lt(lit(50)));
        let out = PredicatePushdown.optimize(plan.clone()).unwrap();
        assert_eq!(out, plan);
    }

    #[test]
    fn test_full_join_pushes_nothing() {
        let plan = LogicalPlan::scan_as("products", "p")
            .join(
                LogicalPlan::scan_as("manufacturers", "m"),
                JoinKind::Full,
                Some(col("p.manufacturer_id").eq(col("m.manufacturer_id"))),
            )
            .filter(col("p.price").lt(lit(50)));
        let out = PredicatePushdown.optimize(plan.clone()).unwrap();
        assert_eq!(out, plan);
    }
}
