//! Logical query plan definitions.
//!
//! A `LogicalPlan` says what to compute. It is built by the caller, never
//! mutated by the planner, and carries no access-method or algorithm choices.

use core::fmt;

use crate::ast::{AggregateExpr, Expr, FrameSpec, SortKey, WindowExpr, WindowFunc};

/// Join kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
    /// Left rows with at least one match; right columns are not output.
    Semi,
    /// Left rows with no match; right columns are not output.
    Anti,
}

impl JoinKind {
    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            JoinKind::Inner => "Inner",
            JoinKind::Left => "Left",
            JoinKind::Right => "Right",
            JoinKind::Full => "Full",
            JoinKind::Cross => "Cross",
            JoinKind::Semi => "Semi",
            JoinKind::Anti => "Anti",
        }
    }

    /// Unmatched left rows are emitted padded with nulls.
    pub fn preserves_left(&self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Full)
    }

    /// Unmatched right rows are emitted padded with nulls.
    pub fn preserves_right(&self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Full)
    }

    /// Only left columns are output.
    pub fn is_filtering(&self) -> bool {
        matches!(self, JoinKind::Semi | JoinKind::Anti)
    }

    /// Inner and cross joins can be freely reordered.
    pub fn is_reorderable(&self) -> bool {
        matches!(self, JoinKind::Inner | JoinKind::Cross)
    }
}

/// Set operation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SetOpKind {
    Union,
    Intersect,
    Except,
}

impl SetOpKind {
    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            SetOpKind::Union => "Union",
            SetOpKind::Intersect => "Intersect",
            SetOpKind::Except => "Except",
        }
    }
}

/// A named common table expression.
#[derive(Clone, Debug, PartialEq)]
pub struct CommonTableExpr {
    pub name: String,
    pub plan: LogicalPlan,
}

/// Logical query plan node.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicalPlan {
    /// Table scan with an optional predicate over the table's columns.
    Scan {
        table: String,
        alias: Option<String>,
        predicate: Option<Expr>,
    },

    /// Filter (WHERE clause).
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },

    /// Projection (SELECT list).
    Project {
        input: Box<LogicalPlan>,
        exprs: Vec<Expr>,
    },

    /// Join two relations.
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        kind: JoinKind,
        condition: Option<Expr>,
    },

    /// Grouping and aggregation; `having` filters the aggregate output.
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        having: Option<Expr>,
    },

    /// Sort (ORDER BY).
    Sort {
        input: Box<LogicalPlan>,
        keys: Vec<SortKey>,
    },

    /// Limit and offset. `count: None` means no limit.
    Limit {
        input: Box<LogicalPlan>,
        count: Option<usize>,
        offset: usize,
    },

    /// UNION / INTERSECT / EXCEPT, with or without ALL.
    SetOp {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        kind: SetOpKind,
        all: bool,
    },

    /// Duplicate elimination.
    Distinct { input: Box<LogicalPlan> },

    /// Window functions sharing one partitioning, ordering and frame.
    Window {
        input: Box<LogicalPlan>,
        partition_by: Vec<Expr>,
        order_by: Vec<SortKey>,
        frame: Option<FrameSpec>,
        functions: Vec<WindowExpr>,
    },

    /// Common table expressions visible in `body`.
    With {
        ctes: Vec<CommonTableExpr>,
        body: Box<LogicalPlan>,
    },

    /// Reference to a common table expression.
    CteRef { name: String, alias: Option<String> },
}

impl LogicalPlan {
    /// Creates a table scan.
    pub fn scan(table: impl Into<String>) -> Self {
        LogicalPlan::Scan {
            table: table.into(),
            alias: None,
            predicate: None,
        }
    }

    /// Creates an aliased table scan.
    pub fn scan_as(table: impl Into<String>, alias: impl Into<String>) -> Self {
        LogicalPlan::Scan {
            table: table.into(),
            alias: Some(alias.into()),
            predicate: None,
        }
    }

    /// Creates a reference to a common table expression.
    pub fn cte_ref(name: impl Into<String>) -> Self {
        LogicalPlan::CteRef {
            name: name.into(),
            alias: None,
        }
    }

    /// Creates an aliased reference to a common table expression.
    pub fn cte_ref_as(name: impl Into<String>, alias: impl Into<String>) -> Self {
        LogicalPlan::CteRef {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// Wraps `body` with common table expressions.
    pub fn with(ctes: Vec<(&str, LogicalPlan)>, body: LogicalPlan) -> Self {
        LogicalPlan::With {
            ctes: ctes
                .into_iter()
                .map(|(name, plan)| CommonTableExpr {
                    name: name.to_string(),
                    plan,
                })
                .collect(),
            body: Box::new(body),
        }
    }

    /// Adds a filter.
    pub fn filter(self, predicate: Expr) -> Self {
        LogicalPlan::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    /// Adds a projection.
    pub fn project(self, exprs: Vec<Expr>) -> Self {
        LogicalPlan::Project {
            input: Box::new(self),
            exprs,
        }
    }

    /// Joins with `right`.
    pub fn join(self, right: LogicalPlan, kind: JoinKind, condition: Option<Expr>) -> Self {
        LogicalPlan::Join {
            left: Box::new(self),
            right: Box::new(right),
            kind,
            condition,
        }
    }

    /// Inner join on `condition`.
    pub fn inner_join(self, right: LogicalPlan, condition: Expr) -> Self {
        self.join(right, JoinKind::Inner, Some(condition))
    }

    /// Left outer join on `condition`.
    pub fn left_join(self, right: LogicalPlan, condition: Expr) -> Self {
        self.join(right, JoinKind::Left, Some(condition))
    }

    /// Cross join.
    pub fn cross_join(self, right: LogicalPlan) -> Self {
        self.join(right, JoinKind::Cross, None)
    }

    /// Adds an aggregation.
    pub fn aggregate(
        self,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateExpr>,
        having: Option<Expr>,
    ) -> Self {
        LogicalPlan::Aggregate {
            input: Box::new(self),
            group_by,
            aggregates,
            having,
        }
    }

    /// Adds a sort.
    pub fn sort(self, keys: Vec<SortKey>) -> Self {
        LogicalPlan::Sort {
            input: Box::new(self),
            keys,
        }
    }

    /// Adds LIMIT/OFFSET.
    pub fn limit(self, count: Option<usize>, offset: usize) -> Self {
        LogicalPlan::Limit {
            input: Box::new(self),
            count,
            offset,
        }
    }

    /// Combines with `right` using a set operation.
    pub fn set_op(self, right: LogicalPlan, kind: SetOpKind, all: bool) -> Self {
        LogicalPlan::SetOp {
            left: Box::new(self),
            right: Box::new(right),
            kind,
            all,
        }
    }

    /// UNION (distinct) with `right`.
    pub fn union(self, right: LogicalPlan) -> Self {
        self.set_op(right, SetOpKind::Union, false)
    }

    /// UNION ALL with `right`.
    pub fn union_all(self, right: LogicalPlan) -> Self {
        self.set_op(right, SetOpKind::Union, true)
    }

    /// Removes duplicate rows.
    pub fn distinct(self) -> Self {
        LogicalPlan::Distinct {
            input: Box::new(self),
        }
    }

    /// Adds window functions.
    pub fn window(
        self,
        partition_by: Vec<Expr>,
        order_by: Vec<SortKey>,
        frame: Option<FrameSpec>,
        functions: Vec<WindowExpr>,
    ) -> Self {
        LogicalPlan::Window {
            input: Box::new(self),
            partition_by,
            order_by,
            frame,
            functions,
        }
    }

    /// Direct inputs, CTE bodies before the main body.
    pub fn inputs(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Scan { .. } | LogicalPlan::CteRef { .. } => Vec::new(),
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Distinct { input }
            | LogicalPlan::Window { input, .. } => vec![input.as_ref()],
            LogicalPlan::Join { left, right, .. } | LogicalPlan::SetOp { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            LogicalPlan::With { ctes, body } => {
                let mut out: Vec<&LogicalPlan> = ctes.iter().map(|c| &c.plan).collect();
                out.push(body.as_ref());
                out
            }
        }
    }

    /// Names under which the relations produced by this subtree can be referenced.
    pub fn relation_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_relation_names(&mut out);
        out
    }

    fn collect_relation_names(&self, out: &mut Vec<String>) {
        match self {
            LogicalPlan::Scan { table, alias, .. } => {
                out.push(alias.clone().unwrap_or_else(|| table.clone()))
            }
            LogicalPlan::CteRef { name, alias } => {
                out.push(alias.clone().unwrap_or_else(|| name.clone()))
            }
            LogicalPlan::Join {
                left, right, kind, ..
            } => {
                left.collect_relation_names(out);
                if !kind.is_filtering() {
                    right.collect_relation_names(out);
                }
            }
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Distinct { input }
            | LogicalPlan::Window { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Project { input, .. } => input.collect_relation_names(out),
            LogicalPlan::With { body, .. } => body.collect_relation_names(out),
            LogicalPlan::SetOp { .. } => {}
        }
    }

    /// Rebuilds this node with `f` applied to each direct input.
    pub fn map_inputs<E>(
        self,
        mut f: impl FnMut(LogicalPlan) -> Result<LogicalPlan, E>,
    ) -> Result<LogicalPlan, E> {
        let mut apply = |p: Box<LogicalPlan>| f(*p).map(Box::new);
        Ok(match self {
            LogicalPlan::Scan { .. } | LogicalPlan::CteRef { .. } => self,
            LogicalPlan::Filter { input, predicate } => LogicalPlan::Filter {
                input: apply(input)?,
                predicate,
            },
            LogicalPlan::Project { input, exprs } => LogicalPlan::Project {
                input: apply(input)?,
                exprs,
            },
            LogicalPlan::Join {
                left,
                right,
                kind,
                condition,
            } => LogicalPlan::Join {
                left: apply(left)?,
                right: apply(right)?,
                kind,
                condition,
            },
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                having,
            } => LogicalPlan::Aggregate {
                input: apply(input)?,
                group_by,
                aggregates,
                having,
            },
            LogicalPlan::Sort { input, keys } => LogicalPlan::Sort {
                input: apply(input)?,
                keys,
            },
            LogicalPlan::Limit {
                input,
                count,
                offset,
            } => LogicalPlan::Limit {
                input: apply(input)?,
                count,
                offset,
            },
            LogicalPlan::SetOp {
                left,
                right,
                kind,
                all,
            } => LogicalPlan::SetOp {
                left: apply(left)?,
                right: apply(right)?,
                kind,
                all,
            },
            LogicalPlan::Distinct { input } => LogicalPlan::Distinct {
                input: apply(input)?,
            },
            LogicalPlan::Window {
                input,
                partition_by,
                order_by,
                frame,
                functions,
            } => LogicalPlan::Window {
                input: apply(input)?,
                partition_by,
                order_by,
                frame,
                functions,
            },
            LogicalPlan::With { ctes, body } => {
                let mut mapped = Vec::with_capacity(ctes.len());
                for cte in ctes {
                    mapped.push(CommonTableExpr {
                        name: cte.name,
                        plan: *apply(Box::new(cte.plan))?,
                    });
                }
                LogicalPlan::With {
                    ctes: mapped,
                    body: apply(body)?,
                }
            }
        })
    }

    /// Calls `f` for every expression held by this node (not its inputs).
    pub fn for_each_expr<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        match self {
            LogicalPlan::Scan { predicate, .. } => predicate.iter().for_each(f),
            LogicalPlan::Filter { predicate, .. } => f(predicate),
            LogicalPlan::Project { exprs, .. } => exprs.iter().for_each(f),
            LogicalPlan::Join { condition, .. } => condition.iter().for_each(f),
            LogicalPlan::Aggregate {
                group_by,
                aggregates,
                having,
                ..
            } => {
                group_by.iter().for_each(&mut *f);
                for agg in aggregates {
                    agg.arg.iter().for_each(&mut *f);
                    agg.filter.iter().for_each(&mut *f);
                }
                having.iter().for_each(f);
            }
            LogicalPlan::Sort { keys, .. } => keys.iter().for_each(|k| f(&k.expr)),
            LogicalPlan::Window {
                partition_by,
                order_by,
                functions,
                ..
            } => {
                partition_by.iter().for_each(&mut *f);
                order_by.iter().for_each(|k| f(&k.expr));
                for func in functions {
                    match &func.func {
                        WindowFunc::Lag { expr, .. } | WindowFunc::Lead { expr, .. } => f(expr),
                        WindowFunc::Aggregate { arg: Some(arg), .. } => f(arg),
                        _ => {}
                    }
                }
            }
            LogicalPlan::Limit { .. }
            | LogicalPlan::SetOp { .. }
            | LogicalPlan::Distinct { .. }
            | LogicalPlan::With { .. }
            | LogicalPlan::CteRef { .. } => {}
        }
    }

    /// Short operator name.
    pub fn name(&self) -> &'static str {
        match self {
            LogicalPlan::Scan { .. } => "Scan",
            LogicalPlan::Filter { .. } => "Filter",
            LogicalPlan::Project { .. } => "Project",
            LogicalPlan::Join { .. } => "Join",
            LogicalPlan::Aggregate { .. } => "Aggregate",
            LogicalPlan::Sort { .. } => "Sort",
            LogicalPlan::Limit { .. } => "Limit",
            LogicalPlan::SetOp { .. } => "SetOp",
            LogicalPlan::Distinct { .. } => "Distinct",
            LogicalPlan::Window { .. } => "Window",
            LogicalPlan::With { .. } => "With",
            LogicalPlan::CteRef { .. } => "CteRef",
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.name(), indent = depth * 2)?;
        match self {
            LogicalPlan::Scan {
                table,
                alias,
                predicate,
            } => {
                write!(f, " {}", table)?;
                if let Some(a) = alias {
                    write!(f, " AS {}", a)?;
                }
                if let Some(p) = predicate {
                    write!(f, " [{}]", p)?;
                }
            }
            LogicalPlan::Filter { predicate, .. } => write!(f, " [{}]", predicate)?,
            LogicalPlan::Join {
                kind, condition, ..
            } => {
                write!(f, " {}", kind.name())?;
                if let Some(c) = condition {
                    write!(f, " [{}]", c)?;
                }
            }
            LogicalPlan::CteRef { name, .. } => write!(f, " {}", name)?,
            LogicalPlan::SetOp { kind, all, .. } => {
                write!(f, " {}{}", kind.name(), if *all { " All" } else { "" })?
            }
            _ => {}
        }
        writeln!(f)?;
        for input in self.inputs() {
            input.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit};

    #[test]
    fn test_builders_and_inputs() {
        let plan = LogicalPlan::scan_as("products", "p")
            .inner_join(
                LogicalPlan::scan_as("manufacturers", "m"),
                col("p.manufacturer_id").eq(col("m.manufacturer_id")),
            )
            .filter(col("p.price").gt(lit(100)))
            .limit(Some(5), 0);

        assert_eq!(plan.name(), "Limit");
        assert_eq!(plan.inputs().len(), 1);
        assert_eq!(plan.relation_names(), vec!["p".to_string(), "m".to_string()]);
    }

    #[test]
    fn test_semi_join_hides_right_relations() {
        let plan = LogicalPlan::scan("orders").join(
            LogicalPlan::scan("order_items"),
            JoinKind::Semi,
            None,
        );
        assert_eq!(plan.relation_names(), vec!["orders".to_string()]);
    }

    #[test]
    fn test_display_tree() {
        let plan = LogicalPlan::scan("products").filter(col("price").lt(lit(50)));
        assert_eq!(plan.to_string(), "Filter [price < 50]\n  Scan products\n");
    }

    #[test]
    fn test_join_kind_sides() {
        assert!(JoinKind::Left.preserves_left());
        assert!(!JoinKind::Left.preserves_right());
        assert!(JoinKind::Full.preserves_right());
        assert!(JoinKind::Anti.is_filtering());
        assert!(JoinKind::Cross.is_reorderable());
    }
}
