//! Name binding and type checking.
//!
//! Binding turns an `Expr` into a `BoundExpr` whose column references are
//! positions in an input schema. Every type rule is checked here, so the
//! executor only ever sees well-typed expressions.

use core::fmt;

use tern_core::{DataType, Value};

use crate::ast::{
    AggregateExpr, AggregateFunc, BinaryOp, Expr, ScalarFunc, SortKey, SortOrder, UnaryOp,
    WindowFunc,
};
use crate::error::{QueryError, QueryResult};
use crate::planner::{LogicalPlan, PhysicalPlan, Schema};

/// Plans the uncorrelated subqueries met while binding.
pub trait SubqueryPlanner {
    /// Plans `plan` as an independent query.
    fn plan_subquery(&mut self, plan: &LogicalPlan) -> QueryResult<PhysicalPlan>;
}

/// Binds expressions that may not contain subqueries.
pub struct NoSubqueries;

impl SubqueryPlanner for NoSubqueries {
    fn plan_subquery(&mut self, _plan: &LogicalPlan) -> QueryResult<PhysicalPlan> {
        Err(QueryError::unsupported("subquery in this position"))
    }
}

/// An expression with column references resolved to input positions.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundExpr {
    Column {
        index: usize,
        name: String,
        data_type: Option<DataType>,
    },
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<BoundExpr>,
    },
    Function {
        func: ScalarFunc,
        args: Vec<BoundExpr>,
    },
    Case {
        branches: Vec<(BoundExpr, BoundExpr)>,
        otherwise: Option<Box<BoundExpr>>,
    },
    InList {
        expr: Box<BoundExpr>,
        list: Vec<BoundExpr>,
        negated: bool,
    },
    Between {
        expr: Box<BoundExpr>,
        low: Box<BoundExpr>,
        high: Box<BoundExpr>,
        negated: bool,
    },
    /// Uncorrelated scalar subquery, evaluated once before execution starts.
    Subquery {
        plan: Box<PhysicalPlan>,
        data_type: Option<DataType>,
    },
}

impl BoundExpr {
    /// Reference to input column `index`.
    pub fn column(index: usize, schema: &Schema) -> Self {
        let field = schema.field(index);
        BoundExpr::Column {
            index,
            name: field.map(|f| f.to_string()).unwrap_or_default(),
            data_type: field.and_then(|f| f.data_type),
        }
    }

    /// Result type; None when the expression is always null.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            BoundExpr::Column { data_type, .. } | BoundExpr::Subquery { data_type, .. } => *data_type,
            BoundExpr::Literal(v) => v.data_type(),
            BoundExpr::Binary { op, left, right } => {
                binary_result_type(*op, left.data_type(), right.data_type())
            }
            BoundExpr::Unary { op, expr } => match op {
                UnaryOp::Neg => expr.data_type(),
                _ => Some(DataType::Boolean),
            },
            BoundExpr::Function { func, args } => function_result_type(*func, args),
            BoundExpr::Case {
                branches,
                otherwise,
            } => branches
                .iter()
                .map(|(_, then)| then.data_type())
                .chain(otherwise.iter().map(|e| e.data_type()))
                .fold(None, merge_types),
            BoundExpr::InList { .. } | BoundExpr::Between { .. } => Some(DataType::Boolean),
        }
    }

    /// Position of the referenced column when this is a plain column.
    pub fn column_index(&self) -> Option<usize> {
        match self {
            BoundExpr::Column { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Literal value when this is a literal.
    pub fn literal(&self) -> Option<&Value> {
        match self {
            BoundExpr::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Input positions referenced, not counting subqueries.
    pub fn columns(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let BoundExpr::Column { index, .. } = e {
                if !out.contains(index) {
                    out.push(*index);
                }
            }
        });
        out
    }

    /// Calls `f` for each node, pre-order, not descending into subqueries.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a BoundExpr)) {
        f(self);
        match self {
            BoundExpr::Column { .. } | BoundExpr::Literal(_) | BoundExpr::Subquery { .. } => {}
            BoundExpr::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            BoundExpr::Unary { expr, .. } => expr.visit(f),
            BoundExpr::Function { args, .. } => args.iter().for_each(|a| a.visit(f)),
            BoundExpr::Case {
                branches,
                otherwise,
            } => {
                for (when, then) in branches {
                    when.visit(f);
                    then.visit(f);
                }
                if let Some(e) = otherwise {
                    e.visit(f);
                }
            }
            BoundExpr::InList { expr, list, .. } => {
                expr.visit(f);
                list.iter().for_each(|e| e.visit(f));
            }
            BoundExpr::Between {
                expr, low, high, ..
            } => {
                expr.visit(f);
                low.visit(f);
                high.visit(f);
            }
        }
    }

    /// Subquery plans inside this expression.
    pub fn subqueries(&self) -> Vec<&PhysicalPlan> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let BoundExpr::Subquery { plan, .. } = e {
                out.push(plan.as_ref());
            }
        });
        out
    }

    /// Mutable access to the subquery plans inside this expression.
    pub fn subqueries_mut(&mut self) -> Vec<&mut PhysicalPlan> {
        let mut out = Vec::new();
        self.collect_subqueries_mut(&mut out);
        out
    }

    fn collect_subqueries_mut<'a>(&'a mut self, out: &mut Vec<&'a mut PhysicalPlan>) {
        match self {
            BoundExpr::Subquery { plan, .. } => out.push(plan.as_mut()),
            BoundExpr::Column { .. } | BoundExpr::Literal(_) => {}
            BoundExpr::Binary { left, right, .. } => {
                left.collect_subqueries_mut(out);
                right.collect_subqueries_mut(out);
            }
            BoundExpr::Unary { expr, .. } => expr.collect_subqueries_mut(out),
            BoundExpr::Function { args, .. } => {
                args.iter_mut().for_each(|a| a.collect_subqueries_mut(out))
            }
            BoundExpr::Case {
                branches,
                otherwise,
            } => {
                for (when, then) in branches {
                    when.collect_subqueries_mut(out);
                    then.collect_subqueries_mut(out);
                }
                if let Some(e) = otherwise {
                    e.collect_subqueries_mut(out);
                }
            }
            BoundExpr::InList { expr, list, .. } => {
                expr.collect_subqueries_mut(out);
                list.iter_mut().for_each(|e| e.collect_subqueries_mut(out));
            }
            BoundExpr::Between {
                expr, low, high, ..
            } => {
                expr.collect_subqueries_mut(out);
                low.collect_subqueries_mut(out);
                high.collect_subqueries_mut(out);
            }
        }
    }

    /// Direct sub-expressions, for rewriting in place.
    pub(crate) fn operands_mut(&mut self) -> Vec<&mut BoundExpr> {
        match self {
            BoundExpr::Column { .. } | BoundExpr::Literal(_) | BoundExpr::Subquery { .. } => {
                Vec::new()
            }
            BoundExpr::Binary { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            BoundExpr::Unary { expr, .. } => vec![expr.as_mut()],
            BoundExpr::Function { args, .. } => args.iter_mut().collect(),
            BoundExpr::Case {
                branches,
                otherwise,
            } => {
                let mut out: Vec<&mut BoundExpr> = Vec::new();
                for (when, then) in branches {
                    out.push(when);
                    out.push(then);
                }
                out.extend(otherwise.as_deref_mut());
                out
            }
            BoundExpr::InList { expr, list, .. } => {
                let mut out = vec![expr.as_mut()];
                out.extend(list.iter_mut());
                out
            }
            BoundExpr::Between {
                expr, low, high, ..
            } => vec![expr.as_mut(), low.as_mut(), high.as_mut()],
        }
    }

    /// Rewrites every column position with `f`.
    pub fn remap(&self, f: &impl Fn(usize) -> usize) -> BoundExpr {
        let boxed = |e: &BoundExpr| Box::new(e.remap(f));
        match self {
            BoundExpr::Column {
                index,
                name,
                data_type,
            } => BoundExpr::Column {
                index: f(*index),
                name: name.clone(),
                data_type: *data_type,
            },
            BoundExpr::Literal(_) | BoundExpr::Subquery { .. } => self.clone(),
            BoundExpr::Binary { op, left, right } => BoundExpr::Binary {
                op: *op,
                left: boxed(left),
                right: boxed(right),
            },
            BoundExpr::Unary { op, expr } => BoundExpr::Unary {
                op: *op,
                expr: boxed(expr),
            },
            BoundExpr::Function { func, args } => BoundExpr::Function {
                func: *func,
                args: args.iter().map(|a| a.remap(f)).collect(),
            },
            BoundExpr::Case {
                branches,
                otherwise,
            } => BoundExpr::Case {
                branches: branches
                    .iter()
                    .map(|(w, t)| (w.remap(f), t.remap(f)))
                    .collect(),
                otherwise: otherwise.as_ref().map(|e| boxed(e)),
            },
            BoundExpr::InList {
                expr,
                list,
                negated,
            } => BoundExpr::InList {
                expr: boxed(expr),
                list: list.iter().map(|e| e.remap(f)).collect(),
                negated: *negated,
            },
            BoundExpr::Between {
                expr,
                low,
                high,
                negated,
            } => BoundExpr::Between {
                expr: boxed(expr),
                low: boxed(low),
                high: boxed(high),
                negated: *negated,
            },
        }
    }

    /// Splits a conjunction into its terms.
    pub fn into_conjuncts(self) -> Vec<BoundExpr> {
        match self {
            BoundExpr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut out = left.into_conjuncts();
                out.extend(right.into_conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// Joins terms with AND.
    pub fn conjunction(terms: Vec<BoundExpr>) -> Option<BoundExpr> {
        terms.into_iter().reduce(|acc, e| BoundExpr::Binary {
            op: BinaryOp::And,
            left: Box::new(acc),
            right: Box::new(e),
        })
    }
}

fn fmt_operand(expr: &BoundExpr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match expr {
        BoundExpr::Binary { .. } | BoundExpr::Between { .. } | BoundExpr::InList { .. } => {
            write!(f, "({})", expr)
        }
        _ => write!(f, "{}", expr),
    }
}

impl fmt::Display for BoundExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundExpr::Column { name, .. } => f.write_str(name),
            BoundExpr::Literal(v) => write!(f, "{}", v),
            BoundExpr::Binary { op, left, right } => {
                fmt_operand(left, f)?;
                write!(f, " {} ", op.symbol())?;
                fmt_operand(right, f)
            }
            BoundExpr::Unary { op, expr } => match op {
                UnaryOp::Not => {
                    f.write_str("NOT ")?;
                    fmt_operand(expr, f)
                }
                UnaryOp::Neg => {
                    f.write_str("-")?;
                    fmt_operand(expr, f)
                }
                UnaryOp::IsNull => {
                    fmt_operand(expr, f)?;
                    f.write_str(" IS NULL")
                }
                UnaryOp::IsNotNull => {
                    fmt_operand(expr, f)?;
                    f.write_str(" IS NOT NULL")
                }
            },
            BoundExpr::Function { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                f.write_str(")")
            }
            BoundExpr::Case {
                branches,
                otherwise,
            } => {
                f.write_str("CASE")?;
                for (when, then) in branches {
                    write!(f, " WHEN {} THEN {}", when, then)?;
                }
                if let Some(e) = otherwise {
                    write!(f, " ELSE {}", e)?;
                }
                f.write_str(" END")
            }
            BoundExpr::InList {
                expr,
                list,
                negated,
            } => {
                fmt_operand(expr, f)?;
                f.write_str(if *negated { " NOT IN (" } else { " IN (" })?;
                for (i, e) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                f.write_str(")")
            }
            BoundExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                fmt_operand(expr, f)?;
                let kw = if *negated { " NOT BETWEEN " } else { " BETWEEN " };
                write!(f, "{}{} AND {}", kw, low, high)
            }
            BoundExpr::Subquery { plan, .. } => write!(f, "$subplan{}", plan.id),
        }
    }
}

/// A bound aggregate.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundAggregate {
    pub func: AggregateFunc,
    pub arg: Option<BoundExpr>,
    pub distinct: bool,
    pub filter: Option<BoundExpr>,
    pub alias: String,
    pub data_type: Option<DataType>,
}

impl fmt::Display for BoundAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.func.name())?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        match &self.arg {
            Some(arg) => write!(f, "{}", arg)?,
            None => f.write_str("*")?,
        }
        f.write_str(")")?;
        if let Some(filter) = &self.filter {
            write!(f, " FILTER (WHERE {})", filter)?;
        }
        Ok(())
    }
}

/// A bound sort key.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundSortKey {
    pub expr: BoundExpr,
    pub order: SortOrder,
}

impl fmt::Display for BoundSortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            SortOrder::Asc => write!(f, "{}", self.expr),
            SortOrder::Desc => write!(f, "{} DESC", self.expr),
        }
    }
}

/// A bound window function.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundWindowFunc {
    RowNumber,
    Rank,
    DenseRank,
    Lag {
        expr: BoundExpr,
        offset: usize,
        default: Value,
    },
    Lead {
        expr: BoundExpr,
        offset: usize,
        default: Value,
    },
    Aggregate {
        func: AggregateFunc,
        arg: Option<BoundExpr>,
    },
}

impl BoundWindowFunc {
    /// SQL name of the function.
    pub fn name(&self) -> &'static str {
        match self {
            BoundWindowFunc::RowNumber => "row_number",
            BoundWindowFunc::Rank => "rank",
            BoundWindowFunc::DenseRank => "dense_rank",
            BoundWindowFunc::Lag { .. } => "lag",
            BoundWindowFunc::Lead { .. } => "lead",
            BoundWindowFunc::Aggregate { func, .. } => func.name(),
        }
    }

    /// Result type.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            BoundWindowFunc::RowNumber | BoundWindowFunc::Rank | BoundWindowFunc::DenseRank => {
                Some(DataType::Integer)
            }
            BoundWindowFunc::Lag { expr, default, .. }
            | BoundWindowFunc::Lead { expr, default, .. } => {
                merge_types(expr.data_type(), default.data_type())
            }
            BoundWindowFunc::Aggregate { func, arg } => {
                aggregate_result_type(*func, arg.as_ref().and_then(|a| a.data_type()))
            }
        }
    }
}

impl fmt::Display for BoundWindowFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundWindowFunc::Lag {
                expr,
                offset,
                default,
            }
            | BoundWindowFunc::Lead {
                expr,
                offset,
                default,
            } => write!(f, "{}({}, {}, {})", self.name(), expr, offset, default),
            BoundWindowFunc::Aggregate { arg: Some(a), .. } => write!(f, "{}({})", self.name(), a),
            BoundWindowFunc::Aggregate { arg: None, .. } => write!(f, "{}(*)", self.name()),
            _ => write!(f, "{}()", self.name()),
        }
    }
}

/// Binds `expr` against `schema`.
pub fn bind_expr(
    expr: &Expr,
    schema: &Schema,
    subqueries: &mut dyn SubqueryPlanner,
) -> QueryResult<BoundExpr> {
    let mut bind = |e: &Expr| bind_expr(e, schema, &mut *subqueries);
    let bound = match expr {
        Expr::Column(c) => BoundExpr::column(schema.resolve(c)?, schema),
        Expr::Literal(v) => BoundExpr::Literal(v.clone()),
        Expr::Alias { expr, .. } => return bind(expr),
        Expr::Binary { op, left, right } => {
            let left = bind(left)?;
            let right = bind(right)?;
            check_binary(*op, &left, &right)?;
            BoundExpr::Binary {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        Expr::Unary { op, expr } => {
            let inner = bind(expr)?;
            match op {
                UnaryOp::Not => expect_type(&inner, DataType::Boolean, "NOT")?,
                UnaryOp::Neg => expect_numeric(&inner, "unary minus")?,
                UnaryOp::IsNull | UnaryOp::IsNotNull => {}
            }
            BoundExpr::Unary {
                op: *op,
                expr: Box::new(inner),
            }
        }
        Expr::Function { func, args } => {
            let args = args.iter().map(&mut bind).collect::<QueryResult<Vec<_>>>()?;
            check_function(*func, &args)?;
            BoundExpr::Function { func: *func, args }
        }
        Expr::Case {
            branches,
            otherwise,
        } => {
            let mut bound = Vec::with_capacity(branches.len());
            let mut result = None;
            for (when, then) in branches {
                let when = bind(when)?;
                expect_type(&when, DataType::Boolean, "CASE WHEN")?;
                let then = bind(then)?;
                result = unify(result, then.data_type(), "CASE branches")?;
                bound.push((when, then));
            }
            let otherwise = match otherwise {
                Some(e) => {
                    let e = bind(e)?;
                    unify(result, e.data_type(), "CASE branches")?;
                    Some(Box::new(e))
                }
                None => None,
            };
            BoundExpr::Case {
                branches: bound,
                otherwise,
            }
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let inner = bind(expr)?;
            let list = list.iter().map(&mut bind).collect::<QueryResult<Vec<_>>>()?;
            for item in &list {
                check_comparable(&inner, item, "IN")?;
            }
            BoundExpr::InList {
                expr: Box::new(inner),
                list,
                negated: *negated,
            }
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let inner = bind(expr)?;
            let low = bind(low)?;
            let high = bind(high)?;
            check_comparable(&inner, &low, "BETWEEN")?;
            check_comparable(&inner, &high, "BETWEEN")?;
            BoundExpr::Between {
                expr: Box::new(inner),
                low: Box::new(low),
                high: Box::new(high),
                negated: *negated,
            }
        }
        Expr::ScalarSubquery(plan) => {
            let plan = subqueries.plan_subquery(plan)?;
            if plan.schema.len() != 1 {
                return Err(QueryError::type_mismatch(format!(
                    "scalar subquery must return one column, got {}",
                    plan.schema.len()
                )));
            }
            let data_type = plan.schema.fields()[0].data_type;
            BoundExpr::Subquery {
                plan: Box::new(plan),
                data_type,
            }
        }
        Expr::Exists { .. } => {
            return Err(QueryError::unsupported(
                "EXISTS is only supported as a WHERE conjunct with equality correlation",
            ))
        }
    };
    Ok(bound)
}

/// Binds a predicate and checks that it is boolean.
pub fn bind_predicate(
    expr: &Expr,
    schema: &Schema,
    subqueries: &mut dyn SubqueryPlanner,
) -> QueryResult<BoundExpr> {
    let bound = bind_expr(expr, schema, subqueries)?;
    expect_type(&bound, DataType::Boolean, "predicate")?;
    Ok(bound)
}

/// Binds an aggregate against its input schema.
pub fn bind_aggregate(
    agg: &AggregateExpr,
    schema: &Schema,
    subqueries: &mut dyn SubqueryPlanner,
) -> QueryResult<BoundAggregate> {
    let arg = match &agg.arg {
        Some(e) => Some(bind_expr(e, schema, subqueries)?),
        None if agg.func == AggregateFunc::Count => None,
        None => {
            return Err(QueryError::type_mismatch(format!(
                "{}(*) is not valid",
                agg.func.name()
            )))
        }
    };
    check_aggregate_arg(agg.func, arg.as_ref())?;
    let filter = match &agg.filter {
        Some(e) => Some(bind_predicate(e, schema, subqueries)?),
        None => None,
    };
    let data_type = aggregate_result_type(agg.func, arg.as_ref().and_then(|a| a.data_type()));
    Ok(BoundAggregate {
        func: agg.func,
        arg,
        distinct: agg.distinct,
        filter,
        alias: agg.alias.clone(),
        data_type,
    })
}

/// Binds a sort key.
pub fn bind_sort_key(
    key: &SortKey,
    schema: &Schema,
    subqueries: &mut dyn SubqueryPlanner,
) -> QueryResult<BoundSortKey> {
    Ok(BoundSortKey {
        expr: bind_expr(&key.expr, schema, subqueries)?,
        order: key.order,
    })
}

/// Binds a window function.
pub fn bind_window_func(
    func: &WindowFunc,
    schema: &Schema,
    subqueries: &mut dyn SubqueryPlanner,
) -> QueryResult<BoundWindowFunc> {
    Ok(match func {
        WindowFunc::RowNumber => BoundWindowFunc::RowNumber,
        WindowFunc::Rank => BoundWindowFunc::Rank,
        WindowFunc::DenseRank => BoundWindowFunc::DenseRank,
        WindowFunc::Lag {
            expr,
            offset,
            default,
        } => {
            let expr = bind_expr(expr, schema, subqueries)?;
            unify(expr.data_type(), default.data_type(), "LAG default")?;
            BoundWindowFunc::Lag {
                expr,
                offset: *offset,
                default: default.clone(),
            }
        }
        WindowFunc::Lead {
            expr,
            offset,
            default,
        } => {
            let expr = bind_expr(expr, schema, subqueries)?;
            unify(expr.data_type(), default.data_type(), "LEAD default")?;
            BoundWindowFunc::Lead {
                expr,
                offset: *offset,
                default: default.clone(),
            }
        }
        WindowFunc::Aggregate { func, arg } => {
            let arg = match arg {
                Some(e) => Some(bind_expr(e, schema, subqueries)?),
                None if *func == AggregateFunc::Count => None,
                None => {
                    return Err(QueryError::type_mismatch(format!(
                        "{}(*) is not valid",
                        func.name()
                    )))
                }
            };
            check_aggregate_arg(*func, arg.as_ref())?;
            BoundWindowFunc::Aggregate { func: *func, arg }
        }
    })
}

/// Result type of an aggregate over an argument of type `arg`.
pub fn aggregate_result_type(func: AggregateFunc, arg: Option<DataType>) -> Option<DataType> {
    match func {
        AggregateFunc::Count => Some(DataType::Integer),
        AggregateFunc::Avg => Some(DataType::Decimal),
        AggregateFunc::Sum => match arg {
            Some(DataType::Integer) => Some(DataType::Integer),
            _ => Some(DataType::Decimal),
        },
        AggregateFunc::Min | AggregateFunc::Max => arg,
    }
}

fn check_aggregate_arg(func: AggregateFunc, arg: Option<&BoundExpr>) -> QueryResult<()> {
    if matches!(func, AggregateFunc::Sum | AggregateFunc::Avg) {
        if let Some(arg) = arg {
            expect_numeric(arg, func.name())?;
        }
    }
    Ok(())
}

fn merge_types(a: Option<DataType>, b: Option<DataType>) -> Option<DataType> {
    match (a, b) {
        (Some(a), Some(b)) => a.common_type(b).or(Some(a)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn unify(a: Option<DataType>, b: Option<DataType>, context: &str) -> QueryResult<Option<DataType>> {
    match (a, b) {
        (Some(x), Some(y)) => x.common_type(y).map(Some).ok_or_else(|| {
            QueryError::type_mismatch(format!("{}: {} and {} are incompatible", context, x, y))
        }),
        (a, None) => Ok(a),
        (None, b) => Ok(b),
    }
}

fn expect_type(expr: &BoundExpr, expected: DataType, context: &str) -> QueryResult<()> {
    match expr.data_type() {
        Some(t) if t != expected => Err(QueryError::type_mismatch(format!(
            "{} expects {}, got {} in '{}'",
            context, expected, t, expr
        ))),
        _ => Ok(()),
    }
}

fn expect_numeric(expr: &BoundExpr, context: &str) -> QueryResult<()> {
    match expr.data_type() {
        Some(t) if !t.is_numeric() => Err(QueryError::type_mismatch(format!(
            "{} expects a numeric argument, got {} in '{}'",
            context, t, expr
        ))),
        _ => Ok(()),
    }
}

fn check_comparable(left: &BoundExpr, right: &BoundExpr, context: &str) -> QueryResult<()> {
    match (left.data_type(), right.data_type()) {
        (Some(l), Some(r)) if !l.is_comparable_with(r) => Err(QueryError::type_mismatch(format!(
            "cannot compare {} with {} in {} ('{}' vs '{}')",
            l, r, context, left, right
        ))),
        _ => Ok(()),
    }
}

fn binary_result_type(
    op: BinaryOp,
    left: Option<DataType>,
    right: Option<DataType>,
) -> Option<DataType> {
    if op.is_arithmetic() {
        match (left, right) {
            (Some(DataType::Timestamp), Some(DataType::Timestamp)) => Some(DataType::Integer),
            (Some(DataType::Timestamp), _) | (_, Some(DataType::Timestamp)) => {
                Some(DataType::Timestamp)
            }
            (l, r) => merge_types(l, r),
        }
    } else {
        Some(DataType::Boolean)
    }
}

fn check_binary(op: BinaryOp, left: &BoundExpr, right: &BoundExpr) -> QueryResult<()> {
    match op {
        BinaryOp::And | BinaryOp::Or => {
            expect_type(left, DataType::Boolean, op.symbol())?;
            expect_type(right, DataType::Boolean, op.symbol())
        }
        BinaryOp::Like => {
            expect_type(left, DataType::Text, "LIKE")?;
            expect_type(right, DataType::Text, "LIKE")
        }
        op if op.is_comparison() => check_comparable(left, right, op.symbol()),
        op => {
            let ts = Some(DataType::Timestamp);
            let (l, r) = (left.data_type(), right.data_type());
            let timestamp_ok = match op {
                BinaryOp::Add => {
                    (l == ts && r.map_or(true, |t| t == DataType::Integer))
                        || (r == ts && l.map_or(true, |t| t == DataType::Integer))
                }
                BinaryOp::Sub => {
                    l == ts && r.map_or(true, |t| t == DataType::Integer || t == DataType::Timestamp)
                }
                _ => false,
            };
            if timestamp_ok {
                return Ok(());
            }
            expect_numeric(left, op.symbol())?;
            expect_numeric(right, op.symbol())
        }
    }
}

fn check_function(func: ScalarFunc, args: &[BoundExpr]) -> QueryResult<()> {
    let arity_error = |expected: &str| {
        Err(QueryError::type_mismatch(format!(
            "{} expects {} argument(s), got {}",
            func.name(),
            expected,
            args.len()
        )))
    };
    match func {
        ScalarFunc::Lower | ScalarFunc::Upper | ScalarFunc::Length => {
            if args.len() != 1 {
                return arity_error("1");
            }
            expect_type(&args[0], DataType::Text, func.name())
        }
        ScalarFunc::Abs => {
            if args.len() != 1 {
                return arity_error("1");
            }
            expect_numeric(&args[0], func.name())
        }
        ScalarFunc::Round => {
            if args.is_empty() || args.len() > 2 {
                return arity_error("1 or 2");
            }
            expect_numeric(&args[0], func.name())?;
            if let Some(digits) = args.get(1) {
                expect_type(digits, DataType::Integer, "round digits")?;
            }
            Ok(())
        }
        ScalarFunc::Coalesce => {
            if args.is_empty() {
                return arity_error("at least 1");
            }
            args.iter()
                .try_fold(None, |acc, a| unify(acc, a.data_type(), "coalesce"))
                .map(|_| ())
        }
    }
}

fn function_result_type(func: ScalarFunc, args: &[BoundExpr]) -> Option<DataType> {
    match func {
        ScalarFunc::Lower | ScalarFunc::Upper => Some(DataType::Text),
        ScalarFunc::Length => Some(DataType::Integer),
        ScalarFunc::Abs | ScalarFunc::Round => args.first().and_then(|a| a.data_type()),
        ScalarFunc::Coalesce => args.iter().map(|a| a.data_type()).fold(None, merge_types),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit};
    use crate::planner::Field;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new(Some("p".into()), "name", Some(DataType::Text), false),
            Field::new(Some("p".into()), "price", Some(DataType::Decimal), false),
            Field::new(Some("p".into()), "stock", Some(DataType::Integer), true),
            Field::new(Some("o".into()), "placed_at", Some(DataType::Timestamp), false),
        ])
    }

    #[test]
    fn test_bind_resolves_positions() {
        let bound = bind_expr(
            &col("p.price").gt(lit(100)).and(col("stock").is_not_null()),
            &schema(),
            &mut NoSubqueries,
        )
        .unwrap();
        let mut cols = bound.columns();
        cols.sort_unstable();
        assert_eq!(cols, vec![1, 2]);
        assert_eq!(bound.data_type(), Some(DataType::Boolean));
        assert_eq!(bound.to_string(), "(p.price > 100) AND p.stock IS NOT NULL");
    }

    #[test]
    fn test_type_errors() {
        let s = schema();
        let cases = vec![
            col("name").gt(lit(3)),
            col("name").add(lit(1)),
            col("price").like("x%"),
            col("price").and(lit(true)),
            Expr::call(ScalarFunc::Lower, vec![col("price")]),
            Expr::call(ScalarFunc::Abs, vec![]),
        ];
        for e in cases {
            assert!(
                matches!(bind_expr(&e, &s, &mut NoSubqueries), Err(QueryError::Type(_))),
                "{} should not type check",
                e
            );
        }
    }

    #[test]
    fn test_numeric_and_timestamp_arithmetic() {
        let s = schema();
        let e = bind_expr(&col("price").mul(col("stock")), &s, &mut NoSubqueries).unwrap();
        assert_eq!(e.data_type(), Some(DataType::Decimal));
        let t = bind_expr(&col("placed_at").add(lit(1000)), &s, &mut NoSubqueries).unwrap();
        assert_eq!(t.data_type(), Some(DataType::Timestamp));
        let d = bind_expr(&col("placed_at").sub(col("placed_at")), &s, &mut NoSubqueries).unwrap();
        assert_eq!(d.data_type(), Some(DataType::Integer));
    }

    #[test]
    fn test_null_literal_is_untyped() {
        let e = bind_expr(&col("price").eq(lit(Value::Null)), &schema(), &mut NoSubqueries);
        assert!(e.is_ok());
    }

    #[test]
    fn test_sum_requires_numeric() {
        let agg = AggregateExpr::sum(col("name"), "s");
        assert!(bind_aggregate(&agg, &schema(), &mut NoSubqueries).is_err());
        let avg = bind_aggregate(&AggregateExpr::avg(col("stock"), "a"), &schema(), &mut NoSubqueries)
            .unwrap();
        assert_eq!(avg.data_type, Some(DataType::Decimal));
    }

    #[test]
    fn test_remap_shifts_columns() {
        let e = bind_expr(&col("stock").eq(col("price")), &schema(), &mut NoSubqueries).unwrap();
        let shifted = e.remap(&|i| i + 10);
        let mut cols = shifted.columns();
        cols.sort_unstable();
        assert_eq!(cols, vec![11, 12]);
    }
}
