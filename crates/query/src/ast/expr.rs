//! Expression AST definitions.

use core::fmt;

use tern_core::Value;

use crate::planner::LogicalPlan;

/// Reference to a column, optionally qualified by a relation name or alias.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    /// Relation name or alias.
    pub relation: Option<String>,
    /// Column name.
    pub name: String,
}

impl ColumnRef {
    /// Creates an unqualified column reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            relation: None,
            name: name.into(),
        }
    }

    /// Creates a qualified column reference.
    pub fn qualified(relation: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            relation: Some(relation.into()),
            name: name.into(),
        }
    }

    /// Parses `relation.name` or `name`.
    pub fn parse(s: &str) -> Self {
        match s.split_once('.') {
            Some((relation, name)) => Self::qualified(relation, name),
            None => Self::new(s),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}.{}", relation, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // String/Pattern
    Like,
}

impl BinaryOp {
    /// Returns true for `=`, `<>`, `<`, `<=`, `>`, `>=`.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Returns true for arithmetic operators.
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    /// The operator that gives the same result with operands swapped.
    pub fn flip(&self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => *other,
        }
    }

    /// SQL spelling of the operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Like => "LIKE",
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// Scalar functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarFunc {
    Lower,
    Upper,
    Length,
    Abs,
    Round,
    Coalesce,
}

impl ScalarFunc {
    /// SQL name of the function.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarFunc::Lower => "lower",
            ScalarFunc::Upper => "upper",
            ScalarFunc::Length => "length",
            ScalarFunc::Abs => "abs",
            ScalarFunc::Round => "round",
            ScalarFunc::Coalesce => "coalesce",
        }
    }
}

/// Sort order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY key. Nulls sort first ascending and last descending.
#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub order: SortOrder,
}

impl SortKey {
    /// Ascending key.
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            order: SortOrder::Asc,
        }
    }

    /// Descending key.
    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            order: SortOrder::Desc,
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            SortOrder::Asc => write!(f, "{}", self.expr),
            SortOrder::Desc => write!(f, "{} DESC", self.expr),
        }
    }
}

/// Expression AST node.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Column reference.
    Column(ColumnRef),
    /// Literal value.
    Literal(Value),
    /// Binary operation.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation.
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// Scalar function call.
    Function { func: ScalarFunc, args: Vec<Expr> },
    /// Searched CASE expression.
    Case {
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    /// `expr [NOT] IN (list)`.
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// `expr [NOT] BETWEEN low AND high`.
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    /// `[NOT] EXISTS (subquery)`, possibly correlated.
    Exists {
        subquery: Box<LogicalPlan>,
        negated: bool,
    },
    /// Uncorrelated subquery producing at most one value.
    ScalarSubquery(Box<LogicalPlan>),
    /// Output name for a projected expression.
    Alias { expr: Box<Expr>, name: String },
}

/// Creates a column reference from `name` or `relation.name`.
pub fn col(name: &str) -> Expr {
    Expr::Column(ColumnRef::parse(name))
}

/// Creates a literal expression.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

impl Expr {
    /// Creates a column reference expression.
    pub fn column(relation: Option<&str>, name: &str) -> Self {
        Expr::Column(ColumnRef {
            relation: relation.map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Creates a literal expression.
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Creates a binary expression.
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Creates an equality expression.
    pub fn eq(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Eq, other)
    }

    /// Creates a not-equal expression.
    pub fn ne(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Ne, other)
    }

    /// Creates a less-than expression.
    pub fn lt(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Lt, other)
    }

    /// Creates a less-than-or-equal expression.
    pub fn le(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Le, other)
    }

    /// Creates a greater-than expression.
    pub fn gt(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Gt, other)
    }

    /// Creates a greater-than-or-equal expression.
    pub fn ge(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Ge, other)
    }

    /// Creates an AND expression.
    pub fn and(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::And, other)
    }

    /// Creates an OR expression.
    pub fn or(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Or, other)
    }

    /// Creates an addition.
    pub fn add(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Add, other)
    }

    /// Creates a subtraction.
    pub fn sub(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Sub, other)
    }

    /// Creates a multiplication.
    pub fn mul(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Mul, other)
    }

    /// Creates a division.
    pub fn div(self, other: Expr) -> Self {
        Self::binary(self, BinaryOp::Div, other)
    }

    /// Creates a LIKE expression.
    pub fn like(self, pattern: impl Into<String>) -> Self {
        Self::binary(self, BinaryOp::Like, Expr::Literal(Value::Text(pattern.into())))
    }

    /// Creates a NOT expression.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    /// Creates an IS NULL expression.
    pub fn is_null(self) -> Self {
        Expr::Unary {
            op: UnaryOp::IsNull,
            expr: Box::new(self),
        }
    }

    /// Creates an IS NOT NULL expression.
    pub fn is_not_null(self) -> Self {
        Expr::Unary {
            op: UnaryOp::IsNotNull,
            expr: Box::new(self),
        }
    }

    /// Creates an IN list expression.
    pub fn in_list(self, list: Vec<Expr>) -> Self {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    /// Creates a NOT IN list expression.
    pub fn not_in_list(self, list: Vec<Expr>) -> Self {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated: true,
        }
    }

    /// Creates a BETWEEN expression.
    pub fn between(self, low: Expr, high: Expr) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
            negated: false,
        }
    }

    /// Creates a function call.
    pub fn call(func: ScalarFunc, args: Vec<Expr>) -> Self {
        Expr::Function { func, args }
    }

    /// Creates a searched CASE expression.
    pub fn case(branches: Vec<(Expr, Expr)>, otherwise: Option<Expr>) -> Self {
        Expr::Case {
            branches,
            otherwise: otherwise.map(Box::new),
        }
    }

    /// Creates an EXISTS expression.
    pub fn exists(subquery: LogicalPlan) -> Self {
        Expr::Exists {
            subquery: Box::new(subquery),
            negated: false,
        }
    }

    /// Creates a NOT EXISTS expression.
    pub fn not_exists(subquery: LogicalPlan) -> Self {
        Expr::Exists {
            subquery: Box::new(subquery),
            negated: true,
        }
    }

    /// Creates a scalar subquery.
    pub fn scalar_subquery(subquery: LogicalPlan) -> Self {
        Expr::ScalarSubquery(Box::new(subquery))
    }

    /// Names the expression in a projection.
    pub fn alias(self, name: impl Into<String>) -> Self {
        Expr::Alias {
            expr: Box::new(self),
            name: name.into(),
        }
    }

    /// Strips any alias.
    pub fn unaliased(&self) -> &Expr {
        match self {
            Expr::Alias { expr, .. } => expr.unaliased(),
            other => other,
        }
    }

    /// The `(relation, name)` this expression is known by in an output schema.
    pub fn output_name(&self) -> (Option<String>, String) {
        match self {
            Expr::Column(c) => (c.relation.clone(), c.name.clone()),
            Expr::Alias { name, .. } => (None, name.clone()),
            other => (None, other.to_string()),
        }
    }

    /// Splits a conjunction into its terms.
    pub fn into_conjuncts(self) -> Vec<Expr> {
        let mut out = Vec::new();
        self.collect_conjuncts(&mut out);
        out
    }

    fn collect_conjuncts(self, out: &mut Vec<Expr>) {
        match self {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                left.collect_conjuncts(out);
                right.collect_conjuncts(out);
            }
            other => out.push(other),
        }
    }

    /// Joins terms with AND. Returns None for no terms.
    pub fn conjunction(terms: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        terms.into_iter().reduce(|acc, e| acc.and(e))
    }

    /// Calls `f` for each column reference, not descending into subqueries.
    pub fn for_each_column<'a>(&'a self, f: &mut impl FnMut(&'a ColumnRef)) {
        match self {
            Expr::Column(c) => f(c),
            Expr::Literal(_) | Expr::Exists { .. } | Expr::ScalarSubquery(_) => {}
            Expr::Binary { left, right, .. } => {
                left.for_each_column(f);
                right.for_each_column(f);
            }
            Expr::Unary { expr, .. } | Expr::Alias { expr, .. } => expr.for_each_column(f),
            Expr::Function { args, .. } => args.iter().for_each(|a| a.for_each_column(f)),
            Expr::Case {
                branches,
                otherwise,
            } => {
                for (when, then) in branches {
                    when.for_each_column(f);
                    then.for_each_column(f);
                }
                if let Some(e) = otherwise {
                    e.for_each_column(f);
                }
            }
            Expr::InList { expr, list, .. } => {
                expr.for_each_column(f);
                list.iter().for_each(|e| e.for_each_column(f));
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.for_each_column(f);
                low.for_each_column(f);
                high.for_each_column(f);
            }
        }
    }

    /// Calls `f` for each subquery plan directly inside this expression.
    pub fn for_each_subquery<'a>(&'a self, f: &mut impl FnMut(&'a LogicalPlan)) {
        match self {
            Expr::Exists { subquery, .. } | Expr::ScalarSubquery(subquery) => f(subquery),
            Expr::Column(_) | Expr::Literal(_) => {}
            Expr::Binary { left, right, .. } => {
                left.for_each_subquery(f);
                right.for_each_subquery(f);
            }
            Expr::Unary { expr, .. } | Expr::Alias { expr, .. } => expr.for_each_subquery(f),
            Expr::Function { args, .. } => args.iter().for_each(|a| a.for_each_subquery(f)),
            Expr::Case {
                branches,
                otherwise,
            } => {
                for (when, then) in branches {
                    when.for_each_subquery(f);
                    then.for_each_subquery(f);
                }
                if let Some(e) = otherwise {
                    e.for_each_subquery(f);
                }
            }
            Expr::InList { expr, list, .. } => {
                expr.for_each_subquery(f);
                list.iter().for_each(|e| e.for_each_subquery(f));
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.for_each_subquery(f);
                low.for_each_subquery(f);
                high.for_each_subquery(f);
            }
        }
    }

    /// Relations named by qualified column references.
    pub fn referenced_relations(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.for_each_column(&mut |c| {
            if let Some(r) = &c.relation {
                if !out.contains(r) {
                    out.push(r.clone());
                }
            }
        });
        out
    }

    /// True if some column reference lacks a relation qualifier.
    pub fn has_unqualified_columns(&self) -> bool {
        let mut found = false;
        self.for_each_column(&mut |c| found |= c.relation.is_none());
        found
    }
}

fn fmt_operand(expr: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match expr {
        Expr::Binary { .. } | Expr::Between { .. } | Expr::InList { .. } => write!(f, "({})", expr),
        _ => write!(f, "{}", expr),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Binary { op, left, right } => {
                fmt_operand(left, f)?;
                write!(f, " {} ", op.symbol())?;
                fmt_operand(right, f)
            }
            Expr::Unary { op, expr } => match op {
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
            Expr::Function { func, args } => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Case {
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
            Expr::InList {
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
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                fmt_operand(expr, f)?;
                let kw = if *negated { " NOT BETWEEN " } else { " BETWEEN " };
                write!(f, "{}{} AND {}", kw, low, high)
            }
            Expr::Exists { negated, .. } => {
                f.write_str(if *negated { "NOT EXISTS (...)" } else { "EXISTS (...)" })
            }
            Expr::ScalarSubquery(_) => f.write_str("(subquery)"),
            Expr::Alias { expr, name } => write!(f, "{} AS {}", expr, name),
        }
    }
}
