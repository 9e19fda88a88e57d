//! Aggregate expressions.

use core::fmt;

use super::Expr;

/// Aggregate functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    /// SQL name of the function.
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
        }
    }
}

/// One aggregate in an Aggregate node, e.g. `COUNT(DISTINCT x) FILTER (WHERE p) AS n`.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateExpr {
    pub func: AggregateFunc,
    /// Argument; None means `*` and is only valid for COUNT.
    pub arg: Option<Expr>,
    pub distinct: bool,
    /// Only rows satisfying the filter feed the aggregate.
    pub filter: Option<Expr>,
    /// Output column name.
    pub alias: String,
}

impl AggregateExpr {
    /// Creates an aggregate over `arg`.
    pub fn new(func: AggregateFunc, arg: Option<Expr>, alias: impl Into<String>) -> Self {
        Self {
            func,
            arg,
            distinct: false,
            filter: None,
            alias: alias.into(),
        }
    }

    /// `COUNT(*)`.
    pub fn count_star(alias: impl Into<String>) -> Self {
        Self::new(AggregateFunc::Count, None, alias)
    }

    /// `COUNT(expr)`, which skips nulls.
    pub fn count(expr: Expr, alias: impl Into<String>) -> Self {
        Self::new(AggregateFunc::Count, Some(expr), alias)
    }

    /// `SUM(expr)`.
    pub fn sum(expr: Expr, alias: impl Into<String>) -> Self {
        Self::new(AggregateFunc::Sum, Some(expr), alias)
    }

    /// `AVG(expr)`.
    pub fn avg(expr: Expr, alias: impl Into<String>) -> Self {
        Self::new(AggregateFunc::Avg, Some(expr), alias)
    }

    /// `MIN(expr)`.
    pub fn min(expr: Expr, alias: impl Into<String>) -> Self {
        Self::new(AggregateFunc::Min, Some(expr), alias)
    }

    /// `MAX(expr)`.
    pub fn max(expr: Expr, alias: impl Into<String>) -> Self {
        Self::new(AggregateFunc::Max, Some(expr), alias)
    }

    /// Aggregates distinct argument values only.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Adds a `FILTER (WHERE predicate)` clause.
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(predicate);
        self
    }
}

impl fmt::Display for AggregateExpr {
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
