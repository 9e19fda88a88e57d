//! Window function expressions.

use core::fmt;

use tern_core::Value;

use super::{AggregateFunc, Expr};

/// Window functions.
#[derive(Clone, Debug, PartialEq)]
pub enum WindowFunc {
    /// Position within the partition, ties broken by input order.
    RowNumber,
    /// Ties share a rank; the next rank skips by the tie-group size.
    Rank,
    /// Ties share a rank; the next rank increments by one.
    DenseRank,
    /// Value of `expr` `offset` rows before the current row.
    Lag {
        expr: Expr,
        offset: usize,
        default: Value,
    },
    /// Value of `expr` `offset` rows after the current row.
    Lead {
        expr: Expr,
        offset: usize,
        default: Value,
    },
    /// Aggregate over the window frame.
    Aggregate {
        func: AggregateFunc,
        arg: Option<Expr>,
    },
}

impl WindowFunc {
    /// `LAG(expr)` with offset 1 and a null default.
    pub fn lag(expr: Expr) -> Self {
        WindowFunc::Lag {
            expr,
            offset: 1,
            default: Value::Null,
        }
    }

    /// `LEAD(expr)` with offset 1 and a null default.
    pub fn lead(expr: Expr) -> Self {
        WindowFunc::Lead {
            expr,
            offset: 1,
            default: Value::Null,
        }
    }

    /// SQL name of the function.
    pub fn name(&self) -> &'static str {
        match self {
            WindowFunc::RowNumber => "row_number",
            WindowFunc::Rank => "rank",
            WindowFunc::DenseRank => "dense_rank",
            WindowFunc::Lag { .. } => "lag",
            WindowFunc::Lead { .. } => "lead",
            WindowFunc::Aggregate { func, .. } => func.name(),
        }
    }
}

/// A window function with its output name.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowExpr {
    pub func: WindowFunc,
    pub alias: String,
}

impl WindowExpr {
    /// Creates a window expression.
    pub fn new(func: WindowFunc, alias: impl Into<String>) -> Self {
        Self {
            func,
            alias: alias.into(),
        }
    }
}

impl fmt::Display for WindowExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.func {
            WindowFunc::Lag {
                expr,
                offset,
                default,
            }
            | WindowFunc::Lead {
                expr,
                offset,
                default,
            } => write!(f, "{}({}, {}, {})", self.func.name(), expr, offset, default)?,
            WindowFunc::Aggregate { arg: Some(arg), .. } => {
                write!(f, "{}({})", self.func.name(), arg)?
            }
            WindowFunc::Aggregate { arg: None, .. } => write!(f, "{}(*)", self.func.name())?,
            _ => write!(f, "{}()", self.func.name())?,
        }
        write!(f, " AS {}", self.alias)
    }
}

/// Frame units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameUnits {
    /// Offsets count physical rows.
    Rows,
    /// Offsets are distances in the ordering key; peers share a frame.
    Range,
}

/// One end of a window frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(f64),
    CurrentRow,
    Following(f64),
    UnboundedFollowing,
}

impl fmt::Display for FrameBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameBound::UnboundedPreceding => f.write_str("UNBOUNDED PRECEDING"),
            FrameBound::Preceding(n) => write!(f, "{} PRECEDING", n),
            FrameBound::CurrentRow => f.write_str("CURRENT ROW"),
            FrameBound::Following(n) => write!(f, "{} FOLLOWING", n),
            FrameBound::UnboundedFollowing => f.write_str("UNBOUNDED FOLLOWING"),
        }
    }
}

/// Window frame clause.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameSpec {
    pub units: FrameUnits,
    pub start: FrameBound,
    pub end: FrameBound,
}

impl FrameSpec {
    /// `ROWS BETWEEN start AND end`.
    pub fn rows(start: FrameBound, end: FrameBound) -> Self {
        Self {
            units: FrameUnits::Rows,
            start,
            end,
        }
    }

    /// `RANGE BETWEEN start AND end`.
    pub fn range(start: FrameBound, end: FrameBound) -> Self {
        Self {
            units: FrameUnits::Range,
            start,
            end,
        }
    }

    /// The frame used when none is given: up to the current row's last peer
    /// when ordered, the whole partition otherwise.
    pub fn default_for(ordered: bool) -> Self {
        if ordered {
            Self::range(FrameBound::UnboundedPreceding, FrameBound::CurrentRow)
        } else {
            Self::rows(FrameBound::UnboundedPreceding, FrameBound::UnboundedFollowing)
        }
    }
}

impl fmt::Display for FrameSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = match self.units {
            FrameUnits::Rows => "ROWS",
            FrameUnits::Range => "RANGE",
        };
        write!(f, "{} BETWEEN {} AND {}", units, self.start, self.end)
    }
}
