//! AST module for query expressions, aggregates and window functions.

mod aggregate;
mod expr;
mod window;

pub use aggregate::{AggregateExpr, AggregateFunc};
pub use expr::{col, lit, BinaryOp, ColumnRef, Expr, ScalarFunc, SortKey, SortOrder, UnaryOp};
pub use window::{FrameBound, FrameSpec, FrameUnits, WindowExpr, WindowFunc};
