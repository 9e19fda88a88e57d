//! Query planner module.
//!
//! Turns a `LogicalPlan` into an annotated `PhysicalPlan`: logical rewrites
//! first, then access paths, join order and algorithms chosen by cost.

pub(crate) mod bind;
pub(crate) mod cost;
mod logical;
mod physical;
mod query_planner;
mod schema;

pub use bind::{
    aggregate_result_type, bind_aggregate, bind_expr, bind_predicate, bind_sort_key,
    bind_window_func, BoundAggregate, BoundExpr, BoundSortKey, BoundWindowFunc, NoSubqueries,
    SubqueryPlanner,
};
pub use cost::{estimate_join_cardinality, CostModel, Estimate};
pub use logical::{CommonTableExpr, JoinKind, LogicalPlan, SetOpKind};
pub use physical::{
    DedupStrategy, IndexAccess, IndexScanNode, JoinSide, PhysicalNode, PhysicalPlan,
    SetOpStrategy, WindowStrategy,
};
pub use query_planner::QueryPlanner;
pub use schema::{ColumnOrigin, Field, Schema};
