//! Optimizer pass trait.

use crate::error::QueryResult;
use crate::planner::LogicalPlan;

/// A rewrite of a logical plan into an equivalent one.
pub trait OptimizerPass {
    /// Rewrites the given logical plan.
    fn optimize(&self, plan: LogicalPlan) -> QueryResult<LogicalPlan>;

    /// Returns the name of this pass.
    fn name(&self) -> &'static str {
        "unnamed"
    }
}
