//! Query optimizer module.
//!
//! Logical rewrites run as a sequence of passes before physical planning.
//! Index selection and join ordering depend on the physical alternatives and
//! are invoked by the planner instead of running as passes.

mod column_usage;
mod exists_to_join;
mod index_selection;
mod join_reorder;
mod pass;
mod predicate_pushdown;
mod qualify;

pub use column_usage::{column_usage, RelationUsage};
pub use exists_to_join::ExistsToJoin;
pub use index_selection::{choose_access_path, AccessPath};
pub use join_reorder::{order_joins, MAX_JOIN_LEAVES};
pub use pass::OptimizerPass;
pub use predicate_pushdown::PredicatePushdown;
pub use qualify::QualifyColumns;

use tern_storage::CatalogSnapshot;
use tracing::{debug, trace};

use crate::error::QueryResult;
use crate::planner::LogicalPlan;

/// Query optimizer that applies logical rewrite passes.
pub struct Optimizer<'a> {
    passes: Vec<Box<dyn OptimizerPass + 'a>>,
}

impl<'a> Optimizer<'a> {
    /// Creates an optimizer with the default passes.
    ///
    /// The default passes are applied in this order:
    /// 1. QualifyColumns - Resolve every column reference against its scope
    /// 2. ExistsToJoin - Turn `[NOT] EXISTS` conjuncts into semi and anti joins
    /// 3. PredicatePushdown - Push filters into scans and join inputs
    pub fn new(snapshot: &'a CatalogSnapshot) -> Self {
        Self {
            passes: vec![
                Box::new(QualifyColumns::new(snapshot)),
                Box::new(ExistsToJoin),
                Box::new(PredicatePushdown),
            ],
        }
    }

    /// Creates an optimizer with custom passes.
    pub fn with_passes(passes: Vec<Box<dyn OptimizerPass + 'a>>) -> Self {
        Self { passes }
    }

    /// Optimizes a logical plan.
    pub fn optimize(&self, mut plan: LogicalPlan) -> QueryResult<LogicalPlan> {
        for pass in &self.passes {
            plan = pass.optimize(plan)?;
            trace!(pass = pass.name(), "plan after pass:\n{}", plan);
        }
        debug!(passes = self.passes.len(), "logical optimization finished");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit, Expr};
    use tern_core::schema::TableBuilder;
    use tern_core::DataType;
    use tern_storage::Catalog;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let products = TableBuilder::new("products")
            .unwrap()
            .add_column("product_id", DataType::Integer)
            .unwrap()
            .add_column("manufacturer_id", DataType::Integer)
            .unwrap()
            .add_column("price", DataType::Decimal)
            .unwrap()
            .build()
            .unwrap();
        let manufacturers = TableBuilder::new("manufacturers")
            .unwrap()
            .add_column("manufacturer_id", DataType::Integer)
            .unwrap()
            .add_column("name", DataType::Text)
            .unwrap()
            .build()
            .unwrap();
        catalog.register_table(products).unwrap();
        catalog.register_table(manufacturers).unwrap();
        catalog
    }

    #[test]
    fn test_default_passes_push_filters_into_scans() {
        let catalog = catalog();
        let snapshot = catalog.snapshot();
        let plan = LogicalPlan::scan("products")
            .inner_join(
                LogicalPlan::scan("manufacturers"),
                col("products.manufacturer_id").eq(col("manufacturers.manufacturer_id")),
            )
            .filter(col("price").lt(lit(50.0)));

        let optimized = Optimizer::new(&snapshot).optimize(plan).unwrap();
        match optimized {
            LogicalPlan::Join { left, .. } => match *left {
                LogicalPlan::Scan { predicate, .. } => {
                    assert_eq!(predicate, Some(col("products.price").lt(lit(50.0))))
                }
                other => panic!("unexpected left input {:?}", other),
            },
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn test_exists_becomes_semi_join() {
        let catalog = catalog();
        let snapshot = catalog.snapshot();
        let sub = LogicalPlan::scan_as("products", "p")
            .filter(col("p.manufacturer_id").eq(col("m.manufacturer_id")));
        let plan = LogicalPlan::scan_as("manufacturers", "m").filter(Expr::exists(sub));

        let optimized = Optimizer::new(&snapshot).optimize(plan).unwrap();
        assert!(matches!(
            optimized,
            LogicalPlan::Join {
                kind: crate::planner::JoinKind::Semi,
                condition: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn test_errors_propagate() {
        let catalog = catalog();
        let snapshot = catalog.snapshot();
        let plan = LogicalPlan::scan("products").filter(col("colour").eq(lit("red")));
        assert!(Optimizer::new(&snapshot).optimize(plan).is_err());
    }
}
