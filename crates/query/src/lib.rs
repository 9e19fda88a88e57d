//! Tern Query - cost-based planner and pull-based executor for tern.
//!
//! This crate provides the query engine over `tern-storage` catalogs:
//!
//! - `ast`: Expression, aggregate and window function definitions
//! - `planner`: Logical plans, name binding, cost model and physical planning
//! - `optimizer`: Logical rewrite passes, access path selection and join ordering
//! - `executor`: Pull-based operators and plan execution
//! - `explain`: Plan descriptions with estimates and measured metrics
//! - `config`: Planner cost constants and thresholds
//!
//! # Example
//!
//! ```ignore
//! use tern_query::ast::{col, lit};
//! use tern_query::planner::{LogicalPlan, QueryPlanner};
//! use tern_query::{execute, explain};
//!
//! let plan = LogicalPlan::scan("products").filter(col("price").gt(lit(100i64)));
//! let physical = QueryPlanner::default().plan(&plan, &snapshot)?;
//! println!("{}", explain(&physical));
//! let rows = execute(&physical, &snapshot)?.collect_rows()?;
//! ```

pub mod ast;
pub mod config;
pub mod error;
pub mod executor;
pub mod explain;
pub mod optimizer;
pub mod planner;

pub use config::PlannerConfig;
pub use error::{QueryError, QueryResult};
pub use executor::{execute, ResultStream};
pub use explain::{explain, explain_analyze, ActualMetrics, ExplainNode};
pub use planner::{LogicalPlan, PhysicalPlan, QueryPlanner};
