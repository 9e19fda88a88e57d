//! Pull-based query executor.
//!
//! A physical plan is turned into a tree of operators that hand rows to
//! their parent one at a time. Blocking operators (sort, hash build sides,
//! aggregation, windows) buffer their input when opened.

mod aggregate;
mod build;
mod cte;
mod distinct;
mod eval;
mod filter;
mod join;
mod limit;
mod metrics;
mod node;
mod project;
mod runner;
mod scan;
mod set_op;
mod sort;
mod window;

pub use eval::{eval, eval_predicate};
pub use metrics::NodeMetrics;
pub use runner::{execute, ResultStream};

pub(crate) use runner::execute_instrumented;
