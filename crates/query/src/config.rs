//! Planner configuration.
//!
//! Every cost constant and threshold the planner uses lives here. Costs are
//! abstract units used only to compare plans with each other.

use serde::{Deserialize, Serialize};

/// Cost constants and thresholds for the planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Cost of reading one row in a sequential scan.
    pub seq_row_cost: f64,
    /// Fixed cost of one index probe.
    pub index_lookup_cost: f64,
    /// Cost of fetching one row through an index.
    pub index_row_cost: f64,
    /// Cost of reading one entry in an index-only scan.
    pub index_only_row_cost: f64,
    /// Cost of evaluating one predicate or expression on one row.
    pub cpu_operator_cost: f64,
    /// Cost of inserting or probing one row in a hash table.
    pub hash_row_cost: f64,
    /// Cost factor for sorting, charged as `n * log2(n)`.
    pub sort_row_cost: f64,
    /// Cost of advancing a merge cursor by one row.
    pub merge_row_cost: f64,
    /// A join side estimated below this many rows makes a plain nested loop eligible.
    pub nested_loop_threshold: f64,
    /// Row count assumed for tables without statistics.
    pub default_row_count: f64,
    /// Selectivity of a range predicate without a histogram.
    pub default_range_selectivity: f64,
    /// Selectivity of an equality predicate without statistics.
    pub default_eq_selectivity: f64,
    /// Join selectivity when either key lacks statistics.
    pub default_join_selectivity: f64,
    /// Largest join region ordered by dynamic programming; larger regions are
    /// ordered greedily.
    pub dp_relation_limit: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            seq_row_cost: 1.0,
            index_lookup_cost: 4.0,
            index_row_cost: 1.25,
            index_only_row_cost: 0.5,
            cpu_operator_cost: 0.25,
            hash_row_cost: 1.5,
            sort_row_cost: 0.5,
            merge_row_cost: 0.5,
            nested_loop_threshold: 8.0,
            default_row_count: 1000.0,
            default_range_selectivity: 1.0 / 3.0,
            default_eq_selectivity: 0.005,
            default_join_selectivity: 0.1,
            dp_relation_limit: 10,
        }
    }
}

impl PlannerConfig {
    /// Sets the sequential row cost.
    pub fn with_seq_row_cost(mut self, cost: f64) -> Self {
        self.seq_row_cost = cost;
        self
    }

    /// Sets the index probe cost.
    pub fn with_index_lookup_cost(mut self, cost: f64) -> Self {
        self.index_lookup_cost = cost;
        self
    }

    /// Sets the per-row index fetch cost.
    pub fn with_index_row_cost(mut self, cost: f64) -> Self {
        self.index_row_cost = cost;
        self
    }

    /// Sets the per-entry index-only cost.
    pub fn with_index_only_row_cost(mut self, cost: f64) -> Self {
        self.index_only_row_cost = cost;
        self
    }

    /// Sets the per-row expression cost.
    pub fn with_cpu_operator_cost(mut self, cost: f64) -> Self {
        self.cpu_operator_cost = cost;
        self
    }

    /// Sets the per-row hash cost.
    pub fn with_hash_row_cost(mut self, cost: f64) -> Self {
        self.hash_row_cost = cost;
        self
    }

    /// Sets the sort cost factor.
    pub fn with_sort_row_cost(mut self, cost: f64) -> Self {
        self.sort_row_cost = cost;
        self
    }

    /// Sets the per-row merge cost.
    pub fn with_merge_row_cost(mut self, cost: f64) -> Self {
        self.merge_row_cost = cost;
        self
    }

    /// Sets the nested loop threshold.
    pub fn with_nested_loop_threshold(mut self, rows: f64) -> Self {
        self.nested_loop_threshold = rows;
        self
    }

    /// Sets the row count assumed without statistics.
    pub fn with_default_row_count(mut self, rows: f64) -> Self {
        self.default_row_count = rows;
        self
    }

    /// Sets the fallback range selectivity.
    pub fn with_default_range_selectivity(mut self, selectivity: f64) -> Self {
        self.default_range_selectivity = selectivity;
        self
    }

    /// Sets the fallback equality selectivity.
    pub fn with_default_eq_selectivity(mut self, selectivity: f64) -> Self {
        self.default_eq_selectivity = selectivity;
        self
    }

    /// Sets the fallback join selectivity.
    pub fn with_default_join_selectivity(mut self, selectivity: f64) -> Self {
        self.default_join_selectivity = selectivity;
        self
    }

    /// Sets the dynamic programming relation limit.
    pub fn with_dp_relation_limit(mut self, limit: usize) -> Self {
        self.dp_relation_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = PlannerConfig::default()
            .with_dp_relation_limit(3)
            .with_default_range_selectivity(0.25);
        assert_eq!(config.dp_relation_limit, 3);
        assert_eq!(config.default_range_selectivity, 0.25);
        assert_eq!(config.seq_row_cost, 1.0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PlannerConfig =
            serde_json::from_str(r#"{"hash_row_cost": 3.0, "dp_relation_limit": 4}"#).unwrap();
        assert_eq!(config.hash_row_cost, 3.0);
        assert_eq!(config.dp_relation_limit, 4);
        assert_eq!(config.nested_loop_threshold, 8.0);

        let json = serde_json::to_value(PlannerConfig::default()).unwrap();
        assert!(json.get("histogram_buckets").is_none());
        assert_eq!(json["default_row_count"], 1000.0);
    }
}
