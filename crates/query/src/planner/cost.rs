//! Cardinality estimation and the cost model.
//!
//! Costs are abstract units, comparable only with each other. Estimates use
//! the statistics recorded by the last analyze of each table, even when they
//! are stale; tables that were never analyzed fall back to the configured
//! defaults.

use tern_core::pattern_match::literal_prefix;
use tern_core::Value;
use tern_storage::{CatalogSnapshot, ColumnStatistics};

use crate::ast::{BinaryOp, UnaryOp};
use crate::config::PlannerConfig;
use crate::planner::bind::BoundExpr;
use crate::planner::schema::{ColumnOrigin, Schema};

/// Estimated output rows and cost of a plan node.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct Estimate {
    pub rows: f64,
    /// Cost spent before the first row comes out.
    pub startup_cost: f64,
    /// Cost to produce every row.
    pub total_cost: f64,
}

impl Estimate {
    /// Creates an estimate.
    pub fn new(rows: f64, startup_cost: f64, total_cost: f64) -> Self {
        Self {
            rows,
            startup_cost,
            total_cost,
        }
    }
}

/// Join output cardinality: `left * right * selectivity`, at least one row
/// when both inputs have rows.
pub fn estimate_join_cardinality(left: f64, right: f64, selectivity: f64) -> f64 {
    clamp_rows(left * right * selectivity, left.min(right))
}

/// Clamps an estimate to at least one row when its input has any.
fn clamp_rows(rows: f64, input: f64) -> f64 {
    if input <= 0.0 {
        0.0
    } else {
        rows.max(1.0)
    }
}

/// The `[low, high)` text range covered by a LIKE pattern's literal prefix.
pub fn like_prefix_range(pattern: &str) -> Option<(Value, Value)> {
    let prefix = literal_prefix(pattern)?;
    let mut chars: Vec<char> = prefix.chars().collect();
    let last = chars.pop()?;
    let next = char::from_u32(last as u32 + 1)?;
    chars.push(next);
    let upper: String = chars.into_iter().collect();
    Some((Value::Text(prefix), Value::Text(upper)))
}

/// Estimates cardinalities and costs against one catalog snapshot.
pub struct CostModel<'a> {
    config: &'a PlannerConfig,
    snapshot: &'a CatalogSnapshot,
}

impl<'a> CostModel<'a> {
    /// Creates a cost model.
    pub fn new(config: &'a PlannerConfig, snapshot: &'a CatalogSnapshot) -> Self {
        Self { config, snapshot }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &'a PlannerConfig {
        self.config
    }

    /// Row count of a base table: analyzed count, or the configured default.
    pub fn table_rows(&self, table: &str) -> f64 {
        match self.snapshot.statistics(table) {
            Some(stats) => stats.row_count as f64,
            None => self.config.default_row_count,
        }
    }

    fn column_stats(&self, origin: &ColumnOrigin) -> Option<&'a ColumnStatistics> {
        self.snapshot.statistics(&origin.table)?.column(origin.column)
    }

    fn origin<'s>(&self, expr: &BoundExpr, schema: &'s Schema) -> Option<&'s ColumnOrigin> {
        schema.field(expr.column_index()?)?.origin.as_ref()
    }

    /// Rows per distinct value of a base column: analyzed distinct count, then
    /// a single-column index's live statistics, then the default selectivity.
    fn rows_per_value(&self, origin: &ColumnOrigin) -> f64 {
        let rows = self.table_rows(&origin.table);
        if let Some(stats) = self.column_stats(origin) {
            if stats.distinct_count > 0 {
                return (rows * (1.0 - stats.null_fraction) / stats.distinct_count as f64).max(1.0);
            }
            return 1.0;
        }
        if let Some(store) = self.snapshot.table(&origin.table) {
            let schema = store.schema();
            let column = schema.columns().get(origin.column).map(|c| c.name());
            for def in schema.indices() {
                if def.columns().len() == 1 && Some(def.columns()[0].as_str()) == column {
                    if let Ok(stats) = store.index_stats(def.name()) {
                        if stats.distinct_keys() > 0 {
                            return stats.rows_per_key().max(1.0);
                        }
                    }
                }
            }
        }
        (rows * self.config.default_eq_selectivity).max(1.0)
    }

    fn eq_selectivity(&self, origin: &ColumnOrigin) -> f64 {
        let rows = self.table_rows(&origin.table);
        if rows <= 0.0 {
            return self.config.default_eq_selectivity;
        }
        (self.rows_per_value(origin) / rows).min(1.0)
    }

    fn range_selectivity(
        &self,
        origin: &ColumnOrigin,
        lower: Option<(&Value, bool)>,
        upper: Option<(&Value, bool)>,
    ) -> f64 {
        match self.column_stats(origin) {
            Some(stats) => match &stats.histogram {
                Some(h) => h.fraction_between(lower, upper) * (1.0 - stats.null_fraction),
                None => self.config.default_range_selectivity,
            },
            None => self.config.default_range_selectivity,
        }
    }

    /// Distinct values of `expr` among `input_rows` rows.
    pub fn distinct_values(&self, expr: &BoundExpr, schema: &Schema, input_rows: f64) -> f64 {
        let ndv = match self.origin(expr, schema) {
            Some(origin) => match self.column_stats(origin) {
                Some(stats) if stats.null_fraction > 0.0 => stats.distinct_count as f64 + 1.0,
                Some(stats) => stats.distinct_count as f64,
                None => self.table_rows(&origin.table) / self.rows_per_value(origin),
            },
            None if expr.literal().is_some() => 1.0,
            None => input_rows / 10.0,
        };
        ndv.clamp(1.0, input_rows.max(1.0))
    }

    /// Distinct combinations of `exprs` among `input_rows` rows.
    pub fn distinct_groups(&self, exprs: &[BoundExpr], schema: &Schema, input_rows: f64) -> f64 {
        if input_rows <= 0.0 {
            return 0.0;
        }
        exprs
            .iter()
            .map(|e| self.distinct_values(e, schema, input_rows))
            .product::<f64>()
            .clamp(1.0, input_rows)
    }

    /// Fraction of rows satisfying `predicate`.
    pub fn selectivity(&self, predicate: &BoundExpr, schema: &Schema) -> f64 {
        let s = self.selectivity_inner(predicate, schema);
        s.clamp(0.0, 1.0)
    }

    fn selectivity_inner(&self, predicate: &BoundExpr, schema: &Schema) -> f64 {
        let default_range = self.config.default_range_selectivity;
        let default_eq = self.config.default_eq_selectivity;
        match predicate {
            BoundExpr::Literal(Value::Boolean(true)) => 1.0,
            BoundExpr::Literal(_) => 0.0,
            BoundExpr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => self.selectivity(left, schema) * self.selectivity(right, schema),
            BoundExpr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let (l, r) = (self.selectivity(left, schema), self.selectivity(right, schema));
                l + r - l * r
            }
            BoundExpr::Unary {
                op: UnaryOp::Not,
                expr,
            } => 1.0 - self.selectivity(expr, schema),
            BoundExpr::Unary { op, expr } if matches!(op, UnaryOp::IsNull | UnaryOp::IsNotNull) => {
                let null_fraction = self
                    .origin(expr, schema)
                    .and_then(|o| self.column_stats(o))
                    .map(|s| s.null_fraction)
                    .unwrap_or(default_eq);
                if *op == UnaryOp::IsNull {
                    null_fraction
                } else {
                    1.0 - null_fraction
                }
            }
            BoundExpr::Binary { op, left, right } if op.is_comparison() => {
                let (column, value, op) = match (left.as_ref(), right.as_ref()) {
                    (c, BoundExpr::Literal(v)) => (c, v, *op),
                    (BoundExpr::Literal(v), c) => (c, v, op.flip()),
                    (l, r) => {
                        // column compared with column
                        return match (op, self.origin(l, schema), self.origin(r, schema)) {
                            (BinaryOp::Eq, Some(a), Some(b)) => {
                                self.eq_selectivity(a).min(self.eq_selectivity(b))
                            }
                            (BinaryOp::Eq, _, _) => default_eq,
                            (BinaryOp::Ne, _, _) => 1.0 - default_eq,
                            _ => default_range,
                        };
                    }
                };
                if value.is_null() {
                    return 0.0;
                }
                let Some(origin) = self.origin(column, schema) else {
                    return match op {
                        BinaryOp::Eq => default_eq,
                        BinaryOp::Ne => 1.0 - default_eq,
                        _ => default_range,
                    };
                };
                match op {
                    BinaryOp::Eq => self.eq_selectivity(origin),
                    BinaryOp::Ne => 1.0 - self.eq_selectivity(origin),
                    BinaryOp::Lt => self.range_selectivity(origin, None, Some((value, false))),
                    BinaryOp::Le => self.range_selectivity(origin, None, Some((value, true))),
                    BinaryOp::Gt => self.range_selectivity(origin, Some((value, false)), None),
                    BinaryOp::Ge => self.range_selectivity(origin, Some((value, true)), None),
                    _ => default_range,
                }
            }
            BoundExpr::Binary {
                op: BinaryOp::Like,
                left,
                right,
            } => {
                let origin = self.origin(left, schema);
                match (origin, right.literal().and_then(|v| v.as_str())) {
                    (Some(origin), Some(pattern)) => {
                        if !pattern.contains(['%', '_']) {
                            self.eq_selectivity(origin)
                        } else {
                            match like_prefix_range(pattern) {
                                Some((lo, hi)) => self.range_selectivity(
                                    origin,
                                    Some((&lo, true)),
                                    Some((&hi, false)),
                                ),
                                None => default_range,
                            }
                        }
                    }
                    _ => default_range,
                }
            }
            BoundExpr::InList {
                expr,
                list,
                negated,
            } => {
                let per_item = match self.origin(expr, schema) {
                    Some(origin) => self.eq_selectivity(origin),
                    None => default_eq,
                };
                let s = (per_item * list.len() as f64).min(1.0);
                if *negated {
                    1.0 - s
                } else {
                    s
                }
            }
            BoundExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let s = match (self.origin(expr, schema), low.literal(), high.literal()) {
                    (Some(origin), Some(lo), Some(hi)) => {
                        self.range_selectivity(origin, Some((lo, true)), Some((hi, true)))
                    }
                    _ => default_range,
                };
                if *negated {
                    1.0 - s
                } else {
                    s
                }
            }
            _ => default_range,
        }
    }

    /// Rows of `input_rows` expected to satisfy `predicate`.
    ///
    /// An equality on a column with statistics yields `rows / distinct`, at
    /// least one row; ranges use the histogram, or the default selectivity.
    pub fn estimate_cardinality(&self, predicate: &BoundExpr, schema: &Schema, input_rows: f64) -> f64 {
        clamp_rows(input_rows * self.selectivity(predicate, schema), input_rows)
    }

    /// Selectivity of `left_key = right_key`: `1 / max(distinct)` when both
    /// keys are base columns with statistics, the default otherwise.
    pub fn join_selectivity(
        &self,
        left_key: &BoundExpr,
        left_schema: &Schema,
        right_key: &BoundExpr,
        right_schema: &Schema,
    ) -> f64 {
        let ndv = |e: &BoundExpr, s: &Schema| {
            self.origin(e, s)
                .and_then(|o| self.column_stats(o))
                .map(|c| c.distinct_count as f64)
                .filter(|n| *n > 0.0)
        };
        match (ndv(left_key, left_schema), ndv(right_key, right_schema)) {
            (Some(l), Some(r)) => 1.0 / l.max(r),
            _ => self.config.default_join_selectivity,
        }
    }

    /// Sequential scan over `table_rows` rows evaluating `filter_terms` conjuncts.
    pub fn seq_scan(&self, table_rows: f64, out_rows: f64, filter_terms: usize) -> Estimate {
        let c = self.config;
        let total =
            table_rows * c.seq_row_cost + table_rows * c.cpu_operator_cost * filter_terms as f64;
        Estimate::new(out_rows, 0.0, total)
    }

    /// Index scan issuing `lookups` probes that fetch `fetched` rows.
    pub fn index_scan(
        &self,
        lookups: f64,
        fetched: f64,
        out_rows: f64,
        filter_terms: usize,
        index_only: bool,
    ) -> Estimate {
        let c = self.config;
        let row_cost = if index_only {
            c.index_only_row_cost
        } else {
            c.index_row_cost
        };
        let total = lookups * c.index_lookup_cost
            + fetched * row_cost
            + fetched * c.cpu_operator_cost * filter_terms as f64;
        Estimate::new(out_rows, c.index_lookup_cost.min(total), total)
    }

    /// Streaming per-row work on top of `input`.
    pub fn per_row(&self, input: &Estimate, out_rows: f64, terms: usize) -> Estimate {
        let cpu = input.rows * self.config.cpu_operator_cost * terms.max(1) as f64;
        Estimate::new(out_rows, input.startup_cost, input.total_cost + cpu)
    }

    /// Sorting cost of `rows` rows: `n * log2(n)` times the sort factor.
    pub fn sort_cost(&self, rows: f64) -> f64 {
        let n = rows.max(1.0);
        self.config.sort_row_cost * n * n.max(2.0).log2()
    }

    /// Sort of `input`; blocking, so all work is startup cost.
    pub fn sort(&self, input: &Estimate) -> Estimate {
        let startup = input.total_cost + self.sort_cost(input.rows);
        Estimate::new(
            input.rows,
            startup,
            startup + input.rows * self.config.cpu_operator_cost,
        )
    }

    /// Hash join building from `build` and probing with `probe`.
    pub fn hash_join(&self, build: &Estimate, probe: &Estimate, out_rows: f64) -> Estimate {
        let c = self.config;
        let startup = build.total_cost + build.rows * c.hash_row_cost + probe.startup_cost;
        let total = build.total_cost
            + build.rows * c.hash_row_cost
            + probe.total_cost
            + probe.rows * c.hash_row_cost
            + out_rows * c.cpu_operator_cost;
        Estimate::new(out_rows, startup, total)
    }

    /// Merge join over two sorted inputs.
    pub fn merge_join(&self, left: &Estimate, right: &Estimate, out_rows: f64) -> Estimate {
        let c = self.config;
        let startup = left.startup_cost + right.startup_cost;
        let total = left.total_cost
            + right.total_cost
            + (left.rows + right.rows) * c.merge_row_cost
            + out_rows * c.cpu_operator_cost;
        Estimate::new(out_rows, startup, total)
    }

    /// Nested loop re-running `inner` once per outer row.
    pub fn nested_loop(&self, outer: &Estimate, inner: &Estimate, out_rows: f64) -> Estimate {
        let c = self.config;
        let loops = outer.rows.max(1.0);
        let total = outer.total_cost
            + loops * inner.total_cost
            + loops * inner.rows * c.cpu_operator_cost;
        Estimate::new(out_rows, outer.startup_cost + inner.startup_cost, total)
    }

    /// Hash aggregation; blocking.
    pub fn hash_aggregate(&self, input: &Estimate, groups: f64, aggregates: usize) -> Estimate {
        let c = self.config;
        let startup = input.total_cost
            + input.rows * c.hash_row_cost
            + input.rows * c.cpu_operator_cost * aggregates as f64;
        Estimate::new(groups, startup, startup + groups * c.cpu_operator_cost)
    }

    /// Aggregation over grouped input; streaming.
    pub fn group_aggregate(&self, input: &Estimate, groups: f64, aggregates: usize) -> Estimate {
        let c = self.config;
        let total = input.total_cost
            + input.rows * c.cpu_operator_cost * (aggregates + 1) as f64
            + groups * c.cpu_operator_cost;
        Estimate::new(groups, input.startup_cost, total)
    }

    /// Hash-based duplicate elimination.
    pub fn hash_dedup(&self, input: &Estimate, distinct: f64) -> Estimate {
        let c = self.config;
        let total = input.total_cost + input.rows * c.hash_row_cost + distinct * c.hash_row_cost;
        Estimate::new(distinct, input.startup_cost, total)
    }

    /// Neighbour-comparison duplicate elimination over sorted input.
    pub fn sorted_dedup(&self, input: &Estimate, distinct: f64) -> Estimate {
        self.per_row(input, distinct, 1)
    }

    /// LIMIT/OFFSET: only the fraction of input needed is paid for.
    pub fn limit(&self, input: &Estimate, count: Option<usize>, offset: usize) -> Estimate {
        let available = (input.rows - offset as f64).max(0.0);
        let rows = match count {
            Some(n) => available.min(n as f64),
            None => available,
        };
        let fraction = if input.rows > 0.0 {
            ((rows + offset as f64) / input.rows).min(1.0)
        } else {
            1.0
        };
        let total = input.startup_cost + (input.total_cost - input.startup_cost) * fraction;
        Estimate::new(rows, input.startup_cost, total)
    }

    /// Reading a materialized CTE.
    pub fn cte_scan(&self, rows: f64) -> Estimate {
        Estimate::new(rows, 0.0, rows * self.config.cpu_operator_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Field;
    use tern_core::schema::TableBuilder;
    use tern_core::DataType;
    use tern_storage::Catalog;

    fn catalog(analyze: bool) -> Catalog {
        let mut catalog = Catalog::new();
        catalog
            .register_table(
                TableBuilder::new("products")
                    .unwrap()
                    .add_column("product_id", DataType::Integer)
                    .unwrap()
                    .add_column("category_id", DataType::Integer)
                    .unwrap()
                    .add_column("price", DataType::Decimal)
                    .unwrap()
                    .add_primary_key(&["product_id"])
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        for i in 0..100i64 {
            catalog
                .insert(
                    "products",
                    vec![Value::Integer(i), Value::Integer(i % 4), Value::Decimal(i as f64)],
                )
                .unwrap();
        }
        if analyze {
            catalog.analyze("products").unwrap();
        }
        catalog
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new(Some("products".into()), "product_id", Some(DataType::Integer), false)
                .with_origin("products", 0),
            Field::new(Some("products".into()), "category_id", Some(DataType::Integer), false)
                .with_origin("products", 1),
            Field::new(Some("products".into()), "price", Some(DataType::Decimal), false)
                .with_origin("products", 2),
        ])
    }

    fn column(index: usize) -> BoundExpr {
        BoundExpr::column(index, &schema())
    }

    fn cmp(op: BinaryOp, index: usize, v: Value) -> BoundExpr {
        BoundExpr::Binary {
            op,
            left: Box::new(column(index)),
            right: Box::new(BoundExpr::Literal(v)),
        }
    }

    #[test]
    fn test_equality_uses_distinct_count() {
        let catalog = catalog(true);
        let snapshot = catalog.snapshot();
        let config = PlannerConfig::default();
        let model = CostModel::new(&config, &snapshot);
        let rows = model.table_rows("products");
        assert_eq!(rows, 100.0);
        let est = model.estimate_cardinality(&cmp(BinaryOp::Eq, 1, Value::Integer(2)), &schema(), rows);
        assert!((est - 25.0).abs() < 1e-9);
        let unique = model.estimate_cardinality(&cmp(BinaryOp::Eq, 0, Value::Integer(7)), &schema(), rows);
        assert!((unique - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_range_uses_histogram() {
        let catalog = catalog(true);
        let snapshot = catalog.snapshot();
        let config = PlannerConfig::default();
        let model = CostModel::new(&config, &snapshot);
        let est = model.estimate_cardinality(&cmp(BinaryOp::Lt, 2, Value::Decimal(25.0)), &schema(), 100.0);
        assert!(est > 15.0 && est < 35.0, "estimate {}", est);
    }

    #[test]
    fn test_defaults_without_statistics() {
        let catalog = catalog(false);
        let snapshot = catalog.snapshot();
        let config = PlannerConfig::default();
        let model = CostModel::new(&config, &snapshot);
        assert_eq!(model.table_rows("products"), config.default_row_count);
        let s = model.selectivity(&cmp(BinaryOp::Gt, 2, Value::Decimal(10.0)), &schema());
        assert!((s - 1.0 / 3.0).abs() < 1e-9);
        // the primary key index still knows rows per key
        let eq = model.selectivity(&cmp(BinaryOp::Eq, 0, Value::Integer(3)), &schema());
        assert!((eq - 1.0 / config.default_row_count).abs() < 1e-9);
    }

    #[test]
    fn test_join_selectivity_and_cardinality() {
        let catalog = catalog(true);
        let snapshot = catalog.snapshot();
        let config = PlannerConfig::default();
        let model = CostModel::new(&config, &snapshot);
        let s = schema();
        let sel = model.join_selectivity(&column(1), &s, &column(0), &s);
        assert!((sel - 0.01).abs() < 1e-9);
        assert_eq!(estimate_join_cardinality(100.0, 100.0, sel), 100.0);
        assert_eq!(estimate_join_cardinality(0.0, 100.0, sel), 0.0);
    }

    #[test]
    fn test_sort_is_blocking_and_superlinear() {
        let catalog = catalog(false);
        let snapshot = catalog.snapshot();
        let config = PlannerConfig::default();
        let model = CostModel::new(&config, &snapshot);
        let input = Estimate::new(1024.0, 0.0, 1024.0);
        let sorted = model.sort(&input);
        assert!(sorted.startup_cost >= input.total_cost + 0.5 * 1024.0 * 10.0);
        assert!(model.sort_cost(2048.0) > 2.0 * model.sort_cost(1024.0));
    }

    #[test]
    fn test_limit_scales_cost() {
        let catalog = catalog(false);
        let snapshot = catalog.snapshot();
        let config = PlannerConfig::default();
        let model = CostModel::new(&config, &snapshot);
        let input = Estimate::new(100.0, 0.0, 100.0);
        let limited = model.limit(&input, Some(5), 5);
        assert_eq!(limited.rows, 5.0);
        assert!((limited.total_cost - 10.0).abs() < 1e-9);
        assert_eq!(model.limit(&input, Some(0), 0).rows, 0.0);
    }

    #[test]
    fn test_like_prefix_range() {
        let (lo, hi) = like_prefix_range("Wire%").unwrap();
        assert_eq!(lo, Value::Text("Wire".into()));
        assert_eq!(hi, Value::Text("Wirf".into()));
        assert!(like_prefix_range("%x").is_none());
    }
}
