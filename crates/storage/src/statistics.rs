//! Table and column statistics.
//!
//! Statistics are computed by an explicit analyze pass and are not maintained
//! on mutation. `TableStatistics::analyzed_version` records the data version
//! they describe so callers can tell when they have gone stale.

use std::cmp::Ordering;

use tern_core::Value;

use crate::row_store::RowStore;

/// Default number of histogram buckets built by analyze.
pub const DEFAULT_HISTOGRAM_BUCKETS: usize = 16;

/// An equi-depth histogram over the non-null values of a column.
///
/// `bounds` has `buckets + 1` sorted entries; each bucket between two adjacent
/// bounds holds roughly the same number of values.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    bounds: Vec<Value>,
}

impl Histogram {
    /// Builds a histogram from sorted non-null values. Returns None for fewer
    /// than two values.
    pub fn from_sorted(sorted: &[Value], buckets: usize) -> Option<Self> {
        if sorted.len() < 2 || buckets == 0 {
            return None;
        }
        let buckets = buckets.min(sorted.len() - 1);
        let last = sorted.len() - 1;
        let bounds = (0..=buckets)
            .map(|b| sorted[b * last / buckets].clone())
            .collect();
        Some(Self { bounds })
    }

    /// Returns the bucket boundaries.
    pub fn bounds(&self) -> &[Value] {
        &self.bounds
    }

    /// Returns the number of buckets.
    pub fn buckets(&self) -> usize {
        self.bounds.len() - 1
    }

    /// Estimated fraction of values below `value` (at or below when `inclusive`).
    pub fn fraction_below(&self, value: &Value, inclusive: bool) -> f64 {
        let n = self.buckets();
        let first = &self.bounds[0];
        let last = &self.bounds[n];

        match value.cmp(first) {
            Ordering::Less => return 0.0,
            Ordering::Equal if !inclusive => return 0.0,
            _ => {}
        }
        if value >= last {
            return 1.0;
        }

        // Last bucket whose lower bound is <= value
        let i = self.bounds[..n]
            .iter()
            .rposition(|b| b <= value)
            .unwrap_or(0);
        let within = interpolate(&self.bounds[i], &self.bounds[i + 1], value);
        ((i as f64 + within) / n as f64).clamp(0.0, 1.0)
    }

    /// Estimated fraction of values between two optional bounds.
    /// Each bound is `(value, inclusive)`.
    pub fn fraction_between(
        &self,
        lower: Option<(&Value, bool)>,
        upper: Option<(&Value, bool)>,
    ) -> f64 {
        let hi = match upper {
            Some((v, inclusive)) => self.fraction_below(v, inclusive),
            None => 1.0,
        };
        let lo = match lower {
            Some((v, inclusive)) => self.fraction_below(v, !inclusive),
            None => 0.0,
        };
        (hi - lo).clamp(0.0, 1.0)
    }
}

/// Position of `value` inside `[lo, hi]` as a fraction; numeric values are
/// interpolated linearly, everything else lands mid-bucket.
fn interpolate(lo: &Value, hi: &Value, value: &Value) -> f64 {
    match (lo.to_f64(), hi.to_f64(), value.to_f64()) {
        (Some(l), Some(h), Some(v)) if h > l => ((v - l) / (h - l)).clamp(0.0, 1.0),
        (Some(_), Some(_), Some(_)) => 1.0,
        _ => match (lo, hi, value) {
            (Value::Timestamp(l), Value::Timestamp(h), Value::Timestamp(v)) if h > l => {
                ((*v - *l) as f64 / (*h - *l) as f64).clamp(0.0, 1.0)
            }
            _ if lo == hi => 1.0,
            _ => 0.5,
        },
    }
}

/// Statistics for one column.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnStatistics {
    /// Number of distinct non-null values.
    pub distinct_count: usize,
    /// Fraction of rows holding null.
    pub null_fraction: f64,
    /// Smallest non-null value.
    pub min: Option<Value>,
    /// Largest non-null value.
    pub max: Option<Value>,
    /// Value distribution, when there are at least two values.
    pub histogram: Option<Histogram>,
}

impl ColumnStatistics {
    fn from_values(mut values: Vec<Value>, row_count: usize, buckets: usize) -> Self {
        let nulls = row_count - values.len();
        values.sort();
        let mut distinct_count = 0;
        for (i, v) in values.iter().enumerate() {
            if i == 0 || values[i - 1] != *v {
                distinct_count += 1;
            }
        }
        Self {
            distinct_count,
            null_fraction: if row_count == 0 {
                0.0
            } else {
                nulls as f64 / row_count as f64
            },
            min: values.first().cloned(),
            max: values.last().cloned(),
            histogram: Histogram::from_sorted(&values, buckets),
        }
    }
}

/// Statistics for a table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableStatistics {
    /// Number of rows at analyze time.
    pub row_count: usize,
    /// Per-column statistics, aligned with the schema's columns.
    pub columns: Vec<ColumnStatistics>,
    /// Data version the statistics describe.
    pub analyzed_version: u64,
}

impl TableStatistics {
    /// Computes statistics over every row of `store`.
    pub fn analyze(store: &RowStore, buckets: usize) -> Self {
        let width = store.schema().columns().len();
        let row_count = store.len();
        let mut per_column: Vec<Vec<Value>> = vec![Vec::with_capacity(row_count); width];
        for row in store.scan() {
            for (col, value) in row.values().iter().enumerate() {
                if !value.is_null() {
                    per_column[col].push(value.clone());
                }
            }
        }
        let columns = per_column
            .into_iter()
            .map(|values| ColumnStatistics::from_values(values, row_count, buckets))
            .collect();
        Self {
            row_count,
            columns,
            analyzed_version: store.data_version(),
        }
    }

    /// Returns the statistics of the column at `index`.
    pub fn column(&self, index: usize) -> Option<&ColumnStatistics> {
        self.columns.get(index)
    }
}
