//! Index statistics.
//!
//! Maintained incrementally by every index on add/remove, so the planner can
//! read entry and distinct-key counts without touching the data.

/// Statistics for an index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexStats {
    /// Total number of key/row entries.
    total_rows: usize,
    /// Number of distinct keys.
    distinct_keys: usize,
}

impl IndexStats {
    /// Creates a new empty stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of entries.
    #[inline]
    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    /// Returns the number of distinct keys.
    #[inline]
    pub fn distinct_keys(&self) -> usize {
        self.distinct_keys
    }

    /// Average number of entries per key, at least 1.0.
    pub fn rows_per_key(&self) -> f64 {
        if self.distinct_keys == 0 {
            1.0
        } else {
            (self.total_rows as f64 / self.distinct_keys as f64).max(1.0)
        }
    }

    /// Records an added entry; `new_key` is true when the key was absent.
    pub(crate) fn on_add(&mut self, new_key: bool) {
        self.total_rows += 1;
        if new_key {
            self.distinct_keys += 1;
        }
    }

    /// Records a removed entry; `key_gone` is true when the key is now absent.
    pub(crate) fn on_remove(&mut self, key_gone: bool) {
        self.total_rows = self.total_rows.saturating_sub(1);
        if key_gone {
            self.distinct_keys = self.distinct_keys.saturating_sub(1);
        }
    }

    /// Resets all counters.
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_add_remove() {
        let mut stats = IndexStats::new();
        stats.on_add(true);
        stats.on_add(false);
        stats.on_add(true);
        assert_eq!(stats.total_rows(), 3);
        assert_eq!(stats.distinct_keys(), 2);
        assert_eq!(stats.rows_per_key(), 1.5);

        stats.on_remove(false);
        stats.on_remove(true);
        assert_eq!(stats.total_rows(), 1);
        assert_eq!(stats.distinct_keys(), 1);
    }

    #[test]
    fn test_stats_clear() {
        let mut stats = IndexStats::new();
        stats.on_add(true);
        stats.clear();
        assert_eq!(stats, IndexStats::new());
        assert_eq!(stats.rows_per_key(), 1.0);
    }
}
