//! Per-node execution metrics.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

/// What one plan node did during execution.
///
/// Counts accumulate over every time the node was opened: an inner side that
/// is re-opened per outer row reports all its rows and `loops` opens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeMetrics {
    /// Rows returned.
    pub rows: u64,
    /// Times the node was opened.
    pub loops: u64,
    /// Time spent inside `open`, `next` and `close`, children included.
    pub elapsed: Duration,
}

pub(crate) type SharedMetrics = Rc<RefCell<NodeMetrics>>;

/// Metrics slots keyed by plan node id.
#[derive(Debug, Default)]
pub(crate) struct MetricsRegistry {
    nodes: BTreeMap<usize, SharedMetrics>,
}

impl MetricsRegistry {
    /// Returns the slot for node `id`, creating it on first use.
    pub(crate) fn register(&mut self, id: usize) -> SharedMetrics {
        Rc::clone(self.nodes.entry(id).or_default())
    }

    /// Copies the current values out.
    pub(crate) fn snapshot(&self) -> BTreeMap<usize, NodeMetrics> {
        self.nodes
            .iter()
            .map(|(id, m)| (*id, *m.borrow()))
            .collect()
    }
}
