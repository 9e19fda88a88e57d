//! Duplicate elimination.

use hashbrown::HashSet;
use tern_core::{Row, Value};

use super::node::Operator;
use crate::error::QueryResult;
use crate::planner::DedupStrategy;

/// Returns the first occurrence of every distinct row.
///
/// The hash strategy remembers every row seen; the sort strategy expects
/// equal rows to be adjacent and only compares with the previous one.
pub(crate) struct DistinctExec {
    input: Box<Operator>,
    strategy: DedupStrategy,
    seen: HashSet<Vec<Value>>,
    previous: Option<Vec<Value>>,
}

impl DistinctExec {
    pub(crate) fn new(input: Box<Operator>, strategy: DedupStrategy) -> Self {
        Self {
            input,
            strategy,
            seen: HashSet::new(),
            previous: None,
        }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.seen.clear();
        self.previous = None;
        self.input.open(outer)
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        while let Some(row) = self.input.next()? {
            let fresh = match self.strategy {
                DedupStrategy::Hash => self.seen.insert(row.values().to_vec()),
                DedupStrategy::Sort => {
                    let fresh = self.previous.as_deref() != Some(row.values());
                    if fresh {
                        self.previous = Some(row.values().to_vec());
                    }
                    fresh
                }
            };
            if fresh {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    pub(crate) fn close(&mut self) {
        self.input.close();
        self.seen.clear();
        self.previous = None;
    }
}
