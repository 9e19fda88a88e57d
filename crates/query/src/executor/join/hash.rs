//! Hash join.

use std::collections::VecDeque;

use hashbrown::HashMap;
use tern_core::{Row, Value};
use tracing::debug;

use super::{has_null, JoinShape};
use crate::error::QueryResult;
use crate::executor::eval::{eval_all, passes};
use crate::executor::node::Operator;
use crate::planner::{BoundExpr, JoinKind, JoinSide};

/// Classic hash join:
/// 1. Build phase: buffer the build side into a hash table on its keys.
/// 2. Probe phase: stream the other side and look each row up.
///
/// Rows whose key contains NULL never match. Unmatched build rows of a
/// preserved side are emitted after the probe side is exhausted.
pub(crate) struct HashJoinExec {
    left: Box<Operator>,
    right: Box<Operator>,
    shape: JoinShape,
    left_keys: Vec<BoundExpr>,
    right_keys: Vec<BoundExpr>,
    residual: Option<BoundExpr>,
    build: JoinSide,
    table: HashMap<Vec<Value>, Vec<usize>>,
    build_rows: Vec<Row>,
    build_matched: Vec<bool>,
    queue: VecDeque<Row>,
    probe_done: bool,
}

impl HashJoinExec {
    pub(crate) fn new(
        left: Box<Operator>,
        right: Box<Operator>,
        shape: JoinShape,
        left_keys: Vec<BoundExpr>,
        right_keys: Vec<BoundExpr>,
        residual: Option<BoundExpr>,
        build: JoinSide,
    ) -> Self {
        Self {
            left,
            right,
            shape,
            left_keys,
            right_keys,
            residual,
            build,
            table: HashMap::new(),
            build_rows: Vec::new(),
            build_matched: Vec::new(),
            queue: VecDeque::new(),
            probe_done: false,
        }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.release();
        let (build, keys) = match self.build {
            JoinSide::Left => (&mut self.left, &self.left_keys),
            JoinSide::Right => (&mut self.right, &self.right_keys),
        };
        build.open(outer)?;
        while let Some(row) = build.next()? {
            let key = eval_all(keys, &row)?;
            if !has_null(&key) {
                self.table
                    .entry(key)
                    .or_default()
                    .push(self.build_rows.len());
            }
            self.build_rows.push(row);
        }
        build.close();
        self.build_matched = vec![false; self.build_rows.len()];
        debug!(
            rows = self.build_rows.len(),
            keys = self.table.len(),
            "hash join build side buffered"
        );
        self.probe_done = false;
        match self.build {
            JoinSide::Left => self.right.open(outer),
            JoinSide::Right => self.left.open(outer),
        }
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        loop {
            if let Some(row) = self.queue.pop_front() {
                return Ok(Some(row));
            }
            if self.probe_done {
                return Ok(None);
            }
            let probe = match self.build {
                JoinSide::Left => &mut self.right,
                JoinSide::Right => &mut self.left,
            };
            match probe.next()? {
                Some(row) => self.probe(row)?,
                None => {
                    probe.close();
                    self.probe_done = true;
                    self.finish();
                }
            }
        }
    }

    fn probe(&mut self, row: Row) -> QueryResult<()> {
        let kind = self.shape.kind;
        let probe_keys = match self.build {
            JoinSide::Left => &self.right_keys,
            JoinSide::Right => &self.left_keys,
        };
        let key = eval_all(probe_keys, &row)?;
        let candidates = if has_null(&key) {
            None
        } else {
            self.table.get(&key)
        };

        let mut matched = false;
        for &idx in candidates.into_iter().flatten() {
            let build_row = &self.build_rows[idx];
            let joined = match self.build {
                JoinSide::Left => Row::concat(build_row, &row),
                JoinSide::Right => Row::concat(&row, build_row),
            };
            if !passes(self.residual.as_ref(), &joined)? {
                continue;
            }
            matched = true;
            self.build_matched[idx] = true;
            if kind.is_filtering() {
                if self.build == JoinSide::Right {
                    break;
                }
            } else {
                self.queue.push_back(joined);
            }
        }

        match self.build {
            JoinSide::Right => match kind {
                JoinKind::Semi if matched => self.queue.push_back(row),
                JoinKind::Anti if !matched => self.queue.push_back(row),
                _ if !matched && kind.preserves_left() => {
                    self.queue.push_back(self.shape.left_unmatched(&row))
                }
                _ => {}
            },
            JoinSide::Left => {
                if !matched && kind.preserves_right() {
                    self.queue.push_back(self.shape.right_unmatched(&row));
                }
            }
        }
        Ok(())
    }

    /// Emits build rows whose output depends on having seen every probe row.
    fn finish(&mut self) {
        let kind = self.shape.kind;
        for (row, matched) in self.build_rows.iter().zip(&self.build_matched) {
            let out = match (self.build, kind) {
                (JoinSide::Right, k) if k.preserves_right() && !matched => {
                    Some(self.shape.right_unmatched(row))
                }
                (JoinSide::Left, JoinKind::Semi) if *matched => Some(row.clone()),
                (JoinSide::Left, JoinKind::Anti) if !matched => Some(row.clone()),
                (JoinSide::Left, k) if k.preserves_left() && !matched => {
                    Some(self.shape.left_unmatched(row))
                }
                _ => None,
            };
            self.queue.extend(out);
        }
        self.table.clear();
        self.build_rows.clear();
        self.build_matched.clear();
    }

    fn release(&mut self) {
        self.table.clear();
        self.build_rows.clear();
        self.build_matched.clear();
        self.queue.clear();
    }

    pub(crate) fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.release();
    }
}
