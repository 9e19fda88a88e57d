//! Merge join over inputs sorted ascending on the join keys.

use core::cmp::Ordering;
use std::collections::VecDeque;

use tern_core::{Row, Value};

use super::{has_null, JoinShape};
use crate::error::QueryResult;
use crate::executor::eval::passes;
use crate::executor::node::Operator;
use crate::planner::BoundExpr;

type Keyed = (Vec<Value>, Row);

fn key_of(row: &Row, columns: &[usize]) -> Vec<Value> {
    columns
        .iter()
        .map(|&c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Advances two sorted cursors in lockstep and emits the cross product of
/// every pair of equal-key runs that satisfies the residual condition.
pub(crate) struct MergeJoinExec {
    left: Box<Operator>,
    right: Box<Operator>,
    shape: JoinShape,
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    residual: Option<BoundExpr>,
    left_peek: Option<Keyed>,
    right_peek: Option<Keyed>,
    queue: VecDeque<Row>,
}

impl MergeJoinExec {
    pub(crate) fn new(
        left: Box<Operator>,
        right: Box<Operator>,
        shape: JoinShape,
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
        residual: Option<BoundExpr>,
    ) -> Self {
        Self {
            left,
            right,
            shape,
            left_keys,
            right_keys,
            residual,
            left_peek: None,
            right_peek: None,
            queue: VecDeque::new(),
        }
    }

    fn pull_left(&mut self) -> QueryResult<Option<Keyed>> {
        Ok(self
            .left
            .next()?
            .map(|row| (key_of(&row, &self.left_keys), row)))
    }

    fn pull_right(&mut self) -> QueryResult<Option<Keyed>> {
        Ok(self
            .right
            .next()?
            .map(|row| (key_of(&row, &self.right_keys), row)))
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.queue.clear();
        self.left.open(outer)?;
        self.right.open(outer)?;
        self.left_peek = self.pull_left()?;
        self.right_peek = self.pull_right()?;
        Ok(())
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        let kind = self.shape.kind;
        loop {
            if let Some(row) = self.queue.pop_front() {
                return Ok(Some(row));
            }
            match (self.left_peek.take(), self.right_peek.take()) {
                (None, None) => return Ok(None),
                (Some((_, l)), None) => {
                    if !kind.preserves_left() {
                        return Ok(None);
                    }
                    self.queue.push_back(self.shape.left_unmatched(&l));
                    self.left_peek = self.pull_left()?;
                }
                (None, Some((_, r))) => {
                    if !kind.preserves_right() {
                        return Ok(None);
                    }
                    self.queue.push_back(self.shape.right_unmatched(&r));
                    self.right_peek = self.pull_right()?;
                }
                (Some((lk, l)), Some((rk, r))) => {
                    let order = if has_null(&lk) {
                        Ordering::Less
                    } else if has_null(&rk) {
                        Ordering::Greater
                    } else {
                        lk.cmp(&rk)
                    };
                    match order {
                        Ordering::Less => {
                            if kind.preserves_left() {
                                self.queue.push_back(self.shape.left_unmatched(&l));
                            }
                            self.right_peek = Some((rk, r));
                            self.left_peek = self.pull_left()?;
                        }
                        Ordering::Greater => {
                            if kind.preserves_right() {
                                self.queue.push_back(self.shape.right_unmatched(&r));
                            }
                            self.left_peek = Some((lk, l));
                            self.right_peek = self.pull_right()?;
                        }
                        Ordering::Equal => self.join_runs(lk, l, r)?,
                    }
                }
            }
        }
    }

    /// Collects the equal-key runs starting at `l` and `r` and joins them.
    fn join_runs(&mut self, key: Vec<Value>, l: Row, r: Row) -> QueryResult<()> {
        let mut left_run = vec![l];
        loop {
            match self.pull_left()? {
                Some((k, row)) if k == key => left_run.push(row),
                other => {
                    self.left_peek = other;
                    break;
                }
            }
        }
        let mut right_run = vec![r];
        loop {
            match self.pull_right()? {
                Some((k, row)) if k == key => right_run.push(row),
                other => {
                    self.right_peek = other;
                    break;
                }
            }
        }

        let kind = self.shape.kind;
        let mut right_matched = vec![false; right_run.len()];
        for l in &left_run {
            let mut matched = false;
            for (j, r) in right_run.iter().enumerate() {
                let joined = Row::concat(l, r);
                if passes(self.residual.as_ref(), &joined)? {
                    matched = true;
                    right_matched[j] = true;
                    self.queue.push_back(joined);
                }
            }
            if !matched && kind.preserves_left() {
                self.queue.push_back(self.shape.left_unmatched(l));
            }
        }
        if kind.preserves_right() {
            for (r, matched) in right_run.iter().zip(right_matched) {
                if !matched {
                    self.queue.push_back(self.shape.right_unmatched(r));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.left_peek = None;
        self.right_peek = None;
        self.queue.clear();
    }
}
