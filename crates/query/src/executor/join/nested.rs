//! Nested loop join.

use std::collections::VecDeque;

use tern_core::Row;

use super::JoinShape;
use crate::error::QueryResult;
use crate::executor::eval::passes;
use crate::executor::node::Operator;
use crate::planner::{BoundExpr, JoinKind};

/// Re-opens and drains the inner side for every outer row.
///
/// A parameterized inner side (an index scan keyed by the outer row) is
/// opened with the current outer row. Output follows outer order, then inner
/// order within each outer row; unmatched inner rows of right and full joins
/// come last.
pub(crate) struct NestedLoopJoinExec {
    left: Box<Operator>,
    right: Box<Operator>,
    shape: JoinShape,
    condition: Option<BoundExpr>,
    parameterized: bool,
    queue: VecDeque<Row>,
    right_matched: Vec<bool>,
    left_done: bool,
}

impl NestedLoopJoinExec {
    pub(crate) fn new(
        left: Box<Operator>,
        right: Box<Operator>,
        shape: JoinShape,
        condition: Option<BoundExpr>,
        parameterized: bool,
    ) -> Self {
        Self {
            left,
            right,
            shape,
            condition,
            parameterized,
            queue: VecDeque::new(),
            right_matched: Vec::new(),
            left_done: false,
        }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.queue.clear();
        self.right_matched.clear();
        self.left_done = false;
        self.left.open(outer)
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        loop {
            if let Some(row) = self.queue.pop_front() {
                return Ok(Some(row));
            }
            if self.left_done {
                return Ok(None);
            }
            match self.left.next()? {
                Some(left) => self.join_outer_row(left)?,
                None => {
                    self.left_done = true;
                    self.left.close();
                    if self.shape.kind.preserves_right() {
                        self.emit_unmatched_right()?;
                    }
                }
            }
        }
    }

    fn join_outer_row(&mut self, left: Row) -> QueryResult<()> {
        let kind = self.shape.kind;
        self.right
            .open(if self.parameterized { Some(&left) } else { None })?;
        let mut matched = false;
        let mut position = 0;
        while let Some(right) = self.right.next()? {
            let joined = Row::concat(&left, &right);
            if passes(self.condition.as_ref(), &joined)? {
                matched = true;
                if kind.is_filtering() {
                    break;
                }
                if kind.preserves_right() {
                    if self.right_matched.len() <= position {
                        self.right_matched.resize(position + 1, false);
                    }
                    self.right_matched[position] = true;
                }
                self.queue.push_back(joined);
            }
            position += 1;
        }
        self.right.close();

        match kind {
            JoinKind::Semi if matched => self.queue.push_back(left),
            JoinKind::Anti if !matched => self.queue.push_back(left),
            _ if !matched && kind.preserves_left() => {
                self.queue.push_back(self.shape.left_unmatched(&left))
            }
            _ => {}
        }
        Ok(())
    }

    fn emit_unmatched_right(&mut self) -> QueryResult<()> {
        self.right.open(None)?;
        let mut position = 0;
        while let Some(right) = self.right.next()? {
            if !self.right_matched.get(position).copied().unwrap_or(false) {
                self.queue.push_back(self.shape.right_unmatched(&right));
            }
            position += 1;
        }
        self.right.close();
        Ok(())
    }

    pub(crate) fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.queue.clear();
        self.right_matched.clear();
    }
}
