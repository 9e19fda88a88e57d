//! UNION, INTERSECT and EXCEPT.
//!
//! With `all` each distinct row comes out as many times as the bag semantics
//! give: `l + r` for UNION, `min(l, r)` for INTERSECT and `l - r` (at least
//! zero) for EXCEPT. Without `all` a row comes out once if it is on either
//! side (UNION), on both sides (INTERSECT) or only on the left (EXCEPT). NULLs
//! compare equal to each other here, unlike in predicates.

use core::cmp::Ordering;
use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};
use tern_core::{Row, Value};

use super::node::Operator;
use crate::error::QueryResult;
use crate::planner::{SetOpKind, SetOpStrategy};

/// A run of equal rows from one sorted input.
struct Run {
    row: Row,
    count: usize,
}

/// Set operation over two inputs of the same width.
pub(crate) struct SetOpExec {
    left: Box<Operator>,
    right: Box<Operator>,
    kind: SetOpKind,
    all: bool,
    strategy: SetOpStrategy,
    on_right: bool,
    right_counts: HashMap<Vec<Value>, usize>,
    seen: HashSet<Vec<Value>>,
    left_peek: Option<Row>,
    right_peek: Option<Row>,
    left_run: Option<Run>,
    right_run: Option<Run>,
    pending: VecDeque<Row>,
}

impl SetOpExec {
    pub(crate) fn new(
        left: Box<Operator>,
        right: Box<Operator>,
        kind: SetOpKind,
        all: bool,
        strategy: SetOpStrategy,
    ) -> Self {
        Self {
            left,
            right,
            kind,
            all,
            strategy,
            on_right: false,
            right_counts: HashMap::new(),
            seen: HashSet::new(),
            left_peek: None,
            right_peek: None,
            left_run: None,
            right_run: None,
            pending: VecDeque::new(),
        }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.reset();
        self.left.open(outer)?;
        self.right.open(outer)?;
        match self.strategy {
            SetOpStrategy::Append => {}
            SetOpStrategy::Hash => {
                if self.kind != SetOpKind::Union {
                    while let Some(row) = self.right.next()? {
                        *self.right_counts.entry(row.into_values()).or_insert(0) += 1;
                    }
                    self.right.close();
                }
            }
            SetOpStrategy::Sort => {
                self.left_peek = self.left.next()?;
                self.right_peek = self.right.next()?;
            }
        }
        Ok(())
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        match self.strategy {
            SetOpStrategy::Append => self.next_append(),
            SetOpStrategy::Hash => self.next_hashed(),
            SetOpStrategy::Sort => self.next_merged(),
        }
    }

    fn next_append(&mut self) -> QueryResult<Option<Row>> {
        if !self.on_right {
            if let Some(row) = self.left.next()? {
                return Ok(Some(row));
            }
            self.on_right = true;
        }
        self.right.next()
    }

    fn next_hashed(&mut self) -> QueryResult<Option<Row>> {
        if self.kind == SetOpKind::Union {
            loop {
                let Some(row) = self.next_append()? else {
                    return Ok(None);
                };
                if self.all || self.seen.insert(row.values().to_vec()) {
                    return Ok(Some(row));
                }
            }
        }
        while let Some(row) = self.left.next()? {
            let remaining = self.right_counts.get_mut(row.values());
            let keep = match (self.kind, self.all) {
                (SetOpKind::Intersect, true) => match remaining {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                },
                (SetOpKind::Except, true) => match remaining {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        false
                    }
                    _ => true,
                },
                (SetOpKind::Intersect, false) => {
                    remaining.is_some() && self.seen.insert(row.values().to_vec())
                }
                (SetOpKind::Except, false) => {
                    remaining.is_none() && self.seen.insert(row.values().to_vec())
                }
                (SetOpKind::Union, _) => true,
            };
            if keep {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Reads the next run of equal rows from one side.
    fn take_run(input: &mut Operator, peek: &mut Option<Row>) -> QueryResult<Option<Run>> {
        let Some(row) = peek.take() else {
            return Ok(None);
        };
        let mut count = 1;
        loop {
            match input.next()? {
                Some(next) if next.values() == row.values() => count += 1,
                other => {
                    *peek = other;
                    break;
                }
            }
        }
        Ok(Some(Run { row, count }))
    }

    fn next_merged(&mut self) -> QueryResult<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            if self.left_run.is_none() {
                self.left_run = Self::take_run(&mut self.left, &mut self.left_peek)?;
            }
            if self.right_run.is_none() {
                self.right_run = Self::take_run(&mut self.right, &mut self.right_peek)?;
            }
            let order = match (&self.left_run, &self.right_run) {
                (None, None) => return Ok(None),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(l), Some(r)) => l.row.values().cmp(r.row.values()),
            };
            let (row, lc, rc) = match order {
                Ordering::Less => match self.left_run.take() {
                    Some(run) => (run.row, run.count, 0),
                    None => continue,
                },
                Ordering::Greater => match self.right_run.take() {
                    Some(run) => (run.row, 0, run.count),
                    None => continue,
                },
                Ordering::Equal => match (self.left_run.take(), self.right_run.take()) {
                    (Some(l), Some(r)) => (l.row, l.count, r.count),
                    _ => continue,
                },
            };
            let copies = self.copies(lc, rc);
            for _ in 0..copies {
                self.pending.push_back(row.clone());
            }
        }
    }

    /// Output multiplicity of a row seen `lc` times on the left and `rc`
    /// times on the right.
    fn copies(&self, lc: usize, rc: usize) -> usize {
        if self.all {
            return match self.kind {
                SetOpKind::Union => lc + rc,
                SetOpKind::Intersect => lc.min(rc),
                SetOpKind::Except => lc.saturating_sub(rc),
            };
        }
        let keep = match self.kind {
            SetOpKind::Union => lc + rc > 0,
            SetOpKind::Intersect => lc > 0 && rc > 0,
            SetOpKind::Except => lc > 0 && rc == 0,
        };
        usize::from(keep)
    }

    #[cfg(test)]
    pub(crate) fn left(&self) -> &Operator {
        &self.left
    }

    fn reset(&mut self) {
        self.on_right = false;
        self.right_counts.clear();
        self.seen.clear();
        self.left_peek = None;
        self.right_peek = None;
        self.left_run = None;
        self.right_run = None;
        self.pending.clear();
    }

    pub(crate) fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::node::test_support::{ints, run};
    use crate::executor::node::ExecNode;

    fn set_op(kind: SetOpKind, all: bool, strategy: SetOpStrategy) -> Vec<i64> {
        // both sides sorted, as the sort strategy requires
        let left = ints(&[&[1], &[1], &[1], &[2], &[3]]);
        let right = ints(&[&[1], &[2], &[2], &[4]]);
        let exec = SetOpExec::new(left, right, kind, all, strategy);
        let mut out: Vec<i64> = run(&mut Operator::new(0, "SetOp", None, ExecNode::SetOp(exec)))
            .into_iter()
            .filter_map(|r| r[0].as_i64())
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_bag_multiplicities() {
        for strategy in [SetOpStrategy::Hash, SetOpStrategy::Sort] {
            assert_eq!(set_op(SetOpKind::Union, false, strategy), vec![1, 2, 3, 4]);
            assert_eq!(
                set_op(SetOpKind::Union, true, strategy),
                vec![1, 1, 1, 1, 2, 2, 2, 3, 4]
            );
            assert_eq!(set_op(SetOpKind::Intersect, false, strategy), vec![1, 2]);
            assert_eq!(set_op(SetOpKind::Intersect, true, strategy), vec![1, 2]);
            assert_eq!(set_op(SetOpKind::Except, false, strategy), vec![3]);
            assert_eq!(set_op(SetOpKind::Except, true, strategy), vec![1, 1, 3]);
        }
        assert_eq!(
            set_op(SetOpKind::Union, true, SetOpStrategy::Append),
            vec![1, 1, 1, 1, 2, 2, 2, 3, 4]
        );
    }
}
