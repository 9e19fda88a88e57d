//! Limit and offset.

use tern_core::Row;

use super::node::Operator;
use crate::error::QueryResult;

/// Skips `offset` rows, then returns at most `count`.
///
/// Once the limit is reached the input is closed and never pulled again.
pub(crate) struct LimitExec {
    input: Box<Operator>,
    count: Option<usize>,
    offset: usize,
    skipped: usize,
    produced: usize,
    done: bool,
}

impl LimitExec {
    pub(crate) fn new(input: Box<Operator>, count: Option<usize>, offset: usize) -> Self {
        Self {
            input,
            count,
            offset,
            skipped: 0,
            produced: 0,
            done: false,
        }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.skipped = 0;
        self.produced = 0;
        self.done = false;
        self.input.open(outer)
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        if self.count.map_or(false, |c| self.produced >= c) {
            self.finish();
            return Ok(None);
        }
        while self.skipped < self.offset {
            if self.input.next()?.is_none() {
                self.finish();
                return Ok(None);
            }
            self.skipped += 1;
        }
        match self.input.next()? {
            Some(row) => {
                self.produced += 1;
                Ok(Some(row))
            }
            None => {
                self.finish();
                Ok(None)
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.input.close();
    }

    pub(crate) fn close(&mut self) {
        self.input.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::node::test_support::{ints, run};
    use crate::executor::node::ExecNode;
    use tern_core::Value;

    fn limit(count: Option<usize>, offset: usize) -> Vec<i64> {
        let rows: Vec<Vec<i64>> = (1..=12).map(|i| vec![i]).collect();
        let refs: Vec<&[i64]> = rows.iter().map(|r| r.as_slice()).collect();
        let exec = LimitExec::new(ints(&refs), count, offset);
        run(&mut Operator::new(0, "Limit", None, ExecNode::Limit(exec)))
            .into_iter()
            .map(|r| match r[0] {
                Value::Integer(i) => i,
                _ => -1,
            })
            .collect()
    }

    #[test]
    fn test_limit_offset_window() {
        assert_eq!(limit(Some(5), 5), vec![6, 7, 8, 9, 10]);
        assert_eq!(limit(Some(5), 10), vec![11, 12]);
        assert!(limit(Some(0), 0).is_empty());
        assert_eq!(limit(None, 11), vec![12]);
    }
}
