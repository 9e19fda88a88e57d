//! Join operators.
//!
//! All joins produce left columns followed by right columns, except semi and
//! anti joins which output left rows only. Rows without a partner on a
//! preserved side are emitted exactly once, padded with NULLs.

mod hash;
mod merge;
mod nested;

pub(crate) use hash::HashJoinExec;
pub(crate) use merge::MergeJoinExec;
pub(crate) use nested::NestedLoopJoinExec;

use tern_core::{Row, Value};

use crate::planner::JoinKind;

/// Join kind plus input widths.
#[derive(Clone, Copy, Debug)]
pub(crate) struct JoinShape {
    pub(crate) kind: JoinKind,
    pub(crate) left_width: usize,
    pub(crate) right_width: usize,
}

impl JoinShape {
    pub(crate) fn new(kind: JoinKind, left_width: usize, right_width: usize) -> Self {
        Self {
            kind,
            left_width,
            right_width,
        }
    }

    /// Left row without a partner.
    fn left_unmatched(&self, left: &Row) -> Row {
        Row::pad_right(left, self.right_width)
    }

    /// Right row without a partner.
    fn right_unmatched(&self, right: &Row) -> Row {
        Row::pad_left(self.left_width, right)
    }
}

fn has_null(key: &[Value]) -> bool {
    key.iter().any(Value::is_null)
}
