//! Filter operator.

use tern_core::Row;

use super::eval::eval_predicate;
use super::node::Operator;
use crate::error::QueryResult;
use crate::planner::BoundExpr;

/// Passes through rows for which the predicate is TRUE.
pub(crate) struct FilterExec {
    input: Box<Operator>,
    predicate: BoundExpr,
}

impl FilterExec {
    pub(crate) fn new(input: Box<Operator>, predicate: BoundExpr) -> Self {
        Self { input, predicate }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.input.open(outer)
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        while let Some(row) = self.input.next()? {
            if eval_predicate(&self.predicate, &row)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    pub(crate) fn close(&mut self) {
        self.input.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use crate::executor::node::test_support::{run, values};
    use crate::executor::node::ExecNode;
    use tern_core::Value;

    #[test]
    fn test_filter_rejects_false_and_null() {
        let input = values(vec![
            vec![Value::Integer(10)],
            vec![Value::Null],
            vec![Value::Integer(20)],
            vec![Value::Integer(30)],
        ]);
        let predicate = BoundExpr::Binary {
            op: BinaryOp::Gt,
            left: Box::new(BoundExpr::Column {
                index: 0,
                name: "value".into(),
                data_type: None,
            }),
            right: Box::new(BoundExpr::Literal(Value::Integer(15))),
        };
        let mut op = Operator::new(1, "Filter", None, ExecNode::Filter(FilterExec::new(input, predicate)));
        assert_eq!(
            run(&mut op),
            vec![vec![Value::Integer(20)], vec![Value::Integer(30)]]
        );
    }
}
