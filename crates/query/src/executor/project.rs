//! Projection operator.

use tern_core::Row;

use super::eval::eval_all;
use super::node::Operator;
use crate::error::QueryResult;
use crate::planner::BoundExpr;

/// Computes one output row per input row.
pub(crate) struct ProjectExec {
    input: Box<Operator>,
    exprs: Vec<BoundExpr>,
}

impl ProjectExec {
    pub(crate) fn new(input: Box<Operator>, exprs: Vec<BoundExpr>) -> Self {
        Self { input, exprs }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.input.open(outer)
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        match self.input.next()? {
            Some(row) => Ok(Some(Row::new(row.id(), eval_all(&self.exprs, &row)?))),
            None => Ok(None),
        }
    }

    pub(crate) fn close(&mut self) {
        self.input.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use crate::executor::node::test_support::{ints, run};
    use crate::executor::node::ExecNode;
    use tern_core::Value;

    #[test]
    fn test_project_reorders_and_computes() {
        let column = |i| BoundExpr::Column {
            index: i,
            name: format!("c{}", i),
            data_type: None,
        };
        let exprs = vec![
            column(1),
            BoundExpr::Binary {
                op: BinaryOp::Mul,
                left: Box::new(column(0)),
                right: Box::new(BoundExpr::Literal(Value::Integer(2))),
            },
        ];
        let mut op = Operator::new(
            1,
            "Project",
            None,
            ExecNode::Project(ProjectExec::new(ints(&[&[1, 2], &[3, 4]]), exprs)),
        );
        assert_eq!(
            run(&mut op),
            vec![
                vec![Value::Integer(2), Value::Integer(2)],
                vec![Value::Integer(4), Value::Integer(6)]
            ]
        );
    }
}
