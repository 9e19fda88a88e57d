//! Window functions.
//!
//! The whole input is buffered and split into partitions. Each partition is
//! ordered by the window's sort keys, then every function is evaluated for
//! every row. Output rows are the input columns followed by one column per
//! function, partition by partition.

use hashbrown::HashMap;
use tern_core::{Row, Value};
use tracing::debug;

use super::aggregate::Accumulator;
use super::eval::{eval, eval_all};
use super::node::Operator;
use super::sort::compare_keys;
use crate::ast::{FrameBound, FrameSpec, FrameUnits, SortOrder};
use crate::error::{QueryError, QueryResult};
use crate::planner::{BoundExpr, BoundSortKey, BoundWindowFunc, WindowStrategy};

/// One partition row with its evaluated order key.
struct Slot {
    row: Row,
    key: Vec<Value>,
}

pub(crate) struct WindowExec {
    input: Box<Operator>,
    partition_by: Vec<BoundExpr>,
    order_by: Vec<BoundSortKey>,
    frame: FrameSpec,
    functions: Vec<BoundWindowFunc>,
    strategy: WindowStrategy,
    output: std::vec::IntoIter<Row>,
}

impl WindowExec {
    pub(crate) fn new(
        input: Box<Operator>,
        partition_by: Vec<BoundExpr>,
        order_by: Vec<BoundSortKey>,
        frame: FrameSpec,
        functions: Vec<BoundWindowFunc>,
        strategy: WindowStrategy,
    ) -> Self {
        Self {
            input,
            partition_by,
            order_by,
            frame,
            functions,
            strategy,
            output: Vec::new().into_iter(),
        }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.input.open(outer)?;
        let rows = self.input.drain()?;
        self.input.close();
        let partitions = self.partition(rows)?;
        debug!(partitions = partitions.len(), "window input partitioned");
        let mut out = Vec::new();
        for partition in partitions {
            self.evaluate(partition, &mut out)?;
        }
        self.output = out.into_iter();
        Ok(())
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        Ok(self.output.next())
    }

    pub(crate) fn close(&mut self) {
        self.input.close();
        self.output = Vec::new().into_iter();
    }

    fn orders(&self) -> Vec<SortOrder> {
        self.order_by.iter().map(|k| k.order).collect()
    }

    /// Splits rows into partitions, each ordered by the window keys.
    fn partition(&self, rows: Vec<Row>) -> QueryResult<Vec<Vec<Slot>>> {
        let mut partitions: Vec<Vec<Slot>> = Vec::new();
        match self.strategy {
            WindowStrategy::Sort => {
                let mut current: Option<Vec<Value>> = None;
                for row in rows {
                    let pkey = eval_all(&self.partition_by, &row)?;
                    let key = self.order_key(&row)?;
                    if current.as_ref() != Some(&pkey) || partitions.is_empty() {
                        partitions.push(Vec::new());
                        current = Some(pkey);
                    }
                    if let Some(partition) = partitions.last_mut() {
                        partition.push(Slot { row, key });
                    }
                }
            }
            WindowStrategy::Hash => {
                let mut positions: HashMap<Vec<Value>, usize> = HashMap::new();
                for row in rows {
                    let pkey = eval_all(&self.partition_by, &row)?;
                    let key = self.order_key(&row)?;
                    let next = partitions.len();
                    let at = *positions.entry(pkey).or_insert(next);
                    if at == next {
                        partitions.push(Vec::new());
                    }
                    partitions[at].push(Slot { row, key });
                }
                let orders = self.orders();
                for partition in &mut partitions {
                    partition.sort_by(|a, b| compare_keys(&a.key, &b.key, &orders));
                }
            }
        }
        Ok(partitions)
    }

    fn order_key(&self, row: &Row) -> QueryResult<Vec<Value>> {
        self.order_by.iter().map(|k| eval(&k.expr, row)).collect()
    }

    fn evaluate(&self, partition: Vec<Slot>, out: &mut Vec<Row>) -> QueryResult<()> {
        let peers = peer_groups(&partition);
        let mut columns = Vec::with_capacity(self.functions.len());
        for func in &self.functions {
            columns.push(self.evaluate_function(func, &partition, &peers)?);
        }
        for (i, slot) in partition.into_iter().enumerate() {
            let id = slot.row.id();
            let mut values = slot.row.into_values();
            values.extend(columns.iter().map(|c: &Vec<Value>| c[i].clone()));
            out.push(Row::new(id, values));
        }
        Ok(())
    }

    fn evaluate_function(
        &self,
        func: &BoundWindowFunc,
        partition: &[Slot],
        peers: &[(usize, usize)],
    ) -> QueryResult<Vec<Value>> {
        let n = partition.len();
        let mut out = Vec::with_capacity(n);
        match func {
            BoundWindowFunc::RowNumber => {
                out.extend((1..=n).map(|i| Value::Integer(i as i64)));
            }
            BoundWindowFunc::Rank => {
                out.extend(peers.iter().map(|(start, _)| Value::Integer(*start as i64 + 1)));
            }
            BoundWindowFunc::DenseRank => {
                let mut rank = 0;
                let mut last = None;
                for peer in peers {
                    if last != Some(peer.0) {
                        rank += 1;
                        last = Some(peer.0);
                    }
                    out.push(Value::Integer(rank));
                }
            }
            BoundWindowFunc::Lag {
                expr,
                offset,
                default,
            } => {
                for i in 0..n {
                    out.push(match i.checked_sub(*offset) {
                        Some(j) => eval(expr, &partition[j].row)?,
                        None => default.clone(),
                    });
                }
            }
            BoundWindowFunc::Lead {
                expr,
                offset,
                default,
            } => {
                for i in 0..n {
                    out.push(match partition.get(i + offset) {
                        Some(slot) => eval(expr, &slot.row)?,
                        None => default.clone(),
                    });
                }
            }
            BoundWindowFunc::Aggregate { func: agg, arg } => {
                let inputs = partition
                    .iter()
                    .map(|slot| arg.as_ref().map(|a| eval(a, &slot.row)).transpose())
                    .collect::<QueryResult<Vec<Option<Value>>>>()?;
                let result_type = func.data_type();
                let running = self.frame.start == FrameBound::UnboundedPreceding;
                let mut acc = Accumulator::new(*agg, false, result_type);
                let mut fed = 0;
                for i in 0..n {
                    let (start, end) = self.frame_bounds(i, partition, peers)?;
                    // running frames only grow, except around NULL keys
                    if running && end >= fed {
                        while fed < end {
                            acc.update(inputs[fed].clone())?;
                            fed += 1;
                        }
                        out.push(acc.finish());
                    } else {
                        let mut frame = Accumulator::new(*agg, false, result_type);
                        for input in inputs.iter().take(end).skip(start) {
                            frame.update(input.clone())?;
                        }
                        out.push(frame.finish());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Half-open frame `[start, end)` of row `i`, clamped to the partition.
    fn frame_bounds(
        &self,
        i: usize,
        partition: &[Slot],
        peers: &[(usize, usize)],
    ) -> QueryResult<(usize, usize)> {
        let n = partition.len();
        let (start, end) = match self.frame.units {
            FrameUnits::Rows => {
                let start = rows_position(self.frame.start, i, n).max(0);
                let end = (rows_position(self.frame.end, i, n) + 1).max(0);
                (start as usize, end as usize)
            }
            FrameUnits::Range => {
                let start = match self.frame.start {
                    FrameBound::UnboundedPreceding => 0,
                    FrameBound::CurrentRow => peers[i].0,
                    FrameBound::UnboundedFollowing => n,
                    bound => self.range_start(bound, i, partition, peers)?,
                };
                let end = match self.frame.end {
                    FrameBound::UnboundedPreceding => 0,
                    FrameBound::CurrentRow => peers[i].1,
                    FrameBound::UnboundedFollowing => n,
                    bound => self.range_end(bound, i, partition, peers)?,
                };
                (start, end)
            }
        };
        let end = end.min(n);
        Ok((start.min(end), end))
    }

    /// Position of the row's key along the ordering, negated when descending
    /// so that "preceding" always means smaller.
    fn range_position(&self, slot: &Slot) -> QueryResult<Option<f64>> {
        let Some(value) = slot.key.first() else {
            return Err(QueryError::execution(
                "RANGE frame with an offset needs an ORDER BY key",
            ));
        };
        let position = match value {
            Value::Null => return Ok(None),
            Value::Timestamp(t) => *t as f64,
            other => other.to_f64().ok_or_else(|| {
                QueryError::type_mismatch(format!("RANGE offset over non-numeric key {}", other))
            })?,
        };
        Ok(Some(match self.order_by.first().map(|k| k.order) {
            Some(SortOrder::Desc) => -position,
            _ => position,
        }))
    }

    fn range_start(
        &self,
        bound: FrameBound,
        i: usize,
        partition: &[Slot],
        peers: &[(usize, usize)],
    ) -> QueryResult<usize> {
        let Some(here) = self.range_position(&partition[i])? else {
            return Ok(peers[i].0);
        };
        let target = offset_target(bound, here);
        for (j, slot) in partition.iter().enumerate() {
            if let Some(p) = self.range_position(slot)? {
                if p >= target {
                    return Ok(j);
                }
            }
        }
        Ok(partition.len())
    }

    fn range_end(
        &self,
        bound: FrameBound,
        i: usize,
        partition: &[Slot],
        peers: &[(usize, usize)],
    ) -> QueryResult<usize> {
        let Some(here) = self.range_position(&partition[i])? else {
            return Ok(peers[i].1);
        };
        let target = offset_target(bound, here);
        let mut end = 0;
        for (j, slot) in partition.iter().enumerate() {
            if let Some(p) = self.range_position(slot)? {
                if p <= target {
                    end = j + 1;
                }
            }
        }
        Ok(end)
    }
}

fn offset_target(bound: FrameBound, here: f64) -> f64 {
    match bound {
        FrameBound::Preceding(n) => here - n,
        FrameBound::Following(n) => here + n,
        _ => here,
    }
}

/// Row position a ROWS bound lands on; may fall outside the partition.
fn rows_position(bound: FrameBound, i: usize, n: usize) -> i64 {
    let i = i as i64;
    match bound {
        FrameBound::UnboundedPreceding => -1,
        FrameBound::Preceding(k) => i - k as i64,
        FrameBound::CurrentRow => i,
        FrameBound::Following(k) => i + k as i64,
        FrameBound::UnboundedFollowing => n as i64,
    }
}

/// For every row the half-open range of its peers: rows with an equal order
/// key. Without ORDER BY the whole partition is one peer group.
fn peer_groups(partition: &[Slot]) -> Vec<(usize, usize)> {
    let mut out = vec![(0, 0); partition.len()];
    let mut start = 0;
    while start < partition.len() {
        let mut end = start + 1;
        while end < partition.len() && partition[start].key == partition[end].key {
            end += 1;
        }
        for slot in out.iter_mut().take(end).skip(start) {
            *slot = (start, end);
        }
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AggregateFunc;
    use crate::executor::node::test_support::{ints, run};
    use crate::executor::node::ExecNode;
    use tern_core::DataType;

    fn col(index: usize) -> BoundExpr {
        BoundExpr::Column {
            index,
            name: format!("c{}", index),
            data_type: Some(DataType::Integer),
        }
    }

    fn key(index: usize, order: SortOrder) -> BoundSortKey {
        BoundSortKey {
            expr: col(index),
            order,
        }
    }

    fn sum(index: usize) -> BoundWindowFunc {
        BoundWindowFunc::Aggregate {
            func: AggregateFunc::Sum,
            arg: Some(col(index)),
        }
    }

    fn window(
        input: Box<Operator>,
        partition_by: Vec<BoundExpr>,
        order_by: Vec<BoundSortKey>,
        frame: FrameSpec,
        functions: Vec<BoundWindowFunc>,
    ) -> Vec<Vec<Value>> {
        let exec = WindowExec::new(
            input,
            partition_by,
            order_by,
            frame,
            functions,
            WindowStrategy::Hash,
        );
        run(&mut Operator::new(0, "WindowExec", None, ExecNode::Window(exec)))
    }

    fn int_column(rows: &[Vec<Value>], index: usize) -> Vec<Value> {
        rows.iter().map(|r| r[index].clone()).collect()
    }

    fn i(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Integer(*v)).collect()
    }

    #[test]
    fn test_ranking_and_running_sum() {
        let input = ints(&[&[1, 100], &[2, 50], &[1, 200], &[1, 100], &[2, 70]]);
        let rows = window(
            input,
            vec![col(0)],
            vec![key(1, SortOrder::Asc)],
            FrameSpec::default_for(true),
            vec![
                BoundWindowFunc::RowNumber,
                BoundWindowFunc::Rank,
                BoundWindowFunc::DenseRank,
                sum(1),
            ],
        );
        assert_eq!(int_column(&rows, 0), i(&[1, 1, 1, 2, 2]));
        assert_eq!(int_column(&rows, 1), i(&[100, 100, 200, 50, 70]));
        assert_eq!(int_column(&rows, 2), i(&[1, 2, 3, 1, 2]));
        assert_eq!(int_column(&rows, 3), i(&[1, 1, 3, 1, 2]));
        assert_eq!(int_column(&rows, 4), i(&[1, 1, 2, 1, 2]));
        // peers share the default RANGE frame
        assert_eq!(int_column(&rows, 5), i(&[200, 200, 400, 50, 120]));
    }

    #[test]
    fn test_rows_frames() {
        let input = || ints(&[&[3], &[1], &[4], &[2]]);
        let moving = window(
            input(),
            Vec::new(),
            vec![key(0, SortOrder::Asc)],
            FrameSpec::rows(FrameBound::Preceding(1.0), FrameBound::Following(1.0)),
            vec![sum(0)],
        );
        assert_eq!(int_column(&moving, 1), i(&[3, 6, 9, 7]));

        let lagging = window(
            input(),
            Vec::new(),
            vec![key(0, SortOrder::Asc)],
            FrameSpec::rows(FrameBound::Preceding(2.0), FrameBound::Preceding(1.0)),
            vec![sum(0)],
        );
        assert_eq!(
            int_column(&lagging, 1),
            vec![Value::Null, Value::Integer(1), Value::Integer(3), Value::Integer(5)]
        );
    }

    #[test]
    fn test_lag_lead_defaults() {
        let rows = window(
            ints(&[&[1], &[2], &[3], &[4]]),
            Vec::new(),
            vec![key(0, SortOrder::Asc)],
            FrameSpec::default_for(true),
            vec![
                BoundWindowFunc::Lag {
                    expr: col(0),
                    offset: 1,
                    default: Value::Integer(0),
                },
                BoundWindowFunc::Lead {
                    expr: col(0),
                    offset: 2,
                    default: Value::Null,
                },
            ],
        );
        assert_eq!(int_column(&rows, 1), i(&[0, 1, 2, 3]));
        assert_eq!(
            int_column(&rows, 2),
            vec![Value::Integer(3), Value::Integer(4), Value::Null, Value::Null]
        );
    }

    #[test]
    fn test_range_offset_descending() {
        let rows = window(
            ints(&[&[1], &[2], &[4], &[7]]),
            Vec::new(),
            vec![key(0, SortOrder::Desc)],
            FrameSpec::range(FrameBound::Preceding(2.0), FrameBound::CurrentRow),
            vec![sum(0)],
        );
        assert_eq!(int_column(&rows, 0), i(&[7, 4, 2, 1]));
        assert_eq!(int_column(&rows, 1), i(&[7, 4, 6, 3]));
    }
}
