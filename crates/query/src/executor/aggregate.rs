//! Aggregation operators.
//!
//! `HashAggregateExec` buffers its whole input into groups keyed by the
//! grouping values; `GroupAggregateExec` relies on input already grouped and
//! emits each group as soon as its key changes. Both apply HAVING to the
//! finished output row. Without grouping keys exactly one row comes out, even
//! for empty input.

use hashbrown::{HashMap, HashSet};
use tern_core::{DataType, Row, Value};
use tracing::debug;

use super::eval::{eval, eval_all, passes};
use super::node::Operator;
use crate::ast::AggregateFunc;
use crate::error::{QueryError, QueryResult};
use crate::planner::{BoundAggregate, BoundExpr};

/// Running state of one aggregate function.
#[derive(Clone, Debug)]
pub(crate) struct Accumulator {
    func: AggregateFunc,
    integer_result: bool,
    seen: Option<HashSet<Value>>,
    count: i64,
    int_sum: i64,
    float_sum: f64,
    extreme: Option<Value>,
}

impl Accumulator {
    pub(crate) fn new(func: AggregateFunc, distinct: bool, result: Option<DataType>) -> Self {
        Self {
            func,
            integer_result: result == Some(DataType::Integer),
            seen: distinct.then(HashSet::new),
            count: 0,
            int_sum: 0,
            float_sum: 0.0,
            extreme: None,
        }
    }

    /// Adds one input. `None` is the row itself for `COUNT(*)`.
    pub(crate) fn update(&mut self, value: Option<Value>) -> QueryResult<()> {
        let Some(value) = value else {
            self.count += 1;
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        if let Some(seen) = &mut self.seen {
            if !seen.insert(value.clone()) {
                return Ok(());
            }
        }
        self.count += 1;
        match self.func {
            AggregateFunc::Count => {}
            AggregateFunc::Sum | AggregateFunc::Avg => match value {
                Value::Integer(i) => {
                    self.int_sum = self.int_sum.checked_add(i).ok_or_else(|| {
                        QueryError::execution(format!("integer overflow in {}", self.func.name()))
                    })?;
                }
                other => {
                    self.float_sum += other.to_f64().ok_or_else(|| {
                        QueryError::execution(format!(
                            "{} expects numbers, got {}",
                            self.func.name(),
                            other
                        ))
                    })?;
                }
            },
            AggregateFunc::Min => {
                if self.extreme.as_ref().map_or(true, |m| value < *m) {
                    self.extreme = Some(value);
                }
            }
            AggregateFunc::Max => {
                if self.extreme.as_ref().map_or(true, |m| value > *m) {
                    self.extreme = Some(value);
                }
            }
        }
        Ok(())
    }

    /// Final value. Empty input gives 0 for COUNT and NULL otherwise.
    pub(crate) fn finish(&self) -> Value {
        match self.func {
            AggregateFunc::Count => Value::Integer(self.count),
            _ if self.count == 0 => Value::Null,
            AggregateFunc::Sum if self.integer_result => Value::Integer(self.int_sum),
            AggregateFunc::Sum => Value::Decimal(self.int_sum as f64 + self.float_sum),
            AggregateFunc::Avg => {
                Value::Decimal((self.int_sum as f64 + self.float_sum) / self.count as f64)
            }
            AggregateFunc::Min | AggregateFunc::Max => {
                self.extreme.clone().unwrap_or(Value::Null)
            }
        }
    }
}

fn accumulators(aggregates: &[BoundAggregate]) -> Vec<Accumulator> {
    aggregates
        .iter()
        .map(|a| Accumulator::new(a.func, a.distinct, a.data_type))
        .collect()
}

fn update_all(aggregates: &[BoundAggregate], accs: &mut [Accumulator], row: &Row) -> QueryResult<()> {
    for (agg, acc) in aggregates.iter().zip(accs.iter_mut()) {
        if !passes(agg.filter.as_ref(), row)? {
            continue;
        }
        let value = match &agg.arg {
            Some(arg) => Some(eval(arg, row)?),
            None => None,
        };
        acc.update(value)?;
    }
    Ok(())
}

fn output_row(key: Vec<Value>, accs: &[Accumulator]) -> Row {
    let mut values = key;
    values.extend(accs.iter().map(Accumulator::finish));
    Row::dummy(values)
}

/// Groups by hashing; groups come out in first-seen order.
pub(crate) struct HashAggregateExec {
    input: Box<Operator>,
    group_by: Vec<BoundExpr>,
    aggregates: Vec<BoundAggregate>,
    having: Option<BoundExpr>,
    output: std::vec::IntoIter<Row>,
}

impl HashAggregateExec {
    pub(crate) fn new(
        input: Box<Operator>,
        group_by: Vec<BoundExpr>,
        aggregates: Vec<BoundAggregate>,
        having: Option<BoundExpr>,
    ) -> Self {
        Self {
            input,
            group_by,
            aggregates,
            having,
            output: Vec::new().into_iter(),
        }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Value>, Vec<Accumulator>)> = Vec::new();
        if self.group_by.is_empty() {
            groups.push((Vec::new(), accumulators(&self.aggregates)));
            index.insert(Vec::new(), 0);
        }

        self.input.open(outer)?;
        let mut rows = 0usize;
        while let Some(row) = self.input.next()? {
            rows += 1;
            let key = eval_all(&self.group_by, &row)?;
            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    groups.push((key.clone(), accumulators(&self.aggregates)));
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            update_all(&self.aggregates, &mut groups[slot].1, &row)?;
        }
        self.input.close();
        debug!(rows, groups = groups.len(), "hash aggregate input buffered");

        let mut output = Vec::with_capacity(groups.len());
        for (key, accs) in groups {
            let row = output_row(key, &accs);
            if passes(self.having.as_ref(), &row)? {
                output.push(row);
            }
        }
        self.output = output.into_iter();
        Ok(())
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        Ok(self.output.next())
    }

    pub(crate) fn close(&mut self) {
        self.input.close();
        self.output = Vec::new().into_iter();
    }
}

/// Streams over input sorted (or otherwise grouped) on the grouping keys.
pub(crate) struct GroupAggregateExec {
    input: Box<Operator>,
    group_by: Vec<BoundExpr>,
    aggregates: Vec<BoundAggregate>,
    having: Option<BoundExpr>,
    current: Option<(Vec<Value>, Vec<Accumulator>)>,
    emitted_any: bool,
    done: bool,
}

impl GroupAggregateExec {
    pub(crate) fn new(
        input: Box<Operator>,
        group_by: Vec<BoundExpr>,
        aggregates: Vec<BoundAggregate>,
        having: Option<BoundExpr>,
    ) -> Self {
        Self {
            input,
            group_by,
            aggregates,
            having,
            current: None,
            emitted_any: false,
            done: false,
        }
    }

    pub(crate) fn open(&mut self, outer: Option<&Row>) -> QueryResult<()> {
        self.current = None;
        self.emitted_any = false;
        self.done = false;
        self.input.open(outer)
    }

    pub(crate) fn next(&mut self) -> QueryResult<Option<Row>> {
        while !self.done {
            let finished = match self.input.next()? {
                Some(row) => {
                    let key = eval_all(&self.group_by, &row)?;
                    let boundary =
                        matches!(&self.current, Some((current, _)) if *current != key);
                    let finished = if boundary { self.current.take() } else { None };
                    let (_, accs) = self
                        .current
                        .get_or_insert_with(|| (key, accumulators(&self.aggregates)));
                    update_all(&self.aggregates, accs, &row)?;
                    finished
                }
                None => {
                    self.done = true;
                    self.input.close();
                    match self.current.take() {
                        Some(group) => Some(group),
                        // a global aggregate still produces one row
                        None if self.group_by.is_empty() && !self.emitted_any => {
                            Some((Vec::new(), accumulators(&self.aggregates)))
                        }
                        None => None,
                    }
                }
            };
            if let Some((key, accs)) = finished {
                self.emitted_any = true;
                let row = output_row(key, &accs);
                if passes(self.having.as_ref(), &row)? {
                    return Ok(Some(row));
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn close(&mut self) {
        self.input.close();
        self.current = None;
    }
}
