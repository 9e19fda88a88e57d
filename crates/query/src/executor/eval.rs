//! Expression evaluation.
//!
//! SQL three-valued logic: comparisons involving NULL yield NULL, `AND`/`OR`
//! follow the Kleene truth tables and a predicate only passes a row when it
//! evaluates to TRUE. Integer overflow and division by zero are execution
//! errors.

use core::cmp::Ordering;

use tern_core::pattern_match::like;
use tern_core::{Row, Value};

use crate::ast::{BinaryOp, ScalarFunc, UnaryOp};
use crate::error::{QueryError, QueryResult};
use crate::planner::BoundExpr;

/// Evaluates `expr` against `row`.
pub fn eval(expr: &BoundExpr, row: &Row) -> QueryResult<Value> {
    match expr {
        BoundExpr::Column { index, name, .. } => row.get(*index).cloned().ok_or_else(|| {
            QueryError::execution(format!(
                "column {} (#{}) is outside a row of width {}",
                name,
                index,
                row.len()
            ))
        }),
        BoundExpr::Literal(v) => Ok(v.clone()),
        BoundExpr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let l = truth(&eval(left, row)?)?;
                if l == Some(false) {
                    return Ok(Value::Boolean(false));
                }
                let r = truth(&eval(right, row)?)?;
                Ok(match (l, r) {
                    (_, Some(false)) => Value::Boolean(false),
                    (Some(true), Some(true)) => Value::Boolean(true),
                    _ => Value::Null,
                })
            }
            BinaryOp::Or => {
                let l = truth(&eval(left, row)?)?;
                if l == Some(true) {
                    return Ok(Value::Boolean(true));
                }
                let r = truth(&eval(right, row)?)?;
                Ok(match (l, r) {
                    (_, Some(true)) => Value::Boolean(true),
                    (Some(false), Some(false)) => Value::Boolean(false),
                    _ => Value::Null,
                })
            }
            op => {
                let l = eval(left, row)?;
                let r = eval(right, row)?;
                binary(*op, &l, &r)
            }
        },
        BoundExpr::Unary { op, expr } => {
            let v = eval(expr, row)?;
            match op {
                UnaryOp::IsNull => Ok(Value::Boolean(v.is_null())),
                UnaryOp::IsNotNull => Ok(Value::Boolean(!v.is_null())),
                UnaryOp::Not => Ok(match truth(&v)? {
                    Some(b) => Value::Boolean(!b),
                    None => Value::Null,
                }),
                UnaryOp::Neg => match v {
                    Value::Null => Ok(Value::Null),
                    Value::Integer(i) => i
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or_else(|| overflow("-", &Value::Integer(i), &Value::Null)),
                    Value::Decimal(f) => Ok(Value::Decimal(-f)),
                    other => Err(QueryError::execution(format!("cannot negate {}", other))),
                },
            }
        }
        BoundExpr::Function { func, args } => function(*func, args, row),
        BoundExpr::Case {
            branches,
            otherwise,
        } => {
            for (when, then) in branches {
                if truth(&eval(when, row)?)? == Some(true) {
                    return eval(then, row);
                }
            }
            match otherwise {
                Some(e) => eval(e, row),
                None => Ok(Value::Null),
            }
        }
        BoundExpr::InList {
            expr,
            list,
            negated,
        } => {
            let v = eval(expr, row)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            let mut found = false;
            for item in list {
                let item = eval(item, row)?;
                if item.is_null() {
                    saw_null = true;
                } else if v == item {
                    found = true;
                    break;
                }
            }
            Ok(match (found, saw_null) {
                (true, _) => Value::Boolean(!negated),
                (false, true) => Value::Null,
                (false, false) => Value::Boolean(*negated),
            })
        }
        BoundExpr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let v = eval(expr, row)?;
            let lo = binary(BinaryOp::Ge, &v, &eval(low, row)?)?;
            let hi = binary(BinaryOp::Le, &v, &eval(high, row)?)?;
            let within = match (truth(&lo)?, truth(&hi)?) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
            Ok(match within {
                Some(b) => Value::Boolean(b != *negated),
                None => Value::Null,
            })
        }
        BoundExpr::Subquery { .. } => Err(QueryError::execution(
            "scalar subquery reached evaluation without being computed",
        )),
    }
}

/// Evaluates a predicate: only TRUE passes, NULL and FALSE reject the row.
pub fn eval_predicate(expr: &BoundExpr, row: &Row) -> QueryResult<bool> {
    Ok(truth(&eval(expr, row)?)? == Some(true))
}

/// Evaluates an optional predicate; an absent predicate passes every row.
pub(crate) fn passes(expr: Option<&BoundExpr>, row: &Row) -> QueryResult<bool> {
    match expr {
        Some(e) => eval_predicate(e, row),
        None => Ok(true),
    }
}

/// Evaluates a list of expressions into a key.
pub(crate) fn eval_all(exprs: &[BoundExpr], row: &Row) -> QueryResult<Vec<Value>> {
    exprs.iter().map(|e| eval(e, row)).collect()
}

fn truth(v: &Value) -> QueryResult<Option<bool>> {
    match v {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(*b)),
        other => Err(QueryError::execution(format!(
            "expected a boolean, got {}",
            other
        ))),
    }
}

fn overflow(op: &str, l: &Value, r: &Value) -> QueryError {
    QueryError::execution(format!("integer overflow in {} {} {}", l, op, r))
}

fn division_by_zero() -> QueryError {
    QueryError::execution("division by zero")
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> QueryResult<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    if op.is_comparison() {
        let ord = l.cmp(r);
        let b = match op {
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::Ne => ord != Ordering::Equal,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::Le => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        };
        return Ok(Value::Boolean(b));
    }
    if op == BinaryOp::Like {
        return match (l.as_str(), r.as_str()) {
            (Some(s), Some(p)) => Ok(Value::Boolean(like(s, p))),
            _ => Err(QueryError::execution(format!(
                "LIKE expects text, got {} and {}",
                l, r
            ))),
        };
    }
    arithmetic(op, l, r)
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> QueryResult<Value> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => {
            integer_op(op, *a, *b, l, r).map(Value::Integer)
        }
        (Value::Timestamp(a), Value::Integer(b)) if matches!(op, BinaryOp::Add | BinaryOp::Sub) => {
            integer_op(op, *a, *b, l, r).map(Value::Timestamp)
        }
        (Value::Integer(a), Value::Timestamp(b)) if op == BinaryOp::Add => {
            integer_op(op, *a, *b, l, r).map(Value::Timestamp)
        }
        (Value::Timestamp(a), Value::Timestamp(b)) if op == BinaryOp::Sub => {
            integer_op(op, *a, *b, l, r).map(Value::Integer)
        }
        _ => {
            let (Some(a), Some(b)) = (l.to_f64(), r.to_f64()) else {
                return Err(QueryError::execution(format!(
                    "cannot apply {} to {} and {}",
                    op.symbol(),
                    l,
                    r
                )));
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div if b == 0.0 => return Err(division_by_zero()),
                BinaryOp::Div => a / b,
                BinaryOp::Mod if b == 0.0 => return Err(division_by_zero()),
                BinaryOp::Mod => a % b,
                _ => {
                    return Err(QueryError::execution(format!(
                        "{} is not arithmetic",
                        op.symbol()
                    )))
                }
            };
            if result.is_finite() {
                Ok(Value::Decimal(result))
            } else {
                Err(QueryError::execution(format!(
                    "numeric overflow in {} {} {}",
                    l,
                    op.symbol(),
                    r
                )))
            }
        }
    }
}

fn integer_op(op: BinaryOp, a: i64, b: i64, l: &Value, r: &Value) -> QueryResult<i64> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div if b == 0 => return Err(division_by_zero()),
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Mod if b == 0 => return Err(division_by_zero()),
        BinaryOp::Mod => a.checked_rem(b),
        _ => {
            return Err(QueryError::execution(format!(
                "{} is not arithmetic",
                op.symbol()
            )))
        }
    };
    result.ok_or_else(|| overflow(op.symbol(), l, r))
}

fn function(func: ScalarFunc, args: &[BoundExpr], row: &Row) -> QueryResult<Value> {
    if func == ScalarFunc::Coalesce {
        for a in args {
            let v = eval(a, row)?;
            if !v.is_null() {
                return Ok(v);
            }
        }
        return Ok(Value::Null);
    }
    let values = eval_all(args, row)?;
    let Some(first) = values.first() else {
        return Err(QueryError::execution(format!(
            "{} called without arguments",
            func.name()
        )));
    };
    if first.is_null() {
        return Ok(Value::Null);
    }
    match func {
        ScalarFunc::Lower | ScalarFunc::Upper | ScalarFunc::Length => {
            let s = first.as_str().ok_or_else(|| {
                QueryError::execution(format!("{} expects text, got {}", func.name(), first))
            })?;
            Ok(match func {
                ScalarFunc::Lower => Value::Text(s.to_lowercase()),
                ScalarFunc::Upper => Value::Text(s.to_uppercase()),
                _ => Value::Integer(s.chars().count() as i64),
            })
        }
        ScalarFunc::Abs => match first {
            Value::Integer(i) => i
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| overflow("abs", first, &Value::Null)),
            Value::Decimal(f) => Ok(Value::Decimal(f.abs())),
            other => Err(QueryError::execution(format!("abs expects a number, got {}", other))),
        },
        ScalarFunc::Round => {
            let digits = match values.get(1) {
                Some(Value::Null) => return Ok(Value::Null),
                Some(d) => d.as_i64().unwrap_or(0),
                None => 0,
            };
            match first {
                Value::Integer(i) if digits >= 0 => Ok(Value::Integer(*i)),
                other => {
                    let f = other.to_f64().ok_or_else(|| {
                        QueryError::execution(format!("round expects a number, got {}", other))
                    })?;
                    let scale = 10f64.powi(digits.clamp(-18, 18) as i32);
                    let rounded = (f * scale).round() / scale;
                    Ok(match other {
                        Value::Integer(_) => Value::Integer(rounded as i64),
                        _ => Value::Decimal(rounded),
                    })
                }
            }
        }
        ScalarFunc::Coalesce => Ok(first.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: Value) -> BoundExpr {
        BoundExpr::Literal(v)
    }

    fn bin(op: BinaryOp, l: BoundExpr, r: BoundExpr) -> BoundExpr {
        BoundExpr::Binary {
            op,
            left: Box::new(l),
            right: Box::new(r),
        }
    }

    fn empty() -> Row {
        Row::dummy(Vec::new())
    }

    #[test]
    fn test_three_valued_logic() {
        let null = || lit(Value::Null);
        let t = || lit(Value::Boolean(true));
        let f = || lit(Value::Boolean(false));
        let row = empty();

        assert_eq!(eval(&bin(BinaryOp::And, null(), f()), &row).unwrap(), Value::Boolean(false));
        assert_eq!(eval(&bin(BinaryOp::And, null(), t()), &row).unwrap(), Value::Null);
        assert_eq!(eval(&bin(BinaryOp::Or, null(), t()), &row).unwrap(), Value::Boolean(true));
        assert_eq!(eval(&bin(BinaryOp::Or, null(), f()), &row).unwrap(), Value::Null);

        let cmp = bin(BinaryOp::Eq, null(), lit(Value::Integer(1)));
        assert_eq!(eval(&cmp, &row).unwrap(), Value::Null);
        assert!(!eval_predicate(&cmp, &row).unwrap());
    }

    #[test]
    fn test_in_list_with_nulls() {
        let row = empty();
        let expr = |negated| BoundExpr::InList {
            expr: Box::new(lit(Value::Integer(3))),
            list: vec![lit(Value::Integer(1)), lit(Value::Null)],
            negated,
        };
        assert_eq!(eval(&expr(false), &row).unwrap(), Value::Null);
        assert_eq!(eval(&expr(true), &row).unwrap(), Value::Null);
    }

    #[test]
    fn test_arithmetic_errors() {
        let row = empty();
        let div = bin(BinaryOp::Div, lit(Value::Integer(1)), lit(Value::Integer(0)));
        assert!(matches!(eval(&div, &row), Err(QueryError::Execution(_))));

        let add = bin(
            BinaryOp::Add,
            lit(Value::Integer(i64::MAX)),
            lit(Value::Integer(1)),
        );
        assert!(matches!(eval(&add, &row), Err(QueryError::Execution(_))));

        let mixed = bin(BinaryOp::Mul, lit(Value::Integer(2)), lit(Value::Decimal(1.5)));
        assert_eq!(eval(&mixed, &row).unwrap(), Value::Decimal(3.0));
    }

    #[test]
    fn test_functions() {
        let row = Row::dummy(vec![Value::Text("Mouse".into()), Value::Null]);
        let column = |i| BoundExpr::Column {
            index: i,
            name: format!("c{}", i),
            data_type: None,
        };
        let upper = BoundExpr::Function {
            func: ScalarFunc::Upper,
            args: vec![column(0)],
        };
        assert_eq!(eval(&upper, &row).unwrap(), Value::Text("MOUSE".into()));

        let coalesce = BoundExpr::Function {
            func: ScalarFunc::Coalesce,
            args: vec![column(1), lit(Value::Integer(0))],
        };
        assert_eq!(eval(&coalesce, &row).unwrap(), Value::Integer(0));

        let round = BoundExpr::Function {
            func: ScalarFunc::Round,
            args: vec![lit(Value::Decimal(49.987)), lit(Value::Integer(2))],
        };
        assert_eq!(eval(&round, &row).unwrap(), Value::Decimal(49.99));
    }

    #[test]
    fn test_like_and_between() {
        let row = empty();
        let like_expr = bin(
            BinaryOp::Like,
            lit(Value::Text("Wireless Mouse".into())),
            lit(Value::Text("%Mouse".into())),
        );
        assert!(eval_predicate(&like_expr, &row).unwrap());

        let between = BoundExpr::Between {
            expr: Box::new(lit(Value::Decimal(49.99))),
            low: Box::new(lit(Value::Integer(10))),
            high: Box::new(lit(Value::Integer(50))),
            negated: false,
        };
        assert!(eval_predicate(&between, &row).unwrap());
    }
}
