//! Access path selection for base table scans.
//!
//! Every scan considers a sequential scan and one candidate per index of the
//! table, visited in index-name order. A candidate replaces the current best
//! only when strictly cheaper, so ties keep the sequential scan or the
//! alphabetically first index.
//!
//! Conjuncts are bound over the scan's full-width schema, so a column index in
//! a conjunct is the table column position.
//!
//! Ordered indexes are matched on equalities over a leading run of key
//! columns followed by at most one range column. An IN list over the first
//! key column becomes a set of point lookups. Hash indexes need an equality
//! on every key column, or an IN list over a single-column key. A predicate
//! compared with a null literal never matches: it is false for every row and
//! stays as a residual filter.

use std::collections::BTreeSet;

use tern_core::schema::{IndexDef, Table};
use tern_core::Value;
use tern_index::KeyRange;
use tern_storage::IndexKey;
use tracing::trace;

use crate::ast::{BinaryOp, SortOrder};
use crate::planner::cost::like_prefix_range;
use crate::planner::{BoundExpr, CostModel, Estimate, IndexAccess, IndexScanNode, PhysicalNode, Schema};

/// The chosen way of reading one base table.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessPath {
    pub node: PhysicalNode,
    pub estimate: Estimate,
    /// Output ordering provided by the access path.
    pub ordering: Vec<(usize, SortOrder)>,
}

/// Index key match found for one index.
struct IndexMatch {
    access: IndexAccess,
    /// Conjuncts answered exactly by the index.
    consumed: Vec<usize>,
    /// Conjuncts that narrow the index range but must still be rechecked.
    narrowing: Vec<usize>,
    lookups: f64,
}

/// Picks the cheapest access path for a scan of `table`.
///
/// `required` lists the table columns the query reads outside the scan's
/// own filter; None means every column.
pub fn choose_access_path(
    cost: &CostModel<'_>,
    table: &Table,
    alias: Option<&str>,
    schema: &Schema,
    conjuncts: Vec<BoundExpr>,
    required: Option<&BTreeSet<usize>>,
) -> AccessPath {
    let table_rows = cost.table_rows(table.name());
    let out_rows = match BoundExpr::conjunction(conjuncts.clone()) {
        Some(p) => cost.estimate_cardinality(&p, schema, table_rows),
        None => table_rows,
    };

    let mut best = AccessPath {
        node: PhysicalNode::SeqScan {
            table: table.name().to_string(),
            alias: alias.map(str::to_string),
            filter: BoundExpr::conjunction(conjuncts.clone()),
        },
        estimate: cost.seq_scan(table_rows, out_rows, conjuncts.len()),
        ordering: Vec::new(),
    };
    trace!(
        table = table.name(),
        cost = best.estimate.total_cost,
        "seq scan candidate"
    );

    let mut indices: Vec<&IndexDef> = table.indices().iter().collect();
    indices.sort_by(|a, b| a.name().cmp(b.name()));

    for def in indices {
        let Some(key_columns) = key_columns(table, def) else {
            continue;
        };
        let found = if def.get_index_type().supports_range() {
            match_ordered(&key_columns, &conjuncts)
        } else {
            match_hash(&key_columns, &conjuncts)
        };
        let Some(found) = found else {
            continue;
        };

        let residual: Vec<BoundExpr> = conjuncts
            .iter()
            .enumerate()
            .filter(|(i, _)| !found.consumed.contains(i))
            .map(|(_, c)| c.clone())
            .collect();
        let access_terms: Vec<BoundExpr> = found
            .consumed
            .iter()
            .chain(&found.narrowing)
            .map(|&i| conjuncts[i].clone())
            .collect();
        let fetched = match BoundExpr::conjunction(access_terms) {
            Some(p) => cost.estimate_cardinality(&p, schema, table_rows),
            None => table_rows,
        };

        let covered = |c: &usize| key_columns.contains(c);
        let residual_covered = residual.iter().all(|r| r.columns().iter().all(covered));
        let index_only = residual_covered
            && match required {
                Some(cols) => cols.iter().all(covered),
                None => false,
            };

        let estimate = cost.index_scan(found.lookups, fetched, out_rows, residual.len(), index_only);
        trace!(
            table = table.name(),
            index = def.name(),
            index_only,
            cost = estimate.total_cost,
            "index candidate"
        );
        if estimate.total_cost < best.estimate.total_cost {
            let ordering = if def.get_index_type().supports_range() {
                key_columns.iter().map(|&c| (c, SortOrder::Asc)).collect()
            } else {
                Vec::new()
            };
            let scan = IndexScanNode {
                table: table.name().to_string(),
                alias: alias.map(str::to_string),
                index: def.name().to_string(),
                key_columns: key_columns.clone(),
                access: found.access,
                filter: BoundExpr::conjunction(residual),
            };
            best = AccessPath {
                node: if index_only {
                    PhysicalNode::IndexOnlyScan(scan)
                } else {
                    PhysicalNode::IndexScan(scan)
                },
                estimate,
                ordering,
            };
        }
    }
    best
}

fn key_columns(table: &Table, def: &IndexDef) -> Option<Vec<usize>> {
    def.columns()
        .iter()
        .map(|c| table.get_column_index(c))
        .collect()
}

/// `column op literal`, normalized so the column is on the left.
fn column_comparison(expr: &BoundExpr) -> Option<(usize, BinaryOp, &Value)> {
    match expr {
        BoundExpr::Binary { op, left, right } if op.is_comparison() => {
            match (left.column_index(), right.literal(), right.column_index(), left.literal()) {
                (Some(c), Some(v), _, _) => Some((c, *op, v)),
                (_, _, Some(c), Some(v)) => Some((c, op.flip(), v)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn equality_on(conjuncts: &[BoundExpr], column: usize, taken: &[usize]) -> Option<(usize, Value)> {
    conjuncts.iter().enumerate().find_map(|(i, c)| {
        if taken.contains(&i) {
            return None;
        }
        match column_comparison(c) {
            Some((col, BinaryOp::Eq, v)) if col == column && !v.is_null() => Some((i, v.clone())),
            _ => None,
        }
    })
}

fn in_list_on(conjuncts: &[BoundExpr], column: usize) -> Option<(usize, Vec<Value>)> {
    conjuncts.iter().enumerate().find_map(|(i, c)| match c {
        BoundExpr::InList {
            expr,
            list,
            negated: false,
        } if expr.column_index() == Some(column) => {
            let mut values = Vec::with_capacity(list.len());
            for item in list {
                match item.literal() {
                    Some(v) if !v.is_null() => values.push(v.clone()),
                    Some(_) => {}
                    None => return None,
                }
            }
            Some((i, values))
        }
        _ => None,
    })
}

fn points(values: Vec<Value>) -> IndexAccess {
    let mut keys: Vec<IndexKey> = values.into_iter().map(|v| vec![v]).collect();
    keys.sort();
    keys.dedup();
    IndexAccess::Points(keys)
}

fn match_hash(key_columns: &[usize], conjuncts: &[BoundExpr]) -> Option<IndexMatch> {
    let mut consumed = Vec::new();
    let mut key = Vec::with_capacity(key_columns.len());
    for &column in key_columns {
        match equality_on(conjuncts, column, &consumed) {
            Some((i, v)) => {
                consumed.push(i);
                key.push(v);
            }
            None => break,
        }
    }
    if key.len() == key_columns.len() {
        return Some(IndexMatch {
            access: IndexAccess::Range(KeyRange::only(key)),
            consumed,
            narrowing: Vec::new(),
            lookups: 1.0,
        });
    }
    if key_columns.len() == 1 {
        if let Some((i, values)) = in_list_on(conjuncts, key_columns[0]) {
            let access = points(values);
            let lookups = match &access {
                IndexAccess::Points(p) => p.len() as f64,
                _ => 1.0,
            };
            return Some(IndexMatch {
                access,
                consumed: vec![i],
                narrowing: Vec::new(),
                lookups,
            });
        }
    }
    None
}

fn with_component(prefix: &[Value], value: &Value) -> IndexKey {
    let mut key = prefix.to_vec();
    key.push(value.clone());
    key
}

fn match_ordered(key_columns: &[usize], conjuncts: &[BoundExpr]) -> Option<IndexMatch> {
    let mut consumed = Vec::new();
    let mut prefix: Vec<Value> = Vec::new();
    for &column in key_columns {
        match equality_on(conjuncts, column, &consumed) {
            Some((i, v)) => {
                consumed.push(i);
                prefix.push(v);
            }
            None => break,
        }
    }

    if prefix.is_empty() {
        if let Some((i, values)) = in_list_on(conjuncts, key_columns[0]) {
            let access = points(values);
            let lookups = match &access {
                IndexAccess::Points(p) => p.len() as f64,
                _ => 1.0,
            };
            return Some(IndexMatch {
                access,
                consumed: vec![i],
                narrowing: Vec::new(),
                lookups,
            });
        }
    }

    let mut narrowing = Vec::new();
    let mut range: Option<KeyRange<IndexKey>> = None;
    if let Some(&column) = key_columns.get(prefix.len()) {
        for (i, c) in conjuncts.iter().enumerate() {
            if consumed.contains(&i) {
                continue;
            }
            let (bound, exact) = match range_bound(c, column, &prefix) {
                Some(b) => b,
                None => continue,
            };
            if exact {
                consumed.push(i);
            } else {
                narrowing.push(i);
            }
            range = Some(match range {
                Some(r) => r.intersect(&bound),
                None => bound,
            });
        }
    }

    let access = match range {
        Some(r) => complete_range(r, &prefix),
        None if !prefix.is_empty() => KeyRange::only(prefix),
        None => return None,
    };
    Some(IndexMatch {
        access: IndexAccess::Range(access),
        consumed,
        narrowing,
        lookups: 1.0,
    })
}

/// Range over `prefix ++ [column]` implied by `expr`, and whether the range
/// answers `expr` exactly.
fn range_bound(expr: &BoundExpr, column: usize, prefix: &[Value]) -> Option<(KeyRange<IndexKey>, bool)> {
    if let Some((col, op, v)) = column_comparison(expr) {
        if col != column || v.is_null() {
            return None;
        }
        let key = with_component(prefix, v);
        let range = match op {
            BinaryOp::Lt => KeyRange::upper_bound(key, true),
            BinaryOp::Le => KeyRange::upper_bound(key, false),
            BinaryOp::Gt => KeyRange::lower_bound(key, true),
            BinaryOp::Ge => KeyRange::lower_bound(key, false),
            _ => return None,
        };
        return Some((range, true));
    }
    match expr {
        BoundExpr::Between {
            expr,
            low,
            high,
            negated: false,
        } if expr.column_index() == Some(column) => {
            let (lo, hi) = (low.literal()?, high.literal()?);
            if lo.is_null() || hi.is_null() {
                return None;
            }
            Some((
                KeyRange::bound(with_component(prefix, lo), with_component(prefix, hi), false, false),
                true,
            ))
        }
        BoundExpr::Binary {
            op: BinaryOp::Like,
            left,
            right,
        } if left.column_index() == Some(column) => {
            let pattern = right.literal()?.as_str()?;
            let (lo, hi) = like_prefix_range(pattern)?;
            Some((
                KeyRange::bound(with_component(prefix, &lo), with_component(prefix, &hi), false, true),
                false,
            ))
        }
        _ => None,
    }
}

/// Fills the open side of a range so it stays inside the equality prefix and
/// never reaches keys whose range column is null.
fn complete_range(range: KeyRange<IndexKey>, prefix: &[Value]) -> KeyRange<IndexKey> {
    match range {
        KeyRange::UpperBound { value, exclusive } => {
            KeyRange::bound(with_component(prefix, &Value::Null), value, true, exclusive)
        }
        KeyRange::LowerBound { value, exclusive } if !prefix.is_empty() => {
            KeyRange::bound(value, prefix.to_vec(), exclusive, false)
        }
        other => other,
    }
}
