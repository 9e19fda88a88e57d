//! Join ordering.
//!
//! Orders a region of inner joins. Leaves are numbered, and every join
//! conjunct carries the bitmask of the leaves it references. Regions up to
//! the configured limit are ordered by dynamic programming over leaf subsets,
//! considering both operand orders of every split; larger regions are built
//! greedily, left-deep.
//!
//! Splits connected by a conjunct are preferred: a cross product is only
//! considered for a subset that cannot be split any other way. Candidates are
//! visited in ascending mask order and replace the current best only when
//! strictly cheaper, so the outcome is deterministic.

use tracing::debug;

use crate::error::{QueryError, QueryResult};

/// Most leaves one region can hold: leaf sets are `u64` bitmasks.
pub const MAX_JOIN_LEAVES: usize = u64::BITS as usize;

struct Entry<P> {
    plan: P,
    /// Leaves in output column order.
    order: Vec<usize>,
}

fn is_subset(mask: u64, of: u64) -> bool {
    mask & !of == 0
}

/// Conjuncts that become evaluable when `left` and `right` are joined.
fn applicable(conjunct_masks: &[u64], left: u64, right: u64) -> Vec<usize> {
    let union = left | right;
    conjunct_masks
        .iter()
        .enumerate()
        .filter(|(_, &m)| {
            m != 0 && is_subset(m, union) && !is_subset(m, left) && !is_subset(m, right)
        })
        .map(|(i, _)| i)
        .collect()
}

/// Orders the joins between `leaves`.
///
/// `join(left, left_mask, right, right_mask, conjuncts)` plans one join of
/// two sub-plans applying the listed conjuncts; `cost` ranks plans. Returns
/// the best plan and the leaf order of its output columns.
pub fn order_joins<P, J, C>(
    leaves: Vec<P>,
    conjunct_masks: &[u64],
    dp_limit: usize,
    mut join: J,
    cost: C,
) -> QueryResult<(P, Vec<usize>)>
where
    J: FnMut(&P, u64, &P, u64, &[usize]) -> QueryResult<P>,
    C: Fn(&P) -> f64,
{
    let n = leaves.len();
    debug!(relations = n, dp_limit, "ordering joins");
    if n > MAX_JOIN_LEAVES {
        return Err(QueryError::unsupported(format!(
            "join of {} relations exceeds the limit of {}",
            n, MAX_JOIN_LEAVES
        )));
    }
    if n <= 1 || n > dp_limit || n >= 63 {
        greedy(leaves, conjunct_masks, &mut join, &cost)
    } else {
        dynamic(leaves, conjunct_masks, &mut join, &cost)
    }
}

fn dynamic<P, J, C>(
    leaves: Vec<P>,
    conjunct_masks: &[u64],
    join: &mut J,
    cost: &C,
) -> QueryResult<(P, Vec<usize>)>
where
    J: FnMut(&P, u64, &P, u64, &[usize]) -> QueryResult<P>,
    C: Fn(&P) -> f64,
{
    let n = leaves.len();
    let full: u64 = (1u64 << n) - 1;
    let mut best: Vec<Option<Entry<P>>> = (0..=full).map(|_| None).collect();
    for (i, leaf) in leaves.into_iter().enumerate() {
        best[1usize << i] = Some(Entry {
            plan: leaf,
            order: vec![i],
        });
    }

    for size in 2..=n as u32 {
        for mask in 1..=full {
            if mask.count_ones() != size {
                continue;
            }
            let splits: Vec<(u64, u64)> = submasks(mask)
                .map(|sub| (sub, mask ^ sub))
                .collect();
            let connected: Vec<(u64, u64)> = splits
                .iter()
                .copied()
                .filter(|&(l, r)| !applicable(conjunct_masks, l, r).is_empty())
                .collect();
            let candidates = if connected.is_empty() { splits } else { connected };

            let mut chosen: Option<(Entry<P>, f64)> = None;
            for (left, right) in candidates {
                let (Some(l), Some(r)) = (&best[left as usize], &best[right as usize]) else {
                    continue;
                };
                let conjuncts = applicable(conjunct_masks, left, right);
                let plan = join(&l.plan, left, &r.plan, right, &conjuncts)?;
                let c = cost(&plan);
                if chosen.as_ref().map_or(true, |(_, best_cost)| c < *best_cost) {
                    let mut order = l.order.clone();
                    order.extend_from_slice(&r.order);
                    chosen = Some((Entry { plan, order }, c));
                }
            }
            best[mask as usize] = chosen.map(|(entry, _)| entry);
        }
    }

    match best[full as usize].take() {
        Some(entry) => Ok((entry.plan, entry.order)),
        None => Err(crate::error::QueryError::execution(
            "join ordering produced no plan",
        )),
    }
}

/// Proper non-empty submasks of `mask`, ascending.
fn submasks(mask: u64) -> impl Iterator<Item = u64> {
    (1..mask).filter(move |s| is_subset(*s, mask))
}

fn greedy<P, J, C>(
    leaves: Vec<P>,
    conjunct_masks: &[u64],
    join: &mut J,
    cost: &C,
) -> QueryResult<(P, Vec<usize>)>
where
    J: FnMut(&P, u64, &P, u64, &[usize]) -> QueryResult<P>,
    C: Fn(&P) -> f64,
{
    let mut remaining: Vec<Option<P>> = leaves.into_iter().map(Some).collect();

    // Start from the cheapest leaf.
    let mut start = 0;
    for (i, leaf) in remaining.iter().enumerate() {
        if let (Some(a), Some(Some(b))) = (leaf, remaining.get(start)) {
            if cost(a) < cost(b) {
                start = i;
            }
        }
    }
    let mut current = match remaining[start].take() {
        Some(p) => p,
        None => {
            return Err(QueryError::execution(
                "join ordering called without relations",
            ))
        }
    };
    let mut mask = 1u64 << start;
    let mut order = vec![start];

    while order.len() < remaining.len() {
        let any_connected = remaining.iter().enumerate().any(|(i, leaf)| {
            leaf.is_some() && !applicable(conjunct_masks, mask, 1u64 << i).is_empty()
        });
        let mut chosen: Option<(usize, P, f64)> = None;
        for (i, leaf) in remaining.iter().enumerate() {
            let Some(leaf) = leaf else { continue };
            let conjuncts = applicable(conjunct_masks, mask, 1u64 << i);
            if any_connected && conjuncts.is_empty() {
                continue;
            }
            let plan = join(&current, mask, leaf, 1u64 << i, &conjuncts)?;
            let c = cost(&plan);
            if chosen.as_ref().map_or(true, |(_, _, best)| c < *best) {
                chosen = Some((i, plan, c));
            }
        }
        let Some((i, plan, _)) = chosen else { break };
        remaining[i] = None;
        current = plan;
        mask |= 1u64 << i;
        order.push(i);
    }
    Ok((current, order))
}
