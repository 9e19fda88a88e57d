//! Cost-based physical planner.
//!
//! The planning pipeline consists of:
//!
//! 1. **Logical optimization** - column qualification, EXISTS decorrelation
//!    and predicate pushdown (see `Optimizer`).
//! 2. **Access paths** - every base table scan picks a sequential, index or
//!    index-only scan by cost.
//! 3. **Join planning** - regions of inner joins are reordered; every join
//!    picks nested loop (plain or index-parameterized), hash or merge by cost.
//! 4. **Operators** - aggregation, sorting, distinct, set operations and
//!    windows choose hash- or sort-based strategies, reusing input order.
//!
//! Planning is deterministic: for the same logical plan, catalog snapshot and
//! configuration the same physical plan comes out.
//!
//! ## Usage
//!
//! ```ignore
//! let planner = QueryPlanner::new(PlannerConfig::default());
//! let physical = planner.plan(&logical, &catalog.snapshot())?;
//! ```

use std::collections::{BTreeMap, BTreeSet};

use tern_core::DataType;
use tern_storage::CatalogSnapshot;
use tracing::{debug, trace};

use crate::ast::{ColumnRef, Expr, FrameBound, FrameSpec, FrameUnits, SortOrder};
use crate::config::PlannerConfig;
use crate::error::{QueryError, QueryResult};
use crate::optimizer::{
    choose_access_path, column_usage, order_joins, ExistsToJoin, Optimizer, PredicatePushdown,
    RelationUsage, MAX_JOIN_LEAVES,
};
use crate::planner::bind::{
    bind_aggregate, bind_expr, bind_predicate, bind_sort_key, bind_window_func, SubqueryPlanner,
};
use crate::planner::{
    estimate_join_cardinality, BoundExpr, BoundSortKey, CostModel, DedupStrategy, Estimate, Field,
    IndexAccess, IndexScanNode, JoinKind, JoinSide, LogicalPlan, PhysicalNode, PhysicalPlan,
    Schema, SetOpKind, SetOpStrategy, WindowStrategy,
};

/// Query planner producing physical plans from logical plans.
#[derive(Clone, Debug, Default)]
pub struct QueryPlanner {
    config: PlannerConfig,
}

impl QueryPlanner {
    /// Creates a planner with the given configuration.
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plans `plan` against `snapshot`.
    ///
    /// Unknown or ambiguous names, type errors and unsupported constructs are
    /// reported here, before anything executes.
    pub fn plan(&self, plan: &LogicalPlan, snapshot: &CatalogSnapshot) -> QueryResult<PhysicalPlan> {
        let optimized = Optimizer::new(snapshot).optimize(plan.clone())?;
        let mut ctx = PlanContext {
            cost: CostModel::new(&self.config, snapshot),
            config: &self.config,
            snapshot,
            usage: column_usage(&optimized),
            ctes: Vec::new(),
        };
        let mut physical = ctx.plan(&optimized)?;
        physical.assign_ids();
        debug!(
            nodes = physical.node_count(),
            rows = physical.estimate.rows,
            cost = physical.estimate.total_cost,
            "physical plan ready"
        );
        Ok(physical)
    }
}

/// A materialized common table expression visible to references.
struct CteInfo {
    schema: Schema,
    rows: f64,
    ordering: Vec<(usize, SortOrder)>,
}

/// One equi-join key pair: left key over the left input, right key over the
/// right input.
struct EquiKey {
    left: BoundExpr,
    right: BoundExpr,
    /// Position of the originating conjunct.
    conjunct: usize,
}

/// State for planning one query.
struct PlanContext<'a> {
    cost: CostModel<'a>,
    config: &'a PlannerConfig,
    snapshot: &'a CatalogSnapshot,
    usage: BTreeMap<String, RelationUsage>,
    ctes: Vec<BTreeMap<String, CteInfo>>,
}

impl SubqueryPlanner for PlanContext<'_> {
    fn plan_subquery(&mut self, plan: &LogicalPlan) -> QueryResult<PhysicalPlan> {
        let rewritten = Optimizer::with_passes(vec![
            Box::new(ExistsToJoin),
            Box::new(PredicatePushdown),
        ])
        .optimize(plan.clone())?;
        trace!("planning scalar subquery");
        self.plan(&rewritten)
    }
}

fn plain_columns(exprs: &[BoundExpr]) -> Option<Vec<usize>> {
    exprs.iter().map(BoundExpr::column_index).collect()
}

fn column_keys(schema: &Schema, columns: &[usize]) -> Vec<BoundSortKey> {
    columns
        .iter()
        .map(|&c| BoundSortKey {
            expr: BoundExpr::column(c, schema),
            order: SortOrder::Asc,
        })
        .collect()
}

/// Output field for a projected or grouped expression.
fn output_field(expr: &Expr, bound: &BoundExpr, input: &Schema) -> Field {
    let (relation, name) = expr.output_name();
    match bound.column_index().and_then(|i| input.field(i)) {
        Some(f) => Field {
            relation,
            name,
            data_type: f.data_type,
            nullable: f.nullable,
            origin: f.origin.clone(),
        },
        None => Field::new(relation, name, bound.data_type(), true),
    }
}

/// Maps an input ordering through a list of output expressions, keeping the
/// longest prefix that survives.
fn map_ordering(ordering: &[(usize, SortOrder)], outputs: &[BoundExpr]) -> Vec<(usize, SortOrder)> {
    let mut out = Vec::new();
    for &(pos, order) in ordering {
        match outputs.iter().position(|e| e.column_index() == Some(pos)) {
            Some(j) => out.push((j, order)),
            None => break,
        }
    }
    out
}

fn is_offset_bound(bound: &FrameBound) -> bool {
    matches!(bound, FrameBound::Preceding(_) | FrameBound::Following(_))
}

impl PlanContext<'_> {
    fn plan(&mut self, plan: &LogicalPlan) -> QueryResult<PhysicalPlan> {
        match plan {
            LogicalPlan::Scan {
                table,
                alias,
                predicate,
            } => self.plan_scan(table, alias.as_deref(), predicate.as_ref()),
            LogicalPlan::CteRef { name, alias } => self.plan_cte_ref(name, alias.as_deref()),
            LogicalPlan::Filter { input, predicate } => {
                let input = self.plan(input)?;
                self.add_filter(input, vec![predicate.clone()])
            }
            LogicalPlan::Project { input, exprs } => {
                let input = self.plan(input)?;
                self.plan_project(input, exprs)
            }
            LogicalPlan::Join {
                left,
                right,
                kind,
                condition,
            } => {
                if kind.is_reorderable() {
                    self.plan_join_region(plan)
                } else {
                    let left_plan = self.plan(left)?;
                    let right_plan = self.plan(right)?;
                    let conjuncts = condition
                        .clone()
                        .map(Expr::into_conjuncts)
                        .unwrap_or_default();
                    self.plan_join(left_plan, right_plan, *kind, &conjuncts, Some(right))
                }
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                having,
            } => {
                let input = self.plan(input)?;
                self.plan_aggregate(input, group_by, aggregates, having.as_ref())
            }
            LogicalPlan::Sort { input, keys } => {
                let input = self.plan(input)?;
                let keys = keys
                    .iter()
                    .map(|k| bind_sort_key(k, &input.schema, self))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(self.sort(input, keys))
            }
            LogicalPlan::Limit {
                input,
                count,
                offset,
            } => {
                let input = self.plan(input)?;
                let estimate = self.cost.limit(&input.estimate, *count, *offset);
                let schema = input.schema.clone();
                let ordering = input.ordering.clone();
                Ok(PhysicalPlan::new(
                    PhysicalNode::Limit {
                        input: Box::new(input),
                        count: *count,
                        offset: *offset,
                    },
                    schema,
                    estimate,
                )
                .with_ordering(ordering))
            }
            LogicalPlan::Distinct { input } => {
                let input = self.plan(input)?;
                Ok(self.plan_distinct(input))
            }
            LogicalPlan::SetOp {
                left,
                right,
                kind,
                all,
            } => {
                let left = self.plan(left)?;
                let right = self.plan(right)?;
                self.plan_set_op(left, right, *kind, *all)
            }
            LogicalPlan::Window {
                input,
                partition_by,
                order_by,
                frame,
                functions,
            } => {
                let input = self.plan(input)?;
                self.plan_window(input, partition_by, order_by, *frame, functions)
            }
            LogicalPlan::With { ctes, body } => {
                self.ctes.push(BTreeMap::new());
                let result = self.plan_with(ctes, body);
                self.ctes.pop();
                result
            }
        }
    }

    fn plan_scan(
        &mut self,
        table: &str,
        alias: Option<&str>,
        predicate: Option<&Expr>,
    ) -> QueryResult<PhysicalPlan> {
        let snapshot = self.snapshot;
        let def = snapshot
            .schema(table)
            .ok_or_else(|| QueryError::unknown_table(table))?;
        let relation = alias.unwrap_or(table);
        let schema = Schema::new(
            def.columns()
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    Field::new(
                        Some(relation.to_string()),
                        c.name(),
                        Some(c.data_type()),
                        c.is_nullable(),
                    )
                    .with_origin(table, i)
                })
                .collect(),
        );
        let conjuncts = match predicate {
            Some(p) => bind_predicate(p, &schema, self)?.into_conjuncts(),
            None => Vec::new(),
        };
        let required: Option<BTreeSet<usize>> = match self.usage.get(relation) {
            Some(usage) if !usage.all => Some(
                def.columns()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| usage.uses(c.name()))
                    .map(|(i, _)| i)
                    .collect(),
            ),
            _ => None,
        };
        let path = choose_access_path(&self.cost, def, alias, &schema, conjuncts, required.as_ref());
        debug!(
            table,
            access = match &path.node {
                PhysicalNode::SeqScan { .. } => "seq",
                PhysicalNode::IndexOnlyScan(_) => "index-only",
                _ => "index",
            },
            rows = path.estimate.rows,
            "access path chosen"
        );
        Ok(PhysicalPlan::new(path.node, schema, path.estimate).with_ordering(path.ordering))
    }

    fn plan_cte_ref(&mut self, name: &str, alias: Option<&str>) -> QueryResult<PhysicalPlan> {
        let info = self
            .ctes
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .ok_or_else(|| QueryError::unknown_table(name))?;
        let schema = info.schema.clone().requalify(Some(alias.unwrap_or(name)));
        Ok(PhysicalPlan::new(
            PhysicalNode::MaterializeCte {
                name: name.to_string(),
            },
            schema,
            self.cost.cte_scan(info.rows),
        )
        .with_ordering(info.ordering.clone()))
    }

    fn plan_with(
        &mut self,
        ctes: &[crate::planner::CommonTableExpr],
        body: &LogicalPlan,
    ) -> QueryResult<PhysicalPlan> {
        let mut planned = Vec::with_capacity(ctes.len());
        let mut cte_cost = 0.0;
        for cte in ctes {
            let plan = self.plan(&cte.plan)?;
            cte_cost += plan.estimate.total_cost;
            if let Some(frame) = self.ctes.last_mut() {
                frame.insert(
                    cte.name.clone(),
                    CteInfo {
                        schema: plan.schema.clone(),
                        rows: plan.estimate.rows,
                        ordering: plan.ordering.clone(),
                    },
                );
            }
            planned.push((cte.name.clone(), plan));
        }
        let body = self.plan(body)?;
        let estimate = Estimate::new(
            body.estimate.rows,
            body.estimate.startup_cost,
            body.estimate.total_cost + cte_cost,
        );
        let schema = body.schema.clone();
        let ordering = body.ordering.clone();
        Ok(PhysicalPlan::new(
            PhysicalNode::With {
                ctes: planned,
                body: Box::new(body),
            },
            schema,
            estimate,
        )
        .with_ordering(ordering))
    }

    fn add_filter(&mut self, input: PhysicalPlan, predicates: Vec<Expr>) -> QueryResult<PhysicalPlan> {
        let mut bound = Vec::new();
        for p in &predicates {
            bound.extend(bind_predicate(p, &input.schema, self)?.into_conjuncts());
        }
        let terms = bound.len();
        let Some(predicate) = BoundExpr::conjunction(bound) else {
            return Ok(input);
        };
        let rows = self
            .cost
            .estimate_cardinality(&predicate, &input.schema, input.estimate.rows);
        let estimate = self.cost.per_row(&input.estimate, rows, terms);
        let schema = input.schema.clone();
        let ordering = input.ordering.clone();
        Ok(PhysicalPlan::new(
            PhysicalNode::Filter {
                input: Box::new(input),
                predicate,
            },
            schema,
            estimate,
        )
        .with_ordering(ordering))
    }

    fn plan_project(&mut self, input: PhysicalPlan, exprs: &[Expr]) -> QueryResult<PhysicalPlan> {
        let mut bound = Vec::with_capacity(exprs.len());
        let mut fields = Vec::with_capacity(exprs.len());
        for e in exprs {
            let b = bind_expr(e, &input.schema, self)?;
            fields.push(output_field(e, &b, &input.schema));
            bound.push(b);
        }
        let estimate = self
            .cost
            .per_row(&input.estimate, input.estimate.rows, bound.len());
        let ordering = map_ordering(&input.ordering, &bound);
        Ok(PhysicalPlan::new(
            PhysicalNode::Project {
                input: Box::new(input),
                exprs: bound,
            },
            Schema::new(fields),
            estimate,
        )
        .with_ordering(ordering))
    }

    fn sort(&self, input: PhysicalPlan, keys: Vec<BoundSortKey>) -> PhysicalPlan {
        let wanted: Option<Vec<(usize, SortOrder)>> = keys
            .iter()
            .map(|k| k.expr.column_index().map(|c| (c, k.order)))
            .collect();
        if let Some(wanted) = &wanted {
            if input.is_ordered_by(wanted) {
                trace!("input already ordered, sort elided");
                return input;
            }
        }
        let ordering: Vec<(usize, SortOrder)> = keys
            .iter()
            .map_while(|k| k.expr.column_index().map(|c| (c, k.order)))
            .collect();
        let estimate = self.cost.sort(&input.estimate);
        let schema = input.schema.clone();
        PhysicalPlan::new(
            PhysicalNode::Sort {
                input: Box::new(input),
                keys,
            },
            schema,
            estimate,
        )
        .with_ordering(ordering)
    }

    /// Sorts `input` ascending on every column unless it already is.
    fn sort_all(&self, input: PhysicalPlan) -> PhysicalPlan {
        let columns: Vec<usize> = (0..input.schema.len()).collect();
        let keys = column_keys(&input.schema, &columns);
        self.sort(input, keys)
    }

    // ---- joins ----

    /// Plans a tree of inner and cross joins as one reorderable region.
    fn plan_join_region(&mut self, plan: &LogicalPlan) -> QueryResult<PhysicalPlan> {
        let mut leaves: Vec<&LogicalPlan> = Vec::new();
        let mut conjuncts: Vec<Expr> = Vec::new();
        collect_region(plan, &mut leaves, &mut conjuncts);
        if leaves.len() > MAX_JOIN_LEAVES {
            return Err(QueryError::unsupported(format!(
                "join of {} relations exceeds the limit of {}",
                leaves.len(),
                MAX_JOIN_LEAVES
            )));
        }

        let mut planned = Vec::with_capacity(leaves.len());
        for leaf in &leaves {
            planned.push(self.plan(leaf)?);
        }

        // Leaf masks per conjunct.
        let mut masks = Vec::with_capacity(conjuncts.len());
        for c in &conjuncts {
            let mut mask = 0u64;
            let mut unresolved: Option<ColumnRef> = None;
            c.for_each_column(&mut |col| {
                let found = planned
                    .iter()
                    .position(|p| p.schema.try_resolve(col).is_some());
                match found {
                    Some(i) => mask |= 1u64 << i,
                    None => {
                        if unresolved.is_none() {
                            unresolved = Some(col.clone());
                        }
                    }
                }
            });
            if let Some(col) = unresolved {
                return Err(QueryError::unknown_column(&col.to_string()));
            }
            masks.push(mask);
        }

        // Single-leaf conjuncts filter their leaf; constant ones go on top.
        let mut on_top = Vec::new();
        let mut per_leaf: Vec<Vec<Expr>> = vec![Vec::new(); planned.len()];
        let mut join_conjuncts = Vec::new();
        let mut join_masks = Vec::new();
        for (c, mask) in conjuncts.into_iter().zip(masks) {
            if mask == 0 {
                on_top.push(c);
            } else if mask.count_ones() == 1 {
                per_leaf[mask.trailing_zeros() as usize].push(c);
            } else {
                join_conjuncts.push(c);
                join_masks.push(mask);
            }
        }
        let mut filtered = Vec::with_capacity(planned.len());
        for (leaf, preds) in planned.into_iter().zip(per_leaf) {
            filtered.push(self.add_filter(leaf, preds)?);
        }
        let widths: Vec<usize> = filtered.iter().map(|p| p.schema.len()).collect();

        let dp_limit = self.config.dp_relation_limit;
        let (joined, order) = order_joins(
            filtered,
            &join_masks,
            dp_limit,
            |l: &PhysicalPlan, _lm: u64, r: &PhysicalPlan, rm: u64, idx: &[usize]| {
                let exprs: Vec<Expr> = idx.iter().map(|&i| join_conjuncts[i].clone()).collect();
                let inner = if rm.count_ones() == 1 {
                    Some(leaves[rm.trailing_zeros() as usize])
                } else {
                    None
                };
                self.plan_join(l.clone(), r.clone(), JoinKind::Inner, &exprs, inner)
            },
            |p: &PhysicalPlan| p.estimate.total_cost,
        )?;

        let restored = self.restore_column_order(joined, &order, &widths);
        self.add_filter(restored, on_top)
    }

    /// Projects a reordered join back to the original leaf column order.
    fn restore_column_order(&self, plan: PhysicalPlan, order: &[usize], widths: &[usize]) -> PhysicalPlan {
        if order.windows(2).all(|w| w[0] < w[1]) {
            return plan;
        }
        let mut offsets = vec![0usize; widths.len()];
        let mut at = 0;
        for &leaf in order {
            offsets[leaf] = at;
            at += widths[leaf];
        }
        let mut exprs = Vec::with_capacity(at);
        for (leaf, width) in widths.iter().enumerate() {
            for c in 0..*width {
                exprs.push(BoundExpr::column(offsets[leaf] + c, &plan.schema));
            }
        }
        let fields = exprs
            .iter()
            .filter_map(|e| e.column_index().and_then(|i| plan.schema.field(i)).cloned())
            .collect();
        let estimate = self.cost.per_row(&plan.estimate, plan.estimate.rows, 1);
        let ordering = map_ordering(&plan.ordering, &exprs);
        PhysicalPlan::new(
            PhysicalNode::Project {
                input: Box::new(plan),
                exprs,
            },
            Schema::new(fields),
            estimate,
        )
        .with_ordering(ordering)
    }

    /// Plans one join, choosing the cheapest algorithm.
    ///
    /// `inner_scan` is the logical right input when it may be replaced by an
    /// index scan parameterized by the outer row.
    fn plan_join(
        &mut self,
        left: PhysicalPlan,
        right: PhysicalPlan,
        kind: JoinKind,
        conjuncts: &[Expr],
        inner_scan: Option<&LogicalPlan>,
    ) -> QueryResult<PhysicalPlan> {
        let combined = left.schema.join(&right.schema);
        let lwidth = left.schema.len();
        let mut bound = Vec::with_capacity(conjuncts.len());
        for c in conjuncts {
            bound.extend(bind_predicate(c, &combined, self)?.into_conjuncts());
        }

        let keys = equi_keys(&bound, lwidth);
        let key_conjuncts: BTreeSet<usize> = keys.iter().map(|k| k.conjunct).collect();
        let residual: Vec<BoundExpr> = bound
            .iter()
            .enumerate()
            .filter(|(i, _)| !key_conjuncts.contains(i))
            .map(|(_, e)| e.clone())
            .collect();

        let mut selectivity = 1.0;
        for k in &keys {
            selectivity *= self
                .cost
                .join_selectivity(&k.left, &left.schema, &k.right, &right.schema);
        }
        for r in &residual {
            selectivity *= self.cost.selectivity(r, &combined);
        }
        let rows = join_rows(kind, left.estimate.rows, right.estimate.rows, selectivity);

        let schema = match kind {
            JoinKind::Semi | JoinKind::Anti => left.schema.clone(),
            JoinKind::Left => left.schema.join(&right.schema.clone().into_nullable()),
            JoinKind::Right => left.schema.clone().into_nullable().join(&right.schema),
            JoinKind::Full => left
                .schema
                .clone()
                .into_nullable()
                .join(&right.schema.clone().into_nullable()),
            JoinKind::Inner | JoinKind::Cross => combined.clone(),
        };
        let keeps_left_order = matches!(
            kind,
            JoinKind::Inner | JoinKind::Cross | JoinKind::Left | JoinKind::Semi | JoinKind::Anti
        );

        let mut best: Option<PhysicalPlan> = None;
        let consider = |candidate: PhysicalPlan, best: &mut Option<PhysicalPlan>| {
            trace!(
                algorithm = candidate.kind(),
                cost = candidate.estimate.total_cost,
                "join candidate"
            );
            if best
                .as_ref()
                .map_or(true, |b| candidate.estimate.total_cost < b.estimate.total_cost)
            {
                *best = Some(candidate);
            }
        };

        // Index nested loop
        if let Some(candidate) =
            self.index_nested_loop(&left, &right, kind, &keys, &bound, inner_scan, &schema, rows)?
        {
            consider(candidate, &mut best);
        }

        // Hash join
        if !keys.is_empty() {
            let build = match kind {
                JoinKind::Semi | JoinKind::Anti => JoinSide::Right,
                _ if left.estimate.rows < right.estimate.rows => JoinSide::Left,
                _ => JoinSide::Right,
            };
            let estimate = match build {
                JoinSide::Left => self.cost.hash_join(&left.estimate, &right.estimate, rows),
                JoinSide::Right => self.cost.hash_join(&right.estimate, &left.estimate, rows),
            };
            let ordering = if build == JoinSide::Right && keeps_left_order {
                left.ordering.clone()
            } else {
                Vec::new()
            };
            consider(
                PhysicalPlan::new(
                    PhysicalNode::HashJoin {
                        left: Box::new(left.clone()),
                        right: Box::new(right.clone()),
                        kind,
                        left_keys: keys.iter().map(|k| k.left.clone()).collect(),
                        right_keys: keys.iter().map(|k| k.right.clone()).collect(),
                        residual: BoundExpr::conjunction(residual.clone()),
                        build,
                    },
                    schema.clone(),
                    estimate,
                )
                .with_ordering(ordering),
                &mut best,
            );
        }

        // Merge join
        let mergeable = matches!(
            kind,
            JoinKind::Inner | JoinKind::Left | JoinKind::Right | JoinKind::Full
        );
        if mergeable && !keys.is_empty() {
            let lcols: Option<Vec<usize>> = keys.iter().map(|k| k.left.column_index()).collect();
            let rcols: Option<Vec<usize>> = keys.iter().map(|k| k.right.column_index()).collect();
            if let (Some(lcols), Some(rcols)) = (lcols, rcols) {
                let lsorted = self.sort(left.clone(), column_keys(&left.schema, &lcols));
                let rsorted = self.sort(right.clone(), column_keys(&right.schema, &rcols));
                let estimate = self.cost.merge_join(&lsorted.estimate, &rsorted.estimate, rows);
                let ordering = if matches!(kind, JoinKind::Inner | JoinKind::Left) {
                    lcols.iter().map(|&c| (c, SortOrder::Asc)).collect()
                } else {
                    Vec::new()
                };
                consider(
                    PhysicalPlan::new(
                        PhysicalNode::MergeJoin {
                            left: Box::new(lsorted),
                            right: Box::new(rsorted),
                            kind,
                            left_keys: lcols,
                            right_keys: rcols,
                            residual: BoundExpr::conjunction(residual.clone()),
                        },
                        schema.clone(),
                        estimate,
                    )
                    .with_ordering(ordering),
                    &mut best,
                );
            }
        }

        // Plain nested loop
        let threshold = self.config.nested_loop_threshold;
        if keys.is_empty()
            || left.estimate.rows < threshold
            || right.estimate.rows < threshold
        {
            let estimate = self.cost.nested_loop(&left.estimate, &right.estimate, rows);
            let ordering = if keeps_left_order {
                left.ordering.clone()
            } else {
                Vec::new()
            };
            consider(
                PhysicalPlan::new(
                    PhysicalNode::NestedLoopJoin {
                        left: Box::new(left),
                        right: Box::new(right),
                        kind,
                        condition: BoundExpr::conjunction(bound),
                    },
                    schema,
                    estimate,
                )
                .with_ordering(ordering),
                &mut best,
            );
        }

        best.ok_or_else(|| QueryError::execution("no join algorithm applies"))
    }

    /// Nested loop whose inner side is an index scan keyed by the outer row.
    #[allow(clippy::too_many_arguments)]
    fn index_nested_loop(
        &mut self,
        left: &PhysicalPlan,
        right: &PhysicalPlan,
        kind: JoinKind,
        keys: &[EquiKey],
        bound: &[BoundExpr],
        inner_scan: Option<&LogicalPlan>,
        schema: &Schema,
        rows: f64,
    ) -> QueryResult<Option<PhysicalPlan>> {
        if !matches!(
            kind,
            JoinKind::Inner | JoinKind::Left | JoinKind::Semi | JoinKind::Anti
        ) || keys.is_empty()
        {
            return Ok(None);
        }
        let Some(LogicalPlan::Scan {
            table,
            alias,
            predicate,
        }) = inner_scan
        else {
            return Ok(None);
        };
        if !matches!(
            right.node,
            PhysicalNode::SeqScan { .. } | PhysicalNode::IndexScan(_) | PhysicalNode::IndexOnlyScan(_)
        ) {
            return Ok(None);
        }
        let snapshot = self.snapshot;
        let Some(def) = snapshot.schema(table) else {
            return Ok(None);
        };

        let scan_filter = match predicate {
            Some(p) => Some(bind_predicate(p, &right.schema, self)?),
            None => None,
        };
        let filter_terms = scan_filter
            .clone()
            .map(|f| f.into_conjuncts().len())
            .unwrap_or(0);
        let table_rows = self.cost.table_rows(table);

        let mut indices: Vec<_> = def.indices().iter().collect();
        indices.sort_by(|a, b| a.name().cmp(b.name()));

        let mut best: Option<PhysicalPlan> = None;
        for index in indices {
            let key_columns: Option<Vec<usize>> = index
                .columns()
                .iter()
                .map(|c| def.get_column_index(c))
                .collect();
            let Some(key_columns) = key_columns else {
                continue;
            };
            let mut used: Vec<&EquiKey> = Vec::new();
            for col in &key_columns {
                match keys
                    .iter()
                    .find(|k| k.right.column_index() == Some(*col) && k.left.subqueries().is_empty())
                {
                    Some(k) => used.push(k),
                    None => break,
                }
            }
            if used.is_empty()
                || (!index.get_index_type().supports_range() && used.len() < key_columns.len())
            {
                continue;
            }

            let mut per_lookup = table_rows;
            for k in &used {
                per_lookup *= self
                    .cost
                    .join_selectivity(&k.left, &left.schema, &k.right, &right.schema);
            }
            let fetched = per_lookup.max(1.0).min(table_rows.max(1.0));
            let inner_rows = match &scan_filter {
                Some(f) => self.cost.estimate_cardinality(f, &right.schema, fetched),
                None => fetched,
            };
            let inner_estimate = self
                .cost
                .index_scan(1.0, fetched, inner_rows, filter_terms, false);
            let estimate = self.cost.nested_loop(&left.estimate, &inner_estimate, rows);

            let used_conjuncts: BTreeSet<usize> = used.iter().map(|k| k.conjunct).collect();
            let condition = BoundExpr::conjunction(
                bound
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !used_conjuncts.contains(i))
                    .map(|(_, e)| e.clone())
                    .collect(),
            );
            let inner = PhysicalPlan::new(
                PhysicalNode::IndexScan(IndexScanNode {
                    table: table.clone(),
                    alias: alias.clone(),
                    index: index.name().to_string(),
                    key_columns: key_columns.clone(),
                    access: IndexAccess::Param(used.iter().map(|k| k.left.clone()).collect()),
                    filter: scan_filter.clone(),
                }),
                right.schema.clone(),
                inner_estimate,
            );
            let candidate = PhysicalPlan::new(
                PhysicalNode::NestedLoopJoin {
                    left: Box::new(left.clone()),
                    right: Box::new(inner),
                    kind,
                    condition,
                },
                schema.clone(),
                estimate,
            )
            .with_ordering(left.ordering.clone());
            if best
                .as_ref()
                .map_or(true, |b| candidate.estimate.total_cost < b.estimate.total_cost)
            {
                best = Some(candidate);
            }
        }
        Ok(best)
    }

    // ---- aggregation, dedupe, set operations, windows ----

    fn plan_aggregate(
        &mut self,
        input: PhysicalPlan,
        group_by: &[Expr],
        aggregates: &[crate::ast::AggregateExpr],
        having: Option<&Expr>,
    ) -> QueryResult<PhysicalPlan> {
        let mut groups = Vec::with_capacity(group_by.len());
        let mut fields = Vec::with_capacity(group_by.len() + aggregates.len());
        for g in group_by {
            let b = bind_expr(g, &input.schema, self)?;
            fields.push(output_field(g, &b, &input.schema));
            groups.push(b);
        }
        let mut aggs = Vec::with_capacity(aggregates.len());
        for a in aggregates {
            let b = bind_aggregate(a, &input.schema, self)?;
            fields.push(Field::new(None, a.alias.clone(), b.data_type, true));
            aggs.push(b);
        }
        let schema = Schema::new(fields);
        let having = match having {
            Some(h) => Some(bind_predicate(h, &schema, self)?),
            None => None,
        };

        let group_rows = if groups.is_empty() {
            1.0
        } else {
            self.cost
                .distinct_groups(&groups, &input.schema, input.estimate.rows)
        };
        let grouped_columns = plain_columns(&groups).filter(|cols| !cols.is_empty());
        let streaming = grouped_columns
            .as_ref()
            .map_or(false, |cols| input.is_grouped_by(cols));

        let mut estimate = if streaming {
            self.cost
                .group_aggregate(&input.estimate, group_rows, aggs.len())
        } else {
            self.cost
                .hash_aggregate(&input.estimate, group_rows, aggs.len())
        };
        if let Some(h) = &having {
            let rows = self.cost.estimate_cardinality(h, &schema, group_rows);
            estimate = Estimate::new(
                rows,
                estimate.startup_cost,
                estimate.total_cost + group_rows * self.config.cpu_operator_cost,
            );
        }

        if streaming {
            let ordering = map_ordering(&input.ordering, &groups);
            Ok(PhysicalPlan::new(
                PhysicalNode::GroupAggregate {
                    input: Box::new(input),
                    group_by: groups,
                    aggregates: aggs,
                    having,
                },
                schema,
                estimate,
            )
            .with_ordering(ordering))
        } else {
            Ok(PhysicalPlan::new(
                PhysicalNode::HashAggregate {
                    input: Box::new(input),
                    group_by: groups,
                    aggregates: aggs,
                    having,
                },
                schema,
                estimate,
            ))
        }
    }

    fn plan_distinct(&self, input: PhysicalPlan) -> PhysicalPlan {
        let columns: Vec<usize> = (0..input.schema.len()).collect();
        let exprs: Vec<BoundExpr> = columns
            .iter()
            .map(|&c| BoundExpr::column(c, &input.schema))
            .collect();
        let distinct = self
            .cost
            .distinct_groups(&exprs, &input.schema, input.estimate.rows);
        let schema = input.schema.clone();

        let hash_estimate = self.cost.hash_dedup(&input.estimate, distinct);
        let sorted_input = if input.is_grouped_by(&columns) {
            input.clone()
        } else {
            self.sort_all(input.clone())
        };
        let sort_estimate = self.cost.sorted_dedup(&sorted_input.estimate, distinct);

        if sort_estimate.total_cost < hash_estimate.total_cost {
            let ordering = sorted_input.ordering.clone();
            PhysicalPlan::new(
                PhysicalNode::Distinct {
                    input: Box::new(sorted_input),
                    strategy: DedupStrategy::Sort,
                },
                schema,
                sort_estimate,
            )
            .with_ordering(ordering)
        } else {
            let ordering = input.ordering.clone();
            PhysicalPlan::new(
                PhysicalNode::Distinct {
                    input: Box::new(input),
                    strategy: DedupStrategy::Hash,
                },
                schema,
                hash_estimate,
            )
            .with_ordering(ordering)
        }
    }

    fn plan_set_op(
        &self,
        left: PhysicalPlan,
        right: PhysicalPlan,
        kind: SetOpKind,
        all: bool,
    ) -> QueryResult<PhysicalPlan> {
        if left.schema.len() != right.schema.len() {
            return Err(QueryError::type_mismatch(format!(
                "{} inputs have {} and {} columns",
                kind.name(),
                left.schema.len(),
                right.schema.len()
            )));
        }
        let mut fields = Vec::with_capacity(left.schema.len());
        for (l, r) in left.schema.fields().iter().zip(right.schema.fields()) {
            let data_type = match (l.data_type, r.data_type) {
                (Some(a), Some(b)) => Some(a.common_type(b).ok_or_else(|| {
                    QueryError::type_mismatch(format!(
                        "{} column '{}' combines {} and {}",
                        kind.name(),
                        l.name,
                        a.name(),
                        b.name()
                    ))
                })?),
                (a, b) => a.or(b),
            };
            fields.push(Field::new(None, l.name.clone(), data_type, l.nullable || r.nullable));
        }
        let schema = Schema::new(fields);

        let (lrows, rrows) = (left.estimate.rows, right.estimate.rows);
        let rows = match kind {
            SetOpKind::Union if all => lrows + rrows,
            SetOpKind::Union => lrows.max(rrows) + lrows.min(rrows) / 2.0,
            SetOpKind::Intersect => lrows.min(rrows) / 2.0,
            SetOpKind::Except => lrows / 2.0,
        };
        let rows = if lrows + rrows > 0.0 { rows.max(1.0) } else { 0.0 };

        if kind == SetOpKind::Union && all {
            let estimate = Estimate::new(
                rows,
                left.estimate.startup_cost,
                left.estimate.total_cost + right.estimate.total_cost,
            );
            return Ok(PhysicalPlan::new(
                PhysicalNode::SetOp {
                    left: Box::new(left),
                    right: Box::new(right),
                    kind,
                    all,
                    strategy: SetOpStrategy::Append,
                },
                schema,
                estimate,
            ));
        }

        let inputs = Estimate::new(
            lrows + rrows,
            left.estimate.startup_cost + right.estimate.startup_cost,
            left.estimate.total_cost + right.estimate.total_cost,
        );
        let hash_estimate = self.cost.hash_dedup(&inputs, rows);
        let lsorted = self.sort_all(left.clone());
        let rsorted = self.sort_all(right.clone());
        let sorted_inputs = Estimate::new(
            lrows + rrows,
            lsorted.estimate.startup_cost + rsorted.estimate.startup_cost,
            lsorted.estimate.total_cost + rsorted.estimate.total_cost,
        );
        let sort_estimate = self.cost.sorted_dedup(&sorted_inputs, rows);

        if sort_estimate.total_cost < hash_estimate.total_cost {
            let ordering = (0..schema.len()).map(|c| (c, SortOrder::Asc)).collect();
            Ok(PhysicalPlan::new(
                PhysicalNode::SetOp {
                    left: Box::new(lsorted),
                    right: Box::new(rsorted),
                    kind,
                    all,
                    strategy: SetOpStrategy::Sort,
                },
                schema,
                sort_estimate,
            )
            .with_ordering(ordering))
        } else {
            Ok(PhysicalPlan::new(
                PhysicalNode::SetOp {
                    left: Box::new(left),
                    right: Box::new(right),
                    kind,
                    all,
                    strategy: SetOpStrategy::Hash,
                },
                schema,
                hash_estimate,
            ))
        }
    }

    fn plan_window(
        &mut self,
        input: PhysicalPlan,
        partition_by: &[Expr],
        order_by: &[crate::ast::SortKey],
        frame: Option<FrameSpec>,
        functions: &[crate::ast::WindowExpr],
    ) -> QueryResult<PhysicalPlan> {
        let partition = partition_by
            .iter()
            .map(|e| bind_expr(e, &input.schema, self))
            .collect::<QueryResult<Vec<_>>>()?;
        let order = order_by
            .iter()
            .map(|k| bind_sort_key(k, &input.schema, self))
            .collect::<QueryResult<Vec<_>>>()?;
        let frame = frame.unwrap_or_else(|| FrameSpec::default_for(!order.is_empty()));
        if frame.units == FrameUnits::Range
            && (is_offset_bound(&frame.start) || is_offset_bound(&frame.end))
        {
            let numeric = order.len() == 1
                && order[0]
                    .expr
                    .data_type()
                    .map_or(false, |t| t.is_numeric() || t == DataType::Timestamp);
            if !numeric {
                return Err(QueryError::type_mismatch(
                    "RANGE frame with an offset needs exactly one numeric ORDER BY key",
                ));
            }
        }

        let mut bound = Vec::with_capacity(functions.len());
        let mut fields = input.schema.fields().to_vec();
        for f in functions {
            let b = bind_window_func(&f.func, &input.schema, self)?;
            fields.push(Field::new(None, f.alias.clone(), b.data_type(), true));
            bound.push((b, f.alias.clone()));
        }

        let partition_cols = plain_columns(&partition);
        let order_cols: Option<Vec<(usize, SortOrder)>> = order
            .iter()
            .map(|k| k.expr.column_index().map(|c| (c, k.order)))
            .collect();
        let presorted = match (&partition_cols, &order_cols) {
            (Some(p), Some(o)) => {
                input.is_grouped_by(p)
                    && input.ordering.len() >= p.len() + o.len()
                    && input.ordering[p.len()..p.len() + o.len()] == o[..]
            }
            _ => false,
        };

        let rows = input.estimate.rows;
        let (strategy, estimate, ordering) = if presorted {
            (
                WindowStrategy::Sort,
                self.cost.per_row(&input.estimate, rows, bound.len()),
                input.ordering.clone(),
            )
        } else {
            let c = self.config;
            let startup = input.estimate.total_cost
                + rows * c.hash_row_cost
                + self.cost.sort_cost(rows);
            (
                WindowStrategy::Hash,
                Estimate::new(
                    rows,
                    startup,
                    startup + rows * c.cpu_operator_cost * bound.len().max(1) as f64,
                ),
                Vec::new(),
            )
        };
        Ok(PhysicalPlan::new(
            PhysicalNode::Window {
                input: Box::new(input),
                partition_by: partition,
                order_by: order,
                frame,
                functions: bound,
                strategy,
            },
            Schema::new(fields),
            estimate,
        )
        .with_ordering(ordering))
    }
}

/// Flattens nested inner and cross joins into leaves and conjuncts.
fn collect_region<'p>(plan: &'p LogicalPlan, leaves: &mut Vec<&'p LogicalPlan>, conjuncts: &mut Vec<Expr>) {
    match plan {
        LogicalPlan::Join {
            left,
            right,
            kind,
            condition,
        } if kind.is_reorderable() => {
            collect_region(left, leaves, conjuncts);
            collect_region(right, leaves, conjuncts);
            if let Some(c) = condition {
                conjuncts.extend(c.clone().into_conjuncts());
            }
        }
        other => leaves.push(other),
    }
}

/// Equality conjuncts with one side over the left input and the other over
/// the right, of comparable types. Right keys are rebased onto the right input.
fn equi_keys(conjuncts: &[BoundExpr], lwidth: usize) -> Vec<EquiKey> {
    let mut keys = Vec::new();
    for (i, c) in conjuncts.iter().enumerate() {
        let BoundExpr::Binary {
            op: crate::ast::BinaryOp::Eq,
            left,
            right,
        } = c
        else {
            continue;
        };
        let side = |e: &BoundExpr| {
            let cols = e.columns();
            if cols.is_empty() {
                None
            } else if cols.iter().all(|&c| c < lwidth) {
                Some(JoinSide::Left)
            } else if cols.iter().all(|&c| c >= lwidth) {
                Some(JoinSide::Right)
            } else {
                None
            }
        };
        let comparable = match (left.data_type(), right.data_type()) {
            (Some(a), Some(b)) => a.is_comparable_with(b),
            _ => false,
        };
        if !comparable {
            continue;
        }
        let rebase = |e: &BoundExpr| e.remap(&|c| c - lwidth);
        match (side(left), side(right)) {
            (Some(JoinSide::Left), Some(JoinSide::Right)) => keys.push(EquiKey {
                left: (**left).clone(),
                right: rebase(right),
                conjunct: i,
            }),
            (Some(JoinSide::Right), Some(JoinSide::Left)) => keys.push(EquiKey {
                left: (**right).clone(),
                right: rebase(left),
                conjunct: i,
            }),
            _ => {}
        }
    }
    keys
}

/// Output rows of a join given the selectivity of its whole condition.
fn join_rows(kind: JoinKind, left: f64, right: f64, selectivity: f64) -> f64 {
    let inner = estimate_join_cardinality(left, right, selectivity);
    match kind {
        JoinKind::Inner | JoinKind::Cross => inner,
        JoinKind::Left => inner.max(left),
        JoinKind::Right => inner.max(right),
        JoinKind::Full => {
            // unclamped overlap, so disjoint inputs add up
            let matched = left * right * selectivity;
            (left.max(matched) + right.max(matched) - matched).max(inner)
        }
        JoinKind::Semi | JoinKind::Anti => {
            let matched = (selectivity * right).min(1.0);
            let fraction = if kind == JoinKind::Semi {
                matched
            } else {
                1.0 - matched
            };
            if left <= 0.0 {
                0.0
            } else {
                (left * fraction).max(1.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit, AggregateExpr, SortKey};
    use tern_core::schema::TableBuilder;
    use tern_core::Value;
    use tern_storage::Catalog;

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        let manufacturers = TableBuilder::new("manufacturers")
            .unwrap()
            .add_column("manufacturer_id", DataType::Integer)
            .unwrap()
            .add_column("name", DataType::Text)
            .unwrap()
            .add_primary_key(&["manufacturer_id"])
            .unwrap()
            .build()
            .unwrap();
        let products = TableBuilder::new("products")
            .unwrap()
            .add_column("product_id", DataType::Integer)
            .unwrap()
            .add_column("manufacturer_id", DataType::Integer)
            .unwrap()
            .add_column("price", DataType::Decimal)
            .unwrap()
            .add_primary_key(&["product_id"])
            .unwrap()
            .add_index("idx_products_manufacturer", &["manufacturer_id"], false)
            .unwrap()
            .build()
            .unwrap();
        catalog.register_table(manufacturers).unwrap();
        catalog.register_table(products).unwrap();
        for m in 0..20 {
            catalog
                .insert(
                    "manufacturers",
                    vec![Value::Integer(m), Value::Text(format!("m{}", m))],
                )
                .unwrap();
        }
        for p in 0..2000 {
            catalog
                .insert(
                    "products",
                    vec![
                        Value::Integer(p),
                        Value::Integer(p % 20),
                        Value::Decimal((p % 100) as f64),
                    ],
                )
                .unwrap();
        }
        catalog.analyze_all().unwrap();
        catalog
    }

    fn plan(catalog: &Catalog, logical: &LogicalPlan) -> QueryResult<PhysicalPlan> {
        QueryPlanner::default().plan(logical, &catalog.snapshot())
    }

    fn find<'a>(plan: &'a PhysicalPlan, kind: &str) -> Option<&'a PhysicalPlan> {
        if plan.kind() == kind {
            return Some(plan);
        }
        plan.children().into_iter().find_map(|c| find(c, kind))
    }

    #[test]
    fn test_point_lookup_uses_primary_key() {
        let catalog = catalog();
        let logical = LogicalPlan::scan("products").filter(col("product_id").eq(lit(7)));
        let physical = plan(&catalog, &logical).unwrap();
        assert_eq!(physical.kind(), "IndexScan");
        assert_eq!(physical.id, 0);
    }

    #[test]
    fn test_equi_join_avoids_plain_nested_loop() {
        let catalog = catalog();
        let logical = LogicalPlan::scan_as("products", "p").inner_join(
            LogicalPlan::scan_as("manufacturers", "m"),
            col("p.manufacturer_id").eq(col("m.manufacturer_id")),
        );
        let physical = plan(&catalog, &logical).unwrap();
        assert_eq!(physical.schema.len(), 5);
        assert_eq!(physical.schema.field(0).unwrap().to_string(), "p.product_id");
        let join = ["HashJoin", "MergeJoin", "NestedLoopJoin"]
            .iter()
            .find_map(|k| find(&physical, k))
            .unwrap();
        if let PhysicalNode::NestedLoopJoin { right, .. } = &join.node {
            assert_eq!(right.kind(), "IndexScan");
        }
    }

    #[test]
    fn test_sort_elided_over_index_order() {
        let catalog = catalog();
        let logical = LogicalPlan::scan("products")
            .filter(col("product_id").lt(lit(10)))
            .sort(vec![SortKey::asc(col("product_id"))]);
        let physical = plan(&catalog, &logical).unwrap();
        assert!(find(&physical, "Sort").is_none());
    }

    #[test]
    fn test_group_aggregate_over_grouped_input() {
        let catalog = catalog();
        let logical = LogicalPlan::scan("products")
            .filter(col("product_id").lt(lit(10)))
            .aggregate(
                vec![col("product_id")],
                vec![AggregateExpr::count_star("n")],
                None,
            );
        let physical = plan(&catalog, &logical).unwrap();
        assert_eq!(physical.kind(), "GroupAggregate");

        let logical = LogicalPlan::scan("products").aggregate(
            vec![col("manufacturer_id")],
            vec![AggregateExpr::sum(col("price"), "total")],
            None,
        );
        let physical = plan(&catalog, &logical).unwrap();
        assert_eq!(physical.kind(), "HashAggregate");
        assert_eq!(physical.estimate.rows, 20.0);
    }

    #[test]
    fn test_planning_is_deterministic() {
        let catalog = catalog();
        let logical = LogicalPlan::scan_as("products", "p")
            .inner_join(
                LogicalPlan::scan_as("manufacturers", "m"),
                col("p.manufacturer_id").eq(col("m.manufacturer_id")),
            )
            .filter(col("p.price").gt(lit(50)))
            .sort(vec![SortKey::desc(col("p.price"))]);
        let a = plan(&catalog, &logical).unwrap();
        let b = plan(&catalog, &logical).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_planning_errors() {
        let catalog = catalog();
        let unknown = LogicalPlan::scan("nope");
        assert!(matches!(plan(&catalog, &unknown), Err(QueryError::Schema(_))));

        let bad_type = LogicalPlan::scan("products").filter(col("price").add(lit("x")).gt(lit(1)));
        assert!(matches!(plan(&catalog, &bad_type), Err(QueryError::Type(_))));

        let set_op = LogicalPlan::scan("products").union(LogicalPlan::scan("manufacturers"));
        assert!(matches!(plan(&catalog, &set_op), Err(QueryError::Type(_))));
    }

    #[test]
    fn test_join_region_size_limit() {
        let catalog = catalog();
        let wide = |n: usize| {
            (1..n).fold(LogicalPlan::scan_as("manufacturers", "m0"), |acc, i| {
                acc.cross_join(LogicalPlan::scan_as("manufacturers", format!("m{}", i)))
            })
        };
        assert!(matches!(
            plan(&catalog, &wide(MAX_JOIN_LEAVES + 1)),
            Err(QueryError::Unsupported(_))
        ));
        let single = plan(&catalog, &wide(1)).unwrap();
        let physical = plan(&catalog, &wide(4)).unwrap();
        assert_eq!(physical.schema.len(), 4 * single.schema.len());
    }

    #[test]
    fn test_join_rows_by_kind() {
        assert_eq!(join_rows(JoinKind::Inner, 100.0, 10.0, 0.1), 100.0);
        assert_eq!(join_rows(JoinKind::Left, 100.0, 10.0, 0.001), 100.0);
        assert_eq!(join_rows(JoinKind::Full, 10.0, 10.0, 0.0), 20.0);
        assert_eq!(join_rows(JoinKind::Full, 100.0, 10.0, 0.1), 100.0);
        assert_eq!(join_rows(JoinKind::Full, 0.0, 0.0, 0.5), 0.0);
        assert_eq!(join_rows(JoinKind::Anti, 0.0, 10.0, 0.5), 0.0);
    }
}
