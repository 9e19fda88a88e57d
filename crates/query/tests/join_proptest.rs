//! Property tests: every join algorithm agrees with a naive nested loop,
//! including NULL keys and outer-join padding.

use proptest::prelude::*;
use tern_core::schema::TableBuilder;
use tern_core::{DataType, Row, Value};
use tern_query::ast::col;
use tern_query::planner::{JoinKind, LogicalPlan, PhysicalPlan, QueryPlanner};
use tern_query::{execute, PlannerConfig};
use tern_storage::{Catalog, CatalogSnapshot};

fn table(catalog: &mut Catalog, name: &str, keys: &[Option<i64>]) {
    let schema = TableBuilder::new(name)
        .unwrap()
        .add_column("id", DataType::Integer)
        .unwrap()
        .add_column("k", DataType::Integer)
        .unwrap()
        .add_nullable(&["k"])
        .add_primary_key(&["id"])
        .unwrap()
        .build()
        .unwrap();
    catalog.register_table(schema).unwrap();
    for (i, k) in keys.iter().enumerate() {
        let k = k.map_or(Value::Null, Value::Integer);
        catalog.insert(name, vec![Value::Integer(i as i64), k]).unwrap();
    }
}

fn snapshot(left: &[Option<i64>], right: &[Option<i64>]) -> CatalogSnapshot {
    let mut catalog = Catalog::new();
    table(&mut catalog, "l", left);
    table(&mut catalog, "r", right);
    catalog.analyze_all().unwrap();
    catalog.snapshot()
}

fn configs() -> Vec<(&'static str, PlannerConfig)> {
    vec![
        (
            "HashJoin",
            PlannerConfig::default()
                .with_nested_loop_threshold(0.0)
                .with_merge_row_cost(1e6)
                .with_sort_row_cost(1e6),
        ),
        (
            "MergeJoin",
            PlannerConfig::default()
                .with_nested_loop_threshold(0.0)
                .with_hash_row_cost(1e6),
        ),
        (
            "NestedLoopJoin",
            PlannerConfig::default()
                .with_nested_loop_threshold(1e9)
                .with_hash_row_cost(1e6)
                .with_merge_row_cost(1e6)
                .with_sort_row_cost(1e6),
        ),
    ]
}

fn contains(plan: &PhysicalPlan, kind: &str) -> bool {
    plan.kind() == kind || plan.children().into_iter().any(|c| contains(c, kind))
}

fn expected(kind: JoinKind, left: &[Option<i64>], right: &[Option<i64>]) -> Vec<Vec<Value>> {
    let value = |k: &Option<i64>| k.map_or(Value::Null, Value::Integer);
    let row = |i: usize, k: &Option<i64>| vec![Value::Integer(i as i64), value(k)];
    let nulls = || vec![Value::Null, Value::Null];
    let matches = |a: &Option<i64>, b: &Option<i64>| a.is_some() && a == b;
    let mut out = Vec::new();
    let mut right_matched = vec![false; right.len()];
    for (i, a) in left.iter().enumerate() {
        let mut matched = false;
        for (j, b) in right.iter().enumerate() {
            if matches(a, b) {
                matched = true;
                right_matched[j] = true;
                out.push([row(i, a), row(j, b)].concat());
            }
        }
        if !matched && kind.preserves_left() {
            out.push([row(i, a), nulls()].concat());
        }
    }
    if kind.preserves_right() {
        for (j, b) in right.iter().enumerate() {
            if !right_matched[j] {
                out.push([nulls(), row(j, b)].concat());
            }
        }
    }
    out.sort();
    out
}

fn actual(snapshot: &CatalogSnapshot, plan: &PhysicalPlan) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = execute(plan, snapshot)
        .unwrap()
        .collect_rows()
        .unwrap()
        .into_iter()
        .map(Row::into_values)
        .collect();
    rows.sort();
    rows
}

fn keys(min: usize) -> impl Strategy<Value = Vec<Option<i64>>> {
    prop::collection::vec(prop::option::weighted(0.8, 0i64..6), min..24)
}

fn join_kind() -> impl Strategy<Value = JoinKind> {
    prop_oneof![
        Just(JoinKind::Inner),
        Just(JoinKind::Left),
        Just(JoinKind::Right),
        Just(JoinKind::Full),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_join_algorithms_agree(left in keys(1), right in keys(1), kind in join_kind()) {
        let snapshot = snapshot(&left, &right);
        let query = LogicalPlan::scan("l").join(
            LogicalPlan::scan("r"),
            kind,
            Some(col("l.k").eq(col("r.k"))),
        );
        let want = expected(kind, &left, &right);
        for (algorithm, config) in configs() {
            let plan = QueryPlanner::new(config).plan(&query, &snapshot).unwrap();
            prop_assert!(contains(&plan, algorithm), "{} not chosen:\n{:?}", algorithm, plan);
            prop_assert_eq!(&actual(&snapshot, &plan), &want, "{}", algorithm);
        }
    }

    #[test]
    fn prop_semi_and_anti_partition_left(left in keys(0), right in keys(0)) {
        let snapshot = snapshot(&left, &right);
        let run = |kind| {
            let query = LogicalPlan::scan("l").join(
                LogicalPlan::scan("r"),
                kind,
                Some(col("l.k").eq(col("r.k"))),
            );
            let plan = QueryPlanner::default().plan(&query, &snapshot).unwrap();
            actual(&snapshot, &plan)
        };
        let mut both = run(JoinKind::Semi);
        both.extend(run(JoinKind::Anti));
        both.sort();
        let all: Vec<Vec<Value>> = {
            let mut rows: Vec<Vec<Value>> = left
                .iter()
                .enumerate()
                .map(|(i, k)| vec![Value::Integer(i as i64), k.map_or(Value::Null, Value::Integer)])
                .collect();
            rows.sort();
            rows
        };
        prop_assert_eq!(both, all);
    }
}
