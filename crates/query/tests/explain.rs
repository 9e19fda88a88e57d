//! EXPLAIN and EXPLAIN ANALYZE over the sample shop catalog.

mod common;

use std::time::Duration;

use common::{plan, shop};
use tern_query::ast::{col, lit, AggregateExpr, Expr, SortKey};
use tern_query::planner::LogicalPlan;
use tern_query::{execute, explain, explain_analyze, ExplainNode};

fn report_query() -> LogicalPlan {
    LogicalPlan::scan_as("manufacturers", "m")
        .left_join(
            LogicalPlan::scan_as("products", "p"),
            col("m.manufacturer_id").eq(col("p.manufacturer_id")),
        )
        .aggregate(
            vec![col("m.name")],
            vec![AggregateExpr::count(col("p.product_id"), "products")],
            None,
        )
        .sort(vec![SortKey::desc(col("products"))])
}

fn shape(node: &ExplainNode) -> Vec<(String, usize)> {
    let mut out = vec![(node.kind.clone(), node.children.len())];
    for child in &node.children {
        out.extend(shape(child));
    }
    out
}

#[test]
fn test_explain_mirrors_plan() {
    let snapshot = shop().snapshot();
    let physical = plan(&snapshot, &report_query());
    let description = explain(&physical);
    assert_eq!(description.kind, physical.kind());
    assert_eq!(description.nodes().len(), physical.node_count());
    assert!(description.nodes().iter().all(|n| n.actual.is_none()));
    assert!(description.total_cost >= description.startup_cost);
    assert_eq!(description.estimated_rows, physical.estimate.rows);
}

#[test]
fn test_analyze_counts_match_execution() {
    let snapshot = shop().snapshot();
    let physical = plan(&snapshot, &report_query());
    let produced = execute(&physical, &snapshot).unwrap().collect_rows().unwrap();
    let analyzed = explain_analyze(&physical, &snapshot).unwrap();

    let root = analyzed.actual.expect("root metrics");
    assert_eq!(root.rows, produced.len() as u64);
    assert_eq!(root.loops, 1);
    assert_eq!(shape(&analyzed), shape(&explain(&physical)));
    assert!(analyzed.nodes().iter().all(|n| n.actual.is_some()));

    // a parent never takes less time than its children together
    for node in analyzed.nodes() {
        let own = node.actual.unwrap().elapsed;
        let children: Duration = node
            .children
            .iter()
            .filter_map(|c| c.actual)
            .map(|a| a.elapsed)
            .sum();
        assert!(own >= children, "{} faster than its children", node.kind);
    }
}

#[test]
fn test_scalar_subquery_is_init_plan() {
    let snapshot = shop().snapshot();
    let average = LogicalPlan::scan("products").aggregate(
        Vec::new(),
        vec![AggregateExpr::avg(col("price"), "avg_price")],
        None,
    );
    let query = LogicalPlan::scan("products")
        .filter(col("price").gt(Expr::scalar_subquery(average)))
        .project(vec![col("name")]);
    let physical = plan(&snapshot, &query);
    let analyzed = explain_analyze(&physical, &snapshot).unwrap();
    let init = analyzed
        .nodes()
        .into_iter()
        .find(|n| n.detail.starts_with("InitPlan"))
        .expect("init plan node");
    assert_eq!(init.actual.unwrap().rows, 1);
    assert_eq!(init.actual.unwrap().loops, 1);
    assert_eq!(analyzed.actual.unwrap().rows, 3);
}

#[test]
fn test_render_is_indented_text() {
    let snapshot = shop().snapshot();
    let query = LogicalPlan::scan("products")
        .filter(col("product_id").eq(lit(3i64)))
        .project(vec![col("name")]);
    let physical = plan(&snapshot, &query);
    let text = explain_analyze(&physical, &snapshot).unwrap().render();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), physical.node_count());
    assert!(lines[0].starts_with(physical.kind()));
    assert!(lines[0].contains("cost="));
    assert!(lines[0].contains("actual time="));
    assert!(lines[1..].iter().all(|l| l.contains("->  ")));
    let plain = explain(&physical);
    assert_eq!(plain.to_string(), plain.render());
}

#[test]
fn test_serializes_to_json_tree() {
    let snapshot = shop().snapshot();
    let physical = plan(&snapshot, &report_query());
    let json = serde_json::to_value(explain_analyze(&physical, &snapshot).unwrap()).unwrap();
    assert_eq!(json["kind"], physical.kind());
    assert!(json["estimated_rows"].is_number());
    assert!(json["actual"]["rows"].is_u64());
    assert!(json["children"].is_array());

    let plain = serde_json::to_value(explain(&physical)).unwrap();
    assert!(plain.get("actual").is_none());
}
