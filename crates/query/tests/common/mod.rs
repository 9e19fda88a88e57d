//! Shared sample catalog: a small shop with manufacturers, a self-referencing
//! category tree, products, orders and order lines.

#![allow(dead_code)]

use tern_core::schema::TableBuilder;
use tern_core::{DataType, Row, Value};
use tern_query::planner::{LogicalPlan, PhysicalPlan, QueryPlanner};
use tern_query::{execute, QueryResult};
use tern_storage::{Catalog, CatalogSnapshot};

pub const DAY_MS: i64 = 86_400_000;
pub const EPOCH_2024: i64 = 1_704_067_200_000;

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn int(i: i64) -> Value {
    Value::Integer(i)
}

fn dec(d: f64) -> Value {
    Value::Decimal(d)
}

fn opt_int(i: Option<i64>) -> Value {
    i.map_or(Value::Null, Value::Integer)
}

/// Builds and analyzes the sample catalog.
pub fn shop() -> Catalog {
    let mut catalog = shop_unanalyzed();
    catalog.analyze_all().unwrap();
    catalog
}

/// The sample catalog without statistics.
pub fn shop_unanalyzed() -> Catalog {
    let mut catalog = Catalog::new();

    let manufacturers = TableBuilder::new("manufacturers")
        .unwrap()
        .add_column("manufacturer_id", DataType::Integer)
        .unwrap()
        .add_column("name", DataType::Text)
        .unwrap()
        .add_column("country", DataType::Text)
        .unwrap()
        .add_column("founded_year", DataType::Integer)
        .unwrap()
        .add_nullable(&["founded_year"])
        .add_primary_key(&["manufacturer_id"])
        .unwrap()
        .build()
        .unwrap();

    let categories = TableBuilder::new("categories")
        .unwrap()
        .add_column("category_id", DataType::Integer)
        .unwrap()
        .add_column("name", DataType::Text)
        .unwrap()
        .add_column("parent_category_id", DataType::Integer)
        .unwrap()
        .add_nullable(&["parent_category_id"])
        .add_primary_key(&["category_id"])
        .unwrap()
        .add_index("idx_categories_name", &["name"], true)
        .unwrap()
        .build()
        .unwrap();

    let products = TableBuilder::new("products")
        .unwrap()
        .add_column("product_id", DataType::Integer)
        .unwrap()
        .add_column("name", DataType::Text)
        .unwrap()
        .add_column("sku", DataType::Text)
        .unwrap()
        .add_column("price", DataType::Decimal)
        .unwrap()
        .add_column("quantity_in_stock", DataType::Integer)
        .unwrap()
        .add_column("manufacturer_id", DataType::Integer)
        .unwrap()
        .add_column("category_id", DataType::Integer)
        .unwrap()
        .add_column("is_active", DataType::Boolean)
        .unwrap()
        .add_nullable(&["manufacturer_id"])
        .add_primary_key(&["product_id"])
        .unwrap()
        .add_hash_index("idx_products_sku", &["sku"], true)
        .unwrap()
        .add_index("idx_products_manufacturer", &["manufacturer_id"], false)
        .unwrap()
        .add_index("idx_products_price", &["price"], false)
        .unwrap()
        .build()
        .unwrap();

    let orders = TableBuilder::new("orders")
        .unwrap()
        .add_column("order_id", DataType::Integer)
        .unwrap()
        .add_column("customer_name", DataType::Text)
        .unwrap()
        .add_column("status", DataType::Text)
        .unwrap()
        .add_column("order_date", DataType::Timestamp)
        .unwrap()
        .add_column("total_amount", DataType::Decimal)
        .unwrap()
        .add_nullable(&["total_amount"])
        .add_primary_key(&["order_id"])
        .unwrap()
        .add_index("idx_orders_status", &["status"], false)
        .unwrap()
        .build()
        .unwrap();

    let order_items = TableBuilder::new("order_items")
        .unwrap()
        .add_column("order_item_id", DataType::Integer)
        .unwrap()
        .add_column("order_id", DataType::Integer)
        .unwrap()
        .add_column("product_id", DataType::Integer)
        .unwrap()
        .add_column("quantity", DataType::Integer)
        .unwrap()
        .add_column("unit_price", DataType::Decimal)
        .unwrap()
        .add_column("discount_percent", DataType::Decimal)
        .unwrap()
        .add_primary_key(&["order_item_id"])
        .unwrap()
        .add_index("idx_items_order", &["order_id"], false)
        .unwrap()
        .add_index("idx_items_product", &["product_id"], false)
        .unwrap()
        .build()
        .unwrap();

    for table in [manufacturers, categories, products, orders, order_items] {
        catalog.register_table(table).unwrap();
    }

    let makers: [(i64, &str, &str, Option<i64>); 6] = [
        (1, "TechCorp Industries", "USA", Some(1985)),
        (2, "EuroElectronics GmbH", "Germany", Some(1992)),
        (3, "AsiaManufacturing Ltd", "Japan", Some(1978)),
        (4, "Nordic Components", "Sweden", Some(2001)),
        (5, "Pacific Goods Co", "Australia", Some(2010)),
        (6, "Idle Works", "Norway", None),
    ];
    for (id, name, country, year) in makers {
        catalog
            .insert(
                "manufacturers",
                vec![int(id), text(name), text(country), opt_int(year)],
            )
            .unwrap();
    }

    let tree: [(i64, &str, Option<i64>); 6] = [
        (1, "Electronics", None),
        (2, "Computers", Some(1)),
        (3, "Peripherals", Some(1)),
        (4, "Audio", Some(1)),
        (5, "Home & Garden", None),
        (6, "Furniture", None),
    ];
    for (id, name, parent) in tree {
        catalog
            .insert("categories", vec![int(id), text(name), opt_int(parent)])
            .unwrap();
    }

    let items: [(i64, &str, &str, f64, i64, Option<i64>, i64); 11] = [
        (1, "Pro Laptop 15\"", "TECH-LAP-001", 1299.99, 45, Some(1), 2),
        (2, "Wireless Mouse", "TECH-MOU-001", 49.99, 200, Some(1), 3),
        (3, "Mechanical Keyboard", "EURO-KEY-001", 159.99, 75, Some(2), 3),
        (4, "Studio Headphones", "ASIA-AUD-001", 299.99, 30, Some(3), 4),
        (5, "USB-C Hub", "ASIA-HUB-001", 79.99, 150, Some(3), 3),
        (6, "Standing Desk", "NORD-DSK-001", 599.99, 20, Some(4), 6),
        (7, "Monitor Arm", "NORD-ARM-001", 129.99, 60, Some(4), 3),
        (8, "Webcam 4K", "TECH-CAM-001", 199.99, 85, Some(1), 3),
        (9, "Bluetooth Speaker", "PACI-SPK-001", 89.99, 0, Some(5), 4),
        (10, "Budget Mouse", "PACI-MOU-001", 9.99, 500, Some(5), 3),
        (11, "Orphan Product", "ORPH-001", 19.99, 10, None, 3),
    ];
    for (id, name, sku, price, stock, maker, category) in items {
        catalog
            .insert(
                "products",
                vec![
                    int(id),
                    text(name),
                    text(sku),
                    dec(price),
                    int(stock),
                    opt_int(maker),
                    int(category),
                    Value::Boolean(stock > 0),
                ],
            )
            .unwrap();
    }

    // (order, customer, status, day, lines of (product, quantity, unit price, discount))
    let orders: [(i64, &str, &str, i64, &[(i64, i64, f64, f64)]); 5] = [
        (
            1,
            "Alice Johnson",
            "delivered",
            3,
            &[(1, 1, 1299.99, 0.0), (2, 1, 49.99, 0.0), (3, 1, 159.99, 0.0)],
        ),
        (2, "Bob Smith", "shipped", 10, &[(4, 1, 299.99, 0.0), (5, 1, 79.99, 10.0)]),
        (3, "Carol White", "processing", 21, &[(6, 1, 599.99, 0.0)]),
        (4, "David Brown", "pending", 30, &[(3, 1, 159.99, 0.0), (10, 2, 9.99, 0.0)]),
        (5, "Eve Davis", "cancelled", 45, &[(4, 1, 299.99, 0.0)]),
    ];
    let mut line_id = 0;
    for (id, customer, status, day, lines) in orders {
        let total: f64 = lines
            .iter()
            .map(|(_, q, p, d)| *q as f64 * p * (1.0 - d / 100.0))
            .sum();
        catalog
            .insert(
                "orders",
                vec![
                    int(id),
                    text(customer),
                    text(status),
                    Value::Timestamp(EPOCH_2024 + day * DAY_MS),
                    dec(total),
                ],
            )
            .unwrap();
        for (product, quantity, price, discount) in lines {
            line_id += 1;
            catalog
                .insert(
                    "order_items",
                    vec![
                        int(line_id),
                        int(id),
                        int(*product),
                        int(*quantity),
                        dec(*price),
                        dec(*discount),
                    ],
                )
                .unwrap();
        }
    }

    catalog
}

/// Plans with the default configuration.
pub fn plan(snapshot: &CatalogSnapshot, logical: &LogicalPlan) -> PhysicalPlan {
    QueryPlanner::default().plan(logical, snapshot).unwrap()
}

/// Plans and executes, returning the output values.
pub fn run(snapshot: &CatalogSnapshot, logical: &LogicalPlan) -> Vec<Vec<Value>> {
    try_run(snapshot, logical).unwrap()
}

pub fn try_run(snapshot: &CatalogSnapshot, logical: &LogicalPlan) -> QueryResult<Vec<Vec<Value>>> {
    let physical = QueryPlanner::default().plan(logical, snapshot)?;
    let rows = execute(&physical, snapshot)?.collect_rows()?;
    Ok(rows.into_iter().map(Row::into_values).collect())
}

/// First node of `kind` in pre-order.
pub fn find<'a>(plan: &'a PhysicalPlan, kind: &str) -> Option<&'a PhysicalPlan> {
    if plan.kind() == kind {
        return Some(plan);
    }
    plan.children().into_iter().find_map(|c| find(c, kind))
}

/// Every node kind in pre-order, subqueries excluded.
pub fn kinds(plan: &PhysicalPlan) -> Vec<&'static str> {
    let mut out = vec![plan.kind()];
    for child in plan.children() {
        out.extend(kinds(child));
    }
    out
}

pub fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.sort();
    rows
}
