//! Benchmarks for RowStore mutation and lookup paths.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use tern_core::schema::{Table, TableBuilder};
use tern_core::{DataType, Value};
use tern_index::KeyRange;
use tern_storage::{Catalog, RowStore, TableStatistics, DEFAULT_HISTOGRAM_BUCKETS};

fn order_items_schema() -> Table {
    TableBuilder::new("order_items")
        .unwrap()
        .add_column("item_id", DataType::Integer)
        .unwrap()
        .add_column("order_id", DataType::Integer)
        .unwrap()
        .add_column("product_id", DataType::Integer)
        .unwrap()
        .add_column("unit_price", DataType::Decimal)
        .unwrap()
        .add_primary_key(&["item_id"])
        .unwrap()
        .add_index("idx_items_order", &["order_id"], false)
        .unwrap()
        .add_hash_index("idx_items_product", &["product_id"], false)
        .unwrap()
        .build()
        .unwrap()
}

fn item(i: i64) -> Vec<Value> {
    vec![
        Value::Integer(i),
        Value::Integer(i / 4),
        Value::Integer(i % 50),
        Value::Decimal(10.0 + (i % 97) as f64),
    ]
}

fn populate(count: i64) -> RowStore {
    let mut store = RowStore::new(order_items_schema()).unwrap();
    for i in 0..count {
        store.insert(item(i)).unwrap();
    }
    store
}

fn insert_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_store_insert");
    for count in [1_000i64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(populate(count)));
        });
    }
    group.finish();
}

fn lookup_benchmark(c: &mut Criterion) {
    let store = populate(20_000);
    let mut group = c.benchmark_group("row_store_lookup");

    group.bench_function("ordered_point", |b| {
        let range = KeyRange::only(vec![Value::Integer(1234)]);
        b.iter(|| black_box(store.lookup("idx_items_order", &range).unwrap()));
    });
    group.bench_function("ordered_range", |b| {
        let range = KeyRange::bound(vec![Value::Integer(100)], vec![Value::Integer(600)], false, true);
        b.iter(|| black_box(store.lookup("idx_items_order", &range).unwrap()));
    });
    group.bench_function("hash_point", |b| {
        let range = KeyRange::only(vec![Value::Integer(7)]);
        b.iter(|| black_box(store.lookup("idx_items_product", &range).unwrap()));
    });
    group.finish();
}

fn delete_benchmark(c: &mut Criterion) {
    c.bench_function("row_store_delete_1000", |b| {
        b.iter_batched(
            || populate(10_000),
            |mut store| {
                for id in 0..1_000 {
                    let _ = store.delete(id);
                }
                black_box(store)
            },
            BatchSize::SmallInput,
        );
    });
}

fn analyze_benchmark(c: &mut Criterion) {
    let store = populate(20_000);
    c.bench_function("analyze_20000", |b| {
        b.iter(|| black_box(TableStatistics::analyze(&store, DEFAULT_HISTOGRAM_BUCKETS)));
    });
}

fn snapshot_benchmark(c: &mut Criterion) {
    let mut catalog = Catalog::new();
    catalog.register_table(order_items_schema()).unwrap();
    catalog
        .insert_many("order_items", (0..20_000).map(item).collect())
        .unwrap();
    c.bench_function("catalog_snapshot", |b| b.iter(|| black_box(catalog.snapshot())));
}

criterion_group!(
    benches,
    insert_benchmark,
    lookup_benchmark,
    delete_benchmark,
    analyze_benchmark,
    snapshot_benchmark
);
criterion_main!(benches);
