use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tern_core::Value;
use tern_index::{HashIndex, Index, KeyRange, OrderedIndex, RangeIndex};

fn build_ordered(n: i64) -> OrderedIndex<Vec<Value>> {
    let mut index = OrderedIndex::new(false);
    for i in 0..n {
        index
            .add(vec![Value::Integer(i % 97), Value::Integer(i)], i as u64)
            .unwrap();
    }
    index
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for size in [1_000i64, 10_000] {
        group.bench_with_input(BenchmarkId::new("ordered", size), &size, |b, &size| {
            b.iter(|| black_box(build_ordered(size)))
        });
        group.bench_with_input(BenchmarkId::new("hash", size), &size, |b, &size| {
            b.iter(|| {
                let mut index = HashIndex::new(true);
                for i in 0..size {
                    index.add(vec![Value::Integer(i)], i as u64).unwrap();
                }
                black_box(index)
            })
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let index = build_ordered(10_000);
    let mut group = c.benchmark_group("lookup");
    group.bench_function("prefix_eq", |b| {
        let range = KeyRange::only(vec![Value::Integer(42)]);
        b.iter(|| black_box(index.get_range(&range, false, None)))
    });
    group.bench_function("prefix_range", |b| {
        let range = KeyRange::bound(vec![Value::Integer(10)], vec![Value::Integer(20)], false, true);
        b.iter(|| black_box(index.get_range(&range, false, None)))
    });
    group.bench_function("index_only_entries", |b| {
        let range = KeyRange::only(vec![Value::Integer(7)]);
        b.iter(|| black_box(index.entries(&range)))
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
