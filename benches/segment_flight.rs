use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kuba_olap::flight::{Claim, SingleFlightStore};
use kuba_olap::plan::{AggregateQuerySpec, GroupingSet, GroupingSetsList};
use kuba_olap::segment::{PredicateSet, Segment};
use kuba_olap::types::{Aggregator, Column, Measure, Star};
use std::sync::Arc;

fn create_segments(measures: usize, columns: usize) -> Vec<Arc<Segment>> {
    let star = Arc::new(Star::new("sales").with_link("store", "store_id", "id"));
    let columns: Vec<Arc<Column>> = (0..columns)
        .map(|i| Arc::new(Column::new("store", &format!("level_{}", i))))
        .collect();
    let measures: Vec<Arc<Measure>> = (0..measures)
        .map(|i| Arc::new(Measure::new(&format!("M{}", i), "sales", Some(&format!("f{}", i)), Aggregator::Sum)))
        .collect();
    Segment::batch(&star, &measures, &columns, &PredicateSet::unconstrained(columns.len())).unwrap()
}

fn bench_store_get_present(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_get_present");

    for size in [100u64, 1000, 10000].iter() {
        let store: SingleFlightStore<u64, u64> = SingleFlightStore::with_capacity(*size as usize);
        for key in 0..*size {
            store.put(key, key);
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut key = 0;
            b.iter(|| {
                key = (key + 1) % size;
                black_box(store.get(&key).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_store_claim_publish(c: &mut Criterion) {
    c.bench_function("store_claim_publish", |b| {
        let store: SingleFlightStore<u64, u64> = SingleFlightStore::new();
        let mut key = 0u64;
        b.iter(|| {
            key += 1;
            if let Claim::Claimed(guard) = store.try_claim(&key) {
                guard.publish(key);
            }
            black_box(store.try_get(&key))
        });
    });
}

fn bench_render_sql(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_sql");

    for measures in [1usize, 8, 32].iter() {
        let finest = create_segments(*measures, 4);
        let rollup = finest.iter().map(|s| Arc::new(s.rollup(&[0, 1]).unwrap())).collect();
        let list = GroupingSetsList::new(vec![
            GroupingSet::new(finest).unwrap(),
            GroupingSet::new(rollup).unwrap(),
        ])
        .unwrap();
        let spec = AggregateQuerySpec::new(list, None).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(measures), measures, |b, _| {
            b.iter(|| black_box(spec.to_sql().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_store_get_present,
    bench_store_claim_publish,
    bench_render_sql
);
criterion_main!(benches);
