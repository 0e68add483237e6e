//! Record format benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use bale_record::{ManagedRecord, RecordId, RecordStore, RecordType};

fn build_tree(store: &mut RecordStore, fanout: usize) -> RecordId {
    let tag = RecordType::new(5).unwrap();
    let root = store.create(tag, 16).unwrap();
    let shared = store.create_literal_array(&[1, 2, 3, 4]).unwrap();
    for i in 0..fanout {
        let child = store.create(tag, 8).unwrap();
        store.view_mut(child).unwrap().write_uint(0, 4, i as u32).unwrap();
        store.add_sub(root, child).unwrap();
        if i == 0 {
            store.add_sub(child, shared).unwrap();
        } else {
            store.add_alias(child, shared).unwrap();
        }
    }
    root
}

fn field_write_benchmark(c: &mut Criterion) {
    let mut store = RecordStore::new();
    let id = store.create(RecordType::new(1).unwrap(), 64).unwrap();
    store.set_versioning(id, true).unwrap();

    c.bench_function("field_write_64", |b| {
        b.iter(|| {
            for offset in (0..64).step_by(4) {
                store.view_mut(id).unwrap().write_uint(offset, 4, 0xDEAD_BEEF).unwrap();
            }
            black_box(store.version(id).unwrap())
        })
    });
}

fn serialize_benchmark(c: &mut Criterion) {
    let mut store = RecordStore::new();
    let root = build_tree(&mut store, 100);

    c.bench_function("serialize_100_shared", |b| {
        b.iter(|| black_box(store.serialize(root).unwrap().len()))
    });
}

fn deserialize_benchmark(c: &mut Criterion) {
    let mut source = RecordStore::new();
    let root = build_tree(&mut source, 100);
    let bytes = source.serialize(root).unwrap();

    c.bench_function("deserialize_100_shared", |b| {
        b.iter(|| {
            let mut store = RecordStore::new();
            black_box(store.deserialize(&bytes).unwrap())
        })
    });
}

fn managed_growth_benchmark(c: &mut Criterion) {
    c.bench_function("managed_expand_data_1000", |b| {
        b.iter(|| {
            let mut record = ManagedRecord::builder(RecordType::new(2).unwrap())
                .slack(64)
                .build()
                .unwrap();
            for _ in 0..1000 {
                record.expand_data(4).unwrap();
            }
            black_box(record.bytes().len())
        })
    });
}

criterion_group!(
    benches,
    field_write_benchmark,
    serialize_benchmark,
    deserialize_benchmark,
    managed_growth_benchmark
);
criterion_main!(benches);
