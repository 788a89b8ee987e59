//! Performance benchmarks for loopsync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loopsync_engine::{
    fields, Domain, MemoryStore, ObjectKey, Replica, SchemaRegistry, StoreSnapshot, SyncableObject,
};
use std::sync::Arc;

fn replica() -> Replica {
    Replica::new(
        SchemaRegistry::with_schema(Domain::Bookmark.schema()),
        Arc::new(MemoryStore::new()),
    )
}

fn bookmark(id: u64, version: u64) -> SyncableObject {
    SyncableObject::new(
        "bookmark",
        format!("bookmark_{id}"),
        fields! {
            "url" => format!("https://example.com/{id}"),
            "title" => "Example",
            "isFavorite" => id % 3 == 0,
        },
        1000 + id,
    )
    .with_revision(version, 1000 + id)
}

fn populated(size: u64) -> Replica {
    let replica = replica();
    for i in 0..size {
        replica.apply(bookmark(i, 1)).unwrap();
    }
    replica
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");

    group.bench_function("insert", |b| {
        let replica = replica();
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            replica.apply(black_box(bookmark(id, 1)))
        })
    });

    group.bench_function("replace", |b| {
        let replica = populated(1000);
        let mut version = 1u64;
        b.iter(|| {
            version += 1;
            replica.apply(black_box(bookmark(500, version)))
        })
    });

    group.bench_function("duplicate", |b| {
        let replica = populated(1000);
        let obj = bookmark(500, 1);
        b.iter(|| replica.apply(black_box(obj.clone())))
    });

    group.bench_function("get", |b| {
        let replica = populated(1000);
        let key = ObjectKey::new("bookmark", "bookmark_500");
        b.iter(|| replica.get(black_box(&key)))
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100u64, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("replica", size), size, |b, &size| {
            let replica = populated(size);
            b.iter(|| replica.snapshot(black_box("bookmark")))
        });

        group.bench_with_input(BenchmarkId::new("reconcile", size), size, |b, &size| {
            let source = populated(size).snapshot("bookmark").unwrap();
            b.iter(|| {
                let target = replica();
                for obj in source.iter().cloned() {
                    target.apply(obj).unwrap();
                }
                target
            })
        });

        group.bench_with_input(BenchmarkId::new("to_json", size), size, |b, &size| {
            let snapshot: StoreSnapshot = (0..size).map(|i| bookmark(i, 1)).collect();
            b.iter(|| black_box(&snapshot).to_json())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_apply, bench_snapshot);
criterion_main!(benches);
