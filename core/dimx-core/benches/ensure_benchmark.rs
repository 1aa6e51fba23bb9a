// ensure 성능 벤치마크
//
// Section 1: 캐시 유무에 따른 ensure (hit 경로)
// Section 2: 스테이징 적재 vs 직접 insert
// Section 3: type-2 scd_ensure

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use dimx_core::{
    BulkLoader, CacheConfig, Dimension, DimensionTable, MemoryStore, SlowlyChangingDimension,
    StagingConfig, VersioningConfig, row,
};
use std::sync::Arc;

const MEMBERS: i64 = 1_000;

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        "book",
        (0..MEMBERS).map(|i| row! { "bookid" => i + 1, "name" => format!("book-{i}"), "genre" => "x" }),
    );
    store
}

// ═══════════════════════════════════════════════════════════════════════════
// Section 1: ensure hit 경로
// ═══════════════════════════════════════════════════════════════════════════

fn bench_ensure_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("ensure_hit");

    let store = seeded_store();
    let mut uncached = DimensionTable::builder(store.clone(), "book", "bookid", ["name", "genre"])
        .lookupatts(["name"])
        .build()
        .unwrap();
    group.bench_function("store_only", |b| {
        let mut i = 0;
        b.iter(|| {
            let r = row! { "name" => format!("book-{}", i % MEMBERS), "genre" => "x" };
            black_box(uncached.ensure(&r).unwrap());
            i += 1;
        })
    });

    let mut cached = DimensionTable::builder(store.clone(), "book", "bookid", ["name", "genre"])
        .lookupatts(["name"])
        .cache(CacheConfig::unbounded().with_prefill(true))
        .build()
        .unwrap();
    group.bench_function("prefilled_cache", |b| {
        let mut i = 0;
        b.iter(|| {
            let r = row! { "name" => format!("book-{}", i % MEMBERS), "genre" => "x" };
            black_box(cached.ensure(&r).unwrap());
            i += 1;
        })
    });

    group.finish();
}

// ═══════════════════════════════════════════════════════════════════════════
// Section 2: 스테이징 vs 직접 insert
// ═══════════════════════════════════════════════════════════════════════════

fn bench_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_1000");

    group.bench_function("direct", |b| {
        b.iter_batched(
            || {
                let store = Arc::new(MemoryStore::new());
                DimensionTable::builder(store, "book", "bookid", ["name", "genre"])
                    .cache(CacheConfig::default())
                    .build()
                    .unwrap()
            },
            |mut table| {
                for i in 0..MEMBERS {
                    table
                        .insert(&row! { "name" => format!("book-{i}"), "genre" => "x" })
                        .unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("staged", |b| {
        b.iter_batched(
            || {
                let store = Arc::new(MemoryStore::new());
                let loader_store = store.clone();
                DimensionTable::builder(store, "book", "bookid", ["name", "genre"])
                    .staging(StagingConfig::default().with_batch_size(250))
                    .bulk_loader(BulkLoader::new(move |load| {
                        loader_store.bulk_load(load).map(|_| ())
                    }))
                    .build()
                    .unwrap()
            },
            |mut table| {
                for i in 0..MEMBERS {
                    table
                        .insert(&row! { "name" => format!("book-{i}"), "genre" => "x" })
                        .unwrap();
                }
                table.end_load().unwrap();
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

// ═══════════════════════════════════════════════════════════════════════════
// Section 3: type-2 scd_ensure
// ═══════════════════════════════════════════════════════════════════════════

fn bench_scd_ensure(c: &mut Criterion) {
    let mut group = c.benchmark_group("scd_ensure");

    for (label, use_order_by) in [("order_by", true), ("scan", false)] {
        group.bench_function(label, |b| {
            b.iter_batched(
                || {
                    let store = Arc::new(MemoryStore::new());
                    let table = DimensionTable::builder(
                        store,
                        "customer",
                        "customerid",
                        ["custno", "city", "version"],
                    )
                    .lookupatts(["custno"])
                    .build()
                    .unwrap();
                    SlowlyChangingDimension::builder(
                        table,
                        VersioningConfig::new()
                            .with_version("version")
                            .with_order_by(use_order_by),
                    )
                    .build()
                    .unwrap()
                },
                |mut dim| {
                    for i in 0..200i64 {
                        let mut r = row! { "custno" => i % 20, "city" => format!("city-{}", i / 20) };
                        black_box(dim.scd_ensure(&mut r).unwrap());
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ensure_hits, bench_inserts, bench_scd_ensure);
criterion_main!(benches);
