//! 로깅 시스템 사용 예제
//!
//! 실행: RUST_LOG=debug cargo run --example logging --features logging

use dimx_core::{
    BackingStore, BulkLoader, CacheConfig, Dimension, DimensionTable, MemoryStore, StagingConfig,
    row,
};
use std::sync::Arc;

fn main() -> dimx_core::DimxResult<()> {
    // 로깅 초기화
    dimx_core::logging::init();

    println!("=== DimX 로깅 예제 ===\n");
    println!("환경 변수 RUST_LOG로 로그 레벨 조정 가능:");
    println!("  RUST_LOG=trace  - 실행되는 statement 포함");
    println!("  RUST_LOG=debug  - 삽입, 버전, flush");
    println!("  RUST_LOG=info   - prefill, bulk 적재 (기본값)\n");

    let store = Arc::new(MemoryStore::new());
    let loader_store = store.clone();
    let mut book = DimensionTable::builder(store.clone(), "book", "bookid", ["name", "genre"])
        .lookupatts(["name"])
        .cache(CacheConfig::default())
        .staging(StagingConfig::default().with_batch_size(2))
        .bulk_loader(BulkLoader::new(move |load| {
            loader_store.bulk_load(load).map(|_| ())
        }))
        .build()?;

    println!("멤버 적재 중...");
    for (name, genre) in [("Sushi", "Cookbook"), ("Dune", "Novel"), ("Emma", "Novel")] {
        let key = book.ensure(&row! { "name" => name, "genre" => genre })?;
        println!("  {name} → {key}");
    }

    println!("\nendload 및 commit...");
    book.end_load()?;
    store.commit()?;
    println!("적재된 행: {}", store.row_count("book"));

    println!("\n=== 예제 완료 ===");
    println!("\n주의: logging feature가 활성화되어야 로그가 출력됩니다.");
    Ok(())
}
