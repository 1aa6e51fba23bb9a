//! # DimX — Dimension Tables for ETL
//!
//! DimX는 데이터 웨어하우스 적재(ETL)를 위한 차원 테이블 엔진입니다.
//! 소스 행의 자연 키(natural key)를 대리 키(surrogate key)로 변환하고,
//! 없는 멤버는 삽입하며, 변경 이력을 버전으로 관리합니다.
//!
//! ## 주요 특징
//!
//! - **Lookup / Ensure**: 자연 키 → 대리 키, 없으면 삽입
//! - **Lookup Cache**: FIFO 캐시, prefill 후 완전 캐시면 저장소 조회 생략
//! - **Bulk Staging**: 임시 파일에 모아 bulk loader로 한 번에 적재
//! - **Slowly Changing Dimensions**: type-1 덮어쓰기, type-2 버전 관리
//! - **Snowflake**: 외래 키로 연결된 차원 테이블 트리
//!
//! ## 빠른 시작
//!
//! ```rust
//! use std::sync::Arc;
//! use dimx_core::{BackingStore, CacheConfig, Dimension, DimensionTable, MemoryStore, row};
//!
//! # fn main() -> dimx_core::DimxResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let mut book = DimensionTable::builder(store.clone(), "book", "bookid", ["name", "genre"])
//!     .lookupatts(["name"])
//!     .cache(CacheConfig::default())
//!     .build()?;
//!
//! let key = book.ensure(&row! { "name" => "Sushi", "genre" => "Cookbook" })?;
//! assert_eq!(book.lookup(&row! { "name" => "Sushi" })?, Some(key));
//!
//! book.end_load()?;
//! store.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## 모듈 구조
//!
//! - [`row`] — 값, 행, 자연 키
//! - [`schema`] — 테이블 정의
//! - [`store`] — 저장소 추상화 ([`BackingStore`]) 및 [`MemoryStore`]
//! - [`cache`] — 조회 캐시
//! - [`staging`] — bulk 적재용 스테이징
//! - [`dimension`] — [`Dimension`] 트레이트와 [`DimensionTable`]
//! - [`scd`] — slowly changing dimensions
//! - [`snowflake`] — [`SnowflakedDimension`]
//! - [`config`] — 설정 (JSON 직렬화 가능)

pub mod cache;
pub mod config;
pub mod dimension;
pub mod error;
pub mod row;
pub mod scd;
pub mod schema;
pub mod snowflake;
pub mod staging;
pub mod store;

// Logging utilities
pub mod logging;

// ===== Re-exports =====
pub use config::{CacheConfig, DimensionConfig, StagingConfig, Type1Scope, VersioningConfig};
pub use dimension::{Dimension, DimensionTable, DimensionTableBuilder, KeyGenerator};
pub use error::{DimxError, DimxResult};
pub use row::{NaturalKey, Row, Value};
pub use scd::{SlowlyChangingDimension, TypeOneDimension};
pub use schema::{Quote, TableSchema};
pub use snowflake::SnowflakedDimension;
pub use staging::{BulkLoad, BulkLoader, StagedFile};
pub use store::{BackingStore, MemoryStore, ResultSet, Statement};
