// Snowflake 통합 테스트
//
// product → category → price 체인에서 삽입 순서와 키 전파를 검증

use dimx_core::{
    BackingStore, CacheConfig, Dimension, DimensionTable, DimxResult, MemoryStore, ResultSet, Row,
    SnowflakedDimension, Statement, Value, row,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Store that records the table of every insert before delegating.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryStore,
    inserts: Mutex<Vec<String>>,
}

impl BackingStore for RecordingStore {
    fn execute(&self, statement: &Statement, params: &Row) -> DimxResult<ResultSet> {
        if let Statement::Insert { table, .. } = statement {
            self.inserts.lock().push(table.clone());
        }
        self.inner.execute(statement, params)
    }

    fn commit(&self) -> DimxResult<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> DimxResult<()> {
        self.inner.rollback()
    }
}

fn level(
    store: &Arc<RecordingStore>,
    name: &str,
    key: &str,
    attributes: &[&str],
    lookupatts: &[&str],
) -> DimxResult<Box<dyn Dimension>> {
    let table = DimensionTable::builder(store.clone(), name, key, attributes.iter().copied())
        .lookupatts(lookupatts.iter().copied())
        .cache(CacheConfig::default())
        .build()?;
    Ok(Box::new(table))
}

fn product(store: &Arc<RecordingStore>) -> DimxResult<SnowflakedDimension> {
    SnowflakedDimension::new(
        vec![
            level(store, "product", "productid", &["name", "categoryid"], &["name"])?,
            level(store, "category", "categoryid", &["category", "priceid"], &["category"])?,
            level(store, "price", "priceid", &["price"], &["price"])?,
        ],
        &[("product", "category"), ("category", "price")],
        false,
    )
}

#[test]
fn test_insert_runs_leaf_to_root() -> DimxResult<()> {
    let store = Arc::new(RecordingStore::default());
    let mut product = product(&store)?;

    let mut row = row! { "name" => "A", "category" => "B", "price" => 5 };
    let key = product.insert_row(&mut row)?;

    assert_eq!(*store.inserts.lock(), vec!["price", "category", "product"]);
    let stored = store.inner.rows("product");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("productid"), Some(&key));
    assert_eq!(stored[0].get("categoryid"), row.get("categoryid"));
    assert_eq!(
        store.inner.rows("category")[0].get("priceid"),
        row.get("priceid")
    );
    Ok(())
}

#[test]
fn test_shared_levels_are_reused() -> DimxResult<()> {
    let store = Arc::new(RecordingStore::default());
    let mut product = product(&store)?;
    product.ensure(&row! { "name" => "A", "category" => "B", "price" => 5 })?;
    product.ensure(&row! { "name" => "C", "category" => "B", "price" => 5 })?;

    assert_eq!(store.inner.row_count("product"), 2);
    assert_eq!(store.inner.row_count("category"), 1);
    assert_eq!(store.inner.row_count("price"), 1);
    Ok(())
}

#[test]
fn test_bogus_foreign_key_falls_back_to_lookup() -> DimxResult<()> {
    let store = Arc::new(RecordingStore::default());
    let mut product = SnowflakedDimension::new(
        vec![
            level(&store, "product", "productid", &["name", "categoryid"], &["name", "categoryid"])?,
            level(&store, "category", "categoryid", &["category"], &["category"])?,
        ],
        &[("product", "category")],
        true,
    )?;
    let first = product.ensure(&row! { "name" => "A", "category" => "B" })?;

    // a stale category key in the row misses the product lookup, but the
    // retried lookup after resolving the category finds the member
    let mut stale = row! { "name" => "A", "category" => "B", "categoryid" => 999 };
    let again = product.ensure_row(&mut stale)?;
    assert_eq!(again, first);
    assert_eq!(stale.get("categoryid"), Some(&Value::Int(1)));
    assert_eq!(store.inner.row_count("product"), 1);
    Ok(())
}

#[test]
fn test_versioned_root_propagates_scd_ensure() -> DimxResult<()> {
    use dimx_core::{SlowlyChangingDimension, VersioningConfig};

    let store = Arc::new(RecordingStore::default());
    let root = DimensionTable::builder(
        store.clone(),
        "product",
        "productid",
        ["name", "categoryid", "version"],
    )
    .lookupatts(["name"])
    .build()?;
    let root = SlowlyChangingDimension::builder(root, VersioningConfig::new().with_version("version"))
        .build()?;
    let mut product = SnowflakedDimension::new(
        vec![
            Box::new(root) as Box<dyn Dimension>,
            level(&store, "category", "categoryid", &["category"], &["category"])?,
        ],
        &[("product", "category")],
        false,
    )?;

    let k1 = product.scd_ensure(&mut row! { "name" => "A", "category" => "B" })?;
    let k2 = product.scd_ensure(&mut row! { "name" => "A", "category" => "C" })?;
    assert_ne!(k1, k2);
    assert_eq!(store.inner.row_count("product"), 2);
    assert_eq!(store.inner.row_count("category"), 2);
    Ok(())
}
