//! Dimension tables.
//!
//! [`Dimension`] is the capability every variant exposes. Caching, staging
//! and versioning are strategies composed around one [`DimensionTable`]
//! rather than a hierarchy of table kinds:
//!
//! | Need                        | Build                                              |
//! |-----------------------------|----------------------------------------------------|
//! | plain lookups               | `DimensionTable::builder(..)`                      |
//! | cached lookups              | `.cache(CacheConfig)`                              |
//! | bulk loading                | `.staging(StagingConfig)` + `.bulk_loader(..)`     |
//! | type-1 overwrites           | [`TypeOneDimension`](crate::scd::TypeOneDimension) |
//! | type-2 versions             | [`SlowlyChangingDimension`](crate::scd::SlowlyChangingDimension) |
//!
//! Operations take `&mut self`: a dimension owns its cache and batch and is
//! driven from one thread.

pub mod table;

pub use table::{DimensionTable, DimensionTableBuilder};

use crate::error::{DimxError, DimxResult};
use crate::row::{Row, Value};
use crate::schema::TableSchema;
use std::fmt;

/// Lookup, insertion and maintenance of dimension members.
pub trait Dimension: Send {
    fn schema(&self) -> &TableSchema;

    /// Surrogate key of the member with the row's lookup values.
    fn lookup(&mut self, row: &Row) -> DimxResult<Option<Value>>;

    /// Insert a new member and return its key. The row must carry every
    /// attribute; a key present in the row is kept.
    fn insert(&mut self, row: &Row) -> DimxResult<Value>;

    /// Look the member up and insert it when missing.
    fn ensure(&mut self, row: &Row) -> DimxResult<Value> {
        match self.lookup(row)? {
            Some(key) => Ok(key),
            None => self.insert(row),
        }
    }

    fn get_by_key(&mut self, key: &Value) -> DimxResult<Option<Row>>;

    /// Every member whose attributes equal the given values.
    fn get_by_vals(&mut self, values: &Row) -> DimxResult<Vec<Row>>;

    /// Set the attributes present in `row` on the member named by its key.
    fn update(&mut self, row: &Row) -> DimxResult<()>;

    /// Write out anything still buffered. Must run before the store commits.
    fn end_load(&mut self) -> DimxResult<()>;

    /// Versioned ensure. Writes the resolved key (and version attributes)
    /// into `row`.
    fn scd_ensure(&mut self, row: &mut Row) -> DimxResult<Value> {
        let _ = row;
        Err(DimxError::Configuration(format!(
            "table '{}' is not a slowly changing dimension",
            self.schema().name()
        )))
    }

    /// Key that `lookup` answers for members that do not exist.
    fn default_id_value(&self) -> Option<&Value> {
        None
    }

    fn name(&self) -> &str {
        self.schema().name()
    }

    fn key(&self) -> &str {
        self.schema().key()
    }
}

type KeyCallback = dyn FnMut(&Row) -> DimxResult<Value> + Send;

/// How new surrogate keys are minted.
#[derive(Default)]
pub enum KeyGenerator {
    /// Read `MAX(key)` once when the table is built, then count up locally.
    #[default]
    MaxPlusOne,
    /// Ask a callback for every new member.
    Callback(Box<KeyCallback>),
    /// Let the store assign the key and return it from the insert.
    StoreDefault,
}

impl KeyGenerator {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(&Row) -> DimxResult<Value> + Send + 'static,
    {
        KeyGenerator::Callback(Box::new(f))
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyGenerator::MaxPlusOne => f.write_str("MaxPlusOne"),
            KeyGenerator::Callback(_) => f.write_str("Callback"),
            KeyGenerator::StoreDefault => f.write_str("StoreDefault"),
        }
    }
}

/// Completes a row that `ensure` is about to insert.
pub type RowExpander = Box<dyn FnMut(Row) -> DimxResult<Row> + Send>;
