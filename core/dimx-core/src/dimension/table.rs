//! Base dimension table with optional lookup cache and staging batch.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dimx_core::{CacheConfig, Dimension, DimensionTable, MemoryStore, row};
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut book = DimensionTable::builder(store.clone(), "book", "bookid", ["name", "category"])
//!     .lookupatts(["name"])
//!     .cache(CacheConfig::default())
//!     .build()
//!     .unwrap();
//!
//! let first = book.ensure(&row! { "name" => "Sushi", "category" => "Cookbook" }).unwrap();
//! let again = book.ensure(&row! { "name" => "Sushi", "category" => "Cookbook" }).unwrap();
//! assert_eq!(first, again);
//! assert_eq!(store.stats().inserts, 1);
//! ```

use crate::cache::{CacheStats, LookupCache, Probe};
use crate::config::{CacheConfig, DimensionConfig, StagingConfig};
use crate::dimension::{Dimension, KeyGenerator, RowExpander};
use crate::error::{DimxError, DimxResult};
use crate::row::{NaturalKey, Row, Value};
use crate::schema::{Quote, TableSchema};
use crate::staging::{BulkLoader, StagingBatch};
use crate::store::{BackingStore, ResultSet, Statement};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

/// Builder for [`DimensionTable`].
pub struct DimensionTableBuilder {
    store: Arc<dyn BackingStore>,
    name: String,
    key: String,
    attributes: Vec<String>,
    lookupatts: Vec<String>,
    quote: Quote,
    cache: Option<CacheConfig>,
    staging: Option<StagingConfig>,
    loader: Option<BulkLoader>,
    keys: KeyGenerator,
    default_id_value: Option<Value>,
    row_expander: Option<RowExpander>,
}

impl DimensionTableBuilder {
    pub fn new<I, S>(
        store: Arc<dyn BackingStore>,
        name: impl Into<String>,
        key: impl Into<String>,
        attributes: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store,
            name: name.into(),
            key: key.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
            lookupatts: Vec::new(),
            quote: Quote::None,
            cache: None,
            staging: None,
            loader: None,
            keys: KeyGenerator::default(),
            default_id_value: None,
            row_expander: None,
        }
    }

    /// Start from a serialized definition. Callbacks still have to be set.
    pub fn from_config(config: &DimensionConfig, store: Arc<dyn BackingStore>) -> Self {
        let mut builder = Self::new(store, &config.name, &config.key, config.attributes.clone())
            .lookupatts(config.lookupatts.clone())
            .quote(config.quote);
        builder.cache = config.cache.clone();
        builder.staging = config.staging.clone();
        builder.default_id_value = config.default_id_value.clone();
        builder
    }

    /// Natural key attributes. Defaults to every attribute.
    pub fn lookupatts<I, S>(mut self, atts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lookupatts = atts.into_iter().map(Into::into).collect();
        self
    }

    pub fn quote(mut self, quote: Quote) -> Self {
        self.quote = quote;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Insert through a staging batch. Requires a bulk loader.
    pub fn staging(mut self, config: StagingConfig) -> Self {
        self.staging = Some(config);
        self
    }

    pub fn bulk_loader(mut self, loader: BulkLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn key_generator(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn default_id_value(mut self, value: impl Into<Value>) -> Self {
        self.default_id_value = Some(value.into());
        self
    }

    pub fn row_expander<F>(mut self, expander: F) -> Self
    where
        F: FnMut(Row) -> DimxResult<Row> + Send + 'static,
    {
        self.row_expander = Some(Box::new(expander));
        self
    }

    #[instrument(skip_all, fields(table = %self.name))]
    pub fn build(self) -> DimxResult<DimensionTable> {
        let schema = TableSchema::new(self.name, self.key, self.attributes, self.lookupatts)?
            .with_quote(self.quote);
        let name = schema.name().to_string();

        let staging = match (self.staging, self.loader) {
            (None, None) => None,
            (config, Some(loader)) => {
                if matches!(self.keys, KeyGenerator::StoreDefault) {
                    return Err(DimxError::Configuration(format!(
                        "staged table '{name}' cannot use store-assigned keys"
                    )));
                }
                Some(StagingBatch::new(
                    name.clone(),
                    schema.all().to_vec(),
                    config.unwrap_or_default(),
                    loader,
                )?)
            }
            (Some(_), None) => {
                return Err(DimxError::Configuration(format!(
                    "staged table '{name}' needs a bulk loader"
                )));
            }
        };

        // pending members are promoted into a confirmed cache
        let cache_config = match (self.cache, &staging) {
            (Some(config), _) => Some(config),
            (None, Some(_)) => Some(CacheConfig::default()),
            (None, None) => None,
        };
        let cache = cache_config.as_ref().map(LookupCache::new).transpose()?;

        let returning = matches!(self.keys, KeyGenerator::StoreDefault);
        let insert_columns = if returning {
            schema.attributes().to_vec()
        } else {
            schema.all().to_vec()
        };

        let mut table = DimensionTable {
            lookup_stmt: Statement::SelectWhere {
                table: name.clone(),
                columns: vec![schema.key().to_string()],
                filter: schema.lookupatts().to_vec(),
            },
            row_stmt: Statement::SelectWhere {
                table: name.clone(),
                columns: schema.all().to_vec(),
                filter: vec![schema.key().to_string()],
            },
            insert_stmt: Statement::Insert {
                table: name.clone(),
                columns: insert_columns,
                returning: returning.then(|| schema.key().to_string()),
            },
            schema,
            store: self.store,
            keys: self.keys,
            next_key: 1,
            cache,
            staging,
            default_id_value: self.default_id_value,
            row_expander: self.row_expander,
        };

        if matches!(table.keys, KeyGenerator::MaxPlusOne) {
            table.next_key = table.current_max_key()? + 1;
        }
        if let Some(config) = cache_config.filter(|c| c.prefill) {
            table.prefill(&config)?;
        }
        debug!(
            cached = table.cache.is_some(),
            staged = table.staging.is_some(),
            "dimension table ready"
        );
        Ok(table)
    }
}

/// Base resolver of natural keys to surrogate keys.
pub struct DimensionTable {
    schema: TableSchema,
    store: Arc<dyn BackingStore>,
    keys: KeyGenerator,
    next_key: i64,
    cache: Option<LookupCache>,
    staging: Option<StagingBatch>,
    default_id_value: Option<Value>,
    row_expander: Option<RowExpander>,
    lookup_stmt: Statement,
    row_stmt: Statement,
    insert_stmt: Statement,
}

impl DimensionTable {
    pub fn builder<I, S>(
        store: Arc<dyn BackingStore>,
        name: impl Into<String>,
        key: impl Into<String>,
        attributes: I,
    ) -> DimensionTableBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DimensionTableBuilder::new(store, name, key, attributes)
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(LookupCache::stats)
    }

    pub fn is_cache_complete(&self) -> bool {
        self.cache.as_ref().is_some_and(LookupCache::is_complete)
    }

    /// Rows staged but not yet loaded.
    pub fn awaiting_rows(&self) -> usize {
        self.staging.as_ref().map_or(0, StagingBatch::len)
    }

    pub(crate) fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub(crate) fn has_staging(&self) -> bool {
        self.staging.is_some()
    }

    /// Bound of the lookup cache; `None` when unbounded or absent.
    pub(crate) fn cache_capacity(&self) -> Option<usize> {
        self.cache.as_ref().and_then(LookupCache::capacity)
    }

    /// Like [`Dimension::lookup`] but without the default id value.
    pub fn find(&mut self, row: &Row) -> DimxResult<Option<Value>> {
        let nk = self.schema.natural_key(row)?;
        self.resolve(&nk)
    }

    /// The row an ensure miss inserts: `row` passed through the row
    /// expander, or `None` when no expander is set.
    pub(crate) fn expand(&mut self, row: &Row) -> DimxResult<Option<Row>> {
        match self.row_expander.as_mut() {
            Some(expand) => expand(row.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Ensure that also verifies the non-key attributes present in `row`
    /// against an existing member.
    pub fn ensure_compare(&mut self, row: &Row) -> DimxResult<Value> {
        let nk = self.schema.natural_key(row)?;
        let Some(key) = self.resolve(&nk)? else {
            let expanded = self.expand(row)?;
            return self.insert_new(expanded.as_ref().unwrap_or(row));
        };
        let existing = self.get_by_key(&key)?.ok_or_else(|| {
            DimxError::NotFound(format!("member {key} of '{}'", self.schema.name()))
        })?;
        for att in self.schema.attributes() {
            let Some(value) = row.get(att) else { continue };
            let stored = existing.get(att).unwrap_or(&Value::Null);
            if stored != value {
                return Err(DimxError::ConstraintViolation(format!(
                    "member {key} of '{}' has {att} = {stored}, row has {value}",
                    self.schema.name()
                )));
            }
        }
        Ok(key)
    }

    /// Load every staged row now.
    pub fn flush(&mut self) -> DimxResult<()> {
        let Some(staging) = &mut self.staging else {
            return Ok(());
        };
        let promoted = staging.flush()?;
        if let Some(cache) = &mut self.cache {
            for member in promoted {
                cache.record(member.natural_key, member.key.clone());
                cache.record_row(member.key, member.row);
            }
        }
        Ok(())
    }

    // ===== Internals =====

    pub(crate) fn execute(&self, statement: &Statement, params: &Row) -> DimxResult<ResultSet> {
        trace!(sql = %self.schema.render(statement), "executing");
        self.store.execute(statement, params)
    }

    fn current_max_key(&self) -> DimxResult<i64> {
        let statement = Statement::SelectMax {
            table: self.schema.name().to_string(),
            column: self.schema.key().to_string(),
        };
        let rs = self.execute(&statement, &Row::new())?;
        match rs.value(0, self.schema.key()) {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Int(max)) => Ok(*max),
            Some(other) => Err(DimxError::TypeMismatch {
                expected: "int".to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    fn prefill(&mut self, config: &CacheConfig) -> DimxResult<()> {
        let limit = config.size.filter(|_| config.use_fetch_first);
        let statement = Statement::SelectAll {
            table: self.schema.name().to_string(),
            columns: self.schema.all().to_vec(),
            limit,
        };
        let rs = self.execute(&statement, &Row::new())?;
        let loaded = rs.len();
        let truncated = limit.is_some_and(|n| loaded >= n);

        if let Some(cache) = &mut self.cache {
            for row in rs.into_rows() {
                let nk = self.schema.natural_key(&row)?;
                let key = row.get(self.schema.key()).cloned().unwrap_or_default();
                cache.record(nk, key.clone());
                cache.record_row(key, row);
            }
            cache.mark_prefilled(truncated);
        }
        info!(table = %self.schema.name(), rows = loaded, truncated, "cache prefilled");
        Ok(())
    }

    fn resolve(&mut self, nk: &NaturalKey) -> DimxResult<Option<Value>> {
        if let Some(key) = self.staging.as_ref().and_then(|s| s.pending_key(nk)) {
            debug!(table = %self.schema.name(), key = %key, "lookup values already staged");
            return Ok(Some(key.clone()));
        }
        if let Some(cache) = &mut self.cache {
            match cache.probe(nk) {
                Probe::Hit(key) => return Ok(Some(key)),
                Probe::Absent => return Ok(None),
                Probe::Unknown => {}
            }
        }

        let rs = self.execute(&self.lookup_stmt, &self.schema.lookup_params(nk))?;
        let key = match rs.len() {
            0 => None,
            1 => rs.value(0, self.schema.key()).cloned(),
            n => {
                return Err(DimxError::LookupAmbiguous {
                    table: self.schema.name().to_string(),
                    detail: format!("{n} members share the lookup values"),
                });
            }
        };
        if let (Some(cache), Some(key)) = (&mut self.cache, &key) {
            cache.record(nk.clone(), key.clone());
        }
        Ok(key)
    }

    fn assign_key(&mut self, row: &Row) -> DimxResult<Option<Value>> {
        match row.get(self.schema.key()) {
            Some(Value::Int(given)) => {
                if matches!(self.keys, KeyGenerator::MaxPlusOne) {
                    self.next_key = self.next_key.max(given + 1);
                }
                return Ok(Some(Value::Int(*given)));
            }
            Some(given) if !given.is_null() => return Ok(Some(given.clone())),
            _ => {}
        }
        match &mut self.keys {
            KeyGenerator::MaxPlusOne => {
                let key = self.next_key;
                self.next_key += 1;
                Ok(Some(Value::Int(key)))
            }
            KeyGenerator::Callback(mint) => mint(row).map(Some),
            KeyGenerator::StoreDefault => Ok(None),
        }
    }

    /// With staging, a flush triggered by a full batch can fail after the
    /// row was staged. The error is returned but the row stays pending:
    /// lookups resolve it and the next flush or `end_load` loads it.
    fn insert_new(&mut self, row: &Row) -> DimxResult<Value> {
        let nk = self.schema.natural_key(row)?;
        let values = self.schema.attribute_values(row)?;
        let assigned = self.assign_key(row)?;

        if let Some(staging) = &mut self.staging {
            let key = assigned.ok_or_else(|| {
                DimxError::Configuration("staged inserts need a generated key".into())
            })?;
            let mut stored = Row::new().with(self.schema.key(), key.clone());
            stored.merge(&values);
            staging.stage(nk, key.clone(), stored)?;
            if staging.is_full() {
                self.flush()?;
            }
            return Ok(key);
        }

        let mut params = Row::new();
        if let Some(key) = &assigned {
            params.set(self.schema.key(), key.clone());
        }
        params.merge(&values);
        let rs = self.execute(&self.insert_stmt, &params)?;
        let key = match assigned {
            Some(key) => key,
            None => rs
                .value(0, self.schema.key())
                .filter(|v| !v.is_null())
                .cloned()
                .ok_or_else(|| {
                    DimxError::NotFound(format!(
                        "store assigned no key to the new member of '{}'",
                        self.schema.name()
                    ))
                })?,
        };

        if let Some(cache) = self.cache.as_mut().filter(|c| c.caches_on_insert()) {
            cache.record(nk, key.clone());
            params.set(self.schema.key(), key.clone());
            cache.record_row(key.clone(), params);
        }
        debug!(table = %self.schema.name(), key = %key, "member inserted");
        Ok(key)
    }

    fn read_needs_flush(&self, key: Option<&Value>) -> bool {
        let Some(staging) = &self.staging else {
            return false;
        };
        if staging.is_empty() {
            return false;
        }
        let pending = key.is_some_and(|k| staging.pending_row(k).is_some());
        !staging.config().trust_cache || pending
    }
}

impl Dimension for DimensionTable {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn lookup(&mut self, row: &Row) -> DimxResult<Option<Value>> {
        let found = self.find(row)?;
        Ok(found.or_else(|| self.default_id_value.clone()))
    }

    fn insert(&mut self, row: &Row) -> DimxResult<Value> {
        self.insert_new(row)
    }

    fn ensure(&mut self, row: &Row) -> DimxResult<Value> {
        let nk = self.schema.natural_key(row)?;
        if let Some(key) = self.resolve(&nk)? {
            return Ok(key);
        }
        let expanded = self.expand(row)?;
        self.insert_new(expanded.as_ref().unwrap_or(row))
    }

    fn get_by_key(&mut self, key: &Value) -> DimxResult<Option<Row>> {
        let caches_rows = self.cache.as_ref().is_some_and(LookupCache::caches_rows);
        if let Some(staging) = &self.staging {
            if let Some(row) = staging.pending_row(key) {
                if staging.config().trust_cache || caches_rows {
                    return Ok(Some(row.clone()));
                }
            }
        }
        if !caches_rows && self.read_needs_flush(Some(key)) {
            self.flush()?;
        }
        if let Some(row) = self.cache.as_ref().and_then(|c| c.row(key)) {
            return Ok(Some(row.clone()));
        }

        let params = Row::new().with(self.schema.key(), key.clone());
        let rs = self.execute(&self.row_stmt, &params)?;
        if rs.len() > 1 {
            return Err(DimxError::LookupAmbiguous {
                table: self.schema.name().to_string(),
                detail: format!("{} rows share key {key}", rs.len()),
            });
        }
        let row = rs.first();
        if let (Some(cache), Some(row)) = (&mut self.cache, &row) {
            cache.record_row(key.clone(), row.clone());
        }
        Ok(row)
    }

    fn get_by_vals(&mut self, values: &Row) -> DimxResult<Vec<Row>> {
        if let Some(unknown) = values.names().find(|n| !self.schema.has_attribute(n)) {
            return Err(DimxError::Configuration(format!(
                "'{unknown}' is not an attribute of table '{}'",
                self.schema.name()
            )));
        }
        if self.read_needs_flush(None) {
            self.flush()?;
        }

        let statement = Statement::SelectWhere {
            table: self.schema.name().to_string(),
            columns: self.schema.all().to_vec(),
            filter: values.names().map(str::to_string).collect(),
        };
        let mut rows = self.execute(&statement, values)?.into_rows();

        // trusted reads also see what is still staged
        if let Some(staging) = &self.staging {
            let matching = staging.pending_rows().filter(|row| {
                values
                    .iter()
                    .all(|(n, v)| !v.is_null() && row.get(n) == Some(v))
            });
            rows.extend(matching.cloned());
        }
        Ok(rows)
    }

    fn update(&mut self, row: &Row) -> DimxResult<()> {
        let key = row
            .get(self.schema.key())
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| DimxError::missing_attribute(self.schema.name(), self.schema.key()))?;
        let changes = row.project(self.schema.attributes());
        if changes.is_empty() {
            return Ok(());
        }
        if self.read_needs_flush(Some(&key)) {
            self.flush()?;
        }

        let touches_lookup = changes.names().any(|n| self.schema.is_lookup_attribute(n));
        let wants_old = self
            .cache
            .as_ref()
            .is_some_and(|c| touches_lookup || c.caches_rows());
        let old = if wants_old {
            self.get_by_key(&key)?
        } else {
            None
        };

        let statement = Statement::UpdateByKey {
            table: self.schema.name().to_string(),
            key: self.schema.key().to_string(),
            columns: changes.names().map(str::to_string).collect(),
        };
        let mut params = changes.clone();
        params.set(self.schema.key(), key.clone());
        self.execute(&statement, &params)?;

        if let Some(cache) = &mut self.cache {
            match old {
                Some(mut current) => {
                    if touches_lookup {
                        if let Ok(old_nk) = self.schema.natural_key(&current) {
                            cache.forget(&old_nk);
                        }
                    }
                    current.merge(&changes);
                    if touches_lookup {
                        cache.record(self.schema.natural_key(&current)?, key.clone());
                    }
                    cache.record_row(key, current);
                }
                None => cache.forget_row(&key),
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(table = %self.schema.name()))]
    fn end_load(&mut self) -> DimxResult<()> {
        self.flush()
    }

    fn default_id_value(&self) -> Option<&Value> {
        self.default_id_value.as_ref()
    }
}

impl std::fmt::Debug for DimensionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DimensionTable")
            .field("schema", &self.schema)
            .field("keys", &self.keys)
            .field("cache", &self.cache)
            .field("awaiting_rows", &self.awaiting_rows())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::store::MemoryStore;

    fn book(store: &Arc<MemoryStore>) -> DimensionTableBuilder {
        DimensionTable::builder(store.clone(), "book", "bookid", ["name", "category"])
            .lookupatts(["name"])
    }

    #[test]
    fn lookup_falls_back_to_store() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "book",
            vec![row! { "bookid" => 7, "name" => "Sushi", "category" => "Cookbook" }],
        );
        let mut table = book(&store).build().unwrap();
        assert_eq!(
            table.lookup(&row! { "name" => "Sushi" }).unwrap(),
            Some(Value::Int(7))
        );
        assert_eq!(table.lookup(&row! { "name" => "Pasta" }).unwrap(), None);
    }

    #[test]
    fn max_plus_one_continues_after_existing_keys() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "book",
            vec![row! { "bookid" => 41, "name" => "Sushi", "category" => "Cookbook" }],
        );
        let mut table = book(&store).build().unwrap();
        let key = table
            .insert(&row! { "name" => "Pasta", "category" => "Cookbook" })
            .unwrap();
        assert_eq!(key, Value::Int(42));
    }

    #[test]
    fn missing_lookup_attribute_is_configuration_error() {
        let store = Arc::new(MemoryStore::new());
        let mut table = book(&store).build().unwrap();
        let err = table.lookup(&row! { "category" => "Cookbook" }).unwrap_err();
        assert!(matches!(err, DimxError::Configuration(_)));
    }

    #[test]
    fn default_id_value_is_returned_on_miss_but_ensure_inserts() {
        let store = Arc::new(MemoryStore::new());
        let mut table = book(&store).default_id_value(-1).build().unwrap();
        let r = row! { "name" => "Sushi", "category" => "Cookbook" };
        assert_eq!(table.lookup(&r).unwrap(), Some(Value::Int(-1)));
        assert_eq!(table.ensure(&r).unwrap(), Value::Int(1));
    }

    #[test]
    fn ensure_compare_rejects_differing_attributes() {
        let store = Arc::new(MemoryStore::new());
        let mut table = book(&store).build().unwrap();
        table
            .ensure(&row! { "name" => "Sushi", "category" => "Cookbook" })
            .unwrap();
        let err = table
            .ensure_compare(&row! { "name" => "Sushi", "category" => "Novel" })
            .unwrap_err();
        assert!(matches!(err, DimxError::ConstraintViolation(_)));
        assert!(
            table
                .ensure_compare(&row! { "name" => "Sushi", "category" => "Cookbook" })
                .is_ok()
        );
    }

    #[test]
    fn callback_keys_and_row_expander() {
        let store = Arc::new(MemoryStore::new());
        let mut table = book(&store)
            .key_generator(KeyGenerator::callback(|row: &Row| {
                let len = row.get("name").and_then(Value::as_text).map_or(0, str::len);
                Ok(Value::Int(1000 + len as i64))
            }))
            .row_expander(|row| Ok(row.with("category", "Unknown")))
            .build()
            .unwrap();
        let key = table.ensure(&row! { "name" => "Sushi" }).unwrap();
        assert_eq!(key, Value::Int(1005));
        let stored = table.get_by_key(&key).unwrap().unwrap();
        assert_eq!(stored.get("category"), Some(&Value::from("Unknown")));
    }

    #[test]
    fn store_default_keys_come_back_from_insert() {
        let store = Arc::new(MemoryStore::new());
        let mut table = book(&store)
            .key_generator(KeyGenerator::StoreDefault)
            .cache(CacheConfig::default())
            .build()
            .unwrap();
        let a = table
            .insert(&row! { "name" => "A", "category" => "x" })
            .unwrap();
        let b = table
            .insert(&row! { "name" => "B", "category" => "x" })
            .unwrap();
        assert_eq!((a, b), (Value::Int(1), Value::Int(2)));
    }

    #[test]
    fn staging_without_loader_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let err = book(&store)
            .staging(StagingConfig::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, DimxError::Configuration(_)));
    }

    #[test]
    fn update_refreshes_cached_natural_key() {
        let store = Arc::new(MemoryStore::new());
        let mut table = book(&store)
            .cache(CacheConfig::unbounded().with_prefill(true).with_full_rows(true))
            .build()
            .unwrap();
        let key = table
            .ensure(&row! { "name" => "Sushi", "category" => "Cookbook" })
            .unwrap();
        table
            .update(&row! { "bookid" => key.clone(), "name" => "Sashimi" })
            .unwrap();

        assert_eq!(table.lookup(&row! { "name" => "Sushi" }).unwrap(), None);
        assert_eq!(
            table.lookup(&row! { "name" => "Sashimi" }).unwrap(),
            Some(key.clone())
        );
        let cached = table.get_by_key(&key).unwrap().unwrap();
        assert_eq!(cached.get("category"), Some(&Value::from("Cookbook")));
    }

    #[test]
    fn ambiguous_natural_key_in_store() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "book",
            vec![
                row! { "bookid" => 1, "name" => "Sushi", "category" => "a" },
                row! { "bookid" => 2, "name" => "Sushi", "category" => "b" },
            ],
        );
        let mut table = book(&store).build().unwrap();
        let err = table.lookup(&row! { "name" => "Sushi" }).unwrap_err();
        assert!(matches!(err, DimxError::LookupAmbiguous { .. }));
    }

    #[test]
    fn get_by_vals_rejects_unknown_attribute() {
        let store = Arc::new(MemoryStore::new());
        let mut table = book(&store).build().unwrap();
        assert!(table.get_by_vals(&row! { "isbn" => "x" }).is_err());
    }
}
