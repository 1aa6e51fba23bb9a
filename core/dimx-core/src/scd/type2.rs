//! Type-2 slowly changing dimension.
//!
//! Every member is a chain of versions sharing the natural key. Exactly one
//! version is the newest: the one with the greatest value of the ordering
//! attribute. When the ordering attribute is the `to` attribute, NULL counts
//! as the greatest value; otherwise it counts as the smallest.
//!
//! ```rust
//! use std::sync::Arc;
//! use dimx_core::{DimensionTable, MemoryStore, SlowlyChangingDimension, Value, VersioningConfig, row};
//! use dimx_core::scd::ValidityStart;
//!
//! let store = Arc::new(MemoryStore::new());
//! let table = DimensionTable::builder(
//!     store.clone(),
//!     "customer",
//!     "customerid",
//!     ["custno", "city", "version", "validfrom", "validto"],
//! )
//! .lookupatts(["custno"])
//! .build()
//! .unwrap();
//! let mut customer = SlowlyChangingDimension::builder(
//!     table,
//!     VersioningConfig::new().with_version("version").with_validity("validfrom", "validto"),
//! )
//! .validity_start(ValidityStart::FromAttribute("changed".into()))
//! .build()
//! .unwrap();
//!
//! let mut first = row! { "custno" => 1, "city" => "Aalborg", "changed" => "2024-01-01" };
//! let mut moved = row! { "custno" => 1, "city" => "Aarhus", "changed" => "2024-06-01" };
//! let a = customer.scd_ensure(&mut first).unwrap();
//! let b = customer.scd_ensure(&mut moved).unwrap();
//! assert_ne!(a, b);
//! assert_eq!(moved.get("version"), Some(&Value::Int(2)));
//! ```

use crate::cache::{LookupCache, Probe};
use crate::config::{CacheConfig, DimensionConfig, Type1Scope, VersioningConfig};
use crate::dimension::{Dimension, DimensionTable, DimensionTableBuilder};
use crate::error::{DimxError, DimxResult};
use crate::row::{NaturalKey, Row, Value};
use crate::schema::TableSchema;
use crate::store::{BackingStore, OrderBy, Statement};
use ahash::AHashMap;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

type ValidityFn = dyn FnMut(&Row) -> DimxResult<Value> + Send;

/// Where the `from` value of a new version comes from.
pub enum ValidityStart {
    Callback(Box<ValidityFn>),
    /// Copy the value of a source attribute of the row.
    FromAttribute(String),
    /// The current local date.
    Today,
}

impl ValidityStart {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(&Row) -> DimxResult<Value> + Send + 'static,
    {
        ValidityStart::Callback(Box::new(f))
    }

    fn resolve(&mut self, table: &str, row: &Row) -> DimxResult<Value> {
        match self {
            ValidityStart::Callback(f) => f(row),
            ValidityStart::FromAttribute(att) => row
                .get(att)
                .cloned()
                .ok_or_else(|| DimxError::missing_attribute(table, att)),
            ValidityStart::Today => Ok(today()),
        }
    }
}

impl fmt::Debug for ValidityStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidityStart::Callback(_) => f.write_str("Callback"),
            ValidityStart::FromAttribute(att) => write!(f, "FromAttribute({att})"),
            ValidityStart::Today => f.write_str("Today"),
        }
    }
}

/// Computes the `to` value written into a version that is being closed.
/// Without one, the closed version ends where the new one starts.
pub type ValidityEnd = Box<ValidityFn>;

pub fn today() -> Value {
    Value::Date(chrono::Local::now().date_naive())
}

/// Which ends of a validity interval contain their boundary date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inclusive {
    pub from: bool,
    pub to: bool,
}

impl Inclusive {
    /// `[from, to)`
    pub const HALF_OPEN: Inclusive = Inclusive {
        from: true,
        to: false,
    };
    /// `[from, to]`
    pub const CLOSED: Inclusive = Inclusive {
        from: true,
        to: true,
    };
}

impl Default for Inclusive {
    fn default() -> Self {
        Inclusive::HALF_OPEN
    }
}

/// Compare two ordering values; NULL is the greatest when `nulls_greatest`.
fn compare_ordering(a: Option<&Value>, b: Option<&Value>, nulls_greatest: bool) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) if nulls_greatest => Ordering::Greater,
        (true, false) => Ordering::Less,
        (false, true) if nulls_greatest => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

pub struct SlowlyChangingDimensionBuilder {
    table: DimensionTable,
    versioning: VersioningConfig,
    cache: Option<CacheConfig>,
    validity_start: Option<ValidityStart>,
    validity_end: Option<ValidityEnd>,
}

impl SlowlyChangingDimensionBuilder {
    pub fn new(table: DimensionTable, versioning: VersioningConfig) -> Self {
        Self {
            table,
            versioning,
            cache: None,
            validity_start: None,
            validity_end: None,
        }
    }

    /// Start from a serialized definition with a `versioning` section.
    pub fn from_config(config: &DimensionConfig, store: Arc<dyn BackingStore>) -> DimxResult<Self> {
        let versioning = config.versioning.clone().ok_or_else(|| {
            DimxError::Configuration(format!(
                "dimension '{}' has no versioning section",
                config.name
            ))
        })?;
        let mut base = config.clone();
        base.cache = None;
        base.staging = None;
        let table = DimensionTableBuilder::from_config(&base, store).build()?;
        let mut builder = Self::new(table, versioning);
        builder.cache = config.cache.clone();
        Ok(builder)
    }

    /// Cache natural key → newest key. Full rows are always cached.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    pub fn validity_start(mut self, start: ValidityStart) -> Self {
        self.validity_start = Some(start);
        self
    }

    pub fn validity_end<F>(mut self, end: F) -> Self
    where
        F: FnMut(&Row) -> DimxResult<Value> + Send + 'static,
    {
        self.validity_end = Some(Box::new(end));
        self
    }

    #[instrument(skip_all, fields(table = %self.table.name()))]
    pub fn build(self) -> DimxResult<SlowlyChangingDimension> {
        let schema = self.table.schema();
        let name = schema.name().to_string();
        if self.table.has_cache() || self.table.has_staging() {
            return Err(DimxError::Configuration(format!(
                "versioned dimension '{name}' caches on its own; build its table without cache or staging"
            )));
        }

        let cfg = &self.versioning;
        let ordering = cfg.ordering_attribute()?.to_string();
        let versioning_atts = [
            cfg.version_att.as_deref(),
            cfg.from_att.as_deref(),
            cfg.to_att.as_deref(),
            Some(ordering.as_str()),
        ];
        for att in versioning_atts.into_iter().flatten() {
            if !schema.attributes().iter().any(|a| a == att) {
                return Err(DimxError::Configuration(format!(
                    "versioning attribute '{att}' is not an attribute of '{name}'"
                )));
            }
            if schema.is_lookup_attribute(att) {
                return Err(DimxError::Configuration(format!(
                    "versioning attribute '{att}' of '{name}' cannot be a lookup attribute"
                )));
            }
        }
        if schema.is_lookup_attribute(schema.key()) {
            return Err(DimxError::Configuration(format!(
                "the key of versioned dimension '{name}' cannot be a lookup attribute"
            )));
        }
        for att in &cfg.type1atts {
            if !schema.attributes().contains(att)
                || schema.is_lookup_attribute(att)
                || versioning_atts.contains(&Some(att.as_str()))
            {
                return Err(DimxError::Configuration(format!(
                    "'{att}' cannot be a type-1 attribute of '{name}'"
                )));
            }
        }

        let validity_start = match (self.validity_start, &cfg.src_date_att) {
            (Some(start), _) => start,
            (None, Some(src)) => ValidityStart::FromAttribute(src.clone()),
            (None, None) => ValidityStart::Today,
        };
        let cache = self
            .cache
            .as_ref()
            .map(|c| {
                LookupCache::new(
                    &c.clone()
                        .with_full_rows(true)
                        .with_cache_on_insert(true),
                )
            })
            .transpose()?;

        let nulls_greatest = cfg.to_att.as_deref() == Some(ordering.as_str());
        let columns = vec![schema.key().to_string(), ordering.clone()];
        let newest_stmt = if cfg.use_order_by {
            Statement::SelectNewest {
                table: name.clone(),
                columns,
                filter: schema.lookupatts().to_vec(),
                order: OrderBy {
                    column: ordering.clone(),
                    nulls_first: nulls_greatest,
                },
                limit: 2,
            }
        } else {
            Statement::SelectWhere {
                table: name.clone(),
                columns,
                filter: schema.lookupatts().to_vec(),
            }
        };

        let prefill = self.cache.as_ref().is_some_and(|c| c.prefill);
        let mut dim = SlowlyChangingDimension {
            table: self.table,
            config: self.versioning,
            ordering,
            nulls_greatest,
            cache,
            validity_start,
            validity_end: self.validity_end,
            newest_stmt,
        };
        if prefill {
            dim.prefill()?;
        }
        debug!(ordering = %dim.ordering, "versioned dimension ready");
        Ok(dim)
    }
}

/// Dimension keeping the history of its members as versions.
pub struct SlowlyChangingDimension {
    table: DimensionTable,
    config: VersioningConfig,
    ordering: String,
    nulls_greatest: bool,
    /// natural key → newest key, key → row
    cache: Option<LookupCache>,
    validity_start: ValidityStart,
    validity_end: Option<ValidityEnd>,
    newest_stmt: Statement,
}

impl SlowlyChangingDimension {
    pub fn builder(
        table: DimensionTable,
        versioning: VersioningConfig,
    ) -> SlowlyChangingDimensionBuilder {
        SlowlyChangingDimensionBuilder::new(table, versioning)
    }

    pub fn versioning(&self) -> &VersioningConfig {
        &self.config
    }

    pub fn ordering_attribute(&self) -> &str {
        &self.ordering
    }

    pub fn table(&self) -> &DimensionTable {
        &self.table
    }

    pub fn is_cache_complete(&self) -> bool {
        self.cache.as_ref().is_some_and(LookupCache::is_complete)
    }

    /// Add a version, overwrite type-1 attributes, or do nothing, depending
    /// on how `row` differs from the newest version of its member. The key,
    /// version and validity of the resulting version are written into `row`.
    pub fn scd_ensure(&mut self, row: &mut Row) -> DimxResult<Value> {
        let nk = self.table.schema().natural_key(row)?;
        let Some(newest) = self.newest_key(&nk)? else {
            return self.insert_first_version(nk, row);
        };
        let current = self.get_by_key(&newest)?.ok_or_else(|| {
            DimxError::NotFound(format!("member {newest} of '{}'", self.table.name()))
        })?;

        let (type1, add_version) = self.classify(row, &current)?;
        if !type1.is_empty() {
            self.overwrite_type1(&nk, &newest, &type1)?;
        }
        if add_version {
            return self.insert_next_version(nk, row, &newest, &current);
        }

        row.set(self.table.key().to_string(), newest.clone());
        for att in [
            &self.config.version_att,
            &self.config.from_att,
            &self.config.to_att,
        ]
        .into_iter()
        .flatten()
        {
            if let Some(value) = current.get(att) {
                row.set(att.clone(), value.clone());
            }
        }
        Ok(newest)
    }

    /// Set `to` of the open version of the row's member to `end`. A member
    /// whose newest version is already closed is left alone.
    pub fn close_current(&mut self, row: &Row, end: impl Into<Value>) -> DimxResult<()> {
        let to = self.config.to_att.clone().ok_or_else(|| {
            DimxError::Configuration(format!(
                "'{}' has no to attribute to close versions with",
                self.table.name()
            ))
        })?;
        let nk = self.table.schema().natural_key(row)?;
        let key = self.newest_key(&nk)?.ok_or_else(|| {
            DimxError::NotFound(format!(
                "no member of '{}' has the given lookup values",
                self.table.name()
            ))
        })?;
        let current = self.get_by_key(&key)?.ok_or_else(|| {
            DimxError::NotFound(format!("member {key} of '{}'", self.table.name()))
        })?;
        if current.get(&to) != Some(&self.config.max_to) {
            return Ok(());
        }
        let change = Row::new()
            .with(self.table.key(), key.clone())
            .with(to, end);
        self.update(&change)?;
        debug!(table = %self.table.name(), key = %key, "version closed");
        Ok(())
    }

    /// Key of the version of the row's member that was valid at `when`.
    ///
    /// Versions are read from the store and walked in ordering order. With
    /// both validity attributes the first version whose `to` lies after
    /// `when` answers, provided its `from` lies before it.
    pub fn lookup_as_of(
        &mut self,
        row: &Row,
        when: &Value,
        inclusive: Inclusive,
    ) -> DimxResult<Option<Value>> {
        let from = self.config.from_att.clone();
        let to = self.config.to_att.clone();
        match (&from, &to) {
            (None, None) => {
                return Err(DimxError::Configuration(format!(
                    "'{}' has no validity attributes",
                    self.table.name()
                )));
            }
            (Some(_), Some(_)) if !inclusive.from && !inclusive.to => {
                return Err(DimxError::Configuration(
                    "an interval open at both ends cannot answer point lookups".into(),
                ));
            }
            _ => {}
        }

        let schema = self.table.schema();
        let nk = schema.natural_key(row)?;
        let mut columns = vec![schema.key().to_string(), self.ordering.clone()];
        for att in [&from, &to].into_iter().flatten() {
            if !columns.contains(att) {
                columns.push(att.clone());
            }
        }
        let statement = Statement::SelectWhere {
            table: schema.name().to_string(),
            columns,
            filter: schema.lookupatts().to_vec(),
        };
        let params = schema.lookup_params(&nk);
        let mut versions = self.table.execute(&statement, &params)?.into_rows();
        let nulls_greatest = self.nulls_greatest;
        versions.sort_by(|a, b| {
            compare_ordering(a.get(&self.ordering), b.get(&self.ordering), nulls_greatest)
        });

        let starts_before = |v: &Value| {
            v.is_null() || if inclusive.from { v <= when } else { v < when }
        };
        let ends_after = |v: &Value| v.is_null() || if inclusive.to { v >= when } else { v > when };
        let key_att = self.table.key();
        let key_of = |version: &Row| version.get(key_att).cloned();
        let value_of =
            |version: &Row, att: &str| -> Value { version.get(att).cloned().unwrap_or_default() };

        let found = match (&from, &to) {
            (Some(from), Some(to)) => {
                let mut found = None;
                for version in &versions {
                    if ends_after(&value_of(version, to.as_str())) {
                        if starts_before(&value_of(version, from.as_str())) {
                            found = key_of(version);
                        }
                        break;
                    }
                }
                found
            }
            (Some(from), None) => versions
                .iter()
                .rev()
                .find(|v| starts_before(&value_of(*v, from.as_str())))
                .and_then(key_of),
            (None, Some(to)) => versions
                .iter()
                .find(|v| ends_after(&value_of(*v, to.as_str())))
                .and_then(key_of),
            (None, None) => None,
        };
        Ok(found)
    }

    // ===== Internals =====

    fn prefill(&mut self) -> DimxResult<()> {
        let schema = self.table.schema();
        let statement = Statement::SelectAll {
            table: schema.name().to_string(),
            columns: schema.all().to_vec(),
            limit: None,
        };
        let rs = self.table.execute(&statement, &Row::new())?;
        let versions = rs.len();

        let mut newest: AHashMap<NaturalKey, Row> = AHashMap::new();
        for row in rs.into_rows() {
            let nk = schema.natural_key(&row)?;
            match newest.entry(nk) {
                Entry::Vacant(e) => {
                    e.insert(row);
                }
                Entry::Occupied(mut e) => {
                    let order = compare_ordering(
                        row.get(&self.ordering),
                        e.get().get(&self.ordering),
                        self.nulls_greatest,
                    );
                    if order == Ordering::Greater {
                        e.insert(row);
                    }
                }
            }
        }

        let members = newest.len();
        if let Some(cache) = &mut self.cache {
            for (nk, row) in newest {
                let key = row.get(schema.key()).cloned().unwrap_or_default();
                cache.record(nk, key.clone());
                cache.record_row(key, row);
            }
            cache.mark_prefilled(false);
        }
        info!(table = %schema.name(), versions, members, "versioned cache prefilled");
        Ok(())
    }

    fn ambiguous(&self, detail: String) -> DimxError {
        DimxError::LookupAmbiguous {
            table: self.table.name().to_string(),
            detail,
        }
    }

    fn newest_key(&mut self, nk: &NaturalKey) -> DimxResult<Option<Value>> {
        if let Some(cache) = &mut self.cache {
            match cache.probe(nk) {
                Probe::Hit(key) => return Ok(Some(key)),
                Probe::Absent => return Ok(None),
                Probe::Unknown => {}
            }
        }

        let key_att = self.table.key().to_string();
        let params = self.table.schema().lookup_params(nk);
        let rows = self.table.execute(&self.newest_stmt, &params)?.into_rows();
        let mut best: Option<&Row> = None;
        let mut tied = false;
        for row in &rows {
            match best {
                None => best = Some(row),
                Some(b) => match compare_ordering(
                    row.get(&self.ordering),
                    b.get(&self.ordering),
                    self.nulls_greatest,
                ) {
                    Ordering::Greater => {
                        best = Some(row);
                        tied = false;
                    }
                    Ordering::Equal => tied = true,
                    Ordering::Less => {}
                },
            }
        }
        if tied {
            return Err(self.ambiguous(format!(
                "several versions share the newest {} value",
                self.ordering
            )));
        }

        let key = best.and_then(|row| row.get(&key_att)).cloned();
        if let (Some(cache), Some(key)) = (&mut self.cache, &key) {
            cache.record(nk.clone(), key.clone());
        }
        Ok(key)
    }

    /// Type-1 changes to write, and whether a new version is needed.
    fn classify(&self, row: &Row, current: &Row) -> DimxResult<(Row, bool)> {
        let schema = self.table.schema();
        let cfg = &self.config;
        let mut type1 = Row::new();
        let mut add_version = false;

        for att in schema.attributes() {
            if cfg.to_att.as_ref() == Some(att) {
                if current.get(att) != Some(&cfg.max_to) {
                    add_version = true;
                }
                continue;
            }
            if cfg.from_att.as_ref() == Some(att) {
                if let Some(src) = &cfg.src_date_att {
                    let started = row
                        .get(src)
                        .ok_or_else(|| DimxError::missing_attribute(schema.name(), src))?;
                    if current.get(att) != Some(started) {
                        add_version = true;
                    }
                }
                continue;
            }
            if *att == self.ordering || cfg.version_att.as_ref() == Some(att) {
                continue;
            }

            let value = row
                .get(att)
                .ok_or_else(|| DimxError::missing_attribute(schema.name(), att))?;
            if current.get(att) == Some(value) {
                continue;
            }
            if cfg.type1atts.contains(att) {
                type1.set(att.clone(), value.clone());
            } else {
                add_version = true;
            }
        }
        Ok((type1, add_version))
    }

    fn overwrite_type1(&mut self, nk: &NaturalKey, newest: &Value, changes: &Row) -> DimxResult<()> {
        let key_att = self.table.key().to_string();
        match self.config.type1_scope {
            Type1Scope::OpenVersion => {
                let mut update = changes.clone();
                update.set(key_att, newest.clone());
                self.table.update(&update)?;
                if let Some(cache) = &mut self.cache {
                    let refreshed = cache.row(newest).cloned().map(|mut row| {
                        row.merge(changes);
                        row
                    });
                    if let Some(row) = refreshed {
                        cache.record_row(newest.clone(), row);
                    }
                }
            }
            Type1Scope::AllVersions => {
                let schema = self.table.schema();
                let params = schema.lookup_params(nk);
                let keys = Statement::SelectWhere {
                    table: schema.name().to_string(),
                    columns: vec![key_att],
                    filter: schema.lookupatts().to_vec(),
                };
                let versions = self.table.execute(&keys, &params)?.into_rows();
                let overwrite = Statement::UpdateWhere {
                    table: schema.name().to_string(),
                    columns: changes.names().map(str::to_string).collect(),
                    filter: schema.lookupatts().to_vec(),
                };
                let mut update = changes.clone();
                update.merge(&params);
                self.table.execute(&overwrite, &update)?;

                if let Some(cache) = &mut self.cache {
                    for version in &versions {
                        if let Some(key) = version.get(schema.key()) {
                            cache.forget_row(key);
                        }
                    }
                }
            }
        }
        debug!(
            table = %self.table.name(),
            key = %newest,
            scope = ?self.config.type1_scope,
            "type-1 attributes overwritten"
        );
        Ok(())
    }

    fn remember(&mut self, nk: NaturalKey, key: &Value, row: &Row) -> DimxResult<()> {
        if let Some(cache) = &mut self.cache {
            let stored = self.table.schema().stored_row(key, row)?;
            cache.record(nk, key.clone());
            cache.record_row(key.clone(), stored);
        }
        Ok(())
    }

    fn insert_first_version(&mut self, nk: NaturalKey, row: &mut Row) -> DimxResult<Value> {
        let name = self.table.name().to_string();
        if let Some(version) = &self.config.version_att {
            row.set(version.clone(), 1);
        }
        if let Some(from) = self.config.from_att.clone() {
            if !row.contains(&from) {
                let start = match &self.config.min_from {
                    Some(min) => min.clone(),
                    None => self.validity_start.resolve(&name, row)?,
                };
                row.set(from, start);
            }
        }
        if let Some(to) = &self.config.to_att {
            if !row.contains(to) {
                row.set(to.clone(), self.config.max_to.clone());
            }
        }

        let key = self.table.insert(row)?;
        row.set(self.table.key().to_string(), key.clone());
        self.remember(nk, &key, row)?;
        debug!(table = %name, key = %key, "first version inserted");
        Ok(key)
    }

    fn insert_next_version(
        &mut self,
        nk: NaturalKey,
        row: &mut Row,
        previous: &Value,
        current: &Row,
    ) -> DimxResult<Value> {
        let name = self.table.name().to_string();
        let key_att = self.table.key().to_string();
        row.remove(&key_att);

        if let Some(version) = &self.config.version_att {
            let old = match current.get(version) {
                Some(Value::Int(v)) => *v,
                other => {
                    return Err(DimxError::TypeMismatch {
                        expected: "int".to_string(),
                        actual: other.map_or("missing", Value::type_name).to_string(),
                    });
                }
            };
            row.set(version.clone(), old + 1);
        }
        if let Some(from) = self.config.from_att.clone() {
            let start = self.validity_start.resolve(&name, row)?;
            row.set(from, start);
        }
        if let Some(to) = &self.config.to_att {
            row.set(to.clone(), self.config.max_to.clone());
        }

        let key = self.table.insert(row)?;
        row.set(key_att.clone(), key.clone());

        if let Some(to) = self.config.to_att.clone() {
            if current.get(&to) == Some(&self.config.max_to) {
                let end = match (&mut self.validity_end, &self.config.from_att) {
                    (Some(end), _) => end(&*row)?,
                    (None, Some(from)) => row.get(from).cloned().unwrap_or_default(),
                    (None, None) => self.validity_start.resolve(&name, row)?,
                };
                let close = Row::new().with(key_att, previous.clone()).with(to, end);
                self.table.update(&close)?;
            }
        }

        if let Some(cache) = &mut self.cache {
            cache.forget_row(previous);
        }
        self.remember(nk, &key, row)?;
        debug!(table = %name, previous = %previous, key = %key, "new version inserted");
        Ok(key)
    }
}

impl Dimension for SlowlyChangingDimension {
    fn schema(&self) -> &TableSchema {
        self.table.schema()
    }

    /// Key of the newest version.
    fn lookup(&mut self, row: &Row) -> DimxResult<Option<Value>> {
        let nk = self.table.schema().natural_key(row)?;
        self.newest_key(&nk)
    }

    /// Insert `row` as given; it becomes the cached newest version.
    fn insert(&mut self, row: &Row) -> DimxResult<Value> {
        let nk = self.table.schema().natural_key(row)?;
        let key = self.table.insert(row)?;
        self.remember(nk, &key, row)?;
        Ok(key)
    }

    fn get_by_key(&mut self, key: &Value) -> DimxResult<Option<Row>> {
        if let Some(row) = self.cache.as_ref().and_then(|c| c.row(key)) {
            return Ok(Some(row.clone()));
        }
        let row = self.table.get_by_key(key)?;
        if let (Some(cache), Some(row)) = (&mut self.cache, &row) {
            cache.record_row(key.clone(), row.clone());
        }
        Ok(row)
    }

    fn get_by_vals(&mut self, values: &Row) -> DimxResult<Vec<Row>> {
        self.table.get_by_vals(values)
    }

    fn update(&mut self, row: &Row) -> DimxResult<()> {
        let key = row
            .get(self.table.key())
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| DimxError::missing_attribute(self.table.name(), self.table.key()))?;
        let schema = self.table.schema();
        let touches_lookup = row.names().any(|n| schema.is_lookup_attribute(n));
        if touches_lookup && self.cache.is_some() {
            if let Some(old) = self.get_by_key(&key)? {
                let old_nk = self.table.schema().natural_key(&old)?;
                if let Some(cache) = &mut self.cache {
                    cache.forget(&old_nk);
                }
            }
        }
        if let Some(cache) = &mut self.cache {
            cache.forget_row(&key);
        }
        self.table.update(row)
    }

    fn end_load(&mut self) -> DimxResult<()> {
        self.table.end_load()
    }

    fn scd_ensure(&mut self, row: &mut Row) -> DimxResult<Value> {
        SlowlyChangingDimension::scd_ensure(self, row)
    }
}

impl fmt::Debug for SlowlyChangingDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlowlyChangingDimension")
            .field("table", &self.table)
            .field("ordering", &self.ordering)
            .field("validity_start", &self.validity_start)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn customer_table(store: &Arc<MemoryStore>) -> DimensionTable {
        DimensionTable::builder(
            store.clone(),
            "customer",
            "customerid",
            ["custno", "name", "city", "version", "validfrom", "validto"],
        )
        .lookupatts(["custno"])
        .build()
        .unwrap()
    }

    fn customer(store: &Arc<MemoryStore>, versioning: VersioningConfig) -> SlowlyChangingDimension {
        SlowlyChangingDimension::builder(customer_table(store), versioning)
            .validity_start(ValidityStart::FromAttribute("changed".into()))
            .build()
            .unwrap()
    }

    fn versioned() -> VersioningConfig {
        VersioningConfig::new()
            .with_version("version")
            .with_validity("validfrom", "validto")
    }

    fn source(city: &str, changed: Value) -> Row {
        row! { "custno" => 1, "name" => "Ann", "city" => city, "changed" => changed }
    }

    #[test]
    fn ordering_defaults_to_version() {
        let store = Arc::new(MemoryStore::new());
        let dim = customer(&store, versioned());
        assert_eq!(dim.ordering_attribute(), "version");
        let dim = customer(&store, VersioningConfig::new().with_validity("validfrom", "validto"));
        assert_eq!(dim.ordering_attribute(), "validto");
    }

    #[test]
    fn versioning_attribute_in_lookupatts_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let table = DimensionTable::builder(store.clone(), "c", "id", ["custno", "version"])
            .lookupatts(["custno", "version"])
            .build()
            .unwrap();
        let err = SlowlyChangingDimension::builder(table, VersioningConfig::new().with_version("version"))
            .build()
            .unwrap_err();
        assert!(matches!(err, DimxError::Configuration(_)));
    }

    #[test]
    fn cached_table_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let table = DimensionTable::builder(store.clone(), "c", "id", ["custno", "version"])
            .lookupatts(["custno"])
            .cache(CacheConfig::default())
            .build()
            .unwrap();
        assert!(
            SlowlyChangingDimension::builder(table, VersioningConfig::new().with_version("version"))
                .build()
                .is_err()
        );
    }

    #[test]
    fn change_creates_version_and_closes_previous() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = customer(&store, versioned());

        let mut first = source("Aalborg", date(2024, 1, 1));
        let k1 = dim.scd_ensure(&mut first).unwrap();
        assert_eq!(first.get("version"), Some(&Value::Int(1)));
        assert_eq!(first.get("validfrom"), Some(&date(2024, 1, 1)));
        assert_eq!(first.get("validto"), Some(&Value::Null));

        let mut moved = source("Aarhus", date(2024, 6, 1));
        let k2 = dim.scd_ensure(&mut moved).unwrap();
        assert_ne!(k1, k2);
        assert_eq!(moved.get("version"), Some(&Value::Int(2)));

        let old = dim.get_by_key(&k1).unwrap().unwrap();
        assert_eq!(old.get("validto"), Some(&date(2024, 6, 1)));
        assert_eq!(dim.lookup(&row! { "custno" => 1 }).unwrap(), Some(k2));
    }

    #[test]
    fn unchanged_row_gets_existing_version_values() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = customer(&store, versioned());
        let mut first = source("Aalborg", date(2024, 1, 1));
        let key = dim.scd_ensure(&mut first).unwrap();

        let mut again = source("Aalborg", date(2024, 1, 1));
        assert_eq!(dim.scd_ensure(&mut again).unwrap(), key);
        assert_eq!(again.get("customerid"), Some(&key));
        assert_eq!(again.get("version"), Some(&Value::Int(1)));
        assert_eq!(store.row_count("customer"), 1);
    }

    #[test]
    fn type1_change_overwrites_open_version_only() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = customer(&store, versioned().with_type1atts(["name"]));
        dim.scd_ensure(&mut source("Aalborg", date(2024, 1, 1))).unwrap();
        dim.scd_ensure(&mut source("Aarhus", date(2024, 6, 1))).unwrap();

        let mut renamed = source("Aarhus", date(2024, 6, 1)).with("name", "Anne");
        dim.scd_ensure(&mut renamed).unwrap();

        let rows = store.rows("customer");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&Value::from("Ann")));
        assert_eq!(rows[1].get("name"), Some(&Value::from("Anne")));
    }

    #[test]
    fn type1_change_can_overwrite_all_versions() {
        let store = Arc::new(MemoryStore::new());
        let versioning = versioned()
            .with_type1atts(["name"])
            .with_type1_scope(Type1Scope::AllVersions);
        let mut dim = customer(&store, versioning);
        dim.scd_ensure(&mut source("Aalborg", date(2024, 1, 1))).unwrap();
        dim.scd_ensure(&mut source("Aarhus", date(2024, 6, 1))).unwrap();
        dim.scd_ensure(&mut source("Aarhus", date(2024, 6, 1)).with("name", "Anne"))
            .unwrap();

        assert!(
            store
                .rows("customer")
                .iter()
                .all(|r| r.get("name") == Some(&Value::from("Anne")))
        );
    }

    #[test]
    fn missing_compared_attribute_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = customer(&store, versioned());
        dim.scd_ensure(&mut source("Aalborg", date(2024, 1, 1))).unwrap();
        let mut partial = row! { "custno" => 1, "name" => "Ann", "changed" => date(2024, 2, 1) };
        let err = dim.scd_ensure(&mut partial).unwrap_err();
        assert!(matches!(err, DimxError::Configuration(_)));
    }

    #[test]
    fn closed_member_gets_new_version_and_close_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = customer(&store, versioned());
        let mut first = source("Aalborg", date(2024, 1, 1));
        let k1 = dim.scd_ensure(&mut first).unwrap();

        dim.close_current(&first, date(2024, 3, 1)).unwrap();
        dim.close_current(&first, date(2024, 4, 1)).unwrap();
        let closed = dim.get_by_key(&k1).unwrap().unwrap();
        assert_eq!(closed.get("validto"), Some(&date(2024, 3, 1)));

        let mut back = source("Aalborg", date(2024, 5, 1));
        let k2 = dim.scd_ensure(&mut back).unwrap();
        assert_ne!(k1, k2);
        let closed = dim.get_by_key(&k1).unwrap().unwrap();
        assert_eq!(closed.get("validto"), Some(&date(2024, 3, 1)));
    }

    #[test]
    fn close_current_needs_to_attribute_and_member() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = customer(&store, VersioningConfig::new().with_version("version"));
        let err = dim.close_current(&row! { "custno" => 1 }, date(2024, 1, 1)).unwrap_err();
        assert!(matches!(err, DimxError::Configuration(_)));

        let mut dim = customer(&store, versioned());
        let err = dim.close_current(&row! { "custno" => 9 }, date(2024, 1, 1)).unwrap_err();
        assert!(matches!(err, DimxError::NotFound(_)));
    }

    #[test]
    fn tied_ordering_values_are_ambiguous() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "customer",
            vec![
                row! { "customerid" => 1, "custno" => 1, "name" => "a", "city" => "x",
                       "version" => 1, "validfrom" => Value::Null, "validto" => Value::Null },
                row! { "customerid" => 2, "custno" => 1, "name" => "a", "city" => "y",
                       "version" => 1, "validfrom" => Value::Null, "validto" => Value::Null },
            ],
        );
        for use_order_by in [true, false] {
            let mut dim = customer(&store, versioned().with_order_by(use_order_by));
            let err = dim.lookup(&row! { "custno" => 1 }).unwrap_err();
            assert!(matches!(err, DimxError::LookupAmbiguous { .. }));
        }
    }

    #[test]
    fn scan_and_order_by_agree() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            "customer",
            vec![
                row! { "customerid" => 1, "custno" => 1, "name" => "a", "city" => "x",
                       "version" => 1, "validfrom" => date(2024, 1, 1), "validto" => date(2024, 2, 1) },
                row! { "customerid" => 2, "custno" => 1, "name" => "a", "city" => "y",
                       "version" => 2, "validfrom" => date(2024, 2, 1), "validto" => Value::Null },
            ],
        );
        for use_order_by in [true, false] {
            let mut dim = customer(
                &store,
                VersioningConfig::new()
                    .with_validity("validfrom", "validto")
                    .with_order_by(use_order_by),
            );
            assert_eq!(
                dim.lookup(&row! { "custno" => 1 }).unwrap(),
                Some(Value::Int(2))
            );
        }
    }

    #[test]
    fn lookup_as_of_respects_interval_ends() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = customer(&store, versioned());
        let k1 = dim.scd_ensure(&mut source("Aalborg", date(2024, 1, 1))).unwrap();
        let k2 = dim.scd_ensure(&mut source("Aarhus", date(2024, 6, 1))).unwrap();
        let member = row! { "custno" => 1 };

        let at = |dim: &mut SlowlyChangingDimension, when: Value, inclusive| {
            dim.lookup_as_of(&member, &when, inclusive).unwrap()
        };
        assert_eq!(at(&mut dim, date(2023, 12, 31), Inclusive::HALF_OPEN), None);
        assert_eq!(at(&mut dim, date(2024, 3, 1), Inclusive::HALF_OPEN), Some(k1.clone()));
        assert_eq!(at(&mut dim, date(2024, 6, 1), Inclusive::HALF_OPEN), Some(k2.clone()));
        assert_eq!(at(&mut dim, date(2024, 6, 1), Inclusive::CLOSED), Some(k1));
        assert_eq!(at(&mut dim, date(2030, 1, 1), Inclusive::HALF_OPEN), Some(k2));

        let open = Inclusive { from: false, to: false };
        assert!(dim.lookup_as_of(&member, &date(2024, 3, 1), open).is_err());
    }

    #[test]
    fn min_from_is_used_for_first_versions() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = customer(&store, versioned().with_min_from(date(1900, 1, 1)));
        let mut first = source("Aalborg", date(2024, 1, 1));
        dim.scd_ensure(&mut first).unwrap();
        assert_eq!(first.get("validfrom"), Some(&date(1900, 1, 1)));
    }

    #[test]
    fn prefilled_cache_answers_without_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut dim = customer(&store, versioned());
            dim.scd_ensure(&mut source("Aalborg", date(2024, 1, 1))).unwrap();
            dim.scd_ensure(&mut source("Aarhus", date(2024, 6, 1))).unwrap();
        }
        let mut dim = SlowlyChangingDimension::builder(customer_table(&store), versioned())
            .validity_start(ValidityStart::FromAttribute("changed".into()))
            .cache(CacheConfig::unbounded().with_prefill(true))
            .build()
            .unwrap();
        assert!(dim.is_cache_complete());

        store.reset_stats();
        assert_eq!(dim.lookup(&row! { "custno" => 1 }).unwrap(), Some(Value::Int(2)));
        assert_eq!(dim.lookup(&row! { "custno" => 2 }).unwrap(), None);
        assert_eq!(store.stats().selects, 0);
    }

    #[test]
    fn validity_end_callback_closes_previous_version() {
        let store = Arc::new(MemoryStore::new());
        let mut dim = SlowlyChangingDimension::builder(customer_table(&store), versioned())
            .validity_start(ValidityStart::FromAttribute("changed".into()))
            .validity_end(|row: &Row| match row.get("changed") {
                Some(Value::Date(d)) => Ok(Value::Date(d.pred_opt().unwrap_or(*d))),
                _ => Ok(Value::Null),
            })
            .build()
            .unwrap();
        let k1 = dim.scd_ensure(&mut source("Aalborg", date(2024, 1, 1))).unwrap();
        dim.scd_ensure(&mut source("Aarhus", date(2024, 6, 1))).unwrap();
        let old = dim.get_by_key(&k1).unwrap().unwrap();
        assert_eq!(old.get("validto"), Some(&date(2024, 5, 31)));
    }
}
