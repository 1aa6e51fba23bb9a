//! Type-1 slowly changing dimension.

use crate::cache::FifoCache;
use crate::config::DimensionConfig;
use crate::dimension::{Dimension, DimensionTable, DimensionTableBuilder};
use crate::error::{DimxError, DimxResult};
use crate::row::{Row, Value};
use crate::schema::TableSchema;
use crate::store::BackingStore;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Dimension whose `type1atts` are overwritten when they change.
#[derive(Debug)]
pub struct TypeOneDimension {
    table: DimensionTable,
    type1atts: Vec<String>,
    /// key → type-1 values, in `type1atts` order
    known: Option<FifoCache<Value, Vec<Value>>>,
}

impl TypeOneDimension {
    /// `type1atts` empty means every attribute that is not a lookup
    /// attribute.
    pub fn new(table: DimensionTable, type1atts: Vec<String>) -> DimxResult<Self> {
        let schema = table.schema();
        let type1atts = if type1atts.is_empty() {
            schema
                .attributes()
                .iter()
                .filter(|a| !schema.is_lookup_attribute(a))
                .cloned()
                .collect()
        } else {
            type1atts
        };
        validate(schema, &type1atts)?;

        let known = if table.has_cache() {
            Some(match table.cache_capacity().and_then(NonZeroUsize::new) {
                Some(cap) => FifoCache::bounded(cap),
                None => FifoCache::unbounded(),
            })
        } else {
            None
        };
        Ok(Self {
            table,
            type1atts,
            known,
        })
    }

    pub fn from_config(config: &DimensionConfig, store: Arc<dyn BackingStore>) -> DimxResult<Self> {
        let table = DimensionTableBuilder::from_config(config, store).build()?;
        Self::new(table, config.type1atts.clone().unwrap_or_default())
    }

    pub fn type1atts(&self) -> &[String] {
        &self.type1atts
    }

    pub fn table(&self) -> &DimensionTable {
        &self.table
    }

    fn insert_expanded(&mut self, row: &Row) -> DimxResult<Value> {
        let expanded = self.table.expand(row)?;
        self.insert(expanded.as_ref().unwrap_or(row))
    }

    fn remember(&mut self, key: &Value, row: &Row) {
        if let Some(known) = &mut self.known {
            let values = self
                .type1atts
                .iter()
                .map(|a| row.get(a).cloned().unwrap_or_default())
                .collect();
            known.insert(key.clone(), values);
        }
    }

    fn current_values(&mut self, key: &Value) -> DimxResult<Vec<Value>> {
        if let Some(values) = self.known.as_ref().and_then(|k| k.get(key)) {
            return Ok(values.clone());
        }
        let row = self.table.get_by_key(key)?.ok_or_else(|| {
            DimxError::NotFound(format!("member {key} of '{}'", self.table.name()))
        })?;
        self.remember(key, &row);
        Ok(self
            .type1atts
            .iter()
            .map(|a| row.get(a).cloned().unwrap_or_default())
            .collect())
    }
}

fn validate(schema: &TableSchema, type1atts: &[String]) -> DimxResult<()> {
    if type1atts.is_empty() {
        return Err(DimxError::Configuration(format!(
            "type-1 dimension '{}' has no type-1 attributes",
            schema.name()
        )));
    }
    for att in type1atts {
        if !schema.attributes().contains(att) {
            return Err(DimxError::Configuration(format!(
                "type-1 attribute '{att}' is not an attribute of '{}'",
                schema.name()
            )));
        }
        if schema.is_lookup_attribute(att) {
            return Err(DimxError::Configuration(format!(
                "'{att}' of '{}' cannot be both a lookup and a type-1 attribute",
                schema.name()
            )));
        }
    }
    Ok(())
}

impl Dimension for TypeOneDimension {
    fn schema(&self) -> &TableSchema {
        self.table.schema()
    }

    fn lookup(&mut self, row: &Row) -> DimxResult<Option<Value>> {
        self.table.lookup(row)
    }

    fn insert(&mut self, row: &Row) -> DimxResult<Value> {
        let key = self.table.insert(row)?;
        self.remember(&key, row);
        Ok(key)
    }

    fn ensure(&mut self, row: &Row) -> DimxResult<Value> {
        match self.table.find(row)? {
            Some(key) => Ok(key),
            None => self.insert_expanded(row),
        }
    }

    fn get_by_key(&mut self, key: &Value) -> DimxResult<Option<Row>> {
        self.table.get_by_key(key)
    }

    fn get_by_vals(&mut self, values: &Row) -> DimxResult<Vec<Row>> {
        self.table.get_by_vals(values)
    }

    fn update(&mut self, row: &Row) -> DimxResult<()> {
        self.table.update(row)?;
        if let (Some(known), Some(key)) = (&mut self.known, row.get(self.table.key())) {
            known.remove(key);
        }
        Ok(())
    }

    fn end_load(&mut self) -> DimxResult<()> {
        self.table.end_load()
    }

    fn default_id_value(&self) -> Option<&Value> {
        self.table.default_id_value()
    }

    /// Insert a new member, or overwrite the type-1 attributes present in
    /// `row` that differ from the stored member. The key is written into
    /// `row`.
    fn scd_ensure(&mut self, row: &mut Row) -> DimxResult<Value> {
        let key_att = self.table.key().to_string();
        let Some(key) = self.table.find(row)? else {
            let key = self.insert_expanded(row)?;
            row.set(key_att, key.clone());
            return Ok(key);
        };
        row.set(key_att.clone(), key.clone());

        let mut values = self.current_values(&key)?;
        let mut changes = Row::new();
        for (att, current) in self.type1atts.iter().zip(values.iter_mut()) {
            if let Some(new) = row.get(att) {
                if new != current {
                    changes.set(att.clone(), new.clone());
                    *current = new.clone();
                }
            }
        }
        if changes.is_empty() {
            return Ok(key);
        }

        debug!(
            table = %self.table.name(),
            key = %key,
            changed = changes.len(),
            "overwriting type-1 attributes"
        );
        let mut update = changes;
        update.set(key_att, key.clone());
        self.table.update(&update)?;
        if let Some(known) = &mut self.known {
            known.insert(key.clone(), values);
        }
        Ok(key)
    }
}
