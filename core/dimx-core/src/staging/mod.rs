//! Staging batch for bulk-loaded dimensions.
//!
//! Inserted rows are appended to a delimited temporary file and kept as
//! pending entries (by natural key and by surrogate key) so they resolve
//! before they reach the store. A flush hands the file to the
//! [`BulkLoader`] once; only a successful load clears the batch.

use crate::config::StagingConfig;
use crate::error::{DimxError, DimxResult};
use crate::row::{NaturalKey, Row, Value};
use ahash::AHashMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Delimited staging artifact handed to the bulk loader.
pub struct StagedFile {
    file: NamedTempFile,
    rows: usize,
}

impl StagedFile {
    pub(crate) fn new() -> DimxResult<Self> {
        Ok(Self {
            file: NamedTempFile::new()?,
            rows: 0,
        })
    }

    /// Location on disk, for loaders that ingest by file name.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of rows currently staged.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Fresh handle positioned at the start of the file.
    pub fn reader(&self) -> DimxResult<File> {
        Ok(self.file.reopen()?)
    }

    pub fn read_to_string(&self) -> DimxResult<String> {
        let mut content = String::new();
        self.reader()?.read_to_string(&mut content)?;
        Ok(content)
    }

    fn append(&mut self, line: &str) -> DimxResult<()> {
        self.file.as_file_mut().write_all(line.as_bytes())?;
        self.rows += 1;
        Ok(())
    }

    fn sync(&mut self) -> DimxResult<()> {
        self.file.as_file_mut().flush()?;
        Ok(())
    }

    fn truncate(&mut self) -> DimxResult<()> {
        let file = self.file.as_file_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        self.rows = 0;
        Ok(())
    }
}

impl fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedFile")
            .field("path", &self.path())
            .field("rows", &self.rows)
            .finish()
    }
}

/// Arguments of one bulk load.
#[derive(Debug, Clone, Copy)]
pub struct BulkLoad<'a> {
    pub table: &'a str,
    /// Column order of every staged line.
    pub attributes: &'a [String],
    pub field_separator: &'a str,
    pub row_separator: &'a str,
    pub null_token: Option<&'a str>,
    pub file: &'a StagedFile,
    /// The staged rows with their original types, in file order. In-process
    /// loaders read these instead of parsing the file back.
    pub rows: &'a [Row],
}

type LoaderFn = dyn FnMut(&BulkLoad<'_>) -> DimxResult<()> + Send;

/// Vendor-specific bulk ingestion of a staged file.
pub struct BulkLoader(Box<LoaderFn>);

impl BulkLoader {
    pub fn new<F>(loader: F) -> Self
    where
        F: FnMut(&BulkLoad<'_>) -> DimxResult<()> + Send + 'static,
    {
        Self(Box::new(loader))
    }

    fn load(&mut self, load: &BulkLoad<'_>) -> DimxResult<()> {
        (self.0)(load)
    }
}

impl fmt::Debug for BulkLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BulkLoader")
    }
}

/// A member promoted out of the batch after a successful flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promoted {
    pub natural_key: NaturalKey,
    pub key: Value,
    pub row: Row,
}

/// Rows accepted for insertion but not yet loaded into the store.
#[derive(Debug)]
pub struct StagingBatch {
    table: String,
    columns: Vec<String>,
    config: StagingConfig,
    loader: BulkLoader,
    file: StagedFile,
    by_vals: AHashMap<NaturalKey, Value>,
    by_key: AHashMap<Value, Row>,
    order: Vec<(NaturalKey, Value)>,
}

impl StagingBatch {
    /// `columns` fixes the field order of every staged line.
    pub fn new(
        table: impl Into<String>,
        columns: Vec<String>,
        config: StagingConfig,
        loader: BulkLoader,
    ) -> DimxResult<Self> {
        let table = table.into();
        config.validate(&table)?;
        Ok(Self {
            table,
            columns,
            config,
            loader,
            file: StagedFile::new()?,
            by_vals: AHashMap::new(),
            by_key: AHashMap::new(),
            order: Vec::new(),
        })
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.order.len() >= self.config.batch_size
    }

    pub fn pending_key(&self, nk: &NaturalKey) -> Option<&Value> {
        self.by_vals.get(nk)
    }

    pub fn pending_row(&self, key: &Value) -> Option<&Row> {
        self.by_key.get(key)
    }

    /// Pending rows in staging order.
    pub fn pending_rows(&self) -> impl Iterator<Item = &Row> {
        self.order.iter().filter_map(|(_, key)| self.by_key.get(key))
    }

    /// Stage a complete stored row. Nothing is written when the row cannot
    /// be encoded or its natural key is already pending.
    pub fn stage(&mut self, nk: NaturalKey, key: Value, row: Row) -> DimxResult<()> {
        if self.by_vals.contains_key(&nk) {
            return Err(DimxError::ConstraintViolation(format!(
                "a member with the same lookup values is already staged for '{}'",
                self.table
            )));
        }
        if self.by_key.contains_key(&key) {
            return Err(DimxError::ConstraintViolation(format!(
                "key {key} is already staged for '{}'",
                self.table
            )));
        }
        let line = self.encode(&row)?;
        self.file.append(&line)?;
        self.by_vals.insert(nk.clone(), key.clone());
        self.by_key.insert(key.clone(), row);
        self.order.push((nk, key));
        Ok(())
    }

    /// Load the batch. On success the pending members are returned in
    /// staging order and the batch is empty; on failure it is untouched.
    #[instrument(skip(self), fields(table = %self.table, rows = self.order.len()))]
    pub fn flush(&mut self) -> DimxResult<Vec<Promoted>> {
        if self.order.is_empty() {
            return Ok(Vec::new());
        }
        self.file.sync()?;

        let rows: Vec<Row> = self.pending_rows().cloned().collect();
        let load = BulkLoad {
            table: &self.table,
            attributes: &self.columns,
            field_separator: &self.config.field_separator,
            row_separator: &self.config.row_separator,
            null_token: self.config.null_token.as_deref(),
            file: &self.file,
            rows: &rows,
        };
        if let Err(err) = self.loader.load(&load) {
            debug!(error = %err, "bulk load failed, batch kept for retry");
            return Err(err);
        }

        self.file.truncate()?;
        self.by_vals.clear();
        let mut promoted = Vec::with_capacity(self.order.len());
        for (natural_key, key) in self.order.drain(..) {
            if let Some(row) = self.by_key.remove(&key) {
                promoted.push(Promoted {
                    natural_key,
                    key,
                    row,
                });
            }
        }
        info!(rows = promoted.len(), "staging batch loaded");
        Ok(promoted)
    }

    /// A value whose text contains a separator or equals the null token
    /// cannot be read back from the file and is refused.
    fn encode(&self, row: &Row) -> DimxResult<String> {
        let mut fields = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            match row.get(column) {
                None | Some(Value::Null) => match &self.config.null_token {
                    Some(token) => fields.push(token.clone()),
                    None => {
                        return Err(DimxError::Configuration(format!(
                            "'{column}' of table '{}' is null and no null token is configured",
                            self.table
                        )));
                    }
                },
                Some(value) => {
                    let text = value.to_string();
                    if text.contains(self.config.field_separator.as_str())
                        || text.contains(self.config.row_separator.as_str())
                        || self.config.null_token.as_deref() == Some(text.as_str())
                    {
                        return Err(DimxError::Configuration(format!(
                            "'{column}' of table '{}' holds {text:?}, which collides with the staging separators or null token",
                            self.table
                        )));
                    }
                    fields.push(text);
                }
            }
        }
        let mut line = fields.join(&self.config.field_separator);
        line.push_str(&self.config.row_separator);
        Ok(line)
    }
}
