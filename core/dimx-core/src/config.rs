//! Dimension configuration.
//!
//! Every option has a `Default` and a chained `with_*` setter. A whole table
//! definition can also be loaded from JSON:
//!
//! ```rust
//! use dimx_core::config::DimensionConfig;
//!
//! let config = DimensionConfig::from_json_str(r#"{
//!     "name": "book",
//!     "key": "bookid",
//!     "attributes": ["name", "genre"],
//!     "lookupatts": ["name"],
//!     "cache": { "size": 1000, "prefill": true }
//! }"#).unwrap();
//! assert_eq!(config.cache.unwrap().size, Some(1000));
//! ```
//!
//! Callbacks (bulk loader, key generator, validity start) are not
//! serializable and are supplied on the builders.

use crate::error::{DimxError, DimxResult};
use crate::row::Value;
use crate::schema::Quote;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lookup cache options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached members; `None` caches without bound.
    pub size: Option<usize>,
    /// Load existing members when the dimension is built.
    pub prefill: bool,
    /// Cache complete rows (key → row) in addition to natural key → key.
    pub cache_full_rows: bool,
    /// Cache members right after they are inserted.
    pub cache_on_insert: bool,
    /// Limit the prefill query to `size` rows with `FETCH FIRST`.
    pub use_fetch_first: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: Some(10_000),
            prefill: false,
            cache_full_rows: false,
            cache_on_insert: true,
            use_fetch_first: false,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unbounded() -> Self {
        Self {
            size: None,
            ..Self::default()
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_prefill(mut self, prefill: bool) -> Self {
        self.prefill = prefill;
        self
    }

    pub fn with_full_rows(mut self, cache_full_rows: bool) -> Self {
        self.cache_full_rows = cache_full_rows;
        self
    }

    pub fn with_cache_on_insert(mut self, cache_on_insert: bool) -> Self {
        self.cache_on_insert = cache_on_insert;
        self
    }

    pub fn with_fetch_first(mut self, use_fetch_first: bool) -> Self {
        self.use_fetch_first = use_fetch_first;
        self
    }
}

/// Staging file layout and flush threshold for bulk loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub field_separator: String,
    pub row_separator: String,
    /// Written for NULL values. Staging a NULL without a token is an error.
    pub null_token: Option<String>,
    /// Rows per flush.
    pub batch_size: usize,
    /// Answer reads from the cache and pending rows instead of flushing
    /// first.
    pub trust_cache: bool,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            field_separator: "\t".to_string(),
            row_separator: "\n".to_string(),
            null_token: None,
            batch_size: 5000,
            trust_cache: false,
        }
    }
}

impl StagingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_separators(
        mut self,
        field_separator: impl Into<String>,
        row_separator: impl Into<String>,
    ) -> Self {
        self.field_separator = field_separator.into();
        self.row_separator = row_separator.into();
        self
    }

    pub fn with_null_token(mut self, token: impl Into<String>) -> Self {
        self.null_token = Some(token.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_trust_cache(mut self, trust_cache: bool) -> Self {
        self.trust_cache = trust_cache;
        self
    }

    pub(crate) fn validate(&self, table: &str) -> DimxResult<()> {
        if self.batch_size == 0 {
            return Err(DimxError::Configuration(format!(
                "batch size of table '{table}' must be positive"
            )));
        }
        if self.field_separator.is_empty() || self.row_separator.is_empty() {
            return Err(DimxError::Configuration(format!(
                "staging separators of table '{table}' must not be empty"
            )));
        }
        if self.field_separator == self.row_separator {
            return Err(DimxError::Configuration(format!(
                "field and row separator of table '{table}' are identical"
            )));
        }
        Ok(())
    }
}

/// Which versions a type-1 change is written to in a combined type-1/type-2
/// dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type1Scope {
    /// Only the newest version is overwritten.
    #[default]
    OpenVersion,
    /// Every version of the member is overwritten.
    AllVersions,
}

/// Type-2 versioning attributes and policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    pub version_att: Option<String>,
    pub from_att: Option<String>,
    pub to_att: Option<String>,
    /// Attribute whose greatest value marks the newest version.
    pub ordering_att: Option<String>,
    /// Source attribute holding the date a version becomes valid.
    pub src_date_att: Option<String>,
    /// `from` value of a first version. `Some(Value::Null)` stores NULL.
    pub min_from: Option<Value>,
    /// `to` value of the open version.
    pub max_to: Value,
    /// Attributes overwritten in place instead of versioned.
    pub type1atts: Vec<String>,
    pub type1_scope: Type1Scope,
    /// Find the newest version with `ORDER BY` in the store instead of
    /// scanning every version client side.
    pub use_order_by: bool,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            version_att: None,
            from_att: None,
            to_att: None,
            ordering_att: None,
            src_date_att: None,
            min_from: None,
            max_to: Value::Null,
            type1atts: Vec::new(),
            type1_scope: Type1Scope::OpenVersion,
            use_order_by: true,
        }
    }
}

impl VersioningConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, att: impl Into<String>) -> Self {
        self.version_att = Some(att.into());
        self
    }

    pub fn with_validity(mut self, from_att: impl Into<String>, to_att: impl Into<String>) -> Self {
        self.from_att = Some(from_att.into());
        self.to_att = Some(to_att.into());
        self
    }

    pub fn with_from(mut self, att: impl Into<String>) -> Self {
        self.from_att = Some(att.into());
        self
    }

    pub fn with_to(mut self, att: impl Into<String>) -> Self {
        self.to_att = Some(att.into());
        self
    }

    pub fn with_ordering(mut self, att: impl Into<String>) -> Self {
        self.ordering_att = Some(att.into());
        self
    }

    pub fn with_src_date(mut self, att: impl Into<String>) -> Self {
        self.src_date_att = Some(att.into());
        self
    }

    pub fn with_min_from(mut self, value: impl Into<Value>) -> Self {
        self.min_from = Some(value.into());
        self
    }

    pub fn with_max_to(mut self, value: impl Into<Value>) -> Self {
        self.max_to = value.into();
        self
    }

    pub fn with_type1atts<I, S>(mut self, atts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.type1atts = atts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_type1_scope(mut self, scope: Type1Scope) -> Self {
        self.type1_scope = scope;
        self
    }

    pub fn with_order_by(mut self, use_order_by: bool) -> Self {
        self.use_order_by = use_order_by;
        self
    }

    /// Ordering attribute: explicit, else version, else to, else from.
    pub fn ordering_attribute(&self) -> DimxResult<&str> {
        self.ordering_att
            .as_deref()
            .or(self.version_att.as_deref())
            .or(self.to_att.as_deref())
            .or(self.from_att.as_deref())
            .ok_or_else(|| {
                DimxError::Configuration(
                    "a versioned dimension needs an ordering, version, to or from attribute"
                        .to_string(),
                )
            })
    }
}

/// Serializable definition of one dimension table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub name: String,
    pub key: String,
    pub attributes: Vec<String>,
    #[serde(default)]
    pub lookupatts: Vec<String>,
    #[serde(default)]
    pub quote: Quote,
    /// No caching when absent.
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    /// Direct inserts when absent.
    #[serde(default)]
    pub staging: Option<StagingConfig>,
    /// Returned by `lookup` when no member matches.
    #[serde(default)]
    pub default_id_value: Option<Value>,
    /// Attributes of a type-1 slowly changing dimension.
    #[serde(default)]
    pub type1atts: Option<Vec<String>>,
    #[serde(default)]
    pub versioning: Option<VersioningConfig>,
}

impl DimensionConfig {
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        attributes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
            lookupatts: Vec::new(),
            quote: Quote::None,
            cache: None,
            staging: None,
            default_id_value: None,
            type1atts: None,
            versioning: None,
        }
    }

    pub fn from_json_str(json: &str) -> DimxResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 파일에서 설정 로드
    pub fn load_from_file(path: impl AsRef<Path>) -> DimxResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> DimxResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
