//! Error types for the DimX dimension engine.
//!
//! All public APIs return `DimxResult<T>`, no panics in library code.
//!
//! Configuration errors are raised eagerly when a table is built. Per-row
//! errors surface from the call that triggered them and are never retried
//! internally.
//!
//! # Cache coherency
//!
//! Cached dimensions assume that the backing store stores exactly the values
//! it was given. A column default, trigger or implicit type coercion on a
//! cached attribute silently breaks that assumption. The engine does not
//! detect this; keeping the store free of such transformations is the
//! caller's obligation.

use thiserror::Error;

/// Unified error type for all DimX operations.
#[derive(Debug, Error)]
pub enum DimxError {
    /// Invalid table definition, missing callback or missing lookup attribute
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A matching member exists but its attribute values differ
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// More than one current version was found for a natural key
    #[error("ambiguous lookup in '{table}': {detail}")]
    LookupAmbiguous { table: String, detail: String },

    /// Error raised by the backing store, passed through unchanged
    #[error("backing store error: {0}")]
    BackingStore(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Requested member or key does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Type mismatch between expected and actual values
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Standard I/O error (staging files)
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DimxError {
    /// Wrap a driver error so that it propagates as a backing store failure.
    pub fn backing_store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DimxError::BackingStore(Box::new(err))
    }

    pub(crate) fn missing_attribute(table: &str, attribute: &str) -> Self {
        DimxError::Configuration(format!(
            "row is missing attribute '{attribute}' required by table '{table}'"
        ))
    }
}

/// Result type alias for all DimX operations.
pub type DimxResult<T> = Result<T, DimxError>;

// From 구현들
impl From<serde_json::Error> for DimxError {
    fn from(err: serde_json::Error) -> Self {
        DimxError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_configuration() {
        let err = DimxError::Configuration("lookupatts contain no attributes".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: lookupatts contain no attributes"
        );
    }

    #[test]
    fn error_display_lookup_ambiguous() {
        let err = DimxError::LookupAmbiguous {
            table: "product".to_string(),
            detail: "2 open versions".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "ambiguous lookup in 'product': 2 open versions"
        );
    }

    #[test]
    fn error_display_missing_attribute() {
        let err = DimxError::missing_attribute("book", "name");
        assert!(err.to_string().contains("'name'"));
        assert!(err.to_string().contains("'book'"));
    }

    #[test]
    fn backing_store_keeps_source() {
        let io = std::io::Error::other("connection reset");
        let err = DimxError::backing_store(io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection reset");
    }

    #[test]
    fn serde_error_converts() {
        let parsed: Result<u32, _> = serde_json::from_str("not json");
        let err: DimxError = parsed.unwrap_err().into();
        assert!(matches!(err, DimxError::Serialization(_)));
    }

    #[test]
    fn dimx_result_err() {
        let result: DimxResult<i32> = Err(DimxError::NotFound("key 7".to_string()));
        assert!(result.is_err());
    }
}
