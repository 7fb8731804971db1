//! Error types for AgentMem.
//!
//! A hierarchical error system: [`AgentMemError`] is the top-level error
//! returned by all public APIs; the nested types provide detail for
//! matching and for mapping onto HTTP status codes / CLI exit codes.

use thiserror::Error;

/// Result type alias for AgentMem operations.
pub type Result<T> = std::result::Result<T, AgentMemError>;

/// Top-level error enum for all AgentMem operations.
#[derive(Debug, Error)]
pub enum AgentMemError {
    /// Configuration error — non-retriable, surfaces at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage layer error (I/O, corruption, transactions). Retriable.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Upstream provider (LLM / embedding / reranker) error. Retriable.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Failed to parse a provider response into the expected shape.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Fact extraction failed after retry.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Reconciliation failed after retry; the whole batch was not applied.
    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Requested entity not found.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// Caller is not permitted to perform the requested operation.
    #[error("permission denied: {0}")]
    Permission(#[from] PermissionError),

    /// Caller exceeded a provider quota.
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentMemError {
    /// Returns true if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a permission error.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::Permission(_))
    }

    /// Returns true if the operation that produced this error may succeed
    /// if retried unchanged (storage and provider errors only).
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Provider(_))
    }

    /// Maps this error onto the HTTP status code the §6 surface specifies.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Permission(_) => 403,
            Self::Validation(_) | Self::Parse(_) => 422,
            Self::Quota(_) => 429,
            _ => 500,
        }
    }
}

/// Configuration errors — non-retriable, only ever surface at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[error("{0}")]
    Invalid(String),

    /// A required configuration section or key is missing.
    #[error("missing required configuration: {0}")]
    Missing(String),

    /// An unknown provider name was requested.
    #[error("unknown provider '{name}' for {kind}")]
    UnknownProvider {
        /// The kind of provider being resolved (llm, embedder, reranker, vector_store).
        kind: String,
        /// The unrecognized provider name.
        name: String,
    },
}

impl ConfigError {
    /// Creates an "invalid configuration" error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Creates a "missing configuration" error.
    pub fn missing(key: impl Into<String>) -> Self {
        Self::Missing(key.into())
    }

    /// Creates an "unknown provider" error.
    pub fn unknown_provider(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnknownProvider {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Storage-related errors. Retriable up to 3 attempts before surfacing as 500.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database file or data is corrupted.
    #[error("database corrupted: {0}")]
    Corrupted(String),

    /// Transaction failed (commit, rollback, etc.).
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error from the redb storage engine.
    #[error("storage engine error: {0}")]
    Redb(String),

    /// Database schema version doesn't match expected version.
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version.
        expected: u32,
        /// Actual schema version found in database.
        found: u32,
    },

    /// A collection's dense dimension doesn't match what's configured.
    #[error("embedding dimension mismatch for collection '{collection}': expected {expected}, found {found}")]
    DimensionMismatch {
        /// Collection name.
        collection: String,
        /// Expected dimension.
        expected: usize,
        /// Actual dimension found.
        found: usize,
    },
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a transaction error with the given message.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a redb error with the given message.
    pub fn redb(msg: impl Into<String>) -> Self {
        Self::Redb(msg.into())
    }
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(format!("commit failed: {err}"))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Redb(format!("table error: {err}"))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Redb(format!("storage error: {err}"))
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

macro_rules! forward_storage_conversion {
    ($($redb_ty:ty),+ $(,)?) => {
        $(
            impl From<$redb_ty> for AgentMemError {
                fn from(err: $redb_ty) -> Self {
                    AgentMemError::Storage(StorageError::from(err))
                }
            }
        )+
    };
}

forward_storage_conversion!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::CommitError,
    redb::TableError,
    redb::StorageError,
);

impl From<bincode::Error> for AgentMemError {
    fn from(err: bincode::Error) -> Self {
        AgentMemError::Storage(StorageError::from(err))
    }
}

/// Validation errors for input data — maps to HTTP 422.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Embedding dimension doesn't match the collection's configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension provided.
        got: usize,
    },

    /// A field has an invalid value.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// Content exceeds the maximum allowed size.
    #[error("content too large: {size} bytes (max: {max} bytes)")]
    ContentTooLarge {
        /// Actual content size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// A required field is missing or empty.
    #[error("required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// Too many items in a collection-valued field.
    #[error("too many items in '{field}': {count} (max: {max})")]
    TooManyItems {
        /// Name of the field.
        field: String,
        /// Actual count.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a content-too-large error.
    pub fn content_too_large(size: usize, max: usize) -> Self {
        Self::ContentTooLarge { size, max }
    }

    /// Creates a required-field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Creates a too-many-items error.
    pub fn too_many_items(field: impl Into<String>, count: usize, max: usize) -> Self {
        Self::TooManyItems {
            field: field.into(),
            count,
            max,
        }
    }
}

/// Errors raised by LLM / embedding / reranker providers. Retriable up to
/// 2 attempts; a reranker failure degrades to skip-rerank instead.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider returned a non-success response.
    #[error("provider '{provider}' request failed: {reason}")]
    RequestFailed {
        /// Provider name.
        provider: String,
        /// Failure reason.
        reason: String,
    },

    /// The provider's configuration (API key, endpoint, model) is invalid.
    #[error("provider '{provider}' misconfigured: {reason}")]
    Misconfigured {
        /// Provider name.
        provider: String,
        /// What's wrong.
        reason: String,
    },

    /// The returned embedding/vector had an unexpected dimension.
    #[error("provider '{provider}' returned dimension {got}, expected {expected}")]
    UnexpectedDimension {
        /// Provider name.
        provider: String,
        /// Expected dimension.
        expected: usize,
        /// Dimension actually returned.
        got: usize,
    },
}

/// Errors raised when a provider response can't be parsed into the
/// expected shape.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Response body was not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// Response JSON didn't match the expected schema.
    #[error("response did not match expected schema: {0}")]
    SchemaMismatch(String),
}

/// Fact extraction errors — surfaced as a warning after one retry; the
/// extraction step degrades to an empty fact list rather than failing
/// the whole ingest call.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The LLM call itself failed.
    #[error("extraction LLM call failed: {0}")]
    ProviderFailed(String),
    /// The LLM response didn't parse as `{"facts": [...]}`.
    #[error("extraction response did not match expected schema: {0}")]
    SchemaMismatch(String),
}

/// Reconciliation errors. A reconcile failure after retry aborts the
/// entire batch — no partial application.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The update-graph LLM call failed.
    #[error("reconcile LLM call failed: {0}")]
    ProviderFailed(String),
    /// The LLM response didn't parse as `{"memory": [...]}` after retry.
    #[error("reconcile response did not match expected schema after retry: {0}")]
    SchemaMismatch(String),
}

/// Not-found errors for specific entity types — maps to HTTP 404.
#[derive(Debug, Error)]
pub enum NotFoundError {
    /// Memory with the given id not found.
    #[error("memory not found: {0}")]
    Memory(String),

    /// Collection with the given name not found.
    #[error("collection not found: {0}")]
    Collection(String),
}

impl NotFoundError {
    /// Creates a memory-not-found error.
    pub fn memory(id: impl ToString) -> Self {
        Self::Memory(id.to_string())
    }

    /// Creates a collection-not-found error.
    pub fn collection(name: impl ToString) -> Self {
        Self::Collection(name.to_string())
    }
}

/// Permission errors — maps to HTTP 403.
#[derive(Debug, Error)]
pub enum PermissionError {
    /// The caller's identity does not own the referenced memory/scope.
    #[error("identity {identity} is not permitted to {action} within scope {scope}")]
    ScopeViolation {
        /// The caller's identity (as provided, not necessarily owner).
        identity: String,
        /// What operation was attempted.
        action: String,
        /// The scope that was violated.
        scope: String,
    },
}

/// Retries `f` up to `attempts` times while it returns a retriable error,
/// returning the last error if none succeed.
///
/// Centralizes the retry policy from spec §7 (storage: 3 attempts,
/// providers: 2 attempts) so it isn't reimplemented at each call site.
pub fn retry<T>(attempts: u32, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    debug_assert!(attempts >= 1, "retry requires at least one attempt");
    let mut last_err = None;
    for _ in 0..attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() => last_err = Some(err),
            Err(err) => return Err(err),
        }
    }
    Err(last_err.expect("attempts >= 1 guarantees at least one error recorded"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::invalid("cache_size_mb must be > 0");
        assert_eq!(
            AgentMemError::from(err).to_string(),
            "configuration error: cache_size_mb must be > 0"
        );
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            AgentMemError::from(NotFoundError::memory(1)).http_status(),
            404
        );
        assert_eq!(
            AgentMemError::from(ValidationError::required_field("content")).http_status(),
            422
        );
        assert_eq!(
            AgentMemError::Quota("monthly limit reached".into()).http_status(),
            429
        );
    }

    #[test]
    fn retriable_classification() {
        assert!(AgentMemError::from(StorageError::corrupted("x")).is_retriable());
        assert!(!AgentMemError::from(ConfigError::invalid("x")).is_retriable());
    }

    #[test]
    fn is_not_found_and_is_validation() {
        let not_found: AgentMemError = NotFoundError::memory("42").into();
        assert!(not_found.is_not_found());
        assert!(!not_found.is_validation());

        let invalid: AgentMemError = ValidationError::required_field("content").into();
        assert!(invalid.is_validation());
        assert!(!invalid.is_not_found());
    }

    #[test]
    fn error_conversion_chain() {
        fn inner() -> Result<()> {
            Err(StorageError::corrupted("test corruption"))?
        }
        let result = inner();
        assert!(result.is_err());
        assert!(result.unwrap_err().is_storage());
    }

    #[test]
    fn retry_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = retry(3, || {
            calls += 1;
            if calls < 3 {
                Err(AgentMemError::from(StorageError::corrupted("transient")))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_stops_immediately_on_non_retriable_error() {
        let mut calls = 0;
        let result: Result<()> = retry(3, || {
            calls += 1;
            Err(AgentMemError::from(ValidationError::required_field("x")))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
