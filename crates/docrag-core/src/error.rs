//! Error types for docrag.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur while indexing or searching documentation.
#[derive(Error, Debug)]
pub enum RagError {
    /// Embedding dimension disagrees with the collection's established dimension.
    #[error("Schema mismatch in collection {collection}: expected dimension {expected}, got {actual}")]
    Schema {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// Collection not found (administrative lookups only).
    #[error("No such collection: {name}")]
    CollectionNotFound { name: String },

    /// An external model backend was unreachable or returned malformed output.
    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Failed to load content from a document source.
    #[error("Failed to load content from {uri}: {reason}")]
    LoadFailed { uri: String, reason: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create a schema mismatch error.
    pub fn schema(collection: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::Schema {
            collection: collection.into(),
            expected,
            actual,
        }
    }

    /// Create an external service error.
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a load failure error.
    pub fn load_failed(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LoadFailed {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error came from an external model backend.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::ExternalService { .. })
    }

    /// Stable machine-readable code for front ends.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Schema { .. } => "SCHEMA_MISMATCH",
            Self::CollectionNotFound { .. } => "COLLECTION_NOT_FOUND",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::LoadFailed { .. } => "LOAD_FAILED",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
