//! Error types for the configuration store
//!
//! Each layer owns a closed set of outcomes. Translation happens once, at the
//! boundary between layers, through the `From` impls at the bottom of this file.

use thiserror::Error;

use crate::cancel::Interrupted;

/// Result type for schema registry operations
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// Result type for version store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for client-facing operations
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Schema registry errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("unknown config type: {0}")]
    UnknownType(String),

    #[error("{config_type}: {violation}")]
    Violation {
        config_type: String,
        violation: String,
    },

    #[error("schema for {config_type} does not compile: {reason}")]
    InvalidSchema { config_type: String, reason: String },

    #[error("duplicate schema for config type {0}")]
    DuplicateType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Version store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("config not found: {name}{}", .version.map(|v| format!(" version {v}")).unwrap_or_default())]
    NotFound { name: String, version: Option<i64> },

    #[error("config already exists: {name}")]
    AlreadyExists { name: String },

    /// Another writer claimed the version this attempt computed, or the engine
    /// stayed locked. Retryable until the attempt budget runs out.
    #[error("write conflict on {name} version {version}")]
    WriteConflict { name: String, version: i64 },

    #[error("gave up appending to {name} after {attempts} conflicting attempts")]
    Conflict { name: String, attempts: u32 },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("migration {name} failed: {source}")]
    Migration {
        name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the whole append sequence may be re-run.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::WriteConflict { .. } => true,
            StoreError::Sqlite(err) => is_busy(err),
            _ => false,
        }
    }
}

/// Classification of client-facing failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    AlreadyExists,
    Internal,
}

/// Client-facing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidInput(_) => ErrorKind::InvalidInput,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ServiceError::InvalidInput(message.into())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            StoreError::AlreadyExists { .. } => ServiceError::AlreadyExists(err.to_string()),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<SchemaError> for ServiceError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::UnknownType(_) | SchemaError::Violation { .. } => {
                ServiceError::InvalidInput(err.to_string())
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

/// SQLite reports lock contention as BUSY or LOCKED.
pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

/// Primary key or UNIQUE constraint on `(name, version)` fired.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}
