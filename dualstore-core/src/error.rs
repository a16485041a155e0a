//! Error taxonomy and classification for the data access layer
//!
//! Every failure that leaves this crate is a [`DataError`]. Store adapters
//! report raw failures as [`StoreError`]; the conversion into `DataError`
//! classifies them, so `?` at an adapter boundary is enough to guarantee a
//! caller never sees a backend-specific error type.
//!
//! ## Classification
//!
//! ```text
//! StoreError::Unavailable       ──▶ Connection
//! StoreError::Timeout           ──▶ Timeout
//! StoreError::Unauthenticated   ──▶ Authentication
//! StoreError::PermissionDenied  ──▶ Permission
//! StoreError::InvalidArgument   ──▶ Validation
//! StoreError::NotFound/Conflict ──▶ Database
//! StoreError::Other             ──▶ keyword heuristic over the message
//! ```
//!
//! The keyword heuristic is only a last resort for opaque errors; typed
//! variants are always mapped structurally.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Shareable causal error, kept so `DataError` stays `Clone`
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate
pub type DataResult<T> = std::result::Result<T, DataError>;

/// Result alias for store adapters
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Closed set of error classes surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    Authentication,
    Validation,
    Timeout,
    Permission,
    Database,
}

impl ErrorKind {
    /// Stable machine-readable code for this class
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONNECTION_ERROR",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Permission => "PERMISSION_ERROR",
            ErrorKind::Database => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Classified error returned by every public operation
///
/// Each variant carries the human readable message, the original cause (if
/// any) and the moment the error was classified.
#[derive(Error, Debug, Clone)]
pub enum DataError {
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<SharedError>,
        timestamp: DateTime<Utc>,
    },

    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        #[source]
        source: Option<SharedError>,
        timestamp: DateTime<Utc>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<SharedError>,
        timestamp: DateTime<Utc>,
    },

    #[error("Operation timed out: {message}")]
    Timeout {
        message: String,
        #[source]
        source: Option<SharedError>,
        timestamp: DateTime<Utc>,
    },

    #[error("Permission denied: {message}")]
    Permission {
        message: String,
        #[source]
        source: Option<SharedError>,
        timestamp: DateTime<Utc>,
    },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<SharedError>,
        timestamp: DateTime<Utc>,
    },
}

impl DataError {
    /// Build an error of the given class, stamped with the current time
    pub fn new(kind: ErrorKind, message: impl Into<String>, source: Option<SharedError>) -> Self {
        let message = message.into();
        let timestamp = Utc::now();
        match kind {
            ErrorKind::Connection => DataError::Connection { message, source, timestamp },
            ErrorKind::Authentication => DataError::Authentication { message, source, timestamp },
            ErrorKind::Validation => DataError::Validation { message, source, timestamp },
            ErrorKind::Timeout => DataError::Timeout { message, source, timestamp },
            ErrorKind::Permission => DataError::Permission { message, source, timestamp },
            ErrorKind::Database => DataError::Database { message, source, timestamp },
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, None)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message, None)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message, None)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::Connection { .. } => ErrorKind::Connection,
            DataError::Authentication { .. } => ErrorKind::Authentication,
            DataError::Validation { .. } => ErrorKind::Validation,
            DataError::Timeout { .. } => ErrorKind::Timeout,
            DataError::Permission { .. } => ErrorKind::Permission,
            DataError::Database { .. } => ErrorKind::Database,
        }
    }

    /// Stable code callers can match on
    pub fn error_code(&self) -> &'static str {
        self.kind().code()
    }

    pub fn message(&self) -> &str {
        match self {
            DataError::Connection { message, .. }
            | DataError::Authentication { message, .. }
            | DataError::Validation { message, .. }
            | DataError::Timeout { message, .. }
            | DataError::Permission { message, .. }
            | DataError::Database { message, .. } => message,
        }
    }

    /// When the error was classified
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DataError::Connection { timestamp, .. }
            | DataError::Authentication { timestamp, .. }
            | DataError::Validation { timestamp, .. }
            | DataError::Timeout { timestamp, .. }
            | DataError::Permission { timestamp, .. }
            | DataError::Database { timestamp, .. } => *timestamp,
        }
    }

    /// The original error this classification was derived from
    pub fn cause(&self) -> Option<&SharedError> {
        match self {
            DataError::Connection { source, .. }
            | DataError::Authentication { source, .. }
            | DataError::Validation { source, .. }
            | DataError::Timeout { source, .. }
            | DataError::Permission { source, .. }
            | DataError::Database { source, .. } => source.as_ref(),
        }
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::Timeout | ErrorKind::Database
        )
    }
}

/// Raw failure reported by a store adapter
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend timed out: {0}")]
    Timeout(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<SharedError>,
    },
}

impl StoreError {
    /// Wrap an arbitrary backend error without a structural mapping
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Other {
            message: error.to_string(),
            source: Some(Arc::new(error)),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        StoreError::Other {
            message: message.into(),
            source: None,
        }
    }
}

impl From<StoreError> for DataError {
    fn from(error: StoreError) -> Self {
        classify(error)
    }
}

/// Map a raw store failure onto the taxonomy
pub fn classify(error: StoreError) -> DataError {
    let kind = match &error {
        StoreError::Unavailable(_) => ErrorKind::Connection,
        StoreError::Timeout(_) => ErrorKind::Timeout,
        StoreError::Unauthenticated(_) => ErrorKind::Authentication,
        StoreError::PermissionDenied(_) => ErrorKind::Permission,
        StoreError::InvalidArgument(_) => ErrorKind::Validation,
        StoreError::NotFound(_) | StoreError::Conflict(_) => ErrorKind::Database,
        StoreError::Other { message, .. } => classify_message(message),
    };
    let message = error.to_string();
    DataError::new(kind, message, Some(Arc::new(error)))
}

/// Classify a foreign error by its message alone
pub fn classify_error<E>(error: E) -> DataError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = error.to_string();
    DataError::new(classify_message(&message), message, Some(Arc::new(error)))
}

const CONNECTION_WORDS: &[&str] = &["connection", "network", "refused"];
const TIMEOUT_WORDS: &[&str] = &["timeout", "timed out"];
const AUTH_WORDS: &[&str] = &["auth", "credential", "permission", "unauthorized"];
const VALIDATION_WORDS: &[&str] = &["validation", "invalid", "required", "format"];

/// Keyword heuristic over the lowercase message
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    let timeout = has(TIMEOUT_WORDS);
    let connection = has(CONNECTION_WORDS);

    if timeout && !connection {
        ErrorKind::Timeout
    } else if connection || timeout {
        ErrorKind::Connection
    } else if has(AUTH_WORDS) {
        ErrorKind::Authentication
    } else if has(VALIDATION_WORDS) {
        ErrorKind::Validation
    } else {
        ErrorKind::Database
    }
}
