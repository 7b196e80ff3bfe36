//! Error types for sqlite-supasync.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sqlite-supasync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
        /// Source error if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// SQLite connection error
    #[error("SQLite connection error: {message}")]
    SourceConnection {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// SQLite query error
    #[error("SQLite query error on table '{table}': {message}")]
    SourceQuery {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// Supabase transport error (DNS, TLS, timeout, connection reset)
    #[error("Supabase connection error: {message}")]
    SinkConnection {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Supabase answered with a non-success status
    #[error("Supabase request on table '{table}' failed with HTTP {status}: {message}")]
    SinkRequest {
        /// Table name
        table: String,
        /// HTTP status code
        status: u16,
        /// Error message (response body)
        message: String,
    },

    /// Target table does not exist in Supabase
    #[error("Table '{table}' does not exist in Supabase")]
    TableMissing {
        /// Table name
        table: String,
        /// CREATE TABLE statement to run in the Supabase SQL editor
        hint: String,
    },

    /// Schema error
    #[error("Schema error: {message}")]
    Schema {
        /// Error message
        message: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Sync error
    #[error("Sync error: {message}")]
    Sync {
        /// Error message
        message: String,
        /// Records successfully synced before error
        records_synced: usize,
    },

    /// Retry exhausted
    #[error("Operation failed after {attempts} attempts: {message}")]
    RetryExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error message
        message: String,
        /// Last error encountered
        #[source]
        last_error: Option<Box<Error>>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a SQLite connection error.
    pub fn source_connection(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::SourceConnection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a SQLite query error.
    pub fn source_query(
        table: impl Into<String>,
        message: impl Into<String>,
        source: rusqlite::Error,
    ) -> Self {
        Self::SourceQuery {
            table: table.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a Supabase transport error.
    pub fn sink_connection(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::SinkConnection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a Supabase status error.
    pub fn sink_request(table: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::SinkRequest {
            table: table.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a missing-table error carrying the creation hint.
    pub fn table_missing(table: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::TableMissing {
            table: table.into(),
            hint: hint.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a sync error.
    pub fn sync(message: impl Into<String>, records_synced: usize) -> Self {
        Self::Sync {
            message: message.into(),
            records_synced,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Transport failures, timeouts, throttling and server-side errors are
    /// transient. Any other 4xx means the request itself is bad and retrying
    /// it would fail the same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::SinkConnection { .. } | Error::Io(_) => true,
            Error::SinkRequest { status, .. } => {
                matches!(*status, 408 | 429) || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    /// The CREATE TABLE hint, if this error is about a missing sink table.
    pub fn creation_hint(&self) -> Option<&str> {
        match self {
            Error::TableMissing { hint, .. } => Some(hint),
            Error::RetryExhausted {
                last_error: Some(inner),
                ..
            } => inner.creation_hint(),
            _ => None,
        }
    }

    /// Get the error code for metrics/logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::SourceConnection { .. } => "SQLITE_CONNECTION_ERROR",
            Error::SourceQuery { .. } => "SQLITE_QUERY_ERROR",
            Error::SinkConnection { .. } => "SUPABASE_CONNECTION_ERROR",
            Error::SinkRequest { .. } => "SUPABASE_REQUEST_ERROR",
            Error::TableMissing { .. } => "TABLE_MISSING",
            Error::Schema { .. } => "SCHEMA_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Sync { .. } => "SYNC_ERROR",
            Error::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Error::Io(_) => "IO_ERROR",
        }
    }
}

/// Error context extension trait.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ErrorContext<T>
    for std::result::Result<T, E>
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::config_with_source(message, e))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::config_with_source(f(), e))
    }
}
