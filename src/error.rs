//! Error types for the taskflow database core.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Variants follow the lifecycle of a connection: creation, acquisition, statement
//! execution, transaction control and health checking.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection creation failed: {message}")]
    ConnectionCreation { message: String, suggestion: String },

    #[error("Timed out acquiring a connection after {waited_ms}ms")]
    AcquireTimeout { waited_ms: u64 },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    TransactionState {
        message: String,
        transaction_id: String,
    },

    #[error("Statement failed: {message}")]
    Statement {
        message: String,
        /// e.g., "40001" for serialization failure
        sql_state: Option<String>,
        /// MySQL server error number, when available
        vendor_code: Option<u32>,
    },

    #[error("Health check failed: {message}")]
    HealthCheck { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Decode error: {message} (column: {column})")]
    Decode { column: String, message: String },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Transaction aborted: {reason}")]
    Aborted { reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Why a failed transaction is worth running again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    SerializationFailure,
    Deadlock,
    LockNotAvailable,
}

impl std::fmt::Display for RetryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationFailure => write!(f, "serialization failure"),
            Self::Deadlock => write!(f, "deadlock"),
            Self::LockNotAvailable => write!(f, "lock not available"),
        }
    }
}

impl DbError {
    /// Create a connection creation error with a helpful suggestion.
    pub fn connection_creation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectionCreation {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an acquire timeout error.
    pub fn acquire_timeout(waited: std::time::Duration) -> Self {
        Self::AcquireTimeout {
            waited_ms: waited.as_millis() as u64,
        }
    }

    /// Create a transaction state error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a statement error with optional SQL state.
    pub fn statement(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Statement {
            message: message.into(),
            sql_state,
            vendor_code: None,
        }
    }

    /// Create a health check error.
    pub fn health_check(message: impl Into<String>) -> Self {
        Self::HealthCheck {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an aborted error. Units of work use this to give up with their own reason.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionCreation { suggestion, .. } => Some(suggestion),
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::AcquireTimeout { .. } => {
                Some("Release connections promptly or raise the pool's max connections")
            }
            _ => None,
        }
    }

    /// Check if the caller may retry the failed operation as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionCreation { .. } | Self::AcquireTimeout { .. } | Self::Connection { .. }
        ) || self.retry_reason().is_some()
    }

    /// Check if the error means the underlying connection can no longer be trusted.
    pub fn is_connection_broken(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Classify engine error codes that make a whole transaction worth retrying.
    pub fn retry_reason(&self) -> Option<RetryReason> {
        let Self::Statement {
            sql_state,
            vendor_code,
            ..
        } = self
        else {
            return None;
        };

        // MySQL reports deadlocks as SQLSTATE 40001 too, so the vendor number wins.
        match vendor_code {
            Some(1213) => return Some(RetryReason::Deadlock),
            Some(1205) => return Some(RetryReason::LockNotAvailable),
            _ => {}
        }

        match sql_state.as_deref()? {
            "40001" => Some(RetryReason::SerializationFailure),
            "40P01" => Some(RetryReason::Deadlock),
            "55P03" => Some(RetryReason::LockNotAvailable),
            // SQLite: BUSY, BUSY_RECOVERY, BUSY_SNAPSHOT, LOCKED, LOCKED_SHAREDCACHE
            "5" | "261" | "517" | "6" | "262" => Some(RetryReason::LockNotAvailable),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let sql_state = db_err.code().map(|c| c.to_string());
                let vendor_code = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number() as u32);
                DbError::Statement {
                    message: db_err.message().to_string(),
                    sql_state,
                    vendor_code,
                }
            }
            sqlx::Error::RowNotFound => DbError::statement("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::AcquireTimeout { waited_ms: 0 },
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::decode(col.clone(), format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::decode(
                index.to_string(),
                format!("Column index {} out of bounds (len: {})", index, len),
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::decode(index, source.to_string())
            }
            sqlx::Error::Decode(source) => DbError::decode("?", source.to_string()),
            sqlx::Error::WorkerCrashed => DbError::connection(
                "Database worker crashed",
                "Reconnect to the database",
            ),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
