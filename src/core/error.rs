/// paramdb Error Module
///
/// This module defines the error types for the query access layer.
/// Every failure of the query pipeline maps onto one `DbError` variant, and
/// every variant knows whether it is fatal for the current operation.
use serde::Serialize;
use thiserror::Error;

/// How serious a recorded error is.
///
/// Fatal errors abort the current operation and mark an active transaction
/// for rollback. Non-fatal errors are recorded but the call still returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Fatal,
    NonFatal,
}

/// Error type for the query access layer.
///
/// This enum covers every failure the pipeline can report:
/// - Connection establishment and the failed-attempt threshold
/// - Statement preparation, parameter binding and execution
/// - Result decoding
/// - Transaction commit/rollback
/// - Configuration loading
#[derive(Error, Debug)]
pub enum DbError {
    /// The connection could not be established or reused
    #[error("Connection error: {0}")]
    Connection(String),

    /// The driver rejected the SQL text (syntax, unknown tables, ...)
    #[error("Prepare error: [{errno}] {message}; Query: {query}")]
    Prepare {
        query: String,
        errno: i32,
        message: String,
    },

    /// Parameter count does not match the placeholders of the statement
    #[error("Bind error: [{errno}] {message}; Query: {query}")]
    Bind {
        query: String,
        errno: i32,
        message: String,
    },

    /// Execution or fetch failure
    #[error("Query error: [{errno}] {message}; Query: {query}")]
    Query {
        query: String,
        errno: i32,
        message: String,
    },

    /// Nothing to execute: the SQL text was empty
    #[error("General error: Bad query or no query at all")]
    EmptyQuery,

    /// A column value could not be converted to its declared type
    #[error("Decode error in column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Commit, rollback or autocommit toggling failed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    /// Whether this error aborts the operation that raised it.
    pub fn severity(&self) -> Severity {
        match self {
            DbError::EmptyQuery => Severity::NonFatal,
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Driver error number, `0` when the failure did not come from the driver.
    pub fn errno(&self) -> i32 {
        match self {
            DbError::Prepare { errno, .. }
            | DbError::Bind { errno, .. }
            | DbError::Query { errno, .. } => *errno,
            _ => 0,
        }
    }

    /// The bare message, without the variant prefix or query suffix.
    pub fn message(&self) -> String {
        match self {
            DbError::Prepare { message, .. }
            | DbError::Bind { message, .. }
            | DbError::Query { message, .. } => message.clone(),
            DbError::Connection(msg) | DbError::Transaction(msg) | DbError::Config(msg) => {
                msg.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Type alias for Result to use DbError as the error type.
pub type Result<T> = std::result::Result<T, DbError>;
