/// Core Module for paramdb
///
/// This module contains the query access layer itself: the driver
/// capability, connection reuse, type coercion, statement execution,
/// transactions, statistics and the session facade, plus the shared error
/// type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DbError, Result, Severity};
