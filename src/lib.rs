// Core infrastructure modules
pub mod core;

// Feature-specific modules
pub mod config;

#[cfg(test)]
mod test_utils;

pub use crate::config::{default_config_path, load_config, Config, DatabaseConfig, SessionConfig};
pub use crate::core::db::{ConnectionOverrides, DatabaseSession, Param, QueryResult, ResultRow, Value};
pub use crate::core::{DbError, Result, Severity};
