/// Shared fixtures for the integration tests.

use paramdb::core::db::{
    ConnectionRegistry, Credentials, Driver, DriverConnection, DriverError, DriverResult,
    SqliteDriver,
};
use paramdb::{Config, DatabaseSession};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Driver that refuses every connection and counts the attempts.
#[derive(Debug, Default)]
pub struct UnreachableDriver {
    pub attempts: AtomicUsize,
}

impl Driver for UnreachableDriver {
    fn connect(&self, _credentials: &Credentials) -> DriverResult<Box<dyn DriverConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(DriverError::new(2002, "Connection refused"))
    }

    fn client_info(&self) -> String {
        "unreachable".to_string()
    }
}

/// A config pointing at a fresh database file inside `dir`.
pub fn file_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.name = dir.path().join("test.db").to_string_lossy().into_owned();
    config
}

/// A session on its own registry over a fresh database file.
pub fn file_session() -> (DatabaseSession, Arc<ConnectionRegistry>, TempDir) {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(ConnectionRegistry::new(Arc::new(SqliteDriver::new())));
    let session = DatabaseSession::with_registry(Arc::clone(&registry), &file_config(&dir));
    (session, registry, dir)
}
