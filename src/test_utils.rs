/// # Test Utilities Module
///
/// Shared fixtures for the unit tests:
/// - A driver that counts connect calls and can be switched to fail
/// - Credentials for isolated in-memory databases
/// - A session bound to its own registry

use crate::config::Config;
use crate::core::db::{
    ConnectionRegistry, Credentials, DatabaseSession, Driver, DriverConnection, DriverError,
    DriverResult, SqliteDriver,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// SQLite driver wrapper that counts connect attempts.
#[derive(Debug, Default)]
pub struct CountingDriver {
    connects: AtomicUsize,
    fail: AtomicBool,
    inner: SqliteDriver,
}

impl CountingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose every connect attempt fails.
    pub fn failing() -> Self {
        let driver = Self::default();
        driver.set_failing(true);
        driver
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Driver for CountingDriver {
    fn connect(&self, credentials: &Credentials) -> DriverResult<Box<dyn DriverConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(DriverError::new(2002, "Can't connect to database server"));
        }
        self.inner.connect(credentials)
    }

    fn client_info(&self) -> String {
        self.inner.client_info()
    }
}

/// Credentials for an in-memory database; `host` keeps fingerprints apart.
pub fn memory_credentials(host: &str) -> Credentials {
    Credentials {
        host: host.to_string(),
        username: "test".to_string(),
        password: String::new(),
        database: ":memory:".to_string(),
        port: 3306,
    }
}

/// A session on a private registry over an in-memory database.
pub fn memory_session() -> (DatabaseSession, Arc<CountingDriver>) {
    let driver = Arc::new(CountingDriver::new());
    let registry = Arc::new(ConnectionRegistry::new(driver.clone()));
    let mut config = Config::default();
    config.database.name = ":memory:".to_string();
    (DatabaseSession::with_registry(registry, &config), driver)
}
