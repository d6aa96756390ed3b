/// Connection Management Module
///
/// This module provides fingerprint-keyed connection reuse. A registry
/// holds at most one live connection per distinct credential set; every
/// session resolving the same credentials shares that connection.

use super::driver::{Credentials, Driver, DriverConnection};
use super::sqlite::SqliteDriver;
use crate::core::{DbError, Result};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// A connection shared by every session with the same fingerprint.
pub type SharedConnection = Arc<Mutex<Box<dyn DriverConnection>>>;

/// Process-wide default registry, backed by the SQLite driver
static GLOBAL_REGISTRY: OnceCell<Arc<ConnectionRegistry>> = OnceCell::new();

/// Deterministic key derived from connection credentials.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 over the length-prefixed credential fields, hex encoded.
    pub fn of(credentials: &Credentials) -> Self {
        let mut hasher = Sha256::new();
        for field in [
            &credentials.host,
            &credentials.username,
            &credentials.password,
            &credentials.database,
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(credentials.port.to_le_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0[..12])
    }
}

/// Locks a shared connection for one prepare/execute/fetch sequence.
pub fn lock_connection(
    connection: &SharedConnection,
) -> Result<MutexGuard<'_, Box<dyn DriverConnection>>> {
    connection
        .lock()
        .map_err(|_| DbError::Connection("Failed to acquire connection lock".to_string()))
}

/// Cache of live connections keyed by fingerprint.
pub struct ConnectionRegistry {
    driver: Arc<dyn Driver>,
    connections: Mutex<HashMap<Fingerprint, SharedConnection>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        ConnectionRegistry {
            driver,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> Arc<ConnectionRegistry> {
        Arc::clone(
            GLOBAL_REGISTRY
                .get_or_init(|| Arc::new(ConnectionRegistry::new(Arc::new(SqliteDriver::new())))),
        )
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Fingerprint, SharedConnection>>> {
        self.connections
            .lock()
            .map_err(|_| DbError::Connection("Failed to acquire registry lock".to_string()))
    }

    /// Returns the connection for `credentials`, opening it on first use.
    ///
    /// The registry lock is held while connecting, so two racing callers
    /// never open two connections for one fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` when the driver cannot connect.
    pub fn resolve(&self, credentials: &Credentials) -> Result<SharedConnection> {
        let fingerprint = Fingerprint::of(credentials);
        let mut connections = self.lock()?;

        if let Some(existing) = connections.get(&fingerprint) {
            debug!("Reusing connection {}", fingerprint);
            return Ok(Arc::clone(existing));
        }

        let conn = self.driver.connect(credentials).map_err(|e| {
            DbError::Connection(format!("Check database server is running. Error: {}", e))
        })?;
        info!(
            host = %credentials.host,
            database = %credentials.database,
            "Opened connection {}",
            fingerprint
        );

        let shared: SharedConnection = Arc::new(Mutex::new(conn));
        connections.insert(fingerprint, Arc::clone(&shared));
        Ok(shared)
    }

    /// Closes and forgets the connection for `credentials`.
    ///
    /// Returns whether a connection was cached for them.
    pub fn close(&self, credentials: &Credentials) -> Result<bool> {
        let removed = self.lock()?.remove(&Fingerprint::of(credentials));
        match removed {
            Some(conn) => {
                lock_connection(&conn)?
                    .close()
                    .map_err(|e| DbError::Connection(e.to_string()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes every cached connection.
    pub fn close_all(&self) -> Result<()> {
        let drained: Vec<SharedConnection> = self.lock()?.drain().map(|(_, c)| c).collect();
        for conn in drained {
            lock_connection(&conn)?
                .close()
                .map_err(|e| DbError::Connection(e.to_string()))?;
        }
        Ok(())
    }

    pub fn contains(&self, credentials: &Credentials) -> bool {
        self.connections
            .lock()
            .map(|c| c.contains_key(&Fingerprint::of(credentials)))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn client_info(&self) -> String {
        self.driver.client_info()
    }
}
