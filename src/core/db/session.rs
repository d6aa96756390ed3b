/// Database Session Module
///
/// `DatabaseSession` is the public entry point. It resolves its connection
/// through a `ConnectionRegistry`, runs every statement through the
/// `StatementExecutor`, keeps the statistics and error log, and optionally
/// wraps its statements in a transaction.
///
/// ## Usage
///
/// ```no_run
/// use paramdb::config::Config;
/// use paramdb::core::db::{DatabaseSession, Param};
///
/// let mut session = DatabaseSession::new(&Config::default());
/// session.query("CREATE TABLE t (a INTEGER)", &[])?;
/// let id = session.insert_id("INSERT INTO t (a) VALUES (?)", &[Param::from(5)])?;
/// # Ok::<(), paramdb::core::DbError>(())
/// ```

use super::connection::{lock_connection, ConnectionRegistry, SharedConnection};
use super::driver::Credentials;
use super::query::{Execution, StatementExecutor};
use super::stats::{ErrorRecord, QueryStat, StatsCollector};
use super::transaction::{TransactionController, TransactionOutcome, TransactionState};
use super::types::{Param, ResultRow};
use crate::config::{Config, DatabaseConfig};
use crate::core::{DbError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const TOO_MANY_ATTEMPTS: &str = "Too many attempts to connect to database, not trying anymore";

/// What `DatabaseSession::query` returns.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// The statement produced a result set
    Rows(Vec<ResultRow>),
    /// The statement ran and produced no result set
    Done,
    /// Nothing ran; a non-fatal error was recorded
    Skipped,
}

impl QueryResult {
    pub fn rows(&self) -> Option<&[ResultRow]> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<Vec<ResultRow>> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    /// Whether the statement was actually executed.
    pub fn executed(&self) -> bool {
        !matches!(self, QueryResult::Skipped)
    }
}

/// Connection fields that replace the configured defaults.
///
/// Empty strings and a zero port count as omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionOverrides {
    pub database: Option<String>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
}

impl ConnectionOverrides {
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Fills every omitted field from `defaults`.
    pub fn apply(&self, defaults: &DatabaseConfig) -> Credentials {
        fn pick(value: &Option<String>, default: &str) -> String {
            match value {
                Some(v) if !v.is_empty() => v.clone(),
                _ => default.to_string(),
            }
        }

        Credentials {
            host: pick(&self.host, &defaults.host),
            username: pick(&self.user, &defaults.user),
            password: pick(&self.password, &defaults.password),
            database: pick(&self.database, &defaults.name),
            port: self.port.filter(|p| *p != 0).unwrap_or(defaults.port),
        }
    }
}

pub struct DatabaseSession {
    registry: Arc<ConnectionRegistry>,
    defaults: DatabaseConfig,
    connection: Option<SharedConnection>,
    credentials: Option<Credentials>,
    failed_connections: u32,
    failed_connections_threshold: u32,
    stats: StatsCollector,
    transaction: TransactionController,
}

impl fmt::Debug for DatabaseSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSession")
            .field("connected", &self.is_connected())
            .field("in_transaction", &self.transaction.is_active())
            .field("executed_queries", &self.stats.executed_queries())
            .field("errors", &self.stats.errors().len())
            .finish()
    }
}

impl fmt::Display for DatabaseSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

impl DatabaseSession {
    /// Creates a session on the process-wide registry.
    pub fn new(config: &Config) -> Self {
        Self::with_registry(ConnectionRegistry::global(), config)
    }

    pub fn with_registry(registry: Arc<ConnectionRegistry>, config: &Config) -> Self {
        DatabaseSession {
            registry,
            defaults: config.database.clone(),
            connection: None,
            credentials: None,
            failed_connections: 0,
            failed_connections_threshold: config.session.failed_connections_threshold,
            stats: StatsCollector::new(config.session.keep_live_log),
            transaction: TransactionController::new(),
        }
    }

    /// Creates a session that is already inside a transaction.
    pub fn transactional(registry: Arc<ConnectionRegistry>, config: &Config) -> Result<Self> {
        let mut session = Self::with_registry(registry, config);
        session.begin_transaction(&ConnectionOverrides::default())?;
        Ok(session)
    }

    /// Resolves the session's connection, counting failed attempts.
    fn connect(&mut self, overrides: &ConnectionOverrides) -> Result<SharedConnection> {
        if let Some(conn) = &self.connection {
            return Ok(Arc::clone(conn));
        }
        if self.failed_connections >= self.failed_connections_threshold {
            return Err(DbError::Connection(TOO_MANY_ATTEMPTS.to_string()));
        }

        let credentials = overrides.apply(&self.defaults);
        match self.registry.resolve(&credentials) {
            Ok(conn) => {
                self.failed_connections = 0;
                self.connection = Some(Arc::clone(&conn));
                self.credentials = Some(credentials);
                Ok(conn)
            }
            Err(e) => {
                self.failed_connections += 1;
                warn!(
                    attempts = self.failed_connections,
                    threshold = self.failed_connections_threshold,
                    "Connection attempt failed"
                );
                Err(e)
            }
        }
    }

    /// Like `connect`, but records a failure in the error log.
    fn ensure_connection(&mut self, overrides: &ConnectionOverrides) -> Result<SharedConnection> {
        self.connect(overrides).map_err(|e| {
            self.stats.record_error(None, &e);
            e
        })
    }

    /// Connects with `overrides` on top of the configured defaults.
    ///
    /// A no-op once the session is connected. Returns whether the session is
    /// connected.
    pub fn register_connection(&mut self, overrides: &ConnectionOverrides) -> Result<bool> {
        self.ensure_connection(overrides)?;
        Ok(self.is_connected())
    }

    /// Runs `sql` and returns its decoded rows.
    ///
    /// # Errors
    ///
    /// Every fatal failure is recorded in `errors()` and returned. Empty SQL
    /// is recorded as a notice and yields `QueryResult::Skipped`.
    pub fn query(&mut self, sql: &str, params: &[Param]) -> Result<QueryResult> {
        Ok(match self.call(sql, params)? {
            Some(Execution {
                rows: Some(rows), ..
            }) => QueryResult::Rows(rows),
            Some(_) => QueryResult::Done,
            None => QueryResult::Skipped,
        })
    }

    /// Runs `sql` and returns the affected rows, or the result rows when
    /// nothing was affected.
    pub fn num_rows(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        Ok(self.call(sql, params)?.map_or(0, |e| e.num_rows()))
    }

    /// Runs `sql` and returns the id generated by it.
    pub fn insert_id(&mut self, sql: &str, params: &[Param]) -> Result<i64> {
        Ok(self.call(sql, params)?.map_or(0, |e| e.insert_id))
    }

    /// Shared pipeline behind `query`, `num_rows` and `insert_id`.
    ///
    /// `Ok(None)` means a non-fatal error was recorded and nothing ran.
    fn call(&mut self, sql: &str, params: &[Param]) -> Result<Option<Execution>> {
        let probe = self.stats.begin_call();
        self.stats.count_query();

        let (outcome, number_results, memory_bytes) = match self.execute(sql, params) {
            Ok(execution) => {
                let (n, bytes) = (execution.num_rows(), execution.memory_bytes);
                (Ok(Some(execution)), n, bytes)
            }
            Err(err) => {
                self.stats.record_error(Some(sql), &err);
                if err.is_fatal() {
                    (Err(err), 0, 0)
                } else {
                    (Ok(None), 0, 0)
                }
            }
        };

        let within_transaction = self.transaction.is_active();
        self.stats
            .record_query(probe, sql, number_results, memory_bytes, within_transaction);
        outcome
    }

    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<Execution> {
        let conn = self.connect(&ConnectionOverrides::default())?;
        let mut guard = lock_connection(&conn)?;
        debug!(params = params.len(), "Running: {}", sql);
        StatementExecutor::run(guard.as_mut(), sql, params)
    }

    /// Server version through `SELECT VERSION()`, or the driver's client
    /// version when `client_info` is set.
    pub fn version(&mut self, client_info: bool) -> Result<String> {
        if client_info {
            self.register_connection(&ConnectionOverrides::default())?;
            return Ok(self.registry.client_info());
        }

        let result = self.query("SELECT VERSION()", &[])?;
        result
            .rows()
            .and_then(|rows| rows.first())
            .and_then(|row| row.first())
            .and_then(|value| value.to_text())
            .ok_or_else(|| DbError::Query {
                query: "SELECT VERSION()".to_string(),
                errno: 0,
                message: "server did not report a version".to_string(),
            })
    }

    /// Begins a transaction, connecting with `overrides` if not yet connected.
    ///
    /// Returns whether a transaction is active.
    pub fn begin_transaction(&mut self, overrides: &ConnectionOverrides) -> Result<bool> {
        if self.transaction.is_active() {
            return Ok(true);
        }
        let conn = self.ensure_connection(overrides)?;
        self.transaction.begin(&conn, &mut self.stats).map_err(|e| {
            self.stats.record_error(None, &e);
            e
        })
    }

    /// Commits, or rolls back when a fatal error happened since it began.
    ///
    /// Returns whether a transaction is active, which is always `false`.
    pub fn end_transaction(&mut self) -> Result<bool> {
        let Some(conn) = self.connection.clone() else {
            return Ok(false);
        };
        self.transaction.end(&conn, &mut self.stats).map_err(|e| {
            self.stats.record_error(None, &e);
            e
        })
    }

    /// Ends any open transaction and closes the connection in the registry.
    ///
    /// Other sessions sharing the connection lose it as well.
    pub fn close(&mut self) -> Result<bool> {
        self.end_transaction()?;
        self.connection = None;
        match self.credentials.take() {
            Some(credentials) => self.registry.close(&credentials),
            None => Ok(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction.is_active()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.transaction.state(&self.stats)
    }

    pub fn last_transaction_outcome(&self) -> Option<TransactionOutcome> {
        self.transaction.last_outcome()
    }

    pub fn failed_connections(&self) -> u32 {
        self.failed_connections
    }

    pub fn set_failed_connections_threshold(&mut self, threshold: u32) {
        self.failed_connections_threshold = threshold;
    }

    pub fn set_keep_live_log(&mut self, enabled: bool) {
        self.stats.set_keep_live_log(enabled);
    }

    /// Per-call statistics, empty unless live stats are enabled.
    pub fn live_stats(&self) -> &[QueryStat] {
        self.stats.live_stats()
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        self.stats.errors()
    }

    /// `[errno] message` of the fatal error of the latest call, if any.
    pub fn latest_error(&self) -> Option<&str> {
        self.stats.latest_error()
    }

    pub fn executed_queries(&self) -> u64 {
        self.stats.executed_queries()
    }
}

impl Drop for DatabaseSession {
    fn drop(&mut self) {
        if self.transaction.is_active() {
            if let Err(e) = self.end_transaction() {
                warn!("Failed to end transaction on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::types::Value;
    use crate::core::Severity;
    use crate::test_utils::{memory_session, CountingDriver};

    #[test]
    fn test_select_one() {
        let (mut session, _) = memory_session();
        let result = session.query("SELECT 1", &[]).unwrap();
        let rows = result.rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[0]["1"], Value::Integer(1));
        assert_eq!(session.executed_queries(), 1);
    }

    #[test]
    fn test_one_increment_per_call() {
        let (mut session, _) = memory_session();
        session.query("CREATE TABLE t (id INTEGER PRIMARY KEY, a INTEGER)", &[]).unwrap();
        let before = session.executed_queries();

        let result = session
            .query("INSERT INTO t (a) VALUES (?)", &[Param::from(5)])
            .unwrap();
        assert_eq!(result, QueryResult::Done);
        let id = session
            .insert_id("INSERT INTO t (a) VALUES (?)", &[Param::from(6)])
            .unwrap();
        assert_eq!(id, 2);
        assert_eq!(session.executed_queries(), before + 2);
    }

    #[test]
    fn test_num_rows_prefers_affected_rows() {
        let (mut session, _) = memory_session();
        session.query("CREATE TABLE t (a INTEGER)", &[]).unwrap();
        for v in 0..3 {
            session.query("INSERT INTO t (a) VALUES (?)", &[Param::from(v)]).unwrap();
        }
        assert_eq!(session.num_rows("UPDATE t SET a = a + 1 WHERE a > ?", &[Param::from(0)]).unwrap(), 2);
        assert_eq!(session.num_rows("SELECT * FROM t", &[]).unwrap(), 3);
    }

    #[test]
    fn test_missing_table_records_one_fatal_error() {
        let (mut session, _) = memory_session();
        let result = session.query("INSERT INTO missing_table (x) VALUES (?)", &[Param::from(1)]);
        assert!(result.is_err());
        assert_eq!(session.errors().len(), 1);
        assert_eq!(session.errors()[0].severity, Severity::Fatal);
        assert_eq!(session.errors()[0].query_number, 1);
        assert!(session.latest_error().is_some());
    }

    #[test]
    fn test_empty_query_is_skipped_with_notice() {
        let (mut session, _) = memory_session();
        assert_eq!(session.query("", &[]).unwrap(), QueryResult::Skipped);
        assert_eq!(session.num_rows("", &[]).unwrap(), 0);
        assert_eq!(session.errors().len(), 2);
        assert!(session.errors().iter().all(|e| e.severity == Severity::NonFatal));
        assert_eq!(session.transaction_state(), TransactionState::Idle);
    }

    #[test]
    fn test_version() {
        let (mut session, _) = memory_session();
        let server = session.version(false).unwrap();
        assert_eq!(server, rusqlite::version());
        let client = session.version(true).unwrap();
        assert_eq!(client, rusqlite::version());
        // Only the server version goes through the query pipeline
        assert_eq!(session.executed_queries(), 1);
    }

    #[test]
    fn test_connection_threshold_fails_fast() {
        let driver = Arc::new(CountingDriver::failing());
        let registry = Arc::new(ConnectionRegistry::new(driver.clone()));
        let mut config = Config::default();
        config.session.failed_connections_threshold = 3;
        let mut session = DatabaseSession::with_registry(registry, &config);

        for _ in 0..3 {
            assert!(session.query("SELECT 1", &[]).is_err());
        }
        assert_eq!(driver.connect_calls(), 3);

        match session.query("SELECT 1", &[]) {
            Err(DbError::Connection(msg)) => assert_eq!(msg, TOO_MANY_ATTEMPTS),
            other => panic!("Expected Connection error, got {:?}", other),
        }
        assert!(session.register_connection(&ConnectionOverrides::default()).is_err());
        assert_eq!(driver.connect_calls(), 3);
        assert_eq!(session.errors().len(), 5);
    }

    #[test]
    fn test_transaction_rolls_back_after_fatal_error() {
        let (mut session, _) = memory_session();
        session.query("CREATE TABLE t (a INTEGER NOT NULL)", &[]).unwrap();

        assert!(session.begin_transaction(&ConnectionOverrides::default()).unwrap());
        session.query("INSERT INTO t (a) VALUES (?)", &[Param::from(1)]).unwrap();
        assert!(session.query("INSERT INTO t (a) VALUES (?)", &[Param::Null]).is_err());
        assert_eq!(session.transaction_state(), TransactionState::PendingRollback);

        assert!(!session.end_transaction().unwrap());
        assert_eq!(session.last_transaction_outcome(), Some(TransactionOutcome::RolledBack));
        assert_eq!(session.num_rows("SELECT * FROM t", &[]).unwrap(), 0);
    }

    #[test]
    fn test_live_stats() {
        let (mut session, _) = memory_session();
        session.set_keep_live_log(true);
        session.query("SELECT 1", &[]).unwrap();
        let _ = session.query("SELECT * FROM nope", &[]);

        let stats = session.live_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].number_results, 1);
        assert!(stats[0].error.is_none());
        assert!(stats[1].error.is_some());
        assert!(!stats[1].within_transaction);
    }

    #[test]
    fn test_overrides_apply_defaults() {
        let defaults = DatabaseConfig::default();
        let creds = ConnectionOverrides::default()
            .database("other.db")
            .user("")
            .port(0)
            .apply(&defaults);
        assert_eq!(creds.database, "other.db");
        assert_eq!(creds.username, defaults.user);
        assert_eq!(creds.port, defaults.port);
        assert_eq!(creds.host, "localhost");
    }

    #[test]
    fn test_display() {
        let (session, _) = memory_session();
        assert!(session.to_string().starts_with("paramdb v"));
    }
}
