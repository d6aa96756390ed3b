/// Query Execution Module
///
/// This module drives one statement through its lifecycle:
/// `Idle → Prepared → Bound → Executed → Fetched`, with `Error` reachable
/// from every step. The executor stops at the first failure, so a call never
/// reports more than one cause.

use super::driver::{DriverConnection, PreparedStatement, StoredResult};
use super::types::{bind_parameters, decode_row, type_signature, BoundParameter, Param, ResultRow};
use crate::core::{DbError, Result};
use tracing::debug;

const BIND_MISMATCH: &str = "Failed to bind. Do you have equal parameters for all the '?'?";

/// Lifecycle state of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Idle,
    Prepared,
    Bound,
    Executed,
    Fetched,
    Error,
}

/// What one run of a statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    /// Decoded rows, `None` when the statement has no result set
    pub rows: Option<Vec<ResultRow>>,
    pub result_rows: u64,
    pub affected_rows: u64,
    pub insert_id: i64,
    /// Bytes the driver buffered for the result
    pub memory_bytes: usize,
}

impl Execution {
    /// Affected rows when the statement changed anything, result rows otherwise.
    pub fn num_rows(&self) -> u64 {
        if self.affected_rows > 0 {
            self.affected_rows
        } else {
            self.result_rows
        }
    }
}

/// Owns the lifecycle of a single statement.
#[derive(Debug)]
pub struct StatementExecutor {
    sql: String,
    state: StatementState,
    prepared: Option<PreparedStatement>,
    bound: Vec<BoundParameter>,
    signature: String,
    stored: Option<StoredResult>,
}

impl StatementExecutor {
    pub fn new(sql: impl Into<String>) -> Self {
        StatementExecutor {
            sql: sql.into(),
            state: StatementState::Idle,
            prepared: None,
            bound: Vec::new(),
            signature: String::new(),
            stored: None,
        }
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Type signature of the bound parameters, empty until bound.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    fn fail(&mut self, err: DbError) -> DbError {
        self.state = StatementState::Error;
        err
    }

    fn query_error(&self, errno: i32, message: impl Into<String>) -> DbError {
        DbError::Query {
            query: self.sql.clone(),
            errno,
            message: message.into(),
        }
    }

    fn expect_state(&mut self, allowed: &[StatementState], step: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let err = self.query_error(0, format!("cannot {} a statement in state {:?}", step, self.state));
        Err(self.fail(err))
    }

    /// Submits the SQL text to the driver.
    ///
    /// # Errors
    ///
    /// `DbError::EmptyQuery` (non-fatal) for blank SQL, `DbError::Prepare`
    /// when the driver rejects it.
    pub fn prepare(&mut self, conn: &mut dyn DriverConnection) -> Result<()> {
        self.expect_state(&[StatementState::Idle], "prepare")?;
        if self.sql.trim().is_empty() {
            return Err(self.fail(DbError::EmptyQuery));
        }

        match conn.prepare(&self.sql) {
            Ok(prepared) => {
                debug!(placeholders = prepared.param_count, "Prepared: {}", self.sql);
                self.prepared = Some(prepared);
                self.state = StatementState::Prepared;
                Ok(())
            }
            Err(e) => {
                let err = DbError::Prepare {
                    query: self.sql.clone(),
                    errno: e.errno,
                    message: e.message,
                };
                Err(self.fail(err))
            }
        }
    }

    /// Infers bind types for `params` and checks them against the placeholders.
    pub fn bind(&mut self, params: &[Param]) -> Result<()> {
        self.expect_state(&[StatementState::Prepared], "bind")?;
        let expected = self.prepared.as_ref().map_or(0, |p| p.param_count);
        if params.len() != expected {
            let err = DbError::Bind {
                query: self.sql.clone(),
                errno: 0,
                message: BIND_MISMATCH.to_string(),
            };
            return Err(self.fail(err));
        }

        self.signature = type_signature(params);
        self.bound = bind_parameters(params);
        self.state = StatementState::Bound;
        debug!(signature = %self.signature, "Bound {} parameters", self.bound.len());
        Ok(())
    }

    /// Executes the statement and buffers its whole result.
    pub fn execute(&mut self, conn: &mut dyn DriverConnection) -> Result<()> {
        self.expect_state(&[StatementState::Prepared, StatementState::Bound], "execute")?;
        let Some(prepared) = self.prepared.take() else {
            let err = self.query_error(0, "statement was never prepared");
            return Err(self.fail(err));
        };

        if self.state == StatementState::Prepared && prepared.param_count > 0 {
            let err = self.query_error(0, "No data supplied for parameters in prepared statement");
            return Err(self.fail(err));
        }

        let outcome = conn.execute(&prepared, &self.bound);
        self.prepared = Some(prepared);
        match outcome {
            Ok(stored) => {
                debug!(
                    rows = stored.num_rows(),
                    affected = stored.affected_rows,
                    "Executed: {}",
                    self.sql
                );
                self.stored = Some(stored);
                self.state = StatementState::Executed;
                Ok(())
            }
            Err(e) => {
                let err = self.query_error(e.errno, e.message);
                Err(self.fail(err))
            }
        }
    }

    /// Decodes the buffered rows into a sequence sized to the row count.
    pub fn fetch(&mut self) -> Result<Execution> {
        self.expect_state(&[StatementState::Executed], "fetch")?;
        let stored = self.stored.take().unwrap_or_default();

        let rows = match &stored.columns {
            Some(columns) => {
                let mut rows = Vec::with_capacity(stored.num_rows());
                for raw in &stored.rows {
                    match decode_row(columns, raw) {
                        Ok(row) => rows.push(row),
                        Err(e) => return Err(self.fail(e)),
                    }
                }
                Some(rows)
            }
            None => None,
        };

        self.state = StatementState::Fetched;
        Ok(Execution {
            rows,
            result_rows: stored.num_rows() as u64,
            affected_rows: stored.affected_rows,
            insert_id: stored.insert_id,
            memory_bytes: stored.buffered_bytes(),
        })
    }

    /// Runs `sql` with `params` through every step.
    pub fn run(conn: &mut dyn DriverConnection, sql: &str, params: &[Param]) -> Result<Execution> {
        let mut executor = StatementExecutor::new(sql);
        executor.prepare(conn)?;
        if !params.is_empty() {
            executor.bind(params)?;
        }
        executor.execute(conn)?;
        executor.fetch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::driver::{Credentials, Driver};
    use crate::core::db::sqlite::SqliteDriver;
    use crate::core::db::types::Value;

    fn connection() -> Box<dyn DriverConnection> {
        let mut conn = SqliteDriver::new()
            .connect(&Credentials {
                database: ":memory:".to_string(),
                ..Credentials::default()
            })
            .unwrap();
        StatementExecutor::run(
            conn.as_mut(),
            "
            CREATE TABLE test (
                id INTEGER PRIMARY KEY,
                name TEXT,
                value REAL,
                active BOOLEAN DEFAULT 1,
                created_at DATETIME
            )",
            &[],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_select_one() {
        let mut conn = connection();
        let execution = StatementExecutor::run(conn.as_mut(), "SELECT 1", &[]).unwrap();
        let rows = execution.rows.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[0].first(), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_state_transitions() {
        let mut conn = connection();
        let mut executor = StatementExecutor::new("SELECT name FROM test WHERE id = ?");
        assert_eq!(executor.state(), StatementState::Idle);

        executor.prepare(conn.as_mut()).unwrap();
        assert_eq!(executor.state(), StatementState::Prepared);

        executor.bind(&[Param::from(1)]).unwrap();
        assert_eq!(executor.state(), StatementState::Bound);
        assert_eq!(executor.signature(), "i");

        executor.execute(conn.as_mut()).unwrap();
        assert_eq!(executor.state(), StatementState::Executed);

        let execution = executor.fetch().unwrap();
        assert_eq!(executor.state(), StatementState::Fetched);
        assert_eq!(execution.rows.unwrap().len(), 0);
    }

    #[test]
    fn test_insert_and_typed_select() {
        let mut conn = connection();
        let insert = StatementExecutor::run(
            conn.as_mut(),
            "INSERT INTO test (name, value, active, created_at) VALUES (?, ?, ?, ?)",
            &[
                Param::from("Alice"),
                Param::from(123.45),
                Param::from(false),
                Param::from("2001-02-03 04:05:06"),
            ],
        )
        .unwrap();
        assert!(insert.rows.is_none());
        assert_eq!(insert.affected_rows, 1);
        assert_eq!(insert.insert_id, 1);
        assert_eq!(insert.num_rows(), 1);

        let select = StatementExecutor::run(conn.as_mut(), "SELECT * FROM test", &[]).unwrap();
        assert_eq!(select.num_rows(), 1);
        let rows = select.rows.unwrap();
        let row = &rows[0];
        assert_eq!(row["id"], Value::Integer(1));
        assert_eq!(row["name"], Value::Text("Alice".to_string()));
        assert_eq!(row["value"], Value::Float(123.45));
        assert_eq!(row["active"], Value::Bool(false));
        assert!(row["created_at"].as_datetime().is_some());
    }

    #[test]
    fn test_prepare_error_stops_pipeline() {
        let mut conn = connection();
        let mut executor = StatementExecutor::new("SELECT * FROM nonexistent_table");
        match executor.prepare(conn.as_mut()) {
            Err(DbError::Prepare { message, .. }) => assert!(message.contains("no such table")),
            other => panic!("Expected Prepare error, got {:?}", other),
        }
        assert_eq!(executor.state(), StatementState::Error);
        assert!(executor.execute(conn.as_mut()).is_err());
    }

    #[test]
    fn test_bind_count_mismatch() {
        let mut conn = connection();
        let result = StatementExecutor::run(
            conn.as_mut(),
            "INSERT INTO test (name) VALUES (?)",
            &[Param::from("a"), Param::from("b")],
        );
        match result {
            Err(DbError::Bind { message, .. }) => assert_eq!(message, BIND_MISMATCH),
            other => panic!("Expected Bind error, got {:?}", other),
        }
    }

    #[test]
    fn test_unbound_placeholders_fail_at_execute() {
        let mut conn = connection();
        let result = StatementExecutor::run(conn.as_mut(), "SELECT * FROM test WHERE id = ?", &[]);
        assert!(matches!(result, Err(DbError::Query { .. })));
    }

    #[test]
    fn test_empty_query_is_non_fatal() {
        let mut conn = connection();
        let err = StatementExecutor::run(conn.as_mut(), "   ", &[]).unwrap_err();
        assert!(matches!(err, DbError::EmptyQuery));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_execute_error_is_query_error() {
        let mut conn = connection();
        StatementExecutor::run(
            conn.as_mut(),
            "CREATE TABLE strict_t (a INTEGER NOT NULL)",
            &[],
        )
        .unwrap();
        let result = StatementExecutor::run(
            conn.as_mut(),
            "INSERT INTO strict_t (a) VALUES (?)",
            &[Param::Null],
        );
        match result {
            Err(DbError::Query { errno, message, .. }) => {
                assert_ne!(errno, 0);
                assert!(message.contains("NOT NULL"));
            }
            other => panic!("Expected Query error, got {:?}", other),
        }
    }

    #[test]
    fn test_fetch_before_execute_is_rejected() {
        let mut executor = StatementExecutor::new("SELECT 1");
        assert!(executor.fetch().is_err());
        assert_eq!(executor.state(), StatementState::Error);
    }
}
