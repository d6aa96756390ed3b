/// SQLite Driver Module
///
/// Driver capability implemented on rusqlite. The database credential is the
/// file path (or ":memory:"); host, user, password and port are accepted but
/// SQLite has no use for them. Declared column types are translated into the
/// driver type codes the decoder understands.

use super::driver::{
    ColumnDescriptor, Credentials, Driver, DriverConnection, DriverError, DriverResult,
    PreparedStatement, RawCell, StoredResult,
};
use super::types::{type_codes, BindType, BoundParameter, Param};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use tracing::debug;

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, message) => DriverError::new(
                code.extended_code,
                message.clone().unwrap_or_else(|| code.to_string()),
            ),
            other => DriverError::new(0, other.to_string()),
        }
    }
}

/// Opens rusqlite connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        SqliteDriver
    }
}

impl Driver for SqliteDriver {
    fn connect(&self, credentials: &Credentials) -> DriverResult<Box<dyn DriverConnection>> {
        let path = if credentials.database.is_empty() {
            ":memory:"
        } else {
            credentials.database.as_str()
        };
        let conn = Connection::open(path)?;

        // Initialize connection with common pragmas
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.create_scalar_function(
            "VERSION",
            0,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |_ctx| Ok(rusqlite::version()),
        )?;

        debug!("Opened SQLite database at {}", path);
        Ok(Box::new(SqliteConnection {
            conn: Some(conn),
            autocommit: true,
        }))
    }

    fn client_info(&self) -> String {
        rusqlite::version().to_string()
    }
}

/// A live rusqlite connection.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Option<Connection>,
    /// Requested autocommit mode; SQLite itself only knows open transactions
    autocommit: bool,
}

impl SqliteConnection {
    fn conn(&self) -> DriverResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DriverError::new(0, "connection is closed"))
    }

    fn batch(&self, sql: &str) -> DriverResult<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn in_transaction(&self) -> DriverResult<bool> {
        Ok(!self.conn()?.is_autocommit())
    }
}

/// Maps a declared column type onto a driver type code.
pub fn type_code_for_decl(decl: &str) -> u8 {
    let decl = decl.to_ascii_uppercase();
    let has = |needle: &str| decl.contains(needle);

    if has("DATETIME") {
        type_codes::DATETIME
    } else if has("TIMESTAMP") {
        type_codes::TIMESTAMP
    } else if has("DATE") {
        type_codes::DATE
    } else if has("TIME") {
        type_codes::TIME
    } else if has("YEAR") {
        type_codes::YEAR
    } else if has("BIT") || has("BOOL") {
        type_codes::BIT
    } else if has("DECIMAL") || has("NUMERIC") {
        type_codes::NEWDECIMAL
    } else if has("DOUBLE") || has("REAL") {
        type_codes::DOUBLE
    } else if has("FLOAT") {
        type_codes::FLOAT
    } else if has("BIGINT") {
        type_codes::LONGLONG
    } else if has("TINYINT") {
        type_codes::TINY
    } else if has("SMALLINT") {
        type_codes::SHORT
    } else if has("MEDIUMINT") {
        type_codes::INT24
    } else if has("INT") {
        type_codes::LONG
    } else if has("JSON") {
        type_codes::JSON
    } else if has("VARCHAR") {
        type_codes::VAR_STRING
    } else if has("CHAR") {
        type_codes::STRING
    } else if has("TEXT") || has("CLOB") || has("BLOB") {
        type_codes::BLOB
    } else {
        type_codes::VAR_STRING
    }
}

/// Rows changed by every statement run on `conn` so far.
fn total_changes(conn: &Connection) -> rusqlite::Result<u64> {
    conn.query_row("SELECT total_changes()", [], |row| row.get::<_, i64>(0))
        .map(|n| n.max(0) as u64)
}

/// Type code for an expression column, taken from a stored value.
fn type_code_for_value(value: ValueRef<'_>) -> Option<u8> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(_) => Some(type_codes::LONGLONG),
        ValueRef::Real(_) => Some(type_codes::DOUBLE),
        ValueRef::Text(_) => Some(type_codes::VAR_STRING),
        ValueRef::Blob(_) => Some(type_codes::BLOB),
    }
}

fn raw_cell(value: ValueRef<'_>) -> RawCell {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string().into_bytes()),
        ValueRef::Real(f) => Some(f.to_string().into_bytes()),
        ValueRef::Text(t) => Some(t.to_vec()),
        ValueRef::Blob(b) => Some(b.to_vec()),
    }
}

/// Converts a parameter into the SQLite value its bind type asks for.
fn sql_value(param: &BoundParameter) -> SqlValue {
    match (&param.value, param.bind_type) {
        (Param::Null, _) => SqlValue::Null,
        (Param::Bool(b), _) => SqlValue::Integer(i64::from(*b)),
        (Param::Integer(i), BindType::Float) => SqlValue::Real(*i as f64),
        (Param::Integer(i), _) => SqlValue::Integer(*i),
        (Param::Float(f), BindType::Integer) => SqlValue::Integer(*f as i64),
        (Param::Float(f), _) => SqlValue::Real(*f),
        (Param::Text(s), BindType::Blob) => SqlValue::Blob(s.as_bytes().to_vec()),
        (Param::Text(s), _) => SqlValue::Text(s.clone()),
        (Param::Blob(b), BindType::Text) => {
            SqlValue::Text(String::from_utf8_lossy(b).into_owned())
        }
        (Param::Blob(b), _) => SqlValue::Blob(b.clone()),
    }
}

impl DriverConnection for SqliteConnection {
    fn prepare(&mut self, sql: &str) -> DriverResult<PreparedStatement> {
        let stmt = self.conn()?.prepare_cached(sql)?;
        Ok(PreparedStatement {
            sql: sql.to_string(),
            param_count: stmt.parameter_count(),
        })
    }

    fn execute(
        &mut self,
        statement: &PreparedStatement,
        params: &[BoundParameter],
    ) -> DriverResult<StoredResult> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&statement.sql)?;
        for (index, param) in params.iter().enumerate() {
            stmt.raw_bind_parameter(index + 1, sql_value(param))?;
        }

        if stmt.column_count() == 0 {
            // changes() and last_insert_rowid() keep the values of the last
            // row-changing statement, so only their movement counts.
            let changes_before = total_changes(conn)?;
            let rowid_before = conn.last_insert_rowid();
            stmt.raw_execute()?;
            drop(stmt);

            let affected_rows = total_changes(conn)?.saturating_sub(changes_before);
            let rowid_after = conn.last_insert_rowid();
            let insert_id = if affected_rows > 0 && rowid_after != rowid_before {
                rowid_after
            } else {
                0
            };
            return Ok(StoredResult {
                columns: None,
                rows: Vec::new(),
                affected_rows,
                insert_id,
            });
        }

        let declared: Vec<(String, Option<u8>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(type_code_for_decl)))
            .collect();
        let mut observed: Vec<Option<u8>> = declared.iter().map(|(_, code)| *code).collect();

        let mut buffered = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(declared.len());
            for (index, code) in observed.iter_mut().enumerate() {
                let value = row.get_ref(index)?;
                if code.is_none() {
                    *code = type_code_for_value(value);
                }
                cells.push(raw_cell(value));
            }
            buffered.push(cells);
        }
        drop(rows);
        drop(stmt);

        let columns = declared
            .into_iter()
            .zip(observed)
            .map(|((name, _), code)| ColumnDescriptor::new(name, code.unwrap_or(type_codes::NULL)))
            .collect();

        Ok(StoredResult {
            columns: Some(columns),
            rows: buffered,
            affected_rows: 0,
            insert_id: 0,
        })
    }

    fn set_autocommit(&mut self, enabled: bool) -> DriverResult<()> {
        self.autocommit = enabled;
        let in_transaction = self.in_transaction()?;
        if enabled && in_transaction {
            self.batch("COMMIT")
        } else if !enabled && !in_transaction {
            self.batch("BEGIN")
        } else {
            Ok(())
        }
    }

    fn commit(&mut self) -> DriverResult<()> {
        if self.in_transaction()? {
            self.batch("COMMIT")?;
        }
        if !self.autocommit {
            self.batch("BEGIN")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        if self.in_transaction()? {
            self.batch("ROLLBACK")?;
        }
        if !self.autocommit {
            self.batch("BEGIN")?;
        }
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, err)| err.into()),
            None => Ok(()),
        }
    }
}
