/// Driver Capability Module
///
/// The database client this layer sits on is consumed through two traits:
/// `Driver` opens connections, `DriverConnection` prepares and executes
/// statements on one of them. Results come back fully buffered
/// (store_result semantics) with untyped cells; recovering semantic types is
/// the job of `types::decode_row`.

use super::types::BoundParameter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure reported by the driver, with its native error number.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{errno}] {message}")]
pub struct DriverError {
    pub errno: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        DriverError {
            errno,
            message: message.into(),
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Everything needed to open a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub port: u16,
}

/// Column metadata: the column name and the driver type code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_code: u8,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, type_code: u8) -> Self {
        ColumnDescriptor {
            name: name.into(),
            type_code,
        }
    }
}

/// One untyped cell as handed over by the driver; `None` is SQL NULL.
pub type RawCell = Option<Vec<u8>>;

/// A statement the driver accepted, with its placeholder count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub sql: String,
    pub param_count: usize,
}

/// The fully buffered outcome of one execute call.
#[derive(Debug, Clone, Default)]
pub struct StoredResult {
    /// `None` when the statement produces no result set (DML, DDL)
    pub columns: Option<Vec<ColumnDescriptor>>,
    pub rows: Vec<Vec<RawCell>>,
    pub affected_rows: u64,
    pub insert_id: i64,
}

impl StoredResult {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Bytes held by the buffered cells and column names.
    pub fn buffered_bytes(&self) -> usize {
        let names: usize = self
            .columns
            .iter()
            .flatten()
            .map(|c| c.name.len())
            .sum();
        let cells: usize = self
            .rows
            .iter()
            .flatten()
            .map(|cell| cell.as_ref().map_or(0, Vec::len))
            .sum();
        names + cells
    }
}

/// Opens physical connections.
pub trait Driver: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> DriverResult<Box<dyn DriverConnection>>;

    /// Version string of the client library.
    fn client_info(&self) -> String;
}

/// A live connection handle.
pub trait DriverConnection: Send {
    /// Validates the SQL and reports how many placeholders it has.
    fn prepare(&mut self, sql: &str) -> DriverResult<PreparedStatement>;

    /// Binds `params` (already typed) and runs the statement, buffering every row.
    fn execute(
        &mut self,
        statement: &PreparedStatement,
        params: &[BoundParameter],
    ) -> DriverResult<StoredResult>;

    fn set_autocommit(&mut self, enabled: bool) -> DriverResult<()>;

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    fn close(&mut self) -> DriverResult<()>;
}
