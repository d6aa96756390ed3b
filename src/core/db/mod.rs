/// Database Module
///
/// The parameterized-query access layer, organized leaf-first:
///
/// - **Driver capability** (`driver.rs`, `sqlite.rs`): the database client consumed
///   by everything else, with a rusqlite-backed implementation
/// - **Connection Management** (`connection.rs`): fingerprint-keyed connection reuse
/// - **Type Coercion** (`types.rs`): bind-type inference and column decoding
/// - **Query Execution** (`query.rs`): the prepare/bind/execute/fetch state machine
/// - **Transactions** (`transaction.rs`): begin/commit/rollback around a session
/// - **Statistics** (`stats.rs`): live query stats and the error log
/// - **Session** (`session.rs`): the public facade composing all of the above
///
/// ## Error Handling
///
/// All operations return `DbError`; fatal errors are also recorded in the
/// session's error log exactly once.
pub mod connection;
pub mod driver;
pub mod query;
pub mod session;
pub mod sqlite;
pub mod stats;
pub mod transaction;
pub mod types;

pub use connection::*;
pub use driver::*;
pub use query::*;
pub use session::*;
pub use sqlite::*;
pub use stats::*;
pub use transaction::*;
pub use types::*;
