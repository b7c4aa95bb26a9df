//! Storage layer for relcms
//!
//! Dialect-specific SQL, bound values, documents and the connection and
//! transaction plumbing the engine runs on.

pub mod dialect;
pub mod document;
pub mod pool;
pub mod sql;
pub mod transaction;

pub use dialect::Dialect;
pub use document::{Document, DocumentId, Fields, Value};
pub use pool::{Conn, DbPool, DbTransaction, ExecOutcome, PooledConn};
pub use sql::{SqlValue, Statement, ValueKind};
pub use transaction::{Session, TransactionManager};
