//! sqlqueue: one SQLite connection, shared safely between threads.
//!
//! `sqlqueue` is the facade crate. It re-exports the connection layer from
//! `sqlqueue-sqlite` and the shared types from `sqlqueue-core`, and adds
//! [`DatabaseQueue`], which runs units of work against a single connection
//! strictly one at a time in arrival order.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sqlqueue::{ConnectionConfig, DatabaseQueue, params};
//! use std::time::Duration;
//!
//! let queue = DatabaseQueue::open(
//!     ConnectionConfig::file("app.db")
//!         .busy_timeout(Duration::from_secs(2))
//!         .cache_statements(true),
//! )?;
//!
//! queue.perform(|conn| conn.execute_batch("CREATE TABLE IF NOT EXISTS hits (n INTEGER)"))?;
//!
//! queue.in_transaction(|conn, rollback| {
//!     conn.execute("INSERT INTO hits VALUES (?)", params![1])?;
//!     if conn.changes() != 1 {
//!         rollback.rollback();
//!     }
//!     Ok(())
//! })?;
//!
//! let total = queue.perform(|conn| {
//!     let mut rows = conn.query("SELECT count(*) FROM hits", ())?;
//!     rows.next()?;
//!     rows.int(0)
//! })?;
//! ```
//!
//! # Crates
//!
//! - `sqlqueue-core`: errors, values, parameters
//! - `sqlqueue-sqlite`: connection, statements, cursors, busy handling

pub mod logging;
pub mod queue;

pub use queue::DatabaseQueue;

pub use sqlqueue_core::{
    DateFormat, Error, MisuseErrorKind, Params, QueryErrorKind, Result, TransactionErrorKind,
    Value, error,
};
pub use sqlqueue_core::{named_params, params};

pub use sqlqueue_sqlite::{
    Checkpoint, CheckpointMode, ColumnIndex, Connection, ConnectionConfig, Cursor,
    InterruptHandle, LastError, Limit, Location, OpenFlags, RollbackRequest, StepResult,
    TransactionKind, sqlite_threadsafe, sqlite_version, sqlite_version_number,
};

/// Commonly used items.
pub mod prelude {
    pub use crate::{
        Connection, ConnectionConfig, Cursor, DatabaseQueue, Error, Params, Result,
        RollbackRequest, Value, named_params, params,
    };
}
