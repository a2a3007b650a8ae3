//! SQLite connection layer for sqlqueue.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate wraps a single native SQLite handle and manages everything whose
//! lifetime depends on it: compiled statements, the cursors reading from them,
//! transactions and savepoints, and the busy-retry handler.
//!
//! # Features
//!
//! - Opt-in statement cache keyed by exact SQL text
//! - Cursors that release their statement exactly once (on exhaustion, on
//!   close, on drop, or when the connection closes under them)
//! - Positional and named parameter binding
//! - Transactions, named savepoints and a scoped savepoint helper
//! - Busy-retry with a time budget and randomized backoff
//! - WAL checkpoints, interrupts and runtime limits
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlqueue_sqlite::Connection;
//! use sqlqueue_core::params;
//!
//! let conn = Connection::open_in_memory()?;
//! conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! conn.execute("INSERT INTO users (name) VALUES (?)", params!["Alice"])?;
//!
//! let mut rows = conn.query("SELECT name FROM users", ())?;
//! while rows.next()? {
//!     println!("{:?}", rows.text("name")?);
//! }
//! ```
//!
//! # Type Mapping
//!
//! | Rust Type | SQLite Type |
//! |-----------|-------------|
//! | `bool` | INTEGER (0/1) |
//! | `i8` .. `i64`, `u8` .. `u32` | INTEGER |
//! | `f32`, `f64` | REAL |
//! | `String`, `&str` | TEXT |
//! | `Vec<u8>`, `&[u8]` | BLOB |
//! | `Option<T>` | NULL or T |
//! | `DateTime<Utc>` | REAL (epoch seconds) or TEXT with a date format |
//! | `Uuid` | TEXT (hyphenated) |
//! | `serde_json::Value` | TEXT |
//!
//! # Thread Safety
//!
//! `Connection` is `Send` but not `Sync`: it can move to another thread but
//! is only ever used by one at a time. Share it through `sqlqueue`'s
//! `DatabaseQueue`, or interrupt it from elsewhere with an
//! [`InterruptHandle`].

mod busy;
mod cache;
pub mod config;
pub mod connection;
pub mod cursor;
mod error;
pub mod ffi;
pub mod interrupt;
pub mod limit;
mod statement;
pub mod types;

pub use config::{ConnectionConfig, Location, OpenFlags};
pub use connection::{Connection, LastError, RollbackRequest, TransactionKind};
pub use cursor::{ColumnIndex, Cursor};
pub use interrupt::InterruptHandle;
pub use limit::{Checkpoint, CheckpointMode, Limit};
pub use statement::StepResult;

/// The SQLite library version, e.g. `"3.46.0"`.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// The SQLite library version number, e.g. `3046000`.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}

/// The compile-time threading mode of the linked library.
pub fn sqlite_threadsafe() -> i32 {
    ffi::threadsafe()
}
