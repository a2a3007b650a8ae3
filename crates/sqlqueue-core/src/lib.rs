//! Core types for sqlqueue.
//!
//! This crate holds the pieces shared by the SQLite driver and the queue
//! facade:
//!
//! - [`Error`] and its per-stage payloads, each carrying the engine's result
//!   code and message when the failure came from the engine
//! - [`Value`], the closed set of bindable values
//! - [`Params`], a positional or named argument set
//! - [`DateFormat`], the date storage policy

pub mod error;
pub mod params;
pub mod value;

pub use error::{
    BindError, BindErrorKind, ConfigError, ConnectionError, ConnectionErrorKind, Error,
    MisuseError, MisuseErrorKind, QueryError, QueryErrorKind, Result, TransactionError,
    TransactionErrorKind, TypeError,
};
pub use params::Params;
pub use value::{DateFormat, Value, date_to_epoch_seconds, epoch_seconds_to_date};
