//! Error types for sqlqueue operations.

use std::fmt;

/// Primary result codes reported by the SQLite engine that the error surface
/// needs to reason about without linking against the engine itself.
pub mod code {
    pub const OK: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const BUSY: i32 = 5;
    pub const LOCKED: i32 = 6;
    pub const INTERRUPT: i32 = 9;
    pub const MISUSE: i32 = 21;
    pub const RANGE: i32 = 25;
    pub const ROW: i32 = 100;
    pub const DONE: i32 = 101;
}

/// The primary error type for all sqlqueue operations.
#[derive(Debug)]
pub enum Error {
    /// Opening, closing or otherwise managing the native handle failed
    Connection(ConnectionError),
    /// Preparing, stepping or checkpointing failed inside the engine
    Query(QueryError),
    /// Binding arguments to a statement failed
    Bind(BindError),
    /// Transaction state machine violations
    Transaction(TransactionError),
    /// An API was used in a state where it is not allowed
    Misuse(MisuseError),
    /// Type conversion errors
    Type(TypeError),
    /// Configuration errors
    Config(ConfigError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub code: Option<i32>,
    pub extended_code: Option<i32>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The native open call returned a non-OK code
    Open,
    /// The native close call failed with a non-busy code, or kept failing
    Close,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub code: i32,
    pub extended_code: i32,
    pub sql: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// SQL text failed to compile
    Prepare,
    /// A step returned an error code
    Step,
    /// `execute` reached a terminal state other than "done"
    UnexpectedRow,
    /// One-shot batch execution failed
    Exec,
    /// WAL checkpoint failed or does not apply
    Checkpoint,
    /// A per-connection limit request was rejected
    Limit,
}

#[derive(Debug)]
pub struct BindError {
    pub kind: BindErrorKind,
    pub code: Option<i32>,
    pub sql: Option<String>,
    pub index: Option<usize>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindErrorKind {
    /// Positional argument count differs from the statement's parameter count
    CountMismatch,
    /// A native bind call returned non-OK
    Native,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// A transaction is already open on this connection
    AlreadyActive,
}

#[derive(Debug)]
pub struct MisuseError {
    pub kind: MisuseErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisuseErrorKind {
    /// The connection has no open native handle
    ConnectionClosed,
    /// The cursor was closed explicitly, on exhaustion, or by its connection
    CursorClosed,
    /// The statement handle has already been finalized
    StatementFinalized,
    /// Another operation is currently executing on the same connection
    InFlight,
    /// A unit of work tried to submit to the queue it is running on
    ReentrantQueue,
    /// Text passed to the engine contains an interior NUL byte
    InvalidText,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl Error {
    /// Build a misuse error.
    pub fn misuse(kind: MisuseErrorKind, message: impl Into<String>) -> Self {
        Error::Misuse(MisuseError {
            kind,
            message: message.into(),
        })
    }

    /// The engine's primary result code, when the error came from the engine.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Connection(e) => e.code,
            Error::Query(e) => Some(e.code),
            Error::Bind(e) => e.code,
            Error::Misuse(_) => Some(code::MISUSE),
            _ => None,
        }
    }

    /// The engine's extended result code, when known.
    pub fn extended_code(&self) -> Option<i32> {
        match self {
            Error::Connection(e) => e.extended_code,
            Error::Query(e) => Some(e.extended_code),
            _ => None,
        }
    }

    /// Did the engine report that another connection holds a conflicting lock?
    pub fn is_busy(&self) -> bool {
        matches!(self.code(), Some(code::BUSY | code::LOCKED))
    }

    /// Is this a retryable error (busy, locked, interrupted)?
    pub fn is_retryable(&self) -> bool {
        self.is_busy() || self.code() == Some(code::INTERRUPT)
    }

    /// Was an API used in a state where it is not allowed?
    pub fn is_misuse(&self) -> bool {
        matches!(self, Error::Misuse(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Bind(b) => b.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Bind(e) => write!(f, "Bind error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Misuse(e) => write!(f, "Misuse: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(sql) = &self.sql {
            write!(f, " in `{}`", sql)?;
        }
        Ok(())
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = self.index {
            write!(f, "parameter {}: {}", index, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<BindError> for Error {
    fn from(err: BindError) -> Self {
        Error::Bind(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<MisuseError> for Error {
    fn from(err: MisuseError) -> Self {
        Error::Misuse(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlqueue operations.
pub type Result<T> = std::result::Result<T, Error>;
