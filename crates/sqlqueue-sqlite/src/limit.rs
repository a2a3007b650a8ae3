//! Per-connection runtime limits and WAL checkpoint modes.

use crate::ffi;
use serde::{Deserialize, Serialize};
use std::ffi::c_int;

/// A runtime limit category understood by `sqlite3_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// Maximum size of a string or blob.
    Length,
    /// Maximum length of an SQL statement.
    SqlLength,
    /// Maximum number of columns in a table, index, or result set.
    Column,
    /// Maximum depth of an expression tree.
    ExprDepth,
    /// Maximum number of terms in a compound SELECT.
    CompoundSelect,
    /// Maximum number of instructions in a virtual machine program.
    VdbeOp,
    /// Maximum number of arguments to a function.
    FunctionArg,
    /// Maximum number of attached databases.
    Attached,
    /// Maximum length of a LIKE or GLOB pattern.
    LikePatternLength,
    /// Maximum host parameter number.
    VariableNumber,
    /// Maximum trigger recursion depth.
    TriggerDepth,
    /// Maximum number of auxiliary worker threads.
    WorkerThreads,
}

impl Limit {
    pub(crate) fn to_sqlite(self) -> c_int {
        match self {
            Limit::Length => ffi::SQLITE_LIMIT_LENGTH,
            Limit::SqlLength => ffi::SQLITE_LIMIT_SQL_LENGTH,
            Limit::Column => ffi::SQLITE_LIMIT_COLUMN,
            Limit::ExprDepth => ffi::SQLITE_LIMIT_EXPR_DEPTH,
            Limit::CompoundSelect => ffi::SQLITE_LIMIT_COMPOUND_SELECT,
            Limit::VdbeOp => ffi::SQLITE_LIMIT_VDBE_OP,
            Limit::FunctionArg => ffi::SQLITE_LIMIT_FUNCTION_ARG,
            Limit::Attached => ffi::SQLITE_LIMIT_ATTACHED,
            Limit::LikePatternLength => ffi::SQLITE_LIMIT_LIKE_PATTERN_LENGTH,
            Limit::VariableNumber => ffi::SQLITE_LIMIT_VARIABLE_NUMBER,
            Limit::TriggerDepth => ffi::SQLITE_LIMIT_TRIGGER_DEPTH,
            Limit::WorkerThreads => ffi::SQLITE_LIMIT_WORKER_THREADS,
        }
    }
}

/// How aggressively a WAL checkpoint copies frames back into the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Copy as many frames as possible without waiting on readers or writers.
    #[default]
    Passive,
    /// Wait for writers, then checkpoint every frame.
    Full,
    /// Like `Full`, then wait for readers so the log restarts from the top.
    Restart,
    /// Like `Restart`, then truncate the log file to zero bytes.
    Truncate,
}

impl CheckpointMode {
    pub(crate) fn to_sqlite(self) -> c_int {
        match self {
            CheckpointMode::Passive => ffi::SQLITE_CHECKPOINT_PASSIVE,
            CheckpointMode::Full => ffi::SQLITE_CHECKPOINT_FULL,
            CheckpointMode::Restart => ffi::SQLITE_CHECKPOINT_RESTART,
            CheckpointMode::Truncate => ffi::SQLITE_CHECKPOINT_TRUNCATE,
        }
    }
}

/// Frame counts reported by a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Frames in the write-ahead log.
    pub log_frames: i32,
    /// Frames copied back into the database file.
    pub checkpointed_frames: i32,
}
