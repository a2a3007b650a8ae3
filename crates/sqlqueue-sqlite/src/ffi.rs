//! Low-level bindings to libsqlite3.
//!
//! The declarations come from `libsqlite3-sys`; this module narrows them to
//! what the driver uses and adds a few safe helpers around the static
//! library queries. Everything else in the crate goes through here.

#![allow(non_camel_case_types)]

use std::ffi::{CStr, c_int};

pub use libsqlite3_sys::{sqlite3, sqlite3_destructor_type, sqlite3_stmt};

// Connection management
pub use libsqlite3_sys::{
    sqlite3_busy_handler, sqlite3_close, sqlite3_get_autocommit, sqlite3_interrupt,
    sqlite3_limit, sqlite3_next_stmt, sqlite3_open_v2, sqlite3_wal_checkpoint_v2,
};

// Error handling
pub use libsqlite3_sys::{sqlite3_errcode, sqlite3_errmsg, sqlite3_errstr, sqlite3_extended_errcode};

// Statements
pub use libsqlite3_sys::{
    sqlite3_bind_blob, sqlite3_bind_double, sqlite3_bind_int, sqlite3_bind_int64,
    sqlite3_bind_null, sqlite3_bind_parameter_count, sqlite3_bind_parameter_index,
    sqlite3_bind_text, sqlite3_clear_bindings, sqlite3_column_blob, sqlite3_column_bytes,
    sqlite3_column_count, sqlite3_column_double, sqlite3_column_int64, sqlite3_column_name,
    sqlite3_column_text, sqlite3_column_type, sqlite3_finalize, sqlite3_prepare_v2,
    sqlite3_reset, sqlite3_step,
};

// Execution helpers and metadata
pub use libsqlite3_sys::{
    sqlite3_changes, sqlite3_exec, sqlite3_free, sqlite3_last_insert_rowid,
    sqlite3_libversion, sqlite3_libversion_number, sqlite3_threadsafe, sqlite3_total_changes,
};

// Result codes
pub use libsqlite3_sys::{
    SQLITE_BUSY, SQLITE_DONE, SQLITE_ERROR, SQLITE_LOCKED, SQLITE_MISUSE, SQLITE_OK,
    SQLITE_RANGE, SQLITE_ROW, SQLITE_TOOBIG,
};

// sqlite3_open_v2 flags
pub use libsqlite3_sys::{
    SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_MEMORY, SQLITE_OPEN_NOMUTEX,
    SQLITE_OPEN_PRIVATECACHE, SQLITE_OPEN_READONLY, SQLITE_OPEN_READWRITE,
    SQLITE_OPEN_SHAREDCACHE, SQLITE_OPEN_URI,
};

// Fundamental data types
pub use libsqlite3_sys::{SQLITE_BLOB, SQLITE_FLOAT, SQLITE_INTEGER, SQLITE_NULL, SQLITE_TEXT};

// WAL checkpoint modes
pub use libsqlite3_sys::{
    SQLITE_CHECKPOINT_FULL, SQLITE_CHECKPOINT_PASSIVE, SQLITE_CHECKPOINT_RESTART,
    SQLITE_CHECKPOINT_TRUNCATE,
};

// Limit categories
pub use libsqlite3_sys::{
    SQLITE_LIMIT_ATTACHED, SQLITE_LIMIT_COLUMN, SQLITE_LIMIT_COMPOUND_SELECT,
    SQLITE_LIMIT_EXPR_DEPTH, SQLITE_LIMIT_FUNCTION_ARG, SQLITE_LIMIT_LENGTH,
    SQLITE_LIMIT_LIKE_PATTERN_LENGTH, SQLITE_LIMIT_SQL_LENGTH, SQLITE_LIMIT_TRIGGER_DEPTH,
    SQLITE_LIMIT_VARIABLE_NUMBER, SQLITE_LIMIT_VDBE_OP, SQLITE_LIMIT_WORKER_THREADS,
};

/// Destructor marker telling SQLite to copy bound text and blobs.
pub fn transient() -> sqlite3_destructor_type {
    libsqlite3_sys::SQLITE_TRANSIENT()
}

/// Get the SQLite library version as a string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        let ptr = sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// Get the SQLite library version as a number.
pub fn version_number() -> i32 {
    // SAFETY: sqlite3_libversion_number is always safe to call
    unsafe { sqlite3_libversion_number() }
}

/// Get the compile-time threading mode (0 = single-thread, 1 = serialized,
/// 2 = multi-thread).
pub fn threadsafe() -> i32 {
    // SAFETY: sqlite3_threadsafe is always safe to call
    unsafe { sqlite3_threadsafe() }
}

/// Convert an SQLite result code to a human-readable string.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a static string
    unsafe {
        let ptr = sqlite3_errstr(code);
        if ptr.is_null() {
            return "unknown error";
        }
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown error")
    }
}

/// Returns `true` for codes that indicate a genuine failure rather than
/// progress (`OK`, `ROW`, `DONE`).
pub fn is_error_code(code: c_int) -> bool {
    !matches!(code, SQLITE_OK | SQLITE_ROW | SQLITE_DONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let v = version();
        assert!(!v.is_empty());
        // SQLite version should start with 3.
        assert!(v.starts_with('3'));
    }

    #[test]
    fn test_version_number() {
        // SQLite 3.x.x version numbers are in the form 3XXYYZZ
        assert!(version_number() >= 3_000_000);
    }

    #[test]
    fn test_error_string() {
        assert_eq!(error_string(SQLITE_OK), "not an error");
        assert_eq!(error_string(SQLITE_ERROR), "SQL logic error");
        assert_eq!(error_string(SQLITE_BUSY), "database is locked");
    }

    #[test]
    fn test_error_code_classification() {
        assert!(!is_error_code(SQLITE_OK));
        assert!(!is_error_code(SQLITE_ROW));
        assert!(!is_error_code(SQLITE_DONE));
        assert!(is_error_code(SQLITE_BUSY));
        assert!(is_error_code(SQLITE_MISUSE));
    }

    #[test]
    fn test_result_codes_match_core() {
        use sqlqueue_core::error::code;
        assert_eq!(SQLITE_OK, code::OK);
        assert_eq!(SQLITE_BUSY, code::BUSY);
        assert_eq!(SQLITE_LOCKED, code::LOCKED);
        assert_eq!(SQLITE_MISUSE, code::MISUSE);
        assert_eq!(SQLITE_ROW, code::ROW);
        assert_eq!(SQLITE_DONE, code::DONE);
    }
}
