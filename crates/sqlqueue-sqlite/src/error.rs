//! Conversion of native result codes into sqlqueue errors.
//!
//! Messages are read from the handle at the moment of failure so they always
//! describe the most recent native call.

use crate::ffi;
use sqlqueue_core::{
    BindError, BindErrorKind, ConnectionError, ConnectionErrorKind, Error, MisuseErrorKind,
    QueryError, QueryErrorKind,
};
use std::ffi::{CStr, c_int};

/// Read the current error message from a connection handle.
pub(crate) fn errmsg(db: *mut ffi::sqlite3) -> String {
    if db.is_null() {
        return "connection is not open".to_string();
    }
    // SAFETY: db is a live handle; errmsg returns a NUL-terminated string
    // owned by SQLite that we copy immediately
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        if ptr.is_null() {
            return ffi::error_string(ffi::sqlite3_errcode(db)).to_string();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

pub(crate) fn extended_code(db: *mut ffi::sqlite3, fallback: c_int) -> c_int {
    if db.is_null() {
        return fallback;
    }
    // SAFETY: db is a live handle
    unsafe { ffi::sqlite3_extended_errcode(db) }
}

pub(crate) fn open_error(db: *mut ffi::sqlite3, rc: c_int, target: &str) -> Error {
    let message = if db.is_null() {
        ffi::error_string(rc).to_string()
    } else {
        errmsg(db)
    };
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Open,
        code: Some(rc),
        extended_code: Some(extended_code(db, rc)),
        message: format!("Failed to open database '{}': {}", target, message),
    })
}

pub(crate) fn close_error(db: *mut ffi::sqlite3, rc: c_int) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Close,
        code: Some(rc),
        extended_code: Some(extended_code(db, rc)),
        message: format!("Failed to close database: {}", errmsg(db)),
    })
}

pub(crate) fn query_error(
    db: *mut ffi::sqlite3,
    kind: QueryErrorKind,
    rc: c_int,
    sql: Option<&str>,
) -> Error {
    Error::Query(QueryError {
        kind,
        code: rc & 0xff,
        extended_code: extended_code(db, rc),
        sql: sql.map(str::to_string),
        message: errmsg(db),
    })
}

pub(crate) fn bind_error(db: *mut ffi::sqlite3, sql: &str, index: usize, rc: c_int) -> Error {
    Error::Bind(BindError {
        kind: BindErrorKind::Native,
        code: Some(rc),
        sql: Some(sql.to_string()),
        index: Some(index),
        message: format!("Failed to bind parameter {}: {}", index, errmsg(db)),
    })
}

pub(crate) fn bind_count_error(sql: &str, expected: usize, actual: usize) -> Error {
    Error::Bind(BindError {
        kind: BindErrorKind::CountMismatch,
        code: Some(ffi::SQLITE_RANGE),
        sql: Some(sql.to_string()),
        index: None,
        message: format!(
            "statement expects {} argument(s) but {} were supplied",
            expected, actual
        ),
    })
}

pub(crate) fn not_open() -> Error {
    Error::misuse(
        MisuseErrorKind::ConnectionClosed,
        "the database connection is not open",
    )
}

pub(crate) fn nul_in_text(what: &str) -> Error {
    Error::misuse(
        MisuseErrorKind::InvalidText,
        format!("{} contains an interior NUL byte", what),
    )
}
