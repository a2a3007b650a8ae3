//! Value binding and column decoding between Rust and SQLite.
//!
//! SQLite has five storage classes (INTEGER, REAL, TEXT, BLOB, NULL). Every
//! [`Value`] variant is mapped onto one of them on the way in, and every
//! column is decoded back into the matching variant on the way out.

#![allow(clippy::cast_possible_truncation)]

use crate::ffi;
use sqlqueue_core::{DateFormat, Value, date_to_epoch_seconds};
use std::ffi::{CStr, c_int};

/// Bind a Value to a prepared statement parameter.
///
/// Dates are written as text when `date_format` is set, otherwise as
/// fractional epoch seconds.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a 1-based parameter index
pub unsafe fn bind_value(
    stmt: *mut ffi::sqlite3_stmt,
    index: c_int,
    value: &Value,
    date_format: Option<&DateFormat>,
) -> c_int {
    // SAFETY: the caller guarantees `stmt` is valid for every branch below
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),

            Value::Bool(b) => ffi::sqlite3_bind_int(stmt, index, c_int::from(*b)),

            Value::Int(v) => ffi::sqlite3_bind_int(stmt, index, *v),

            Value::BigInt(v) => ffi::sqlite3_bind_int64(stmt, index, *v),

            Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),

            Value::Text(s) => bind_text(stmt, index, s),

            Value::Bytes(b) => bind_blob(stmt, index, b),

            Value::Date(date) => match date_format {
                Some(format) => bind_text(stmt, index, &format.format(date)),
                None => ffi::sqlite3_bind_double(stmt, index, date_to_epoch_seconds(date)),
            },

            // UUIDs keep their canonical hyphenated form
            Value::Uuid(uuid) => bind_text(stmt, index, &uuid.hyphenated().to_string()),

            Value::Json(json) => bind_text(stmt, index, &json.to_string()),

            Value::Rendered(s) => {
                tracing::warn!(
                    index = index,
                    text = %s,
                    "binding a value without a dedicated type through its text form"
                );
                bind_text(stmt, index, s)
            }
        }
    }
}

unsafe fn bind_text(stmt: *mut ffi::sqlite3_stmt, index: c_int, s: &str) -> c_int {
    let bytes = s.as_bytes();
    let Ok(len) = c_int::try_from(bytes.len()) else {
        return ffi::SQLITE_TOOBIG;
    };
    // SAFETY: bytes outlive the call and SQLITE_TRANSIENT makes SQLite copy them
    unsafe { ffi::sqlite3_bind_text(stmt, index, bytes.as_ptr().cast(), len, ffi::transient()) }
}

unsafe fn bind_blob(stmt: *mut ffi::sqlite3_stmt, index: c_int, b: &[u8]) -> c_int {
    let Ok(len) = c_int::try_from(b.len()) else {
        return ffi::SQLITE_TOOBIG;
    };
    // SAFETY: b outlives the call and SQLITE_TRANSIENT makes SQLite copy it
    unsafe { ffi::sqlite3_bind_blob(stmt, index, b.as_ptr().cast(), len, ffi::transient()) }
}

/// Read a column value from a result row.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that has just returned SQLITE_ROW
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: guaranteed by the caller
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => Value::BigInt(ffi::sqlite3_column_int64(stmt, index)),
            ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, index)),
            ffi::SQLITE_TEXT => column_text(stmt, index).map_or(Value::Null, Value::Text),
            ffi::SQLITE_BLOB => Value::Bytes(column_blob(stmt, index).unwrap_or_default()),
            _ => Value::Null,
        }
    }
}

/// Read a column as UTF-8 text; `None` for SQL NULL.
///
/// # Safety
/// Same requirements as [`read_column`].
pub unsafe fn column_text(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: guaranteed by the caller; the pointer is valid until the next
    // step/reset and we copy out immediately
    unsafe {
        let ptr = ffi::sqlite3_column_text(stmt, index);
        if ptr.is_null() {
            return None;
        }
        let len = ffi::sqlite3_column_bytes(stmt, index);
        let slice = std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize);
        Some(String::from_utf8_lossy(slice).into_owned())
    }
}

/// Read a column as bytes; `None` for SQL NULL.
///
/// # Safety
/// Same requirements as [`read_column`].
pub unsafe fn column_blob(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<Vec<u8>> {
    // SAFETY: guaranteed by the caller
    unsafe {
        if ffi::sqlite3_column_type(stmt, index) == ffi::SQLITE_NULL {
            return None;
        }
        let ptr = ffi::sqlite3_column_blob(stmt, index);
        let len = ffi::sqlite3_column_bytes(stmt, index);
        if ptr.is_null() || len == 0 {
            return Some(Vec::new());
        }
        Some(std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize).to_vec())
    }
}

/// Get the column name from a result.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: guaranteed by the caller
    unsafe {
        let ptr = ffi::sqlite3_column_name(stmt, index);
        if ptr.is_null() {
            None
        } else {
            CStr::from_ptr(ptr).to_str().ok().map(String::from)
        }
    }
}
