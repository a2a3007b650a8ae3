//! Cursors over statement results.
//!
//! A [`Cursor`] borrows its [`Connection`] and refers to its statement by id
//! through the connection's registry. Closing the connection drops the
//! registry entry, so a cursor that outlives a close sees itself as closed
//! instead of touching a finalized statement.

#![allow(clippy::cast_possible_truncation)]

use crate::connection::Connection;
use crate::ffi;
use crate::statement::StepResult;
use crate::types::{column_blob, column_name, column_text, read_column};
use chrono::{DateTime, Utc};
use sqlqueue_core::{
    DateFormat, Error, MisuseError, MisuseErrorKind, Params, Result, Value,
    epoch_seconds_to_date,
};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::ffi::c_int;

pub(crate) type CursorId = u64;

/// Something that selects a result column: a zero-based index or a
/// case-insensitive column name.
pub trait ColumnIndex {
    /// Resolve to a zero-based index. `None` means no such column.
    fn resolve(&self, cursor: &Cursor<'_>) -> Result<Option<usize>>;
}

impl ColumnIndex for usize {
    fn resolve(&self, _cursor: &Cursor<'_>) -> Result<Option<usize>> {
        Ok(Some(*self))
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, cursor: &Cursor<'_>) -> Result<Option<usize>> {
        cursor.column_index(self)
    }
}

impl ColumnIndex for String {
    fn resolve(&self, cursor: &Cursor<'_>) -> Result<Option<usize>> {
        cursor.column_index(self)
    }
}

/// A result set positioned on at most one row at a time.
///
/// Cursors returned by [`Connection::query`] close themselves once the
/// rows run out. Cursors returned by [`Connection::prepare`] stay open so
/// they can be rebound and rerun. Either way, dropping a cursor closes it.
pub struct Cursor<'conn> {
    conn: &'conn Connection,
    id: CursorId,
    sql: String,
    auto_close: bool,
    closed: bool,
    columns: OnceCell<HashMap<String, usize>>,
}

impl<'conn> Cursor<'conn> {
    pub(crate) fn new(conn: &'conn Connection, id: CursorId, sql: String, auto_close: bool) -> Self {
        Self {
            conn,
            id,
            sql,
            auto_close,
            closed: false,
            columns: OnceCell::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Whether the cursor closes itself when a step yields no row.
    pub fn should_auto_close(&self) -> bool {
        self.auto_close
    }

    /// Whether the cursor has been closed, by the caller, by exhaustion, or
    /// by its connection closing.
    pub fn is_closed(&self) -> bool {
        self.closed || !self.conn.is_cursor_registered(self.id)
    }

    /// Release the statement. Safe to call repeatedly, and after the
    /// connection has closed.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.conn.release_cursor(self.id);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::misuse(
                MisuseErrorKind::CursorClosed,
                format!("cursor has been closed: {}", self.sql),
            ));
        }
        Ok(())
    }

    // ==================== Stepping ====================

    /// Advance to the next row.
    pub fn step(&mut self) -> Result<StepResult> {
        let result = self.advance();
        self.conn.surface(result)
    }

    /// Advance to the next row, returning `false` once the rows run out.
    pub fn next(&mut self) -> Result<bool> {
        Ok(self.step()? == StepResult::Row)
    }

    pub(crate) fn advance(&mut self) -> Result<StepResult> {
        self.ensure_open()?;
        let result = self
            .conn
            .with_statement(self.id, |statement, db, _| statement.step(db));

        match &result {
            Ok(StepResult::Row) => {}
            Err(Error::Misuse(MisuseError {
                kind: MisuseErrorKind::CursorClosed,
                ..
            })) => self.closed = true,
            _ => {
                if self.auto_close {
                    self.close();
                }
            }
        }
        result
    }

    /// Clear bound values and rebind. The cursor is rewound first.
    pub fn bind(&mut self, params: impl Into<Params>) -> Result<()> {
        let params = params.into();
        let result = self.ensure_open().and_then(|()| {
            self.conn.with_statement(self.id, |statement, db, date_format| {
                statement.reset();
                statement.bind(db, &params, date_format)
            })
        });
        self.conn.surface(result)
    }

    /// Rewind to before the first row and clear bound values.
    pub fn reset(&mut self) -> Result<()> {
        let result = self.ensure_open().and_then(|()| {
            self.conn.with_statement(self.id, |statement, _, _| {
                statement.reset();
                Ok(())
            })
        });
        self.conn.surface(result)
    }

    // ==================== Column metadata ====================

    pub fn column_count(&self) -> Result<usize> {
        self.ensure_open()?;
        self.conn
            .with_statement(self.id, |statement, _, _| Ok(statement.column_count()))
    }

    pub fn column_name(&self, index: usize) -> Result<Option<String>> {
        self.ensure_open()?;
        self.conn.with_statement(self.id, |statement, _, _| {
            if index >= statement.column_count() {
                return Ok(None);
            }
            // SAFETY: the statement is live and index is in range
            Ok(statement
                .raw()
                .and_then(|raw| unsafe { column_name(raw, index as c_int) }))
        })
    }

    pub fn column_names(&self) -> Result<Vec<String>> {
        let count = self.column_count()?;
        (0..count)
            .map(|i| self.column_name(i).map(Option::unwrap_or_default))
            .collect()
    }

    /// Look up a column by name, ignoring case.
    ///
    /// The lookup table is built on first use. An unknown name is logged and
    /// yields `None`.
    pub fn column_index(&self, name: &str) -> Result<Option<usize>> {
        if self.columns.get().is_none() {
            let mut map = HashMap::new();
            for (i, column) in self.column_names()?.into_iter().enumerate() {
                map.entry(column.to_lowercase()).or_insert(i);
            }
            let _ = self.columns.set(map);
        }

        let found = self
            .columns
            .get()
            .and_then(|map| map.get(&name.to_lowercase()).copied());
        if found.is_none() {
            tracing::warn!(column = name, sql = %self.sql, "No column with this name");
        }
        Ok(found)
    }

    // ==================== Column values ====================

    fn read<T>(
        &self,
        column: impl ColumnIndex,
        null: T,
        f: impl FnOnce(*mut ffi::sqlite3_stmt, c_int, Option<&DateFormat>) -> T,
    ) -> Result<T> {
        self.ensure_open()?;
        let Some(index) = column.resolve(self)? else {
            return Ok(null);
        };
        self.conn.with_statement(self.id, |statement, _, date_format| {
            let Some(raw) = statement.raw() else {
                return Err(Error::misuse(
                    MisuseErrorKind::StatementFinalized,
                    "cursor's statement has been finalized",
                ));
            };
            if index >= statement.column_count() {
                tracing::warn!(index = index, sql = statement.sql(), "Column index out of range");
                return Ok(null);
            }
            Ok(f(raw, index as c_int, date_format))
        })
    }

    pub fn is_null(&self, column: impl ColumnIndex) -> Result<bool> {
        // SAFETY: read() only passes a live statement and an in-range index
        self.read(column, true, |raw, i, _| unsafe {
            ffi::sqlite3_column_type(raw, i) == ffi::SQLITE_NULL
        })
    }

    /// Column as a 64-bit integer; NULL reads as 0.
    pub fn int(&self, column: impl ColumnIndex) -> Result<i64> {
        self.read(column, 0, |raw, i, _| unsafe { ffi::sqlite3_column_int64(raw, i) })
    }

    /// Column as a float; NULL reads as 0.0.
    pub fn double(&self, column: impl ColumnIndex) -> Result<f64> {
        self.read(column, 0.0, |raw, i, _| unsafe { ffi::sqlite3_column_double(raw, i) })
    }

    pub fn bool(&self, column: impl ColumnIndex) -> Result<bool> {
        Ok(self.int(column)? != 0)
    }

    pub fn text(&self, column: impl ColumnIndex) -> Result<Option<String>> {
        self.read(column, None, |raw, i, _| unsafe { column_text(raw, i) })
    }

    pub fn blob(&self, column: impl ColumnIndex) -> Result<Option<Vec<u8>>> {
        self.read(column, None, |raw, i, _| unsafe { column_blob(raw, i) })
    }

    /// Column decoded into a [`Value`] by its storage class.
    pub fn value(&self, column: impl ColumnIndex) -> Result<Value> {
        self.read(column, Value::Null, |raw, i, _| unsafe { read_column(raw, i) })
    }

    /// Column as a date.
    ///
    /// Text is parsed with the connection's date format (RFC 3339 when none
    /// is set); numbers are read as epoch seconds.
    pub fn date(&self, column: impl ColumnIndex) -> Result<Option<DateTime<Utc>>> {
        self.read(column, None, |raw, i, date_format| unsafe {
            match ffi::sqlite3_column_type(raw, i) {
                ffi::SQLITE_NULL => None,
                ffi::SQLITE_TEXT => {
                    let text = column_text(raw, i)?;
                    date_format.unwrap_or(&DateFormat::Rfc3339).parse(&text)
                }
                _ => epoch_seconds_to_date(ffi::sqlite3_column_double(raw, i)),
            }
        })
    }

    /// Every column of the current row.
    pub fn row(&self) -> Result<Vec<Value>> {
        let count = self.column_count()?;
        (0..count).map(|i| self.value(i)).collect()
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("sql", &self.sql)
            .field("auto_close", &self.auto_close)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
