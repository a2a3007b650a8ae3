//! Compiled statement wrapper.
//!
//! A [`Statement`] owns one native prepared statement for a fixed SQL text.
//! It remembers whether a cursor is currently using it and how many times it
//! has been handed out, so the cache can tell idle statements from busy ones.

use crate::error::{bind_count_error, bind_error, nul_in_text, query_error};
use crate::ffi;
use crate::types::bind_value;
use sqlqueue_core::{
    DateFormat, Error, MisuseErrorKind, Params, QueryError, QueryErrorKind, Result, Value,
};
use std::ffi::{CString, c_int};
use std::ptr;

/// Outcome of advancing a statement by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A result row is available.
    Row,
    /// The statement has run to completion.
    Done,
}

pub(crate) struct Statement {
    raw: *mut ffi::sqlite3_stmt,
    sql: String,
    in_use: bool,
    use_count: u64,
    cached: bool,
}

impl Statement {
    /// Compile `sql` against `db`.
    pub(crate) fn prepare(db: *mut ffi::sqlite3, sql: &str, cached: bool) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| nul_in_text("SQL text"))?;
        let mut raw = ptr::null_mut();

        // SAFETY: db is a live handle and c_sql is NUL-terminated
        let rc = unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), -1, &mut raw, ptr::null_mut()) };

        if rc != ffi::SQLITE_OK {
            if !raw.is_null() {
                // SAFETY: raw came from prepare and is finalized exactly once
                unsafe { ffi::sqlite3_finalize(raw) };
            }
            return Err(query_error(db, QueryErrorKind::Prepare, rc, Some(sql)));
        }

        if raw.is_null() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Prepare,
                code: ffi::SQLITE_MISUSE,
                extended_code: ffi::SQLITE_MISUSE,
                sql: Some(sql.to_string()),
                message: "SQL text contains no statement".to_string(),
            }));
        }

        tracing::trace!(sql = sql, cached = cached, "Prepared statement");

        Ok(Self {
            raw,
            sql: sql.to_string(),
            in_use: false,
            use_count: 0,
            cached,
        })
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn in_use(&self) -> bool {
        self.in_use
    }

    pub(crate) fn use_count(&self) -> u64 {
        self.use_count
    }

    pub(crate) fn is_cached(&self) -> bool {
        self.cached
    }

    pub(crate) fn set_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.raw.is_null()
    }

    /// Mark the statement as handed out to a cursor.
    pub(crate) fn check_out(&mut self) {
        self.in_use = true;
        self.use_count += 1;
    }

    pub(crate) fn check_in(&mut self) {
        self.in_use = false;
    }

    fn handle(&self) -> Result<*mut ffi::sqlite3_stmt> {
        if self.raw.is_null() {
            return Err(Error::misuse(
                MisuseErrorKind::StatementFinalized,
                format!("statement has been finalized: {}", self.sql),
            ));
        }
        Ok(self.raw)
    }

    /// Rewind execution state and drop bound values. No-op once finalized.
    pub(crate) fn reset(&mut self) {
        if self.raw.is_null() {
            return;
        }
        // SAFETY: raw is a live statement
        unsafe {
            ffi::sqlite3_reset(self.raw);
            ffi::sqlite3_clear_bindings(self.raw);
        }
    }

    /// Release the native statement. Idempotent.
    pub(crate) fn finalize(&mut self) {
        if self.raw.is_null() {
            return;
        }
        // SAFETY: raw is live and nulled right after so it is finalized once
        unsafe { ffi::sqlite3_finalize(self.raw) };
        self.raw = ptr::null_mut();
        self.in_use = false;
        tracing::trace!(sql = %self.sql, "Finalized statement");
    }

    pub(crate) fn parameter_count(&self) -> Result<usize> {
        let raw = self.handle()?;
        // SAFETY: raw is a live statement
        let count = unsafe { ffi::sqlite3_bind_parameter_count(raw) };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Bind a full argument set.
    ///
    /// Positional arguments must match the parameter count exactly. Named
    /// arguments resolve by `:name`; keys without a matching parameter are
    /// skipped with a warning.
    pub(crate) fn bind(
        &mut self,
        db: *mut ffi::sqlite3,
        params: &Params,
        date_format: Option<&DateFormat>,
    ) -> Result<()> {
        match params {
            Params::None => self.bind_positional(db, &[], date_format),
            Params::Positional(values) => self.bind_positional(db, values, date_format),
            Params::Named(pairs) => self.bind_named(db, pairs, date_format),
        }
    }

    fn bind_positional(
        &mut self,
        db: *mut ffi::sqlite3,
        values: &[Value],
        date_format: Option<&DateFormat>,
    ) -> Result<()> {
        let expected = self.parameter_count()?;
        if values.len() != expected {
            return Err(bind_count_error(&self.sql, expected, values.len()));
        }
        for (i, value) in values.iter().enumerate() {
            self.bind_one(db, i + 1, value, date_format)?;
        }
        Ok(())
    }

    fn bind_named(
        &mut self,
        db: *mut ffi::sqlite3,
        pairs: &[(String, Value)],
        date_format: Option<&DateFormat>,
    ) -> Result<()> {
        let raw = self.handle()?;
        for (key, value) in pairs {
            let name = if key.starts_with([':', '@', '$']) {
                key.clone()
            } else {
                format!(":{}", key)
            };
            let c_name = CString::new(name.as_str()).map_err(|_| nul_in_text("parameter name"))?;

            // SAFETY: raw is live and c_name is NUL-terminated
            let index = unsafe { ffi::sqlite3_bind_parameter_index(raw, c_name.as_ptr()) };
            if index <= 0 {
                tracing::warn!(
                    parameter = %name,
                    sql = %self.sql,
                    "Named argument has no matching parameter; skipping"
                );
                continue;
            }
            self.bind_one(db, usize::try_from(index).unwrap_or(0), value, date_format)?;
        }
        Ok(())
    }

    fn bind_one(
        &mut self,
        db: *mut ffi::sqlite3,
        index: usize,
        value: &Value,
        date_format: Option<&DateFormat>,
    ) -> Result<()> {
        let raw = self.handle()?;
        let Ok(c_index) = c_int::try_from(index) else {
            return Err(bind_error(db, &self.sql, index, ffi::SQLITE_RANGE));
        };
        // SAFETY: raw is live and c_index is within the parameter count
        let rc = unsafe { bind_value(raw, c_index, value, date_format) };
        if rc != ffi::SQLITE_OK {
            return Err(bind_error(db, &self.sql, index, rc));
        }
        Ok(())
    }

    /// Advance by one step.
    pub(crate) fn step(&mut self, db: *mut ffi::sqlite3) -> Result<StepResult> {
        let raw = self.handle()?;
        // SAFETY: raw is a live statement
        let rc = unsafe { ffi::sqlite3_step(raw) };
        match rc {
            ffi::SQLITE_ROW => Ok(StepResult::Row),
            ffi::SQLITE_DONE => Ok(StepResult::Done),
            _ => Err(query_error(db, QueryErrorKind::Step, rc, Some(&self.sql))),
        }
    }

    /// The raw handle for column reads. `None` once finalized.
    pub(crate) fn raw(&self) -> Option<*mut ffi::sqlite3_stmt> {
        (!self.raw.is_null()).then_some(self.raw)
    }

    pub(crate) fn column_count(&self) -> usize {
        match self.raw() {
            // SAFETY: raw is a live statement
            Some(raw) => usize::try_from(unsafe { ffi::sqlite3_column_count(raw) }).unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("in_use", &self.in_use)
            .field("use_count", &self.use_count)
            .field("cached", &self.cached)
            .field("finalized", &self.raw.is_null())
            .finish()
    }
}
