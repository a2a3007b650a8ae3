//! SQLite connection.
//!
//! A [`Connection`] owns one native handle together with everything that
//! depends on it: the statement cache, the registry of open cursors, and the
//! busy-retry handler. All methods take `&self`; the mutable state lives in a
//! `RefCell`, so an operation started while another one is still inside the
//! native engine is reported as misuse rather than corrupting the handle.
//!
//! ```rust,ignore
//! use sqlqueue_sqlite::{Connection, ConnectionConfig};
//! use sqlqueue_core::params;
//!
//! let conn = Connection::connect(ConnectionConfig::memory())?;
//! conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")?;
//! conn.execute("INSERT INTO t (name) VALUES (?)", params!["alice"])?;
//!
//! let mut rows = conn.query("SELECT id, name FROM t", ())?;
//! while rows.next()? {
//!     println!("{} {:?}", rows.int(0)?, rows.text("name")?);
//! }
//! ```

// FFI code needs to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]
#![allow(clippy::result_large_err)]

use crate::busy::{BusyHandler, busy_callback};
use crate::cache::{StatementCache, StatementId};
use crate::config::{ConnectionConfig, OpenFlags, validate_open};
use crate::cursor::{Cursor, CursorId};
use crate::error::{
    close_error, errmsg, extended_code, not_open, nul_in_text, open_error, query_error,
};
use crate::ffi;
use crate::interrupt::InterruptHandle;
use crate::limit::{Checkpoint, CheckpointMode, Limit};
use crate::statement::{Statement, StepResult};
use serde::{Deserialize, Serialize};
use sqlqueue_core::{
    DateFormat, Error, MisuseErrorKind, Params, QueryError, QueryErrorKind, Result,
    TransactionError, TransactionErrorKind,
};
use std::cell::{Cell, RefCell, RefMut};
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_void};
use std::ptr;
use std::time::Duration;

/// Prefix of generated savepoint names.
const SAVEPOINT_PREFIX: &str = "sqlqueue_sp_";

/// Locking behaviour requested when a transaction begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Acquire locks lazily on first read or write.
    #[default]
    Deferred,
    /// Take the write lock immediately.
    Immediate,
    /// Take an exclusive lock immediately.
    Exclusive,
}

impl TransactionKind {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionKind::Deferred => "BEGIN DEFERRED TRANSACTION",
            TransactionKind::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            TransactionKind::Exclusive => "BEGIN EXCLUSIVE TRANSACTION",
        }
    }
}

/// Handed to transaction and savepoint bodies so they can ask for their
/// work to be rolled back without returning an error.
#[derive(Debug, Default)]
pub struct RollbackRequest {
    requested: bool,
}

impl RollbackRequest {
    /// Roll back instead of committing or keeping the work.
    pub fn rollback(&mut self) {
        self.requested = true;
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

/// Snapshot of the most recent engine error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: i32,
    pub extended_code: i32,
    pub message: String,
}

struct Inner {
    db: *mut ffi::sqlite3,
    is_open: bool,
    in_transaction: bool,
    cache_statements: bool,
    busy_timeout: Duration,
    date_format: Option<DateFormat>,
    statements: StatementCache,
    cursors: HashMap<CursorId, StatementId>,
    next_cursor_id: CursorId,
    next_savepoint_id: u64,
}

impl Inner {
    fn open_db(&self) -> Result<*mut ffi::sqlite3> {
        if !self.is_open || self.db.is_null() {
            return Err(not_open());
        }
        Ok(self.db)
    }
}

/// A connection to a SQLite database.
pub struct Connection {
    config: ConnectionConfig,
    inner: RefCell<Inner>,
    busy_handler: RefCell<Option<Box<BusyHandler>>>,
    interrupt: InterruptHandle,
    log_errors: Cell<bool>,
    crash_on_errors: Cell<bool>,
}

// SAFETY: every raw pointer is owned by the connection and only touched
// through it. The RefCell keeps Connection !Sync, so a handle is never used
// from two threads at once, and cursors borrow the connection so it cannot
// move while a statement is live. SQLite permits a handle to migrate between
// threads in multi-thread and serialized modes.
unsafe impl Send for Connection {}

impl Connection {
    /// Create a closed connection. Call [`open`](Self::open) before use.
    pub fn new(config: ConnectionConfig) -> Self {
        let inner = Inner {
            db: ptr::null_mut(),
            is_open: false,
            in_transaction: false,
            cache_statements: config.cache_statements,
            busy_timeout: config.busy_timeout_duration(),
            date_format: config.date_format.clone(),
            statements: StatementCache::default(),
            cursors: HashMap::new(),
            next_cursor_id: 0,
            next_savepoint_id: 0,
        };
        Self {
            log_errors: Cell::new(config.log_errors),
            crash_on_errors: Cell::new(config.crash_on_errors),
            config,
            inner: RefCell::new(inner),
            busy_handler: RefCell::new(None),
            interrupt: InterruptHandle::new(),
        }
    }

    /// Create and open a connection.
    pub fn connect(config: ConnectionConfig) -> Result<Self> {
        let conn = Self::new(config);
        conn.open()?;
        Ok(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::connect(ConnectionConfig::memory())
    }

    /// Open (or create) a database file.
    pub fn open_file(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::connect(ConnectionConfig::file(path))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    // ==================== Lifecycle ====================

    /// Open the native handle with the configured flags and VFS.
    ///
    /// Does nothing if the connection is already open.
    pub fn open(&self) -> Result<()> {
        let result = self.open_handle(self.config.flags, self.config.vfs.as_deref());
        self.surface(result)
    }

    /// Open the native handle with explicit flags and VFS.
    pub fn open_with(&self, flags: OpenFlags, vfs: Option<&str>) -> Result<()> {
        let result = self.open_handle(flags, vfs);
        self.surface(result)
    }

    fn open_handle(&self, flags: OpenFlags, vfs: Option<&str>) -> Result<()> {
        let mut guard = self.state()?;
        let inner = &mut *guard;
        if inner.is_open {
            return Ok(());
        }
        validate_open(flags, vfs)?;

        if !inner.db.is_null() {
            tracing::debug!("Closing handle left over from a failed open");
            // SAFETY: the stale handle was returned by sqlite3_open_v2 and
            // has no statements
            unsafe { ffi::sqlite3_close(inner.db) };
            inner.db = ptr::null_mut();
        }

        let target = self.config.location.as_open_target();
        let c_target = CString::new(target.as_str()).map_err(|_| nul_in_text("database path"))?;
        let c_vfs = vfs
            .map(CString::new)
            .transpose()
            .map_err(|_| nul_in_text("VFS name"))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: all pointers are valid for the duration of the call
        let rc = unsafe {
            ffi::sqlite3_open_v2(
                c_target.as_ptr(),
                &mut db,
                flags.to_sqlite_flags(),
                c_vfs.as_ref().map_or(ptr::null(), |v| v.as_ptr()),
            )
        };
        inner.db = db;

        if rc != ffi::SQLITE_OK {
            return Err(open_error(db, rc, &target));
        }

        self.install_busy_handler(db, inner.busy_timeout);
        inner.is_open = true;
        self.interrupt.attach(db);

        tracing::debug!(
            location = ?self.config.location,
            vfs = ?vfs,
            "Opened database"
        );
        Ok(())
    }

    fn install_busy_handler(&self, db: *mut ffi::sqlite3, budget: Duration) {
        let Ok(mut slot) = self.busy_handler.try_borrow_mut() else {
            return;
        };
        if budget.is_zero() {
            // SAFETY: db is live; a null callback removes the handler
            unsafe { ffi::sqlite3_busy_handler(db, None, ptr::null_mut()) };
            *slot = None;
            return;
        }

        let handler = BusyHandler::new(budget);
        let ctx = (&*handler as *const BusyHandler).cast_mut().cast::<c_void>();
        // SAFETY: the boxed handler stays in `slot` until it is replaced or
        // the handle is closed, both of which unregister it first
        unsafe { ffi::sqlite3_busy_handler(db, Some(busy_callback), ctx) };
        *slot = Some(handler);
    }

    /// Close the connection.
    ///
    /// Cached statements are finalized and open cursors are force-closed
    /// first. Calling this on a closed connection does nothing.
    pub fn close(&self) -> Result<()> {
        let result = self.shutdown();
        self.surface(result)
    }

    fn shutdown(&self) -> Result<()> {
        let mut guard = self.state()?;
        let inner = &mut *guard;
        if inner.db.is_null() {
            inner.is_open = false;
            return Ok(());
        }

        inner.statements.clear_cached_statements();
        let open_cursors = inner.cursors.len();
        for (_, statement) in inner.cursors.drain() {
            inner.statements.release(statement);
        }
        if open_cursors > 0 {
            tracing::debug!(count = open_cursors, "Force-closed open cursors");
        }
        inner.statements.finalize_all();

        let db = inner.db;
        self.interrupt.detach();
        // SAFETY: db is live; unregister before the boxed handler can go away
        unsafe { ffi::sqlite3_busy_handler(db, None, ptr::null_mut()) };

        let mut finalized_leaks = false;
        loop {
            // SAFETY: db is live and closed at most once on success
            let rc = unsafe { ffi::sqlite3_close(db) };
            if rc == ffi::SQLITE_OK {
                break;
            }
            if (rc == ffi::SQLITE_BUSY || rc == ffi::SQLITE_LOCKED) && !finalized_leaks {
                finalized_leaks = true;
                // SAFETY: db is live
                let leaked = unsafe { finalize_outstanding(db) };
                if leaked > 0 {
                    tracing::warn!(count = leaked, "Finalized statements still outstanding at close");
                    continue;
                }
            }

            self.install_busy_handler(db, inner.busy_timeout);
            self.interrupt.attach(db);
            return Err(close_error(db, rc));
        }

        inner.db = ptr::null_mut();
        inner.is_open = false;
        inner.in_transaction = false;
        drop(guard);
        if let Ok(mut slot) = self.busy_handler.try_borrow_mut() {
            *slot = None;
        }

        tracing::debug!(location = ?self.config.location, "Closed database");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.peek(|inner| inner.is_open, true)
    }

    // ==================== Statements ====================

    /// Run a statement that produces no rows.
    ///
    /// Stepping must finish with SQLITE_DONE; a statement that yields a row
    /// is an error.
    pub fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<()> {
        let result = self.run_execute(sql, &params.into());
        self.surface(result)
    }

    fn run_execute(&self, sql: &str, params: &Params) -> Result<()> {
        let mut cursor = self.open_cursor(sql, Some(params), true)?;
        match cursor.advance()? {
            StepResult::Done => Ok(()),
            StepResult::Row => Err(Error::Query(QueryError {
                kind: QueryErrorKind::UnexpectedRow,
                code: ffi::SQLITE_ROW,
                extended_code: ffi::SQLITE_ROW,
                sql: Some(sql.to_string()),
                message: "statement returned rows; use query() to read them".to_string(),
            })),
        }
    }

    /// Run a statement and return a cursor over its rows.
    ///
    /// The cursor closes itself once the rows are exhausted.
    pub fn query(&self, sql: &str, params: impl Into<Params>) -> Result<Cursor<'_>> {
        let result = self.open_cursor(sql, Some(&params.into()), true);
        self.surface(result)
    }

    /// Compile a statement without binding it.
    ///
    /// The caller binds and steps the returned cursor; it does not close
    /// itself when exhausted, so it can be reset and rerun.
    pub fn prepare(&self, sql: &str) -> Result<Cursor<'_>> {
        let result = self.open_cursor(sql, None, false);
        self.surface(result)
    }

    fn open_cursor(&self, sql: &str, params: Option<&Params>, auto_close: bool) -> Result<Cursor<'_>> {
        let mut guard = self.state()?;
        let inner = &mut *guard;
        let db = inner.open_db()?;

        let reusable = if inner.cache_statements {
            inner.statements.cached_statement(sql)
        } else {
            None
        };
        let statement_id = match reusable {
            Some(id) => id,
            None => {
                let statement = Statement::prepare(db, sql, inner.cache_statements)?;
                inner.statements.insert(statement)
            }
        };

        let Some(statement) = inner.statements.get_mut(statement_id) else {
            return Err(Error::misuse(
                MisuseErrorKind::StatementFinalized,
                format!("statement disappeared from the cache: {}", sql),
            ));
        };
        statement.reset();
        statement.check_out();

        if let Some(params) = params {
            if let Err(err) = statement.bind(db, params, inner.date_format.as_ref()) {
                inner.statements.release(statement_id);
                return Err(err);
            }
        }

        let cursor_id = inner.next_cursor_id;
        inner.next_cursor_id += 1;
        inner.cursors.insert(cursor_id, statement_id);
        drop(guard);

        Ok(Cursor::new(self, cursor_id, sql.to_string(), auto_close))
    }

    /// Run one or more semicolon-separated statements, discarding any rows.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let result = self.run_batch(sql);
        self.surface(result)
    }

    fn run_batch(&self, sql: &str) -> Result<()> {
        let guard = self.state()?;
        let db = guard.open_db()?;
        let c_sql = CString::new(sql).map_err(|_| nul_in_text("SQL text"))?;
        let mut errmsg_ptr: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: all pointers are valid; no row callback is registered
        let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg_ptr) };

        if rc != ffi::SQLITE_OK {
            let message = if errmsg_ptr.is_null() {
                errmsg(db)
            } else {
                // SAFETY: errmsg_ptr was allocated by SQLite and freed once here
                unsafe {
                    let msg = CStr::from_ptr(errmsg_ptr).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg_ptr.cast());
                    msg
                }
            };
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Exec,
                code: rc & 0xff,
                extended_code: extended_code(db, rc),
                sql: Some(sql.to_string()),
                message,
            }));
        }
        Ok(())
    }

    // ==================== Transactions ====================

    /// Begin a transaction with the engine's default locking.
    pub fn begin_transaction(&self) -> Result<()> {
        let result = self.start_transaction("BEGIN TRANSACTION");
        self.surface(result)
    }

    pub fn begin_deferred_transaction(&self) -> Result<()> {
        self.begin(TransactionKind::Deferred)
    }

    pub fn begin_immediate_transaction(&self) -> Result<()> {
        self.begin(TransactionKind::Immediate)
    }

    pub fn begin_exclusive_transaction(&self) -> Result<()> {
        self.begin(TransactionKind::Exclusive)
    }

    /// Begin a transaction of the given kind.
    ///
    /// Fails if a transaction is already open; nest with savepoints instead.
    pub fn begin(&self, kind: TransactionKind) -> Result<()> {
        let result = self.start_transaction(kind.begin_sql());
        self.surface(result)
    }

    fn start_transaction(&self, sql: &str) -> Result<()> {
        if self.peek(|inner| inner.in_transaction, false) {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                message: "a transaction is already open; use a savepoint to nest".to_string(),
            }));
        }
        self.run_execute(sql, &Params::None)?;
        self.state()?.in_transaction = true;
        tracing::trace!(sql = sql, "Transaction started");
        Ok(())
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<()> {
        let result = self.run_execute("COMMIT TRANSACTION", &Params::None);
        if result.is_ok() {
            self.set_in_transaction(false);
        }
        self.surface(result)
    }

    /// Roll back the open transaction. The transaction flag is cleared even
    /// if the engine reports an error.
    pub fn rollback(&self) -> Result<()> {
        let result = self.run_execute("ROLLBACK TRANSACTION", &Params::None);
        self.set_in_transaction(false);
        self.surface(result)
    }

    fn set_in_transaction(&self, value: bool) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.in_transaction = value;
        }
    }

    /// Whether a transaction started through this connection is open.
    pub fn in_transaction(&self) -> bool {
        self.peek(|inner| inner.in_transaction, false)
    }

    /// Whether the engine is in autocommit mode (no transaction or
    /// savepoint is active at the native level).
    pub fn is_autocommit(&self) -> bool {
        self.peek(
            |inner| match inner.open_db() {
                // SAFETY: db is live
                Ok(db) => unsafe { ffi::sqlite3_get_autocommit(db) != 0 },
                Err(_) => true,
            },
            true,
        )
    }

    // ==================== Savepoints ====================

    pub fn start_savepoint(&self, name: &str) -> Result<()> {
        let result = self.run_batch(&savepoint_sql("SAVEPOINT", name));
        self.surface(result)
    }

    pub fn release_savepoint(&self, name: &str) -> Result<()> {
        let result = self.run_batch(&savepoint_sql("RELEASE SAVEPOINT", name));
        self.surface(result)
    }

    pub fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        let result = self.run_batch(&savepoint_sql("ROLLBACK TRANSACTION TO SAVEPOINT", name));
        self.surface(result)
    }

    /// Run `body` inside a freshly named savepoint.
    ///
    /// The savepoint is rolled back when the body fails or calls
    /// [`RollbackRequest::rollback`], and it is released in every case.
    pub fn in_savepoint<T>(
        &self,
        body: impl FnOnce(&Self, &mut RollbackRequest) -> Result<T>,
    ) -> Result<T> {
        let name = {
            let mut inner = self.state()?;
            inner.next_savepoint_id += 1;
            format!("{}{}", SAVEPOINT_PREFIX, inner.next_savepoint_id)
        };

        self.start_savepoint(&name)?;
        let mut request = RollbackRequest::default();
        let result = body(self, &mut request);

        let rolled_back = if result.is_err() || request.is_requested() {
            self.rollback_to_savepoint(&name)
        } else {
            Ok(())
        };
        let released = self.release_savepoint(&name);

        let value = result?;
        rolled_back?;
        released?;
        Ok(value)
    }

    // ==================== WAL, interrupt and limits ====================

    /// Run a WAL checkpoint on `database` (every attached database when
    /// `None`).
    pub fn checkpoint(&self, mode: CheckpointMode, database: Option<&str>) -> Result<Checkpoint> {
        let result = self.run_checkpoint(mode, database);
        self.surface(result)
    }

    fn run_checkpoint(&self, mode: CheckpointMode, database: Option<&str>) -> Result<Checkpoint> {
        let guard = self.state()?;
        let db = guard.open_db()?;
        let c_name = database
            .map(CString::new)
            .transpose()
            .map_err(|_| nul_in_text("database name"))?;

        let mut log_frames = 0;
        let mut checkpointed_frames = 0;
        // SAFETY: db is live and the out-pointers are valid
        let rc = unsafe {
            ffi::sqlite3_wal_checkpoint_v2(
                db,
                c_name.as_ref().map_or(ptr::null(), |n| n.as_ptr()),
                mode.to_sqlite(),
                &mut log_frames,
                &mut checkpointed_frames,
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(query_error(db, QueryErrorKind::Checkpoint, rc, None));
        }
        if log_frames < 0 {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Checkpoint,
                code: ffi::SQLITE_ERROR,
                extended_code: ffi::SQLITE_ERROR,
                sql: None,
                message: "database is not in WAL mode".to_string(),
            }));
        }

        tracing::debug!(
            mode = ?mode,
            log_frames = log_frames,
            checkpointed_frames = checkpointed_frames,
            "Checkpoint complete"
        );
        Ok(Checkpoint {
            log_frames,
            checkpointed_frames,
        })
    }

    /// Ask the engine to abort the statement currently running.
    pub fn interrupt(&self) -> Result<()> {
        if self.interrupt.interrupt() {
            Ok(())
        } else {
            self.surface(Err(not_open()))
        }
    }

    /// A handle other threads can use to interrupt this connection.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Current value of a runtime limit.
    pub fn limit(&self, limit: Limit) -> Result<i32> {
        let result = self
            .state()
            .and_then(|inner| inner.open_db())
            // SAFETY: db is live; a negative value only queries
            .map(|db| unsafe { ffi::sqlite3_limit(db, limit.to_sqlite(), -1) });
        self.surface(result)
    }

    /// Set a runtime limit, returning the prior value. The engine silently
    /// caps values above its compile-time maximum.
    pub fn set_limit(&self, limit: Limit, value: i32) -> Result<i32> {
        let result = if value < 0 {
            Err(Error::Query(QueryError {
                kind: QueryErrorKind::Limit,
                code: ffi::SQLITE_RANGE,
                extended_code: ffi::SQLITE_RANGE,
                sql: None,
                message: format!("limit {:?} cannot be set to negative value {}", limit, value),
            }))
        } else {
            self.state()
                .and_then(|inner| inner.open_db())
                // SAFETY: db is live
                .map(|db| unsafe { ffi::sqlite3_limit(db, limit.to_sqlite(), value) })
        };
        self.surface(result)
    }

    // ==================== Status ====================

    /// Primary result code of the most recent native call.
    pub fn last_error_code(&self) -> i32 {
        // SAFETY (here and below): with_db only passes a live handle
        self.with_db(ffi::SQLITE_MISUSE, |db| unsafe { ffi::sqlite3_errcode(db) })
    }

    /// Extended result code of the most recent native call.
    pub fn last_extended_error_code(&self) -> i32 {
        self.with_db(ffi::SQLITE_MISUSE, |db| unsafe { ffi::sqlite3_extended_errcode(db) })
    }

    /// Message for the most recent native call.
    pub fn last_error_message(&self) -> String {
        self.with_db(errmsg(ptr::null_mut()), errmsg)
    }

    /// Whether the most recent native call failed.
    pub fn had_error(&self) -> bool {
        ffi::is_error_code(self.last_error_code())
    }

    /// The most recent engine error, if the last native call failed.
    pub fn last_error(&self) -> Option<LastError> {
        let code = self.last_error_code();
        if !ffi::is_error_code(code) {
            return None;
        }
        Some(LastError {
            code,
            extended_code: self.last_extended_error_code(),
            message: self.last_error_message(),
        })
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> i64 {
        self.with_db(0, |db| i64::from(unsafe { ffi::sqlite3_changes(db) }))
    }

    /// Rows changed since the connection opened.
    pub fn total_changes(&self) -> i64 {
        self.with_db(0, |db| i64::from(unsafe { ffi::sqlite3_total_changes(db) }))
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.with_db(0, |db| unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    pub fn has_open_cursors(&self) -> bool {
        self.open_cursor_count() > 0
    }

    pub fn open_cursor_count(&self) -> usize {
        self.peek(|inner| inner.cursors.len(), 0)
    }

    pub fn cached_statement_count(&self) -> usize {
        self.peek(|inner| inner.statements.cached_count(), 0)
    }

    /// How often each cached statement for `sql` has been handed out.
    pub fn statement_use_counts(&self, sql: &str) -> Vec<u64> {
        self.peek(|inner| inner.statements.use_counts(sql), Vec::new())
    }

    pub fn should_cache_statements(&self) -> bool {
        self.peek(|inner| inner.cache_statements, false)
    }

    /// Turn statement reuse on or off. Turning it off drops the cache.
    pub fn set_should_cache_statements(&self, enabled: bool) -> Result<()> {
        let mut inner = self.state()?;
        inner.cache_statements = enabled;
        if !enabled {
            inner.statements.clear_cached_statements();
        }
        Ok(())
    }

    /// Finalize every idle cached statement.
    pub fn clear_cached_statements(&self) -> Result<()> {
        self.state()?.statements.clear_cached_statements();
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        self.peek(|inner| inner.busy_timeout, Duration::ZERO)
    }

    /// Change the busy-retry budget. Zero removes the handler.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        let mut inner = self.state()?;
        inner.busy_timeout = timeout;
        if let Ok(db) = inner.open_db() {
            self.install_busy_handler(db, timeout);
        }
        Ok(())
    }

    pub fn date_format(&self) -> Option<DateFormat> {
        self.peek(|inner| inner.date_format.clone(), None)
    }

    /// Store dates as text in `format`, or as epoch seconds when `None`.
    pub fn set_date_format(&self, format: Option<DateFormat>) -> Result<()> {
        self.state()?.date_format = format;
        Ok(())
    }

    /// Whether surfaced errors are logged.
    pub fn logs_errors(&self) -> bool {
        self.log_errors.get()
    }

    /// Whether the first surfaced error aborts the process.
    pub fn crashes_on_errors(&self) -> bool {
        self.crash_on_errors.get()
    }

    pub fn set_log_errors(&self, enabled: bool) {
        self.log_errors.set(enabled);
    }

    pub fn set_crash_on_errors(&self, enabled: bool) {
        self.crash_on_errors.set(enabled);
    }

    // ==================== Internals shared with Cursor ====================

    fn state(&self) -> Result<RefMut<'_, Inner>> {
        self.inner.try_borrow_mut().map_err(|_| {
            Error::misuse(
                MisuseErrorKind::InFlight,
                "the connection is already running another operation",
            )
        })
    }

    fn peek<R>(&self, f: impl FnOnce(&Inner) -> R, busy: R) -> R {
        match self.inner.try_borrow() {
            Ok(inner) => f(&inner),
            Err(_) => busy,
        }
    }

    fn with_db<R>(&self, closed: R, f: impl FnOnce(*mut ffi::sqlite3) -> R) -> R {
        match self.inner.try_borrow() {
            Ok(inner) => match inner.open_db() {
                Ok(db) => f(db),
                Err(_) => closed,
            },
            Err(_) => closed,
        }
    }

    /// Apply the error policy to a result on its way out to the caller.
    pub(crate) fn surface<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if self.log_errors.get() {
                tracing::error!(error = %err, code = ?err.code(), sql = ?err.sql(), "Database error");
            }
            if self.crash_on_errors.get() {
                tracing::error!("Aborting: crash_on_errors is set");
                std::process::abort();
            }
        }
        result
    }

    pub(crate) fn with_statement<R>(
        &self,
        cursor: CursorId,
        f: impl FnOnce(&mut Statement, *mut ffi::sqlite3, Option<&DateFormat>) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.state()?;
        let inner = &mut *guard;
        let Some(&statement_id) = inner.cursors.get(&cursor) else {
            return Err(Error::misuse(
                MisuseErrorKind::CursorClosed,
                "cursor has been closed",
            ));
        };
        let Some(statement) = inner.statements.get_mut(statement_id) else {
            return Err(Error::misuse(
                MisuseErrorKind::StatementFinalized,
                "cursor's statement has been finalized",
            ));
        };
        f(statement, inner.db, inner.date_format.as_ref())
    }

    pub(crate) fn is_cursor_registered(&self, cursor: CursorId) -> bool {
        self.peek(|inner| inner.cursors.contains_key(&cursor), true)
    }

    pub(crate) fn release_cursor(&self, cursor: CursorId) {
        let Ok(mut guard) = self.inner.try_borrow_mut() else {
            tracing::warn!(cursor = cursor, "Cursor closed while the connection was busy");
            return;
        };
        let inner = &mut *guard;
        if let Some(statement) = inner.cursors.remove(&cursor) {
            inner.statements.release(statement);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "Failed to close database on drop");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("location", &self.config.location)
            .field("is_open", &self.is_open())
            .field("in_transaction", &self.in_transaction())
            .field("open_cursors", &self.open_cursor_count())
            .finish_non_exhaustive()
    }
}

fn savepoint_sql(verb: &str, name: &str) -> String {
    format!("{} '{}'", verb, name.replace('\'', "''"))
}

/// Finalize every statement the engine still tracks for `db`.
///
/// # Safety
/// `db` must be a live handle and no other owner may use the finalized
/// statements afterwards.
unsafe fn finalize_outstanding(db: *mut ffi::sqlite3) -> usize {
    let mut count = 0;
    loop {
        // SAFETY: db is live; a null cursor starts from the first statement
        let stmt = unsafe { ffi::sqlite3_next_stmt(db, ptr::null_mut()) };
        if stmt.is_null() {
            return count;
        }
        // SAFETY: stmt was reported by the engine and is finalized once
        unsafe { ffi::sqlite3_finalize(stmt) };
        count += 1;
    }
}
