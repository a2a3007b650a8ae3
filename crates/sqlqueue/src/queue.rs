//! Serialized access to one connection from many threads.
//!
//! A [`DatabaseQueue`] owns a single [`Connection`] and runs every unit of
//! work against it one at a time, in the order callers arrived. Callers
//! block until their turn comes; the work then has the connection to itself
//! until it returns.
//!
//! ```rust,ignore
//! use sqlqueue::{ConnectionConfig, DatabaseQueue, params};
//!
//! let queue = DatabaseQueue::open(ConnectionConfig::file("app.db"))?;
//! queue.in_transaction(|conn, _| {
//!     conn.execute("INSERT INTO log (msg) VALUES (?)", params!["hello"])
//! })?;
//! ```

use sqlqueue_core::{Error, MisuseErrorKind, Result};
use sqlqueue_sqlite::{
    Checkpoint, CheckpointMode, Connection, ConnectionConfig, InterruptHandle, RollbackRequest,
};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// FIFO admission: each caller draws a ticket and waits until it is served.
#[derive(Debug, Default)]
struct Gate {
    state: Mutex<GateState>,
    turn: Condvar,
}

#[derive(Debug, Default)]
struct GateState {
    next_ticket: u64,
    now_serving: u64,
    owner: Option<ThreadId>,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> Result<Slot<'_>> {
        let me = thread::current().id();
        let mut state = self.lock();
        if state.owner == Some(me) {
            return Err(Error::misuse(
                MisuseErrorKind::ReentrantQueue,
                "unit of work submitted to the queue it is already running on; \
                 use a savepoint for nested work",
            ));
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.now_serving != ticket {
            state = self
                .turn
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.owner = Some(me);
        Ok(Slot { gate: self })
    }
}

/// Exclusive right to the connection; released on drop, including during
/// unwinding.
struct Slot<'a> {
    gate: &'a Gate,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.owner = None;
        state.now_serving += 1;
        drop(state);
        self.gate.turn.notify_all();
    }
}

/// Rolls back a transaction that was neither committed nor rolled back,
/// which only happens when the body panics.
struct TransactionGuard<'c> {
    conn: &'c Connection,
    finished: bool,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished && self.conn.in_transaction() {
            if let Err(err) = self.conn.rollback() {
                tracing::warn!(error = %err, "Failed to roll back abandoned transaction");
            }
        }
    }
}

/// A connection shared between threads by running work on it one caller at
/// a time.
pub struct DatabaseQueue {
    config: ConnectionConfig,
    gate: Gate,
    conn: Mutex<Connection>,
    interrupt: InterruptHandle,
}

impl DatabaseQueue {
    /// Create a queue. The connection opens on first use.
    pub fn new(config: ConnectionConfig) -> Self {
        let conn = Connection::new(config.clone());
        let interrupt = conn.interrupt_handle();
        Self {
            config,
            gate: Gate::default(),
            conn: Mutex::new(conn),
            interrupt,
        }
    }

    /// Create a queue and open its connection now.
    pub fn open(config: ConnectionConfig) -> Result<Self> {
        let queue = Self::new(config);
        queue.perform(|_| Ok(()))?;
        Ok(queue)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether the connection is currently open. Does not wait for a turn.
    pub fn is_open(&self) -> bool {
        self.interrupt.is_attached()
    }

    /// Run `work` with exclusive use of the connection.
    ///
    /// Blocks until every earlier caller has finished. Opens (or reopens)
    /// the connection first; if that fails the error is returned and `work`
    /// never runs. Calling back into the same queue from inside `work`
    /// fails with a misuse error; use a savepoint instead.
    pub fn perform<R>(&self, work: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let _slot = self.gate.enter()?;
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn: &Connection = &guard;

        if !conn.is_open() {
            tracing::debug!(location = ?self.config.location, "Opening queue connection");
            conn.open()?;
        }

        let result = work(conn);

        if conn.has_open_cursors() {
            tracing::warn!(
                count = conn.open_cursor_count(),
                "Unit of work returned with cursors still open"
            );
        }
        result
    }

    /// Run `work` inside a transaction using the engine's default locking.
    ///
    /// The transaction commits if `work` succeeds and rolls back if it fails
    /// or calls [`RollbackRequest::rollback`].
    pub fn in_transaction<R>(
        &self,
        work: impl FnOnce(&Connection, &mut RollbackRequest) -> Result<R>,
    ) -> Result<R> {
        self.transaction(Connection::begin_transaction, work)
    }

    pub fn in_deferred_transaction<R>(
        &self,
        work: impl FnOnce(&Connection, &mut RollbackRequest) -> Result<R>,
    ) -> Result<R> {
        self.transaction(Connection::begin_deferred_transaction, work)
    }

    pub fn in_immediate_transaction<R>(
        &self,
        work: impl FnOnce(&Connection, &mut RollbackRequest) -> Result<R>,
    ) -> Result<R> {
        self.transaction(Connection::begin_immediate_transaction, work)
    }

    pub fn in_exclusive_transaction<R>(
        &self,
        work: impl FnOnce(&Connection, &mut RollbackRequest) -> Result<R>,
    ) -> Result<R> {
        self.transaction(Connection::begin_exclusive_transaction, work)
    }

    fn transaction<R>(
        &self,
        begin: fn(&Connection) -> Result<()>,
        work: impl FnOnce(&Connection, &mut RollbackRequest) -> Result<R>,
    ) -> Result<R> {
        self.perform(|conn| {
            begin(conn)?;
            let mut guard = TransactionGuard {
                conn,
                finished: false,
            };
            let mut request = RollbackRequest::default();
            let result = work(conn, &mut request);
            guard.finished = true;

            match result {
                Ok(value) if !request.is_requested() => {
                    if let Err(err) = conn.commit() {
                        if let Err(rollback_err) = conn.rollback() {
                            tracing::warn!(error = %rollback_err, "Rollback after failed commit failed");
                        }
                        return Err(err);
                    }
                    Ok(value)
                }
                Ok(value) => {
                    conn.rollback()?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = conn.rollback() {
                        tracing::warn!(error = %rollback_err, "Rollback after failed unit of work failed");
                    }
                    Err(err)
                }
            }
        })
    }

    /// Run `work` inside a savepoint. See [`Connection::in_savepoint`].
    pub fn in_savepoint<R>(
        &self,
        work: impl FnOnce(&Connection, &mut RollbackRequest) -> Result<R>,
    ) -> Result<R> {
        self.perform(|conn| conn.in_savepoint(work))
    }

    /// Run a WAL checkpoint.
    pub fn checkpoint(&self, mode: CheckpointMode, database: Option<&str>) -> Result<Checkpoint> {
        self.perform(|conn| conn.checkpoint(mode, database))
    }

    /// Close the connection once earlier work has finished. The next unit of
    /// work reopens it.
    pub fn close(&self) -> Result<()> {
        let _slot = self.gate.enter()?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.close()
    }

    /// Interrupt whatever statement is running right now. Does not wait for
    /// a turn.
    pub fn interrupt(&self) -> Result<()> {
        if self.interrupt.interrupt() {
            Ok(())
        } else {
            Err(Error::misuse(
                MisuseErrorKind::ConnectionClosed,
                "the database connection is not open",
            ))
        }
    }

    /// A handle for interrupting from threads that don't hold the queue.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }
}

impl std::fmt::Debug for DatabaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseQueue")
            .field("location", &self.config.location)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}
