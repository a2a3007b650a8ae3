//! Cross-thread interruption of a running statement.

use crate::ffi;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

struct RawHandle(*mut ffi::sqlite3);

// SAFETY: the pointer is only dereferenced by sqlite3_interrupt, which SQLite
// documents as safe to call from any thread while the handle is open. The
// owning connection clears it under the same lock before closing.
unsafe impl Send for RawHandle {}

/// A cloneable handle that can abort the connection's in-progress statement
/// from another thread.
///
/// The interrupted statement fails with SQLITE_INTERRUPT. Once the
/// connection closes, interrupting does nothing.
#[derive(Clone)]
pub struct InterruptHandle {
    db: Arc<Mutex<RawHandle>>,
}

impl InterruptHandle {
    pub(crate) fn new() -> Self {
        Self {
            db: Arc::new(Mutex::new(RawHandle(ptr::null_mut()))),
        }
    }

    pub(crate) fn attach(&self, db: *mut ffi::sqlite3) {
        self.db.lock().unwrap_or_else(PoisonError::into_inner).0 = db;
    }

    pub(crate) fn detach(&self) {
        self.attach(ptr::null_mut());
    }

    /// Request interruption. Returns `false` if the connection is closed.
    pub fn interrupt(&self) -> bool {
        let guard = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.0.is_null() {
            return false;
        }
        // SAFETY: non-null means the handle is open, and close() must take
        // this lock to clear it first
        unsafe { ffi::sqlite3_interrupt(guard.0) };
        tracing::debug!("Interrupt requested");
        true
    }

    /// Whether the underlying connection is currently open.
    pub fn is_attached(&self) -> bool {
        !self.db.lock().unwrap_or_else(PoisonError::into_inner).0.is_null()
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}
