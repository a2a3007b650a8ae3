//! Busy-retry handler.
//!
//! When another connection holds a conflicting lock SQLite calls back into
//! the handler instead of failing immediately. The handler keeps the caller
//! waiting in short randomized naps until the configured budget has elapsed,
//! then lets SQLite surface BUSY.

use rand::Rng;
use std::cell::Cell;
use std::ffi::{c_int, c_void};
use std::thread;
use std::time::{Duration, Instant};

/// Shortest pause between retries, in milliseconds.
const MIN_PAUSE_MS: u64 = 50;
/// Longest pause between retries, in milliseconds.
const MAX_PAUSE_MS: u64 = 100;

#[derive(Debug)]
pub(crate) struct BusyHandler {
    budget: Duration,
    started: Cell<Option<Instant>>,
}

impl BusyHandler {
    pub(crate) fn new(budget: Duration) -> Box<Self> {
        Box::new(Self {
            budget,
            started: Cell::new(None),
        })
    }

    /// Decide whether to keep retrying. `count` is the number of prior
    /// invocations for the current lock wait.
    fn on_busy(&self, count: c_int) -> bool {
        if count == 0 || self.started.get().is_none() {
            self.started.set(Some(Instant::now()));
            return true;
        }

        let elapsed = self.started.get().map_or(Duration::ZERO, |t| t.elapsed());
        if elapsed >= self.budget {
            tracing::debug!(
                attempts = count,
                elapsed = ?elapsed,
                "Busy-retry budget exhausted"
            );
            return false;
        }

        let pause = rand::thread_rng().gen_range(MIN_PAUSE_MS..=MAX_PAUSE_MS);
        tracing::trace!(attempt = count, pause_ms = pause, "Database busy; retrying");
        thread::sleep(Duration::from_millis(pause));
        true
    }
}

/// Native callback registered with `sqlite3_busy_handler`.
///
/// # Safety
/// `ctx` must point at a [`BusyHandler`] that stays alive for as long as the
/// callback is registered.
pub(crate) unsafe extern "C" fn busy_callback(ctx: *mut c_void, count: c_int) -> c_int {
    // SAFETY: the connection keeps the boxed handler alive until after the
    // native handle is closed or the handler is replaced
    let handler = unsafe { &*ctx.cast::<BusyHandler>() };
    c_int::from(handler.on_busy(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_retries_without_sleeping() {
        let handler = BusyHandler::new(Duration::from_secs(5));
        let start = Instant::now();
        assert!(handler.on_busy(0));
        assert!(start.elapsed() < Duration::from_millis(MIN_PAUSE_MS));
    }

    #[test]
    fn test_gives_up_after_budget() {
        let handler = BusyHandler::new(Duration::ZERO);
        assert!(handler.on_busy(0));
        assert!(!handler.on_busy(1));
    }

    #[test]
    fn test_sleeps_between_retries() {
        let handler = BusyHandler::new(Duration::from_secs(5));
        assert!(handler.on_busy(0));
        let start = Instant::now();
        assert!(handler.on_busy(1));
        assert!(start.elapsed() >= Duration::from_millis(MIN_PAUSE_MS));
    }

    #[test]
    fn test_callback_reads_handler_through_context() {
        let handler = BusyHandler::new(Duration::ZERO);
        let ctx = (&*handler as *const BusyHandler).cast_mut().cast::<c_void>();
        // SAFETY: handler outlives both calls
        unsafe {
            assert_eq!(busy_callback(ctx, 0), 1);
            assert_eq!(busy_callback(ctx, 1), 0);
        }
    }
}
