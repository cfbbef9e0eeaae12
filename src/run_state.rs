//! Run-wide mutable state shared by every worker thread: the abort flag,
//! completion flag, and error counter. Grounded on the `xdd_global_data`
//! struct's `canceled`/`run_error_count` fields in the original source,
//! reimplemented as atomics instead of a mutex-guarded struct since every
//! field here only ever needs independent, not compound, updates.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared, run-wide state. Cheap to clone via `Arc`; every worker thread
/// holds a reference.
#[derive(Default)]
pub struct RunState {
    abort: AtomicBool,
    run_complete: AtomicBool,
    run_error_count: AtomicU64,
    max_errors: u64,
}

impl RunState {
    pub fn new(max_errors: u64) -> Self {
        Self {
            abort: AtomicBool::new(false),
            run_complete: AtomicBool::new(false),
            run_error_count: AtomicU64::new(0),
            max_errors,
        }
    }

    /// True once any worker has requested the run stop. Monotone: once
    /// set, never cleared for the lifetime of this `RunState`.
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.run_complete.load(Ordering::Acquire)
    }

    pub fn mark_complete(&self) {
        self.run_complete.store(true, Ordering::Release);
    }

    pub fn error_count(&self) -> u64 {
        self.run_error_count.load(Ordering::Acquire)
    }

    /// Increments the run's error count, aborting the run once
    /// `max_errors` (if nonzero) is exceeded.
    pub fn record_error(&self) {
        let count = self.run_error_count.fetch_add(1, Ordering::AcqRel) + 1;
        if self.max_errors != 0 && count >= self.max_errors {
            self.abort();
        }
    }
}
