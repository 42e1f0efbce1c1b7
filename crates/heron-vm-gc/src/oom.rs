//! Out-of-memory reporting
//!
//! Allocation failures inside the IC engine and the OSR bridge are never
//! fatal. They are reported here and the caller continues on its slow path.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts recoverable allocation failures
#[derive(Debug, Default)]
pub struct OomReporter {
    reports: AtomicU64,
}

impl OomReporter {
    /// Create a reporter with no recorded failures
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one allocation failure. `what` names the failed allocation.
    pub fn report_out_of_memory(&self, what: &'static str) {
        let _total = self.reports.fetch_add(1, Ordering::Relaxed) + 1;

        #[cfg(feature = "gc_logging")]
        tracing::warn!(target: "heron::gc", what, total = _total, "recovered from out-of-memory");
        #[cfg(not(feature = "gc_logging"))]
        let _ = what;
    }

    /// Number of failures reported so far
    pub fn count(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }
}
