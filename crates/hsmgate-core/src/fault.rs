//! Fault reporting context.
//!
//! Faults (worker panics, and whatever an embedding server's signal handler
//! chooses to report) are counted in an explicit, cloneable counter handed to
//! the components that can observe them, instead of a process-wide global.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counter of observed faults
#[derive(Debug, Clone, Default)]
pub struct FaultCounter {
    hits: Arc<AtomicU64>,
}

impl FaultCounter {
    /// Create a counter starting at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fault
    pub fn record(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Faults recorded so far, across all clones
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}
