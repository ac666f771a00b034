//! Periodic progress markers.
//!
//! While a checksum is being computed, the server sends the client the number
//! of bytes digested so far at a fixed interval. The read path adds to a
//! shared counter; a background task reads it on every tick and reports the
//! decimal total through the operation. Both sides take the same lock, and
//! the report is made while holding it.

use hsmgate_core::{Error, Operation, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

type SharedTotal = Arc<Mutex<u64>>;

fn add_locked(total: &SharedTotal, bytes: u64) {
    let mut guard = total.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = guard.saturating_add(bytes);
}

fn read_locked(total: &SharedTotal) -> u64 {
    *total.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Updating side of a marker, handed to the read path
#[derive(Debug, Clone, Default)]
pub struct MarkerCounter {
    total: Option<SharedTotal>,
}

impl MarkerCounter {
    /// Add `bytes` to the running total; a no-op for an inert marker
    pub fn add(&self, bytes: u64) {
        if let Some(total) = &self.total {
            add_locked(total, bytes);
        }
    }
}

/// Progress marker with a running timer task.
///
/// A marker created with a zero interval is inert: it has no timer, its
/// counter ignores updates and `stop` returns 0.
#[derive(Debug)]
pub struct ProgressMarker {
    total: Option<SharedTotal>,
    task: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl ProgressMarker {
    /// Start reporting the running total through `op` every `interval`.
    ///
    /// The first report is made one interval after the start.
    ///
    /// # Errors
    ///
    /// Returns a `Resource` error if no tokio runtime is available to run the
    /// timer.
    pub fn start(op: Arc<dyn Operation>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Ok(Self::inert());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::resource("no runtime for the progress marker timer"))?;

        let total: SharedTotal = Arc::new(Mutex::new(0));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(tick_loop(op, Arc::clone(&total), interval, shutdown_rx));
        tracing::debug!(?interval, "progress marker started");

        Ok(Self {
            total: Some(total),
            task: Some((shutdown_tx, task)),
        })
    }

    /// Marker that never reports
    #[must_use]
    pub fn inert() -> Self {
        Self {
            total: None,
            task: None,
        }
    }

    /// True if a timer is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Counter handle for the read path
    #[must_use]
    pub fn counter(&self) -> MarkerCounter {
        MarkerCounter {
            total: self.total.clone(),
        }
    }

    /// Add `bytes` to the running total
    pub fn update(&self, bytes: u64) {
        if let Some(total) = &self.total {
            add_locked(total, bytes);
        }
    }

    /// Stop the timer and return the final total.
    ///
    /// Waits for the timer task to exit, so no report is in flight once this
    /// returns.
    pub async fn stop(mut self) -> u64 {
        if let Some((shutdown, task)) = self.task.take() {
            // The task may already be gone if the runtime is shutting down
            let _ = shutdown.send(());
            if let Err(e) = task.await {
                tracing::warn!("progress marker task ended abnormally: {}", e);
            }
        }
        self.total.as_ref().map_or(0, read_locked)
    }
}

impl Drop for ProgressMarker {
    fn drop(&mut self) {
        if let Some((_, task)) = self.task.take() {
            task.abort();
        }
    }
}

async fn tick_loop(
    op: Arc<dyn Operation>,
    total: SharedTotal,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let guard = total.lock().unwrap_or_else(PoisonError::into_inner);
                op.intermediate(&guard.to_string());
            }
        }
    }
}
