//! Reporting contract between the core and the transfer server.
//!
//! An [`Operation`] stands for one in-flight server request. The checksum
//! pipeline reads the negotiated block size from it and sends intermediate
//! progress markers through it; the stat code delivers partial and final
//! batches of [`ProtocolStat`] records through it. Every request produces
//! exactly one terminal call (`finished_command` or `finished_stat`).

use crate::error::{Error, Result};
use crate::record::ProtocolStat;
use std::sync::{Mutex, PoisonError};

/// Server-side handle for one request
pub trait Operation: Send + Sync {
    /// Block size negotiated by the transport layer
    fn block_size(&self) -> usize;

    /// Intermediate response, e.g. a decimal byte count marker
    fn intermediate(&self, message: &str);

    /// Terminal outcome of a command (checksum: the hex digest)
    fn finished_command(&self, result: Result<&str>);

    /// Non-final batch of stat records
    fn partial_stat(&self, records: &[ProtocolStat]);

    /// Final batch of stat records, or the error that ended the request
    fn finished_stat(&self, result: Result<&[ProtocolStat]>);
}

/// Terminal outcome captured by [`RecordingOperation`]
#[derive(Debug, Clone)]
pub enum Finished {
    /// `finished_command` was called
    Command(std::result::Result<String, Error>),
    /// `finished_stat` was called
    Stat(std::result::Result<Vec<ProtocolStat>, Error>),
}

#[derive(Debug, Default)]
struct Recorded {
    intermediates: Vec<String>,
    partial_stats: Vec<Vec<ProtocolStat>>,
    finished: Vec<Finished>,
}

/// Operation that records every report it receives.
///
/// Used by embedders that want to collect results synchronously, and by the
/// test suites.
#[derive(Debug)]
pub struct RecordingOperation {
    block_size: usize,
    recorded: Mutex<Recorded>,
}

impl RecordingOperation {
    /// Create a recorder reporting `block_size` as the negotiated block size
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            recorded: Mutex::new(Recorded::default()),
        }
    }

    /// Intermediate responses in arrival order
    #[must_use]
    pub fn intermediates(&self) -> Vec<String> {
        self.lock().intermediates.clone()
    }

    /// Partial stat batches in arrival order
    #[must_use]
    pub fn partial_stats(&self) -> Vec<Vec<ProtocolStat>> {
        self.lock().partial_stats.clone()
    }

    /// Terminal calls in arrival order (well-behaved requests produce one)
    #[must_use]
    pub fn finished(&self) -> Vec<Finished> {
        self.lock().finished.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RecordingOperation {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BLOCK_SIZE)
    }
}

impl Operation for RecordingOperation {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn intermediate(&self, message: &str) {
        self.lock().intermediates.push(message.to_string());
    }

    fn finished_command(&self, result: Result<&str>) {
        let result = result.map(str::to_string);
        self.lock().finished.push(Finished::Command(result));
    }

    fn partial_stat(&self, records: &[ProtocolStat]) {
        self.lock().partial_stats.push(records.to_vec());
    }

    fn finished_stat(&self, result: Result<&[ProtocolStat]>) {
        let result = result.map(<[ProtocolStat]>::to_vec);
        self.lock().finished.push(Finished::Stat(result));
    }
}
