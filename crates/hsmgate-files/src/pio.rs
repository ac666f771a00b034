//! Striped parallel read driver.
//!
//! Reads a byte range of an open object in rounds. Each round covers up to
//! `stripe_width * block_size` bytes, split into `block_size` blocks that are
//! read concurrently by scoped worker threads, one per block. Blocks are then
//! handed to a [`PioSink`] in ascending offset order, followed by a
//! range-completion event in which the sink decides where the next round
//! starts and whether the transfer is over.
//!
//! ```text
//! offset                                             offset + length
//!   |<------------- round 1 ------------->|<--- round 2 --->|
//!   | block 0 | block 1 | block 2 | blk 3 | block 0 | blk 1 |
//!     worker    worker    worker   worker
//! ```

use hsmgate_core::{Error, FaultCounter, FileHandle, MAX_STRIPE_WIDTH, Result, StorageBackend};
use std::sync::Arc;
use std::thread;

/// Direction of a parallel transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PioMode {
    /// Read from the storage backend into the sink
    Read,
}

/// Returned by [`PioSink::on_block`] to continue or abandon the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockControl {
    /// Keep going
    Continue,
    /// Stop after this block; the transfer fails
    Abort,
}

/// Range bookkeeping exchanged with the sink after every round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    /// On entry: start of the completed round. On exit: next read offset.
    pub offset: u64,
    /// On entry: bytes in the completed round. On exit: bytes still to read.
    pub length: u64,
    /// Set by the sink once nothing remains
    pub end_of_transfer: bool,
}

/// Consumer of the blocks read by [`StripedReader`]
pub trait PioSink {
    /// One block of data at `offset`, at most `block_size` bytes long
    fn on_block(&mut self, offset: u64, data: &[u8]) -> BlockControl;

    /// A round finished; update `window` to describe what remains
    fn on_range_complete(&mut self, window: &mut RangeWindow);
}

/// Parallel read driver over a [`StorageBackend`]
#[derive(Debug)]
pub struct StripedReader<B> {
    backend: Arc<B>,
    faults: FaultCounter,
}

impl<B: StorageBackend> StripedReader<B> {
    /// Create a driver; worker panics are recorded in `faults`
    pub fn new(backend: Arc<B>, faults: FaultCounter) -> Self {
        Self { backend, faults }
    }

    /// Read `[offset, offset + length)` of `file` into `sink`.
    ///
    /// Returns once the sink reports end of transfer. A zero `length`
    /// produces no events. A `stripe_width` of 0 is treated as 1, and widths
    /// above [`MAX_STRIPE_WIDTH`] are capped.
    ///
    /// # Errors
    ///
    /// - `Generic` if `block_size` is 0, the sink aborts, or a worker panics
    /// - `Resource` if a worker thread cannot be spawned
    /// - `System { op: "read" }` if a backend read fails or the object ends
    ///   before the range does (`EIO`)
    #[allow(clippy::too_many_arguments)]
    pub fn read<S: PioSink>(
        &self,
        mode: PioMode,
        file: FileHandle,
        stripe_width: u32,
        block_size: usize,
        offset: u64,
        length: u64,
        sink: &mut S,
    ) -> Result<()> {
        let PioMode::Read = mode;
        if block_size == 0 {
            return Err(Error::generic("block size must be non-zero"));
        }
        if length == 0 {
            return Ok(());
        }

        let width = stripe_width.clamp(1, MAX_STRIPE_WIDTH) as usize;
        let round_capacity = (width as u64).saturating_mul(block_size as u64);
        let mut buffers: Vec<Vec<u8>> = Vec::new();
        let mut window = RangeWindow {
            offset,
            length,
            end_of_transfer: false,
        };
        tracing::debug!(offset, length, width, block_size, "striped read started");

        loop {
            let round_len = window.length.min(round_capacity);
            let blocks = round_len.div_ceil(block_size as u64) as usize;
            while buffers.len() < blocks {
                buffers.push(vec![0u8; block_size]);
            }

            let lengths: Vec<usize> = (0..blocks)
                .map(|i| (round_len - (i * block_size) as u64).min(block_size as u64) as usize)
                .collect();
            self.read_round(file, window.offset, block_size, &lengths, &mut buffers)?;

            for (i, len) in lengths.iter().enumerate() {
                let block_offset = window.offset + (i * block_size) as u64;
                if sink.on_block(block_offset, &buffers[i][..*len]) == BlockControl::Abort {
                    return Err(Error::generic("transfer aborted by block handler"));
                }
            }

            window.length = round_len;
            window.end_of_transfer = false;
            sink.on_range_complete(&mut window);
            if window.end_of_transfer || window.length == 0 {
                break;
            }
        }

        tracing::debug!(offset, length, "striped read finished");
        Ok(())
    }

    fn read_round(
        &self,
        file: FileHandle,
        offset: u64,
        block_size: usize,
        lengths: &[usize],
        buffers: &mut [Vec<u8>],
    ) -> Result<()> {
        let backend = &*self.backend;
        if let [len] = lengths {
            return read_full(backend, file, offset, &mut buffers[0][..*len]);
        }

        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(lengths.len());
            let mut result = Ok(());

            for (i, (buf, len)) in buffers.iter_mut().zip(lengths).enumerate() {
                let block_offset = offset + (i * block_size) as u64;
                let spawned = thread::Builder::new()
                    .name(format!("pio-stripe-{i}"))
                    .spawn_scoped(scope, move || {
                        read_full(backend, file, block_offset, &mut buf[..*len])
                    });
                match spawned {
                    Ok(worker) => workers.push(worker),
                    Err(e) => {
                        tracing::error!("failed to spawn read worker: {}", e);
                        result = Err(Error::resource("failed to spawn read worker"));
                        break;
                    }
                }
            }

            // Join every worker before reporting, keeping the first error
            for worker in workers {
                let outcome = match worker.join() {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.faults.record();
                        tracing::error!("read worker panicked");
                        Err(Error::generic("read worker panicked"))
                    }
                };
                if result.is_ok() {
                    result = outcome;
                }
            }
            result
        })
    }
}

/// Fill `buf` from `offset`; running out of data is an `EIO` read failure
fn read_full<B: StorageBackend + ?Sized>(
    backend: &B,
    file: FileHandle,
    mut offset: u64,
    mut buf: &mut [u8],
) -> Result<()> {
    while !buf.is_empty() {
        let n = backend
            .read_at(file, offset, buf)
            .map_err(|errno| Error::system("read", errno))?;
        if n == 0 {
            return Err(Error::system("read", hsmgate_core::Errno::EIO));
        }
        offset += n as u64;
        let rest = buf;
        buf = &mut rest[n..];
    }
    Ok(())
}
