//! Checksum pipeline.
//!
//! Answers a checksum request either from a stored, still-valid digest or by
//! streaming the requested range through a digest:
//!
//! 1. Whole-file requests first try [`AttributeStore::read_checksum`].
//! 2. Otherwise the object is stat'ed, a digest context allocated and the
//!    object opened; a [`ProgressMarker`] reports progress while the
//!    [`StripedReader`] feeds blocks into a [`ChecksumTransfer`].
//! 3. On completion the handle is closed and the marker stopped whatever
//!    happened, the first error (or the lowercase hex digest) goes to the
//!    caller, and successful whole-file digests are written back.
//!
//! All backend calls are blocking and run on tokio's blocking pool.

use crate::attrs::AttributeStore;
use crate::digest::{Digest, new_digest, to_hex};
use crate::marker::{MarkerCounter, ProgressMarker};
use crate::pio::{BlockControl, PioMode, PioSink, RangeWindow, StripedReader};
use hsmgate_core::{
    ChecksumAlgorithm, ChecksumConfig, Error, FaultCounter, OpenFile, Operation, Result,
    StorageBackend,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinError;

/// Length of a checksum request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeLength {
    /// From the offset to the end of the object
    Whole,
    /// Exactly this many bytes
    Bytes(u64),
}

/// One checksum request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRequest {
    /// Object path
    pub pathname: String,
    /// First byte of the range
    pub offset: u64,
    /// Range length
    pub length: RangeLength,
}

impl ChecksumRequest {
    /// Request covering the whole object
    pub fn whole_file(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            offset: 0,
            length: RangeLength::Whole,
        }
    }

    /// Request covering `length` bytes from `offset`
    pub fn range(pathname: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            pathname: pathname.into(),
            offset,
            length: RangeLength::Bytes(length),
        }
    }

    /// Build a request from protocol arguments, where a negative length
    /// means "to the end of the object"
    pub fn from_protocol(pathname: impl Into<String>, offset: u64, length: i64) -> Self {
        Self {
            pathname: pathname.into(),
            offset,
            length: u64::try_from(length).map_or(RangeLength::Whole, RangeLength::Bytes),
        }
    }

    /// True for offset 0 and a whole-object length
    #[must_use]
    pub fn is_whole_file(&self) -> bool {
        self.offset == 0 && self.length == RangeLength::Whole
    }
}

/// Allocates a digest context for an algorithm
pub type DigestFactory = Arc<dyn Fn(ChecksumAlgorithm) -> Box<dyn Digest> + Send + Sync>;

/// Per-computation state, fed by the read driver.
///
/// Owned by one pipeline invocation and consumed when the computation
/// completes.
pub struct ChecksumTransfer {
    digest: Box<dyn Digest>,
    remaining: u64,
    block_size: usize,
    counter: MarkerCounter,
    error: Option<Error>,
}

impl fmt::Debug for ChecksumTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumTransfer")
            .field("digest", &self.digest.name())
            .field("remaining", &self.remaining)
            .field("block_size", &self.block_size)
            .field("error", &self.error)
            .finish()
    }
}

impl ChecksumTransfer {
    /// State for a `length` byte range read in `block_size` blocks
    pub fn new(
        digest: Box<dyn Digest>,
        length: u64,
        block_size: usize,
        counter: MarkerCounter,
    ) -> Self {
        Self {
            digest,
            remaining: length,
            block_size,
            counter,
            error: None,
        }
    }

    /// Bytes not yet covered by a completed round
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// First error latched while processing blocks
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Finalize the digest into lowercase hex
    ///
    /// # Errors
    ///
    /// Returns the latched error if one was recorded, or a digest failure.
    pub fn finish(self) -> Result<String> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(to_hex(&self.digest.finalize()?))
    }

    fn latch(&mut self, err: Error) {
        if self.error.is_none() {
            tracing::warn!("checksum block processing failed: {}", err);
            self.error = Some(err);
        }
    }
}

impl PioSink for ChecksumTransfer {
    fn on_block(&mut self, _offset: u64, data: &[u8]) -> BlockControl {
        if data.len() > self.block_size {
            self.latch(Error::generic("block larger than the negotiated block size"));
            return BlockControl::Abort;
        }
        if self.error.is_none() {
            if let Err(err) = self.digest.update(data) {
                self.latch(err);
                return BlockControl::Abort;
            }
        }
        self.counter.add(data.len() as u64);
        BlockControl::Continue
    }

    fn on_range_complete(&mut self, window: &mut RangeWindow) {
        window.offset += window.length;
        self.remaining = self.remaining.saturating_sub(window.length);
        window.length = self.remaining;
        window.end_of_transfer = self.remaining == 0;
    }
}

/// Everything the blocking setup phase produces
struct Prepared {
    file: OpenFile,
    offset: u64,
    length: u64,
    file_size: u64,
    digest: Box<dyn Digest>,
}

/// Checksum service over a storage backend
pub struct ChecksumPipeline<B> {
    backend: Arc<B>,
    store: AttributeStore<B>,
    config: ChecksumConfig,
    faults: FaultCounter,
    digest_factory: DigestFactory,
}

impl<B> fmt::Debug for ChecksumPipeline<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumPipeline")
            .field("config", &self.config)
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

fn join_failure(err: JoinError) -> Error {
    tracing::error!("blocking checksum task failed: {}", err);
    Error::resource("blocking checksum task failed")
}

impl<B: StorageBackend + 'static> ChecksumPipeline<B> {
    /// Create a pipeline using `config` for the algorithm, marker interval
    /// and stored-checksum support
    pub fn new(backend: Arc<B>, config: ChecksumConfig) -> Self {
        let store = AttributeStore::new(Arc::clone(&backend), &config);
        Self {
            backend,
            store,
            config,
            faults: FaultCounter::new(),
            digest_factory: Arc::new(new_digest),
        }
    }

    /// Record read worker faults in `faults` instead of a private counter
    #[must_use]
    pub fn with_fault_counter(mut self, faults: FaultCounter) -> Self {
        self.faults = faults;
        self
    }

    /// Allocate digest contexts with `factory`
    #[must_use]
    pub fn with_digest_factory(mut self, factory: DigestFactory) -> Self {
        self.digest_factory = factory;
        self
    }

    /// Stored checksum adapter used by this pipeline
    #[must_use]
    pub fn store(&self) -> &AttributeStore<B> {
        &self.store
    }

    /// Fault counter shared with the read driver
    #[must_use]
    pub fn faults(&self) -> &FaultCounter {
        &self.faults
    }

    /// Compute or retrieve the checksum for `request` and return it
    ///
    /// # Errors
    ///
    /// Returns the error reported to the completion callback.
    pub async fn checksum(
        &self,
        request: ChecksumRequest,
        op: Arc<dyn Operation>,
    ) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.run(request, op, move |result| {
            let _ = tx.send(result);
        })
        .await;
        rx.await
            .map_err(|_| Error::generic("checksum completed without an outcome"))?
    }

    /// Serve a checksum command, reporting the outcome through
    /// `op.finished_command`
    ///
    /// # Errors
    ///
    /// Returns the same error reported to the operation.
    pub async fn command(
        &self,
        request: ChecksumRequest,
        op: Arc<dyn Operation>,
    ) -> Result<String> {
        let result = self.checksum(request, Arc::clone(&op)).await;
        op.finished_command(result.as_deref().map_err(Clone::clone));
        result
    }

    /// Invalidate the stored checksum of `path`
    ///
    /// # Errors
    ///
    /// Returns a `System` error if the attribute update fails for any reason
    /// other than missing attributes.
    pub async fn clear(&self, path: &str) -> Result<()> {
        let store = self.store.clone();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || store.invalidate(&path))
            .await
            .map_err(join_failure)?
    }

    /// Compute or retrieve the checksum for `request`.
    ///
    /// `completion` is called exactly once with the lowercase hex digest or
    /// the first error. Successful whole-file digests are stored after
    /// `completion` returns.
    pub async fn run<F>(&self, request: ChecksumRequest, op: Arc<dyn Operation>, completion: F)
    where
        F: FnOnce(Result<String>) + Send,
    {
        tracing::debug!(
            path = %request.pathname,
            offset = request.offset,
            length = ?request.length,
            "checksum requested"
        );

        if request.is_whole_file() && self.store.is_enabled() {
            let store = self.store.clone();
            let path = request.pathname.clone();
            let stored = tokio::task::spawn_blocking(move || store.read_checksum(&path))
                .await
                .map_err(join_failure)
                .and_then(|r| r);
            match stored {
                Ok(Some(hex)) => {
                    tracing::debug!(path = %request.pathname, "using stored checksum");
                    completion(Ok(hex));
                    return;
                }
                Ok(None) => {}
                Err(err) => {
                    completion(Err(err));
                    return;
                }
            }
        }

        let prepared = {
            let backend = Arc::clone(&self.backend);
            let factory = Arc::clone(&self.digest_factory);
            let algorithm = self.config.algorithm;
            let request = request.clone();
            tokio::task::spawn_blocking(move || prepare(&*backend, &request, &*factory, algorithm))
                .await
                .map_err(join_failure)
                .and_then(|r| r)
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                completion(Err(err));
                return;
            }
        };
        let Prepared {
            file,
            offset,
            length,
            file_size,
            digest,
        } = prepared;

        let marker = match ProgressMarker::start(Arc::clone(&op), self.config.marker_interval) {
            Ok(marker) => marker,
            Err(err) => {
                let _ = self.release(file, &request.pathname).await;
                completion(Err(err));
                return;
            }
        };

        let block_size = op.block_size();
        let transfer = ChecksumTransfer::new(digest, length, block_size, marker.counter());
        let reader = StripedReader::new(Arc::clone(&self.backend), self.faults.clone());
        let backend = Arc::clone(&self.backend);

        let driven = tokio::task::spawn_blocking(move || {
            let mut transfer = transfer;
            let read = reader.read(
                PioMode::Read,
                file.handle,
                file.stripe_width,
                block_size,
                offset,
                length,
                &mut transfer,
            );
            let closed = backend
                .close(file.handle)
                .map_err(|errno| Error::system("close", errno));
            (transfer, read, closed)
        })
        .await;

        let transferred = marker.stop().await;

        let outcome = match driven {
            // Latched block errors first, then the driver, then close
            Ok((transfer, read, closed)) => {
                if transfer.error().is_some() {
                    transfer.finish()
                } else {
                    read.and(closed).and_then(|()| transfer.finish())
                }
            }
            Err(err) => {
                self.faults.record();
                let _ = self.release(file, &request.pathname).await;
                Err(join_failure(err))
            }
        };

        match &outcome {
            Ok(hex) => tracing::info!(
                path = %request.pathname,
                bytes = transferred,
                checksum = %hex,
                "checksum computed"
            ),
            Err(err) => tracing::error!(path = %request.pathname, "checksum failed: {}", err),
        }

        let write_back = match &outcome {
            Ok(hex) if request.is_whole_file() && self.store.is_enabled() => Some(hex.clone()),
            _ => None,
        };
        completion(outcome);

        if let Some(hex) = write_back {
            let store = self.store.clone();
            let path = request.pathname.clone();
            let stored =
                tokio::task::spawn_blocking(move || store.write_checksum(&path, &hex, file_size))
                    .await
                    .map_err(join_failure)
                    .and_then(|r| r);
            if let Err(err) = stored {
                tracing::warn!(path = %request.pathname, "failed to store checksum: {}", err);
            }
        }
    }

    /// Close `file` after a failure that already decided the outcome; a
    /// failed close is logged and returned but does not replace that outcome
    async fn release(&self, file: OpenFile, path: &str) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let closed = tokio::task::spawn_blocking(move || backend.close(file.handle))
            .await
            .map_err(join_failure)
            .and_then(|r| r.map_err(|errno| Error::system("close", errno)));
        if let Err(err) = &closed {
            tracing::warn!(path, "close after failed checksum failed: {}", err);
        }
        closed
    }
}

/// Stat, allocate the digest and open the object
fn prepare<B: StorageBackend + ?Sized>(
    backend: &B,
    request: &ChecksumRequest,
    factory: &(dyn Fn(ChecksumAlgorithm) -> Box<dyn Digest> + Send + Sync),
    algorithm: ChecksumAlgorithm,
) -> Result<Prepared> {
    let stat = backend
        .stat(&request.pathname)
        .map_err(|errno| Error::system("stat", errno))?;
    let length = match request.length {
        RangeLength::Bytes(length) => length,
        RangeLength::Whole => stat
            .size
            .checked_sub(request.offset)
            .ok_or(Error::generic("offset beyond end of file"))?,
    };
    let digest = factory(algorithm);
    let file = backend
        .open_read(&request.pathname)
        .map_err(|errno| Error::system("open_read", errno))?;

    Ok(Prepared {
        file,
        offset: request.offset,
        length,
        file_size: stat.size,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::KEY_STATE;
    use crate::digest::Md5Digest;
    use hsmgate_core::{BackendOp, Errno, Finished, MemoryBackend, RecordingOperation};
    use std::time::Duration;

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn pipeline(backend: &Arc<MemoryBackend>) -> ChecksumPipeline<MemoryBackend> {
        ChecksumPipeline::new(Arc::clone(backend), ChecksumConfig::default())
    }

    fn md5_hex(data: &[u8]) -> String {
        let mut digest: Box<dyn Digest> = Box::new(Md5Digest::new());
        digest.update(data).unwrap();
        to_hex(&digest.finalize().unwrap())
    }

    /// Digest whose updates always fail
    struct BrokenDigest;

    impl Digest for BrokenDigest {
        fn update(&mut self, _data: &[u8]) -> Result<()> {
            Err(Error::digest("update rejected"))
        }

        fn finalize(self: Box<Self>) -> Result<Vec<u8>> {
            Err(Error::digest("finalize after failure"))
        }

        fn name(&self) -> &'static str {
            "md5"
        }
    }

    #[test]
    fn test_request_constructors() {
        assert!(ChecksumRequest::whole_file("/a").is_whole_file());
        assert!(!ChecksumRequest::range("/a", 0, 10).is_whole_file());
        assert!(ChecksumRequest::from_protocol("/a", 0, -1).is_whole_file());
        assert!(!ChecksumRequest::from_protocol("/a", 5, -1).is_whole_file());
        assert_eq!(
            ChecksumRequest::from_protocol("/a", 0, 7).length,
            RangeLength::Bytes(7)
        );
    }

    #[tokio::test]
    async fn test_empty_file_and_write_back() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", Vec::new()).unwrap();
        let pipeline = pipeline(&backend);
        let op = Arc::new(RecordingOperation::default());

        let hex = pipeline
            .checksum(ChecksumRequest::whole_file("/archive/a.dat"), op)
            .await
            .unwrap();

        assert_eq!(hex, EMPTY_MD5);
        assert_eq!(backend.calls(BackendOp::Read), 0);
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(
            pipeline.store().read_checksum("/archive/a.dat").unwrap().as_deref(),
            Some(EMPTY_MD5)
        );
    }

    #[tokio::test]
    async fn test_stored_checksum_skips_io() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", b"abc".to_vec()).unwrap();
        let pipeline = pipeline(&backend);
        pipeline
            .store()
            .write_checksum("/archive/a.dat", "cafebabe", 3)
            .unwrap();

        let hex = pipeline
            .checksum(
                ChecksumRequest::whole_file("/archive/a.dat"),
                Arc::new(RecordingOperation::default()),
            )
            .await
            .unwrap();

        assert_eq!(hex, "cafebabe");
        assert_eq!(backend.calls(BackendOp::Open), 0);
        assert_eq!(backend.calls(BackendOp::Stat), 0);
    }

    #[tokio::test]
    async fn test_partial_range_is_not_stored() {
        let backend = Arc::new(MemoryBackend::with_stripe_width(2));
        let data: Vec<u8> = (0..5_000u32).map(|i| (i % 200) as u8).collect();
        backend.add_file("/archive/a.dat", data.clone()).unwrap();
        let pipeline = pipeline(&backend);

        let hex = pipeline
            .checksum(
                ChecksumRequest::range("/archive/a.dat", 100, 3_000),
                Arc::new(RecordingOperation::new(512)),
            )
            .await
            .unwrap();

        assert_eq!(hex, md5_hex(&data[100..3_100]));
        assert_eq!(backend.calls(BackendOp::SetAttrs), 0);
        assert!(backend.user_attrs("/archive/a.dat").is_empty());
    }

    #[tokio::test]
    async fn test_whole_file_from_offset() {
        let backend = Arc::new(MemoryBackend::new());
        let data = vec![7u8; 4_096];
        backend.add_file("/archive/a.dat", data.clone()).unwrap();
        let pipeline = pipeline(&backend);

        let hex = pipeline
            .checksum(
                ChecksumRequest::from_protocol("/archive/a.dat", 1_000, -1),
                Arc::new(RecordingOperation::new(1_024)),
            )
            .await
            .unwrap();

        assert_eq!(hex, md5_hex(&data[1_000..]));
        assert_eq!(backend.calls(BackendOp::SetAttrs), 0);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let backend = Arc::new(MemoryBackend::new());
        let pipeline = pipeline(&backend);

        let err = pipeline
            .checksum(
                ChecksumRequest::range("/archive/missing", 0, 10),
                Arc::new(RecordingOperation::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::System { op: "stat", .. }));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_digest_failure_wins_over_close_failure() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", vec![1u8; 100]).unwrap();
        backend.fail_next(BackendOp::Close, Errno::EIO);
        let pipeline = pipeline(&backend)
            .with_digest_factory(Arc::new(|_: ChecksumAlgorithm| -> Box<dyn Digest> {
                Box::new(BrokenDigest)
            }));

        let err = pipeline
            .checksum(
                ChecksumRequest::whole_file("/archive/a.dat"),
                Arc::new(RecordingOperation::new(64)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Digest(_)));
        assert_eq!(backend.calls(BackendOp::Close), 1);
        assert_eq!(backend.calls(BackendOp::SetAttrs), 0);
    }

    #[tokio::test]
    async fn test_close_failure_reported() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", vec![1u8; 100]).unwrap();
        backend.fail_next(BackendOp::Close, Errno::EIO);
        let pipeline = pipeline(&backend);

        let err = pipeline
            .checksum(
                ChecksumRequest::whole_file("/archive/a.dat"),
                Arc::new(RecordingOperation::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::System { op: "close", .. }));
    }

    #[tokio::test]
    async fn test_read_failure_closes_handle() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", vec![1u8; 100]).unwrap();
        backend.fail_next(BackendOp::Read, Errno::EIO);
        let pipeline = pipeline(&backend);

        let err = pipeline
            .checksum(
                ChecksumRequest::whole_file("/archive/a.dat"),
                Arc::new(RecordingOperation::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::System { op: "read", .. }));
        assert_eq!(backend.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_release_reports_failed_close() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", vec![1u8; 10]).unwrap();
        let pipeline = pipeline(&backend);

        let file = backend.open_read("/archive/a.dat").unwrap();
        pipeline.release(file, "/archive/a.dat").await.unwrap();
        assert_eq!(backend.open_handles(), 0);

        let file = backend.open_read("/archive/a.dat").unwrap();
        backend.fail_next(BackendOp::Close, Errno::EIO);
        let err = pipeline.release(file, "/archive/a.dat").await.unwrap_err();
        assert!(matches!(err, Error::System { op: "close", .. }));
        assert_eq!(backend.calls(BackendOp::Close), 2);
        assert_eq!(backend.open_handles(), 1);

        pipeline.release(file, "/archive/a.dat").await.unwrap();
        assert_eq!(backend.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_offset_beyond_eof() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", vec![1u8; 10]).unwrap();
        let pipeline = pipeline(&backend);

        let err = pipeline
            .checksum(
                ChecksumRequest::from_protocol("/archive/a.dat", 11, -1),
                Arc::new(RecordingOperation::default()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generic(_)));
        assert_eq!(backend.calls(BackendOp::Open), 0);
    }

    #[tokio::test]
    async fn test_command_reports_once() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", Vec::new()).unwrap();
        let pipeline = pipeline(&backend);
        let op = Arc::new(RecordingOperation::default());

        pipeline
            .command(ChecksumRequest::whole_file("/archive/a.dat"), op.clone())
            .await
            .unwrap();

        let finished = op.finished();
        assert_eq!(finished.len(), 1);
        assert!(matches!(&finished[0], Finished::Command(Ok(hex)) if hex == EMPTY_MD5));
    }

    #[tokio::test]
    async fn test_clear_invalidates() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", b"abc".to_vec()).unwrap();
        let pipeline = pipeline(&backend);
        let op: Arc<dyn Operation> = Arc::new(RecordingOperation::default());

        pipeline
            .checksum(ChecksumRequest::whole_file("/archive/a.dat"), op.clone())
            .await
            .unwrap();
        pipeline.clear("/archive/a.dat").await.unwrap();

        assert_eq!(backend.user_attrs("/archive/a.dat")[KEY_STATE], "Invalid");
        assert_eq!(pipeline.store().read_checksum("/archive/a.dat").unwrap(), None);

        // Recomputed from data, then stored again
        let opens = backend.calls(BackendOp::Open);
        let hex = pipeline
            .checksum(ChecksumRequest::whole_file("/archive/a.dat"), op)
            .await
            .unwrap();
        assert_eq!(hex, md5_hex(b"abc"));
        assert_eq!(backend.calls(BackendOp::Open), opens + 1);
    }

    #[tokio::test]
    async fn test_markers_during_slow_read() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/a.dat", vec![3u8; 10 * 1024]).unwrap();
        backend.set_read_delay(Duration::from_millis(30));
        let pipeline = ChecksumPipeline::new(
            Arc::clone(&backend),
            ChecksumConfig {
                marker_interval: Duration::from_millis(100),
                ..Default::default()
            },
        );
        let op = Arc::new(RecordingOperation::new(1_024));

        pipeline
            .checksum(ChecksumRequest::range("/archive/a.dat", 0, 10 * 1024), op.clone())
            .await
            .unwrap();

        let reports: Vec<u64> = op
            .intermediates()
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert!(!reports.is_empty());
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert!(reports.iter().all(|&r| r <= 10 * 1024));
    }

    #[test]
    fn test_transfer_bookkeeping() {
        let mut transfer =
            ChecksumTransfer::new(Box::new(Md5Digest::new()), 250, 100, MarkerCounter::default());
        let mut window = RangeWindow {
            offset: 0,
            length: 200,
            end_of_transfer: false,
        };
        transfer.on_range_complete(&mut window);
        assert_eq!((window.offset, window.length), (200, 50));
        assert!(!window.end_of_transfer);

        window.length = 50;
        transfer.on_range_complete(&mut window);
        assert_eq!(window.offset, 250);
        assert!(window.end_of_transfer);
        assert_eq!(transfer.remaining(), 0);
    }

    #[test]
    fn test_oversized_block_latches_error() {
        let mut transfer =
            ChecksumTransfer::new(Box::new(Md5Digest::new()), 1_000, 10, MarkerCounter::default());
        assert_eq!(transfer.on_block(0, &[0u8; 11]), BlockControl::Abort);
        assert!(matches!(transfer.error(), Some(Error::Generic(_))));
        assert!(transfer.finish().is_err());
    }
}
