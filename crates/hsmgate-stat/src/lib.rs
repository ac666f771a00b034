//! # hsmgate Stat
//!
//! Stat and directory listing for hsmgate.
//!
//! This crate provides:
//! - Translation of native stat records and directory entries into
//!   protocol stat records, resolving symbolic links
//! - Forward-only paginated directory listing
//! - Request dispatch that reports results through an [`Operation`]
//!
//! | Object          | `file_only`        | otherwise            |
//! |-----------------|--------------------|----------------------|
//! | directory       | the directory      | its entries, paged   |
//! | file            | the file           | the file             |
//! | link to file    | the link           | the link             |
//! | link to dir     | the link           | the target's entries |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod paginate;
pub mod translate;

pub use paginate::{DirectoryLister, DirectoryPage};
pub use translate::{EntryOutcome, StatTranslator};

use hsmgate_core::backend::mode;
use hsmgate_core::{Error, Operation, ProtocolStat, Result, StatConfig, StorageBackend};
use std::sync::Arc;

/// Serves stat requests against a storage backend
#[derive(Debug)]
pub struct StatService<B> {
    backend: Arc<B>,
    config: StatConfig,
}

impl<B: StorageBackend> StatService<B> {
    /// Create a service paging directories by `config.page_size`
    pub fn new(backend: Arc<B>, config: StatConfig) -> Self {
        Self { backend, config }
    }

    /// Translate a single object
    ///
    /// # Errors
    ///
    /// Returns the translation error for `path`.
    pub fn stat_object(&self, path: &str) -> Result<ProtocolStat> {
        let mut record = ProtocolStat::default();
        StatTranslator::new(Arc::clone(&self.backend)).translate_object(path, &mut record)?;
        Ok(record)
    }

    /// Start listing the directory at `path`
    ///
    /// # Errors
    ///
    /// See [`DirectoryLister::open`].
    pub fn list(&self, path: &str) -> Result<DirectoryLister<B>> {
        DirectoryLister::open(Arc::clone(&self.backend), path, self.config.page_size)
    }

    /// True if `path` is listed rather than reported as a single record
    fn lists_entries(&self, path: &str, file_only: bool) -> Result<bool> {
        let lstat = self
            .backend
            .lstat(path)
            .map_err(|errno| Error::system("lstat", errno))?;
        if file_only {
            return Ok(false);
        }
        if mode::is_dir(lstat.mode) {
            return Ok(true);
        }
        // A link is listed only if it resolves to a directory
        Ok(mode::is_link(lstat.mode)
            && self
                .backend
                .stat(path)
                .is_ok_and(|target| mode::is_dir(target.mode)))
    }

    /// Serve a stat request.
    ///
    /// Non-final pages of a listing go to `op.partial_stat`; the request
    /// always ends with exactly one `op.finished_stat`, carrying the last
    /// page, the single record, or the error.
    pub fn stat(&self, op: &dyn Operation, path: &str, file_only: bool) {
        tracing::debug!(path, file_only, "stat requested");

        let list = match self.lists_entries(path, file_only) {
            Ok(list) => list,
            Err(err) => {
                tracing::error!(path, "stat failed: {}", err);
                op.finished_stat(Err(err));
                return;
            }
        };

        if !list {
            match self.stat_object(path) {
                Ok(record) => op.finished_stat(Ok(std::slice::from_ref(&record))),
                Err(err) => {
                    tracing::error!(path, "stat failed: {}", err);
                    op.finished_stat(Err(err));
                }
            }
            return;
        }

        let mut lister = match self.list(path) {
            Ok(lister) => lister,
            Err(err) => {
                tracing::error!(path, "listing failed: {}", err);
                op.finished_stat(Err(err));
                return;
            }
        };

        let mut page = DirectoryPage::default();
        let mut total = 0usize;
        loop {
            match lister.read_page(&mut page) {
                Ok(true) => {
                    total += page.entries.len();
                    op.partial_stat(&page.entries);
                }
                Ok(false) => {
                    total += page.entries.len();
                    tracing::debug!(path, entries = total, "listing complete");
                    op.finished_stat(Ok(&page.entries));
                    return;
                }
                Err(err) => {
                    tracing::error!(path, "listing failed after {} entries: {}", total, err);
                    op.finished_stat(Err(err));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsmgate_core::{BackendOp, Errno, Finished, MemoryBackend, RecordingOperation};

    fn service(page_size: usize) -> (Arc<MemoryBackend>, StatService<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        for i in 0..5 {
            backend.add_file(&format!("/archive/d/f{i}"), vec![0u8; 10]).unwrap();
        }
        backend.add_file("/archive/a.dat", vec![0u8; 3]).unwrap();
        backend.add_symlink("/archive/to-dir", "d").unwrap();
        backend.add_symlink("/archive/to-file", "a.dat").unwrap();
        let service = StatService::new(Arc::clone(&backend), StatConfig { page_size });
        (backend, service)
    }

    fn final_records(op: &RecordingOperation) -> Vec<ProtocolStat> {
        let finished = op.finished();
        assert_eq!(finished.len(), 1, "exactly one final call");
        match finished.into_iter().next() {
            Some(Finished::Stat(Ok(records))) => records,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_directory_paged() {
        let (_backend, service) = service(2);
        let op = RecordingOperation::default();

        service.stat(&op, "/archive/d", false);

        let partial = op.partial_stats();
        assert_eq!(partial.len(), 2);
        assert!(partial.iter().all(|p| p.len() == 2));
        let last = final_records(&op);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].name, "f4");
    }

    #[test]
    fn test_directory_file_only() {
        let (_backend, service) = service(2);
        let op = RecordingOperation::default();

        service.stat(&op, "/archive/d", true);

        assert!(op.partial_stats().is_empty());
        let records = final_records(&op);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "d");
        assert!(records[0].is_dir());
    }

    #[test]
    fn test_file_single_record() {
        let (_backend, service) = service(2);
        for file_only in [false, true] {
            let op = RecordingOperation::default();
            service.stat(&op, "/archive/a.dat", file_only);
            let records = final_records(&op);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].size, 3);
        }
    }

    #[test]
    fn test_link_to_dir() {
        let (_backend, service) = service(10);

        let op = RecordingOperation::default();
        service.stat(&op, "/archive/to-dir", false);
        assert_eq!(final_records(&op).len(), 5);

        let op = RecordingOperation::default();
        service.stat(&op, "/archive/to-dir", true);
        let records = final_records(&op);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "to-dir");
        assert_eq!(records[0].symlink_target.as_deref(), Some("d"));
    }

    #[test]
    fn test_link_to_file() {
        let (_backend, service) = service(10);
        let op = RecordingOperation::default();
        service.stat(&op, "/archive/to-file", false);
        let records = final_records(&op);
        assert_eq!(records.len(), 1);
        assert!(records[0].is_symlink());
        assert_eq!(records[0].size, 3);
    }

    #[test]
    fn test_missing_path() {
        let (_backend, service) = service(2);
        let op = RecordingOperation::default();
        service.stat(&op, "/archive/none", false);
        assert!(matches!(&op.finished()[..], [Finished::Stat(Err(_))]));
    }

    #[test]
    fn test_mid_listing_failure() {
        let (backend, service) = service(2);
        let op = RecordingOperation::default();
        backend.fail_next(BackendOp::ReadDir, Errno::EIO);

        service.stat(&op, "/archive/d", false);

        assert!(op.partial_stats().is_empty());
        match &op.finished()[..] {
            [Finished::Stat(Err(err))] => assert_eq!(err.code(), Errno::EIO.code()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
