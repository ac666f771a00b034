//! Native to protocol stat translation.
//!
//! Symbolic links are reported under their own name with the target's
//! permission bits, size and times, `S_IFLNK` type bits, and the link text in
//! `symlink_target`. Directory entries other than links are translated from
//! the attributes carried in the entry, with no further backend calls.

use hsmgate_core::backend::mode;
use hsmgate_core::{
    Errno, Error, NativeDirEntry, NativeStat, ObjectHandle, ObjectType, ProtocolStat, Result,
    StorageBackend, base_name,
};
use std::sync::Arc;

/// Result of translating one directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// The output record was filled in
    Translated,
    /// The entry could not be resolved and must be left out
    Skip,
}

/// Target attributes under the link's own type bits
fn as_link(target: &NativeStat) -> NativeStat {
    NativeStat {
        mode: mode::S_IFLNK | (target.mode & mode::PERMISSION_MASK),
        ..*target
    }
}

/// Writes protocol stat records into caller-provided buffers
#[derive(Debug)]
pub struct StatTranslator<B> {
    backend: Arc<B>,
    path_buf: String,
}

impl<B: StorageBackend> StatTranslator<B> {
    /// Create a translator over `backend`
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            path_buf: String::new(),
        }
    }

    /// Translate the object at `path` into `out`.
    ///
    /// A link whose target cannot be resolved (missing, or a link cycle)
    /// keeps its own lstat record; the link text is still attached.
    ///
    /// # Errors
    ///
    /// Returns a `System` error if `lstat` or `readlink` fail, or if
    /// following the link fails for a reason other than a missing target or
    /// a cycle.
    pub fn translate_object(&mut self, path: &str, out: &mut ProtocolStat) -> Result<()> {
        out.reset();
        let lstat = self
            .backend
            .lstat(path)
            .map_err(|errno| Error::system("lstat", errno))?;

        if mode::is_link(lstat.mode) {
            let target = self
                .backend
                .readlink(path)
                .map_err(|errno| Error::system("readlink", errno))?;
            let native = match self.backend.stat(path) {
                Ok(target_stat) => as_link(&target_stat),
                Err(errno @ (Errno::ENOENT | Errno::ELOOP)) => {
                    tracing::debug!(path, %errno, "unresolved symlink, keeping link record");
                    lstat
                }
                Err(errno) => return Err(Error::system("stat", errno)),
            };
            out.copy_native(&native);
            out.set_symlink_target(&target);
        } else {
            out.copy_native(&lstat);
        }
        out.set_name(base_name(path));
        Ok(())
    }

    /// Translate one entry of the directory `parent` (at `parent_path`).
    ///
    /// Links whose text or target cannot be read are reported as
    /// [`EntryOutcome::Skip`] so one bad entry never fails a page.
    ///
    /// # Errors
    ///
    /// Reserved for failures that should end the listing; entry-level
    /// failures are skips.
    pub fn translate_dir_entry(
        &mut self,
        parent: ObjectHandle,
        entry: &NativeDirEntry,
        parent_path: &str,
        out: &mut ProtocolStat,
    ) -> Result<EntryOutcome> {
        out.reset();
        let attrs = &entry.attrs;

        let type_bits = match attrs.object_type {
            ObjectType::File | ObjectType::HardLink => mode::S_IFREG,
            ObjectType::Directory | ObjectType::Junction | ObjectType::FilesetRoot => {
                mode::S_IFDIR
            }
            ObjectType::SymLink => return Ok(self.translate_link(parent, entry, parent_path, out)),
        };

        out.mode = (attrs.mode & mode::PERMISSION_MASK) | type_bits;
        out.nlink = attrs.link_count;
        out.uid = attrs.uid;
        out.gid = attrs.gid;
        out.dev = 0;
        out.atime = attrs.time_last_read;
        out.mtime = attrs.time_last_written;
        out.ctime = attrs.time_created;
        out.ino = 0;
        out.size = attrs.data_length;
        out.set_name(&entry.name);
        Ok(EntryOutcome::Translated)
    }

    fn translate_link(
        &mut self,
        parent: ObjectHandle,
        entry: &NativeDirEntry,
        parent_path: &str,
        out: &mut ProtocolStat,
    ) -> EntryOutcome {
        let target = match self.backend.readlink_at(parent, &entry.name) {
            Ok(target) => target,
            Err(errno) => {
                tracing::warn!(name = %entry.name, %errno, "readlink failed, skipping entry");
                return EntryOutcome::Skip;
            }
        };

        self.path_buf.clear();
        self.path_buf.push_str(parent_path.trim_end_matches('/'));
        self.path_buf.push('/');
        self.path_buf.push_str(&entry.name);

        let target_stat = match self.backend.stat(&self.path_buf) {
            Ok(stat) => stat,
            Err(errno) => {
                tracing::warn!(path = %self.path_buf, %errno, "link target unresolved, skipping entry");
                return EntryOutcome::Skip;
            }
        };

        out.copy_native(&as_link(&target_stat));
        out.set_name(&entry.name);
        out.set_symlink_target(&target);
        EntryOutcome::Translated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsmgate_core::{BackendOp, MemoryBackend, NativeAttrs};

    fn entry(name: &str, object_type: ObjectType) -> NativeDirEntry {
        NativeDirEntry {
            name: name.to_string(),
            attrs: NativeAttrs {
                object_type,
                mode: 0o640,
                link_count: 1,
                uid: 10,
                gid: 20,
                time_last_read: 100,
                time_last_written: 200,
                time_created: 300,
                data_length: 4096,
            },
        }
    }

    fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/archive/target.dat", vec![0u8; 1234]).unwrap();
        backend.add_symlink("/archive/link", "target.dat").unwrap();
        backend.add_symlink("/archive/dangling", "/archive/nowhere").unwrap();
        backend
    }

    #[test]
    fn test_translate_regular_file() {
        let backend = backend();
        let mut translator = StatTranslator::new(backend);
        let mut out = ProtocolStat::default();

        translator.translate_object("/archive/target.dat", &mut out).unwrap();

        assert_eq!(out.name, "target.dat");
        assert!(mode::is_reg(out.mode));
        assert_eq!(out.size, 1234);
        assert_eq!(out.dev, 0);
        assert!(out.symlink_target.is_none());
    }

    #[test]
    fn test_translate_symlink() {
        let backend = backend();
        let mut translator = StatTranslator::new(backend);
        let mut out = ProtocolStat::default();

        translator.translate_object("/archive/link", &mut out).unwrap();

        assert_eq!(out.name, "link");
        assert_eq!(out.symlink_target.as_deref(), Some("target.dat"));
        assert!(out.is_symlink());
        assert!(!mode::is_reg(out.mode));
        assert_eq!(out.mode & mode::PERMISSION_MASK, 0o644);
        assert_eq!(out.size, 1234);
    }

    #[test]
    fn test_translate_dangling_symlink() {
        let backend = backend();
        let mut translator = StatTranslator::new(backend);
        let mut out = ProtocolStat::default();

        translator.translate_object("/archive/dangling", &mut out).unwrap();

        assert!(out.is_symlink());
        assert_eq!(out.symlink_target.as_deref(), Some("/archive/nowhere"));
    }

    #[test]
    fn test_translate_missing_object() {
        let mut translator = StatTranslator::new(backend());
        let mut out = ProtocolStat::default();
        let err = translator.translate_object("/archive/none", &mut out).unwrap_err();
        assert!(matches!(err, Error::System { op: "lstat", .. }));
    }

    #[test]
    fn test_name_without_separator() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/plain", Vec::new()).unwrap();
        let mut translator = StatTranslator::new(backend);
        let mut out = ProtocolStat::default();
        translator.translate_object("plain", &mut out).unwrap();
        assert_eq!(out.name, "plain");
    }

    #[test]
    fn test_dir_entry_types() {
        let backend = backend();
        let dir = backend.dir_attributes("/archive").unwrap();
        let mut translator = StatTranslator::new(Arc::clone(&backend));
        let mut out = ProtocolStat::default();

        for (object_type, type_bits) in [
            (ObjectType::File, mode::S_IFREG),
            (ObjectType::HardLink, mode::S_IFREG),
            (ObjectType::Directory, mode::S_IFDIR),
            (ObjectType::Junction, mode::S_IFDIR),
            (ObjectType::FilesetRoot, mode::S_IFDIR),
        ] {
            let outcome = translator
                .translate_dir_entry(dir.handle, &entry("e", object_type), "/archive", &mut out)
                .unwrap();
            assert_eq!(outcome, EntryOutcome::Translated);
            assert_eq!(out.mode, type_bits | 0o640);
            assert_eq!(out.ino, 0);
            assert_eq!((out.atime, out.mtime, out.ctime), (100, 200, 300));
            assert_eq!(out.size, 4096);
            assert_eq!(out.name, "e");
        }

        // Inline attributes only
        assert_eq!(backend.calls(BackendOp::Stat), 0);
        assert_eq!(backend.calls(BackendOp::ReadlinkAt), 0);
    }

    #[test]
    fn test_dir_entry_symlink() {
        let backend = backend();
        let dir = backend.dir_attributes("/archive").unwrap();
        let mut translator = StatTranslator::new(backend);
        let mut out = ProtocolStat::default();

        let outcome = translator
            .translate_dir_entry(dir.handle, &entry("link", ObjectType::SymLink), "/archive/", &mut out)
            .unwrap();

        assert_eq!(outcome, EntryOutcome::Translated);
        assert_eq!(out.name, "link");
        assert_eq!(out.symlink_target.as_deref(), Some("target.dat"));
        assert!(out.is_symlink());
        assert_eq!(out.size, 1234);
    }

    #[test]
    fn test_dir_entry_dangling_symlink_skipped() {
        let backend = backend();
        let dir = backend.dir_attributes("/archive").unwrap();
        let mut translator = StatTranslator::new(backend);
        let mut out = ProtocolStat::default();

        let outcome = translator
            .translate_dir_entry(dir.handle, &entry("dangling", ObjectType::SymLink), "/archive", &mut out)
            .unwrap();
        assert_eq!(outcome, EntryOutcome::Skip);
    }

    #[test]
    fn test_dir_entry_readlink_failure_skipped() {
        let backend = backend();
        let dir = backend.dir_attributes("/archive").unwrap();
        backend.fail_next(BackendOp::ReadlinkAt, Errno::EIO);
        let mut translator = StatTranslator::new(Arc::clone(&backend));
        let mut out = ProtocolStat::default();

        let outcome = translator
            .translate_dir_entry(dir.handle, &entry("link", ObjectType::SymLink), "/archive", &mut out)
            .unwrap();
        assert_eq!(outcome, EntryOutcome::Skip);
        assert_eq!(backend.calls(BackendOp::Stat), 0);
    }

    #[test]
    fn test_record_reuse_clears_link() {
        let backend = backend();
        let mut translator = StatTranslator::new(backend);
        let mut out = ProtocolStat::default();

        translator.translate_object("/archive/link", &mut out).unwrap();
        translator.translate_object("/archive/target.dat", &mut out).unwrap();

        assert_eq!(out.name, "target.dat");
        assert!(out.symlink_target.is_none());
        assert!(!out.is_symlink());
    }

    proptest::proptest! {
        #[test]
        fn prop_entry_keeps_permission_bits(perm in 0u32..0o10000, dir in proptest::bool::ANY) {
            let backend = backend();
            let handle = backend.dir_attributes("/archive").unwrap().handle;
            let mut translator = StatTranslator::new(backend);
            let mut out = ProtocolStat::default();

            let mut native = entry("e", if dir { ObjectType::Directory } else { ObjectType::File });
            native.attrs.mode = perm;
            translator.translate_dir_entry(handle, &native, "/archive", &mut out).unwrap();

            proptest::prop_assert_eq!(out.mode & mode::PERMISSION_MASK, perm);
            proptest::prop_assert_eq!(mode::is_dir(out.mode), dir);
            proptest::prop_assert!(out.symlink_target.is_none());
        }
    }
}
