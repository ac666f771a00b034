//! Storage backend contract.
//!
//! The hierarchical storage system is an external collaborator. This module
//! describes the calls the checksum and stat code makes against it and the
//! native records those calls return. Every call is blocking and atomic at
//! the granularity of the call; implementations must be `Send + Sync`
//! because the parallel read driver calls [`StorageBackend::read_at`] from
//! several worker threads at once.

use crate::error::BackendResult;
use std::sync::Arc;

/// POSIX file type and permission bits used in native and protocol records
pub mod mode {
    /// File type mask
    pub const S_IFMT: u32 = 0o170_000;
    /// Directory
    pub const S_IFDIR: u32 = 0o040_000;
    /// Regular file
    pub const S_IFREG: u32 = 0o100_000;
    /// Symbolic link
    pub const S_IFLNK: u32 = 0o120_000;
    /// Permission and set-id bits
    pub const PERMISSION_MASK: u32 = 0o7777;

    /// File type bits of `mode`
    #[must_use]
    pub const fn file_type(mode: u32) -> u32 {
        mode & S_IFMT
    }

    /// True if `mode` describes a directory
    #[must_use]
    pub const fn is_dir(mode: u32) -> bool {
        file_type(mode) == S_IFDIR
    }

    /// True if `mode` describes a symbolic link
    #[must_use]
    pub const fn is_link(mode: u32) -> bool {
        file_type(mode) == S_IFLNK
    }

    /// True if `mode` describes a regular file
    #[must_use]
    pub const fn is_reg(mode: u32) -> bool {
        file_type(mode) == S_IFREG
    }
}

/// Namespace object type reported in directory entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Regular file
    File,
    /// Hard link to a file
    HardLink,
    /// Directory
    Directory,
    /// Junction to another namespace
    Junction,
    /// Root directory of a fileset
    FilesetRoot,
    /// Symbolic link
    SymLink,
}

/// Result of `stat`/`lstat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeStat {
    /// Type and permission bits
    pub mode: u32,
    /// Hard link count
    pub nlink: u32,
    /// Owner id
    pub uid: u32,
    /// Group id
    pub gid: u32,
    /// Last access, seconds since the epoch
    pub atime: i64,
    /// Last modification, seconds since the epoch
    pub mtime: i64,
    /// Last status change, seconds since the epoch
    pub ctime: i64,
    /// Object id
    pub ino: u64,
    /// Size in bytes
    pub size: u64,
}

/// Attributes carried inline in a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeAttrs {
    /// Object type
    pub object_type: ObjectType,
    /// Permission bits only (no type bits)
    pub mode: u32,
    /// Hard link count
    pub link_count: u32,
    /// Owner id
    pub uid: u32,
    /// Group id
    pub gid: u32,
    /// Last read, seconds since the epoch
    pub time_last_read: i64,
    /// Last written, seconds since the epoch
    pub time_last_written: i64,
    /// Creation time, seconds since the epoch
    pub time_created: i64,
    /// Data length in bytes
    pub data_length: u64,
}

/// One entry returned by [`StorageBackend::read_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDirEntry {
    /// Entry name (no path separators)
    pub name: String,
    /// Inline attributes
    pub attrs: NativeAttrs,
}

/// Handle of a namespace object, used for handle-relative calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u64);

/// Handle of an object opened for reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

/// Result of [`StorageBackend::open_read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    /// Handle for `read_at` and `close`
    pub handle: FileHandle,
    /// Backend parallelism hint for striped reads
    pub stripe_width: u32,
}

/// Result of [`StorageBackend::dir_attributes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirAttributes {
    /// Handle of the directory
    pub handle: ObjectHandle,
    /// Number of entries at the time of the call
    pub entry_count: u32,
}

/// Result of one [`StorageBackend::read_dir`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirRead {
    /// Opaque cursor for the next call
    pub next_cursor: u64,
    /// True once the last entry has been returned
    pub end_of_directory: bool,
}

/// Blocking calls made against the hierarchical storage system
pub trait StorageBackend: Send + Sync {
    /// Open an object for reading
    fn open_read(&self, path: &str) -> BackendResult<OpenFile>;

    /// Read up to `buf.len()` bytes at `offset`; returns 0 at end of file
    fn read_at(&self, file: FileHandle, offset: u64, buf: &mut [u8]) -> BackendResult<usize>;

    /// Close a handle returned by `open_read`
    fn close(&self, file: FileHandle) -> BackendResult<()>;

    /// Stat following symbolic links
    fn stat(&self, path: &str) -> BackendResult<NativeStat>;

    /// Stat without following a trailing symbolic link
    fn lstat(&self, path: &str) -> BackendResult<NativeStat>;

    /// Read the target text of a symbolic link
    fn readlink(&self, path: &str) -> BackendResult<String>;

    /// Read the target text of the link `name` inside directory `parent`
    fn readlink_at(&self, parent: ObjectHandle, name: &str) -> BackendResult<String>;

    /// Resolve a directory (following links) to its handle and entry count
    fn dir_attributes(&self, path: &str) -> BackendResult<DirAttributes>;

    /// Read up to `max_entries` entries starting at `cursor` into `out`.
    ///
    /// `out` is cleared first. Entries come back in enumeration order.
    fn read_dir(
        &self,
        dir: ObjectHandle,
        cursor: u64,
        max_entries: usize,
        out: &mut Vec<NativeDirEntry>,
    ) -> BackendResult<DirRead>;

    /// Read user attributes; values are returned in `keys` order.
    ///
    /// Fails with `ENOENT` if any requested attribute is absent.
    fn get_user_attrs(&self, path: &str, keys: &[&str]) -> BackendResult<Vec<String>>;

    /// Set user attributes in a single call.
    ///
    /// Pairs are applied in order and a later pair for the same key wins.
    /// A backend that cannot apply them atomically may stop part way.
    fn set_user_attrs(&self, path: &str, attrs: &[(&str, &str)]) -> BackendResult<()>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn open_read(&self, path: &str) -> BackendResult<OpenFile> {
        (**self).open_read(path)
    }

    fn read_at(&self, file: FileHandle, offset: u64, buf: &mut [u8]) -> BackendResult<usize> {
        (**self).read_at(file, offset, buf)
    }

    fn close(&self, file: FileHandle) -> BackendResult<()> {
        (**self).close(file)
    }

    fn stat(&self, path: &str) -> BackendResult<NativeStat> {
        (**self).stat(path)
    }

    fn lstat(&self, path: &str) -> BackendResult<NativeStat> {
        (**self).lstat(path)
    }

    fn readlink(&self, path: &str) -> BackendResult<String> {
        (**self).readlink(path)
    }

    fn readlink_at(&self, parent: ObjectHandle, name: &str) -> BackendResult<String> {
        (**self).readlink_at(parent, name)
    }

    fn dir_attributes(&self, path: &str) -> BackendResult<DirAttributes> {
        (**self).dir_attributes(path)
    }

    fn read_dir(
        &self,
        dir: ObjectHandle,
        cursor: u64,
        max_entries: usize,
        out: &mut Vec<NativeDirEntry>,
    ) -> BackendResult<DirRead> {
        (**self).read_dir(dir, cursor, max_entries, out)
    }

    fn get_user_attrs(&self, path: &str, keys: &[&str]) -> BackendResult<Vec<String>> {
        (**self).get_user_attrs(path, keys)
    }

    fn set_user_attrs(&self, path: &str, attrs: &[(&str, &str)]) -> BackendResult<()> {
        (**self).set_user_attrs(path, attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::mode::*;

    #[test]
    fn test_mode_helpers() {
        assert!(is_dir(S_IFDIR | 0o755));
        assert!(is_reg(S_IFREG | 0o644));
        assert!(is_link(S_IFLNK | 0o777));
        // S_IFLNK shares the S_IFREG bit; the helpers compare the whole type field
        assert!(!is_reg(S_IFLNK | 0o777));
        assert_eq!(file_type(S_IFDIR | 0o700), S_IFDIR);
    }
}
