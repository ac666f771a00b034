//! Local filesystem backend.
//!
//! Serves a directory tree from the local filesystem as if it were the
//! archive namespace: protocol paths are resolved below a root directory,
//! reads use positional I/O so several workers can share one handle, and
//! user attributes are stored as `user.` extended attributes.
//!
//! Attribute updates are not atomic: `set_user_attrs` writes one extended
//! attribute per pair and stops at the first failure.

use crate::backend::{
    DirAttributes, DirRead, FileHandle, NativeAttrs, NativeDirEntry, NativeStat, ObjectHandle,
    ObjectType, OpenFile, StorageBackend,
};
use crate::error::{BackendResult, Errno};
use std::collections::HashMap;
use std::ffi::CString;
use std::fs::{self, File, Metadata};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Namespace prefix for stored attributes
pub const XATTR_PREFIX: &str = "user.hsmgate.";

#[derive(Debug, Default)]
struct Handles {
    files: HashMap<u64, Arc<File>>,
    dirs: HashMap<u64, PathBuf>,
}

/// [`StorageBackend`] over a local directory tree
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
    stripe_width: u32,
    next_handle: AtomicU64,
    handles: Mutex<Handles>,
}

impl LocalBackend {
    /// Serve the tree below `root`; opened files report `stripe_width`
    pub fn new(root: impl Into<PathBuf>, stripe_width: u32) -> Self {
        Self {
            root: root.into(),
            stripe_width: stripe_width.max(1),
            next_handle: AtomicU64::new(1),
            handles: Mutex::new(Handles::default()),
        }
    }

    /// Root directory of the served tree
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    /// Map a protocol path below the root; `..` components are refused
    fn local_path(&self, path: &str) -> BackendResult<PathBuf> {
        let mut local = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => local.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => return Err(Errno::EACCES),
            }
        }
        Ok(local)
    }
}

fn native_stat(meta: &Metadata) -> NativeStat {
    NativeStat {
        mode: meta.mode(),
        nlink: u32::try_from(meta.nlink()).unwrap_or(u32::MAX),
        uid: meta.uid(),
        gid: meta.gid(),
        atime: meta.atime(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
        ino: meta.ino(),
        size: meta.size(),
    }
}

fn native_attrs(meta: &Metadata) -> NativeAttrs {
    let file_type = meta.file_type();
    let object_type = if file_type.is_symlink() {
        ObjectType::SymLink
    } else if file_type.is_dir() {
        ObjectType::Directory
    } else if meta.nlink() > 1 {
        ObjectType::HardLink
    } else {
        ObjectType::File
    };
    NativeAttrs {
        object_type,
        mode: meta.mode() & crate::backend::mode::PERMISSION_MASK,
        link_count: u32::try_from(meta.nlink()).unwrap_or(u32::MAX),
        uid: meta.uid(),
        gid: meta.gid(),
        time_last_read: meta.atime(),
        time_last_written: meta.mtime(),
        time_created: meta.ctime(),
        data_length: meta.size(),
    }
}

fn c_path(path: &Path) -> BackendResult<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Errno::EINVAL)
}

/// `/hpss/user/cksum/state` is stored as `user.hsmgate.cksum.state`
fn c_name(key: &str) -> BackendResult<CString> {
    let key = key.trim_start_matches("/hpss/user/").trim_start_matches('/');
    CString::new(format!("{XATTR_PREFIX}{}", key.replace('/', "."))).map_err(|_| Errno::EINVAL)
}

/// Last OS error, with "no such attribute" folded into `ENOENT`
fn last_xattr_error() -> Errno {
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ENODATA) | None => Errno::ENOENT,
        Some(code) => Errno(code),
    }
}

fn get_xattr(path: &CString, key: &str) -> BackendResult<String> {
    let name = c_name(key)?;
    // SAFETY: `path` and `name` are NUL-terminated CStrings that outlive the
    // call; a null buffer with size 0 only queries the value length.
    let size = unsafe { libc::getxattr(path.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0) };
    if size < 0 {
        return Err(last_xattr_error());
    }
    let mut buf = vec![0u8; size as usize];
    // SAFETY: `path` and `name` are valid CStrings; `buf` is a live
    // allocation of exactly `buf.len()` writable bytes.
    let read = unsafe {
        libc::getxattr(
            path.as_ptr(),
            name.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if read < 0 {
        return Err(last_xattr_error());
    }
    buf.truncate(read as usize);
    String::from_utf8(buf).map_err(|_| Errno::EIO)
}

fn set_xattr(path: &CString, key: &str, value: &str) -> BackendResult<()> {
    let name = c_name(key)?;
    // SAFETY: `path` and `name` are valid CStrings; the value pointer and
    // length come from the same borrowed `&str`, which outlives the call.
    let res = unsafe {
        libc::setxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if res < 0 {
        return Err(Errno::from(std::io::Error::last_os_error()));
    }
    Ok(())
}

impl StorageBackend for LocalBackend {
    fn open_read(&self, path: &str) -> BackendResult<OpenFile> {
        let local = self.local_path(path)?;
        if fs::metadata(&local)?.is_dir() {
            return Err(Errno::EISDIR);
        }
        let file = File::open(&local)?;
        let handle = self.allocate();
        self.lock().files.insert(handle, Arc::new(file));
        Ok(OpenFile {
            handle: FileHandle(handle),
            stripe_width: self.stripe_width,
        })
    }

    fn read_at(&self, file: FileHandle, offset: u64, buf: &mut [u8]) -> BackendResult<usize> {
        let file = Arc::clone(self.lock().files.get(&file.0).ok_or(Errno::EBADF)?);
        Ok(file.read_at(buf, offset)?)
    }

    fn close(&self, file: FileHandle) -> BackendResult<()> {
        self.lock()
            .files
            .remove(&file.0)
            .map(|_| ())
            .ok_or(Errno::EBADF)
    }

    fn stat(&self, path: &str) -> BackendResult<NativeStat> {
        Ok(native_stat(&fs::metadata(self.local_path(path)?)?))
    }

    fn lstat(&self, path: &str) -> BackendResult<NativeStat> {
        Ok(native_stat(&fs::symlink_metadata(self.local_path(path)?)?))
    }

    fn readlink(&self, path: &str) -> BackendResult<String> {
        let target = fs::read_link(self.local_path(path)?)?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn readlink_at(&self, parent: ObjectHandle, name: &str) -> BackendResult<String> {
        let dir = self.lock().dirs.get(&parent.0).cloned().ok_or(Errno::EBADF)?;
        let target = fs::read_link(dir.join(name))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn dir_attributes(&self, path: &str) -> BackendResult<DirAttributes> {
        let local = self.local_path(path)?;
        if !fs::metadata(&local)?.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        let entry_count = fs::read_dir(&local)?.count();
        let handle = self.allocate();
        self.lock().dirs.insert(handle, local);
        Ok(DirAttributes {
            handle: ObjectHandle(handle),
            entry_count: u32::try_from(entry_count).unwrap_or(u32::MAX),
        })
    }

    fn read_dir(
        &self,
        dir: ObjectHandle,
        cursor: u64,
        max_entries: usize,
        out: &mut Vec<NativeDirEntry>,
    ) -> BackendResult<DirRead> {
        out.clear();
        let local = self.lock().dirs.get(&dir.0).cloned().ok_or(Errno::EBADF)?;

        // Sorted names give a stable enumeration order across calls
        let mut names = fs::read_dir(&local)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();

        let start = usize::try_from(cursor).map_err(|_| Errno::EINVAL)?;
        for name in names.iter().skip(start).take(max_entries) {
            let meta = match fs::symlink_metadata(local.join(name)) {
                Ok(meta) => meta,
                // Removed since the listing was taken
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(name = ?name, "entry vanished during listing");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            out.push(NativeDirEntry {
                name: name.to_string_lossy().into_owned(),
                attrs: native_attrs(&meta),
            });
        }
        let next = start.saturating_add(max_entries).min(names.len());
        Ok(DirRead {
            next_cursor: next as u64,
            end_of_directory: next >= names.len(),
        })
    }

    fn get_user_attrs(&self, path: &str, keys: &[&str]) -> BackendResult<Vec<String>> {
        let path = c_path(&self.local_path(path)?)?;
        keys.iter().map(|key| get_xattr(&path, key)).collect()
    }

    fn set_user_attrs(&self, path: &str, attrs: &[(&str, &str)]) -> BackendResult<()> {
        let path = c_path(&self.local_path(path)?)?;
        for (done, (key, value)) in attrs.iter().enumerate() {
            if let Err(errno) = set_xattr(&path, key, value) {
                tracing::warn!(key, written = done, %errno, "attribute update stopped part way");
                return Err(errno);
            }
        }
        Ok(())
    }
}
