//! In-memory storage backend.
//!
//! A thread-safe namespace of files, directories and symbolic links with user
//! attributes, open handles and per-directory enumeration order. Supports
//! fault injection (`fail_next`) and per-call counters so callers can verify
//! which backend calls an operation made.

use crate::backend::{
    DirAttributes, DirRead, FileHandle, NativeAttrs, NativeDirEntry, NativeStat, ObjectHandle,
    ObjectType, OpenFile, StorageBackend, mode,
};
use crate::error::{BackendResult, Errno};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Symbolic links followed before resolution fails with `ELOOP`
pub const MAX_SYMLINK_HOPS: usize = 40;

/// Backend calls that can be counted and failed on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    /// `open_read`
    Open,
    /// `read_at`
    Read,
    /// `close`
    Close,
    /// `stat`
    Stat,
    /// `lstat`
    Lstat,
    /// `readlink`
    Readlink,
    /// `readlink_at`
    ReadlinkAt,
    /// `dir_attributes`
    DirAttributes,
    /// `read_dir`
    ReadDir,
    /// `get_user_attrs`
    GetAttrs,
    /// `set_user_attrs`
    SetAttrs,
}

#[derive(Debug, Clone)]
enum NodeKind {
    File(Arc<Vec<u8>>),
    Directory(Vec<String>),
    Symlink(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    perm: u32,
    nlink: u32,
    uid: u32,
    gid: u32,
    atime: i64,
    mtime: i64,
    ctime: i64,
    ino: u64,
    object_type: Option<ObjectType>,
    attrs: BTreeMap<String, String>,
}

impl Node {
    fn native_stat(&self) -> NativeStat {
        let (type_bits, size) = match &self.kind {
            NodeKind::File(data) => (mode::S_IFREG, data.len() as u64),
            NodeKind::Directory(children) => (mode::S_IFDIR, children.len() as u64),
            NodeKind::Symlink(target) => (mode::S_IFLNK, target.len() as u64),
        };
        NativeStat {
            mode: type_bits | self.perm,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            ino: self.ino,
            size,
        }
    }

    fn native_attrs(&self) -> NativeAttrs {
        let stat = self.native_stat();
        let object_type = self.object_type.unwrap_or(match &self.kind {
            NodeKind::File(_) => ObjectType::File,
            NodeKind::Directory(_) => ObjectType::Directory,
            NodeKind::Symlink(_) => ObjectType::SymLink,
        });
        NativeAttrs {
            object_type,
            mode: self.perm,
            link_count: self.nlink,
            uid: self.uid,
            gid: self.gid,
            time_last_read: self.atime,
            time_last_written: self.mtime,
            time_created: self.ctime,
            data_length: stat.size,
        }
    }
}

#[derive(Debug, Default)]
struct Namespace {
    nodes: HashMap<String, Node>,
    next_ino: u64,
    next_handle: u64,
    open_files: HashMap<u64, Arc<Vec<u8>>>,
    dir_handles: HashMap<u64, String>,
    faults: HashMap<BackendOp, VecDeque<Errno>>,
    calls: HashMap<BackendOp, u64>,
}

/// Thread-safe in-memory [`StorageBackend`]
#[derive(Debug)]
pub struct MemoryBackend {
    inner: Mutex<Namespace>,
    stripe_width: u32,
    read_delay: Mutex<Duration>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Normalize to an absolute path without empty, `.` or trailing components
fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn join(dir: &str, name: &str) -> String {
    if name.starts_with('/') {
        normalize(name)
    } else if dir == "/" {
        normalize(&format!("/{name}"))
    } else {
        normalize(&format!("{dir}/{name}"))
    }
}

impl MemoryBackend {
    /// Create a namespace holding only the root directory, stripe width 1
    #[must_use]
    pub fn new() -> Self {
        Self::with_stripe_width(1)
    }

    /// Create a namespace whose opened files report `stripe_width`
    #[must_use]
    pub fn with_stripe_width(stripe_width: u32) -> Self {
        let backend = Self {
            inner: Mutex::new(Namespace {
                next_ino: 1,
                next_handle: 1,
                ..Default::default()
            }),
            stripe_width,
            read_delay: Mutex::new(Duration::ZERO),
        };
        {
            let mut ns = backend.lock();
            let root = ns.new_node(NodeKind::Directory(Vec::new()), 0o755);
            ns.nodes.insert("/".to_string(), root);
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, Namespace> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a directory; missing parents are created too
    pub fn add_dir(&self, path: &str) -> BackendResult<()> {
        let path = normalize(path);
        let mut ns = self.lock();
        ns.ensure_dir(&path)
    }

    /// Create or replace a regular file; missing parents are created
    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) -> BackendResult<()> {
        let path = normalize(path);
        let mut ns = self.lock();
        ns.ensure_dir(parent_of(&path))?;
        let node = ns.new_node(NodeKind::File(Arc::new(data.into())), 0o644);
        ns.insert(&path, node)
    }

    /// Create a symbolic link at `path` with link text `target`
    pub fn add_symlink(&self, path: &str, target: &str) -> BackendResult<()> {
        let path = normalize(path);
        let mut ns = self.lock();
        ns.ensure_dir(parent_of(&path))?;
        let node = ns.new_node(NodeKind::Symlink(target.to_string()), 0o777);
        ns.insert(&path, node)
    }

    /// Report `object_type` for `path` in directory entries (e.g. a junction)
    pub fn set_object_type(&self, path: &str, object_type: ObjectType) -> BackendResult<()> {
        let mut ns = self.lock();
        let node = ns.nodes.get_mut(&normalize(path)).ok_or(Errno::ENOENT)?;
        node.object_type = Some(object_type);
        Ok(())
    }

    /// Set permission bits and ownership of `path` (no link following)
    pub fn set_owner(&self, path: &str, perm: u32, uid: u32, gid: u32) -> BackendResult<()> {
        let mut ns = self.lock();
        let node = ns.nodes.get_mut(&normalize(path)).ok_or(Errno::ENOENT)?;
        node.perm = perm & mode::PERMISSION_MASK;
        node.uid = uid;
        node.gid = gid;
        Ok(())
    }

    /// Remove an object (directories must be empty)
    pub fn remove(&self, path: &str) -> BackendResult<()> {
        let path = normalize(path);
        if path == "/" {
            return Err(Errno::EINVAL);
        }
        let mut ns = self.lock();
        match ns.nodes.get(&path).map(|n| &n.kind) {
            None => return Err(Errno::ENOENT),
            Some(NodeKind::Directory(children)) if !children.is_empty() => {
                return Err(Errno::EEXIST);
            }
            Some(_) => {}
        }
        ns.nodes.remove(&path);
        let name = crate::record::base_name(&path).to_string();
        if let Some(NodeKind::Directory(children)) =
            ns.nodes.get_mut(parent_of(&path)).map(|n| &mut n.kind)
        {
            children.retain(|c| *c != name);
        }
        Ok(())
    }

    /// Fail the next call of `op` with `errno` (queued per operation)
    pub fn fail_next(&self, op: BackendOp, errno: Errno) {
        self.lock().faults.entry(op).or_default().push_back(errno);
    }

    /// Number of calls of `op` made so far
    #[must_use]
    pub fn calls(&self, op: BackendOp) -> u64 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Handles returned by `open_read` that have not been closed
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.lock().open_files.len()
    }

    /// User attributes stored on `path` (no link following)
    #[must_use]
    pub fn user_attrs(&self, path: &str) -> BTreeMap<String, String> {
        self.lock()
            .nodes
            .get(&normalize(path))
            .map(|n| n.attrs.clone())
            .unwrap_or_default()
    }

    /// Sleep this long in every `read_at`, to simulate slow media
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    fn begin(&self, op: BackendOp) -> BackendResult<MutexGuard<'_, Namespace>> {
        let mut ns = self.lock();
        *ns.calls.entry(op).or_insert(0) += 1;
        if let Some(errno) = ns.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            tracing::debug!(?op, %errno, "injected backend failure");
            return Err(errno);
        }
        Ok(ns)
    }
}

impl Namespace {
    fn new_node(&mut self, kind: NodeKind, perm: u32) -> Node {
        let ino = self.next_ino;
        self.next_ino += 1;
        let now = now_secs();
        let nlink = if matches!(kind, NodeKind::Directory(_)) { 2 } else { 1 };
        Node {
            kind,
            perm,
            nlink,
            uid: 0,
            gid: 0,
            atime: now,
            mtime: now,
            ctime: now,
            ino,
            object_type: None,
            attrs: BTreeMap::new(),
        }
    }

    fn ensure_dir(&mut self, path: &str) -> BackendResult<()> {
        match self.nodes.get(path).map(|n| &n.kind) {
            Some(NodeKind::Directory(_)) => return Ok(()),
            Some(_) => return Err(Errno::ENOTDIR),
            None => {}
        }
        self.ensure_dir(parent_of(path))?;
        let node = self.new_node(NodeKind::Directory(Vec::new()), 0o755);
        self.insert(path, node)
    }

    fn insert(&mut self, path: &str, node: Node) -> BackendResult<()> {
        let name = crate::record::base_name(path).to_string();
        let is_new = !self.nodes.contains_key(path);
        match self.nodes.get_mut(parent_of(path)).map(|n| &mut n.kind) {
            Some(NodeKind::Directory(children)) => {
                if is_new {
                    children.push(name);
                }
            }
            Some(_) => return Err(Errno::ENOTDIR),
            None => return Err(Errno::ENOENT),
        }
        self.nodes.insert(path.to_string(), node);
        Ok(())
    }

    /// Resolve `path` to the key of an existing node.
    ///
    /// Symbolic links in intermediate components are always followed; the
    /// final component is followed only if `follow` is set. Gives up with
    /// `ELOOP` after [`MAX_SYMLINK_HOPS`] links, so link cycles terminate.
    fn resolve(&self, path: &str, follow: bool) -> BackendResult<String> {
        let mut pending: VecDeque<String> = normalize(path)
            .split('/')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        let mut current = "/".to_string();
        let mut hops = 0usize;

        while let Some(part) = pending.pop_front() {
            if part == ".." {
                current = parent_of(&current).to_string();
                continue;
            }
            let candidate = join(&current, &part);
            let node = self.nodes.get(&candidate).ok_or(Errno::ENOENT)?;
            let is_last = pending.is_empty();
            match &node.kind {
                NodeKind::Symlink(target) if follow || !is_last => {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(Errno::ELOOP);
                    }
                    if target.starts_with('/') {
                        current = "/".to_string();
                    }
                    for (i, piece) in target.split('/').filter(|p| !p.is_empty()).enumerate() {
                        pending.insert(i, piece.to_string());
                    }
                }
                NodeKind::Directory(_) => current = candidate,
                _ if is_last => current = candidate,
                _ => return Err(Errno::ENOTDIR),
            }
        }
        Ok(current)
    }

    fn node(&self, path: &str, follow: bool) -> BackendResult<&Node> {
        let key = self.resolve(path, follow)?;
        self.nodes.get(&key).ok_or(Errno::ENOENT)
    }
}

impl StorageBackend for MemoryBackend {
    fn open_read(&self, path: &str) -> BackendResult<OpenFile> {
        let mut ns = self.begin(BackendOp::Open)?;
        let data = match &ns.node(path, true)?.kind {
            NodeKind::File(data) => Arc::clone(data),
            NodeKind::Directory(_) => return Err(Errno::EISDIR),
            NodeKind::Symlink(_) => return Err(Errno::ELOOP),
        };
        let handle = ns.next_handle;
        ns.next_handle += 1;
        ns.open_files.insert(handle, data);
        Ok(OpenFile {
            handle: FileHandle(handle),
            stripe_width: self.stripe_width,
        })
    }

    fn read_at(&self, file: FileHandle, offset: u64, buf: &mut [u8]) -> BackendResult<usize> {
        let data = {
            let ns = self.begin(BackendOp::Read)?;
            Arc::clone(ns.open_files.get(&file.0).ok_or(Errno::EBADF)?)
        };
        let delay = *self.read_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let start = usize::try_from(offset).map_err(|_| Errno::EINVAL)?;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn close(&self, file: FileHandle) -> BackendResult<()> {
        let mut ns = self.begin(BackendOp::Close)?;
        ns.open_files.remove(&file.0).map(|_| ()).ok_or(Errno::EBADF)
    }

    fn stat(&self, path: &str) -> BackendResult<NativeStat> {
        let ns = self.begin(BackendOp::Stat)?;
        Ok(ns.node(path, true)?.native_stat())
    }

    fn lstat(&self, path: &str) -> BackendResult<NativeStat> {
        let ns = self.begin(BackendOp::Lstat)?;
        Ok(ns.node(path, false)?.native_stat())
    }

    fn readlink(&self, path: &str) -> BackendResult<String> {
        let ns = self.begin(BackendOp::Readlink)?;
        match &ns.node(path, false)?.kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(Errno::EINVAL),
        }
    }

    fn readlink_at(&self, parent: ObjectHandle, name: &str) -> BackendResult<String> {
        let ns = self.begin(BackendOp::ReadlinkAt)?;
        let dir = ns.dir_handles.get(&parent.0).ok_or(Errno::EBADF)?;
        match &ns.node(&join(dir, name), false)?.kind {
            NodeKind::Symlink(target) => Ok(target.clone()),
            _ => Err(Errno::EINVAL),
        }
    }

    fn dir_attributes(&self, path: &str) -> BackendResult<DirAttributes> {
        let mut ns = self.begin(BackendOp::DirAttributes)?;
        let key = ns.resolve(path, true)?;
        let entry_count = match &ns.nodes.get(&key).ok_or(Errno::ENOENT)?.kind {
            NodeKind::Directory(children) => children.len() as u32,
            _ => return Err(Errno::ENOTDIR),
        };
        let handle = ns.next_handle;
        ns.next_handle += 1;
        ns.dir_handles.insert(handle, key);
        Ok(DirAttributes {
            handle: ObjectHandle(handle),
            entry_count,
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
        let ns = self.begin(BackendOp::ReadDir)?;
        let path = ns.dir_handles.get(&dir.0).ok_or(Errno::EBADF)?;
        let children = match &ns.nodes.get(path).ok_or(Errno::ENOENT)?.kind {
            NodeKind::Directory(children) => children,
            _ => return Err(Errno::ENOTDIR),
        };
        let start = usize::try_from(cursor).map_err(|_| Errno::EINVAL)?;
        for name in children.iter().skip(start).take(max_entries) {
            let node = ns.nodes.get(&join(path, name)).ok_or(Errno::EIO)?;
            out.push(NativeDirEntry {
                name: name.clone(),
                attrs: node.native_attrs(),
            });
        }
        let next = start.saturating_add(out.len());
        Ok(DirRead {
            next_cursor: next as u64,
            end_of_directory: next >= children.len(),
        })
    }

    fn get_user_attrs(&self, path: &str, keys: &[&str]) -> BackendResult<Vec<String>> {
        let ns = self.begin(BackendOp::GetAttrs)?;
        let node = ns.node(path, true)?;
        keys.iter()
            .map(|key| node.attrs.get(*key).cloned().ok_or(Errno::ENOENT))
            .collect()
    }

    fn set_user_attrs(&self, path: &str, attrs: &[(&str, &str)]) -> BackendResult<()> {
        let mut ns = self.begin(BackendOp::SetAttrs)?;
        let key = ns.resolve(path, true)?;
        let node = ns.nodes.get_mut(&key).ok_or(Errno::ENOENT)?;
        for (name, value) in attrs {
            node.attrs.insert((*name).to_string(), (*value).to_string());
        }
        Ok(())
    }
}
