//! Protocol stat record delivered to the transfer server.

use crate::backend::{NativeStat, mode};

/// Normalized stat record handed to the protocol layer.
///
/// Records are meant to be reused: the stat translator overwrites a
/// caller-supplied record in place, keeping the capacity of `name` between
/// calls. Link text is only reused while the record keeps describing links;
/// `reset` drops it so a non-link record never carries a stale target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolStat {
    /// Base name of the object (for links: the link's own name)
    pub name: String,
    /// Link text, present only for symbolic links
    pub symlink_target: Option<String>,
    /// Type and permission bits
    pub mode: u32,
    /// Hard link count
    pub nlink: u32,
    /// Owner id
    pub uid: u32,
    /// Group id
    pub gid: u32,
    /// Device id; always 0 for this backend
    pub dev: u64,
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

impl ProtocolStat {
    /// Reset every field, keeping the capacity of `name`.
    ///
    /// The link text is released, not cleared.
    pub fn reset(&mut self) {
        self.name.clear();
        self.symlink_target = None;
        self.mode = 0;
        self.nlink = 0;
        self.uid = 0;
        self.gid = 0;
        self.dev = 0;
        self.atime = 0;
        self.mtime = 0;
        self.ctime = 0;
        self.ino = 0;
        self.size = 0;
    }

    /// Copy the numeric fields of a native stat record; `dev` is forced to 0
    pub fn copy_native(&mut self, native: &NativeStat) {
        self.mode = native.mode;
        self.nlink = native.nlink;
        self.uid = native.uid;
        self.gid = native.gid;
        self.dev = 0;
        self.atime = native.atime;
        self.mtime = native.mtime;
        self.ctime = native.ctime;
        self.ino = native.ino;
        self.size = native.size;
    }

    /// Replace the name, reusing the existing allocation
    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.push_str(name);
    }

    /// Attach a link target, reusing the existing allocation if the record
    /// already carries one
    pub fn set_symlink_target(&mut self, target: &str) {
        match self.symlink_target.as_mut() {
            Some(existing) => {
                existing.clear();
                existing.push_str(target);
            }
            None => self.symlink_target = Some(target.to_string()),
        }
    }

    /// True if the record describes a symbolic link
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        mode::is_link(self.mode)
    }

    /// True if the record describes a directory
    #[must_use]
    pub fn is_dir(&self) -> bool {
        mode::is_dir(self.mode)
    }

    /// `ls -l` style type and permission string, e.g. `drwxr-xr-x`
    #[must_use]
    pub fn mode_string(&self) -> String {
        let kind = match mode::file_type(self.mode) {
            mode::S_IFDIR => 'd',
            mode::S_IFLNK => 'l',
            mode::S_IFREG => '-',
            _ => '?',
        };
        let mut out = String::with_capacity(10);
        out.push(kind);
        for shift in [6u32, 3, 0] {
            let bits = (self.mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }
}

/// Base name of `path`: the text after the last `/`, or the whole path
#[must_use]
pub fn base_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/archive/a.dat"), "a.dat");
        assert_eq!(base_name("a.dat"), "a.dat");
        assert_eq!(base_name("/archive/dir/"), "");
        assert_eq!(base_name("/"), "");
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut record = ProtocolStat::default();
        record.set_name("a-rather-long-file-name.dat");
        record.set_symlink_target("/archive/target");
        record.size = 42;
        let capacity = record.name.capacity();

        record.reset();

        assert!(record.name.is_empty());
        assert_eq!(record.name.capacity(), capacity);
        assert!(record.symlink_target.is_none());
        assert_eq!(record.size, 0);
    }

    #[test]
    fn test_link_text_reused_until_reset() {
        let mut record = ProtocolStat::default();
        record.set_symlink_target("/archive/a-long-link-target.dat");
        let capacity = record.symlink_target.as_ref().map(String::capacity);

        record.set_symlink_target("short");
        assert_eq!(record.symlink_target.as_deref(), Some("short"));
        assert_eq!(record.symlink_target.as_ref().map(String::capacity), capacity);

        record.reset();
        assert!(record.symlink_target.is_none());
        record.set_symlink_target("again");
        assert_eq!(record.symlink_target.as_deref(), Some("again"));
    }

    #[test]
    fn test_copy_native_zeroes_dev() {
        let native = NativeStat {
            mode: mode::S_IFREG | 0o644,
            nlink: 1,
            uid: 100,
            gid: 200,
            atime: 1,
            mtime: 2,
            ctime: 3,
            ino: 77,
            size: 4096,
        };
        let mut record = ProtocolStat {
            dev: 9,
            ..Default::default()
        };
        record.copy_native(&native);

        assert_eq!(record.dev, 0);
        assert_eq!(record.mode, native.mode);
        assert_eq!(record.ino, 77);
        assert_eq!(record.size, 4096);
    }

    #[test]
    fn test_mode_string() {
        let record = ProtocolStat {
            mode: mode::S_IFDIR | 0o755,
            ..Default::default()
        };
        assert_eq!(record.mode_string(), "drwxr-xr-x");

        let record = ProtocolStat {
            mode: mode::S_IFLNK | 0o640,
            ..Default::default()
        };
        assert_eq!(record.mode_string(), "lrw-r-----");
    }
}
