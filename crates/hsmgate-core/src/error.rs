//! Error types for hsmgate.
//!
//! Errors are grouped the way the transfer server reports them: an error code
//! plus a human-readable message. Backend failures keep the native code of the
//! failing call so callers can distinguish "not found" from other failures.
//!
//! # Error Categories
//!
//! - **Resource**: allocation of a thread, timer or similar resource failed
//! - **System**: a storage backend call failed with a native error code
//! - **Digest**: the digest library rejected an init/update/final step
//! - **NotFound**: a lookup found no such object
//! - **Generic**: protocol conditions without a natural backend code
//!
//! No operation in this workspace retries; retry policy belongs to the caller.

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Native error code reported by a storage backend call.
///
/// Values are POSIX errno numbers (always positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    /// No such file, directory or attribute
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    /// Generic I/O failure
    pub const EIO: Errno = Errno(libc::EIO);
    /// Bad file or object handle
    pub const EBADF: Errno = Errno(libc::EBADF);
    /// Object already exists
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    /// A path component is not a directory
    pub const ENOTDIR: Errno = Errno(libc::ENOTDIR);
    /// Object is a directory
    pub const EISDIR: Errno = Errno(libc::EISDIR);
    /// Invalid argument
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    /// Too many levels of symbolic links
    pub const ELOOP: Errno = Errno(libc::ELOOP);
    /// Permission denied
    pub const EACCES: Errno = Errno(libc::EACCES);

    /// Raw errno value
    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0))
    }
}

impl From<std::io::Error> for Errno {
    fn from(err: std::io::Error) -> Self {
        Errno(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

/// Result of a raw storage backend call
pub type BackendResult<T> = std::result::Result<T, Errno>;

/// Errors reported by the checksum and stat operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Allocation of a thread, timer or other resource failed
    #[error("resource allocation failed: {0}")]
    Resource(Cow<'static, str>),

    /// A storage backend call failed
    #[error("{op} failed: {}", errno_message(*.code))]
    System {
        /// Name of the failing backend operation
        op: &'static str,
        /// Native error code
        code: i32,
    },

    /// Digest library failure
    #[error("digest error: {0}")]
    Digest(Cow<'static, str>),

    /// Object does not exist
    #[error("no such object: {path}")]
    NotFound {
        /// Path that failed to resolve
        path: String,
    },

    /// Condition with no natural backend code
    #[error("{0}")]
    Generic(Cow<'static, str>),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(Cow<'static, str>),
}

fn errno_message(code: i32) -> std::io::Error {
    std::io::Error::from_raw_os_error(code)
}

impl Error {
    /// Wrap a backend failure with the name of the failing operation
    #[must_use]
    pub const fn system(op: &'static str, errno: Errno) -> Self {
        Error::System { op, code: errno.0 }
    }

    /// Create a generic error with static context (zero allocation)
    #[must_use]
    pub const fn generic(context: &'static str) -> Self {
        Error::Generic(Cow::Borrowed(context))
    }

    /// Create a digest error with static context (zero allocation)
    #[must_use]
    pub const fn digest(context: &'static str) -> Self {
        Error::Digest(Cow::Borrowed(context))
    }

    /// Create a resource error with static context (zero allocation)
    #[must_use]
    pub const fn resource(context: &'static str) -> Self {
        Error::Resource(Cow::Borrowed(context))
    }

    /// Create a configuration error with static context (zero allocation)
    #[must_use]
    pub const fn config(context: &'static str) -> Self {
        Error::Config(Cow::Borrowed(context))
    }

    /// Create a lookup error for `path`
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Native error code reported alongside the message.
    ///
    /// `NotFound` maps to `ENOENT`; errors without a backend code report 0.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Error::System { code, .. } => *code,
            Error::NotFound { .. } => libc::ENOENT,
            _ => 0,
        }
    }

    /// Returns true for lookup failures, including `ENOENT` system errors
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::System { code, .. } => *code == libc::ENOENT,
            _ => false,
        }
    }
}

/// Result type for hsmgate operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_error_display() {
        let err = Error::system("open_read", Errno::ENOENT);
        let msg = err.to_string();
        assert!(msg.starts_with("open_read failed: "));
        assert!(msg.contains("No such file"));
        assert_eq!(err.code(), libc::ENOENT);
    }

    #[test]
    fn test_not_found() {
        let err = Error::not_found("/archive/missing");
        assert!(err.is_not_found());
        assert_eq!(err.code(), libc::ENOENT);
        assert!(err.to_string().contains("/archive/missing"));

        assert!(Error::system("stat", Errno::ENOENT).is_not_found());
        assert!(!Error::system("stat", Errno::EIO).is_not_found());
    }

    #[test]
    fn test_codes_without_backend() {
        assert_eq!(Error::generic("Restarts are not supported").code(), 0);
        assert_eq!(Error::digest("update failed").code(), 0);
        assert_eq!(Error::resource("timer").code(), 0);
    }

    #[test]
    fn test_convenience_constructors() {
        assert!(matches!(Error::generic("x"), Error::Generic(_)));
        assert!(matches!(Error::digest("x"), Error::Digest(_)));
        assert!(matches!(Error::resource("x"), Error::Resource(_)));
        assert!(matches!(Error::config("x"), Error::Config(_)));
    }

    #[test]
    fn test_errno_from_io_error() {
        let io_err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(Errno::from(io_err), Errno::EACCES);

        let custom = std::io::Error::other("no code");
        assert_eq!(Errno::from(custom), Errno::EIO);
    }
}
