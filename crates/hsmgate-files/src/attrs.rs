//! Stored checksums in user-defined attributes.
//!
//! A completed whole-file checksum is persisted as seven attributes under
//! `/hpss/user/cksum/` so later requests can be answered without reading the
//! data. Modifying a file invalidates the stored value by flipping `state`.

use hsmgate_core::{ChecksumConfig, Errno, Error, Result, StorageBackend};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Attribute key of the algorithm name
pub const KEY_ALGORITHM: &str = "/hpss/user/cksum/algorithm";
/// Attribute key of the hex digest
pub const KEY_CHECKSUM: &str = "/hpss/user/cksum/checksum";
/// Attribute key of the last update time (epoch seconds)
pub const KEY_LAST_UPDATE: &str = "/hpss/user/cksum/lastupdate";
/// Attribute key of the error count
pub const KEY_ERRORS: &str = "/hpss/user/cksum/errors";
/// Attribute key of the validity state
pub const KEY_STATE: &str = "/hpss/user/cksum/state";
/// Attribute key of the producer tag
pub const KEY_APP: &str = "/hpss/user/cksum/app";
/// Attribute key of the file size at computation time
pub const KEY_FILE_SIZE: &str = "/hpss/user/cksum/filesize";

/// Validity of a stored checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumState {
    /// The digest matches the file contents
    Valid,
    /// The file changed after the digest was stored
    Invalid,
}

impl ChecksumState {
    /// Attribute value for this state
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ChecksumState::Valid => "Valid",
            ChecksumState::Invalid => "Invalid",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "Valid" => Some(ChecksumState::Valid),
            "Invalid" => Some(ChecksumState::Invalid),
            _ => None,
        }
    }
}

/// All seven stored attributes of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChecksum {
    /// Algorithm name
    pub algorithm: String,
    /// Lowercase hex digest
    pub checksum: String,
    /// Time of the last update, seconds since the epoch
    pub last_update: i64,
    /// Error count
    pub errors: u64,
    /// Validity state
    pub state: ChecksumState,
    /// Producer tag
    pub app: String,
    /// File size when the digest was computed
    pub file_size: u64,
}

/// Reads and writes stored checksums through a [`StorageBackend`]
#[derive(Debug)]
pub struct AttributeStore<B> {
    backend: Arc<B>,
    enabled: bool,
    algorithm: &'static str,
    app_tag: String,
}

impl<B> Clone for AttributeStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            enabled: self.enabled,
            algorithm: self.algorithm,
            app_tag: self.app_tag.clone(),
        }
    }
}

impl<B: StorageBackend> AttributeStore<B> {
    /// Create a store using the algorithm, producer tag and feature switch
    /// from `config`
    pub fn new(backend: Arc<B>, config: &ChecksumConfig) -> Self {
        Self {
            backend,
            enabled: config.uda_checksum_support,
            algorithm: config.algorithm.name(),
            app_tag: config.app_tag.clone(),
        }
    }

    /// True if stored checksums are read and written at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Persist `checksum` as a valid digest of a `file_size` byte object.
    ///
    /// All seven attributes are written in a single backend call. The state
    /// is set to `Invalid` before any other field and back to `Valid` after
    /// all of them, so an update that stops part way reads as absent.
    ///
    /// # Errors
    ///
    /// Returns a `System` error if the backend rejects the update.
    pub fn write_checksum(&self, path: &str, checksum: &str, file_size: u64) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .to_string();
        let size = file_size.to_string();
        let attrs = [
            (KEY_STATE, ChecksumState::Invalid.as_str()),
            (KEY_ALGORITHM, self.algorithm),
            (KEY_CHECKSUM, checksum),
            (KEY_LAST_UPDATE, now.as_str()),
            (KEY_ERRORS, "0"),
            (KEY_APP, self.app_tag.as_str()),
            (KEY_FILE_SIZE, size.as_str()),
            (KEY_STATE, ChecksumState::Valid.as_str()),
        ];
        self.backend
            .set_user_attrs(path, &attrs)
            .map_err(|errno| Error::system("set_user_attrs", errno))?;
        tracing::debug!(path, checksum, file_size, "stored checksum");
        Ok(())
    }

    /// Look up a valid stored digest for `path`.
    ///
    /// Returns `None` when no checksum was stored, when it was stored with a
    /// different algorithm, when it is not `Valid`, or when it is empty.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist and `System` for any
    /// other backend failure.
    pub fn read_checksum(&self, path: &str) -> Result<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }
        self.check_exists(path)?;

        let values = match self
            .backend
            .get_user_attrs(path, &[KEY_ALGORITHM, KEY_CHECKSUM, KEY_STATE])
        {
            Ok(values) => values,
            Err(Errno::ENOENT) => return Ok(None),
            Err(errno) => return Err(Error::system("get_user_attrs", errno)),
        };
        let [algorithm, checksum, state] = <[String; 3]>::try_from(values)
            .map_err(|_| Error::generic("attribute count mismatch"))?;

        if algorithm != self.algorithm
            || state != ChecksumState::Valid.as_str()
            || checksum.is_empty()
        {
            return Ok(None);
        }
        Ok(Some(checksum))
    }

    /// Read every stored attribute of `path`, whatever its state.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist, `System` for backend
    /// failures, and `Generic` if a numeric or state field cannot be parsed.
    pub fn read_record(&self, path: &str) -> Result<Option<StoredChecksum>> {
        if !self.enabled {
            return Ok(None);
        }
        self.check_exists(path)?;

        let keys = [
            KEY_ALGORITHM,
            KEY_CHECKSUM,
            KEY_LAST_UPDATE,
            KEY_ERRORS,
            KEY_STATE,
            KEY_APP,
            KEY_FILE_SIZE,
        ];
        let values = match self.backend.get_user_attrs(path, &keys) {
            Ok(values) => values,
            Err(Errno::ENOENT) => return Ok(None),
            Err(errno) => return Err(Error::system("get_user_attrs", errno)),
        };
        let [algorithm, checksum, last_update, errors, state, app, file_size] =
            <[String; 7]>::try_from(values)
                .map_err(|_| Error::generic("attribute count mismatch"))?;

        Ok(Some(StoredChecksum {
            algorithm,
            checksum,
            last_update: last_update
                .parse()
                .map_err(|_| Error::generic("malformed lastupdate attribute"))?,
            errors: errors
                .parse()
                .map_err(|_| Error::generic("malformed errors attribute"))?,
            state: ChecksumState::parse(&state)
                .ok_or(Error::generic("malformed state attribute"))?,
            app,
            file_size: file_size
                .parse()
                .map_err(|_| Error::generic("malformed filesize attribute"))?,
        }))
    }

    /// Mark the stored digest of `path` as `Invalid`.
    ///
    /// Succeeds when the object carries no checksum attributes at all.
    ///
    /// # Errors
    ///
    /// Returns a `System` error for any backend failure other than `ENOENT`.
    pub fn invalidate(&self, path: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        match self
            .backend
            .set_user_attrs(path, &[(KEY_STATE, ChecksumState::Invalid.as_str())])
        {
            Ok(()) | Err(Errno::ENOENT) => Ok(()),
            Err(errno) => Err(Error::system("set_user_attrs", errno)),
        }
    }

    fn check_exists(&self, path: &str) -> Result<()> {
        match self.backend.lstat(path) {
            Ok(_) => Ok(()),
            Err(Errno::ENOENT) => Err(Error::not_found(path)),
            Err(errno) => Err(Error::system("lstat", errno)),
        }
    }
}
