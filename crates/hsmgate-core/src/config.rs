//! Runtime configuration for the checksum and stat operations

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default block size when the transport has not negotiated one (256 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Upper bound on concurrent block reads per round, whatever the backend
/// reports as its stripe width
pub const MAX_STRIPE_WIDTH: u32 = 64;

/// Default number of directory entries per stat page
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Default producer tag written with stored checksums
pub const DEFAULT_APP_TAG: &str = "GridFTP";

/// Digest algorithm used for checksums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// 128-bit MD5, the name the stored attribute schema expects
    #[default]
    Md5,
    /// BLAKE3 (256-bit)
    Blake3,
}

impl ChecksumAlgorithm {
    /// Name persisted in the `algorithm` attribute
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Blake3 => "blake3",
        }
    }

    /// Digest length in bytes
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            ChecksumAlgorithm::Md5 => 16,
            ChecksumAlgorithm::Blake3 => 32,
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "blake3" => Ok(ChecksumAlgorithm::Blake3),
            _ => Err(Error::Config(
                format!("unknown checksum algorithm: {s}").into(),
            )),
        }
    }
}

/// Checksum pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumConfig {
    /// Persist and reuse checksums as user attributes
    pub uda_checksum_support: bool,
    /// Digest algorithm
    pub algorithm: ChecksumAlgorithm,
    /// Producer tag written in the `app` attribute
    pub app_tag: String,
    /// Interval between progress markers; zero disables markers
    pub marker_interval: Duration,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            uda_checksum_support: true,
            algorithm: ChecksumAlgorithm::Md5,
            app_tag: DEFAULT_APP_TAG.to_string(),
            marker_interval: Duration::ZERO,
        }
    }
}

impl ChecksumConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the producer tag is empty or not a single token.
    pub fn validate(&self) -> Result<()> {
        if self.app_tag.is_empty() || self.app_tag.chars().any(char::is_whitespace) {
            return Err(Error::config("app tag must be a non-empty token"));
        }
        Ok(())
    }
}

/// Stat and directory listing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatConfig {
    /// Maximum directory entries per page
    pub page_size: usize,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StatConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the page size is zero or above 64Ki entries.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > 65_536 {
            return Err(Error::config("page size must be between 1 and 65536"));
        }
        Ok(())
    }
}
