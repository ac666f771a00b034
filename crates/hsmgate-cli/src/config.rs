//! Configuration system for the hsmgate CLI.

use hsmgate_core::{
    ChecksumAlgorithm, ChecksumConfig, DEFAULT_APP_TAG, DEFAULT_BLOCK_SIZE, DEFAULT_PAGE_SIZE,
    MAX_STRIPE_WIDTH, StatConfig,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// hsmgate configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Storage backend configuration
    #[serde(default)]
    pub backend: BackendConfig,
    /// Checksum configuration
    #[serde(default)]
    pub checksum: ChecksumSection,
    /// Transfer configuration
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Stat configuration
    #[serde(default)]
    pub stat: StatSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Directory served as the archive root
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Stripe width reported for opened files
    #[serde(default = "default_stripe_width")]
    pub stripe_width: u32,
}

/// Checksum configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumSection {
    /// Store and reuse checksums in user attributes
    #[serde(default = "default_true")]
    pub uda_checksum_support: bool,
    /// Digest algorithm
    #[serde(default)]
    pub algorithm: ChecksumAlgorithm,
    /// Producer tag stored with checksums
    #[serde(default = "default_app_tag")]
    pub app_tag: String,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Block size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Seconds between progress markers (0 disables)
    #[serde(default = "default_marker_interval")]
    pub marker_interval_secs: u64,
}

/// Stat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatSection {
    /// Directory entries per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_stripe_width() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_app_tag() -> String {
    DEFAULT_APP_TAG.to_string()
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_marker_interval() -> u64 {
    5
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            stripe_width: default_stripe_width(),
        }
    }
}

impl Default for ChecksumSection {
    fn default() -> Self {
        Self {
            uda_checksum_support: true,
            algorithm: ChecksumAlgorithm::default(),
            app_tag: default_app_tag(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            marker_interval_secs: default_marker_interval(),
        }
    }
}

impl Default for StatSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("hsmgate/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Checksum pipeline settings
    #[must_use]
    pub fn checksum_config(&self) -> ChecksumConfig {
        ChecksumConfig {
            uda_checksum_support: self.checksum.uda_checksum_support,
            algorithm: self.checksum.algorithm,
            app_tag: self.checksum.app_tag.clone(),
            marker_interval: Duration::from_secs(self.transfer.marker_interval_secs),
        }
    }

    /// Stat settings
    #[must_use]
    pub fn stat_config(&self) -> StatConfig {
        StatConfig {
            page_size: self.stat.page_size,
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend.stripe_width == 0 || self.backend.stripe_width > MAX_STRIPE_WIDTH {
            anyhow::bail!("Stripe width must be between 1 and {}", MAX_STRIPE_WIDTH);
        }

        // Same upper bound the transfer layer negotiates
        if self.transfer.block_size == 0 || self.transfer.block_size > 64 * 1024 * 1024 {
            anyhow::bail!("Block size must be between 1 byte and 64MB");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        self.checksum_config().validate()?;
        self.stat_config().validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend.stripe_width, 4);
        assert_eq!(config.checksum.app_tag, "GridFTP");
        assert_eq!(config.transfer.block_size, 256 * 1024);
        assert_eq!(config.stat.page_size, 256);
        assert!(config.checksum.uda_checksum_support);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.backend.stripe_width = MAX_STRIPE_WIDTH + 1;
        assert!(config.validate().is_err());
        config.backend.stripe_width = MAX_STRIPE_WIDTH;
        assert!(config.validate().is_ok());

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.transfer.block_size = 0;
        assert!(config.validate().is_err());

        config.transfer.block_size = 4096;
        config.stat.page_size = 0;
        assert!(config.validate().is_err());

        config.stat.page_size = 16;
        config.checksum.app_tag = "two words".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [checksum]
            algorithm = "blake3"

            [transfer]
            marker_interval_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.checksum.algorithm, ChecksumAlgorithm::Blake3);
        assert_eq!(config.checksum.app_tag, "GridFTP");
        assert_eq!(config.transfer.block_size, DEFAULT_BLOCK_SIZE);

        let checksum = config.checksum_config();
        assert!(checksum.marker_interval.is_zero());
        assert_eq!(checksum.algorithm, ChecksumAlgorithm::Blake3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.backend.root = PathBuf::from("/srv/archive");
        config.stat.page_size = 32;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.backend.root, PathBuf::from("/srv/archive"));
        assert_eq!(loaded.stat_config().page_size, 32);
    }
}
