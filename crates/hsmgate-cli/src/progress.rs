//! Checksum progress display.

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar fed by byte-count markers
pub struct ChecksumProgress {
    bar: ProgressBar,
}

impl ChecksumProgress {
    /// Create a tracker for `total_bytes` of `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the bar template is rejected.
    pub fn new(total_bytes: u64, path: &str) -> anyhow::Result<Self> {
        let bar = ProgressBar::new(total_bytes);

        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")?
                .progress_chars("#>-"),
        );
        bar.set_message(format!("Checksumming: {path}"));

        Ok(Self { bar })
    }

    /// Hidden tracker for non-interactive use
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Apply one marker message; anything but a decimal count is ignored
    pub fn marker(&self, message: &str) {
        if let Ok(bytes) = message.trim().parse::<u64>() {
            self.bar.set_position(bytes);
        }
    }

    /// Bytes reported so far
    #[must_use]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}
