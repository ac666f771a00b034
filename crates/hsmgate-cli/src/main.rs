//! hsmgate CLI
//!
//! Checksum and stat operations over a local archive tree

mod config;
mod progress;

use clap::{Parser, Subcommand};
use hsmgate_core::{Error, LocalBackend, Operation, ProtocolStat, StorageBackend};
use hsmgate_files::{ChecksumPipeline, ChecksumRequest};
use hsmgate_stat::StatService;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use config::Config;
use progress::{ChecksumProgress, format_bytes};

/// hsmgate - checksums and listings for hierarchical storage
#[derive(Parser)]
#[command(name = "hsmgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Archive root, overriding the configured one
    #[arg(short, long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute or retrieve a file checksum
    Cksum {
        /// Path below the archive root
        #[arg(required = true)]
        path: String,

        /// First byte of the range
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Range length; -1 reads to the end of the file
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        length: i64,

        /// Show the stored checksum record instead of computing
        #[arg(long)]
        show: bool,
    },

    /// Invalidate a stored checksum
    ClearCksum {
        /// Path below the archive root
        #[arg(required = true)]
        path: String,
    },

    /// Stat an object, listing directories
    Stat {
        /// Path below the archive root
        #[arg(required = true)]
        path: String,

        /// Report a directory itself rather than its entries
        #[arg(long)]
        file_only: bool,
    },

    /// List a directory page by page
    Ls {
        /// Directory below the archive root
        #[arg(default_value = "/")]
        path: String,
    },
}

/// Operation printing results to the terminal
struct ConsoleOperation {
    path: String,
    block_size: usize,
    progress: ChecksumProgress,
    failure: Mutex<Option<Error>>,
}

impl ConsoleOperation {
    fn new(path: &str, block_size: usize, progress: ChecksumProgress) -> Self {
        Self {
            path: path.to_string(),
            block_size,
            progress,
            failure: Mutex::new(None),
        }
    }

    fn fail(&self, err: &Error) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.clone());
    }

    fn take_failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Operation for ConsoleOperation {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn intermediate(&self, message: &str) {
        tracing::debug!(path = %self.path, bytes = message, "progress marker");
        self.progress.marker(message);
    }

    fn finished_command(&self, result: hsmgate_core::Result<&str>) {
        match result {
            Ok(hex) => {
                self.progress.finish_with_message(format!("Checksummed: {}", self.path));
                println!("{hex}  {}", self.path);
            }
            Err(err) => {
                self.progress.abandon();
                self.fail(&err);
            }
        }
    }

    fn partial_stat(&self, records: &[ProtocolStat]) {
        print_records(records);
    }

    fn finished_stat(&self, result: hsmgate_core::Result<&[ProtocolStat]>) {
        match result {
            Ok(records) => print_records(records),
            Err(err) => self.fail(&err),
        }
    }
}

fn print_records(records: &[ProtocolStat]) {
    for record in records {
        let mut line = format!(
            "{} {:>3} {:>5} {:>5} {:>12} {:>11} {}",
            record.mode_string(),
            record.nlink,
            record.uid,
            record.gid,
            record.size,
            record.mtime,
            record.name
        );
        if let Some(target) = &record.symlink_target {
            line.push_str(" -> ");
            line.push_str(target);
        }
        println!("{line}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(root) = cli.root {
        config.backend.root = root;
    }

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt().with_env_filter(level).init();

    // Validate configuration
    config.validate()?;

    let backend = Arc::new(LocalBackend::new(
        config.backend.root.clone(),
        config.backend.stripe_width,
    ));
    tracing::debug!(root = %backend.root().display(), "serving archive");

    match cli.command {
        Commands::Cksum {
            path,
            offset,
            length,
            show,
        } => {
            if show {
                show_checksum(backend, &path, &config).await?;
            } else {
                checksum(backend, &path, offset, length, &config).await?;
            }
        }
        Commands::ClearCksum { path } => {
            let pipeline = ChecksumPipeline::new(backend, config.checksum_config());
            pipeline.clear(&path).await?;
            println!("Invalidated stored checksum: {path}");
        }
        Commands::Stat { path, file_only } => {
            stat(backend, &path, file_only, &config)?;
        }
        Commands::Ls { path } => {
            list(backend, &path, &config)?;
        }
    }

    Ok(())
}

/// Compute a checksum, showing progress for whole files
async fn checksum(
    backend: Arc<LocalBackend>,
    path: &str,
    offset: u64,
    length: i64,
    config: &Config,
) -> anyhow::Result<()> {
    let request = ChecksumRequest::from_protocol(path, offset, length);
    let total = match u64::try_from(length) {
        Ok(bytes) => bytes,
        Err(_) => backend
            .stat(path)
            .map(|stat| stat.size.saturating_sub(offset))
            .unwrap_or(0),
    };
    tracing::info!(path, offset, length, "checksum of {}", format_bytes(total));

    let progress = ChecksumProgress::new(total, path)?;
    let op = Arc::new(ConsoleOperation::new(
        path,
        config.transfer.block_size,
        progress,
    ));

    let pipeline = ChecksumPipeline::new(backend, config.checksum_config());
    let result = pipeline
        .command(request, Arc::clone(&op) as Arc<dyn Operation>)
        .await;

    if pipeline.faults().hits() > 0 {
        tracing::warn!(faults = pipeline.faults().hits(), "read workers faulted");
    }
    result?;
    Ok(())
}

/// Print the stored checksum record of `path`
async fn show_checksum(
    backend: Arc<LocalBackend>,
    path: &str,
    config: &Config,
) -> anyhow::Result<()> {
    let pipeline = ChecksumPipeline::new(backend, config.checksum_config());
    let store = pipeline.store().clone();
    let owned = path.to_string();
    let record = tokio::task::spawn_blocking(move || store.read_record(&owned)).await??;

    match record {
        Some(record) => {
            println!("Path: {path}");
            println!("Algorithm: {}", record.algorithm);
            println!("Checksum: {}", record.checksum);
            println!("State: {}", record.state.as_str());
            println!("Last update: {}", record.last_update);
            println!("Errors: {}", record.errors);
            println!("Application: {}", record.app);
            println!("File size: {}", format_bytes(record.file_size));
        }
        None => println!("No stored checksum for {path}"),
    }
    Ok(())
}

/// Serve a stat request the way the transfer server would
fn stat(
    backend: Arc<LocalBackend>,
    path: &str,
    file_only: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let service = StatService::new(backend, config.stat_config());
    let op = ConsoleOperation::new(
        path,
        config.transfer.block_size,
        ChecksumProgress::hidden(),
    );

    service.stat(&op, path, file_only);

    match op.take_failure() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// List a directory one page at a time
fn list(backend: Arc<LocalBackend>, path: &str, config: &Config) -> anyhow::Result<()> {
    let service = StatService::new(backend, config.stat_config());
    let lister = service.list(path)?;
    tracing::debug!(path, entries = lister.entry_count(), "listing");

    let mut pages = 0usize;
    let mut entries = 0usize;
    for page in lister {
        let page = page?;
        pages += 1;
        entries += page.entries.len();
        print_records(&page.entries);
    }

    println!();
    println!("{entries} entries in {pages} page(s)");
    Ok(())
}
