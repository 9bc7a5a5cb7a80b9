use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hashbackup_core::digest::DigestAlgorithm;
use hashbackup_core::notify::Notifier;
use hashbackup_core::pipeline::{DEFAULT_CHUNK_SIZE, DEFAULT_QUEUE_CAPACITY};
use hashbackup_core::sync::{SyncConfig, SyncEngine};

const MAX_CHUNK_SIZE: u64 = 1 << 30;
const MAX_QUEUE: i64 = 4096;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DigestArg { Sha1, Blake3 }

impl From<DigestArg> for DigestAlgorithm {
    fn from(d: DigestArg) -> Self {
        match d {
            DigestArg::Sha1 => DigestAlgorithm::Sha1,
            DigestArg::Blake3 => DigestAlgorithm::Blake3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "hashbackup",
    version,
    about = "Back up a directory into another, tracking files by content digest",
    override_usage = "hashbackup [-[a|s]dq | -h] source destination"
)]
struct Cli {
    /// Append mode: copy new files only (default)
    #[arg(short = 'a')] append: bool,
    /// Synchronize mode: re-hash files already backed up and recopy changed ones
    #[arg(short = 's')] sync: bool,
    /// Delete destination files missing from source
    #[arg(short = 'd')] delete: bool,
    /// Quiet mode, no output
    #[arg(short = 'q')] quiet: bool,
    /// Digest algorithm; selects the manifest file (.sha1 or .blake3)
    #[arg(long, value_enum, default_value_t = DigestArg::Sha1)] digest: DigestArg,
    /// Bytes per hashed chunk, at most 1 GiB
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE as u64, value_parser = clap::value_parser!(u64).range(1..=MAX_CHUNK_SIZE))]
    chunk_size: u64,
    /// Chunks allowed in flight
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY as u32, value_parser = clap::value_parser!(u32).range(1..=MAX_QUEUE))]
    queue: u32,
    /// Hash worker threads [default: number of CPUs]
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=4096))]
    workers: Option<u32>,
    source: PathBuf,
    destination: PathBuf,
}

impl Cli {
    fn into_config(self) -> SyncConfig {
        let mut cfg = SyncConfig::new(self.source, self.destination);
        cfg.sync = self.sync;
        cfg.delete = self.delete;
        cfg.quiet = self.quiet;
        cfg.algorithm = self.digest.into();
        cfg.chunk_size = self.chunk_size as usize;
        cfg.queue_capacity = self.queue as usize;
        if let Some(w) = self.workers {
            cfg.workers = w as usize;
        }
        cfg
    }
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // Zero or one argument: show usage and succeed.
        Err(e)
            if std::env::args_os().len() <= 2
                && !matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
        {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
        Err(e) => e.exit(),
    };
    init_logging(cli.quiet);
    debug!(append = cli.append, sync = cli.sync, delete = cli.delete, "mode");

    let cfg = cli.into_config();
    let (source, destination) = (cfg.source.clone(), cfg.destination.clone());
    let mut notifier = Notifier::new(std::io::stdout().lock(), cfg.quiet);
    let report = SyncEngine::new(cfg)
        .run(&mut notifier)
        .with_context(|| format!("backup {} -> {}", source.display(), destination.display()))?;
    info!(
        "done: {} new, {} modified, {} removed, {} copied, {} skipped",
        report.new, report.modified, report.removed, report.copied, report.skipped
    );
    Ok(())
}

/// Log to stderr so stdout carries only progress lines. `RUST_LOG` overrides.
fn init_logging(quiet: bool) {
    let default = if quiet { "error" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
