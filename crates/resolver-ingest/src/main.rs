//! populate-resolver binary.
//!
//! Reads `resolver.toml` (or the path specified with `--config`), opens the
//! SQLite store, and runs one ingestion over the configured catalog.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use resolver_ingest::{
  catalog::DirectoryCatalog,
  config::IngestConfig,
  context::RunContext,
  run::{RunMode, populate},
};
use resolver_store_sqlite::SqliteStore;
use tracing::{Instrument as _, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Populate the resolver from published Darwin Core archives")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "resolver.toml")]
  config: PathBuf,

  /// Rebuild the canonical table from scratch, discarding history.
  #[arg(long)]
  reset: bool,

  /// Skip ingestion and merge the existing accumulator. Use after a run
  /// failed while merging.
  #[arg(long)]
  skip_ingest: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let config = IngestConfig::load(&cli.config)
    .with_context(|| format!("failed to load configuration from {:?}", cli.config))?
    .with_expanded_paths();

  let store = SqliteStore::open(&config.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", config.store_path))?;
  let catalog = DirectoryCatalog::new(&config.catalog_dir);

  let mut ctx = RunContext::from_config(&config);
  let mode = RunMode { reset: cli.reset, skip_ingest: cli.skip_ingest };

  let span = tracing::info_span!("run", run_id = %ctx.run_id, today = %ctx.today);
  let summary = populate(&store, &catalog, &mut ctx, mode)
    .instrument(span)
    .await
    .context("run failed")?;

  tracing::info!(
    staged = summary.staged,
    processed = summary.processed,
    skipped = summary.skipped,
    failed = summary.failed,
    retired = summary.retired,
    total_count = summary.total_count,
    "finished! total count now set"
  );

  Ok(())
}
