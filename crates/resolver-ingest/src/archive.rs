//! The archive orchestrator: one dataset's bundle through the per-file
//! pipeline.
//!
//! The recognised entries are extracted to a temporary directory. The core
//! type is chosen among them, then every file in turn is loaded into staging,
//! normalized against the core's id column, and accumulated. Failures are
//! handled by their [`FailureScope`]:
//!
//! - `Encoding`: retry the load once as Latin-1, then skip the file;
//! - `File`: skip the file and continue with the archive;
//! - `Dataset`: discard whatever the dataset accumulated and stop.
//!
//! The staging relation is dropped after every file, whatever its outcome.
//! Duplicates reach the run's log only if the dataset is not aborted.

use std::{
  fs::File,
  io,
  path::{Path, PathBuf},
  sync::Arc,
};

use resolver_core::{
  error::{FailureScope, ScopedFailure as _},
  identifier::NormalizationPlan,
  record::{DuplicateSink, RecordType},
  store::{AccumulateReport, ResolverStore, SourceEncoding, StagingReport},
};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::{Result, context::RunContext, duplicates::PendingDuplicates};

/// What one archive contributed to the accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveReport {
  /// Non-duplicate records accumulated; zero if the dataset was aborted.
  pub staged:        u64,
  pub duplicates:    u64,
  pub files:         u32,
  pub skipped_files: u32,
  pub aborted:       bool,
}

// ─── Extraction ──────────────────────────────────────────────────────────────

/// A recognised archive entry written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
  pub record_type: RecordType,
  pub path:        PathBuf,
}

/// Extract the recognised entries of `archive` into `into`, ordered by
/// record type (event, occurrence, taxon, measurement or fact).
pub fn extract(archive: &Path, into: &Path) -> Result<Vec<ArchiveEntry>> {
  let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
  let mut entries = Vec::new();

  for idx in 0..zip.len() {
    let mut file = zip.by_index(idx)?;
    let Some(record_type) = RecordType::from_archive_entry(file.name()) else {
      continue;
    };
    let path = into.join(file.name());
    let mut out = File::create(&path)?;
    io::copy(&mut file, &mut out)?;
    entries.push(ArchiveEntry { record_type, path });
  }

  entries.sort_by_key(|e| e.record_type);
  Ok(entries)
}

// ─── Orchestration ───────────────────────────────────────────────────────────

/// Stage every recognised file of one dataset's archive.
///
/// Never fails: an aborted dataset is logged, its accumulated rows are
/// discarded, and the report says so.
pub async fn ingest_archive<S: ResolverStore>(
  store: &S,
  archive: PathBuf,
  dataset_id: &str,
  ctx: &RunContext,
) -> ArchiveReport {
  let dir = match TempDir::new() {
    Ok(dir) => dir,
    Err(err) => {
      error!(dataset_id, %err, "could not create extraction directory");
      return ArchiveReport { aborted: true, ..ArchiveReport::default() };
    }
  };

  let target = dir.path().to_path_buf();
  let source = archive.clone();
  let entries = match tokio::task::spawn_blocking(move || extract(&source, &target)).await {
    Ok(Ok(entries)) => entries,
    Ok(Err(err)) => {
      error!(dataset_id, archive = %archive.display(), %err, "unreadable archive");
      return ArchiveReport { aborted: true, ..ArchiveReport::default() };
    }
    Err(err) => {
      error!(dataset_id, %err, "archive extraction panicked");
      return ArchiveReport { aborted: true, ..ArchiveReport::default() };
    }
  };

  let present: Vec<RecordType> = entries.iter().map(|e| e.record_type).collect();
  let core = RecordType::core_of(&present);
  debug!(dataset_id, ?present, ?core, "extracted archive");

  let pending = Arc::new(PendingDuplicates::default());
  let mut report = ArchiveReport::default();
  for entry in &entries {
    report.files += 1;
    let file = entry.record_type.as_str();

    let outcome = stage_file(store, entry, core, dataset_id, pending.clone()).await;
    if let Err(err) = store.drop_staging().await {
      warn!(dataset_id, file, %err, "could not drop staging relation");
    }

    match outcome {
      Ok(accumulated) => {
        debug!(
          dataset_id,
          file,
          inserted = accumulated.inserted,
          duplicates = accumulated.duplicates,
          missing_id = accumulated.missing_id,
          "accumulated file"
        );
        report.staged += accumulated.inserted;
        report.duplicates += accumulated.duplicates;
      }
      Err(err) if err.scope() == FailureScope::Dataset => {
        error!(dataset_id, file, %err, "aborting dataset");
        let dropped = pending.discard();
        debug!(dataset_id, dropped, "dropped duplicates of aborted dataset");
        return abort(store, dataset_id, report).await;
      }
      Err(err) => {
        warn!(dataset_id, file, %err, "skipping file");
        report.skipped_files += 1;
      }
    }
  }

  if let Err(err) = pending.release(ctx.duplicates.as_ref()) {
    warn!(dataset_id, %err, "could not write duplicate log");
  }

  info!(
    dataset_id,
    staged = report.staged,
    duplicates = report.duplicates,
    skipped_files = report.skipped_files,
    "staged archive"
  );
  report
}

async fn abort<S: ResolverStore>(
  store: &S,
  dataset_id: &str,
  report: ArchiveReport,
) -> ArchiveReport {
  match store.discard_dataset(dataset_id.to_owned()).await {
    Ok(discarded) => debug!(dataset_id, discarded, "discarded accumulated rows"),
    Err(err) => error!(dataset_id, %err, "could not discard accumulated rows"),
  }
  ArchiveReport {
    staged: 0,
    aborted: true,
    ..report
  }
}

/// Load, normalize and accumulate one file.
async fn stage_file<S: ResolverStore>(
  store: &S,
  entry: &ArchiveEntry,
  core: Option<RecordType>,
  dataset_id: &str,
  sink: Arc<dyn DuplicateSink>,
) -> Result<AccumulateReport, S::Error> {
  let Some(plan) = NormalizationPlan::new(entry.record_type, core) else {
    return Ok(AccumulateReport::default());
  };

  let loaded = load_with_fallback(store, &entry.path).await?;
  debug!(
    dataset_id,
    file = entry.record_type.as_str(),
    rows = loaded.rows,
    skipped = loaded.skipped,
    "staged file"
  );

  store.normalize_staging(plan).await?;
  store
    .accumulate_staging(dataset_id.to_owned(), entry.record_type, sink)
    .await
}

async fn load_with_fallback<S: ResolverStore>(
  store: &S,
  path: &Path,
) -> Result<StagingReport, S::Error> {
  match store.load_staging(path.to_path_buf(), SourceEncoding::Utf8).await {
    Err(err) if err.scope() == FailureScope::Encoding => {
      debug!(path = %path.display(), %err, "retrying as latin-1");
      store.load_staging(path.to_path_buf(), SourceEncoding::Latin1).await
    }
    other => other,
  }
}
