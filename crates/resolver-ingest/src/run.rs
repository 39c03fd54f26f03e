//! The run driver: catalog → archives → accumulator → merge → statistics.

use std::{collections::BTreeSet, time::Instant};

use resolver_core::{
  merge::{self, MergeReport},
  record::DatasetSync,
  store::ResolverStore,
};
use tracing::{error, info, warn};

use crate::{
  Error, Result,
  archive::ingest_archive,
  catalog::{Catalog, CatalogDataset},
  context::RunContext,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
  /// Rebuild the canonical table from the accumulator instead of merging.
  /// Every dataset is re-ingested, changed upstream or not.
  pub reset:       bool,
  /// Skip ingestion and merge the accumulator left by an earlier run.
  pub skip_ingest: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
  /// Records accumulated across all datasets.
  pub staged:        u64,
  pub processed:     u32,
  /// Unchanged upstream, not re-ingested.
  pub skipped:       u32,
  pub metadata_only: u32,
  pub failed:        u32,
  pub retired:       u64,
  /// Present when the run merged.
  pub merge:         Option<MergeReport>,
  /// Present when the run rebuilt; the number of objects written.
  pub rebuilt:       Option<u64>,
  pub total_count:   u64,
}

/// Execute one full ingestion run.
///
/// Dataset-level failures are logged and counted; only failures of the run's
/// own steps (accumulator reset, retirement, merge, statistics) are returned.
pub async fn populate<S: ResolverStore, C: Catalog>(
  store: &S,
  catalog: &C,
  ctx: &mut RunContext,
  mode: RunMode,
) -> Result<RunSummary> {
  let mut summary = RunSummary::default();
  let started = Instant::now();

  let exempt = if mode.skip_ingest {
    // The skip list of the run that filled the accumulator is gone; every
    // dataset without accumulated rows keeps its objects.
    info!("skipping ingestion");
    store.unstaged_datasets().await.map_err(Error::store)?
  } else {
    ingest(store, catalog, ctx, mode, &mut summary).await?;
    ctx.skipped.clone()
  };

  if mode.reset {
    summary.rebuilt = Some(merge::rebuild(store, ctx.today).await.map_err(Error::store)?);
  } else {
    let report = merge::merge(store, &exempt, ctx.today, &ctx.merge)
      .await
      .map_err(|err| {
        error!(%err, "merge failed; re-run with --skip-ingest to resume");
        Error::store(err)
      })?;
    summary.merge = Some(report);
  }

  summary.total_count = store.refresh_total_count().await.map_err(Error::store)?;
  info!(
    staged = summary.staged,
    total_count = summary.total_count,
    elapsed = ?started.elapsed(),
    "run complete"
  );
  Ok(summary)
}

/// Steps 1–3: fill the accumulator from the catalog and retire datasets that
/// vanished upstream.
async fn ingest<S: ResolverStore, C: Catalog>(
  store: &S,
  catalog: &C,
  ctx: &mut RunContext,
  mode: RunMode,
  summary: &mut RunSummary,
) -> Result<()> {
  ctx.duplicates.recreate()?;
  store.reset_migration().await.map_err(Error::store)?;

  let datasets = catalog.datasets().await?;
  info!(datasets = datasets.len(), "catalog loaded");

  // Datasets that stay live without contributing records.
  let mut retained = BTreeSet::new();

  for dataset in &datasets {
    if ctx.excluded.contains(&dataset.key) {
      info!(dataset_id = %dataset.key, "excluded");
      continue;
    }

    match ingest_dataset(store, catalog, ctx, mode, dataset).await {
      Ok(DatasetOutcome::Staged(staged)) => {
        summary.processed += 1;
        summary.staged += staged;
      }
      Ok(DatasetOutcome::Unchanged) => {
        summary.skipped += 1;
        ctx.skipped.insert(dataset.key.clone());
      }
      Ok(DatasetOutcome::MetadataOnly) => {
        summary.metadata_only += 1;
        retained.insert(dataset.key.clone());
      }
      Ok(DatasetOutcome::Aborted) => {
        summary.failed += 1;
        ctx.skipped.insert(dataset.key.clone());
      }
      Err(err) => {
        error!(dataset_id = %dataset.key, %err, "dataset failed");
        summary.failed += 1;
        ctx.skipped.insert(dataset.key.clone());
      }
    }
  }

  ctx.duplicates.flush()?;

  retained.extend(ctx.skipped.iter().cloned());
  summary.retired = store
    .retire_datasets(retained, ctx.today)
    .await
    .map_err(Error::store)?;

  info!(
    processed = summary.processed,
    skipped = summary.skipped,
    failed = summary.failed,
    staged = summary.staged,
    "finished all datasets, merging next"
  );
  Ok(())
}

enum DatasetOutcome {
  Staged(u64),
  Unchanged,
  MetadataOnly,
  Aborted,
}

async fn ingest_dataset<S: ResolverStore, C: Catalog>(
  store: &S,
  catalog: &C,
  ctx: &RunContext,
  mode: RunMode,
  dataset: &CatalogDataset,
) -> Result<DatasetOutcome> {
  let started = Instant::now();
  let dataset_id = dataset.key.as_str();
  info!(dataset_id, title = dataset.title().unwrap_or_default(), "dataset");

  let sync = store
    .sync_dataset(dataset.key.clone(), dataset.dataset_data())
    .await
    .map_err(Error::store)?;
  if !sync.needs_ingest() && !mode.reset {
    info!(dataset_id, "dataset is unchanged, skipping");
    return Ok(DatasetOutcome::Unchanged);
  }

  let Some(archive) = catalog.fetch_archive(dataset).await? else {
    info!(dataset_id, "metadata only dataset");
    commit(store, dataset).await?;
    return Ok(DatasetOutcome::MetadataOnly);
  };

  let report = ingest_archive(store, archive, dataset_id, ctx).await;
  if report.aborted {
    // The previous stamp stays stored, so the next run retries the dataset.
    warn!(dataset_id, "dataset contributed no records");
    return Ok(DatasetOutcome::Aborted);
  }
  commit(store, dataset).await?;

  info!(
    dataset_id,
    staged = report.staged,
    sync = sync_label(sync, mode),
    elapsed = ?started.elapsed(),
    "finished dataset"
  );
  Ok(DatasetOutcome::Staged(report.staged))
}

async fn commit<S: ResolverStore>(store: &S, dataset: &CatalogDataset) -> Result<()> {
  store
    .commit_dataset(dataset.key.clone(), dataset.dataset_data())
    .await
    .map_err(Error::store)
}

fn sync_label(sync: DatasetSync, mode: RunMode) -> &'static str {
  match (sync, mode.reset) {
    (DatasetSync::Created, _) => "created",
    (DatasetSync::Updated, _) => "updated",
    (DatasetSync::Unchanged, true) => "reset",
    (DatasetSync::Unchanged, false) => "unchanged",
  }
}
