//! The `ResolverStore` trait and supporting types.
//!
//! The trait is implemented by storage backends (e.g.
//! `resolver-store-sqlite`). The archive orchestrator and the merge engine
//! depend on this abstraction, not on any concrete backend.

use std::{collections::BTreeSet, future::Future, path::PathBuf, sync::Arc};

use chrono::NaiveDate;

use crate::{
  error::ScopedFailure,
  identifier::NormalizationPlan,
  record::{
    CanonicalObject, Dataset, DatasetSync, DuplicateSink, HistoryEntry,
    ObjectData, RecordType, StagedRecord,
  },
};

// ─── Staging types ───────────────────────────────────────────────────────────

/// Character encoding used to decode a staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceEncoding {
  #[default]
  Utf8,
  Latin1,
}

/// Outcome of loading one delimited file into the staging relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingReport {
  /// Case-folded, trimmed header tokens.
  pub columns: Vec<String>,
  pub rows:    u64,
  /// Data lines whose column count did not match the header.
  pub skipped: u64,
}

/// Outcome of appending the staging relation to the migration accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulateReport {
  pub inserted:   u64,
  /// Rows dropped because their id was already accumulated this run.
  pub duplicates: u64,
  /// Rows dropped because their id was empty after normalization.
  pub missing_id: u64,
}

// ─── Merge types ─────────────────────────────────────────────────────────────

/// One phase-1 mutation: replace an object's data, clear its deleted date,
/// and optionally append a history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectChange {
  pub id:      String,
  pub data:    ObjectData,
  /// `None` when the change must not leave history (volatile-only or a pure
  /// resurrection).
  pub history: Option<ObjectData>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a resolver store backend.
///
/// A store holds four things: a disposable staging relation (one file at a
/// time), the per-run migration accumulator, the canonical object table with
/// its append-only history, and dataset metadata.
///
/// Single writer: nothing here guards against two runs mutating the same
/// store concurrently.
pub trait ResolverStore: Send + Sync {
  type Error: std::error::Error + ScopedFailure + Send + Sync + 'static;

  // ── Staging ───────────────────────────────────────────────────────────

  /// Replace the staging relation with the contents of the tab-delimited
  /// file at `path`, one text column per header token.
  fn load_staging(
    &self,
    path: PathBuf,
    encoding: SourceEncoding,
  ) -> impl Future<Output = Result<StagingReport, Self::Error>> + Send + '_;

  /// Populate the staging relation's `id` and `parent` columns according to
  /// `plan`. Fails without further mutation if the plan's id column is
  /// missing.
  fn normalize_staging(
    &self,
    plan: NormalizationPlan,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Drop the staging relation if it exists.
  fn drop_staging(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Migration accumulator ─────────────────────────────────────────────

  /// Clear the accumulator at the start of a run.
  fn reset_migration(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Append the normalized staging rows to the accumulator. Rows whose id is
  /// already accumulated go to `duplicates` instead (first seen wins).
  fn accumulate_staging(
    &self,
    dataset_id: String,
    record_type: RecordType,
    duplicates: Arc<dyn DuplicateSink>,
  ) -> impl Future<Output = Result<AccumulateReport, Self::Error>> + Send + '_;

  /// Remove every accumulated row of one dataset. Used when a dataset is
  /// abandoned part-way through its archive.
  fn discard_dataset(
    &self,
    dataset_id: String,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn migration_count(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Up to `limit` accumulated records ordered by id, starting after
  /// `after` (exclusive) or from the beginning.
  fn migration_page(
    &self,
    after: Option<String>,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<StagedRecord>, Self::Error>> + Send + '_;

  // ── Canonical objects ─────────────────────────────────────────────────

  /// Canonical objects whose id matches any of `ids`, live or deleted.
  fn objects_by_id(
    &self,
    ids: Vec<String>,
  ) -> impl Future<Output = Result<Vec<CanonicalObject>, Self::Error>> + Send + '_;

  /// Apply a batch of phase-1 changes in one transaction.
  fn apply_changes(
    &self,
    changes: Vec<ObjectChange>,
    today: NaiveDate,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Insert every record whose id has no canonical counterpart, in one
  /// transaction. Returns the number inserted.
  fn insert_new(
    &self,
    records: Vec<StagedRecord>,
    today: NaiveDate,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Mark deleted every live object whose id is not accumulated, unless its
  /// dataset is in `exempt`. Returns the number marked.
  fn mark_absent_deleted(
    &self,
    exempt: BTreeSet<String>,
    today: NaiveDate,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Discard all history, replace the canonical table with the accumulator,
  /// and clear the accumulator. Returns the number of objects written.
  fn replace_with_migration(
    &self,
    today: NaiveDate,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn get_object(
    &self,
    id: String,
  ) -> impl Future<Output = Result<Option<CanonicalObject>, Self::Error>> + Send + '_;

  /// History of one object, oldest first.
  fn history_for(
    &self,
    id: String,
  ) -> impl Future<Output = Result<Vec<HistoryEntry>, Self::Error>> + Send + '_;

  // ── Datasets ──────────────────────────────────────────────────────────

  /// Upsert catalog metadata for a dataset and revive it if it was retired.
  ///
  /// Nothing is written for a live dataset whose `modified` stamp matches.
  /// Otherwise the new metadata is stored with the previous stamp kept in
  /// place; the new stamp is only persisted by
  /// [`commit_dataset`](Self::commit_dataset), so a dataset whose ingestion
  /// fails is not mistaken for unchanged on the next run.
  fn sync_dataset(
    &self,
    id: String,
    data: ObjectData,
  ) -> impl Future<Output = Result<DatasetSync, Self::Error>> + Send + '_;

  /// Store a dataset's catalog metadata in full, `modified` stamp included.
  /// Called once the dataset has been staged.
  fn commit_dataset(
    &self,
    id: String,
    data: ObjectData,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_dataset(
    &self,
    id: String,
  ) -> impl Future<Output = Result<Option<Dataset>, Self::Error>> + Send + '_;

  /// Mark deleted every live dataset with no accumulated records that is
  /// not in `exempt`, cascading to its live objects. Returns the number of
  /// datasets retired.
  fn retire_datasets(
    &self,
    exempt: BTreeSet<String>,
    today: NaiveDate,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Live datasets with no accumulated records.
  fn unstaged_datasets(
    &self,
  ) -> impl Future<Output = Result<BTreeSet<String>, Self::Error>> + Send + '_;

  // ── Statistics ────────────────────────────────────────────────────────

  /// Recount canonical objects and cache the result.
  fn refresh_total_count(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// The cached total, if it has ever been computed.
  fn total_count(&self) -> impl Future<Output = Result<Option<u64>, Self::Error>> + Send + '_;
}
