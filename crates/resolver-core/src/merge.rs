//! The merge engine: reconcile the migration accumulator against the
//! canonical object table.
//!
//! Three phases, always in this order:
//!
//! 1. **diff & history**: for each accumulated record whose id and dataset
//!    match a canonical object, diff the data, append history, and apply the
//!    new data (clearing any deleted date);
//! 2. **insert new**: accumulated records with no canonical counterpart by id
//!    become new canonical objects;
//! 3. **mark deleted**: live canonical objects absent from the accumulator
//!    are marked deleted, except those of exempt datasets.
//!
//! Phases 1 and 2 walk the accumulator in fixed-size pages; each page is its
//! own transaction. A failure leaves earlier pages committed, and re-running
//! the merge over the same accumulator is a no-op for them.

use std::{
  collections::{BTreeSet, HashMap},
  time::Instant,
};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::{
  diff::{DEFAULT_VOLATILE_KEYS, diff_data, only_volatile},
  record::{CanonicalObject, StagedRecord},
  store::{ObjectChange, ResolverStore},
};

pub const DEFAULT_BATCH_SIZE: usize = 5000;

// ─── Options and report ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MergeOptions {
  /// Accumulated records per page (and per transaction).
  pub batch_size:    usize,
  /// Keys whose changes alone leave no history.
  pub volatile_keys: Vec<String>,
}

impl Default for MergeOptions {
  fn default() -> Self {
    Self {
      batch_size:    DEFAULT_BATCH_SIZE,
      volatile_keys: DEFAULT_VOLATILE_KEYS.iter().map(|k| k.to_string()).collect(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
  pub batches:  u64,
  /// Canonical objects whose data or deleted date changed in phase 1.
  pub updated:  u64,
  pub history:  u64,
  pub inserted: u64,
  pub deleted:  u64,
}

// ─── Pages ───────────────────────────────────────────────────────────────────

/// A finite, restartable walk over the accumulator in id order.
///
/// Pages are keyed on the last id seen rather than on an offset, so a walk
/// can be resumed from any id with [`MigrationPages::resume_after`].
pub struct MigrationPages<'a, S> {
  store:      &'a S,
  batch_size: usize,
  cursor:     Option<String>,
  exhausted:  bool,
}

impl<'a, S: ResolverStore> MigrationPages<'a, S> {
  pub fn new(store: &'a S, batch_size: usize) -> Self {
    Self {
      store,
      batch_size: batch_size.max(1),
      cursor: None,
      exhausted: false,
    }
  }

  /// Start a walk with the first record after `id`.
  pub fn resume_after(store: &'a S, batch_size: usize, id: String) -> Self {
    Self { cursor: Some(id), ..Self::new(store, batch_size) }
  }

  /// The id of the last record handed out.
  pub fn cursor(&self) -> Option<&str> { self.cursor.as_deref() }

  pub async fn next_page(&mut self) -> Result<Option<Vec<StagedRecord>>, S::Error> {
    if self.exhausted {
      return Ok(None);
    }

    let page = self
      .store
      .migration_page(self.cursor.clone(), self.batch_size)
      .await?;

    if page.len() < self.batch_size {
      self.exhausted = true;
    }
    let Some(last) = page.last() else {
      return Ok(None);
    };
    self.cursor = Some(last.id.clone());
    Ok(Some(page))
  }
}

// ─── Phase 1 ─────────────────────────────────────────────────────────────────

/// The change (if any) that reconciles `old` with `staged`.
///
/// Identical data yields no change unless the object was marked deleted, in
/// which case it is resurrected without history.
pub fn change_for<K: AsRef<str>>(
  old: &CanonicalObject,
  staged: &StagedRecord,
  volatile_keys: &[K],
) -> Option<ObjectChange> {
  let changed = diff_data(&old.data, &staged.data);

  if changed.is_empty() {
    return old.deleted_date.is_some().then(|| ObjectChange {
      id:      old.id.clone(),
      data:    staged.data.clone(),
      history: None,
    });
  }

  let history = (!only_volatile(&changed, volatile_keys)).then_some(changed);
  Some(ObjectChange {
    id: old.id.clone(),
    data: staged.data.clone(),
    history,
  })
}

/// Diff one page against the canonical table. Only objects matching on both
/// id and dataset are eligible.
async fn plan_changes<S: ResolverStore>(
  store: &S,
  page: &[StagedRecord],
  options: &MergeOptions,
) -> Result<Vec<ObjectChange>, S::Error> {
  let ids = page.iter().map(|r| r.id.clone()).collect();
  let existing: HashMap<String, CanonicalObject> = store
    .objects_by_id(ids)
    .await?
    .into_iter()
    .map(|o| (o.id.to_lowercase(), o))
    .collect();

  Ok(
    page
      .iter()
      .filter_map(|staged| {
        let old = existing.get(&staged.id.to_lowercase())?;
        if old.dataset_id != staged.dataset_id {
          return None;
        }
        change_for(old, staged, &options.volatile_keys)
      })
      .collect(),
  )
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Run all three merge phases.
///
/// `exempt` lists datasets skipped this run (e.g. unchanged upstream); their
/// objects are never marked deleted.
pub async fn merge<S: ResolverStore>(
  store: &S,
  exempt: &BTreeSet<String>,
  today: NaiveDate,
  options: &MergeOptions,
) -> Result<MergeReport, S::Error> {
  let total = store.migration_count().await?;
  info!(total, batch_size = options.batch_size, "merge starting");

  let mut report = MergeReport::default();

  let started = Instant::now();
  let mut pages = MigrationPages::new(store, options.batch_size);
  while let Some(page) = pages.next_page().await? {
    let batch_started = Instant::now();
    let changes = plan_changes(store, &page, options).await?;
    let updated = changes.len() as u64;
    let history = changes.iter().filter(|c| c.history.is_some()).count() as u64;

    store.apply_changes(changes, today).await?;

    report.batches += 1;
    report.updated += updated;
    report.history += history;
    debug!(
      batch = report.batches,
      records = page.len(),
      updated,
      history,
      elapsed = ?batch_started.elapsed(),
      "merged batch"
    );
  }
  info!(
    updated = report.updated,
    history = report.history,
    elapsed = ?started.elapsed(),
    "updated existing records"
  );

  let started = Instant::now();
  let mut pages = MigrationPages::new(store, options.batch_size);
  while let Some(page) = pages.next_page().await? {
    report.inserted += store.insert_new(page, today).await?;
  }
  info!(inserted = report.inserted, elapsed = ?started.elapsed(), "added new records");

  let started = Instant::now();
  report.deleted = store.mark_absent_deleted(exempt.clone(), today).await?;
  info!(deleted = report.deleted, elapsed = ?started.elapsed(), "marked missing records deleted");

  Ok(report)
}

/// Cold-start rebuild: replace the canonical table with the accumulator,
/// discarding all history. Bypasses diffing entirely.
pub async fn rebuild<S: ResolverStore>(
  store: &S,
  today: NaiveDate,
) -> Result<u64, S::Error> {
  let started = Instant::now();
  let written = store.replace_with_migration(today).await?;
  info!(written, elapsed = ?started.elapsed(), "rebuilt canonical table");
  Ok(written)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::record::{ObjectData, RecordType};

  fn data(value: serde_json::Value) -> ObjectData {
    value.as_object().cloned().unwrap()
  }

  fn canonical(data_value: serde_json::Value, deleted: bool) -> CanonicalObject {
    CanonicalObject {
      id:           "abc".into(),
      parent:       None,
      record_type:  RecordType::Occurrence,
      dataset_id:   "ds".into(),
      data:         data(data_value),
      created_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      deleted_date: deleted.then(|| NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()),
    }
  }

  fn staged(data_value: serde_json::Value) -> StagedRecord {
    StagedRecord {
      id:          "abc".into(),
      parent:      None,
      record_type: RecordType::Occurrence,
      dataset_id:  "ds".into(),
      data:        data(data_value),
    }
  }

  #[test]
  fn unchanged_live_record_is_untouched() {
    let old = canonical(json!({ "a": "1" }), false);
    assert_eq!(change_for(&old, &staged(json!({ "a": "1" })), DEFAULT_VOLATILE_KEYS), None);
  }

  #[test]
  fn changed_record_carries_history() {
    let old = canonical(json!({ "a": "1", "b": "old" }), false);
    let new = staged(json!({ "a": "1", "b": "new", "c": "added" }));
    let change = change_for(&old, &new, DEFAULT_VOLATILE_KEYS).unwrap();
    assert_eq!(change.history, Some(data(json!({ "b": "old", "c": null }))));
    assert_eq!(change.data, new.data);
  }

  #[test]
  fn volatile_change_is_applied_without_history() {
    let old = canonical(json!({ "a": "1", "modified": "2023" }), false);
    let new = staged(json!({ "a": "1", "modified": "2024" }));
    let change = change_for(&old, &new, DEFAULT_VOLATILE_KEYS).unwrap();
    assert_eq!(change.history, None);
    assert_eq!(change.data, new.data);
  }

  #[test]
  fn deleted_record_reappearing_unchanged_is_resurrected() {
    let old = canonical(json!({ "a": "1" }), true);
    let change =
      change_for(&old, &staged(json!({ "a": "1" })), DEFAULT_VOLATILE_KEYS).unwrap();
    assert_eq!(change.history, None);
  }
}
