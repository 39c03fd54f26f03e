//! Per-run state threaded from the run driver through the orchestrator to
//! the merge engine.

use std::{collections::BTreeSet, sync::Arc};

use chrono::{Local, NaiveDate};
use resolver_core::merge::MergeOptions;
use uuid::Uuid;

use crate::{config::IngestConfig, duplicates::DuplicateLog};

pub struct RunContext {
  pub run_id:     Uuid,
  /// Date stamped on created, changed and deleted records.
  pub today:      NaiveDate,
  pub duplicates: Arc<DuplicateLog>,
  pub merge:      MergeOptions,
  /// Datasets never ingested.
  pub excluded:   BTreeSet<String>,
  /// Datasets not re-ingested this run, because upstream reported no change
  /// or because ingestion failed. Filled in by the run driver and passed to
  /// the merge as the deletion exemption.
  pub skipped:    BTreeSet<String>,
}

impl RunContext {
  pub fn new(duplicates: DuplicateLog, merge: MergeOptions) -> Self {
    Self {
      run_id: Uuid::new_v4(),
      today: Local::now().date_naive(),
      duplicates: Arc::new(duplicates),
      merge,
      excluded: BTreeSet::new(),
      skipped: BTreeSet::new(),
    }
  }

  pub fn from_config(config: &IngestConfig) -> Self {
    Self {
      excluded: config.excluded_datasets.clone(),
      ..Self::new(DuplicateLog::new(&config.duplicates_path), config.merge_options())
    }
  }
}
