//! The duplicate audit log: one pipe-delimited line per identifier collision.
//!
//! The file is recreated with only its header at the start of every run that
//! ingests, so it always describes the latest run. Collisions of one dataset
//! are held in a [`PendingDuplicates`] until the dataset is fully staged, so
//! an aborted dataset leaves no lines behind.

use std::{
  fs::{File, OpenOptions},
  io::{self, BufWriter, Write as _},
  path::{Path, PathBuf},
  sync::Mutex,
};

use resolver_core::record::{DuplicateRecord, DuplicateSink};

pub const HEADER: &str = "id|new_data|new_datasetid|new_coretype|old_data|old_datasetid";

pub struct DuplicateLog {
  path:   PathBuf,
  writer: Mutex<Option<BufWriter<File>>>,
}

impl DuplicateLog {
  /// A log writing to `path`. Nothing is touched until [`Self::recreate`]
  /// or the first recorded duplicate.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into(), writer: Mutex::new(None) }
  }

  pub fn path(&self) -> &Path { &self.path }

  /// Truncate the file and write the header line.
  pub fn recreate(&self) -> io::Result<()> {
    let mut guard = self.lock();
    if let Some(mut previous) = guard.take() {
      previous.flush()?;
    }
    let mut writer = BufWriter::new(File::create(&self.path)?);
    writeln!(writer, "{HEADER}")?;
    writer.flush()?;
    *guard = Some(writer);
    Ok(())
  }

  pub fn flush(&self) -> io::Result<()> {
    match self.lock().as_mut() {
      Some(writer) => writer.flush(),
      None => Ok(()),
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Option<BufWriter<File>>> {
    // A panic while holding the lock leaves at worst a partial line.
    self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Render one duplicate as a log line, without the trailing newline.
pub fn format_line(duplicate: &DuplicateRecord) -> io::Result<String> {
  let new_data = serde_json::to_string(&duplicate.new_data)?;
  let old_data = serde_json::to_string(&duplicate.old_data)?;
  Ok(format!(
    "{}|{}|{}|{}|{}|{}",
    duplicate.id,
    new_data,
    duplicate.new_dataset_id,
    duplicate.new_type,
    old_data,
    duplicate.old_dataset_id,
  ))
}

impl DuplicateSink for DuplicateLog {
  fn record(&self, duplicate: &DuplicateRecord) -> io::Result<()> {
    let line = format_line(duplicate)?;
    let mut guard = self.lock();
    if guard.is_none() {
      let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
      *guard = Some(BufWriter::new(file));
    }
    match guard.as_mut() {
      Some(writer) => writeln!(writer, "{line}"),
      None => Ok(()),
    }
  }
}

/// Collisions of the dataset being staged, held back from the log.
#[derive(Default)]
pub struct PendingDuplicates {
  held: Mutex<Vec<DuplicateRecord>>,
}

impl PendingDuplicates {
  fn held(&self) -> std::sync::MutexGuard<'_, Vec<DuplicateRecord>> {
    self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Hand every held collision to `sink`, in detection order.
  pub fn release(&self, sink: &dyn DuplicateSink) -> io::Result<usize> {
    let held = std::mem::take(&mut *self.held());
    for duplicate in &held {
      sink.record(duplicate)?;
    }
    Ok(held.len())
  }

  /// Forget every held collision.
  pub fn discard(&self) -> usize { std::mem::take(&mut *self.held()).len() }
}

impl DuplicateSink for PendingDuplicates {
  fn record(&self, duplicate: &DuplicateRecord) -> io::Result<()> {
    self.held().push(duplicate.clone());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use resolver_core::record::RecordType;
  use serde_json::json;
  use tempfile::TempDir;

  use super::*;

  fn duplicate() -> DuplicateRecord {
    DuplicateRecord {
      id:             "occ-1".into(),
      new_data:       json!({ "id": "occ-1", "scientificname": "Pica pica" })
        .as_object()
        .cloned()
        .unwrap(),
      new_dataset_id: "ds-b".into(),
      new_type:       RecordType::Occurrence,
      old_data:       json!({ "id": "occ-1" }).as_object().cloned().unwrap(),
      old_dataset_id: "ds-a".into(),
    }
  }

  #[test]
  fn line_has_six_fields_in_header_order() {
    assert_eq!(
      format_line(&duplicate()).unwrap(),
      r#"occ-1|{"id":"occ-1","scientificname":"Pica pica"}|ds-b|occurrence|{"id":"occ-1"}|ds-a"#
    );
  }

  #[test]
  fn recreate_truncates_to_the_header() {
    let dir = TempDir::new().unwrap();
    let log = DuplicateLog::new(dir.path().join("duplicates.txt"));

    log.recreate().unwrap();
    log.record(&duplicate()).unwrap();
    log.flush().unwrap();
    let contents = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(contents.lines().count(), 2);

    log.recreate().unwrap();
    let contents = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(contents, format!("{HEADER}\n"));
  }

  #[test]
  fn pending_duplicates_reach_the_log_only_when_released() {
    let dir = TempDir::new().unwrap();
    let log = DuplicateLog::new(dir.path().join("duplicates.txt"));
    log.recreate().unwrap();

    let pending = PendingDuplicates::default();
    pending.record(&duplicate()).unwrap();
    assert_eq!(pending.discard(), 1);
    assert_eq!(pending.release(&log).unwrap(), 0);

    pending.record(&duplicate()).unwrap();
    pending.record(&duplicate()).unwrap();
    assert_eq!(pending.release(&log).unwrap(), 2);
    log.flush().unwrap();

    let contents = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(contents.lines().count(), 3);
  }
}
