//! [`SqliteStore`], the SQLite implementation of [`ResolverStore`].

use std::{collections::BTreeSet, path::{Path, PathBuf}, sync::Arc};

use chrono::NaiveDate;
use resolver_core::{
  identifier::NormalizationPlan,
  record::{
    CanonicalObject, DATASET_MODIFIED_KEY, Dataset, DatasetSync, DuplicateSink,
    HistoryEntry, ObjectData, RecordType, StagedRecord,
  },
  store::{
    AccumulateReport, ObjectChange, ResolverStore, SourceEncoding, StagingReport,
  },
};
use rusqlite::OptionalExtension as _;

use crate::{
  Error, Result, accumulate,
  encode::{
    OBJECT_COLUMNS, RawDataset, RawHistory, RawObject, RawStaged, decode_data,
    encode_data, encode_date, encode_id_list,
  },
  functions, normalize,
  schema::SCHEMA,
  staging,
};

/// Statistic name under which the canonical object count is cached.
const TOTAL_COUNT: &str = "total_count";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A resolver store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Insert or replace a dataset's metadata and clear its deleted date.
  async fn upsert_dataset(&self, id: String, data: ObjectData) -> Result<()> {
    let data_str = encode_data(&data)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO datasets (id, data) VALUES (?1, ?2)
           ON CONFLICT (id) DO UPDATE SET data = excluded.data, deleted_date = NULL",
          rusqlite::params![id, data_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        functions::register(conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── ResolverStore impl ──────────────────────────────────────────────────────

impl ResolverStore for SqliteStore {
  type Error = Error;

  // ── Staging ───────────────────────────────────────────────────────────────

  async fn load_staging(
    &self,
    path:     PathBuf,
    encoding: SourceEncoding,
  ) -> Result<StagingReport> {
    self
      .conn
      .call(move |conn| Ok(staging::load(conn, &path, encoding)))
      .await?
  }

  async fn normalize_staging(&self, plan: NormalizationPlan) -> Result<()> {
    self
      .conn
      .call(move |conn| Ok(normalize::normalize(conn, &plan)))
      .await?
  }

  async fn drop_staging(&self) -> Result<()> {
    self
      .conn
      .call(|conn| Ok(staging::drop_staging(conn)))
      .await?
  }

  // ── Migration accumulator ─────────────────────────────────────────────────

  async fn reset_migration(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute("DELETE FROM migration", [])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn accumulate_staging(
    &self,
    dataset_id:  String,
    record_type: RecordType,
    duplicates:  Arc<dyn DuplicateSink>,
  ) -> Result<AccumulateReport> {
    self
      .conn
      .call(move |conn| {
        Ok(accumulate::accumulate(conn, &dataset_id, record_type, duplicates.as_ref()))
      })
      .await?
  }

  async fn discard_dataset(&self, dataset_id: String) -> Result<u64> {
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM migration WHERE dataset_id = ?1", [dataset_id])?)
      })
      .await?;
    Ok(removed as u64)
  }

  async fn migration_count(&self) -> Result<u64> {
    let count: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT count(*) FROM migration", [], |r| r.get(0))?))
      .await?;
    Ok(count as u64)
  }

  async fn migration_page(
    &self,
    after: Option<String>,
    limit: usize,
  ) -> Result<Vec<StagedRecord>> {
    let limit_val = limit as i64;

    let raws: Vec<RawStaged> = self
      .conn
      .call(move |conn| {
        let map_row = |row: &rusqlite::Row<'_>| {
          Ok(RawStaged {
            id:          row.get(0)?,
            parent:      row.get(1)?,
            record_type: row.get(2)?,
            dataset_id:  row.get(3)?,
            data:        row.get(4)?,
          })
        };
        // Two statements so the primary key index serves the range scan.
        let rows = if let Some(after) = after {
          let mut stmt = conn.prepare(
            "SELECT id, parent, type, dataset_id, data FROM migration
             WHERE id > ?1 ORDER BY id LIMIT ?2",
          )?;
          stmt
            .query_map(rusqlite::params![after, limit_val], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
          let mut stmt = conn.prepare(
            "SELECT id, parent, type, dataset_id, data FROM migration
             ORDER BY id LIMIT ?1",
          )?;
          stmt
            .query_map(rusqlite::params![limit_val], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawStaged::into_staged).collect()
  }

  // ── Canonical objects ─────────────────────────────────────────────────────

  async fn objects_by_id(&self, ids: Vec<String>) -> Result<Vec<CanonicalObject>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let id_list = encode_id_list(&ids)?;

    let raws: Vec<RawObject> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {OBJECT_COLUMNS} FROM objects
           WHERE id IN (SELECT value FROM json_each(?1))"
        ))?;
        let rows = stmt
          .query_map([id_list], RawObject::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawObject::into_object).collect()
  }

  async fn apply_changes(&self, changes: Vec<ObjectChange>, today: NaiveDate) -> Result<()> {
    if changes.is_empty() {
      return Ok(());
    }

    let today_str = encode_date(today);
    let encoded = changes
      .into_iter()
      .map(|c| {
        let history = c.history.as_ref().map(encode_data).transpose()?;
        Ok((c.id, encode_data(&c.data)?, history))
      })
      .collect::<Result<Vec<(String, String, Option<String>)>>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut history = tx.prepare(
            "INSERT INTO history (object_id, changed_data, changed_date)
             VALUES (?1, ?2, ?3)",
          )?;
          let mut update = tx.prepare(
            "UPDATE objects SET data = ?2, deleted_date = NULL WHERE id = ?1",
          )?;
          for (id, data, changed) in &encoded {
            if let Some(changed) = changed {
              history.execute(rusqlite::params![id, changed, today_str])?;
            }
            update.execute(rusqlite::params![id, data])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn insert_new(&self, records: Vec<StagedRecord>, today: NaiveDate) -> Result<u64> {
    if records.is_empty() {
      return Ok(0);
    }

    let today_str = encode_date(today);
    let encoded = records
      .into_iter()
      .map(|r| Ok((r.id, r.parent, r.record_type.as_str(), r.dataset_id, encode_data(&r.data)?)))
      .collect::<Result<Vec<_>>>()?;

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut inserted = 0usize;
        {
          let mut insert = tx.prepare(
            "INSERT INTO objects (id, parent, type, dataset_id, data, created_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (id) DO NOTHING",
          )?;
          for (id, parent, record_type, dataset_id, data) in &encoded {
            inserted += insert.execute(rusqlite::params![
              id, parent, record_type, dataset_id, data, today_str
            ])?;
          }
        }
        tx.commit()?;
        Ok(inserted)
      })
      .await?;
    Ok(inserted as u64)
  }

  async fn mark_absent_deleted(
    &self,
    exempt: BTreeSet<String>,
    today:  NaiveDate,
  ) -> Result<u64> {
    let today_str  = encode_date(today);
    let exempt_str = encode_id_list(&exempt)?;

    let marked = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE objects SET deleted_date = ?1
           WHERE deleted_date IS NULL
             AND NOT EXISTS (SELECT 1 FROM migration m WHERE m.id = objects.id)
             AND dataset_id NOT IN (SELECT value FROM json_each(?2))",
          rusqlite::params![today_str, exempt_str],
        )?)
      })
      .await?;
    Ok(marked as u64)
  }

  async fn replace_with_migration(&self, today: NaiveDate) -> Result<u64> {
    let today_str = encode_date(today);

    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM history", [])?;
        tx.execute("DELETE FROM objects", [])?;
        let written = tx.execute(
          "INSERT INTO objects (id, parent, type, dataset_id, data, created_date)
           SELECT id, parent, type, dataset_id, data, ?1 FROM migration",
          [today_str],
        )?;
        tx.execute("DELETE FROM migration", [])?;
        tx.commit()?;
        Ok(written)
      })
      .await?;
    Ok(written as u64)
  }

  async fn get_object(&self, id: String) -> Result<Option<CanonicalObject>> {
    let raw: Option<RawObject> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ?1"),
              [id],
              RawObject::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawObject::into_object).transpose()
  }

  async fn history_for(&self, id: String) -> Result<Vec<HistoryEntry>> {
    let raws: Vec<RawHistory> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT history_id, object_id, changed_data, changed_date FROM history
           WHERE object_id = ?1 COLLATE NOCASE
           ORDER BY history_id",
        )?;
        let rows = stmt
          .query_map([id], |row| {
            Ok(RawHistory {
              history_id:   row.get(0)?,
              object_id:    row.get(1)?,
              changed_data: row.get(2)?,
              changed_date: row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistory::into_entry).collect()
  }

  // ── Datasets ──────────────────────────────────────────────────────────────

  async fn sync_dataset(&self, id: String, data: ObjectData) -> Result<DatasetSync> {
    let lookup_id = id.clone();
    let stored: Option<(String, Option<String>)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT data, deleted_date FROM datasets WHERE id = ?1",
              [lookup_id],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    let mut pending = data;
    let committed_stamp = match stored {
      None => {
        pending.remove(DATASET_MODIFIED_KEY);
        self.upsert_dataset(id, pending).await?;
        return Ok(DatasetSync::Created);
      }
      Some((stored, deleted_date)) => {
        let stored = decode_data(&stored)?;
        let stamp = stored.get(DATASET_MODIFIED_KEY).cloned();
        let unchanged = stamp.is_some() && stamp.as_ref() == pending.get(DATASET_MODIFIED_KEY);
        if unchanged && deleted_date.is_none() {
          return Ok(DatasetSync::Unchanged);
        }
        stamp
      }
    };

    match committed_stamp {
      Some(stamp) => pending.insert(DATASET_MODIFIED_KEY.to_owned(), stamp),
      None => pending.remove(DATASET_MODIFIED_KEY),
    };
    self.upsert_dataset(id, pending).await?;
    Ok(DatasetSync::Updated)
  }

  async fn commit_dataset(&self, id: String, data: ObjectData) -> Result<()> {
    self.upsert_dataset(id, data).await
  }

  async fn get_dataset(&self, id: String) -> Result<Option<Dataset>> {
    let raw: Option<RawDataset> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT id, data, deleted_date FROM datasets WHERE id = ?1",
              [id],
              |row| {
                Ok(RawDataset {
                  id:           row.get(0)?,
                  data:         row.get(1)?,
                  deleted_date: row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDataset::into_dataset).transpose()
  }

  async fn retire_datasets(&self, exempt: BTreeSet<String>, today: NaiveDate) -> Result<u64> {
    let today_str  = encode_date(today);
    let exempt_str = encode_id_list(&exempt)?;

    let (retired, cascaded) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let retired = {
          let mut stmt = tx.prepare(
            "UPDATE datasets SET deleted_date = ?1
             WHERE deleted_date IS NULL
               AND id NOT IN (SELECT DISTINCT dataset_id FROM migration)
               AND id NOT IN (SELECT value FROM json_each(?2))
             RETURNING id",
          )?;
          stmt
            .query_map(rusqlite::params![today_str, exempt_str], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut cascaded = 0usize;
        {
          let mut cascade = tx.prepare(
            "UPDATE objects SET deleted_date = ?1
             WHERE deleted_date IS NULL AND dataset_id = ?2",
          )?;
          for dataset_id in &retired {
            cascaded += cascade.execute(rusqlite::params![today_str, dataset_id])?;
          }
        }
        tx.commit()?;
        Ok((retired, cascaded))
      })
      .await?;

    if !retired.is_empty() {
      tracing::info!(datasets = ?retired, objects = cascaded, "retired datasets");
    }
    Ok(retired.len() as u64)
  }

  async fn unstaged_datasets(&self) -> Result<BTreeSet<String>> {
    let ids = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT id FROM datasets
           WHERE deleted_date IS NULL
             AND id NOT IN (SELECT DISTINCT dataset_id FROM migration)",
        )?;
        let ids = stmt
          .query_map([], |r| r.get::<_, String>(0))?
          .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(ids)
      })
      .await?;
    Ok(ids)
  }

  // ── Statistics ────────────────────────────────────────────────────────────

  async fn refresh_total_count(&self) -> Result<u64> {
    let total: i64 = self
      .conn
      .call(|conn| {
        let total: i64 = conn.query_row("SELECT count(*) FROM objects", [], |r| r.get(0))?;
        conn.execute(
          "INSERT INTO statistics (name, value) VALUES (?1, ?2)
           ON CONFLICT (name) DO UPDATE SET value = excluded.value",
          rusqlite::params![TOTAL_COUNT, total],
        )?;
        Ok(total)
      })
      .await?;
    Ok(total as u64)
  }

  async fn total_count(&self) -> Result<Option<u64>> {
    let total: Option<i64> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT value FROM statistics WHERE name = ?1",
              [TOTAL_COUNT],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(total.map(|t| t as u64))
  }
}
