//! Duplicate resolver and migration accumulator append.
//!
//! Rows are read from the staging relation in file order. A row whose id is
//! already accumulated, whether from an earlier dataset, an earlier file of
//! this archive, or an earlier line of this file, is handed to the duplicate
//! sink together with the accumulated row and is not inserted. Duplicates
//! reach the sink only once the file's rows are committed.

use resolver_core::{
  identifier::{ID_COLUMN, PARENT_COLUMN},
  record::{DuplicateRecord, DuplicateSink, ObjectData, RecordType},
  store::AccumulateReport,
};
use rusqlite::{Connection, OptionalExtension as _};
use serde_json::Value;

use crate::{
  Error, Result,
  encode::{decode_data, encode_data},
  schema::STAGING_TABLE,
  staging::{quote_ident, staging_columns},
};

/// Build a record payload from one staging row: every non-null column.
fn row_data(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<ObjectData> {
  let mut data = ObjectData::new();
  for (idx, column) in columns.iter().enumerate() {
    if let Some(value) = row.get::<_, Option<String>>(idx)? {
      data.insert(column.clone(), Value::String(value));
    }
  }
  Ok(data)
}

/// Names SQLite accepts for the implicit row id. Headers come from
/// publishers, so a staging column may shadow any of them.
const ROWID_ALIASES: [&str; 3] = ["rowid", "_rowid_", "oid"];

/// A row id alias no staging column shadows, to read rows in file order.
fn file_order(columns: &[String]) -> Result<&'static str> {
  ROWID_ALIASES
    .into_iter()
    .find(|alias| !columns.iter().any(|c| c == alias))
    .ok_or_else(|| Error::MalformedFile("header shadows every row id alias".into()))
}

fn text_field(data: &ObjectData, key: &str) -> Option<String> {
  data
    .get(key)
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
}

pub fn accumulate(
  conn: &mut Connection,
  dataset_id: &str,
  record_type: RecordType,
  duplicates: &dyn DuplicateSink,
) -> Result<AccumulateReport> {
  let columns = staging_columns(conn)?;
  if !columns.iter().any(|c| c == ID_COLUMN) {
    return Err(Error::MalformedFile("staging relation has no id column".into()));
  }

  let order = file_order(&columns)?;

  let mut report = AccumulateReport::default();
  let mut collisions = Vec::new();
  let tx = conn.transaction()?;
  {
    let select = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let mut staged =
      tx.prepare(&format!("SELECT {select} FROM {STAGING_TABLE} ORDER BY {order}"))?;
    let mut existing = tx.prepare("SELECT data, dataset_id FROM migration WHERE id = ?1")?;
    let mut insert = tx.prepare(
      "INSERT INTO migration (id, parent, type, dataset_id, data)
       VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    let mut rows = staged.query([])?;
    while let Some(row) = rows.next()? {
      let data = row_data(row, &columns)?;
      let Some(id) = text_field(&data, ID_COLUMN) else {
        report.missing_id += 1;
        continue;
      };

      let previous: Option<(String, String)> = existing
        .query_row([&id], |r| Ok((r.get(0)?, r.get(1)?)))
        .optional()?;

      if let Some((old_data, old_dataset_id)) = previous {
        collisions.push(DuplicateRecord {
          id,
          new_data: data,
          new_dataset_id: dataset_id.to_owned(),
          new_type: record_type,
          old_data: decode_data(&old_data)?,
          old_dataset_id,
        });
        report.duplicates += 1;
        continue;
      }

      insert.execute(rusqlite::params![
        id,
        text_field(&data, PARENT_COLUMN),
        record_type.as_str(),
        dataset_id,
        encode_data(&data)?,
      ])?;
      report.inserted += 1;
    }
  }
  tx.commit()?;

  for collision in &collisions {
    duplicates.record(collision)?;
  }
  Ok(report)
}
