//! Staging loader: stream one tab-delimited file into the staging relation.
//!
//! The header line defines the relation: one `TEXT` column per token,
//! case-folded and trimmed. Every following line becomes one row, inserted
//! through a single prepared statement inside one transaction. Lines whose
//! field count differs from the header are skipped. Empty cells load as
//! `NULL`.
//!
//! Darwin Core text files are not quoted, so quoting is disabled: a `"` is an
//! ordinary character.

use std::{collections::HashSet, fs::File, io::BufReader, path::Path};

use encoding_rs::{UTF_8, WINDOWS_1252};
use resolver_core::store::{SourceEncoding, StagingReport};
use rusqlite::Connection;

use crate::{Error, Result, schema::STAGING_TABLE};

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

/// Column names of the current staging relation, in declaration order.
/// Empty if the relation does not exist.
pub fn staging_columns(conn: &Connection) -> Result<Vec<String>> {
  let mut stmt = conn.prepare(&format!("PRAGMA table_info({STAGING_TABLE})"))?;
  let columns = stmt
    .query_map([], |row| row.get::<_, String>(1))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(columns)
}

pub fn drop_staging(conn: &Connection) -> Result<()> {
  conn.execute_batch(&format!("DROP TABLE IF EXISTS {STAGING_TABLE}"))?;
  Ok(())
}

/// Decode one field. Latin-1 is decoded as windows-1252, its WHATWG
/// superset, and never fails.
fn decode_field(bytes: &[u8], encoding: SourceEncoding) -> Option<String> {
  match encoding {
    SourceEncoding::Utf8 => UTF_8
      .decode_without_bom_handling_and_without_replacement(bytes)
      .map(|s| s.into_owned()),
    SourceEncoding::Latin1 => {
      Some(WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned())
    }
  }
}

/// Turn raw header fields into column names.
fn header_columns(record: &csv::ByteRecord, encoding: SourceEncoding) -> Result<Vec<String>> {
  let mut columns = Vec::with_capacity(record.len());
  let mut seen = HashSet::new();

  for (idx, field) in record.iter().enumerate() {
    let field = match (idx, field) {
      (0, [0xEF, 0xBB, 0xBF, rest @ ..]) => rest,
      (_, field) => field,
    };
    let name = decode_field(field, encoding)
      .ok_or(Error::Encoding { line: 1 })?
      .trim()
      .to_lowercase();

    if name.is_empty() {
      return Err(Error::MalformedFile(format!("header column {} is empty", idx + 1)));
    }
    if !seen.insert(name.clone()) {
      return Err(Error::MalformedFile(format!("header column {name:?} is repeated")));
    }
    columns.push(name);
  }

  if columns.is_empty() {
    return Err(Error::MalformedFile("file has no header line".into()));
  }
  Ok(columns)
}

/// Replace the staging relation with the contents of `path`.
///
/// Any decoding failure rolls the whole load back and reports
/// [`Error::Encoding`]; the caller may retry under another encoding.
pub fn load(conn: &mut Connection, path: &Path, encoding: SourceEncoding) -> Result<StagingReport> {
  let file = File::open(path)?;
  let mut reader = csv::ReaderBuilder::new()
    .delimiter(b'\t')
    .has_headers(false)
    .flexible(true)
    .quoting(false)
    .from_reader(BufReader::new(file));

  let mut record = csv::ByteRecord::new();
  if !reader.read_byte_record(&mut record)? {
    return Err(Error::MalformedFile("file is empty".into()));
  }
  let columns = header_columns(&record, encoding)?;

  let tx = conn.transaction()?;
  drop_staging(&tx)?;
  let column_defs = columns
    .iter()
    .map(|c| format!("{} TEXT", quote_ident(c)))
    .collect::<Vec<_>>()
    .join(", ");
  tx.execute_batch(&format!("CREATE TABLE {STAGING_TABLE} ({column_defs})"))?;

  let mut rows = 0u64;
  let mut skipped = 0u64;
  {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let mut insert =
      tx.prepare(&format!("INSERT INTO {STAGING_TABLE} VALUES ({placeholders})"))?;
    let mut values: Vec<Option<String>> = Vec::with_capacity(columns.len());

    while reader.read_byte_record(&mut record)? {
      let line = record.position().map_or(0, |p| p.line());
      if record.len() != columns.len() {
        skipped += 1;
        continue;
      }

      values.clear();
      for field in record.iter() {
        if field.is_empty() {
          values.push(None);
          continue;
        }
        values.push(Some(decode_field(field, encoding).ok_or(Error::Encoding { line })?));
      }

      insert.execute(rusqlite::params_from_iter(values.iter()))?;
      rows += 1;
    }
  }
  tx.commit()?;

  if skipped > 0 {
    tracing::debug!(skipped, "skipped lines with a mismatched column count");
  }
  Ok(StagingReport { columns, rows, skipped })
}
