//! Identifier normalizer: derive `id` and `parent` for every staged row.
//!
//! Applied in order, each step a single `UPDATE` over the staging relation:
//!
//! 1. keep the previous `id` as `parent` when the file is a child of the
//!    archive's core;
//! 2. copy the plan's identifier column into `id`;
//! 3. clean the material sample id, blank values shared by several rows,
//!    and promote usable values into `id`;
//! 4. lower-case `id` and `parent` and strip URN/PURL prefixes.

use resolver_core::identifier::{
  ID_COLUMN, MATERIAL_SAMPLE_ID_COLUMN, NormalizationPlan, PARENT_COLUMN,
};
use rusqlite::Connection;

use crate::{
  Error, Result,
  functions::{CLEAN_SAMPLE_ID, NORMALIZE_ID, SHOULD_PROMOTE},
  schema::STAGING_TABLE,
  staging::{quote_ident, staging_columns},
};

pub fn normalize(conn: &mut Connection, plan: &NormalizationPlan) -> Result<()> {
  let columns = staging_columns(conn)?;
  let has = |name: &str| columns.iter().any(|c| c == name);

  if !has(&plan.id_column) {
    return Err(Error::MissingIdColumn(plan.id_column.clone()));
  }

  let tx = conn.transaction()?;

  if !has(PARENT_COLUMN) {
    tx.execute_batch(&format!("ALTER TABLE {STAGING_TABLE} ADD COLUMN {PARENT_COLUMN} TEXT"))?;
  }
  if !has(ID_COLUMN) {
    tx.execute_batch(&format!("ALTER TABLE {STAGING_TABLE} ADD COLUMN {ID_COLUMN} TEXT"))?;
  } else if plan.links_parent() {
    tx.execute(&format!("UPDATE {STAGING_TABLE} SET {PARENT_COLUMN} = {ID_COLUMN}"), [])?;
  }

  if plan.id_column != ID_COLUMN {
    tx.execute(
      &format!("UPDATE {STAGING_TABLE} SET {ID_COLUMN} = {}", quote_ident(&plan.id_column)),
      [],
    )?;
  }

  if has(MATERIAL_SAMPLE_ID_COLUMN) {
    let sample = MATERIAL_SAMPLE_ID_COLUMN;
    tx.execute(
      &format!(
        "UPDATE {STAGING_TABLE} SET {sample} = {CLEAN_SAMPLE_ID}({sample})
         WHERE {sample} IS NOT NULL"
      ),
      [],
    )?;

    // A value shared by several rows cannot be resolved to one of them.
    let blanked = tx.execute(
      &format!(
        "UPDATE {STAGING_TABLE} SET {sample} = ''
         WHERE lower({sample}) IN (
           SELECT lower({sample}) FROM {STAGING_TABLE}
           WHERE {sample} <> ''
           GROUP BY lower({sample})
           HAVING count(*) > 1
         )"
      ),
      [],
    )?;

    let promoted = tx.execute(
      &format!(
        "UPDATE {STAGING_TABLE} SET {ID_COLUMN} = {sample}
         WHERE {SHOULD_PROMOTE}({sample}, {ID_COLUMN})"
      ),
      [],
    )?;
    tracing::debug!(blanked, promoted, "cleaned material sample ids");
  }

  tx.execute(
    &format!(
      "UPDATE {STAGING_TABLE}
       SET {ID_COLUMN} = {NORMALIZE_ID}({ID_COLUMN}),
           {PARENT_COLUMN} = {NORMALIZE_ID}({PARENT_COLUMN})"
    ),
    [],
  )?;

  tx.commit()?;
  Ok(())
}
