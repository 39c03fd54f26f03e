//! Identifier cleanup steps exposed to SQL.
//!
//! The normalizer runs set-based `UPDATE`s over the staging relation; these
//! scalar functions let those statements call the pure steps from
//! [`resolver_core::identifier`] instead of re-implementing them in SQL.

use resolver_core::identifier::{
  clean_material_sample_id, normalize_identifier, should_promote,
};
use rusqlite::{Connection, functions::FunctionFlags};

pub const NORMALIZE_ID: &str = "resolver_normalize_id";
pub const CLEAN_SAMPLE_ID: &str = "resolver_clean_sample_id";
pub const SHOULD_PROMOTE: &str = "resolver_should_promote";

pub fn register(conn: &Connection) -> rusqlite::Result<()> {
  let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

  conn.create_scalar_function(NORMALIZE_ID, 1, flags, |ctx| {
    let value: Option<String> = ctx.get(0)?;
    Ok(value.map(|v| normalize_identifier(&v)))
  })?;

  conn.create_scalar_function(CLEAN_SAMPLE_ID, 1, flags, |ctx| {
    let value: Option<String> = ctx.get(0)?;
    Ok(value.map(|v| clean_material_sample_id(&v)))
  })?;

  conn.create_scalar_function(SHOULD_PROMOTE, 2, flags, |ctx| {
    let sample: Option<String> = ctx.get(0)?;
    let primary: Option<String> = ctx.get(1)?;
    Ok(sample.is_some_and(|s| should_promote(&s, primary.as_deref())))
  })?;

  Ok(())
}
