//! Identifier cleanup steps.
//!
//! Publishers identify records in several ways: bare UUIDs, `urn:uuid:` URNs,
//! institutional PURL URLs, and for some collections a UUID hidden in the
//! material sample id column. Each step here is a pure function over one
//! value; the store applies them in order over a whole staging relation.

use std::sync::LazyLock;

use regex::Regex;

use crate::record::RecordType;

/// URN scheme prefix stripped from identifiers.
pub const URN_UUID_PREFIX: &str = "urn:uuid:";

/// PURL prefix used by the Natural History Museum in Oslo.
pub const NHM_PURL_PREFIX: &str = "http://purl.org/nhmuio/id/";

/// Alternate identifier column some publishers fill with the specimen UUID.
pub const MATERIAL_SAMPLE_ID_COLUMN: &str = "materialsampleid";

/// Column names the normalizer owns in every staging relation.
pub const ID_COLUMN: &str = "id";
pub const PARENT_COLUMN: &str = "parent";

static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
  )
  .expect("identifier pattern is valid")
});

/// Whether `value` contains an identifier-shaped (UUID) token anywhere.
pub fn is_identifier(value: &str) -> bool { IDENTIFIER_PATTERN.is_match(value) }

/// Lower-case an identifier and strip the URN and PURL prefixes.
///
/// Idempotent: normalizing an already-normalized value returns it unchanged.
pub fn normalize_identifier(value: &str) -> String {
  value
    .to_lowercase()
    .replace(URN_UUID_PREFIX, "")
    .replace(NHM_PURL_PREFIX, "")
}

/// Clean a material sample id cell.
///
/// Strips the PURL prefix, then collapses multi-value cells (`|` or `,`
/// separated, as happens when one specimen spans several sheets) to the
/// first identifier-shaped token. Values without such a token are returned
/// trimmed; the caller decides later whether they are usable.
pub fn clean_material_sample_id(value: &str) -> String {
  let stripped = value.replace(NHM_PURL_PREFIX, "");
  let stripped = stripped.trim();

  let Some(token) = stripped
    .split(['|', ','])
    .map(str::trim)
    .find(|token| is_identifier(token))
  else {
    return stripped.to_owned();
  };

  // A token that starts with a UUID keeps only the UUID.
  match IDENTIFIER_PATTERN.find(token) {
    Some(found) if found.start() == 0 => found.as_str().to_owned(),
    _ => token.to_owned(),
  }
}

/// Whether a material sample id should replace the primary id.
pub fn should_promote(material_sample_id: &str, primary_id: Option<&str>) -> bool {
  is_identifier(material_sample_id) && !primary_id.is_some_and(is_identifier)
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// What the normalizer needs to know about one staged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationPlan {
  /// Column holding this file's own record identifier.
  pub id_column:      String,
  /// Identifier column of the archive's core type, when the archive has one.
  pub core_id_column: Option<String>,
}

impl NormalizationPlan {
  pub fn new(record_type: RecordType, core: Option<RecordType>) -> Option<Self> {
    Some(Self {
      id_column:      record_type.id_column()?.to_owned(),
      core_id_column: core.and_then(RecordType::id_column).map(str::to_owned),
    })
  }

  /// A file is a child of the core when the core id column differs from its
  /// own; the previous `id` column then holds the core record's id.
  pub fn links_parent(&self) -> bool {
    self
      .core_id_column
      .as_deref()
      .is_some_and(|core| core != self.id_column)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const UUID: &str = "ba128c35-5e8f-408f-8597-00b1972dace1";

  #[test]
  fn normalize_strips_urn_and_lowercases() {
    assert_eq!(normalize_identifier("urn:uuid:ABCDEF"), "abcdef");
    assert_eq!(normalize_identifier("ABCDEF"), "abcdef");
    assert_eq!(normalize_identifier("URN:UUID:ABCDEF"), "abcdef");
  }

  #[test]
  fn normalize_strips_purl() {
    assert_eq!(
      normalize_identifier(&format!("http://purl.org/nhmuio/id/{UUID}")),
      UUID
    );
  }

  #[test]
  fn normalize_is_idempotent() {
    let once = normalize_identifier(&format!("urn:uuid:{}", UUID.to_uppercase()));
    assert_eq!(normalize_identifier(&once), once);
  }

  #[test]
  fn identifier_pattern_matches_anywhere() {
    assert!(is_identifier(UUID));
    assert!(is_identifier(&format!("urn:uuid:{UUID}")));
    assert!(!is_identifier("O-DP-12345/1"));
    assert!(!is_identifier(""));
  }

  #[test]
  fn clean_sample_id_strips_purl() {
    let raw = format!("http://purl.org/nhmuio/id/{UUID}");
    assert_eq!(clean_material_sample_id(&raw), UUID);
  }

  #[test]
  fn clean_sample_id_keeps_first_valid_token() {
    let other = "0f3c9a2e-1b2d-4c5e-8f90-123456789abc";
    assert_eq!(clean_material_sample_id(&format!("{UUID}|{other}")), UUID);
    assert_eq!(
      clean_material_sample_id(&format!("not-an-id, {other}")),
      other
    );
  }

  #[test]
  fn clean_sample_id_leaves_plain_values() {
    assert_eq!(clean_material_sample_id(" MS-42 "), "MS-42");
    assert_eq!(clean_material_sample_id(UUID), UUID);
  }

  #[test]
  fn promotion_requires_valid_sample_and_invalid_primary() {
    assert!(should_promote(UUID, Some("O-DP-12345/1")));
    assert!(should_promote(UUID, None));
    assert!(!should_promote(UUID, Some(&format!("urn:uuid:{UUID}"))));
    assert!(!should_promote("", Some("O-DP-12345/1")));
  }

  #[test]
  fn child_files_link_to_core() {
    let plan =
      NormalizationPlan::new(RecordType::Occurrence, Some(RecordType::Event))
        .unwrap();
    assert_eq!(plan.id_column, "occurrenceid");
    assert!(plan.links_parent());

    let core =
      NormalizationPlan::new(RecordType::Event, Some(RecordType::Event))
        .unwrap();
    assert!(!core.links_parent());

    let orphan =
      NormalizationPlan::new(RecordType::MeasurementOrFact, None).unwrap();
    assert!(!orphan.links_parent());
  }

  #[test]
  fn datasets_have_no_plan() {
    assert!(NormalizationPlan::new(RecordType::Dataset, None).is_none());
  }
}
