//! Structural diff between an object's stored data and its staged data.

use serde_json::Value;

use crate::record::ObjectData;

/// Keys whose changes alone never warrant a history entry. Publishers bump
/// these on every republication.
pub const DEFAULT_VOLATILE_KEYS: &[&str] = &["modified"];

/// Compute the history payload for replacing `old` with `new`.
///
/// - a key present in `old` and absent from or different in `new` maps to
///   its old value;
/// - a key absent from `old` and present in `new` maps to `null`;
/// - unchanged keys are omitted.
///
/// An empty result means the data is identical.
pub fn diff_data(old: &ObjectData, new: &ObjectData) -> ObjectData {
  let mut changed = ObjectData::new();

  for (key, old_value) in old {
    if new.get(key) != Some(old_value) {
      changed.insert(key.clone(), old_value.clone());
    }
  }
  for key in new.keys() {
    if !old.contains_key(key) {
      changed.insert(key.clone(), Value::Null);
    }
  }

  changed
}

/// True when every changed key is volatile. Such changes are applied but
/// leave no history.
pub fn only_volatile<S: AsRef<str>>(changed: &ObjectData, volatile: &[S]) -> bool {
  !changed.is_empty()
    && changed
      .keys()
      .all(|key| volatile.iter().any(|v| v.as_ref() == key))
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn data(value: Value) -> ObjectData {
    match value {
      Value::Object(map) => map,
      other => panic!("expected object, got {other}"),
    }
  }

  #[test]
  fn records_old_values_and_new_keys() {
    let old = data(json!({ "a": "1", "b": "old" }));
    let new = data(json!({ "a": "1", "b": "new", "c": "added" }));
    assert_eq!(diff_data(&old, &new), data(json!({ "b": "old", "c": null })));
  }

  #[test]
  fn removed_keys_keep_their_old_value() {
    let old = data(json!({ "a": "1", "gone": "x" }));
    let new = data(json!({ "a": "1" }));
    assert_eq!(diff_data(&old, &new), data(json!({ "gone": "x" })));
  }

  #[test]
  fn identical_data_has_empty_diff() {
    let old = data(json!({ "a": "1", "b": "2" }));
    assert!(diff_data(&old, &old.clone()).is_empty());
  }

  #[test]
  fn volatile_only_changes() {
    let changed = data(json!({ "modified": "2023-01-01" }));
    assert!(only_volatile(&changed, DEFAULT_VOLATILE_KEYS));

    let mixed = data(json!({ "modified": "2023-01-01", "locality": "Oslo" }));
    assert!(!only_volatile(&mixed, DEFAULT_VOLATILE_KEYS));

    assert!(!only_volatile(&ObjectData::new(), DEFAULT_VOLATILE_KEYS));
  }
}
