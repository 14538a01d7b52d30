//! Change-sets and their stored JSON form.
//!
//! A change-set maps field names to `(old, new)` pairs. It is stored as a
//! JSON object whose values are two-element arrays:
//!
//! ```text
//! {"name": ["Brandon", "Changed"], "age": [null, 31]}
//! ```
//!
//! Older trails stored a bare value per field instead of a pair. Decoding
//! reads such an entry as `(null, value)`, and never fails: anything that is
//! not a pair is treated as a bare value.

use std::collections::{BTreeMap, btree_map};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Attributes;

/// The old and new value of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
  pub old: Value,
  pub new: Value,
}

impl Change {
  pub fn new(old: Value, new: Value) -> Self { Self { old, new } }

  /// A field that had no previous value (creates, snapshots).
  pub fn set(new: Value) -> Self { Self { old: Value::Null, new } }

  /// True when the field did not actually change.
  pub fn is_noop(&self) -> bool { self.old == self.new }
}

/// Field name → [`Change`], ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Value", from = "Value")]
pub struct ChangeSet(BTreeMap<String, Change>);

impl ChangeSet {
  pub fn new() -> Self { Self::default() }

  /// A change-set describing a full attribute snapshot: every field as
  /// `(null, value)`.
  pub fn snapshot(attributes: Attributes) -> Self {
    Self(
      attributes
        .into_iter()
        .map(|(field, value)| (field, Change::set(value)))
        .collect(),
    )
  }

  pub fn insert(&mut self, field: impl Into<String>, change: Change) -> Option<Change> {
    self.0.insert(field.into(), change)
  }

  pub fn get(&self, field: &str) -> Option<&Change> { self.0.get(field) }

  pub fn contains(&self, field: &str) -> bool { self.0.contains_key(field) }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn iter(&self) -> btree_map::Iter<'_, String, Change> { self.0.iter() }

  pub fn fields(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }

  /// Keep only the fields for which `keep` returns true.
  pub fn retain(&mut self, mut keep: impl FnMut(&str, &Change) -> bool) {
    self.0.retain(|field, change| keep(field, change));
  }

  /// Apply `f` to every change in place.
  pub fn for_each_mut(&mut self, mut f: impl FnMut(&str, &mut Change)) {
    for (field, change) in self.0.iter_mut() {
      f(field, change);
    }
  }

  /// Field → new value.
  pub fn new_attributes(&self) -> Attributes {
    self.0.iter().map(|(f, c)| (f.clone(), c.new.clone())).collect()
  }

  /// Field → old value.
  pub fn old_attributes(&self) -> Attributes {
    self.0.iter().map(|(f, c)| (f.clone(), c.old.clone())).collect()
  }

  /// Fold a newer change-set into this (older) one. Per field the oldest
  /// `old` and the newest `new` win, so folding a sequence oldest → newest
  /// yields the net change from the first state to the last.
  pub fn absorb_newer(&mut self, newer: &ChangeSet) {
    for (field, change) in newer.iter() {
      match self.0.get_mut(field) {
        Some(existing) => existing.new = change.new.clone(),
        None => {
          self.0.insert(field.clone(), change.clone());
        }
      }
    }
  }
}

impl FromIterator<(String, Change)> for ChangeSet {
  fn from_iter<I: IntoIterator<Item = (String, Change)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl IntoIterator for ChangeSet {
  type Item = (String, Change);
  type IntoIter = btree_map::IntoIter<String, Change>;

  fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl<'a> IntoIterator for &'a ChangeSet {
  type Item = (&'a String, &'a Change);
  type IntoIter = btree_map::Iter<'a, String, Change>;

  fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

// ─── Codec ───────────────────────────────────────────────────────────────────

/// Encode into the stored form: `{field: [old, new]}`.
pub fn encode(changes: &ChangeSet) -> Value {
  Value::Object(
    changes
      .iter()
      .map(|(field, c)| (field.clone(), Value::Array(vec![c.old.clone(), c.new.clone()])))
      .collect(),
  )
}

/// Decode the stored form. Legacy bare values become `(null, value)`; a
/// non-object yields an empty change-set.
pub fn decode(stored: &Value) -> ChangeSet {
  let Value::Object(map) = stored else {
    return ChangeSet::new();
  };

  map
    .iter()
    .map(|(field, entry)| {
      let change = match entry {
        Value::Array(pair) if pair.len() == 2 => Change::new(pair[0].clone(), pair[1].clone()),
        other => Change::set(other.clone()),
      };
      (field.clone(), change)
    })
    .collect()
}

impl From<ChangeSet> for Value {
  fn from(changes: ChangeSet) -> Self { encode(&changes) }
}

impl From<Value> for ChangeSet {
  fn from(stored: Value) -> Self { decode(&stored) }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn decode_normalises_legacy_values() {
    let stored = json!({ "name": "Brandon", "age": [30, 31], "tags": ["a", "b", "c"] });
    let cs = decode(&stored);

    assert_eq!(cs.get("name"), Some(&Change::set(json!("Brandon"))));
    assert_eq!(cs.get("age"), Some(&Change::new(json!(30), json!(31))));
    // Not a pair, so it is a bare (legacy) value.
    assert_eq!(cs.get("tags"), Some(&Change::set(json!(["a", "b", "c"]))));
  }

  #[test]
  fn decode_non_object_is_empty() {
    assert!(decode(&json!("garbage")).is_empty());
    assert!(decode(&Value::Null).is_empty());
  }

  #[test]
  fn encode_then_decode_preserves_changes() {
    let mut cs = ChangeSet::new();
    cs.insert("name", Change::new(json!("Brandon"), json!("Changed")));
    cs.insert("nickname", Change::set(json!("B")));
    cs.insert("deleted_at", Change::new(json!("2024-01-01"), Value::Null));

    assert_eq!(decode(&encode(&cs)), cs);
  }

  #[test]
  fn attribute_extraction() {
    let cs = decode(&json!({ "name": ["Brandon", "Changed"], "email": "b@example.com" }));

    let new = cs.new_attributes();
    assert_eq!(new["name"], json!("Changed"));
    assert_eq!(new["email"], json!("b@example.com"));

    let old = cs.old_attributes();
    assert_eq!(old["name"], json!("Brandon"));
    assert_eq!(old["email"], Value::Null);
  }

  #[test]
  fn absorb_keeps_first_old_and_last_new() {
    let mut first = decode(&json!({ "name": [null, "Brandon"] }));
    let second = decode(&json!({ "name": ["Brandon", "Changed"], "age": [1, 2] }));
    let third = decode(&json!({ "name": ["Changed", "Final"] }));

    first.absorb_newer(&second);
    first.absorb_newer(&third);

    assert_eq!(first.get("name"), Some(&Change::new(Value::Null, json!("Final"))));
    assert_eq!(first.get("age"), Some(&Change::new(json!(1), json!(2))));
  }

  #[test]
  fn serde_uses_stored_form() {
    let mut cs = ChangeSet::new();
    cs.insert("name", Change::new(json!("a"), json!("b")));
    let v = serde_json::to_value(&cs).unwrap();
    assert_eq!(v, json!({ "name": ["a", "b"] }));
    let back: ChangeSet = serde_json::from_value(json!({ "name": "legacy" })).unwrap();
    assert_eq!(back.get("name"), Some(&Change::set(json!("legacy"))));
  }
}
