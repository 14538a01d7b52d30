//! Reconstructing past states of an entity from its audit trail.
//!
//! Every entry point is built on one primitive: replay a version-ordered
//! prefix of the trail, applying each record's new values onto an
//! accumulator. The result is a [`Revision`]: the entity's attributes right
//! after the last replayed record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  Error, Result,
  auditable::Auditable,
  change_set::ChangeSet,
  record::{Action, Attributes, AuditRecord, EntityRef},
  store::{AuditQuery, AuditStore},
};

/// Which version [`RevisionReconstructor::revision_at_version`] should
/// rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
  Exact(u32),
  /// One step before the entity's own version; see
  /// [`RevisionReconstructor::revision_at_version`].
  Previous,
}

impl From<u32> for VersionSelector {
  fn from(v: u32) -> Self { Self::Exact(v) }
}

/// A reconstructed snapshot of an entity. Never stored, always derived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Revision {
  pub auditable:  EntityRef,
  /// Version of the last record replayed.
  pub version:    u32,
  pub action:     Action,
  pub created_at: DateTime<Utc>,
  pub attributes: Attributes,
  /// Fields assigned by the replay, as opposed to carried over from the
  /// live entity.
  pub changed:    BTreeSet<String>,
  /// True when the live entity is gone and this revision was built on a
  /// blank instance.
  pub transient:  bool,
}

impl Revision {
  pub fn get(&self, field: &str) -> Option<&serde_json::Value> { self.attributes.get(field) }

  /// Whether the replay touched `field`.
  pub fn was_changed(&self, field: &str) -> bool { self.changed.contains(field) }
}

impl Auditable for Revision {
  fn identity(&self) -> EntityRef { self.auditable.clone() }

  fn attributes(&self) -> Attributes { self.attributes.clone() }

  fn changed_fields(&self) -> ChangeSet { ChangeSet::new() }

  fn is_destroyed(&self) -> bool { self.transient }

  fn audit_version(&self) -> Option<u32> { Some(self.version) }
}

/// Fold the new values of `records` (oldest first) into one attribute map.
pub fn reconstruct_attributes<'r, I>(records: I) -> Attributes
where
  I: IntoIterator<Item = &'r AuditRecord>,
{
  let mut attributes = Attributes::new();
  for r in records {
    attributes.extend(r.new_attributes());
  }
  attributes
}

// ─── Replay ──────────────────────────────────────────────────────────────────

/// Accumulator for one replay, seeded from the entity being reconstructed.
struct Replay {
  auditable:  EntityRef,
  attributes: Attributes,
  schema:     Option<BTreeSet<String>>,
  changed:    BTreeSet<String>,
  transient:  bool,
}

impl Replay {
  fn seed<A: Auditable + ?Sized>(entity: &A) -> Self {
    let schema = entity.field_names();
    let transient = entity.is_destroyed();
    let attributes = if transient {
      // A blank instance: every known field, unset.
      schema
        .iter()
        .flatten()
        .map(|f| (f.clone(), serde_json::Value::Null))
        .collect()
    } else {
      entity.attributes()
    };

    Self {
      auditable: entity.identity(),
      attributes,
      schema,
      changed: BTreeSet::new(),
      transient,
    }
  }

  fn apply(&mut self, record: &AuditRecord) {
    for (field, value) in record.new_attributes() {
      // Fields the entity no longer has are dropped.
      if self.schema.as_ref().is_some_and(|s| !s.contains(&field)) {
        continue;
      }
      self.changed.insert(field.clone());
      self.attributes.insert(field, value);
    }
  }

  fn snapshot(&self, last: &AuditRecord) -> Revision {
    Revision {
      auditable:  self.auditable.clone(),
      version:    last.version,
      action:     last.action,
      created_at: last.created_at,
      attributes: self.attributes.clone(),
      changed:    self.changed.clone(),
      transient:  self.transient,
    }
  }
}

// ─── Reconstructor ───────────────────────────────────────────────────────────

/// Reads an entity's trail from a store and rebuilds past states.
pub struct RevisionReconstructor<'a, S> {
  store: &'a S,
}

impl<'a, S: AuditStore> RevisionReconstructor<'a, S> {
  pub fn new(store: &'a S) -> Self { Self { store } }

  async fn trail(&self, query: AuditQuery) -> Result<Vec<AuditRecord>> {
    let mut records = self.store.audits(&query).await.map_err(Into::<Error>::into)?;
    records.sort_by_key(|r| r.version);
    Ok(records)
  }

  fn replay_all<A>(entity: &A, records: &[AuditRecord]) -> Option<Revision>
  where
    A: Auditable + ?Sized,
  {
    let last = records.last()?;
    let mut replay = Replay::seed(entity);
    for r in records {
      replay.apply(r);
    }
    Some(replay.snapshot(last))
  }

  /// One revision per record with version ≥ `from_version`, each the full
  /// state right after that record. Empty when there are none.
  pub async fn revision_list<A>(&self, entity: &A, from_version: u32) -> Result<Vec<Revision>>
  where
    A: Auditable + ?Sized,
  {
    let records = self.trail(AuditQuery::for_entity(entity.identity())).await?;
    let split = records.partition_point(|r| r.version < from_version);
    let (earlier, targeted) = records.split_at(split);

    let mut replay = Replay::seed(entity);
    for r in earlier {
      replay.apply(r);
    }
    // Fields set before the window are part of the state, not changes
    // within it.
    replay.changed.clear();

    Ok(
      targeted
        .iter()
        .map(|r| {
          replay.apply(r);
          replay.snapshot(r)
        })
        .collect(),
    )
  }

  /// The state as of `selector`.
  ///
  /// [`VersionSelector::Previous`] means `entity.audit_version() - 1` when
  /// the entity carries a version (a [`Revision`] does), otherwise the
  /// version of the second-to-last record, or 1 when there is only one.
  /// Repeatedly asking a revision for its previous one walks back one step
  /// at a time.
  ///
  /// Returns `None` when the target is past the latest version or no record
  /// is at or below it.
  pub async fn revision_at_version<A>(
    &self,
    entity: &A,
    selector: impl Into<VersionSelector>,
  ) -> Result<Option<Revision>>
  where
    A: Auditable + ?Sized,
  {
    let identity = entity.identity();
    let target = match selector.into() {
      VersionSelector::Exact(v) => v,
      VersionSelector::Previous => match entity.audit_version() {
        Some(v) => v.saturating_sub(1),
        None => {
          let query = AuditQuery::for_entity(identity.clone()).descending().limit(2);
          let latest_two = self.store.audits(&query).await.map_err(Into::<Error>::into)?;
          latest_two.get(1).map_or(1, |r| r.version)
        }
      },
    };

    let latest = self.store.max_version(&identity).await.map_err(Into::<Error>::into)?;
    if target == 0 || latest.is_none_or(|l| target > l) {
      return Ok(None);
    }

    let records = self.trail(AuditQuery::for_entity(identity).to_version(target)).await?;
    Ok(Self::replay_all(entity, &records))
  }

  /// The state as of `at`: every record created at or before it. `None`
  /// when the entity has no record that old.
  pub async fn revision_at_time<A>(
    &self,
    entity: &A,
    at: DateTime<Utc>,
  ) -> Result<Option<Revision>>
  where
    A: Auditable + ?Sized,
  {
    let records = self.trail(AuditQuery::for_entity(entity.identity()).up_until(at)).await?;
    Ok(Self::replay_all(entity, &records))
  }

  /// The state right after `record`.
  pub async fn revision_of<A>(
    &self,
    entity: &A,
    record: &AuditRecord,
  ) -> Result<Option<Revision>>
  where
    A: Auditable + ?Sized,
  {
    self.revision_at_version(entity, record.version).await
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::{change_set, record::AuditDraft};

  fn rec(version: u32, action: Action, stored: serde_json::Value) -> AuditRecord {
    AuditDraft::new(EntityRef::new("User", 1), action, change_set::decode(&stored))
      .into_record(version, Utc::now())
  }

  #[test]
  fn reconstruct_applies_in_order() {
    let records = [
      rec(1, Action::Create, json!({ "name": "Brandon", "age": 30 })),
      rec(2, Action::Update, json!({ "name": ["Brandon", "Changed"] })),
    ];
    let attrs = reconstruct_attributes(&records);
    assert_eq!(attrs["name"], json!("Changed"));
    assert_eq!(attrs["age"], json!(30));
  }

  #[test]
  fn replay_drops_fields_outside_schema() {
    let tomb = crate::auditable::Tombstone::with_fields(EntityRef::new("User", 1), ["name"]);
    let records = [rec(1, Action::Create, json!({ "name": "Brandon", "legacy_flag": true }))];

    let rev = RevisionReconstructor::<crate::memory::MemoryStore>::replay_all(&tomb, &records)
      .unwrap();
    assert!(rev.transient);
    assert_eq!(rev.get("name"), Some(&json!("Brandon")));
    assert_eq!(rev.get("legacy_flag"), None);
    assert!(rev.was_changed("name"));
  }
}
