//! The `Auditable` trait: what the core needs from a tracked host entity.
//!
//! The host calls [`crate::writer::AuditWriter`] explicitly at its own
//! create/update/destroy points, handing over the entity through this trait.

use std::collections::BTreeSet;

use crate::{change_set::ChangeSet, record::{Attributes, EntityRef}};

/// A host entity whose mutations are tracked.
pub trait Auditable {
  /// Stable identity: type name and id.
  fn identity(&self) -> EntityRef;

  /// The entity's current field values.
  fn attributes(&self) -> Attributes;

  /// The pending `(old, new)` diff of the mutation being recorded. Only
  /// consulted by updates.
  fn changed_fields(&self) -> ChangeSet;

  /// Fields this entity never wants audited, on top of the configured
  /// ignore-list.
  fn ignored_fields(&self) -> BTreeSet<String> { BTreeSet::new() }

  /// The fields the entity's current schema knows. Replayed fields outside
  /// this set are dropped. `None` accepts every field.
  fn field_names(&self) -> Option<BTreeSet<String>> {
    Some(self.attributes().into_keys().collect())
  }

  /// A secondary entity the audits should also be filed under.
  fn associated(&self) -> Option<EntityRef> { None }

  /// True when the entity was never persisted; destroying it is not audited.
  fn is_new_record(&self) -> bool { false }

  /// True when the live entity no longer exists.
  fn is_destroyed(&self) -> bool { false }

  /// The audit version this instance represents, when it is itself a
  /// reconstructed revision.
  fn audit_version(&self) -> Option<u32> { None }
}

/// Stand-in for an entity whose live form is gone. Revisions built for it
/// are transient.
#[derive(Debug, Clone)]
pub struct Tombstone {
  pub identity: EntityRef,
  /// Known fields of the entity type, if the caller has a schema at hand.
  pub fields:   Option<BTreeSet<String>>,
}

impl Tombstone {
  pub fn new(identity: EntityRef) -> Self { Self { identity, fields: None } }

  pub fn with_fields<I, S>(identity: EntityRef, fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self { identity, fields: Some(fields.into_iter().map(Into::into).collect()) }
  }
}

impl Auditable for Tombstone {
  fn identity(&self) -> EntityRef { self.identity.clone() }

  fn attributes(&self) -> Attributes { Attributes::new() }

  fn changed_fields(&self) -> ChangeSet { ChangeSet::new() }

  fn field_names(&self) -> Option<BTreeSet<String>> { self.fields.clone() }

  fn is_destroyed(&self) -> bool { true }
}
