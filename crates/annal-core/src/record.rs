//! The audit record: one immutable entry in an entity's history.
//!
//! A record is written once by [`crate::writer::AuditWriter`] and never
//! updated, except when [`crate::retention::RetentionCombiner`] folds older
//! records into it.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::change_set::ChangeSet;

/// A snapshot of an entity's field values.
pub type Attributes = BTreeMap<String, serde_json::Value>;

// ─── Identity ────────────────────────────────────────────────────────────────

/// A stable reference to a host entity: its type name and identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
  pub entity_type: String,
  pub entity_id:   String,
}

impl EntityRef {
  pub fn new(entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
    Self { entity_type: entity_type.into(), entity_id: entity_id.to_string() }
  }
}

impl fmt::Display for EntityRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.entity_type, self.entity_id)
  }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

/// Who made a change. Either an actor entity known to the host (a user
/// record, an API client) or a free-text name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
  Named { name: String },
  Referenced { actor: EntityRef },
}

impl Actor {
  pub fn named(name: impl Into<String>) -> Self { Self::Named { name: name.into() } }

  pub fn referenced(actor: EntityRef) -> Self { Self::Referenced { actor } }
}

impl From<&str> for Actor {
  fn from(name: &str) -> Self { Self::named(name) }
}

impl From<String> for Actor {
  fn from(name: String) -> Self { Self::named(name) }
}

impl From<EntityRef> for Actor {
  fn from(actor: EntityRef) -> Self { Self::referenced(actor) }
}

// ─── Action ──────────────────────────────────────────────────────────────────

/// The lifecycle event an audit record captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  Create,
  Update,
  Destroy,
}

impl Action {
  pub const ALL: [Action; 3] = [Action::Create, Action::Update, Action::Destroy];

  /// The string stored in the `action` column.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Destroy => "destroy",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "create" => Some(Self::Create),
      "update" => Some(Self::Update),
      "destroy" => Some(Self::Destroy),
      _ => None,
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// ─── AuditDraft ──────────────────────────────────────────────────────────────

/// Input to [`crate::store::AuditStore::append`]. The store assigns
/// `audit_id`, `version` and `created_at`; they are not accepted from callers.
#[derive(Debug, Clone)]
pub struct AuditDraft {
  pub auditable:      EntityRef,
  pub associated:     Option<EntityRef>,
  pub actor:          Option<Actor>,
  pub action:         Action,
  pub change_set:     ChangeSet,
  pub comment:        Option<String>,
  pub remote_address: Option<String>,
  pub request_id:     Option<String>,
}

impl AuditDraft {
  /// A draft with no attribution or context.
  pub fn new(auditable: EntityRef, action: Action, change_set: ChangeSet) -> Self {
    Self {
      auditable,
      associated: None,
      actor: None,
      action,
      change_set,
      comment: None,
      remote_address: None,
      request_id: None,
    }
  }

  /// Materialise the record once the store has picked the version and time.
  pub fn into_record(self, version: u32, created_at: DateTime<Utc>) -> AuditRecord {
    AuditRecord {
      audit_id: Uuid::new_v4(),
      auditable: self.auditable,
      associated: self.associated,
      actor: self.actor,
      action: self.action,
      change_set: self.change_set,
      version,
      comment: self.comment,
      remote_address: self.remote_address,
      request_id: self.request_id,
      created_at,
    }
  }
}

// ─── AuditRecord ─────────────────────────────────────────────────────────────

/// One captured create, update or destroy of a tracked entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
  pub audit_id:       Uuid,
  pub auditable:      EntityRef,
  /// A secondary entity (e.g. an owning parent) this change is also filed
  /// under.
  pub associated:     Option<EntityRef>,
  pub actor:          Option<Actor>,
  pub action:         Action,
  pub change_set:     ChangeSet,
  /// Starts at 1 and increases by one per record for the same entity.
  pub version:        u32,
  pub comment:        Option<String>,
  pub remote_address: Option<String>,
  pub request_id:     Option<String>,
  /// Store-assigned; never changes after creation.
  pub created_at:     DateTime<Utc>,
}

impl AuditRecord {
  /// Field → value after this change.
  pub fn new_attributes(&self) -> Attributes { self.change_set.new_attributes() }

  /// Field → value before this change (`null` where unknown).
  pub fn old_attributes(&self) -> Attributes { self.change_set.old_attributes() }

  /// The actor's free-text name, when the actor was recorded by name.
  pub fn actor_name(&self) -> Option<&str> {
    match &self.actor {
      Some(Actor::Named { name }) => Some(name),
      _ => None,
    }
  }

  /// The actor entity, when the actor was recorded by reference.
  pub fn actor_ref(&self) -> Option<&EntityRef> {
    match &self.actor {
      Some(Actor::Referenced { actor }) => Some(actor),
      _ => None,
    }
  }

  /// Replace the recorded actor. Whichever form was populated before is
  /// cleared.
  pub fn set_actor(&mut self, actor: impl Into<Actor>) { self.actor = Some(actor.into()); }

  /// How the host would revert this change.
  pub fn undo_plan(&self) -> UndoPlan {
    match self.action {
      Action::Create => UndoPlan::Destroy,
      Action::Update => UndoPlan::Restore(self.old_attributes()),
      Action::Destroy => UndoPlan::Recreate(self.new_attributes()),
    }
  }
}

/// The inverse of one audit record, for the host to apply to its entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "attributes", rename_all = "snake_case")]
pub enum UndoPlan {
  /// The audited create is reverted by destroying the entity.
  Destroy,
  /// The audited update is reverted by assigning these old values.
  Restore(Attributes),
  /// The audited destroy is reverted by recreating the entity with these
  /// values.
  Recreate(Attributes),
}
