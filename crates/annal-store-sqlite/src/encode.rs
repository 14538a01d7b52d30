//! Encoding and decoding helpers between the core record types and the
//! plain-text representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (UTC, microsecond
//! precision, `Z` suffix) so that text order in SQL is time order. The
//! change-set is stored as compact JSON in its `{field: [old, new]}` form.
//! UUIDs are stored as hyphenated lowercase strings.

use annal_core::{
  change_set,
  record::{Action, Actor, AuditRecord, EntityRef},
};
use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// Drop precision the column cannot hold, so a record handed back by
/// `append` equals the one read later.
pub fn storable_dt(dt: DateTime<Utc>) -> DateTime<Utc> { dt.trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Parse(format!("bad timestamp {s:?}: {e}")))
}

// ─── Action ──────────────────────────────────────────────────────────────────

pub fn decode_action(s: &str) -> Result<Action> {
  Action::parse(s).ok_or_else(|| Error::Parse(format!("unknown action: {s:?}")))
}

// ─── Actor ───────────────────────────────────────────────────────────────────

/// Column triple `(actor_type, actor_id, actor_name)`.
pub type ActorColumns = (Option<String>, Option<String>, Option<String>);

pub fn encode_actor(actor: Option<&Actor>) -> ActorColumns {
  match actor {
    None => (None, None, None),
    Some(Actor::Named { name }) => (None, None, Some(name.clone())),
    Some(Actor::Referenced { actor }) => {
      (Some(actor.entity_type.clone()), Some(actor.entity_id.clone()), None)
    }
  }
}

pub fn decode_actor(cols: ActorColumns) -> Result<Option<Actor>> {
  match cols {
    (Some(t), Some(id), _) => Ok(Some(Actor::referenced(EntityRef::new(t, id)))),
    (None, None, Some(name)) => Ok(Some(Actor::named(name))),
    (None, None, None) => Ok(None),
    (t, id, _) => Err(Error::Parse(format!("half-populated actor: type={t:?} id={id:?}"))),
  }
}

fn decode_entity(entity_type: Option<String>, entity_id: Option<String>) -> Option<EntityRef> {
  match (entity_type, entity_id) {
    (Some(t), Some(id)) => Some(EntityRef::new(t, id)),
    _ => None,
  }
}

// ─── Change set ──────────────────────────────────────────────────────────────

pub fn encode_change_set(changes: &change_set::ChangeSet) -> String {
  change_set::encode(changes).to_string()
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching the field order of [`RawAuditRecord::from_row`].
pub const COLUMNS: &str = "audit_id, auditable_type, auditable_id, associated_type, \
                           associated_id, actor_type, actor_id, actor_name, action, \
                           change_set, version, comment, remote_address, request_id, created_at";

/// Raw values read directly from an `audit_records` row.
pub struct RawAuditRecord {
  pub audit_id:        String,
  pub auditable_type:  String,
  pub auditable_id:    String,
  pub associated_type: Option<String>,
  pub associated_id:   Option<String>,
  pub actor_type:      Option<String>,
  pub actor_id:        Option<String>,
  pub actor_name:      Option<String>,
  pub action:          String,
  pub change_set:      String,
  pub version:         u32,
  pub comment:         Option<String>,
  pub remote_address:  Option<String>,
  pub request_id:      Option<String>,
  pub created_at:      String,
}

impl RawAuditRecord {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      audit_id:        row.get(0)?,
      auditable_type:  row.get(1)?,
      auditable_id:    row.get(2)?,
      associated_type: row.get(3)?,
      associated_id:   row.get(4)?,
      actor_type:      row.get(5)?,
      actor_id:        row.get(6)?,
      actor_name:      row.get(7)?,
      action:          row.get(8)?,
      change_set:      row.get(9)?,
      version:         row.get(10)?,
      comment:         row.get(11)?,
      remote_address:  row.get(12)?,
      request_id:      row.get(13)?,
      created_at:      row.get(14)?,
    })
  }

  pub fn into_record(self) -> Result<AuditRecord> {
    let stored: serde_json::Value = serde_json::from_str(&self.change_set)?;

    Ok(AuditRecord {
      audit_id:       decode_uuid(&self.audit_id)?,
      auditable:      EntityRef::new(self.auditable_type, self.auditable_id),
      associated:     decode_entity(self.associated_type, self.associated_id),
      actor:          decode_actor((self.actor_type, self.actor_id, self.actor_name))?,
      action:         decode_action(&self.action)?,
      change_set:     change_set::decode(&stored),
      version:        self.version,
      comment:        self.comment,
      remote_address: self.remote_address,
      request_id:     self.request_id,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}
