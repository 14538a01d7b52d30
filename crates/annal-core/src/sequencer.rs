//! Per-entity version numbering.
//!
//! Stores read the entity's current maximum version and call
//! [`next_version`] inside the same transaction (or under the same lock) as
//! the insert. That makes numbering exact for serialised writers. Racing
//! writers without a lock can still compute the same number; the unique
//! index on `(auditable_type, auditable_id, version)` turns that into a
//! [`crate::Error::WriteConflict`] instead of a silent overwrite.

use chrono::{DateTime, Utc};

/// The version following `current_max`; 1 for an entity with no audits.
pub fn next_version(current_max: Option<u32>) -> u32 { current_max.map_or(1, |v| v + 1) }

/// The timestamp for a new record: now, but never earlier than the entity's
/// latest record, so ordering by time agrees with ordering by version.
pub fn next_timestamp(latest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
  match latest {
    Some(latest) if latest > now => latest,
    _ => now,
  }
}
