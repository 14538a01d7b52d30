//! [`MemoryStore`]: an in-process [`AuditStore`].
//!
//! Holds every record in one mutex-guarded vector. Each operation runs under
//! the lock, which gives the same atomicity the SQLite backend gets from
//! transactions. Useful for tests and for hosts that ship audits elsewhere.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::{
  Error, Result,
  record::{AuditDraft, AuditRecord, EntityRef},
  sequencer::{next_timestamp, next_version},
  store::{AuditQuery, AuditStore},
};

/// Cloning is cheap; clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, Vec<AuditRecord>> {
    self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Insert a fully-formed record as is, e.g. when importing an existing
  /// trail. Rejects a version the entity already has.
  pub fn import(&self, record: AuditRecord) -> Result<()> {
    let mut records = self.lock();
    if records
      .iter()
      .any(|r| r.auditable == record.auditable && r.version == record.version)
    {
      return Err(Error::WriteConflict { auditable: record.auditable, version: record.version });
    }
    records.push(record);
    Ok(())
  }

  /// Total number of records across all entities.
  pub fn len(&self) -> usize { self.lock().len() }

  pub fn is_empty(&self) -> bool { self.lock().is_empty() }
}

impl AuditStore for MemoryStore {
  type Error = Error;

  async fn append(&self, draft: AuditDraft) -> Result<AuditRecord> {
    let mut records = self.lock();

    let latest = records
      .iter()
      .filter(|r| r.auditable == draft.auditable)
      .max_by_key(|r| r.version);
    let version = next_version(latest.map(|r| r.version));
    let created_at = next_timestamp(latest.map(|r| r.created_at), Utc::now());

    let record = draft.into_record(version, created_at);
    records.push(record.clone());
    Ok(record)
  }

  async fn get_audit(&self, audit_id: Uuid) -> Result<Option<AuditRecord>> {
    Ok(self.lock().iter().find(|r| r.audit_id == audit_id).cloned())
  }

  async fn max_version(&self, entity: &EntityRef) -> Result<Option<u32>> {
    Ok(
      self
        .lock()
        .iter()
        .filter(|r| r.auditable == *entity)
        .map(|r| r.version)
        .max(),
    )
  }

  async fn count(&self, entity: &EntityRef) -> Result<usize> {
    Ok(self.lock().iter().filter(|r| r.auditable == *entity).count())
  }

  async fn audits(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
    let mut found: Vec<AuditRecord> =
      self.lock().iter().filter(|r| query.matches(r)).cloned().collect();

    found.sort_by(|a, b| (a.created_at, a.version).cmp(&(b.created_at, b.version)));
    if query.descending {
      found.reverse();
    }
    if let Some(limit) = query.limit {
      found.truncate(limit);
    }
    Ok(found)
  }

  async fn replace_combined(&self, merged: &AuditRecord, absorbed: &[Uuid]) -> Result<()> {
    let mut records = self.lock();

    let Some(target) = records.iter_mut().find(|r| r.audit_id == merged.audit_id) else {
      return Err(Error::AuditNotFound(merged.audit_id));
    };
    target.change_set = merged.change_set.clone();
    target.comment = merged.comment.clone();

    records.retain(|r| !absorbed.contains(&r.audit_id));
    Ok(())
  }
}
