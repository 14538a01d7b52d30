//! The `AuditStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (`annal-store-sqlite`, and
//! [`crate::memory::MemoryStore`]). The writer, reconstructor and combiner
//! depend on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::record::{Action, Actor, AuditDraft, AuditRecord, EntityRef};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`AuditStore::audits`]. All filters are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
  /// Records of this entity.
  pub auditable:         Option<EntityRef>,
  /// Records filed under this associated entity.
  pub associated:        Option<EntityRef>,
  /// Records of this entity *or* filed under it.
  pub own_or_associated: Option<EntityRef>,
  pub actor:             Option<Actor>,
  pub action:            Option<Action>,
  /// Inclusive lower bound on `version`.
  pub from_version:      Option<u32>,
  /// Inclusive upper bound on `version`.
  pub to_version:        Option<u32>,
  /// Inclusive upper bound on `created_at`.
  pub created_before:    Option<DateTime<Utc>>,
  /// Exclusive lower bound on `created_at`.
  pub created_after:     Option<DateTime<Utc>>,
  /// Newest first instead of oldest first.
  pub descending:        bool,
  pub limit:             Option<usize>,
}

impl AuditQuery {
  /// Every record of `entity`, oldest first.
  pub fn for_entity(entity: EntityRef) -> Self {
    Self { auditable: Some(entity), ..Default::default() }
  }

  pub fn from_version(mut self, version: u32) -> Self {
    self.from_version = Some(version);
    self
  }

  pub fn to_version(mut self, version: u32) -> Self {
    self.to_version = Some(version);
    self
  }

  pub fn up_until(mut self, at: DateTime<Utc>) -> Self {
    self.created_before = Some(at);
    self
  }

  pub fn action(mut self, action: Action) -> Self {
    self.action = Some(action);
    self
  }

  pub fn descending(mut self) -> Self {
    self.descending = true;
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  /// In-memory form of the filters. Backends that cannot express a filter
  /// natively may post-filter with this.
  pub fn matches(&self, r: &AuditRecord) -> bool {
    if self.auditable.as_ref().is_some_and(|e| *e != r.auditable) {
      return false;
    }
    if self.associated.as_ref().is_some_and(|e| r.associated.as_ref() != Some(e)) {
      return false;
    }
    if let Some(e) = &self.own_or_associated {
      if r.auditable != *e && r.associated.as_ref() != Some(e) {
        return false;
      }
    }
    if self.actor.as_ref().is_some_and(|a| r.actor.as_ref() != Some(a)) {
      return false;
    }
    if self.action.is_some_and(|a| a != r.action) {
      return false;
    }
    if self.from_version.is_some_and(|v| r.version < v) {
      return false;
    }
    if self.to_version.is_some_and(|v| r.version > v) {
      return false;
    }
    if self.created_before.is_some_and(|t| r.created_at > t) {
      return false;
    }
    if self.created_after.is_some_and(|t| r.created_at <= t) {
      return false;
    }
    true
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an audit-record backend.
///
/// Records are append-only. The one sanctioned mutation is
/// [`replace_combined`](AuditStore::replace_combined), used by retention.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait AuditStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static + Into<crate::Error>;

  /// Persist a new record. The store assigns id, timestamp and the next
  /// version (see [`crate::sequencer`]) atomically with the insert. A
  /// version clash must surface as [`crate::Error::WriteConflict`].
  fn append(
    &self,
    draft: AuditDraft,
  ) -> impl Future<Output = Result<AuditRecord, Self::Error>> + Send + '_;

  /// Retrieve one record by id. Returns `None` if not found.
  fn get_audit(
    &self,
    audit_id: Uuid,
  ) -> impl Future<Output = Result<Option<AuditRecord>, Self::Error>> + Send + '_;

  /// The highest version recorded for `entity`, if any.
  fn max_version<'a>(
    &'a self,
    entity: &'a EntityRef,
  ) -> impl Future<Output = Result<Option<u32>, Self::Error>> + Send + 'a;

  /// Number of records for `entity`.
  fn count<'a>(
    &'a self,
    entity: &'a EntityRef,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Records matching `query`. Ordered by `(created_at, version)`,
  /// ascending unless `query.descending`; for a single entity this is
  /// version order.
  fn audits<'a>(
    &'a self,
    query: &'a AuditQuery,
  ) -> impl Future<Output = Result<Vec<AuditRecord>, Self::Error>> + Send + 'a;

  /// Atomically overwrite `merged` (matched by `audit_id`; its change-set and
  /// comment are replaced) and delete every record in `absorbed`. Either all
  /// of it happens or none of it does.
  fn replace_combined<'a>(
    &'a self,
    merged: &'a AuditRecord,
    absorbed: &'a [Uuid],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
