//! [`AuditWriter`]: turns one create, update or destroy into at most one
//! persisted [`AuditRecord`].
//!
//! The host calls the writer at its own lifecycle points. The writer decides
//! whether anything is worth recording, filters and redacts the captured
//! fields, attributes the change from the ambient [`crate::context`], and
//! hands a draft to the store, which numbers it. After non-create writes it
//! runs retention when a cap is configured.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
  Error, Result,
  auditable::Auditable,
  change_set::ChangeSet,
  config::AuditConfig,
  context,
  record::{Action, AuditDraft, AuditRecord},
  retention::RetentionCombiner,
  store::AuditStore,
  switch::AuditingSwitch,
};

/// Captures mutations of [`Auditable`] entities into an [`AuditStore`].
pub struct AuditWriter<S> {
  store:  S,
  config: Arc<AuditConfig>,
  switch: AuditingSwitch,
}

fn present(comment: Option<&str>) -> Option<&str> { comment.filter(|c| !c.trim().is_empty()) }

impl<S: AuditStore> AuditWriter<S> {
  /// A writer with its own switch, initially set from `config.enabled`.
  pub fn new(store: S, config: AuditConfig) -> Self {
    let switch = AuditingSwitch::new(config.enabled);
    Self { store, config: Arc::new(config), switch }
  }

  /// A writer sharing configuration and switch state with other writers.
  pub fn with_switch(store: S, config: Arc<AuditConfig>, switch: AuditingSwitch) -> Self {
    Self { store, config, switch }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &AuditConfig { &self.config }

  pub fn switch(&self) -> &AuditingSwitch { &self.switch }

  /// Fails with [`Error::CommentRequired`] when `entity_type` requires a
  /// comment for `action` and none (or a blank one) was given. Hosts call
  /// this from their own validation so a missing comment blocks the
  /// mutation itself; the writer checks again before writing.
  pub fn validate_comment(
    &self,
    entity_type: &str,
    action: Action,
    comment: Option<&str>,
  ) -> Result<()> {
    if !self.switch.is_enabled(entity_type) {
      return Ok(());
    }
    if self.config.entity(entity_type).requires_comment(action) && present(comment).is_none() {
      return Err(Error::CommentRequired { entity_type: entity_type.to_owned(), action });
    }
    Ok(())
  }

  /// Record the creation of `entity`: its full audited snapshot.
  pub async fn record_create<A>(
    &self,
    entity: &A,
    comment: Option<&str>,
  ) -> Result<Option<AuditRecord>>
  where
    A: Auditable + ?Sized,
  {
    if !self.should_audit(entity, Action::Create) {
      return Ok(None);
    }
    self.validate_comment(&entity.identity().entity_type, Action::Create, comment)?;

    let changes = self.audited_changes(entity, ChangeSet::snapshot(entity.attributes()));
    self.write(entity, Action::Create, changes, comment).await.map(Some)
  }

  /// Record an update of `entity`: only the fields that actually changed.
  ///
  /// Returns `Ok(None)` when nothing changed, unless a comment was supplied
  /// and comment-only updates are configured to be kept.
  pub async fn record_update<A>(
    &self,
    entity: &A,
    comment: Option<&str>,
  ) -> Result<Option<AuditRecord>>
  where
    A: Auditable + ?Sized,
  {
    if !self.should_audit(entity, Action::Update) {
      return Ok(None);
    }

    let mut changes = entity.changed_fields();
    changes.retain(|_, c| !c.is_noop());
    let changes = self.audited_changes(entity, changes);

    if changes.is_empty() {
      if present(comment).is_none() || !self.config.persist_comment_only_updates {
        tracing::debug!(auditable = %entity.identity(), "no audited changes; update skipped");
        return Ok(None);
      }
    } else {
      self.validate_comment(&entity.identity().entity_type, Action::Update, comment)?;
    }

    self.write(entity, Action::Update, changes, comment).await.map(Some)
  }

  /// Record the destruction of `entity`: its audited snapshot just before it
  /// went away. Entities that were never persisted are not audited.
  pub async fn record_destroy<A>(
    &self,
    entity: &A,
    comment: Option<&str>,
  ) -> Result<Option<AuditRecord>>
  where
    A: Auditable + ?Sized,
  {
    if entity.is_new_record() || !self.should_audit(entity, Action::Destroy) {
      return Ok(None);
    }
    self.validate_comment(&entity.identity().entity_type, Action::Destroy, comment)?;

    let changes = self.audited_changes(entity, ChangeSet::snapshot(entity.attributes()));
    self.write(entity, Action::Destroy, changes, comment).await.map(Some)
  }

  fn should_audit<A: Auditable + ?Sized>(&self, entity: &A, action: Action) -> bool {
    let entity_type = entity.identity().entity_type;
    if !self.switch.is_enabled(&entity_type) {
      tracing::debug!(%entity_type, %action, "auditing disabled; skipped");
      return false;
    }
    self.config.entity(&entity_type).audits(action)
  }

  /// Drop ignored fields and mask redacted ones.
  fn audited_changes<A: Auditable + ?Sized>(
    &self,
    entity: &A,
    mut changes: ChangeSet,
  ) -> ChangeSet {
    let entity_type = entity.identity().entity_type;
    let ignored = entity.ignored_fields();
    let entity_cfg = self.config.entity(&entity_type);

    changes.retain(|field, _| self.config.is_audited_field(&entity_type, field, &ignored));
    changes.for_each_mut(|field, change| {
      if entity_cfg.is_redacted(field) {
        if !change.old.is_null() {
          change.old = self.config.redaction_value.clone();
        }
        change.new = self.config.redaction_value.clone();
      }
    });
    changes
  }

  async fn write<A: Auditable + ?Sized>(
    &self,
    entity: &A,
    action: Action,
    change_set: ChangeSet,
    comment: Option<&str>,
  ) -> Result<AuditRecord> {
    let auditable = entity.identity();
    let ctx = context::current().unwrap_or_default();

    let draft = AuditDraft {
      auditable:      auditable.clone(),
      associated:     entity.associated(),
      actor:          ctx.actor,
      action,
      change_set,
      comment:        present(comment).map(str::to_owned),
      remote_address: ctx.remote_address,
      request_id:     Some(ctx.request_id.unwrap_or_else(|| Uuid::new_v4().to_string())),
    };

    let record = self.store.append(draft).await.map_err(Into::<Error>::into)?;
    tracing::info!(%auditable, %action, version = record.version, "audit recorded");

    if action == Action::Create {
      return Ok(record);
    }
    let Some(max) = self.config.max_audits_for(&auditable.entity_type) else {
      return Ok(record);
    };

    // The record is committed; a failed combine leaves the trail long but
    // must not turn the write into an error.
    match RetentionCombiner::new(&self.store).combine_if_needed(&auditable, max).await {
      // With a cap of one the new record itself absorbs the history.
      Ok(Some(merged)) if merged.audit_id == record.audit_id => Ok(merged),
      Ok(_) => Ok(record),
      Err(e) => {
        tracing::warn!(%auditable, version = record.version, error = %e, "retention failed");
        Ok(record)
      }
    }
  }
}
