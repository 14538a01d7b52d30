//! [`RetentionCombiner`]: keeps an entity's trail at or below a cap by
//! folding its oldest records into one.

use crate::{
  Error, Result,
  change_set::ChangeSet,
  record::{AuditRecord, EntityRef},
  store::{AuditQuery, AuditStore},
};

/// Appended to the comment of a record that absorbed older ones.
pub const COMBINED_NOTE: &str = "This audit is the result of multiple audits being combined.";

/// Folds a version-ordered run of records into the change-set a single
/// record spanning all of them would carry: first old value and last new
/// value per field.
pub fn fold_changes(records: &[AuditRecord]) -> ChangeSet {
  let mut folded = ChangeSet::new();
  for r in records {
    folded.absorb_newer(&r.change_set);
  }
  folded
}

fn with_note(comment: Option<&str>) -> String {
  match comment {
    Some(c) if !c.is_empty() => format!("{c}\n{COMBINED_NOTE}"),
    _ => COMBINED_NOTE.to_owned(),
  }
}

pub struct RetentionCombiner<'a, S> {
  store: &'a S,
}

impl<'a, S: AuditStore> RetentionCombiner<'a, S> {
  pub fn new(store: &'a S) -> Self { Self { store } }

  /// If `entity` has more than `max_audits` records, merge the oldest
  /// `count - max_audits + 1` of them into the newest of that run and delete
  /// the rest. The survivor keeps its id and version.
  ///
  /// Returns the merged record, or `None` when nothing needed combining.
  /// A cap of zero disables retention.
  pub async fn combine_if_needed(
    &self,
    entity: &EntityRef,
    max_audits: usize,
  ) -> Result<Option<AuditRecord>> {
    if max_audits == 0 {
      return Ok(None);
    }

    let count = self.store.count(entity).await.map_err(Into::<Error>::into)?;
    if count <= max_audits {
      return Ok(None);
    }
    let take = count - max_audits + 1;

    let query = AuditQuery { limit: Some(take), ..AuditQuery::for_entity(entity.clone()) };
    let mut selected = self.store.audits(&query).await.map_err(Into::<Error>::into)?;
    selected.sort_by_key(|r| r.version);

    let Some(newest) = selected.last() else {
      return Ok(None);
    };

    let mut merged = newest.clone();
    merged.change_set = fold_changes(&selected);
    merged.comment = Some(with_note(newest.comment.as_deref()));

    let absorbed: Vec<_> = selected[..selected.len() - 1].iter().map(|r| r.audit_id).collect();
    self.store.replace_combined(&merged, &absorbed).await.map_err(Into::<Error>::into)?;

    tracing::info!(
      auditable = %entity,
      version = merged.version,
      absorbed = absorbed.len(),
      "combined audits"
    );
    Ok(Some(merged))
  }
}
