//! Error types for `annal-core`.

use thiserror::Error;

use crate::record::{Action, EntityRef};

#[derive(Debug, Error)]
pub enum Error {
  /// A comment is mandatory for this action on this entity type.
  #[error("an audit comment is required to {action} {entity_type}")]
  CommentRequired {
    entity_type: String,
    action:      Action,
  },

  /// Another writer already persisted this version for the entity. The
  /// caller may retry; the core never does.
  #[error("version {version} already exists for {auditable}")]
  WriteConflict {
    auditable: EntityRef,
    version:   u32,
  },

  #[error("audit not found: {0}")]
  AuditNotFound(uuid::Uuid),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap an arbitrary backend error.
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub fn is_write_conflict(&self) -> bool {
    matches!(self, Self::WriteConflict { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
