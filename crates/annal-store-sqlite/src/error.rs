//! Error type for `annal-store-sqlite`.

use annal_core::record::EntityRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  /// A column held a value that does not decode (bad timestamp, unknown
  /// action, half-populated actor).
  #[error("parse error: {0}")]
  Parse(String),

  /// The `(auditable_type, auditable_id, version)` unique index rejected an
  /// insert.
  #[error("version {version} already exists for {auditable}")]
  Conflict { auditable: EntityRef, version: u32 },

  #[error("audit not found: {0}")]
  NotFound(uuid::Uuid),
}

impl From<Error> for annal_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Conflict { auditable, version } => Self::WriteConflict { auditable, version },
      Error::NotFound(id) => Self::AuditNotFound(id),
      Error::Json(e) => Self::Serialization(e),
      other => Self::store(other),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
