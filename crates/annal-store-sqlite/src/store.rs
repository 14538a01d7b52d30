//! [`SqliteStore`]: the SQLite implementation of [`AuditStore`].

use std::path::Path;

use annal_core::{
  record::{Actor, AuditDraft, AuditRecord, EntityRef},
  sequencer::{next_timestamp, next_version},
  store::{AuditQuery, AuditStore},
};
use chrono::{DateTime, Utc};
use rusqlite::{
  OptionalExtension as _, TransactionBehavior,
  types::{Type, Value},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    COLUMNS, RawAuditRecord, encode_actor, encode_change_set, encode_dt, encode_uuid,
    storable_dt,
  },
  schema::SCHEMA,
};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn is_unique_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(f, _)
      if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
  )
}

/// Insert `record` as is. Shared by `append` (inside its transaction) and
/// `import`.
fn insert_record(conn: &rusqlite::Connection, record: &AuditRecord) -> rusqlite::Result<()> {
  let (actor_type, actor_id, actor_name) = encode_actor(record.actor.as_ref());
  let (associated_type, associated_id) = match &record.associated {
    Some(e) => (Some(e.entity_type.as_str()), Some(e.entity_id.as_str())),
    None => (None, None),
  };

  conn.execute(
    &format!(
      "INSERT INTO audit_records ({COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
    ),
    rusqlite::params![
      encode_uuid(record.audit_id),
      record.auditable.entity_type,
      record.auditable.entity_id,
      associated_type,
      associated_id,
      actor_type,
      actor_id,
      actor_name,
      record.action.as_str(),
      encode_change_set(&record.change_set),
      record.version,
      record.comment,
      record.remote_address,
      record.request_id,
      encode_dt(record.created_at),
    ],
  )?;
  Ok(())
}

/// Translate an [`AuditQuery`] into a `WHERE` clause, its positional
/// parameters, and the trailing `ORDER BY … LIMIT`.
fn query_sql(query: &AuditQuery) -> (String, Vec<Value>) {
  let mut conds: Vec<String> = vec![];
  let mut params: Vec<Value> = vec![];

  // Anonymous `?` placeholders bind in order of appearance.
  let mut push = |cond: &str, values: Vec<Value>| {
    conds.push(cond.to_owned());
    params.extend(values);
  };

  if let Some(e) = &query.auditable {
    push("auditable_type = ? AND auditable_id = ?", entity_params(e));
  }
  if let Some(e) = &query.associated {
    push("associated_type = ? AND associated_id = ?", entity_params(e));
  }
  if let Some(e) = &query.own_or_associated {
    let mut values = entity_params(e);
    values.extend(entity_params(e));
    push(
      "((auditable_type = ? AND auditable_id = ?) OR (associated_type = ? AND associated_id = ?))",
      values,
    );
  }
  match &query.actor {
    Some(Actor::Referenced { actor }) => {
      push("actor_type = ? AND actor_id = ?", entity_params(actor));
    }
    Some(Actor::Named { name }) => {
      push("actor_type IS NULL AND actor_name = ?", vec![Value::Text(name.clone())]);
    }
    None => {}
  }
  if let Some(a) = query.action {
    push("action = ?", vec![Value::Text(a.as_str().to_owned())]);
  }
  if let Some(v) = query.from_version {
    push("version >= ?", vec![Value::Integer(v.into())]);
  }
  if let Some(v) = query.to_version {
    push("version <= ?", vec![Value::Integer(v.into())]);
  }
  if let Some(t) = query.created_before {
    push("created_at <= ?", vec![Value::Text(encode_dt(t))]);
  }
  if let Some(t) = query.created_after {
    push("created_at > ?", vec![Value::Text(encode_dt(t))]);
  }

  let where_clause = if conds.is_empty() {
    String::new()
  } else {
    format!("WHERE {}", conds.join(" AND "))
  };
  let dir = if query.descending { "DESC" } else { "ASC" };
  let limit = query.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

  let sql = format!(
    "SELECT {COLUMNS} FROM audit_records
     {where_clause}
     ORDER BY created_at {dir}, version {dir}
     LIMIT {limit}"
  );
  (sql, params)
}

fn entity_params(e: &EntityRef) -> Vec<Value> {
  vec![Value::Text(e.entity_type.clone()), Value::Text(e.entity_id.clone())]
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// An audit store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    tracing::debug!("audit schema ready");
    Ok(())
  }

  /// Insert a fully-formed record as is, e.g. when importing an existing
  /// trail. Fails with [`Error::Conflict`] if the entity already has that
  /// version.
  pub async fn import(&self, record: AuditRecord) -> Result<()> {
    let auditable = record.auditable.clone();
    let version = record.version;

    let inserted = self
      .conn
      .call(move |conn| match insert_record(conn, &record) {
        Ok(()) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(e.into()),
      })
      .await?;

    if !inserted {
      tracing::warn!(%auditable, version, "import rejected: version exists");
      return Err(Error::Conflict { auditable, version });
    }
    Ok(())
  }
}

#[cfg(test)]
impl SqliteStore {
  pub(crate) fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }
}

// ─── AuditStore impl ─────────────────────────────────────────────────────────

impl AuditStore for SqliteStore {
  type Error = Error;

  async fn append(&self, draft: AuditDraft) -> Result<AuditRecord> {
    let auditable = draft.auditable.clone();

    // Ok(Err(version)) signals a unique-index clash; the transaction is
    // rolled back when dropped.
    let outcome: std::result::Result<AuditRecord, u32> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (max_version, latest_at): (Option<u32>, Option<String>) = tx.query_row(
          "SELECT MAX(version), MAX(created_at) FROM audit_records
           WHERE auditable_type = ?1 AND auditable_id = ?2",
          rusqlite::params![draft.auditable.entity_type, draft.auditable.entity_id],
          |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let latest_at = latest_at
          .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
          .transpose()
          .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

        let version = next_version(max_version);
        let created_at = storable_dt(next_timestamp(latest_at, Utc::now()));
        let record = draft.into_record(version, created_at);

        match insert_record(&tx, &record) {
          Ok(()) => {
            tx.commit()?;
            Ok(Ok(record))
          }
          Err(e) if is_unique_violation(&e) => Ok(Err(version)),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    outcome.map_err(|version| {
      tracing::warn!(%auditable, version, "audit write conflict");
      Error::Conflict { auditable, version }
    })
  }

  async fn get_audit(&self, audit_id: Uuid) -> Result<Option<AuditRecord>> {
    let id_str = encode_uuid(audit_id);

    let raw: Option<RawAuditRecord> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {COLUMNS} FROM audit_records WHERE audit_id = ?1"),
              rusqlite::params![id_str],
              RawAuditRecord::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAuditRecord::into_record).transpose()
  }

  async fn max_version(&self, entity: &EntityRef) -> Result<Option<u32>> {
    let (t, id) = (entity.entity_type.clone(), entity.entity_id.clone());

    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(conn.query_row(
            "SELECT MAX(version) FROM audit_records
             WHERE auditable_type = ?1 AND auditable_id = ?2",
            rusqlite::params![t, id],
            |row| row.get::<_, Option<u32>>(0),
          )?)
        })
        .await?,
    )
  }

  async fn count(&self, entity: &EntityRef) -> Result<usize> {
    let (t, id) = (entity.entity_type.clone(), entity.entity_id.clone());

    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM audit_records WHERE auditable_type = ?1 AND auditable_id = ?2",
          rusqlite::params![t, id],
          |row| row.get(0),
        )?)
      })
      .await?;

    usize::try_from(n).map_err(|e| Error::Parse(format!("bad count {n}: {e}")))
  }

  async fn audits(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
    let (sql, params) = query_sql(query);

    let raws: Vec<RawAuditRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawAuditRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAuditRecord::into_record).collect()
  }

  async fn replace_combined(&self, merged: &AuditRecord, absorbed: &[Uuid]) -> Result<()> {
    let merged_id = merged.audit_id;
    let id_str = encode_uuid(merged_id);
    let change_set = encode_change_set(&merged.change_set);
    let comment = merged.comment.clone();
    let absorbed: Vec<String> = absorbed.iter().copied().map(encode_uuid).collect();

    let found = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let updated = tx.execute(
          "UPDATE audit_records SET change_set = ?1, comment = ?2 WHERE audit_id = ?3",
          rusqlite::params![change_set, comment, id_str],
        )?;
        if updated == 0 {
          return Ok(false);
        }
        for id in &absorbed {
          tx.execute("DELETE FROM audit_records WHERE audit_id = ?1", rusqlite::params![id])?;
        }
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !found {
      return Err(Error::NotFound(merged_id));
    }
    Ok(())
  }
}
