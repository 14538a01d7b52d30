//! SQL schema for the Annal SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Append-only, apart from retention which rewrites one survivor and deletes
-- the records it absorbed.
CREATE TABLE IF NOT EXISTS audit_records (
    audit_id        TEXT PRIMARY KEY,
    auditable_type  TEXT NOT NULL,
    auditable_id    TEXT NOT NULL,
    associated_type TEXT,
    associated_id   TEXT,
    actor_type      TEXT,            -- set with actor_id for a referenced actor
    actor_id        TEXT,
    actor_name      TEXT,            -- set alone for a named actor
    action          TEXT NOT NULL CHECK (action IN ('create', 'update', 'destroy')),
    change_set      TEXT NOT NULL,   -- JSON: {field: [old, new]}
    version         INTEGER NOT NULL CHECK (version >= 1),
    comment         TEXT,
    remote_address  TEXT,
    request_id      TEXT,
    created_at      TEXT NOT NULL,   -- fixed-width RFC 3339, UTC, microseconds
    UNIQUE (auditable_type, auditable_id, version)
);

CREATE INDEX IF NOT EXISTS audit_records_associated_idx
    ON audit_records(associated_type, associated_id);
CREATE INDEX IF NOT EXISTS audit_records_actor_idx
    ON audit_records(actor_type, actor_id);
CREATE INDEX IF NOT EXISTS audit_records_created_idx
    ON audit_records(created_at);

PRAGMA user_version = 1;
";
