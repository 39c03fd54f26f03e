//! SQL schema for the resolver SQLite store.
//!
//! Executed once at connection startup. The staging relation is not part of
//! the schema; it is created per file by the staging loader.

/// Name of the disposable per-file staging relation.
pub const STAGING_TABLE: &str = "staging";

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS datasets (
    id           TEXT PRIMARY KEY,
    data         TEXT NOT NULL,   -- JSON object of catalog metadata
    deleted_date TEXT             -- YYYY-MM-DD or NULL while live
);

-- Rows are never deleted; deleted_date marks logical deletion.
-- parent is a reference to another object's id but is not enforced: child
-- records may be merged before their core record.
CREATE TABLE IF NOT EXISTS objects (
    id           TEXT PRIMARY KEY COLLATE NOCASE,
    parent       TEXT COLLATE NOCASE,
    type         TEXT NOT NULL,
    dataset_id   TEXT NOT NULL,
    data         TEXT NOT NULL,
    created_date TEXT NOT NULL,
    deleted_date TEXT
);

-- Strictly append-only outside a full rebuild.
CREATE TABLE IF NOT EXISTS history (
    history_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    object_id    TEXT NOT NULL REFERENCES objects(id),
    changed_data TEXT NOT NULL,
    changed_date TEXT NOT NULL
);

-- One run's worth of normalized records; cleared at the start of each run.
CREATE TABLE IF NOT EXISTS migration (
    id         TEXT PRIMARY KEY COLLATE NOCASE,
    parent     TEXT,
    type       TEXT NOT NULL,
    dataset_id TEXT NOT NULL,
    data       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS statistics (
    name  TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS objects_dataset_idx   ON objects(dataset_id);
CREATE INDEX IF NOT EXISTS objects_parent_idx    ON objects(parent);
CREATE INDEX IF NOT EXISTS history_object_idx    ON history(object_id);
CREATE INDEX IF NOT EXISTS migration_dataset_idx ON migration(dataset_id);

PRAGMA user_version = 1;
";
