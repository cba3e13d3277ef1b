/// Schema for the local database.
///
/// `cache_partitions` rowid order doubles as partition creation order, which
/// cross-partition lookups rely on.
pub const SCHEMA: &str = r#"
-- Named cache partitions
CREATE TABLE IF NOT EXISTS cache_partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One response snapshot per request key per partition
CREATE TABLE IF NOT EXISTS cache_entries (
    partition_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(request_key);

-- Durable key/value rows (sync queue, misc state)
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
