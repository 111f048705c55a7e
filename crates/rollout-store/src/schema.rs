/// SQL DDL for the rollout store database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS rollouts (
    id TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    expires_at INTEGER,
    status TEXT NOT NULL DEFAULT 'active',
    item_count INTEGER NOT NULL DEFAULT 0,
    session_meta TEXT,
    head TEXT NOT NULL DEFAULT '[]',
    tail TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS rollout_items (
    rollout_id TEXT NOT NULL REFERENCES rollouts(id),
    sequence INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (rollout_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_rollouts_updated ON rollouts(updated_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_rollouts_expires ON rollouts(expires_at);
CREATE INDEX IF NOT EXISTS idx_items_timestamp ON rollout_items(rollout_id, timestamp);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
