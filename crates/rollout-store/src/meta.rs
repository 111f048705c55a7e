use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use rollout_core::{ConversationId, RolloutItem};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Active,
    Completed,
}

impl std::fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for RolloutStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown rollout status: {other}")),
        }
    }
}

/// Per-rollout summary record. `updated_at` and `item_count` only ever
/// advance, and only inside the same transaction as the item batch that
/// caused the change. Timestamps are unix milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RolloutMetaRow {
    pub id: ConversationId,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: Option<i64>,
    pub status: RolloutStatus,
    pub item_count: i64,
    /// First session_meta payload, set once and never overwritten.
    pub session_meta: Option<serde_json::Value>,
    /// Cached first items for cheap preview without scanning the item log.
    pub head: Vec<RolloutItem>,
    /// Cached last items, refreshed on every flush.
    pub tail: Vec<RolloutItem>,
}

pub(crate) const META_COLUMNS: &str =
    "id, created_at, updated_at, expires_at, status, item_count, session_meta, head, tail";

pub(crate) fn row_to_meta(row: &rusqlite::Row<'_>) -> Result<RolloutMetaRow, StoreError> {
    let id_str: String = row_helpers::get(row, 0, "rollouts", "id")?;
    let status_str: String = row_helpers::get(row, 4, "rollouts", "status")?;
    let session_meta_str: Option<String> = row_helpers::get_opt(row, 6, "rollouts", "session_meta")?;
    let head_str: String = row_helpers::get(row, 7, "rollouts", "head")?;
    let tail_str: String = row_helpers::get(row, 8, "rollouts", "tail")?;

    Ok(RolloutMetaRow {
        id: row_helpers::parse_enum(&id_str, "rollouts", "id")?,
        created_at: row_helpers::get(row, 1, "rollouts", "created_at")?,
        updated_at: row_helpers::get(row, 2, "rollouts", "updated_at")?,
        expires_at: row_helpers::get_opt(row, 3, "rollouts", "expires_at")?,
        status: row_helpers::parse_enum(&status_str, "rollouts", "status")?,
        item_count: row_helpers::get(row, 5, "rollouts", "item_count")?,
        session_meta: session_meta_str
            .map(|raw| row_helpers::parse_json(&raw, "rollouts", "session_meta"))
            .transpose()?,
        head: parse_cached_items(&head_str, "head")?,
        tail: parse_cached_items(&tail_str, "tail")?,
    })
}

fn parse_cached_items(raw: &str, column: &'static str) -> Result<Vec<RolloutItem>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table: "rollouts",
        column,
        detail: format!("invalid item cache: {e}"),
    })
}

/// Insert the initial summary row for a new rollout.
pub(crate) fn insert_meta(
    conn: &Connection,
    id: &ConversationId,
    created_at: i64,
    expires_at: Option<i64>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO rollouts (id, created_at, updated_at, expires_at, status, item_count, head, tail)
         VALUES (?1, ?2, ?2, ?3, 'active', 0, '[]', '[]')",
        rusqlite::params![id.to_string(), created_at, expires_at],
    )?;
    Ok(())
}

pub(crate) fn get_meta_conn(
    conn: &Connection,
    id: &ConversationId,
) -> Result<Option<RolloutMetaRow>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {META_COLUMNS} FROM rollouts WHERE id = ?1"))?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_meta(row)?)),
        None => Ok(None),
    }
}

/// Get the summary record for a rollout.
pub fn get_meta(db: &Database, id: &ConversationId) -> Result<RolloutMetaRow, StoreError> {
    db.with_conn(|conn| {
        get_meta_conn(conn, id)?.ok_or_else(|| StoreError::NotFound(format!("rollout {id}")))
    })
}

/// Max committed sequence for a rollout, or None if no items are committed.
pub(crate) fn max_committed_sequence(
    conn: &Connection,
    id: &ConversationId,
) -> Result<Option<i64>, StoreError> {
    let max: Option<i64> = conn
        .query_row(
            "SELECT MAX(sequence) FROM rollout_items WHERE rollout_id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    Ok(max)
}
