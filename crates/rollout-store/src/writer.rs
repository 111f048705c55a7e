use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{instrument, trace};

use rollout_core::{ConversationId, RolloutItem, RolloutItemKind};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::sweeper::{ActiveWriters, WriterRegistration};

/// Fixed length of the head/tail preview caches on the summary row.
pub(crate) const HEAD_CACHE_LEN: usize = 10;
pub(crate) const TAIL_CACHE_LEN: usize = 10;

/// One committed log entry, as returned on replay.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemRow {
    pub rollout_id: ConversationId,
    pub sequence: i64,
    /// Unix milliseconds, assigned at enqueue time.
    pub timestamp: i64,
    pub kind: RolloutItemKind,
    pub payload: serde_json::Value,
}

/// An enqueued item that has not reached durability yet. Sequence and
/// timestamp are fixed at enqueue so a retried flush commits identical rows.
#[derive(Clone, Debug)]
struct PendingItem {
    sequence: i64,
    timestamp: i64,
    item: RolloutItem,
}

struct PendingState {
    next_sequence: i64,
    buffer: Vec<PendingItem>,
}

/// Durable append path for a single rollout. Owns sequence issuance for its
/// rollout id for the lifetime of the process; buffered items become durable
/// only on `flush`, which commits the batch and the summary update in one
/// transaction.
pub struct RolloutWriter {
    db: Database,
    rollout_id: ConversationId,
    pending: Mutex<PendingState>,
    // Serializes flushes: a second caller waits here and then observes the
    // already-committed state instead of issuing a conflicting commit.
    flush_lock: Mutex<()>,
    _registration: WriterRegistration,
}

impl RolloutWriter {
    pub(crate) fn new(
        db: Database,
        writers: &ActiveWriters,
        rollout_id: ConversationId,
        start_sequence: i64,
    ) -> Result<Self, StoreError> {
        let registration = WriterRegistration::acquire(writers, rollout_id)?;
        Ok(Self {
            db,
            rollout_id,
            pending: Mutex::new(PendingState {
                next_sequence: start_sequence,
                buffer: Vec::new(),
            }),
            flush_lock: Mutex::new(()),
            _registration: registration,
        })
    }

    pub fn rollout_id(&self) -> ConversationId {
        self.rollout_id
    }

    /// Enqueue items, assigning each the next sequence number in call order.
    /// Pure in-memory operation; durability comes from `flush`.
    pub fn add_items(&self, items: Vec<RolloutItem>) {
        if items.is_empty() {
            return;
        }
        let now = Utc::now().timestamp_millis();
        let mut pending = self.pending.lock();
        for item in items {
            let sequence = pending.next_sequence;
            pending.next_sequence += 1;
            pending.buffer.push(PendingItem {
                sequence,
                timestamp: now,
                item,
            });
        }
        trace!(rollout_id = %self.rollout_id, buffered = pending.buffer.len(), "items enqueued");
    }

    /// Number of items currently buffered and not yet durable.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().buffer.len()
    }

    /// Commit all currently pending items and the summary update in one
    /// transaction. Idempotent: an empty buffer is a successful no-op. On
    /// failure the buffer is left intact for the next flush to retry.
    /// Returns the number of items committed.
    #[instrument(skip(self), fields(rollout_id = %self.rollout_id))]
    pub fn flush(&self) -> Result<usize, StoreError> {
        let _flush = self.flush_lock.lock();

        // Snapshot rather than drain: items stay buffered until the commit
        // lands, so a failed transaction loses nothing.
        let batch: Vec<PendingItem> = self.pending.lock().buffer.clone();
        if batch.is_empty() {
            return Ok(0);
        }

        self.db
            .with_tx(|tx| commit_batch(tx, &self.rollout_id, &batch))?;

        // Items enqueued during the commit keep their sequences and stay
        // buffered; only the committed prefix is dropped.
        self.pending.lock().buffer.drain(..batch.len());
        trace!(committed = batch.len(), "flush committed");
        Ok(batch.len())
    }

    /// Flush pending data; the underlying handle is released on drop.
    pub fn close(&self) -> Result<(), StoreError> {
        self.flush()?;
        Ok(())
    }
}

/// Insert a batch and advance the summary row atomically. The caller holds
/// the flush lock; this runs inside an open transaction.
fn commit_batch(
    conn: &Connection,
    rollout_id: &ConversationId,
    batch: &[PendingItem],
) -> Result<(), StoreError> {
    let (item_count, updated_at, session_meta, head, tail): (
        i64,
        i64,
        Option<String>,
        String,
        String,
    ) = conn
        .query_row(
            "SELECT item_count, updated_at, session_meta, head, tail FROM rollouts WHERE id = ?1",
            [rollout_id.to_string()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .map_err(|_| StoreError::NotFound(format!("rollout {rollout_id}")))?;

    let mut stmt = conn.prepare(
        "INSERT INTO rollout_items (rollout_id, sequence, timestamp, kind, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for pending in batch {
        stmt.execute(rusqlite::params![
            rollout_id.to_string(),
            pending.sequence,
            pending.timestamp,
            pending.item.kind.to_string(),
            serde_json::to_string(&pending.item.payload)?,
        ])?;
    }

    // session_meta is set once, from the first session_meta item ever seen.
    let session_meta = match session_meta {
        Some(existing) => Some(existing),
        None => batch
            .iter()
            .find(|p| p.item.kind == RolloutItemKind::SessionMeta)
            .map(|p| serde_json::to_string(&p.item.payload))
            .transpose()?,
    };

    let mut head: Vec<RolloutItem> =
        serde_json::from_str(&head).map_err(|e| StoreError::CorruptRow {
            table: "rollouts",
            column: "head",
            detail: format!("invalid item cache: {e}"),
        })?;
    let mut tail: Vec<RolloutItem> =
        serde_json::from_str(&tail).map_err(|e| StoreError::CorruptRow {
            table: "rollouts",
            column: "tail",
            detail: format!("invalid item cache: {e}"),
        })?;

    for pending in batch {
        if head.len() < HEAD_CACHE_LEN {
            head.push(pending.item.clone());
        }
        tail.push(pending.item.clone());
    }
    if tail.len() > TAIL_CACHE_LEN {
        tail.drain(..tail.len() - TAIL_CACHE_LEN);
    }

    // updated_at never moves backwards, even against a skewed clock.
    let now = Utc::now().timestamp_millis().max(updated_at);

    conn.execute(
        "UPDATE rollouts
         SET item_count = ?1, updated_at = ?2, session_meta = ?3, head = ?4, tail = ?5
         WHERE id = ?6",
        rusqlite::params![
            item_count + batch.len() as i64,
            now,
            session_meta,
            serde_json::to_string(&head)?,
            serde_json::to_string(&tail)?,
            rollout_id.to_string(),
        ],
    )?;

    Ok(())
}

/// List committed items for a rollout in ascending sequence order.
pub(crate) fn list_items(
    conn: &Connection,
    rollout_id: &ConversationId,
) -> Result<Vec<ItemRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT rollout_id, sequence, timestamp, kind, payload
         FROM rollout_items WHERE rollout_id = ?1
         ORDER BY sequence ASC",
    )?;
    let mut rows = stmt.query([rollout_id.to_string()])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(row_to_item(row)?);
    }
    Ok(items)
}

fn row_to_item(row: &rusqlite::Row<'_>) -> Result<ItemRow, StoreError> {
    let id_str: String = row_helpers::get(row, 0, "rollout_items", "rollout_id")?;
    let kind_str: String = row_helpers::get(row, 3, "rollout_items", "kind")?;
    let payload_str: String = row_helpers::get(row, 4, "rollout_items", "payload")?;

    Ok(ItemRow {
        rollout_id: row_helpers::parse_enum(&id_str, "rollout_items", "rollout_id")?,
        sequence: row_helpers::get(row, 1, "rollout_items", "sequence")?,
        timestamp: row_helpers::get(row, 2, "rollout_items", "timestamp")?,
        kind: row_helpers::parse_enum(&kind_str, "rollout_items", "kind")?,
        payload: row_helpers::parse_json(&payload_str, "rollout_items", "payload")?,
    })
}
