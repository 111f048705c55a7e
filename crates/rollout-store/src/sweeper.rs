use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use rollout_core::ConversationId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Registry of rollout ids with a live writer. Cleanup refuses to delete a
/// rollout while its writer is still registered, so an unflushed buffer can
/// never race against expiry deletion.
#[derive(Clone, Default)]
pub struct ActiveWriters {
    inner: Arc<Mutex<HashSet<ConversationId>>>,
}

impl ActiveWriters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a writer. Returns false if one is already live for this id.
    pub(crate) fn register(&self, id: ConversationId) -> bool {
        self.inner.lock().insert(id)
    }

    pub(crate) fn release(&self, id: &ConversationId) {
        self.inner.lock().remove(id);
    }

    pub fn is_active(&self, id: &ConversationId) -> bool {
        self.inner.lock().contains(id)
    }
}

/// Removes a writer's registry entry when the writer is dropped.
pub(crate) struct WriterRegistration {
    writers: ActiveWriters,
    id: ConversationId,
}

impl WriterRegistration {
    pub(crate) fn acquire(
        writers: &ActiveWriters,
        id: ConversationId,
    ) -> Result<Self, StoreError> {
        if !writers.register(id) {
            return Err(StoreError::Validation(format!(
                "a writer is already active for rollout {id}"
            )));
        }
        Ok(Self {
            writers: writers.clone(),
            id,
        })
    }
}

impl Drop for WriterRegistration {
    fn drop(&mut self) {
        self.writers.release(&self.id);
    }
}

/// Delete every rollout whose `expires_at` is at or before `now` (unix
/// millis), summary and items together, one transaction per rollout so a
/// partially deleted rollout is never observable. Returns the number of
/// rollouts removed.
#[instrument(skip(db, active))]
pub fn cleanup_expired(
    db: &Database,
    active: &ActiveWriters,
    now: i64,
) -> Result<usize, StoreError> {
    let expired: Vec<ConversationId> = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM rollouts WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        )?;
        let mut rows = stmt.query([now])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row_helpers::get(row, 0, "rollouts", "id")?;
            ids.push(row_helpers::parse_enum(&raw, "rollouts", "id")?);
        }
        Ok(ids)
    })?;

    let mut deleted = 0;
    for id in expired {
        if active.is_active(&id) {
            warn!(rollout_id = %id, "skipping expired rollout with live writer");
            continue;
        }
        db.with_tx(|tx| {
            tx.execute(
                "DELETE FROM rollout_items WHERE rollout_id = ?1",
                [id.to_string()],
            )?;
            tx.execute("DELETE FROM rollouts WHERE id = ?1", [id.to_string()])?;
            Ok(())
        })?;
        deleted += 1;
    }

    if deleted > 0 {
        info!(deleted, "expired rollouts removed");
    }
    Ok(deleted)
}
