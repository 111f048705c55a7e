use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument};

use rollout_core::{ConversationId, RolloutItem};

use crate::database::Database;
use crate::error::StoreError;
use crate::meta;
use crate::sweeper::ActiveWriters;
use crate::writer::{self, ItemRow, RolloutWriter};

/// How a recorder binds to a rollout: start a fresh one or pick up an
/// existing one where its committed sequence left off.
#[derive(Clone, Debug)]
pub enum RolloutRecorderParams {
    Create { conversation_id: ConversationId },
    Resume { conversation_id: ConversationId },
}

impl RolloutRecorderParams {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self::Create { conversation_id }
    }

    pub fn resume(conversation_id: ConversationId) -> Self {
        Self::Resume { conversation_id }
    }
}

/// Replay result for a rollout id.
#[derive(Clone, Debug, PartialEq)]
pub enum InitialHistory {
    /// No rollout recorded under this id.
    New,
    /// The full ordered item sequence, regardless of how many flush batches
    /// produced it.
    Resumed { history: Vec<ItemRow> },
}

/// Lifecycle entry point for recording one rollout: create or resume a
/// writer, buffer items through it, flush, and finally shut down.
pub struct RolloutRecorder {
    db: Database,
    writer: RolloutWriter,
}

impl RolloutRecorder {
    /// Bind a recorder per `params`. Creating inserts the initial summary
    /// row (status=active, expiry from the configured TTL); resuming reads
    /// the max committed sequence and continues at max + 1, or fails with
    /// NotFound for an unknown id.
    #[instrument(skip(db, writers, retention_ttl))]
    pub(crate) fn new(
        db: &Database,
        writers: &ActiveWriters,
        params: RolloutRecorderParams,
        retention_ttl: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let writer = match params {
            RolloutRecorderParams::Create { conversation_id } => {
                let now = Utc::now().timestamp_millis();
                let expires_at = retention_ttl.map(|ttl| now + ttl.as_millis() as i64);
                db.with_tx(|tx| meta::insert_meta(tx, &conversation_id, now, expires_at))?;
                info!(rollout_id = %conversation_id, "rollout created");
                RolloutWriter::new(db.clone(), writers, conversation_id, 0)?
            }
            RolloutRecorderParams::Resume { conversation_id } => {
                let start_sequence = db.with_conn(|conn| {
                    if meta::get_meta_conn(conn, &conversation_id)?.is_none() {
                        return Err(StoreError::NotFound(format!("rollout {conversation_id}")));
                    }
                    Ok(meta::max_committed_sequence(conn, &conversation_id)?
                        .map_or(0, |max| max + 1))
                })?;
                info!(rollout_id = %conversation_id, start_sequence, "rollout resumed");
                RolloutWriter::new(db.clone(), writers, conversation_id, start_sequence)?
            }
        };

        Ok(Self {
            db: db.clone(),
            writer,
        })
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.writer.rollout_id()
    }

    /// Buffer items for the bound rollout. Never fails on storage
    /// conditions; only `flush` can.
    pub fn record_items(&self, items: Vec<RolloutItem>) {
        self.writer.add_items(items);
    }

    /// Durability barrier: commit everything buffered so far.
    pub fn flush(&self) -> Result<usize, StoreError> {
        self.writer.flush()
    }

    /// Flush pending items, mark the rollout completed, and release the
    /// writer (consumes the recorder).
    #[instrument(skip(self), fields(rollout_id = %self.conversation_id()))]
    pub fn shutdown(self) -> Result<(), StoreError> {
        self.writer.close()?;
        let id = self.writer.rollout_id();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE rollouts SET status = 'completed' WHERE id = ?1",
                [id.to_string()],
            )?;
            Ok(())
        })?;
        info!("rollout shut down");
        Ok(())
    }

    /// Full ordered history for replay, or `New` if the id is unknown.
    pub fn get_rollout_history(
        db: &Database,
        rollout_id: &ConversationId,
    ) -> Result<InitialHistory, StoreError> {
        db.with_conn(|conn| {
            if meta::get_meta_conn(conn, rollout_id)?.is_none() {
                return Ok(InitialHistory::New);
            }
            let history = writer::list_items(conn, rollout_id)?;
            Ok(InitialHistory::Resumed { history })
        })
    }
}
