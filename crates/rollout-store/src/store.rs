use std::path::Path;
use std::time::Duration;

use chrono::Utc;

use rollout_core::ConversationId;

use crate::database::Database;
use crate::error::StoreError;
use crate::list::{self, ConversationsPage, Cursor};
use crate::meta::{self, RolloutMetaRow};
use crate::recorder::{InitialHistory, RolloutRecorder, RolloutRecorderParams};
use crate::sweeper::{self, ActiveWriters};

/// Store-level policy knobs. Retention is decided by the embedding
/// application; `None` means rollouts never expire.
#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    pub retention_ttl: Option<Duration>,
}

/// Top-level handle to the rollout database: the agent runtime obtains
/// recorders from it, the history browser lists and replays through it, and
/// the retention sweeper runs against it.
#[derive(Clone)]
pub struct RolloutStore {
    db: Database,
    writers: ActiveWriters,
    config: StoreConfig,
}

impl RolloutStore {
    /// Open or create the store at the given path. Fails with `Init` if the
    /// database cannot be opened or migrated.
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open(path)?,
            writers: ActiveWriters::new(),
            config,
        })
    }

    /// In-memory store (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::in_memory()?,
            writers: ActiveWriters::new(),
            config: StoreConfig::default(),
        })
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Create or resume a recorder per `params`.
    pub fn recorder(&self, params: RolloutRecorderParams) -> Result<RolloutRecorder, StoreError> {
        RolloutRecorder::new(&self.db, &self.writers, params, self.config.retention_ttl)
    }

    /// Paginated summary listing, newest first.
    pub fn list_conversations(
        &self,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> Result<ConversationsPage, StoreError> {
        list::list_conversations(&self.db, page_size, cursor)
    }

    /// Full ordered history for replay.
    pub fn get_rollout_history(
        &self,
        rollout_id: &ConversationId,
    ) -> Result<InitialHistory, StoreError> {
        RolloutRecorder::get_rollout_history(&self.db, rollout_id)
    }

    /// Summary record for one rollout.
    pub fn get_meta(&self, rollout_id: &ConversationId) -> Result<RolloutMetaRow, StoreError> {
        meta::get_meta(&self.db, rollout_id)
    }

    /// Delete all rollouts expired as of now; returns how many were removed.
    pub fn cleanup_expired(&self) -> Result<usize, StoreError> {
        self.cleanup_expired_at(Utc::now().timestamp_millis())
    }

    /// Expiry sweep against an explicit clock (unix millis).
    pub fn cleanup_expired_at(&self, now: i64) -> Result<usize, StoreError> {
        sweeper::cleanup_expired(&self.db, &self.writers, now)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
