pub mod database;
pub mod error;
pub mod list;
pub mod meta;
pub mod recorder;
pub mod row_helpers;
pub mod schema;
pub mod store;
pub mod sweeper;
pub mod writer;

pub use database::Database;
pub use error::StoreError;
pub use list::{ConversationsPage, Cursor, MAX_PAGE_SIZE, MAX_SCAN};
pub use meta::{RolloutMetaRow, RolloutStatus};
pub use recorder::{InitialHistory, RolloutRecorder, RolloutRecorderParams};
pub use store::{RolloutStore, StoreConfig};
pub use sweeper::ActiveWriters;
pub use writer::{ItemRow, RolloutWriter};
