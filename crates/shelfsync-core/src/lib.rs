//! shelfsync-core - Core library for Shelfsync
//!
//! This crate contains the models, the libSQL store, and the sync and
//! reconciliation engine: idempotency guard, retry executor, product matcher,
//! snapshot manager, platform clients, and the publish orchestrator.

pub mod db;
pub mod enrichment;
pub mod error;
pub mod idempotency;
pub mod matching;
pub mod models;
pub mod platforms;
pub mod publish;
pub mod retry;
pub mod snapshot;
pub mod util;

pub use error::{Error, Result};
pub use models::{InventoryId, InventoryItem};
