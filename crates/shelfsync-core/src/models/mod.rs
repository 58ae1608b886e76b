//! Data models for Shelfsync

mod catalog;
mod id;
mod idempotency;
mod inventory;
mod snapshot;
mod sync_result;

pub use catalog::{CatalogEntry, CatalogVariant, NewCatalogEntry};
pub use id::{CatalogEntryId, IdempotencyRecordId, InventoryId, SnapshotId};
pub use idempotency::{IdempotencyRecord, IdempotencyState};
pub use inventory::{
    EnrichedContent, EnrichmentStatus, InventoryItem, ListingType, NewInventoryItem,
};
pub use snapshot::{Snapshot, SnapshotKind};
pub use sync_result::{Platform, PlatformResult, SyncResult};
