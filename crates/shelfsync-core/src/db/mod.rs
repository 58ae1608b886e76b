//! Database layer for Shelfsync

mod catalog_repository;
mod connection;
mod idempotency_repository;
mod inventory_repository;
mod migrations;
mod snapshot_repository;
mod token_repository;

pub use catalog_repository::{CatalogRepository, LibSqlCatalogRepository};
pub use connection::Database;
pub use idempotency_repository::{
    IdempotencyRepository, InsertOutcome, LibSqlIdempotencyRepository,
};
pub use inventory_repository::{InventoryRepository, LibSqlInventoryRepository};
pub use snapshot_repository::{LibSqlSnapshotRepository, SnapshotRepository};
pub use token_repository::{LibSqlTokenRepository, TokenRepository};
