//! Point-in-time copies of an item's enriched content, and rollback to them.

use std::sync::Arc;

use serde::Serialize;

use crate::db::{
    Database, InventoryRepository, LibSqlInventoryRepository, LibSqlSnapshotRepository,
    SnapshotRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    EnrichmentStatus, InventoryId, InventoryItem, Snapshot, SnapshotId, SnapshotKind,
};
use crate::platforms::{PlatformOutcome, PlatformPublisher, PublishOptions};
use crate::util::normalize_text_option;

/// Result of a best-effort re-push after rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Repush {
    Skipped,
    Pushed(Option<String>),
    Failed(String),
}

/// Outcome of [`SnapshotManager::rollback_and_repush`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rollback {
    pub item: InventoryItem,
    pub repush: Repush,
}

#[derive(Clone)]
pub struct SnapshotManager {
    db: Arc<Database>,
}

impl SnapshotManager {
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Capture the owner's current enriched content
    pub async fn create_snapshot(
        &self,
        owner_id: &InventoryId,
        kind: SnapshotKind,
        note: Option<String>,
    ) -> Result<Snapshot> {
        let conn = self.db.connection();
        let owner = LibSqlInventoryRepository::new(conn)
            .get(owner_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("inventory item {owner_id}")))?;

        let snapshot = Snapshot {
            id: SnapshotId::new(),
            owner_id: owner.id,
            kind,
            note: normalize_text_option(note),
            captured: owner.content,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        LibSqlSnapshotRepository::new(conn).insert(&snapshot).await?;

        tracing::info!(owner = %owner_id, snapshot = %snapshot.id, kind = kind.as_str(), "Captured snapshot");
        Ok(snapshot)
    }

    /// Snapshot as a safety net: failures are logged and swallowed
    pub async fn capture_non_fatal(
        &self,
        owner_id: &InventoryId,
        kind: SnapshotKind,
        note: Option<String>,
    ) -> Option<Snapshot> {
        match self.create_snapshot(owner_id, kind, note).await {
            Ok(snapshot) => Some(snapshot),
            Err(error) => {
                tracing::warn!(owner = %owner_id, kind = kind.as_str(), %error, "Snapshot failed; continuing");
                None
            }
        }
    }

    /// Newest first
    pub async fn list_snapshots(&self, owner_id: &InventoryId) -> Result<Vec<Snapshot>> {
        LibSqlSnapshotRepository::new(self.db.connection())
            .list_for_owner(owner_id)
            .await
    }

    /// Restore the owner's enriched content from one of its snapshots.
    ///
    /// The write is a single statement. Enrichment status is derived from the
    /// restored content.
    pub async fn rollback(
        &self,
        owner_id: &InventoryId,
        snapshot_id: &SnapshotId,
    ) -> Result<InventoryItem> {
        let conn = self.db.connection();
        let snapshots = LibSqlSnapshotRepository::new(conn);
        let snapshot = snapshots
            .get(snapshot_id)
            .await?
            .filter(|snapshot| snapshot.owner_id == *owner_id)
            .ok_or_else(|| {
                Error::NotFound(format!("snapshot {snapshot_id} for inventory item {owner_id}"))
            })?;

        let status = EnrichmentStatus::derive(&snapshot.captured);
        if !snapshots
            .restore_onto_owner(owner_id, snapshot_id, status)
            .await?
        {
            return Err(Error::NotFound(format!("inventory item {owner_id}")));
        }

        let item = LibSqlInventoryRepository::new(conn)
            .get(owner_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("inventory item {owner_id}")))?;

        tracing::info!(owner = %owner_id, snapshot = %snapshot_id, status = status.as_str(), "Rolled back");
        Ok(item)
    }

    /// Rollback, then push the restored content to `publisher` if given.
    ///
    /// A failed push is reported in the result; the rollback stands.
    pub async fn rollback_and_repush(
        &self,
        owner_id: &InventoryId,
        snapshot_id: &SnapshotId,
        publisher: Option<&dyn PlatformPublisher>,
    ) -> Result<Rollback> {
        let item = self.rollback(owner_id, snapshot_id).await?;

        let repush = match publisher {
            None => Repush::Skipped,
            Some(publisher) if item.commerce_product_id.is_none() => {
                tracing::debug!(
                    owner = %owner_id,
                    platform = %publisher.platform(),
                    "Item was never published; skipping re-push"
                );
                Repush::Skipped
            }
            Some(publisher) => match publisher.publish(&item, PublishOptions::default()).await {
                Ok(PlatformOutcome { external_id, .. }) => Repush::Pushed(external_id),
                Err(error) => {
                    tracing::warn!(owner = %owner_id, %error, "Re-push after rollback failed");
                    Repush::Failed(error.to_string())
                }
            },
        };

        Ok(Rollback { item, repush })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichedContent, ListingType, NewInventoryItem, Platform};
    use crate::platforms::{PlatformCallResult, PlatformError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Arc<Database>, SnapshotManager, InventoryItem) {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let content = EnrichedContent {
            title: Some("Leica M6".to_string()),
            description_html: Some("<p>Classic rangefinder</p>".to_string()),
            tags: vec!["film".to_string()],
            image_urls: vec!["https://cdn.example.com/m6.jpg".to_string()],
            ..EnrichedContent::default()
        };
        let item = NewInventoryItem {
            sku: "LEICA-M6".to_string(),
            brand: "Leica".to_string(),
            model: "M6".to_string(),
            listing_type: ListingType::TradeIn,
            condition: Some("Good".to_string()),
            serial_number: None,
            price: 2800.0,
            content,
        }
        .into_item();
        LibSqlInventoryRepository::new(db.connection())
            .insert(&item)
            .await
            .unwrap();
        let manager = SnapshotManager::new(Arc::clone(&db));
        (db, manager, item)
    }

    async fn overwrite(db: &Database, id: &InventoryId, content: &EnrichedContent) {
        LibSqlInventoryRepository::new(db.connection())
            .update_content(id, content, EnrichmentStatus::derive(content))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_then_rollback_restores_content() {
        let (db, manager, item) = setup().await;
        let snapshot = manager
            .create_snapshot(&item.id, SnapshotKind::Manual, Some(" before edit ".to_string()))
            .await
            .unwrap();
        assert_eq!(snapshot.note.as_deref(), Some("before edit"));

        overwrite(&db, &item.id, &EnrichedContent::default()).await;

        let restored = manager.rollback(&item.id, &snapshot.id).await.unwrap();
        assert_eq!(restored.content, item.content);
        assert_eq!(restored.enrichment_status, EnrichmentStatus::Enriched);
        assert_eq!(restored.sku, item.sku);
        assert_eq!(restored.price, item.price);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn immediate_rollback_is_a_no_op() {
        let (_db, manager, item) = setup().await;
        let snapshot = manager
            .create_snapshot(&item.id, SnapshotKind::Manual, None)
            .await
            .unwrap();

        let restored = manager.rollback(&item.id, &snapshot.id).await.unwrap();
        assert_eq!(restored.content, item.content);
        assert_eq!(restored.enrichment_status, item.enrichment_status);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_is_derived_from_restored_content() {
        let (db, manager, item) = setup().await;
        overwrite(&db, &item.id, &EnrichedContent::default()).await;
        let bare = manager
            .create_snapshot(&item.id, SnapshotKind::Original, None)
            .await
            .unwrap();
        overwrite(&db, &item.id, &item.content).await;

        let restored = manager.rollback(&item.id, &bare.id).await.unwrap();
        assert_eq!(restored.enrichment_status, EnrichmentStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rollback_rejects_foreign_snapshot() {
        let (db, manager, item) = setup().await;
        let other = NewInventoryItem {
            sku: "OTHER".to_string(),
            brand: "Nikon".to_string(),
            model: "FM2".to_string(),
            listing_type: ListingType::New,
            condition: None,
            serial_number: None,
            price: 400.0,
            content: EnrichedContent::default(),
        }
        .into_item();
        LibSqlInventoryRepository::new(db.connection())
            .insert(&other)
            .await
            .unwrap();
        let snapshot = manager
            .create_snapshot(&other.id, SnapshotKind::Manual, None)
            .await
            .unwrap();

        let err = manager.rollback(&item.id, &snapshot.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = manager
            .rollback(&item.id, &SnapshotId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_of_missing_owner_is_not_found() {
        let (_db, manager, _item) = setup().await;
        let err = manager
            .create_snapshot(&InventoryId::new(), SnapshotKind::Manual, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(manager
            .capture_non_fatal(&InventoryId::new(), SnapshotKind::BeforeSync, None)
            .await
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshots_are_listed_newest_first() {
        let (_db, manager, item) = setup().await;
        let first = manager
            .create_snapshot(&item.id, SnapshotKind::Original, None)
            .await
            .unwrap();
        let second = manager
            .create_snapshot(&item.id, SnapshotKind::Manual, None)
            .await
            .unwrap();

        let listed: Vec<_> = manager
            .list_snapshots(&item.id)
            .await
            .unwrap()
            .into_iter()
            .map(|snapshot| snapshot.id)
            .collect();
        assert_eq!(listed, vec![second.id, first.id]);
    }

    struct FailingPublisher;

    #[async_trait]
    impl PlatformPublisher for FailingPublisher {
        fn platform(&self) -> Platform {
            Platform::Commerce
        }

        async fn publish(
            &self,
            _item: &InventoryItem,
            _options: PublishOptions,
        ) -> PlatformCallResult<PlatformOutcome> {
            Err(PlatformError::Http {
                status: 503,
                body: "maintenance".to_string(),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_repush_does_not_fail_rollback() {
        let (db, manager, item) = setup().await;
        LibSqlInventoryRepository::new(db.connection())
            .set_commerce_ids(&item.id, "gid://shopify/Product/1", None)
            .await
            .unwrap();
        let snapshot = manager
            .create_snapshot(&item.id, SnapshotKind::Manual, None)
            .await
            .unwrap();
        overwrite(&db, &item.id, &EnrichedContent::default()).await;

        let result = manager
            .rollback_and_repush(&item.id, &snapshot.id, Some(&FailingPublisher))
            .await
            .unwrap();
        assert_eq!(result.item.content, item.content);
        assert!(matches!(result.repush, Repush::Failed(message) if message.contains("503")));
    }
}
