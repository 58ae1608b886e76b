//! Pushes one inventory item to every applicable platform.
//!
//! Platforms run one after another in a fixed order (commerce, CRM,
//! workspace). Each platform call is retried on transient errors and bounded
//! by an overall timeout, and its failure is recorded without stopping the
//! platforms after it. Ids from a create are stored before any follow-up
//! step runs, so a failing follow-up never leads to a second create. A partially failed publish is a normal `SyncResult`
//! with `success == false`, never an `Err`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::{
    CatalogRepository, Database, InventoryRepository, LibSqlCatalogRepository,
    LibSqlInventoryRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    CatalogEntry, InventoryId, InventoryItem, Platform, PlatformResult, SnapshotKind, SyncResult,
};
use crate::platforms::{
    PlatformCallResult, PlatformError, PlatformOutcome, PlatformPublisher, PublishOptions,
};
use crate::retry::{with_retry_by, RetryPolicy, Retryable};
use crate::snapshot::SnapshotManager;

const EVENT_CAPACITY: usize = 64;

/// Progress notification, emitted in platform order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PublishEvent {
    PlatformStart {
        item_id: InventoryId,
        platform: Platform,
    },
    PlatformComplete {
        item_id: InventoryId,
        platform: Platform,
        result: PlatformResult,
    },
}

#[derive(Clone)]
pub struct PublishOrchestrator {
    db: Arc<Database>,
    publishers: Vec<Arc<dyn PlatformPublisher>>,
    retry: RetryPolicy,
    timeout: Duration,
    snapshots: SnapshotManager,
    events: broadcast::Sender<PublishEvent>,
}

impl PublishOrchestrator {
    /// `publishers` may be given in any order; they always run in platform order.
    pub fn new(
        db: Arc<Database>,
        mut publishers: Vec<Arc<dyn PlatformPublisher>>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        publishers.sort_by_key(|publisher| publisher.platform());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            snapshots: SnapshotManager::new(Arc::clone(&db)),
            db,
            publishers,
            retry,
            timeout,
            events,
        }
    }

    /// Independent subscription to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.events.subscribe()
    }

    /// The configured publisher for `platform`, if any
    pub fn publisher(&self, platform: Platform) -> Option<Arc<dyn PlatformPublisher>> {
        self.publishers
            .iter()
            .find(|publisher| publisher.platform() == platform)
            .cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.publishers
            .iter()
            .map(|publisher| publisher.platform())
            .collect()
    }

    /// Load an item and publish it
    pub async fn publish(&self, item_id: &InventoryId, options: PublishOptions) -> Result<SyncResult> {
        let item = LibSqlInventoryRepository::new(self.db.connection())
            .get(item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("inventory item {item_id}")))?;
        Ok(self.publish_item(&item, options).await)
    }

    /// Publish an already-loaded item to every applicable platform
    pub async fn publish_item(&self, item: &InventoryItem, options: PublishOptions) -> SyncResult {
        let mut item = item.clone();
        let mut result = SyncResult::default();

        for publisher in &self.publishers {
            let platform = publisher.platform();
            if !publisher.applies_to(&item) {
                tracing::debug!(item = %item.id, %platform, "Platform does not apply; skipping");
                continue;
            }

            self.emit(PublishEvent::PlatformStart {
                item_id: item.id,
                platform,
            });

            let outcome = self.publish_to(publisher.as_ref(), &mut item, options).await;

            self.emit(PublishEvent::PlatformComplete {
                item_id: item.id,
                platform,
                result: outcome.clone(),
            });
            result.record(platform, outcome);
        }

        let result = result.finish();
        tracing::info!(
            item = %item.id,
            success = result.success,
            platforms = result.per_platform.len(),
            errors = result.errors.len(),
            "Publish finished"
        );
        result
    }

    async fn publish_to(
        &self,
        publisher: &dyn PlatformPublisher,
        item: &mut InventoryItem,
        options: PublishOptions,
    ) -> PlatformResult {
        let platform = publisher.platform();

        if platform == Platform::Commerce {
            if item.commerce_product_id.is_none() {
                if let Err(error) = self.adopt_linked_commerce_ids(item).await {
                    tracing::warn!(item = %item.id, %error, "Catalog link lookup failed");
                    return PlatformResult::failed(format!("catalog link lookup failed: {error}"));
                }
            }
            if item.commerce_product_id.is_some() {
                self.snapshots
                    .capture_non_fatal(
                        &item.id,
                        SnapshotKind::BeforeSync,
                        Some("before commerce update".to_string()),
                    )
                    .await;
            }
        }

        let current: &InventoryItem = item;
        let outcome = match self
            .call_with_retry(platform, &current.id, || publisher.publish(current, options))
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::warn!(item = %item.id, %platform, %error, "Platform publish failed");
                return PlatformResult::failed(error.to_string());
            }
        };

        if outcome.created {
            if platform == Platform::Commerce {
                self.write_back_commerce_ids(item, &outcome).await;
            }
            // A failure past this point must not repeat the create
            let current: &InventoryItem = item;
            if let Err(error) = self
                .call_with_retry(platform, &current.id, || {
                    publisher.complete_create(current, &outcome)
                })
                .await
            {
                tracing::warn!(item = %item.id, %platform, %error, "Post-create step failed");
                return PlatformResult::failed(format!(
                    "created {} but follow-up failed: {error}",
                    outcome.external_id.as_deref().unwrap_or("record")
                ));
            }
        }

        PlatformResult::succeeded(outcome.external_id)
    }

    /// Each step gets its own retry budget and timeout
    async fn call_with_retry<T, F, Fut>(
        &self,
        platform: Platform,
        item_id: &InventoryId,
        operation: F,
    ) -> PlatformCallResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PlatformCallResult<T>>,
    {
        let attempts = with_retry_by(
            &self.retry,
            operation,
            Retryable::is_retryable,
            |error, attempt| {
                tracing::warn!(item = %item_id, %platform, attempt, %error, "Retrying platform call");
            },
        );

        tokio::time::timeout(self.timeout, attempts)
            .await
            .unwrap_or(Err(PlatformError::Timeout))
    }

    /// Take the commerce ids of an imported catalog entry linked to this item
    async fn adopt_linked_commerce_ids(&self, item: &mut InventoryItem) -> Result<()> {
        let linked = LibSqlCatalogRepository::new(self.db.connection())
            .find_linked_to(&item.id)
            .await?;
        let Some((entry, product_id)) = linked
            .iter()
            .find_map(|entry| entry.external_id.clone().map(|id| (entry, id)))
        else {
            return Ok(());
        };
        let variant_id = linked_variant_id(entry, &item.sku);

        LibSqlInventoryRepository::new(self.db.connection())
            .set_commerce_ids(&item.id, &product_id, variant_id.as_deref())
            .await?;
        tracing::info!(
            item = %item.id,
            catalog = %entry.id,
            product = %product_id,
            "Adopted commerce ids from linked catalog entry"
        );
        item.commerce_product_id = Some(product_id);
        item.commerce_variant_id = variant_id;
        Ok(())
    }

    async fn write_back_commerce_ids(&self, item: &mut InventoryItem, outcome: &PlatformOutcome) {
        let Some(product_id) = outcome.external_id.as_deref() else {
            return;
        };
        item.commerce_product_id = Some(product_id.to_string());
        item.commerce_variant_id.clone_from(&outcome.variant_id);
        if let Err(error) = LibSqlInventoryRepository::new(self.db.connection())
            .set_commerce_ids(&item.id, product_id, outcome.variant_id.as_deref())
            .await
        {
            // The next publish would create a second product
            tracing::error!(item = %item.id, product = product_id, %error, "Failed to store commerce ids");
        }
    }

    fn emit(&self, event: PublishEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Variant matching the item's SKU, else the first with an id
fn linked_variant_id(entry: &CatalogEntry, sku: &str) -> Option<String> {
    let with_id = || entry.variants.iter().filter(|variant| variant.external_id.is_some());
    with_id()
        .find(|variant| {
            variant
                .sku
                .as_deref()
                .is_some_and(|variant_sku| variant_sku.trim().eq_ignore_ascii_case(sku.trim()))
        })
        .or_else(|| with_id().next())
        .and_then(|variant| variant.external_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CatalogVariant, EnrichedContent, ListingType, NewCatalogEntry, NewInventoryItem};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    enum Behavior {
        Succeed(PlatformOutcome),
        Fail(fn() -> PlatformError),
        FailTimes(u32, PlatformOutcome),
        Hang,
    }

    struct FakePublisher {
        platform: Platform,
        behavior: Behavior,
        acquisitions_only: bool,
        calls: AtomicU32,
        seen_product_ids: Mutex<Vec<Option<String>>>,
        completion_errors: Mutex<VecDeque<PlatformError>>,
        completions: AtomicU32,
    }

    impl FakePublisher {
        fn build(platform: Platform, behavior: Behavior) -> Self {
            Self {
                platform,
                behavior,
                acquisitions_only: false,
                calls: AtomicU32::new(0),
                seen_product_ids: Mutex::new(Vec::new()),
                completion_errors: Mutex::new(VecDeque::new()),
                completions: AtomicU32::new(0),
            }
        }

        fn new(platform: Platform, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self::build(platform, behavior))
        }

        /// Post-create step fails with these errors, in order, then succeeds
        fn failing_completion(
            platform: Platform,
            behavior: Behavior,
            errors: Vec<PlatformError>,
        ) -> Arc<Self> {
            let publisher = Self::build(platform, behavior);
            *publisher.completion_errors.lock().unwrap() = errors.into();
            Arc::new(publisher)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn completions(&self) -> u32 {
            self.completions.load(Ordering::SeqCst)
        }

        fn seen_product_ids(&self) -> Vec<Option<String>> {
            self.seen_product_ids.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlatformPublisher for FakePublisher {
        fn platform(&self) -> Platform {
            self.platform
        }

        fn applies_to(&self, item: &InventoryItem) -> bool {
            !self.acquisitions_only || item.listing_type.is_acquisition()
        }

        async fn publish(
            &self,
            item: &InventoryItem,
            _options: PublishOptions,
        ) -> PlatformCallResult<PlatformOutcome> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_product_ids
                .lock()
                .unwrap()
                .push(item.commerce_product_id.clone());
            match &self.behavior {
                Behavior::Succeed(outcome) => Ok(outcome.clone()),
                Behavior::Fail(error) => Err(error()),
                Behavior::FailTimes(times, outcome) => {
                    if call < *times {
                        Err(PlatformError::Network("connection reset".to_string()))
                    } else {
                        Ok(outcome.clone())
                    }
                }
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(PlatformOutcome::default())
                }
            }
        }

        async fn complete_create(
            &self,
            item: &InventoryItem,
            outcome: &PlatformOutcome,
        ) -> PlatformCallResult<()> {
            self.completions.fetch_add(1, Ordering::SeqCst);
            if self.platform == Platform::Commerce {
                assert_eq!(item.commerce_product_id, outcome.external_id);
            }
            match self.completion_errors.lock().unwrap().pop_front() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    fn created(product_id: &str, variant_id: &str) -> Behavior {
        Behavior::Succeed(PlatformOutcome {
            external_id: Some(product_id.to_string()),
            variant_id: Some(variant_id.to_string()),
            created: true,
        })
    }

    fn ok(id: &str) -> Behavior {
        Behavior::Succeed(PlatformOutcome {
            external_id: Some(id.to_string()),
            variant_id: None,
            created: true,
        })
    }

    async fn stored_item(db: &Database, listing_type: ListingType) -> InventoryItem {
        let item = NewInventoryItem {
            sku: "CAN-R6".to_string(),
            brand: "Canon".to_string(),
            model: "EOS R6".to_string(),
            listing_type,
            condition: None,
            serial_number: None,
            price: 1800.0,
            content: EnrichedContent::default(),
        }
        .into_item();
        LibSqlInventoryRepository::new(db.connection())
            .insert(&item)
            .await
            .unwrap();
        item
    }

    fn orchestrator(db: &Arc<Database>, publishers: Vec<Arc<dyn PlatformPublisher>>) -> PublishOrchestrator {
        PublishOrchestrator::new(
            Arc::clone(db),
            publishers,
            RetryPolicy::immediate(2),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partial_failure_is_reported_not_thrown() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::TradeIn).await;
        let orchestrator = orchestrator(
            &db,
            vec![
                FakePublisher::new(Platform::Commerce, ok("gid://shopify/Product/1")),
                FakePublisher::new(
                    Platform::Crm,
                    Behavior::Fail(|| PlatformError::UserErrors("deal rejected".to_string())),
                ),
                FakePublisher::new(Platform::Workspace, ok("page-1")),
            ],
        );

        let result = orchestrator
            .publish(&item.id, PublishOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.errors, vec!["CRM: deal rejected".to_string()]);
        assert!(result.per_platform[&Platform::Commerce].success);
        assert!(result.per_platform[&Platform::Workspace].success);
        assert!(!result.per_platform[&Platform::Crm].success);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn events_follow_platform_order() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::TradeIn).await;
        // Registered out of order on purpose
        let orchestrator = orchestrator(
            &db,
            vec![
                FakePublisher::new(Platform::Workspace, ok("page-1")),
                FakePublisher::new(Platform::Commerce, ok("gid://shopify/Product/1")),
                FakePublisher::new(Platform::Crm, ok("deal-1")),
            ],
        );
        let mut events = orchestrator.subscribe();

        orchestrator.publish_item(&item, PublishOptions::default()).await;

        let mut order = Vec::new();
        while let Ok(event) = events.try_recv() {
            order.push(match event {
                PublishEvent::PlatformStart { platform, .. } => (platform, "start"),
                PublishEvent::PlatformComplete { platform, .. } => (platform, "complete"),
            });
        }
        assert_eq!(
            order,
            vec![
                (Platform::Commerce, "start"),
                (Platform::Commerce, "complete"),
                (Platform::Crm, "start"),
                (Platform::Crm, "complete"),
                (Platform::Workspace, "start"),
                (Platform::Workspace, "complete"),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn inapplicable_platforms_are_skipped() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::New).await;
        let crm = Arc::new(FakePublisher {
            acquisitions_only: true,
            ..FakePublisher::build(Platform::Crm, ok("deal-1"))
        });
        let orchestrator = orchestrator(
            &db,
            vec![
                FakePublisher::new(Platform::Commerce, ok("gid://shopify/Product/1")),
                crm.clone(),
            ],
        );

        let result = orchestrator.publish_item(&item, PublishOptions::default()).await;
        assert!(result.success);
        assert_eq!(crm.calls(), 0);
        assert!(!result.per_platform.contains_key(&Platform::Crm));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_errors_are_retried() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::New).await;
        let workspace = FakePublisher::new(
            Platform::Workspace,
            Behavior::FailTimes(2, PlatformOutcome::default()),
        );
        let orchestrator = orchestrator(&db, vec![workspace.clone()]);

        let result = orchestrator.publish_item(&item, PublishOptions::default()).await;
        assert!(result.success);
        assert_eq!(workspace.calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn business_errors_are_not_retried() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::New).await;
        let commerce = FakePublisher::new(
            Platform::Commerce,
            Behavior::Fail(|| PlatformError::Http {
                status: 422,
                body: "invalid".to_string(),
            }),
        );
        let orchestrator = orchestrator(&db, vec![commerce.clone()]);

        let result = orchestrator.publish_item(&item, PublishOptions::default()).await;
        assert!(!result.success);
        assert_eq!(commerce.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stuck_platform_times_out_without_blocking_others() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::New).await;
        let orchestrator = PublishOrchestrator::new(
            Arc::clone(&db),
            vec![
                FakePublisher::new(Platform::Commerce, Behavior::Hang),
                FakePublisher::new(Platform::Workspace, ok("page-1")),
            ],
            RetryPolicy::immediate(0),
            Duration::from_millis(50),
        );

        let result = orchestrator.publish_item(&item, PublishOptions::default()).await;
        assert_eq!(result.errors, vec!["Commerce: request timed out".to_string()]);
        assert!(result.per_platform[&Platform::Workspace].success);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commerce_create_writes_ids_back() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::New).await;
        let orchestrator = orchestrator(
            &db,
            vec![FakePublisher::new(
                Platform::Commerce,
                created("gid://shopify/Product/7", "gid://shopify/ProductVariant/8"),
            )],
        );

        orchestrator.publish(&item.id, PublishOptions::default()).await.unwrap();

        let stored = LibSqlInventoryRepository::new(db.connection())
            .get(&item.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.commerce_product_id.as_deref(), Some("gid://shopify/Product/7"));
        assert_eq!(
            stored.commerce_variant_id.as_deref(),
            Some("gid://shopify/ProductVariant/8")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commerce_update_captures_before_sync_snapshot() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::New).await;
        let repo = LibSqlInventoryRepository::new(db.connection());
        repo.set_commerce_ids(&item.id, "gid://shopify/Product/7", None)
            .await
            .unwrap();
        let orchestrator = orchestrator(
            &db,
            vec![FakePublisher::new(
                Platform::Commerce,
                Behavior::Succeed(PlatformOutcome {
                    external_id: Some("gid://shopify/Product/7".to_string()),
                    variant_id: None,
                    created: false,
                }),
            )],
        );

        let result = orchestrator.publish(&item.id, PublishOptions::default()).await.unwrap();
        assert!(result.success);

        let snapshots = SnapshotManager::new(Arc::clone(&db))
            .list_snapshots(&item.id)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].kind, SnapshotKind::BeforeSync);
    }

    async fn stored_commerce_ids(db: &Database, id: &InventoryId) -> (Option<String>, Option<String>) {
        let stored = LibSqlInventoryRepository::new(db.connection())
            .get(id)
            .await
            .unwrap()
            .unwrap();
        (stored.commerce_product_id, stored.commerce_variant_id)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_follow_up_failure_is_retried_without_recreating() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::New).await;
        let commerce = FakePublisher::failing_completion(
            Platform::Commerce,
            created("gid://shopify/Product/7", "gid://shopify/ProductVariant/8"),
            vec![PlatformError::Http {
                status: 503,
                body: "unavailable".to_string(),
            }],
        );
        let orchestrator = orchestrator(&db, vec![commerce.clone()]);

        let result = orchestrator.publish(&item.id, PublishOptions::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(commerce.calls(), 1);
        assert_eq!(commerce.completions(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_follow_up_keeps_created_ids() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::New).await;
        let commerce = FakePublisher::failing_completion(
            Platform::Commerce,
            created("gid://shopify/Product/7", "gid://shopify/ProductVariant/8"),
            vec![
                PlatformError::Network("connection reset".to_string()),
                PlatformError::UserErrors("price: must be positive".to_string()),
            ],
        );
        let orchestrator = orchestrator(&db, vec![commerce.clone()]);

        let result = orchestrator.publish(&item.id, PublishOptions::default()).await.unwrap();

        assert!(!result.success);
        assert_eq!(
            result.errors,
            vec![
                "Commerce: created gid://shopify/Product/7 but follow-up failed: price: must be positive"
                    .to_string()
            ]
        );
        assert_eq!(commerce.calls(), 1);
        assert_eq!(
            stored_commerce_ids(&db, &item.id).await,
            (
                Some("gid://shopify/Product/7".to_string()),
                Some("gid://shopify/ProductVariant/8".to_string())
            )
        );

        // The retry publish goes down the update path
        orchestrator.publish(&item.id, PublishOptions::default()).await.unwrap();
        assert_eq!(
            commerce.seen_product_ids(),
            vec![None, Some("gid://shopify/Product/7".to_string())]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn linked_catalog_entry_supplies_commerce_ids() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let item = stored_item(&db, ListingType::New).await;
        let entry = NewCatalogEntry {
            external_id: Some("gid://shopify/Product/42".to_string()),
            title: "Canon EOS R6".to_string(),
            vendor: Some("Canon".to_string()),
            product_type: None,
            variants: vec![
                CatalogVariant {
                    external_id: Some("gid://shopify/ProductVariant/41".to_string()),
                    sku: Some("CAN-R6-BOX".to_string()),
                    price: None,
                },
                CatalogVariant {
                    external_id: Some("gid://shopify/ProductVariant/43".to_string()),
                    sku: Some(" can-r6 ".to_string()),
                    price: Some(1799.0),
                },
            ],
        }
        .into_entry();
        let catalog = LibSqlCatalogRepository::new(db.connection());
        catalog.insert(&entry).await.unwrap();
        assert!(catalog.set_link(&entry.id, Some(&item.id)).await.unwrap());

        let commerce = FakePublisher::new(
            Platform::Commerce,
            Behavior::Succeed(PlatformOutcome {
                external_id: Some("gid://shopify/Product/42".to_string()),
                variant_id: Some("gid://shopify/ProductVariant/43".to_string()),
                created: false,
            }),
        );
        let orchestrator = orchestrator(&db, vec![commerce.clone()]);

        let result = orchestrator.publish(&item.id, PublishOptions::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(
            commerce.seen_product_ids(),
            vec![Some("gid://shopify/Product/42".to_string())]
        );
        assert_eq!(commerce.completions(), 0);
        assert_eq!(
            stored_commerce_ids(&db, &item.id).await,
            (
                Some("gid://shopify/Product/42".to_string()),
                Some("gid://shopify/ProductVariant/43".to_string())
            )
        );
        let snapshots = SnapshotManager::new(Arc::clone(&db))
            .list_snapshots(&item.id)
            .await
            .unwrap();
        assert_eq!(snapshots[0].kind, SnapshotKind::BeforeSync);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publishing_missing_item_is_not_found() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let orchestrator = orchestrator(&db, Vec::new());
        let err = orchestrator
            .publish(&InventoryId::new(), PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
