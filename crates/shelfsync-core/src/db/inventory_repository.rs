//! Inventory item repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{EnrichedContent, EnrichmentStatus, InventoryId, InventoryItem};

const ITEM_COLUMNS: &str = "id, sku, brand, model, listing_type, condition, serial_number, \
     price, content, enrichment_status, commerce_product_id, commerce_variant_id, \
     created_at, updated_at";

/// Trait for inventory storage operations (async)
#[allow(async_fn_in_trait)]
pub trait InventoryRepository {
    /// Insert a new item
    async fn insert(&self, item: &InventoryItem) -> Result<()>;

    /// Get an item by ID
    async fn get(&self, id: &InventoryId) -> Result<Option<InventoryItem>>;

    /// List items, newest first
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<InventoryItem>>;

    /// Items with exactly this SKU
    async fn find_by_sku(&self, sku: &str) -> Result<Vec<InventoryItem>>;

    /// Items that no catalog entry links to yet
    async fn list_unlinked(&self, limit: usize) -> Result<Vec<InventoryItem>>;

    /// Replace the enriched content and status in one statement
    async fn update_content(
        &self,
        id: &InventoryId,
        content: &EnrichedContent,
        status: EnrichmentStatus,
    ) -> Result<InventoryItem>;

    /// Remember the commerce-side ids after a create
    async fn set_commerce_ids(
        &self,
        id: &InventoryId,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<()>;
}

/// libSQL implementation of `InventoryRepository`
pub struct LibSqlInventoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlInventoryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn collect(mut rows: libsql::Rows) -> Result<Vec<InventoryItem>> {
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }

    /// Parse an item from a database row
    fn parse_item(row: &Row) -> Result<InventoryItem> {
        let id: String = row.get(0)?;
        let listing_type: String = row.get(4)?;
        let content: String = row.get(8)?;
        let status: String = row.get(9)?;

        Ok(InventoryItem {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid inventory id `{id}`")))?,
            sku: row.get(1)?,
            brand: row.get(2)?,
            model: row.get(3)?,
            listing_type: listing_type.parse()?,
            condition: row.get(5)?,
            serial_number: row.get(6)?,
            price: row.get(7)?,
            content: serde_json::from_str(&content)?,
            enrichment_status: status.parse()?,
            commerce_product_id: row.get(10)?,
            commerce_variant_id: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

impl InventoryRepository for LibSqlInventoryRepository<'_> {
    async fn insert(&self, item: &InventoryItem) -> Result<()> {
        let content = serde_json::to_string(&item.content)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO inventory_items ({ITEM_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    item.id.as_str(),
                    item.sku.as_str(),
                    item.brand.as_str(),
                    item.model.as_str(),
                    item.listing_type.as_str(),
                    item.condition.clone(),
                    item.serial_number.clone(),
                    item.price,
                    content,
                    item.enrichment_status.as_str(),
                    item.commerce_product_id.clone(),
                    item.commerce_variant_id.clone(),
                    item.created_at,
                    item.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &InventoryId) -> Result<Option<InventoryItem>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<InventoryItem>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM inventory_items
                     ORDER BY created_at DESC
                     LIMIT ? OFFSET ?"
                ),
                params![limit as i64, offset as i64],
            )
            .await?;
        Self::collect(rows).await
    }

    async fn find_by_sku(&self, sku: &str) -> Result<Vec<InventoryItem>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM inventory_items
                     WHERE TRIM(sku) = ?
                     ORDER BY created_at ASC"
                ),
                [sku.trim()],
            )
            .await?;
        Self::collect(rows).await
    }

    async fn list_unlinked(&self, limit: usize) -> Result<Vec<InventoryItem>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM inventory_items i
                     WHERE NOT EXISTS (
                         SELECT 1 FROM catalog_entries c WHERE c.linked_inventory_id = i.id
                     )
                     ORDER BY created_at DESC
                     LIMIT ?"
                ),
                [limit as i64],
            )
            .await?;
        Self::collect(rows).await
    }

    async fn update_content(
        &self,
        id: &InventoryId,
        content: &EnrichedContent,
        status: EnrichmentStatus,
    ) -> Result<InventoryItem> {
        let now = chrono::Utc::now().timestamp_millis();
        let content_json = serde_json::to_string(content)?;

        let rows = self
            .conn
            .execute(
                "UPDATE inventory_items
                 SET content = ?, enrichment_status = ?, updated_at = ?
                 WHERE id = ?",
                params![content_json, status.as_str(), now, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("inventory item {id}")));
        }

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("inventory item {id}")))
    }

    async fn set_commerce_ids(
        &self,
        id: &InventoryId,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows = self
            .conn
            .execute(
                "UPDATE inventory_items
                 SET commerce_product_id = ?,
                     commerce_variant_id = COALESCE(?, commerce_variant_id),
                     updated_at = ?
                 WHERE id = ?",
                params![
                    product_id,
                    variant_id.map(ToString::to_string),
                    now,
                    id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("inventory item {id}")));
        }
        Ok(())
    }
}
