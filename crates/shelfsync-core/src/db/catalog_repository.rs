//! Catalog entry repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use libsql::{params, Connection, Row};

use crate::error::{Error, Result};
use crate::models::{CatalogEntry, CatalogEntryId, InventoryId};

const ENTRY_COLUMNS: &str =
    "id, external_id, title, vendor, product_type, variants, linked_inventory_id, imported_at";

/// Trait for catalog storage operations (async)
#[allow(async_fn_in_trait)]
pub trait CatalogRepository {
    /// Insert an imported entry
    async fn insert(&self, entry: &CatalogEntry) -> Result<()>;

    /// Get an entry by ID
    async fn get(&self, id: &CatalogEntryId) -> Result<Option<CatalogEntry>>;

    /// Entries without an inventory link, oldest import first
    async fn list_unlinked(&self, limit: usize) -> Result<Vec<CatalogEntry>>;

    /// Entries linked to the given inventory item
    async fn find_linked_to(&self, inventory_id: &InventoryId) -> Result<Vec<CatalogEntry>>;

    /// Set or clear the inventory link; returns false when the entry is missing
    async fn set_link(&self, id: &CatalogEntryId, inventory_id: Option<&InventoryId>)
        -> Result<bool>;
}

/// libSQL implementation of `CatalogRepository`
pub struct LibSqlCatalogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCatalogRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<CatalogEntry> {
        let id: String = row.get(0)?;
        let variants: String = row.get(5)?;
        let linked: Option<String> = row.get(6)?;

        let linked_inventory_id = linked
            .map(|value| {
                value
                    .parse::<InventoryId>()
                    .map_err(|_| Error::Database(format!("invalid inventory id `{value}`")))
            })
            .transpose()?;

        Ok(CatalogEntry {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid catalog id `{id}`")))?,
            external_id: row.get(1)?,
            title: row.get(2)?,
            vendor: row.get(3)?,
            product_type: row.get(4)?,
            variants: serde_json::from_str(&variants)?,
            linked_inventory_id,
            imported_at: row.get(7)?,
        })
    }

    async fn collect(mut rows: libsql::Rows) -> Result<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }
}

impl CatalogRepository for LibSqlCatalogRepository<'_> {
    async fn insert(&self, entry: &CatalogEntry) -> Result<()> {
        let variants = serde_json::to_string(&entry.variants)?;
        self.conn
            .execute(
                &format!("INSERT INTO catalog_entries ({ENTRY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"),
                params![
                    entry.id.as_str(),
                    entry.external_id.clone(),
                    entry.title.as_str(),
                    entry.vendor.clone(),
                    entry.product_type.clone(),
                    variants,
                    entry.linked_inventory_id.map(|id| id.as_str()),
                    entry.imported_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &CatalogEntryId) -> Result<Option<CatalogEntry>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {ENTRY_COLUMNS} FROM catalog_entries WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_unlinked(&self, limit: usize) -> Result<Vec<CatalogEntry>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM catalog_entries
                     WHERE linked_inventory_id IS NULL
                     ORDER BY imported_at ASC
                     LIMIT ?"
                ),
                [limit as i64],
            )
            .await?;
        Self::collect(rows).await
    }

    async fn find_linked_to(&self, inventory_id: &InventoryId) -> Result<Vec<CatalogEntry>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM catalog_entries
                     WHERE linked_inventory_id = ?
                     ORDER BY imported_at ASC"
                ),
                [inventory_id.as_str()],
            )
            .await?;
        Self::collect(rows).await
    }

    async fn set_link(
        &self,
        id: &CatalogEntryId,
        inventory_id: Option<&InventoryId>,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE catalog_entries SET linked_inventory_id = ? WHERE id = ?",
                params![inventory_id.map(InventoryId::as_str), id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }
}
