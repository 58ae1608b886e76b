//! Catalog entry model (records imported from the commerce platform)

use serde::{Deserialize, Serialize};

use super::{CatalogEntryId, InventoryId};
use crate::error::Error;

/// One variant of an imported product
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogVariant {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// A product as it exists on the commerce platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: CatalogEntryId,
    pub external_id: Option<String>,
    pub title: String,
    /// Vendor-like field; preferred over the first title token as the brand
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub variants: Vec<CatalogVariant>,
    /// The single inventory item this entry is linked to, if any
    pub linked_inventory_id: Option<InventoryId>,
    /// Import timestamp (Unix ms)
    pub imported_at: i64,
}

impl CatalogEntry {
    /// First non-empty variant SKU, trimmed
    pub fn primary_sku(&self) -> Option<&str> {
        self.variants
            .iter()
            .filter_map(|variant| variant.sku.as_deref())
            .map(str::trim)
            .find(|sku| !sku.is_empty())
    }

    pub const fn is_linked(&self) -> bool {
        self.linked_inventory_id.is_some()
    }
}

/// Input for importing a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCatalogEntry {
    #[serde(default)]
    pub external_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub variants: Vec<CatalogVariant>,
}

impl NewCatalogEntry {
    pub fn validate(&self) -> crate::Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput("title must not be empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn into_entry(self) -> CatalogEntry {
        CatalogEntry {
            id: CatalogEntryId::new(),
            external_id: self.external_id,
            title: self.title.trim().to_string(),
            vendor: self.vendor,
            product_type: self.product_type,
            variants: self.variants,
            linked_inventory_id: None,
            imported_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_skus(skus: &[Option<&str>]) -> CatalogEntry {
        NewCatalogEntry {
            external_id: None,
            title: "Sony A7 III".to_string(),
            vendor: Some("Sony".to_string()),
            product_type: None,
            variants: skus
                .iter()
                .map(|sku| CatalogVariant {
                    sku: sku.map(ToString::to_string),
                    ..CatalogVariant::default()
                })
                .collect(),
        }
        .into_entry()
    }

    #[test]
    fn primary_sku_skips_blank_variants() {
        let entry = entry_with_skus(&[None, Some("  "), Some(" ABC123 "), Some("XYZ")]);
        assert_eq!(entry.primary_sku(), Some("ABC123"));
    }

    #[test]
    fn primary_sku_is_none_without_variants() {
        assert_eq!(entry_with_skus(&[]).primary_sku(), None);
    }

    #[test]
    fn new_entries_start_unlinked() {
        let entry = entry_with_skus(&[Some("A")]);
        assert!(!entry.is_linked());
    }
}
