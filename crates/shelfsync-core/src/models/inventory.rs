//! Inventory item model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::InventoryId;
use crate::error::Error;

/// How an item entered the shop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    /// Retail-only stock bought from a distributor
    New,
    /// Acquired from a customer
    TradeIn,
    /// Former demonstration unit
    ExDemo,
}

impl ListingType {
    /// Storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::TradeIn => "trade_in",
            Self::ExDemo => "ex_demo",
        }
    }

    /// Human-readable label used in deal names and workspace rows
    pub const fn label(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::TradeIn => "Trade-In",
            Self::ExDemo => "Ex-Demo",
        }
    }

    /// Acquisitions (anything not bought new) are tracked in the CRM
    pub const fn is_acquisition(self) -> bool {
        !matches!(self, Self::New)
    }
}

impl FromStr for ListingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "trade_in" | "trade-in" | "tradein" => Ok(Self::TradeIn),
            "ex_demo" | "ex-demo" | "exdemo" => Ok(Self::ExDemo),
            other => Err(Error::InvalidInput(format!("unknown listing type `{other}`"))),
        }
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether an item carries generated content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Pending,
    Enriched,
}

impl EnrichmentStatus {
    /// Storage representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Enriched => "enriched",
        }
    }

    /// Derive the status from content instead of trusting a stored flag
    pub fn derive(content: &EnrichedContent) -> Self {
        if content.has_description() {
            Self::Enriched
        } else {
            Self::Pending
        }
    }
}

impl FromStr for EnrichmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "enriched" => Ok(Self::Enriched),
            other => Err(Error::Database(format!(
                "unknown enrichment status `{other}`"
            ))),
        }
    }
}

/// The mutable, enrichable part of an inventory item.
///
/// This is exactly what snapshots capture and what rollback restores; identity
/// fields (id, SKU, brand, model) and the selling price live outside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedContent {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description_html: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub compare_at_price: Option<f64>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub seo_title: Option<String>,
    #[serde(default)]
    pub seo_description: Option<String>,
    /// Structured spec sheet (sensor size, mount, shutter count, ...)
    #[serde(default)]
    pub specs: serde_json::Map<String, serde_json::Value>,
}

impl EnrichedContent {
    /// True when a non-blank description is present
    pub fn has_description(&self) -> bool {
        self.description_html
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty())
    }
}

/// An internally tracked inventory item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: InventoryId,
    pub sku: String,
    pub brand: String,
    pub model: String,
    pub listing_type: ListingType,
    pub condition: Option<String>,
    pub serial_number: Option<String>,
    pub price: f64,
    pub content: EnrichedContent,
    pub enrichment_status: EnrichmentStatus,
    /// Product id on the commerce platform, once created there
    pub commerce_product_id: Option<String>,
    /// Primary variant id on the commerce platform
    pub commerce_variant_id: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl InventoryItem {
    /// Title shown on platforms: enriched title, else "Brand Model"
    pub fn display_title(&self) -> String {
        self.content
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map_or_else(
                || format!("{} {}", self.brand.trim(), self.model.trim()),
                ToString::to_string,
            )
    }
}

/// Input for creating an inventory item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInventoryItem {
    pub sku: String,
    pub brand: String,
    pub model: String,
    pub listing_type: ListingType,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub content: EnrichedContent,
}

impl NewInventoryItem {
    /// Reject input that could never be published
    pub fn validate(&self) -> crate::Result<()> {
        if self.sku.trim().is_empty() {
            return Err(Error::InvalidInput("sku must not be empty".into()));
        }
        if self.brand.trim().is_empty() || self.model.trim().is_empty() {
            return Err(Error::InvalidInput(
                "brand and model must not be empty".into(),
            ));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(Error::InvalidInput(
                "price must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    /// Build the row to insert
    #[must_use]
    pub fn into_item(self) -> InventoryItem {
        let now = chrono::Utc::now().timestamp_millis();
        let enrichment_status = EnrichmentStatus::derive(&self.content);
        InventoryItem {
            id: InventoryId::new(),
            sku: self.sku.trim().to_string(),
            brand: self.brand.trim().to_string(),
            model: self.model.trim().to_string(),
            listing_type: self.listing_type,
            condition: self.condition,
            serial_number: self.serial_number,
            price: self.price,
            content: self.content,
            enrichment_status,
            commerce_product_id: None,
            commerce_variant_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
