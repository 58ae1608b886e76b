//! Matching imported catalog entries to inventory items.
//!
//! Three passes run in a fixed order and stop adding once `limit` suggestions
//! exist: exact SKU, exact brand + model, then a Levenshtein-scored fuzzy pass
//! over unlinked inventory. A candidate already suggested by an earlier pass is
//! never suggested again.

mod similarity;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use similarity::{brands_compatible, fuzzy_score, normalize, similarity, ACCEPT_SCORE, BRAND_GATE};

use crate::db::{
    CatalogRepository, Database, InventoryRepository, LibSqlCatalogRepository,
    LibSqlInventoryRepository,
};
use crate::error::{Error, Result};
use crate::models::{CatalogEntry, CatalogEntryId, InventoryId, InventoryItem};

/// Suggestions returned when the caller does not ask for a count
pub const DEFAULT_LIMIT: usize = 5;
/// Auto-match links only at or above this confidence
pub const AUTO_LINK_CONFIDENCE: u8 = 95;

const SKU_CONFIDENCE: u8 = 100;
const BRAND_MODEL_CONFIDENCE: u8 = 95;
/// Inventory scanned by the exact brand + model pass
const EXACT_SCAN_LIMIT: usize = 1_000;
/// Unlinked inventory scored by the fuzzy pass
const FUZZY_SCAN_LIMIT: usize = 100;
/// Catalog entries considered by one auto-match run
const AUTO_MATCH_BATCH: usize = 10_000;

/// Which pass produced a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    SkuExact,
    BrandModelExact,
    BrandModelFuzzy,
}

/// A candidate inventory item for a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSuggestion {
    pub inventory_id: InventoryId,
    pub sku: String,
    pub title: String,
    pub match_type: MatchType,
    /// 0-100
    pub confidence: u8,
    pub match_details: String,
}

impl MatchSuggestion {
    fn new(item: &InventoryItem, match_type: MatchType, confidence: u8, details: String) -> Self {
        Self {
            inventory_id: item.id,
            sku: item.sku.clone(),
            title: item.display_title(),
            match_type,
            confidence,
            match_details: details,
        }
    }
}

/// Normalized brand and model of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub brand: String,
    pub model: String,
}

impl Identity {
    /// Brand is the vendor, else the first title token. Model is the title
    /// without its brand prefix, else the product type.
    pub fn of_entry(entry: &CatalogEntry) -> Self {
        let title = normalize(&entry.title);
        let brand = entry
            .vendor
            .as_deref()
            .map(normalize)
            .filter(|vendor| !vendor.is_empty())
            .unwrap_or_else(|| title.split(' ').next().unwrap_or_default().to_string());

        let model = strip_brand(&title, &brand);
        let model = if model.is_empty() {
            entry
                .product_type
                .as_deref()
                .map(normalize)
                .unwrap_or_default()
        } else {
            model
        };
        Self { brand, model }
    }

    pub fn of_item(item: &InventoryItem) -> Self {
        let brand = normalize(&item.brand);
        let model = strip_brand(&normalize(&item.model), &brand);
        Self { brand, model }
    }
}

fn strip_brand(value: &str, brand: &str) -> String {
    if brand.is_empty() {
        return value.to_string();
    }
    value
        .strip_prefix(brand)
        .filter(|rest| rest.is_empty() || rest.starts_with(' '))
        .unwrap_or(value)
        .trim()
        .to_string()
}

/// Suggestions collected so far, deduplicated by inventory id
#[derive(Debug, Default)]
struct Collected {
    suggestions: Vec<MatchSuggestion>,
    seen: HashSet<InventoryId>,
    limit: usize,
}

impl Collected {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn is_full(&self) -> bool {
        self.suggestions.len() >= self.limit
    }

    fn contains(&self, id: &InventoryId) -> bool {
        self.seen.contains(id)
    }

    fn push(&mut self, suggestion: MatchSuggestion) {
        if self.is_full() || !self.seen.insert(suggestion.inventory_id) {
            return;
        }
        self.suggestions.push(suggestion);
    }

    fn finish(mut self) -> Vec<MatchSuggestion> {
        // Stable: equal confidences keep pass order
        self.suggestions
            .sort_by(|a, b| b.confidence.cmp(&a.confidence));
        self.suggestions.truncate(self.limit);
        self.suggestions
    }
}

fn sku_pass(collected: &mut Collected, sku: &str, hits: &[InventoryItem]) {
    for item in hits {
        collected.push(MatchSuggestion::new(
            item,
            MatchType::SkuExact,
            SKU_CONFIDENCE,
            format!("SKU `{sku}` matches exactly"),
        ));
    }
}

fn exact_pass(collected: &mut Collected, identity: &Identity, pool: &[InventoryItem]) {
    if identity.model.is_empty() {
        return;
    }
    for item in pool {
        let candidate = Identity::of_item(item);
        if candidate.model == identity.model && brands_compatible(&candidate.brand, &identity.brand)
        {
            collected.push(MatchSuggestion::new(
                item,
                MatchType::BrandModelExact,
                BRAND_MODEL_CONFIDENCE,
                format!("brand `{}` and model `{}` match", candidate.brand, candidate.model),
            ));
        }
    }
}

fn fuzzy_pass(collected: &mut Collected, identity: &Identity, pool: &[InventoryItem]) {
    let mut scored: Vec<(u8, MatchSuggestion)> = pool
        .iter()
        .filter(|item| !collected.contains(&item.id))
        .filter_map(|item| {
            let candidate = Identity::of_item(item);
            let brand_similarity = similarity(&candidate.brand, &identity.brand);
            let model_similarity = similarity(&candidate.model, &identity.model);
            let score = fuzzy_score(brand_similarity, model_similarity)?;
            Some((
                score,
                MatchSuggestion::new(
                    item,
                    MatchType::BrandModelFuzzy,
                    score,
                    format!("brand {brand_similarity}% similar, model {model_similarity}% similar"),
                ),
            ))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, suggestion) in scored {
        if collected.is_full() {
            break;
        }
        collected.push(suggestion);
    }
}

/// SKU and brand + model passes done; the fuzzy pass may still add more
struct Ranking {
    identity: Identity,
    collected: Collected,
}

impl Ranking {
    fn exact_passes(
        entry: &CatalogEntry,
        sku_hits: &[InventoryItem],
        exact_pool: &[InventoryItem],
        limit: usize,
    ) -> Self {
        let identity = Identity::of_entry(entry);
        let mut collected = Collected::new(limit);
        if let Some(sku) = entry.primary_sku() {
            sku_pass(&mut collected, sku, sku_hits);
        }
        exact_pass(&mut collected, &identity, exact_pool);
        Self {
            identity,
            collected,
        }
    }

    fn has_room(&self) -> bool {
        !self.collected.is_full()
    }

    fn finish(mut self, fuzzy_pool: &[InventoryItem]) -> Vec<MatchSuggestion> {
        if self.has_room() {
            fuzzy_pass(&mut self.collected, &self.identity, fuzzy_pool);
        }
        self.collected.finish()
    }
}

/// Rank candidates for `entry` from already-loaded pools.
///
/// `sku_hits` are items whose SKU equals the entry's primary SKU;
/// `exact_pool` is scanned for brand + model equality and `fuzzy_pool` is
/// scored only when the earlier passes left room.
pub fn rank_matches(
    entry: &CatalogEntry,
    sku_hits: &[InventoryItem],
    exact_pool: &[InventoryItem],
    fuzzy_pool: &[InventoryItem],
    limit: usize,
) -> Vec<MatchSuggestion> {
    Ranking::exact_passes(entry, sku_hits, exact_pool, limit).finish(fuzzy_pool)
}

/// Outcome of [`ProductMatcher::auto_match_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoMatchReport {
    /// Entries examined
    pub processed: usize,
    /// (catalog entry, inventory item) pairs that were linked
    pub linked: Vec<(CatalogEntryId, InventoryId)>,
    /// Entries whose best candidate was missing or below the link threshold
    pub skipped: usize,
    /// Per-entry failures; one failure never aborts the run
    pub errors: Vec<String>,
}

/// Store-backed matcher and linker
#[derive(Clone)]
pub struct ProductMatcher {
    db: Arc<Database>,
}

impl ProductMatcher {
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Suggestions for one catalog entry, best first
    pub async fn find_matches(
        &self,
        catalog_id: &CatalogEntryId,
        limit: usize,
    ) -> Result<Vec<MatchSuggestion>> {
        let entry = LibSqlCatalogRepository::new(self.db.connection())
            .get(catalog_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("catalog entry {catalog_id}")))?;
        self.find_matches_for(&entry, limit).await
    }

    /// Suggestions for an entry that is already loaded
    pub async fn find_matches_for(
        &self,
        entry: &CatalogEntry,
        limit: usize,
    ) -> Result<Vec<MatchSuggestion>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let inventory = LibSqlInventoryRepository::new(self.db.connection());

        let sku_hits = match entry.primary_sku() {
            Some(sku) => inventory.find_by_sku(sku).await?,
            None => Vec::new(),
        };
        let exact_pool = inventory.list(EXACT_SCAN_LIMIT, 0).await?;

        let ranking = Ranking::exact_passes(entry, &sku_hits, &exact_pool, limit);
        // Only load the fuzzy pool when it can still contribute
        let fuzzy_pool = if ranking.has_room() {
            inventory.list_unlinked(FUZZY_SCAN_LIMIT).await?
        } else {
            Vec::new()
        };
        let suggestions = ranking.finish(&fuzzy_pool);
        tracing::debug!(
            catalog = %entry.id,
            count = suggestions.len(),
            "Computed match suggestions"
        );
        Ok(suggestions)
    }

    /// Link a catalog entry to an inventory item, replacing any previous link
    pub async fn link_product(
        &self,
        catalog_id: &CatalogEntryId,
        inventory_id: &InventoryId,
    ) -> Result<()> {
        let conn = self.db.connection();
        if LibSqlInventoryRepository::new(conn)
            .get(inventory_id)
            .await?
            .is_none()
        {
            return Err(Error::NotFound(format!("inventory item {inventory_id}")));
        }
        if !LibSqlCatalogRepository::new(conn)
            .set_link(catalog_id, Some(inventory_id))
            .await?
        {
            return Err(Error::NotFound(format!("catalog entry {catalog_id}")));
        }
        tracing::info!(catalog = %catalog_id, inventory = %inventory_id, "Linked catalog entry");
        Ok(())
    }

    /// Clear a catalog entry's link
    pub async fn unlink_product(&self, catalog_id: &CatalogEntryId) -> Result<()> {
        if !LibSqlCatalogRepository::new(self.db.connection())
            .set_link(catalog_id, None)
            .await?
        {
            return Err(Error::NotFound(format!("catalog entry {catalog_id}")));
        }
        tracing::info!(catalog = %catalog_id, "Unlinked catalog entry");
        Ok(())
    }

    /// Link every unlinked entry whose best suggestion clears the threshold.
    pub async fn auto_match_all(&self) -> Result<AutoMatchReport> {
        let entries = LibSqlCatalogRepository::new(self.db.connection())
            .list_unlinked(AUTO_MATCH_BATCH)
            .await?;

        let mut report = AutoMatchReport::default();
        for entry in entries {
            report.processed += 1;
            match self.auto_match_one(&entry).await {
                Ok(Some(inventory_id)) => report.linked.push((entry.id, inventory_id)),
                Ok(None) => report.skipped += 1,
                Err(error) => {
                    tracing::warn!(catalog = %entry.id, %error, "Auto-match failed for entry");
                    report.errors.push(format!("{}: {error}", entry.title));
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            linked = report.linked.len(),
            skipped = report.skipped,
            errors = report.errors.len(),
            "Auto-match finished"
        );
        Ok(report)
    }

    async fn auto_match_one(&self, entry: &CatalogEntry) -> Result<Option<InventoryId>> {
        let best = self.find_matches_for(entry, 1).await?.into_iter().next();
        match best {
            Some(suggestion) if suggestion.confidence >= AUTO_LINK_CONFIDENCE => {
                self.link_product(&entry.id, &suggestion.inventory_id).await?;
                Ok(Some(suggestion.inventory_id))
            }
            _ => Ok(None),
        }
    }
}
