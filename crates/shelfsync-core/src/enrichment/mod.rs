//! Generated listing content.
//!
//! The generator itself is opaque: structured identity in, text out.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::{Database, InventoryRepository, LibSqlInventoryRepository};
use crate::error::{Error, Result};
use crate::models::{EnrichmentStatus, InventoryId, InventoryItem, SnapshotKind};
use crate::snapshot::SnapshotManager;

/// What the generator is told about an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationInput {
    pub brand: String,
    pub model: String,
    pub listing_type: String,
    pub condition: Option<String>,
    /// Spec-sheet entries as `key: value` lines
    pub specs: Vec<String>,
}

impl GenerationInput {
    pub fn from_item(item: &InventoryItem) -> Self {
        let specs = item
            .content
            .specs
            .iter()
            .map(|(key, value)| match value.as_str() {
                Some(text) => format!("{key}: {text}"),
                None => format!("{key}: {value}"),
            })
            .collect();
        Self {
            brand: item.brand.clone(),
            model: item.model.clone(),
            listing_type: item.listing_type.label().to_string(),
            condition: item.condition.clone(),
            specs,
        }
    }
}

/// Generated fields; `None` leaves the current value in place
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub description_html: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub seo_title: Option<String>,
    #[serde(default)]
    pub seo_description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, input: &GenerationInput) -> Result<GeneratedContent>;
}

/// Builds listing copy from the identity fields and spec sheet alone
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(&self, input: &GenerationInput) -> Result<GeneratedContent> {
        let name = format!("{} {}", input.brand.trim(), input.model.trim());
        let mut description = format!("<p>{} ({})", escape_html(&name), input.listing_type);
        if let Some(condition) = input.condition.as_deref() {
            description.push_str(&format!(", condition: {}", escape_html(condition)));
        }
        description.push_str(".</p>");
        if !input.specs.is_empty() {
            description.push_str("<ul>");
            for spec in &input.specs {
                description.push_str(&format!("<li>{}</li>", escape_html(spec)));
            }
            description.push_str("</ul>");
        }

        Ok(GeneratedContent {
            description_html: description,
            seo_title: Some(format!("{name} | {}", input.listing_type)),
            tags: vec![input.brand.trim().to_lowercase()],
            ..GeneratedContent::default()
        })
    }
}

#[derive(Clone)]
pub struct EnrichmentService {
    db: Arc<Database>,
    snapshots: SnapshotManager,
}

impl EnrichmentService {
    pub fn new(db: Arc<Database>) -> Self {
        let snapshots = SnapshotManager::new(Arc::clone(&db));
        Self { db, snapshots }
    }

    /// Generate content for an item and store it.
    ///
    /// The first enrichment of an item captures an `Original` snapshot so the
    /// pre-generation content can always be restored. Later enrichments
    /// capture a `Manual` snapshot of the content they replace.
    pub async fn enrich(
        &self,
        item_id: &InventoryId,
        generator: &dyn ContentGenerator,
    ) -> Result<InventoryItem> {
        let repo = LibSqlInventoryRepository::new(self.db.connection());
        let item = repo
            .get(item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("inventory item {item_id}")))?;

        let generated = generator.generate(&GenerationInput::from_item(&item)).await?;
        if generated.description_html.trim().is_empty() {
            return Err(Error::InvalidInput(
                "generator returned an empty description".into(),
            ));
        }

        let has_original = self
            .snapshots
            .list_snapshots(item_id)
            .await
            .map(|snapshots| {
                snapshots
                    .iter()
                    .any(|snapshot| snapshot.kind == SnapshotKind::Original)
            })
            .unwrap_or(false);
        let (kind, note) = if has_original {
            (SnapshotKind::Manual, "before re-enrichment")
        } else {
            (SnapshotKind::Original, "before first enrichment")
        };
        self.snapshots
            .capture_non_fatal(item_id, kind, Some(note.to_string()))
            .await;

        let mut content = item.content;
        content.description_html = Some(generated.description_html);
        if generated.title.is_some() {
            content.title = generated.title;
        }
        if generated.seo_title.is_some() {
            content.seo_title = generated.seo_title;
        }
        if generated.seo_description.is_some() {
            content.seo_description = generated.seo_description;
        }
        for tag in generated.tags {
            if !content.tags.contains(&tag) {
                content.tags.push(tag);
            }
        }

        let updated = repo
            .update_content(item_id, &content, EnrichmentStatus::derive(&content))
            .await?;
        tracing::info!(item = %item_id, "Enriched inventory item");
        Ok(updated)
    }
}
