//! Workspace database client. Every publish appends one page.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    ensure_success, http_client, PlatformOutcome, PlatformPublisher, PlatformCallResult,
    PublishOptions,
};
use crate::models::{InventoryItem, Platform};

pub const DEFAULT_WORKSPACE_API_URL: &str = "https://api.notion.com";
const API_VERSION_HEADER: &str = "Notion-Version";
const API_VERSION: &str = "2022-06-28";

#[derive(Clone)]
pub struct WorkspaceConfig {
    pub api_url: String,
    pub token: String,
    pub database_id: String,
    pub timeout: Duration,
}

impl fmt::Debug for WorkspaceConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WorkspaceConfig")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("database_id", &self.database_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn rich_text(value: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": value } }] })
}

/// Page-creation body: a denormalized summary of `item` at `published_at`
pub fn page_request(item: &InventoryItem, database_id: &str, published_at: DateTime<Utc>) -> Value {
    json!({
        "parent": { "database_id": database_id },
        "properties": {
            "Name": { "title": [{ "text": { "content": item.display_title() } }] },
            "Listing Type": { "select": { "name": item.listing_type.label() } },
            "SKU": rich_text(&item.sku),
            "Brand": rich_text(&item.brand),
            "Model": rich_text(&item.model),
            "Condition": rich_text(item.condition.as_deref().unwrap_or_default()),
            "Price": { "number": item.price },
            "Published": { "date": { "start": published_at.to_rfc3339() } },
        },
    })
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    id: String,
}

pub struct WorkspaceClient {
    config: WorkspaceConfig,
    client: reqwest::Client,
}

impl WorkspaceClient {
    pub fn new(config: WorkspaceConfig) -> PlatformCallResult<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl PlatformPublisher for WorkspaceClient {
    fn platform(&self) -> Platform {
        Platform::Workspace
    }

    async fn publish(
        &self,
        item: &InventoryItem,
        _options: PublishOptions,
    ) -> PlatformCallResult<PlatformOutcome> {
        let body = page_request(item, &self.config.database_id, Utc::now());
        let response = self
            .client
            .post(format!(
                "{}/v1/pages",
                self.config.api_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.token)
            .header(API_VERSION_HEADER, API_VERSION)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let page = response.json::<PageResponse>().await?;

        tracing::info!(sku = %item.sku, page = %page.id, "Appended workspace page");
        Ok(PlatformOutcome {
            external_id: Some(page.id),
            variant_id: None,
            created: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichedContent, ListingType, NewInventoryItem};
    use chrono::TimeZone;

    #[test]
    fn page_has_fixed_property_schema() {
        let item = NewInventoryItem {
            sku: "FUJI-XT4".to_string(),
            brand: "Fujifilm".to_string(),
            model: "X-T4".to_string(),
            listing_type: ListingType::ExDemo,
            condition: None,
            serial_number: None,
            price: 1100.0,
            content: EnrichedContent::default(),
        }
        .into_item();
        let published = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let body = page_request(&item, "db-1", published);
        let properties = &body["properties"];
        assert_eq!(body["parent"]["database_id"], "db-1");
        assert_eq!(properties["Name"]["title"][0]["text"]["content"], "Fujifilm X-T4");
        assert_eq!(properties["Listing Type"]["select"]["name"], "Ex-Demo");
        assert_eq!(properties["SKU"]["rich_text"][0]["text"]["content"], "FUJI-XT4");
        assert_eq!(properties["Price"]["number"], 1100.0);
        assert_eq!(properties["Published"]["date"]["start"], "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn debug_redacts_token() {
        let config = WorkspaceConfig {
            api_url: DEFAULT_WORKSPACE_API_URL.to_string(),
            token: "secret_abc".to_string(),
            database_id: "db-1".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(!format!("{config:?}").contains("secret_abc"));
    }
}
