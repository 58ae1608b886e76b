//! CRM deal client. Acquisitions (trade-ins, ex-demo units) become deals.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{
    ensure_success, http_client, PlatformError, PlatformOutcome, PlatformPublisher,
    PlatformCallResult, PublishOptions,
};
use crate::models::{InventoryItem, Platform};
use crate::util::unix_millis_now;

pub const DEFAULT_CRM_API_URL: &str = "https://api.hubapi.com";

/// Refresh cached tokens this long before they expire
const EXPIRY_SKEW_MS: i64 = 60_000;

#[derive(Clone)]
pub enum CrmAuth {
    Static(String),
    ClientCredentials {
        client_id: String,
        client_secret: String,
        token_url: String,
    },
}

impl fmt::Debug for CrmAuth {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => formatter.debug_tuple("Static").field(&"[REDACTED]").finish(),
            Self::ClientCredentials {
                client_id,
                token_url,
                ..
            } => formatter
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .field("token_url", token_url)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub api_url: String,
    pub auth: CrmAuth,
    pub pipeline_id: Option<String>,
    pub deal_stage: Option<String>,
    pub timeout: Duration,
}

/// "Trade-In - Sony A7 III"
pub fn deal_name(item: &InventoryItem) -> String {
    format!(
        "{} - {} {}",
        item.listing_type.label(),
        item.brand.trim(),
        item.model.trim()
    )
}

/// Deal-creation body for `item`
pub fn deal_request(item: &InventoryItem, config: &CrmConfig) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("dealname".into(), json!(deal_name(item)));
    properties.insert("amount".into(), json!(format!("{:.2}", item.price)));
    if let Some(pipeline) = config.pipeline_id.as_deref() {
        properties.insert("pipeline".into(), json!(pipeline));
    }
    if let Some(stage) = config.deal_stage.as_deref() {
        properties.insert("dealstage".into(), json!(stage));
    }

    let mut description = format!("SKU: {}", item.sku);
    if let Some(serial) = item.serial_number.as_deref() {
        description.push_str(&format!("\nSerial: {serial}"));
    }
    if let Some(condition) = item.condition.as_deref() {
        description.push_str(&format!("\nCondition: {condition}"));
    }
    properties.insert("description".into(), json!(description));

    json!({ "properties": properties })
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms + EXPIRY_SKEW_MS
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DealResponse {
    id: String,
}

pub struct CrmClient {
    config: CrmConfig,
    client: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
}

impl CrmClient {
    pub fn new(config: CrmConfig) -> PlatformCallResult<Self> {
        let client = http_client(config.timeout)?;
        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    async fn access_token(&self) -> PlatformCallResult<String> {
        let (client_id, client_secret, token_url) = match &self.config.auth {
            CrmAuth::Static(token) => return Ok(token.clone()),
            CrmAuth::ClientCredentials {
                client_id,
                client_secret,
                token_url,
            } => (client_id, client_secret, token_url),
        };

        let now = unix_millis_now();
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.token.clone());
            }
        }

        let mut slot = self.token.write().await;
        // Another task may have refreshed while we waited for the write lock
        if let Some(cached) = slot.as_ref() {
            if cached.is_fresh(now) {
                return Ok(cached.token.clone());
            }
        }

        let response = self
            .client
            .post(token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let payload = response.json::<TokenResponse>().await?;

        let token = payload.access_token.trim().to_string();
        if token.is_empty() {
            return Err(PlatformError::InvalidResponse(
                "token response did not include an access token".into(),
            ));
        }
        let expires_at = now.saturating_add(payload.expires_in.unwrap_or(1_800).saturating_mul(1_000));
        tracing::debug!("Obtained CRM access token");
        *slot = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }
}

#[async_trait]
impl PlatformPublisher for CrmClient {
    fn platform(&self) -> Platform {
        Platform::Crm
    }

    fn applies_to(&self, item: &InventoryItem) -> bool {
        item.listing_type.is_acquisition()
    }

    async fn publish(
        &self,
        item: &InventoryItem,
        _options: PublishOptions,
    ) -> PlatformCallResult<PlatformOutcome> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/crm/v3/objects/deals",
                self.config.api_url.trim_end_matches('/')
            ))
            .bearer_auth(token)
            .json(&deal_request(item, &self.config))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let deal = response.json::<DealResponse>().await?;

        tracing::info!(sku = %item.sku, deal = %deal.id, "Created CRM deal");
        Ok(PlatformOutcome {
            external_id: Some(deal.id),
            variant_id: None,
            created: true,
        })
    }
}
