//! Outbound clients for the external platforms an item is published to.

mod commerce;
mod crm;
mod workspace;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

pub use commerce::{
    product_create_request, product_update_request, variants_update_request, CommerceClient,
    CommerceConfig, COMMERCE_PROVIDER, DEFAULT_API_VERSION,
};
pub use crm::{deal_name, deal_request, CrmAuth, CrmClient, CrmConfig, DEFAULT_CRM_API_URL};
pub use workspace::{page_request, WorkspaceClient, WorkspaceConfig, DEFAULT_WORKSPACE_API_URL};

use crate::models::{InventoryItem, Platform};
use crate::retry::Retryable;
use crate::util::compact_text;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// Rate limit or transient failure reported inside a 200 response
    #[error("throttled: {0}")]
    Throttled(String),
    /// Business errors reported by the platform, surfaced verbatim
    #[error("{0}")]
    UserErrors(String),
    #[error("platform is not configured: {0}")]
    Config(String),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl Retryable for PlatformError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::Throttled(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::UserErrors(_) | Self::Config(_) | Self::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Http {
                status: status.as_u16(),
                body: error.to_string(),
            }
        } else {
            Self::Network(error.to_string())
        }
    }
}

pub type PlatformCallResult<T> = Result<T, PlatformError>;

/// What the caller asked for; platforms may deliberately ignore parts of it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Requested visibility for new commerce products. Creates are always drafts.
    pub publish_live: bool,
}

/// Identifiers returned by a successful publish
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformOutcome {
    pub external_id: Option<String>,
    /// Primary variant id, for platforms that have variants
    pub variant_id: Option<String>,
    /// True when the call created a new platform-side record
    pub created: bool,
}

/// One external platform an inventory item can be pushed to
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether this platform tracks items of this kind at all
    fn applies_to(&self, _item: &InventoryItem) -> bool {
        true
    }

    async fn publish(
        &self,
        item: &InventoryItem,
        options: PublishOptions,
    ) -> PlatformCallResult<PlatformOutcome>;

    /// Follow-up work after a create, run once the new ids are stored.
    /// `item` already carries those ids, so retrying this never creates again.
    async fn complete_create(
        &self,
        _item: &InventoryItem,
        _outcome: &PlatformOutcome,
    ) -> PlatformCallResult<()> {
        Ok(())
    }
}

pub(crate) fn http_client(timeout: Duration) -> PlatformCallResult<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Turn a non-success response into `PlatformError::Http`
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> PlatformCallResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Http {
        status: status.as_u16(),
        body: parse_api_error(status, &body),
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = parsed
            .message
            .or(parsed.error_description)
            .or(parsed.error)
            .filter(|message| !message.trim().is_empty())
        {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed
    }
}
