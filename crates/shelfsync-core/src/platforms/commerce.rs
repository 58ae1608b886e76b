//! Commerce catalog client (Admin GraphQL API).
//!
//! New products are always created as drafts; the primary variant's price,
//! SKU and compare-at price are set in a separate step once the new ids are
//! stored. Existing products are updated in two calls: product fields first,
//! then the primary variant.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    ensure_success, http_client, PlatformError, PlatformOutcome, PlatformPublisher,
    PlatformCallResult, PublishOptions,
};
use crate::db::{Database, LibSqlTokenRepository, TokenRepository};
use crate::models::{InventoryItem, Platform};

/// Provider name under which installed-app tokens are stored
pub const COMMERCE_PROVIDER: &str = "shopify";
pub const DEFAULT_API_VERSION: &str = "2024-10";

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";
const METAFIELD_NAMESPACE: &str = "specs";

const PRODUCT_CREATE: &str = "mutation productCreate($input: ProductInput!) {
  productCreate(input: $input) {
    product { id variants(first: 1) { nodes { id } } }
    userErrors { field message }
  }
}";

const PRODUCT_UPDATE: &str = "mutation productUpdate($input: ProductInput!) {
  productUpdate(input: $input) {
    product { id }
    userErrors { field message }
  }
}";

const VARIANTS_BULK_UPDATE: &str = "mutation productVariantsBulkUpdate($productId: ID!, $variants: [ProductVariantsBulkInput!]!) {
  productVariantsBulkUpdate(productId: $productId, variants: $variants) {
    productVariants { id }
    userErrors { field message }
  }
}";

#[derive(Clone)]
pub struct CommerceConfig {
    /// `example.myshopify.com`
    pub shop_domain: String,
    /// Static token; when absent the stored install token is used
    pub access_token: Option<String>,
    pub api_version: String,
    pub timeout: Duration,
}

impl fmt::Debug for CommerceConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CommerceConfig")
            .field("shop_domain", &self.shop_domain)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl CommerceConfig {
    fn graphql_url(&self) -> String {
        format!(
            "https://{}/admin/api/{}/graphql.json",
            self.shop_domain.trim_end_matches('/'),
            self.api_version
        )
    }
}

fn product_input(item: &InventoryItem) -> serde_json::Map<String, Value> {
    let mut input = serde_json::Map::new();
    input.insert("title".into(), json!(item.display_title()));
    input.insert("vendor".into(), json!(item.brand));
    if let Some(description) = item.content.description_html.as_deref() {
        input.insert("descriptionHtml".into(), json!(description));
    }
    if let Some(product_type) = item.content.product_type.as_deref() {
        input.insert("productType".into(), json!(product_type));
    }
    if !item.content.tags.is_empty() {
        input.insert("tags".into(), json!(item.content.tags));
    }
    if item.content.seo_title.is_some() || item.content.seo_description.is_some() {
        input.insert(
            "seo".into(),
            json!({
                "title": item.content.seo_title,
                "description": item.content.seo_description,
            }),
        );
    }
    let metafields: Vec<Value> = item
        .content
        .specs
        .iter()
        .map(|(key, value)| {
            let value = value
                .as_str()
                .map_or_else(|| value.to_string(), ToString::to_string);
            json!({
                "namespace": METAFIELD_NAMESPACE,
                "key": key,
                "type": "single_line_text_field",
                "value": value,
            })
        })
        .collect();
    if !metafields.is_empty() {
        input.insert("metafields".into(), Value::Array(metafields));
    }
    input
}

/// GraphQL body creating `item` as a draft product.
///
/// `options` is accepted so callers can pass their intent through, but the
/// created product's status is always `DRAFT`.
pub fn product_create_request(item: &InventoryItem, options: PublishOptions) -> Value {
    if options.publish_live {
        tracing::debug!(sku = %item.sku, "Ignoring live publish request for a new product");
    }
    let mut input = product_input(item);
    input.insert("status".into(), json!("DRAFT"));
    json!({ "query": PRODUCT_CREATE, "variables": { "input": input } })
}

/// GraphQL body updating an existing product's descriptive fields
pub fn product_update_request(product_id: &str, item: &InventoryItem) -> Value {
    let mut input = product_input(item);
    input.insert("id".into(), json!(product_id));
    json!({ "query": PRODUCT_UPDATE, "variables": { "input": input } })
}

/// GraphQL body updating price, SKU and compare-at price of one variant
pub fn variants_update_request(product_id: &str, variant_id: &str, item: &InventoryItem) -> Value {
    let mut variant = json!({
        "id": variant_id,
        "price": format!("{:.2}", item.price),
        "inventoryItem": { "sku": item.sku },
    });
    if let Some(compare_at) = item.content.compare_at_price {
        variant["compareAtPrice"] = json!(format!("{compare_at:.2}"));
    }
    json!({
        "query": VARIANTS_BULK_UPDATE,
        "variables": { "productId": product_id, "variants": [variant] },
    })
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(default)]
    extensions: Option<GraphQlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorExtensions {
    #[serde(default)]
    code: Option<String>,
}

/// Top-level error codes that clear up on their own
const TRANSIENT_ERROR_CODES: [&str; 3] = ["THROTTLED", "MAX_COST_EXCEEDED", "INTERNAL_SERVER_ERROR"];

impl GraphQlError {
    fn is_transient(&self) -> bool {
        self.extensions
            .as_ref()
            .and_then(|extensions| extensions.code.as_deref())
            .is_some_and(|code| TRANSIENT_ERROR_CODES.contains(&code))
    }
}

#[derive(Debug, Deserialize)]
struct UserError {
    #[serde(default)]
    field: Option<Vec<String>>,
    message: String,
}

fn user_errors(errors: &[UserError]) -> Option<PlatformError> {
    if errors.is_empty() {
        return None;
    }
    let message = errors
        .iter()
        .map(|error| match error.field.as_deref() {
            Some(field) if !field.is_empty() => format!("{}: {}", field.join("."), error.message),
            _ => error.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ");
    Some(PlatformError::UserErrors(message))
}

#[derive(Debug, Deserialize)]
struct IdNode {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VariantConnection {
    #[serde(default)]
    nodes: Vec<IdNode>,
}

#[derive(Debug, Deserialize)]
struct CreatedProduct {
    id: String,
    variants: Option<VariantConnection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductCreateData {
    product_create: ProductCreatePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductCreatePayload {
    product: Option<CreatedProduct>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductUpdateData {
    product_update: MutationPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariantsUpdateData {
    product_variants_bulk_update: MutationPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutationPayload {
    #[serde(default)]
    user_errors: Vec<UserError>,
}

fn into_data<T>(response: GraphQlResponse<T>) -> PlatformCallResult<T> {
    if !response.errors.is_empty() {
        let message = response
            .errors
            .iter()
            .map(|error| error.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        if response.errors.iter().any(GraphQlError::is_transient) {
            return Err(PlatformError::Throttled(message));
        }
        return Err(PlatformError::UserErrors(message));
    }
    response
        .data
        .ok_or_else(|| PlatformError::InvalidResponse("GraphQL response had no data".into()))
}

pub struct CommerceClient {
    config: CommerceConfig,
    db: Arc<Database>,
    client: reqwest::Client,
}

impl CommerceClient {
    pub fn new(config: CommerceConfig, db: Arc<Database>) -> PlatformCallResult<Self> {
        if config.shop_domain.trim().is_empty() {
            return Err(PlatformError::Config("shop domain must not be empty".into()));
        }
        let client = http_client(config.timeout)?;
        Ok(Self { config, db, client })
    }

    /// Static token first, then the token stored for this shop
    async fn resolve_token(&self) -> PlatformCallResult<String> {
        if let Some(token) = self
            .config
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            return Ok(token.to_string());
        }

        let stored = LibSqlTokenRepository::new(self.db.connection())
            .find(COMMERCE_PROVIDER, &self.config.shop_domain)
            .await
            .map_err(|error| PlatformError::Config(format!("token lookup failed: {error}")))?;

        stored.ok_or_else(|| {
            PlatformError::Config(format!(
                "no access token configured or stored for {}",
                self.config.shop_domain
            ))
        })
    }

    async fn execute<T: DeserializeOwned>(&self, token: &str, body: &Value) -> PlatformCallResult<T> {
        let response = self
            .client
            .post(self.config.graphql_url())
            .header(ACCESS_TOKEN_HEADER, token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let payload = response.json::<GraphQlResponse<T>>().await?;
        into_data(payload)
    }

    async fn create(
        &self,
        token: &str,
        item: &InventoryItem,
        options: PublishOptions,
    ) -> PlatformCallResult<PlatformOutcome> {
        let data: ProductCreateData = self
            .execute(token, &product_create_request(item, options))
            .await?;
        if let Some(error) = user_errors(&data.product_create.user_errors) {
            return Err(error);
        }
        let product = data.product_create.product.ok_or_else(|| {
            PlatformError::InvalidResponse("productCreate returned no product".into())
        })?;
        let variant_id = product
            .variants
            .and_then(|variants| variants.nodes.into_iter().next())
            .map(|node| node.id);

        // Price and SKU go in `complete_create`, after the ids are stored
        tracing::info!(sku = %item.sku, product = %product.id, "Created draft commerce product");
        Ok(PlatformOutcome {
            external_id: Some(product.id),
            variant_id,
            created: true,
        })
    }

    async fn update(
        &self,
        token: &str,
        product_id: &str,
        item: &InventoryItem,
    ) -> PlatformCallResult<PlatformOutcome> {
        let data: ProductUpdateData = self
            .execute(token, &product_update_request(product_id, item))
            .await?;
        if let Some(error) = user_errors(&data.product_update.user_errors) {
            return Err(error);
        }

        if let Some(variant_id) = item.commerce_variant_id.as_deref() {
            self.update_variant(token, product_id, variant_id, item)
                .await?;
        } else {
            tracing::warn!(sku = %item.sku, "No primary variant known; price not updated");
        }

        tracing::info!(sku = %item.sku, product = %product_id, "Updated commerce product");
        Ok(PlatformOutcome {
            external_id: Some(product_id.to_string()),
            variant_id: item.commerce_variant_id.clone(),
            created: false,
        })
    }

    async fn update_variant(
        &self,
        token: &str,
        product_id: &str,
        variant_id: &str,
        item: &InventoryItem,
    ) -> PlatformCallResult<()> {
        let data: VariantsUpdateData = self
            .execute(token, &variants_update_request(product_id, variant_id, item))
            .await?;
        match user_errors(&data.product_variants_bulk_update.user_errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlatformPublisher for CommerceClient {
    fn platform(&self) -> Platform {
        Platform::Commerce
    }

    async fn publish(
        &self,
        item: &InventoryItem,
        options: PublishOptions,
    ) -> PlatformCallResult<PlatformOutcome> {
        let token = self.resolve_token().await?;
        match item.commerce_product_id.as_deref() {
            Some(product_id) => self.update(&token, product_id, item).await,
            None => self.create(&token, item, options).await,
        }
    }

    async fn complete_create(
        &self,
        item: &InventoryItem,
        outcome: &PlatformOutcome,
    ) -> PlatformCallResult<()> {
        let (Some(product_id), Some(variant_id)) =
            (outcome.external_id.as_deref(), outcome.variant_id.as_deref())
        else {
            tracing::warn!(sku = %item.sku, "Created product has no variant; price not set");
            return Ok(());
        };
        let token = self.resolve_token().await?;
        self.update_variant(&token, product_id, variant_id, item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnrichedContent, ListingType, NewInventoryItem};
    use crate::retry::Retryable;
    use pretty_assertions::assert_eq;

    fn item() -> InventoryItem {
        let mut content = EnrichedContent {
            title: Some("Sony A7 III Mirrorless Body".to_string()),
            description_html: Some("<p>Full frame</p>".to_string()),
            tags: vec!["mirrorless".to_string()],
            compare_at_price: Some(1499.0),
            ..EnrichedContent::default()
        };
        content
            .specs
            .insert("mount".to_string(), json!("Sony E"));
        NewInventoryItem {
            sku: "SONY-A7III".to_string(),
            brand: "Sony".to_string(),
            model: "A7 III".to_string(),
            listing_type: ListingType::TradeIn,
            condition: None,
            serial_number: None,
            price: 1299.5,
            content,
        }
        .into_item()
    }

    fn config(access_token: Option<&str>) -> CommerceConfig {
        CommerceConfig {
            shop_domain: "camera-shop.myshopify.com".to_string(),
            access_token: access_token.map(ToString::to_string),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn create_is_always_a_draft() {
        for publish_live in [false, true] {
            let body = product_create_request(&item(), PublishOptions { publish_live });
            assert_eq!(body["variables"]["input"]["status"], "DRAFT");
        }
    }

    #[test]
    fn create_carries_descriptive_fields() {
        let body = product_create_request(&item(), PublishOptions::default());
        let input = &body["variables"]["input"];
        assert_eq!(input["title"], "Sony A7 III Mirrorless Body");
        assert_eq!(input["vendor"], "Sony");
        assert_eq!(input["descriptionHtml"], "<p>Full frame</p>");
        assert_eq!(input["tags"], json!(["mirrorless"]));
        assert_eq!(input["metafields"][0]["key"], "mount");
        assert_eq!(input["metafields"][0]["value"], "Sony E");
        assert!(body["query"].as_str().unwrap().contains("productCreate"));
    }

    #[test]
    fn update_targets_product_and_omits_status() {
        let body = product_update_request("gid://shopify/Product/1", &item());
        let input = &body["variables"]["input"];
        assert_eq!(input["id"], "gid://shopify/Product/1");
        assert!(input.get("status").is_none());
    }

    #[test]
    fn variant_update_formats_prices() {
        let body = variants_update_request(
            "gid://shopify/Product/1",
            "gid://shopify/ProductVariant/2",
            &item(),
        );
        let variant = &body["variables"]["variants"][0];
        assert_eq!(variant["price"], "1299.50");
        assert_eq!(variant["compareAtPrice"], "1499.00");
        assert_eq!(variant["inventoryItem"]["sku"], "SONY-A7III");
    }

    #[test]
    fn user_errors_are_joined_with_fields() {
        let errors = vec![
            UserError {
                field: Some(vec!["input".to_string(), "title".to_string()]),
                message: "can't be blank".to_string(),
            },
            UserError {
                field: None,
                message: "Handle taken".to_string(),
            },
        ];
        let error = user_errors(&errors).unwrap();
        assert_eq!(error.to_string(), "input.title: can't be blank; Handle taken");
        assert!(user_errors(&[]).is_none());
    }

    #[test]
    fn throttled_graphql_errors_are_retryable() {
        let response: GraphQlResponse<ProductUpdateData> = serde_json::from_value(json!({
            "errors": [{ "message": "Throttled", "extensions": { "code": "THROTTLED" } }]
        }))
        .unwrap();
        let error = into_data(response).unwrap_err();
        assert!(matches!(&error, PlatformError::Throttled(message) if message == "Throttled"));
        assert!(error.is_retryable());
    }

    #[test]
    fn other_graphql_errors_are_user_errors() {
        let response: GraphQlResponse<ProductUpdateData> = serde_json::from_value(json!({
            "errors": [
                { "message": "Field 'bogus' doesn't exist", "extensions": { "code": "undefinedField" } },
                { "message": "Access denied" }
            ]
        }))
        .unwrap();
        let error = into_data(response).unwrap_err();
        assert!(matches!(
            &error,
            PlatformError::UserErrors(message)
                if message == "Field 'bogus' doesn't exist; Access denied"
        ));
        assert!(!error.is_retryable());
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", config(Some("shpat_secret")));
        assert!(!debug.contains("shpat_secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn token_prefers_static_then_store() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());

        let client = CommerceClient::new(config(Some(" static ")), Arc::clone(&db)).unwrap();
        assert_eq!(client.resolve_token().await.unwrap(), "static");

        let client = CommerceClient::new(config(None), Arc::clone(&db)).unwrap();
        let err = client.resolve_token().await.unwrap_err();
        assert!(matches!(err, PlatformError::Config(_)));

        LibSqlTokenRepository::new(db.connection())
            .upsert(COMMERCE_PROVIDER, "camera-shop.myshopify.com", "stored", None)
            .await
            .unwrap();
        assert_eq!(client.resolve_token().await.unwrap(), "stored");
    }
}
