use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shelfsync_core::db::{
    CatalogRepository, Database, InventoryRepository, LibSqlCatalogRepository,
    LibSqlInventoryRepository,
};
use shelfsync_core::enrichment::{ContentGenerator, EnrichmentService, TemplateGenerator};
use shelfsync_core::idempotency::{Guarded, IdempotencyGuard, StoredResponse};
use shelfsync_core::matching::{AutoMatchReport, MatchSuggestion, ProductMatcher, DEFAULT_LIMIT};
use shelfsync_core::models::{
    CatalogEntry, CatalogEntryId, InventoryId, InventoryItem, NewCatalogEntry, NewInventoryItem,
    Platform, Snapshot, SnapshotId, SnapshotKind, SyncResult,
};
use shelfsync_core::platforms::{
    CommerceClient, CrmClient, PlatformPublisher, PublishOptions, WorkspaceClient,
};
use shelfsync_core::publish::PublishOrchestrator;
use shelfsync_core::snapshot::{Rollback, SnapshotManager};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{EndpointGroup, EndpointRateLimiter, RateLimitMetricsSnapshot};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";
const CLIENT_ID_HEADER: &str = "x-client-id";
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;
const MAX_MATCH_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    db: Arc<Database>,
    guard: IdempotencyGuard,
    orchestrator: PublishOrchestrator,
    matcher: ProductMatcher,
    snapshots: SnapshotManager,
    enrichment: EnrichmentService,
    generator: Arc<dyn ContentGenerator>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    /// Open the store and build one publisher per configured platform
    pub async fn from_config(config: Arc<AppConfig>) -> shelfsync_core::Result<Self> {
        let db = Arc::new(Database::open(&config.database_path).await?);

        let mut publishers: Vec<Arc<dyn PlatformPublisher>> = vec![Arc::new(CommerceClient::new(
            config.commerce.clone(),
            Arc::clone(&db),
        )?)];
        if let Some(crm) = config.crm.clone() {
            publishers.push(Arc::new(CrmClient::new(crm)?));
        }
        if let Some(workspace) = config.workspace.clone() {
            publishers.push(Arc::new(WorkspaceClient::new(workspace)?));
        }

        Ok(Self::new(config, db, publishers, Arc::new(TemplateGenerator)))
    }

    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<Database>,
        publishers: Vec<Arc<dyn PlatformPublisher>>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        let orchestrator = PublishOrchestrator::new(
            Arc::clone(&db),
            publishers,
            config.retry_policy(),
            config.platform_timeout,
        );
        Self {
            guard: IdempotencyGuard::new(Arc::clone(&db), config.idempotency_lock),
            matcher: ProductMatcher::new(Arc::clone(&db)),
            snapshots: SnapshotManager::new(Arc::clone(&db)),
            enrichment: EnrichmentService::new(Arc::clone(&db)),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            orchestrator,
            generator,
            db,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/inventory", post(create_inventory))
        .route("/inventory/{id}", get(get_inventory))
        .route("/inventory/{id}/publish", post(publish_inventory))
        .route("/inventory/{id}/enrich", post(enrich_inventory))
        .route(
            "/inventory/{id}/snapshots",
            get(list_snapshots).post(create_snapshot),
        )
        .route(
            "/inventory/{id}/snapshots/{snapshot_id}/rollback",
            post(rollback_snapshot),
        )
        .route("/catalog", post(import_catalog_entry))
        .route("/catalog/auto-match", post(auto_match))
        .route("/catalog/{id}/matches", get(find_matches))
        .route("/catalog/{id}/link", put(link_catalog_entry).delete(unlink_catalog_entry));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", v1_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    platforms: Vec<Platform>,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        platforms: state.orchestrator.platforms(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

// Inventory

async fn create_inventory(
    State(state): State<AppState>,
    Json(request): Json<NewInventoryItem>,
) -> Result<(StatusCode, Json<InventoryItem>), AppError> {
    request.validate()?;
    let item = request.into_item();
    LibSqlInventoryRepository::new(state.db.connection())
        .insert(&item)
        .await?;
    tracing::info!(item = %item.id, sku = %item.sku, "Created inventory item");
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_inventory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InventoryItem>, AppError> {
    let id: InventoryId = parse_id(&id, "inventory id")?;
    let item = load_item(&state.db, &id).await?;
    Ok(Json(item))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct PublishRequest {
    /// Ignored for first-time commerce creates, which are always drafts
    publish_live: bool,
}

async fn publish_inventory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: PublishRequest = parse_body(&body)?;
    let item_id: InventoryId = parse_id(&id, "inventory id")?;
    state
        .endpoint_rate_limiter
        .check(EndpointGroup::Publish, &client_id(&headers))
        .await?;

    let payload = json!({ "inventory_id": item_id, "request": request });
    let orchestrator = &state.orchestrator;
    let options = PublishOptions {
        publish_live: request.publish_live,
    };
    let guarded = state
        .guard
        .run(
            "inventory.publish",
            idempotency_key(&headers)?.as_deref(),
            &payload,
            move || async move {
                let result = orchestrator
                    .publish(&item_id, options)
                    .await
                    .map_err(AppError::from);
                stored(result, StatusCode::OK)
            },
        )
        .await?;
    Ok(guarded_response(guarded))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct EnrichRequest {
    publish_live: bool,
    /// Store the generated content without publishing it
    skip_publish: bool,
}

#[derive(Debug, Serialize)]
struct EnrichResponse {
    item: InventoryItem,
    sync: Option<SyncResult>,
}

async fn enrich_inventory(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: EnrichRequest = parse_body(&body)?;
    let item_id: InventoryId = parse_id(&id, "inventory id")?;
    state
        .endpoint_rate_limiter
        .check(EndpointGroup::Publish, &client_id(&headers))
        .await?;

    let payload = json!({ "inventory_id": item_id, "request": request });
    let state_ref = &state;
    let guarded = state
        .guard
        .run(
            "inventory.enrich",
            idempotency_key(&headers)?.as_deref(),
            &payload,
            move || async move {
                let result = enrich_and_publish(state_ref, &item_id, &request).await;
                stored(result, StatusCode::OK)
            },
        )
        .await?;
    Ok(guarded_response(guarded))
}

async fn enrich_and_publish(
    state: &AppState,
    item_id: &InventoryId,
    request: &EnrichRequest,
) -> Result<EnrichResponse, AppError> {
    let item = state
        .enrichment
        .enrich(item_id, state.generator.as_ref())
        .await?;
    if request.skip_publish {
        return Ok(EnrichResponse { item, sync: None });
    }

    let options = PublishOptions {
        publish_live: request.publish_live,
    };
    let sync = state.orchestrator.publish_item(&item, options).await;
    // Pick up external ids written back by a first publish
    let item = load_item(&state.db, item_id).await?;
    Ok(EnrichResponse {
        item,
        sync: Some(sync),
    })
}

// Snapshots

async fn list_snapshots(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Snapshot>>, AppError> {
    let owner_id: InventoryId = parse_id(&id, "inventory id")?;
    load_item(&state.db, &owner_id).await?;
    Ok(Json(state.snapshots.list_snapshots(&owner_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CreateSnapshotRequest {
    kind: SnapshotKind,
    note: Option<String>,
}

impl Default for CreateSnapshotRequest {
    fn default() -> Self {
        Self {
            kind: SnapshotKind::Manual,
            note: None,
        }
    }
}

async fn create_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Snapshot>), AppError> {
    let request: CreateSnapshotRequest = parse_body(&body)?;
    let owner_id: InventoryId = parse_id(&id, "inventory id")?;
    let snapshot = state
        .snapshots
        .create_snapshot(&owner_id, request.kind, request.note)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RollbackRequest {
    /// Push the restored content to the commerce platform afterwards
    repush: bool,
}

async fn rollback_snapshot(
    State(state): State<AppState>,
    Path((id, snapshot_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: RollbackRequest = parse_body(&body)?;
    let owner_id: InventoryId = parse_id(&id, "inventory id")?;
    let snapshot_id: SnapshotId = parse_id(&snapshot_id, "snapshot id")?;
    state
        .endpoint_rate_limiter
        .check(EndpointGroup::Publish, &client_id(&headers))
        .await?;

    let payload = json!({
        "inventory_id": owner_id,
        "snapshot_id": snapshot_id,
        "request": request,
    });
    let state_ref = &state;
    let guarded = state
        .guard
        .run(
            "inventory.rollback",
            idempotency_key(&headers)?.as_deref(),
            &payload,
            move || async move {
                let publisher = if request.repush {
                    state_ref.orchestrator.publisher(Platform::Commerce)
                } else {
                    None
                };
                let result: Result<Rollback, AppError> = state_ref
                    .snapshots
                    .rollback_and_repush(&owner_id, &snapshot_id, publisher.as_deref())
                    .await
                    .map_err(AppError::from);
                stored(result, StatusCode::OK)
            },
        )
        .await?;
    Ok(guarded_response(guarded))
}

// Catalog

async fn import_catalog_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NewCatalogEntry>,
) -> Result<(StatusCode, Json<CatalogEntry>), AppError> {
    state
        .endpoint_rate_limiter
        .check(EndpointGroup::Catalog, &client_id(&headers))
        .await?;
    request.validate()?;
    let entry = request.into_entry();
    LibSqlCatalogRepository::new(state.db.connection())
        .insert(&entry)
        .await?;
    tracing::info!(catalog = %entry.id, "Imported catalog entry");
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
struct MatchesQuery {
    limit: Option<usize>,
}

async fn find_matches(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MatchesQuery>,
) -> Result<Json<Vec<MatchSuggestion>>, AppError> {
    let catalog_id: CatalogEntryId = parse_id(&id, "catalog entry id")?;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_MATCH_LIMIT);
    Ok(Json(state.matcher.find_matches(&catalog_id, limit).await?))
}

#[derive(Debug, Deserialize)]
struct LinkRequest {
    inventory_id: String,
}

async fn link_catalog_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<LinkRequest>,
) -> Result<StatusCode, AppError> {
    let catalog_id: CatalogEntryId = parse_id(&id, "catalog entry id")?;
    let inventory_id: InventoryId = parse_id(&request.inventory_id, "inventory id")?;
    state
        .endpoint_rate_limiter
        .check(EndpointGroup::Catalog, &client_id(&headers))
        .await?;
    state.matcher.link_product(&catalog_id, &inventory_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlink_catalog_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let catalog_id: CatalogEntryId = parse_id(&id, "catalog entry id")?;
    state
        .endpoint_rate_limiter
        .check(EndpointGroup::Catalog, &client_id(&headers))
        .await?;
    state.matcher.unlink_product(&catalog_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn auto_match(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AutoMatchReport>, AppError> {
    state
        .endpoint_rate_limiter
        .check(EndpointGroup::Catalog, &client_id(&headers))
        .await?;
    let report = state.matcher.auto_match_all().await?;
    Ok(Json(report))
}

// Helpers

async fn load_item(db: &Database, id: &InventoryId) -> Result<InventoryItem, AppError> {
    LibSqlInventoryRepository::new(db.connection())
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("inventory item {id}")))
}

fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("{what} `{raw}` is not a valid id")))
}

/// Empty bodies mean "all defaults"
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|error| AppError::bad_request(format!("malformed JSON body: {error}")))
}

fn client_id(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| AppError::bad_request("Idempotency-Key must be visible ASCII"))?
        .trim();
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::bad_request(format!(
            "Idempotency-Key must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok((!key.is_empty()).then(|| key.to_string()))
}

fn stored<T: Serialize>(result: Result<T, AppError>, status: StatusCode) -> StoredResponse {
    let body = result.and_then(|value| {
        serde_json::to_value(value).map_err(|error| AppError::internal(error.to_string()))
    });
    match body {
        Ok(body) => StoredResponse::new(status.as_u16(), body),
        Err(error) => error.into_stored(),
    }
}

fn guarded_response(guarded: Guarded) -> Response {
    let replayed = guarded.is_replay();
    let StoredResponse { status_code, body } = guarded.into_response();
    let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json::<Value>(body)).into_response();
    if replayed {
        response
            .headers_mut()
            .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    response
}
