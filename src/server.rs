//! Local catalog HTTP service.
//!
//! Serves the narrow entity API that [`HttpCatalog`](crate::catalog_client::HttpCatalog)
//! consumes, backed by any [`Catalog`] (the SQLite catalog for `sti serve catalog`).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/entities/{urn}` | Entity record; URN percent-encoded as one segment |
//! | `POST` | `/entities?action=ingest` | Upsert `{ "entity": {urn, aspects}, "systemMetadata"? }` |
//! | `POST` | `/entities?action=softDelete` | Mark `{ "urn", "systemMetadata"? }` removed |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "entity not found: urn:li:..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `rejected` (passthrough
//! status), `unavailable` (503), `internal` (500).

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};

use stateful_ingest_core::catalog::{Catalog, EntityRecord, SystemMetadata};
use stateful_ingest_core::error::CatalogError;
use stateful_ingest_core::urn::Urn;

use crate::config::Config;
use crate::db;
use crate::local_catalog::SqliteCatalog;
use crate::migrate;

#[derive(Clone)]
struct AppState {
    catalog: Arc<dyn Catalog>,
}

/// Starts the catalog server on `[server].bind` over the local SQLite catalog.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(pool));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("Catalog server listening on http://{}", config.server.bind);
    info!(bind = %config.server.bind, "Catalog server started");

    axum::serve(listener, router(catalog)).await?;
    Ok(())
}

/// Routes of the catalog API over `catalog`.
pub fn router(catalog: Arc<dyn Catalog>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/entities", axum::routing::post(handle_entities_action))
        .route("/entities/{urn}", get(handle_get_entity))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { catalog })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<CatalogError> for AppError {
    fn from(e: CatalogError) -> Self {
        let message = e.to_string();
        let (status, code) = match &e {
            CatalogError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CatalogError::Rejected { status, .. } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
                "rejected",
            ),
            CatalogError::Unreachable(_) | CatalogError::Timeout(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            CatalogError::InvalidResponse(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.catalog.health_check().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

// ============ GET /entities/{urn} ============

async fn handle_get_entity(
    State(state): State<AppState>,
    Path(urn): Path<String>,
) -> Result<Json<EntityRecord>, AppError> {
    let urn = Urn::new(urn).map_err(|e| bad_request(e.to_string()))?;
    match state.catalog.get(&urn).await? {
        Some(record) => Ok(Json(record)),
        None => Err(not_found(format!("entity not found: {}", urn))),
    }
}

// ============ POST /entities?action=... ============

#[derive(Deserialize)]
struct ActionQuery {
    action: Option<String>,
}

#[derive(Deserialize)]
struct SoftDeleteRequest {
    urn: Urn,
    #[serde(rename = "systemMetadata", default)]
    system_metadata: Option<SystemMetadata>,
}

async fn handle_entities_action(
    State(state): State<AppState>,
    Query(query): Query<ActionQuery>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let action = query
        .action
        .ok_or_else(|| bad_request("missing 'action' query parameter"))?;

    match action.as_str() {
        "ingest" => {
            let record: EntityRecord = serde_json::from_slice(&body)
                .map_err(|e| bad_request(format!("invalid ingest body: {}", e)))?;
            debug!(urn = %record.entity.urn, "Ingest");
            state
                .catalog
                .ingest(&record.entity, record.system_metadata.as_ref())
                .await?;
            Ok(Json(serde_json::json!({ "urn": record.entity.urn })))
        }
        "softDelete" => {
            let req: SoftDeleteRequest = serde_json::from_slice(&body)
                .map_err(|e| bad_request(format!("invalid softDelete body: {}", e)))?;
            debug!(urn = %req.urn, "Soft delete");
            state
                .catalog
                .soft_delete(&req.urn, req.system_metadata.as_ref())
                .await?;
            Ok(Json(serde_json::json!({ "urn": req.urn, "removed": true })))
        }
        other => Err(bad_request(format!(
            "unknown action: '{}'. Must be ingest or softDelete.",
            other
        ))),
    }
}
