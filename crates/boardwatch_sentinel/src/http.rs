//! Minimal operator surface.
//!
//! `POST /api/poll-now` enqueues a manual run for the calling tenant.
//! `POST /internal/run-sync-now?tenantId=` forces a run inline and returns
//! the terminal run document. `GET /api/runs?tenantId=` is the ledger view
//! the dashboard reads. Authentication is the identity provider's job;
//! here the tenant arrives as a header the gateway has already verified.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use boardwatch_db::{DispatchQueue, JobStore, RunLedger, RunRecord};
use boardwatch_protocol::{RunDescriptor, RunId, RunType, TenantId};
use boardwatch_worker::TenantWorker;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub ledger: RunLedger,
    pub queue: DispatchQueue,
    pub worker: Arc<TenantWorker>,
    pub dispatch_max_attempts: i64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/poll-now", post(poll_now))
        .route("/api/runs", get(recent_runs))
        .route("/internal/run-sync-now", post(run_sync_now))
        .with_state(state)
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, message.into())
    }

    fn internal(message: impl Into<String>) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }
}

async fn healthz() -> &'static str {
    "OK"
}

fn tenant_from_headers(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    let raw = headers
        .get("x-tenant-id")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing x-tenant-id header"))?;
    TenantId::parse(raw).map_err(|e| ApiError::bad_request(e.to_string()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueuedResponse {
    run_id: String,
    status: &'static str,
}

async fn poll_now(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EnqueuedResponse>, ApiError> {
    let tenant = tenant_from_headers(&headers)?;
    state
        .store
        .ensure_tenant(&tenant)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let descriptor = crate::sentinel::enqueue_run(
        &state.ledger,
        &state.queue,
        &tenant,
        RunType::Manual,
        state.dispatch_max_attempts,
    )
    .await
    .map_err(|e| {
        warn!(tenant = %tenant, "poll-now enqueue failed: {e}");
        ApiError::internal(e.to_string())
    })?;

    Ok(Json(EnqueuedResponse {
        run_id: descriptor.run_id.to_string(),
        status: "enqueued",
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TenantQuery {
    tenant_id: String,
    limit: Option<i64>,
}

async fn recent_runs(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<Vec<RunRecord>>, ApiError> {
    let tenant =
        TenantId::parse(&query.tenant_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let runs = state
        .ledger
        .recent_runs(&tenant, query.limit.unwrap_or(20).clamp(1, 100))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(runs))
}

async fn run_sync_now(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
) -> Result<Json<RunRecord>, ApiError> {
    let tenant =
        TenantId::parse(&query.tenant_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    state
        .store
        .ensure_tenant(&tenant)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let descriptor = RunDescriptor {
        tenant_id: tenant.clone(),
        run_id: RunId::new(),
        run_type: RunType::Manual,
    };
    state
        .worker
        .execute(&descriptor)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}")))?;

    let run = state
        .ledger
        .get_run(&tenant, descriptor.run_id.as_str())
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::internal("run finished but its record is missing"))?;
    Ok(Json(run))
}
