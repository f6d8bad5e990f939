use crate::error::ApiError;
use crate::AppState;
use api_shared::{ErrorRes, HealthRes, HealthService, StatusUpdateReq};
use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;
use triage_core::constants::DEFAULT_HISTORY_LIMIT;
use triage_core::store::{PatientDetails, PatientRecord, StoredCall};
use triage_core::{IngressResponse, LiveCall, WebhookEnvelope};
use utoipa::IntoParams;

const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Maximum number of calls to return (default 100).
    pub limit: Option<usize>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
#[axum::debug_handler]
pub async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    post,
    path = "/webhook",
    responses(
        (status = 200, description = "`{\"ok\":true}`, or assistant overrides for an assistant-request"),
        (status = 400, description = "Body is not valid JSON")
    )
)]
/// Call-provider webhook.
///
/// Always acknowledges a parseable body, including one whose fields have unexpected types.
/// End-of-call processing continues after the response has been sent.
#[axum::debug_handler]
pub async fn webhook(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Json<IngressResponse> {
    let envelope = WebhookEnvelope::from_value(body);
    Json(state.webhooks.handle(envelope).await)
}

#[utoipa::path(
    get,
    path = "/calls/live",
    responses(
        (status = 200, description = "Calls in progress, oldest first", body = [LiveCall])
    )
)]
#[axum::debug_handler]
pub async fn live_calls(State(state): State<AppState>) -> Json<Vec<LiveCall>> {
    Json(state.registry.get_live())
}

#[utoipa::path(
    get,
    path = "/calls/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Finished calls, newest first", body = [StoredCall]),
        (status = 500, description = "Internal server error", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn call_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<StoredCall>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.registry.store().list_calls(limit).await?))
}

#[utoipa::path(
    get,
    path = "/calls/{id}",
    params(("id" = String, Path, description = "Provider call id")),
    responses(
        (status = 200, description = "Persisted call", body = StoredCall),
        (status = 404, description = "Unknown call", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredCall>, ApiError> {
    state
        .registry
        .store()
        .get_call(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("call {id} not found")))
}

#[utoipa::path(
    patch,
    path = "/calls/{id}",
    params(("id" = String, Path, description = "Provider call id")),
    request_body = StatusUpdateReq,
    responses(
        (status = 200, description = "Updated call", body = StoredCall),
        (status = 400, description = "Status is not Needs review, Escalated or Resolved", body = ErrorRes),
        (status = 404, description = "Unknown call", body = ErrorRes)
    )
)]
/// Sets the review status of a finished call.
#[axum::debug_handler]
pub async fn update_call_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StatusUpdateReq>,
) -> Result<Json<StoredCall>, ApiError> {
    let status = req.parse().map_err(|_| {
        ApiError::BadRequest("status must be one of: Needs review, Escalated, Resolved".into())
    })?;
    let store = state.registry.store();
    if !store.update_call_status(&id, status).await? {
        return Err(ApiError::NotFound(format!("call {id} not found")));
    }
    tracing::info!(call_id = %id, %status, "call status updated");
    store
        .get_call(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("call {id} not found")))
}

#[utoipa::path(
    post,
    path = "/calls/{id}/analyze",
    params(("id" = String, Path, description = "Provider call id")),
    responses(
        (status = 200, description = "Re-analyzed call", body = StoredCall),
        (status = 404, description = "Unknown call", body = ErrorRes),
        (status = 422, description = "Transcript too short to analyze", body = ErrorRes),
        (status = 503, description = "Analysis failed, try again", body = ErrorRes)
    )
)]
/// Runs enrichment again on the persisted transcript.
#[axum::debug_handler]
pub async fn analyze_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredCall>, ApiError> {
    Ok(Json(state.registry.reanalyze(&id).await?))
}

#[utoipa::path(
    get,
    path = "/patients",
    responses(
        (status = 200, description = "Patients, most recent contact first", body = [PatientRecord]),
        (status = 500, description = "Internal server error", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn list_patients(
    State(state): State<AppState>,
) -> Result<Json<Vec<PatientRecord>>, ApiError> {
    Ok(Json(state.registry.store().list_patients().await?))
}

#[utoipa::path(
    get,
    path = "/patients/{id}",
    params(("id" = String, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Patient with recent encounters and timeline", body = PatientDetails),
        (status = 404, description = "Unknown patient", body = ErrorRes)
    )
)]
#[axum::debug_handler]
pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PatientDetails>, ApiError> {
    state
        .registry
        .store()
        .get_patient_details(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("patient {id} not found")))
}
