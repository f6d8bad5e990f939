//! # API REST
//!
//! HTTP surface of the triage service.
//!
//! Handles:
//! - the call-provider webhook
//! - the server-sent event stream for dashboards
//! - call and patient reads, status updates and manual re-analysis
//! - OpenAPI/Swagger documentation
//!
//! Uses `api-shared` for common types and `triage-core` for everything else.

#![warn(rust_2018_idioms)]

pub mod error;
pub mod handlers;
pub mod stream;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use triage_core::{LiveCallRegistry, WebhookRouter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use error::ApiError;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    registry: LiveCallRegistry,
    webhooks: WebhookRouter,
}

impl AppState {
    pub fn new(registry: LiveCallRegistry) -> Self {
        Self {
            webhooks: WebhookRouter::new(registry.clone()),
            registry,
        }
    }

    pub fn registry(&self) -> &LiveCallRegistry {
        &self.registry
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::webhook,
        stream::stream_calls,
        handlers::live_calls,
        handlers::call_history,
        handlers::get_call,
        handlers::update_call_status,
        handlers::analyze_call,
        handlers::list_patients,
        handlers::get_patient,
    ),
    components(schemas(
        api_shared::HealthRes,
        api_shared::ErrorRes,
        api_shared::StatusUpdateReq,
        triage_core::LiveCall,
        triage_core::LiveCallStatus,
        triage_core::AiSummary,
        triage_core::TranscriptLine,
        triage_core::store::StoredCall,
        triage_core::store::PatientRecord,
        triage_core::store::PatientDetails,
        triage_core::store::Encounter,
        triage_core::store::TimelineEvent,
        triage_core::clinical::Condition,
        triage_core::clinical::Medication,
        triage_core::clinical::EncounterSymptom,
        triage_types::Speaker,
        triage_types::TriageLevel,
        triage_types::CallStatus,
        triage_types::PatientStatus,
        triage_types::Sex,
        triage_types::ConditionStatus,
        triage_types::Severity,
    ))
)]
pub struct ApiDoc;

/// Builds the full router, including Swagger UI at `/swagger-ui`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhook", post(handlers::webhook))
        .route("/calls/stream", get(stream::stream_calls))
        .route("/calls/live", get(handlers::live_calls))
        .route("/calls/history", get(handlers::call_history))
        .route(
            "/calls/:id",
            get(handlers::get_call).patch(handlers::update_call_status),
        )
        .route("/calls/:id/analyze", post(handlers::analyze_call))
        .route("/patients", get(handlers::list_patients))
        .route("/patients/:id", get(handlers::get_patient))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
