use api_shared::ErrorRes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use triage_core::TriageError;

/// Errors a handler can return, mapped onto HTTP statuses with an `ErrorRes` body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Core(#[from] TriageError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Core(e) => match e {
                TriageError::CallNotFound(_) | TriageError::PatientNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                TriageError::TranscriptTooShort { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                TriageError::AnalysisFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
                TriageError::InvalidInput(_) | TriageError::Text(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Core(TriageError::TranscriptTooShort { .. }) => {
                "Transcript too short to analyze".to_string()
            }
            ApiError::Core(TriageError::AnalysisFailed(_)) => {
                "AI analysis failed, please try again".to_string()
            }
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %self, "request failed");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorRes::new(message))).into_response()
    }
}
