use serde::{Deserialize, Serialize};
use triage_types::{CallStatus, TextError};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

impl ErrorRes {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Body of `PATCH /calls/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdateReq {
    /// One of `Needs review`, `Escalated`, `Resolved`.
    pub status: String,
}

impl StatusUpdateReq {
    /// Parses the requested status. Only the reviewable states are accepted; a call cannot be
    /// put back to `Live` from the outside.
    pub fn parse(&self) -> Result<CallStatus, TextError> {
        let status: CallStatus = self.status.trim().parse()?;
        if status.is_terminal() {
            Ok(status)
        } else {
            Err(TextError::UnknownLabel {
                kind: "CallStatus",
                value: self.status.clone(),
            })
        }
    }
}
