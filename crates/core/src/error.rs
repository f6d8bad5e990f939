#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration value for {key}: {message}")]
    InvalidConfig { key: &'static str, message: String },
    #[error("invalid escalation pattern: {0}")]
    EscalationPattern(#[from] regex::Error),
    #[error("invalid text: {0}")]
    Text(#[from] triage_types::TextError),

    #[error("call {0} is already in progress")]
    CallAlreadyExists(String),
    #[error("call {0} not found")]
    CallNotFound(String),
    #[error("patient {0} not found")]
    PatientNotFound(String),
    #[error("transcript too short to analyze ({lines} lines)")]
    TranscriptTooShort { lines: usize },
    #[error("analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("summarizer is disabled")]
    SummarizerDisabled,
    #[error("summarizer request failed: {0}")]
    SummarizerHttp(#[from] reqwest::Error),
    #[error("summarizer returned HTTP {status}: {body}")]
    SummarizerStatus { status: u16, body: String },
    #[error("summarizer response has an unexpected shape: {0}")]
    SummarizerResponse(String),
    #[error("summarizer timed out after {0}s")]
    SummarizerTimeout(u64),

    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },
    #[error("failed to encode/decode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),
}

pub type TriageResult<T> = std::result::Result<T, TriageError>;
