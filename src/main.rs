use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::AppState;
use triage_core::config::{
    duration_from_env_value, escalation_rules_from_env_values, usize_from_env_value,
};
use triage_core::constants::{
    DEFAULT_AGENT_ID, DEFAULT_COMPLETED_RETENTION, DEFAULT_ENRICHMENT_TIMEOUT,
    DEFAULT_REPORT_GRACE,
};
use triage_core::{
    CallStore, DisabledSummarizer, EngineConfig, HttpSummarizer, LiveCallRegistry, LlmBackend,
    MemoryStore, SqliteStore, Summarizer,
};

const DEFAULT_VERTEX_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "llama3";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn engine_config_from_env() -> anyhow::Result<EngineConfig> {
    let escalation = escalation_rules_from_env_values(
        env_opt("TRIAGE_ESCALATION_REASON_PATTERN"),
        env_opt("TRIAGE_ESCALATION_TRANSCRIPT_PATTERN"),
    )?;
    let timeout = duration_from_env_value(
        "TRIAGE_ENRICHMENT_TIMEOUT_SECS",
        env_opt("TRIAGE_ENRICHMENT_TIMEOUT_SECS"),
        DEFAULT_ENRICHMENT_TIMEOUT,
    )?;
    let interval = usize_from_env_value(
        "TRIAGE_LIVE_SUMMARY_INTERVAL",
        env_opt("TRIAGE_LIVE_SUMMARY_INTERVAL"),
        0,
    )?;
    let report_grace = duration_from_env_value(
        "TRIAGE_REPORT_GRACE_SECS",
        env_opt("TRIAGE_REPORT_GRACE_SECS"),
        DEFAULT_REPORT_GRACE,
    )?;
    let retention = usize_from_env_value(
        "TRIAGE_COMPLETED_RETENTION",
        env_opt("TRIAGE_COMPLETED_RETENTION"),
        DEFAULT_COMPLETED_RETENTION,
    )?;
    let agent_id = env_opt("TRIAGE_AGENT_ID").unwrap_or_else(|| DEFAULT_AGENT_ID.into());

    Ok(EngineConfig::new(escalation, timeout, &agent_id)?
        .with_live_summary_interval(interval)
        .with_report_grace(report_grace)
        .with_completed_retention(retention)?
        .with_assistant_id(env_opt("TRIAGE_ASSISTANT_ID")))
}

fn store_from_env() -> anyhow::Result<Arc<dyn CallStore>> {
    match env_opt("TRIAGE_DATABASE_PATH").map(PathBuf::from) {
        Some(path) => {
            tracing::info!("++ Using SQLite store at {}", path.display());
            Ok(Arc::new(SqliteStore::open(&path)?))
        }
        None => {
            tracing::warn!("TRIAGE_DATABASE_PATH not set, records are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn summarizer_from_env(config: &EngineConfig) -> anyhow::Result<Arc<dyn Summarizer>> {
    let provider = env_opt("AI_PROVIDER").unwrap_or_else(|| {
        if env_opt("VERTEX_API_KEY").is_some() {
            "vertex".into()
        } else {
            "none".into()
        }
    });

    let backend = match provider.to_ascii_lowercase().as_str() {
        "vertex" => {
            let Some(api_key) = env_opt("VERTEX_API_KEY") else {
                anyhow::bail!("AI_PROVIDER=vertex requires VERTEX_API_KEY");
            };
            LlmBackend::Vertex {
                api_key,
                model: env_opt("VERTEX_MODEL").unwrap_or_else(|| DEFAULT_VERTEX_MODEL.into()),
            }
        }
        "ollama" => LlmBackend::Ollama {
            base_url: env_opt("OLLAMA_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.into()),
            model: env_opt("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.into()),
        },
        "none" => {
            tracing::warn!("No AI provider configured, calls keep their preliminary records");
            return Ok(Arc::new(DisabledSummarizer));
        }
        other => anyhow::bail!("unknown AI_PROVIDER {other:?} (expected vertex, ollama or none)"),
    };

    tracing::info!("++ Using {} summarizer", backend.name());
    Ok(Arc::new(HttpSummarizer::new(
        backend,
        config.enrichment_timeout(),
    )?))
}

/// Main entry point for the triage service.
///
/// Reads configuration from the environment (and `.env`) once, then serves the REST API.
///
/// # Environment Variables
/// - `TRIAGE_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `TRIAGE_DATABASE_PATH`: SQLite database file (default: in-memory store)
/// - `AI_PROVIDER`: `vertex`, `ollama` or `none`
/// - `VERTEX_API_KEY`, `VERTEX_MODEL`, `OLLAMA_BASE_URL`, `OLLAMA_MODEL`
/// - `TRIAGE_ENRICHMENT_TIMEOUT_SECS`, `TRIAGE_LIVE_SUMMARY_INTERVAL`
/// - `TRIAGE_REPORT_GRACE_SECS`: wait for an end-of-call report after a status update (default: 30)
/// - `TRIAGE_COMPLETED_RETENTION`: completed calls kept in memory (default: 200)
/// - `TRIAGE_ESCALATION_REASON_PATTERN`, `TRIAGE_ESCALATION_TRANSCRIPT_PATTERN`
/// - `TRIAGE_ASSISTANT_ID`, `TRIAGE_AGENT_ID`
///
/// # Errors
/// Returns an error if configuration is invalid, the store cannot be opened, the address
/// cannot be bound, or the server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("triage_run=info".parse()?)
                .add_directive("triage_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = env_opt("TRIAGE_REST_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into());

    let config = engine_config_from_env()?;
    let store = store_from_env()?;
    let summarizer = summarizer_from_env(&config)?;
    let registry = LiveCallRegistry::new(store, summarizer, config);

    let app = api_rest::app(AppState::new(registry));

    tracing::info!("++ Starting triage REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
