//! # Triage Core
//!
//! The live-call coordination engine behind the triage dashboard:
//! - an in-memory registry of calls in progress, driven by provider webhooks
//! - a broadcast channel that keeps dashboard viewers in step with every mutation
//! - an end-of-call pipeline that saves a preliminary record, enriches it through a
//!   summarizer and writes the full record, patient profile, encounter and timeline entry
//!
//! **No API concerns**: HTTP servers and handlers belong in `api-rest`; shared DTOs in
//! `api-shared`.

pub mod broadcast;
pub mod call;
pub mod clinical;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod ingress;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod summarizer;
pub mod transcript;
mod wire;

#[cfg(test)]
mod test_support;

pub use broadcast::{Broadcaster, SubscriberId, Subscription};
pub use call::{AiSummary, CompletedCall, LiveCall, LiveCallStatus};
pub use config::{EngineConfig, EscalationRules};
pub use error::{TriageError, TriageResult};
pub use events::LiveCallEvent;
pub use ingress::{IngressResponse, WebhookEnvelope, WebhookRouter};
pub use pipeline::FinalizationPipeline;
pub use registry::{LiveCallRegistry, ReportDetails};
pub use store::{CallStore, MemoryStore, SqliteStore};
pub use summarizer::{DisabledSummarizer, HttpSummarizer, LlmBackend, Summarizer};
pub use transcript::{RawMessage, TranscriptLine};
