//! Routes call-provider webhooks onto the live-call registry.
//!
//! The provider delivers at least once and in no guaranteed order, so every route is written
//! against the registry's idempotent operations. Nothing here fails the webhook: malformed or
//! unknown events are logged and acknowledged.

use crate::constants::{DEFAULT_ENDED_REASON, PLACEHOLDER_PHONE, UNKNOWN_ENDED_REASON};
use crate::registry::{LiveCallRegistry, ReportDetails};
use crate::store::PatientContext;
use crate::transcript::{self, RawMessage};
use crate::wire;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const NEW_PATIENT_CONTEXT: &str = "New patient \u{2014} no prior record on file.";
const NONE_ON_RECORD: &str = "none on record";

/// Top-level webhook body. A missing `message` is acknowledged and ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default, deserialize_with = "wire::lenient")]
    pub message: Option<ProviderMessage>,
}

impl WebhookEnvelope {
    /// Decodes a webhook body that is already known to be JSON.
    ///
    /// # Returns
    ///
    /// The envelope, or an empty one (which is acknowledged and ignored) when the body is not
    /// an object.
    pub fn from_value(body: serde_json::Value) -> Self {
        serde_json::from_value(body).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "webhook body has no readable message");
            Self::default()
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMessage {
    #[serde(rename = "type", default, deserialize_with = "wire::lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub call: Option<ProviderCall>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub ended_reason: Option<String>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub transcript_type: Option<String>,
    #[serde(default, deserialize_with = "wire::lenient_text")]
    pub transcript: Option<String>,
    #[serde(default, deserialize_with = "wire::lenient_seq")]
    pub conversation: Option<Vec<RawMessage>>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub artifact: Option<CallArtifact>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCall {
    #[serde(default, deserialize_with = "wire::lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub customer: Option<Customer>,
    /// Seconds, possibly fractional.
    #[serde(default, deserialize_with = "wire::lenient_seconds")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub started_at: Option<String>,
    #[serde(default, deserialize_with = "wire::lenient")]
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Customer {
    #[serde(default, deserialize_with = "wire::lenient")]
    pub number: Option<String>,
}

/// The provider's consolidated record of a finished call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallArtifact {
    #[serde(default, deserialize_with = "wire::lenient_seq")]
    pub messages: Option<Vec<RawMessage>>,
    /// Flattened transcript text; only logged.
    #[serde(default, deserialize_with = "wire::lenient_text")]
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCall {
    #[serde(default, deserialize_with = "wire::lenient")]
    pub name: Option<String>,
}

/// Provider event types the router knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventKind {
    AssistantRequest,
    StatusUpdate,
    Transcript,
    ConversationUpdate,
    EndOfCallReport,
    SpeechUpdate,
    UserInterrupted,
    FunctionCall,
    Other,
}

impl ProviderEventKind {
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "assistant-request" => Self::AssistantRequest,
            "status-update" => Self::StatusUpdate,
            "transcript" => Self::Transcript,
            "conversation-update" => Self::ConversationUpdate,
            "end-of-call-report" => Self::EndOfCallReport,
            "speech-update" => Self::SpeechUpdate,
            "user-interrupted" => Self::UserInterrupted,
            "function-call" => Self::FunctionCall,
            _ => Self::Other,
        }
    }
}

impl ProviderMessage {
    fn call_id(&self) -> Option<&str> {
        self.call
            .as_ref()
            .and_then(|c| c.id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    fn customer_number(&self) -> Option<&str> {
        self.call
            .as_ref()
            .and_then(|c| c.customer.as_ref())
            .and_then(|c| c.number.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    fn ended_reason(&self) -> Option<&str> {
        self.ended_reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    fn ended_reason_or(&self, fallback: &'static str) -> String {
        self.ended_reason().unwrap_or(fallback).to_string()
    }

    /// Provider-reported duration when non-zero, otherwise end minus start. `None` when
    /// neither is usable.
    fn reported_duration(&self) -> Option<u64> {
        let call = self.call.as_ref()?;
        let reported = call
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.round() as u64)
            .filter(|d| *d > 0);
        reported.or_else(|| {
            let started = parse_timestamp(call.started_at.as_deref()?)?;
            let ended = parse_timestamp(call.ended_at.as_deref()?)?;
            let millis = (ended - started).num_milliseconds();
            let secs = (millis as f64 / 1000.0).round();
            (secs > 0.0).then_some(secs as u64)
        })
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// What the webhook answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IngressResponse {
    Ack { ok: bool },
    Assistant(AssistantResponse),
}

impl IngressResponse {
    pub fn ack() -> Self {
        IngressResponse::Ack { ok: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    pub assistant_overrides: AssistantOverrides,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantOverrides {
    pub variable_values: VariableValues,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableValues {
    pub patient_name: String,
    pub patient_context: String,
}

fn or_none_on_record(items: Vec<String>, separator: &str) -> String {
    if items.is_empty() {
        NONE_ON_RECORD.to_string()
    } else {
        items.join(separator)
    }
}

/// Briefing text handed to the voice assistant for a returning caller.
pub fn describe_returning_patient(patient: &PatientContext) -> String {
    let unknown = || "Unknown".to_string();
    let allergies = or_none_on_record(patient.allergies.clone(), ", ");
    let conditions = or_none_on_record(
        patient
            .conditions
            .iter()
            .map(|c| format!("{} ({})", c.name, c.status))
            .collect(),
        ", ",
    );
    let medications = or_none_on_record(
        patient
            .medications
            .iter()
            .map(|m| format!("{} {} {}", m.name, m.dosage, m.frequency).trim().to_string())
            .collect(),
        ", ",
    );
    let episodes = or_none_on_record(patient.prior_episodes.clone(), "; ");

    [
        "RETURNING PATIENT \u{2014} record found in database.".to_string(),
        format!(
            "Name: {} | Age: {} | Sex: {}",
            patient.name.clone().unwrap_or_else(unknown),
            patient.age.map(|a| a.to_string()).unwrap_or_else(unknown),
            patient.sex.map(|s| s.to_string()).unwrap_or_else(unknown),
        ),
        format!("Allergies: {allergies}"),
        format!("Conditions: {conditions}"),
        format!("Medications: {medications}"),
        format!("Prior episodes: {episodes}"),
    ]
    .join("\n")
}

/// Dispatches provider events to the registry.
#[derive(Clone)]
pub struct WebhookRouter {
    registry: LiveCallRegistry,
}

impl WebhookRouter {
    pub fn new(registry: LiveCallRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &LiveCallRegistry {
        &self.registry
    }

    /// Applies one webhook delivery. Returns once the in-memory state has been updated;
    /// finalization of an ended call continues in the background.
    pub async fn handle(&self, envelope: WebhookEnvelope) -> IngressResponse {
        let Some(message) = envelope.message else {
            return IngressResponse::ack();
        };
        let Some(kind_label) = message.kind.as_deref() else {
            return IngressResponse::ack();
        };
        let kind = ProviderEventKind::from_wire(kind_label);
        let call_id = message.call_id();

        if let Some(id) = call_id {
            if kind != ProviderEventKind::EndOfCallReport && !self.registry.knows(id) {
                let phone = message.customer_number().unwrap_or(PLACEHOLDER_PHONE);
                tracing::info!(call_id = id, first_event = kind_label, "auto-starting call");
                if let Err(e) = self.registry.start_call(id, phone) {
                    tracing::debug!(call_id = id, error = %e, "auto-start skipped");
                }
            }
        }

        match kind {
            ProviderEventKind::AssistantRequest => {
                return IngressResponse::Assistant(self.assistant_request(&message).await);
            }
            ProviderEventKind::StatusUpdate => {
                let status = message.call.as_ref().and_then(|c| c.status.as_deref());
                tracing::debug!(call_id = ?call_id, status = ?status, "status update");
                if let (Some("ended"), Some(id)) = (status, call_id) {
                    self.registry
                        .end_call_awaiting_report(id, &message.ended_reason_or(UNKNOWN_ENDED_REASON));
                }
            }
            ProviderEventKind::Transcript => {
                let is_final = message.transcript_type.as_deref() == Some("final");
                if let (true, Some(id), Some(text)) = (is_final, call_id, message.transcript.as_deref()) {
                    let role = message.role.as_deref().unwrap_or("user");
                    self.registry.append_transcript_line(id, role, text);
                }
            }
            ProviderEventKind::ConversationUpdate => {
                if let (Some(id), Some(conversation)) = (call_id, message.conversation.as_deref()) {
                    if !conversation.is_empty() {
                        tracing::debug!(call_id = id, messages = conversation.len(), "conversation update");
                        self.registry.sync_transcript(id, conversation);
                    }
                }
            }
            ProviderEventKind::EndOfCallReport => {
                if let Some(id) = call_id {
                    self.end_of_call_report(id, &message);
                }
            }
            ProviderEventKind::SpeechUpdate | ProviderEventKind::UserInterrupted => {}
            ProviderEventKind::FunctionCall => {
                let name = message.function_call.as_ref().and_then(|f| f.name.as_deref());
                tracing::info!(call_id = ?call_id, function = ?name, "function call");
            }
            ProviderEventKind::Other => {
                tracing::debug!(event = kind_label, "unhandled provider event");
            }
        }
        IngressResponse::ack()
    }

    fn end_of_call_report(&self, call_id: &str, message: &ProviderMessage) {
        let artifact_messages = message
            .artifact
            .as_ref()
            .and_then(|a| a.messages.as_deref())
            .unwrap_or_default();
        tracing::info!(
            call_id,
            duration = ?message.call.as_ref().and_then(|c| c.duration),
            artifact_lines = artifact_messages.len(),
            "end-of-call report"
        );

        let report = ReportDetails {
            phone: message.customer_number(),
            ended_reason: message.ended_reason(),
            duration: message.reported_duration(),
            messages: artifact_messages,
        };
        if self.registry.complete_with_report(call_id, report).is_some() {
            return;
        }
        if self.registry.knows(call_id) && !self.registry.is_live(call_id) {
            tracing::info!(call_id, "end-of-call report for a finalized call ignored");
            return;
        }

        let phone = message.customer_number().unwrap_or(PLACEHOLDER_PHONE);
        let artifact_len = transcript::normalize(artifact_messages).len();

        match self.registry.get_live_call(call_id) {
            None if artifact_len == 0 => {
                tracing::error!(
                    call_id,
                    "call not in memory and the report has no messages, cannot finalize"
                );
                return;
            }
            None => {
                tracing::warn!(call_id, messages = artifact_len, "reconstructing call from report");
                if let Err(e) = self.registry.start_call(call_id, phone) {
                    tracing::warn!(call_id, error = %e, "reconstruction failed");
                    return;
                }
                self.registry.sync_transcript(call_id, artifact_messages);
            }
            Some(live) => {
                self.registry.correct_phone(call_id, phone);
                if artifact_len > live.transcript.len() {
                    tracing::info!(
                        call_id,
                        in_memory = live.transcript.len(),
                        artifact = artifact_len,
                        "supplementing transcript from report"
                    );
                    self.registry.sync_transcript(call_id, artifact_messages);
                }
            }
        }

        let reason = message.ended_reason_or(DEFAULT_ENDED_REASON);
        self.registry
            .end_call_with_duration(call_id, &reason, message.reported_duration());
    }

    async fn assistant_request(&self, message: &ProviderMessage) -> AssistantResponse {
        let phone = message.customer_number();
        let mut patient_name = "there".to_string();
        let mut patient_context = NEW_PATIENT_CONTEXT.to_string();

        if let Some(phone) = phone {
            match self.registry.store().get_patient_context_by_phone(phone).await {
                Ok(Some(patient)) => {
                    patient_name = patient.name.clone().unwrap_or(patient_name);
                    patient_context = describe_returning_patient(&patient);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(phone, error = %e, "patient lookup failed"),
            }
        }
        tracing::info!(
            phone = phone.unwrap_or("unknown"),
            returning = patient_context != NEW_PATIENT_CONTEXT,
            "assistant request"
        );

        AssistantResponse {
            assistant_id: self.registry.config().assistant_id().map(str::to_string),
            assistant_overrides: AssistantOverrides {
                variable_values: VariableValues {
                    patient_name,
                    patient_context,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinical::{Condition, Medication};
    use crate::call::CompletedCall;
    use crate::config::EngineConfig;
    use crate::events::LiveCallEvent;
    use crate::store::{CallStore, MemoryStore, PatientUpsert};
    use crate::test_support::{sample_extraction, FailingSummarizer, FixedSummarizer};
    use crate::summarizer::Summarizer;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use triage_types::{CallStatus, ConditionStatus, Sex};

    fn router_with(
        summarizer: Arc<dyn Summarizer>,
        config: EngineConfig,
    ) -> (WebhookRouter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = LiveCallRegistry::new(store.clone(), summarizer, config);
        (WebhookRouter::new(registry), store)
    }

    fn router() -> (WebhookRouter, Arc<MemoryStore>) {
        let config = EngineConfig::standard()
            .unwrap()
            .with_assistant_id(Some("asst-1".into()));
        router_with(Arc::new(FailingSummarizer), config)
    }

    async fn wait_for_completion(sub: &mut crate::Subscription) -> (usize, CompletedCall) {
        let mut ended_events = 0;
        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match sub.recv().await.expect("subscription open") {
                    LiveCallEvent::CallEnded { .. } => ended_events += 1,
                    LiveCallEvent::CallCompleted { call } => return call,
                    _ => {}
                }
            }
        })
        .await
        .expect("call completes in time");
        (ended_events, completed)
    }

    async fn deliver(router: &WebhookRouter, body: serde_json::Value) -> IngressResponse {
        let envelope: WebhookEnvelope = serde_json::from_value(body).unwrap();
        router.handle(envelope).await
    }

    fn transcript_event(id: &str, role: &str, text: &str) -> serde_json::Value {
        json!({ "message": {
            "type": "transcript",
            "transcriptType": "final",
            "role": role,
            "transcript": text,
            "call": { "id": id, "customer": { "number": "+15551234567" } },
        }})
    }

    #[tokio::test]
    async fn missing_or_untyped_messages_are_acknowledged() {
        let (router, _) = router();
        assert_eq!(deliver(&router, json!({})).await, IngressResponse::ack());
        assert_eq!(
            deliver(&router, json!({ "message": { "call": { "id": "c1" } } })).await,
            IngressResponse::ack()
        );
        assert_eq!(
            deliver(&router, json!({ "message": { "type": "hang", "call": { "id": "c1" } } })).await,
            IngressResponse::ack()
        );
        // Any typed event for a new id starts the call, even one the router ignores.
        assert!(router.registry().is_live("c1"));
    }

    #[tokio::test]
    async fn first_transcript_auto_starts_call() {
        let (router, _) = router();
        deliver(&router, transcript_event("c1", "assistant", "Hello, triage line.")).await;
        deliver(&router, transcript_event("c1", "user", "I feel dizzy.")).await;
        let partial = json!({ "message": {
            "type": "transcript", "transcriptType": "partial", "transcript": "I fe",
            "call": { "id": "c1" },
        }});
        deliver(&router, partial).await;

        let call = router.registry().get_live_call("c1").unwrap();
        assert_eq!(call.phone_number, "+15551234567");
        assert_eq!(call.transcript.len(), 2);
    }

    #[tokio::test]
    async fn report_corrects_phone_supplements_and_prefers_reported_duration() {
        let (router, _) = router();
        let update = json!({ "message": {
            "type": "conversation-update",
            "conversation": [
                { "role": "system", "content": "You are a triage nurse." },
                { "role": "assistant", "content": "Hello." },
            ],
            "call": { "id": "c1" },
        }});
        deliver(&router, update).await;
        let live = router.registry().get_live_call("c1").unwrap();
        assert_eq!(live.phone_number, PLACEHOLDER_PHONE);
        assert_eq!(live.transcript.len(), 1);

        let report = json!({ "message": {
            "type": "end-of-call-report",
            "endedReason": "customer-ended-call",
            "call": {
                "id": "c1",
                "duration": 42.4,
                "startedAt": "2025-01-01T10:00:00Z",
                "endedAt": "2025-01-01T10:05:00Z",
                "customer": { "number": "+15559876543" },
            },
            "artifact": {
                "messages": [
                    { "role": "assistant", "message": "Hello." },
                    { "role": "user", "message": "My head hurts." },
                    { "role": "assistant", "message": "Since when?" },
                ],
                "transcript": "AI: Hello. User: My head hurts.",
            },
        }});
        assert_eq!(deliver(&router, report).await, IngressResponse::ack());

        let done = router.registry().get_completed_call("c1").unwrap();
        assert_eq!(done.caller_phone, "+15559876543");
        assert_eq!(done.transcript.len(), 3);
        assert_eq!(done.duration_sec, 42);
        assert_eq!(done.ended_reason, "customer-ended-call");
        assert_eq!(done.status, CallStatus::NeedsReview);
    }

    #[tokio::test]
    async fn report_falls_back_to_timestamp_duration() {
        let (router, _) = router();
        deliver(&router, transcript_event("c1", "user", "hello")).await;
        let report = json!({ "message": {
            "type": "end-of-call-report",
            "call": {
                "id": "c1",
                "duration": 0,
                "startedAt": "2025-01-01T10:00:00Z",
                "endedAt": "2025-01-01T10:01:30.600Z",
            },
        }});
        deliver(&router, report).await;
        let done = router.registry().get_completed_call("c1").unwrap();
        assert_eq!(done.duration_sec, 91);
        assert_eq!(done.ended_reason, DEFAULT_ENDED_REASON);
    }

    #[tokio::test]
    async fn unknown_call_is_reconstructed_from_report() {
        let (router, _) = router();
        let report = json!({ "message": {
            "type": "end-of-call-report",
            "endedReason": "assistant-forwarded-call",
            "call": { "id": "lost", "customer": { "number": "+1555" } },
            "artifact": { "messages": [
                { "role": "assistant", "message": "Hello." },
                { "role": "user", "message": "Chest pain." },
            ]},
        }});
        deliver(&router, report).await;

        let done = router.registry().get_completed_call("lost").unwrap();
        assert_eq!(done.caller_phone, "+1555");
        assert_eq!(done.status, CallStatus::Escalated);
        // Two reconstructed lines plus the transfer note.
        assert_eq!(done.transcript.len(), 3);
    }

    #[tokio::test]
    async fn unknown_call_without_messages_is_dropped() {
        let (router, _) = router();
        let report = json!({ "message": {
            "type": "end-of-call-report",
            "call": { "id": "ghost" },
            "artifact": { "messages": [{ "role": "user", "message": "   " }] },
        }});
        deliver(&router, report).await;
        assert!(!router.registry().knows("ghost"));
    }

    fn status_ended(id: &str) -> serde_json::Value {
        json!({ "message": {
            "type": "status-update",
            "endedReason": "customer-ended-call",
            "call": { "id": id, "status": "ended" },
        }})
    }

    #[tokio::test]
    async fn report_after_status_ended_supplies_duration_and_transcript() {
        let config = EngineConfig::standard().unwrap();
        let (router, store) = router_with(Arc::new(FixedSummarizer::new(sample_extraction())), config);
        let mut sub = router.registry().subscribe();
        deliver(&router, transcript_event("c1", "assistant", "Hello.")).await;
        deliver(&router, transcript_event("c1", "user", "Help.")).await;
        deliver(&router, status_ended("c1")).await;
        deliver(&router, status_ended("c1")).await;
        assert!(router.registry().is_awaiting_report("c1"));
        let row = store.get_call("c1").await.unwrap();
        assert!(row.map_or(true, |row| row.transcript.is_empty()));

        let report = json!({ "message": {
            "type": "end-of-call-report",
            "endedReason": "customer-ended-call",
            "call": { "id": "c1", "duration": 300, "customer": { "number": "+15551234567" } },
            "artifact": { "messages": [
                { "role": "assistant", "message": "Hello." },
                { "role": "user", "message": "Help." },
                { "role": "assistant", "message": "What happened?" },
                { "role": "user", "message": "I fell down the stairs." },
            ]},
        }});
        deliver(&router, report.clone()).await;
        assert!(!router.registry().is_awaiting_report("c1"));

        let (ended_events, completed) = wait_for_completion(&mut sub).await;
        assert_eq!(ended_events, 1);
        assert_eq!(completed.duration_sec, 300);
        assert_eq!(completed.transcript.len(), 4);

        let row = store.get_call("c1").await.unwrap().unwrap();
        assert_eq!(row.duration_sec, 300);
        assert_eq!(row.transcript.len(), 4);
        assert_eq!(row.reason_short, "Chest pain");

        // A redelivered report changes nothing.
        deliver(&router, report).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.encounter_count(), 1);
        assert_eq!(store.timeline_count(), 1);
        assert_eq!(router.registry().get_completed().len(), 1);
        let row = store.get_call("c1").await.unwrap().unwrap();
        assert_eq!(row.duration_sec, 300);
        assert_eq!(row.transcript.len(), 4);
    }

    #[tokio::test]
    async fn report_reason_decides_escalation_after_status_ended() {
        let (router, _) = router();
        let mut sub = router.registry().subscribe();
        deliver(&router, transcript_event("c1", "user", "I need a nurse.")).await;
        deliver(&router, status_ended("c1")).await;
        assert_eq!(
            router.registry().get_completed_call("c1").unwrap().status,
            CallStatus::NeedsReview
        );

        let report = json!({ "message": {
            "type": "end-of-call-report",
            "endedReason": "assistant-forwarded-call",
            "call": { "id": "c1" },
        }});
        deliver(&router, report).await;
        let (_, completed) = wait_for_completion(&mut sub).await;
        assert_eq!(completed.status, CallStatus::Escalated);
        assert_eq!(completed.ended_reason, "assistant-forwarded-call");
        assert!(completed
            .transcript
            .last()
            .unwrap()
            .text
            .as_str()
            .contains("assistant-forwarded-call"));
    }

    #[tokio::test]
    async fn status_ended_without_report_finalizes_after_grace() {
        let config = EngineConfig::standard()
            .unwrap()
            .with_report_grace(Duration::from_millis(20));
        let (router, store) = router_with(Arc::new(FixedSummarizer::new(sample_extraction())), config);
        let mut sub = router.registry().subscribe();
        deliver(&router, transcript_event("c1", "assistant", "Hello.")).await;
        deliver(&router, transcript_event("c1", "user", "Help.")).await;
        deliver(&router, status_ended("c1")).await;

        let (ended_events, completed) = wait_for_completion(&mut sub).await;
        assert_eq!(ended_events, 1);
        assert_eq!(completed.transcript.len(), 2);
        assert!(!router.registry().is_awaiting_report("c1"));

        // Too late to change the record.
        let report = json!({ "message": {
            "type": "end-of-call-report",
            "call": { "id": "c1", "duration": 99 },
            "artifact": { "messages": [{ "role": "user", "message": "late" }] },
        }});
        deliver(&router, report).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.encounter_count(), 1);
        assert_eq!(store.get_call("c1").await.unwrap().unwrap().transcript.len(), 2);
    }

    #[tokio::test]
    async fn mistyped_fields_do_not_reject_the_delivery() {
        let (router, _) = router();
        let update = json!({ "message": {
            "type": "conversation-update",
            "call": { "id": "c1", "duration": "12", "customer": { "number": 5551234 } },
            "conversation": [
                { "role": null, "content": "system prompt" },
                { "role": "assistant", "content": [{ "type": "text", "text": "Hello," }, { "type": "text", "text": "triage line." }] },
                42,
                { "role": "user", "content": "My ankle is swollen." },
            ],
        }});
        let envelope = WebhookEnvelope::from_value(update);
        assert_eq!(router.handle(envelope).await, IngressResponse::ack());

        let live = router.registry().get_live_call("c1").unwrap();
        assert_eq!(live.phone_number, PLACEHOLDER_PHONE);
        let texts: Vec<_> = live.transcript.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["system prompt", "Hello, triage line.", "My ankle is swollen."]);

        let report = json!({ "message": {
            "type": "end-of-call-report",
            "call": { "id": "c1", "duration": "12" },
            "artifact": "unavailable",
        }});
        deliver(&router, report).await;
        assert_eq!(router.registry().get_completed_call("c1").unwrap().duration_sec, 12);
    }

    #[tokio::test]
    async fn unreadable_bodies_decode_as_empty_envelopes() {
        let (router, _) = router();
        for body in [json!([1, 2]), json!("ended"), json!({ "message": "hi" })] {
            let envelope = WebhookEnvelope::from_value(body);
            assert!(envelope.message.is_none());
            assert_eq!(router.handle(envelope).await, IngressResponse::ack());
        }
    }

    #[tokio::test]
    async fn assistant_request_for_new_caller() {
        let (router, _) = router();
        let body = json!({ "message": {
            "type": "assistant-request",
            "call": { "customer": { "number": "+1000" } },
        }});
        let IngressResponse::Assistant(res) = deliver(&router, body).await else {
            panic!("expected assistant overrides");
        };
        assert_eq!(res.assistant_id.as_deref(), Some("asst-1"));
        assert_eq!(res.assistant_overrides.variable_values.patient_name, "there");
        assert_eq!(
            res.assistant_overrides.variable_values.patient_context,
            NEW_PATIENT_CONTEXT
        );
    }

    #[tokio::test]
    async fn assistant_request_for_returning_patient() {
        let (router, store) = router();
        store
            .upsert_patient_by_phone(PatientUpsert {
                name: Some("Ada".into()),
                age: Some(67),
                sex: Some(Sex::F),
                conditions: vec![Condition {
                    name: "Hypertension".into(),
                    diagnosed_date: String::new(),
                    status: ConditionStatus::Chronic,
                }],
                medications: vec![Medication {
                    name: "Lisinopril".into(),
                    dosage: "10mg".into(),
                    frequency: "daily".into(),
                    started_date: String::new(),
                }],
                ..PatientUpsert::phone_only("+1000")
            })
            .await
            .unwrap();

        let body = json!({ "message": {
            "type": "assistant-request",
            "call": { "customer": { "number": "+1000" } },
        }});
        let response = deliver(&router, body).await;
        let IngressResponse::Assistant(res) = &response else {
            panic!("expected assistant overrides");
        };
        let values = &res.assistant_overrides.variable_values;
        assert_eq!(values.patient_name, "Ada");
        assert!(values.patient_context.starts_with("RETURNING PATIENT"));
        assert!(values.patient_context.contains("Name: Ada | Age: 67 | Sex: F"));
        assert!(values.patient_context.contains("Conditions: Hypertension (Chronic)"));
        assert!(values.patient_context.contains("Medications: Lisinopril 10mg daily"));
        assert!(values.patient_context.contains("Allergies: none on record"));

        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["assistantId"], "asst-1");
        assert_eq!(wire["assistantOverrides"]["variableValues"]["patientName"], "Ada");
    }

    #[test]
    fn ack_serializes_as_ok_true() {
        assert_eq!(
            serde_json::to_value(IngressResponse::ack()).unwrap(),
            json!({ "ok": true })
        );
    }
}
