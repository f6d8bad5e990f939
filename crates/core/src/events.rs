use crate::call::{AiSummary, CompletedCall, LiveCall};
use crate::transcript::TranscriptLine;
use serde::{Deserialize, Serialize};

/// Every mutation the registry publishes to dashboard viewers.
///
/// Serialized with an internal `type` tag so a viewer can dispatch on it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LiveCallEvent {
    /// Snapshot sent once to every newly connected viewer.
    #[serde(rename_all = "camelCase")]
    FullState {
        calls: Vec<LiveCall>,
        completed_calls: Vec<CompletedCall>,
    },
    CallStarted { call: LiveCall },
    /// A single appended line.
    #[serde(rename_all = "camelCase")]
    Transcript { call_id: String, line: TranscriptLine },
    /// The whole transcript after reconciliation.
    #[serde(rename_all = "camelCase")]
    TranscriptSync {
        call_id: String,
        transcript: Vec<TranscriptLine>,
    },
    #[serde(rename_all = "camelCase")]
    AiSummary { call_id: String, summary: AiSummary },
    #[serde(rename_all = "camelCase")]
    CallEnded { call_id: String, ended_reason: String },
    CallCompleted { call: CompletedCall },
}

impl LiveCallEvent {
    /// The wire name of the event, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            LiveCallEvent::FullState { .. } => "full-state",
            LiveCallEvent::CallStarted { .. } => "call-started",
            LiveCallEvent::Transcript { .. } => "transcript",
            LiveCallEvent::TranscriptSync { .. } => "transcript-sync",
            LiveCallEvent::AiSummary { .. } => "ai-summary",
            LiveCallEvent::CallEnded { .. } => "call-ended",
            LiveCallEvent::CallCompleted { .. } => "call-completed",
        }
    }

    /// The call this event is about, if it is about a single call.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            LiveCallEvent::FullState { .. } => None,
            LiveCallEvent::CallStarted { call } => Some(&call.id),
            LiveCallEvent::CallCompleted { call } => Some(&call.id),
            LiveCallEvent::Transcript { call_id, .. }
            | LiveCallEvent::TranscriptSync { call_id, .. }
            | LiveCallEvent::AiSummary { call_id, .. }
            | LiveCallEvent::CallEnded { call_id, .. } => Some(call_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use triage_types::{NonEmptyText, Speaker};

    #[test]
    fn events_serialize_with_kebab_case_tag_and_camel_case_fields() {
        let event = LiveCallEvent::CallEnded {
            call_id: "c1".into(),
            ended_reason: "customer-ended-call".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "call-ended");
        assert_eq!(json["callId"], "c1");
        assert_eq!(json["endedReason"], "customer-ended-call");

        let event = LiveCallEvent::FullState {
            calls: vec![LiveCall::new("c2", "+1", Utc::now())],
            completed_calls: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "full-state");
        assert_eq!(json["calls"][0]["phoneNumber"], "+1");
        assert!(json["completedCalls"].as_array().unwrap().is_empty());
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let line = TranscriptLine::new("0:05", Speaker::Caller, NonEmptyText::new("hi").unwrap());
        let events = vec![
            LiveCallEvent::Transcript {
                call_id: "c1".into(),
                line: line.clone(),
            },
            LiveCallEvent::TranscriptSync {
                call_id: "c1".into(),
                transcript: vec![line],
            },
            LiveCallEvent::AiSummary {
                call_id: "c1".into(),
                summary: AiSummary::default(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind());
            assert_eq!(event.call_id(), Some("c1"));
        }
    }
}
