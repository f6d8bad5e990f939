//! In-memory call records: the live call while it is in progress and the completed record it
//! becomes at end-of-call.

use crate::constants::PENDING_ANALYSIS_REASON;
use crate::summarizer::CallProfileExtraction;
use crate::transcript::TranscriptLine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use triage_types::{CallStatus, Sex, TriageLevel};
use utoipa::ToSchema;

/// Lightweight summary of a call, produced while it is still live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AiSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    pub symptoms: Vec<String>,
    pub risk_flags: Vec<String>,
    pub triage_level: TriageLevel,
    pub reason_short: String,
    pub chief_complaint: String,
    pub summary: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum LiveCallStatus {
    Live,
    Ended,
}

/// A call currently in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveCall {
    /// Provider-assigned call id.
    pub id: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
    pub transcript: Vec<TranscriptLine>,
    pub status: LiveCallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<AiSummary>,
}

impl LiveCall {
    pub fn new(id: impl Into<String>, phone_number: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            phone_number: phone_number.into(),
            created_at: now,
            transcript: Vec::new(),
            status: LiveCallStatus::Live,
            ai_summary: None,
        }
    }

    /// Whole seconds since the call was created, never negative.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.created_at).num_seconds()).unwrap_or(0)
    }
}

/// The historical record of an ended call, as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompletedCall {
    pub id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub duration_sec: u64,
    pub caller_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    pub triage_level: TriageLevel,
    pub reason_short: String,
    pub chief_complaint: String,
    pub symptoms: Vec<String>,
    pub risk_flags: Vec<String>,
    pub summary: String,
    pub recommendation: String,
    pub status: CallStatus,
    pub transcript: Vec<TranscriptLine>,
    pub ended_reason: String,
}

impl CompletedCall {
    /// Seals a live call. Fields the live summary already filled in are carried over,
    /// everything else starts from the pending-analysis placeholders.
    pub fn from_live(
        live: LiveCall,
        agent_id: &str,
        status: CallStatus,
        duration_sec: u64,
        ended_reason: &str,
    ) -> Self {
        let ai = live.ai_summary.unwrap_or_else(|| AiSummary {
            reason_short: PENDING_ANALYSIS_REASON.to_string(),
            ..AiSummary::default()
        });
        Self {
            id: live.id,
            agent_id: agent_id.to_string(),
            created_at: live.created_at,
            duration_sec,
            caller_phone: live.phone_number,
            patient_name: ai.patient_name,
            age: ai.age,
            sex: ai.sex,
            triage_level: ai.triage_level,
            reason_short: ai.reason_short,
            chief_complaint: ai.chief_complaint,
            symptoms: ai.symptoms,
            risk_flags: ai.risk_flags,
            summary: ai.summary,
            recommendation: ai.recommendation,
            status,
            transcript: live.transcript,
            ended_reason: ended_reason.to_string(),
        }
    }

    /// Overwrites the classification fields with a successful extraction. Demographics are
    /// only replaced when the extraction knows them.
    pub fn apply_extraction(&mut self, extraction: &CallProfileExtraction) {
        let call = &extraction.call;
        self.triage_level = call.triage_level;
        self.reason_short = call.reason_short.clone();
        self.chief_complaint = call.chief_complaint.clone();
        self.symptoms = call.symptoms.clone();
        self.risk_flags = call.risk_flags.clone();
        self.summary = call.summary.clone();
        self.recommendation = call.recommendation.clone();
        self.status = call.call_status;

        let patient = &extraction.patient;
        if patient.name.is_some() {
            self.patient_name = patient.name.clone();
        }
        if patient.age.is_some() {
            self.age = patient.age;
        }
        if patient.sex.is_some() {
            self.sex = patient.sex;
        }
    }
}
