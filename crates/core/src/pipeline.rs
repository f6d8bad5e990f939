//! End-of-call finalization: persist first, then enrich.
//!
//! Phase 1 writes the call with placeholder enrichment before the summarizer is contacted, so
//! the transcript is durable whatever happens next. Phase 2 asks the summarizer for a
//! structured extraction under a timeout. Phase 3 runs only when phase 2 produced something:
//! the patient is merged, the call record is overwritten with the extraction, and one encounter
//! plus one timeline event are appended.
//!
//! Automatic finalization never returns an error. Every failure is logged and the call stays in
//! whatever state the last successful write left it in. Manual re-analysis runs phases 2 and 3
//! again on the persisted transcript and does report failures to its caller.

use crate::call::CompletedCall;
use crate::constants::{MIN_ANALYZABLE_LINES, PENDING_ANALYSIS_REASON, PLACEHOLDER_PHONE};
use crate::store::{
    CallFinalization, CallStore, NewEncounter, NewTimelineEvent, PatientContext, PatientUpsert,
    StoredCall,
};
use crate::summarizer::{CallProfileExtraction, Summarizer};
use crate::transcript::TranscriptLine;
use crate::{TriageError, TriageResult};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use triage_types::{CallStatus, TriageLevel};

/// The facts about an ended call that finalization works from.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizationInput {
    pub call_id: String,
    pub agent_id: String,
    pub caller_phone: String,
    pub created_at: DateTime<Utc>,
    pub duration_sec: u64,
    pub status: CallStatus,
    pub transcript: Vec<TranscriptLine>,
}

impl From<&CompletedCall> for FinalizationInput {
    fn from(call: &CompletedCall) -> Self {
        Self {
            call_id: call.id.clone(),
            agent_id: call.agent_id.clone(),
            caller_phone: call.caller_phone.clone(),
            created_at: call.created_at,
            duration_sec: call.duration_sec,
            status: call.status,
            transcript: call.transcript.clone(),
        }
    }
}

impl From<&StoredCall> for FinalizationInput {
    fn from(call: &StoredCall) -> Self {
        Self {
            call_id: call.id.clone(),
            agent_id: call.agent_id.clone(),
            caller_phone: call.caller_phone.clone(),
            created_at: call.created_at,
            duration_sec: call.duration_sec,
            status: call.status,
            transcript: call.transcript.clone(),
        }
    }
}

impl FinalizationInput {
    /// Placeholder phones are not a patient identity.
    fn patient_phone(&self) -> Option<&str> {
        let phone = self.caller_phone.trim();
        (!phone.is_empty() && phone != PLACEHOLDER_PHONE).then_some(phone)
    }

    fn record(&self, patient_id: Option<String>) -> CallFinalization {
        CallFinalization {
            id: self.call_id.clone(),
            agent_id: self.agent_id.clone(),
            created_at: self.created_at,
            caller_phone: self.caller_phone.clone(),
            duration_sec: self.duration_sec,
            status: self.status,
            triage_level: TriageLevel::Med,
            reason_short: PENDING_ANALYSIS_REASON.to_string(),
            chief_complaint: String::new(),
            symptoms: Vec::new(),
            risk_flags: Vec::new(),
            summary: String::new(),
            recommendation: String::new(),
            transcript: self.transcript.clone(),
            patient_id,
        }
    }

    fn enriched_record(
        &self,
        extraction: &CallProfileExtraction,
        patient_id: Option<String>,
    ) -> CallFinalization {
        let call = &extraction.call;
        CallFinalization {
            status: call.call_status,
            triage_level: call.triage_level,
            reason_short: call.reason_short.clone(),
            chief_complaint: call.chief_complaint.clone(),
            symptoms: call.symptoms.clone(),
            risk_flags: call.risk_flags.clone(),
            summary: call.summary.clone(),
            recommendation: call.recommendation.clone(),
            ..self.record(patient_id)
        }
    }
}

/// Result of a manual re-analysis.
#[derive(Debug, Clone)]
pub struct Reanalysis {
    pub call: StoredCall,
    pub extraction: CallProfileExtraction,
}

pub struct FinalizationPipeline {
    store: Arc<dyn CallStore>,
    summarizer: Arc<dyn Summarizer>,
    enrichment_timeout: Duration,
}

impl FinalizationPipeline {
    pub fn new(
        store: Arc<dyn CallStore>,
        summarizer: Arc<dyn Summarizer>,
        enrichment_timeout: Duration,
    ) -> Self {
        Self {
            store,
            summarizer,
            enrichment_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn CallStore> {
        &self.store
    }

    pub fn summarizer(&self) -> &Arc<dyn Summarizer> {
        &self.summarizer
    }

    pub fn enrichment_timeout(&self) -> Duration {
        self.enrichment_timeout
    }

    /// Runs all three phases for a call that just ended. Returns the extraction when
    /// enrichment succeeded.
    pub async fn run(&self, input: &FinalizationInput) -> Option<CallProfileExtraction> {
        let call_id = input.call_id.as_str();
        tracing::info!(
            call_id,
            lines = input.transcript.len(),
            "finalizing call"
        );

        self.persist_preliminary(input).await;

        let extraction = match self.enrich(input).await {
            Ok(extraction) => extraction,
            Err(e) => {
                tracing::warn!(call_id, error = %e, "no extraction, keeping preliminary record");
                return None;
            }
        };

        if let Err(e) = self.apply(input, &extraction).await {
            tracing::error!(call_id, error = %e, "failed to store extraction");
        } else {
            tracing::info!(
                call_id,
                status = %extraction.call.call_status,
                triage = %extraction.call.triage_level,
                "call finalized"
            );
        }
        Some(extraction)
    }

    /// Phase 1: link or create the patient and write the call with placeholder enrichment.
    async fn persist_preliminary(&self, input: &FinalizationInput) {
        let call_id = input.call_id.as_str();
        let patient_id = match input.patient_phone() {
            Some(phone) => match self
                .store
                .upsert_patient_by_phone(PatientUpsert {
                    last_contact: Some(input.created_at),
                    ..PatientUpsert::phone_only(phone)
                })
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::error!(call_id, error = %e, "initial patient upsert failed");
                    None
                }
            },
            None => None,
        };

        match self.store.finalize_call(input.record(patient_id)).await {
            Ok(()) => tracing::info!(call_id, "preliminary call record saved"),
            Err(e) => tracing::error!(call_id, error = %e, "failed to save preliminary call record"),
        }
    }

    async fn patient_context(&self, input: &FinalizationInput) -> Option<PatientContext> {
        let phone = input.patient_phone()?;
        match self.store.get_patient_context_by_phone(phone).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(call_id = %input.call_id, error = %e, "patient context lookup failed");
                None
            }
        }
    }

    /// Phase 2: ask the summarizer for a structured extraction.
    async fn enrich(&self, input: &FinalizationInput) -> TriageResult<CallProfileExtraction> {
        if input.transcript.len() < MIN_ANALYZABLE_LINES {
            return Err(TriageError::TranscriptTooShort {
                lines: input.transcript.len(),
            });
        }
        let context = self.patient_context(input).await;
        tokio::time::timeout(
            self.enrichment_timeout,
            self.summarizer
                .extract_call_profile(&input.transcript, context.as_ref()),
        )
        .await
        .map_err(|_| TriageError::SummarizerTimeout(self.enrichment_timeout.as_secs()))?
    }

    /// Phase 3: write the extraction everywhere it belongs.
    async fn apply(
        &self,
        input: &FinalizationInput,
        extraction: &CallProfileExtraction,
    ) -> TriageResult<()> {
        let patient_id = match input.patient_phone() {
            Some(phone) => {
                let p = &extraction.patient;
                Some(
                    self.store
                        .upsert_patient_by_phone(PatientUpsert {
                            phone: phone.to_string(),
                            name: p.name.clone(),
                            age: p.age,
                            sex: p.sex,
                            primary_doctor: None,
                            allergies: p.allergies.clone(),
                            risk_level: Some(p.risk_level),
                            patient_status: Some(p.patient_status),
                            conditions: p.conditions.clone(),
                            medications: p.medications.clone(),
                            prior_episodes: p.prior_episodes.clone(),
                            last_contact: Some(input.created_at),
                        })
                        .await?,
                )
            }
            None => None,
        };

        self.store
            .finalize_call(input.enriched_record(extraction, patient_id.clone()))
            .await?;

        let Some(patient_id) = patient_id else {
            tracing::warn!(
                call_id = %input.call_id,
                "caller phone unknown, skipping encounter and timeline"
            );
            return Ok(());
        };

        self.store
            .create_encounter(NewEncounter {
                patient_id: patient_id.clone(),
                call_id: input.call_id.clone(),
                timestamp: input.created_at,
                chief_complaint: extraction.encounter.chief_complaint.clone(),
                symptoms: extraction.encounter.symptoms.clone(),
                triage_level: extraction.call.triage_level,
                outcome: extraction.encounter.outcome.clone(),
            })
            .await?;

        self.store
            .create_timeline_event(NewTimelineEvent {
                patient_id,
                kind: "call".to_string(),
                timestamp: input.created_at,
                title: format!("Triage call: {}", extraction.call.reason_short),
                description: extraction.call.summary.clone(),
                metadata: json!({
                    "triageLevel": extraction.call.triage_level,
                    "callStatus": extraction.call.call_status,
                    "callId": input.call_id,
                }),
            })
            .await?;
        Ok(())
    }

    /// Runs phases 2 and 3 again on the persisted transcript of `call_id`.
    ///
    /// # Errors
    ///
    /// `CallNotFound` for an unknown call, `TranscriptTooShort` when there is nothing to
    /// analyze, `AnalysisFailed` when the summarizer fails or times out, and store errors
    /// from phase 3.
    pub async fn reanalyze(&self, call_id: &str) -> TriageResult<Reanalysis> {
        let stored = self
            .store
            .get_call(call_id)
            .await?
            .ok_or_else(|| TriageError::CallNotFound(call_id.to_string()))?;

        let input = FinalizationInput::from(&stored);
        let extraction = match self.enrich(&input).await {
            Ok(extraction) => extraction,
            Err(e @ TriageError::TranscriptTooShort { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(call_id, error = %e, "re-analysis failed");
                return Err(TriageError::AnalysisFailed(e.to_string()));
            }
        };

        self.apply(&input, &extraction).await?;
        let call = self
            .store
            .get_call(call_id)
            .await?
            .ok_or_else(|| TriageError::CallNotFound(call_id.to_string()))?;
        tracing::info!(call_id, status = %call.status, "call re-analyzed");
        Ok(Reanalysis { call, extraction })
    }
}
