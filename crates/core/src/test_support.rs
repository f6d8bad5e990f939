//! Scripted summarizers and fixtures shared by the unit tests.

use crate::call::AiSummary;
use crate::clinical::{Condition, EncounterSymptom};
use crate::store::PatientContext;
use crate::summarizer::{
    CallClassification, CallProfileExtraction, EncounterExtraction, PatientExtraction, Summarizer,
};
use crate::transcript::TranscriptLine;
use crate::{TriageError, TriageResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use triage_types::{
    CallStatus, ConditionStatus, NonEmptyText, PatientStatus, Severity, Sex, Speaker, TriageLevel,
};

pub(crate) fn transcript(lines: usize) -> Vec<TranscriptLine> {
    (0..lines)
        .map(|i| {
            let speaker = if i % 2 == 0 { Speaker::Agent } else { Speaker::Caller };
            TranscriptLine::new(
                crate::transcript::format_offset(i as u64 * 5),
                speaker,
                NonEmptyText::new(format!("line {i}")).expect("non-empty"),
            )
        })
        .collect()
}

pub(crate) fn sample_extraction() -> CallProfileExtraction {
    CallProfileExtraction {
        call: CallClassification {
            triage_level: TriageLevel::High,
            reason_short: "Chest pain".into(),
            chief_complaint: "Crushing chest pain for an hour".into(),
            symptoms: vec!["chest pain".into(), "sweating".into()],
            risk_flags: vec!["cardiac history".into()],
            summary: "Possible acute coronary syndrome.".into(),
            recommendation: "Emergency department now.".into(),
            call_status: CallStatus::Escalated,
        },
        patient: PatientExtraction {
            name: Some("Ada".into()),
            age: Some(67),
            sex: Some(Sex::F),
            allergies: vec![],
            risk_level: TriageLevel::High,
            patient_status: PatientStatus::Critical,
            conditions: vec![Condition {
                name: "Hypertension".into(),
                diagnosed_date: String::new(),
                status: ConditionStatus::Chronic,
            }],
            medications: vec![],
            prior_episodes: vec![],
        },
        encounter: EncounterExtraction {
            chief_complaint: "Chest pain".into(),
            symptoms: vec![EncounterSymptom {
                name: "chest pain".into(),
                severity: Severity::Severe,
                onset: "1 hour ago".into(),
                notes: None,
            }],
            outcome: "Transferred to emergency services".into(),
        },
    }
}

/// Always answers with the same extraction and live summary.
pub(crate) struct FixedSummarizer {
    extraction: CallProfileExtraction,
    calls: AtomicUsize,
}

impl FixedSummarizer {
    pub(crate) fn new(extraction: CallProfileExtraction) -> Self {
        Self {
            extraction,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn extract_call_profile(
        &self,
        _transcript: &[TranscriptLine],
        _existing: Option<&PatientContext>,
    ) -> TriageResult<CallProfileExtraction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.extraction.clone())
    }

    async fn summarize_live(&self, _transcript: &[TranscriptLine]) -> TriageResult<AiSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AiSummary {
            reason_short: "Chest pain".into(),
            triage_level: TriageLevel::High,
            ..AiSummary::default()
        })
    }
}

pub(crate) struct FailingSummarizer;

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn extract_call_profile(
        &self,
        _transcript: &[TranscriptLine],
        _existing: Option<&PatientContext>,
    ) -> TriageResult<CallProfileExtraction> {
        Err(TriageError::SummarizerResponse("scripted failure".into()))
    }

    async fn summarize_live(&self, _transcript: &[TranscriptLine]) -> TriageResult<AiSummary> {
        Err(TriageError::SummarizerResponse("scripted failure".into()))
    }
}

/// Blocks every extraction until `release` is notified; notifies `entered` when called.
pub(crate) struct GatedSummarizer {
    extraction: CallProfileExtraction,
    pub(crate) entered: Notify,
    pub(crate) release: Notify,
}

impl GatedSummarizer {
    pub(crate) fn new(extraction: CallProfileExtraction) -> Self {
        Self {
            extraction,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl Summarizer for GatedSummarizer {
    async fn extract_call_profile(
        &self,
        _transcript: &[TranscriptLine],
        _existing: Option<&PatientContext>,
    ) -> TriageResult<CallProfileExtraction> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.extraction.clone())
    }

    async fn summarize_live(&self, _transcript: &[TranscriptLine]) -> TriageResult<AiSummary> {
        Err(TriageError::SummarizerDisabled)
    }
}

/// Takes longer than any sensible enrichment timeout.
pub(crate) struct SlowSummarizer(pub(crate) Duration);

#[async_trait]
impl Summarizer for SlowSummarizer {
    async fn extract_call_profile(
        &self,
        _transcript: &[TranscriptLine],
        _existing: Option<&PatientContext>,
    ) -> TriageResult<CallProfileExtraction> {
        tokio::time::sleep(self.0).await;
        Ok(sample_extraction())
    }

    async fn summarize_live(&self, _transcript: &[TranscriptLine]) -> TriageResult<AiSummary> {
        tokio::time::sleep(self.0).await;
        Ok(AiSummary::default())
    }
}
