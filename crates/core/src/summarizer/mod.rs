//! The summarization collaborator: a language model that turns a transcript into structured
//! triage data.
//!
//! The model is untrusted. Its output is parsed leniently: code fences are stripped, unknown
//! labels fall back to defaults and wrongly typed lists become empty, so a mostly-right answer
//! is still usable. Only output that is not a JSON object at all is rejected.

mod http;

pub use http::{DisabledSummarizer, HttpSummarizer, LlmBackend};

use crate::call::AiSummary;
use crate::clinical::{Condition, EncounterSymptom, Medication};
use crate::constants::DEFAULT_COMPLETED_REASON;
use crate::store::PatientContext;
use crate::transcript::TranscriptLine;
use crate::{TriageError, TriageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use triage_types::{CallStatus, PatientStatus, Sex, TriageLevel};
use utoipa::ToSchema;

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Full end-of-call extraction, informed by what is already known about the caller.
    async fn extract_call_profile(
        &self,
        transcript: &[TranscriptLine],
        existing: Option<&PatientContext>,
    ) -> TriageResult<CallProfileExtraction>;

    /// Lightweight summary of a call still in progress.
    async fn summarize_live(&self, transcript: &[TranscriptLine]) -> TriageResult<AiSummary>;
}

/// Classification of the call itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallClassification {
    pub triage_level: TriageLevel,
    pub reason_short: String,
    pub chief_complaint: String,
    pub symptoms: Vec<String>,
    pub risk_flags: Vec<String>,
    pub summary: String,
    pub recommendation: String,
    pub call_status: CallStatus,
}

/// Updated view of the caller's record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatientExtraction {
    pub name: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<Sex>,
    pub allergies: Vec<String>,
    pub risk_level: TriageLevel,
    pub patient_status: PatientStatus,
    pub conditions: Vec<Condition>,
    pub medications: Vec<Medication>,
    pub prior_episodes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EncounterExtraction {
    pub chief_complaint: String,
    pub symptoms: Vec<EncounterSymptom>,
    pub outcome: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CallProfileExtraction {
    pub call: CallClassification,
    pub patient: PatientExtraction,
    pub encounter: EncounterExtraction,
}

/// Removes a surrounding markdown code fence, with or without a `json` tag.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        text = rest.strip_prefix("json").unwrap_or(rest);
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

fn parse_object(raw: &str) -> TriageResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(strip_code_fences(raw)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(TriageError::SummarizerResponse(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
        Err(e) => Err(TriageError::SummarizerResponse(e.to_string())),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A non-empty string field.
fn text(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn text_or(v: &Value, key: &str, default: &str) -> String {
    text(v, key).unwrap_or_else(|| default.to_string())
}

fn label<T: FromStr>(v: &Value, key: &str) -> Option<T> {
    v.get(key).and_then(Value::as_str).and_then(|s| s.parse().ok())
}

fn strings(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn objects<'a>(v: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    v.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|item| item.is_object())
}

fn age(v: &Value) -> Option<u32> {
    let n = v.get("age")?.as_f64()?;
    (n > 0.0 && n < 150.0).then(|| n.round() as u32)
}

pub fn parse_call_profile(raw: &str) -> TriageResult<CallProfileExtraction> {
    let root = Value::Object(parse_object(raw)?);
    let null = Value::Null;
    let call = root.get("call").unwrap_or(&null);
    let patient = root.get("patient").unwrap_or(&null);
    let encounter = root.get("encounter").unwrap_or(&null);

    Ok(CallProfileExtraction {
        call: CallClassification {
            triage_level: label(call, "triageLevel").unwrap_or_default(),
            reason_short: text_or(call, "reasonShort", DEFAULT_COMPLETED_REASON),
            chief_complaint: text_or(call, "chiefComplaint", ""),
            symptoms: strings(call, "symptoms"),
            risk_flags: strings(call, "riskFlags"),
            summary: text_or(call, "summary", ""),
            recommendation: text_or(call, "recommendation", ""),
            call_status: label::<CallStatus>(call, "callStatus")
                .filter(CallStatus::is_terminal)
                .unwrap_or_default(),
        },
        patient: PatientExtraction {
            name: text(patient, "name"),
            age: age(patient),
            sex: label(patient, "sex"),
            allergies: strings(patient, "allergies"),
            risk_level: label(patient, "riskLevel").unwrap_or_default(),
            patient_status: label(patient, "patientStatus").unwrap_or_default(),
            conditions: objects(patient, "conditions")
                .filter_map(|c| {
                    Some(Condition {
                        name: text(c, "name")?,
                        diagnosed_date: text_or(c, "diagnosedDate", ""),
                        status: label(c, "status").unwrap_or_default(),
                    })
                })
                .collect(),
            medications: objects(patient, "medications")
                .filter_map(|m| {
                    Some(Medication {
                        name: text(m, "name")?,
                        dosage: text_or(m, "dosage", ""),
                        frequency: text_or(m, "frequency", ""),
                        started_date: text_or(m, "startedDate", ""),
                    })
                })
                .collect(),
            prior_episodes: strings(patient, "priorEpisodes"),
        },
        encounter: EncounterExtraction {
            chief_complaint: text_or(encounter, "chiefComplaint", ""),
            symptoms: objects(encounter, "symptoms")
                .filter_map(|s| {
                    Some(EncounterSymptom {
                        name: text(s, "name")?,
                        severity: label(s, "severity").unwrap_or_default(),
                        onset: text_or(s, "onset", "unknown"),
                        notes: text(s, "notes"),
                    })
                })
                .collect(),
            outcome: text_or(encounter, "outcome", ""),
        },
    })
}

pub fn parse_live_summary(raw: &str) -> TriageResult<AiSummary> {
    let root = Value::Object(parse_object(raw)?);
    Ok(AiSummary {
        patient_name: text(&root, "patientName"),
        age: age(&root),
        sex: label(&root, "sex"),
        symptoms: strings(&root, "symptoms"),
        risk_flags: strings(&root, "riskFlags"),
        triage_level: label(&root, "triageLevel").unwrap_or_default(),
        reason_short: text_or(&root, "reasonShort", "Live call in progress"),
        chief_complaint: text_or(&root, "chiefComplaint", ""),
        summary: text_or(&root, "summary", "Call in progress, analyzing transcript."),
        recommendation: text_or(&root, "recommendation", ""),
    })
}

const EXTRACTION_SCHEMA: &str = r#"Return ONLY a JSON object with this schema (null for unknown values):
{
  "call": {
    "triageLevel": "HIGH" | "MED" | "LOW",
    "reasonShort": "5-8 word reason for the call",
    "chiefComplaint": "1-2 sentence chief complaint",
    "symptoms": ["identified symptoms"],
    "riskFlags": ["risk factors"],
    "summary": "2-3 sentence clinical summary",
    "recommendation": "recommended next steps",
    "callStatus": "Escalated" | "Needs review" | "Resolved"
  },
  "patient": {
    "name": "full name or null",
    "age": number or null,
    "sex": "M" | "F" or null,
    "allergies": ["allergies"],
    "riskLevel": "HIGH" | "MED" | "LOW",
    "patientStatus": "Critical" | "Active" | "Stable" | "Follow-up needed",
    "conditions": [{"name": "", "diagnosedDate": "YYYY-MM-DD or empty", "status": "Active" | "Resolved" | "Chronic"}],
    "medications": [{"name": "", "dosage": "", "frequency": "", "startedDate": "YYYY-MM-DD or empty"}],
    "priorEpisodes": ["prior episodes"]
  },
  "encounter": {
    "chiefComplaint": "presenting complaint",
    "symptoms": [{"name": "", "severity": "Mild" | "Moderate" | "Severe", "onset": "", "notes": ""}],
    "outcome": "what was decided at the end of the call"
  }
}"#;

const LIVE_SCHEMA: &str = r#"You are a medical triage assistant watching a call in progress between a Caller and an Agent.
Return ONLY a JSON object with the fields you can determine so far:
{"patientName": "", "age": 0, "sex": "M" | "F", "symptoms": [], "riskFlags": [],
 "triageLevel": "HIGH" | "MED" | "LOW", "reasonShort": "", "chiefComplaint": "",
 "summary": "", "recommendation": ""}"#;

fn or_none(items: Vec<String>) -> String {
    if items.is_empty() {
        "None on record".to_string()
    } else {
        items.join("; ")
    }
}

/// Instructions for the end-of-call extraction. A returning patient's record is included so
/// the model updates it rather than starting over.
pub fn build_extraction_prompt(existing: Option<&PatientContext>) -> String {
    let mut prompt = String::from(
        "You are a medical analyst completing post-call processing for a patient triage phone call.\n\n",
    );
    match existing {
        Some(p) => {
            prompt.push_str("EXISTING PATIENT RECORD (matched by caller phone number):\n");
            prompt.push_str(&format!(
                "  Name: {}\n  Age: {}\n  Sex: {}\n",
                p.name.as_deref().unwrap_or("Unknown"),
                p.age.map(|a| a.to_string()).unwrap_or_else(|| "Unknown".into()),
                p.sex.map(|s| s.as_str()).unwrap_or("Unknown"),
            ));
            prompt.push_str(&format!("  Allergies: {}\n", or_none(p.allergies.clone())));
            prompt.push_str(&format!(
                "  Conditions: {}\n",
                or_none(
                    p.conditions
                        .iter()
                        .map(|c| format!("{} ({})", c.name, c.status))
                        .collect()
                )
            ));
            prompt.push_str(&format!(
                "  Medications: {}\n",
                or_none(
                    p.medications
                        .iter()
                        .map(|m| format!("{} {} {}", m.name, m.dosage, m.frequency))
                        .collect()
                )
            ));
            prompt.push_str(&format!(
                "  Prior episodes: {}\n\n",
                or_none(p.prior_episodes.clone())
            ));
            prompt.push_str(
                "Update this record from the transcript. Keep existing values unless the transcript \
                 gives new information, add newly mentioned items to the lists, and never invent data.\n\n",
            );
        }
        None => prompt.push_str(
            "NEW PATIENT: no prior record for this phone number. Fill in only what the transcript \
             states explicitly and leave everything else null.\n\n",
        ),
    }
    prompt.push_str(EXTRACTION_SCHEMA);
    prompt
}

pub fn build_live_prompt() -> &'static str {
    LIVE_SCHEMA
}
