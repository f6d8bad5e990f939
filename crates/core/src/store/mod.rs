//! Persistence contract for calls, patients, encounters and timeline events.
//!
//! The merge rules live here as pure functions on the record types, and every backend applies
//! them the same way:
//!
//! - Patients are keyed by phone number. Scalars take the incoming value when present, and a
//!   clinical list is only replaced by a non-empty incoming list.
//! - A call stub is insert-only: once a row exists a late stub write never touches it.
//! - Finalizing a call overwrites its enrichment fields but keeps the stored caller phone when
//!   the incoming one is the placeholder, and keeps the stored patient link when none is given.
//!
//! Two backends are provided: [`MemoryStore`] and [`SqliteStore`].

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::clinical::{Condition, EncounterSymptom, Medication};
use crate::constants::PLACEHOLDER_PHONE;
use crate::transcript::TranscriptLine;
use crate::TriageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use triage_types::{CallStatus, PatientStatus, Sex, TriageLevel};
use utoipa::ToSchema;

/// Storage operations the engine and the HTTP surface depend on.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Creates or merges the patient with this phone number; returns the patient id.
    async fn upsert_patient_by_phone(&self, upsert: PatientUpsert) -> TriageResult<String>;

    async fn upsert_call_stub(&self, stub: CallStub) -> TriageResult<()>;

    async fn finalize_call(&self, fin: CallFinalization) -> TriageResult<()>;

    async fn create_encounter(&self, encounter: NewEncounter) -> TriageResult<String>;

    async fn create_timeline_event(&self, event: NewTimelineEvent) -> TriageResult<String>;

    async fn get_patient_context_by_phone(&self, phone: &str)
        -> TriageResult<Option<PatientContext>>;

    async fn get_call(&self, call_id: &str) -> TriageResult<Option<StoredCall>>;

    /// Ended calls, newest first.
    async fn list_calls(&self, limit: usize) -> TriageResult<Vec<StoredCall>>;

    /// Returns `false` when no call has this id.
    async fn update_call_status(&self, call_id: &str, status: CallStatus) -> TriageResult<bool>;

    /// Patients, most recent contact first.
    async fn list_patients(&self) -> TriageResult<Vec<PatientRecord>>;

    async fn get_patient_details(&self, patient_id: &str) -> TriageResult<Option<PatientDetails>>;
}

/// Incoming patient data. Absent scalars and empty lists mean "no new information".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientUpsert {
    pub phone: String,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<Sex>,
    pub primary_doctor: Option<String>,
    pub allergies: Vec<String>,
    pub risk_level: Option<TriageLevel>,
    pub patient_status: Option<PatientStatus>,
    pub conditions: Vec<Condition>,
    pub medications: Vec<Medication>,
    pub prior_episodes: Vec<String>,
    pub last_contact: Option<DateTime<Utc>>,
}

impl PatientUpsert {
    pub fn phone_only(phone: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: String,
    /// Human-readable record number.
    pub mrn: String,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<Sex>,
    pub phone: String,
    pub primary_doctor: Option<String>,
    pub allergies: Vec<String>,
    pub risk_level: TriageLevel,
    pub status: PatientStatus,
    pub conditions: Vec<Condition>,
    pub medications: Vec<Medication>,
    pub prior_episodes: Vec<String>,
    pub last_contact: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

fn non_empty_or<T>(incoming: Vec<T>, stored: Vec<T>) -> Vec<T> {
    if incoming.is_empty() {
        stored
    } else {
        incoming
    }
}

impl PatientRecord {
    /// First contact from a phone number.
    pub fn create(upsert: PatientUpsert, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            mrn: generate_mrn(now),
            name: upsert.name,
            age: upsert.age,
            sex: upsert.sex,
            phone: upsert.phone,
            primary_doctor: upsert.primary_doctor,
            allergies: upsert.allergies,
            risk_level: upsert.risk_level.unwrap_or_default(),
            status: upsert.patient_status.unwrap_or_default(),
            conditions: upsert.conditions,
            medications: upsert.medications,
            prior_episodes: upsert.prior_episodes,
            last_contact: upsert.last_contact.unwrap_or(now),
            last_updated: now,
        }
    }

    /// Applies a later contact without erasing anything already known.
    pub fn merged(self, upsert: PatientUpsert, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            mrn: self.mrn,
            name: upsert.name.or(self.name),
            age: upsert.age.or(self.age),
            sex: upsert.sex.or(self.sex),
            phone: self.phone,
            primary_doctor: upsert.primary_doctor.or(self.primary_doctor),
            allergies: non_empty_or(upsert.allergies, self.allergies),
            risk_level: upsert.risk_level.unwrap_or(self.risk_level),
            status: upsert.patient_status.unwrap_or(self.status),
            conditions: non_empty_or(upsert.conditions, self.conditions),
            medications: non_empty_or(upsert.medications, self.medications),
            prior_episodes: non_empty_or(upsert.prior_episodes, self.prior_episodes),
            last_contact: upsert.last_contact.unwrap_or(now),
            last_updated: now,
        }
    }

    pub fn context(&self) -> PatientContext {
        PatientContext {
            id: self.id.clone(),
            name: self.name.clone(),
            age: self.age,
            sex: self.sex,
            allergies: self.allergies.clone(),
            conditions: self.conditions.clone(),
            medications: self.medications.clone(),
            prior_episodes: self.prior_episodes.clone(),
        }
    }
}

/// `MRN-` followed by the last six base-36 digits of the epoch milliseconds, upper case.
pub fn generate_mrn(now: DateTime<Utc>) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut n = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let mut digits = Vec::new();
    loop {
        digits.push(DIGITS[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    let tail: String = digits
        .iter()
        .take(6)
        .rev()
        .map(|&d| char::from(d))
        .collect();
    format!("MRN-{tail}")
}

/// What the summarizer is told about a returning patient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientContext {
    pub id: String,
    pub name: Option<String>,
    pub age: Option<u32>,
    pub sex: Option<Sex>,
    pub allergies: Vec<String>,
    pub conditions: Vec<Condition>,
    pub medications: Vec<Medication>,
    pub prior_episodes: Vec<String>,
}

/// Row written when a call starts.
#[derive(Debug, Clone, PartialEq)]
pub struct CallStub {
    pub id: String,
    pub agent_id: String,
    pub caller_phone: String,
    pub created_at: DateTime<Utc>,
}

/// Full call record written at end-of-call and again after enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFinalization {
    pub id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub caller_phone: String,
    pub duration_sec: u64,
    pub status: CallStatus,
    pub triage_level: TriageLevel,
    pub reason_short: String,
    pub chief_complaint: String,
    pub symptoms: Vec<String>,
    pub risk_flags: Vec<String>,
    pub summary: String,
    pub recommendation: String,
    pub transcript: Vec<TranscriptLine>,
    pub patient_id: Option<String>,
}

/// A call as persisted, with the linked patient's demographics joined in on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredCall {
    pub id: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_sec: u64,
    pub caller_phone: String,
    pub status: CallStatus,
    pub triage_level: TriageLevel,
    pub reason_short: String,
    pub chief_complaint: String,
    pub symptoms: Vec<String>,
    pub risk_flags: Vec<String>,
    pub summary: String,
    pub recommendation: String,
    pub transcript: Vec<TranscriptLine>,
    pub patient_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_sex: Option<Sex>,
}

impl StoredCall {
    pub fn from_stub(stub: CallStub) -> Self {
        Self {
            id: stub.id,
            agent_id: stub.agent_id,
            created_at: stub.created_at,
            ended_at: None,
            duration_sec: 0,
            caller_phone: stub.caller_phone,
            status: CallStatus::Live,
            triage_level: TriageLevel::default(),
            reason_short: String::new(),
            chief_complaint: String::new(),
            symptoms: Vec::new(),
            risk_flags: Vec::new(),
            summary: String::new(),
            recommendation: String::new(),
            transcript: Vec::new(),
            patient_id: None,
            patient_name: None,
            patient_age: None,
            patient_sex: None,
        }
    }

    /// Insert-or-update of a finalized call onto whatever row already exists.
    pub fn finalized(
        existing: Option<StoredCall>,
        fin: CallFinalization,
        now: DateTime<Utc>,
    ) -> Self {
        let (created_at, agent_id, caller_phone, patient_id) = match existing {
            Some(row) => (
                row.created_at,
                row.agent_id,
                if fin.caller_phone == PLACEHOLDER_PHONE {
                    row.caller_phone
                } else {
                    fin.caller_phone
                },
                fin.patient_id.or(row.patient_id),
            ),
            None => (fin.created_at, fin.agent_id, fin.caller_phone, fin.patient_id),
        };
        Self {
            id: fin.id,
            agent_id,
            created_at,
            ended_at: Some(now),
            duration_sec: fin.duration_sec,
            caller_phone,
            status: fin.status,
            triage_level: fin.triage_level,
            reason_short: fin.reason_short,
            chief_complaint: fin.chief_complaint,
            symptoms: fin.symptoms,
            risk_flags: fin.risk_flags,
            summary: fin.summary,
            recommendation: fin.recommendation,
            transcript: fin.transcript,
            patient_id,
            patient_name: None,
            patient_age: None,
            patient_sex: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEncounter {
    pub patient_id: String,
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
    pub chief_complaint: String,
    pub symptoms: Vec<EncounterSymptom>,
    pub triage_level: TriageLevel,
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    pub id: String,
    pub patient_id: String,
    pub call_id: String,
    /// Always `call` for encounters derived from a phone call.
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub chief_complaint: String,
    pub symptoms: Vec<EncounterSymptom>,
    pub triage_level: TriageLevel,
    pub outcome: String,
}

impl Encounter {
    pub fn from_new(new: NewEncounter) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            patient_id: new.patient_id,
            call_id: new.call_id,
            kind: "call".to_string(),
            timestamp: new.timestamp,
            chief_complaint: new.chief_complaint,
            symptoms: new.symptoms,
            triage_level: new.triage_level,
            outcome: new.outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTimelineEvent {
    pub patient_id: String,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub id: String,
    pub patient_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub description: String,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

impl TimelineEvent {
    pub fn from_new(new: NewTimelineEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            patient_id: new.patient_id,
            kind: new.kind,
            timestamp: new.timestamp,
            title: new.title,
            description: new.description,
            metadata: new.metadata,
        }
    }
}

/// A patient record with its most recent encounters and timeline, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PatientDetails {
    pub patient: PatientRecord,
    pub encounters: Vec<Encounter>,
    pub timeline: Vec<TimelineEvent>,
}
