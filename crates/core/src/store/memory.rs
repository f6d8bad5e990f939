//! In-process [`CallStore`] backend.
//!
//! Rows live in plain maps behind one mutex, with the same merge and join rules as the SQLite
//! backend. Nothing survives a restart.

use super::{
    CallFinalization, CallStore, CallStub, Encounter, NewEncounter, NewTimelineEvent,
    PatientContext, PatientDetails, PatientRecord, PatientUpsert, StoredCall, TimelineEvent,
};
use crate::constants::{PATIENT_ENCOUNTER_LIMIT, PATIENT_TIMELINE_LIMIT};
use crate::TriageResult;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use triage_types::CallStatus;

#[derive(Debug, Default)]
struct Tables {
    calls: HashMap<String, StoredCall>,
    patients: HashMap<String, PatientRecord>,
    encounters: Vec<Encounter>,
    timeline: Vec<TimelineEvent>,
}

impl Tables {
    /// Phone numbers are the patient key; at most one record matches.
    fn patient_by_phone(&self, phone: &str) -> Option<&PatientRecord> {
        self.patients.values().find(|p| p.phone == phone)
    }

    /// Copies the linked patient's name, age and sex onto a call row, as the SQL join does.
    fn joined(&self, call: &StoredCall) -> StoredCall {
        let mut call = call.clone();
        if let Some(p) = call.patient_id.as_ref().and_then(|id| self.patients.get(id)) {
            call.patient_name = p.name.clone();
            call.patient_age = p.age;
            call.patient_sex = p.sex;
        }
        call
    }
}

/// Store kept entirely in process memory. Used when no database path is configured and as
/// the reference backend in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    ///
    /// # Returns
    ///
    /// A store with no calls, patients, encounters or timeline events.
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of encounters written so far, across all patients.
    pub fn encounter_count(&self) -> usize {
        self.tables().encounters.len()
    }

    /// Number of timeline events written so far, across all patients.
    pub fn timeline_count(&self) -> usize {
        self.tables().timeline.len()
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn upsert_patient_by_phone(&self, upsert: PatientUpsert) -> TriageResult<String> {
        let now = Utc::now();
        let mut tables = self.tables();
        let record = match tables.patient_by_phone(&upsert.phone).cloned() {
            Some(existing) => existing.merged(upsert, now),
            None => {
                let created = PatientRecord::create(upsert, now);
                tracing::info!(patient_id = %created.id, mrn = %created.mrn, "created patient");
                created
            }
        };
        let id = record.id.clone();
        tables.patients.insert(id.clone(), record);
        Ok(id)
    }

    async fn upsert_call_stub(&self, stub: CallStub) -> TriageResult<()> {
        self.tables()
            .calls
            .entry(stub.id.clone())
            .or_insert_with(|| StoredCall::from_stub(stub));
        Ok(())
    }

    async fn finalize_call(&self, fin: CallFinalization) -> TriageResult<()> {
        let mut tables = self.tables();
        let existing = tables.calls.remove(&fin.id);
        let row = StoredCall::finalized(existing, fin, Utc::now());
        tables.calls.insert(row.id.clone(), row);
        Ok(())
    }

    async fn create_encounter(&self, encounter: NewEncounter) -> TriageResult<String> {
        let encounter = Encounter::from_new(encounter);
        let id = encounter.id.clone();
        self.tables().encounters.push(encounter);
        Ok(id)
    }

    async fn create_timeline_event(&self, event: NewTimelineEvent) -> TriageResult<String> {
        let event = TimelineEvent::from_new(event);
        let id = event.id.clone();
        self.tables().timeline.push(event);
        Ok(id)
    }

    async fn get_patient_context_by_phone(
        &self,
        phone: &str,
    ) -> TriageResult<Option<PatientContext>> {
        Ok(self.tables().patient_by_phone(phone).map(PatientRecord::context))
    }

    async fn get_call(&self, call_id: &str) -> TriageResult<Option<StoredCall>> {
        let tables = self.tables();
        Ok(tables.calls.get(call_id).map(|c| tables.joined(c)))
    }

    async fn list_calls(&self, limit: usize) -> TriageResult<Vec<StoredCall>> {
        let tables = self.tables();
        let mut calls: Vec<_> = tables
            .calls
            .values()
            .filter(|c| c.status != CallStatus::Live)
            .map(|c| tables.joined(c))
            .collect();
        calls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        calls.truncate(limit);
        Ok(calls)
    }

    async fn update_call_status(&self, call_id: &str, status: CallStatus) -> TriageResult<bool> {
        match self.tables().calls.get_mut(call_id) {
            Some(call) => {
                call.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_patients(&self) -> TriageResult<Vec<PatientRecord>> {
        let mut patients: Vec<_> = self.tables().patients.values().cloned().collect();
        patients.sort_by(|a, b| b.last_contact.cmp(&a.last_contact));
        Ok(patients)
    }

    async fn get_patient_details(&self, patient_id: &str) -> TriageResult<Option<PatientDetails>> {
        let tables = self.tables();
        let Some(patient) = tables.patients.get(patient_id).cloned() else {
            return Ok(None);
        };

        let mut encounters: Vec<_> = tables
            .encounters
            .iter()
            .filter(|e| e.patient_id == patient_id)
            .cloned()
            .collect();
        encounters.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        encounters.truncate(PATIENT_ENCOUNTER_LIMIT);

        let mut timeline: Vec<_> = tables
            .timeline
            .iter()
            .filter(|e| e.patient_id == patient_id)
            .cloned()
            .collect();
        timeline.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        timeline.truncate(PATIENT_TIMELINE_LIMIT);

        Ok(Some(PatientDetails {
            patient,
            encounters,
            timeline,
        }))
    }
}
