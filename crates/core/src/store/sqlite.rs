use super::{
    CallFinalization, CallStore, CallStub, Encounter, NewEncounter, NewTimelineEvent,
    PatientContext, PatientDetails, PatientRecord, PatientUpsert, StoredCall, TimelineEvent,
};
use crate::constants::{PATIENT_ENCOUNTER_LIMIT, PATIENT_TIMELINE_LIMIT};
use crate::{TriageError, TriageResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use triage_types::{CallStatus, TextError};

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_initial.sql"))];

const CALL_SELECT: &str = "SELECT c.id, c.agent_id, c.created_at, c.ended_at, c.duration_sec,
        c.caller_phone, c.status, c.triage_level, c.reason_short, c.chief_complaint,
        c.symptoms, c.risk_flags, c.summary, c.recommendation, c.transcript, c.patient_id,
        p.name, p.age, p.sex
     FROM calls c LEFT JOIN patients p ON c.patient_id = p.id";

const PATIENT_SELECT: &str = "SELECT id, mrn, name, age, sex, phone, primary_doctor, allergies,
        risk_level, status, conditions, medications, prior_episodes, last_contact, last_updated
     FROM patients";

/// SQLite-backed store. All statements run on the blocking pool behind one connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and bring its schema up to date.
    pub fn open(path: &Path) -> TriageResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> TriageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> TriageResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> TriageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> TriageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await?
    }
}

fn run_migrations(conn: &Connection) -> TriageResult<()> {
    let current: i64 = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .ok()
        .flatten()
        .unwrap_or(0);

    for &(version, sql) in MIGRATIONS {
        if version > current {
            tracing::info!("Running migration v{version}");
            conn.execute_batch(sql)
                .map_err(|e| TriageError::MigrationFailed {
                    version,
                    reason: e.to_string(),
                })?;
        }
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> TriageResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn label_col<T: FromStr<Err = TextError>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_label_col<T: FromStr<Err = TextError>>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(text) => text.parse().map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        }),
    }
}

fn seconds_to_sql(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

fn row_to_call(row: &Row<'_>) -> rusqlite::Result<StoredCall> {
    Ok(StoredCall {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        created_at: row.get(2)?,
        ended_at: row.get(3)?,
        duration_sec: u64::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
        caller_phone: row.get(5)?,
        status: label_col(row, 6)?,
        triage_level: label_col(row, 7)?,
        reason_short: row.get(8)?,
        chief_complaint: row.get(9)?,
        symptoms: json_col(row, 10)?,
        risk_flags: json_col(row, 11)?,
        summary: row.get(12)?,
        recommendation: row.get(13)?,
        transcript: json_col(row, 14)?,
        patient_id: row.get(15)?,
        patient_name: row.get(16)?,
        patient_age: row.get(17)?,
        patient_sex: opt_label_col(row, 18)?,
    })
}

fn row_to_patient(row: &Row<'_>) -> rusqlite::Result<PatientRecord> {
    Ok(PatientRecord {
        id: row.get(0)?,
        mrn: row.get(1)?,
        name: row.get(2)?,
        age: row.get(3)?,
        sex: opt_label_col(row, 4)?,
        phone: row.get(5)?,
        primary_doctor: row.get(6)?,
        allergies: json_col(row, 7)?,
        risk_level: label_col(row, 8)?,
        status: label_col(row, 9)?,
        conditions: json_col(row, 10)?,
        medications: json_col(row, 11)?,
        prior_episodes: json_col(row, 12)?,
        last_contact: row.get(13)?,
        last_updated: row.get(14)?,
    })
}

fn find_patient_by_phone(conn: &Connection, phone: &str) -> TriageResult<Option<PatientRecord>> {
    let sql = format!("{PATIENT_SELECT} WHERE phone = ?1 LIMIT 1");
    Ok(conn
        .query_row(&sql, params![phone], row_to_patient)
        .optional()?)
}

fn write_patient(conn: &Connection, p: &PatientRecord) -> TriageResult<()> {
    conn.execute(
        "INSERT INTO patients (
            id, mrn, name, age, sex, phone, primary_doctor, allergies, risk_level, status,
            conditions, medications, prior_episodes, last_contact, last_updated
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            age = excluded.age,
            sex = excluded.sex,
            primary_doctor = excluded.primary_doctor,
            allergies = excluded.allergies,
            risk_level = excluded.risk_level,
            status = excluded.status,
            conditions = excluded.conditions,
            medications = excluded.medications,
            prior_episodes = excluded.prior_episodes,
            last_contact = excluded.last_contact,
            last_updated = excluded.last_updated",
        params![
            p.id,
            p.mrn,
            p.name,
            p.age,
            p.sex.map(|s| s.as_str()),
            p.phone,
            p.primary_doctor,
            to_json(&p.allergies)?,
            p.risk_level.as_str(),
            p.status.as_str(),
            to_json(&p.conditions)?,
            to_json(&p.medications)?,
            to_json(&p.prior_episodes)?,
            p.last_contact,
            p.last_updated,
        ],
    )?;
    Ok(())
}

fn find_call(conn: &Connection, call_id: &str) -> TriageResult<Option<StoredCall>> {
    let sql = format!("{CALL_SELECT} WHERE c.id = ?1 LIMIT 1");
    Ok(conn.query_row(&sql, params![call_id], row_to_call).optional()?)
}

fn write_call(conn: &Connection, c: &StoredCall) -> TriageResult<()> {
    conn.execute(
        "INSERT INTO calls (
            id, agent_id, created_at, ended_at, duration_sec, caller_phone, status, triage_level,
            reason_short, chief_complaint, symptoms, risk_flags, summary, recommendation,
            transcript, patient_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(id) DO UPDATE SET
            agent_id = excluded.agent_id,
            created_at = excluded.created_at,
            ended_at = excluded.ended_at,
            duration_sec = excluded.duration_sec,
            caller_phone = excluded.caller_phone,
            status = excluded.status,
            triage_level = excluded.triage_level,
            reason_short = excluded.reason_short,
            chief_complaint = excluded.chief_complaint,
            symptoms = excluded.symptoms,
            risk_flags = excluded.risk_flags,
            summary = excluded.summary,
            recommendation = excluded.recommendation,
            transcript = excluded.transcript,
            patient_id = excluded.patient_id",
        params![
            c.id,
            c.agent_id,
            c.created_at,
            c.ended_at,
            seconds_to_sql(c.duration_sec),
            c.caller_phone,
            c.status.as_str(),
            c.triage_level.as_str(),
            c.reason_short,
            c.chief_complaint,
            to_json(&c.symptoms)?,
            to_json(&c.risk_flags)?,
            c.summary,
            c.recommendation,
            to_json(&c.transcript)?,
            c.patient_id,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl CallStore for SqliteStore {
    async fn upsert_patient_by_phone(&self, upsert: PatientUpsert) -> TriageResult<String> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();
            let record = match find_patient_by_phone(&tx, &upsert.phone)? {
                Some(existing) => existing.merged(upsert, now),
                None => {
                    let created = PatientRecord::create(upsert, now);
                    tracing::info!(patient_id = %created.id, mrn = %created.mrn, "created patient");
                    created
                }
            };
            write_patient(&tx, &record)?;
            tx.commit()?;
            Ok(record.id)
        })
        .await
    }

    async fn upsert_call_stub(&self, stub: CallStub) -> TriageResult<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO calls (id, agent_id, created_at, caller_phone, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    stub.id,
                    stub.agent_id,
                    stub.created_at,
                    stub.caller_phone,
                    CallStatus::Live.as_str()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn finalize_call(&self, fin: CallFinalization) -> TriageResult<()> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let existing = find_call(&tx, &fin.id)?;
            let row = StoredCall::finalized(existing, fin, Utc::now());
            write_call(&tx, &row)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn create_encounter(&self, encounter: NewEncounter) -> TriageResult<String> {
        let e = Encounter::from_new(encounter);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO encounters (
                    id, patient_id, call_id, type, timestamp, chief_complaint, symptoms,
                    triage_level, outcome
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    e.id,
                    e.patient_id,
                    e.call_id,
                    e.kind,
                    e.timestamp,
                    e.chief_complaint,
                    to_json(&e.symptoms)?,
                    e.triage_level.as_str(),
                    e.outcome,
                ],
            )?;
            Ok(e.id)
        })
        .await
    }

    async fn create_timeline_event(&self, event: NewTimelineEvent) -> TriageResult<String> {
        let e = TimelineEvent::from_new(event);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO timeline_events (
                    id, patient_id, type, timestamp, title, description, metadata
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    e.id,
                    e.patient_id,
                    e.kind,
                    e.timestamp,
                    e.title,
                    e.description,
                    to_json(&e.metadata)?,
                ],
            )?;
            Ok(e.id)
        })
        .await
    }

    async fn get_patient_context_by_phone(
        &self,
        phone: &str,
    ) -> TriageResult<Option<PatientContext>> {
        let phone = phone.to_string();
        self.run(move |conn| {
            Ok(find_patient_by_phone(conn, &phone)?.map(|p| p.context()))
        })
        .await
    }

    async fn get_call(&self, call_id: &str) -> TriageResult<Option<StoredCall>> {
        let call_id = call_id.to_string();
        self.run(move |conn| find_call(conn, &call_id)).await
    }

    async fn list_calls(&self, limit: usize) -> TriageResult<Vec<StoredCall>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let sql = format!("{CALL_SELECT} WHERE c.status != ?1 ORDER BY c.created_at DESC LIMIT ?2");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![CallStatus::Live.as_str(), limit], row_to_call)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn update_call_status(&self, call_id: &str, status: CallStatus) -> TriageResult<bool> {
        let call_id = call_id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE calls SET status = ?1 WHERE id = ?2",
                params![status.as_str(), call_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list_patients(&self) -> TriageResult<Vec<PatientRecord>> {
        self.run(|conn| {
            let sql = format!("{PATIENT_SELECT} ORDER BY last_contact DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], row_to_patient)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn get_patient_details(&self, patient_id: &str) -> TriageResult<Option<PatientDetails>> {
        let patient_id = patient_id.to_string();
        self.run(move |conn| {
            let sql = format!("{PATIENT_SELECT} WHERE id = ?1");
            let Some(patient) = conn
                .query_row(&sql, params![patient_id], row_to_patient)
                .optional()?
            else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT id, patient_id, call_id, type, timestamp, chief_complaint, symptoms,
                        triage_level, outcome
                 FROM encounters WHERE patient_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )?;
            let encounters = stmt
                .query_map(
                    params![patient_id, PATIENT_ENCOUNTER_LIMIT as i64],
                    |row| {
                        Ok(Encounter {
                            id: row.get(0)?,
                            patient_id: row.get(1)?,
                            call_id: row.get(2)?,
                            kind: row.get(3)?,
                            timestamp: row.get(4)?,
                            chief_complaint: row.get(5)?,
                            symptoms: json_col(row, 6)?,
                            triage_level: label_col(row, 7)?,
                            outcome: row.get(8)?,
                        })
                    },
                )?
                .collect::<Result<Vec<_>, _>>()?;

            let mut stmt = conn.prepare(
                "SELECT id, patient_id, type, timestamp, title, description, metadata
                 FROM timeline_events WHERE patient_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )?;
            let timeline = stmt
                .query_map(
                    params![patient_id, PATIENT_TIMELINE_LIMIT as i64],
                    |row| {
                        Ok(TimelineEvent {
                            id: row.get(0)?,
                            patient_id: row.get(1)?,
                            kind: row.get(2)?,
                            timestamp: row.get(3)?,
                            title: row.get(4)?,
                            description: row.get(5)?,
                            metadata: json_col(row, 6)?,
                        })
                    },
                )?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(PatientDetails {
                patient,
                encounters,
                timeline,
            }))
        })
        .await
    }
}
