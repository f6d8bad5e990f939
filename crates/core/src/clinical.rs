//! Clinical list entries stored on patient records and encounters.

use serde::{Deserialize, Serialize};
use triage_types::{ConditionStatus, Severity};
use utoipa::ToSchema;

/// A diagnosed condition on a patient record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub name: String,
    /// `YYYY-MM-DD`, or empty when unknown.
    #[serde(default)]
    pub diagnosed_date: String,
    #[serde(default)]
    pub status: ConditionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub started_date: String,
}

/// A symptom as reported during one encounter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EncounterSymptom {
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub onset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
