//! Constants used throughout the triage core crate.

use std::time::Duration;

/// Caller number used until the provider tells us the real one.
pub const PLACEHOLDER_PHONE: &str = "***-***-****";

/// Reason written on a call record before enrichment has run.
pub const PENDING_ANALYSIS_REASON: &str = "Pending AI analysis";

/// Reason used when the collaborator omits one.
pub const DEFAULT_COMPLETED_REASON: &str = "Call completed";

/// Agent identifier stamped on call records when none is configured.
pub const DEFAULT_AGENT_ID: &str = "a1";

/// Ended reason used when an end-of-call report does not carry one.
pub const DEFAULT_ENDED_REASON: &str = "completed";

/// Ended reason used when a status update does not carry one.
pub const UNKNOWN_ENDED_REASON: &str = "unknown";

/// Upper bound on a single collaborator request.
pub const DEFAULT_ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(25);

/// How long a call ended by a status update waits for its end-of-call report.
pub const DEFAULT_REPORT_GRACE: Duration = Duration::from_secs(30);

/// Completed calls kept in memory for the live dashboard.
pub const DEFAULT_COMPLETED_RETENTION: usize = 200;

/// Transcripts shorter than this are never sent to the collaborator.
pub const MIN_ANALYZABLE_LINES: usize = 2;

/// Seconds between synthetic timestamps when a transcript is rebuilt from a full snapshot.
pub const SYNC_LINE_SPACING_SECS: u64 = 5;

/// Per-viewer event buffer before a slow viewer is dropped.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Default pattern matched against the provider's ended reason.
pub const DEFAULT_ESCALATION_REASON_PATTERN: &str = r"transfer|forward|handoff|hand-off";

/// Default pattern matched against the lower-cased transcript text.
pub const DEFAULT_ESCALATION_TRANSCRIPT_PATTERN: &str =
    r"transfer initiated|forwarded|handed off|transferring";

/// Number of encounters returned with a patient's details.
pub const PATIENT_ENCOUNTER_LIMIT: usize = 10;

/// Number of timeline events returned with a patient's details.
pub const PATIENT_TIMELINE_LIMIT: usize = 20;

/// Default page size for call history.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
