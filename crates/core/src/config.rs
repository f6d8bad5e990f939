//! Engine runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the registry, the
//! finalization pipeline and the ingress router. Nothing in this crate reads environment
//! variables while handling a webhook; the helpers at the bottom of this module turn the raw
//! optional strings the binary reads into validated values.

use crate::constants::{
    DEFAULT_AGENT_ID, DEFAULT_BROADCAST_CAPACITY, DEFAULT_COMPLETED_RETENTION,
    DEFAULT_ENRICHMENT_TIMEOUT, DEFAULT_ESCALATION_REASON_PATTERN,
    DEFAULT_ESCALATION_TRANSCRIPT_PATTERN, DEFAULT_REPORT_GRACE,
};
use crate::{TriageError, TriageResult};
use regex::{Regex, RegexBuilder};
use std::time::Duration;
use triage_types::NonEmptyText;

/// Keyword rules that mark a call as escalated (transferred to a human).
///
/// The default vocabulary is illustrative rather than authoritative, which is why both patterns
/// can be replaced from configuration.
#[derive(Clone, Debug)]
pub struct EscalationRules {
    ended_reason: Regex,
    transcript: Regex,
}

impl EscalationRules {
    /// Compiles both patterns case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::EscalationPattern` if either pattern is not a valid regex.
    pub fn new(ended_reason: &str, transcript: &str) -> TriageResult<Self> {
        Ok(Self {
            ended_reason: RegexBuilder::new(ended_reason)
                .case_insensitive(true)
                .build()?,
            transcript: RegexBuilder::new(transcript)
                .case_insensitive(true)
                .build()?,
        })
    }

    /// True when the ended reason or any transcript text matches the transfer vocabulary.
    pub fn is_escalation<'a>(
        &self,
        ended_reason: &str,
        transcript: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        if self.ended_reason.is_match(ended_reason) {
            return true;
        }
        let text = transcript
            .into_iter()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        self.transcript.is_match(&text)
    }

    /// The built-in transfer vocabulary.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::EscalationPattern` if the built-in patterns fail to compile.
    pub fn standard() -> TriageResult<Self> {
        Self::new(
            DEFAULT_ESCALATION_REASON_PATTERN,
            DEFAULT_ESCALATION_TRANSCRIPT_PATTERN,
        )
    }
}

/// Engine configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    escalation: EscalationRules,
    enrichment_timeout: Duration,
    live_summary_interval: usize,
    broadcast_capacity: usize,
    report_grace: Duration,
    completed_retention: usize,
    agent_id: NonEmptyText,
    assistant_id: Option<String>,
}

impl EngineConfig {
    /// Create a new `EngineConfig`.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidConfig` if the enrichment timeout is zero or the agent id
    /// is blank.
    pub fn new(
        escalation: EscalationRules,
        enrichment_timeout: Duration,
        agent_id: &str,
    ) -> TriageResult<Self> {
        if enrichment_timeout.is_zero() {
            return Err(TriageError::InvalidConfig {
                key: "enrichment_timeout",
                message: "must be greater than zero".into(),
            });
        }
        let agent_id = NonEmptyText::new(agent_id).map_err(|_| TriageError::InvalidConfig {
            key: "agent_id",
            message: "cannot be empty".into(),
        })?;

        Ok(Self {
            escalation,
            enrichment_timeout,
            live_summary_interval: 0,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            report_grace: DEFAULT_REPORT_GRACE,
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            agent_id,
            assistant_id: None,
        })
    }

    /// Configuration with every built-in default.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`EscalationRules::standard`] or [`EngineConfig::new`].
    pub fn standard() -> TriageResult<Self> {
        Self::new(
            EscalationRules::standard()?,
            DEFAULT_ENRICHMENT_TIMEOUT,
            DEFAULT_AGENT_ID,
        )
    }

    /// Enables live summaries every `lines` new transcript lines (0 disables them).
    pub fn with_live_summary_interval(mut self, lines: usize) -> Self {
        self.live_summary_interval = lines;
        self
    }

    pub fn with_broadcast_capacity(mut self, capacity: usize) -> TriageResult<Self> {
        if capacity == 0 {
            return Err(TriageError::InvalidConfig {
                key: "broadcast_capacity",
                message: "must be at least 1".into(),
            });
        }
        self.broadcast_capacity = capacity;
        Ok(self)
    }

    /// How long a call ended by a status update waits for the end-of-call report before it is
    /// finalized from in-memory data alone.
    pub fn with_report_grace(mut self, grace: Duration) -> Self {
        self.report_grace = grace;
        self
    }

    /// Caps the completed calls kept in memory (and sent in every `full-state` snapshot).
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidConfig` for zero.
    pub fn with_completed_retention(mut self, calls: usize) -> TriageResult<Self> {
        if calls == 0 {
            return Err(TriageError::InvalidConfig {
                key: "completed_retention",
                message: "must be at least 1".into(),
            });
        }
        self.completed_retention = calls;
        Ok(self)
    }

    pub fn with_assistant_id(mut self, assistant_id: Option<String>) -> Self {
        self.assistant_id = assistant_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn escalation(&self) -> &EscalationRules {
        &self.escalation
    }

    pub fn enrichment_timeout(&self) -> Duration {
        self.enrichment_timeout
    }

    pub fn live_summary_interval(&self) -> usize {
        self.live_summary_interval
    }

    pub fn broadcast_capacity(&self) -> usize {
        self.broadcast_capacity
    }

    pub fn report_grace(&self) -> Duration {
        self.report_grace
    }

    pub fn completed_retention(&self) -> usize {
        self.completed_retention
    }

    pub fn agent_id(&self) -> &str {
        self.agent_id.as_str()
    }

    pub fn assistant_id(&self) -> Option<&str> {
        self.assistant_id.as_deref()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a whole number of seconds from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns `default`.
///
/// # Errors
///
/// Returns `TriageError::InvalidConfig` naming `key` when the value is not a whole number.
pub fn duration_from_env_value(
    key: &'static str,
    value: Option<String>,
    default: Duration,
) -> TriageResult<Duration> {
    match non_blank(value) {
        None => Ok(default),
        Some(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| TriageError::InvalidConfig {
                key,
                message: format!("{v:?} is not a number of seconds: {e}"),
            }),
    }
}

/// Parse a count from an optional string value, defaulting when absent or blank.
pub fn usize_from_env_value(
    key: &'static str,
    value: Option<String>,
    default: usize,
) -> TriageResult<usize> {
    match non_blank(value) {
        None => Ok(default),
        Some(v) => v.parse::<usize>().map_err(|e| TriageError::InvalidConfig {
            key,
            message: format!("{v:?} is not a count: {e}"),
        }),
    }
}

/// Build escalation rules from optional pattern overrides.
///
/// # Returns
///
/// Rules built from the overrides, with the built-in pattern standing in for any override
/// that is absent or blank.
pub fn escalation_rules_from_env_values(
    ended_reason: Option<String>,
    transcript: Option<String>,
) -> TriageResult<EscalationRules> {
    let ended_reason =
        non_blank(ended_reason).unwrap_or_else(|| DEFAULT_ESCALATION_REASON_PATTERN.to_string());
    let transcript = non_blank(transcript)
        .unwrap_or_else(|| DEFAULT_ESCALATION_TRANSCRIPT_PATTERN.to_string());
    EscalationRules::new(&ended_reason, &transcript)
}
