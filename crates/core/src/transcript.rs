//! Transcript normalization and reconciliation.
//!
//! The provider describes the same conversation in two shapes: incremental conversation
//! updates use `{ role, content }`, the final call artifact uses `{ role, message }`. Both are
//! accepted as [`RawMessage`] and resolved to [`TranscriptLine`] here, so nothing downstream
//! ever sees the raw shapes.
//!
//! Reconciliation is full-sync: the provider resends the whole conversation on every update,
//! so a candidate replaces the current transcript wholesale. The one exception is the
//! data-loss guard: a candidate that normalized to nothing never replaces a non-empty
//! transcript.

use crate::constants::SYNC_LINE_SPACING_SECS;
use crate::wire;
use serde::{Deserialize, Serialize};
use triage_types::{NonEmptyText, Speaker};
use utoipa::ToSchema;

/// One utterance of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TranscriptLine {
    /// Offset from call start, `m:ss`.
    pub timestamp: String,
    pub speaker: Speaker,
    #[schema(value_type = String)]
    pub text: NonEmptyText,
}

impl TranscriptLine {
    pub fn new(timestamp: impl Into<String>, speaker: Speaker, text: NonEmptyText) -> Self {
        Self {
            timestamp: timestamp.into(),
            speaker,
            text,
        }
    }
}

/// A provider message in either known wire shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "wire::lenient_string")]
    pub role: String,
    /// Conversation-update shape. Multipart content is flattened to its text parts.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::lenient_text"
    )]
    pub content: Option<String>,
    /// Final artifact shape.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::lenient_text"
    )]
    pub message: Option<String>,
}

impl RawMessage {
    pub fn with_content(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            message: None,
        }
    }

    pub fn with_message(role: &str, message: &str) -> Self {
        Self {
            role: role.to_string(),
            content: None,
            message: Some(message.to_string()),
        }
    }

    /// The trimmed text of whichever field is populated, preferring `content`.
    pub fn text(&self) -> Option<&str> {
        [self.content.as_deref(), self.message.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|t| !t.is_empty())
    }
}

/// Formats a number of seconds as `m:ss`.
pub fn format_offset(total_secs: u64) -> String {
    format!("{}:{:02}", total_secs / 60, total_secs % 60)
}

/// Resolves raw provider messages into canonical transcript lines.
///
/// System messages and messages without text are dropped. Timestamps are synthesized at an
/// even spacing per kept line because the snapshot shapes carry no reliable offsets.
pub fn normalize(raw: &[RawMessage]) -> Vec<TranscriptLine> {
    raw.iter()
        .filter(|m| m.role != "system")
        .filter_map(|m| m.text().and_then(|t| NonEmptyText::new(t).ok()).map(|t| (m, t)))
        .enumerate()
        .map(|(idx, (m, text))| {
            TranscriptLine::new(
                format_offset(idx as u64 * SYNC_LINE_SPACING_SECS),
                Speaker::from_role(&m.role),
                text,
            )
        })
        .collect()
}

/// What reconciliation decided for a candidate transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Candidate was empty while the current transcript is not; keep the current one.
    KeepExisting,
    /// Candidate has strictly more lines; replace.
    Grow,
    /// Same or fewer lines; replace anyway (full-sync semantics).
    Replace,
}

pub fn decide(existing_len: usize, candidate_len: usize) -> MergeDecision {
    if candidate_len == 0 && existing_len > 0 {
        MergeDecision::KeepExisting
    } else if candidate_len > existing_len {
        MergeDecision::Grow
    } else {
        MergeDecision::Replace
    }
}

/// Merges a candidate transcript into the current one without ever losing data to an empty
/// candidate.
pub fn reconcile(
    existing: Vec<TranscriptLine>,
    candidate: Vec<TranscriptLine>,
) -> Vec<TranscriptLine> {
    match decide(existing.len(), candidate.len()) {
        MergeDecision::KeepExisting => existing,
        MergeDecision::Grow | MergeDecision::Replace => candidate,
    }
}

/// Renders a transcript as plain text for the summarization collaborator.
pub fn render(lines: &[TranscriptLine]) -> String {
    lines
        .iter()
        .map(|l| format!("[{}] {}: {}", l.timestamp, l.speaker, l.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(speaker: Speaker, text: &str) -> TranscriptLine {
        TranscriptLine::new("0:00", speaker, NonEmptyText::new(text).unwrap())
    }

    #[test]
    fn normalize_accepts_both_wire_shapes() {
        let raw = vec![
            RawMessage::with_content("assistant", "How can I help?"),
            RawMessage::with_message("user", "  My chest hurts  "),
        ];
        let lines = normalize(&raw);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].speaker, Speaker::Agent);
        assert_eq!(lines[0].text.as_str(), "How can I help?");
        assert_eq!(lines[1].speaker, Speaker::Caller);
        assert_eq!(lines[1].text.as_str(), "My chest hurts");
    }

    #[test]
    fn normalize_prefers_content_and_falls_back_to_message() {
        let both = RawMessage {
            role: "user".into(),
            content: Some("from content".into()),
            message: Some("from message".into()),
        };
        let blank_content = RawMessage {
            role: "user".into(),
            content: Some("   ".into()),
            message: Some("from message".into()),
        };
        let lines = normalize(&[both, blank_content]);
        assert_eq!(lines[0].text.as_str(), "from content");
        assert_eq!(lines[1].text.as_str(), "from message");
    }

    #[test]
    fn normalize_drops_system_and_empty_messages() {
        let raw = vec![
            RawMessage::with_content("system", "You are a triage assistant"),
            RawMessage::with_content("user", "   "),
            RawMessage {
                role: "assistant".into(),
                content: None,
                message: None,
            },
            RawMessage::with_content("bot", "Hello"),
        ];
        let lines = normalize(&raw);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].speaker, Speaker::Agent);
        assert_eq!(lines[0].timestamp, "0:00");
    }

    #[test]
    fn normalize_spaces_timestamps_per_kept_line() {
        let raw: Vec<_> = (0..14)
            .map(|i| RawMessage::with_content("user", &format!("line {i}")))
            .collect();
        let lines = normalize(&raw);
        assert_eq!(lines[1].timestamp, "0:05");
        assert_eq!(lines[12].timestamp, "1:00");
        assert_eq!(lines[13].timestamp, "1:05");
    }

    #[test]
    fn empty_candidate_never_erases_existing_transcript() {
        let existing = vec![line(Speaker::Agent, "Hi"), line(Speaker::Caller, "Hello")];
        let kept = reconcile(existing.clone(), normalize(&[RawMessage::default()]));
        assert_eq!(kept, existing);
    }

    #[test]
    fn candidate_replaces_when_at_least_as_long() {
        let existing = vec![line(Speaker::Agent, "Hi")];
        let candidate = vec![line(Speaker::Agent, "Hi there"), line(Speaker::Caller, "Hey")];
        assert_eq!(decide(1, 2), MergeDecision::Grow);
        assert_eq!(reconcile(existing, candidate.clone()), candidate);
    }

    #[test]
    fn shorter_non_empty_candidate_still_replaces() {
        let existing = vec![line(Speaker::Agent, "a"), line(Speaker::Caller, "b")];
        let candidate = vec![line(Speaker::Agent, "a, corrected")];
        assert_eq!(decide(2, 1), MergeDecision::Replace);
        assert_eq!(reconcile(existing, candidate.clone()), candidate);
    }

    #[test]
    fn reconcile_from_empty_transcript_accepts_candidate() {
        let candidate = normalize(&[RawMessage::with_message("user", "rebuilt after restart")]);
        assert_eq!(reconcile(Vec::new(), candidate.clone()), candidate);
        assert_eq!(decide(0, 0), MergeDecision::Replace);
    }

    #[test]
    fn format_offset_pads_seconds() {
        assert_eq!(format_offset(0), "0:00");
        assert_eq!(format_offset(65), "1:05");
        assert_eq!(format_offset(600), "10:00");
    }

    #[test]
    fn render_labels_speakers() {
        let text = render(&[line(Speaker::Agent, "Hi"), line(Speaker::Caller, "Help")]);
        assert_eq!(text, "[0:00] Agent: Hi\n[0:00] Caller: Help");
    }
}
