//! Scripted triage conversation and the provider webhook payloads that replay it.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// `(role, text)` pairs, assistant first.
pub const CONVERSATION: &[(&str, &str)] = &[
    ("assistant", "Hello, you've reached the nurse triage line. What's going on today?"),
    ("user", "Hi, I'm Tom Reyes, I'm 58. I've had pressure in my chest since this morning."),
    ("assistant", "I'm sorry to hear that. Does the pressure spread to your arm, jaw or back?"),
    ("user", "A bit into my left arm. I'm also sweaty and a little short of breath."),
    ("assistant", "Do you have any heart conditions or take any regular medication?"),
    ("user", "High blood pressure. I take amlodipine 5mg once a day."),
    ("assistant", "Any allergies to medication?"),
    ("user", "Aspirin upsets my stomach but I'm not allergic as far as I know."),
];

pub const TRANSFER_LINE: (&str, &str) = (
    "assistant",
    "Given your symptoms I'm transferring you to a nurse right now. Please stay on the line.",
);

pub const CLOSING_LINE: (&str, &str) = (
    "assistant",
    "Please call emergency services if the pain gets worse. Take care.",
);

pub fn status_update(call_id: &str, phone: &str, status: &str) -> Value {
    json!({ "message": {
        "type": "status-update",
        "call": { "id": call_id, "status": status, "customer": { "number": phone } },
    }})
}

/// Conversation snapshot in the `{role, content}` shape.
pub fn conversation_update(call_id: &str, phone: &str, lines: &[(&str, &str)]) -> Value {
    let conversation: Vec<Value> = lines
        .iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect();
    json!({ "message": {
        "type": "conversation-update",
        "call": { "id": call_id, "customer": { "number": phone } },
        "conversation": conversation,
    }})
}

/// Final report; artifact messages use the `{role, message}` shape.
pub fn end_of_call_report(
    call_id: &str,
    phone: &str,
    lines: &[(&str, &str)],
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    ended_reason: &str,
) -> Value {
    let messages: Vec<Value> = lines
        .iter()
        .enumerate()
        .map(|(i, (role, message))| {
            json!({ "role": role, "message": message, "secondsFromStart": i * 15 })
        })
        .collect();
    let flattened: Vec<String> = lines
        .iter()
        .map(|(role, text)| {
            let who = if *role == "user" { "User" } else { "AI" };
            format!("{who}: {text}")
        })
        .collect();
    let duration = (ended_at - started_at).num_milliseconds() as f64 / 1000.0;

    json!({ "message": {
        "type": "end-of-call-report",
        "endedReason": ended_reason,
        "call": {
            "id": call_id,
            "customer": { "number": phone },
            "duration": duration,
            "startedAt": started_at.to_rfc3339(),
            "endedAt": ended_at.to_rfc3339(),
        },
        "artifact": {
            "messages": messages,
            "transcript": flattened.join("\n"),
        },
    }})
}

/// The full line list for a run, with the chosen ending.
pub fn script(transfer: bool) -> Vec<(&'static str, &'static str)> {
    let mut lines = CONVERSATION.to_vec();
    lines.push(if transfer { TRANSFER_LINE } else { CLOSING_LINE });
    lines
}

pub fn ended_reason(transfer: bool) -> &'static str {
    if transfer {
        "assistant-forwarded-call"
    } else {
        "customer-ended-call"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn conversation_update_uses_content_field() {
        let body = conversation_update("c1", "+1", &CONVERSATION[..2]);
        let convo = body["message"]["conversation"].as_array().unwrap();
        assert_eq!(convo.len(), 2);
        assert_eq!(convo[1]["role"], "user");
        assert!(convo[1]["content"].as_str().unwrap().contains("chest"));
        assert!(convo[1].get("message").is_none());
    }

    #[test]
    fn report_uses_message_field_and_duration() {
        let start = Utc::now();
        let end = start + Duration::seconds(213);
        let body = end_of_call_report("c1", "+1", &script(false), start, end, "customer-ended-call");
        let message = &body["message"];
        assert_eq!(message["type"], "end-of-call-report");
        assert_eq!(message["call"]["duration"], 213.0);
        let artifact = message["artifact"]["messages"].as_array().unwrap();
        assert_eq!(artifact.len(), CONVERSATION.len() + 1);
        assert!(artifact[0]["message"].is_string());
        assert!(artifact[0].get("content").is_none());
    }

    #[test]
    fn transfer_script_ends_with_transfer_vocabulary() {
        let lines = script(true);
        assert!(lines.last().unwrap().1.contains("transferring"));
        assert_eq!(ended_reason(true), "assistant-forwarded-call");
        assert_eq!(script(false).last(), Some(&CLOSING_LINE));
    }
}
