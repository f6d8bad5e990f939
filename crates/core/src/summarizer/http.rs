use super::{
    build_extraction_prompt, build_live_prompt, parse_call_profile, parse_live_summary,
    CallProfileExtraction, Summarizer,
};
use crate::call::AiSummary;
use crate::constants::MIN_ANALYZABLE_LINES;
use crate::store::PatientContext;
use crate::transcript::{render, TranscriptLine};
use crate::{TriageError, TriageResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const VERTEX_BASE_URL: &str = "https://aiplatform.googleapis.com/v1/publishers/google/models";

/// Which hosted or local model answers summarization requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmBackend {
    /// Vertex AI `generateContent`, authenticated with an API key.
    Vertex { api_key: String, model: String },
    /// A local Ollama instance.
    Ollama { base_url: String, model: String },
}

impl LlmBackend {
    pub fn name(&self) -> &'static str {
        match self {
            LlmBackend::Vertex { .. } => "vertex",
            LlmBackend::Ollama { .. } => "ollama",
        }
    }

    fn url(&self) -> String {
        match self {
            LlmBackend::Vertex { api_key, model } => {
                format!("{VERTEX_BASE_URL}/{model}:generateContent?key={api_key}")
            }
            LlmBackend::Ollama { base_url, .. } => {
                format!("{}/api/generate", base_url.trim_end_matches('/'))
            }
        }
    }

    fn body(&self, instructions: &str, transcript: &str) -> Value {
        let transcript = format!("TRANSCRIPT:\n{transcript}");
        match self {
            LlmBackend::Vertex { .. } => json!({
                "contents": [{
                    "role": "user",
                    "parts": [{ "text": instructions }, { "text": transcript }],
                }],
                "generationConfig": { "temperature": 0 },
            }),
            LlmBackend::Ollama { model, .. } => serde_json::to_value(OllamaGenerateRequest {
                model,
                prompt: &transcript,
                system: instructions,
                stream: false,
            })
            .unwrap_or(Value::Null),
        }
    }

    fn response_text(&self, body: Value) -> TriageResult<String> {
        let text = match self {
            LlmBackend::Vertex { .. } => body
                .pointer("/candidates/0/content/parts/0/text")
                .and_then(Value::as_str)
                .map(str::to_string),
            LlmBackend::Ollama { .. } => serde_json::from_value::<OllamaGenerateResponse>(body)
                .ok()
                .map(|r| r.response),
        };
        text.filter(|t| !t.trim().is_empty())
            .ok_or_else(|| TriageError::SummarizerResponse("no text in model response".into()))
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Summarizer backed by an HTTP model endpoint.
pub struct HttpSummarizer {
    client: reqwest::Client,
    backend: LlmBackend,
    timeout: Duration,
}

impl HttpSummarizer {
    pub fn new(backend: LlmBackend, timeout: Duration) -> TriageResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            backend,
            timeout,
        })
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    async fn generate(&self, instructions: &str, transcript: &[TranscriptLine]) -> TriageResult<String> {
        if transcript.len() < MIN_ANALYZABLE_LINES {
            return Err(TriageError::TranscriptTooShort {
                lines: transcript.len(),
            });
        }

        let response = self
            .client
            .post(self.backend.url())
            .json(&self.backend.body(instructions, &render(transcript)))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TriageError::SummarizerTimeout(self.timeout.as_secs())
                } else {
                    TriageError::SummarizerHttp(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriageError::SummarizerStatus {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let body: Value = response.json().await?;
        self.backend.response_text(body)
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn extract_call_profile(
        &self,
        transcript: &[TranscriptLine],
        existing: Option<&PatientContext>,
    ) -> TriageResult<CallProfileExtraction> {
        let instructions = build_extraction_prompt(existing);
        let raw = self.generate(&instructions, transcript).await?;
        parse_call_profile(&raw)
    }

    async fn summarize_live(&self, transcript: &[TranscriptLine]) -> TriageResult<AiSummary> {
        let raw = self.generate(build_live_prompt(), transcript).await?;
        parse_live_summary(&raw)
    }
}

/// Used when no model is configured. Every request fails, so calls keep their preliminary
/// records.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn extract_call_profile(
        &self,
        _transcript: &[TranscriptLine],
        _existing: Option<&PatientContext>,
    ) -> TriageResult<CallProfileExtraction> {
        Err(TriageError::SummarizerDisabled)
    }

    async fn summarize_live(&self, _transcript: &[TranscriptLine]) -> TriageResult<AiSummary> {
        Err(TriageError::SummarizerDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_types::{NonEmptyText, Speaker};

    fn vertex() -> LlmBackend {
        LlmBackend::Vertex {
            api_key: "k".into(),
            model: "gemini-2.5-flash".into(),
        }
    }

    #[test]
    fn vertex_request_shape() {
        let backend = vertex();
        assert_eq!(
            backend.url(),
            "https://aiplatform.googleapis.com/v1/publishers/google/models/gemini-2.5-flash:generateContent?key=k"
        );
        let body = backend.body("do it", "[0:00] Agent: hi");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "do it");
        assert_eq!(
            body["contents"][0]["parts"][1]["text"],
            "TRANSCRIPT:\n[0:00] Agent: hi"
        );
        assert_eq!(body["generationConfig"]["temperature"], 0);
    }

    #[test]
    fn ollama_request_shape() {
        let backend = LlmBackend::Ollama {
            base_url: "http://localhost:11434/".into(),
            model: "llama3".into(),
        };
        assert_eq!(backend.url(), "http://localhost:11434/api/generate");
        let body = backend.body("sys", "t");
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["system"], "sys");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn response_text_extraction() {
        let text = vertex()
            .response_text(json!({
                "candidates": [{ "content": { "parts": [{ "text": "{}" }] } }]
            }))
            .unwrap();
        assert_eq!(text, "{}");
        assert!(vertex().response_text(json!({ "candidates": [] })).is_err());

        let ollama = LlmBackend::Ollama {
            base_url: "http://x".into(),
            model: "m".into(),
        };
        assert_eq!(
            ollama.response_text(json!({ "response": "{\"a\":1}" })).unwrap(),
            "{\"a\":1}"
        );
    }

    #[tokio::test]
    async fn short_transcripts_are_never_sent() {
        let summarizer = HttpSummarizer::new(vertex(), Duration::from_secs(1)).unwrap();
        let one = vec![TranscriptLine::new(
            "0:00",
            Speaker::Agent,
            NonEmptyText::new("Hello").unwrap(),
        )];
        let err = summarizer
            .extract_call_profile(&one, None)
            .await
            .expect_err("one line is too short");
        assert!(matches!(err, TriageError::TranscriptTooShort { lines: 1 }));
    }

    #[tokio::test]
    async fn disabled_summarizer_always_fails() {
        let err = DisabledSummarizer.summarize_live(&[]).await.unwrap_err();
        assert!(matches!(err, TriageError::SummarizerDisabled));
    }
}
