//! The live-call registry: the single owner of in-progress and recently completed calls.
//!
//! Every operation is a short synchronous mutation under one lock. The matching broadcast
//! event is published before the lock is released, so viewers see events for a call in the
//! order the operations ran and a new viewer's snapshot is never behind an event already
//! queued for it. Durable writes and summarizer requests are spawned as detached tasks after
//! the mutation; their failures are logged where they happen and never reach the caller.
//!
//! A call ended by a status update is sealed in memory straight away, but its durable
//! finalization waits for the provider's end-of-call report, which carries the authoritative
//! duration, phone and transcript. If no report arrives within the configured grace period the
//! call is finalized from what the registry holds.

use crate::broadcast::{Broadcaster, SubscriberId, Subscription};
use crate::call::{AiSummary, CompletedCall, LiveCall};
use crate::config::EngineConfig;
use crate::constants::{MIN_ANALYZABLE_LINES, PLACEHOLDER_PHONE};
use crate::events::LiveCallEvent;
use crate::pipeline::{FinalizationInput, FinalizationPipeline};
use crate::store::{CallStore, CallStub, StoredCall};
use crate::summarizer::{CallProfileExtraction, Summarizer};
use crate::transcript::{self, MergeDecision, RawMessage, TranscriptLine};
use crate::{TriageError, TriageResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use triage_types::{CallStatus, NonEmptyText, Speaker};

struct LiveEntry {
    call: LiveCall,
    /// Transcript length the last live summary was requested for.
    summarized_len: usize,
    summary_in_flight: bool,
}

/// A call sealed by a status update whose end-of-call report has not arrived yet.
struct AwaitingReport {
    /// The call as it was when it left the live set, before the escalation note.
    call: LiveCall,
    ended_reason: String,
    ended_at: DateTime<Utc>,
}

/// What an end-of-call report adds to a call already sealed by a status update.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportDetails<'a> {
    pub phone: Option<&'a str>,
    pub ended_reason: Option<&'a str>,
    /// Provider-reported seconds, already resolved from duration or timestamps.
    pub duration: Option<u64>,
    pub messages: &'a [RawMessage],
}

struct RegistryState {
    live: HashMap<String, LiveEntry>,
    completed: HashMap<String, CompletedCall>,
    awaiting_report: HashMap<String, AwaitingReport>,
    broadcaster: Broadcaster,
}

impl RegistryState {
    /// Inserts a completed call and evicts the oldest ones beyond `limit`. Calls still waiting
    /// for their report are never evicted.
    fn insert_completed(&mut self, call: CompletedCall, limit: usize) {
        self.completed.insert(call.id.clone(), call);
        while self.completed.len() > limit {
            let awaiting = &self.awaiting_report;
            let oldest = self
                .completed
                .values()
                .filter(|c| !awaiting.contains_key(&c.id))
                .min_by_key(|c| c.created_at)
                .map(|c| c.id.clone());
            let Some(id) = oldest else { break };
            self.completed.remove(&id);
            tracing::debug!(call_id = %id, "completed call evicted from memory");
        }
    }
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    pipeline: FinalizationPipeline,
    config: EngineConfig,
}

/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct LiveCallRegistry {
    inner: Arc<RegistryInner>,
}

fn spawn_detached<F>(task: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => tracing::warn!(task, "no async runtime, background task skipped"),
    }
}

fn log_ended(completed: &CompletedCall) {
    tracing::info!(
        call_id = %completed.id,
        reason = %completed.ended_reason,
        status = %completed.status,
        duration = completed.duration_sec,
        lines = completed.transcript.len(),
        "call ended"
    );
}

fn is_placeholder(phone: &str) -> bool {
    let phone = phone.trim();
    phone.is_empty() || phone == PLACEHOLDER_PHONE
}

impl LiveCallRegistry {
    pub fn new(
        store: Arc<dyn CallStore>,
        summarizer: Arc<dyn Summarizer>,
        config: EngineConfig,
    ) -> Self {
        let pipeline = FinalizationPipeline::new(store, summarizer, config.enrichment_timeout());
        let state = RegistryState {
            live: HashMap::new(),
            completed: HashMap::new(),
            awaiting_report: HashMap::new(),
            broadcaster: Broadcaster::new(config.broadcast_capacity()),
        };
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(state),
                pipeline,
                config,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn CallStore> {
        self.inner.pipeline.store()
    }

    /// Registers a new live call and schedules the durable stub write.
    ///
    /// # Errors
    ///
    /// `CallAlreadyExists` if the id is live or already completed (the existing call is left
    /// untouched), `InvalidInput` for a blank id.
    pub fn start_call(&self, call_id: &str, phone: &str) -> TriageResult<()> {
        let call_id = call_id.trim();
        if call_id.is_empty() {
            return Err(TriageError::InvalidInput("call id cannot be empty".into()));
        }
        let phone = if is_placeholder(phone) {
            PLACEHOLDER_PHONE
        } else {
            phone.trim()
        };

        let call = {
            let mut state = self.state();
            if state.live.contains_key(call_id) || state.completed.contains_key(call_id) {
                return Err(TriageError::CallAlreadyExists(call_id.to_string()));
            }
            let call = LiveCall::new(call_id, phone, Utc::now());
            state.live.insert(
                call_id.to_string(),
                LiveEntry {
                    call: call.clone(),
                    summarized_len: 0,
                    summary_in_flight: false,
                },
            );
            state
                .broadcaster
                .publish(&LiveCallEvent::CallStarted { call: call.clone() });
            call
        };
        tracing::info!(call_id, phone, "call started");

        let store = Arc::clone(self.store());
        let stub = CallStub {
            id: call.id,
            agent_id: self.config().agent_id().to_string(),
            caller_phone: call.phone_number,
            created_at: call.created_at,
        };
        spawn_detached("call-stub", async move {
            let id = stub.id.clone();
            if let Err(e) = store.upsert_call_stub(stub).await {
                tracing::error!(call_id = %id, error = %e, "failed to persist call stub");
            }
        });
        Ok(())
    }

    /// Appends one line stamped with the elapsed time. Returns `false` (and does nothing)
    /// for an unknown call or blank text.
    pub fn append_transcript_line(&self, call_id: &str, role: &str, text: &str) -> bool {
        let Ok(text) = NonEmptyText::new(text) else {
            return false;
        };
        let summary_job = {
            let mut state = self.state();
            let Some(entry) = state.live.get_mut(call_id) else {
                tracing::debug!(call_id, "transcript for unknown call ignored");
                return false;
            };
            let timestamp = transcript::format_offset(entry.call.elapsed_secs(Utc::now()));
            let line = TranscriptLine::new(timestamp, Speaker::from_role(role), text);
            entry.call.transcript.push(line.clone());
            let job = self.live_summary_due(entry);
            state.broadcaster.publish(&LiveCallEvent::Transcript {
                call_id: call_id.to_string(),
                line,
            });
            job
        };
        self.spawn_live_summary(call_id, summary_job);
        true
    }

    /// Reconciles a full conversation snapshot into the call's transcript.
    ///
    /// Returns `None` for an unknown call. An empty candidate never replaces a non-empty
    /// transcript; in that case nothing is published.
    pub fn sync_transcript(&self, call_id: &str, raw: &[RawMessage]) -> Option<MergeDecision> {
        let candidate = transcript::normalize(raw);
        let (decision, summary_job) = {
            let mut state = self.state();
            let entry = state.live.get_mut(call_id)?;
            let decision = transcript::decide(entry.call.transcript.len(), candidate.len());
            if decision == MergeDecision::KeepExisting {
                tracing::warn!(
                    call_id,
                    existing = entry.call.transcript.len(),
                    "snapshot produced no lines, keeping existing transcript"
                );
                return Some(decision);
            }
            let current = std::mem::take(&mut entry.call.transcript);
            entry.call.transcript = transcript::reconcile(current, candidate);
            let job = self.live_summary_due(entry);
            let event = LiveCallEvent::TranscriptSync {
                call_id: call_id.to_string(),
                transcript: entry.call.transcript.clone(),
            };
            state.broadcaster.publish(&event);
            (decision, job)
        };
        self.spawn_live_summary(call_id, summary_job);
        Some(decision)
    }

    /// Replaces the caller number of a live call with an authoritative one. Placeholder or
    /// blank numbers are ignored.
    pub fn correct_phone(&self, call_id: &str, phone: &str) -> bool {
        if is_placeholder(phone) {
            return false;
        }
        let mut state = self.state();
        match state.live.get_mut(call_id) {
            Some(entry) if entry.call.phone_number != phone.trim() => {
                tracing::info!(call_id, phone, "caller phone corrected");
                entry.call.phone_number = phone.trim().to_string();
                true
            }
            _ => false,
        }
    }

    /// Stores a live summary on a call that is still in progress.
    pub fn attach_summary(&self, call_id: &str, summary: AiSummary) -> bool {
        let mut state = self.state();
        let Some(entry) = state.live.get_mut(call_id) else {
            return false;
        };
        entry.call.ai_summary = Some(summary.clone());
        state.broadcaster.publish(&LiveCallEvent::AiSummary {
            call_id: call_id.to_string(),
            summary,
        });
        true
    }

    /// Seals a live call and starts finalization immediately, with the local duration.
    pub fn end_call(&self, call_id: &str, ended_reason: &str) -> Option<CompletedCall> {
        self.end_call_with_duration(call_id, ended_reason, None)
    }

    /// Seals a live call and starts finalization in the background.
    ///
    /// A provider-reported duration is used when it is non-zero, otherwise the whole seconds
    /// elapsed since the call started, at least one.
    ///
    /// # Returns
    ///
    /// The completed record, or `None` when the call is not live (unknown or already ended).
    pub fn end_call_with_duration(
        &self,
        call_id: &str,
        ended_reason: &str,
        reported_duration: Option<u64>,
    ) -> Option<CompletedCall> {
        let completed = {
            let mut state = self.state();
            let Some(entry) = state.live.remove(call_id) else {
                tracing::debug!(call_id, "end for a call that is not live ignored");
                return None;
            };
            let completed = self.seal(entry.call, ended_reason, reported_duration, Utc::now());
            state.insert_completed(completed.clone(), self.config().completed_retention());
            state.broadcaster.publish(&LiveCallEvent::CallEnded {
                call_id: call_id.to_string(),
                ended_reason: ended_reason.to_string(),
            });
            completed
        };
        log_ended(&completed);
        self.spawn_finalization(&completed);
        Some(completed)
    }

    /// Seals a live call whose end was signalled ahead of the end-of-call report.
    ///
    /// Viewers are told the call ended at once, but durable finalization is held until
    /// [`complete_with_report`](Self::complete_with_report) supplies the report or the
    /// configured grace period runs out.
    ///
    /// # Returns
    ///
    /// The provisional completed record, or `None` when the call is not live.
    pub fn end_call_awaiting_report(
        &self,
        call_id: &str,
        ended_reason: &str,
    ) -> Option<CompletedCall> {
        let completed = {
            let mut state = self.state();
            let Some(entry) = state.live.remove(call_id) else {
                tracing::debug!(call_id, "end for a call that is not live ignored");
                return None;
            };
            let ended_at = Utc::now();
            let completed = self.seal(entry.call.clone(), ended_reason, None, ended_at);
            state.awaiting_report.insert(
                call_id.to_string(),
                AwaitingReport {
                    call: entry.call,
                    ended_reason: ended_reason.to_string(),
                    ended_at,
                },
            );
            state.insert_completed(completed.clone(), self.config().completed_retention());
            state.broadcaster.publish(&LiveCallEvent::CallEnded {
                call_id: call_id.to_string(),
                ended_reason: ended_reason.to_string(),
            });
            completed
        };
        log_ended(&completed);

        let registry = self.clone();
        let id = call_id.to_string();
        let grace = self.config().report_grace();
        spawn_detached("report-grace", async move {
            tokio::time::sleep(grace).await;
            registry.finalize_without_report(&id);
        });
        Some(completed)
    }

    /// Applies an end-of-call report to a call sealed by
    /// [`end_call_awaiting_report`](Self::end_call_awaiting_report) and starts finalization.
    ///
    /// The report's phone replaces a placeholder, a longer artifact supplements the
    /// transcript, a non-zero reported duration wins over the local one and the report's ended
    /// reason (when present) is the one classified for escalation.
    ///
    /// # Returns
    ///
    /// The final completed record, or `None` when the call is not waiting for a report.
    pub fn complete_with_report(
        &self,
        call_id: &str,
        report: ReportDetails<'_>,
    ) -> Option<CompletedCall> {
        let completed = {
            let mut state = self.state();
            let pending = state.awaiting_report.remove(call_id)?;
            let mut call = pending.call;
            if let Some(phone) = report.phone.filter(|p| !is_placeholder(p)) {
                call.phone_number = phone.trim().to_string();
            }
            let artifact = transcript::normalize(report.messages);
            if artifact.len() > call.transcript.len() {
                tracing::info!(
                    call_id,
                    in_memory = call.transcript.len(),
                    artifact = artifact.len(),
                    "supplementing transcript from report"
                );
                let current = std::mem::take(&mut call.transcript);
                call.transcript = transcript::reconcile(current, artifact);
            }
            let reason = report.ended_reason.unwrap_or(pending.ended_reason.as_str());
            let completed = self.seal(call, reason, report.duration, pending.ended_at);
            state
                .completed
                .insert(completed.id.clone(), completed.clone());
            completed
        };
        tracing::info!(
            call_id,
            duration = completed.duration_sec,
            lines = completed.transcript.len(),
            "end-of-call report applied"
        );
        self.spawn_finalization(&completed);
        Some(completed)
    }

    /// True while a call sealed by a status update still waits for its report.
    pub fn is_awaiting_report(&self, call_id: &str) -> bool {
        self.state().awaiting_report.contains_key(call_id)
    }

    fn finalize_without_report(&self, call_id: &str) {
        let completed = {
            let mut state = self.state();
            if state.awaiting_report.remove(call_id).is_none() {
                return;
            }
            state.completed.get(call_id).cloned()
        };
        let Some(completed) = completed else {
            return;
        };
        tracing::warn!(call_id, "no end-of-call report arrived, finalizing from memory");
        self.spawn_finalization(&completed);
    }

    /// Turns a call leaving the live set into its completed record: escalation is classified,
    /// the transfer note appended and the duration resolved.
    fn seal(
        &self,
        mut call: LiveCall,
        ended_reason: &str,
        reported_duration: Option<u64>,
        ended_at: DateTime<Utc>,
    ) -> CompletedCall {
        let elapsed = call.elapsed_secs(ended_at);
        let escalated = self
            .config()
            .escalation()
            .is_escalation(ended_reason, call.transcript.iter().map(|l| l.text.as_str()));
        if escalated {
            let note = format!(
                "[Call was escalated and transferred to a human operator. Reason: {ended_reason}]"
            );
            if let Ok(text) = NonEmptyText::new(note) {
                call.transcript.push(TranscriptLine::new(
                    transcript::format_offset(elapsed),
                    Speaker::Agent,
                    text,
                ));
            }
        }

        let duration = reported_duration
            .filter(|d| *d > 0)
            .unwrap_or(elapsed.max(1));
        let status = if escalated {
            CallStatus::Escalated
        } else {
            CallStatus::NeedsReview
        };
        CompletedCall::from_live(
            call,
            self.config().agent_id(),
            status,
            duration,
            ended_reason,
        )
    }

    fn spawn_finalization(&self, completed: &CompletedCall) {
        let registry = self.clone();
        let input = FinalizationInput::from(completed);
        spawn_detached("finalize-call", async move {
            let extraction = registry.inner.pipeline.run(&input).await;
            registry.publish_completed(&input.call_id, extraction.as_ref());
        });
    }

    /// Folds an extraction (if any) into the completed record and publishes it.
    fn publish_completed(&self, call_id: &str, extraction: Option<&CallProfileExtraction>) {
        let mut state = self.state();
        let Some(call) = state.completed.get_mut(call_id) else {
            return;
        };
        if let Some(extraction) = extraction {
            call.apply_extraction(extraction);
        }
        let event = LiveCallEvent::CallCompleted { call: call.clone() };
        state.broadcaster.publish(&event);
    }

    /// Runs enrichment again for a persisted call and refreshes the in-memory record.
    pub async fn reanalyze(&self, call_id: &str) -> TriageResult<StoredCall> {
        let result = self.inner.pipeline.reanalyze(call_id).await?;
        self.publish_completed(call_id, Some(&result.extraction));
        Ok(result.call)
    }

    /// Live calls, oldest first.
    pub fn get_live(&self) -> Vec<LiveCall> {
        let state = self.state();
        let mut calls: Vec<_> = state.live.values().map(|e| e.call.clone()).collect();
        calls.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        calls
    }

    /// Completed calls held in memory, newest first.
    pub fn get_completed(&self) -> Vec<CompletedCall> {
        let state = self.state();
        let mut calls: Vec<_> = state.completed.values().cloned().collect();
        calls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        calls
    }

    /// A snapshot of one live call.
    ///
    /// # Returns
    ///
    /// `None` once the call has ended or when the id was never started.
    pub fn get_live_call(&self, call_id: &str) -> Option<LiveCall> {
        self.state().live.get(call_id).map(|e| e.call.clone())
    }

    /// A completed call still held in memory. Older calls beyond the configured retention are
    /// only available from the store.
    pub fn get_completed_call(&self, call_id: &str) -> Option<CompletedCall> {
        self.state().completed.get(call_id).cloned()
    }

    pub fn is_live(&self, call_id: &str) -> bool {
        self.state().live.contains_key(call_id)
    }

    /// True when the id is live or already completed (and not yet evicted).
    pub fn knows(&self, call_id: &str) -> bool {
        let state = self.state();
        state.live.contains_key(call_id) || state.completed.contains_key(call_id)
    }

    /// Subscribes a viewer. Its first event is a snapshot taken under the same lock that
    /// orders every later event.
    pub fn subscribe(&self) -> Subscription {
        let mut state = self.state();
        let mut calls: Vec<_> = state.live.values().map(|e| e.call.clone()).collect();
        calls.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut completed_calls: Vec<_> = state.completed.values().cloned().collect();
        completed_calls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        state.broadcaster.subscribe(LiveCallEvent::FullState {
            calls,
            completed_calls,
        })
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.state().broadcaster.unsubscribe(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().broadcaster.subscriber_count()
    }

    /// Decides whether the transcript has grown enough for another live summary and, if so,
    /// marks one in flight and returns the transcript to summarize.
    fn live_summary_due(&self, entry: &mut LiveEntry) -> Option<Vec<TranscriptLine>> {
        let interval = self.config().live_summary_interval();
        let len = entry.call.transcript.len();
        if interval == 0
            || entry.summary_in_flight
            || len < MIN_ANALYZABLE_LINES
            || len < entry.summarized_len + interval
        {
            return None;
        }
        entry.summary_in_flight = true;
        entry.summarized_len = len;
        Some(entry.call.transcript.clone())
    }

    fn spawn_live_summary(&self, call_id: &str, job: Option<Vec<TranscriptLine>>) {
        let Some(lines) = job else {
            return;
        };
        let registry = self.clone();
        let call_id = call_id.to_string();
        spawn_detached("live-summary", async move {
            let summarizer = Arc::clone(registry.inner.pipeline.summarizer());
            let timeout = registry.config().enrichment_timeout();
            let result = tokio::time::timeout(timeout, summarizer.summarize_live(&lines)).await;

            if let Some(entry) = registry.state().live.get_mut(&call_id) {
                entry.summary_in_flight = false;
            }
            match result {
                Ok(Ok(summary)) => {
                    if registry.attach_summary(&call_id, summary) {
                        tracing::debug!(call_id = %call_id, "live summary attached");
                    }
                }
                Ok(Err(e)) => tracing::debug!(call_id = %call_id, error = %e, "live summary failed"),
                Err(_) => tracing::debug!(call_id = %call_id, "live summary timed out"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PENDING_ANALYSIS_REASON;
    use crate::store::MemoryStore;
    use crate::test_support::{sample_extraction, FailingSummarizer, FixedSummarizer, GatedSummarizer};
    use std::time::Duration;

    fn registry_with(summarizer: Arc<dyn Summarizer>) -> (LiveCallRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = LiveCallRegistry::new(store.clone(), summarizer, EngineConfig::standard().unwrap());
        (registry, store)
    }

    async fn next_of_kind(sub: &mut Subscription, kind: &str) -> LiveCallEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = sub.recv().await.expect("subscription open");
                if event.kind() == kind {
                    return event;
                }
            }
        })
        .await
        .expect("event arrives in time")
    }

    #[tokio::test]
    async fn basic_call_ends_as_needs_review() {
        let (registry, _) = registry_with(Arc::new(FailingSummarizer));
        registry.start_call("c1", "+15551234567").unwrap();
        assert!(registry.append_transcript_line("c1", "assistant", "Triage line, how can I help?"));
        assert!(registry.append_transcript_line("c1", "user", "I have a headache."));

        let done = registry.end_call("c1", "customer-ended-call").unwrap();
        assert_eq!(done.status, CallStatus::NeedsReview);
        assert!(done.duration_sec > 0);
        assert_eq!(done.transcript.len(), 2);
        assert_eq!(done.transcript[0].speaker, Speaker::Agent);
        assert_eq!(done.transcript[1].speaker, Speaker::Caller);

        assert!(registry.get_live().is_empty());
        let completed = registry.get_completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "c1");
    }

    #[tokio::test]
    async fn duplicate_start_leaves_call_untouched() {
        let (registry, _) = registry_with(Arc::new(FailingSummarizer));
        registry.start_call("c1", "+1").unwrap();
        registry.append_transcript_line("c1", "user", "hello");
        let before = registry.get_live_call("c1").unwrap();

        let err = registry.start_call("c1", "+2").unwrap_err();
        assert!(matches!(err, TriageError::CallAlreadyExists(_)));
        let after = registry.get_live_call("c1").unwrap();
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.transcript, before.transcript);
        assert_eq!(after.phone_number, "+1");
    }

    #[tokio::test]
    async fn duplicate_end_finalizes_once() {
        let (registry, store) = registry_with(Arc::new(FixedSummarizer::new(sample_extraction())));
        let mut sub = registry.subscribe();
        registry.start_call("c1", "+15551234567").unwrap();
        registry.append_transcript_line("c1", "assistant", "Hello");
        registry.append_transcript_line("c1", "user", "My chest hurts");

        assert!(registry.end_call("c1", "customer-ended-call").is_some());
        assert!(registry.end_call("c1", "customer-ended-call").is_none());

        let LiveCallEvent::CallCompleted { call } = next_of_kind(&mut sub, "call-completed").await
        else {
            unreachable!()
        };
        assert_eq!(call.reason_short, "Chest pain");
        assert_eq!(call.patient_name.as_deref(), Some("Ada"));
        assert_eq!(registry.get_completed().len(), 1);
        assert_eq!(store.encounter_count(), 1);
        assert_eq!(store.timeline_count(), 1);
    }

    #[tokio::test]
    async fn empty_snapshot_does_not_erase_transcript() {
        let (registry, _) = registry_with(Arc::new(FailingSummarizer));
        registry.start_call("c2", "+1").unwrap();
        registry.sync_transcript(
            "c2",
            &[
                RawMessage::with_content("assistant", "one"),
                RawMessage::with_content("user", "two"),
                RawMessage::with_content("assistant", "three"),
            ],
        );
        let mut sub = registry.subscribe();

        let decision = registry.sync_transcript("c2", &[]);
        assert_eq!(decision, Some(MergeDecision::KeepExisting));
        assert_eq!(registry.get_live_call("c2").unwrap().transcript.len(), 3);

        assert_eq!(sub.try_recv().unwrap().kind(), "full-state");
        assert!(sub.try_recv().is_none(), "guard must not publish a sync");
    }

    #[tokio::test]
    async fn forwarded_call_is_escalated_with_note() {
        let (registry, _) = registry_with(Arc::new(FailingSummarizer));
        registry.start_call("c3", "+1").unwrap();
        registry.append_transcript_line("c3", "user", "I need a nurse");

        let done = registry.end_call("c3", "call-forwarded to agent").unwrap();
        assert_eq!(done.status, CallStatus::Escalated);
        assert_eq!(done.transcript.len(), 2);
        let note = &done.transcript[1];
        assert_eq!(note.speaker, Speaker::Agent);
        assert!(note.text.as_str().contains("transferred to a human operator"));
        assert!(note.text.as_str().contains("call-forwarded to agent"));
    }

    #[tokio::test]
    async fn transcript_vocabulary_also_escalates() {
        let (registry, _) = registry_with(Arc::new(FailingSummarizer));
        registry.start_call("c4", "+1").unwrap();
        registry.append_transcript_line("c4", "assistant", "Transferring you to a nurse now.");
        let done = registry.end_call("c4", "assistant-ended-call").unwrap();
        assert_eq!(done.status, CallStatus::Escalated);
    }

    #[tokio::test]
    async fn events_arrive_in_operation_order() {
        let (registry, _) = registry_with(Arc::new(FailingSummarizer));
        let mut sub = registry.subscribe();
        registry.start_call("c1", "").unwrap();
        registry.append_transcript_line("c1", "user", "hi");
        registry.sync_transcript("c1", &[RawMessage::with_message("user", "hi there")]);
        registry.end_call("c1", "hangup");

        let kinds: Vec<_> = [
            next_of_kind(&mut sub, "full-state").await,
            sub.recv().await.unwrap(),
            sub.recv().await.unwrap(),
            sub.recv().await.unwrap(),
            sub.recv().await.unwrap(),
            sub.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.kind())
        .collect();
        assert_eq!(
            kinds,
            vec![
                "full-state",
                "call-started",
                "transcript",
                "transcript-sync",
                "call-ended",
                "call-completed"
            ]
        );
    }

    #[tokio::test]
    async fn unknown_calls_are_ignored() {
        let (registry, _) = registry_with(Arc::new(FailingSummarizer));
        let mut sub = registry.subscribe();
        assert!(!registry.append_transcript_line("nope", "user", "hi"));
        assert!(registry.sync_transcript("nope", &[]).is_none());
        assert!(registry.end_call("nope", "x").is_none());
        assert!(!registry.correct_phone("nope", "+1"));
        sub.try_recv();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn placeholder_phone_is_corrected_before_end() {
        let (registry, _) = registry_with(Arc::new(FailingSummarizer));
        registry.start_call("c1", "  ").unwrap();
        assert_eq!(registry.get_live_call("c1").unwrap().phone_number, PLACEHOLDER_PHONE);
        assert!(!registry.correct_phone("c1", PLACEHOLDER_PHONE));
        assert!(registry.correct_phone("c1", "+15559876543"));
        let done = registry.end_call("c1", "hangup").unwrap();
        assert_eq!(done.caller_phone, "+15559876543");
    }

    #[tokio::test]
    async fn preliminary_record_precedes_enrichment() {
        let gated = Arc::new(GatedSummarizer::new(sample_extraction()));
        let (registry, store) = registry_with(gated.clone());
        let mut sub = registry.subscribe();
        registry.start_call("c1", "+15551234567").unwrap();
        registry.append_transcript_line("c1", "assistant", "Hello");
        registry.append_transcript_line("c1", "user", "Chest pain");
        registry.end_call("c1", "hangup");

        gated.entered.notified().await;
        let row = store.get_call("c1").await.unwrap().unwrap();
        assert_eq!(row.reason_short, PENDING_ANALYSIS_REASON);
        assert_eq!(row.status, CallStatus::NeedsReview);

        gated.release.notify_one();
        next_of_kind(&mut sub, "call-completed").await;
        let row = store.get_call("c1").await.unwrap().unwrap();
        assert_eq!(row.reason_short, "Chest pain");
        assert_eq!(row.status, CallStatus::Escalated);
    }

    #[tokio::test]
    async fn live_summary_is_published_after_interval() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig::standard().unwrap().with_live_summary_interval(2);
        let registry = LiveCallRegistry::new(
            store,
            Arc::new(FixedSummarizer::new(sample_extraction())),
            config,
        );
        let mut sub = registry.subscribe();
        registry.start_call("c1", "+1").unwrap();
        registry.append_transcript_line("c1", "assistant", "Hello");
        registry.append_transcript_line("c1", "user", "My chest hurts");

        let LiveCallEvent::AiSummary { call_id, summary } =
            next_of_kind(&mut sub, "ai-summary").await
        else {
            unreachable!()
        };
        assert_eq!(call_id, "c1");
        assert_eq!(summary.reason_short, "Chest pain");

        let done = registry.end_call("c1", "hangup").unwrap();
        assert_eq!(done.reason_short, "Chest pain");
    }

    #[tokio::test]
    async fn reanalysis_refreshes_completed_call() {
        let (registry, store) = registry_with(Arc::new(FailingSummarizer));
        let mut sub = registry.subscribe();
        registry.start_call("c1", "+15551234567").unwrap();
        registry.append_transcript_line("c1", "assistant", "Hello");
        registry.append_transcript_line("c1", "user", "Chest pain");
        registry.end_call("c1", "hangup");
        next_of_kind(&mut sub, "call-completed").await;

        let fixed = LiveCallRegistry {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    live: HashMap::new(),
                    completed: registry
                        .get_completed()
                        .into_iter()
                        .map(|c| (c.id.clone(), c))
                        .collect(),
                    awaiting_report: HashMap::new(),
                    broadcaster: Broadcaster::new(8),
                }),
                pipeline: FinalizationPipeline::new(
                    store.clone(),
                    Arc::new(FixedSummarizer::new(sample_extraction())),
                    Duration::from_secs(5),
                ),
                config: EngineConfig::standard().unwrap(),
            }),
        };
        let mut sub = fixed.subscribe();
        let row = fixed.reanalyze("c1").await.unwrap();
        assert_eq!(row.reason_short, "Chest pain");
        let LiveCallEvent::CallCompleted { call } = next_of_kind(&mut sub, "call-completed").await
        else {
            unreachable!()
        };
        assert_eq!(call.status, CallStatus::Escalated);
        assert_eq!(fixed.get_completed_call("c1").unwrap().reason_short, "Chest pain");
    }

    #[tokio::test]
    async fn completed_calls_beyond_retention_are_evicted() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig::standard()
            .unwrap()
            .with_completed_retention(2)
            .unwrap();
        let registry = LiveCallRegistry::new(store, Arc::new(FailingSummarizer), config);
        for id in ["c1", "c2", "c3"] {
            registry.start_call(id, "+1").unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
            registry.end_call(id, "hangup");
        }
        let ids: Vec<_> = registry.get_completed().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["c3", "c2"]);
        assert!(!registry.knows("c1"));

        let LiveCallEvent::FullState { completed_calls, .. } = registry.subscribe().try_recv().unwrap()
        else {
            unreachable!()
        };
        assert_eq!(completed_calls.len(), 2);
    }

    #[tokio::test]
    async fn calls_awaiting_a_report_are_not_evicted() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig::standard()
            .unwrap()
            .with_completed_retention(1)
            .unwrap();
        let registry = LiveCallRegistry::new(store, Arc::new(FailingSummarizer), config);
        registry.start_call("waiting", "+1").unwrap();
        registry.end_call_awaiting_report("waiting", "unknown");
        registry.start_call("c2", "+1").unwrap();
        registry.end_call("c2", "hangup");

        assert!(registry.get_completed_call("waiting").is_some());
        assert!(registry.get_completed_call("c2").is_none());
    }

    #[tokio::test]
    async fn report_completes_a_call_ended_by_status() {
        let (registry, store) = registry_with(Arc::new(FixedSummarizer::new(sample_extraction())));
        let mut sub = registry.subscribe();
        registry.start_call("c1", "").unwrap();
        registry.append_transcript_line("c1", "assistant", "Hello");

        let provisional = registry.end_call_awaiting_report("c1", "unknown").unwrap();
        assert_eq!(provisional.caller_phone, PLACEHOLDER_PHONE);
        assert!(registry.end_call_awaiting_report("c1", "unknown").is_none());
        assert!(registry.end_call("c1", "hangup").is_none());

        let messages = [
            RawMessage::with_message("assistant", "Hello"),
            RawMessage::with_message("user", "My chest hurts"),
        ];
        let done = registry
            .complete_with_report(
                "c1",
                ReportDetails {
                    phone: Some("+15551234567"),
                    ended_reason: Some("customer-ended-call"),
                    duration: Some(75),
                    messages: &messages,
                },
            )
            .unwrap();
        assert_eq!(done.caller_phone, "+15551234567");
        assert_eq!(done.duration_sec, 75);
        assert_eq!(done.transcript.len(), 2);
        assert_eq!(done.ended_reason, "customer-ended-call");
        assert!(registry
            .complete_with_report("c1", ReportDetails::default())
            .is_none());

        next_of_kind(&mut sub, "call-completed").await;
        let row = store.get_call("c1").await.unwrap().unwrap();
        assert_eq!(row.duration_sec, 75);
        assert_eq!(row.caller_phone, "+15551234567");
        assert_eq!(store.encounter_count(), 1);
    }
}
