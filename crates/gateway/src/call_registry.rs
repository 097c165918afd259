//! Call Registry & State Machine (§4.D).
//!
//! Exclusive ownership of each `CallSession` lives on a per-call actor
//! task draining an inbound `SessionEvent` queue — the single-writer
//! rule that keeps concurrent webhook/media events serialised per call.
//! Other components address a call only by `call_control_id` and a
//! [`CallRegistry`] handle; a short-lived view of the session is
//! obtained via [`CallRegistry::snapshot`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use uuid::Uuid;

use vrp_capacity::{Admission, CapacityController};
use vrp_domain::call::{
    CallEndedEvent, CallId, CallSession, CallState, TerminationCause, Turn, TurnRole, VoiceMode,
};
use vrp_domain::error::RejectKind;
use vrp_domain::stream::TransferSignal;
use vrp_domain::tenant::TenantCaps;
use vrp_workflow::{JobQueue, WorkflowStore};

use crate::history::HistoryStore;
use crate::metrics;

/// Default transfer dial timeout (§8 scenario 5) when the brain's
/// `transfer` directive doesn't carry its own `timeoutSecs`.
const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 20;

/// Inbound events a call's actor task processes, one at a time, in order.
#[derive(Debug)]
pub enum SessionEvent {
    /// `call.initiated` webhook: attempt capacity reservation and move
    /// to `answered`-eligible `initiated`, or straight to `failed`.
    Initiated { caps: TenantCaps, voice_mode: VoiceMode },
    Answered,
    MediaConnected,
    CallerTurn(String),
    AssistantTurn { text: String, interrupted: bool },
    /// The brain directed a transfer; starts the dial-timeout timer this
    /// actor owns (§4.F, §8 scenario 5).
    Transferring { to: String, audio_url: Option<String>, timeout_secs: Option<u64> },
    /// `call.transfer.answered` webhook: the dial was picked up.
    TransferAnswered,
    /// `call.transfer.failed` webhook: the dial was rejected or errored
    /// before the timeout elapsed.
    TransferFailed,
    Hangup,
    Failed(TerminationCause),
    Snapshot(oneshot::Sender<CallSession>),
}

struct CallHandle {
    tx: mpsc::Sender<SessionEvent>,
    transfer_rx: watch::Receiver<TransferSignal>,
}

/// What the actor's event loop should do after applying one event: most
/// events need nothing further, but transfer events also have to arm or
/// disarm the dial-timeout timer the loop itself owns.
enum ApplyOutcome {
    Continue,
    Exit,
    StartTransferTimer(u64),
    CancelTransferTimer,
}

pub struct CallRegistry {
    sessions: Arc<RwLock<HashMap<CallId, CallHandle>>>,
    capacity: Arc<CapacityController>,
    job_queue: Arc<JobQueue>,
    workflow_store: Arc<WorkflowStore>,
    history: Arc<HistoryStore>,
    answer_timeout_secs: u64,
    tenant_concurrency_cap_default: u32,
    tenant_rpm_cap_default: u32,
    reap_tx: mpsc::UnboundedSender<CallId>,
}

impl CallRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capacity: Arc<CapacityController>,
        job_queue: Arc<JobQueue>,
        workflow_store: Arc<WorkflowStore>,
        history: Arc<HistoryStore>,
        answer_timeout_secs: u64,
        tenant_concurrency_cap_default: u32,
        tenant_rpm_cap_default: u32,
    ) -> Self {
        let sessions: Arc<RwLock<HashMap<CallId, CallHandle>>> = Arc::new(RwLock::new(HashMap::new()));
        let (reap_tx, mut reap_rx) = mpsc::unbounded_channel::<CallId>();
        let reap_sessions = sessions.clone();
        tokio::spawn(async move {
            while let Some(call_control_id) = reap_rx.recv().await {
                reap_sessions.write().await.remove(&call_control_id);
            }
        });

        Self {
            sessions,
            capacity,
            job_queue,
            workflow_store,
            history,
            answer_timeout_secs,
            tenant_concurrency_cap_default,
            tenant_rpm_cap_default,
            reap_tx,
        }
    }

    /// Returns `true` if a call with this id already has an actor running
    /// (used to discard a retried `call.initiated` within a small window,
    /// §4.D Idempotency).
    pub async fn is_known(&self, call_control_id: &CallId) -> bool {
        self.sessions.read().await.contains_key(call_control_id)
    }

    /// Spawn a new call actor and send it its opening `Initiated` event.
    /// Caller must have already checked [`Self::is_known`].
    pub async fn admit(
        &self,
        call_control_id: CallId,
        tenant_id: String,
        caller_id: String,
        called_number: String,
        caps: TenantCaps,
        voice_mode: VoiceMode,
    ) {
        let (tx, rx) = mpsc::channel(32);
        let (transfer_tx, transfer_rx) = watch::channel(TransferSignal::Idle);
        let rng_seed = Uuid::new_v4().as_u128() as u64;
        let session = CallSession::new(
            call_control_id.clone(),
            tenant_id,
            caller_id,
            called_number,
            rng_seed,
        );
        self.sessions.write().await.insert(
            call_control_id.clone(),
            CallHandle { tx: tx.clone(), transfer_rx },
        );

        let actor = CallActor {
            session,
            rx,
            capacity: self.capacity.clone(),
            job_queue: self.job_queue.clone(),
            workflow_store: self.workflow_store.clone(),
            history: self.history.clone(),
            answer_timeout_secs: self.answer_timeout_secs,
            tenant_concurrency_cap_default: self.tenant_concurrency_cap_default,
            tenant_rpm_cap_default: self.tenant_rpm_cap_default,
            reap_tx: self.reap_tx.clone(),
            transfer_tx,
        };
        tokio::spawn(actor.run());

        let _ = tx.send(SessionEvent::Initiated { caps, voice_mode }).await;
    }

    /// A receiver for this call's transfer outcome signal (§4.F), for the
    /// audio pipeline's playback stage to learn when a dial it's holding
    /// for is answered, fails, or times out. `None` if the call isn't
    /// known.
    pub async fn transfer_signal(&self, call_control_id: &CallId) -> Option<watch::Receiver<TransferSignal>> {
        self.sessions
            .read()
            .await
            .get(call_control_id)
            .map(|handle| handle.transfer_rx.clone())
    }

    /// Forward an event to an already-admitted call. A missing call is
    /// not an error at this layer — callers translate that to 404.
    pub async fn send(&self, call_control_id: &CallId, event: SessionEvent) -> bool {
        let tx = match self.sessions.read().await.get(call_control_id) {
            Some(handle) => handle.tx.clone(),
            None => return false,
        };
        tx.send(event).await.is_ok()
    }

    pub async fn snapshot(&self, call_control_id: &CallId) -> Option<CallSession> {
        let tx = self.sessions.read().await.get(call_control_id)?.tx.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(SessionEvent::Snapshot(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

struct CallActor {
    session: CallSession,
    rx: mpsc::Receiver<SessionEvent>,
    capacity: Arc<CapacityController>,
    job_queue: Arc<JobQueue>,
    workflow_store: Arc<WorkflowStore>,
    history: Arc<HistoryStore>,
    answer_timeout_secs: u64,
    tenant_concurrency_cap_default: u32,
    tenant_rpm_cap_default: u32,
    reap_tx: mpsc::UnboundedSender<CallId>,
    transfer_tx: watch::Sender<TransferSignal>,
}

impl CallActor {
    async fn run(mut self) {
        let answer_deadline = tokio::time::sleep(Duration::from_secs(self.answer_timeout_secs));
        tokio::pin!(answer_deadline);
        let mut answer_timer_active = true;

        // Armed by `StartTransferTimer` once a transfer directive lands;
        // the duration at creation time is irrelevant since `reset`
        // always re-arms it before `transfer_timer_active` goes true.
        let transfer_deadline = tokio::time::sleep(Duration::from_secs(0));
        tokio::pin!(transfer_deadline);
        let mut transfer_timer_active = false;

        loop {
            tokio::select! {
                () = &mut answer_deadline, if answer_timer_active && self.session.state == CallState::Initiated => {
                    answer_timer_active = false;
                    self.terminate(TerminationCause::AnswerTimeout).await;
                    break;
                }
                () = &mut transfer_deadline, if transfer_timer_active => {
                    transfer_timer_active = false;
                    self.transfer_timed_out();
                }
                event = self.rx.recv() => {
                    match event {
                        Some(event) => match self.apply(event).await {
                            ApplyOutcome::Exit => break,
                            ApplyOutcome::StartTransferTimer(secs) => {
                                transfer_deadline
                                    .as_mut()
                                    .reset(tokio::time::Instant::now() + Duration::from_secs(secs));
                                transfer_timer_active = true;
                            }
                            ApplyOutcome::CancelTransferTimer => {
                                transfer_timer_active = false;
                            }
                            ApplyOutcome::Continue => {}
                        },
                        None => break,
                    }
                }
            }
        }

        let _ = self.reap_tx.send(self.session.call_control_id.clone());
    }

    /// The dial-timeout timer elapsed with no `TransferAnswered`/`TransferFailed`
    /// in between: resume normal flow with a fallback message (§8 scenario 5).
    fn transfer_timed_out(&mut self) {
        if self.session.state == CallState::Transferring {
            self.session.state = CallState::Listening;
        }
        let _ = self.transfer_tx.send(TransferSignal::TimedOut);
    }

    /// Apply one event, returning what the event loop should do next.
    async fn apply(&mut self, event: SessionEvent) -> ApplyOutcome {
        if self.session.state.is_terminal() {
            // §4.D idempotency: duplicate hangup/etc. after termination are absorbed.
            let exit = matches!(event, SessionEvent::Hangup | SessionEvent::Failed(_));
            if let SessionEvent::Snapshot(reply) = event {
                let _ = reply.send(self.session.clone());
            }
            return if exit {
                ApplyOutcome::Exit
            } else {
                ApplyOutcome::Continue
            };
        }

        match event {
            SessionEvent::Initiated { caps, voice_mode } => {
                self.session.voice_mode = voice_mode;
                let tenant_rpm_cap = caps.max_calls_per_minute_tenant.unwrap_or(self.tenant_rpm_cap_default);
                let tenant_concurrency_cap = caps
                    .max_concurrent_calls_tenant
                    .unwrap_or(self.tenant_concurrency_cap_default);
                match self
                    .capacity
                    .try_reserve(
                        &self.session.tenant_id,
                        tenant_rpm_cap,
                        tenant_concurrency_cap,
                        caps.max_concurrent_calls_global,
                    )
                    .await
                {
                    Admission::Admitted => {
                        self.session.state = CallState::Initiated;
                        metrics::record_admission(&self.session.tenant_id, None);
                        metrics::CALLS_ACTIVE.inc();
                    }
                    Admission::Rejected(kind) => {
                        metrics::record_admission(&self.session.tenant_id, Some(&kind.to_string()));
                        self.terminate(reject_cause(kind)).await;
                        return ApplyOutcome::Exit;
                    }
                }
            }
            SessionEvent::Answered => {
                if self.session.state == CallState::Initiated {
                    self.session.state = CallState::Answered;
                    self.session.answered_at = Some(Utc::now());
                }
            }
            SessionEvent::MediaConnected => {
                if self.session.state == CallState::Answered {
                    self.session.state = CallState::MediaConnected;
                }
            }
            SessionEvent::CallerTurn(text) => {
                let _ = self.session.append_turn(Turn {
                    role: TurnRole::Caller,
                    text,
                    at: Utc::now(),
                    interrupted: false,
                });
                self.session.state = CallState::Thinking;
            }
            SessionEvent::AssistantTurn { text, interrupted } => {
                let _ = self.session.append_turn(Turn {
                    role: TurnRole::Assistant,
                    text,
                    at: Utc::now(),
                    interrupted,
                });
                self.session.state = CallState::Speaking;
            }
            SessionEvent::Transferring { to, audio_url: _, timeout_secs } => {
                self.session.transfer_target = Some(to);
                self.session.state = CallState::Transferring;
                let _ = self.transfer_tx.send(TransferSignal::Idle);
                return ApplyOutcome::StartTransferTimer(timeout_secs.unwrap_or(DEFAULT_TRANSFER_TIMEOUT_SECS));
            }
            SessionEvent::TransferAnswered => {
                if self.session.state == CallState::Transferring {
                    let _ = self.transfer_tx.send(TransferSignal::Answered);
                    return ApplyOutcome::CancelTransferTimer;
                }
            }
            SessionEvent::TransferFailed => {
                if self.session.state == CallState::Transferring {
                    self.session.state = CallState::Listening;
                    let _ = self.transfer_tx.send(TransferSignal::Failed);
                    return ApplyOutcome::CancelTransferTimer;
                }
            }
            SessionEvent::Hangup => {
                self.terminate(TerminationCause::Normal).await;
                return ApplyOutcome::Exit;
            }
            SessionEvent::Failed(cause) => {
                self.terminate(cause).await;
                return ApplyOutcome::Exit;
            }
            SessionEvent::Snapshot(reply) => {
                let _ = reply.send(self.session.clone());
            }
        }
        ApplyOutcome::Continue
    }

    /// Shared terminal-state handling: release capacity once, persist
    /// history best-effort, emit the `call_ended` workflow event, and
    /// deregister from the parent registry.
    async fn terminate(&mut self, cause: TerminationCause) {
        self.session.ended_at = Some(Utc::now());
        self.session.termination_cause = Some(cause);
        // Dead air ends the call gracefully (a farewell, not a failure);
        // only answer timeout and rejected admission are real failures.
        self.session.state = if matches!(cause, TerminationCause::Normal | TerminationCause::DeadAir) {
            CallState::Ended
        } else {
            CallState::Failed
        };

        if !self.session.released {
            self.session.released = true;
            // A rejected admission never acquired a slot; nothing to release.
            if !matches!(
                cause,
                TerminationCause::RejectedGlobal
                    | TerminationCause::RejectedTenantConcurrency
                    | TerminationCause::RejectedTenantRate
            ) {
                self.capacity.release(&self.session.tenant_id).await;
            }
            metrics::CALLS_ACTIVE.dec();
        }

        let duration_secs = self.session.duration_ms() as f64 / 1000.0;
        metrics::record_call_ended(&self.session.tenant_id, &format!("{cause:?}"), duration_secs);

        self.history.record_terminated_call(&self.session).await;

        let ended_event = CallEndedEvent {
            tenant_id: self.session.tenant_id.clone(),
            call_id: self.session.call_control_id.clone(),
            caller_id: self.session.caller_id.clone(),
            duration_ms: self.session.duration_ms(),
            turns: self.session.turn_count(),
            transcript: self.session.transcript(),
            lead: self.session.lead.clone(),
        };
        self.enqueue_workflow_jobs(ended_event).await;
    }

    async fn enqueue_workflow_jobs(&self, event: CallEndedEvent) {
        let workflows = match self.workflow_store.load(&event.tenant_id).await {
            Ok(workflows) => workflows,
            Err(e) => {
                tracing::warn!(error = %e, tenant_id = %event.tenant_id, "failed to load workflows for call_ended dispatch");
                return;
            }
        };
        let jobs = vrp_workflow::engine::jobs_for_call_ended(&event, &workflows, Utc::now());
        for job in jobs {
            self.job_queue.push(job).await;
        }
    }
}

fn reject_cause(kind: RejectKind) -> TerminationCause {
    match kind {
        RejectKind::Global => TerminationCause::RejectedGlobal,
        RejectKind::TenantConcurrency => TerminationCause::RejectedTenantConcurrency,
        RejectKind::TenantRate => TerminationCause::RejectedTenantRate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrp_kvstore::InMemoryStore;

    fn caps() -> TenantCaps {
        TenantCaps {
            max_concurrent_calls_tenant: Some(5),
            max_calls_per_minute_tenant: Some(10),
            max_concurrent_calls_global: None,
        }
    }

    async fn registry() -> CallRegistry {
        let kv: Arc<dyn vrp_kvstore::KvStore> = Arc::new(InMemoryStore::new());
        let capacity = Arc::new(CapacityController::new(kv.clone(), 120, 100));
        let job_queue = Arc::new(JobQueue::new(kv.clone()));
        let workflow_store = Arc::new(WorkflowStore::new(kv.clone(), "workflows"));
        let history = Arc::new(HistoryStore::new(kv));
        CallRegistry::new(capacity, job_queue, workflow_store, history, 30, 5, 10)
    }

    #[tokio::test]
    async fn admit_then_snapshot_reaches_initiated() {
        let registry = registry().await;
        registry
            .admit(
                "cc1".into(),
                "acme".into(),
                "+15551234567".into(),
                "+15557654321".into(),
                caps(),
                VoiceMode::Preset,
            )
            .await;
        // Allow the actor to process its opening event.
        tokio::task::yield_now().await;
        let snap = registry.snapshot(&"cc1".to_string()).await.unwrap();
        assert_eq!(snap.state, CallState::Initiated);
    }

    #[tokio::test]
    async fn hangup_after_turns_computes_transcript_and_ends() {
        let registry = registry().await;
        registry
            .admit("cc2".into(), "acme".into(), "caller".into(), "did".into(), caps(), VoiceMode::Preset)
            .await;
        registry.send(&"cc2".to_string(), SessionEvent::Answered).await;
        registry.send(&"cc2".to_string(), SessionEvent::MediaConnected).await;
        registry
            .send(&"cc2".to_string(), SessionEvent::CallerTurn("I need a quote".into()))
            .await;
        registry
            .send(
                &"cc2".to_string(),
                SessionEvent::AssistantTurn { text: "Sure, one moment".into(), interrupted: false },
            )
            .await;
        registry.send(&"cc2".to_string(), SessionEvent::Hangup).await;
        tokio::task::yield_now().await;
        let snap = registry.snapshot(&"cc2".to_string()).await.unwrap();
        assert_eq!(snap.state, CallState::Ended);
        assert_eq!(snap.turn_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_hangup_after_ended_is_absorbed() {
        let registry = registry().await;
        registry
            .admit("cc3".into(), "acme".into(), "caller".into(), "did".into(), caps(), VoiceMode::Preset)
            .await;
        registry.send(&"cc3".to_string(), SessionEvent::Hangup).await;
        registry.send(&"cc3".to_string(), SessionEvent::Hangup).await;
        tokio::task::yield_now().await;
        let snap = registry.snapshot(&"cc3".to_string()).await.unwrap();
        assert_eq!(snap.state, CallState::Ended);
    }

    #[tokio::test]
    async fn rejected_admission_goes_straight_to_failed() {
        let kv: Arc<dyn vrp_kvstore::KvStore> = Arc::new(InMemoryStore::new());
        let capacity = Arc::new(CapacityController::new(kv.clone(), 120, 0));
        let job_queue = Arc::new(JobQueue::new(kv.clone()));
        let workflow_store = Arc::new(WorkflowStore::new(kv.clone(), "workflows"));
        let history = Arc::new(HistoryStore::new(kv));
        let registry = CallRegistry::new(capacity, job_queue, workflow_store, history, 30, 5, 10);

        registry
            .admit("cc4".into(), "acme".into(), "caller".into(), "did".into(), caps(), VoiceMode::Preset)
            .await;
        tokio::task::yield_now().await;
        let snap = registry.snapshot(&"cc4".to_string()).await.unwrap();
        assert_eq!(snap.state, CallState::Failed);
        assert_eq!(snap.termination_cause, Some(TerminationCause::RejectedGlobal));
    }

    #[tokio::test]
    async fn dead_air_ends_gracefully_not_failed() {
        let registry = registry().await;
        registry
            .admit("cc5".into(), "acme".into(), "caller".into(), "did".into(), caps(), VoiceMode::Preset)
            .await;
        registry
            .send(&"cc5".to_string(), SessionEvent::Failed(TerminationCause::DeadAir))
            .await;
        tokio::task::yield_now().await;
        let snap = registry.snapshot(&"cc5".to_string()).await.unwrap();
        assert_eq!(snap.state, CallState::Ended);
        assert_eq!(snap.termination_cause, Some(TerminationCause::DeadAir));
    }

    #[tokio::test]
    async fn omitted_tenant_caps_fall_back_to_registry_defaults() {
        let kv: Arc<dyn vrp_kvstore::KvStore> = Arc::new(InMemoryStore::new());
        let capacity = Arc::new(CapacityController::new(kv.clone(), 120, 100));
        let job_queue = Arc::new(JobQueue::new(kv.clone()));
        let workflow_store = Arc::new(WorkflowStore::new(kv.clone(), "workflows"));
        let history = Arc::new(HistoryStore::new(kv));
        // Tenant concurrency default of 1, no per-tenant override set.
        let registry = CallRegistry::new(capacity, job_queue, workflow_store, history, 30, 1, 10);

        let no_override = TenantCaps {
            max_concurrent_calls_tenant: None,
            max_calls_per_minute_tenant: None,
            max_concurrent_calls_global: None,
        };
        registry
            .admit("cc7".into(), "acme".into(), "caller".into(), "did".into(), no_override.clone(), VoiceMode::Preset)
            .await;
        tokio::task::yield_now().await;
        let first = registry.snapshot(&"cc7".to_string()).await.unwrap();
        assert_eq!(first.state, CallState::Initiated);

        // A second call for the same tenant exceeds the default cap of 1.
        registry
            .admit("cc8".into(), "acme".into(), "caller".into(), "did".into(), no_override, VoiceMode::Preset)
            .await;
        tokio::task::yield_now().await;
        let second = registry.snapshot(&"cc8".to_string()).await.unwrap();
        assert_eq!(second.state, CallState::Failed);
        assert_eq!(second.termination_cause, Some(TerminationCause::RejectedTenantConcurrency));
    }

    #[tokio::test]
    async fn terminated_call_is_reaped_from_registry() {
        let registry = registry().await;
        registry
            .admit("cc6".into(), "acme".into(), "caller".into(), "did".into(), caps(), VoiceMode::Preset)
            .await;
        registry.send(&"cc6".to_string(), SessionEvent::Hangup).await;
        // Give the actor a chance to exit and send its reap message, and
        // the reaper task a chance to process it.
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!registry.is_known(&"cc6".to_string()).await);
    }

    #[tokio::test]
    async fn transfer_answered_bridges_without_ending_the_call() {
        let registry = registry().await;
        registry
            .admit("cc9".into(), "acme".into(), "caller".into(), "did".into(), caps(), VoiceMode::Preset)
            .await;
        registry.send(&"cc9".to_string(), SessionEvent::Answered).await;
        registry.send(&"cc9".to_string(), SessionEvent::MediaConnected).await;
        registry
            .send(
                &"cc9".to_string(),
                SessionEvent::Transferring { to: "+15550001111".into(), audio_url: None, timeout_secs: Some(5) },
            )
            .await;
        tokio::task::yield_now().await;
        let mut transfer_rx = registry.transfer_signal(&"cc9".to_string()).await.unwrap();

        registry.send(&"cc9".to_string(), SessionEvent::TransferAnswered).await;
        transfer_rx.changed().await.unwrap();
        assert_eq!(*transfer_rx.borrow(), TransferSignal::Answered);

        let snap = registry.snapshot(&"cc9".to_string()).await.unwrap();
        assert_eq!(snap.state, CallState::Transferring);
        assert_eq!(snap.transfer_target.as_deref(), Some("+15550001111"));
    }

    #[tokio::test]
    async fn transfer_failed_returns_to_listening() {
        let registry = registry().await;
        registry
            .admit("cc10".into(), "acme".into(), "caller".into(), "did".into(), caps(), VoiceMode::Preset)
            .await;
        registry
            .send(
                &"cc10".to_string(),
                SessionEvent::Transferring { to: "+15550002222".into(), audio_url: None, timeout_secs: Some(5) },
            )
            .await;
        let mut transfer_rx = registry.transfer_signal(&"cc10".to_string()).await.unwrap();

        registry.send(&"cc10".to_string(), SessionEvent::TransferFailed).await;
        transfer_rx.changed().await.unwrap();
        assert_eq!(*transfer_rx.borrow(), TransferSignal::Failed);

        let snap = registry.snapshot(&"cc10".to_string()).await.unwrap();
        assert_eq!(snap.state, CallState::Listening);
    }

    #[tokio::test]
    async fn transfer_dial_timeout_returns_to_listening_and_signals() {
        let registry = registry().await;
        registry
            .admit("cc11".into(), "acme".into(), "caller".into(), "did".into(), caps(), VoiceMode::Preset)
            .await;
        registry
            .send(
                &"cc11".to_string(),
                SessionEvent::Transferring {
                    to: "+15550003333".into(),
                    audio_url: None,
                    timeout_secs: Some(0),
                },
            )
            .await;
        let mut transfer_rx = registry.transfer_signal(&"cc11".to_string()).await.unwrap();

        transfer_rx.changed().await.unwrap();
        assert_eq!(*transfer_rx.borrow(), TransferSignal::TimedOut);

        let snap = registry.snapshot(&"cc11".to_string()).await.unwrap();
        assert_eq!(snap.state, CallState::Listening);
    }
}
