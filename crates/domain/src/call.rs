//! Call Session data model (§3 Call Session, Invariants).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `call_control_id` is the provider-supplied, globally-unique call identifier.
pub type CallId = String;

/// `initiated → answered → media_connected → {speaking|listening|thinking|transferring} → ended`,
/// with `failed` reachable as a terminal state from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Initiated,
    Answered,
    MediaConnected,
    Listening,
    Speaking,
    Thinking,
    Transferring,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }
}

/// Why a call reached a terminal state — recorded for analytics and the
/// workflow engine's `missed_call` trigger (§3 call_history.termination_cause).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    Normal,
    RejectedGlobal,
    RejectedTenantConcurrency,
    RejectedTenantRate,
    DeadAir,
    AnswerTimeout,
    UpstreamError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    Preset,
    Cloned,
}

/// One turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Caller,
    Assistant,
}

/// Fields extracted from the conversation for workflow/lead purposes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedLead {
    #[serde(flatten)]
    pub fields: std::collections::HashMap<String, serde_json::Value>,
}

/// The mutable record the Call Registry owns exclusively (§4.D Ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub call_control_id: CallId,
    pub tenant_id: String,
    pub caller_id: String,
    pub called_number: String,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub lead: ExtractedLead,
    #[serde(default)]
    pub transfer_target: Option<String>,
    pub voice_mode: VoiceMode,
    /// Per-call RNG seed, used to derive deterministic sub-identifiers
    /// (e.g. quote numbers) without a shared global RNG.
    pub rng_seed: u64,
    /// Monotonic counter ordering inbound events on the session actor's queue.
    #[serde(default)]
    pub sequence: u64,
    /// Single gate for idempotent capacity release (§4.B).
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub termination_cause: Option<TerminationCause>,
}

impl CallSession {
    pub fn new(
        call_control_id: CallId,
        tenant_id: String,
        caller_id: String,
        called_number: String,
        rng_seed: u64,
    ) -> Self {
        Self {
            call_control_id,
            tenant_id,
            caller_id,
            called_number,
            state: CallState::Initiated,
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            history: Vec::new(),
            lead: ExtractedLead::default(),
            transfer_target: None,
            voice_mode: VoiceMode::Preset,
            rng_seed,
            sequence: 0,
            released: false,
            termination_cause: None,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_milliseconds().max(0)
    }

    pub fn turn_count(&self) -> usize {
        self.history.len()
    }

    /// Append a turn, enforcing the ordering invariant: no assistant turn
    /// may be appended before at least one caller turn exists.
    pub fn append_turn(&mut self, turn: Turn) -> crate::error::Result<()> {
        if turn.role == TurnRole::Assistant
            && !self.history.iter().any(|t| t.role == TurnRole::Caller)
        {
            return Err(crate::error::Error::Internal(
                "assistant turn appended before any caller turn".into(),
            ));
        }
        self.history.push(turn);
        Ok(())
    }

    pub fn transcript(&self) -> String {
        self.history
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A `call_history` row written on termination (§4.I).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallHistoryRecord {
    pub tenant_id: String,
    pub call_id: CallId,
    pub caller_id: String,
    pub stage: CallState,
    pub lead: ExtractedLead,
    pub history: Vec<Turn>,
    pub transcript: String,
    pub duration_ms: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub termination_cause: TerminationCause,
}

/// Event published on `call.hangup` completion (§4.H Event bus).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEndedEvent {
    pub tenant_id: String,
    pub call_id: CallId,
    pub caller_id: String,
    pub duration_ms: i64,
    pub turns: usize,
    pub transcript: String,
    pub lead: ExtractedLead,
}
