use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for brain-client SSE streaming.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while streaming a brain reply.
///
/// A lazy, finite, non-restartable sequence terminated by either `Done`
/// (carrying the authoritative final reply) or `Error`. Partial
/// consumption is permitted: a caller that has already seen `Token`
/// events may fall back to the text assembled so far if `Error` arrives
/// mid-flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BrainStreamEvent {
    #[serde(rename = "token")]
    Token { text: String },

    #[serde(rename = "meta")]
    Meta { data: serde_json::Value },

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "done")]
    Done { reply: BrainReply },

    #[serde(rename = "error")]
    Error { message: String },
}

/// The structured reply from the brain service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrainReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transfer: Option<TransferDirective>,
    #[serde(default)]
    pub voice_directive: Option<VoiceDirective>,
    #[serde(default)]
    pub hangup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferDirective {
    pub to: String,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceMode {
    Preset,
    Cloned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceDirective {
    pub mode: VoiceMode,
    #[serde(default)]
    pub speaker_wav_url: Option<String>,
}

/// Carries a dial's outcome from the Call Registry's dial-timeout timer
/// (the one clock that owns this decision) across to the Audio Pipeline's
/// playback stage, which has no visibility into provider webhooks itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferSignal {
    #[default]
    Idle,
    Answered,
    Failed,
    TimedOut,
}
