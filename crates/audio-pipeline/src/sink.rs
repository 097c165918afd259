//! Seam between the Audio Pipeline (§4.F) and the Call Registry (§4.D):
//! the pipeline reports what happened on a call without knowing how a
//! session's state machine is represented.

use async_trait::async_trait;

/// Callbacks the pipeline invokes as a call's turns are recognised,
/// answered, and the brain signals transfer or hangup. Implemented by
/// the gateway against its [`CallRegistry`] handle for one
/// `call_control_id`.
#[async_trait]
pub trait PipelineSink: Send + Sync {
    /// A non-empty transcript was recognised from a closed segment.
    async fn caller_turn(&self, text: String);

    /// An assistant reply finished playing (or was cut short by barge-in).
    async fn assistant_turn(&self, text: String, interrupted: bool);

    /// The brain directed a transfer after its accompanying text (if any)
    /// finished playing. `audio_url` is hold audio to play while dialling
    /// `to`; `timeout_secs` is the dial timeout (defaulted by the
    /// registry's timer owner if absent).
    async fn transferring(&self, to: String, audio_url: Option<String>, timeout_secs: Option<u64>);

    /// The brain set `hangup: true`, and its accompanying text finished
    /// playing.
    async fn hangup(&self);

    /// `DEAD_AIR_MS` elapsed since the last inbound caller frame.
    async fn dead_air(&self);
}
