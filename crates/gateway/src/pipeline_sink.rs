//! Adapts [`PipelineSink`] callbacks from the audio pipeline into
//! [`SessionEvent`]s on a specific call's registry entry.

use std::sync::Arc;

use async_trait::async_trait;
use vrp_audio_pipeline::PipelineSink;
use vrp_domain::call::TerminationCause;

use crate::call_registry::{CallRegistry, SessionEvent};

pub struct CallRegistrySink {
    registry: Arc<CallRegistry>,
    call_control_id: String,
}

impl CallRegistrySink {
    pub fn new(registry: Arc<CallRegistry>, call_control_id: String) -> Self {
        Self { registry, call_control_id }
    }
}

#[async_trait]
impl PipelineSink for CallRegistrySink {
    async fn caller_turn(&self, text: String) {
        self.registry
            .send(&self.call_control_id, SessionEvent::CallerTurn(text))
            .await;
    }

    async fn assistant_turn(&self, text: String, interrupted: bool) {
        self.registry
            .send(
                &self.call_control_id,
                SessionEvent::AssistantTurn { text, interrupted },
            )
            .await;
    }

    async fn transferring(&self, to: String, audio_url: Option<String>, timeout_secs: Option<u64>) {
        self.registry
            .send(
                &self.call_control_id,
                SessionEvent::Transferring { to, audio_url, timeout_secs },
            )
            .await;
    }

    async fn hangup(&self) {
        self.registry
            .send(&self.call_control_id, SessionEvent::Hangup)
            .await;
    }

    async fn dead_air(&self) {
        self.registry
            .send(
                &self.call_control_id,
                SessionEvent::Failed(TerminationCause::DeadAir),
            )
            .await;
    }
}
