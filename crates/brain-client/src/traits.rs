use async_trait::async_trait;
use vrp_domain::call::Turn;
use vrp_domain::error::Result;
use vrp_domain::stream::{BoxStream, BrainReply};

/// Request assembled on a non-empty transcript (§4.F Brain invocation).
#[derive(Debug, Clone)]
pub struct BrainRequest {
    pub tenant_id: String,
    pub call_control_id: String,
    pub transcript: String,
    pub history: Vec<Turn>,
    pub transfer_profiles: Vec<String>,
    pub assistant_context: std::collections::HashMap<String, String>,
}

/// Two operations against the assistant service: non-streaming `reply`
/// and SSE-streaming `reply_stream`. Both return the same structured
/// `BrainReply`; streaming additionally surfaces tokens as they arrive.
#[async_trait]
pub trait BrainClient: Send + Sync {
    async fn reply(&self, req: &BrainRequest) -> Result<BrainReply>;

    async fn reply_stream(
        &self,
        req: &BrainRequest,
    ) -> Result<BoxStream<'static, Result<vrp_domain::stream::BrainStreamEvent>>>;
}
