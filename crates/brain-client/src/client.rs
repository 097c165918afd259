//! HTTP implementation of [`BrainClient`] against a single
//! OpenAI-compatible chat-completions endpoint (§4.G).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use vrp_domain::error::{Error, Result};
use vrp_domain::stream::{BoxStream, BrainReply, BrainStreamEvent};

use crate::sse::sse_response_stream;
use crate::traits::{BrainClient, BrainRequest};

fn from_reqwest(e: reqwest::Error) -> Error {
    Error::UpstreamFailure {
        service: "brain".into(),
        message: e.to_string(),
    }
}

/// Talks to a brain endpoint that speaks an OpenAI-style chat-completions
/// wire format but replies with a `BrainReply` envelope (`text`,
/// `transfer`, `voice_directive`, `hangup`) instead of raw message content.
pub struct HttpBrainClient {
    http: reqwest::Client,
    base_url: String,
    streaming_enabled: bool,
}

impl HttpBrainClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, streaming_enabled: bool) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("brain http client builds");
        Self {
            http,
            base_url: base_url.into(),
            streaming_enabled,
        }
    }

    fn body(&self, req: &BrainRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<_> = req
            .history
            .iter()
            .map(|turn| {
                json!({
                    "role": match turn.role {
                        vrp_domain::call::TurnRole::Caller => "user",
                        vrp_domain::call::TurnRole::Assistant => "assistant",
                    },
                    "content": turn.text,
                })
            })
            .chain(std::iter::once(json!({
                "role": "user",
                "content": req.transcript,
            })))
            .collect();

        json!({
            "tenant_id": req.tenant_id,
            "call_control_id": req.call_control_id,
            "messages": messages,
            "transfer_profiles": req.transfer_profiles,
            "assistant_context": req.assistant_context,
            "stream": stream,
        })
    }
}

#[async_trait]
impl BrainClient for HttpBrainClient {
    async fn reply(&self, req: &BrainRequest) -> Result<BrainReply> {
        let response = self
            .http
            .post(format!("{}/v1/brain/reply", self.base_url))
            .json(&self.body(req, false))
            .send()
            .await
            .map_err(from_reqwest)?;

        if !response.status().is_success() {
            return Err(Error::UpstreamFailure {
                service: "brain".into(),
                message: format!("brain returned status {}", response.status()),
            });
        }

        response.json::<BrainReply>().await.map_err(from_reqwest)
    }

    async fn reply_stream(&self, req: &BrainRequest) -> Result<BoxStream<'static, Result<BrainStreamEvent>>> {
        if !self.streaming_enabled {
            let reply = self.reply(req).await?;
            let events = vec![Ok(BrainStreamEvent::Done { reply })];
            return Ok(Box::pin(futures_util::stream::iter(events)));
        }

        let response = self
            .http
            .post(format!("{}/v1/brain/reply_stream", self.base_url))
            .json(&self.body(req, true))
            .send()
            .await
            .map_err(from_reqwest)?;

        if !response.status().is_success() {
            return Err(Error::UpstreamFailure {
                service: "brain".into(),
                message: format!("brain returned status {}", response.status()),
            });
        }

        Ok(sse_response_stream(response, |data| {
            match serde_json::from_str::<BrainStreamEvent>(data) {
                Ok(event) => vec![Ok(event)],
                Err(e) => vec![Err(Error::UpstreamFailure {
                    service: "brain".into(),
                    message: format!("malformed SSE payload: {e}"),
                })],
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_appends_transcript_as_final_user_turn() {
        let client = HttpBrainClient::new("http://localhost:9", Duration::from_secs(1), true);
        let req = BrainRequest {
            tenant_id: "acme".into(),
            call_control_id: "cc1".into(),
            transcript: "book an appointment".into(),
            history: vec![],
            transfer_profiles: vec!["sales".into()],
            assistant_context: Default::default(),
        };
        let body = client.body(&req, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"], "book an appointment");
        assert_eq!(body["stream"], false);
    }
}
