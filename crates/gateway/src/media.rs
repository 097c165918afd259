//! Media Transport (§4.E): the bidirectional WebSocket keyed by
//! `call_control_id`, wiring ingress/egress codec + resample onto the
//! Audio Pipeline (§4.F).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use vrp_audio_pipeline::{self as pipeline, PipelineConfig, SegmenterConfig, TtsClient, WhisperHttpClient};
use vrp_domain::tenant::RuntimeTenantConfig;
use vrp_media_protocol::{mulaw, MediaFrame};

use crate::metrics;
use crate::pipeline_sink::CallRegistrySink;
use crate::resample::RateConverter;
use crate::state::AppState;

const PIPELINE_SAMPLE_RATE_HZ: u32 = 16_000;
const WIRE_SAMPLE_RATE_HZ: u32 = 8_000;
const MULAW_FRAME_SAMPLES: usize = vrp_media_protocol::MULAW_8K_FRAME_BYTES;

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    token: String,
}

/// `GET /v1/telnyx/media/{call_control_id}`
pub async fn media_ws(
    State(state): State<AppState>,
    Path(call_control_id): Path<String>,
    Query(query): Query<MediaQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let expected = state.config.media.media_stream_token.clone().unwrap_or_default();
    if expected.is_empty() || query.token.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(session) = state.call_registry.snapshot(&call_control_id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let tenant_cfg = match state.tenant_config.load_config(&session.tenant_id).await {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, tenant_id = %session.tenant_id, "failed to load tenant config for media session");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_media_socket(state, call_control_id, tenant_cfg, socket))
}

async fn handle_media_socket(
    state: AppState,
    call_control_id: String,
    tenant_cfg: Arc<RuntimeTenantConfig>,
    socket: WebSocket,
) {
    state
        .call_registry
        .send(&call_control_id, crate::call_registry::SessionEvent::MediaConnected)
        .await;

    let (mut ws_tx, mut ws_rx) = socket.split();

    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<i16>>(state.config.media.inbound_channel_capacity);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<pipeline::PlaybackChunk>(32);

    let stt = Arc::new(WhisperHttpClient::new(
        state.http.clone(),
        tenant_cfg.stt.url.clone(),
        tenant_cfg.stt.language.clone(),
    ));
    let tts_client: Arc<dyn TtsClient> = Arc::from(pipeline::tts::from_config(state.http.clone(), &tenant_cfg.tts));

    let session = match state.call_registry.snapshot(&call_control_id).await {
        Some(s) => s,
        None => return,
    };

    let pipeline_config = PipelineConfig {
        tenant_id: session.tenant_id.clone(),
        call_control_id: call_control_id.clone(),
        segmenter: SegmenterConfig {
            sample_rate_hz: PIPELINE_SAMPLE_RATE_HZ,
            chunk_ms: state.config.media.stt_chunk_ms,
            silence_ms: state.config.media.stt_silence_ms,
            ..SegmenterConfig::default()
        },
        dead_air_ms: state.config.media.dead_air_ms,
        barge_in_min_ms: state.config.media.barge_in_min_ms,
        brain_timeout_ms: state.config.brain.timeout_ms,
        transfer_profiles: tenant_cfg.transfer_profiles.iter().map(|p| p.name.clone()).collect(),
        assistant_context: tenant_cfg.assistant_context.clone(),
        streaming_enabled: state.config.brain.streaming_enabled,
    };

    let sink = Arc::new(CallRegistrySink::new(state.call_registry.clone(), call_control_id.clone()));

    let transfer_signal = state
        .call_registry
        .transfer_signal(&call_control_id)
        .await
        .expect("call admitted and snapshotted above");

    let handle = pipeline::spawn(
        pipeline_config,
        inbound_rx,
        outbound_tx,
        state.brain.clone(),
        stt,
        tts_client,
        sink,
        state.http.clone(),
        transfer_signal,
    );

    let mut ingress_resampler = RateConverter::new(WIRE_SAMPLE_RATE_HZ, PIPELINE_SAMPLE_RATE_HZ, MULAW_FRAME_SAMPLES);
    // Built lazily from the first chunk's rate: every chunk from one
    // call's TTS engine is produced at the same rate, so one converter
    // (with its carried remainder) serves the whole call.
    let mut egress_resampler: Option<(u32, RateConverter)> = None;
    let mut egress_sequence: u64 = 0;

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match MediaFrame::decode(&text) {
                            Ok(MediaFrame::Start { media_format, .. }) => {
                                tracing::debug!(%call_control_id, ?media_format, "media stream started");
                            }
                            Ok(MediaFrame::Media { payload, .. }) => {
                                let Ok(bytes) = base64_decode(&payload) else {
                                    continue;
                                };
                                let pcm8k = mulaw::decode(&bytes);
                                let pcm16k = ingress_resampler.process(&pcm8k);
                                if !pcm16k.is_empty() && inbound_tx.try_send(pcm16k).is_err() {
                                    metrics::record_media_frame_dropped("inbound");
                                }
                            }
                            Ok(MediaFrame::Stop) => break,
                            Err(e) => {
                                tracing::debug!(error = %e, "malformed media frame, ignoring");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "media socket read error");
                        break;
                    }
                }
            }
            chunk = outbound_rx.recv() => {
                match chunk {
                    Some(chunk) => {
                        let (_, resampler) = egress_resampler.get_or_insert_with(|| {
                            (chunk.sample_rate_hz, RateConverter::new(chunk.sample_rate_hz, WIRE_SAMPLE_RATE_HZ, 320))
                        });
                        let pcm8k = resampler.process(&chunk.pcm);
                        for frame_samples in pcm8k.chunks(MULAW_FRAME_SAMPLES) {
                            let encoded = mulaw::encode(frame_samples);
                            let frame = MediaFrame::media(egress_sequence, &encoded);
                            egress_sequence += 1;
                            if let Ok(json) = frame.encode() {
                                if ws_tx.send(Message::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }

    handle.abort();
    let _ = ws_tx
        .send(Message::Text(MediaFrame::Stop.encode().unwrap_or_default()))
        .await;
}

fn base64_decode(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(payload)
}
