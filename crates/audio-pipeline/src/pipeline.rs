//! Audio Pipeline orchestrator (§4.F Structure): three pipelined
//! stages — segmenter, recogniser+brain, synthesiser+playback — each an
//! independent task connected by bounded channels, so a slow brain call
//! never blocks audio ingress and a slow caller never blocks playback of
//! what's already been decided.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use vrp_brain_client::{BrainClient, BrainRequest};
use vrp_domain::call::{Turn, TurnRole};
use vrp_domain::stream::{BrainReply, BrainStreamEvent, TransferDirective, TransferSignal, VoiceDirective};

use crate::phrasing;
use crate::playback::{PlaybackChunk, PlaybackScheduler};
use crate::segmenter::{Segment, Segmenter, SegmenterConfig, SegmenterEvent};
use crate::sink::PipelineSink;
use crate::stt::SttClient;
use crate::tts::{from_reqwest, wav_bytes_to_pcm, SynthesisOptions, TtsClient};

/// Spoken when a transfer dial fails or times out before the text already
/// queued for the fallback path (§8 scenario 5).
const TRANSFER_FALLBACK_TEXT: &str = "I wasn't able to connect you. Let's continue here — how else can I help?";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tenant_id: String,
    pub call_control_id: String,
    pub segmenter: SegmenterConfig,
    pub dead_air_ms: u64,
    pub barge_in_min_ms: u64,
    pub brain_timeout_ms: u64,
    pub transfer_profiles: Vec<String>,
    pub assistant_context: HashMap<String, String>,
    pub streaming_enabled: bool,
}

/// Held by the caller (the media WebSocket handler) so the pipeline can
/// be torn down in lockstep with the call actor — cancellation
/// propagates to all three stage tasks (§5 Cancellation & timeouts).
pub struct PipelineHandle {
    stages: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn abort(&self) {
        for stage in &self.stages {
            stage.abort();
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

/// One assistant turn handed from the brain stage to the synthesiser.
struct AssistantTurnJob {
    text: String,
    phrases: Vec<String>,
    transfer: Option<TransferDirective>,
    hangup: bool,
    voice_override: Option<VoiceDirective>,
}

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    config: PipelineConfig,
    inbound_rx: mpsc::Receiver<Vec<i16>>,
    outbound_tx: mpsc::Sender<PlaybackChunk>,
    brain: Arc<dyn BrainClient>,
    stt: Arc<dyn SttClient>,
    tts: Arc<dyn TtsClient>,
    sink: Arc<dyn PipelineSink>,
    http: reqwest::Client,
    transfer_signal: watch::Receiver<TransferSignal>,
) -> PipelineHandle {
    let (segment_tx, segment_rx) = mpsc::channel::<Segment>(8);
    let (job_tx, job_rx) = mpsc::channel::<AssistantTurnJob>(4);
    let (speaking_tx, speaking_rx) = watch::channel::<Option<Instant>>(None);

    let segmenter_stage = tokio::spawn(run_segmenter(
        config.clone(),
        inbound_rx,
        segment_tx,
        speaking_tx,
        sink.clone(),
    ));

    let brain_stage = tokio::spawn(run_recognizer_brain(
        config.clone(),
        segment_rx,
        job_tx,
        stt,
        brain,
        sink.clone(),
    ));

    let playback_stage = tokio::spawn(run_synthesizer_playback(
        config,
        job_rx,
        outbound_tx,
        tts,
        sink,
        speaking_rx,
        transfer_signal,
        http,
    ));

    PipelineHandle {
        stages: vec![segmenter_stage, brain_stage, playback_stage],
    }
}

/// Stage 1: feeds 20ms PCM frames to the VAD segmenter, forwards closed
/// segments downstream, and owns the dead-air timer (§4.F Recogniser —
/// the dead-air timer is specified against the last caller frame, which
/// only this stage observes directly).
async fn run_segmenter(
    config: PipelineConfig,
    mut inbound_rx: mpsc::Receiver<Vec<i16>>,
    segment_tx: mpsc::Sender<Segment>,
    speaking_tx: watch::Sender<Option<Instant>>,
    sink: Arc<dyn PipelineSink>,
) {
    let mut segmenter = Segmenter::new(config.segmenter);
    let dead_air = Duration::from_millis(config.dead_air_ms);
    let mut last_frame_at = Instant::now();

    loop {
        tokio::select! {
            frame = inbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        last_frame_at = Instant::now();
                        for event in segmenter.push_frame(&frame) {
                            match event {
                                SegmenterEvent::CallerSpeaking => {
                                    let _ = speaking_tx.send(Some(Instant::now()));
                                }
                                SegmenterEvent::SegmentClosed(segment) => {
                                    let _ = speaking_tx.send(None);
                                    if segment_tx.send(segment).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    None => return,
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(200)) => {
                if last_frame_at.elapsed() >= dead_air {
                    sink.dead_air().await;
                    return;
                }
            }
        }
    }
}

/// Stage 2: STT each segment, consult the brain on a non-empty
/// transcript, and hand the assembled reply to the playback stage.
async fn run_recognizer_brain(
    config: PipelineConfig,
    mut segment_rx: mpsc::Receiver<Segment>,
    job_tx: mpsc::Sender<AssistantTurnJob>,
    stt: Arc<dyn SttClient>,
    brain: Arc<dyn BrainClient>,
    sink: Arc<dyn PipelineSink>,
) {
    let mut history: Vec<Turn> = Vec::new();
    let brain_timeout = Duration::from_millis(config.brain_timeout_ms);

    while let Some(segment) = segment_rx.recv().await {
        let transcript = match stt.transcribe(&segment.pcm, config.segmenter.sample_rate_hz).await {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, call_control_id = %config.call_control_id, "stt failed, dropping segment");
                continue;
            }
        };

        sink.caller_turn(transcript.clone()).await;
        history.push(Turn {
            role: TurnRole::Caller,
            text: transcript.clone(),
            at: chrono::Utc::now(),
            interrupted: false,
        });

        let request = BrainRequest {
            tenant_id: config.tenant_id.clone(),
            call_control_id: config.call_control_id.clone(),
            transcript,
            history: history.clone(),
            transfer_profiles: config.transfer_profiles.clone(),
            assistant_context: config.assistant_context.clone(),
        };

        let reply = tokio::time::timeout(brain_timeout, get_reply(&*brain, &request, config.streaming_enabled))
            .await
            .unwrap_or_else(|_| fallback_reply());

        if let Some(text) = &reply.text {
            history.push(Turn {
                role: TurnRole::Assistant,
                text: text.clone(),
                at: chrono::Utc::now(),
                interrupted: false,
            });
        }

        let phrases = reply
            .text
            .as_deref()
            .map(phrasing::split_text)
            .unwrap_or_default();

        let job = AssistantTurnJob {
            text: reply.text.clone().unwrap_or_default(),
            phrases,
            transfer: reply.transfer.clone(),
            hangup: reply.hangup,
            voice_override: reply.voice_directive,
        };
        if job_tx.send(job).await.is_err() {
            return;
        }
    }
}

/// Non-streaming or SSE-streaming brain call (§4.G). Streaming failures
/// after tokens were already emitted fall back to the assembled text
/// rather than surfacing the error (§4.G, §9 Brain SSE streaming).
async fn get_reply(brain: &dyn BrainClient, request: &BrainRequest, streaming_enabled: bool) -> BrainReply {
    let outcome = if streaming_enabled {
        stream_reply(brain, request).await
    } else {
        brain.reply(request).await
    };
    outcome.unwrap_or_else(|e| {
        tracing::warn!(error = %e, call_control_id = %request.call_control_id, "brain call failed, using fallback");
        fallback_reply()
    })
}

async fn stream_reply(brain: &dyn BrainClient, request: &BrainRequest) -> vrp_domain::error::Result<BrainReply> {
    use futures_util::StreamExt;

    let mut stream = brain.reply_stream(request).await?;
    let mut assembled = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            BrainStreamEvent::Token { text } => assembled.push_str(&text),
            BrainStreamEvent::Meta { .. } | BrainStreamEvent::Ping => {}
            BrainStreamEvent::Done { reply } => return Ok(reply),
            BrainStreamEvent::Error { message } => {
                if assembled.is_empty() {
                    return Err(vrp_domain::error::Error::UpstreamFailure {
                        service: "brain".into(),
                        message,
                    });
                }
                return Ok(BrainReply {
                    text: Some(assembled),
                    ..Default::default()
                });
            }
        }
    }
    Ok(BrainReply {
        text: Some(assembled),
        ..Default::default()
    })
}

fn fallback_reply() -> BrainReply {
    BrainReply {
        text: Some("I'm sorry, I'm having trouble right now. Let me have someone call you back.".into()),
        ..Default::default()
    }
}

/// Stage 3: synthesise each phrase in order and stream PCM to the
/// outbound channel, watching for barge-in (§4.F Barge-in policy).
async fn run_synthesizer_playback(
    config: PipelineConfig,
    mut job_rx: mpsc::Receiver<AssistantTurnJob>,
    outbound_tx: mpsc::Sender<PlaybackChunk>,
    tts: Arc<dyn TtsClient>,
    sink: Arc<dyn PipelineSink>,
    speaking_rx: watch::Receiver<Option<Instant>>,
    mut transfer_signal: watch::Receiver<TransferSignal>,
    http: reqwest::Client,
) {
    let scheduler = PlaybackScheduler::new(outbound_tx);
    let barge_in_min = Duration::from_millis(config.barge_in_min_ms);

    while let Some(job) = job_rx.recv().await {
        let handle = scheduler.begin_turn();
        let opts = SynthesisOptions {
            voice_override: job.voice_override.clone(),
        };

        let mut interrupted = false;
        for phrase in &job.phrases {
            if is_barge_in(&speaking_rx, barge_in_min) {
                interrupted = true;
                break;
            }
            match tts.synthesize(phrase, &opts).await {
                Ok((pcm, sample_rate_hz)) => {
                    if !handle.send(PlaybackChunk { pcm, sample_rate_hz }).await {
                        interrupted = true;
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, call_control_id = %config.call_control_id, "tts failed, skipping phrase");
                }
            }
            if is_barge_in(&speaking_rx, barge_in_min) {
                interrupted = true;
                break;
            }
        }

        if interrupted {
            scheduler.interrupt();
        }
        sink.assistant_turn(job.text.clone(), interrupted).await;

        if interrupted {
            continue;
        }
        if let Some(transfer) = &job.transfer {
            sink.transferring(transfer.to.clone(), transfer.audio_url.clone(), transfer.timeout_secs)
                .await;
            run_transfer_hold(&scheduler, &tts, &http, &config, transfer, &mut transfer_signal, &sink).await;
        } else if job.hangup {
            sink.hangup().await;
        }
    }
}

fn is_barge_in(speaking_rx: &watch::Receiver<Option<Instant>>, min_duration: Duration) -> bool {
    speaking_rx
        .borrow()
        .map(|since| since.elapsed() >= min_duration)
        .unwrap_or(false)
}

/// Hold audio while a transfer dials, then react to its outcome (§4.F,
/// §8 scenario 5). The dial timeout itself is owned by the call
/// registry's actor; this stage only learns the outcome over
/// `transfer_signal` and never runs a timer of its own.
async fn run_transfer_hold(
    scheduler: &PlaybackScheduler,
    tts: &Arc<dyn TtsClient>,
    http: &reqwest::Client,
    config: &PipelineConfig,
    transfer: &TransferDirective,
    transfer_signal: &mut watch::Receiver<TransferSignal>,
    sink: &Arc<dyn PipelineSink>,
) {
    let hold_handle = scheduler.begin_turn();
    if let Some(url) = &transfer.audio_url {
        match fetch_hold_audio(http, url).await {
            Ok((pcm, sample_rate_hz)) => {
                let _ = hold_handle.send(PlaybackChunk { pcm, sample_rate_hz }).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, call_control_id = %config.call_control_id, "failed to fetch hold audio, dialling silently");
            }
        }
    }

    let outcome = loop {
        if transfer_signal.changed().await.is_err() {
            break TransferSignal::TimedOut;
        }
        let signal = *transfer_signal.borrow();
        if signal != TransferSignal::Idle {
            break signal;
        }
    };

    if matches!(outcome, TransferSignal::TimedOut | TransferSignal::Failed) {
        let fallback_handle = scheduler.begin_turn();
        match tts.synthesize(TRANSFER_FALLBACK_TEXT, &SynthesisOptions::default()).await {
            Ok((pcm, sample_rate_hz)) => {
                let _ = fallback_handle.send(PlaybackChunk { pcm, sample_rate_hz }).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, call_control_id = %config.call_control_id, "transfer fallback tts failed");
            }
        }
        sink.assistant_turn(TRANSFER_FALLBACK_TEXT.to_string(), false).await;
    }
}

/// Fetch a hold-audio clip and decode it the same way TTS responses are
/// decoded: a WAV byte stream at whatever sample rate it was recorded at.
async fn fetch_hold_audio(http: &reqwest::Client, url: &str) -> vrp_domain::error::Result<(Vec<i16>, u32)> {
    let response = http.get(url).send().await.map_err(from_reqwest)?;
    if !response.status().is_success() {
        return Err(vrp_domain::error::Error::UpstreamFailure {
            service: "hold-audio".into(),
            message: format!("hold audio fetch returned status {}", response.status()),
        });
    }
    let bytes = response.bytes().await.map_err(from_reqwest)?;
    wav_bytes_to_pcm(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vrp_brain_client::BrainRequest as Req;
    use vrp_domain::error::Result;
    use vrp_domain::stream::BoxStream;

    struct StubBrain(BrainReply);
    #[async_trait]
    impl BrainClient for StubBrain {
        async fn reply(&self, _req: &Req) -> Result<BrainReply> {
            Ok(self.0.clone())
        }
        async fn reply_stream(&self, _req: &Req) -> Result<BoxStream<'static, Result<BrainStreamEvent>>> {
            let reply = self.0.clone();
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(BrainStreamEvent::Done { reply })])))
        }
    }

    struct StubStt(Option<String>);
    #[async_trait]
    impl SttClient for StubStt {
        async fn transcribe(&self, _pcm: &[i16], _rate: u32) -> Result<Option<String>> {
            Ok(self.0.clone())
        }
    }

    struct StubTts;
    #[async_trait]
    impl TtsClient for StubTts {
        async fn synthesize(&self, text: &str, _opts: &SynthesisOptions) -> Result<(Vec<i16>, u32)> {
            Ok((vec![0i16; text.len()], 16_000))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        caller_turns: Mutex<Vec<String>>,
        assistant_turns: Mutex<Vec<(String, bool)>>,
        hangups: Mutex<u32>,
    }

    #[async_trait]
    impl PipelineSink for RecordingSink {
        async fn caller_turn(&self, text: String) {
            self.caller_turns.lock().unwrap().push(text);
        }
        async fn assistant_turn(&self, text: String, interrupted: bool) {
            self.assistant_turns.lock().unwrap().push((text, interrupted));
        }
        async fn transferring(&self, _to: String, _audio_url: Option<String>, _timeout_secs: Option<u64>) {}
        async fn hangup(&self) {
            *self.hangups.lock().unwrap() += 1;
        }
        async fn dead_air(&self) {}
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            tenant_id: "acme".into(),
            call_control_id: "cc1".into(),
            segmenter: SegmenterConfig::default(),
            dead_air_ms: 10_000,
            barge_in_min_ms: 150,
            brain_timeout_ms: 2_000,
            transfer_profiles: vec![],
            assistant_context: HashMap::new(),
            streaming_enabled: false,
        }
    }

    #[tokio::test]
    async fn happy_path_turn_reaches_sink_uninterrupted() {
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(64);
        let sink = Arc::new(RecordingSink::default());
        let brain = Arc::new(StubBrain(BrainReply {
            text: Some("We're open 9 to 5.".into()),
            ..Default::default()
        }));
        let stt = Arc::new(StubStt(Some("what are your hours".into())));
        let tts = Arc::new(StubTts);

        let (_transfer_tx, transfer_rx) = watch::channel(TransferSignal::Idle);
        let handle = spawn(
            config(),
            inbound_rx,
            outbound_tx,
            brain,
            stt,
            tts,
            sink.clone(),
            reqwest::Client::new(),
            transfer_rx,
        );

        // One voiced frame, then enough silence to close the segment.
        inbound_tx.send(vec![2000i16; 320]).await.unwrap();
        for _ in 0..40 {
            inbound_tx.send(vec![0i16; 320]).await.unwrap();
        }
        drop(inbound_tx);

        // Drain at least one chunk of synthesised playback.
        let _ = tokio::time::timeout(Duration::from_secs(2), outbound_rx.recv()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sink.caller_turns.lock().unwrap().as_slice(), ["what are your hours"]);
        let turns = sink.assistant_turns.lock().unwrap();
        assert_eq!(turns.len(), 1);
        assert!(!turns[0].1, "turn should not be marked interrupted");
        handle.abort();
    }
}
