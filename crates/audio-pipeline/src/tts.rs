//! TTS client (§4.F Synthesiser): POSTs assistant text to the tenant's
//! configured engine (`kokoro_http` or `coqui_xtts`) and decodes the WAV
//! response to PCM16 for the playback scheduler.

use async_trait::async_trait;
use vrp_domain::error::{Error, Result};
use vrp_domain::stream::VoiceDirective;
use vrp_domain::tenant::TtsConfig;

/// One synthesis request. `voice_override` carries a brain
/// [`VoiceDirective`] applied to this turn only (§4.F Brain invocation).
#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    pub voice_override: Option<VoiceDirective>,
}

#[async_trait]
pub trait TtsClient: Send + Sync {
    /// Synthesise `text`, returning PCM16 samples and their sample rate.
    async fn synthesize(&self, text: &str, opts: &SynthesisOptions) -> Result<(Vec<i16>, u32)>;
}

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    Error::UpstreamFailure {
        service: "tts".into(),
        message: e.to_string(),
    }
}

pub(crate) fn wav_bytes_to_pcm(bytes: &[u8]) -> Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::UpstreamFailure {
            service: "tts".into(),
            message: format!("malformed WAV response: {e}"),
        })?;
    let sample_rate = reader.spec().sample_rate;
    let samples: Vec<i16> = match reader.spec().sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::UpstreamFailure {
                service: "tts".into(),
                message: format!("malformed WAV samples: {e}"),
            })?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|f| (f * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::UpstreamFailure {
                service: "tts".into(),
                message: format!("malformed WAV samples: {e}"),
            })?,
    };
    Ok((samples, sample_rate))
}

pub struct KokoroHttpClient {
    http: reqwest::Client,
    url: String,
    default_voice: Option<String>,
}

impl KokoroHttpClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, default_voice: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            default_voice,
        }
    }
}

#[async_trait]
impl TtsClient for KokoroHttpClient {
    async fn synthesize(&self, text: &str, opts: &SynthesisOptions) -> Result<(Vec<i16>, u32)> {
        let voice = opts
            .voice_override
            .as_ref()
            .and_then(|_| self.default_voice.clone())
            .or_else(|| self.default_voice.clone());

        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "text": text, "voice": voice }))
            .send()
            .await
            .map_err(from_reqwest)?;

        if !response.status().is_success() {
            return Err(Error::UpstreamFailure {
                service: "tts".into(),
                message: format!("tts returned status {}", response.status()),
            });
        }
        let bytes = response.bytes().await.map_err(from_reqwest)?;
        wav_bytes_to_pcm(&bytes)
    }
}

pub struct CoquiXttsClient {
    http: reqwest::Client,
    url: String,
    default_speaker_wav_url: Option<String>,
}

impl CoquiXttsClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, default_speaker_wav_url: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            default_speaker_wav_url,
        }
    }
}

#[async_trait]
impl TtsClient for CoquiXttsClient {
    async fn synthesize(&self, text: &str, opts: &SynthesisOptions) -> Result<(Vec<i16>, u32)> {
        // A `cloned` voice directive with its own speaker WAV overrides the
        // tenant's default reference voice for this turn only.
        let speaker_wav_url = opts
            .voice_override
            .as_ref()
            .and_then(|d| d.speaker_wav_url.clone())
            .or_else(|| self.default_speaker_wav_url.clone());

        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({ "text": text, "speaker_wav_url": speaker_wav_url }))
            .send()
            .await
            .map_err(from_reqwest)?;

        if !response.status().is_success() {
            return Err(Error::UpstreamFailure {
                service: "tts".into(),
                message: format!("tts returned status {}", response.status()),
            });
        }
        let bytes = response.bytes().await.map_err(from_reqwest)?;
        wav_bytes_to_pcm(&bytes)
    }
}

/// Build the configured TTS client for a tenant's published `tts` config.
pub fn from_config(http: reqwest::Client, cfg: &TtsConfig) -> Box<dyn TtsClient> {
    match cfg {
        TtsConfig::KokoroHttp { url, voice } => {
            Box::new(KokoroHttpClient::new(http, url.clone(), voice.clone()))
        }
        TtsConfig::CoquiXtts { url, speaker_wav_url } => {
            Box::new(CoquiXttsClient::new(http, url.clone(), speaker_wav_url.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_bytes_to_pcm_round_trips_int_samples() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in [100i16, -100, 32000] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        let (pcm, rate) = wav_bytes_to_pcm(cursor.get_ref()).unwrap();
        assert_eq!(rate, 24_000);
        assert_eq!(pcm, vec![100, -100, 32000]);
    }
}
