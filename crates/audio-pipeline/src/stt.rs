//! STT client (§4.F Recogniser): POSTs a closed segment to the
//! configured `whisper_http` endpoint and returns the transcript, or
//! `None` if it came back empty or below confidence.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use vrp_domain::error::{Error, Result};

#[async_trait]
pub trait SttClient: Send + Sync {
    /// Transcribe one closed segment of PCM16 audio at `sample_rate_hz`.
    /// Returns `None` for an empty or below-confidence result.
    async fn transcribe(&self, pcm: &[i16], sample_rate_hz: u32) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

fn from_reqwest(e: reqwest::Error) -> Error {
    Error::UpstreamFailure {
        service: "stt".into(),
        message: e.to_string(),
    }
}

fn pcm_to_wav_bytes(pcm: &[i16], sample_rate_hz: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Internal(format!("wav encode: {e}")))?;
        for &sample in pcm {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Internal(format!("wav encode: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::Internal(format!("wav encode: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Talks to a `whisper_http`-style STT endpoint: segment audio in,
/// `{text, confidence?}` out.
pub struct WhisperHttpClient {
    http: reqwest::Client,
    url: String,
    language: Option<String>,
    min_confidence: f64,
}

impl WhisperHttpClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, language: Option<String>) -> Self {
        Self {
            http,
            url: url.into(),
            language,
            min_confidence: 0.35,
        }
    }
}

#[async_trait]
impl SttClient for WhisperHttpClient {
    async fn transcribe(&self, pcm: &[i16], sample_rate_hz: u32) -> Result<Option<String>> {
        let wav_bytes = pcm_to_wav_bytes(pcm, sample_rate_hz)?;
        let audio_base64 = base64::engine::general_purpose::STANDARD.encode(&wav_bytes);

        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({
                "audio_base64": audio_base64,
                "sample_rate": sample_rate_hz,
                "language": self.language,
            }))
            .send()
            .await
            .map_err(from_reqwest)?;

        if !response.status().is_success() {
            return Err(Error::UpstreamFailure {
                service: "stt".into(),
                message: format!("stt returned status {}", response.status()),
            });
        }

        let parsed: WhisperResponse = response.json().await.map_err(from_reqwest)?;
        let text = parsed.text.trim();
        if text.is_empty() || parsed.confidence < self.min_confidence {
            return Ok(None);
        }
        Ok(Some(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_round_trips_sample_count() {
        let pcm = vec![100i16, -100, 200, -200];
        let bytes = pcm_to_wav_bytes(&pcm, 16_000).unwrap();
        let mut reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, pcm);
    }
}
