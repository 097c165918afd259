//! Media Transport wire protocol (§4.E): the JSON frame envelopes
//! exchanged on the bidirectional WebSocket keyed by `call_control_id`.

use serde::{Deserialize, Serialize};

/// One 20 ms μ-law frame at 8 kHz is 160 bytes.
pub const MULAW_8K_FRAME_BYTES: usize = 160;
pub const FRAME_DURATION_MS: u64 = 20;

/// A frame exchanged on the media WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MediaFrame {
    /// Provider → gateway: opens a stream and declares its codec.
    Start {
        stream_id: String,
        media_format: MediaFormat,
    },

    /// Bidirectional: one codec frame, base64-encoded.
    Media {
        sequence_number: u64,
        /// Base64 payload of one `FRAME_DURATION_MS` frame.
        payload: String,
    },

    /// Either side: closes the stream.
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioEncoding {
    #[serde(rename = "audio/x-mulaw")]
    Mulaw,
    #[serde(rename = "AMR-WB")]
    AmrWb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels: u8,
}

impl MediaFormat {
    pub fn mulaw_8k_mono() -> Self {
        Self {
            encoding: AudioEncoding::Mulaw,
            sample_rate: 8_000,
            channels: 1,
        }
    }
}

/// Error decoding or encoding a media frame payload.
#[derive(Debug, thiserror::Error)]
pub enum MediaCodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl MediaFrame {
    pub fn decode(raw: &str) -> Result<Self, MediaCodecError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn encode(&self) -> Result<String, MediaCodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Build a `media` frame from raw codec bytes, base64-encoding the payload.
    pub fn media(sequence_number: u64, codec_bytes: &[u8]) -> Self {
        use base64::Engine;
        MediaFrame::Media {
            sequence_number,
            payload: base64::engine::general_purpose::STANDARD.encode(codec_bytes),
        }
    }

    /// Decode this frame's base64 payload back to raw codec bytes.
    /// Returns `None` for non-`Media` variants.
    pub fn payload_bytes(&self) -> Result<Option<Vec<u8>>, MediaCodecError> {
        use base64::Engine;
        match self {
            MediaFrame::Media { payload, .. } => {
                Ok(Some(base64::engine::general_purpose::STANDARD.decode(payload)?))
            }
            _ => Ok(None),
        }
    }
}

/// μ-law <-> linear PCM16 codec (G.711 μ-law, ITU-T G.711).
pub mod mulaw {
    const BIAS: i16 = 0x84;
    const CLIP: i16 = 32635;

    /// Encode one linear PCM16 sample to a μ-law byte.
    pub fn encode_sample(sample: i16) -> u8 {
        let sign = if sample < 0 { 0x80u8 } else { 0 };
        let mut sample = if sample < 0 {
            sample.saturating_neg()
        } else {
            sample
        };
        if sample > CLIP {
            sample = CLIP;
        }
        sample += BIAS;

        let exponent = (0..8)
            .rev()
            .find(|&exp| (sample >> (exp + 3)) & 0x0F != 0 || exp == 0)
            .unwrap_or(0) as u8;
        let mantissa = ((sample >> (exponent + 3)) & 0x0F) as u8;
        let byte = sign | (exponent << 4) | mantissa;
        !byte
    }

    /// Decode one μ-law byte back to a linear PCM16 sample.
    pub fn decode_sample(byte: u8) -> i16 {
        let byte = !byte;
        let sign = byte & 0x80;
        let exponent = (byte >> 4) & 0x07;
        let mantissa = byte & 0x0F;
        let mut sample = ((mantissa as i16) << 3) + BIAS;
        sample <<= exponent;
        if sign != 0 {
            -(sample - BIAS)
        } else {
            sample - BIAS
        }
    }

    pub fn encode(pcm: &[i16]) -> Vec<u8> {
        pcm.iter().map(|&s| encode_sample(s)).collect()
    }

    pub fn decode(mulaw: &[u8]) -> Vec<i16> {
        mulaw.iter().map(|&b| decode_sample(b)).collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn round_trip_is_lossy_but_bounded() {
            for sample in [-20000i16, -1000, -1, 0, 1, 1000, 20000] {
                let encoded = encode_sample(sample);
                let decoded = decode_sample(encoded);
                assert!(
                    (decoded as i32 - sample as i32).abs() < 512,
                    "sample {sample} decoded to {decoded}"
                );
            }
        }

        #[test]
        fn silence_round_trips_to_silence() {
            assert_eq!(decode_sample(encode_sample(0)), 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_round_trips_through_json() {
        let frame = MediaFrame::Start {
            stream_id: "s1".into(),
            media_format: MediaFormat::mulaw_8k_mono(),
        };
        let encoded = frame.encode().unwrap();
        let decoded = MediaFrame::decode(&encoded).unwrap();
        match decoded {
            MediaFrame::Start { stream_id, media_format } => {
                assert_eq!(stream_id, "s1");
                assert_eq!(media_format.sample_rate, 8_000);
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn media_frame_payload_round_trips() {
        let bytes = vec![0u8; MULAW_8K_FRAME_BYTES];
        let frame = MediaFrame::media(42, &bytes);
        let recovered = frame.payload_bytes().unwrap().unwrap();
        assert_eq!(recovered, bytes);
    }

    #[test]
    fn stop_frame_has_no_payload() {
        let frame = MediaFrame::Stop;
        assert!(frame.payload_bytes().unwrap().is_none());
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(MediaFrame::decode("{not json").is_err());
    }
}
