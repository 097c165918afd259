//! PCM16 sample-rate conversion for the media transport boundary (§4.E):
//! 8 kHz telephony audio on the wire, 16 kHz mono in and out of the audio
//! pipeline. Built on the same `rubato::FastFixedIn` approach the pack
//! uses for microphone-to-model rate conversion, adapted for `i16`.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Converts PCM16 audio from one fixed sample rate to another.
///
/// `None` resampler when `from == to` (zero-copy passthrough).
pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    input_buf: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
    /// Samples that didn't fill a full chunk are carried as raw i16 and
    /// passed through untouched only in passthrough mode.
    carry: Vec<i16>,
}

impl RateConverter {
    pub fn new(from_hz: u32, to_hz: u32, chunk_size: usize) -> Self {
        if from_hz == to_hz {
            return Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                carry: Vec::new(),
            };
        }

        let ratio = to_hz as f64 / from_hz as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .expect("resampler ratio and chunk size are always valid for telephony rates");
        let max_out = resampler.output_frames_max();

        Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            carry: Vec::new(),
        }
    }

    /// Feed PCM16 samples, returning as many resampled PCM16 samples as
    /// are currently available. Remainders below one rubato chunk are
    /// buffered for the next call.
    pub fn process(&mut self, samples: &[i16]) -> Vec<i16> {
        let Some(ref mut resampler) = self.resampler else {
            self.carry.extend_from_slice(samples);
            return std::mem::take(&mut self.carry);
        };

        self.input_buf
            .extend(samples.iter().map(|&s| s as f32 / i16::MAX as f32));

        let mut out = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    out.extend(
                        self.output_buf[0][..produced]
                            .iter()
                            .map(|&f| (f * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16),
                    );
                }
                Err(e) => tracing::warn!(error = %e, "resampler process error, dropping chunk"),
            }
            self.input_buf.drain(..self.chunk_size);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_input_unchanged() {
        let mut rc = RateConverter::new(8_000, 8_000, 160);
        let samples = vec![100i16, -100, 200, -200];
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn upsampling_8k_to_16k_roughly_doubles_length() {
        let mut rc = RateConverter::new(8_000, 16_000, 160);
        let samples = vec![0i16; 160];
        let out = rc.process(&samples);
        assert!(
            (out.len() as isize - 320).abs() <= 20,
            "expected ~320 samples, got {}",
            out.len()
        );
    }

    #[test]
    fn downsampling_16k_to_8k_roughly_halves_length() {
        let mut rc = RateConverter::new(16_000, 8_000, 320);
        let samples = vec![0i16; 320];
        let out = rc.process(&samples);
        assert!(
            (out.len() as isize - 160).abs() <= 20,
            "expected ~160 samples, got {}",
            out.len()
        );
    }
}
