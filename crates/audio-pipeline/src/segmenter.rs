//! Energy-based VAD segmentation (§4.F Segmenter).
//!
//! Reads 20 ms PCM16 frames (post ingress decode/resample) and closes a
//! segment once `silence_ms` of quiet follows voiced audio, or once the
//! accumulated segment reaches `chunk_ms` — whichever comes first, so a
//! caller who never pauses still gets transcribed incrementally instead
//! of growing the buffer without bound.

/// Tunable knobs, named after the environment variables in §6.
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    pub sample_rate_hz: u32,
    /// `STT_CHUNK_MS` — nominal/maximum segment length.
    pub chunk_ms: u64,
    /// `STT_SILENCE_MS` — trailing silence required to close a segment.
    pub silence_ms: u64,
    /// Mean absolute sample amplitude above which a frame counts as voiced.
    pub energy_threshold: i32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            chunk_ms: 2_000,
            silence_ms: 700,
            energy_threshold: 400,
        }
    }
}

/// A closed segment ready for STT.
#[derive(Debug, Clone)]
pub struct Segment {
    pub pcm: Vec<i16>,
    pub duration_ms: u64,
}

/// Events produced by feeding one frame to the segmenter.
#[derive(Debug, Clone)]
pub enum SegmenterEvent {
    /// The caller started speaking after a period of silence — the
    /// signal barge-in policy watches for.
    CallerSpeaking,
    SegmentClosed(Segment),
}

pub struct Segmenter {
    cfg: SegmenterConfig,
    buffer: Vec<i16>,
    silence_run_ms: u64,
    speaking: bool,
}

impl Segmenter {
    pub fn new(cfg: SegmenterConfig) -> Self {
        Self {
            cfg,
            buffer: Vec::new(),
            silence_run_ms: 0,
            speaking: false,
        }
    }

    fn frame_duration_ms(&self, frame_len: usize) -> u64 {
        (frame_len as u64 * 1000) / self.cfg.sample_rate_hz as u64
    }

    fn buffer_duration_ms(&self) -> u64 {
        (self.buffer.len() as u64 * 1000) / self.cfg.sample_rate_hz as u64
    }

    fn is_voiced(&self, frame: &[i16]) -> bool {
        if frame.is_empty() {
            return false;
        }
        let mean_abs: i64 = frame.iter().map(|&s| (s as i64).abs()).sum::<i64>() / frame.len() as i64;
        mean_abs as i32 > self.cfg.energy_threshold
    }

    /// Feed one frame. Returns zero or more events, in order.
    pub fn push_frame(&mut self, frame: &[i16]) -> Vec<SegmenterEvent> {
        let mut events = Vec::new();
        let frame_ms = self.frame_duration_ms(frame.len());
        let voiced = self.is_voiced(frame);

        if voiced {
            if !self.speaking {
                self.speaking = true;
                events.push(SegmenterEvent::CallerSpeaking);
            }
            self.buffer.extend_from_slice(frame);
            self.silence_run_ms = 0;
        } else {
            self.silence_run_ms += frame_ms;
            if self.speaking {
                // Keep trailing silence in the segment so short pauses
                // within a sentence don't truncate the audio.
                self.buffer.extend_from_slice(frame);
            }
            if !self.buffer.is_empty() && self.silence_run_ms >= self.cfg.silence_ms {
                events.push(self.close_segment());
            }
        }

        if self.buffer_duration_ms() >= self.cfg.chunk_ms {
            events.push(self.close_segment());
        }

        events
    }

    fn close_segment(&mut self) -> SegmenterEvent {
        let pcm = std::mem::take(&mut self.buffer);
        let duration_ms = (pcm.len() as u64 * 1000) / self.cfg.sample_rate_hz as u64;
        self.silence_run_ms = 0;
        self.speaking = false;
        SegmenterEvent::SegmentClosed(Segment { pcm, duration_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voiced_frame(samples: usize) -> Vec<i16> {
        vec![2000i16; samples]
    }

    fn silent_frame(samples: usize) -> Vec<i16> {
        vec![0i16; samples]
    }

    fn cfg() -> SegmenterConfig {
        SegmenterConfig {
            sample_rate_hz: 16_000,
            chunk_ms: 2_000,
            silence_ms: 100,
            energy_threshold: 400,
        }
    }

    #[test]
    fn voiced_frame_emits_caller_speaking_once() {
        let mut seg = Segmenter::new(cfg());
        let frame = voiced_frame(320); // 20ms @ 16kHz
        let events = seg.push_frame(&frame);
        assert!(matches!(events[0], SegmenterEvent::CallerSpeaking));
        let events2 = seg.push_frame(&frame);
        assert!(events2.is_empty());
    }

    #[test]
    fn silence_after_speech_closes_segment() {
        let mut seg = Segmenter::new(cfg());
        seg.push_frame(&voiced_frame(320));
        // 100ms silence_ms / 20ms frames = 5 silent frames to close.
        let mut closed = false;
        for _ in 0..6 {
            let events = seg.push_frame(&silent_frame(320));
            if events.iter().any(|e| matches!(e, SegmenterEvent::SegmentClosed(_))) {
                closed = true;
            }
        }
        assert!(closed);
    }

    #[test]
    fn pure_silence_never_closes_a_segment() {
        let mut seg = Segmenter::new(cfg());
        for _ in 0..10 {
            let events = seg.push_frame(&silent_frame(320));
            assert!(events.is_empty());
        }
    }

    #[test]
    fn long_continuous_speech_closes_on_chunk_ms() {
        let mut seg = Segmenter::new(SegmenterConfig {
            chunk_ms: 100,
            ..cfg()
        });
        let frame = voiced_frame(320); // 20ms each
        let mut closed_count = 0;
        for _ in 0..20 {
            let events = seg.push_frame(&frame);
            closed_count += events
                .iter()
                .filter(|e| matches!(e, SegmenterEvent::SegmentClosed(_)))
                .count();
        }
        assert!(closed_count >= 3, "expected forced closes on long speech, got {closed_count}");
    }
}
