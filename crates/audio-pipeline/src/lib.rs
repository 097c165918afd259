//! Audio Pipeline (§4.F): the per-call stack of VAD segmentation,
//! speech-to-text, brain invocation, text-to-speech, and barge-in-aware
//! playback scheduling that sits between the Media Transport layer and
//! the Call Registry.

pub mod phrasing;
pub mod pipeline;
pub mod playback;
pub mod segmenter;
pub mod sink;
pub mod stt;
pub mod tts;

pub use pipeline::{spawn, PipelineConfig, PipelineHandle};
pub use playback::{PlaybackChunk, PlaybackScheduler, TurnHandle};
pub use segmenter::{Segment, Segmenter, SegmenterConfig, SegmenterEvent};
pub use sink::PipelineSink;
pub use stt::{SttClient, WhisperHttpClient};
pub use tts::{CoquiXttsClient, KokoroHttpClient, SynthesisOptions, TtsClient};
