//! Playback scheduler (§4.F Synthesiser, Barge-in policy): hands
//! synthesised PCM to the outbound media channel in turn order, and
//! lets barge-in drop whatever of the current turn hasn't been sent yet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// One chunk of synthesised audio bound for the egress encoder (§4.E),
/// at whatever sample rate the TTS engine produced.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    pub pcm: Vec<i16>,
    pub sample_rate_hz: u32,
}

/// Identifies one assistant turn's place in playback. A handle from a
/// superseded turn (barge-in happened after it was issued) silently
/// stops delivering — the caller doesn't need to notice to be correct,
/// but checking [`TurnHandle::is_current`] avoids wasted synthesis work.
#[derive(Clone)]
pub struct TurnHandle {
    generation: u64,
    scheduler: Arc<Inner>,
}

struct Inner {
    current_generation: AtomicU64,
    tx: mpsc::Sender<PlaybackChunk>,
}

#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<Inner>,
}

impl PlaybackScheduler {
    pub fn new(tx: mpsc::Sender<PlaybackChunk>) -> Self {
        Self {
            inner: Arc::new(Inner {
                current_generation: AtomicU64::new(0),
                tx,
            }),
        }
    }

    /// Start a new assistant turn, implicitly superseding any prior one
    /// still in flight.
    pub fn begin_turn(&self) -> TurnHandle {
        let generation = self.inner.current_generation.fetch_add(1, Ordering::SeqCst) + 1;
        TurnHandle {
            generation,
            scheduler: self.inner.clone(),
        }
    }

    /// Immediately supersede whatever turn is in flight (barge-in):
    /// further [`TurnHandle::send`] calls against the interrupted turn
    /// become no-ops.
    pub fn interrupt(&self) {
        self.inner.current_generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl TurnHandle {
    pub fn is_current(&self) -> bool {
        self.scheduler.current_generation.load(Ordering::SeqCst) == self.generation
    }

    /// Send one chunk if this turn hasn't been superseded. Backpressure
    /// from a slow outbound channel naturally pauses the TTS producer
    /// (§4.E Backpressure) since this awaits channel capacity.
    pub async fn send(&self, chunk: PlaybackChunk) -> bool {
        if !self.is_current() {
            return false;
        }
        self.scheduler.tx.send(chunk).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunk_delivered_while_turn_is_current() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = PlaybackScheduler::new(tx);
        let handle = scheduler.begin_turn();
        assert!(handle.send(PlaybackChunk { pcm: vec![1, 2], sample_rate_hz: 24_000 }).await);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.pcm, vec![1, 2]);
    }

    #[tokio::test]
    async fn interrupt_drops_further_sends_on_old_handle() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = PlaybackScheduler::new(tx);
        let handle = scheduler.begin_turn();
        scheduler.interrupt();
        assert!(!handle.is_current());
        assert!(!handle.send(PlaybackChunk { pcm: vec![1], sample_rate_hz: 24_000 }).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn new_turn_supersedes_previous_handle() {
        let (tx, _rx) = mpsc::channel(8);
        let scheduler = PlaybackScheduler::new(tx);
        let first = scheduler.begin_turn();
        let _second = scheduler.begin_turn();
        assert!(!first.is_current());
    }
}
