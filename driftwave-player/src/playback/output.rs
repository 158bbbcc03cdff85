//! Output sink abstraction and the deterministic test device
//!
//! `OutputSink` is the seam between the scheduler and the audio device: a
//! monotonic clock, a schedule-at-time primitive, and a gain node with
//! linear ramps. Completion is reported asynchronously as `OutputEvent`s.
//!
//! `VirtualOutput` implements the same contract over a manually advanced
//! clock so scheduler and player behavior can be tested tick by tick.

use crate::playback::types::{ChunkId, PcmChunk};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Events from the output device
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// A scheduled chunk finished playing
    ChunkEnded { id: ChunkId },
}

/// An audio output device: clock, scheduling, and gain
pub trait OutputSink: Send + Sync + 'static {
    /// Current output clock reading in seconds, monotonic while running
    fn now(&self) -> f64;

    /// Freeze the output clock and silence the device. Queued chunks stay
    /// queued and resume from where they stopped.
    fn suspend(&self);

    /// Restart a suspended clock
    fn resume(&self);

    /// Whether the clock is currently suspended
    fn is_suspended(&self) -> bool;

    /// Queue a chunk to start at `start_time` on the output clock.
    ///
    /// A `start_time` in the past starts the chunk immediately.
    fn schedule(&self, chunk: PcmChunk, start_time: f64) -> ChunkId;

    /// Silently drop everything queued. No completion events are emitted
    /// for the dropped chunks.
    fn stop_all(&self);

    /// Current gain value
    fn gain(&self) -> f64;

    /// Set the gain immediately
    fn set_gain(&self, gain: f64);

    /// Ramp the gain linearly to `target` over `duration` seconds
    fn ramp_gain(&self, target: f64, duration: f64);

    /// Cancel any in-progress ramps, holding the gain where it is
    fn cancel_ramps(&self);
}

/// Gain operations recorded by `VirtualOutput` for assertions
#[derive(Debug, Clone, PartialEq)]
pub enum GainOp {
    Set(f64),
    Ramp { target: f64, duration: f64 },
    CancelRamps,
}

#[derive(Debug)]
struct Playing {
    id: ChunkId,
    end_time: f64,
}

struct VirtualState {
    clock: f64,
    suspended: bool,
    playing: Vec<Playing>,
    gain: f64,
    gain_log: Vec<GainOp>,
}

/// Deterministic output device with a manually advanced clock
pub struct VirtualOutput {
    state: Mutex<VirtualState>,
    next_id: AtomicU64,
    events: mpsc::UnboundedSender<OutputEvent>,
}

impl VirtualOutput {
    /// Create a virtual output and the receiver for its completion events
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Mutex::new(VirtualState {
                    clock: 0.0,
                    suspended: false,
                    playing: Vec::new(),
                    gain: 1.0,
                    gain_log: Vec::new(),
                }),
                next_id: AtomicU64::new(1),
                events: tx,
            },
            rx,
        )
    }

    /// Advance the clock by `dt` seconds, emitting `ChunkEnded` for every
    /// chunk whose end time is reached, in end-time order. A suspended clock
    /// does not advance.
    pub fn advance(&self, dt: f64) {
        let ended = {
            let mut state = self.state.lock().unwrap();
            if state.suspended {
                return;
            }
            state.clock += dt;
            let now = state.clock;
            let mut ended: Vec<Playing> = Vec::new();
            state.playing.retain_mut(|p| {
                if p.end_time <= now {
                    ended.push(Playing {
                        id: p.id,
                        end_time: p.end_time,
                    });
                    false
                } else {
                    true
                }
            });
            ended.sort_by(|a, b| a.end_time.total_cmp(&b.end_time));
            ended
        };
        for p in ended {
            let _ = self.events.send(OutputEvent::ChunkEnded { id: p.id });
        }
    }

    /// Number of chunks currently queued or playing
    pub fn queued_len(&self) -> usize {
        self.state.lock().unwrap().playing.len()
    }

    /// Snapshot of every gain operation applied so far
    pub fn gain_log(&self) -> Vec<GainOp> {
        self.state.lock().unwrap().gain_log.clone()
    }
}

impl OutputSink for VirtualOutput {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().clock
    }

    fn suspend(&self) {
        self.state.lock().unwrap().suspended = true;
    }

    fn resume(&self) {
        self.state.lock().unwrap().suspended = false;
    }

    fn is_suspended(&self) -> bool {
        self.state.lock().unwrap().suspended
    }

    fn schedule(&self, chunk: PcmChunk, start_time: f64) -> ChunkId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        let start = start_time.max(state.clock);
        state.playing.push(Playing {
            id,
            end_time: start + chunk.duration_secs(),
        });
        id
    }

    fn stop_all(&self) {
        self.state.lock().unwrap().playing.clear();
    }

    fn gain(&self) -> f64 {
        self.state.lock().unwrap().gain
    }

    fn set_gain(&self, gain: f64) {
        let mut state = self.state.lock().unwrap();
        state.gain = gain;
        state.gain_log.push(GainOp::Set(gain));
    }

    fn ramp_gain(&self, target: f64, duration: f64) {
        let mut state = self.state.lock().unwrap();
        // The virtual device applies ramps instantaneously; the log keeps
        // the requested shape for assertions.
        state.gain = target;
        state.gain_log.push(GainOp::Ramp { target, duration });
    }

    fn cancel_ramps(&self) {
        self.state.lock().unwrap().gain_log.push(GainOp::CancelRamps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let (out, _rx) = VirtualOutput::new();
        assert_eq!(out.now(), 0.0);
        out.advance(1.5);
        assert_eq!(out.now(), 1.5);
    }

    #[tokio::test]
    async fn test_chunk_completion_in_order() {
        let (out, mut rx) = VirtualOutput::new();
        let a = out.schedule(PcmChunk::silence(44100, 2, 44100, 0.0), 0.0);
        let b = out.schedule(PcmChunk::silence(44100, 2, 44100, 1.0), 1.0);

        out.advance(0.5);
        assert!(rx.try_recv().is_err());

        out.advance(2.0);
        assert_eq!(rx.recv().await.unwrap(), OutputEvent::ChunkEnded { id: a });
        assert_eq!(rx.recv().await.unwrap(), OutputEvent::ChunkEnded { id: b });
    }

    #[tokio::test]
    async fn test_past_start_time_plays_immediately() {
        let (out, mut rx) = VirtualOutput::new();
        out.advance(5.0);
        let id = out.schedule(PcmChunk::silence(4410, 2, 44100, 0.0), 1.0);

        out.advance(0.1);
        assert_eq!(rx.recv().await.unwrap(), OutputEvent::ChunkEnded { id });
    }

    #[tokio::test]
    async fn test_stop_all_is_silent() {
        let (out, mut rx) = VirtualOutput::new();
        out.schedule(PcmChunk::silence(44100, 2, 44100, 0.0), 0.0);
        out.stop_all();
        assert_eq!(out.queued_len(), 0);

        out.advance(10.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_suspended_clock_is_frozen() {
        let (out, mut rx) = VirtualOutput::new();
        out.schedule(PcmChunk::silence(44100, 2, 44100, 0.0), 0.0);

        out.suspend();
        out.advance(5.0);
        assert_eq!(out.now(), 0.0);
        assert!(rx.try_recv().is_err());

        out.resume();
        out.advance(1.0);
        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn test_gain_log() {
        let (out, _rx) = VirtualOutput::new();
        out.set_gain(0.0);
        out.ramp_gain(1.0, 0.15);
        out.cancel_ramps();

        assert_eq!(
            out.gain_log(),
            vec![
                GainOp::Set(0.0),
                GainOp::Ramp {
                    target: 1.0,
                    duration: 0.15
                },
                GainOp::CancelRamps,
            ]
        );
        assert_eq!(out.gain(), 1.0);
    }
}
