//! Gapless chunk scheduler with watermark back-pressure
//!
//! Chunks are placed on the output clock back to back: each chunk starts
//! exactly where the previous one ends, clamped to "now" if decoding fell
//! behind the clock. The scheduler keeps a ledger of what is queued, derives
//! the playback position from a `TimeAnchor` rewritten on every schedule,
//! and decides when the decode engine should pause (buffered ahead above the
//! high watermark) or resume (below the low watermark after a chunk ends).
//!
//! The scheduler never talks to the engine itself; it returns
//! `SchedulerAction`s for the player to carry out, and offers rollbacks for
//! when a pause/resume request fails.

use crate::playback::output::OutputSink;
use crate::playback::types::{ChunkId, PcmChunk, ScheduledChunk};
use driftwave_common::{TimeAnchor, Watermarks};
use tracing::{debug, trace};

/// Side effects the scheduler asks the player to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Buffered ahead crossed the high watermark; pause the decode engine
    RequestPause,

    /// Buffered ahead fell below the low watermark; resume the decode engine
    RequestResume,

    /// The last chunk finished and decoding is done; playback ended
    Ended,

    /// The queue ran dry mid-stream; playback is stalled
    Waiting,
}

/// Schedules decoded chunks onto the output clock
pub struct PlaybackScheduler {
    watermarks: Watermarks,

    /// Output clock time the next chunk will start
    next_start_time: f64,

    /// Chunks queued on the output, oldest first
    scheduled: Vec<ScheduledChunk>,

    /// Whether we have asked the engine to stop producing
    engine_paused: bool,

    /// Whether the engine reported end of stream
    decoding_finished: bool,

    anchor: TimeAnchor,

    /// Playback rate; the engine produces already-stretched audio, so chunk
    /// durations on the clock are post-stretch and only the anchor needs it
    tempo: f64,
}

impl PlaybackScheduler {
    pub fn new(watermarks: Watermarks) -> Self {
        Self {
            watermarks,
            next_start_time: 0.0,
            scheduled: Vec::new(),
            engine_paused: false,
            decoding_finished: false,
            anchor: TimeAnchor::at_origin(0.0),
            tempo: 1.0,
        }
    }

    /// Forget everything and re-anchor at position zero
    pub fn reset(&mut self, now: f64) {
        self.scheduled.clear();
        self.next_start_time = now;
        self.engine_paused = false;
        self.decoding_finished = false;
        self.anchor = TimeAnchor::new(now, 0.0, self.tempo);
    }

    /// Place a chunk at the end of the queue.
    ///
    /// Returns `RequestPause` when this chunk pushed the buffered-ahead
    /// duration over the high watermark.
    pub fn schedule_chunk(
        &mut self,
        output: &dyn OutputSink,
        chunk: PcmChunk,
    ) -> Option<SchedulerAction> {
        let now = output.now();
        // If decoding fell behind the clock the next slot is in the past;
        // start immediately rather than scheduling into history.
        let start = self.next_start_time.max(now);
        let duration = chunk.duration_secs();
        let media_time = chunk.media_time_secs;

        // Every chunk pins the anchor: position drift cannot accumulate
        // past one chunk.
        self.anchor.rebase(start, media_time);

        let id = output.schedule(chunk, start);
        self.scheduled.push(ScheduledChunk {
            id,
            start_time: start,
            duration,
            media_time,
        });
        self.next_start_time = start + duration;
        trace!(
            "Scheduled chunk {} at {:.3}s for {:.3}s (media {:.3}s)",
            id,
            start,
            duration,
            media_time
        );

        let buffered = self.buffered_ahead(now);
        if buffered > self.watermarks.high && !self.engine_paused && !self.decoding_finished {
            debug!(
                "Buffered {:.1}s above high watermark {:.1}s, pausing decode",
                buffered, self.watermarks.high
            );
            self.engine_paused = true;
            return Some(SchedulerAction::RequestPause);
        }
        None
    }

    /// Undo the optimistic pause mark after a failed pause request
    pub fn rollback_pause(&mut self) {
        self.engine_paused = false;
    }

    /// Undo the optimistic resume mark after a failed resume request
    pub fn rollback_resume(&mut self) {
        self.engine_paused = true;
    }

    /// Record a user-driven engine pause or resume.
    ///
    /// User pause and watermark back-pressure share this flag, so a resume
    /// after either one restarts decoding exactly once.
    pub fn set_engine_paused(&mut self, paused: bool) {
        self.engine_paused = paused;
    }

    /// A chunk finished playing.
    ///
    /// `playing` is whether the player is in playing state; `Waiting` and
    /// `Ended` only make sense while playing.
    pub fn on_chunk_ended(
        &mut self,
        now: f64,
        id: ChunkId,
        playing: bool,
    ) -> Vec<SchedulerAction> {
        let before = self.scheduled.len();
        self.scheduled.retain(|c| c.id != id);
        if self.scheduled.len() == before {
            // Completion for a chunk dropped by a seek; stale, ignore.
            return Vec::new();
        }

        let mut actions = Vec::new();
        let buffered = self.buffered_ahead(now);
        if self.engine_paused && !self.decoding_finished && buffered < self.watermarks.low {
            debug!(
                "Buffered {:.1}s below low watermark {:.1}s, resuming decode",
                buffered, self.watermarks.low
            );
            self.engine_paused = false;
            actions.push(SchedulerAction::RequestResume);
        }

        if self.scheduled.is_empty() && playing {
            if self.decoding_finished {
                actions.push(SchedulerAction::Ended);
            } else {
                actions.push(SchedulerAction::Waiting);
            }
        }
        actions
    }

    /// The engine reported end of stream.
    ///
    /// Returns `Ended` when nothing is left in the queue and we are playing;
    /// otherwise the final `on_chunk_ended` will report it.
    pub fn on_eof(&mut self, playing: bool) -> Option<SchedulerAction> {
        self.decoding_finished = true;
        if self.scheduled.is_empty() && playing {
            return Some(SchedulerAction::Ended);
        }
        None
    }

    /// Drop everything queued ahead of a seek.
    ///
    /// The output is silenced without completion events, so no stale
    /// `ChunkEnded` can resume or end playback mid-seek.
    pub fn clear_for_seek(&mut self, output: &dyn OutputSink) {
        output.stop_all();
        self.scheduled.clear();
        self.next_start_time = output.now();
        self.engine_paused = false;
        self.decoding_finished = false;
    }

    /// The engine confirmed a seek; re-anchor at the resolved position
    pub fn on_seek_done(&mut self, now: f64, resolved_secs: f64) {
        self.anchor.rebase(now, resolved_secs);
        self.next_start_time = now;
    }

    /// Change the playback rate used for position projection
    pub fn set_tempo(&mut self, now: f64, tempo: f64) {
        // Pin the position first so the new rate applies from here on.
        let position = self.anchor.position_at(now);
        self.anchor.rebase(now, position);
        self.anchor.tempo = tempo;
        self.tempo = tempo;
    }

    /// Current playback position in seconds
    pub fn position(&self, now: f64) -> f64 {
        self.anchor.position_at(now)
    }

    /// Seconds of audio scheduled but not yet played
    pub fn buffered_ahead(&self, now: f64) -> f64 {
        (self.next_start_time - now).max(0.0)
    }

    /// Whether we currently hold the engine paused for back-pressure
    pub fn engine_paused(&self) -> bool {
        self.engine_paused
    }

    /// Whether the engine reported end of stream
    pub fn decoding_finished(&self) -> bool {
        self.decoding_finished
    }

    /// Number of chunks in the queue
    pub fn queued_len(&self) -> usize {
        self.scheduled.len()
    }
}
