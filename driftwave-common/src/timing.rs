//! Timing primitives for playback position tracking and flow control
//!
//! The engine never polls the decode side for the current position. Instead it
//! keeps a `TimeAnchor` that pins a known media position to a known output
//! clock reading, and projects the current position from the clock delta. The
//! anchor is rewritten whenever the position becomes known with certainty
//! (metadata arrival, every chunk schedule, seek completion).
//!
//! `Watermarks` carries the buffered-ahead thresholds used for decode
//! back-pressure. The low threshold must sit strictly below the high one so
//! pause/resume requests cannot oscillate (hysteresis).

use crate::error::{Error, Result};

/// Correspondence between the output clock and media time.
///
/// Projects the current media position as:
///
/// ```text
/// position(now) = max(0, source_time + (now - wall_time) * tempo)
/// ```
///
/// `tempo` scales how fast media time advances relative to the wall clock.
/// Pitch changes do not touch the anchor; only tempo does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAnchor {
    /// Output clock reading at the anchor point (seconds)
    pub wall_time: f64,

    /// Media position at the anchor point (seconds)
    pub source_time: f64,

    /// Playback rate (1.0 = realtime)
    pub tempo: f64,
}

impl TimeAnchor {
    /// Create an anchor pinning `source_time` to `wall_time` at the given tempo
    pub fn new(wall_time: f64, source_time: f64, tempo: f64) -> Self {
        Self {
            wall_time,
            source_time,
            tempo,
        }
    }

    /// Anchor at the media origin (position zero, realtime tempo)
    pub fn at_origin(wall_time: f64) -> Self {
        Self::new(wall_time, 0.0, 1.0)
    }

    /// Project the media position for an output clock reading.
    ///
    /// Clamped at zero: the projection can momentarily run ahead of a fade or
    /// behind a rebase, but a negative media position is never reported.
    pub fn position_at(&self, now: f64) -> f64 {
        let projected = self.source_time + (now - self.wall_time) * self.tempo;
        projected.max(0.0)
    }

    /// Rewrite the anchor correspondence, keeping the current tempo
    pub fn rebase(&mut self, wall_time: f64, source_time: f64) {
        self.wall_time = wall_time;
        self.source_time = source_time;
    }
}

/// Buffered-ahead thresholds for decode back-pressure (seconds).
///
/// When the scheduled-but-unplayed duration exceeds `high`, the decode engine
/// is asked to pause; when it later drops below `low`, the engine is resumed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Watermarks {
    /// Pause decoding above this many seconds of buffered audio
    pub high: f64,

    /// Resume decoding below this many seconds of buffered audio
    pub low: f64,
}

impl Watermarks {
    /// Create a watermark pair, enforcing `0 <= low < high`
    pub fn new(high: f64, low: f64) -> Result<Self> {
        if !(low >= 0.0 && low < high) {
            return Err(Error::InvalidInput(format!(
                "watermarks must satisfy 0 <= low < high (got low={low}, high={high})"
            )));
        }
        Ok(Self { high, low })
    }
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            high: 30.0,
            low: 10.0,
        }
    }
}
