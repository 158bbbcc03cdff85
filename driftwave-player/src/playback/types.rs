//! PCM chunk types shared between the engine protocol and the scheduler

use std::sync::Arc;

/// A decoded block of interleaved f32 PCM
///
/// Samples are shared, not copied: the same chunk may sit in the engine's
/// event, the scheduler's ledger, and the output queue simultaneously.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    /// Interleaved samples, `frames * channels` long
    pub samples: Arc<[f32]>,

    pub channels: u16,
    pub sample_rate: u32,

    /// Media time of the first frame, in seconds
    pub media_time_secs: f64,
}

impl PcmChunk {
    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration at the chunk's native rate, in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// A silent chunk, mostly for tests
    pub fn silence(frames: usize, channels: u16, sample_rate: u32, media_time_secs: f64) -> Self {
        Self {
            samples: vec![0.0; frames * channels as usize].into(),
            channels,
            sample_rate,
            media_time_secs,
        }
    }
}

/// Identifier assigned by the output sink to a scheduled chunk
pub type ChunkId = u64;

/// A chunk the scheduler has placed on the output clock
#[derive(Debug, Clone)]
pub struct ScheduledChunk {
    pub id: ChunkId,

    /// Output clock time the chunk starts playing
    pub start_time: f64,

    /// Playback duration on the output clock, in seconds
    pub duration: f64,

    /// Media time of the chunk's first frame
    pub media_time: f64,
}

impl ScheduledChunk {
    /// Output clock time the chunk finishes
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_frames_and_duration() {
        let chunk = PcmChunk::silence(44100, 2, 44100, 0.0);
        assert_eq!(chunk.frames(), 44100);
        assert_eq!(chunk.samples.len(), 88200);
        assert_eq!(chunk.duration_secs(), 1.0);
    }

    #[test]
    fn test_degenerate_chunk_is_harmless() {
        let chunk = PcmChunk {
            samples: Vec::new().into(),
            channels: 0,
            sample_rate: 0,
            media_time_secs: 0.0,
        };
        assert_eq!(chunk.frames(), 0);
        assert_eq!(chunk.duration_secs(), 0.0);
    }

    #[test]
    fn test_scheduled_end_time() {
        let scheduled = ScheduledChunk {
            id: 7,
            start_time: 2.5,
            duration: 0.5,
            media_time: 10.0,
        };
        assert_eq!(scheduled.end_time(), 3.0);
    }
}
