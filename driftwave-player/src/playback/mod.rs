//! Playback side: PCM chunk types, output sink, scheduler, state machine
//!
//! Decoded chunks from the engine are placed onto the output clock back to
//! back by `PlaybackScheduler`, which also drives decode back-pressure from
//! the buffered-ahead duration. `OutputSink` abstracts the audio device;
//! `VirtualOutput` is the deterministic test device. The lifecycle state
//! machine lives in `state`.

pub mod output;
pub mod scheduler;
pub mod state;
pub mod types;
