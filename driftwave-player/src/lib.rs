//! driftwave-player: streaming audio playback engine
//!
//! Drives an out-of-process decode engine over a request/response protocol,
//! schedules the decoded PCM chunks gaplessly onto an output clock, and
//! streams compressed audio to the engine through a shared ring buffer with
//! watermark-based back-pressure.
//!
//! ## Architecture
//!
//! ```text
//! HTTP source ──▶ FetchCoordinator ──▶ StreamRingBuffer ──▶ DecodeEngine
//!                                                               │
//!                   EngineClient ◀── replies / events ──────────┘
//!                        │
//!                        ▼
//!                 PlaybackScheduler ──▶ OutputSink (audio clock + gain)
//!                        │
//!                        ▼
//!                     EventBus (PlayerEvent broadcast)
//! ```
//!
//! The `Player` facade owns all of the above and exposes the public API:
//! load, play, pause, seek, tempo/pitch, volume, export, destroy.

pub mod engine;
pub mod error;
pub mod playback;
pub mod player;
pub mod stream;

pub use engine::client::EngineClient;
pub use engine::protocol::{
    AudioMetadata, EngineEvent, EngineMessage, EngineOp, EngineReply, EngineRequest, RequestId,
    SessionId,
};
pub use engine::{spawn_engine, DecodeEngine};
pub use error::{Error, Result};
pub use playback::output::{GainOp, OutputEvent, OutputSink, VirtualOutput};
pub use playback::scheduler::PlaybackScheduler;
pub use playback::state::PlayerState;
pub use playback::types::PcmChunk;
pub use player::Player;
pub use stream::fetch::FetchCoordinator;
pub use stream::ring_buffer::{ReadOutcome, StreamRingBuffer};
pub use stream::source::{ByteSource, HttpByteSource, RangeBody};
