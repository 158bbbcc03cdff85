//! Wire types for the decode engine protocol
//!
//! Every request carries a unique correlation id and the session it belongs
//! to. The engine answers each request with exactly one reply tagged with the
//! same id, and additionally emits unsolicited events (decoded chunks,
//! end-of-stream, network reseek) tagged with the session that produced them.
//! Session tags let the player discard events from a source it has already
//! replaced.

use crate::playback::types::PcmChunk;
use crate::stream::ring_buffer::StreamRingBuffer;
use std::collections::HashMap;
use std::sync::Arc;

/// Correlation id for request/reply matching
pub type RequestId = u64;

/// Identifies which loaded source an event belongs to
pub type SessionId = u64;

/// Metadata reported by the engine after a successful init
#[derive(Debug, Clone, Default)]
pub struct AudioMetadata {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub duration_secs: f64,
    pub encoding: String,
    pub bits_per_sample: Option<u16>,
    /// Free-form tags (title, artist, album, ...)
    pub tags: HashMap<String, String>,
    pub cover_art: Option<Vec<u8>>,
}

/// Operations the player can request from the engine
#[derive(Debug, Clone)]
pub enum EngineOp {
    /// Open a local file and begin decoding
    Init { path: String, chunk_size: usize },

    /// Begin decoding from a shared ring buffer fed by the fetch loop
    InitStream {
        total_size: u64,
        ring: Arc<StreamRingBuffer>,
        chunk_size: usize,
    },

    /// Stop producing chunks (back-pressure, not user pause)
    Pause,

    /// Resume producing chunks
    Resume,

    /// Reposition decoding to a media time in seconds
    Seek { target_secs: f64 },

    /// Change playback rate without changing pitch
    SetTempo { tempo: f64 },

    /// Change pitch scalar without changing rate
    SetPitch { pitch: f64 },

    /// Render a source to a WAV byte buffer
    ExportWav { path: String },
}

impl EngineOp {
    /// Operation name for logs and timeout errors
    pub fn name(&self) -> &'static str {
        match self {
            EngineOp::Init { .. } => "init",
            EngineOp::InitStream { .. } => "init_stream",
            EngineOp::Pause => "pause",
            EngineOp::Resume => "resume",
            EngineOp::Seek { .. } => "seek",
            EngineOp::SetTempo { .. } => "set_tempo",
            EngineOp::SetPitch { .. } => "set_pitch",
            EngineOp::ExportWav { .. } => "export_wav",
        }
    }
}

/// A request sent to the engine
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub id: RequestId,
    pub session: SessionId,
    pub op: EngineOp,
}

/// Successful reply payloads, one shape per operation family
#[derive(Debug, Clone)]
pub enum EngineReply {
    /// Init / InitStream succeeded
    Metadata(AudioMetadata),

    /// Operation acknowledged with no payload
    Ack,

    /// Seek finished; `resolved_secs` is the position actually reached
    SeekDone { resolved_secs: f64 },

    /// Export finished
    WavExported { data: Vec<u8> },
}

/// Unsolicited events from the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A decoded chunk is ready for scheduling
    Chunk { session: SessionId, chunk: PcmChunk },

    /// Decoding consumed the entire source
    EndOfStream { session: SessionId },

    /// A streamed source needs the network fetch restarted at a byte offset
    ReseekNetwork { session: SessionId, offset: u64 },
}

/// Everything the engine sends back, replies and events interleaved
#[derive(Debug)]
pub enum EngineMessage {
    Reply {
        id: RequestId,
        result: Result<EngineReply, String>,
    },
    Event(EngineEvent),
}
