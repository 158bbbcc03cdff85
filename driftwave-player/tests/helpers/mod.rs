//! Shared test support: a scripted decode engine and a player fixture
//!
//! `ScriptedEngine` answers protocol requests with canned replies (metadata
//! on init, seek-done echoing the target, ack elsewhere) and lets the test
//! inject unsolicited events (chunks, end-of-stream, network reseek) tagged
//! with the session of the most recent request. Individual operations can be
//! silenced (never replied, for timeout tests), failed, or delayed.

#![allow(dead_code)]

use driftwave_common::{EngineConfig, PlayerEvent};
use driftwave_player::{
    AudioMetadata, ByteSource, DecodeEngine, EngineMessage, EngineOp, EngineReply, EngineRequest,
    OutputSink, PcmChunk, Player, RangeBody, SessionId, StreamRingBuffer, VirtualOutput,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub enum Inject {
    Chunk {
        session: Option<SessionId>,
        chunk: PcmChunk,
    },
    Eof {
        session: Option<SessionId>,
    },
    Reseek {
        session: Option<SessionId>,
        offset: u64,
    },
}

struct EngineShared {
    ops: Mutex<Vec<(String, SessionId)>>,
    last_session: AtomicU64,
    ring: Mutex<Option<Arc<StreamRingBuffer>>>,
}

/// Decode engine driven by the test through an `EngineController`
pub struct ScriptedEngine {
    metadata: AudioMetadata,
    silent_ops: HashSet<&'static str>,
    failing_ops: HashSet<&'static str>,
    delayed_ops: HashMap<&'static str, Duration>,
    inject_tx: mpsc::UnboundedSender<Inject>,
    inject_rx: mpsc::UnboundedReceiver<Inject>,
    shared: Arc<EngineShared>,
}

/// Test-side handle for injecting events and inspecting requests
pub struct EngineController {
    inject_tx: mpsc::UnboundedSender<Inject>,
    shared: Arc<EngineShared>,
}

impl ScriptedEngine {
    pub fn new(metadata: AudioMetadata) -> Self {
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        Self {
            metadata,
            silent_ops: HashSet::new(),
            failing_ops: HashSet::new(),
            delayed_ops: HashMap::new(),
            inject_tx,
            inject_rx,
            shared: Arc::new(EngineShared {
                ops: Mutex::new(Vec::new()),
                last_session: AtomicU64::new(0),
                ring: Mutex::new(None),
            }),
        }
    }

    /// Handle for driving this engine after the player takes ownership
    pub fn controller(&self) -> EngineController {
        EngineController {
            inject_tx: self.inject_tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Never reply to the named operation
    pub fn silent_on(mut self, op: &'static str) -> Self {
        self.silent_ops.insert(op);
        self
    }

    /// Reply with an error to the named operation
    pub fn failing_on(mut self, op: &'static str) -> Self {
        self.failing_ops.insert(op);
        self
    }

    /// Delay the reply to the named operation
    pub fn delayed_on(mut self, op: &'static str, delay: Duration) -> Self {
        self.delayed_ops.insert(op, delay);
        self
    }

}

fn canned_reply(metadata: &AudioMetadata, shared: &EngineShared, op: &EngineOp) -> EngineReply {
    match op {
        EngineOp::Init { .. } => EngineReply::Metadata(metadata.clone()),
        EngineOp::InitStream { ring, .. } => {
            *shared.ring.lock().unwrap() = Some(Arc::clone(ring));
            EngineReply::Metadata(metadata.clone())
        }
        EngineOp::Seek { target_secs } => EngineReply::SeekDone {
            resolved_secs: *target_secs,
        },
        EngineOp::ExportWav { .. } => EngineReply::WavExported {
            data: b"RIFF".to_vec(),
        },
        _ => EngineReply::Ack,
    }
}

impl DecodeEngine for ScriptedEngine {
    fn run(
        self,
        mut requests: mpsc::UnboundedReceiver<EngineRequest>,
        messages: mpsc::UnboundedSender<EngineMessage>,
    ) {
        let ScriptedEngine {
            metadata,
            silent_ops,
            failing_ops,
            delayed_ops,
            inject_tx: _inject_tx,
            mut inject_rx,
            shared,
        } = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    request = requests.recv() => {
                        let Some(request) = request else { break };
                        let name = request.op.name();
                        shared
                            .last_session
                            .store(request.session, Ordering::SeqCst);
                        shared
                            .ops
                            .lock()
                            .unwrap()
                            .push((name.to_string(), request.session));

                        if silent_ops.contains(name) {
                            continue;
                        }
                        let result = if failing_ops.contains(name) {
                            Err("scripted failure".to_string())
                        } else {
                            Ok(canned_reply(&metadata, &shared, &request.op))
                        };
                        let reply = EngineMessage::Reply {
                            id: request.id,
                            result,
                        };
                        match delayed_ops.get(name).copied() {
                            Some(delay) => {
                                let messages = messages.clone();
                                tokio::spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    let _ = messages.send(reply);
                                });
                            }
                            None => {
                                let _ = messages.send(reply);
                            }
                        }
                    }
                    inject = inject_rx.recv() => {
                        let Some(inject) = inject else { break };
                        let current = shared.last_session.load(Ordering::SeqCst);
                        let event = match inject {
                            Inject::Chunk { session, chunk } => {
                                driftwave_player::EngineEvent::Chunk {
                                    session: session.unwrap_or(current),
                                    chunk,
                                }
                            }
                            Inject::Eof { session } => driftwave_player::EngineEvent::EndOfStream {
                                session: session.unwrap_or(current),
                            },
                            Inject::Reseek { session, offset } => {
                                driftwave_player::EngineEvent::ReseekNetwork {
                                    session: session.unwrap_or(current),
                                    offset,
                                }
                            }
                        };
                        let _ = messages.send(EngineMessage::Event(event));
                    }
                }
            }
        });
    }
}

impl EngineController {
    pub fn send_chunk(&self, chunk: PcmChunk) {
        let _ = self.inject_tx.send(Inject::Chunk {
            session: None,
            chunk,
        });
    }

    pub fn send_chunk_for_session(&self, session: SessionId, chunk: PcmChunk) {
        let _ = self.inject_tx.send(Inject::Chunk {
            session: Some(session),
            chunk,
        });
    }

    pub fn send_eof(&self) {
        let _ = self.inject_tx.send(Inject::Eof { session: None });
    }

    pub fn send_eof_for_session(&self, session: SessionId) {
        let _ = self.inject_tx.send(Inject::Eof {
            session: Some(session),
        });
    }

    pub fn send_reseek(&self, offset: u64) {
        let _ = self.inject_tx.send(Inject::Reseek {
            session: None,
            offset,
        });
    }

    pub fn send_reseek_for_session(&self, session: SessionId, offset: u64) {
        let _ = self.inject_tx.send(Inject::Reseek {
            session: Some(session),
            offset,
        });
    }

    /// Log of (operation name, session) pairs, in arrival order
    pub fn ops(&self) -> Vec<(String, SessionId)> {
        self.shared.ops.lock().unwrap().clone()
    }

    pub fn op_count(&self, name: &str) -> usize {
        self.shared
            .ops
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| op == name)
            .count()
    }

    pub fn last_session(&self) -> SessionId {
        self.shared.last_session.load(Ordering::SeqCst)
    }

    /// Ring buffer handed over in the most recent init-stream request
    pub fn ring(&self) -> Option<Arc<StreamRingBuffer>> {
        self.shared.ring.lock().unwrap().clone()
    }
}

/// Player + scripted engine + virtual output, wired together
pub struct Fixture {
    pub player: Arc<Player>,
    pub engine: EngineController,
    pub output: Arc<VirtualOutput>,
}

impl Fixture {
    pub fn new(metadata: AudioMetadata) -> Self {
        Self::with_config(metadata, EngineConfig::default())
    }

    pub fn with_config(metadata: AudioMetadata, config: EngineConfig) -> Self {
        Self::build(ScriptedEngine::new(metadata), config)
    }

    pub fn build(engine: ScriptedEngine, config: EngineConfig) -> Self {
        let controller = engine.controller();
        let (output, output_rx) = VirtualOutput::new();
        let output = Arc::new(output);
        let sink: Arc<dyn OutputSink> = Arc::clone(&output) as Arc<dyn OutputSink>;
        let player = Arc::new(Player::new(config, engine, sink, output_rx));
        Self {
            player,
            engine: controller,
            output,
        }
    }
}

/// Standard metadata for a 4-second stereo source
pub fn test_metadata() -> AudioMetadata {
    AudioMetadata {
        sample_rate: 44100,
        channel_count: 2,
        duration_secs: 4.0,
        encoding: "flac".to_string(),
        bits_per_sample: Some(16),
        tags: HashMap::new(),
        cover_art: None,
    }
}

/// A silent stereo chunk of the given length starting at `media_time`
pub fn chunk_at(media_time: f64, secs: f64) -> PcmChunk {
    PcmChunk::silence((secs * 44100.0) as usize, 2, 44100, media_time)
}

/// Let the player's background tasks drain their channels
pub async fn settle() {
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Drain every queued event into variant names
pub fn drain_events(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<String> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event_name(&event).to_string());
    }
    names
}

pub fn event_name(event: &PlayerEvent) -> &'static str {
    match event {
        PlayerEvent::LoadStart { .. } => "LoadStart",
        PlayerEvent::LoadedMetadata { .. } => "LoadedMetadata",
        PlayerEvent::CanPlay { .. } => "CanPlay",
        PlayerEvent::Play { .. } => "Play",
        PlayerEvent::Playing { .. } => "Playing",
        PlayerEvent::Pause { .. } => "Pause",
        PlayerEvent::Waiting { .. } => "Waiting",
        PlayerEvent::Seeking { .. } => "Seeking",
        PlayerEvent::Seeked { .. } => "Seeked",
        PlayerEvent::TimeUpdate { .. } => "TimeUpdate",
        PlayerEvent::VolumeChange { .. } => "VolumeChange",
        PlayerEvent::DurationChange { .. } => "DurationChange",
        PlayerEvent::Ended { .. } => "Ended",
        PlayerEvent::Error { .. } => "Error",
        PlayerEvent::Emptied { .. } => "Emptied",
    }
}

/// In-memory byte source for streaming tests
pub struct MemorySource {
    pub data: Vec<u8>,
    pub chunk: usize,
}

#[async_trait::async_trait]
impl ByteSource for MemorySource {
    async fn content_length(&self) -> driftwave_player::Result<u64> {
        Ok(self.data.len() as u64)
    }

    async fn open(&self, offset: u64) -> driftwave_player::Result<RangeBody> {
        if offset >= self.data.len() as u64 {
            return Ok(RangeBody::Unsatisfiable);
        }
        let chunks: Vec<driftwave_player::Result<bytes::Bytes>> = self.data[offset as usize..]
            .chunks(self.chunk)
            .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
            .collect();
        Ok(RangeBody::Stream(Box::pin(futures::stream::iter(chunks))))
    }
}
