//! Public player facade
//!
//! `Player` wires the pieces together: it owns the engine client, the
//! playback scheduler, the output sink, the fetch coordinator for streamed
//! sources, and the event bus. A background task drains engine messages,
//! output completions and fetch failures; public operations are async calls
//! that await their engine replies.
//!
//! Session counter: every load and every seek advances the session. Engine
//! events tagged with an older session belong to audio the player already
//! discarded and are dropped. Seek epoch: a newer seek supersedes a pending
//! one, whose eventual reply is then ignored instead of re-anchoring the
//! clock behind the newer seek's back.

use crate::engine::client::EngineClient;
use crate::engine::protocol::{
    AudioMetadata, EngineEvent, EngineMessage, EngineOp, EngineReply, SessionId,
};
use crate::engine::{spawn_engine, DecodeEngine};
use crate::error::{Error, Result};
use crate::playback::output::{OutputEvent, OutputSink};
use crate::playback::scheduler::{PlaybackScheduler, SchedulerAction};
use crate::playback::state::{next_state, LifecycleEvent, PlayerState};
use crate::stream::fetch::FetchCoordinator;
use crate::stream::ring_buffer::StreamRingBuffer;
use crate::stream::source::{ByteSource, HttpByteSource};
use chrono::Utc;
use driftwave_common::{EngineConfig, EventBus, PlayerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Streaming audio player
///
/// Cheap to share: cloning is not provided, but all operations take `&self`.
pub struct Player {
    shared: Arc<PlayerShared>,
    run_task: JoinHandle<()>,
}

struct PlayerShared {
    config: EngineConfig,
    events: EventBus,
    output: Arc<dyn OutputSink>,
    client: EngineClient,
    state: RwLock<PlayerState>,
    metadata: RwLock<Option<AudioMetadata>>,
    volume: Mutex<f64>,
    session: AtomicU64,
    seek_epoch: AtomicU64,
    scheduler: Mutex<PlaybackScheduler>,
    fetch: Mutex<Option<FetchCoordinator>>,
    failure_tx: mpsc::UnboundedSender<Error>,
    time_task: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Create a player over a decode engine and an output sink.
    ///
    /// `output_events` is the completion channel belonging to `output`.
    pub fn new<E: DecodeEngine>(
        config: EngineConfig,
        engine: E,
        output: Arc<dyn OutputSink>,
        output_events: mpsc::UnboundedReceiver<OutputEvent>,
    ) -> Self {
        let (request_tx, message_rx) = spawn_engine(engine);
        let client = EngineClient::new(request_tx, config.request_timeout());
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let events = EventBus::new(config.event_bus_capacity);

        // The device starts silent and suspended until play() is called.
        output.set_gain(0.0);
        output.suspend();

        let shared = Arc::new(PlayerShared {
            scheduler: Mutex::new(PlaybackScheduler::new(config.watermarks())),
            config,
            events,
            output,
            client,
            state: RwLock::new(PlayerState::Idle),
            metadata: RwLock::new(None),
            volume: Mutex::new(1.0),
            session: AtomicU64::new(0),
            seek_epoch: AtomicU64::new(0),
            fetch: Mutex::new(None),
            failure_tx,
            time_task: Mutex::new(None),
        });

        let run_task = tokio::spawn(run_loop(
            Arc::clone(&shared),
            message_rx,
            output_events,
            failure_rx,
        ));
        Self { shared, run_task }
    }

    /// Load a local file and decode its metadata
    pub async fn load(&self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        info!("Loading {}", path);
        self.shared.reset_source();
        self.shared.emit(PlayerEvent::LoadStart {
            timestamp: Utc::now(),
        });
        let session = self.shared.advance_session();
        let op = EngineOp::Init {
            path,
            chunk_size: self.shared.config.chunk_size,
        };
        self.shared.finish_load(session, op).await
    }

    /// Load a network source by URL, streaming it through the ring buffer
    pub async fn load_src(&self, url: impl Into<String>) -> Result<()> {
        self.load_stream(Arc::new(HttpByteSource::new(url))).await
    }

    /// Load from an arbitrary byte source (the seam `load_src` goes through)
    pub async fn load_stream(&self, source: Arc<dyn ByteSource>) -> Result<()> {
        self.shared.reset_source();
        self.shared.emit(PlayerEvent::LoadStart {
            timestamp: Utc::now(),
        });
        let session = self.shared.advance_session();

        let total_size = match source.content_length().await {
            Ok(size) => size,
            Err(e) => {
                self.shared.emit_error(&e);
                return Err(e);
            }
        };
        info!("Streaming source of {} bytes", total_size);

        let ring = Arc::new(StreamRingBuffer::new(self.shared.config.ring_capacity_bytes));
        let mut fetch = FetchCoordinator::new(
            source,
            Arc::clone(&ring),
            total_size,
            self.shared.failure_tx.clone(),
        );
        // The fetch must be running before the engine starts pulling bytes
        // for metadata probing.
        fetch.restart(0);
        *self.shared.fetch.lock().unwrap() = Some(fetch);

        let op = EngineOp::InitStream {
            total_size,
            ring,
            chunk_size: self.shared.config.chunk_size,
        };
        self.shared.finish_load(session, op).await
    }

    /// Start or resume playback
    pub async fn play(&self) -> Result<()> {
        if self.shared.metadata().is_none() {
            return Ok(());
        }
        self.shared.emit(PlayerEvent::Play {
            timestamp: Utc::now(),
        });

        if self.shared.output.is_suspended() {
            self.shared.output.resume();
        }

        // User pause and watermark back-pressure share the paused flag; a
        // single resume restarts decoding for either.
        let needs_resume = {
            let mut sched = self.shared.scheduler.lock().unwrap();
            let paused = sched.engine_paused();
            if paused {
                sched.set_engine_paused(false);
            }
            paused
        };
        if needs_resume {
            let session = self.shared.current_session();
            if let Err(e) = self.shared.client.request(session, EngineOp::Resume).await {
                if !e.is_cancellation() {
                    self.shared.scheduler.lock().unwrap().rollback_resume();
                    warn!("Resume request failed: {}", e);
                    return Err(e);
                }
                return Ok(());
            }
        }

        let volume = *self.shared.volume.lock().unwrap();
        self.shared
            .output
            .ramp_gain(volume, self.shared.config.fade_secs);
        self.shared.emit(PlayerEvent::Playing {
            timestamp: Utc::now(),
        });
        self.shared.start_time_updates();
        Ok(())
    }

    /// Pause playback with a fade-out, then freeze the output clock
    pub async fn pause(&self) -> Result<()> {
        if self.shared.metadata().is_none() {
            return Ok(());
        }
        self.shared.emit(PlayerEvent::Pause {
            timestamp: Utc::now(),
        });
        self.shared.stop_time_updates();

        self.shared
            .scheduler
            .lock()
            .unwrap()
            .set_engine_paused(true);
        let session = self.shared.current_session();
        if let Err(e) = self.shared.client.request(session, EngineOp::Pause).await {
            if !e.is_cancellation() {
                // The failure stays with this call; the player is not moved
                // to the error state for anything but a failed load.
                self.shared.scheduler.lock().unwrap().rollback_pause();
                warn!("Pause request failed: {}", e);
                return Err(e);
            }
            return Ok(());
        }

        let fade = self.shared.config.fade_secs;
        self.shared.output.ramp_gain(0.0, fade);
        tokio::time::sleep(Duration::from_secs_f64(fade)).await;

        // Another operation may have restarted playback during the fade.
        if self.shared.state() == PlayerState::Paused && !self.shared.output.is_suspended() {
            self.shared.output.suspend();
        }
        Ok(())
    }

    /// Seek to a media time in seconds.
    ///
    /// `immediate` skips the fades; it is used internally for tempo/pitch
    /// changes that re-seek to the current position.
    pub async fn seek(&self, time: f64, immediate: bool) -> Result<()> {
        if self.shared.metadata().is_none() {
            return Ok(());
        }
        let epoch = self.shared.seek_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Seeking to {:.3}s (immediate: {})", time, immediate);
        self.shared.emit(PlayerEvent::Seeking {
            timestamp: Utc::now(),
        });

        let seek_fade = self.shared.config.seek_fade_secs;
        if immediate {
            self.shared.output.cancel_ramps();
            self.shared.output.set_gain(0.0);
        } else {
            self.shared.output.ramp_gain(0.0, seek_fade);
            tokio::time::sleep(Duration::from_secs_f64(seek_fade)).await;
        }

        // Drop everything queued and start a fresh session so chunks decoded
        // before the seek can no longer be scheduled.
        self.shared
            .scheduler
            .lock()
            .unwrap()
            .clear_for_seek(&*self.shared.output);
        let session = self.shared.advance_session();

        match self
            .shared
            .client
            .request(session, EngineOp::Seek { target_secs: time })
            .await
        {
            Ok(EngineReply::SeekDone { resolved_secs }) => {
                if self.shared.seek_epoch.load(Ordering::SeqCst) != epoch {
                    // A newer seek owns the clock now.
                    trace!("Seek to {:.3}s superseded", time);
                    return Ok(());
                }
                let now = self.shared.output.now();
                self.shared
                    .scheduler
                    .lock()
                    .unwrap()
                    .on_seek_done(now, resolved_secs);

                if self.shared.state() == PlayerState::Playing {
                    let volume = *self.shared.volume.lock().unwrap();
                    self.shared.output.cancel_ramps();
                    if immediate {
                        self.shared.output.set_gain(volume);
                    } else {
                        self.shared.output.set_gain(0.0);
                        self.shared.output.ramp_gain(volume, seek_fade);
                    }
                }

                self.shared.emit(PlayerEvent::Seeked {
                    timestamp: Utc::now(),
                });
                self.shared.emit(PlayerEvent::TimeUpdate {
                    seconds: resolved_secs,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Ok(other) => Err(Error::Protocol(format!("unexpected seek reply: {other:?}"))),
            Err(e) if e.is_cancellation() => Ok(()),
            Err(e) => {
                // Rejects only this call; the player state is untouched.
                warn!("Seek request failed: {}", e);
                Err(e)
            }
        }
    }

    /// Set the playback volume (clamped to 0..=1).
    ///
    /// While playing this ramps the gain briefly instead of stepping it.
    pub fn set_volume(&self, value: f64) {
        let volume = value.clamp(0.0, 1.0);
        *self.shared.volume.lock().unwrap() = volume;
        if self.shared.state() == PlayerState::Playing {
            self.shared
                .output
                .ramp_gain(volume, self.shared.config.volume_ramp_secs);
        }
        self.shared.emit(PlayerEvent::VolumeChange {
            volume,
            timestamp: Utc::now(),
        });
    }

    /// Change the playback rate, keeping pitch
    pub async fn set_tempo(&self, tempo: f64) -> Result<()> {
        if self.shared.metadata().is_none() {
            return Ok(());
        }
        let position = self.current_time();
        let session = self.shared.current_session();
        match self
            .shared
            .client
            .request(session, EngineOp::SetTempo { tempo })
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_cancellation() => return Ok(()),
            Err(e) => {
                warn!("Tempo change failed: {}", e);
                return Err(e);
            }
        }
        {
            let now = self.shared.output.now();
            self.shared.scheduler.lock().unwrap().set_tempo(now, tempo);
        }
        // The engine restarts its output at the new rate; re-seek to where
        // we were, without fades.
        self.seek(position, true).await
    }

    /// Change the pitch scalar, keeping rate
    pub async fn set_pitch(&self, pitch: f64) -> Result<()> {
        if self.shared.metadata().is_none() {
            return Ok(());
        }
        let position = self.current_time();
        let session = self.shared.current_session();
        match self
            .shared
            .client
            .request(session, EngineOp::SetPitch { pitch })
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_cancellation() => return Ok(()),
            Err(e) => {
                warn!("Pitch change failed: {}", e);
                return Err(e);
            }
        }
        self.seek(position, true).await
    }

    /// Restore tempo and pitch to 1.0
    pub async fn reset_tempo_and_pitch(&self) -> Result<()> {
        if self.shared.metadata().is_none() {
            return Ok(());
        }
        let position = self.current_time();
        let session = self.shared.current_session();
        for op in [
            EngineOp::SetTempo { tempo: 1.0 },
            EngineOp::SetPitch { pitch: 1.0 },
        ] {
            match self.shared.client.request(session, op).await {
                Ok(_) => {}
                Err(e) if e.is_cancellation() => return Ok(()),
                Err(e) => {
                    warn!("Tempo/pitch reset failed: {}", e);
                    return Err(e);
                }
            }
        }
        {
            let now = self.shared.output.now();
            self.shared.scheduler.lock().unwrap().set_tempo(now, 1.0);
        }
        self.seek(position, true).await
    }

    /// Render a source to WAV bytes through the engine
    pub async fn export_as_wav(&self, path: impl Into<String>) -> Result<Vec<u8>> {
        if self.shared.metadata().is_none() {
            return Err(Error::InvalidState("no source loaded".into()));
        }
        let session = self.shared.current_session();
        let reply = self
            .shared
            .client
            .request_with_timeout(
                session,
                EngineOp::ExportWav { path: path.into() },
                self.shared.config.export_timeout(),
            )
            .await?;
        match reply {
            EngineReply::WavExported { data } => Ok(data),
            other => Err(Error::Protocol(format!(
                "unexpected export reply: {other:?}"
            ))),
        }
    }

    /// Tear the player down: cancel everything, stop the background task
    pub fn destroy(&self) {
        info!("Destroying player");
        self.shared.reset_source();
        self.shared.client.reset_all("player destroyed");
        self.run_task.abort();
    }

    /// Subscribe to player events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.events.subscribe()
    }

    /// Current lifecycle state
    pub fn state(&self) -> PlayerState {
        self.shared.state()
    }

    /// Duration of the loaded source in seconds, 0 when nothing is loaded
    pub fn duration(&self) -> f64 {
        self.shared
            .metadata()
            .map(|m| m.duration_secs)
            .unwrap_or(0.0)
    }

    /// Current playback position in seconds
    pub fn current_time(&self) -> f64 {
        self.shared.current_time()
    }

    /// Current volume setting
    pub fn volume(&self) -> f64 {
        *self.shared.volume.lock().unwrap()
    }

    /// Metadata of the loaded source
    pub fn metadata(&self) -> Option<AudioMetadata> {
        self.shared.metadata()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shared.stop_time_updates();
        self.run_task.abort();
    }
}

impl PlayerShared {
    fn state(&self) -> PlayerState {
        *self.state.read().unwrap()
    }

    fn metadata(&self) -> Option<AudioMetadata> {
        self.metadata.read().unwrap().clone()
    }

    fn current_session(&self) -> SessionId {
        self.session.load(Ordering::SeqCst)
    }

    fn advance_session(&self) -> SessionId {
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_time(&self) -> f64 {
        if self.metadata().is_none() {
            return 0.0;
        }
        let now = self.output.now();
        self.scheduler.lock().unwrap().position(now)
    }

    /// Emit an event, running the lifecycle transition it implies first
    fn emit(&self, event: PlayerEvent) {
        if let Some(lifecycle) = lifecycle_of(&event) {
            let mut state = self.state.write().unwrap();
            let next = next_state(*state, lifecycle);
            if next != *state {
                debug!("Player state {} -> {}", *state, next);
                *state = next;
            }
        }
        self.events.emit_lossy(event);
    }

    fn emit_error(&self, error: &Error) {
        warn!("Player error: {}", error);
        self.emit(PlayerEvent::Error {
            message: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Await the init reply and install the metadata it carries
    async fn finish_load(&self, session: SessionId, op: EngineOp) -> Result<()> {
        match self.client.request(session, op).await {
            Ok(EngineReply::Metadata(metadata)) => {
                let duration = metadata.duration_secs;
                debug!(
                    "Loaded metadata: {} Hz, {} ch, {:.1}s, {}",
                    metadata.sample_rate, metadata.channel_count, duration, metadata.encoding
                );
                *self.metadata.write().unwrap() = Some(metadata);
                {
                    let now = self.output.now();
                    self.scheduler.lock().unwrap().reset(now);
                }
                self.emit(PlayerEvent::DurationChange {
                    seconds: duration,
                    timestamp: Utc::now(),
                });
                self.emit(PlayerEvent::LoadedMetadata {
                    timestamp: Utc::now(),
                });
                self.emit(PlayerEvent::CanPlay {
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Ok(other) => {
                let e = Error::Protocol(format!("unexpected init reply: {other:?}"));
                self.emit_error(&e);
                Err(e)
            }
            Err(e) if e.is_cancellation() => Ok(()),
            Err(e) => {
                self.emit_error(&e);
                Err(e)
            }
        }
    }

    /// Full source reset ahead of a load or teardown; fires `emptied`
    fn reset_source(&self) {
        self.stop_time_updates();
        self.output.suspend();
        self.output.stop_all();
        self.output.cancel_ramps();
        self.output.set_gain(0.0);
        {
            let now = self.output.now();
            self.scheduler.lock().unwrap().reset(now);
        }
        *self.metadata.write().unwrap() = None;
        if let Some(mut fetch) = self.fetch.lock().unwrap().take() {
            fetch.cancel();
        }
        self.client.reset_all("source reset");
        self.emit(PlayerEvent::Emptied {
            timestamp: Utc::now(),
        });
    }

    fn start_time_updates(self: &Arc<Self>) {
        let mut guard = self.time_task.lock().unwrap();
        if guard.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let shared = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.time_update_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if shared.state() != PlayerState::Playing {
                    break;
                }
                shared.emit(PlayerEvent::TimeUpdate {
                    seconds: shared.current_time(),
                    timestamp: Utc::now(),
                });
            }
        }));
    }

    fn stop_time_updates(&self) {
        if let Some(task) = self.time_task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn handle_message(self: &Arc<Self>, message: EngineMessage) {
        match message {
            EngineMessage::Reply { id, result } => {
                self.client.complete(id, result.map_err(Error::Protocol));
            }
            EngineMessage::Event(event) => self.handle_engine_event(event),
        }
    }

    fn handle_engine_event(self: &Arc<Self>, event: EngineEvent) {
        match event {
            EngineEvent::Chunk { session, chunk } => {
                if session != self.current_session() {
                    trace!("Dropping chunk from stale session {}", session);
                    return;
                }
                if self.metadata().is_none() {
                    return;
                }
                let action = self
                    .scheduler
                    .lock()
                    .unwrap()
                    .schedule_chunk(&*self.output, chunk);
                if action == Some(SchedulerAction::RequestPause) {
                    self.request_engine_pause(session);
                }
            }
            EngineEvent::EndOfStream { session } => {
                if session != self.current_session() {
                    trace!("Dropping end-of-stream from stale session {}", session);
                    return;
                }
                debug!("Decode engine reported end of stream");
                let playing = self.state() == PlayerState::Playing;
                let action = self.scheduler.lock().unwrap().on_eof(playing);
                if let Some(action) = action {
                    self.perform(action, session);
                }
            }
            EngineEvent::ReseekNetwork { session, offset } => {
                if session != self.current_session() {
                    trace!("Dropping network reposition from stale session {}", session);
                    return;
                }
                debug!("Engine requested network reposition to offset {}", offset);
                if let Some(fetch) = self.fetch.lock().unwrap().as_mut() {
                    fetch.restart(offset);
                }
            }
        }
    }

    fn handle_output_event(self: &Arc<Self>, event: OutputEvent) {
        match event {
            OutputEvent::ChunkEnded { id } => {
                let playing = self.state() == PlayerState::Playing;
                let now = self.output.now();
                let actions = self
                    .scheduler
                    .lock()
                    .unwrap()
                    .on_chunk_ended(now, id, playing);
                let session = self.current_session();
                for action in actions {
                    self.perform(action, session);
                }
            }
        }
    }

    fn perform(self: &Arc<Self>, action: SchedulerAction, session: SessionId) {
        match action {
            SchedulerAction::RequestPause => self.request_engine_pause(session),
            SchedulerAction::RequestResume => self.request_engine_resume(session),
            SchedulerAction::Ended => {
                info!("Playback ended");
                self.stop_time_updates();
                self.emit(PlayerEvent::Ended {
                    timestamp: Utc::now(),
                });
            }
            SchedulerAction::Waiting => {
                debug!("Playback stalled waiting for decoded audio");
                self.emit(PlayerEvent::Waiting {
                    timestamp: Utc::now(),
                });
            }
        }
    }

    fn request_engine_pause(self: &Arc<Self>, session: SessionId) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = shared.client.request(session, EngineOp::Pause).await {
                if !e.is_cancellation() {
                    warn!("Back-pressure pause request failed: {}", e);
                    shared.scheduler.lock().unwrap().rollback_pause();
                }
            }
        });
    }

    fn request_engine_resume(self: &Arc<Self>, session: SessionId) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = shared.client.request(session, EngineOp::Resume).await {
                if !e.is_cancellation() {
                    warn!("Back-pressure resume request failed: {}", e);
                    shared.scheduler.lock().unwrap().rollback_resume();
                }
            }
        });
    }

    fn handle_stream_failure(&self, error: Error) {
        self.emit_error(&error);
    }
}

/// Map a public event to the lifecycle transition it drives, if any
fn lifecycle_of(event: &PlayerEvent) -> Option<LifecycleEvent> {
    match event {
        PlayerEvent::LoadStart { .. } => Some(LifecycleEvent::LoadStarted),
        PlayerEvent::LoadedMetadata { .. } => Some(LifecycleEvent::MetadataLoaded),
        PlayerEvent::CanPlay { .. } => Some(LifecycleEvent::CanPlay),
        PlayerEvent::Playing { .. } => Some(LifecycleEvent::PlayingStarted),
        PlayerEvent::Pause { .. } => Some(LifecycleEvent::PauseConfirmed),
        PlayerEvent::Ended { .. } => Some(LifecycleEvent::Ended),
        PlayerEvent::Error { .. } => Some(LifecycleEvent::Failed),
        PlayerEvent::Emptied { .. } => Some(LifecycleEvent::Emptied),
        _ => None,
    }
}

async fn run_loop(
    shared: Arc<PlayerShared>,
    mut messages: mpsc::UnboundedReceiver<EngineMessage>,
    mut output_events: mpsc::UnboundedReceiver<OutputEvent>,
    mut failures: mpsc::UnboundedReceiver<Error>,
) {
    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(message) => shared.handle_message(message),
                None => break,
            },
            event = output_events.recv() => match event {
                Some(event) => shared.handle_output_event(event),
                None => break,
            },
            failure = failures.recv() => match failure {
                Some(failure) => shared.handle_stream_failure(failure),
                None => break,
            },
        }
    }
    debug!("Player run loop stopped");
}
