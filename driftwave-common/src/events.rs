//! Event system for the driftwave playback engine
//!
//! The engine uses hybrid communication:
//! - **EventBus** (tokio::broadcast): one-to-many lifecycle/progress events
//! - **Command channels** (tokio::mpsc): request → single handler
//! - **Shared state** (Arc + atomics/locks): read-heavy access
//!
//! `PlayerEvent` is the public event surface: one variant per lifecycle or
//! progress signal, mirroring the familiar media-element vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Public player events
///
/// Every event carries the emission timestamp. Progress events (`TimeUpdate`,
/// `VolumeChange`, `DurationChange`) additionally carry their scalar payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// A load or load-from-URL began
    LoadStart { timestamp: DateTime<Utc> },

    /// Metadata for the loaded source is available
    LoadedMetadata { timestamp: DateTime<Utc> },

    /// Enough is known to begin playback
    CanPlay { timestamp: DateTime<Utc> },

    /// Playback was requested
    Play { timestamp: DateTime<Utc> },

    /// Playback is running
    Playing { timestamp: DateTime<Utc> },

    /// Playback was paused
    Pause { timestamp: DateTime<Utc> },

    /// Playback stalled waiting for decoded audio
    Waiting { timestamp: DateTime<Utc> },

    /// A seek began
    Seeking { timestamp: DateTime<Utc> },

    /// A seek completed
    Seeked { timestamp: DateTime<Utc> },

    /// Periodic playback position update
    TimeUpdate {
        seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// Volume changed (0.0 - 1.0)
    VolumeChange {
        volume: f64,
        timestamp: DateTime<Utc>,
    },

    /// Source duration became known or changed
    DurationChange {
        seconds: f64,
        timestamp: DateTime<Utc>,
    },

    /// Playback reached the end of the source
    Ended { timestamp: DateTime<Utc> },

    /// A decode or network error occurred
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The player was reset and holds no source
    Emptied { timestamp: DateTime<Utc> },
}

/// Event broadcaster for player events
///
/// Wraps `tokio::sync::broadcast` for one-to-many delivery. Subscribers that
/// fall behind lose the oldest events (lossy by design); the engine never
/// blocks on a slow listener.
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    ///
    /// Progress events are emitted through this path: a player with no
    /// listeners is valid.
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
