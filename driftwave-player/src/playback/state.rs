//! Player lifecycle state machine
//!
//! A pure transition table: `next_state(current, event)` returns the state
//! the player should be in after a lifecycle event. The table encodes the
//! ordering guarantees the public events rely on; notably, readiness signals
//! arriving out of order never downgrade an active `Playing` state, and only
//! `Emptied` leaves `Error`.

/// Player lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// No source loaded
    Idle,

    /// A load is in progress
    Loading,

    /// Loaded and ready to play
    Ready,

    /// Audio is playing
    Playing,

    /// Playback paused by the user
    Paused,

    /// A fatal error occurred; only a reset leaves this state
    Error,
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlayerState::Idle => "idle",
            PlayerState::Loading => "loading",
            PlayerState::Ready => "ready",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Lifecycle signals that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    LoadStarted,
    MetadataLoaded,
    CanPlay,
    PlayingStarted,
    PauseConfirmed,
    Ended,
    Failed,
    Emptied,
}

/// Compute the state after a lifecycle event
pub fn next_state(current: PlayerState, event: LifecycleEvent) -> PlayerState {
    use LifecycleEvent::*;
    use PlayerState::*;

    match event {
        LoadStarted => Loading,
        // Readiness signals never downgrade an active or failed player.
        MetadataLoaded | CanPlay => match current {
            Playing | Error => current,
            _ => Ready,
        },
        PlayingStarted => match current {
            Error => Error,
            _ => Playing,
        },
        PauseConfirmed => match current {
            Error => Error,
            Idle | Loading => current,
            _ => Paused,
        },
        Ended => match current {
            Error => Error,
            _ => Idle,
        },
        Failed => Error,
        Emptied => Idle,
    }
}
