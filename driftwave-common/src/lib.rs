//! # Driftwave Common Library
//!
//! Shared code for the driftwave playback engine:
//! - Player event types (`PlayerEvent`) and the broadcast `EventBus`
//! - Engine configuration (`EngineConfig`)
//! - Timing primitives (`TimeAnchor`, `Watermarks`)

pub mod config;
pub mod error;
pub mod events;
pub mod timing;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{EventBus, PlayerEvent};
pub use timing::{TimeAnchor, Watermarks};
