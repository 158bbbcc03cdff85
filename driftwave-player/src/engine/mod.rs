//! Decode engine protocol, client, and spawn glue
//!
//! The decode engine runs as an opaque worker behind a pair of channels:
//! requests go in with a correlation id, replies and unsolicited events come
//! back interleaved on a single message channel. `EngineClient` turns that
//! into awaitable request/response calls; `DecodeEngine` is the seam that
//! lets tests substitute a scripted engine for the real worker.

pub mod client;
pub mod protocol;

use protocol::{EngineMessage, EngineRequest};
use tokio::sync::mpsc;

/// A decode engine worker: consumes requests, produces replies and events.
///
/// `run` takes ownership and is expected to move the work onto its own task
/// (or process); it must not block the caller.
pub trait DecodeEngine: Send + Sized + 'static {
    fn run(
        self,
        requests: mpsc::UnboundedReceiver<EngineRequest>,
        messages: mpsc::UnboundedSender<EngineMessage>,
    );
}

/// Wire an engine to fresh channels and start it.
///
/// Returns the request sender and the message receiver for the player side.
pub fn spawn_engine<E: DecodeEngine>(
    engine: E,
) -> (
    mpsc::UnboundedSender<EngineRequest>,
    mpsc::UnboundedReceiver<EngineMessage>,
) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    engine.run(request_rx, message_tx);
    (request_tx, message_rx)
}
