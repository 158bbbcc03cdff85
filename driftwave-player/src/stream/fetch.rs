//! Fetch loop feeding the shared ring buffer
//!
//! `FetchCoordinator` owns the single active download for a streamed source.
//! `restart(offset)` cancels whatever fetch is in flight, clears the ring,
//! and spawns a fresh task streaming from the new byte offset. Each task
//! writes under the ring generation it observed at startup, so a canceled
//! fetch that races its own abort cannot deposit stale bytes or mark a stale
//! end-of-stream.
//!
//! Failures are not retried; they are reported to the player through the
//! failure channel and the stream is considered dead until the next load or
//! network seek.

use crate::error::Error;
use crate::stream::ring_buffer::StreamRingBuffer;
use crate::stream::source::{ByteSource, RangeBody};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Coordinates the single active fetch for a streamed source
pub struct FetchCoordinator {
    source: Arc<dyn ByteSource>,
    ring: Arc<StreamRingBuffer>,
    total_size: u64,
    failure_tx: mpsc::UnboundedSender<Error>,
    task: Option<JoinHandle<()>>,
}

impl FetchCoordinator {
    pub fn new(
        source: Arc<dyn ByteSource>,
        ring: Arc<StreamRingBuffer>,
        total_size: u64,
        failure_tx: mpsc::UnboundedSender<Error>,
    ) -> Self {
        Self {
            source,
            ring,
            total_size,
            failure_tx,
            task: None,
        }
    }

    /// Total size of the source in bytes
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Cancel any in-flight fetch and start streaming from `offset`.
    ///
    /// The ring generation is advanced before the reset so a racing stale
    /// writer aborts instead of refilling the cleared ring.
    pub fn restart(&mut self, offset: u64) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let generation = self.ring.advance_generation();
        self.ring.reset();

        info!("Starting fetch at byte offset {} of {}", offset, self.total_size);
        let source = Arc::clone(&self.source);
        let ring = Arc::clone(&self.ring);
        let total_size = self.total_size;
        let failure_tx = self.failure_tx.clone();
        self.task = Some(tokio::spawn(async move {
            if let Err(err) = run_fetch(source, &ring, total_size, offset, generation).await {
                if err.is_cancellation() {
                    debug!("Fetch superseded: {err}");
                } else {
                    warn!("Fetch failed: {err}");
                    let _ = failure_tx.send(err);
                }
            }
        }));
    }

    /// Cancel the in-flight fetch, if any
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FetchCoordinator {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_fetch(
    source: Arc<dyn ByteSource>,
    ring: &StreamRingBuffer,
    total_size: u64,
    offset: u64,
    generation: u64,
) -> Result<(), Error> {
    if offset >= total_size {
        debug!("Fetch offset {} at or past end of source", offset);
        if ring.generation() == generation {
            ring.set_eof();
        }
        return Ok(());
    }

    let body = source.open(offset).await?;
    let mut stream = match body {
        RangeBody::Stream(stream) => stream,
        RangeBody::Unsatisfiable => {
            if ring.generation() == generation {
                ring.set_eof();
            }
            return Ok(());
        }
    };

    let mut received: u64 = 0;
    while let Some(item) = stream.next().await {
        let bytes = item?;
        received += bytes.len() as u64;
        ring.write(&bytes, generation)
            .await
            .map_err(|e| Error::Canceled(e.to_string()))?;
    }

    // Only the current generation may declare the source exhausted.
    if ring.generation() == generation {
        debug!(
            "Fetch complete: {} bytes streamed from offset {}",
            received, offset
        );
        ring.set_eof();
    }
    Ok(())
}
