//! Shared ring buffer between the fetch loop and the decode engine
//!
//! A fixed-capacity byte ring carrying compressed audio:
//! - Starts empty when a stream is initialized
//! - Fills as the fetch loop writes downloaded bytes
//! - Blocks the writer when full (back-pressure on the network path)
//! - Drains as the decode engine reads
//! - Signals end-of-stream once the source is exhausted AND the ring is empty
//!
//! ## Seek generations
//!
//! Network seeks discard in-flight data by advancing a generation counter.
//! A writer passes the generation it observed when its fetch began; a write
//! belonging to a stale generation is refused, so bytes from a superseded
//! fetch can never interleave with the new stream position.
//!
//! ## Thread safety
//!
//! The ring is split into producer and consumer halves at construction.
//! - Producer handle (`prod`) behind a Mutex; `push_slice` needs `&mut self`
//! - Consumer handle (`cons`) behind a Mutex; `pop_slice` needs `&mut self`
//! - Coordination flags (`eof`, `generation`) use Acquire/Release atomics
//! - Counters (`total_written`, `total_read`) use Relaxed ordering
//! - `tokio::sync::Notify` wakes blocked writers/readers without spinning

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Error returned when a write is refused because its generation is stale
#[derive(Debug, Error)]
#[error("Write aborted: generation {write_generation} superseded by {current_generation}")]
pub struct WriteAborted {
    pub write_generation: u64,
    pub current_generation: u64,
}

/// Outcome of a non-blocking read from the ring
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were copied into the caller's buffer
    Data(usize),

    /// Nothing buffered yet; more data may arrive
    Empty,

    /// The source is exhausted and every byte has been consumed
    EndOfStream,
}

/// Byte ring buffer shared between the fetch loop and the decode engine
pub struct StreamRingBuffer {
    /// Producer half (fetch loop writes)
    prod: Mutex<HeapProd<u8>>,

    /// Consumer half (decode engine reads)
    cons: Mutex<HeapCons<u8>>,

    /// Total capacity in bytes (fixed at construction)
    capacity: usize,

    /// Source exhausted flag
    /// Ordering: Release on set, Acquire on read (gates EndOfStream)
    eof: AtomicBool,

    /// Seek generation counter, monotonically increasing
    /// Ordering: Release on advance, Acquire on read (gates stale writes)
    generation: AtomicU64,

    /// Total bytes accepted from writers
    /// Ordering: Relaxed (statistics only)
    total_written: AtomicU64,

    /// Total bytes handed to readers
    /// Ordering: Relaxed (statistics only)
    total_read: AtomicU64,

    /// Wakes writers blocked on a full ring
    space_freed: Notify,

    /// Wakes readers waiting for data or end-of-stream
    data_available: Notify,
}

impl StreamRingBuffer {
    /// Create an empty ring buffer with the given byte capacity
    pub fn new(capacity: usize) -> Self {
        let rb = HeapRb::<u8>::new(capacity);
        let (prod, cons) = rb.split();
        debug!("Created stream ring buffer: capacity {} bytes", capacity);
        Self {
            prod: Mutex::new(prod),
            cons: Mutex::new(cons),
            capacity,
            eof: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            total_written: AtomicU64::new(0),
            total_read: AtomicU64::new(0),
            space_freed: Notify::new(),
            data_available: Notify::new(),
        }
    }

    /// Write bytes, blocking while the ring is full.
    ///
    /// `write_generation` is the generation the writer observed when its
    /// fetch began. The write is refused with `WriteAborted` as soon as the
    /// ring's generation moves past it, including partway through a blocked
    /// write. On success every byte has been accepted.
    pub async fn write(
        &self,
        mut bytes: &[u8],
        write_generation: u64,
    ) -> Result<usize, WriteAborted> {
        let total = bytes.len();
        while !bytes.is_empty() {
            let pushed = {
                let mut prod = self.prod.lock().unwrap();
                // Checked under the producer lock: a concurrent
                // advance-then-reset either refuses this push or clears it,
                // never leaves it behind in the fresh ring.
                let current = self.generation.load(Ordering::Acquire);
                if current != write_generation {
                    trace!(
                        "Refusing stale write: generation {} (current {})",
                        write_generation,
                        current
                    );
                    return Err(WriteAborted {
                        write_generation,
                        current_generation: current,
                    });
                }
                prod.push_slice(bytes)
            };
            if pushed > 0 {
                bytes = &bytes[pushed..];
                self.total_written
                    .fetch_add(pushed as u64, Ordering::Relaxed);
                self.data_available.notify_waiters();
                continue;
            }

            // Ring full. Arm the notification before re-checking occupancy so
            // a concurrent read between the check and the await cannot be
            // missed.
            let notified = self.space_freed.notified();
            if self.free() > 0 || self.generation.load(Ordering::Acquire) != write_generation {
                continue;
            }
            notified.await;
        }
        Ok(total)
    }

    /// Read up to `buf.len()` bytes without blocking.
    ///
    /// `EndOfStream` is only reported once the eof flag is set AND the ring
    /// is empty; buffered bytes are always drained first. The ring is
    /// re-checked after observing eof to close the race with a writer that
    /// pushed its final bytes just before setting the flag.
    pub fn read(&self, buf: &mut [u8]) -> ReadOutcome {
        let mut cons = self.cons.lock().unwrap();
        let popped = cons.pop_slice(buf);
        if popped > 0 {
            self.total_read.fetch_add(popped as u64, Ordering::Relaxed);
            self.space_freed.notify_waiters();
            return ReadOutcome::Data(popped);
        }
        if self.eof.load(Ordering::Acquire) {
            let popped = cons.pop_slice(buf);
            if popped > 0 {
                self.total_read.fetch_add(popped as u64, Ordering::Relaxed);
                self.space_freed.notify_waiters();
                return ReadOutcome::Data(popped);
            }
            return ReadOutcome::EndOfStream;
        }
        ReadOutcome::Empty
    }

    /// Wait until a read would return something other than `Empty`, or the
    /// generation moves past `read_generation`.
    pub async fn wait_readable(&self, read_generation: u64) {
        loop {
            let notified = self.data_available.notified();
            if self.occupied() > 0
                || self.eof.load(Ordering::Acquire)
                || self.generation.load(Ordering::Acquire) != read_generation
            {
                return;
            }
            notified.await;
        }
    }

    /// Mark the source as exhausted. Idempotent.
    pub fn set_eof(&self) {
        if !self.eof.swap(true, Ordering::Release) {
            debug!(
                "Stream ring buffer: end of source ({} bytes written)",
                self.total_written.load(Ordering::Relaxed)
            );
            self.data_available.notify_waiters();
        }
    }

    /// Whether the source has been marked exhausted
    pub fn eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    /// Discard all buffered bytes and clear the eof flag.
    ///
    /// Does not advance the generation; callers performing a network seek
    /// call `advance_generation` first, then `reset`.
    pub fn reset(&self) {
        // Producer lock first: an in-flight write under the old generation
        // fully lands before the clear (and is drained by it) or observes
        // the advanced generation afterwards and is refused.
        let _prod = self.prod.lock().unwrap();
        let drained = {
            let mut cons = self.cons.lock().unwrap();
            cons.clear()
        };
        self.eof.store(false, Ordering::Release);
        self.space_freed.notify_waiters();
        debug!("Stream ring buffer reset: {} bytes discarded", drained);
    }

    /// Advance the seek generation, invalidating in-flight writes.
    ///
    /// Returns the new generation for the replacement fetch to write under.
    pub fn advance_generation(&self) -> u64 {
        let next = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        // Wake a writer blocked on a full ring so it observes the stale
        // generation and aborts; wake readers parked on the old generation.
        self.space_freed.notify_waiters();
        self.data_available.notify_waiters();
        trace!("Stream ring buffer generation advanced to {}", next);
        next
    }

    /// Current seek generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Bytes currently buffered
    pub fn occupied(&self) -> usize {
        self.cons.lock().unwrap().occupied_len()
    }

    /// Bytes of free space
    pub fn free(&self) -> usize {
        self.prod.lock().unwrap().vacant_len()
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total bytes accepted from writers since construction
    pub fn total_written(&self) -> u64 {
        self.total_written.load(Ordering::Relaxed)
    }

    /// Total bytes handed to readers since construction
    pub fn total_read(&self) -> u64 {
        self.total_read.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StreamRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRingBuffer")
            .field("capacity", &self.capacity)
            .field("occupied", &self.occupied())
            .field("eof", &self.eof())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let ring = StreamRingBuffer::new(64);
        let generation = ring.generation();

        ring.write(b"hello world", generation).await.unwrap();

        let mut buf = [0u8; 64];
        match ring.read(&mut buf) {
            ReadOutcome::Data(n) => assert_eq!(&buf[..n], b"hello world"),
            other => panic!("expected data, got {other:?}"),
        }
        assert_eq!(ring.total_written(), 11);
        assert_eq!(ring.total_read(), 11);
    }

    #[tokio::test]
    async fn test_wraparound() {
        let ring = StreamRingBuffer::new(8);
        let generation = ring.generation();
        let mut buf = [0u8; 8];

        // Fill, drain half, fill again so the write wraps the ring.
        ring.write(b"abcdefgh", generation).await.unwrap();
        assert_eq!(ring.read(&mut buf[..4]), ReadOutcome::Data(4));
        ring.write(b"ijkl", generation).await.unwrap();

        assert_eq!(ring.read(&mut buf), ReadOutcome::Data(8));
        assert_eq!(&buf, b"efghijkl");
    }

    #[tokio::test]
    async fn test_empty_vs_end_of_stream() {
        let ring = StreamRingBuffer::new(16);
        let generation = ring.generation();
        let mut buf = [0u8; 16];

        assert_eq!(ring.read(&mut buf), ReadOutcome::Empty);

        ring.write(b"tail", generation).await.unwrap();
        ring.set_eof();

        // Buffered bytes drain before EndOfStream is reported.
        assert_eq!(ring.read(&mut buf), ReadOutcome::Data(4));
        assert_eq!(ring.read(&mut buf), ReadOutcome::EndOfStream);
        assert_eq!(ring.read(&mut buf), ReadOutcome::EndOfStream);
    }

    #[tokio::test]
    async fn test_write_blocks_until_read_frees_space() {
        let ring = Arc::new(StreamRingBuffer::new(4));
        let generation = ring.generation();
        ring.write(b"full", generation).await.unwrap();

        let writer = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move { ring.write(b"more", generation).await })
        };

        // The writer cannot finish while the ring is full.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        let mut buf = [0u8; 4];
        assert_eq!(ring.read(&mut buf), ReadOutcome::Data(4));
        assert_eq!(&buf, b"full");

        writer.await.unwrap().unwrap();
        assert_eq!(ring.read(&mut buf), ReadOutcome::Data(4));
        assert_eq!(&buf, b"more");
    }

    #[tokio::test]
    async fn test_stale_generation_write_refused() {
        let ring = StreamRingBuffer::new(16);
        let stale = ring.generation();
        let fresh = ring.advance_generation();
        assert_eq!(fresh, stale + 1);

        let err = ring.write(b"old data", stale).await.unwrap_err();
        assert_eq!(err.write_generation, stale);
        assert_eq!(err.current_generation, fresh);

        // The new generation writes normally.
        ring.write(b"new data", fresh).await.unwrap();
        assert_eq!(ring.occupied(), 8);
    }

    #[tokio::test]
    async fn test_generation_advance_unblocks_stale_writer() {
        let ring = Arc::new(StreamRingBuffer::new(4));
        let generation = ring.generation();
        ring.write(b"full", generation).await.unwrap();

        let writer = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move { ring.write(b"late", generation).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        ring.advance_generation();
        assert!(writer.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_advance_then_reset_leaves_no_stale_bytes() {
        let ring = Arc::new(StreamRingBuffer::new(4));
        let generation = ring.generation();
        ring.write(b"full", generation).await.unwrap();

        // Writer parked on a full ring while a network seek supersedes it.
        let writer = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move { ring.write(b"late", generation).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        ring.advance_generation();
        ring.reset();

        assert!(writer.await.unwrap().is_err());
        assert_eq!(ring.occupied(), 0);
    }

    #[tokio::test]
    async fn test_reset_discards_data_and_clears_eof() {
        let ring = StreamRingBuffer::new(16);
        let generation = ring.generation();
        ring.write(b"stale bytes", generation).await.unwrap();
        ring.set_eof();

        ring.reset();

        let mut buf = [0u8; 16];
        assert_eq!(ring.occupied(), 0);
        assert!(!ring.eof());
        assert_eq!(ring.read(&mut buf), ReadOutcome::Empty);
        // Generation is untouched by reset.
        assert_eq!(ring.generation(), generation);
    }

    #[tokio::test]
    async fn test_wait_readable_wakes_on_data() {
        let ring = Arc::new(StreamRingBuffer::new(16));
        let generation = ring.generation();

        let waiter = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move { ring.wait_readable(generation).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        ring.write(b"x", generation).await.unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_readable_wakes_on_eof() {
        let ring = Arc::new(StreamRingBuffer::new(16));
        let generation = ring.generation();

        let waiter = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move { ring.wait_readable(generation).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        ring.set_eof();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_readable_wakes_on_generation_change() {
        let ring = Arc::new(StreamRingBuffer::new(16));
        let generation = ring.generation();

        let waiter = {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move { ring.wait_readable(generation).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // No data, no eof: the seek alone must wake the parked reader.
        ring.advance_generation();
        waiter.await.unwrap();
        assert_eq!(ring.occupied(), 0);
    }
}
