//! Streaming path: byte sources, fetch loop, and the shared ring buffer
//!
//! Compressed audio flows from a `ByteSource` (typically ranged HTTP) through
//! the `FetchCoordinator` into a `StreamRingBuffer` shared with the decode
//! engine. The ring buffer provides back-pressure: the fetch loop blocks when
//! the buffer is full and resumes as the decoder drains it.

pub mod fetch;
pub mod ring_buffer;
pub mod source;
