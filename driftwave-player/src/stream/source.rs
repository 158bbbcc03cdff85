//! Byte sources for streamed playback
//!
//! A `ByteSource` produces the compressed audio stream, openable at any byte
//! offset so network seeks can restart mid-file. The production implementation
//! is `HttpByteSource` using ranged HTTP requests; tests substitute in-memory
//! sources behind the same trait.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tracing::debug;

/// Stream of byte chunks from a source
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Body of an offset-open request
pub enum RangeBody {
    /// The source accepted the offset and will stream from it
    Stream(ByteStream),

    /// The offset is at or past the end of the source
    Unsatisfiable,
}

/// Source of compressed audio bytes, openable at an arbitrary offset
#[async_trait]
pub trait ByteSource: Send + Sync + 'static {
    /// Total size of the source in bytes
    async fn content_length(&self) -> Result<u64>;

    /// Open the source starting at `offset` bytes
    async fn open(&self, offset: u64) -> Result<RangeBody>;
}

/// HTTP byte source using ranged GET requests
pub struct HttpByteSource {
    client: reqwest::Client,
    url: String,
}

impl HttpByteSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ByteSource for HttpByteSource {
    async fn content_length(&self) -> Result<u64> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("HEAD {} failed: {e}", self.url)))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "HEAD {} returned {}",
                self.url,
                response.status()
            )));
        }

        response
            .content_length()
            .ok_or_else(|| Error::Network(format!("{} did not report a content length", self.url)))
    }

    async fn open(&self, offset: u64) -> Result<RangeBody> {
        debug!("Opening {} at byte offset {}", self.url, offset);
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, format!("bytes={offset}-"))
            .send()
            .await
            .map_err(|e| Error::Network(format!("GET {} failed: {e}", self.url)))?;

        let status = response.status();
        if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(RangeBody::Unsatisfiable);
        }
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(Error::Network(format!(
                "GET {} returned {status}",
                self.url
            )));
        }

        let url = self.url.clone();
        let stream = response
            .bytes_stream()
            .map(move |item| item.map_err(|e| Error::Network(format!("reading {url}: {e}"))));
        Ok(RangeBody::Stream(Box::pin(stream)))
    }
}
