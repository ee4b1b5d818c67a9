mod chunked;
mod http;
mod local;

pub use chunked::{ChunkedRangeReader, DEFAULT_CHUNK_SIZE};
pub use http::HttpRangeSource;
pub use local::LocalFileSource;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A remote object that can only be read through byte-range fetches.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Total size of the object in bytes, known before any read.
    fn size(&self) -> u64;

    /// Fetch the inclusive byte range `[start, end]`.
    async fn fetch_range(&self, start: u64, end: u64) -> Result<Bytes>;
}

/// Where an archive lives.
///
/// The extraction core only ever sees the [`RangeSource`] produced by
/// [`Backend::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local(PathBuf),
    Http(String),
}

impl Backend {
    /// Pick a backend from a user supplied location (path or URL).
    pub fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Backend::Http(location.to_string())
        } else {
            Backend::Local(PathBuf::from(location))
        }
    }

    pub async fn open(&self) -> Result<Arc<dyn RangeSource>> {
        let source: Arc<dyn RangeSource> = match self {
            Backend::Local(path) => Arc::new(LocalFileSource::new(path)?),
            Backend::Http(url) => Arc::new(HttpRangeSource::new(url.clone()).await?),
        };
        Ok(source)
    }
}
