//! Random access over a [`RangeSource`] with chunk-level caching.
//!
//! The object is split into fixed-size chunks; chunk `i` covers
//! `[i * chunk_size, min((i + 1) * chunk_size, size))`. A chunk is fetched
//! with a single range request the first time any byte of it is read and is
//! then served from memory for the lifetime of the reader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use super::RangeSource;
use crate::error::{Error, Result};

/// Default chunk size (16 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Chunk-caching random-access reader.
///
/// Safe to share between tasks. Concurrent readers missing the same chunk may
/// each fetch it; the first completed fetch wins the cache slot. Failed
/// fetches are never cached. The cache is never evicted.
pub struct ChunkedRangeReader {
    source: Arc<dyn RangeSource>,
    size: u64,
    chunk_size: u64,
    cache: Mutex<HashMap<u64, Bytes>>,
    fetches: AtomicU64,
}

impl ChunkedRangeReader {
    pub fn new(source: Arc<dyn RangeSource>, chunk_size: u64) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        let size = source.size();
        Self {
            source,
            size,
            chunk_size,
            cache: Mutex::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of range fetches issued against the source so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn cached_chunks(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Read into `buf` starting at `offset`.
    ///
    /// Returns the number of bytes copied. `Ok(0)` for a non-empty buffer
    /// means `offset` is at or past the end of the object.
    pub async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset.checked_add(buf.len() as u64).is_none() {
            return Err(Error::InvalidOffset {
                offset,
                len: buf.len(),
            });
        }
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let mut copied = 0;
        let mut pos = offset;

        while copied < buf.len() && pos < self.size {
            let index = pos / self.chunk_size;
            let chunk = self.chunk(index).await?;

            let in_chunk = (pos - index * self.chunk_size) as usize;
            let n = (buf.len() - copied).min(chunk.len() - in_chunk);
            buf[copied..copied + n].copy_from_slice(&chunk[in_chunk..in_chunk + n]);

            copied += n;
            pos += n as u64;
        }

        Ok(copied)
    }

    /// Fill `buf` completely or fail with [`Error::EndOfData`].
    pub async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(offset, buf).await?;
        if n < buf.len() {
            return Err(Error::EndOfData {
                offset: offset + n as u64,
            });
        }
        Ok(())
    }

    async fn chunk(&self, index: u64) -> Result<Bytes> {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .cloned();
        if let Some(chunk) = cached {
            return Ok(chunk);
        }

        let start = index * self.chunk_size;
        let end = (start + self.chunk_size - 1).min(self.size - 1);

        tracing::debug!(index, start, end, "fetching chunk");
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let data = self
            .source
            .fetch_range(start, end)
            .await
            .map_err(|cause| Error::RangeFetch { start, end, cause })?;

        let expected = (end - start + 1) as usize;
        if data.len() != expected {
            return Err(Error::RangeFetch {
                start,
                end,
                cause: anyhow::anyhow!("expected {} bytes, got {}", expected, data.len()),
            });
        }

        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.entry(index).or_insert(data).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        data: Bytes,
        calls: AtomicUsize,
        fail_first: AtomicUsize,
    }

    impl CountingSource {
        fn new(len: usize) -> Arc<Self> {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            Arc::new(Self {
                data: Bytes::from(data),
                calls: AtomicUsize::new(0),
                fail_first: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RangeSource for CountingSource {
        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        async fn fetch_range(&self, start: u64, end: u64) -> anyhow::Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("connection reset");
            }
            Ok(self.data.slice(start as usize..=end as usize))
        }
    }

    #[tokio::test]
    async fn reads_every_offset_exactly() {
        let source = CountingSource::new(1000);
        let reader = ChunkedRangeReader::new(source.clone(), 64);

        for offset in 0..1000u64 {
            let mut buf = vec![0u8; 100];
            let n = reader.read_at(offset, &mut buf).await.unwrap();
            let expected = &source.data[offset as usize..(offset as usize + 100).min(1000)];
            assert_eq!(&buf[..n], expected, "offset {offset}");
        }

        let mut whole = vec![0u8; 1000];
        reader.read_exact_at(0, &mut whole).await.unwrap();
        assert_eq!(&whole[..], &source.data[..]);
    }

    #[tokio::test]
    async fn cached_chunks_are_not_fetched_again() {
        let source = CountingSource::new(300);
        let reader = ChunkedRangeReader::new(source.clone(), 128);

        let mut buf = [0u8; 10];
        reader.read_at(5, &mut buf).await.unwrap();
        reader.read_at(5, &mut buf).await.unwrap();
        reader.read_at(100, &mut buf).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(reader.fetch_count(), 1);

        // Spans chunk 0 and 1, only chunk 1 is new.
        reader.read_at(120, &mut buf).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(reader.cached_chunks(), 2);
    }

    #[tokio::test]
    async fn final_chunk_is_clipped_to_size() {
        let source = CountingSource::new(300);
        let reader = ChunkedRangeReader::new(source.clone(), 128);

        let mut buf = [0u8; 64];
        let n = reader.read_at(280, &mut buf).await.unwrap();
        assert_eq!(n, 20);
        assert_eq!(&buf[..n], &source.data[280..]);
    }

    #[tokio::test]
    async fn end_of_data() {
        let source = CountingSource::new(50);
        let reader = ChunkedRangeReader::new(source.clone(), 16);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read_at(50, &mut buf).await.unwrap(), 0);
        assert_eq!(reader.read_at(5000, &mut buf).await.unwrap(), 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let err = reader.read_exact_at(46, &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::EndOfData { offset: 50 }));
    }

    #[tokio::test]
    async fn overflowing_offset_is_rejected() {
        let reader = ChunkedRangeReader::new(CountingSource::new(10), 4);
        let mut buf = [0u8; 8];
        let err = reader.read_at(u64::MAX - 2, &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOffset { .. }));
    }

    #[tokio::test]
    async fn failed_fetch_is_retried_on_next_call() {
        let source = CountingSource::new(64);
        source.fail_first.store(1, Ordering::SeqCst);
        let reader = ChunkedRangeReader::new(source.clone(), 32);

        let mut buf = [0u8; 4];
        let err = reader.read_at(0, &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::RangeFetch { start: 0, end: 31, .. }));
        assert_eq!(reader.cached_chunks(), 0);

        assert_eq!(reader.read_at(0, &mut buf).await.unwrap(), 4);
        assert_eq!(&buf, &source.data[..4]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_see_identical_bytes() {
        let source = CountingSource::new(4096);
        let reader = Arc::new(ChunkedRangeReader::new(source.clone(), 256));

        let mut tasks = Vec::new();
        for t in 0..8u64 {
            let reader = reader.clone();
            tasks.push(tokio::spawn(async move {
                let mut out = vec![0u8; 4096];
                let mut pos = t * 7 % 4096;
                for _ in 0..4096 {
                    let mut byte = [0u8; 1];
                    reader.read_exact_at(pos, &mut byte).await.unwrap();
                    out[pos as usize] = byte[0];
                    pos = (pos + 1) % 4096;
                }
                out
            }));
        }
        for task in tasks {
            assert_eq!(&task.await.unwrap()[..], &source.data[..]);
        }
        assert_eq!(reader.cached_chunks(), 16);
    }
}
