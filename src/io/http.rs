use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::RangeSource;
use anyhow::{Result, anyhow, bail};

/// Remote object served over HTTP with Range request support
pub struct HttpRangeSource {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeSource {
    /// Create a new HTTP range source
    ///
    /// This will send a HEAD request to verify Range support and get file size
    pub async fn new(url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let resp = client.head(&url).send().await?;

        if !resp.status().is_success() {
            bail!("HTTP request failed with status: {}", resp.status());
        }

        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");

        if !accept_ranges.contains("bytes") {
            bail!("Remote server does not support Range requests");
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| anyhow!("Remote server did not return Content-Length"))?;

        tracing::debug!(%url, size, "remote archive supports range requests");

        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            max_retry: 10,
        })
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn fetch_range(&self, start: u64, end: u64) -> Result<Bytes> {
        if end < start || end >= self.size {
            bail!("range {}-{} outside object of {} bytes", start, end, self.size);
        }

        let expected_size = (end - start + 1) as usize;
        let mut body = Vec::with_capacity(expected_size);
        let mut retry_count = 0;

        // Servers may answer with fewer bytes than asked for; keep requesting the tail.
        while body.len() < expected_size {
            let current_start = start + body.len() as u64;
            let range = format!("bytes={}-{}", current_start, end);

            let result = self
                .client
                .get(&self.url)
                .header("Range", &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        bail!("HTTP request failed with status: {}", resp.status());
                    }

                    let bytes = resp.bytes().await?;
                    if bytes.is_empty() {
                        bail!("Empty response for range {}", range);
                    }
                    let chunk_len = bytes.len().min(expected_size - body.len());
                    body.extend_from_slice(&bytes[..chunk_len]);

                    self.transferred_bytes
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        bail!("Max retries exceeded for range {}: {}", range, e);
                    }
                    tracing::warn!(
                        retry = retry_count,
                        max = self.max_retry,
                        error = %e,
                        "connection error, retrying range request"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(
            start,
            end,
            transferred = self.transferred_bytes(),
            "range fetched"
        );
        Ok(Bytes::from(body))
    }
}
