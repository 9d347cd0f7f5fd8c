//! A single HTTP fetch unit: one whole file, or one chunk of a chunked file.
//!
//! Grounded on the teacher's `cache/chunk_downloader.rs::ChunkDownloader`:
//! retry loop with exponential-ish backoff, `Range` header construction, and
//! disk-full classification on the write side.

use std::cmp::Ordering;

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::TaskError;
use crate::models::StoreKey;
use crate::store::ContentStore;
use crate::url_utils::{self, rewrite_for_proxy};

/// Relative scheduling weight. Higher variants preempt lower ones in
/// [`crate::download::queue::DownloadQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Normal = 0,
    Layout = 1,
    High = 2,
    Urgent = 3,
}

/// One unit of work the queue can run: a whole-file fetch, or a single
/// numbered chunk of a chunked file.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: Uuid,
    pub store_key: StoreKey,
    /// Resolved against `cms_origin` at fetch time; may be a signed URL.
    pub url: String,
    pub content_type_hint: Option<String>,
    pub md5: Option<String>,
    pub priority: Priority,
    pub is_get_data: bool,
    /// `Some((index, chunk_size, num_chunks))` for a chunk task, `None` for
    /// a whole-file task.
    pub chunk: Option<ChunkGeometry>,
    /// Number of times this get-data task has already been re-enqueued after
    /// a failure, capped by `QueueConfig::get_data_max_reenqueues`.
    pub reenqueue_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGeometry {
    pub index: u64,
    pub chunk_size: u64,
    pub num_chunks: u64,
    pub total_size: u64,
}

impl DownloadTask {
    pub fn new_whole(
        store_key: StoreKey,
        url: String,
        content_type_hint: Option<String>,
        md5: Option<String>,
        priority: Priority,
        is_get_data: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            store_key,
            url,
            content_type_hint,
            md5,
            priority,
            is_get_data,
            chunk: None,
            reenqueue_count: 0,
        }
    }

    pub fn new_chunk(
        store_key: StoreKey,
        url: String,
        content_type_hint: Option<String>,
        priority: Priority,
        geometry: ChunkGeometry,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            store_key,
            url,
            content_type_hint,
            md5: None,
            priority,
            is_get_data: false,
            chunk: Some(geometry),
            reenqueue_count: 0,
        }
    }

    fn byte_range(&self) -> Option<(u64, u64)> {
        self.chunk.map(|g| {
            let start = g.index * g.chunk_size;
            let end = (start + g.chunk_size - 1).min(g.total_size.saturating_sub(1));
            (start, end)
        })
    }

    /// Runs the fetch-and-store cycle with retries, per the get-data vs.
    /// ordinary-media delay tables in [`QueueConfig`].
    pub async fn execute_with_retry(
        &self,
        client: &Client,
        store: &ContentStore,
        config: &QueueConfig,
        local_host: &str,
        cms_origin: &Url,
    ) -> Result<u64, TaskError> {
        let delays = if self.is_get_data {
            &config.get_data_retry_delays
        } else {
            &config.retry_delays
        };

        let attempts = delays.len().max(1);
        let mut last_err = TaskError::Permanent("no attempts made".to_string());
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = delays[attempt - 1];
                debug!(task_id = %self.id, attempt, delay_ms = delay.as_millis(), "retrying download task");
                tokio::time::sleep(delay).await;
            }

            match self.execute_once(client, store, config, local_host, cms_origin).await {
                Ok(bytes) => return Ok(bytes),
                Err(TaskError::UrlExpired(msg)) => return Err(TaskError::UrlExpired(msg)),
                Err(e) => {
                    warn!(task_id = %self.id, attempt, error = %e, "download attempt failed");
                    last_err = e;
                }
            }
        }

        Err(TaskError::Permanent(last_err.to_string()))
    }

    async fn execute_once(
        &self,
        client: &Client,
        store: &ContentStore,
        config: &QueueConfig,
        local_host: &str,
        cms_origin: &Url,
    ) -> Result<u64, TaskError> {
        let origin_url = Url::parse(&self.url)
            .map_err(|e| TaskError::Permanent(format!("invalid task url: {e}")))?;

        if url_utils::is_expired(&origin_url, chrono::Utc::now(), config.url_expiry_grace) {
            return Err(TaskError::UrlExpired(self.url.clone()));
        }

        let fetch_url = rewrite_for_proxy(&origin_url, local_host, cms_origin);

        let mut req = client.get(fetch_url).timeout(config.fetch_timeout);
        if let Some((start, end)) = self.byte_range() {
            req = req.header(reqwest::header::RANGE, format!("bytes={start}-{end}"));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TaskError::Transient(e.to_string()))?;

        let status = resp.status();
        if !(status.is_success() || status.as_u16() == 206) {
            return Err(TaskError::Transient(format!("unexpected status {status}")));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .or_else(|| self.content_type_hint.clone())
            .unwrap_or_else(|| url_utils::infer_content_type(&self.url).to_string());

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TaskError::Transient(e.to_string()))?;
        let len = bytes.len() as u64;

        match self.chunk {
            Some(geometry) => {
                store
                    .init_chunked(
                        &self.store_key,
                        geometry.total_size,
                        geometry.chunk_size,
                        geometry.num_chunks,
                        &content_type,
                        self.md5.clone(),
                    )
                    .await
                    .map_err(|e| TaskError::Transient(e.to_string()))?;
                store
                    .put_chunk(&self.store_key, geometry.index, &bytes)
                    .await
                    .map_err(|e| TaskError::Transient(e.to_string()))?;
            }
            None => {
                store
                    .put(&self.store_key, &bytes, &content_type, self.md5.clone())
                    .await
                    .map_err(|e| TaskError::Transient(e.to_string()))?;
            }
        }

        Ok(len)
    }
}

// Max-heap ordering: higher `Priority` first, then older `id`-independent
// FIFO is not tracked on the task itself — the queue preserves insertion
// order for equal priorities via a plain `VecDeque` rather than a heap, so
// no `Ord`/`PartialOrd` derivation beyond `Priority`'s own is required here.
impl PartialOrd for DownloadTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.priority.cmp(&other.priority))
    }
}

impl Eq for DownloadTask {}

impl PartialEq for DownloadTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Ord for DownloadTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority)
    }
}
