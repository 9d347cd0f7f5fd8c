//! Per-file orchestrator: turns one [`FileInfo`] into a set of
//! [`DownloadTask`]s (via a HEAD probe), tracks their completion, and
//! resolves to a single outcome once every task has reached a terminal
//! state.
//!
//! Grounded on the teacher's `cache/file_cache.rs` for the "owning handle +
//! shared atomics" shape, generalized from a single cache entry to a file
//! that may be split across many chunk tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use reqwest::Client;
use tokio::sync::{watch, Mutex};
use tracing::debug;
use url::Url;

use crate::config::QueueConfig;
use crate::error::TaskError;
use crate::models::{FileInfo, StoreKey};
use crate::url_utils::{self, rewrite_for_proxy};

use super::task::{ChunkGeometry, DownloadTask, Priority};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDownloadOutcome {
    Complete { url_expired: bool },
    Failed(String),
}

pub struct FileDownload {
    pub file_info: FileInfo,
    pub store_key: StoreKey,
    total_bytes: AtomicU64,
    downloaded_bytes: AtomicU64,
    total_tasks: AtomicUsize,
    remaining_tasks: AtomicUsize,
    /// Tasks currently executing for this file, gated against
    /// `QueueConfig::max_chunks_per_file` by the queue actor.
    pub running_count: AtomicUsize,
    saw_url_expired: std::sync::atomic::AtomicBool,
    failure: Mutex<Option<String>>,
    outcome_tx: watch::Sender<Option<FileDownloadOutcome>>,
}

impl FileDownload {
    pub fn new(file_info: FileInfo) -> (Arc<Self>, watch::Receiver<Option<FileDownloadOutcome>>) {
        let (tx, rx) = watch::channel(None);
        let store_key = file_info.store_key();
        let this = Arc::new(Self {
            file_info,
            store_key,
            total_bytes: AtomicU64::new(0),
            downloaded_bytes: AtomicU64::new(0),
            total_tasks: AtomicUsize::new(0),
            remaining_tasks: AtomicUsize::new(0),
            running_count: AtomicUsize::new(0),
            saw_url_expired: std::sync::atomic::AtomicBool::new(false),
            failure: Mutex::new(None),
            outcome_tx: tx,
        });
        (this, rx)
    }

    /// Issues a HEAD request to learn the file's real size and content
    /// type, decides chunk geometry per §4.4 (>100MiB ⇒ 50MiB chunks), and
    /// returns the ordered list of tasks a caller should enqueue.
    pub async fn prepare(
        &self,
        client: &Client,
        config: &QueueConfig,
        local_host: &str,
        cms_origin: &Url,
        priority: Priority,
    ) -> Result<Vec<DownloadTask>, TaskError> {
        let origin_url = Url::parse(&self.file_info.path)
            .or_else(|_| cms_origin.join(&self.file_info.path))
            .map_err(|e| TaskError::Permanent(format!("invalid manifest path: {e}")))?;
        let fetch_url = rewrite_for_proxy(&origin_url, local_host, cms_origin);

        // A manifest that already declares a positive size is trusted as-is;
        // the HEAD probe only runs to learn what the manifest didn't tell us.
        let (size, content_type) = if let Some(declared) = self.file_info.size.filter(|s| *s > 0) {
            let content_type = Some(url_utils::infer_content_type(&self.file_info.path).to_string());
            (declared, content_type)
        } else {
            let resp = client
                .head(fetch_url.clone())
                .timeout(config.head_timeout)
                .send()
                .await
                .map_err(|e| TaskError::Transient(e.to_string()))?;

            let size = resp
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| TaskError::Permanent("no Content-Length and no manifest size".into()))?;

            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            (size, content_type)
        };

        self.total_bytes.store(size, Ordering::SeqCst);

        let tasks = if size > config.chunk_threshold_bytes {
            self.build_chunk_tasks(fetch_url.to_string(), size, content_type, priority, config)
        } else {
            vec![DownloadTask::new_whole(
                self.store_key.clone(),
                fetch_url.to_string(),
                content_type,
                self.file_info.md5.clone(),
                priority,
                self.file_info.is_get_data,
            )]
        };

        self.total_tasks.store(tasks.len(), Ordering::SeqCst);
        self.remaining_tasks.store(tasks.len(), Ordering::SeqCst);
        debug!(
            key = %self.store_key,
            size,
            tasks = tasks.len(),
            "prepared file for download"
        );
        Ok(tasks)
    }

    /// Chunk 0 and the last chunk get `Priority::High` regardless of the
    /// file's own scheduling tier, since they're what makes a file start
    /// (and finish) showing something — every chunk in between is `Normal`.
    fn build_chunk_tasks(
        &self,
        fetch_url: String,
        size: u64,
        content_type: Option<String>,
        _priority: Priority,
        config: &QueueConfig,
    ) -> Vec<DownloadTask> {
        let chunk_size = config.chunk_size_bytes;
        let num_chunks = size.div_ceil(chunk_size);
        let last_index = num_chunks.saturating_sub(1);

        (0..num_chunks)
            .filter(|index| !self.file_info.skip_chunks.contains(index))
            .map(|index| {
                let priority = if index == 0 || index == last_index {
                    Priority::High
                } else {
                    Priority::Normal
                };
                DownloadTask::new_chunk(
                    self.store_key.clone(),
                    fetch_url.clone(),
                    content_type.clone(),
                    priority,
                    ChunkGeometry {
                        index,
                        chunk_size,
                        num_chunks,
                        total_size: size,
                    },
                )
            })
            .collect()
    }

    pub fn total_tasks(&self) -> usize {
        self.total_tasks.load(Ordering::SeqCst)
    }

    pub async fn on_task_complete(&self, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.task_finished().await;
    }

    pub async fn on_task_url_expired(&self) {
        self.saw_url_expired.store(true, Ordering::SeqCst);
        self.task_finished().await;
    }

    pub async fn on_task_failed(&self, reason: String) {
        let mut failure = self.failure.lock().await;
        if failure.is_none() {
            *failure = Some(reason);
        }
        self.task_finished().await;
    }

    /// Resolves the outcome to `Failed` directly, without going through the
    /// task-counting path — for failures that happen before any task was
    /// ever enqueued (e.g. `prepare()` itself erroring out).
    pub async fn fail_immediately(&self, reason: String) {
        let mut failure = self.failure.lock().await;
        if failure.is_none() {
            *failure = Some(reason.clone());
        }
        let _ = self.outcome_tx.send(Some(FileDownloadOutcome::Failed(reason)));
    }

    async fn task_finished(&self) {
        let remaining = self.remaining_tasks.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            let outcome = if let Some(reason) = self.failure.lock().await.clone() {
                FileDownloadOutcome::Failed(reason)
            } else {
                FileDownloadOutcome::Complete {
                    url_expired: self.saw_url_expired.load(Ordering::SeqCst),
                }
            };
            let _ = self.outcome_tx.send(Some(outcome));
        }
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded_bytes.load(Ordering::SeqCst)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            0.0
        } else {
            self.downloaded_bytes() as f64 / total as f64
        }
    }
}

/// Awaits the final outcome on a receiver handed out by [`FileDownload::new`].
pub async fn wait_for_outcome(
    mut rx: watch::Receiver<Option<FileDownloadOutcome>>,
) -> FileDownloadOutcome {
    loop {
        if let Some(outcome) = rx.borrow().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return FileDownloadOutcome::Failed("download dropped before completion".into());
        }
    }
}
