//! Batches a layout's files into the ordering the queue expects: every
//! file's first bytes land before any file's remaining bulk, so a renderer
//! can start showing *something* for every region as soon as possible
//! rather than waiting for one file to finish completely.
//!
//! Bucketing rule (§4.7): non-chunked files (sorted smallest first) → each
//! chunked file's chunk 0 → each chunked file's last chunk → one barrier →
//! every remaining chunk (sorted by index). A single barrier separates the
//! "critical chunks" batch from the bulk, so the bulk only starts once
//! every critical chunk currently running has finished.

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::debug;
use url::Url;

use crate::config::QueueConfig;
use crate::error::TaskError;
use crate::models::{FileInfo, StoreKey};

use super::file_download::FileDownload;
use super::queue::{DownloadQueueHandle, QueueItem};
use super::task::{DownloadTask, Priority};

/// Shared gate bounding how many `prepare()` HEAD requests run at once,
/// independent of the download concurrency cap — HEAD probes are cheap but
/// unbounded fan-out against a slow CMS would still be rude.
pub struct PrepareGate {
    semaphore: Semaphore,
}

impl PrepareGate {
    pub fn new(max_preparing: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Semaphore::new(max_preparing.max(1)),
        })
    }
}

pub struct LayoutTaskBuilder<'a> {
    queue: &'a DownloadQueueHandle,
    client: Client,
    config: QueueConfig,
    local_host: String,
    cms_origin: Url,
    prepare_gate: Arc<PrepareGate>,
    files: Vec<FileInfo>,
}

struct PreparedFile {
    store_key: StoreKey,
    file_download: Arc<FileDownload>,
    tasks: Vec<DownloadTask>,
}

impl<'a> LayoutTaskBuilder<'a> {
    pub fn new(
        queue: &'a DownloadQueueHandle,
        client: Client,
        config: QueueConfig,
        local_host: String,
        cms_origin: Url,
        prepare_gate: Arc<PrepareGate>,
    ) -> Self {
        Self {
            queue,
            client,
            config,
            local_host,
            cms_origin,
            prepare_gate,
            files: Vec::new(),
        }
    }

    /// Adds a file to this batch, skipping any file already tracked by the
    /// queue (in flight or cached from a previous layout).
    pub async fn add_file(&mut self, file_info: FileInfo) {
        if self.queue.contains(file_info.store_key()).await {
            debug!(key = %file_info.store_key(), "skipping file already tracked by queue");
            return;
        }
        self.files.push(file_info);
    }

    /// Runs HEAD probes for every added file (bounded by the shared
    /// `PrepareGate`), buckets the resulting tasks, and pushes a single
    /// ordered batch — `[non_chunked, chunk0s, chunk_lasts, BARRIER, bulk]`
    /// — onto the queue. Files whose HEAD probe fails are dropped from the
    /// batch and reported to the caller rather than failing the whole
    /// layout.
    pub async fn build(self) -> Result<Vec<StoreKey>, TaskError> {
        let mut prepared = Vec::new();
        let mut failed = Vec::new();

        let futures = self.files.into_iter().map(|file_info| {
            let client = self.client.clone();
            let config = self.config.clone();
            let local_host = self.local_host.clone();
            let cms_origin = self.cms_origin.clone();
            let gate = self.prepare_gate.clone();
            async move {
                let _permit = gate.semaphore.acquire().await.expect("gate not closed");
                let store_key = file_info.store_key();
                let (fd, _rx) = FileDownload::new(file_info);
                let priority = Priority::Layout;
                match fd.prepare(&client, &config, &local_host, &cms_origin, priority).await {
                    Ok(tasks) => Ok(PreparedFile {
                        store_key,
                        file_download: fd,
                        tasks,
                    }),
                    Err(e) => Err((store_key, e)),
                }
            }
        });

        for result in futures::future::join_all(futures).await {
            match result {
                Ok(p) => prepared.push(p),
                Err((key, e)) => {
                    debug!(key = %key, error = %e, "dropping file from layout batch: prepare failed");
                    failed.push(key);
                }
            }
        }

        let mut non_chunked = Vec::new();
        let mut chunk0s = Vec::new();
        let mut chunk_lasts = Vec::new();
        let mut bulk = Vec::new();
        let mut file_downloads = Vec::new();
        let mut prepared_keys = Vec::new();

        for p in prepared {
            prepared_keys.push(p.store_key.clone());
            file_downloads.push((p.store_key.clone(), p.file_download.clone()));

            if p.tasks.len() <= 1 {
                non_chunked.push((p.file_download.total_bytes(), p.tasks.into_iter().next()));
            } else {
                let mut tasks = p.tasks;
                let last = tasks.pop();
                let first = if !tasks.is_empty() { Some(tasks.remove(0)) } else { None };
                if let Some(first) = first {
                    chunk0s.push(first);
                }
                if let Some(last) = last {
                    chunk_lasts.push(last);
                }
                bulk.extend(tasks);
            }
        }

        non_chunked.sort_by_key(|(size, _)| *size);
        bulk.sort_by_key(|t| t.chunk.map(|g| g.index).unwrap_or(0));

        let mut items: Vec<QueueItem> = Vec::new();
        items.extend(
            non_chunked
                .into_iter()
                .filter_map(|(_, task)| task)
                .map(QueueItem::Task),
        );
        items.extend(chunk0s.into_iter().map(QueueItem::Task));
        items.extend(chunk_lasts.into_iter().map(QueueItem::Task));
        if !bulk.is_empty() {
            items.push(QueueItem::Barrier);
            items.extend(bulk.into_iter().map(QueueItem::Task));
        }

        self.queue.enqueue_ordered_tasks(items, file_downloads);

        Ok(prepared_keys)
    }
}
