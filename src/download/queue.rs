//! Flat priority queue of [`DownloadTask`]s, run as a single-task actor —
//! the same shape as the teacher's `cache/file_cache.rs::FileCache` /
//! `FileCacheHandle`: one `tokio::spawn`'d loop owns all mutable scheduler
//! state, driven entirely by an `mpsc` command channel, so every mutation
//! is serialized without a scheduler-wide mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::QueueConfig;
use crate::models::{FileInfo, StoreKey};
use crate::store::ContentStore;

use super::file_download::FileDownload;
use super::task::{DownloadTask, Priority};

/// One slot in the flat queue: either a schedulable task, or a barrier that
/// blocks everything after it until every task before it has finished
/// running (used by `LayoutTaskBuilder` to separate "first bytes of every
/// file" from "the bulk of the remaining chunks").
#[derive(Debug, Clone)]
pub enum QueueItem {
    Task(DownloadTask),
    Barrier,
}

enum QueueCommand {
    EnqueueOrderedTasks {
        items: Vec<QueueItem>,
        file_downloads: Vec<(StoreKey, Arc<FileDownload>)>,
    },
    EnqueueTasks {
        tasks: Vec<DownloadTask>,
    },
    EnqueueFile {
        file_info: FileInfo,
        reply: oneshot::Sender<Arc<FileDownload>>,
    },
    Prioritize {
        key: StoreKey,
        priority: Priority,
        reply: oneshot::Sender<()>,
    },
    UrgentChunk {
        key: StoreKey,
        index: u64,
        reply: oneshot::Sender<bool>,
    },
    TaskFinished {
        task: DownloadTask,
        result: TaskResult,
    },
    Contains {
        key: StoreKey,
        reply: oneshot::Sender<bool>,
    },
    Pause,
    Resume,
    Clear,
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
}

pub(crate) enum TaskResult {
    Ok(u64),
    Expired,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub active_files: usize,
}

/// Cheaply cloneable handle to a running [`DownloadQueue`] actor.
#[derive(Clone)]
pub struct DownloadQueueHandle {
    tx: mpsc::UnboundedSender<QueueCommand>,
}

impl DownloadQueueHandle {
    pub fn enqueue_ordered_tasks(
        &self,
        items: Vec<QueueItem>,
        file_downloads: Vec<(StoreKey, Arc<FileDownload>)>,
    ) {
        let _ = self.tx.send(QueueCommand::EnqueueOrderedTasks {
            items,
            file_downloads,
        });
    }

    pub fn enqueue_tasks(&self, tasks: Vec<DownloadTask>) {
        let _ = self.tx.send(QueueCommand::EnqueueTasks { tasks });
    }

    /// Enqueues a single manifest entry for download at `Priority::Normal`,
    /// running its `prepare()` HEAD probe and chunk-geometry decision on the
    /// queue actor's own `client`/`config`. Idempotent: calling this twice
    /// for the same `(type, id)` while the first call is still in flight or
    /// cached returns the same [`FileDownload`] both times.
    pub async fn enqueue(&self, file_info: FileInfo) -> Arc<FileDownload> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(QueueCommand::EnqueueFile { file_info, reply });
        rx.await.expect("download queue actor dropped before replying")
    }

    pub async fn prioritize(&self, key: StoreKey, priority: Priority) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(QueueCommand::Prioritize { key, priority, reply })
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Promotes a single chunk to [`Priority::Urgent`] and bumps it to the
    /// front of its priority band. Returns `false` if no matching queued
    /// task was found (it may already be running or complete).
    pub async fn urgent_chunk(&self, key: StoreKey, index: u64) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(QueueCommand::UrgentChunk { key, index, reply })
            .is_ok()
        {
            rx.await.unwrap_or(false)
        } else {
            false
        }
    }

    pub async fn contains(&self, key: StoreKey) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(QueueCommand::Contains { key, reply }).is_ok() {
            rx.await.unwrap_or(false)
        } else {
            false
        }
    }

    pub fn pause(&self) {
        let _ = self.tx.send(QueueCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(QueueCommand::Resume);
    }

    pub fn clear(&self) {
        let _ = self.tx.send(QueueCommand::Clear);
    }

    pub async fn stats(&self) -> QueueStats {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(QueueCommand::Stats { reply }).is_ok() {
            rx.await.unwrap_or_default()
        } else {
            QueueStats::default()
        }
    }

    fn report_finished(&self, task: DownloadTask, result: TaskResult) {
        let _ = self.tx.send(QueueCommand::TaskFinished { task, result });
    }
}

struct RunningTask {
    task_id: uuid::Uuid,
    priority: Priority,
    store_key: StoreKey,
}

pub struct DownloadQueue {
    rx: mpsc::UnboundedReceiver<QueueCommand>,
    self_handle: DownloadQueueHandle,
    client: Client,
    store: Arc<ContentStore>,
    config: QueueConfig,
    local_host: String,
    cms_origin: Url,

    queue: VecDeque<QueueItem>,
    active: HashMap<StoreKey, Arc<FileDownload>>,
    running: HashMap<uuid::Uuid, RunningTask>,
    paused: bool,
}

impl DownloadQueue {
    pub fn spawn(
        client: Client,
        store: Arc<ContentStore>,
        config: QueueConfig,
        local_host: String,
        cms_origin: Url,
    ) -> DownloadQueueHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DownloadQueueHandle { tx };
        let actor = DownloadQueue {
            rx,
            self_handle: handle.clone(),
            client,
            store,
            config,
            local_host,
            cms_origin,
            queue: VecDeque::new(),
            active: HashMap::new(),
            running: HashMap::new(),
            paused: false,
        };
        tokio::spawn(actor.run());
        handle
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            self.handle_command(cmd).await;
            self.process_queue();
        }
    }

    async fn handle_command(&mut self, cmd: QueueCommand) {
        match cmd {
            QueueCommand::EnqueueOrderedTasks {
                items,
                file_downloads,
            } => {
                for (key, fd) in file_downloads {
                    self.active.insert(key, fd);
                }
                self.queue.extend(items);
            }
            QueueCommand::EnqueueTasks { tasks } => {
                self.queue.extend(tasks.into_iter().map(QueueItem::Task));
            }
            QueueCommand::EnqueueFile { file_info, reply } => {
                self.enqueue_file(file_info, reply);
            }
            QueueCommand::Prioritize { key, priority, reply } => {
                for item in self.queue.iter_mut() {
                    if let QueueItem::Task(task) = item {
                        if task.store_key == key {
                            task.priority = priority;
                        }
                    }
                }
                let _ = reply.send(());
            }
            QueueCommand::UrgentChunk { key, index, reply } => {
                let found = self.queue.iter().position(|item| match item {
                    QueueItem::Task(task) => {
                        task.store_key == key && task.chunk.map(|g| g.index) == Some(index)
                    }
                    QueueItem::Barrier => false,
                });
                if let Some(pos) = found {
                    if let Some(QueueItem::Task(mut task)) = self.queue.remove(pos) {
                        task.priority = Priority::Urgent;
                        self.queue.push_front(QueueItem::Task(task));
                    }
                    let _ = reply.send(true);
                } else {
                    let _ = reply.send(false);
                }
            }
            QueueCommand::Contains { key, reply } => {
                let _ = reply.send(self.active.contains_key(&key));
            }
            QueueCommand::Pause => self.paused = true,
            QueueCommand::Resume => self.paused = false,
            QueueCommand::Clear => {
                self.queue.clear();
            }
            QueueCommand::Stats { reply } => {
                let queued = self
                    .queue
                    .iter()
                    .filter(|i| matches!(i, QueueItem::Task(_)))
                    .count();
                let _ = reply.send(QueueStats {
                    queued,
                    running: self.running.len(),
                    active_files: self.active.len(),
                });
            }
            QueueCommand::TaskFinished { task, result } => {
                self.on_task_finished(task, result).await;
            }
        }
    }

    /// Dedups against `active` by store key, then kicks off `prepare()` on a
    /// spawned task so the actor loop itself never blocks on a HEAD request.
    fn enqueue_file(&mut self, file_info: FileInfo, reply: oneshot::Sender<Arc<FileDownload>>) {
        let store_key = file_info.store_key();
        if let Some(existing) = self.active.get(&store_key) {
            let _ = reply.send(existing.clone());
            return;
        }

        let (fd, _rx) = FileDownload::new(file_info);
        self.active.insert(store_key.clone(), fd.clone());
        let _ = reply.send(fd.clone());

        let client = self.client.clone();
        let config = self.config.clone();
        let local_host = self.local_host.clone();
        let cms_origin = self.cms_origin.clone();
        let handle = self.self_handle.clone();
        tokio::spawn(async move {
            match fd
                .prepare(&client, &config, &local_host, &cms_origin, Priority::Normal)
                .await
            {
                Ok(tasks) => handle.enqueue_tasks(tasks),
                Err(e) => {
                    warn!(key = %store_key, error = %e, "prepare failed for enqueued file");
                    fd.fail_immediately(e.to_string()).await;
                }
            }
        });
    }

    fn any_urgent_in_flight(&self) -> bool {
        self.running
            .values()
            .any(|r| r.priority == Priority::Urgent)
            || self.queue.iter().any(|item| {
                matches!(item, QueueItem::Task(t) if t.priority == Priority::Urgent)
            })
    }

    /// Starts as many queued tasks as capacity allows. Mirrors the
    /// teacher's `processQueue`: a barrier at the front of the queue blocks
    /// everything behind it until all currently running tasks drain; while
    /// any urgent task is in flight or queued, concurrency drops to
    /// `urgent_concurrency` and only urgent tasks may start.
    fn process_queue(&mut self) {
        if self.paused {
            return;
        }

        loop {
            let urgent_mode = self.any_urgent_in_flight();
            let limit = if urgent_mode {
                self.config.urgent_concurrency
            } else {
                self.config.concurrency
            };
            if self.running.len() >= limit {
                return;
            }

            match self.queue.front() {
                None => return,
                Some(QueueItem::Barrier) => {
                    if self.running.is_empty() {
                        self.queue.pop_front();
                        continue;
                    }
                    return;
                }
                Some(_) => {}
            }

            let Some(pos) = self.find_startable_task(urgent_mode) else {
                return;
            };
            let Some(QueueItem::Task(task)) = self.queue.remove(pos) else {
                unreachable!("find_startable_task only returns Task positions")
            };
            self.start_task(task);
        }
    }

    /// Scans the queue from the front for the first task that satisfies
    /// both the urgent-mode gate and the per-file concurrency cap, without
    /// crossing a barrier (a barrier still blocks scan-ahead, not just the
    /// front slot).
    fn find_startable_task(&self, urgent_mode: bool) -> Option<usize> {
        for (pos, item) in self.queue.iter().enumerate() {
            match item {
                QueueItem::Barrier => return None,
                QueueItem::Task(task) => {
                    if urgent_mode && task.priority != Priority::Urgent {
                        continue;
                    }
                    let under_file_cap = self
                        .active
                        .get(&task.store_key)
                        .map(|fd| {
                            fd.running_count.load(std::sync::atomic::Ordering::SeqCst)
                                < self.config.max_chunks_per_file
                        })
                        .unwrap_or(true);
                    if under_file_cap {
                        return Some(pos);
                    }
                }
            }
        }
        None
    }

    fn start_task(&mut self, task: DownloadTask) {
        if let Some(fd) = self.active.get(&task.store_key) {
            fd.running_count
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        let client = self.client.clone();
        let store = self.store.clone();
        let config = self.config.clone();
        let local_host = self.local_host.clone();
        let cms_origin = self.cms_origin.clone();
        let handle = self.self_handle.clone();
        let task_for_spawn = task.clone();

        tokio::spawn(async move {
            let result = task_for_spawn
                .execute_with_retry(&client, &store, &config, &local_host, &cms_origin)
                .await;
            let outcome = match result {
                Ok(bytes) => TaskResult::Ok(bytes),
                Err(crate::error::TaskError::UrlExpired(_)) => TaskResult::Expired,
                Err(e) => TaskResult::Failed(e.to_string()),
            };
            handle.report_finished(task_for_spawn, outcome);
        });

        self.running.insert(
            task.id,
            RunningTask {
                task_id: task.id,
                priority: task.priority,
                store_key: task.store_key,
            },
        );
    }

    async fn on_task_finished(&mut self, task: DownloadTask, result: TaskResult) {
        self.running.remove(&task.id);

        if let Some(fd) = self.active.get(&task.store_key).cloned() {
            fd.running_count
                .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);

            match result {
                TaskResult::Ok(bytes) => {
                    debug!(key = %task.store_key, bytes, "task complete");
                    fd.on_task_complete(bytes).await;
                }
                TaskResult::Expired => {
                    warn!(key = %task.store_key, "task url expired");
                    fd.on_task_url_expired().await;
                }
                TaskResult::Failed(reason) => {
                    if task.is_get_data {
                        self.maybe_reenqueue_get_data(task, reason, fd).await;
                    } else {
                        warn!(key = %task.store_key, %reason, "task failed permanently");
                        fd.on_task_failed(reason).await;
                    }
                }
            }
        }
    }

    async fn maybe_reenqueue_get_data(
        &self,
        mut task: DownloadTask,
        reason: String,
        fd: Arc<FileDownload>,
    ) {
        if task.reenqueue_count >= self.config.get_data_max_reenqueues {
            warn!(
                key = %task.store_key,
                %reason,
                attempts = task.reenqueue_count,
                "get-data task exhausted its re-enqueue budget"
            );
            fd.on_task_failed(reason).await;
            return;
        }

        task.reenqueue_count += 1;
        let attempt = task.reenqueue_count;
        let handle = self.self_handle.clone();
        let delay = self.config.get_data_reenqueue_delay;
        info!(key = %task.store_key, %reason, delay_ms = delay.as_millis(), attempt, "re-enqueuing get-data task");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.enqueue_tasks(vec![task]);
        });
        // fd stays pending until the re-enqueued task resolves
    }
}
