pub mod file_download;
pub mod layout_builder;
pub mod queue;
pub mod task;

pub use file_download::{FileDownload, FileDownloadOutcome};
pub use layout_builder::{LayoutTaskBuilder, PrepareGate};
pub use queue::{DownloadQueue, DownloadQueueHandle, QueueItem, QueueStats};
pub use task::{ChunkGeometry, DownloadTask, Priority};
