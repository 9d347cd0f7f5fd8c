//! Error taxonomy for the caching engine.
//!
//! Each module boundary gets its own `thiserror` enum (mirroring the
//! teacher's `utils/errors.rs::AppError`); call chains inside a module use
//! `anyhow::Result` with `.context(...)` added at each hop.

use thiserror::Error;

/// Errors raised while resolving or fetching a single [`crate::download::task::DownloadTask`].
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// The signed URL's `X-Amz-Expires` deadline (minus grace) has passed.
    #[error("signed URL expired for {0}")]
    UrlExpired(String),

    /// A retryable failure: non-2xx/206 status, socket error, or timeout.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// Retries exhausted; the task is permanently failed.
    #[error("permanent network failure: {0}")]
    Permanent(String),
}

/// Errors raised by [`crate::store::content_store::ContentStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("invalid store key: {0}")]
    InvalidKey(String),

    #[error(
        "chunk geometry mismatch for {key}: existing chunk_size={existing_chunk_size} num_chunks={existing_num_chunks}, got chunk_size={got_chunk_size} num_chunks={got_num_chunks}"
    )]
    GeometryMismatch {
        key: String,
        existing_chunk_size: u64,
        existing_num_chunks: u64,
        got_chunk_size: u64,
        got_num_chunks: u64,
    },

    #[error("chunk {index} not yet present for {key}")]
    ChunkMissing { key: String, index: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised at the proxy/store HTTP boundary, independent of transport.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Missing cms parameter")]
    MissingCms,

    #[error("Missing cms or url parameter")]
    MissingCmsOrUrl,

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Top-level error used by the CLI binary and integration tests.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
