//! Configuration structs for the queue, store and proxy, modeled on the
//! teacher's `cache/config.rs::FileCacheConfig`: every tunable is a named
//! field with a literal default, serde round-trippable to `config.json`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 100 MiB — files at or above this size are split into chunks.
pub const CHUNK_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
/// 50 MiB — chunk size used once a file crosses [`CHUNK_THRESHOLD_BYTES`].
pub const CHUNK_SIZE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Global concurrent task cap when no urgent task is in flight.
    pub concurrency: usize,
    /// Concurrent task cap while any urgent-priority task is running or queued.
    pub urgent_concurrency: usize,
    /// Per-file cap on simultaneously running chunk tasks.
    pub max_chunks_per_file: usize,
    /// Cap on simultaneous `prepare()` (HEAD request) calls, shared with
    /// `LayoutTaskBuilder`.
    pub max_preparing: usize,

    pub head_timeout: Duration,
    pub fetch_timeout: Duration,

    /// Retry delay table for ordinary media/layout/static tasks.
    pub retry_delays: Vec<Duration>,
    /// Retry delay table for widget get-data tasks (longer backoff).
    pub get_data_retry_delays: Vec<Duration>,

    /// Delay before a failed get-data task is re-enqueued as a fresh task.
    pub get_data_reenqueue_delay: Duration,
    /// Maximum number of times a get-data task may be re-enqueued.
    pub get_data_max_reenqueues: u32,

    /// Grace period subtracted from a signed URL's `X-Amz-Expires` deadline
    /// before treating it as expired.
    pub url_expiry_grace: Duration,

    pub chunk_threshold_bytes: u64,
    pub chunk_size_bytes: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 6,
            urgent_concurrency: 2,
            max_chunks_per_file: 3,
            max_preparing: 2,
            head_timeout: Duration::from_secs(15),
            fetch_timeout: Duration::from_secs(600),
            retry_delays: vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_millis(1500),
            ],
            get_data_retry_delays: vec![
                Duration::from_secs(15),
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(120),
            ],
            get_data_reenqueue_delay: Duration::from_secs(60),
            get_data_max_reenqueues: 5,
            url_expiry_grace: Duration::from_secs(30),
            chunk_threshold_bytes: CHUNK_THRESHOLD_BYTES,
            chunk_size_bytes: CHUNK_SIZE_BYTES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Origin of the remote content server, e.g. `https://cms.example.com`.
    pub cms_origin: String,
    /// Host:port this engine's own HTTP surface binds and is reachable at,
    /// used to detect "already-local" URLs when rewriting for the proxy.
    pub local_host: String,
    pub port: u16,
    pub display_name: Option<String>,
    pub hardware_key: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cms_origin: String::new(),
            local_host: "127.0.0.1:8765".to_string(),
            port: 8765,
            display_name: None,
            hardware_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_config_defaults_match_spec_literals() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.concurrency, 6);
        assert_eq!(cfg.urgent_concurrency, 2);
        assert_eq!(cfg.max_chunks_per_file, 3);
        assert_eq!(cfg.chunk_threshold_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.chunk_size_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.get_data_max_reenqueues, 5);
        assert_eq!(cfg.url_expiry_grace, Duration::from_secs(30));
    }

    #[test]
    fn proxy_config_round_trips_through_json() {
        let cfg = ProxyConfig {
            cms_origin: "https://cms.example.com".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ProxyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cms_origin, cfg.cms_origin);
        assert_eq!(back.port, cfg.port);
    }
}
