//! Offline media caching and download engine for a digital-signage player.
//!
//! Six cooperating components: [`store::ContentStore`] (filesystem layout),
//! [`http::store_server`] + [`http::origin_proxy`] (the HTTP surface),
//! [`download::task`] / [`download::file_download`] (per-file orchestration),
//! [`download::queue`] (the flat priority scheduler), and
//! [`download::layout_builder`] (critical-chunk-first batching).

pub mod config;
pub mod download;
pub mod error;
pub mod http;
pub mod models;
pub mod store;
pub mod url_utils;


pub use config::{ProxyConfig, QueueConfig, StoreConfig};
pub use error::AppError;
