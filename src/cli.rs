use std::path::PathBuf;

use clap::Parser;

/// Offline media caching and download engine for a digital-signage player.
#[derive(Debug, Parser)]
#[command(name = "kiosk-cache-proxy", about, version, author)]
pub struct Cli {
    /// Root directory the ContentStore writes into.
    #[arg(long, default_value = "./cache-store")]
    pub store_root: PathBuf,

    /// Origin of the remote content server, e.g. https://cms.example.com
    #[arg(long)]
    pub cms_origin: String,

    /// Port this engine's HTTP surface binds to.
    #[arg(short, long, default_value_t = 8765)]
    pub port: u16,

    /// Host:port this engine is reachable at, used to detect URLs already
    /// rewritten to point at this engine.
    #[arg(long)]
    pub local_host: Option<String>,

    /// Global concurrent download task cap.
    #[arg(long, default_value_t = 6)]
    pub concurrency: usize,

    /// Concurrent task cap while any urgent task is in flight.
    #[arg(long, default_value_t = 2)]
    pub urgent_concurrency: usize,
}
