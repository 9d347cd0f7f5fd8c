mod cli;

use std::sync::Arc;

use clap::Parser;
use kiosk_cache::config::ProxyConfig;
use kiosk_cache::store::ContentStore;
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiosk_cache=info")))
        .init();

    let cli = Cli::parse();

    let store = Arc::new(ContentStore::open(&cli.store_root).await?);
    let swept = store.sweep_temp_files().await?;
    if swept > 0 {
        tracing::info!(swept, "removed orphaned temp files from a previous run");
    }

    let config = ProxyConfig {
        cms_origin: cli.cms_origin,
        local_host: cli
            .local_host
            .unwrap_or_else(|| format!("127.0.0.1:{}", cli.port)),
        port: cli.port,
        display_name: None,
        hardware_key: None,
    };

    kiosk_cache::http::serve(store, config).await?;
    Ok(())
}
