//! Binds and serves the combined StoreServer + OriginProxy router, mirroring
//! the teacher's `CacheProxy::start` (bind, log the chosen port, `axum::serve`).

use std::sync::Arc;

use axum::Router;
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::ProxyConfig;
use crate::store::ContentStore;

use super::origin_proxy::{self, ProxyState};
use super::store_server;

pub async fn serve(store: Arc<ContentStore>, config: ProxyConfig) -> std::io::Result<()> {
    let port = config.port;
    let proxy_state = ProxyState {
        client: Client::new(),
        store: store.clone(),
        config: Arc::new(RwLock::new(config)),
    };

    let app = build_router(store, proxy_state);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "kiosk-cache HTTP surface listening");
    axum::serve(listener, app).await
}

pub fn build_router(store: Arc<ContentStore>, proxy_state: ProxyState) -> Router {
    store_server::router(store).merge(origin_proxy::router(proxy_state))
}
