//! Relays caller HTTP to the remote content server and tees bytes into the
//! store, for clients that cannot fetch the CMS directly (CORS, or a
//! renderer that only ever talks to this engine's local host).
//!
//! Grounded on the teacher's `cache/proxy.rs::CacheProxy`: one shared
//! `reqwest::Client`, hop-by-hop header stripping centralized in a single
//! helper reused by every relay endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::warn;
use url::Url;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::models::{ContentType, StoreKey};
use crate::store::ContentStore;

#[derive(Clone)]
pub struct ProxyState {
    pub client: Client,
    pub store: Arc<ContentStore>,
    pub config: Arc<RwLock<ProxyConfig>>,
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/file-proxy", any(file_proxy))
        .route("/xmds-proxy", any(xmds_proxy))
        .route("/rest-proxy", any(rest_proxy))
        .route("/config", post(update_config))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Headers that must never be blindly forwarded between hops, per RFC 7230
/// §6.1 plus the content-framing headers reqwest recomputes itself.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-encoding"
            | "content-length"
            | "host"
    )
}

#[derive(Deserialize)]
struct FileProxyParams {
    cms: Option<String>,
    url: Option<String>,
    store_key: Option<String>,
    /// When these three are present, the response is teed into the store as
    /// one chunk of a chunked entry rather than a whole file.
    chunk_index: Option<u64>,
    num_chunks: Option<u64>,
    chunk_size: Option<u64>,
}

async fn file_proxy(
    State(state): State<ProxyState>,
    Query(params): Query<FileProxyParams>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(cms) = params.cms.as_deref() else {
        return (StatusCode::BAD_REQUEST, ProxyError::MissingCmsOrUrl.to_string()).into_response();
    };
    let Some(path) = params.url.as_deref() else {
        return (StatusCode::BAD_REQUEST, ProxyError::MissingCmsOrUrl.to_string()).into_response();
    };

    let Ok(base) = Url::parse(cms) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Ok(target) = base.join(path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let resp = match relay(&state.client, &method, target, &headers, body).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "file-proxy upstream request failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let content_range = resp
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let mut out_headers = HeaderMap::new();
    for (name, value) in resp.headers() {
        if !is_hop_by_hop(name) {
            out_headers.insert(name.clone(), value.clone());
        }
    }

    let bytes = match resp.bytes().await {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "file-proxy failed reading upstream body");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    if status.is_success() || status.as_u16() == 206 {
        if let Some(raw_key) = params.store_key.as_deref() {
            if let Ok(key) = StoreKey::parse(raw_key) {
                tee_file_proxy_response(
                    &state.store,
                    &key,
                    &params,
                    &content_type,
                    content_range.as_deref(),
                    &bytes,
                )
                .await;
            }
        }
    }

    (status, out_headers, bytes).into_response()
}

/// Writes the relayed response into the store: a single chunk when the
/// caller supplied chunk geometry, otherwise the whole file.
async fn tee_file_proxy_response(
    store: &ContentStore,
    key: &StoreKey,
    params: &FileProxyParams,
    content_type: &str,
    content_range: Option<&str>,
    bytes: &Bytes,
) {
    match (params.chunk_index, params.num_chunks, params.chunk_size) {
        (Some(index), Some(num_chunks), Some(chunk_size)) => {
            let Some(total_size) =
                total_size_from_content_range(content_range, bytes.len() as u64, chunk_size, num_chunks)
            else {
                warn!(key = %key, "file-proxy chunk response carried no usable total size, skipping tee");
                return;
            };
            if let Err(e) = store
                .init_chunked(key, total_size, chunk_size, num_chunks, content_type, None)
                .await
            {
                warn!(error = %e, key = %key, "failed to init chunked store entry from file-proxy");
                return;
            }
            if let Err(e) = store.put_chunk(key, index, bytes).await {
                warn!(error = %e, key = %key, index, "failed to tee file-proxy chunk into store");
            }
        }
        _ => {
            if let Err(e) = store.put(key, bytes, content_type, None).await {
                warn!(error = %e, key = %key, "failed to tee file-proxy response into store");
            }
        }
    }
}

/// Prefers the upstream `Content-Range: bytes start-end/total` header; falls
/// back to treating this response as the chunked file's last (and hence
/// only size-bearing) chunk when the header is absent.
fn total_size_from_content_range(
    content_range: Option<&str>,
    bytes_len: u64,
    chunk_size: u64,
    num_chunks: u64,
) -> Option<u64> {
    content_range
        .and_then(|s| s.rsplit('/').next())
        .and_then(|total| total.parse::<u64>().ok())
        .or_else(|| (num_chunks > 0).then(|| chunk_size * (num_chunks - 1) + bytes_len))
}

#[derive(Deserialize)]
struct XmdsProxyParams {
    cms: Option<String>,
}

#[derive(Deserialize)]
struct RestProxyParams {
    cms: Option<String>,
    path: Option<String>,
}

/// Relays XMDS SOAP/XML requests to the CMS named by the `cms` query param,
/// without teeing to the store — the schedule/registration protocol has no
/// store-addressable entity.
async fn xmds_proxy(
    State(state): State<ProxyState>,
    Query(params): Query<XmdsProxyParams>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(cms) = params.cms else {
        return (StatusCode::BAD_REQUEST, ProxyError::MissingCms.to_string()).into_response();
    };
    proxy_passthrough(&state, method, headers, body, &cms, "xmds.php").await
}

/// Relays REST API requests (media/layout/widget data endpoints) to the CMS
/// named by the `cms` query param, at the path named by `path`.
async fn rest_proxy(
    State(state): State<ProxyState>,
    Query(params): Query<RestProxyParams>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(cms) = params.cms else {
        return (StatusCode::BAD_REQUEST, ProxyError::MissingCms.to_string()).into_response();
    };
    let path = params.path.unwrap_or_default();
    proxy_passthrough(&state, method, headers, body, &cms, &path).await
}

async fn proxy_passthrough(
    state: &ProxyState,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
    cms_origin: &str,
    suffix: &str,
) -> Response {
    let Ok(base) = Url::parse(cms_origin) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Ok(target) = base.join(suffix) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match relay(&state.client, &method, target, &headers, body).await {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut out_headers = HeaderMap::new();
            for (name, value) in resp.headers() {
                if !is_hop_by_hop(name) {
                    out_headers.insert(name.clone(), value.clone());
                }
            }
            match resp.bytes().await {
                Ok(bytes) => (status, out_headers, bytes).into_response(),
                Err(_) => StatusCode::BAD_GATEWAY.into_response(),
            }
        }
        Err(e) => {
            warn!(error = %e, "proxy passthrough failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

async fn relay(
    client: &Client,
    method: &Method,
    target: Url,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<reqwest::Response, reqwest::Error> {
    let reqwest_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut req = client.request(reqwest_method, target);

    for (name, value) in headers.iter() {
        if !is_hop_by_hop(name) {
            req = req.header(name.as_str(), value.as_bytes());
        }
    }

    if !body.is_empty() {
        req = req.body(body);
    }

    req.send().await
}

#[derive(Deserialize)]
struct UpdateConfigRequest {
    cms_origin: Option<String>,
    display_name: Option<String>,
}

#[derive(Serialize)]
struct UpdateConfigResponse {
    success: bool,
}

async fn update_config(
    State(state): State<ProxyState>,
    Json(req): Json<UpdateConfigRequest>,
) -> Response {
    let mut config = state.config.write().await;
    if let Some(cms) = req.cms_origin {
        config.cms_origin = cms;
    }
    if let Some(name) = req.display_name {
        config.display_name = Some(name);
    }
    Json(UpdateConfigResponse { success: true }).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> (tempfile::TempDir, ProxyState) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(ContentStore::open(dir.path()).await.unwrap());
        let state = ProxyState {
            client: Client::new(),
            store,
            config: Arc::new(RwLock::new(ProxyConfig::default())),
        };
        (dir, state)
    }

    #[tokio::test]
    async fn file_proxy_requires_cms_and_url_params() {
        let (_dir, state) = test_state().await;
        let app = router(state);
        let resp = app
            .oneshot(Request::builder().uri("/file-proxy").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Missing cms or url parameter");
    }

    #[tokio::test]
    async fn xmds_proxy_requires_cms_param() {
        let (_dir, state) = test_state().await;
        let app = router(state);
        let resp = app
            .oneshot(Request::builder().uri("/xmds-proxy").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Missing cms parameter");
    }

    #[tokio::test]
    async fn xmds_proxy_relays_to_cms_from_query_param() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/xmds.php")
            .with_status(200)
            .with_body(b"<xml/>" as &[u8])
            .create_async()
            .await;

        let (_dir, state) = test_state().await;
        let app = router(state);

        let cms_encoded: String = url::form_urlencoded::byte_serialize(server.url().as_bytes()).collect();
        let uri = format!("/xmds-proxy?cms={cms_encoded}");
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::from("<soap/>"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rest_proxy_relays_to_cms_and_path_from_query_params() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/media/1")
            .with_status(200)
            .with_body(b"{}" as &[u8])
            .create_async()
            .await;

        let (_dir, state) = test_state().await;
        let app = router(state);

        let cms_encoded: String = url::form_urlencoded::byte_serialize(server.url().as_bytes()).collect();
        let uri = format!("/rest-proxy?cms={cms_encoded}&path=api/media/1");
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn file_proxy_forwards_non_content_type_upstream_headers() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/media/a.mp4")
            .with_status(200)
            .with_header("content-type", "video/mp4")
            .with_header("etag", "\"abc123\"")
            .with_body(b"abc" as &[u8])
            .create_async()
            .await;

        let (_dir, state) = test_state().await;
        let app = router(state);

        let cms_encoded: String = url::form_urlencoded::byte_serialize(server.url().as_bytes()).collect();
        let uri = format!("/file-proxy?cms={cms_encoded}&url=/media/a.mp4");
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("etag").unwrap(), "\"abc123\"");
    }

    #[tokio::test]
    async fn file_proxy_tees_a_single_chunk_when_chunk_params_present() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/media/a.mp4")
            .with_status(206)
            .with_header("content-type", "video/mp4")
            .with_header("content-range", "bytes 0-2/6")
            .with_body(b"abc" as &[u8])
            .create_async()
            .await;

        let (_dir, state) = test_state().await;
        let store = state.store.clone();
        let app = router(state);

        let cms_encoded: String = url::form_urlencoded::byte_serialize(server.url().as_bytes()).collect();
        let uri = format!(
            "/file-proxy?cms={cms_encoded}&url=/media/a.mp4&store_key=media/a&chunk_index=0&num_chunks=2&chunk_size=3"
        );
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);

        let key = StoreKey::new(ContentType::Media, "a");
        let has = store.has(&key).await.unwrap();
        assert!(!has.metadata.unwrap().is_complete());
    }

    #[tokio::test]
    async fn file_proxy_relays_and_tees_into_store() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/media/a.mp4")
            .with_status(200)
            .with_header("content-type", "video/mp4")
            .with_body(b"abc" as &[u8])
            .create_async()
            .await;

        let (_dir, state) = test_state().await;
        let store = state.store.clone();
        let app = router(state);

        let cms_encoded: String = url::form_urlencoded::byte_serialize(server.url().as_bytes()).collect();
        let uri = format!("/file-proxy?cms={cms_encoded}&url=/media/a.mp4&store_key=media/a");
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let key = StoreKey::new(ContentType::Media, "a");
        let stored = store.open(&key, None).await.unwrap();
        assert_eq!(stored, b"abc");
    }

    #[tokio::test]
    async fn update_config_overwrites_cms_origin() {
        let (_dir, state) = test_state().await;
        let config = state.config.clone();
        let app = router(state);

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/config")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"cms_origin":"https://new.example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(config.read().await.cms_origin, "https://new.example.com");
    }
}
