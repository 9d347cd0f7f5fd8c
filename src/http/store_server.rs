//! HTTP surface over [`ContentStore`], grounded on the teacher's
//! `cache/proxy.rs` router/extractor idiom (axum path params, Range
//! support) but serving the store directly rather than proxying a live
//! download.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::StoreError;
use crate::models::StoreKey;
use crate::store::ContentStore;

use super::range::parse_range_header;

pub fn router(store: Arc<ContentStore>) -> Router {
    Router::new()
        .route("/store/{content_type}/{*id}", get(serve_get).head(serve_head).put(put_whole))
        .route("/store/delete", post(delete_files))
        .route("/store/mark-complete", post(mark_complete))
        .route("/store/list", get(list_files))
        .route("/player/cache/static/{*name}", get(serve_static_alias))
        .layer(CorsLayer::permissive())
        .with_state(store)
}

fn key_from_parts(content_type: &str, id: &str) -> Result<StoreKey, StatusCode> {
    StoreKey::parse(&format!("{content_type}/{id}")).map_err(|e| {
        warn!(error = %e, "rejecting malformed store key");
        StatusCode::BAD_REQUEST
    })
}

async fn serve_static_alias(
    State(store): State<Arc<ContentStore>>,
    Path(name): Path<String>,
) -> Response {
    serve_get(State(store), Path(("static".to_string(), name)), HeaderMap::new()).await
}

async fn serve_get(
    State(store): State<Arc<ContentStore>>,
    Path((content_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    serve(&store, &content_type, &id, &headers, true).await
}

async fn serve_head(
    State(store): State<Arc<ContentStore>>,
    Path((content_type, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    serve(&store, &content_type, &id, &headers, false).await
}

async fn serve(
    store: &ContentStore,
    content_type: &str,
    id: &str,
    headers: &HeaderMap,
    include_body: bool,
) -> Response {
    let key = match key_from_parts(content_type, id) {
        Ok(k) => k,
        Err(code) => return code.into_response(),
    };

    let has = match store.has(&key).await {
        Ok(h) => h,
        Err(e) => return store_error_response(e),
    };
    let Some(meta) = has.metadata else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let total_size = meta.size();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| parse_range_header(h, total_size));

    let (status, content_range) = match range {
        Some((start, end)) => (
            StatusCode::PARTIAL_CONTENT,
            Some(format!("bytes {start}-{end}/{total_size}")),
        ),
        None => (StatusCode::OK, None),
    };
    let body_range = range;
    let body_len = body_range.map(|(s, e)| e - s + 1).unwrap_or(total_size);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        meta.content_type().parse().unwrap_or_else(|_| "application/octet-stream".parse().unwrap()),
    );
    response_headers.insert(header::ACCEPT_RANGES, "bytes".parse().unwrap());
    response_headers.insert(header::CONTENT_LENGTH, body_len.into());
    if let Some(cr) = content_range {
        response_headers.insert(header::CONTENT_RANGE, cr.parse().unwrap());
    }

    if !include_body {
        return (status, response_headers).into_response();
    }

    match store.open(&key, body_range).await {
        Ok(bytes) => (status, response_headers, bytes).into_response(),
        Err(e) => store_error_response(e),
    }
}

async fn put_whole(
    State(store): State<Arc<ContentStore>>,
    Path((content_type, id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key = match key_from_parts(&content_type, &id) {
        Ok(k) => k,
        Err(code) => return code.into_response(),
    };
    let ct = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    match store.put(&key, &body, ct, None).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => store_error_response(e),
    }
}

#[derive(Deserialize)]
struct DeleteRequest {
    files: Vec<String>,
}

#[derive(Serialize)]
struct DeleteResponse {
    success: bool,
    deleted: usize,
    total: usize,
}

async fn delete_files(
    State(store): State<Arc<ContentStore>>,
    Json(req): Json<DeleteRequest>,
) -> Response {
    let total = req.files.len();
    let mut deleted = 0;
    for raw in req.files {
        let Ok(key) = StoreKey::parse(&raw) else {
            continue;
        };
        if matches!(store.delete(&key).await, Ok(true)) {
            deleted += 1;
        }
    }
    Json(DeleteResponse {
        success: true,
        deleted,
        total,
    })
    .into_response()
}

#[derive(Deserialize)]
struct MarkCompleteRequest {
    store_key: String,
}

#[derive(Serialize)]
struct MarkCompleteResponse {
    success: bool,
}

async fn mark_complete(
    State(store): State<Arc<ContentStore>>,
    Json(req): Json<MarkCompleteRequest>,
) -> Response {
    let key = match StoreKey::parse(&req.store_key) {
        Ok(k) => k,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match store.mark_complete(&key).await {
        Ok(()) => Json(MarkCompleteResponse { success: true }).into_response(),
        Err(e) => store_error_response(e),
    }
}

#[derive(Serialize)]
struct ListResponseEntry {
    key: String,
    size: u64,
    content_type: String,
    complete: bool,
}

async fn list_files(State(store): State<Arc<ContentStore>>) -> Response {
    match store.list().await {
        Ok(entries) => Json(
            entries
                .into_iter()
                .map(|e| ListResponseEntry {
                    key: e.key.to_string(),
                    size: e.metadata.size(),
                    content_type: e.metadata.content_type().to_string(),
                    complete: e.metadata.is_complete(),
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => store_error_response(e),
    }
}

fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::NotFound(_) | StoreError::ChunkMissing { .. } => {
            StatusCode::NOT_FOUND.into_response()
        }
        StoreError::InvalidKey(_) => StatusCode::BAD_REQUEST.into_response(),
        StoreError::GeometryMismatch { .. } => StatusCode::CONFLICT.into_response(),
        StoreError::Io(_) | StoreError::Serde(_) => {
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_store() -> (tempfile::TempDir, Arc<ContentStore>) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(ContentStore::open(dir.path()).await.unwrap());
        (dir, store)
    }

    #[tokio::test]
    async fn get_missing_key_returns_404() {
        let (_dir, store) = test_store().await;
        let app = router(store);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/store/media/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let (_dir, store) = test_store().await;
        store
            .put(
                &StoreKey::new(ContentType::Static, "a.txt"),
                b"hello",
                "text/plain",
                None,
            )
            .await
            .unwrap();
        let app = router(store);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/store/static/a.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn range_request_returns_206_with_content_range() {
        let (_dir, store) = test_store().await;
        store
            .put(
                &StoreKey::new(ContentType::Static, "a.txt"),
                b"0123456789",
                "text/plain",
                None,
            )
            .await
            .unwrap();
        let app = router(store);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/store/static/a.txt")
                    .header(header::RANGE, "bytes=2-5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            resp.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 2-5/10"
        );
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"2345");
    }

    #[tokio::test]
    async fn mark_complete_endpoint_persists_completion_for_a_partial_chunked_entry() {
        let (_dir, store) = test_store().await;
        let key = StoreKey::new(ContentType::Media, "movie.mp4");
        store.init_chunked(&key, 20, 10, 2, "video/mp4", None).await.unwrap();
        store.put_chunk(&key, 0, &[0u8; 10]).await.unwrap();
        let app = router(store.clone());

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/store/mark-complete")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"store_key":"media/movie.mp4"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let has = store.has(&key).await.unwrap();
        assert!(has.metadata.unwrap().is_complete());
    }

    #[tokio::test]
    async fn static_alias_serves_same_entity_as_store_path() {
        let (_dir, store) = test_store().await;
        store
            .put(
                &StoreKey::new(ContentType::Static, "logo.png"),
                b"png-bytes",
                "image/png",
                None,
            )
            .await
            .unwrap();
        let app = router(store);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/player/cache/static/logo.png")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
