//! Pure helpers for signed-URL expiry checks, content-type inference, and
//! the proxy URL rewrite — all independently unit-testable, per the design
//! note that the rewrite must be a pure function rather than buried inline.

use chrono::{DateTime, Utc};
use url::Url;

/// Reads `X-Amz-Expires` as an absolute unix-epoch-seconds deadline (the CMS
/// signs URLs with a literal expiry timestamp rather than AWS SigV4's
/// relative-to-`X-Amz-Date` duration), returning it if present and well
/// formed.
pub fn signed_url_expiry(url: &Url) -> Option<DateTime<Utc>> {
    let expires_secs: i64 = url
        .query_pairs()
        .find(|(k, _)| k.eq_ignore_ascii_case("X-Amz-Expires"))
        .and_then(|(_, v)| v.parse().ok())?;

    DateTime::from_timestamp(expires_secs, 0)
}

/// True if the URL carries a signed expiry and `now + grace` is past it.
/// URLs with no signed expiry are never considered expired.
pub fn is_expired(url: &Url, now: DateTime<Utc>, grace: std::time::Duration) -> bool {
    match signed_url_expiry(url) {
        Some(expiry) => now + chrono::Duration::from_std(grace).unwrap_or_default() > expiry,
        None => false,
    }
}

/// Infers an HTTP `Content-Type` from a file path's extension. Falls back
/// to `application/octet-stream` for anything unrecognized.
pub fn infer_content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" | "xlf" => "application/xml",
        "html" | "htm" => "text/html",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => "application/octet-stream",
    }
}

/// Resolves a manifest URL against the CMS origin before it is fetched.
///
/// Some manifests carry media paths already rewritten to point at this
/// engine's own local host (e.g. a layout authored while the player sat
/// behind a service-worker proxy). When `url`'s host equals `local_host`'s
/// host, this engine is "behind the proxy" for that URL and the path+query
/// is resolved against `cms_origin` instead, so the task fetches the real
/// remote file directly. Any other absolute URL (already CMS-absolute, or a
/// foreign CDN) passes through unchanged.
///
/// Pure and side-effect free: it does not perform I/O and does not assume a
/// proxy is actually listening at `local_host`.
pub fn rewrite_for_proxy(url: &Url, local_host: &str, cms_origin: &Url) -> Url {
    let local_host_name = local_host.split(':').next().unwrap_or(local_host);
    if url.host_str() != Some(local_host_name) {
        return url.clone();
    }

    cms_origin
        .join(&format!("{}{}", url.path(), url.query().map(|q| format!("?{q}")).unwrap_or_default()))
        .unwrap_or_else(|_| url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_known_extensions() {
        assert_eq!(infer_content_type("/media/a.mp4"), "video/mp4");
        assert_eq!(infer_content_type("/widget/clock.js"), "application/javascript");
        assert_eq!(infer_content_type("/layout/1.xlf"), "application/xml");
    }

    #[test]
    fn content_type_unknown_falls_back() {
        assert_eq!(infer_content_type("/no/extension"), "application/octet-stream");
    }

    #[test]
    fn signed_url_expiry_reads_absolute_epoch_deadline() {
        // 9999999999 is 2286-11-20T17:46:39Z, the far-future "never expires
        // in practice" literal the CMS hands out for evergreen assets.
        let url =
            Url::parse("https://cms.example.com/media/a.mp4?X-Amz-Expires=9999999999").unwrap();
        let expiry = signed_url_expiry(&url).unwrap();
        assert_eq!(expiry.to_rfc3339(), "2286-11-20T17:46:39+00:00");
    }

    #[test]
    fn url_without_signature_is_never_expired() {
        let url = Url::parse("https://cms.example.com/media/a.mp4").unwrap();
        assert!(!is_expired(url_ref(&url), Utc::now(), std::time::Duration::from_secs(30)));
    }

    fn url_ref(u: &Url) -> &Url {
        u
    }

    #[test]
    fn expired_once_now_plus_grace_passes_deadline() {
        let deadline = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:01:00+00:00")
            .unwrap()
            .to_utc();
        let url = Url::parse(&format!(
            "https://cms.example.com/media/a.mp4?X-Amz-Expires={}",
            deadline.timestamp()
        ))
        .unwrap();

        let just_before = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:50+00:00")
            .unwrap()
            .to_utc();
        assert!(!is_expired(&url, just_before, std::time::Duration::from_secs(5)));

        let past_grace = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:01:10+00:00")
            .unwrap()
            .to_utc();
        assert!(is_expired(&url, past_grace, std::time::Duration::from_secs(5)));
    }

    #[test]
    fn rewrite_resolves_local_host_urls_against_cms_origin() {
        let cms = Url::parse("https://cms.example.com").unwrap();
        let url = Url::parse("http://127.0.0.1:8765/media/a.mp4?x=1").unwrap();
        let rewritten = rewrite_for_proxy(&url, "127.0.0.1:8765", &cms);
        assert_eq!(rewritten.host_str(), Some("cms.example.com"));
        assert_eq!(rewritten.path(), "/media/a.mp4");
        assert_eq!(rewritten.query(), Some("x=1"));
    }

    #[test]
    fn rewrite_passes_through_foreign_origin_urls() {
        let cms = Url::parse("https://cms.example.com").unwrap();
        let url = Url::parse("https://cdn.other.example/asset.png").unwrap();
        let rewritten = rewrite_for_proxy(&url, "127.0.0.1:8765", &cms);
        assert_eq!(rewritten, url);
    }

    #[test]
    fn rewrite_passes_through_already_absolute_cms_urls() {
        let cms = Url::parse("https://cms.example.com").unwrap();
        let url = Url::parse("https://cms.example.com/media/a.mp4").unwrap();
        let rewritten = rewrite_for_proxy(&url, "127.0.0.1:8765", &cms);
        assert_eq!(rewritten, url);
    }
}
