//! HTTP `Range` header parsing, grounded on the teacher's
//! `cache/proxy.rs::parse_range_header`.

/// Parses a single-range `Range: bytes=...` header against a known total
/// size, returning an inclusive `(start, end)` byte range. Supports
/// `a-b`, open-ended `a-`, and suffix `-N` forms. Multi-range requests are
/// not supported (the first range is used) — matches the teacher.
pub fn parse_range_header(header: &str, total_size: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let first = spec.split(',').next()?.trim();
    let (start_str, end_str) = first.split_once('-')?;

    if start_str.is_empty() {
        // Suffix range: last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 || total_size == 0 {
            return None;
        }
        let start = total_size.saturating_sub(suffix_len);
        return Some((start, total_size - 1));
    }

    let start: u64 = start_str.parse().ok()?;
    if start >= total_size {
        return None;
    }
    let end = if end_str.is_empty() {
        total_size - 1
    } else {
        end_str.parse::<u64>().ok()?.min(total_size - 1)
    };
    if end < start {
        return None;
    }
    Some((start, end))
}
