use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::content_type::ContentType;
use super::store_key::StoreKey;

/// A single entry from the layout/widget manifest describing a file the
/// player needs cached locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(rename = "type")]
    pub file_type: ContentType,
    pub id: String,
    /// Path relative to (or absolute against) the CMS origin.
    pub path: String,
    /// Declared size in bytes, if the manifest carries one. Authoritative
    /// size is always re-derived from a HEAD request during `prepare()`.
    pub size: Option<u64>,
    pub md5: Option<String>,
    /// True for widget HTML/data payloads, which get their own re-enqueue
    /// policy (§4.6) rather than the generic media retry table.
    #[serde(default)]
    pub is_get_data: bool,
    /// Chunk indices to skip on resume (already present and verified complete).
    #[serde(default)]
    pub skip_chunks: HashSet<u64>,
}

impl FileInfo {
    pub fn store_key(&self) -> StoreKey {
        StoreKey::new(self.file_type, self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_manifest_entry() {
        let json = r#"{"type":"media","id":"abc","path":"/media/abc.mp4"}"#;
        let info: FileInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.file_type, ContentType::Media);
        assert!(!info.is_get_data);
        assert!(info.skip_chunks.is_empty());
    }

    #[test]
    fn store_key_uses_type_and_id() {
        let info = FileInfo {
            file_type: ContentType::Widget,
            id: "clock".into(),
            path: "/widget/clock".into(),
            size: None,
            md5: None,
            is_get_data: true,
            skip_chunks: HashSet::new(),
        };
        assert_eq!(info.store_key().to_string(), "widget/clock");
    }
}
