//! Sidecar `meta.json` shape for a stored entity, mirroring the teacher's
//! `cache/metadata.rs::CacheMetadata` but simplified to the two layouts the
//! store actually persists: a whole file, or a chunked file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentMetadata {
    Whole {
        size: u64,
        content_type: String,
        md5: Option<String>,
        created_at: DateTime<Utc>,
    },
    Chunked {
        /// Total file size in bytes, across all chunks.
        size: u64,
        content_type: String,
        md5: Option<String>,
        chunk_size: u64,
        num_chunks: u64,
        /// Index of every chunk written so far (not necessarily contiguous).
        chunks_written: Vec<u64>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        /// Set by an explicit `mark_complete` call, independent of whether
        /// every chunk index has actually been observed written.
        #[serde(default)]
        forced_complete: bool,
    },
}

impl ContentMetadata {
    pub fn size(&self) -> u64 {
        match self {
            ContentMetadata::Whole { size, .. } => *size,
            ContentMetadata::Chunked { size, .. } => *size,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            ContentMetadata::Whole { content_type, .. } => content_type,
            ContentMetadata::Chunked { content_type, .. } => content_type,
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            ContentMetadata::Whole { .. } => true,
            ContentMetadata::Chunked {
                num_chunks,
                chunks_written,
                forced_complete,
                ..
            } => *forced_complete || chunks_written.len() as u64 >= *num_chunks,
        }
    }

    pub fn has_chunk(&self, index: u64) -> bool {
        match self {
            ContentMetadata::Whole { .. } => true,
            ContentMetadata::Chunked { chunks_written, .. } => chunks_written.contains(&index),
        }
    }

    /// Records `index` as written, bumping `updated_at` and setting
    /// `completed_at` once every chunk is present. No-op for `Whole`.
    pub fn mark_chunk_written(&mut self, index: u64, now: DateTime<Utc>) {
        if let ContentMetadata::Chunked {
            chunks_written,
            updated_at,
            completed_at,
            num_chunks,
            ..
        } = self
        {
            if !chunks_written.contains(&index) {
                chunks_written.push(index);
            }
            *updated_at = now;
            if chunks_written.len() as u64 >= *num_chunks {
                *completed_at = Some(now);
            }
        }
    }

    /// Marks the entry complete regardless of how many chunks have actually
    /// been observed written. No-op for `Whole`, which is always complete.
    pub fn mark_forced_complete(&mut self, now: DateTime<Utc>) {
        if let ContentMetadata::Chunked {
            forced_complete,
            completed_at,
            ..
        } = self
        {
            *forced_complete = true;
            if completed_at.is_none() {
                *completed_at = Some(now);
            }
        }
    }
}
