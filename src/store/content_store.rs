//! Filesystem-backed content-addressable store.
//!
//! Layout under `root`:
//! ```text
//! <type>/<id>.bin           whole files
//! <type>/<id>.meta.json     sidecar metadata (whole or chunked)
//! <type>/<id>.chunks/N.bin  individual chunks of a chunked file
//! ```
//!
//! Writes go through a `.tmp` file and an atomic rename, mirroring the
//! teacher's `cache/chunk_store.rs`. Sidecar metadata read-modify-write is
//! serialized per key via an in-process guard map rather than a file lock,
//! since cross-process access is out of scope.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::StoreKey;

use super::metadata::ContentMetadata;

/// True for the OS errors that indicate "the disk is full", across the
/// platforms this engine targets.
fn is_disk_full_error(err: &std::io::Error) -> bool {
    match err.raw_os_error() {
        Some(28) => true,  // ENOSPC (unix)
        Some(112) => true, // ERROR_DISK_FULL (windows)
        _ => {
            let msg = err.to_string().to_lowercase();
            msg.contains("no space left") || msg.contains("disk full")
        }
    }
}

/// Outcome of a `has()` lookup.
#[derive(Debug, Clone)]
pub struct HasResult {
    pub exists: bool,
    pub metadata: Option<ContentMetadata>,
}

/// A single entry from `list()`.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub key: StoreKey,
    pub metadata: ContentMetadata,
}

pub struct ContentStore {
    root: PathBuf,
    key_locks: Mutex<HashMap<StoreKey, Arc<Mutex<()>>>>,
}

impl ContentStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    fn dir_for(&self, key: &StoreKey) -> PathBuf {
        self.root.join(key.content_type.to_string())
    }

    fn whole_path(&self, key: &StoreKey) -> PathBuf {
        self.dir_for(key).join(format!("{}.bin", sanitize_segment(&key.id)))
    }

    fn meta_path(&self, key: &StoreKey) -> PathBuf {
        self.dir_for(key).join(format!("{}.meta.json", sanitize_segment(&key.id)))
    }

    fn chunk_dir(&self, key: &StoreKey) -> PathBuf {
        self.dir_for(key).join(format!("{}.chunks", sanitize_segment(&key.id)))
    }

    fn chunk_path(&self, key: &StoreKey, index: u64) -> PathBuf {
        self.chunk_dir(key).join(format!("{index}.bin"))
    }

    async fn lock_for(&self, key: &StoreKey) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_meta(&self, key: &StoreKey) -> Result<Option<ContentMetadata>, StoreError> {
        let path = self.meta_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_meta(&self, key: &StoreKey, meta: &ContentMetadata) -> Result<(), StoreError> {
        let dir = self.dir_for(key);
        fs::create_dir_all(&dir).await?;
        let final_path = self.meta_path(key);
        let tmp_path = final_path.with_extension("meta.json.tmp");
        let bytes = serde_json::to_vec_pretty(meta)?;
        write_atomic(&tmp_path, &final_path, &bytes).await?;
        Ok(())
    }

    pub async fn has(&self, key: &StoreKey) -> Result<HasResult, StoreError> {
        let meta = self.read_meta(key).await?;
        Ok(HasResult {
            exists: meta.is_some(),
            metadata: meta,
        })
    }

    /// Writes a complete, unchunked file plus its sidecar metadata.
    pub async fn put(
        &self,
        key: &StoreKey,
        bytes: &[u8],
        content_type: &str,
        md5: Option<String>,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let dir = self.dir_for(key);
        fs::create_dir_all(&dir).await?;
        let final_path = self.whole_path(key);
        let tmp_path = final_path.with_extension("bin.tmp");
        write_atomic(&tmp_path, &final_path, bytes).await?;

        let meta = ContentMetadata::Whole {
            size: bytes.len() as u64,
            content_type: content_type.to_string(),
            md5,
            created_at: Utc::now(),
        };
        self.write_meta(key, &meta).await
    }

    /// Initializes chunk-geometry metadata for a file about to be fetched
    /// in pieces. Idempotent: if metadata already exists with matching
    /// geometry this is a no-op; mismatched geometry is rejected (the
    /// resume-consistency decision recorded in the design ledger).
    pub async fn init_chunked(
        &self,
        key: &StoreKey,
        size: u64,
        chunk_size: u64,
        num_chunks: u64,
        content_type: &str,
        md5: Option<String>,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.read_meta(key).await? {
            if let ContentMetadata::Chunked {
                chunk_size: existing_chunk_size,
                num_chunks: existing_num_chunks,
                ..
            } = &existing
            {
                if *existing_chunk_size != chunk_size || *existing_num_chunks != num_chunks {
                    return Err(StoreError::GeometryMismatch {
                        key: key.to_string(),
                        existing_chunk_size: *existing_chunk_size,
                        existing_num_chunks: *existing_num_chunks,
                        got_chunk_size: chunk_size,
                        got_num_chunks: num_chunks,
                    });
                }
                return Ok(());
            }
        }

        fs::create_dir_all(self.chunk_dir(key)).await?;
        let now = Utc::now();
        let meta = ContentMetadata::Chunked {
            size,
            content_type: content_type.to_string(),
            md5,
            chunk_size,
            num_chunks,
            chunks_written: vec![],
            created_at: now,
            updated_at: now,
            completed_at: None,
            forced_complete: false,
        };
        self.write_meta(key, &meta).await
    }

    /// Writes a single chunk's bytes and records it in the sidecar metadata.
    pub async fn put_chunk(
        &self,
        key: &StoreKey,
        index: u64,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        fs::create_dir_all(self.chunk_dir(key)).await?;
        let final_path = self.chunk_path(key, index);
        let tmp_path = final_path.with_extension("bin.tmp");

        match write_atomic(&tmp_path, &final_path, bytes).await {
            Ok(()) => {}
            Err(e) if is_disk_full_error(&e) => {
                return Err(StoreError::Io(e));
            }
            Err(e) => return Err(StoreError::Io(e)),
        }

        let mut meta = self
            .read_meta(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        meta.mark_chunk_written(index, Utc::now());
        self.write_meta(key, &meta).await
    }

    /// Independently marks an entry complete, regardless of how many chunks
    /// have actually been observed written. A no-op for an already-complete
    /// whole file; for a chunked entry it sets `forced_complete` in the
    /// sidecar metadata so `is_complete()` reports `true` from then on.
    pub async fn mark_complete(&self, key: &StoreKey) -> Result<(), StoreError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let mut meta = self
            .read_meta(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        meta.mark_forced_complete(Utc::now());
        self.write_meta(key, &meta).await
    }

    pub async fn get_whole_path(&self, key: &StoreKey) -> Option<PathBuf> {
        let path = self.whole_path(key);
        if fs::metadata(&path).await.is_ok() {
            Some(path)
        } else {
            None
        }
    }

    /// Single dispatch point for reading bytes back out of the store,
    /// whole or chunked, with an optional inclusive byte range.
    pub async fn open(
        &self,
        key: &StoreKey,
        range: Option<(u64, u64)>,
    ) -> Result<Vec<u8>, StoreError> {
        let meta = self
            .read_meta(key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        match &meta {
            ContentMetadata::Whole { size, .. } => {
                let (start, end) = range.unwrap_or((0, size.saturating_sub(1)));
                read_range_from_file(&self.whole_path(key), start, end).await
            }
            ContentMetadata::Chunked {
                size,
                chunk_size,
                num_chunks,
                ..
            } => {
                let (start, end) = range.unwrap_or((0, size.saturating_sub(1)));
                self.read_chunked_range(key, &meta, *chunk_size, *num_chunks, start, end)
                    .await
            }
        }
    }

    async fn read_chunked_range(
        &self,
        key: &StoreKey,
        meta: &ContentMetadata,
        chunk_size: u64,
        num_chunks: u64,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, StoreError> {
        let first_chunk = start / chunk_size;
        let last_chunk = end / chunk_size;
        let mut out = Vec::with_capacity((end - start + 1) as usize);

        for index in first_chunk..=last_chunk.min(num_chunks.saturating_sub(1)) {
            if !meta.has_chunk(index) {
                return Err(StoreError::ChunkMissing {
                    key: key.to_string(),
                    index,
                });
            }
            let chunk_start = index * chunk_size;
            let local_start = start.saturating_sub(chunk_start);
            let local_end = end.min(chunk_start + chunk_size - 1) - chunk_start;
            let bytes = read_range_from_file(&self.chunk_path(key, index), local_start, local_end)
                .await?;
            out.extend_from_slice(&bytes);
        }

        Ok(out)
    }

    pub async fn delete(&self, key: &StoreKey) -> Result<bool, StoreError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let mut removed = false;
        if remove_if_exists(&self.whole_path(key)).await? {
            removed = true;
        }
        if remove_dir_if_exists(&self.chunk_dir(key)).await? {
            removed = true;
        }
        if remove_if_exists(&self.meta_path(key)).await? {
            removed = true;
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<ListEntry>, StoreError> {
        let mut out = Vec::new();
        let mut type_dirs = match fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        while let Some(type_entry) = type_dirs.next_entry().await? {
            if !type_entry.file_type().await?.is_dir() {
                continue;
            }
            let content_type = match type_entry.file_name().to_string_lossy().parse() {
                Ok(ct) => ct,
                Err(()) => continue,
            };

            let mut files = fs::read_dir(type_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let name = file_entry.file_name().to_string_lossy().to_string();
                let Some(id) = name.strip_suffix(".meta.json") else {
                    continue;
                };
                let key = StoreKey::new(content_type, id.to_string());
                if let Some(meta) = self.read_meta(&key).await? {
                    out.push(ListEntry { key, metadata: meta });
                }
            }
        }

        Ok(out)
    }

    pub async fn total_size(&self) -> Result<u64, StoreError> {
        Ok(self.list().await?.iter().map(|e| e.metadata.size()).sum())
    }

    /// Deletes orphaned `.tmp` files left over from a crash mid-write.
    /// Safe to call at any time; never touches a finished `.bin`/`.json`.
    pub async fn sweep_temp_files(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                    fs::remove_file(&path).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn sanitize_segment(id: &str) -> String {
    id.replace('/', "__")
}

async fn write_atomic(tmp_path: &Path, final_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);
    fs::rename(tmp_path, final_path).await
}

async fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn remove_dir_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn read_range_from_file(path: &Path, start: u64, end: u64) -> Result<Vec<u8>, StoreError> {
    let mut file = fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let len = (end.saturating_sub(start) + 1) as usize;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;
    use tempfile::TempDir;

    async fn store() -> (TempDir, ContentStore) {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_has_reports_whole_metadata() {
        let (_dir, store) = store().await;
        let key = StoreKey::new(ContentType::Static, "logo.png");
        store.put(&key, b"hello", "image/png", None).await.unwrap();

        let has = store.has(&key).await.unwrap();
        assert!(has.exists);
        assert_eq!(has.metadata.unwrap().size(), 5);
    }

    #[tokio::test]
    async fn put_then_open_round_trips_bytes() {
        let (_dir, store) = store().await;
        let key = StoreKey::new(ContentType::Static, "a.txt");
        store.put(&key, b"0123456789", "text/plain", None).await.unwrap();

        let full = store.open(&key, None).await.unwrap();
        assert_eq!(full, b"0123456789");

        let range = store.open(&key, Some((2, 5))).await.unwrap();
        assert_eq!(range, b"2345");
    }

    #[tokio::test]
    async fn chunked_read_spans_two_chunks() {
        let (_dir, store) = store().await;
        let key = StoreKey::new(ContentType::Media, "movie.mp4");
        store
            .init_chunked(&key, 20, 10, 2, "video/mp4", None)
            .await
            .unwrap();
        store.put_chunk(&key, 0, &[0u8; 10]).await.unwrap();
        store.put_chunk(&key, 1, &[1u8; 10]).await.unwrap();

        let bytes = store.open(&key, Some((5, 14))).await.unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[..5], &[0u8; 5]);
        assert_eq!(&bytes[5..], &[1u8; 5]);
    }

    #[tokio::test]
    async fn reading_missing_chunk_errors() {
        let (_dir, store) = store().await;
        let key = StoreKey::new(ContentType::Media, "movie.mp4");
        store
            .init_chunked(&key, 20, 10, 2, "video/mp4", None)
            .await
            .unwrap();
        store.put_chunk(&key, 0, &[0u8; 10]).await.unwrap();

        let err = store.open(&key, None).await.unwrap_err();
        assert!(matches!(err, StoreError::ChunkMissing { index: 1, .. }));
    }

    #[tokio::test]
    async fn init_chunked_rejects_geometry_mismatch_on_resume() {
        let (_dir, store) = store().await;
        let key = StoreKey::new(ContentType::Media, "movie.mp4");
        store
            .init_chunked(&key, 20, 10, 2, "video/mp4", None)
            .await
            .unwrap();

        let err = store
            .init_chunked(&key, 20, 5, 4, "video/mp4", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::GeometryMismatch { .. }));
    }

    #[tokio::test]
    async fn mark_complete_overrides_partial_chunk_coverage() {
        let (_dir, store) = store().await;
        let key = StoreKey::new(ContentType::Media, "movie.mp4");
        store
            .init_chunked(&key, 20, 10, 2, "video/mp4", None)
            .await
            .unwrap();
        store.put_chunk(&key, 0, &[0u8; 10]).await.unwrap();

        store.mark_complete(&key).await.unwrap();

        let has = store.has(&key).await.unwrap();
        assert!(has.metadata.unwrap().is_complete());
    }

    #[tokio::test]
    async fn delete_removes_whole_file_and_metadata() {
        let (_dir, store) = store().await;
        let key = StoreKey::new(ContentType::Static, "a.txt");
        store.put(&key, b"x", "text/plain", None).await.unwrap();
        assert!(store.delete(&key).await.unwrap());
        assert!(!store.has(&key).await.unwrap().exists);
    }

    #[tokio::test]
    async fn list_enumerates_all_entries() {
        let (_dir, store) = store().await;
        store
            .put(&StoreKey::new(ContentType::Static, "a.txt"), b"x", "text/plain", None)
            .await
            .unwrap();
        store
            .put(&StoreKey::new(ContentType::Media, "b.mp4"), b"yy", "video/mp4", None)
            .await
            .unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn sweep_removes_orphaned_tmp_files() {
        let (dir, store) = store().await;
        let orphan = dir.path().join("static").join("orphan.bin.tmp");
        fs::create_dir_all(orphan.parent().unwrap()).await.unwrap();
        fs::write(&orphan, b"partial").await.unwrap();

        let removed = store.sweep_temp_files().await.unwrap();
        assert_eq!(removed, 1);
        assert!(fs::metadata(&orphan).await.is_err());
    }
}
