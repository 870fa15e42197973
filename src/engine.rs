//! Cache lifecycle orchestration: `restore` and `save` (§4.4).
//!
//! This is the only module that touches more than one of Blob Backend,
//! Index Store, and Lock Manager at once; the ordering it enforces between
//! them — load, evict-candidates-computed, blob-upload, index-commit,
//! blob-delete — is the contract in §5, not an implementation detail.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use crate::archive::{Archiver, CompressionOptions};
use crate::blob::BlobBackend;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::index::{CacheEntry, IndexStore};
use crate::lock::LockManager;
use crate::object_store::ObjectStore;

pub struct CacheEngine {
    blob: BlobBackend,
    index: IndexStore,
    lock: LockManager,
    archiver: Arc<dyn Archiver>,
    config: CacheConfig,
}

impl CacheEngine {
    pub fn new(store: Arc<dyn ObjectStore>, config: CacheConfig, archiver: Arc<dyn Archiver>) -> Self {
        Self {
            blob: BlobBackend::new(store.clone(), config.clone()),
            index: IndexStore::new(store.clone(), config.clone()),
            lock: LockManager::new(store, config.clone()),
            archiver,
            config,
        }
    }

    /// `restore(key)`: load the index, look the key up, fetch and extract
    /// the blob, then best-effort bump `accessedAt` (§4.4).
    pub async fn restore(&self, key: &str, dest_dir: &std::path::Path) -> Result<CacheEntry> {
        let index = self.index.load().await?;
        let entry = index
            .find_entry(key)
            .cloned()
            .ok_or_else(|| CacheError::ArchiveMissing(format!("no cache entry for key '{key}'")))?;

        self.restore_entry(&entry, dest_dir).await?;
        Ok(entry)
    }

    /// The four steps of §4.4 `restore(entry)`, given an already-resolved
    /// entry. Exposed separately so callers that already hold the entry
    /// (e.g. after listing) don't pay for a second index load.
    pub async fn restore_entry(&self, entry: &CacheEntry, dest_dir: &std::path::Path) -> Result<()> {
        if !self.blob.exists(&entry.archive_path).await {
            return Err(CacheError::ArchiveMissing(entry.archive_path.clone()));
        }

        let scratch = tempfile::tempdir().map_err(CacheError::Io)?;
        let data = self.blob.get(&entry.archive_path).await?;
        let local_path = scratch.path().join("restored.tar.zst");
        tokio::fs::write(&local_path, &data).await.map_err(CacheError::Io)?;

        self.archiver
            .extract_archive(&local_path, dest_dir)
            .await
            .map_err(CacheError::Other)?;

        // `scratch` is released here regardless of extraction outcome —
        // the `?` above already unwound on failure, and the success path
        // falls through to drop it now.
        drop(scratch);

        self.bump_access_time_best_effort(&entry.key).await;
        Ok(())
    }

    async fn bump_access_time_best_effort(&self, key: &str) {
        let outcome = self.bump_access_time(key).await;
        if let Err(err) = outcome {
            warn!("best-effort accessedAt update for '{key}' failed, ignoring: {err}");
        }
    }

    async fn bump_access_time(&self, key: &str) -> Result<()> {
        let guard = self.lock.acquire().await?;
        let mut index = self.index.load().await?;
        if let Some(entry) = index.entries.iter_mut().find(|e| e.key == key) {
            entry.accessed_at = Some(Utc::now());
        }
        let result = self.index.save(&index).await;
        guard.release().await;
        result
    }

    /// `save(key, paths)`, executed entirely under the lock (§4.4).
    pub async fn save(&self, key: &str, paths: &[PathBuf]) -> Result<CacheEntry> {
        let guard = self.lock.acquire().await?;
        let result = self.save_locked(key, paths).await;
        guard.release().await;
        result
    }

    async fn save_locked(&self, key: &str, paths: &[PathBuf]) -> Result<CacheEntry> {
        let mut index = self.index.load().await?;

        // Step 2: idempotent on key — no upload on a repeat save.
        if let Some(existing) = index.find_entry(key) {
            debug!("save('{key}') is a no-op: entry already present");
            return Ok(existing.clone());
        }

        // Step 3: expiration sweep.
        let now = Utc::now();
        let mut to_delete = Vec::new();
        index.entries.retain(|entry| match entry.expires_at {
            Some(expires_at) if expires_at <= now => {
                to_delete.push(entry.archive_path.clone());
                false
            }
            _ => true,
        });

        // Step 4 + 5: archive and upload.
        let scratch = tempfile::tempdir().map_err(CacheError::Io)?;
        let (archive_path, size_bytes) = self
            .archiver
            .create_archive(paths, scratch.path(), CompressionOptions::default())
            .await
            .map_err(CacheError::Other)?;

        let data = tokio::fs::read(&archive_path).await.map_err(CacheError::Io)?;

        // The archiver names its output generically; this crate's naming
        // contract requires `put_from_path` to see a filename that already
        // encodes the content hash (§4.1), so rename before handoff.
        let hashed_name = format!("sha256-{}.tar.zst", crate::digest::short_fingerprint(&data));
        let hashed_path = scratch.path().join(&hashed_name);
        tokio::fs::rename(&archive_path, &hashed_path).await.map_err(CacheError::Io)?;

        let location = self.blob.put_from_path(&hashed_path, data.into()).await?;

        // Step 6.
        let expires_at = self.config.ttl.map(|ttl| now + ttl);
        let new_entry = CacheEntry {
            key: key.to_string(),
            archive_path: location,
            created_at: now,
            size_bytes,
            expires_at,
            accessed_at: Some(now),
        };

        // Step 7: LRU eviction. Never evicts the entry being saved since it
        // is added to the index only after this sort runs.
        if let Some(cap) = self.config.size_cap_bytes {
            let mut projected_total = index.total_size() + size_bytes;
            if projected_total > cap {
                index.entries.sort_by_key(|e| e.lru_timestamp());
                let mut remaining = Vec::with_capacity(index.entries.len());
                for entry in index.entries.drain(..) {
                    if projected_total > cap {
                        projected_total -= entry.size_bytes;
                        to_delete.push(entry.archive_path.clone());
                    } else {
                        remaining.push(entry);
                    }
                }
                index.entries = remaining;
            }
        }

        // Step 8: add and commit conditionally.
        index.entries.push(new_entry.clone());
        if let Err(err) = self.index.save(&index).await {
            info!(
                "save('{key}') aborted after index commit failure; uploaded archive '{}' becomes an orphan for future GC",
                new_entry.archive_path
            );
            return Err(err);
        }

        // Step 9: only after a successful commit, delete evicted/expired
        // blobs. Best-effort — failures here become future GC work (§7).
        for location in to_delete {
            if let Err(err) = self.blob.delete(&location).await {
                warn!("best-effort post-commit delete of '{location}' failed, leaving an orphan: {err}");
            }
        }

        Ok(new_entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::fake::InMemoryStore;
    use chrono::Duration;
    use std::io::Write;

    fn engine_with(config: CacheConfig) -> (CacheEngine, Arc<InMemoryStore>) {
        let fake = Arc::new(InMemoryStore::new());
        let store: Arc<dyn ObjectStore> = fake.clone();
        let archiver: Arc<dyn Archiver> = Arc::new(crate::archive::TarZstdArchiver);
        (CacheEngine::new(store, config, archiver), fake)
    }

    fn sample_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("artifact.txt")).unwrap();
        file.write_all(b"built artifact").unwrap();
        dir
    }

    #[tokio::test]
    async fn fresh_save_produces_one_blob_and_one_entry() {
        let (engine, fake) = engine_with(CacheConfig::new("b", "octo", "widgets"));
        let src = sample_dir();

        let entry = engine.save("k1", &[src.path().to_path_buf()]).await.unwrap();
        assert_eq!(entry.key, "k1");
        assert!(entry.size_bytes > 0);
        assert_eq!(entry.created_at, entry.accessed_at.unwrap());
        assert!(entry.expires_at.is_none());
        assert!(fake.exists(&format!("gha-cache/octo/widgets/{}", entry.archive_path)).await);
    }

    #[tokio::test]
    async fn idempotent_save_does_not_reupload() {
        let (engine, fake) = engine_with(CacheConfig::new("b", "octo", "widgets"));
        let src = sample_dir();

        let first = engine.save("k1", &[src.path().to_path_buf()]).await.unwrap();
        let archive_key = format!("gha-cache/octo/widgets/{}", first.archive_path);
        let puts_after_first = fake.put_call_count(&archive_key);

        let second = engine.save("k1", &[src.path().to_path_buf()]).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fake.put_call_count(&archive_key), puts_after_first);
    }

    #[tokio::test]
    async fn round_trip_restore_reproduces_tree() {
        let (engine, _fake) = engine_with(CacheConfig::new("b", "octo", "widgets"));
        let src = sample_dir();
        engine.save("k1", &[src.path().to_path_buf()]).await.unwrap();

        let dest = tempfile::tempdir().unwrap();
        let entry = engine.restore("k1", dest.path()).await.unwrap();
        assert_eq!(entry.key, "k1");

        let restored_name = src.path().file_name().unwrap();
        let restored = std::fs::read_to_string(dest.path().join(restored_name).join("artifact.txt")).unwrap();
        assert_eq!(restored, "built artifact");
    }

    #[tokio::test]
    async fn restore_updates_accessed_at() {
        let (engine, _fake) = engine_with(CacheConfig::new("b", "octo", "widgets"));
        let src = sample_dir();
        let saved = engine.save("k1", &[src.path().to_path_buf()]).await.unwrap();

        let dest = tempfile::tempdir().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        engine.restore("k1", dest.path()).await.unwrap();

        let index = engine.index.load().await.unwrap();
        let updated = index.find_entry("k1").unwrap();
        assert!(updated.accessed_at.unwrap() >= saved.accessed_at.unwrap());
    }

    #[tokio::test]
    async fn restore_missing_key_is_archive_missing() {
        let (engine, _fake) = engine_with(CacheConfig::new("b", "octo", "widgets"));
        let dest = tempfile::tempdir().unwrap();
        let err = engine.restore("absent", dest.path()).await.unwrap_err();
        assert!(matches!(err, CacheError::ArchiveMissing(_)));
    }

    #[tokio::test]
    async fn expiration_sweep_removes_expired_entry_and_deletes_its_blob() {
        let config = CacheConfig::new("b", "octo", "widgets").ttl(Some(Duration::seconds(-1)));
        let (engine, fake) = engine_with(config);
        let src = sample_dir();

        let expired = engine.save("k1", &[src.path().to_path_buf()]).await.unwrap();
        let expired_key = format!("gha-cache/octo/widgets/{}", expired.archive_path);
        assert!(fake.exists(&expired_key).await);

        let src2 = sample_dir();
        engine.save("k2", &[src2.path().to_path_buf()]).await.unwrap();

        let index = engine.index.load().await.unwrap();
        assert!(index.find_entry("k1").is_none());
        assert!(index.find_entry("k2").is_some());
        assert!(!fake.exists(&expired_key).await, "expired blob must be deleted post-commit");
    }

    #[tokio::test]
    async fn crash_between_index_commit_and_blob_delete_leaves_no_dangling_reference() {
        // Invariant test #2 of §8: inject a fault after the index save and
        // before the blob delete. The index commit must already have
        // dropped the expired entry, so every entry left in the reloaded
        // index still resolves to a live blob; the undeleted expired blob
        // is a permitted orphan, not a dangling reference.
        let config = CacheConfig::new("b", "octo", "widgets").ttl(Some(Duration::seconds(-1)));
        let (engine, fake) = engine_with(config);
        let src = sample_dir();

        let expired = engine.save("k1", &[src.path().to_path_buf()]).await.unwrap();
        let expired_key = format!("gha-cache/octo/widgets/{}", expired.archive_path);
        assert!(fake.exists(&expired_key).await);

        fake.inject_delete_fault_once(&expired_key);

        let src2 = sample_dir();
        let saved = engine.save("k2", &[src2.path().to_path_buf()]).await.unwrap();

        let index = engine.index.load().await.unwrap();
        assert!(index.find_entry("k1").is_none(), "commit must drop the expired entry regardless of delete outcome");
        let k2_entry = index.find_entry("k2").unwrap();
        assert_eq!(k2_entry.archive_path, saved.archive_path);

        for entry in &index.entries {
            let key = format!("gha-cache/octo/widgets/{}", entry.archive_path);
            assert!(fake.exists(&key).await, "every referenced archivePath must resolve to a live blob");
        }

        // The expired blob's delete failed and is tolerated as an orphan —
        // it is not referenced by the index anymore, so its survival does
        // not violate the no-dangling-reference invariant.
        assert!(fake.exists(&expired_key).await, "failed post-commit delete leaves a permitted orphan blob");
    }

    #[tokio::test]
    async fn lru_eviction_respects_size_cap_and_deletes_oldest_first() {
        let config = CacheConfig::new("b", "octo", "widgets").size_cap_bytes(Some(1));
        let (engine, fake) = engine_with(config);

        let src_a = sample_dir();
        let e1 = engine.save("e1", &[src_a.path().to_path_buf()]).await.unwrap();
        let e1_key = format!("gha-cache/octo/widgets/{}", e1.archive_path);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let src_b = sample_dir();
        let e3 = engine.save("e3", &[src_b.path().to_path_buf()]).await.unwrap();

        let index = engine.index.load().await.unwrap();
        assert!(index.find_entry("e1").is_none(), "oldest entry should be evicted under a tight cap");
        assert!(index.find_entry("e3").is_some());
        assert!(!fake.exists(&e1_key).await);
        let _ = e3;
    }

    #[tokio::test]
    async fn index_contention_aborts_save_and_propagates() {
        let fake = Arc::new(InMemoryStore::new());
        let config = CacheConfig::new("b", "octo", "widgets");
        fake.inject_fault_once(&config.index_key());

        let store: Arc<dyn ObjectStore> = fake.clone();
        let archiver: Arc<dyn Archiver> = Arc::new(crate::archive::TarZstdArchiver);
        let engine = CacheEngine::new(store, config, archiver);

        let src = sample_dir();
        let err = engine.save("k1", &[src.path().to_path_buf()]).await.unwrap_err();
        assert!(err.is_transient() || matches!(err, CacheError::BackendTransient(_)));
    }
}
