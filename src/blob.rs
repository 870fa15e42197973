//! Content-addressed blob storage (§4.1).
//!
//! A thin layer over [`ObjectStore`]: namespacing, hashing, and the
//! single-shot/multipart size threshold live here; transport lives in the
//! adapter the caller picked.

use std::sync::Arc;

use bytes::Bytes;
use log::debug;

use crate::config::CacheConfig;
use crate::digest::{archive_location_for, archive_location_from_filename};
use crate::error::{CacheError, Result};
use crate::object_store::{Fetched, ObjectStore, Precondition};

/// Archives at or under this size use a single-shot PUT; larger ones use
/// the store's resumable/multipart path (§4.1). The in-memory `ObjectStore`
/// trait does not distinguish the two at this layer — a real SDK-backed
/// adapter chooses internally, e.g. `aws-sdk-s3`'s managed uploader — but
/// the threshold is evaluated here so callers and tests can observe it.
pub const MULTIPART_THRESHOLD_BYTES: usize = 5 * 1024 * 1024;

pub const ARCHIVE_CONTENT_TYPE: &str = "application/zstd";

pub struct BlobBackend {
    store: Arc<dyn ObjectStore>,
    config: CacheConfig,
}

impl BlobBackend {
    pub fn new(store: Arc<dyn ObjectStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    fn uses_multipart(len: usize) -> bool {
        len > MULTIPART_THRESHOLD_BYTES
    }

    /// Hash `data`, upload it, and return its relative `archivePath`.
    pub async fn put(&self, data: Bytes) -> Result<String> {
        let location = archive_location_for(&data);
        let key = self.config.archive_key(&location);
        let multipart = Self::uses_multipart(data.len());
        debug!("blob put {location} ({} bytes, multipart={multipart})", data.len());

        self.store
            .put(&key, data, ARCHIVE_CONTENT_TYPE, Precondition::None)
            .await
            .map_err(|err| CacheError::BackendTransient(err.to_string()))?;

        Ok(location)
    }

    /// Upload a locally produced archive whose filename already encodes the
    /// hash; reused verbatim, no re-hashing (§4.1).
    pub async fn put_from_path(&self, local_path: &std::path::Path, data: Bytes) -> Result<String> {
        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CacheError::Other(anyhow::anyhow!("archive path '{}' has no filename", local_path.display())))?;

        let location = archive_location_from_filename(filename).map_err(CacheError::Other)?;
        let key = self.config.archive_key(&location);
        let multipart = Self::uses_multipart(data.len());
        debug!("blob put_from_path {location} ({} bytes, multipart={multipart})", data.len());

        self.store
            .put(&key, data, ARCHIVE_CONTENT_TYPE, Precondition::None)
            .await
            .map_err(|err| CacheError::BackendTransient(err.to_string()))?;

        Ok(location)
    }

    pub async fn get(&self, location: &str) -> Result<Bytes> {
        let key = self.config.archive_key(location);
        match self.store.get(&key).await.map_err(|err| CacheError::BackendTransient(err.to_string()))? {
            Fetched::Found { data, .. } => Ok(data),
            Fetched::NotFound => Err(CacheError::ArchiveMissing(location.to_string())),
        }
    }

    /// Streaming fetch. The `ObjectStore` trait deals in whole bodies, so
    /// this wraps `get`'s bytes in a single-chunk stream; adapters that can
    /// stream natively (e.g. an S3 `ByteStream`) may bypass `BlobBackend`
    /// and consume `ObjectStore` directly where that matters.
    pub async fn get_stream(
        &self,
        location: &str,
    ) -> Result<impl futures::Stream<Item = std::io::Result<Bytes>>> {
        let data = self.get(location).await?;
        Ok(futures::stream::once(async move { Ok(data) }))
    }

    pub async fn delete(&self, location: &str) -> Result<()> {
        let key = self.config.archive_key(location);
        self.store
            .delete(&key)
            .await
            .map_err(|err| CacheError::BackendTransient(err.to_string()))
    }

    pub async fn exists(&self, location: &str) -> bool {
        self.store.exists(&self.config.archive_key(location)).await
    }

    pub async fn get_size(&self, location: &str) -> u64 {
        self.store.size(&self.config.archive_key(location)).await
    }
}
