//! The cache manifest: a single JSON object with optimistic-concurrency
//! semantics (§4.2).

use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::object_store::{ConcurrencyToken, Fetched, ObjectStore, Precondition};

pub const CURRENT_VERSION: &str = "2";
const LEGACY_VERSION: &str = "1";
const INDEX_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    #[serde(rename = "archivePath")]
    pub archive_path: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    #[serde(rename = "expiresAt", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "accessedAt", default, skip_serializing_if = "Option::is_none")]
    pub accessed_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// LRU ordering key: `accessedAt` falling back to `createdAt`.
    pub fn lru_timestamp(&self) -> DateTime<Utc> {
        self.accessed_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheIndex {
    pub version: String,
    pub entries: Vec<CacheEntry>,
}

impl CacheIndex {
    pub fn empty() -> Self {
        Self {
            version: CURRENT_VERSION.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn find_entry(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    /// Migrate a legacy `"1"` payload in place: `accessedAt` defaults to
    /// `createdAt` for every entry, version becomes `"2"`. In-memory only —
    /// callers decide whether/when to persist (§4.2 step 2).
    fn migrate_from_v1(mut self) -> Self {
        for entry in &mut self.entries {
            if entry.accessed_at.is_none() {
                entry.accessed_at = Some(entry.created_at);
            }
        }
        self.version = CURRENT_VERSION.to_string();
        self
    }
}

/// Raw JSON shape used only to detect the version before committing to the
/// strongly typed [`CacheIndex`], since a legacy `"1"` document may be
/// missing `accessedAt` fields a strict deserializer would otherwise want.
#[derive(Debug, Deserialize)]
struct VersionProbe {
    version: String,
}

/// Loads/saves the manifest, tracking the concurrency token captured at
/// `load` so `save` can apply it as a precondition (§4.2).
pub struct IndexStore {
    store: Arc<dyn ObjectStore>,
    config: CacheConfig,
    token: Mutex<Option<ConcurrencyToken>>,
}

impl IndexStore {
    pub fn new(store: Arc<dyn ObjectStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            token: Mutex::new(None),
        }
    }

    pub async fn load(&self) -> Result<CacheIndex> {
        let key = self.config.index_key();
        let fetched = self
            .store
            .get(&key)
            .await
            .map_err(|err| CacheError::BackendTransient(err.to_string()))?;

        let (data, token) = match fetched {
            Fetched::NotFound => {
                *self.token.lock().unwrap() = None;
                return Ok(CacheIndex::empty());
            }
            Fetched::Found { data, meta } => (data, meta.token),
        };

        let probe: Result<VersionProbe> = serde_json::from_slice(&data)
            .map_err(|err| CacheError::Other(anyhow::anyhow!("corrupt index JSON: {err}")));

        let index = match probe {
            Ok(probe) if probe.version == CURRENT_VERSION => {
                match serde_json::from_slice::<CacheIndex>(&data) {
                    Ok(index) => index,
                    Err(_) => CacheIndex::empty(),
                }
            }
            Ok(probe) if probe.version == LEGACY_VERSION => {
                match serde_json::from_slice::<CacheIndex>(&data) {
                    Ok(index) => index.migrate_from_v1(),
                    Err(_) => CacheIndex::empty(),
                }
            }
            // Unknown future version, or corrupt JSON: defensive reset
            // rather than a loud failure (§4.2 step 3, §7).
            _ => {
                debug!("index at '{key}' is unrecognized or corrupt; starting fresh");
                CacheIndex::empty()
            }
        };

        *self.token.lock().unwrap() = Some(token);
        Ok(index)
    }

    pub async fn save(&self, index: &CacheIndex) -> Result<()> {
        let key = self.config.index_key();
        let body = serde_json::to_vec_pretty(index).map_err(|err| CacheError::Other(err.into()))?;

        let precondition = match self.token.lock().unwrap().clone() {
            Some(token) => Precondition::IfMatch(token),
            None => Precondition::CreateOnly,
        };

        let result = self
            .store
            .put(&key, bytes::Bytes::from(body), INDEX_CONTENT_TYPE, precondition)
            .await;

        match result {
            Ok(new_token) => {
                *self.token.lock().unwrap() = Some(new_token);
                Ok(())
            }
            Err(err) => {
                if err.downcast_ref::<crate::object_store::PreconditionFailed>().is_some() {
                    Err(CacheError::IndexContended)
                } else {
                    Err(CacheError::BackendTransient(err.to_string()))
                }
            }
        }
    }
}
