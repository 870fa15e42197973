//! Cross-process mutual exclusion over a sentinel object (§4.3).
//!
//! Not a true mutex — see the module-level note on stale reclaim below —
//! the Index Store's optimistic-concurrency check is the second line of
//! defense per invariant 4 in the data model.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::object_store::{Fetched, ObjectStore, Precondition};

const MAX_ATTEMPTS: u32 = 10;
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_millis(5000);
const STALE_THRESHOLD_MS: i64 = 30_000;
const LOCK_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockRecord {
    #[serde(rename = "lockId")]
    pub lock_id: String,
    pub timestamp: i64,
}

impl LockRecord {
    fn new_for(process_id: u32) -> Self {
        let epoch_ms = now_millis();
        let random: u32 = rand::thread_rng().gen();
        Self {
            lock_id: format!("{epoch_ms}-{process_id}-{random:08x}"),
            timestamp: epoch_ms,
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Per-caller acquisition state, tracked only for diagnostics/logging — the
/// control flow itself is a plain retry loop, not a reified state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Idle,
    Acquiring,
    Held,
    Releasing,
    Failed,
}

/// RAII handle for a held lock. Callers should call [`LockGuard::release`]
/// explicitly on the happy path; a guard dropped without releasing (a
/// cancelled or panicking holder) still gets a best-effort release attempt
/// spawned onto the ambient runtime (§5: "the lock release is best-effort
/// and must still run on abnormal exit paths"), falling back to the
/// staleness window only if no runtime is reachable to run it on.
pub struct LockGuard {
    lock_id: String,
    store: Arc<dyn ObjectStore>,
    lock_key: String,
    released: bool,
}

impl LockGuard {
    pub async fn release(mut self) {
        self.released = true;
        release_if_owned(&self.store, &self.lock_key, &self.lock_id).await;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = self.store.clone();
        let lock_key = self.lock_key.clone();
        let lock_id = self.lock_id.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    "lock guard for '{lock_key}' dropped without explicit release; spawning best-effort release"
                );
                handle.spawn(async move {
                    release_if_owned(&store, &lock_key, &lock_id).await;
                });
            }
            Err(_) => {
                warn!(
                    "lock guard for '{lock_key}' dropped without explicit release and no runtime is reachable to release it on; relying on staleness reclaim"
                );
            }
        }
    }
}

pub struct LockManager {
    store: Arc<dyn ObjectStore>,
    config: CacheConfig,
    process_id: u32,
}

impl LockManager {
    pub fn new(store: Arc<dyn ObjectStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            process_id: std::process::id(),
        }
    }

    /// Acquire the lock, bounded by [`MAX_ATTEMPTS`] with geometric backoff
    /// (§4.3). Returns a [`LockGuard`] on success.
    pub async fn acquire(&self) -> Result<LockGuard> {
        let key = self.config.lock_key();
        let mut backoff = INITIAL_BACKOFF;
        let mut state = LockState::Acquiring;
        debug!("acquiring lock '{key}' state={state:?}");

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_acquire_once(&key).await {
                Ok(Some(lock_id)) => {
                    state = LockState::Held;
                    debug!("lock '{key}' acquired on attempt {attempt} state={state:?}");
                    return Ok(LockGuard {
                        lock_id,
                        store: self.store.clone(),
                        lock_key: key,
                        released: false,
                    });
                }
                Ok(None) => {
                    debug!("lock '{key}' held by another writer, retrying (attempt {attempt})");
                }
                Err(err) => {
                    warn!("transient error acquiring lock '{key}': {err} (attempt {attempt})");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        state = LockState::Failed;
        debug!("lock '{key}' acquisition failed state={state:?}");
        Err(CacheError::LockUnavailable { attempts: MAX_ATTEMPTS })
    }

    /// One attempt of the algorithm in §4.3. `Ok(Some(lock_id))` means we
    /// now own the lock; `Ok(None)` means contended, retry; `Err` is
    /// transient and also retried by the caller.
    async fn try_acquire_once(&self, key: &str) -> anyhow::Result<Option<String>> {
        let fetched = self.store.get(key).await?;

        match fetched {
            Fetched::NotFound => {
                let record = LockRecord::new_for(self.process_id);
                let body = serde_json::to_vec(&record)?;
                match self
                    .store
                    .put(key, Bytes::from(body), LOCK_CONTENT_TYPE, Precondition::CreateOnly)
                    .await
                {
                    Ok(_) => Ok(Some(record.lock_id)),
                    Err(err) if is_precondition_failure(&err) => Ok(None),
                    Err(err) => Err(err),
                }
            }
            Fetched::Found { data, .. } => {
                let record: LockRecord = match serde_json::from_slice(&data) {
                    Ok(record) => record,
                    Err(_) => {
                        // Corrupt lock record: treat like a stale one so a
                        // wedged writer cannot deadlock every future caller.
                        return Ok(self.reclaim_stale(key).await?);
                    }
                };

                let age_ms = now_millis() - record.timestamp;
                if age_ms <= STALE_THRESHOLD_MS {
                    Ok(None)
                } else {
                    self.reclaim_stale(key).await
                }
            }
        }
    }

    /// Unconditional overwrite with a fresh record, then read back to
    /// confirm we, not a racing reclaimer, won (§4.3 step 4).
    async fn reclaim_stale(&self, key: &str) -> anyhow::Result<Option<String>> {
        let record = LockRecord::new_for(self.process_id);
        let body = serde_json::to_vec(&record)?;
        self.store
            .put(key, Bytes::from(body), LOCK_CONTENT_TYPE, Precondition::None)
            .await?;

        match self.store.get(key).await? {
            Fetched::Found { data, .. } => {
                let read_back: LockRecord = serde_json::from_slice(&data)?;
                if read_back.lock_id == record.lock_id {
                    Ok(Some(record.lock_id))
                } else {
                    Ok(None)
                }
            }
            Fetched::NotFound => Ok(None),
        }
    }
}

async fn release_if_owned(store: &Arc<dyn ObjectStore>, key: &str, lock_id: &str) {
    let current = match store.get(key).await {
        Ok(Fetched::Found { data, .. }) => serde_json::from_slice::<LockRecord>(&data).ok(),
        _ => None,
    };

    if let Some(record) = current {
        if record.lock_id == lock_id {
            if let Err(err) = store.delete(key).await {
                warn!("best-effort lock release for '{key}' failed, relying on staleness reclaim: {err}");
            }
        }
    }
}

fn is_precondition_failure(err: &anyhow::Error) -> bool {
    err.downcast_ref::<crate::object_store::PreconditionFailed>().is_some()
}
