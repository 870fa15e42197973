//! In-memory `ObjectStore` used by the test suite to exercise contention,
//! staleness, and two-phase publish without a live bucket.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ConcurrencyToken, Fetched, ObjectMeta, ObjectStore, Precondition, PreconditionFailed};

struct Object {
    data: Bytes,
    generation: u64,
}

#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<String, Object>>,
    /// When set, the next `put` to this key fails with a transient error
    /// exactly once, then clears itself — used to test crash-during-
    /// commit scenarios (S2 of §8).
    put_fault_once: Mutex<Option<String>>,
    /// When set, the next `delete` of this key fails with a transient
    /// error exactly once, then clears itself — used to test the crash-
    /// between-commit-and-blob-delete scenario invariant test #2 of §8
    /// requires (index already committed, post-commit blob delete fails,
    /// no dangling reference may result).
    delete_fault_once: Mutex<Option<String>>,
    put_calls: Mutex<HashMap<String, u32>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_fault_once(&self, key: &str) {
        *self.put_fault_once.lock().unwrap() = Some(key.to_string());
    }

    pub fn inject_delete_fault_once(&self, key: &str) {
        *self.delete_fault_once.lock().unwrap() = Some(key.to_string());
    }

    pub fn put_call_count(&self, key: &str) -> u32 {
        *self.put_calls.lock().unwrap().get(key).unwrap_or(&0)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Fetched> {
        let objects = self.objects.lock().unwrap();
        match objects.get(key) {
            Some(obj) => Ok(Fetched::Found {
                data: obj.data.clone(),
                meta: ObjectMeta {
                    token: ConcurrencyToken(obj.generation.to_string()),
                    size: obj.data.len() as u64,
                },
            }),
            None => Ok(Fetched::NotFound),
        }
    }

    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _content_type: &str,
        precondition: Precondition,
    ) -> anyhow::Result<ConcurrencyToken> {
        *self.put_calls.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;

        {
            let mut fault = self.put_fault_once.lock().unwrap();
            if fault.as_deref() == Some(key) {
                fault.take();
                anyhow::bail!("injected transient fault writing '{key}'");
            }
        }

        let mut objects = self.objects.lock().unwrap();
        let current = objects.get(key);

        match &precondition {
            Precondition::None => {}
            Precondition::CreateOnly => {
                if current.is_some() {
                    return Err(PreconditionFailed(key.to_string()).into());
                }
            }
            Precondition::IfMatch(token) => match current {
                None => return Err(PreconditionFailed(key.to_string()).into()),
                Some(obj) if obj.generation.to_string() != token.0 => {
                    return Err(PreconditionFailed(key.to_string()).into());
                }
                Some(_) => {}
            },
        }

        let next_generation = current.map(|o| o.generation + 1).unwrap_or(1);
        objects.insert(
            key.to_string(),
            Object {
                data,
                generation: next_generation,
            },
        );
        Ok(ConcurrencyToken(next_generation.to_string()))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        {
            let mut fault = self.delete_fault_once.lock().unwrap();
            if fault.as_deref() == Some(key) {
                fault.take();
                anyhow::bail!("injected transient fault deleting '{key}'");
            }
        }

        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    async fn size(&self, key: &str) -> u64 {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.data.len() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_only_rejects_existing_object() {
        let store = InMemoryStore::new();
        store
            .put("k", Bytes::from_static(b"a"), "application/json", Precondition::CreateOnly)
            .await
            .unwrap();

        let err = store
            .put("k", Bytes::from_static(b"b"), "application/json", Precondition::CreateOnly)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<PreconditionFailed>().is_some());
    }

    #[tokio::test]
    async fn if_match_requires_current_token() {
        let store = InMemoryStore::new();
        let t0 = store
            .put("k", Bytes::from_static(b"a"), "application/json", Precondition::CreateOnly)
            .await
            .unwrap();

        // Stale token is rejected.
        let stale = ConcurrencyToken("999".to_string());
        assert!(store
            .put("k", Bytes::from_static(b"b"), "application/json", Precondition::IfMatch(stale))
            .await
            .is_err());

        // Current token succeeds.
        assert!(store
            .put("k", Bytes::from_static(b"b"), "application/json", Precondition::IfMatch(t0))
            .await
            .is_ok());
    }
}
