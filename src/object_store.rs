//! The conditional-write contract every blob backend must provide.
//!
//! The Index Store and Lock Manager are written once against this trait and
//! never touch an SDK directly; the S3 and GCS adapters (`object_store::s3`,
//! `object_store::gcs`) are the only places that translate `Precondition`
//! into `If-Match`/`If-None-Match` headers or GCS generation parameters.

use async_trait::async_trait;
use bytes::Bytes;

#[cfg(feature = "gcs")]
pub mod gcs;
#[cfg(feature = "s3")]
pub mod s3;
#[cfg(test)]
pub mod fake;

/// Opaque per-object version identifier: an S3 ETag or a GCS generation
/// number rendered as a string. Never parsed by callers above this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyToken(pub String);

/// The precondition to apply to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// No precondition; overwrite unconditionally. Used only for the lock
    /// object's stale-reclaim overwrite (§4.3 step 4) — never for the index.
    None,
    /// Succeed only if the object does not currently exist
    /// (`if-none-match: *` / `if-generation-match: 0`).
    CreateOnly,
    /// Succeed only if the object's current token matches
    /// (`if-match: <etag>` / `if-generation-match: <n>`).
    IfMatch(ConcurrencyToken),
}

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub token: ConcurrencyToken,
    pub size: u64,
}

/// Result of a fetch that distinguishes "absent" from a transport error,
/// since several callers (index load, lock read, `exists`) need to react to
/// "not found" without treating it as failure.
pub enum Fetched {
    Found { data: Bytes, meta: ObjectMeta },
    NotFound,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's full body by key (already namespaced by the
    /// caller — this trait does no prefixing of its own).
    async fn get(&self, key: &str) -> anyhow::Result<Fetched>;

    /// Write `data` under `key` honoring `precondition`. Returns the new
    /// concurrency token on success. Implementations must report precondition
    /// failure via [`PreconditionFailed`] so callers can distinguish it from
    /// other transport errors without string-matching twice.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        precondition: Precondition,
    ) -> anyhow::Result<ConcurrencyToken>;

    /// Idempotent delete; must not fail when the object is already absent.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Best-effort existence check. Returns `false` on any error, including
    /// transient ones — callers must not use `false` as an authoritative
    /// absence signal for checks that matter (§4.1).
    async fn exists(&self, key: &str) -> bool;

    /// Reported object size, or 0 when the backend does not expose it.
    async fn size(&self, key: &str) -> u64;
}

/// Marker error an `ObjectStore::put` implementation should wrap its
/// transport error in (or match against) to signal that a precondition was
/// not met — HTTP 412, or an error message containing `conditionNotMet` /
/// `Precondition Failed`.
#[derive(Debug, thiserror::Error)]
#[error("precondition not met for '{0}'")]
pub struct PreconditionFailed(pub String);

/// Heuristic shared by both adapters: recognize a precondition failure from
/// a transport error's status code or message, since SDKs differ in whether
/// they expose a typed variant for it.
pub fn looks_like_precondition_failure(status: Option<u16>, message: &str) -> bool {
    if status == Some(412) {
        return true;
    }
    message.contains("conditionNotMet") || message.contains("Precondition Failed")
}
