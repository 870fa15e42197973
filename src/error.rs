//! Error taxonomy for the cache coordination layer.
//!
//! Kinds mirror the propagation policy: callers match on [`CacheError`] when
//! they need to react (contention, staleness, missing archive); everything
//! else collapses into `Other` the way `TapeLockError` wraps `anyhow::Error`
//! for the catch-all case.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Lock retry budget exhausted (§4.3). The save aborts; user-visible.
    #[error("failed to acquire lock after {attempts} attempts")]
    LockUnavailable { attempts: u32 },

    /// A conditional index write lost the race (§4.2 step 3).
    #[error("index write contended: concurrency token no longer current")]
    IndexContended,

    /// A blob referenced by the index is absent at restore time.
    #[error("archive missing at '{0}'")]
    ArchiveMissing(String),

    /// Network/5xx errors surfaced as-is from a store adapter.
    #[error("backend error: {0}")]
    BackendTransient(String),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CacheError {
    /// True when the caller should treat this as worth a bounded retry at a
    /// layer above the one that raised it (e.g. the CLI retrying a whole
    /// `save`). The Lock Manager and Index Store do not retry internally
    /// past their own documented budgets.
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::BackendTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
