//! This crate implements the shared-state coordination layer for a
//! content-addressed build-artifact cache backed by remote object storage
//! (S3-compatible services and Google Cloud Storage).
//!
//! Workflow steps request a restore by key and later save a directory tree
//! under that key; the cache deduplicates, compresses, and shares artifacts
//! across CI runs. Archive creation/extraction, key resolution from workflow
//! inputs, and CLI wiring live outside this crate — see [`archive::Archiver`]
//! for the boundary.
//!
//! # Components
//!
//! - [`blob`] — content-addressed PUT/GET/DELETE/HEAD of opaque archives.
//! - [`index`] — the single-object JSON manifest, with optimistic
//!   concurrency enforced through [`object_store::Precondition`].
//! - [`lock`] — cross-process mutual exclusion rooted at a sentinel object,
//!   with stale-lock reclamation.
//! - [`engine`] — orchestrates `save`/`restore`: archive handoff, eviction,
//!   expiration, and access-time bookkeeping.
//!
//! # Concurrency model
//!
//! One CI job drives one [`engine::CacheEngine`] per process; multiple
//! concurrent processes (CI runners) contend through the lock and the
//! index's conditional write. The lock is not a true mutex — see
//! [`lock`]'s module docs — so the index's optimistic-concurrency check is
//! the backstop that actually decides who wins on contention.
//!
//! # Garbage collection
//!
//! There is no separate GC pass in this crate. Expired and evicted entries
//! are detected and their blobs deleted inline during [`engine::CacheEngine::save`],
//! strictly after the index commit that drops their references (two-phase
//! publish, §4.4 step 9 of the design spec). A crash between commit and
//! delete leaves an orphan blob, never a dangling index reference; orphan
//! cleanup beyond that point is out of scope for this crate.

pub mod archive;
pub mod blob;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod index;
pub mod lock;
pub mod object_store;

pub use archive::{Archiver, CompressionOptions, TarZstdArchiver};
pub use blob::BlobBackend;
pub use config::CacheConfig;
pub use engine::CacheEngine;
pub use error::{CacheError, Result};
pub use index::{CacheEntry, CacheIndex};
pub use lock::{LockGuard, LockManager, LockRecord};
pub use object_store::ObjectStore;
