//! Cache configuration: bucket/prefix scoping, TTL, and size cap.
//!
//! Builder shape follows the same chained-setter style as the teacher's
//! retention-policy options (`PruneOptions`): construct with [`CacheConfig::new`],
//! then set only the fields that differ from the defaults.

use std::env;

use chrono::Duration;

use crate::error::CacheError;

const DEFAULT_ROOT_PREFIX: &str = "gha-cache/";

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub bucket: String,
    pub owner: String,
    pub repo: String,
    pub root_prefix: String,
    pub ttl: Option<Duration>,
    pub size_cap_bytes: Option<u64>,
}

impl CacheConfig {
    pub fn new(bucket: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            owner: owner.into(),
            repo: repo.into(),
            root_prefix: DEFAULT_ROOT_PREFIX.to_string(),
            ttl: None,
            size_cap_bytes: None,
        }
    }

    pub fn root_prefix(mut self, value: impl Into<String>) -> Self {
        self.root_prefix = value.into();
        self
    }

    pub fn ttl(mut self, value: Option<Duration>) -> Self {
        self.ttl = value;
        self
    }

    pub fn size_cap_bytes(mut self, value: Option<u64>) -> Self {
        self.size_cap_bytes = value;
        self
    }

    /// The full key namespace an object lives under: `<root>/<owner>/<repo>/`.
    pub fn prefix(&self) -> String {
        let root = self.root_prefix.trim_end_matches('/');
        format!("{root}/{}/{}/", self.owner, self.repo)
    }

    pub fn index_key(&self) -> String {
        format!("{}index.json", self.prefix())
    }

    pub fn lock_key(&self) -> String {
        format!("{}.lock", self.prefix())
    }

    pub fn archive_key(&self, archive_path: &str) -> String {
        format!("{}{}", self.prefix(), archive_path)
    }

    /// Load from the conventional `CACHE_*` environment variables, the
    /// ambient wiring a CLI or GitHub Action needs. Required: `CACHE_BUCKET`,
    /// `CACHE_OWNER`, `CACHE_REPO`. Optional: `CACHE_ROOT_PREFIX`,
    /// `CACHE_TTL_SECONDS`, `CACHE_SIZE_CAP_BYTES`.
    pub fn from_env() -> Result<Self, CacheError> {
        let bucket = require_env("CACHE_BUCKET")?;
        let owner = require_env("CACHE_OWNER")?;
        let repo = require_env("CACHE_REPO")?;

        let mut config = CacheConfig::new(bucket, owner, repo);

        if let Ok(prefix) = env::var("CACHE_ROOT_PREFIX") {
            config = config.root_prefix(prefix);
        }

        if let Ok(raw) = env::var("CACHE_TTL_SECONDS") {
            let seconds: i64 = raw
                .parse()
                .map_err(|_| CacheError::Config(format!("CACHE_TTL_SECONDS '{raw}' is not an integer")))?;
            config = config.ttl(Some(Duration::seconds(seconds)));
        }

        if let Ok(raw) = env::var("CACHE_SIZE_CAP_BYTES") {
            let cap: u64 = raw
                .parse()
                .map_err(|_| CacheError::Config(format!("CACHE_SIZE_CAP_BYTES '{raw}' is not an integer")))?;
            config = config.size_cap_bytes(Some(cap));
        }

        Ok(config)
    }
}

fn require_env(name: &str) -> Result<String, CacheError> {
    env::var(name).map_err(|_| CacheError::Config(format!("missing required environment variable '{name}'")))
}
