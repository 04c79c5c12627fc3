//! Durable cache tier.
//!
//! The durable tier outlives the process so warm analysis results survive a
//! restart. [`DurableStore`] is the storage seam; [`JsonFileStore`] is the
//! production implementation, one JSON file per entry under a cache
//! directory.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::{DispatchError, DispatchResult};

/// One cached analysis result together with the provenance needed for
/// expiry and invalidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Full cache key the entry is stored under.
    pub key: String,
    /// Opaque cached payload.
    pub value: Value,
    /// Creation time, used for TTL expiry across restarts.
    pub created_at: DateTime<Utc>,
    /// Analyzer that produced the value.
    pub analyzer_tag: String,
    /// Source file the value was computed from.
    pub source_path: String,
}

impl CacheEntry {
    /// Creates an entry stamped with the current wall-clock time.
    pub fn new(
        key: impl Into<String>,
        value: Value,
        analyzer_tag: impl Into<String>,
        source_path: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: Utc::now(),
            analyzer_tag: analyzer_tag.into(),
            source_path: source_path.into(),
        }
    }

    /// Whether the entry has outlived `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.created_at);
        match age.to_std() {
            Ok(age) => age > ttl,
            // A future-dated entry (clock skew) counts as fresh.
            Err(_) => false,
        }
    }
}

/// Storage seam for the durable tier.
///
/// Implementations must tolerate concurrent calls from multiple tasks.
/// Missing entries are reported as `Ok(None)` / no-op removals rather than
/// errors; only real storage trouble surfaces as `Err`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Loads the entry stored under `key`, if any.
    async fn load(&self, key: &str) -> DispatchResult<Option<CacheEntry>>;

    /// Persists an entry, replacing any previous version.
    async fn persist(&self, entry: &CacheEntry) -> DispatchResult<()>;

    /// Removes the entry under `key`. Removing a missing entry succeeds.
    async fn remove(&self, key: &str) -> DispatchResult<()>;

    /// Lists every key currently stored.
    async fn keys(&self) -> DispatchResult<Vec<String>>;

    /// Removes every entry.
    async fn clear(&self) -> DispatchResult<()>;
}

/// Durable tier backed by one JSON file per entry.
///
/// Files are named by the SHA-256 of the key; the full key lives inside the
/// entry so pattern invalidation can match the original key text. Writes go
/// through a temporary file and a rename, so a concurrent load never
/// observes a half-written entry. Single-process use is assumed; there is no
/// cross-process locking.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Opens the store, creating `dir` if it does not exist.
    pub async fn open(dir: impl Into<PathBuf>) -> DispatchResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DispatchError::CacheUnavailable {
                message: format!("cannot create cache directory {}: {}", dir.display(), e),
            })?;
        Ok(Self { dir })
    }

    /// Directory the store writes into.
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn load(&self, key: &str) -> DispatchResult<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                // Drop the unreadable file so the corruption is reported once,
                // not on every lookup.
                let _ = tokio::fs::remove_file(&path).await;
                Err(DispatchError::CacheCorruption {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn persist(&self, entry: &CacheEntry) -> DispatchResult<()> {
        let path = self.path_for(&entry.key);
        let bytes = serde_json::to_vec_pretty(entry)?;
        let tmp = path.with_extension(format!("tmp{}", rand::random::<u32>()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> DispatchResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> DispatchResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(dirent) = dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // File names are hashes; the key has to come from the entry body.
            if let Ok(bytes) = tokio::fs::read(&path).await {
                if let Ok(entry) = serde_json::from_slice::<CacheEntry>(&bytes) {
                    keys.push(entry.key);
                }
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> DispatchResult<()> {
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(dirent) = dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        Ok(())
    }
}
