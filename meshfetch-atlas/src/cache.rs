// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Response cache
//!
//! Remote responses are memoized by request URL. The client only depends on
//! the [`ResponseCache`] trait; the backend is injected.
//!
//! ## Disk layout
//!
//! ```text
//! <cache_dir>/<sha256(key) hex>.json
//!   {"version": 1, "key": "<request url>", "value": <response json>}
//! ```
//!
//! Expiry uses the file modification time. Writes go through a temporary
//! sibling and an atomic rename, so concurrent readers never see partial
//! entries.

use crate::error::Result;
use async_trait::async_trait;
use meshfetch_core::error_chain;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Envelope version written by this build
pub const CACHE_VERSION: u32 = 1;

/// Default maximum age of a cached response
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Response cache collaborator
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Cached value for `key`, unless missing or older than `max_age`.
    async fn lookup(&self, key: &str, max_age: Duration) -> Option<Value>;

    /// Store `value` under `key`.
    async fn insert(&self, key: &str, value: &Value) -> Result<()>;
}

impl dyn ResponseCache {
    /// Return the cached value, or run `producer` and cache its result.
    ///
    /// Producer errors are returned as is and nothing is cached. A failure
    /// to store the value is logged and the value is still returned.
    pub async fn get<F, Fut>(&self, key: &str, producer: F, max_age: Duration) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value>> + Send,
    {
        if let Some(value) = self.lookup(key, max_age).await {
            tracing::debug!("Cache hit: {}", key);
            return Ok(value);
        }

        tracing::debug!("Cache miss: {}", key);
        let value = producer().await?;
        if let Err(e) = self.insert(key, &value).await {
            tracing::warn!("Failed to cache {}: {}", key, error_chain(&e));
        }
        Ok(value)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    key: String,
    value: Value,
}

/// One JSON file per key in a cache directory
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Cache in the platform cache directory (`~/.cache/meshfetch` on Linux)
    pub fn open_default() -> Result<Self> {
        let dir = Self::default_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no platform cache directory")
        })?;
        Self::new(dir)
    }

    pub fn default_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("meshfetch"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hash_key(key)))
    }

    /// Remove every entry; returns how many were removed.
    pub async fn flush(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        tracing::info!("Flushed {} cached responses from {:?}", removed, self.dir);
        Ok(removed)
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::debug!("Failed to remove stale cache entry {:?}: {}", path, e);
        }
    }
}

#[async_trait]
impl ResponseCache for DiskCache {
    async fn lookup(&self, key: &str, max_age: Duration) -> Option<Value> {
        let path = self.entry_path(key);
        let modified = tokio::fs::metadata(&path).await.ok()?.modified().ok()?;
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age > max_age {
            self.discard(&path).await;
            return None;
        }

        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice::<Envelope>(&bytes) {
            Ok(envelope) if envelope.version == CACHE_VERSION && envelope.key == key => {
                Some(envelope.value)
            }
            Ok(envelope) => {
                tracing::debug!("Ignoring cache entry {:?} (version {})", path, envelope.version);
                self.discard(&path).await;
                None
            }
            Err(e) => {
                tracing::debug!("Ignoring unreadable cache entry {:?}: {}", path, e);
                self.discard(&path).await;
                None
            }
        }
    }

    async fn insert(&self, key: &str, value: &Value) -> Result<()> {
        let envelope = Envelope {
            version: CACHE_VERSION,
            key: key.to_string(),
            value: value.clone(),
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let path = self.entry_path(key);
        let tmp = self
            .dir
            .join(format!(".{}.{:016x}.tmp", hash_key(key), rand::random::<u64>()));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// In-process cache, for tests and one-shot runs
#[derive(Clone)]
pub struct MemoryCache {
    entries: Cache<String, (Instant, Value)>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: Cache::new(max_entries),
        }
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn lookup(&self, key: &str, max_age: Duration) -> Option<Value> {
        let (stored_at, value) = self.entries.get(key)?;
        if stored_at.elapsed() > max_age {
            self.entries.invalidate(key);
            return None;
        }
        Some(value)
    }

    async fn insert(&self, key: &str, value: &Value) -> Result<()> {
        self.entries
            .insert(key.to_string(), (Instant::now(), value.clone()));
        Ok(())
    }
}

/// Never caches
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

#[async_trait]
impl ResponseCache for NoCache {
    async fn lookup(&self, _key: &str, _max_age: Duration) -> Option<Value> {
        None
    }

    async fn insert(&self, _key: &str, _value: &Value) -> Result<()> {
        Ok(())
    }
}

fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
