// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! TTL-based caching of query embeddings
//!
//! Embedding a query costs a round trip to the embedding service, and users
//! repeat questions. The cache fronts that call with a bounded in-memory map
//! keyed by a digest of the normalized query text. Entries expire after a
//! fixed TTL and the map is capped at `max_size` entries, evicting the
//! oldest-inserted entry first (FIFO by insertion age, not LRU).
//!
//! Disk persistence is best-effort: a load failure or corrupt entry is
//! logged and skipped, never propagated. Cache content is never
//! authoritative — losing it only forces recomputation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::utils::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct CacheEntry {
    embedding: Vec<f32>,
    inserted_at: SystemTime,
}

/// On-disk form of a cache entry, one JSON file per key
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    embedding: Vec<f32>,
    inserted_at: DateTime<Utc>,
}

/// Cache statistics snapshot
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Entries currently in the map, expired or not
    pub total_entries: usize,
    /// Entries still within TTL
    pub valid_entries: usize,
    /// Entries past TTL but not yet swept
    pub expired_entries: usize,
    /// Configured entry cap
    pub max_size: usize,
    /// Fill ratio against `max_size`, 0-100
    pub utilization_percent: f64,
    /// Configured TTL in seconds
    pub ttl_secs: u64,
}

/// Query-embedding cache with TTL expiry and FIFO-by-age eviction
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_size: usize,
    clock: Arc<dyn Clock>,
    persist_dir: Option<PathBuf>,
}

impl EmbeddingCache {
    /// Create a cache with the system clock and no disk persistence
    ///
    /// # Arguments
    /// * `ttl_secs` - Entry lifetime in seconds
    /// * `max_size` - Maximum number of entries
    pub fn new(ttl_secs: u64, max_size: usize) -> Self {
        Self::with_clock(ttl_secs, max_size, Arc::new(SystemClock))
    }

    /// Create a cache with an injected clock (tests drive expiry with this)
    pub fn with_clock(ttl_secs: u64, max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
            max_size,
            clock,
            persist_dir: None,
        }
    }

    /// Enable best-effort disk persistence under `dir`
    ///
    /// Existing entries are loaded immediately; unreadable or corrupt files
    /// are skipped with a warning. Expired files are deleted on load.
    pub fn with_persistence(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("Failed to create cache dir {}: {}", dir.display(), e);
            return self;
        }
        self.persist_dir = Some(dir);
        self.load_from_disk();
        self
    }

    /// Digest of the normalized query: case-folded, trimmed, SHA-256 hashed.
    /// Bounds key memory and avoids storing raw query text as the key.
    fn cache_key(query: &str) -> String {
        let normalized = query.trim().to_lowercase();
        let digest = Sha256::digest(normalized.as_bytes());
        hex::encode(digest)
    }

    fn is_expired(&self, inserted_at: SystemTime, now: SystemTime) -> bool {
        now.duration_since(inserted_at)
            .map_or(false, |elapsed| elapsed >= self.ttl)
    }

    /// Get the cached embedding for a query
    ///
    /// Returns the vector iff a live entry exists. An expired entry found
    /// during lookup is evicted as a side effect and treated as a miss.
    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        let key = Self::cache_key(query);
        let now = self.clock.now();

        let mut entries = self.entries.write().ok()?;
        let found = entries
            .get(&key)
            .map(|e| (self.is_expired(e.inserted_at, now), e.embedding.clone()));
        match found {
            Some((true, _)) => {
                debug!("Cache entry expired for query: {:.50}", query);
                entries.remove(&key);
                drop(entries);
                self.remove_persisted(&key);
                None
            }
            Some((false, embedding)) => {
                debug!("Cache HIT for query: {:.50}", query);
                Some(embedding)
            }
            None => {
                debug!("Cache MISS for query: {:.50}", query);
                None
            }
        }
    }

    /// Insert or overwrite the embedding for a query
    ///
    /// At capacity, the single globally-oldest entry (by insertion
    /// timestamp) is evicted first.
    pub fn set(&self, query: &str, embedding: Vec<f32>) {
        let key = Self::cache_key(query);
        let now = self.clock.now();

        let evicted = {
            let mut entries = match self.entries.write() {
                Ok(e) => e,
                Err(_) => return,
            };

            let mut evicted = None;
            if !entries.contains_key(&key) && entries.len() >= self.max_size {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    debug!("Evicting oldest cache entry: {}", oldest);
                    entries.remove(&oldest);
                    evicted = Some(oldest);
                }
            }

            entries.insert(
                key.clone(),
                CacheEntry {
                    embedding: embedding.clone(),
                    inserted_at: now,
                },
            );
            evicted
        };

        if let Some(old_key) = evicted {
            self.remove_persisted(&old_key);
        }
        self.persist_entry(&key, &embedding, now);
    }

    /// Sweep all expired entries. Never required for correctness; lazy
    /// eviction on `get` already guarantees no expired entry is returned.
    pub fn cleanup_expired(&self) {
        let now = self.clock.now();
        let removed: Vec<String> = {
            let mut entries = match self.entries.write() {
                Ok(e) => e,
                Err(_) => return,
            };
            let expired: Vec<String> = entries
                .iter()
                .filter(|(_, e)| self.is_expired(e.inserted_at, now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                entries.remove(key);
            }
            expired
        };

        if !removed.is_empty() {
            info!("Cleaned up {} expired cache entries", removed.len());
            for key in &removed {
                self.remove_persisted(key);
            }
        }
    }

    /// Drop all entries, memory and disk
    pub fn clear(&self) {
        let keys: Vec<String> = {
            let mut entries = match self.entries.write() {
                Ok(e) => e,
                Err(_) => return,
            };
            let keys = entries.keys().cloned().collect();
            entries.clear();
            keys
        };
        for key in &keys {
            self.remove_persisted(key);
        }
        info!("Embedding cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = match self.entries.read() {
            Ok(e) => e,
            Err(_) => {
                return CacheStats {
                    total_entries: 0,
                    valid_entries: 0,
                    expired_entries: 0,
                    max_size: self.max_size,
                    utilization_percent: 0.0,
                    ttl_secs: self.ttl.as_secs(),
                }
            }
        };

        let total = entries.len();
        let valid = entries
            .values()
            .filter(|e| !self.is_expired(e.inserted_at, now))
            .count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
            max_size: self.max_size,
            utilization_percent: if self.max_size > 0 {
                (total as f64 / self.max_size as f64) * 100.0
            } else {
                0.0
            },
            ttl_secs: self.ttl.as_secs(),
        }
    }

    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{key}.json"))
    }

    fn persist_entry(&self, key: &str, embedding: &[f32], inserted_at: SystemTime) {
        let Some(dir) = &self.persist_dir else {
            return;
        };
        let persisted = PersistedEntry {
            embedding: embedding.to_vec(),
            inserted_at: DateTime::<Utc>::from(inserted_at),
        };
        let path = Self::entry_path(dir, key);
        let result = serde_json::to_vec(&persisted)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(anyhow::Error::from));
        if let Err(e) = result {
            warn!("Failed to persist cache entry {}: {}", key, e);
        }
    }

    fn remove_persisted(&self, key: &str) {
        let Some(dir) = &self.persist_dir else {
            return;
        };
        let path = Self::entry_path(dir, key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to delete cache file {}: {}", path.display(), e);
            }
        }
    }

    fn load_from_disk(&self) {
        let Some(dir) = &self.persist_dir else {
            return;
        };
        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                warn!("Failed to read cache dir {}: {}", dir.display(), e);
                return;
            }
        };

        let now = self.clock.now();
        let mut loaded = 0usize;
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };

            let parsed: Result<PersistedEntry, anyhow::Error> = std::fs::read(&path)
                .map_err(anyhow::Error::from)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(anyhow::Error::from));

            match parsed {
                Ok(persisted) => {
                    let inserted_at = SystemTime::from(persisted.inserted_at);
                    if self.is_expired(inserted_at, now) {
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                    if let Ok(mut entries) = self.entries.write() {
                        if entries.len() >= self.max_size {
                            break;
                        }
                        entries.insert(
                            key,
                            CacheEntry {
                                embedding: persisted.embedding,
                                inserted_at,
                            },
                        );
                        loaded += 1;
                    }
                }
                Err(e) => {
                    warn!("Skipping unreadable cache file {}: {}", path.display(), e);
                }
            }
        }

        if loaded > 0 {
            info!("Loaded {} cached embeddings from disk", loaded);
        }
    }
}
