//! Three-tier object store — `hot` (low-latency key/value), `warm` (packed blobs), `cold`
//! (archival) — behind a unified read path with an LRU in front and a location index behind.
//! The duck-typed backend interface of the distilled design becomes a bounded sum type here, per
//! the "Backend = {Hot, Warm, Cold}" design note.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::GitError;
use crate::lru::LruCache;

/// Which tier currently holds an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

/// Byte-oriented backend contract shared by all three tiers.
#[async_trait]
pub trait TierBackend: Send + Sync {
    async fn get(&self, sha: &str) -> Result<Option<Vec<u8>>, GitError>;
    async fn put(&self, sha: &str, data: &[u8]) -> Result<(), GitError>;
    async fn delete(&self, sha: &str) -> Result<(), GitError>;
    async fn list(&self) -> Result<Vec<String>, GitError>;
}

/// In-memory reference backend used for hot/warm/cold in tests and small deployments; real
/// deployments supply their own [`TierBackend`] per tier (e.g. a KV store, a packfile reader, an
/// archival blob store).
#[derive(Default)]
pub struct MemoryBackend {
    data: DashMap<String, Vec<u8>>,
}

#[async_trait]
impl TierBackend for MemoryBackend {
    async fn get(&self, sha: &str) -> Result<Option<Vec<u8>>, GitError> {
        Ok(self.data.get(sha).map(|v| v.clone()))
    }

    async fn put(&self, sha: &str, data: &[u8]) -> Result<(), GitError> {
        self.data.insert(sha.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, sha: &str) -> Result<(), GitError> {
        self.data.remove(sha);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, GitError> {
        Ok(self.data.iter().map(|e| e.key().clone()).collect())
    }
}

/// Per-object access statistics, updated on every read/write and consulted by the migration
/// engine's hot/cold classification.
#[derive(Debug, Clone, Default)]
pub struct AccessPattern {
    pub reads: u64,
    pub writes: u64,
    pub last_accessed_at_millis: i64,
    pub bytes_read: u64,
}

/// Composes the three tiers, a location index, an LRU of hot-path reads, and per-object access
/// tracking behind one read/write API.
pub struct TieredStore {
    hot: Arc<dyn TierBackend>,
    warm: Arc<dyn TierBackend>,
    cold: Arc<dyn TierBackend>,
    location_index: DashMap<String, Tier>,
    access: DashMap<String, AccessPattern>,
    lru: RwLock<LruCache<String, Vec<u8>>>,
}

impl TieredStore {
    pub fn new(
        hot: Arc<dyn TierBackend>,
        warm: Arc<dyn TierBackend>,
        cold: Arc<dyn TierBackend>,
        lru_max_count: usize,
        lru_max_bytes: usize,
    ) -> Self {
        Self {
            hot,
            warm,
            cold,
            location_index: DashMap::new(),
            access: DashMap::new(),
            lru: RwLock::new(LruCache::new(lru_max_count, lru_max_bytes, None)),
        }
    }

    fn backend(&self, tier: Tier) -> &Arc<dyn TierBackend> {
        match tier {
            Tier::Hot => &self.hot,
            Tier::Warm => &self.warm,
            Tier::Cold => &self.cold,
        }
    }

    fn record_access(&self, sha: &str, bytes: usize, is_write: bool) {
        let mut entry = self.access.entry(sha.to_string()).or_default();
        if is_write {
            entry.writes += 1;
        } else {
            entry.reads += 1;
        }
        entry.bytes_read += bytes as u64;
        entry.last_accessed_at_millis = now_millis();
    }

    /// Read `sha`, consulting the LRU first, then the tier recorded in the location index,
    /// falling through to the next tier in case of an in-flight migration.
    pub async fn get(&self, sha: &str) -> Result<Option<Vec<u8>>, GitError> {
        if let Some(cached) = self.lru.write().unwrap().get(&sha.to_string()) {
            self.record_access(sha, cached.len(), false);
            return Ok(Some(cached));
        }

        let Some(tier) = self.location_index.get(sha).map(|t| *t) else {
            return Ok(None);
        };

        for candidate in fallthrough_order(tier) {
            if let Some(data) = self.backend(candidate).get(sha).await? {
                self.record_access(sha, data.len(), false);
                self.lru
                    .write()
                    .unwrap()
                    .set(sha.to_string(), data.clone(), data.len())
                    .ok();
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    /// Writes always target `hot` and update the location index.
    pub async fn put(&self, sha: &str, data: &[u8]) -> Result<(), GitError> {
        self.hot.put(sha, data).await?;
        self.location_index.insert(sha.to_string(), Tier::Hot);
        self.record_access(sha, data.len(), true);
        self.lru
            .write()
            .unwrap()
            .set(sha.to_string(), data.to_vec(), data.len())
            .ok();
        Ok(())
    }

    pub fn tier_of(&self, sha: &str) -> Option<Tier> {
        self.location_index.get(sha).map(|t| *t)
    }

    pub fn access_pattern(&self, sha: &str) -> Option<AccessPattern> {
        self.access.get(sha).map(|e| e.clone())
    }

    pub(crate) fn location_index_snapshot(&self) -> HashMap<String, Tier> {
        self.location_index
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub(crate) fn set_tier(&self, sha: &str, tier: Tier) {
        self.location_index.insert(sha.to_string(), tier);
    }

    pub(crate) fn backend_for(&self, tier: Tier) -> Arc<dyn TierBackend> {
        self.backend(tier).clone()
    }
}

fn fallthrough_order(tier: Tier) -> Vec<Tier> {
    match tier {
        Tier::Hot => vec![Tier::Hot, Tier::Warm, Tier::Cold],
        Tier::Warm => vec![Tier::Warm, Tier::Cold],
        Tier::Cold => vec![Tier::Cold],
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
