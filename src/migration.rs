//! Migration engine that moves objects between tiers of a [`TieredStore`], tracking per-SHA
//! locks, pending writes that arrive mid-migration, and job history with rollback on failure.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::GitError;
use crate::tiered_store::{Tier, TieredStore};

/// Lifecycle state of one migration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    RolledBack,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct MigrationJob {
    pub id: Uuid,
    pub sha: String,
    pub source: Tier,
    pub target: Tier,
    pub state: MigrationState,
    pub progress: MigrationProgress,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Thresholds driving which hot objects are candidates for migration out of `hot`.
#[derive(Debug, Clone)]
pub struct MigrationPolicy {
    pub max_age_in_hot: Duration,
    pub min_access_count: u64,
    pub max_hot_size: u64,
    pub lock_timeout: Duration,
    pub verify_checksum: bool,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            max_age_in_hot: Duration::from_secs(24 * 3600),
            min_access_count: 2,
            max_hot_size: 1 << 30,
            lock_timeout: Duration::from_secs(5),
            verify_checksum: true,
        }
    }
}

/// Runs migrations against a [`TieredStore`], keyed per-SHA locks, and replays pending writes
/// queued during an in-flight migration.
pub struct MigrationEngine {
    store: Arc<TieredStore>,
    policy: MigrationPolicy,
    locks: DashMap<String, ()>,
    pending_writes: DashMap<String, Vec<Vec<u8>>>,
    history: DashMap<String, Vec<MigrationJob>>,
}

impl MigrationEngine {
    pub fn new(store: Arc<TieredStore>, policy: MigrationPolicy) -> Self {
        Self {
            store,
            policy,
            locks: DashMap::new(),
            pending_writes: DashMap::new(),
            history: DashMap::new(),
        }
    }

    pub fn history_for(&self, sha: &str) -> Vec<MigrationJob> {
        self.history.get(sha).map(|v| v.clone()).unwrap_or_default()
    }

    /// Queue a write that arrived for `sha` while it is mid-migration; replayed once the
    /// migration completes.
    pub fn queue_pending_write(&self, sha: &str, data: Vec<u8>) {
        self.pending_writes.entry(sha.to_string()).or_default().push(data);
    }

    async fn acquire_lock(&self, sha: &str) -> Result<(), GitError> {
        let deadline = tokio::time::Instant::now() + self.policy.lock_timeout;
        loop {
            if self.locks.insert(sha.to_string(), ()).is_none() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(GitError::LockTimeout(sha.to_string()));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn release_lock(&self, sha: &str) {
        self.locks.remove(sha);
    }

    /// Migrate one object from `source` to `target`, following the seven-step protocol:
    /// acquire lock, read source, write target, optionally verify checksum, update the index,
    /// delete from source, release lock. Any failure after the write triggers rollback.
    pub async fn migrate(&self, sha: &str, source: Tier, target: Tier) -> MigrationJob {
        let started_at = Utc::now();
        let mut job = MigrationJob {
            id: Uuid::new_v4(),
            sha: sha.to_string(),
            source,
            target,
            state: MigrationState::Pending,
            progress: MigrationProgress::default(),
            started_at,
            completed_at: None,
        };

        if let Err(e) = self.acquire_lock(sha).await {
            job.state = MigrationState::Failed;
            job.completed_at = Some(Utc::now());
            tracing::warn!(sha, error = %e, "migration lock acquisition failed");
            self.record(job.clone());
            return job;
        }

        job.state = MigrationState::InProgress;
        let result = self.run_migration(sha, source, target, &mut job).await;
        self.release_lock(sha);

        match result {
            Ok(()) => {
                job.state = MigrationState::Completed;
                self.replay_pending_writes(sha).await;
            }
            Err(e) => {
                tracing::warn!(sha, error = %e, "migration failed, rolled back");
                job.state = MigrationState::RolledBack;
            }
        }
        job.completed_at = Some(Utc::now());
        self.record(job.clone());
        job
    }

    async fn run_migration(
        &self,
        sha: &str,
        source: Tier,
        target: Tier,
        job: &mut MigrationJob,
    ) -> Result<(), GitError> {
        let source_backend = self.store.backend_for(source);
        let target_backend = self.store.backend_for(target);

        let data = source_backend
            .get(sha)
            .await?
            .ok_or_else(|| GitError::TieredObjectNotFound(sha.to_string()))?;
        job.progress.total_bytes = data.len() as u64;

        if self.store.tier_of(sha) == Some(target) {
            return Err(GitError::AlreadyInTarget(sha.to_string()));
        }

        let checksum_before = self.policy.verify_checksum.then(|| checksum(&data));

        target_backend
            .put(sha, &data)
            .await
            .map_err(|e| GitError::MigrationWriteFailed(sha.to_string(), e.to_string()))?;
        job.progress.bytes_transferred = data.len() as u64;

        if let Some(before) = checksum_before {
            let reread = target_backend.get(sha).await?;
            let matches = reread.as_ref().map(|d| checksum(d)) == Some(before);
            if !matches {
                let _ = target_backend.delete(sha).await;
                return Err(GitError::MigrationChecksumMismatch(sha.to_string()));
            }
        }

        self.store.set_tier(sha, target);
        source_backend
            .delete(sha)
            .await
            .map_err(|_| GitError::MigrationUpdateFailed(sha.to_string()))?;

        Ok(())
    }

    async fn replay_pending_writes(&self, sha: &str) {
        if let Some((_, writes)) = self.pending_writes.remove(sha) {
            for data in writes {
                let _ = self.store.put(sha, &data).await;
            }
        }
    }

    fn record(&self, job: MigrationJob) {
        self.history.entry(job.sha.clone()).or_default().push(job);
    }

    /// Run up to `concurrency` migrations in parallel; a per-object failure does not abort the
    /// rest of the batch.
    pub async fn migrate_batch(
        &self,
        candidates: Vec<(String, Tier, Tier)>,
        concurrency: usize,
    ) -> Vec<MigrationJob> {
        stream::iter(candidates)
            .map(|(sha, source, target)| async move { self.migrate(&sha, source, target).await })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }
}

fn checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiered_store::MemoryBackend;

    fn engine() -> (Arc<TieredStore>, MigrationEngine) {
        let store = Arc::new(TieredStore::new(
            Arc::new(MemoryBackend::default()),
            Arc::new(MemoryBackend::default()),
            Arc::new(MemoryBackend::default()),
            100,
            1_000_000,
        ));
        let engine = MigrationEngine::new(store.clone(), MigrationPolicy::default());
        (store, engine)
    }

    #[tokio::test]
    async fn successful_migration_updates_index_and_preserves_bytes() {
        let (store, engine) = engine();
        store.put("sha1", b"payload").await.unwrap();
        let job = engine.migrate("sha1", Tier::Hot, Tier::Warm).await;
        assert_eq!(job.state, MigrationState::Completed);
        assert_eq!(store.tier_of("sha1"), Some(Tier::Warm));
        assert_eq!(store.get("sha1").await.unwrap(), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn missing_object_rolls_back() {
        let (_store, engine) = engine();
        let job = engine.migrate("missing", Tier::Hot, Tier::Warm).await;
        assert_eq!(job.state, MigrationState::RolledBack);
    }

    #[tokio::test]
    async fn batch_migration_tolerates_individual_failures() {
        let (store, engine) = engine();
        store.put("ok1", b"a").await.unwrap();
        store.put("ok2", b"b").await.unwrap();
        let jobs = engine
            .migrate_batch(
                vec![
                    ("ok1".to_string(), Tier::Hot, Tier::Warm),
                    ("missing".to_string(), Tier::Hot, Tier::Warm),
                    ("ok2".to_string(), Tier::Hot, Tier::Warm),
                ],
                2,
            )
            .await;
        let completed = jobs.iter().filter(|j| j.state == MigrationState::Completed).count();
        let rolled_back = jobs.iter().filter(|j| j.state == MigrationState::RolledBack).count();
        assert_eq!(completed, 2);
        assert_eq!(rolled_back, 1);
    }

    #[tokio::test]
    async fn history_is_retained_per_sha() {
        let (store, engine) = engine();
        store.put("sha2", b"data").await.unwrap();
        engine.migrate("sha2", Tier::Hot, Tier::Warm).await;
        assert_eq!(engine.history_for("sha2").len(), 1);
    }
}
