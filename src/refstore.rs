//! Authoritative ref store: `refName -> (target, kind)` with per-ref compare-and-swap, prefix
//! listing, symbolic-ref resolution, a ref-update callback, and an eventually-consistent
//! read-replica projection file.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::errors::GitError;

pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";
const DEFAULT_MAX_DEPTH: u32 = 10;

/// A ref's target: either a direct 40-hex SHA, or the name of another ref to follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Direct(String),
    Symbolic(String),
}

#[derive(Debug, Clone)]
pub struct RefEntry {
    pub name: String,
    pub target: RefTarget,
}

/// Ref-update listener; fired once per committed CAS with `(name, old_target, new_target)`.
pub type RefUpdateListener = Arc<dyn Fn(&str, Option<&str>, Option<&str>) + Send + Sync>;

/// Projection line written to the read-replica file after each mutation.
#[derive(Serialize, Deserialize)]
struct ProjectionLine {
    name: String,
    target: String,
    kind: &'static str,
    synced_at: String,
}

/// Transactional key/value ref store. The authoritative copy lives in `entries`; a projection is
/// written asynchronously to `projection_path` after each mutation and is never read back by the
/// core (it exists purely for external read replicas).
pub struct RefStore {
    entries: DashMap<String, RefEntry>,
    write_lock: Mutex<()>,
    listeners: RwLock<Vec<RefUpdateListener>>,
    projection_path: Option<PathBuf>,
}

impl RefStore {
    pub fn new(projection_path: Option<PathBuf>) -> Self {
        Self {
            entries: DashMap::new(),
            write_lock: Mutex::new(()),
            listeners: RwLock::new(Vec::new()),
            projection_path,
        }
    }

    pub fn get(&self, name: &str) -> Option<RefEntry> {
        self.entries.get(name).map(|e| e.clone())
    }

    pub fn list(&self, prefix: &str) -> Vec<RefEntry> {
        self.entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.value().clone())
            .collect()
    }

    pub async fn on_ref_update(&self, listener: RefUpdateListener) {
        self.listeners.write().await.push(listener);
    }

    /// Compare-and-swap `name`'s target. `expected_old = None` requires the ref be absent;
    /// otherwise the stored direct/symbolic target must equal `expected_old` byte-for-byte.
    pub async fn cas_update(
        &self,
        name: &str,
        expected_old: Option<&str>,
        new: RefTarget,
    ) -> Result<(), GitError> {
        let _guard = self.write_lock.lock().await;

        let current = self.entries.get(name).map(|e| e.target.clone());
        let current_str = current.as_ref().map(target_to_string);

        match (expected_old, &current) {
            (None, Some(_)) => {
                return Err(GitError::Conflict(
                    name.to_string(),
                    "<absent>".to_string(),
                    current_str.unwrap_or_default(),
                ));
            }
            (Some(expected), existing) => {
                let actual = existing.as_ref().map(target_to_string).unwrap_or_default();
                if actual != expected {
                    return Err(GitError::Conflict(
                        name.to_string(),
                        expected.to_string(),
                        actual,
                    ));
                }
            }
            (None, None) => {}
        }

        self.entries.insert(
            name.to_string(),
            RefEntry {
                name: name.to_string(),
                target: new.clone(),
            },
        );

        self.write_projection(name, &new).await;

        let new_str = target_to_string(&new);
        for listener in self.listeners.read().await.iter() {
            listener(name, current_str.as_deref(), Some(&new_str));
        }

        Ok(())
    }

    pub async fn delete(&self, name: &str, expected_old: Option<&str>) -> Result<(), GitError> {
        let _guard = self.write_lock.lock().await;

        let current = self.entries.get(name).map(|e| e.target.clone());
        if let Some(expected) = expected_old {
            let actual = current.as_ref().map(target_to_string).unwrap_or_default();
            if actual != expected {
                return Err(GitError::Conflict(name.to_string(), expected.to_string(), actual));
            }
        }

        self.entries.remove(name);

        for listener in self.listeners.read().await.iter() {
            listener(name, current.as_ref().map(target_to_string).as_deref(), None);
        }

        Ok(())
    }

    /// Follow a symbolic chain up to `max_depth`, returning the full chain of names visited and
    /// the terminal direct SHA.
    pub fn resolve(&self, name: &str, max_depth: u32) -> Result<(Vec<String>, String), GitError> {
        let max_depth = if max_depth == 0 { DEFAULT_MAX_DEPTH } else { max_depth };
        let mut chain = Vec::new();
        let mut current = name.to_string();

        for _ in 0..=max_depth {
            if chain.contains(&current) {
                return Err(GitError::CircularRef(name.to_string()));
            }
            chain.push(current.clone());

            match self.entries.get(&current).map(|e| e.target.clone()) {
                Some(RefTarget::Direct(sha)) => return Ok((chain, sha)),
                Some(RefTarget::Symbolic(next)) => current = next,
                None => {
                    return Err(GitError::ObjectNotFound(format!(
                        "ref `{current}` does not exist"
                    )));
                }
            }
        }

        Err(GitError::MaxDepthExceeded(name.to_string()))
    }

    async fn write_projection(&self, name: &str, target: &RefTarget) {
        let Some(path) = &self.projection_path else {
            return;
        };
        let (target_str, kind) = match target {
            RefTarget::Direct(sha) => (sha.clone(), "direct"),
            RefTarget::Symbolic(r) => (r.clone(), "symbolic"),
        };
        let line = ProjectionLine {
            name: name.to_string(),
            target: target_str,
            kind,
            synced_at: Utc::now().to_rfc3339(),
        };
        let Ok(json) = serde_json::to_string(&line) else {
            return;
        };
        if let Ok(mut file) = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            let _ = file.write_all(json.as_bytes()).await;
            let _ = file.write_all(b"\n").await;
        }
    }
}

fn target_to_string(target: &RefTarget) -> String {
    match target {
        RefTarget::Direct(sha) => sha.clone(),
        RefTarget::Symbolic(name) => format!("ref: {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn create_requires_absent_ref() {
        let store = RefStore::new(None);
        store
            .cas_update("refs/heads/main", None, RefTarget::Direct("a".repeat(40)))
            .await
            .unwrap();
        let err = store
            .cas_update("refs/heads/main", None, RefTarget::Direct("b".repeat(40)))
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Conflict(_, _, _)));
    }

    #[tokio::test]
    async fn cas_update_succeeds_with_matching_old() {
        let store = RefStore::new(None);
        let sha_a = "a".repeat(40);
        let sha_b = "b".repeat(40);
        store
            .cas_update("refs/heads/main", None, RefTarget::Direct(sha_a.clone()))
            .await
            .unwrap();
        store
            .cas_update("refs/heads/main", Some(&sha_a), RefTarget::Direct(sha_b.clone()))
            .await
            .unwrap();
        assert_eq!(store.get("refs/heads/main").unwrap().target, RefTarget::Direct(sha_b));
    }

    #[tokio::test]
    async fn concurrent_cas_only_one_succeeds() {
        let store = Arc::new(RefStore::new(None));
        let sha_a = "a".repeat(40);
        store
            .cas_update("refs/heads/main", None, RefTarget::Direct(sha_a.clone()))
            .await
            .unwrap();

        let successes = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let store = store.clone();
            let sha_a = sha_a.clone();
            let successes = successes.clone();
            handles.push(tokio::spawn(async move {
                let new_sha = format!("{:040x}", i);
                if store
                    .cas_update("refs/heads/main", Some(&sha_a), RefTarget::Direct(new_sha))
                    .await
                    .is_ok()
                {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_follows_symbolic_chain() {
        let store = RefStore::new(None);
        let sha = "c".repeat(40);
        store
            .cas_update("refs/heads/main", None, RefTarget::Direct(sha.clone()))
            .await
            .unwrap();
        store
            .cas_update("HEAD", None, RefTarget::Symbolic("refs/heads/main".to_string()))
            .await
            .unwrap();
        let (chain, resolved) = store.resolve("HEAD", 10).unwrap();
        assert_eq!(chain, vec!["HEAD".to_string(), "refs/heads/main".to_string()]);
        assert_eq!(resolved, sha);
    }

    #[tokio::test]
    async fn resolve_detects_cycle() {
        let store = RefStore::new(None);
        store
            .cas_update("refs/heads/a", None, RefTarget::Symbolic("refs/heads/b".to_string()))
            .await
            .unwrap();
        store
            .cas_update("refs/heads/b", None, RefTarget::Symbolic("refs/heads/a".to_string()))
            .await
            .unwrap();
        assert!(matches!(store.resolve("refs/heads/a", 10), Err(GitError::CircularRef(_))));
    }

    #[tokio::test]
    async fn listener_fires_once_on_commit() {
        let store = RefStore::new(None);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        store
            .on_ref_update(Arc::new(move |_, _, _| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
        store
            .cas_update("refs/heads/main", None, RefTarget::Direct("d".repeat(40)))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = RefStore::new(None);
        store
            .cas_update("refs/heads/main", None, RefTarget::Direct("e".repeat(40)))
            .await
            .unwrap();
        store
            .cas_update("refs/tags/v1", None, RefTarget::Direct("f".repeat(40)))
            .await
            .unwrap();
        assert_eq!(store.list("refs/heads/").len(), 1);
        assert_eq!(store.list("refs/").len(), 2);
    }
}
