//! Memoization of remote results.
//!
//! Keys combine the endpoint name, a revision digest of the endpoint's
//! URL, token, status and last update, and a digest of the SQL. Any change
//! to the endpoint therefore misses the old entries.
//!
//! Each endpoint also has a generation that invalidation bumps. A result
//! fetched under an older generation is discarded instead of cached.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use duckgate_core::{ComputeEndpoint, ResultCacheConfig};
use sha2::{Digest, Sha256};

use crate::result::ExecutionResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub endpoint: String,
    pub revision: String,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(endpoint: &ComputeEndpoint, sql: &str) -> Self {
        Self {
            endpoint: endpoint.name.clone(),
            revision: endpoint_revision(endpoint),
            fingerprint: sql_fingerprint(sql),
        }
    }
}

/// Digest of everything about an endpoint that changes where or how a
/// query runs.
pub fn endpoint_revision(endpoint: &ComputeEndpoint) -> String {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.url.as_bytes());
    hasher.update([0u8]);
    hasher.update(endpoint.auth_token.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(endpoint.status.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(endpoint.updated_at.to_rfc3339().as_bytes());
    hex(&hasher.finalize())
}

pub fn sql_fingerprint(sql: &str) -> String {
    hex(&Sha256::digest(sql.as_bytes()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

struct CachedResult {
    result: ExecutionResult,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CachedResult>,
    generations: HashMap<String, u64>,
}

/// Bounded, time-limited cache of remote execution results.
pub struct RemoteResultCache {
    state: RwLock<CacheState>,
    ttl: Duration,
    max_entries: usize,
}

impl RemoteResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
            max_entries,
        }
    }

    /// `None` when caching is disabled.
    pub fn from_config(config: &ResultCacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(Duration::from_secs(config.ttl_secs), config.max_entries))
    }

    // The cache only affects latency, so a poisoned lock is recovered.
    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &CacheKey) -> Option<ExecutionResult> {
        {
            let state = self.read();
            match state.entries.get(key) {
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                    return Some(entry.result.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        self.write().entries.remove(key);
        None
    }

    /// Current generation of one endpoint. Capture it before dispatching
    /// and pass it to [`insert_if_current`](Self::insert_if_current).
    pub fn generation(&self, endpoint_name: &str) -> u64 {
        self.read()
            .generations
            .get(endpoint_name)
            .copied()
            .unwrap_or_default()
    }

    pub fn insert(&self, key: CacheKey, result: ExecutionResult) {
        let mut state = self.write();
        self.store(&mut state, key, result);
    }

    /// Insert unless the endpoint was invalidated since `generation` was
    /// read. Returns whether the result was stored.
    pub fn insert_if_current(&self, key: CacheKey, result: ExecutionResult, generation: u64) -> bool {
        let mut state = self.write();
        let current = state.generations.get(&key.endpoint).copied().unwrap_or_default();
        if current != generation {
            return false;
        }
        self.store(&mut state, key, result)
    }

    fn store(&self, state: &mut CacheState, key: CacheKey, result: ExecutionResult) -> bool {
        if self.max_entries == 0 {
            return false;
        }
        let ttl = self.ttl;
        let entries = &mut state.entries;
        entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
        entries.insert(
            key,
            CachedResult {
                result,
                inserted_at: Instant::now(),
            },
        );
        true
    }

    /// Drop every entry of one endpoint and bump its generation. Returns
    /// the number of entries removed.
    pub fn invalidate_endpoint(&self, endpoint_name: &str) -> usize {
        let mut state = self.write();
        *state.generations.entry(endpoint_name.to_string()).or_default() += 1;
        let before = state.entries.len();
        state.entries.retain(|k, _| k.endpoint != endpoint_name);
        before - state.entries.len()
    }

    pub fn invalidate_all(&self) {
        let mut state = self.write();
        let names: Vec<String> = state.entries.keys().map(|k| k.endpoint.clone()).collect();
        for name in names {
            state.generations.entry(name).or_default();
        }
        for generation in state.generations.values_mut() {
            *generation += 1;
        }
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckgate_core::EndpointStatus;
    use serde_json::json;
    use std::sync::Arc;

    fn result(v: i64) -> ExecutionResult {
        ExecutionResult::new(vec!["v".into()], vec![vec![json!(v)]])
    }

    fn endpoint() -> ComputeEndpoint {
        ComputeEndpoint::remote("gpu", "grpc://10.0.0.1:50051", Some("t".into()))
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = RemoteResultCache::new(Duration::from_secs(60), 10);
        let ep = endpoint();
        let key = CacheKey::new(&ep, "SELECT 1");
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), result(1));
        assert_eq!(cache.get(&key), Some(result(1)));
        assert!(cache.get(&CacheKey::new(&ep, "SELECT 2")).is_none());
    }

    #[test]
    fn test_revision_changes_with_endpoint() {
        let ep = endpoint();
        let mut inactive = ep.clone();
        inactive.status = EndpointStatus::Inactive;
        let mut moved = ep.clone();
        moved.url = "grpc://10.0.0.2:50051".into();

        let rev = endpoint_revision(&ep);
        assert_ne!(rev, endpoint_revision(&inactive));
        assert_ne!(rev, endpoint_revision(&moved));
        assert_eq!(rev, endpoint_revision(&ep.clone()));
    }

    #[test]
    fn test_expiry() {
        let cache = RemoteResultCache::new(Duration::from_millis(1), 10);
        let key = CacheKey::new(&endpoint(), "SELECT 1");
        cache.insert(key.clone(), result(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = RemoteResultCache::new(Duration::from_secs(60), 2);
        let ep = endpoint();
        let a = CacheKey::new(&ep, "SELECT 1");
        let b = CacheKey::new(&ep, "SELECT 2");
        let c = CacheKey::new(&ep, "SELECT 3");
        cache.insert(a.clone(), result(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(b.clone(), result(2));
        cache.insert(c.clone(), result(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_invalidate_endpoint() {
        let cache = RemoteResultCache::new(Duration::from_secs(60), 10);
        let ep = endpoint();
        let other = ComputeEndpoint::remote("cpu", "grpc://10.0.0.3:50051", None);
        cache.insert(CacheKey::new(&ep, "SELECT 1"), result(1));
        cache.insert(CacheKey::new(&other, "SELECT 1"), result(1));

        assert_eq!(cache.invalidate_endpoint("gpu"), 1);
        assert_eq!(cache.len(), 1);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_generation_not_cached() {
        let cache = RemoteResultCache::new(Duration::from_secs(60), 10);
        let ep = endpoint();
        let key = CacheKey::new(&ep, "SELECT 1");

        let before = cache.generation("gpu");
        cache.invalidate_endpoint("gpu");
        assert!(!cache.insert_if_current(key.clone(), result(1), before));
        assert!(cache.get(&key).is_none());

        let now = cache.generation("gpu");
        assert!(cache.insert_if_current(key.clone(), result(2), now));
        assert_eq!(cache.get(&key), Some(result(2)));

        cache.invalidate_all();
        assert_ne!(cache.generation("gpu"), now);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_access() {
        let cache = Arc::new(RemoteResultCache::new(Duration::from_secs(60), 64));
        let endpoints = [
            ComputeEndpoint::remote("gpu", "grpc://10.0.0.1:50051", None),
            ComputeEndpoint::remote("cpu", "grpc://10.0.0.2:50051", None),
        ];

        let mut tasks = Vec::new();
        for worker in 0..8i64 {
            let cache = cache.clone();
            let endpoints = endpoints.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500i64 {
                    let ep = &endpoints[(i % 2) as usize];
                    let sql = format!("SELECT {}", (worker * 31 + i) % 100);
                    let key = CacheKey::new(ep, &sql);
                    let generation = cache.generation(&ep.name);
                    cache.insert_if_current(key.clone(), result(i), generation);
                    if let Some(hit) = cache.get(&key) {
                        assert_eq!(hit.columns, vec!["v"]);
                        assert_eq!(hit.row_count, 1);
                    }
                    if i % 97 == 0 {
                        cache.invalidate_endpoint(&ep.name);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(cache.len() <= 64);
        cache.invalidate_endpoint("gpu");
        cache.invalidate_endpoint("cpu");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(RemoteResultCache::from_config(&ResultCacheConfig::default()).is_none());
    }
}
