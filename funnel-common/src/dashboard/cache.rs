//! Read-through cache for dashboard lists
//!
//! Entries are keyed by a query scope (`scheduled-posts`, `conversions`, ...)
//! plus the query parameters, and go stale after a fixed TTL. Mutations drop
//! every entry of the scopes they touch. Each scope carries a generation
//! number bumped on invalidation; a load that started under an older
//! generation returns its result but never stores it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::trace;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    scope: String,
    params: String,
}

struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, scope: &str) -> u64 {
        self.generations.get(scope).copied().unwrap_or(0)
    }
}

pub struct QueryCache {
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Cached value for `(scope, params)`, or the result of `load`
    ///
    /// Failed loads are not cached.
    pub async fn get_or_load<T, F, Fut>(&self, scope: &str, params: &str, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = CacheKey {
            scope: scope.to_string(),
            params: params.to_string(),
        };

        let started_under = {
            let state = self.state.read().await;
            if let Some(entry) = state.entries.get(&key) {
                if entry.stored_at.elapsed() < self.ttl {
                    trace!(scope, params, "cache hit");
                    return Ok(serde_json::from_value(entry.value.clone())?);
                }
            }
            state.generation(scope)
        };

        let fresh = load().await?;
        let value = serde_json::to_value(&fresh)?;

        let mut state = self.state.write().await;
        if state.generation(scope) != started_under {
            trace!(scope, params, "scope invalidated during load, not caching");
            return Ok(fresh);
        }
        state.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
        Ok(fresh)
    }

    /// Drop every entry of `scope`, returning how many were removed
    ///
    /// Loads already in flight for `scope` will not store their results.
    pub async fn invalidate(&self, scope: &str) -> usize {
        let mut state = self.state.write().await;
        *state.generations.entry(scope.to_string()).or_insert(0) += 1;
        let before = state.entries.len();
        state.entries.retain(|key, _| key.scope != scope);
        before - state.entries.len()
    }

    pub async fn contains(&self, scope: &str, params: &str) -> bool {
        let key = CacheKey {
            scope: scope.to_string(),
            params: params.to_string(),
        };
        self.state.read().await.entries.contains_key(&key)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
