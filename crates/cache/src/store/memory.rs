//! In-memory cache store backed by `moka`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache as MokaStore;
use serde_json::Value;

use super::{Cache, CacheManager, ValueLoader};
use crate::config::InMemoryCacheConfig;
use crate::error::{LoadError, Result as CacheResult, StoreError};
use crate::key::CacheKey;

/// A named in-memory cache with hit/miss tracking.
///
/// [`get_or_load`](Cache::get_or_load) relies on moka's coalescing loader,
/// so concurrent callers for one key share a single computation.
pub struct MokaCache {
    name: String,
    store: MokaStore<CacheKey, Value>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MokaCache {
    /// Create a cache from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero capacity or zero duration.
    pub fn new(name: impl Into<String>, config: &InMemoryCacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self::build(name, config))
    }

    fn build(name: impl Into<String>, config: &InMemoryCacheConfig) -> Self {
        let mut builder = MokaStore::builder().max_capacity(config.max_capacity);

        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }

        if let Some(idle) = config.time_to_idle {
            builder = builder.time_to_idle(idle);
        }

        Self {
            name: name.into(),
            store: builder.build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.store.entry_count(),
        }
    }

    /// Flush pending maintenance so `stats().size` is exact.
    pub async fn sync(&self) {
        self.store.run_pending_tasks().await;
    }

    fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for MokaCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MokaCache")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl Cache for MokaCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, StoreError> {
        let value = self.store.get(key).await;
        self.record(value.is_some());
        Ok(value)
    }

    async fn put(&self, key: &CacheKey, value: Value) -> Result<(), StoreError> {
        self.store.insert(key.clone(), value).await;
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.store.invalidate(key).await;
        Ok(())
    }

    async fn evict_if_present(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self.store.remove(key).await.is_some())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.store.invalidate_all();
        Ok(())
    }

    async fn invalidate(&self) -> Result<bool, StoreError> {
        let had_entries = self.store.iter().next().is_some();
        self.store.invalidate_all();
        self.store.run_pending_tasks().await;
        Ok(had_entries)
    }

    async fn get_or_load(&self, key: &CacheKey, loader: ValueLoader<'_>) -> Result<Value, LoadError> {
        let entry = self
            .store
            .entry(key.clone())
            .or_try_insert_with(loader)
            .await
            .map_err(|e| LoadError::Invocation((*e).clone()))?;
        self.record(!entry.is_fresh());
        Ok(entry.into_value())
    }
}

/// Cache performance statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Total cache hits.
    pub hits: u64,
    /// Total cache misses.
    pub misses: u64,
    /// Approximate number of entries.
    pub size: u64,
}

impl CacheStats {
    /// Hit rate in `0.0..=1.0`; `0.0` before any request.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A [`CacheManager`] of [`MokaCache`]s.
///
/// In fixed mode only the caches named at construction exist; in dynamic
/// mode any requested name is created on first use.
pub struct InMemoryCacheManager {
    caches: DashMap<String, Arc<MokaCache>>,
    config: InMemoryCacheConfig,
    dynamic: bool,
}

impl InMemoryCacheManager {
    /// A manager that creates caches on demand.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn dynamic(config: InMemoryCacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self {
            caches: DashMap::new(),
            config,
            dynamic: true,
        })
    }

    /// A manager restricted to the given cache names.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn fixed<I, S>(names: I, config: InMemoryCacheConfig) -> CacheResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        config.validate()?;
        let caches = DashMap::new();
        for name in names {
            let name = name.into();
            let cache = Arc::new(MokaCache::build(name.clone(), &config));
            caches.insert(name, cache);
        }
        Ok(Self {
            caches,
            config,
            dynamic: false,
        })
    }

    /// The concrete cache, for inspection.
    pub fn moka_cache(&self, name: &str) -> Option<Arc<MokaCache>> {
        if let Some(existing) = self.caches.get(name) {
            return Some(Arc::clone(existing.value()));
        }
        if !self.dynamic {
            return None;
        }
        let cache = self
            .caches
            .entry(name.to_owned())
            .or_insert_with(|| {
                tracing::debug!(cache = name, "created in-memory cache");
                Arc::new(MokaCache::build(name, &self.config))
            })
            .value()
            .clone();
        Some(cache)
    }
}

impl fmt::Debug for InMemoryCacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryCacheManager")
            .field("caches", &self.cache_names())
            .field("dynamic", &self.dynamic)
            .finish()
    }
}

impl CacheManager for InMemoryCacheManager {
    fn cache(&self, name: &str) -> Option<Arc<dyn Cache>> {
        self.moka_cache(name).map(|c| c as Arc<dyn Cache>)
    }

    fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }
}
