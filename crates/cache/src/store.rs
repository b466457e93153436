//! Cache store collaborator traits.
//!
//! The engine never talks to a store directly; all access goes through
//! [`CacheInvoker`](crate::invoker::CacheInvoker) so provider failures can be
//! routed to the configured error handler.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{InvocationError, LoadError, StoreError};
use crate::key::CacheKey;

/// Computes the value for a missing entry in [`Cache::get_or_load`].
pub type ValueLoader<'a> = BoxFuture<'a, Result<Value, InvocationError>>;

/// A named cache.
///
/// Stored as `Arc<dyn Cache>` and shared across concurrent calls.
#[async_trait]
pub trait Cache: Send + Sync + fmt::Debug {
    /// Cache name.
    fn name(&self) -> &str;

    /// Look up an entry. `Ok(None)` is a miss; a stored `Value::Null` is a hit.
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, StoreError>;

    /// Store an entry, replacing any previous value.
    async fn put(&self, key: &CacheKey, value: Value) -> Result<(), StoreError>;

    /// Remove an entry, possibly asynchronously or deferred.
    async fn evict(&self, key: &CacheKey) -> Result<(), StoreError>;

    /// Remove an entry immediately, reporting whether it was present.
    ///
    /// The default delegates to [`evict`](Self::evict) and reports `false`.
    async fn evict_if_present(&self, key: &CacheKey) -> Result<bool, StoreError> {
        self.evict(key).await.map(|()| false)
    }

    /// Remove all entries, possibly asynchronously or deferred.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Remove all entries immediately, reporting whether any were present.
    ///
    /// The default delegates to [`clear`](Self::clear) and reports `false`.
    async fn invalidate(&self) -> Result<bool, StoreError> {
        self.clear().await.map(|()| false)
    }

    /// Return the entry for `key`, or run `loader` and store its value.
    ///
    /// Concurrent calls for the same key must run at most one loader; the
    /// others wait for it and observe its value or its failure.
    async fn get_or_load(&self, key: &CacheKey, loader: ValueLoader<'_>) -> Result<Value, LoadError>;
}

/// Looks up caches by name.
pub trait CacheManager: Send + Sync + fmt::Debug {
    /// The cache named `name`, if the manager has or can create one.
    fn cache(&self, name: &str) -> Option<Arc<dyn Cache>>;

    /// Names of the caches currently known to the manager.
    fn cache_names(&self) -> Vec<String>;
}
