//! Store access with provider failures routed through an error handler.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{CacheError, InvocationError, LoadError, Result, StoreError};
use crate::key::CacheKey;
use crate::store::Cache;

/// Decides what happens when a cache provider fails.
///
/// Returning `Ok(())` swallows the failure and the engine carries on as if
/// the operation had no effect (a failed get is a miss). Returning `Err`
/// aborts the call with [`CacheError::Store`].
pub trait CacheErrorHandler: Send + Sync + fmt::Debug {
    /// A lookup failed.
    fn handle_get_error(
        &self,
        error: StoreError,
        cache: &dyn Cache,
        key: &CacheKey,
    ) -> std::result::Result<(), StoreError>;

    /// A store failed.
    fn handle_put_error(
        &self,
        error: StoreError,
        cache: &dyn Cache,
        key: &CacheKey,
        value: &Value,
    ) -> std::result::Result<(), StoreError>;

    /// An eviction failed.
    fn handle_evict_error(
        &self,
        error: StoreError,
        cache: &dyn Cache,
        key: &CacheKey,
    ) -> std::result::Result<(), StoreError>;

    /// A clear failed.
    fn handle_clear_error(
        &self,
        error: StoreError,
        cache: &dyn Cache,
    ) -> std::result::Result<(), StoreError>;
}

/// Escalates every provider failure. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagatingErrorHandler;

impl CacheErrorHandler for PropagatingErrorHandler {
    fn handle_get_error(
        &self,
        error: StoreError,
        _cache: &dyn Cache,
        _key: &CacheKey,
    ) -> std::result::Result<(), StoreError> {
        Err(error)
    }

    fn handle_put_error(
        &self,
        error: StoreError,
        _cache: &dyn Cache,
        _key: &CacheKey,
        _value: &Value,
    ) -> std::result::Result<(), StoreError> {
        Err(error)
    }

    fn handle_evict_error(
        &self,
        error: StoreError,
        _cache: &dyn Cache,
        _key: &CacheKey,
    ) -> std::result::Result<(), StoreError> {
        Err(error)
    }

    fn handle_clear_error(
        &self,
        error: StoreError,
        _cache: &dyn Cache,
    ) -> std::result::Result<(), StoreError> {
        Err(error)
    }
}

/// Logs provider failures at `warn` and swallows them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

impl CacheErrorHandler for LoggingErrorHandler {
    fn handle_get_error(
        &self,
        error: StoreError,
        cache: &dyn Cache,
        key: &CacheKey,
    ) -> std::result::Result<(), StoreError> {
        tracing::warn!(cache = cache.name(), %key, %error, "cache get failed, treating as miss");
        Ok(())
    }

    fn handle_put_error(
        &self,
        error: StoreError,
        cache: &dyn Cache,
        key: &CacheKey,
        _value: &Value,
    ) -> std::result::Result<(), StoreError> {
        tracing::warn!(cache = cache.name(), %key, %error, "cache put failed");
        Ok(())
    }

    fn handle_evict_error(
        &self,
        error: StoreError,
        cache: &dyn Cache,
        key: &CacheKey,
    ) -> std::result::Result<(), StoreError> {
        tracing::warn!(cache = cache.name(), %key, %error, "cache evict failed");
        Ok(())
    }

    fn handle_clear_error(
        &self,
        error: StoreError,
        cache: &dyn Cache,
    ) -> std::result::Result<(), StoreError> {
        tracing::warn!(cache = cache.name(), %error, "cache clear failed");
        Ok(())
    }
}

/// Performs store operations on behalf of the engine.
#[derive(Debug, Clone)]
pub struct CacheInvoker {
    error_handler: Arc<dyn CacheErrorHandler>,
}

impl Default for CacheInvoker {
    fn default() -> Self {
        Self::new(Arc::new(PropagatingErrorHandler))
    }
}

impl CacheInvoker {
    /// Invoker reporting failures to `error_handler`.
    pub fn new(error_handler: Arc<dyn CacheErrorHandler>) -> Self {
        Self { error_handler }
    }

    /// The configured error handler.
    #[must_use]
    pub fn error_handler(&self) -> &Arc<dyn CacheErrorHandler> {
        &self.error_handler
    }

    /// Look up `key`; a swallowed failure reads as a miss.
    pub async fn do_get(&self, cache: &dyn Cache, key: &CacheKey) -> Result<Option<Value>> {
        match cache.get(key).await {
            Ok(found) => Ok(found),
            Err(error) => {
                self.error_handler.handle_get_error(error, cache, key)?;
                Ok(None)
            }
        }
    }

    /// Store `value` under `key`.
    pub async fn do_put(&self, cache: &dyn Cache, key: &CacheKey, value: Value) -> Result<()> {
        if let Err(error) = cache.put(key, value.clone()).await {
            self.error_handler
                .handle_put_error(error, cache, key, &value)?;
        }
        Ok(())
    }

    /// Remove `key`, immediately when `immediate` is set.
    pub async fn do_evict(&self, cache: &dyn Cache, key: &CacheKey, immediate: bool) -> Result<()> {
        let outcome = if immediate {
            cache.evict_if_present(key).await.map(|_| ())
        } else {
            cache.evict(key).await
        };
        if let Err(error) = outcome {
            self.error_handler.handle_evict_error(error, cache, key)?;
        }
        Ok(())
    }

    /// Remove every entry, immediately when `immediate` is set.
    pub async fn do_clear(&self, cache: &dyn Cache, immediate: bool) -> Result<()> {
        let outcome = if immediate {
            cache.invalidate().await.map(|_| ())
        } else {
            cache.clear().await
        };
        if let Err(error) = outcome {
            self.error_handler.handle_clear_error(error, cache)?;
        }
        Ok(())
    }

    /// Return the entry for `key` or compute and store it, single-flight.
    ///
    /// If the store fails and the handler swallows the failure, the result
    /// comes from `compute` without being stored: the value computed inside
    /// the store if there is one, otherwise a fresh run of `compute`.
    pub async fn do_get_or_load<F, Fut>(
        &self,
        cache: &dyn Cache,
        key: &CacheKey,
        compute: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Value, InvocationError>> + Send,
    {
        let pending = Mutex::new(Some(compute));
        let computed: Mutex<Option<Value>> = Mutex::new(None);

        let loader = async {
            let compute = pending.lock().take();
            let Some(compute) = compute else {
                return Err(InvocationError::new("value loader polled twice"));
            };
            let value = compute().await?;
            *computed.lock() = Some(value.clone());
            Ok(value)
        };

        let error = match cache.get_or_load(key, Box::pin(loader)).await {
            Ok(value) => return Ok(value),
            Err(LoadError::Invocation(error)) => return Err(error.into()),
            Err(LoadError::Store(error)) => error,
        };

        self.error_handler
            .handle_get_error(error.clone(), cache, key)?;

        if let Some(value) = computed.lock().take() {
            return Ok(value);
        }
        let compute = pending.lock().take();
        match compute {
            Some(compute) => {
                tracing::debug!(cache = cache.name(), %key, "computing without the store");
                Ok(compute().await?)
            }
            // The loader started but left no value behind.
            None => Err(CacheError::Store(error)),
        }
    }
}
