//! Cache resolution: which concrete caches a directive acts on.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::directive::Directive;
use crate::error::{CacheError, Result};
use crate::method::MethodId;
use crate::store::{Cache, CacheManager};

/// What a [`CacheResolver`] sees of one directive applied to one call.
#[derive(Debug, Clone, Copy)]
pub struct CacheInvocationContext<'a> {
    directive: &'a Directive,
    method: &'a MethodId,
    target: &'a Value,
    args: &'a [Value],
}

impl<'a> CacheInvocationContext<'a> {
    /// Describe `directive` applied to a call.
    pub fn new(
        directive: &'a Directive,
        method: &'a MethodId,
        target: &'a Value,
        args: &'a [Value],
    ) -> Self {
        Self {
            directive,
            method,
            target,
            args,
        }
    }

    /// The directive being applied.
    #[must_use]
    pub fn directive(&self) -> &'a Directive {
        self.directive
    }

    /// The invoked method.
    #[must_use]
    pub fn method(&self) -> &'a MethodId {
        self.method
    }

    /// The target instance.
    #[must_use]
    pub fn target(&self) -> &'a Value {
        self.target
    }

    /// Arguments after variadic flattening.
    #[must_use]
    pub fn args(&self) -> &'a [Value] {
        self.args
    }
}

/// Resolves the caches a directive acts on for a given call.
pub trait CacheResolver: Send + Sync + fmt::Debug {
    /// Resolve caches in order. Implementations may return an empty list;
    /// the engine rejects that as a configuration error.
    fn resolve(&self, context: &CacheInvocationContext<'_>) -> Result<Vec<Arc<dyn Cache>>>;
}

/// Resolves the directive's cache names through a [`CacheManager`].
#[derive(Debug, Clone)]
pub struct SimpleCacheResolver {
    manager: Arc<dyn CacheManager>,
}

impl SimpleCacheResolver {
    /// Resolve through `manager`.
    pub fn new(manager: Arc<dyn CacheManager>) -> Self {
        Self { manager }
    }

    fn lookup(&self, name: &str, context: &CacheInvocationContext<'_>) -> Result<Arc<dyn Cache>> {
        self.manager.cache(name).ok_or_else(|| {
            CacheError::configuration(format!(
                "cannot find cache named '{name}' for {}",
                context.directive()
            ))
        })
    }
}

impl CacheResolver for SimpleCacheResolver {
    fn resolve(&self, context: &CacheInvocationContext<'_>) -> Result<Vec<Arc<dyn Cache>>> {
        context
            .directive()
            .cache_names()
            .iter()
            .map(|name| self.lookup(name, context))
            .collect()
    }
}

/// Resolves a fixed list of cache names, ignoring the directive's own.
#[derive(Debug, Clone)]
pub struct NamedCacheResolver {
    inner: SimpleCacheResolver,
    names: Vec<String>,
}

impl NamedCacheResolver {
    /// Always resolve `names` through `manager`.
    pub fn new<I, S>(manager: Arc<dyn CacheManager>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: SimpleCacheResolver::new(manager),
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl CacheResolver for NamedCacheResolver {
    fn resolve(&self, context: &CacheInvocationContext<'_>) -> Result<Vec<Arc<dyn Cache>>> {
        self.names
            .iter()
            .map(|name| self.inner.lookup(name, context))
            .collect()
    }
}
