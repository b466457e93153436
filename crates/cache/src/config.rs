//! Engine and store configuration, plus the named-collaborator table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::key::KeyGenerator;
use crate::resolver::CacheResolver;
use crate::store::CacheManager;

/// Engine-wide behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Only public methods carry directives; others resolve to none.
    pub public_methods_only: bool,
}

/// Settings for the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryCacheConfig {
    /// Maximum number of entries per cache.
    pub max_capacity: u64,
    /// Expire entries this long after insertion.
    #[serde(with = "humantime_serde")]
    pub time_to_live: Option<Duration>,
    /// Expire entries this long after last access.
    #[serde(with = "humantime_serde")]
    pub time_to_idle: Option<Duration>,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            time_to_live: None,
            time_to_idle: None,
        }
    }
}

impl InMemoryCacheConfig {
    /// Configuration with the given capacity.
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ..Default::default()
        }
    }

    /// Set the time-to-live.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Set the time-to-idle.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_time_to_idle(mut self, idle: Duration) -> Self {
        self.time_to_idle = Some(idle);
        self
    }

    /// Reject zero capacity and zero durations.
    pub fn validate(&self) -> Result<()> {
        if self.max_capacity == 0 {
            return Err(CacheError::configuration("max_capacity must be greater than 0"));
        }
        if self.time_to_live.is_some_and(|d| d.is_zero()) {
            return Err(CacheError::configuration("time_to_live must be greater than 0"));
        }
        if self.time_to_idle.is_some_and(|d| d.is_zero()) {
            return Err(CacheError::configuration("time_to_idle must be greater than 0"));
        }
        Ok(())
    }
}

/// Collaborators that directives reference by name.
#[derive(Default, Clone)]
pub struct Collaborators {
    key_generators: HashMap<String, Arc<dyn KeyGenerator>>,
    cache_resolvers: HashMap<String, Arc<dyn CacheResolver>>,
    cache_managers: HashMap<String, Arc<dyn CacheManager>>,
}

impl Collaborators {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key generator under `name`.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_key_generator(
        mut self,
        name: impl Into<String>,
        generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        self.key_generators.insert(name.into(), generator);
        self
    }

    /// Register a cache resolver under `name`.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_cache_resolver(
        mut self,
        name: impl Into<String>,
        resolver: Arc<dyn CacheResolver>,
    ) -> Self {
        self.cache_resolvers.insert(name.into(), resolver);
        self
    }

    /// Register a cache manager under `name`.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_cache_manager(
        mut self,
        name: impl Into<String>,
        manager: Arc<dyn CacheManager>,
    ) -> Self {
        self.cache_managers.insert(name.into(), manager);
        self
    }

    /// Look up a key generator.
    pub fn key_generator(&self, name: &str) -> Result<Arc<dyn KeyGenerator>> {
        lookup(&self.key_generators, "key generator", name)
    }

    /// Look up a cache resolver.
    pub fn cache_resolver(&self, name: &str) -> Result<Arc<dyn CacheResolver>> {
        lookup(&self.cache_resolvers, "cache resolver", name)
    }

    /// Look up a cache manager.
    pub fn cache_manager(&self, name: &str) -> Result<Arc<dyn CacheManager>> {
        lookup(&self.cache_managers, "cache manager", name)
    }
}

fn lookup<T: ?Sized>(table: &HashMap<String, Arc<T>>, what: &str, name: &str) -> Result<Arc<T>> {
    table
        .get(name)
        .cloned()
        .ok_or_else(|| CacheError::configuration(format!("no {what} named '{name}' is registered")))
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("key_generators", &self.key_generators.keys())
            .field("cache_resolvers", &self.cache_resolvers.keys())
            .field("cache_managers", &self.cache_managers.keys())
            .finish()
    }
}
