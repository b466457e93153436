//! Cache engine -- the orchestration of directives around a computation.
//!
//! Resolves the directives of a call site, binds each one to the live call,
//! and sequences evictions, lookups, the computation itself, and puts.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::config::{Collaborators, EngineConfig};
use crate::context::{CacheResolutionContext, OperationContexts, OperationMetadata};
use crate::directive::{Directive, DirectiveKind};
use crate::error::{BoxError, CacheError, InvocationError, Result};
use crate::expression::{CacheExpressionEvaluator, ExpressionEngine, FnExpressionEngine, ResultState};
use crate::invoker::{CacheErrorHandler, CacheInvoker, PropagatingErrorHandler};
use crate::key::{CacheKey, KeyGenerator, SimpleKeyGenerator};
use crate::method::{Invocation, MethodId, TypeName};
use crate::registry::OperationRegistry;
use crate::resolver::{CacheResolver, SimpleCacheResolver};
use crate::source::DirectiveSource;
use crate::store::CacheManager;

type MetadataKey = (Arc<Directive>, MethodId, TypeName);

/// A value waiting to be written once the final result is known.
struct CachePutRequest<'a> {
    context: &'a CacheResolutionContext,
    key: CacheKey,
}

/// The cache engine wraps computations with the cache directives declared
/// for their call site.
///
/// For each call it:
///
/// 1. Resolves the call site's directives (none: runs the computation as is)
/// 2. Binds every directive to the call, resolving caches
/// 3. Takes the single-flight path for a lone sync cacheable, or otherwise
///    evicts early, looks up, computes if needed, puts, and evicts late
///
/// The engine is meant to be built once and shared; its memo tables are
/// safe for concurrent use.
///
/// # Examples
///
/// ```rust,ignore
/// let engine = CacheEngine::builder(Arc::new(source))
///     .expression_engine(Arc::new(expressions))
///     .cache_manager(Arc::new(InMemoryCacheManager::dynamic(Default::default())?))
///     .build();
///
/// let account = engine
///     .execute(Invocation::new(find, TypeName::new("AccountService"), vec![json!(5)]), || async {
///         load_account(5).await
///     })
///     .await?;
/// ```
#[derive(Debug)]
pub struct CacheEngine {
    registry: OperationRegistry,
    evaluator: CacheExpressionEvaluator,
    invoker: CacheInvoker,
    key_generator: Arc<dyn KeyGenerator>,
    cache_resolver: Option<Arc<dyn CacheResolver>>,
    collaborators: Collaborators,
    metadata: DashMap<MetadataKey, Arc<OperationMetadata>>,
}

impl CacheEngine {
    /// Start building an engine over `source`.
    pub fn builder(source: Arc<dyn DirectiveSource>) -> CacheEngineBuilder {
        CacheEngineBuilder::new(source)
    }

    /// Access the operation registry.
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Forget every memoized resolution: directives, bound metadata, and
    /// compiled expressions.
    pub fn clear_metadata(&self) {
        self.registry.clear();
        self.metadata.clear();
        self.evaluator.clear();
        tracing::debug!("cleared cache metadata");
    }

    /// Run `compute` for `invocation` under the call site's cache directives.
    ///
    /// Returns the cached or computed value. A failure of `compute` is
    /// returned as [`CacheError::Invocation`] carrying the original error;
    /// no puts or late evictions happen after it.
    pub async fn execute<F, Fut, E>(&self, invocation: Invocation, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Value, E>> + Send,
        E: Into<BoxError>,
    {
        let Some(operations) = self
            .registry
            .resolve(&invocation.method, &invocation.target_type)
        else {
            return invoke(compute).await;
        };

        let Invocation {
            method,
            target_type,
            target,
            args,
        } = invocation;
        let args = method.flatten_args(&args);

        let contexts = operations
            .iter()
            .map(|directive| {
                let metadata = self.metadata(directive, &method, &target_type)?;
                CacheResolutionContext::new(metadata, args.clone(), target.clone())
            })
            .collect::<Result<Vec<_>>>()?;
        let contexts = OperationContexts::new(contexts)?;

        if contexts.is_sync() {
            if let Some(context) = contexts.into_sync_context() {
                return self.execute_sync(context, compute).await;
            }
            return invoke(compute).await;
        }
        self.execute_standard(&contexts, compute).await
    }

    async fn execute_sync<F, Fut, E>(
        &self,
        context: CacheResolutionContext,
        compute: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Value, E>> + Send,
        E: Into<BoxError>,
    {
        if !context.is_condition_passing(&self.evaluator, ResultState::NotComputed)? {
            return invoke(compute).await;
        }
        let key = context.generate_key(&self.evaluator, ResultState::NotComputed)?;
        let Some(cache) = context.caches().first() else {
            return invoke(compute).await;
        };
        tracing::trace!(cache = cache.name(), %key, "single-flight lookup");
        self.invoker
            .do_get_or_load(cache.as_ref(), &key, move || async move {
                compute().await.map_err(InvocationError::new)
            })
            .await
    }

    async fn execute_standard<F, Fut, E>(
        &self,
        contexts: &OperationContexts,
        compute: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<Value, E>> + Send,
        E: Into<BoxError>,
    {
        self.process_evictions(contexts.evict(), true, ResultState::NotComputed)
            .await?;

        let hit = self.find_cached_value(contexts.cacheable()).await?;

        let mut requests = Vec::new();
        if hit.is_none() {
            self.collect_put_requests(contexts.cacheable(), ResultState::NotComputed, &mut requests)?;
        }

        let value = match hit {
            Some(cached) if requests.is_empty() && !self.has_cache_put(contexts.put())? => {
                tracing::trace!("returning cached value without invoking");
                cached
            }
            _ => invoke(compute).await?,
        };

        let result = ResultState::Value(value.clone());
        self.collect_put_requests(contexts.put(), result.clone(), &mut requests)?;

        for request in &requests {
            self.apply_put(request, &value).await?;
        }

        self.process_evictions(contexts.evict(), false, result)
            .await?;

        Ok(value)
    }

    async fn process_evictions(
        &self,
        contexts: &[CacheResolutionContext],
        before_invocation: bool,
        result: ResultState,
    ) -> Result<()> {
        for context in contexts {
            let DirectiveKind::CacheEvict {
                all_entries,
                before_invocation: before,
            } = context.directive().kind()
            else {
                continue;
            };
            if *before != before_invocation
                || !context.is_condition_passing(&self.evaluator, result.clone())?
            {
                continue;
            }

            let mut key = None;
            for cache in context.caches() {
                if *all_entries {
                    tracing::debug!(cache = cache.name(), "clearing cache");
                    self.invoker
                        .do_clear(cache.as_ref(), before_invocation)
                        .await?;
                } else {
                    if key.is_none() {
                        key = Some(context.generate_key(&self.evaluator, result.clone())?);
                    }
                    if let Some(key) = &key {
                        tracing::debug!(cache = cache.name(), %key, "evicting cache entry");
                        self.invoker
                            .do_evict(cache.as_ref(), key, before_invocation)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn find_cached_value(&self, contexts: &[CacheResolutionContext]) -> Result<Option<Value>> {
        for context in contexts {
            if !context.is_condition_passing(&self.evaluator, ResultState::NotComputed)? {
                tracing::trace!(
                    directive = context.directive().name(),
                    "condition not passing, skipping lookup"
                );
                continue;
            }
            let key = context.generate_key(&self.evaluator, ResultState::NotComputed)?;
            for cache in context.caches() {
                if let Some(value) = self.invoker.do_get(cache.as_ref(), &key).await? {
                    tracing::trace!(cache = cache.name(), %key, "cache hit");
                    return Ok(Some(value));
                }
            }
            tracing::trace!(caches = ?context.cache_names(), %key, "cache miss");
        }
        Ok(None)
    }

    fn collect_put_requests<'a>(
        &self,
        contexts: &'a [CacheResolutionContext],
        result: ResultState,
        requests: &mut Vec<CachePutRequest<'a>>,
    ) -> Result<()> {
        for context in contexts {
            if context.is_condition_passing(&self.evaluator, result.clone())? {
                let key = context.generate_key(&self.evaluator, result.clone())?;
                requests.push(CachePutRequest { context, key });
            }
        }
        Ok(())
    }

    fn has_cache_put(&self, contexts: &[CacheResolutionContext]) -> Result<bool> {
        for context in contexts {
            if context.may_pass_with_result(&self.evaluator)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn apply_put(&self, request: &CachePutRequest<'_>, value: &Value) -> Result<()> {
        let context = request.context;
        if !context.can_put_to_cache(&self.evaluator, value)? {
            tracing::debug!(
                directive = context.directive().name(),
                key = %request.key,
                "put suppressed by unless"
            );
            return Ok(());
        }
        for cache in context.caches() {
            self.invoker
                .do_put(cache.as_ref(), &request.key, value.clone())
                .await?;
        }
        Ok(())
    }

    /// Bind `directive` to a call site, resolving its collaborators once.
    fn metadata(
        &self,
        directive: &Arc<Directive>,
        method: &MethodId,
        target_type: &TypeName,
    ) -> Result<Arc<OperationMetadata>> {
        let memo_key = (Arc::clone(directive), method.clone(), target_type.clone());
        if let Some(found) = self.metadata.get(&memo_key) {
            return Ok(Arc::clone(found.value()));
        }

        let key_generator = match directive.key_generator() {
            Some(name) => self.collaborators.key_generator(name)?,
            None => Arc::clone(&self.key_generator),
        };
        let cache_resolver = match (directive.cache_resolver(), directive.cache_manager()) {
            (Some(name), _) => self.collaborators.cache_resolver(name)?,
            (None, Some(name)) => Arc::new(SimpleCacheResolver::new(
                self.collaborators.cache_manager(name)?,
            )),
            (None, None) => self.cache_resolver.clone().ok_or_else(|| {
                CacheError::configuration(format!(
                    "no cache resolver for {directive}: configure a default cache resolver or cache manager"
                ))
            })?,
        };

        let metadata = Arc::new(OperationMetadata::new(
            Arc::clone(directive),
            method.clone(),
            target_type.clone(),
            key_generator,
            cache_resolver,
        ));
        self.metadata.insert(memo_key, Arc::clone(&metadata));
        Ok(metadata)
    }
}

async fn invoke<F, Fut, E>(compute: F) -> Result<Value>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<Value, E>>,
    E: Into<BoxError>,
{
    compute()
        .await
        .map_err(|e| CacheError::Invocation(InvocationError::new(e)))
}

/// Builder for [`CacheEngine`].
///
/// Only the directive source is required. Defaults: an empty
/// [`FnExpressionEngine`], [`SimpleKeyGenerator`], no default cache resolver,
/// [`PropagatingErrorHandler`], no named collaborators.
#[derive(Debug)]
pub struct CacheEngineBuilder {
    source: Arc<dyn DirectiveSource>,
    expression_engine: Arc<dyn ExpressionEngine>,
    key_generator: Arc<dyn KeyGenerator>,
    cache_resolver: Option<Arc<dyn CacheResolver>>,
    error_handler: Arc<dyn CacheErrorHandler>,
    collaborators: Collaborators,
    config: EngineConfig,
}

impl CacheEngineBuilder {
    /// Builder over `source` with default collaborators.
    pub fn new(source: Arc<dyn DirectiveSource>) -> Self {
        Self {
            source,
            expression_engine: Arc::new(FnExpressionEngine::new()),
            key_generator: Arc::new(SimpleKeyGenerator),
            cache_resolver: None,
            error_handler: Arc::new(PropagatingErrorHandler),
            collaborators: Collaborators::new(),
            config: EngineConfig::default(),
        }
    }

    /// Engine used to compile key, condition, and unless expressions.
    #[must_use = "builder methods must be chained or built"]
    pub fn expression_engine(mut self, engine: Arc<dyn ExpressionEngine>) -> Self {
        self.expression_engine = engine;
        self
    }

    /// Key generator for directives without a key expression or named generator.
    #[must_use = "builder methods must be chained or built"]
    pub fn key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = generator;
        self
    }

    /// Resolver for directives that name neither a resolver nor a manager.
    #[must_use = "builder methods must be chained or built"]
    pub fn cache_resolver(mut self, resolver: Arc<dyn CacheResolver>) -> Self {
        self.cache_resolver = Some(resolver);
        self
    }

    /// Shorthand for a default [`SimpleCacheResolver`] over `manager`.
    #[must_use = "builder methods must be chained or built"]
    pub fn cache_manager(self, manager: Arc<dyn CacheManager>) -> Self {
        self.cache_resolver(Arc::new(SimpleCacheResolver::new(manager)))
    }

    /// Policy for cache provider failures.
    #[must_use = "builder methods must be chained or built"]
    pub fn error_handler(mut self, handler: Arc<dyn CacheErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Collaborators that directives reference by name.
    #[must_use = "builder methods must be chained or built"]
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Engine behaviour switches.
    #[must_use = "builder methods must be chained or built"]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the engine.
    #[must_use]
    pub fn build(self) -> CacheEngine {
        CacheEngine {
            registry: OperationRegistry::new(self.source, self.config.public_methods_only),
            evaluator: CacheExpressionEvaluator::new(self.expression_engine),
            invoker: CacheInvoker::new(self.error_handler),
            key_generator: self.key_generator,
            cache_resolver: self.cache_resolver,
            collaborators: self.collaborators,
            metadata: DashMap::new(),
        }
    }
}
