//! Per-call resolution state for each directive.
//!
//! An [`OperationMetadata`] binds a directive to a call site and is shared
//! across calls. A [`CacheResolutionContext`] binds that metadata to one live
//! call: the resolved caches, the derived key, and the condition outcome.

use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::directive::{Directive, DirectiveKind};
use crate::error::{CacheError, Result};
use crate::expression::{
    CacheExpressionEvaluator, ElementKey, EvaluationScope, ResultState, expression_error,
};
use crate::key::{CacheKey, KeyGenerator};
use crate::method::{MethodId, TypeName};
use crate::resolver::{CacheInvocationContext, CacheResolver};
use crate::store::Cache;

/// A directive bound to a call site and the collaborators it uses.
#[derive(Debug)]
pub struct OperationMetadata {
    directive: Arc<Directive>,
    method: MethodId,
    target_type: TypeName,
    element: ElementKey,
    key_generator: Arc<dyn KeyGenerator>,
    cache_resolver: Arc<dyn CacheResolver>,
}

impl OperationMetadata {
    /// Bind `directive` to a call site.
    pub fn new(
        directive: Arc<Directive>,
        method: MethodId,
        target_type: TypeName,
        key_generator: Arc<dyn KeyGenerator>,
        cache_resolver: Arc<dyn CacheResolver>,
    ) -> Self {
        let element = ElementKey::new(method.clone(), target_type.clone());
        Self {
            directive,
            method,
            target_type,
            element,
            key_generator,
            cache_resolver,
        }
    }

    /// The bound directive.
    #[must_use]
    pub fn directive(&self) -> &Arc<Directive> {
        &self.directive
    }

    /// The call site's method.
    #[must_use]
    pub fn method(&self) -> &MethodId {
        &self.method
    }

    /// The call site's target type.
    #[must_use]
    pub fn target_type(&self) -> &TypeName {
        &self.target_type
    }

    /// Key generator used when the directive has no key expression.
    #[must_use]
    pub fn key_generator(&self) -> &Arc<dyn KeyGenerator> {
        &self.key_generator
    }

    /// Resolver for the directive's caches.
    #[must_use]
    pub fn cache_resolver(&self) -> &Arc<dyn CacheResolver> {
        &self.cache_resolver
    }
}

/// One directive applied to one live call.
///
/// The key and the condition outcome are computed at most once; later calls
/// return the memoized value.
#[derive(Debug)]
pub struct CacheResolutionContext {
    metadata: Arc<OperationMetadata>,
    args: Vec<Value>,
    target: Value,
    caches: Vec<Arc<dyn Cache>>,
    cache_names: Vec<Arc<str>>,
    key: OnceLock<CacheKey>,
    condition_passing: OnceLock<bool>,
}

impl CacheResolutionContext {
    /// Resolve the directive's caches for a call.
    ///
    /// `args` must already be flattened. Resolving to no cache at all is a
    /// configuration error.
    pub fn new(metadata: Arc<OperationMetadata>, args: Vec<Value>, target: Value) -> Result<Self> {
        let invocation =
            CacheInvocationContext::new(&metadata.directive, &metadata.method, &target, &args);
        let caches = metadata.cache_resolver.resolve(&invocation)?;
        if caches.is_empty() {
            return Err(CacheError::configuration(format!(
                "no cache could be resolved for '{}' using resolver {:?}; at least one cache should be provided",
                metadata.directive, metadata.cache_resolver
            )));
        }
        let cache_names = caches.iter().map(|c| Arc::from(c.name())).collect();

        Ok(Self {
            metadata,
            args,
            target,
            caches,
            cache_names,
            key: OnceLock::new(),
            condition_passing: OnceLock::new(),
        })
    }

    /// The shared metadata.
    #[must_use]
    pub fn metadata(&self) -> &OperationMetadata {
        &self.metadata
    }

    /// The directive being applied.
    #[must_use]
    pub fn directive(&self) -> &Directive {
        &self.metadata.directive
    }

    /// Resolved caches, in order.
    #[must_use]
    pub fn caches(&self) -> &[Arc<dyn Cache>] {
        &self.caches
    }

    /// Names of the resolved caches.
    #[must_use]
    pub fn cache_names(&self) -> &[Arc<str>] {
        &self.cache_names
    }

    /// Arguments after variadic flattening.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    fn scope(&self, evaluator: &CacheExpressionEvaluator, result: ResultState) -> EvaluationScope {
        evaluator.build_scope(
            self.cache_names.clone(),
            &self.metadata.method,
            self.args.clone(),
            self.target.clone(),
            &self.metadata.target_type,
            result,
        )
    }

    /// Whether the directive's condition holds. Evaluated once per context.
    pub fn is_condition_passing(
        &self,
        evaluator: &CacheExpressionEvaluator,
        result: ResultState,
    ) -> Result<bool> {
        if let Some(passing) = self.condition_passing.get() {
            return Ok(*passing);
        }
        let expr = self.directive().condition();
        let passing = match expr {
            None => true,
            Some(source) => evaluator
                .condition(expr, &self.metadata.element, &self.scope(evaluator, result))
                .map_err(|e| expression_error(source, e))?,
        };
        Ok(*self.condition_passing.get_or_init(|| passing))
    }

    /// Whether the condition could pass once a result exists.
    ///
    /// Evaluated with the result unavailable; a condition that needs the
    /// result counts as possibly passing. Not memoized.
    pub fn may_pass_with_result(&self, evaluator: &CacheExpressionEvaluator) -> Result<bool> {
        let Some(source) = self.directive().condition() else {
            return Ok(true);
        };
        let scope = self.scope(evaluator, ResultState::Unavailable);
        match evaluator.condition(Some(source), &self.metadata.element, &scope) {
            Ok(passing) => Ok(passing),
            Err(e) if e.is_variable_not_available() => Ok(true),
            Err(e) => Err(expression_error(source, e)),
        }
    }

    /// The cache key for this call. Derived once per context.
    pub fn generate_key(
        &self,
        evaluator: &CacheExpressionEvaluator,
        result: ResultState,
    ) -> Result<CacheKey> {
        if let Some(key) = self.key.get() {
            return Ok(key.clone());
        }
        let key = match self.directive().key() {
            Some(expr) => evaluator.key(
                expr,
                &self.metadata.element,
                &self.scope(evaluator, result),
                self.directive(),
            )?,
            None => self.metadata.key_generator.generate(
                &self.target,
                &self.metadata.method,
                &self.args,
            ),
        };
        tracing::trace!(
            directive = self.directive().name(),
            method = %self.metadata.method,
            %key,
            "computed cache key"
        );
        Ok(self.key.get_or_init(|| key).clone())
    }

    /// Whether `value` may be stored, i.e. `unless` does not veto it.
    pub fn can_put_to_cache(
        &self,
        evaluator: &CacheExpressionEvaluator,
        value: &Value,
    ) -> Result<bool> {
        let unless = self.directive().unless();
        if unless.is_none() {
            return Ok(true);
        }
        let scope = self.scope(evaluator, ResultState::Value(value.clone()));
        let suppressed = evaluator.unless(unless, &self.metadata.element, &scope)?;
        Ok(!suppressed)
    }
}

/// The contexts of one call, grouped by directive kind.
#[derive(Debug, Default)]
pub struct OperationContexts {
    cacheable: Vec<CacheResolutionContext>,
    put: Vec<CacheResolutionContext>,
    evict: Vec<CacheResolutionContext>,
    sync: bool,
}

impl OperationContexts {
    /// Group contexts, validating the sync rules.
    ///
    /// A sync directive must be the only directive on the call site, resolve
    /// to exactly one cache, and carry no `unless`.
    pub fn new(contexts: Vec<CacheResolutionContext>) -> Result<Self> {
        let total = contexts.len();
        let mut grouped = Self::default();

        for context in contexts {
            match context.directive().kind() {
                DirectiveKind::Cacheable { sync, .. } => {
                    if *sync {
                        Self::validate_sync(&context, total)?;
                        grouped.sync = true;
                    }
                    grouped.cacheable.push(context);
                }
                DirectiveKind::CachePut { .. } => grouped.put.push(context),
                DirectiveKind::CacheEvict { .. } => grouped.evict.push(context),
            }
        }
        Ok(grouped)
    }

    fn validate_sync(context: &CacheResolutionContext, total: usize) -> Result<()> {
        let directive = context.directive();
        if total > 1 {
            return Err(CacheError::configuration(format!(
                "'{directive}': a sync cacheable cannot be combined with other cache operations"
            )));
        }
        if context.caches().len() > 1 {
            return Err(CacheError::configuration(format!(
                "'{directive}': only one cache may be specified with sync"
            )));
        }
        if directive.unless().is_some() {
            return Err(CacheError::configuration(format!(
                "'{directive}': unless is not supported with sync"
            )));
        }
        Ok(())
    }

    /// Whether the call takes the single-flight path.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        self.sync
    }

    /// Cacheable contexts, in declaration order.
    #[must_use]
    pub fn cacheable(&self) -> &[CacheResolutionContext] {
        &self.cacheable
    }

    /// Put contexts, in declaration order.
    #[must_use]
    pub fn put(&self) -> &[CacheResolutionContext] {
        &self.put
    }

    /// Evict contexts, in declaration order.
    #[must_use]
    pub fn evict(&self) -> &[CacheResolutionContext] {
        &self.evict
    }

    /// Take the single sync context out.
    pub(crate) fn into_sync_context(self) -> Option<CacheResolutionContext> {
        if self.sync {
            self.cacheable.into_iter().next()
        } else {
            None
        }
    }
}
