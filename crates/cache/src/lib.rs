#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Nebula Cache
//!
//! Declarative cache orchestration for intercepted calls.
//!
//! This crate provides:
//! - [`CacheEngine`] -- wraps a computation with the cache directives of its call site
//! - [`OperationRegistry`] -- resolves and memoizes the directives of a call site
//! - [`Directive`] -- cacheable, cache-put, and cache-evict declarations
//! - [`CacheInvoker`] -- store access with provider failures routed to a [`CacheErrorHandler`]
//! - [`MokaCache`] / [`InMemoryCacheManager`] -- the in-memory store
//!
//! The engine sits between the call interceptor (which detects a call site
//! and hands over the computation) and the cache stores. Expressions are
//! compiled by a pluggable [`ExpressionEngine`]; collaborators referenced by
//! name live in [`Collaborators`].

pub mod config;
pub mod context;
pub mod directive;
pub mod engine;
pub mod error;
pub mod expression;
pub mod invoker;
pub mod key;
pub mod method;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod store;

pub use config::{Collaborators, EngineConfig, InMemoryCacheConfig};
pub use context::{CacheResolutionContext, OperationContexts, OperationMetadata};
pub use directive::{CacheDefaults, Directive, DirectiveBuilder, DirectiveKind};
pub use engine::{CacheEngine, CacheEngineBuilder};
pub use error::{BoxError, CacheError, InvocationError, LoadError, StoreError};
pub use expression::{
    CacheExpressionEvaluator, CompiledExpression, EvaluationError, EvaluationScope,
    ExpressionEngine, FnExpressionEngine, ResultState,
};
pub use invoker::{CacheErrorHandler, CacheInvoker, LoggingErrorHandler, PropagatingErrorHandler};
pub use key::{CacheKey, KeyGenerator, SimpleKeyGenerator};
pub use method::{Invocation, MethodId, TypeName};
pub use registry::OperationRegistry;
pub use resolver::{CacheInvocationContext, CacheResolver, NamedCacheResolver, SimpleCacheResolver};
pub use source::{AnnotationSource, DirectiveSource};
pub use store::memory::{CacheStats, InMemoryCacheManager, MokaCache};
pub use store::{Cache, CacheManager, ValueLoader};
