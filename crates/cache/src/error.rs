//! Cache orchestration error types.
//!
//! Three failure categories flow through the engine and are kept apart:
//! authoring/configuration mistakes ([`CacheError::Configuration`],
//! [`CacheError::NullKey`], [`CacheError::Expression`]), cache-provider
//! failures ([`StoreError`], routed through the error handler), and failures
//! of the wrapped computation ([`InvocationError`], always propagated as-is).

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::expression::EvaluationError;

/// Boxed error accepted from wrapped computations.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for cache orchestration.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the cache engine to its caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A directive, resolver, or collaborator is misconfigured.
    #[error("cache configuration error: {message}")]
    Configuration {
        /// What is wrong.
        message: String,
    },

    /// A key expression evaluated to null.
    #[error("null key returned for cache operation {directive}")]
    NullKey {
        /// Description of the directive that produced the key.
        directive: String,
    },

    /// A key, condition, or unless expression failed to evaluate.
    #[error("expression `{expression}` failed: {source}")]
    Expression {
        /// Expression source text.
        expression: String,
        /// The evaluation failure.
        #[source]
        source: EvaluationError,
    },

    /// A cache provider failure the error handler chose to escalate.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The wrapped computation failed.
    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

impl CacheError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error came from the wrapped computation rather than
    /// from the cache layer.
    #[must_use]
    pub fn is_invocation(&self) -> bool {
        matches!(self, Self::Invocation(_))
    }

    /// The computation failure, if this is one.
    #[must_use]
    pub fn as_invocation(&self) -> Option<&InvocationError> {
        match self {
            Self::Invocation(e) => Some(e),
            _ => None,
        }
    }
}

/// A failure reported by a cache store.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cache '{cache}' {operation} failed: {message}")]
pub struct StoreError {
    /// Name of the cache that failed.
    pub cache: String,
    /// Store operation that failed (`get`, `put`, `evict`, `clear`).
    pub operation: &'static str,
    /// Provider-specific description.
    pub message: String,
}

impl StoreError {
    /// Create a store error.
    pub fn new(
        cache: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            cache: cache.into(),
            operation,
            message: message.into(),
        }
    }
}

/// A failure of the wrapped computation.
///
/// The original error is shared behind an `Arc` so every caller waiting on
/// the same single-flight computation observes the same failure.
#[derive(Clone)]
pub struct InvocationError {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl InvocationError {
    /// Wrap a computation error.
    ///
    /// An error that already is an `InvocationError` is returned as-is.
    pub fn new(error: impl Into<BoxError>) -> Self {
        match error.into().downcast::<Self>() {
            Ok(existing) => *existing,
            Err(other) => Self {
                inner: Arc::from(other),
            },
        }
    }

    /// Borrow the original error.
    #[must_use]
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }

    /// Downcast the original error to a concrete type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Whether two handles share the same underlying failure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InvocationError").field(&self.inner).finish()
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for InvocationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.inner)
    }
}

/// Failure of [`Cache::get_or_load`](crate::store::Cache::get_or_load).
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The store itself failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The value loader (the wrapped computation) failed.
    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("backend down")]
    struct BackendDown;

    #[test]
    fn configuration_display() {
        let err = CacheError::configuration("no cache resolved");
        assert_eq!(
            err.to_string(),
            "cache configuration error: no cache resolved"
        );
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::new("accounts", "get", "connection refused");
        assert_eq!(
            err.to_string(),
            "cache 'accounts' get failed: connection refused"
        );
    }

    #[test]
    fn invocation_error_is_transparent() {
        let err = CacheError::from(InvocationError::new(BackendDown));
        assert_eq!(err.to_string(), "backend down");
        assert!(err.is_invocation());
        assert!(
            err.as_invocation()
                .and_then(InvocationError::downcast_ref::<BackendDown>)
                .is_some()
        );
    }

    #[test]
    fn cloned_invocation_errors_share_the_failure() {
        let a = InvocationError::new("boom");
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&InvocationError::new("boom")));
    }

    #[test]
    fn wrapping_an_invocation_error_keeps_it() {
        let original = InvocationError::new(BackendDown);
        let rewrapped = InvocationError::new(original.clone());
        assert!(rewrapped.ptr_eq(&original));
        assert!(rewrapped.downcast_ref::<BackendDown>().is_some());
    }
}
