//! Operation registry: which directives apply to a call site.

use std::sync::Arc;

use dashmap::DashMap;

use crate::directive::Directive;
use crate::method::{MethodId, TypeName};
use crate::source::DirectiveSource;

/// Directives selected for one call site, in declaration order.
pub type Operations = Arc<[Arc<Directive>]>;

#[derive(Debug, Clone)]
enum Resolved {
    Nothing,
    Found(Operations),
}

/// Thread-safe, memoizing lookup of the directives for a
/// `(method, target type)` call site.
///
/// Levels are searched most specific first and the first non-empty one
/// wins; directives from different levels are never merged:
///
/// 1. the override of the method that the target type runs,
/// 2. the target type itself (skipped for bridge methods),
/// 3. the method as called, when it differs from the override,
/// 4. the method's declaring type (skipped for bridge methods).
///
/// Empty outcomes are memoized too.
///
/// # Examples
///
/// ```rust,ignore
/// use nebula_cache::registry::OperationRegistry;
///
/// let registry = OperationRegistry::new(Arc::new(source), false);
/// let ops = registry.resolve(&method, &TypeName::new("AccountService"));
/// ```
#[derive(Debug)]
pub struct OperationRegistry {
    source: Arc<dyn DirectiveSource>,
    public_methods_only: bool,
    resolved: DashMap<(MethodId, TypeName), Resolved>,
}

impl OperationRegistry {
    /// Registry over `source`.
    pub fn new(source: Arc<dyn DirectiveSource>, public_methods_only: bool) -> Self {
        Self {
            source,
            public_methods_only,
            resolved: DashMap::new(),
        }
    }

    /// Directives for the call site, or `None` if it carries none.
    pub fn resolve(&self, method: &MethodId, target_type: &TypeName) -> Option<Operations> {
        let call_site = (method.clone(), target_type.clone());
        if let Some(entry) = self.resolved.get(&call_site) {
            return match entry.value() {
                Resolved::Nothing => None,
                Resolved::Found(ops) => Some(Arc::clone(ops)),
            };
        }

        let found = self.find(method, target_type);
        tracing::debug!(
            method = %method,
            target_type = %target_type,
            directives = found.len(),
            "resolved cache operations"
        );
        let resolved = if found.is_empty() {
            Resolved::Nothing
        } else {
            Resolved::Found(found.into())
        };
        self.resolved.insert(call_site, resolved.clone());

        match resolved {
            Resolved::Nothing => None,
            Resolved::Found(ops) => Some(ops),
        }
    }

    fn find(&self, method: &MethodId, target_type: &TypeName) -> Vec<Arc<Directive>> {
        if self.public_methods_only && !method.is_public() {
            return Vec::new();
        }
        let user_level = !method.is_bridge();

        let specific = self.source.most_specific_method(method, target_type);
        let found = self.source.method_directives(&specific);
        if !found.is_empty() {
            return found;
        }

        if user_level {
            let found = self.source.type_directives(target_type);
            if !found.is_empty() {
                return found;
            }
        }

        if specific != *method {
            let found = self.source.method_directives(method);
            if !found.is_empty() {
                return found;
            }
        }

        if user_level && method.declaring_type() != target_type {
            return self.source.type_directives(method.declaring_type());
        }
        Vec::new()
    }

    /// Number of memoized call sites, including those that resolved to
    /// nothing.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Whether nothing has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// Forget all memoized resolutions.
    pub fn clear(&self) {
        self.resolved.clear();
    }
}
