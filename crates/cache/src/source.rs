//! Where directives are declared.
//!
//! A [`DirectiveSource`] answers "which directives sit on this method / this
//! type" for a single level; choosing between levels is the job of the
//! [`OperationRegistry`](crate::registry::OperationRegistry).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::directive::{CacheDefaults, Directive};
use crate::method::{MethodId, TypeName};

/// Declared directives, one level at a time.
pub trait DirectiveSource: Send + Sync + fmt::Debug {
    /// Directives declared directly on `method`.
    fn method_directives(&self, method: &MethodId) -> Vec<Arc<Directive>>;

    /// Directives declared on `ty` itself, applying to all its methods.
    fn type_directives(&self, ty: &TypeName) -> Vec<Arc<Directive>>;

    /// The override of `method` that `target_type` actually runs.
    ///
    /// Defaults to `method` itself.
    fn most_specific_method(&self, method: &MethodId, target_type: &TypeName) -> MethodId {
        let _ = target_type;
        method.clone()
    }
}

#[derive(Debug, Default)]
struct Declarations {
    methods: HashMap<MethodId, Vec<Arc<Directive>>>,
    types: HashMap<TypeName, Vec<Arc<Directive>>>,
    overrides: HashMap<(TypeName, MethodId), MethodId>,
    defaults: HashMap<TypeName, CacheDefaults>,
}

/// In-memory [`DirectiveSource`] populated at configuration time.
///
/// ```rust,ignore
/// let find = MethodId::new("AccountService", "find").with_parameters(["id"]);
/// let source = AnnotationSource::new();
/// source.annotate_method(&find, Directive::cacheable(["accounts"]).key("#id").build()?);
/// ```
#[derive(Debug, Default)]
pub struct AnnotationSource {
    declarations: RwLock<Declarations>,
}

impl AnnotationSource {
    /// Empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a directive to a method.
    pub fn annotate_method(&self, method: &MethodId, directive: Directive) {
        self.declarations
            .write()
            .methods
            .entry(method.clone())
            .or_default()
            .push(Arc::new(directive));
    }

    /// Attach a directive to every method of a type.
    pub fn annotate_type(&self, ty: &TypeName, directive: Directive) {
        self.declarations
            .write()
            .types
            .entry(ty.clone())
            .or_default()
            .push(Arc::new(directive));
    }

    /// Record that `target_type` runs `overriding` when `base` is called.
    pub fn declare_override(&self, target_type: &TypeName, base: &MethodId, overriding: MethodId) {
        self.declarations
            .write()
            .overrides
            .insert((target_type.clone(), base.clone()), overriding);
    }

    /// Set the defaults applied to directives declared on `ty` and its methods.
    pub fn set_defaults(&self, ty: &TypeName, defaults: CacheDefaults) {
        self.declarations.write().defaults.insert(ty.clone(), defaults);
    }

    fn with_defaults(
        declarations: &Declarations,
        ty: &TypeName,
        directives: &[Arc<Directive>],
    ) -> Vec<Arc<Directive>> {
        match declarations.defaults.get(ty) {
            Some(defaults) => directives
                .iter()
                .map(|d| Arc::new(d.with_defaults(defaults)))
                .collect(),
            None => directives.to_vec(),
        }
    }
}

impl DirectiveSource for AnnotationSource {
    fn method_directives(&self, method: &MethodId) -> Vec<Arc<Directive>> {
        let declarations = self.declarations.read();
        declarations
            .methods
            .get(method)
            .map(|found| Self::with_defaults(&declarations, method.declaring_type(), found))
            .unwrap_or_default()
    }

    fn type_directives(&self, ty: &TypeName) -> Vec<Arc<Directive>> {
        let declarations = self.declarations.read();
        declarations
            .types
            .get(ty)
            .map(|found| Self::with_defaults(&declarations, ty, found))
            .unwrap_or_default()
    }

    fn most_specific_method(&self, method: &MethodId, target_type: &TypeName) -> MethodId {
        self.declarations
            .read()
            .overrides
            .get(&(target_type.clone(), method.clone()))
            .cloned()
            .unwrap_or_else(|| method.clone())
    }
}
