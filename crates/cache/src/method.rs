//! Call-site identity: the type and method an intercepted call targets.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Identity of a target type.
///
/// Cheap to clone; compared by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName(Arc<str>);

impl TypeName {
    /// Create a type identity.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The type name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identity of a callable declared on a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodId {
    declaring_type: TypeName,
    name: Arc<str>,
    parameter_names: Arc<[Arc<str>]>,
    varargs: bool,
    bridge: bool,
    public: bool,
}

impl MethodId {
    /// Create a public, non-variadic method identity.
    pub fn new(declaring_type: impl Into<TypeName>, name: impl AsRef<str>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: Arc::from(name.as_ref()),
            parameter_names: Arc::from([]),
            varargs: false,
            bridge: false,
            public: true,
        }
    }

    /// Declare parameter names, exposed to expressions as `#name`.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.parameter_names = names.into_iter().map(|n| Arc::from(n.as_ref())).collect();
        self
    }

    /// Mark the last parameter as variadic.
    #[must_use = "builder methods must be chained or built"]
    pub fn variadic(mut self) -> Self {
        self.varargs = true;
        self
    }

    /// Mark the method as compiler-synthesized.
    #[must_use = "builder methods must be chained or built"]
    pub fn bridge(mut self) -> Self {
        self.bridge = true;
        self
    }

    /// Mark the method as non-public.
    #[must_use = "builder methods must be chained or built"]
    pub fn non_public(mut self) -> Self {
        self.public = false;
        self
    }

    /// Re-declare this method on another type, as an override would.
    #[must_use]
    pub fn declared_on(&self, declaring_type: impl Into<TypeName>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            ..self.clone()
        }
    }

    /// Type that declares this method.
    #[must_use]
    pub fn declaring_type(&self) -> &TypeName {
        &self.declaring_type
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter names, possibly empty.
    #[must_use]
    pub fn parameter_names(&self) -> &[Arc<str>] {
        &self.parameter_names
    }

    /// Whether the trailing parameter is variadic.
    #[must_use]
    pub fn is_varargs(&self) -> bool {
        self.varargs
    }

    /// Whether this method is compiler-synthesized.
    #[must_use]
    pub fn is_bridge(&self) -> bool {
        self.bridge
    }

    /// Whether this method is public.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.public
    }

    /// Flatten a variadic tail into the argument vector.
    ///
    /// Only applies when the method is variadic and the last argument is an
    /// array; otherwise the arguments are returned unchanged.
    #[must_use]
    pub fn flatten_args(&self, args: &[Value]) -> Vec<Value> {
        match args.split_last() {
            Some((Value::Array(tail), head)) if self.varargs => {
                let mut flat = Vec::with_capacity(head.len() + tail.len());
                flat.extend_from_slice(head);
                flat.extend_from_slice(tail);
                flat
            }
            _ => args.to_vec(),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// A single intercepted call.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The callable being invoked.
    pub method: MethodId,
    /// Runtime type of the target instance.
    pub target_type: TypeName,
    /// The target instance.
    pub target: Value,
    /// Arguments as passed by the caller.
    pub args: Vec<Value>,
}

impl Invocation {
    /// Describe a call of `method` on a target of `target_type`.
    pub fn new(method: MethodId, target_type: impl Into<TypeName>, args: Vec<Value>) -> Self {
        Self {
            method,
            target_type: target_type.into(),
            target: Value::Null,
            args,
        }
    }

    /// Attach the target instance.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_target(mut self, target: Value) -> Self {
        self.target = target;
        self
    }
}
