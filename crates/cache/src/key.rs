//! Cache keys and key generation.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::Value;

use crate::method::MethodId;

/// A key under which a value is stored in a cache.
///
/// Equality is structural over JSON values; hashing uses the canonical JSON
/// text so equal keys always hash equally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    /// A single value, from a key expression or a lone argument.
    Value(Value),
    /// Zero or several arguments combined positionally.
    Composite(Vec<Value>),
}

impl CacheKey {
    /// The key used for calls without arguments.
    #[must_use]
    pub fn empty() -> Self {
        Self::Composite(Vec::new())
    }

    /// Whether this is the empty composite key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Composite(parts) if parts.is_empty())
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Value(v) => {
                0u8.hash(state);
                v.to_string().hash(state);
            }
            Self::Composite(parts) => {
                1u8.hash(state);
                parts.len().hash(state);
                for part in parts {
                    part.to_string().hash(state);
                }
            }
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(Value::String(s)) => f.write_str(s),
            Self::Value(v) => write!(f, "{v}"),
            Self::Composite(parts) => {
                f.write_str("SimpleKey [")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<Value> for CacheKey {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Derives a cache key from an invocation when no key expression is set.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    /// Generate a key for a call of `method` on `target` with `args`.
    fn generate(&self, target: &Value, method: &MethodId, args: &[Value]) -> CacheKey;
}

/// Default key generator.
///
/// No arguments yield [`CacheKey::empty`]; a single non-null, non-array
/// argument is used as the key directly; anything else becomes a positional
/// composite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleKeyGenerator;

impl KeyGenerator for SimpleKeyGenerator {
    fn generate(&self, _target: &Value, _method: &MethodId, args: &[Value]) -> CacheKey {
        match args {
            [] => CacheKey::empty(),
            [single] if !single.is_null() && !single.is_array() => CacheKey::Value(single.clone()),
            _ => CacheKey::Composite(args.to_vec()),
        }
    }
}
