//! Cache directives: the static declarations attached to call sites.
//!
//! A [`Directive`] is immutable once built. The kind-specific fields live in
//! [`DirectiveKind`] so each orchestration phase can match on the kind
//! exhaustively.

use std::fmt;
use std::sync::Arc;

use crate::error::{CacheError, Result};

/// Kind-specific part of a directive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    /// Serve from cache when present, otherwise compute and store.
    Cacheable {
        /// Expression that suppresses the put when it evaluates to true.
        unless: Option<Arc<str>>,
        /// Compute at most once per key across concurrent callers.
        sync: bool,
    },
    /// Always compute, then store the result.
    CachePut {
        /// Expression that suppresses the put when it evaluates to true.
        unless: Option<Arc<str>>,
    },
    /// Remove entries.
    CacheEvict {
        /// Clear the whole cache instead of a single key.
        all_entries: bool,
        /// Evict before the computation runs instead of after it succeeds.
        before_invocation: bool,
    },
}

impl DirectiveKind {
    /// Short kind label used in logs and messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cacheable { .. } => "Cacheable",
            Self::CachePut { .. } => "CachePut",
            Self::CacheEvict { .. } => "CacheEvict",
        }
    }
}

/// A declaration that calls of a method interact with one or more caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Directive {
    name: Arc<str>,
    cache_names: Vec<Arc<str>>,
    key: Option<Arc<str>>,
    condition: Option<Arc<str>>,
    key_generator: Option<Arc<str>>,
    cache_manager: Option<Arc<str>>,
    cache_resolver: Option<Arc<str>>,
    kind: DirectiveKind,
}

impl Directive {
    /// Start a Cacheable directive over the given caches.
    pub fn cacheable<I, S>(cache_names: I) -> DirectiveBuilder
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        DirectiveBuilder::new(
            DirectiveKind::Cacheable {
                unless: None,
                sync: false,
            },
            cache_names,
        )
    }

    /// Start a CachePut directive over the given caches.
    pub fn cache_put<I, S>(cache_names: I) -> DirectiveBuilder
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        DirectiveBuilder::new(DirectiveKind::CachePut { unless: None }, cache_names)
    }

    /// Start a CacheEvict directive over the given caches.
    pub fn cache_evict<I, S>(cache_names: I) -> DirectiveBuilder
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        DirectiveBuilder::new(
            DirectiveKind::CacheEvict {
                all_entries: false,
                before_invocation: false,
            },
            cache_names,
        )
    }

    /// Optional descriptive name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache names in declaration order.
    #[must_use]
    pub fn cache_names(&self) -> &[Arc<str>] {
        &self.cache_names
    }

    /// Key expression.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Condition expression.
    #[must_use]
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    /// Unless expression (Cacheable and CachePut only).
    #[must_use]
    pub fn unless(&self) -> Option<&str> {
        match &self.kind {
            DirectiveKind::Cacheable { unless, .. } | DirectiveKind::CachePut { unless } => {
                unless.as_deref()
            }
            DirectiveKind::CacheEvict { .. } => None,
        }
    }

    /// Name of the key generator collaborator.
    #[must_use]
    pub fn key_generator(&self) -> Option<&str> {
        self.key_generator.as_deref()
    }

    /// Name of the cache manager collaborator.
    #[must_use]
    pub fn cache_manager(&self) -> Option<&str> {
        self.cache_manager.as_deref()
    }

    /// Name of the cache resolver collaborator.
    #[must_use]
    pub fn cache_resolver(&self) -> Option<&str> {
        self.cache_resolver.as_deref()
    }

    /// Kind-specific fields.
    #[must_use]
    pub fn kind(&self) -> &DirectiveKind {
        &self.kind
    }

    /// Whether this is a Cacheable directive with `sync` set.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        matches!(self.kind, DirectiveKind::Cacheable { sync: true, .. })
    }

    /// Fill unset fields from type-level defaults.
    ///
    /// Explicit values on the directive always win. A default key generator
    /// is not applied when the directive has a key expression, and a default
    /// manager or resolver is only applied when neither is set.
    #[must_use]
    pub fn with_defaults(&self, defaults: &CacheDefaults) -> Self {
        let mut merged = self.clone();
        if merged.cache_names.is_empty() {
            merged.cache_names = defaults.cache_names.clone();
        }
        if merged.key.is_none() && merged.key_generator.is_none() {
            merged.key_generator = defaults.key_generator.clone();
        }
        if merged.cache_manager.is_none() && merged.cache_resolver.is_none() {
            merged.cache_resolver = defaults.cache_resolver.clone();
            if merged.cache_resolver.is_none() {
                merged.cache_manager = defaults.cache_manager.clone();
            }
        }
        merged
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] caches=[", self.kind.label(), self.name)?;
        for (i, name) in self.cache_names.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(name)?;
        }
        write!(
            f,
            "] key='{}' condition='{}'",
            self.key.as_deref().unwrap_or_default(),
            self.condition.as_deref().unwrap_or_default()
        )?;
        if let Some(unless) = self.unless() {
            write!(f, " unless='{unless}'")?;
        }
        match &self.kind {
            DirectiveKind::Cacheable { sync, .. } => write!(f, " sync={sync}"),
            DirectiveKind::CachePut { .. } => Ok(()),
            DirectiveKind::CacheEvict {
                all_entries,
                before_invocation,
            } => write!(
                f,
                " all_entries={all_entries} before_invocation={before_invocation}"
            ),
        }
    }
}

/// Builder for [`Directive`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
#[must_use = "builder methods must be chained or built"]
pub struct DirectiveBuilder {
    directive: Directive,
    unless_misplaced: bool,
}

impl DirectiveBuilder {
    fn new<I, S>(kind: DirectiveKind, cache_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<Arc<str>> = Vec::new();
        for name in cache_names {
            let name = name.as_ref();
            if !names.iter().any(|n| &**n == name) {
                names.push(Arc::from(name));
            }
        }
        Self {
            directive: Directive {
                name: Arc::from(""),
                cache_names: names,
                key: None,
                condition: None,
                key_generator: None,
                cache_manager: None,
                cache_resolver: None,
                kind,
            },
            unless_misplaced: false,
        }
    }

    /// Descriptive name, used in logs and error messages.
    pub fn name(mut self, name: impl AsRef<str>) -> Self {
        self.directive.name = Arc::from(name.as_ref());
        self
    }

    /// Key expression.
    pub fn key(mut self, expr: impl AsRef<str>) -> Self {
        self.directive.key = non_blank(expr.as_ref());
        self
    }

    /// Condition expression.
    pub fn condition(mut self, expr: impl AsRef<str>) -> Self {
        self.directive.condition = non_blank(expr.as_ref());
        self
    }

    /// Unless expression. Rejected by `build` on CacheEvict.
    pub fn unless(mut self, expr: impl AsRef<str>) -> Self {
        let expr = non_blank(expr.as_ref());
        match &mut self.directive.kind {
            DirectiveKind::Cacheable { unless, .. } | DirectiveKind::CachePut { unless } => {
                *unless = expr;
            }
            DirectiveKind::CacheEvict { .. } => self.unless_misplaced = expr.is_some(),
        }
        self
    }

    /// Named key generator collaborator.
    pub fn key_generator(mut self, name: impl AsRef<str>) -> Self {
        self.directive.key_generator = non_blank(name.as_ref());
        self
    }

    /// Named cache manager collaborator.
    pub fn cache_manager(mut self, name: impl AsRef<str>) -> Self {
        self.directive.cache_manager = non_blank(name.as_ref());
        self
    }

    /// Named cache resolver collaborator.
    pub fn cache_resolver(mut self, name: impl AsRef<str>) -> Self {
        self.directive.cache_resolver = non_blank(name.as_ref());
        self
    }

    /// Request single-flight computation (Cacheable only).
    pub fn sync(mut self, enabled: bool) -> Self {
        if let DirectiveKind::Cacheable { sync, .. } = &mut self.directive.kind {
            *sync = enabled;
        }
        self
    }

    /// Clear the whole cache instead of one key (CacheEvict only).
    pub fn all_entries(mut self, enabled: bool) -> Self {
        if let DirectiveKind::CacheEvict { all_entries, .. } = &mut self.directive.kind {
            *all_entries = enabled;
        }
        self
    }

    /// Evict before the computation runs (CacheEvict only).
    pub fn before_invocation(mut self, enabled: bool) -> Self {
        if let DirectiveKind::CacheEvict {
            before_invocation, ..
        } = &mut self.directive.kind
        {
            *before_invocation = enabled;
        }
        self
    }

    /// Validate and produce the directive.
    pub fn build(self) -> Result<Directive> {
        let d = self.directive;
        if self.unless_misplaced {
            return Err(CacheError::configuration(format!(
                "'unless' is not supported on {d}"
            )));
        }
        if d.key.is_some() && d.key_generator.is_some() {
            return Err(CacheError::configuration(format!(
                "both 'key' and 'key_generator' are set on {d}; these attributes are mutually exclusive"
            )));
        }
        if d.cache_manager.is_some() && d.cache_resolver.is_some() {
            return Err(CacheError::configuration(format!(
                "both 'cache_manager' and 'cache_resolver' are set on {d}; these attributes are mutually exclusive"
            )));
        }
        Ok(d)
    }
}

fn non_blank(s: &str) -> Option<Arc<str>> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| Arc::from(trimmed))
}

/// Type-level defaults shared by every directive declared on a type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDefaults {
    cache_names: Vec<Arc<str>>,
    key_generator: Option<Arc<str>>,
    cache_manager: Option<Arc<str>>,
    cache_resolver: Option<Arc<str>>,
}

impl CacheDefaults {
    /// Empty defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default cache names.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_cache_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cache_names = names.into_iter().map(|n| Arc::from(n.as_ref())).collect();
        self
    }

    /// Default key generator name.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_key_generator(mut self, name: impl AsRef<str>) -> Self {
        self.key_generator = non_blank(name.as_ref());
        self
    }

    /// Default cache manager name.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_cache_manager(mut self, name: impl AsRef<str>) -> Self {
        self.cache_manager = non_blank(name.as_ref());
        self
    }

    /// Default cache resolver name.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_cache_resolver(mut self, name: impl AsRef<str>) -> Self {
        self.cache_resolver = non_blank(name.as_ref());
        self
    }
}
