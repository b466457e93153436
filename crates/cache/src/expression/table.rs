//! Closure-backed expression engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{CompiledExpression, EvaluationError, EvaluationScope, ExpressionEngine};

type ExprFn = dyn Fn(&EvaluationScope) -> Result<Value, EvaluationError> + Send + Sync;

struct FnExpression(Arc<ExprFn>);

impl CompiledExpression for FnExpression {
    fn evaluate(&self, scope: &EvaluationScope) -> Result<Value, EvaluationError> {
        (self.0)(scope)
    }
}

/// An [`ExpressionEngine`] whose "compilation" is a lookup of a Rust closure
/// registered under the expression's source text.
///
/// ```rust,ignore
/// let engine = FnExpressionEngine::new()
///     .with("#id", |s| Ok(s.variable("id")?.unwrap_or_default()))
///     .with("#id > 0", |s| {
///         let id = s.variable("id")?.and_then(|v| v.as_i64()).unwrap_or(0);
///         Ok(serde_json::json!(id > 0))
///     });
/// ```
#[derive(Default, Clone)]
pub struct FnExpressionEngine {
    table: HashMap<Arc<str>, Arc<ExprFn>>,
}

impl FnExpressionEngine {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` as the compiled form of `source`.
    #[must_use = "builder methods must be chained or built"]
    pub fn with<F>(mut self, source: impl AsRef<str>, f: F) -> Self
    where
        F: Fn(&EvaluationScope) -> Result<Value, EvaluationError> + Send + Sync + 'static,
    {
        self.register(source, f);
        self
    }

    /// Register `f` as the compiled form of `source`, replacing any previous entry.
    pub fn register<F>(&mut self, source: impl AsRef<str>, f: F)
    where
        F: Fn(&EvaluationScope) -> Result<Value, EvaluationError> + Send + Sync + 'static,
    {
        self.table
            .insert(Arc::from(source.as_ref().trim()), Arc::new(f));
    }

    /// Number of registered expressions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no expression is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for FnExpressionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sources: Vec<&str> = self.table.keys().map(|k| &**k).collect();
        sources.sort_unstable();
        f.debug_struct("FnExpressionEngine")
            .field("sources", &sources)
            .finish()
    }
}

impl ExpressionEngine for FnExpressionEngine {
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledExpression>, EvaluationError> {
        self.table
            .get(source.trim())
            .map(|f| Arc::new(FnExpression(Arc::clone(f))) as Arc<dyn CompiledExpression>)
            .ok_or_else(|| EvaluationError::Compile {
                message: format!("no expression registered for `{source}`"),
            })
    }
}
