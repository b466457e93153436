//! Memoizing evaluator for cache directive expressions.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use super::{CompiledExpression, EvaluationError, EvaluationScope, ExpressionEngine, ResultState};
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::method::{MethodId, TypeName};

/// The call site an expression is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementKey {
    method: MethodId,
    target_type: TypeName,
}

impl ElementKey {
    /// Key for `method` invoked on `target_type`.
    pub fn new(method: MethodId, target_type: TypeName) -> Self {
        Self {
            method,
            target_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExpressionKey {
    element: ElementKey,
    source: Arc<str>,
}

type ExpressionCache = DashMap<ExpressionKey, Arc<dyn CompiledExpression>>;

/// Builds scopes and evaluates key, condition, and unless expressions.
///
/// Compiled expressions are cached per call site and source text, one table
/// per expression role.
pub struct CacheExpressionEvaluator {
    engine: Arc<dyn ExpressionEngine>,
    key_cache: ExpressionCache,
    condition_cache: ExpressionCache,
    unless_cache: ExpressionCache,
}

impl CacheExpressionEvaluator {
    /// Create an evaluator over the given engine.
    pub fn new(engine: Arc<dyn ExpressionEngine>) -> Self {
        Self {
            engine,
            key_cache: DashMap::new(),
            condition_cache: DashMap::new(),
            unless_cache: DashMap::new(),
        }
    }

    /// Build an evaluation scope.
    pub fn build_scope(
        &self,
        caches: Vec<Arc<str>>,
        method: &MethodId,
        args: Vec<Value>,
        target: Value,
        target_type: &TypeName,
        result: ResultState,
    ) -> EvaluationScope {
        EvaluationScope::new(
            caches,
            method.clone(),
            args,
            target,
            target_type.clone(),
            result,
        )
    }

    /// Evaluate a key expression. A null key is an authoring error.
    pub fn key(
        &self,
        expr: &str,
        element: &ElementKey,
        scope: &EvaluationScope,
        directive: &dyn std::fmt::Display,
    ) -> Result<CacheKey> {
        let value = self
            .evaluate(&self.key_cache, expr, element, scope)
            .map_err(|source| expression_error(expr, source))?;
        if value.is_null() {
            return Err(CacheError::NullKey {
                directive: directive.to_string(),
            });
        }
        Ok(CacheKey::Value(value))
    }

    /// Evaluate a condition. No expression means the condition passes.
    ///
    /// A reference to an unavailable `result` is returned as-is so callers
    /// can tell it apart from other failures.
    pub fn condition(
        &self,
        expr: Option<&str>,
        element: &ElementKey,
        scope: &EvaluationScope,
    ) -> std::result::Result<bool, EvaluationError> {
        match expr {
            None => Ok(true),
            Some(expr) => {
                let value = self.evaluate(&self.condition_cache, expr, element, scope)?;
                as_bool(value)
            }
        }
    }

    /// Evaluate an unless expression. No expression never suppresses.
    pub fn unless(
        &self,
        expr: Option<&str>,
        element: &ElementKey,
        scope: &EvaluationScope,
    ) -> Result<bool> {
        match expr {
            None => Ok(false),
            Some(expr) => self
                .evaluate(&self.unless_cache, expr, element, scope)
                .and_then(as_bool)
                .map_err(|source| expression_error(expr, source)),
        }
    }

    /// Drop every compiled expression.
    pub fn clear(&self) {
        self.key_cache.clear();
        self.condition_cache.clear();
        self.unless_cache.clear();
    }

    fn evaluate(
        &self,
        cache: &ExpressionCache,
        expr: &str,
        element: &ElementKey,
        scope: &EvaluationScope,
    ) -> std::result::Result<Value, EvaluationError> {
        let compiled = self.compiled(cache, expr, element)?;
        compiled.evaluate(scope)
    }

    fn compiled(
        &self,
        cache: &ExpressionCache,
        expr: &str,
        element: &ElementKey,
    ) -> std::result::Result<Arc<dyn CompiledExpression>, EvaluationError> {
        let key = ExpressionKey {
            element: element.clone(),
            source: Arc::from(expr),
        };
        if let Some(hit) = cache.get(&key) {
            return Ok(Arc::clone(hit.value()));
        }
        let compiled = self.engine.compile(expr)?;
        cache.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }
}

impl std::fmt::Debug for CacheExpressionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheExpressionEvaluator")
            .field("engine", &self.engine)
            .field("compiled", &(self.key_cache.len() + self.condition_cache.len() + self.unless_cache.len()))
            .finish()
    }
}

/// Wrap an evaluation failure with the expression that raised it.
pub(crate) fn expression_error(expr: &str, source: EvaluationError) -> CacheError {
    CacheError::Expression {
        expression: expr.to_owned(),
        source,
    }
}

fn as_bool(value: Value) -> std::result::Result<bool, EvaluationError> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        Value::String(ref s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(ref s) if s.eq_ignore_ascii_case("false") => Ok(false),
        actual => Err(EvaluationError::NotBoolean { actual }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::FnExpressionEngine;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingEngine {
        inner: FnExpressionEngine,
        compiles: AtomicUsize,
    }

    impl ExpressionEngine for CountingEngine {
        fn compile(
            &self,
            source: &str,
        ) -> std::result::Result<Arc<dyn CompiledExpression>, EvaluationError> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            self.inner.compile(source)
        }
    }

    fn element() -> ElementKey {
        ElementKey::new(MethodId::new("Svc", "get"), TypeName::new("Svc"))
    }

    fn scope(evaluator: &CacheExpressionEvaluator, result: ResultState) -> EvaluationScope {
        evaluator.build_scope(
            vec![Arc::from("c")],
            &MethodId::new("Svc", "get").with_parameters(["id"]),
            vec![json!(7)],
            Value::Null,
            &TypeName::new("Svc"),
            result,
        )
    }

    fn engine() -> Arc<CountingEngine> {
        let inner = FnExpressionEngine::new()
            .with("#id", |s| Ok(s.variable("id")?.unwrap_or(Value::Null)))
            .with("#missing", |s| Ok(s.variable("missing")?.unwrap_or(Value::Null)))
            .with("#result == null", |s| Ok(json!(s.result()?.is_none_or(Value::is_null))))
            .with("42", |_| Ok(json!(42)));
        Arc::new(CountingEngine {
            inner,
            compiles: AtomicUsize::new(0),
        })
    }

    #[test]
    fn compiled_expressions_are_memoized() {
        let engine = engine();
        let evaluator = CacheExpressionEvaluator::new(engine.clone());
        let s = scope(&evaluator, ResultState::NotComputed);
        for _ in 0..3 {
            let key = evaluator.key("#id", &element(), &s, &"d").unwrap();
            assert_eq!(key, CacheKey::Value(json!(7)));
        }
        assert_eq!(engine.compiles.load(Ordering::SeqCst), 1);

        evaluator.clear();
        evaluator.key("#id", &element(), &s, &"d").unwrap();
        assert_eq!(engine.compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn null_key_is_rejected() {
        let evaluator = CacheExpressionEvaluator::new(engine());
        let s = scope(&evaluator, ResultState::NotComputed);
        let err = evaluator.key("#missing", &element(), &s, &"d").unwrap_err();
        assert!(matches!(err, CacheError::NullKey { .. }));
    }

    #[test]
    fn absent_predicates_use_neutral_defaults() {
        let evaluator = CacheExpressionEvaluator::new(engine());
        let s = scope(&evaluator, ResultState::NotComputed);
        assert!(evaluator.condition(None, &element(), &s).unwrap());
        assert!(!evaluator.unless(None, &element(), &s).unwrap());
    }

    #[test]
    fn unavailable_result_fails_fast() {
        let evaluator = CacheExpressionEvaluator::new(engine());
        let s = scope(&evaluator, ResultState::Unavailable);
        let err = evaluator
            .condition(Some("#result == null"), &element(), &s)
            .unwrap_err();
        assert!(err.is_variable_not_available());
    }

    #[test]
    fn unless_sees_the_result() {
        let evaluator = CacheExpressionEvaluator::new(engine());
        let null_result = scope(&evaluator, ResultState::Value(Value::Null));
        let some_result = scope(&evaluator, ResultState::Value(json!("x")));
        assert!(evaluator.unless(Some("#result == null"), &element(), &null_result).unwrap());
        assert!(!evaluator.unless(Some("#result == null"), &element(), &some_result).unwrap());
    }

    #[test]
    fn non_boolean_predicate_is_an_error() {
        let evaluator = CacheExpressionEvaluator::new(engine());
        let s = scope(&evaluator, ResultState::NotComputed);
        let err = evaluator.condition(Some("42"), &element(), &s).unwrap_err();
        assert_eq!(err, EvaluationError::NotBoolean { actual: json!(42) });
    }

    #[test]
    fn unknown_expression_fails_to_compile() {
        let evaluator = CacheExpressionEvaluator::new(engine());
        let s = scope(&evaluator, ResultState::NotComputed);
        let err = evaluator.unless(Some("#nope"), &element(), &s).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Expression {
                source: EvaluationError::Compile { .. },
                ..
            }
        ));
    }
}
