//! Evaluation scope for key, condition, and unless expressions.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::EvaluationError;
use crate::method::{MethodId, TypeName};

/// What an expression may learn about the call's result.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultState {
    /// The computation has not run; `result` resolves to nothing.
    NotComputed,
    /// Referencing `result` is an error ([`EvaluationError::VariableNotAvailable`]).
    Unavailable,
    /// The computation produced this value.
    Value(Value),
}

/// Variables visible to an expression.
///
/// Exposes `args`, `target`, `targetType`, `method`, `caches`, `root`,
/// positional `p<N>` / `a<N>`, declared parameter names, and `result`.
#[derive(Debug, Clone)]
pub struct EvaluationScope {
    caches: Vec<Arc<str>>,
    method: MethodId,
    args: Vec<Value>,
    target: Value,
    target_type: TypeName,
    result: ResultState,
}

impl EvaluationScope {
    /// Build a scope from invocation state.
    pub fn new(
        caches: Vec<Arc<str>>,
        method: MethodId,
        args: Vec<Value>,
        target: Value,
        target_type: TypeName,
        result: ResultState,
    ) -> Self {
        Self {
            caches,
            method,
            args,
            target,
            target_type,
            result,
        }
    }

    /// Arguments after variadic flattening.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The target instance.
    #[must_use]
    pub fn target(&self) -> &Value {
        &self.target
    }

    /// The result state this scope was built with.
    #[must_use]
    pub fn result_state(&self) -> &ResultState {
        &self.result
    }

    /// The call's result.
    ///
    /// `Ok(None)` before the computation ran; an error when the result was
    /// explicitly marked unavailable.
    pub fn result(&self) -> Result<Option<&Value>, EvaluationError> {
        match &self.result {
            ResultState::NotComputed => Ok(None),
            ResultState::Unavailable => Err(EvaluationError::VariableNotAvailable {
                name: "result".to_owned(),
            }),
            ResultState::Value(v) => Ok(Some(v)),
        }
    }

    /// Resolve a variable by name.
    ///
    /// Unknown names resolve to `Ok(None)`; only `result` can fail.
    pub fn variable(&self, name: &str) -> Result<Option<Value>, EvaluationError> {
        let value = match name {
            "result" => return Ok(self.result()?.cloned()),
            "args" => Value::Array(self.args.clone()),
            "target" => self.target.clone(),
            "targetType" => Value::String(self.target_type.to_string()),
            "method" | "methodName" => Value::String(self.method.name().to_owned()),
            "caches" => self.cache_names(),
            "root" => self.root(),
            _ => return Ok(self.argument(name).cloned()),
        };
        Ok(Some(value))
    }

    fn cache_names(&self) -> Value {
        Value::Array(
            self.caches
                .iter()
                .map(|c| Value::String(c.to_string()))
                .collect(),
        )
    }

    fn root(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("args".to_owned(), Value::Array(self.args.clone()));
        obj.insert("target".to_owned(), self.target.clone());
        obj.insert(
            "targetType".to_owned(),
            Value::String(self.target_type.to_string()),
        );
        obj.insert(
            "method".to_owned(),
            Value::String(self.method.name().to_owned()),
        );
        obj.insert("caches".to_owned(), self.cache_names());
        Value::Object(obj)
    }

    /// Positional (`p0`, `a0`) or named argument lookup.
    fn argument(&self, name: &str) -> Option<&Value> {
        let positional = name
            .strip_prefix('p')
            .or_else(|| name.strip_prefix('a'))
            .and_then(|idx| idx.parse::<usize>().ok());
        if let Some(idx) = positional {
            return self.args.get(idx);
        }
        self.method
            .parameter_names()
            .iter()
            .position(|p| &**p == name)
            .and_then(|idx| self.args.get(idx))
    }
}
