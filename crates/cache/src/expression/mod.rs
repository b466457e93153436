//! Key and predicate evaluation.
//!
//! The textual expression language is supplied by an [`ExpressionEngine`];
//! this module owns the evaluation scope built from invocation state and the
//! per-call-site memo of compiled expressions.

mod evaluator;
mod scope;
mod table;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub use evaluator::{CacheExpressionEvaluator, ElementKey};
pub(crate) use evaluator::expression_error;
pub use scope::{EvaluationScope, ResultState};
pub use table::FnExpressionEngine;

/// Errors raised while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    /// A variable was referenced at a point where it cannot exist yet.
    #[error("variable '{name}' is not available at this point")]
    VariableNotAvailable {
        /// The variable name.
        name: String,
    },

    /// The engine could not compile the expression.
    #[error("cannot compile expression: {message}")]
    Compile {
        /// Engine-specific description.
        message: String,
    },

    /// The expression raised an error while evaluating.
    #[error("evaluation failed: {message}")]
    Evaluation {
        /// Engine-specific description.
        message: String,
    },

    /// A predicate produced something that is not a boolean.
    #[error("expected a boolean, got {actual}")]
    NotBoolean {
        /// The offending value.
        actual: Value,
    },
}

impl EvaluationError {
    /// Create an evaluation failure.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Whether this is the "result not available yet" signal.
    #[must_use]
    pub fn is_variable_not_available(&self) -> bool {
        matches!(self, Self::VariableNotAvailable { .. })
    }
}

/// An expression compiled by an [`ExpressionEngine`].
pub trait CompiledExpression: Send + Sync {
    /// Evaluate against a scope.
    fn evaluate(&self, scope: &EvaluationScope) -> Result<Value, EvaluationError>;
}

/// Compiles expression source text.
///
/// Implementations are black boxes to the cache engine; they only see the
/// variables exposed by [`EvaluationScope`].
pub trait ExpressionEngine: Send + Sync + fmt::Debug {
    /// Compile `source` into a reusable expression.
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledExpression>, EvaluationError>;
}
