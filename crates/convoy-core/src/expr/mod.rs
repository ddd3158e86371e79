//! Expression language
//!
//! A small arithmetic language over numbers and strings used for assignment
//! predicates, schema checks and property templating:
//!
//! ```text
//! 3*(1+2)/(2+1)            -> 2
//! dog+cat                  -> "dogcat"
//! crazydogs-dogs           -> "crazy"
//! $equal($property(os), linux)
//! ```

mod eval;
mod functions;
mod lexer;
mod parser;

use std::collections::HashMap;
use std::sync::LazyLock;

use thiserror::Error;
use tracing::trace;

use convoy_model::Value;

pub use functions::{EvalContext, ExprFunction, FunctionRegistry};
pub use parser::{BinaryOp, Expr, UnaryOp};

/// Parse and evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("parse error at {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("unexpected token: expected {expected}, found '{found}'")]
    UnexpectedToken { expected: String, found: String },

    #[error("unexpected end of input: expected {0}")]
    UnexpectedEof(String),

    #[error("divide by zero")]
    DivisionByZero,

    #[error("operator '{op}' cannot be applied to '{operand}'")]
    InvalidOperand { op: char, operand: String },

    #[error("operator '{op}' cannot be applied to '{left}' and '{right}'")]
    InvalidOperands { op: char, left: String, right: String },

    #[error("invalid function name: '{0}'")]
    UnknownFunction(String),

    #[error("${function}() expects {expected} arguments, found {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("${function}(): {message}")]
    Function { function: String, message: String },
}

impl ExprError {
    /// Whether the text failed to parse, as opposed to failing at evaluation
    #[must_use]
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            ExprError::Parse { .. } | ExprError::UnexpectedToken { .. } | ExprError::UnexpectedEof(_)
        )
    }
}

/// Parse `text` into an expression tree
pub fn parse(text: &str) -> Result<Expr, ExprError> {
    parser::Parser::parse(text)
}

/// Evaluates expressions against a function registry
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    functions: FunctionRegistry,
}

impl Evaluator {
    #[must_use]
    pub fn new(functions: FunctionRegistry) -> Self {
        Self { functions }
    }

    #[must_use]
    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Evaluate an already parsed expression
    pub fn eval(&self, expr: &Expr, ctx: &EvalContext) -> Result<Value, ExprError> {
        eval::eval(expr, ctx, &self.functions)
    }

    pub fn evaluate(&self, text: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
        let expr = parse(text.trim())?;
        self.eval(&expr, ctx)
    }

    /// Like [`evaluate`](Self::evaluate), but text that does not parse is
    /// returned unchanged as a string
    pub fn evaluate_or_literal(&self, text: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
        match parse(text.trim()) {
            Ok(expr) => self.eval(&expr, ctx),
            Err(e) => {
                trace!(text, error = %e, "not an expression, keeping literal");
                Ok(Value::String(text.to_string()))
            }
        }
    }

    /// Template every string containing a `$` call, recursing into lists
    /// and maps
    pub fn evaluate_properties(
        &self,
        ctx: &EvalContext,
        properties: &HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, ExprError> {
        properties
            .iter()
            .map(|(k, v)| Ok((k.clone(), self.evaluate_value(ctx, v)?)))
            .collect()
    }

    fn evaluate_value(&self, ctx: &EvalContext, value: &Value) -> Result<Value, ExprError> {
        match value {
            Value::String(s) if s.contains('$') => self.evaluate_or_literal(s, ctx),
            Value::List(items) => items
                .iter()
                .map(|v| self.evaluate_value(ctx, v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.evaluate_value(ctx, v)?)))
                .collect::<Result<_, ExprError>>()
                .map(Value::Map),
            other => Ok(other.clone()),
        }
    }
}

static BUILTIN: LazyLock<Evaluator> = LazyLock::new(Evaluator::default);

/// Evaluate `text` with the builtin function library
pub fn evaluate(text: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
    BUILTIN.evaluate(text, ctx)
}

/// Evaluate `text`, keeping it as a literal string if it does not parse
pub fn evaluate_or_literal(text: &str, ctx: &EvalContext) -> Result<Value, ExprError> {
    BUILTIN.evaluate_or_literal(text, ctx)
}

/// Template property values with the builtin function library
pub fn evaluate_properties(
    ctx: &EvalContext,
    properties: &HashMap<String, Value>,
) -> Result<HashMap<String, Value>, ExprError> {
    BUILTIN.evaluate_properties(ctx, properties)
}
