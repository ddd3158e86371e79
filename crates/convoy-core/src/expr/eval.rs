//! Tree-walking evaluation
//!
//! Operators dispatch on the runtime types of their operands. Only true
//! numbers take the numeric path, numeric-looking strings do not.

use convoy_model::Value;
use convoy_model::value::format_number;

use super::ExprError;
use super::functions::{EvalContext, FunctionRegistry};
use super::parser::{BinaryOp, Expr, UnaryOp};

/// Longest string, in bytes, that `*` repetition may produce
pub const MAX_REPEAT_LEN: usize = 1 << 20;

pub fn eval(expr: &Expr, ctx: &EvalContext, functions: &FunctionRegistry) -> Result<Value, ExprError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Ident(text) | Expr::Str(text) => Ok(Value::String(text.clone())),
        Expr::Unary { op, expr } => {
            let value = eval(expr, ctx, functions)?;
            match (op, value) {
                (UnaryOp::Plus, v) => Ok(v),
                (UnaryOp::Minus, Value::Number(n)) => Ok(Value::Number(-n)),
                (UnaryOp::Minus, other) => Err(ExprError::InvalidOperand {
                    op: '-',
                    operand: other.to_string(),
                }),
            }
        }
        Expr::Binary { op, left, right } => {
            let left = eval(left, ctx, functions)?;
            let right = eval(right, ctx, functions)?;
            binary(*op, &left, &right)
        }
        Expr::Call { name, args } => {
            let args = args
                .iter()
                .map(|a| eval(a, ctx, functions))
                .collect::<Result<Vec<_>, _>>()?;
            functions.call(name, &args, ctx)
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    if let (Value::Number(a), Value::Number(b)) = (left, right) {
        return match op {
            BinaryOp::Add => Ok(Value::Number(a + b)),
            BinaryOp::Sub => Ok(Value::Number(a - b)),
            BinaryOp::Mul => Ok(Value::Number(a * b)),
            BinaryOp::Div if *b == 0.0 => Err(ExprError::DivisionByZero),
            BinaryOp::Div => Ok(Value::Number(a / b)),
        };
    }

    let invalid = || ExprError::InvalidOperands {
        op: op.symbol(),
        left: left.to_string(),
        right: right.to_string(),
    };
    match op {
        BinaryOp::Add => Ok(Value::String(format!("{left}{right}"))),
        BinaryOp::Sub => Ok(Value::String(
            left.to_string().replacen(&right.to_string(), "", 1),
        )),
        BinaryOp::Mul => match right {
            Value::Number(n) if !left.is_number() && *n > 0.0 && n.fract() == 0.0 => {
                let times = format_number(*n).parse::<usize>().map_err(|_| invalid())?;
                let text = left.to_string();
                match text.len().checked_mul(times) {
                    Some(len) if len <= MAX_REPEAT_LEN => Ok(Value::String(text.repeat(times))),
                    _ => Err(invalid()),
                }
            }
            _ => Err(invalid()),
        },
        BinaryOp::Div => Err(invalid()),
    }
}
