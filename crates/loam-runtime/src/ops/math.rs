//! Arithmetic opcodes. All operate on f64; `+` doubles as string
//! concatenation when the first operand is a string.

use super::expect_min_arity;
use crate::context::ScriptContext;
use crate::error::ScriptError;
use crate::eval::{as_number, eval_args};
use crate::registry::{OpFuture, OpcodeRegistry, RegistryError};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use serde_json::Value;

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(math_spec("+", "Add"), op_add)?;
    registry.register(math_spec("-", "Subtract"), op_sub)?;
    registry.register(math_spec("*", "Multiply"), op_mul)?;
    registry.register(math_spec("/", "Divide"), op_div)?;
    registry.register(math_spec("%", "Modulo"), op_mod)?;
    Ok(())
}

fn math_spec(name: &str, label: &str) -> OpcodeSpec {
    OpcodeSpec::new(name, label, "math", ValueKind::Number)
        .variadic()
        .with_params(vec![ParamSpec::new("values", ValueKind::Number)])
}

fn op_add<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("+", args, 1)?;
        let values = eval_args(args, ctx).await?;
        if let Value::String(first) = &values[0] {
            let mut out = first.clone();
            for value in &values[1..] {
                match value {
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            return Ok(Value::String(out));
        }
        let mut total = as_number(&values[0])?;
        for value in &values[1..] {
            total += as_number(value)?;
        }
        Ok(serde_json::json!(total))
    })
}

fn op_sub<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("-", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let mut total = as_number(&values[0])?;
        if values.len() == 1 {
            return Ok(serde_json::json!(-total));
        }
        for value in &values[1..] {
            total -= as_number(value)?;
        }
        Ok(serde_json::json!(total))
    })
}

fn op_mul<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("*", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let mut total = as_number(&values[0])?;
        for value in &values[1..] {
            total *= as_number(value)?;
        }
        Ok(serde_json::json!(total))
    })
}

fn op_div<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("/", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let mut total = as_number(&values[0])?;
        for value in &values[1..] {
            let divisor = as_number(value)?;
            if divisor == 0.0 {
                return Err(ScriptError::Type("division by zero".to_string()));
            }
            total /= divisor;
        }
        Ok(serde_json::json!(total))
    })
}

fn op_mod<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("%", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let left = as_number(&values[0])?;
        let right = as_number(&values[1])?;
        if right == 0.0 {
            return Err(ScriptError::Type("modulo by zero".to_string()));
        }
        Ok(serde_json::json!(left % right))
    })
}
