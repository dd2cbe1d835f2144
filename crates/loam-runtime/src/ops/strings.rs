//! String opcodes.

use super::{expect_arity, expect_min_arity};
use crate::context::ScriptContext;
use crate::eval::{as_str, eval_args};
use crate::registry::{OpFuture, OpcodeRegistry, RegistryError};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use serde_json::Value;

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("str.concat", "Concatenate", "str", ValueKind::String)
            .variadic()
            .with_params(vec![ParamSpec::new("values", ValueKind::Any)]),
        op_concat,
    )?;
    registry.register(
        OpcodeSpec::new("str.len", "Length", "str", ValueKind::Number)
            .with_params(vec![ParamSpec::new("value", ValueKind::String)]),
        op_len,
    )?;
    registry.register(
        OpcodeSpec::new("str.upper", "Uppercase", "str", ValueKind::String)
            .with_params(vec![ParamSpec::new("value", ValueKind::String)]),
        op_upper,
    )?;
    registry.register(
        OpcodeSpec::new("str.lower", "Lowercase", "str", ValueKind::String)
            .with_params(vec![ParamSpec::new("value", ValueKind::String)]),
        op_lower,
    )?;
    registry.register(
        OpcodeSpec::new("str.split", "Split on separator", "str", ValueKind::Array).with_params(
            vec![
                ParamSpec::new("value", ValueKind::String),
                ParamSpec::new("separator", ValueKind::String),
            ],
        ),
        op_split,
    )?;
    registry.register(
        OpcodeSpec::new("str.contains", "Substring test", "str", ValueKind::Bool).with_params(
            vec![
                ParamSpec::new("value", ValueKind::String),
                ParamSpec::new("needle", ValueKind::String),
            ],
        ),
        op_contains,
    )?;
    Ok(())
}

fn op_concat<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("str.concat", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let mut out = String::new();
        for value in &values {
            match value {
                Value::String(s) => out.push_str(s),
                Value::Null => {}
                other => out.push_str(&other.to_string()),
            }
        }
        Ok(Value::String(out))
    })
}

fn op_len<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("str.len", args, 1)?;
        let values = eval_args(args, ctx).await?;
        Ok(serde_json::json!(as_str(&values[0])?.chars().count()))
    })
}

fn op_upper<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("str.upper", args, 1)?;
        let values = eval_args(args, ctx).await?;
        Ok(Value::String(as_str(&values[0])?.to_uppercase()))
    })
}

fn op_lower<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("str.lower", args, 1)?;
        let values = eval_args(args, ctx).await?;
        Ok(Value::String(as_str(&values[0])?.to_lowercase()))
    })
}

fn op_split<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("str.split", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let value = as_str(&values[0])?;
        let separator = as_str(&values[1])?;
        let parts: Vec<Value> = if separator.is_empty() {
            value
                .chars()
                .map(|c| Value::String(c.to_string()))
                .collect()
        } else {
            value
                .split(separator)
                .map(|s| Value::String(s.to_string()))
                .collect()
        };
        Ok(Value::Array(parts))
    })
}

fn op_contains<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("str.contains", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let value = as_str(&values[0])?;
        let needle = as_str(&values[1])?;
        Ok(Value::Bool(value.contains(needle)))
    })
}
