//! List opcodes. Lists are immutable values; `list.push` and friends return
//! new lists rather than mutating in place.

use super::{expect_arity, expect_min_arity};
use crate::context::ScriptContext;
use crate::error::ScriptError;
use crate::eval::{as_array, as_number, eval_args};
use crate::registry::{OpFuture, OpcodeRegistry, RegistryError};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use serde_json::Value;

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("list.of", "Build a list", "list", ValueKind::Array).variadic(),
        op_of,
    )?;
    registry.register(
        OpcodeSpec::new("list.len", "List length", "list", ValueKind::Number)
            .with_params(vec![ParamSpec::new("list", ValueKind::Array)]),
        op_len,
    )?;
    registry.register(
        OpcodeSpec::new("list.get", "Element at index", "list", ValueKind::Any).with_params(vec![
            ParamSpec::new("list", ValueKind::Array),
            ParamSpec::new("index", ValueKind::Number),
        ]),
        op_get,
    )?;
    registry.register(
        OpcodeSpec::new("list.push", "Append an element", "list", ValueKind::Array).with_params(
            vec![
                ParamSpec::new("list", ValueKind::Array),
                ParamSpec::new("value", ValueKind::Any),
            ],
        ),
        op_push,
    )?;
    registry.register(
        OpcodeSpec::new("list.concat", "Concatenate lists", "list", ValueKind::Array)
            .variadic()
            .with_params(vec![ParamSpec::new("lists", ValueKind::Array)]),
        op_concat,
    )?;
    registry.register(
        OpcodeSpec::new("list.contains", "Membership test", "list", ValueKind::Bool).with_params(
            vec![
                ParamSpec::new("list", ValueKind::Array),
                ParamSpec::new("value", ValueKind::Any),
            ],
        ),
        op_contains,
    )?;
    registry.register(
        OpcodeSpec::new("list.slice", "Sublist", "list", ValueKind::Array).with_params(vec![
            ParamSpec::new("list", ValueKind::Array),
            ParamSpec::new("start", ValueKind::Number),
            ParamSpec::optional("end", ValueKind::Number),
        ]),
        op_slice,
    )?;
    Ok(())
}

fn op_of<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move { Ok(Value::Array(eval_args(args, ctx).await?)) })
}

fn op_len<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("list.len", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let list = as_array(&values[0])?;
        Ok(serde_json::json!(list.len()))
    })
}

fn op_get<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("list.get", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let list = as_array(&values[0])?;
        let index = as_number(&values[1])?;
        if index < 0.0 || index.fract() != 0.0 {
            return Err(ScriptError::Type(format!("list.get: bad index {index}")));
        }
        Ok(list.get(index as usize).cloned().unwrap_or(Value::Null))
    })
}

fn op_push<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("list.push", args, 2)?;
        let mut values = eval_args(args, ctx).await?;
        let value = values.pop().unwrap_or(Value::Null);
        let mut list = match values.pop() {
            Some(Value::Array(list)) => list,
            Some(other) => {
                return Err(ScriptError::Type(format!(
                    "expected list, got {}",
                    crate::eval::kind_of(&other)
                )));
            }
            None => unreachable!(),
        };
        list.push(value);
        Ok(Value::Array(list))
    })
}

fn op_concat<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("list.concat", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let mut out = Vec::new();
        for value in &values {
            out.extend(as_array(value)?.iter().cloned());
        }
        Ok(Value::Array(out))
    })
}

fn op_contains<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("list.contains", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let list = as_array(&values[0])?;
        Ok(Value::Bool(list.contains(&values[1])))
    })
}

fn op_slice<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("list.slice", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let list = as_array(&values[0])?;
        let start = (as_number(&values[1])?.max(0.0) as usize).min(list.len());
        let end = match values.get(2) {
            Some(v) => (as_number(v)?.max(0.0) as usize).min(list.len()),
            None => list.len(),
        };
        if start > end {
            return Ok(Value::Array(Vec::new()));
        }
        Ok(Value::Array(list[start..end].to_vec()))
    })
}
