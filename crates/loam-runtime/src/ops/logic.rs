//! Boolean and comparison opcodes.
//!
//! `and`/`or` short-circuit, so they take unevaluated nodes. Comparisons are
//! strict about operand kinds: ordering is defined for numbers and strings
//! only, equality for any pair of values.

use super::{expect_arity, expect_min_arity};
use crate::context::ScriptContext;
use crate::error::ScriptError;
use crate::eval::{evaluate, is_truthy, kind_of};
use crate::registry::{OpFuture, OpcodeRegistry, RegistryError};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use serde_json::Value;
use std::cmp::Ordering;

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("and", "Logical and", "logic", ValueKind::Bool)
            .lazy()
            .variadic(),
        op_and,
    )?;
    registry.register(
        OpcodeSpec::new("or", "Logical or", "logic", ValueKind::Bool)
            .lazy()
            .variadic(),
        op_or,
    )?;
    registry.register(
        OpcodeSpec::new("not", "Logical not", "logic", ValueKind::Bool)
            .with_params(vec![ParamSpec::new("value", ValueKind::Any)]),
        op_not,
    )?;
    registry.register(cmp_spec("=="), op_eq)?;
    registry.register(cmp_spec("!="), op_ne)?;
    registry.register(cmp_spec("<"), op_lt)?;
    registry.register(cmp_spec("<="), op_le)?;
    registry.register(cmp_spec(">"), op_gt)?;
    registry.register(cmp_spec(">="), op_ge)?;
    Ok(())
}

fn cmp_spec(name: &str) -> OpcodeSpec {
    OpcodeSpec::new(name, "Compare", "logic", ValueKind::Bool).with_params(vec![
        ParamSpec::new("left", ValueKind::Any),
        ParamSpec::new("right", ValueKind::Any),
    ])
}

fn op_and<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("and", args, 1)?;
        for arg in args {
            if !is_truthy(&evaluate(arg, ctx).await?) {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    })
}

fn op_or<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("or", args, 1)?;
        for arg in args {
            if is_truthy(&evaluate(arg, ctx).await?) {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    })
}

fn op_not<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("not", args, 1)?;
        let value = evaluate(&args[0], ctx).await?;
        Ok(Value::Bool(!is_truthy(&value)))
    })
}

async fn binary(
    op: &str,
    args: &[Expr],
    ctx: &mut ScriptContext,
) -> Result<(Value, Value), ScriptError> {
    expect_arity(op, args, 2)?;
    let left = evaluate(&args[0], ctx).await?;
    let right = evaluate(&args[1], ctx).await?;
    Ok((left, right))
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<Ordering, ScriptError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            a.partial_cmp(&b)
                .ok_or_else(|| ScriptError::Type(format!("{op}: values are not comparable")))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ScriptError::Type(format!(
            "{op}: cannot order {} and {}",
            kind_of(left),
            kind_of(right)
        ))),
    }
}

fn op_eq<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let (left, right) = binary("==", args, ctx).await?;
        Ok(Value::Bool(left == right))
    })
}

fn op_ne<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let (left, right) = binary("!=", args, ctx).await?;
        Ok(Value::Bool(left != right))
    })
}

fn op_lt<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let (left, right) = binary("<", args, ctx).await?;
        Ok(Value::Bool(compare("<", &left, &right)? == Ordering::Less))
    })
}

fn op_le<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let (left, right) = binary("<=", args, ctx).await?;
        Ok(Value::Bool(compare("<=", &left, &right)? != Ordering::Greater))
    })
}

fn op_gt<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let (left, right) = binary(">", args, ctx).await?;
        Ok(Value::Bool(compare(">", &left, &right)? == Ordering::Greater))
    })
}

fn op_ge<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let (left, right) = binary(">=", args, ctx).await?;
        Ok(Value::Bool(compare(">=", &left, &right)? != Ordering::Less))
    })
}
