//! Control flow and bindings.

use super::{expect_arity, expect_ident, expect_min_arity};
use crate::context::{ScriptContext, flatten_entity};
use crate::error::ScriptError;
use crate::eval::{evaluate, is_truthy};
use crate::registry::{OpFuture, OpcodeRegistry, RegistryError};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use serde_json::Value;

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("seq", "Sequence", "core", ValueKind::Any).variadic(),
        op_seq,
    )?;
    registry.register(
        OpcodeSpec::new("let", "Bind variable", "core", ValueKind::Any).with_params(vec![
            ParamSpec::new("name", ValueKind::String),
            ParamSpec::new("value", ValueKind::Any),
        ]),
        op_let,
    )?;
    registry.register(
        OpcodeSpec::new("var", "Read variable", "core", ValueKind::Any)
            .with_params(vec![ParamSpec::new("name", ValueKind::String)]),
        op_var,
    )?;
    registry.register(
        OpcodeSpec::new("if", "Conditional", "core", ValueKind::Any)
            .lazy()
            .with_params(vec![
                ParamSpec::new("condition", ValueKind::Any),
                ParamSpec::new("then", ValueKind::Any),
                ParamSpec::optional("else", ValueKind::Any),
            ]),
        op_if,
    )?;
    registry.register(
        OpcodeSpec::new("for", "Iterate a list", "core", ValueKind::Null)
            .lazy()
            .with_params(vec![
                ParamSpec::new("name", ValueKind::String),
                ParamSpec::new("list", ValueKind::Array),
                ParamSpec::new("body", ValueKind::Any),
            ]),
        op_for,
    )?;
    registry.register(
        OpcodeSpec::new("try", "Catch errors", "core", ValueKind::Any)
            .lazy()
            .with_params(vec![
                ParamSpec::new("body", ValueKind::Any),
                ParamSpec::optional("error_name", ValueKind::String),
                ParamSpec::optional("recovery", ValueKind::Any),
            ]),
        op_try,
    )?;
    registry.register(
        OpcodeSpec::new("throw", "Raise an error", "core", ValueKind::Null)
            .with_params(vec![ParamSpec::new("message", ValueKind::Any)]),
        op_throw,
    )?;
    registry.register(
        OpcodeSpec::new("warn", "Record a warning", "core", ValueKind::Null)
            .with_params(vec![ParamSpec::new("value", ValueKind::Any)]),
        op_warn,
    )?;
    registry.register(
        OpcodeSpec::new("this", "Current entity", "core", ValueKind::Object),
        op_this,
    )?;
    registry.register(
        OpcodeSpec::new("caller", "Calling entity id", "core", ValueKind::Number),
        op_caller,
    )?;
    registry.register(
        OpcodeSpec::new("args", "Invocation arguments", "core", ValueKind::Array),
        op_args,
    )?;
    Ok(())
}

fn op_seq<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        let mut last = Value::Null;
        for arg in args {
            last = evaluate(arg, ctx).await?;
        }
        Ok(last)
    })
}

fn op_let<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("let", args, 2)?;
        let name = expect_ident("let", &args[0])?;
        let value = evaluate(&args[1], ctx).await?;
        ctx.set_var(name, value.clone());
        Ok(value)
    })
}

fn op_var<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("var", args, 1)?;
        let name = expect_ident("var", &args[0])?;
        ctx.get_var(name)
            .cloned()
            .ok_or_else(|| ScriptError::Type(format!("unbound variable '{name}'")))
    })
}

fn op_if<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("if", args, 2)?;
        let condition = evaluate(&args[0], ctx).await?;
        if is_truthy(&condition) {
            evaluate(&args[1], ctx).await
        } else if let Some(alternative) = args.get(2) {
            evaluate(alternative, ctx).await
        } else {
            Ok(Value::Null)
        }
    })
}

fn op_for<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("for", args, 3)?;
        let name = expect_ident("for", &args[0])?;
        let items = match evaluate(&args[1], ctx).await? {
            Value::Array(items) => items,
            other => {
                return Err(ScriptError::Type(format!(
                    "for expects a list, got {}",
                    crate::eval::kind_of(&other)
                )));
            }
        };
        for item in items {
            // Each iteration costs a unit so unbounded lists stay bounded
            // by gas even when the body is a bare literal.
            ctx.charge_gas()?;
            ctx.push_scope();
            ctx.define_var(name, item);
            let result = evaluate(&args[2], ctx).await;
            ctx.pop_scope();
            result?;
        }
        Ok(Value::Null)
    })
}

fn op_try<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("try", args, 1)?;
        match evaluate(&args[0], ctx).await {
            Ok(value) => Ok(value),
            Err(error) => match args.len() {
                // No recovery branch: swallow into null.
                1 => Ok(Value::Null),
                2 => evaluate(&args[1], ctx).await,
                _ => {
                    let name = expect_ident("try", &args[1])?;
                    ctx.push_scope();
                    ctx.define_var(name, Value::String(error.to_string()));
                    let result = evaluate(&args[2], ctx).await;
                    ctx.pop_scope();
                    result
                }
            },
        }
    })
}

fn op_throw<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("throw", args, 1)?;
        let message = evaluate(&args[0], ctx).await?;
        let text = match message {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Err(ScriptError::Thrown(text))
    })
}

fn op_warn<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("warn", args, 1)?;
        let value = evaluate(&args[0], ctx).await?;
        ctx.warn(value);
        Ok(Value::Null)
    })
}

fn op_this<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("this", args, 0)?;
        Ok(flatten_entity(&ctx.this))
    })
}

fn op_caller<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("caller", args, 0)?;
        Ok(serde_json::json!(ctx.caller_id))
    })
}

fn op_args<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("args", args, 0)?;
        Ok(Value::Array(ctx.args.clone()))
    })
}
