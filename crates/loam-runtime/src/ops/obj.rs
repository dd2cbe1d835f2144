//! Map opcodes. Same immutable convention as lists: setters return a new
//! map.

use super::{expect_arity, expect_min_arity};
use crate::context::ScriptContext;
use crate::eval::{as_object, as_str, eval_args};
use crate::registry::{OpFuture, OpcodeRegistry, RegistryError};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use serde_json::Value;

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("obj.get", "Value at key", "obj", ValueKind::Any).with_params(vec![
            ParamSpec::new("map", ValueKind::Object),
            ParamSpec::new("key", ValueKind::String),
        ]),
        op_get,
    )?;
    registry.register(
        OpcodeSpec::new("obj.set", "Set a key", "obj", ValueKind::Object).with_params(vec![
            ParamSpec::new("map", ValueKind::Object),
            ParamSpec::new("key", ValueKind::String),
            ParamSpec::new("value", ValueKind::Any),
        ]),
        op_set,
    )?;
    registry.register(
        OpcodeSpec::new("obj.keys", "Key list", "obj", ValueKind::Array)
            .with_params(vec![ParamSpec::new("map", ValueKind::Object)]),
        op_keys,
    )?;
    registry.register(
        OpcodeSpec::new("obj.has", "Key presence", "obj", ValueKind::Bool).with_params(vec![
            ParamSpec::new("map", ValueKind::Object),
            ParamSpec::new("key", ValueKind::String),
        ]),
        op_has,
    )?;
    registry.register(
        OpcodeSpec::new("obj.merge", "Shallow merge", "obj", ValueKind::Object)
            .variadic()
            .with_params(vec![ParamSpec::new("maps", ValueKind::Object)]),
        op_merge,
    )?;
    Ok(())
}

fn op_get<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("obj.get", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let map = as_object(&values[0])?;
        let key = as_str(&values[1])?;
        Ok(map.get(key).cloned().unwrap_or(Value::Null))
    })
}

fn op_set<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("obj.set", args, 3)?;
        let values = eval_args(args, ctx).await?;
        let mut map = as_object(&values[0])?.clone();
        let key = as_str(&values[1])?;
        map.insert(key.to_string(), values[2].clone());
        Ok(Value::Object(map))
    })
}

fn op_keys<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("obj.keys", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let map = as_object(&values[0])?;
        Ok(Value::Array(
            map.keys().map(|k| Value::String(k.clone())).collect(),
        ))
    })
}

fn op_has<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("obj.has", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let map = as_object(&values[0])?;
        let key = as_str(&values[1])?;
        Ok(Value::Bool(map.contains_key(key)))
    })
}

fn op_merge<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("obj.merge", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let mut out = serde_json::Map::new();
        for value in &values {
            for (key, value) in as_object(value)? {
                out.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(out))
    })
}
