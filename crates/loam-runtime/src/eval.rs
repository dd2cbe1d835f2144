//! The tree-walking evaluator.
//!
//! Literals are free; every opcode dispatch costs one unit of gas. Handlers
//! receive their argument nodes unevaluated and call back into [`evaluate`]
//! themselves, which is what makes `if`, `and`, and `try` lazy without any
//! special casing here.

use crate::context::ScriptContext;
use crate::error::ScriptError;
use crate::registry::OpFuture;
use loam_ir::Expr;
use serde_json::Value;

/// Evaluate one node. Boxed because opcode handlers recurse back into this.
pub fn evaluate<'a>(node: &'a Expr, ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        match node {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(serde_json::json!(n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(evaluate(item, ctx).await?);
                }
                Ok(Value::Array(out))
            }
            Expr::Map(entries) => {
                let mut out = serde_json::Map::new();
                for (key, value) in entries {
                    out.insert(key.clone(), evaluate(value, ctx).await?);
                }
                Ok(Value::Object(out))
            }
            Expr::Call { op, args } => {
                ctx.charge_gas()?;
                let handler = ctx
                    .registry
                    .lookup(op)
                    .ok_or_else(|| ScriptError::UnknownOpcode(op.clone()))?;
                handler(args, ctx).await
            }
        }
    })
}

/// Evaluate every argument eagerly, left to right.
pub async fn eval_args(args: &[Expr], ctx: &mut ScriptContext) -> Result<Vec<Value>, ScriptError> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        out.push(evaluate(arg, ctx).await?);
    }
    Ok(out)
}

/// Script truthiness: null and false are falsy, everything else is truthy.
/// Zero and the empty string are truthy, matching JSON-value semantics
/// rather than any host language's.
pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

pub fn as_number(value: &Value) -> Result<f64, ScriptError> {
    value
        .as_f64()
        .ok_or_else(|| ScriptError::Type(format!("expected number, got {}", kind_of(value))))
}

pub fn as_str(value: &Value) -> Result<&str, ScriptError> {
    value
        .as_str()
        .ok_or_else(|| ScriptError::Type(format!("expected string, got {}", kind_of(value))))
}

pub fn as_array(value: &Value) -> Result<&Vec<Value>, ScriptError> {
    value
        .as_array()
        .ok_or_else(|| ScriptError::Type(format!("expected list, got {}", kind_of(value))))
}

pub fn as_object(value: &Value) -> Result<&serde_json::Map<String, Value>, ScriptError> {
    value
        .as_object()
        .ok_or_else(|| ScriptError::Type(format!("expected map, got {}", kind_of(value))))
}

pub fn as_entity_id(value: &Value) -> Result<i64, ScriptError> {
    value
        .as_i64()
        .ok_or_else(|| ScriptError::Type(format!("expected entity id, got {}", kind_of(value))))
}

pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
