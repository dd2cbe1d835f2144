//! Capability kernel opcodes.
//!
//! These are the only script-reachable paths that create or move authority:
//! `mint` under a namespace-scoped `sys.mint`, `delegate` producing narrowed
//! copies, `give_capability` transferring ownership. Reads (`capability`,
//! `get_capability`) only ever expose what the current entity already holds.

use crate::context::ScriptContext;
use crate::error::ScriptError;
use crate::eval::{as_entity_id, as_str, eval_args, kind_of};
use crate::ops::{expect_arity, expect_min_arity};
use crate::registry::{OpFuture, OpcodeRegistry, RegistryError};
use loam_core::{Capability, CapabilityError, capability_id, cap_types, is_narrowing};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use serde_json::{Value, json};

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("capability", "Find a held capability", "kernel", ValueKind::Object)
            .with_params(vec![
                ParamSpec::new("type", ValueKind::String),
                ParamSpec::optional("filter", ValueKind::Object),
            ]),
        op_capability,
    )?;
    registry.register(
        OpcodeSpec::new("get_capability", "Fetch a held capability", "kernel", ValueKind::Object)
            .with_params(vec![ParamSpec::new("id", ValueKind::String)]),
        op_get_capability,
    )?;
    registry.register(
        OpcodeSpec::new("mint", "Mint under authority", "kernel", ValueKind::Object).with_params(
            vec![
                ParamSpec::new("authority", ValueKind::Any),
                ParamSpec::new("type", ValueKind::String),
                ParamSpec::new("params", ValueKind::Object),
            ],
        ),
        op_mint,
    )?;
    registry.register(
        OpcodeSpec::new("delegate", "Delegate a narrowed copy", "kernel", ValueKind::Object)
            .with_params(vec![
                ParamSpec::new("parent", ValueKind::Any),
                ParamSpec::new("restrictions", ValueKind::Object),
            ]),
        op_delegate,
    )?;
    registry.register(
        OpcodeSpec::new("give_capability", "Transfer ownership", "kernel", ValueKind::Null)
            .with_params(vec![
                ParamSpec::new("capability", ValueKind::Any),
                ParamSpec::new("target", ValueKind::Number),
            ]),
        op_give,
    )?;
    Ok(())
}

/// The script-facing shape of a capability record.
fn capability_view(cap: &Capability) -> Value {
    json!({
        "id": cap.id,
        "owner_id": cap.owner_id,
        "type": cap.cap_type,
        "params": cap.params,
    })
}

/// Resolve a presented reference to a record owned by the current entity.
/// Type is not constrained here; the caller applies its own type rule.
async fn held_capability(
    ctx: &ScriptContext,
    cap_ref: &Value,
) -> Result<Capability, CapabilityError> {
    let id = capability_id(cap_ref)?;
    let store = ctx.store.lock().await;
    let cap = store
        .get_capability(id)
        .await?
        .ok_or_else(|| CapabilityError::NotFound(id.to_string()))?;
    if cap.owner_id != ctx.this.id {
        return Err(CapabilityError::NotOwner { id: cap.id });
    }
    Ok(cap)
}

fn op_capability<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("capability", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let wanted_type = as_str(&values[0])?;
        let filter = values.get(1).cloned().unwrap_or(Value::Null);

        let store = ctx.store.lock().await;
        let held = store.get_capabilities(ctx.this.id).await?;
        let found = held
            .iter()
            .find(|cap| cap.cap_type == wanted_type && cap.matches_filter(&filter));
        Ok(found.map(capability_view).unwrap_or(Value::Null))
    })
}

fn op_get_capability<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("get_capability", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let cap = held_capability(ctx, &values[0]).await?;
        Ok(capability_view(&cap))
    })
}

fn op_mint<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("mint", args, 3)?;
        let values = eval_args(args, ctx).await?;
        let new_type = as_str(&values[1])?.to_string();
        let new_params = match &values[2] {
            Value::Object(_) => values[2].clone(),
            Value::Null => json!({}),
            other => {
                return Err(ScriptError::Type(format!(
                    "mint expects a params map, got {}",
                    kind_of(other)
                )));
            }
        };

        let authority = held_capability(ctx, &values[0]).await?;
        if authority.cap_type != cap_types::SYS_MINT {
            return Err(ScriptError::Permission(CapabilityError::TypeMismatch {
                required: cap_types::SYS_MINT.to_string(),
                held: authority.cap_type,
            }));
        }

        // An authority that does not name a namespace grants nothing; the
        // empty string would otherwise prefix-match every type.
        let namespace = match authority.params.get("namespace").and_then(Value::as_str) {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => return Err(ScriptError::Permission(CapabilityError::ParamsRejected)),
        };
        if namespace != "*" && !new_type.starts_with(&namespace) {
            return Err(ScriptError::Permission(CapabilityError::NamespaceMismatch {
                namespace,
                cap_type: new_type,
            }));
        }

        let store = ctx.store.lock().await;
        let id = store
            .create_capability(ctx.this.id, &new_type, new_params.clone())
            .await?;
        Ok(capability_view(&Capability {
            id,
            owner_id: ctx.this.id,
            cap_type: new_type,
            params: new_params,
        }))
    })
}

fn op_delegate<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("delegate", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let restrictions = match &values[1] {
            Value::Object(map) => map.clone(),
            other => {
                return Err(ScriptError::Type(format!(
                    "delegate expects a restrictions map, got {}",
                    kind_of(other)
                )));
            }
        };

        let parent = held_capability(ctx, &values[0]).await?;

        // Every restriction must shrink what the parent grants. A key absent
        // from the parent adds a constraint, which is fine, except the
        // universal override cannot be introduced from nothing.
        for (key, child_value) in &restrictions {
            match parent.params.get(key) {
                Some(parent_value) => {
                    if !is_narrowing(parent_value, child_value, key) {
                        return Err(ScriptError::Permission(CapabilityError::NotNarrowing {
                            key: key.clone(),
                        }));
                    }
                }
                None => {
                    if key == "*" && child_value == &json!(true) {
                        return Err(ScriptError::Permission(CapabilityError::NotNarrowing {
                            key: key.clone(),
                        }));
                    }
                }
            }
        }

        let restricting = !restrictions.is_empty();
        let mut merged = match &parent.params {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        for (key, value) in restrictions {
            merged.insert(key, value);
        }
        // A restricted child of a wildcard parent loses the override; the
        // wildcard would short-circuit the very checks the restrictions add.
        if restricting {
            merged.remove("*");
        }
        let merged = Value::Object(merged);

        let store = ctx.store.lock().await;
        let id = store
            .create_capability(ctx.this.id, &parent.cap_type, merged.clone())
            .await?;
        Ok(capability_view(&Capability {
            id,
            owner_id: ctx.this.id,
            cap_type: parent.cap_type,
            params: merged,
        }))
    })
}

fn op_give<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("give_capability", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let target = as_entity_id(&values[1])?;

        let cap = held_capability(ctx, &values[0]).await?;

        let store = ctx.store.lock().await;
        if store.get_entity(target).await?.is_none() {
            return Err(ScriptError::EntityNotFound(target));
        }
        store.update_capability_owner(&cap.id, target).await?;
        Ok(Value::Null)
    })
}
