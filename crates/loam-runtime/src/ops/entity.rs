//! Entity primitives: the opcodes through which scripts read and mutate the
//! object graph.
//!
//! Mutating opcodes take a capability reference as their first argument.
//! Passing `null` is accepted only when the target is the current entity;
//! anything else requires a persisted `entity.control` capability whose
//! `target_id` matches (or the wildcard override). `destroy` always demands
//! the capability, self-destruction included.

use super::{expect_arity, expect_min_arity};
use crate::context::{ScriptContext, resolve_entity_view};
use crate::error::ScriptError;
use crate::eval::{as_entity_id, as_str, eval_args, evaluate, kind_of};
use crate::registry::{OpFuture, OpcodeRegistry, RegistryError};
use loam_core::{Capability, EntityId, cap_types, check_capability};
use loam_ir::{Expr, OpcodeSpec, ParamSpec, ValueKind};
use serde_json::{Value, json};

/// Bound on the containment walk in `move`. Matches the store's prototype
/// chain guard.
const MAX_CONTAINMENT_DEPTH: usize = 64;

pub fn register(registry: &mut OpcodeRegistry) -> Result<(), RegistryError> {
    registry.register(
        OpcodeSpec::new("entity", "Resolve an entity", "entity", ValueKind::Object)
            .with_params(vec![ParamSpec::new("id", ValueKind::Number)]),
        op_entity,
    )?;
    registry.register(
        OpcodeSpec::new("verbs", "Verb names on an entity", "entity", ValueKind::Array)
            .with_params(vec![ParamSpec::new("id", ValueKind::Number)]),
        op_verbs,
    )?;
    registry.register(
        OpcodeSpec::new("call", "Invoke a verb", "entity", ValueKind::Any)
            .variadic()
            .with_params(vec![
                ParamSpec::new("target", ValueKind::Number),
                ParamSpec::new("verb", ValueKind::String),
            ]),
        op_call,
    )?;
    registry.register(
        OpcodeSpec::new("prop", "Read a property", "entity", ValueKind::Any).with_params(vec![
            ParamSpec::new("target", ValueKind::Number),
            ParamSpec::new("name", ValueKind::String),
        ]),
        op_prop,
    )?;
    registry.register(
        OpcodeSpec::new("prop.set", "Write a property", "entity", ValueKind::Any).with_params(
            vec![
                ParamSpec::new("capability", ValueKind::Any),
                ParamSpec::new("target", ValueKind::Number),
                ParamSpec::new("name", ValueKind::String),
                ParamSpec::new("value", ValueKind::Any),
            ],
        ),
        op_prop_set,
    )?;
    registry.register(
        OpcodeSpec::new("entity.update", "Merge properties", "entity", ValueKind::Null)
            .with_params(vec![
                ParamSpec::new("capability", ValueKind::Any),
                ParamSpec::new("target", ValueKind::Number),
                ParamSpec::new("partial", ValueKind::Object),
            ]),
        op_update,
    )?;
    registry.register(
        OpcodeSpec::new("create", "Create an entity", "entity", ValueKind::Number).with_params(
            vec![
                ParamSpec::new("props", ValueKind::Object),
                ParamSpec::optional("prototype", ValueKind::Number),
            ],
        ),
        op_create,
    )?;
    registry.register(
        OpcodeSpec::new("move", "Relocate an entity", "entity", ValueKind::Null).with_params(
            vec![
                ParamSpec::new("capability", ValueKind::Any),
                ParamSpec::new("target", ValueKind::Number),
                ParamSpec::new("destination", ValueKind::Number),
            ],
        ),
        op_move,
    )?;
    registry.register(
        OpcodeSpec::new("destroy", "Destroy an entity", "entity", ValueKind::Null).with_params(
            vec![
                ParamSpec::new("capability", ValueKind::Any),
                ParamSpec::new("target", ValueKind::Number),
            ],
        ),
        op_destroy,
    )?;
    registry.register(
        OpcodeSpec::new("tell", "Notify a session", "entity", ValueKind::Null).with_params(vec![
            ParamSpec::new("target", ValueKind::Number),
            ParamSpec::new("message", ValueKind::Any),
        ]),
        op_tell,
    )?;
    registry.register(
        OpcodeSpec::new("schedule", "Delayed verb call", "entity", ValueKind::Number).with_params(
            vec![
                ParamSpec::new("verb", ValueKind::String),
                ParamSpec::new("args", ValueKind::Array),
                ParamSpec::new("delay_ms", ValueKind::Number),
            ],
        ),
        op_schedule,
    )?;
    Ok(())
}

/// Require `entity.control` over `target`, or accept a null reference when
/// the target is the entity acting on itself.
async fn require_control(
    ctx: &ScriptContext,
    cap_ref: &Value,
    target: EntityId,
) -> Result<Option<Capability>, ScriptError> {
    if cap_ref.is_null() {
        if target == ctx.this.id {
            return Ok(None);
        }
        return Err(ScriptError::Permission(
            loam_core::CapabilityError::MalformedRef,
        ));
    }
    let store = ctx.store.lock().await;
    let cap = check_capability(
        &store,
        cap_ref,
        &[ctx.this.id],
        cap_types::ENTITY_CONTROL,
        Some(&move |params: &Value| params.get("target_id").and_then(Value::as_i64) == Some(target)),
    )
    .await?;
    Ok(Some(cap))
}

fn reject_reserved(partial: &serde_json::Map<String, Value>) -> Result<(), ScriptError> {
    for key in ["id", "prototype_id"] {
        if partial.contains_key(key) {
            return Err(ScriptError::ReservedField(key.to_string()));
        }
    }
    Ok(())
}

fn op_entity<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("entity", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let id = as_entity_id(&values[0])?;
        resolve_entity_view(ctx, id).await
    })
}

fn op_verbs<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("verbs", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let id = as_entity_id(&values[0])?;
        let store = ctx.store.lock().await;
        let verbs = store.get_verbs(id).await?;
        Ok(Value::Array(
            verbs
                .into_iter()
                .map(|v| {
                    json!({
                        "name": v.name,
                        "permissions": v.permissions,
                    })
                })
                .collect(),
        ))
    })
}

fn op_call<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("call", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let target_id = as_entity_id(&values[0])?;
        let verb_name = as_str(&values[1])?.to_string();
        let call_args = values[2..].to_vec();

        let (target, verb) = {
            let store = ctx.store.lock().await;
            let target = store
                .get_entity_merged(target_id)
                .await?
                .ok_or(ScriptError::EntityNotFound(target_id))?;
            let verb = store
                .get_verb(target_id, &verb_name)
                .await?
                .ok_or_else(|| ScriptError::VerbNotFound(target_id, verb_name.clone()))?;
            (target, verb)
        };

        tracing::debug!(caller = ctx.this.id, target = target_id, verb = %verb_name, "dispatch");

        // The callee draws from the same gas allowance; capability checks
        // inside it see the callee as `this`.
        let mut child = ctx.child_for_call(target, call_args);
        let result = evaluate(&verb.code, &mut child).await;
        ctx.absorb_child(child);
        result
    })
}

fn op_prop<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("prop", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let target_id = as_entity_id(&values[0])?;
        let name = as_str(&values[1])?.to_string();

        let (stored, getter) = {
            let store = ctx.store.lock().await;
            let entity = store
                .get_entity_merged(target_id)
                .await?
                .ok_or(ScriptError::EntityNotFound(target_id))?;
            let stored = entity.prop(&name).cloned();
            if stored.is_some() {
                (stored, None)
            } else {
                let getter = store.get_verb(target_id, &format!("get_{name}")).await?;
                (None, getter.map(|verb| (entity, verb)))
            }
        };

        if let Some(value) = stored {
            return Ok(value);
        }
        // Fall back to a computed property. Getter failures degrade to null
        // with a warning, same as view resolution.
        if let Some((entity, verb)) = getter {
            let mut getter_ctx = ctx.child_for_getter(entity);
            match evaluate(&verb.code, &mut getter_ctx).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(entity_id = target_id, getter = %verb.name, error = %e, "getter failed");
                    ctx.warn(json!({
                        "getter": verb.name,
                        "entity_id": target_id,
                        "error": e.to_string(),
                    }));
                }
            }
        }
        Ok(Value::Null)
    })
}

fn op_prop_set<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("prop.set", args, 4)?;
        let values = eval_args(args, ctx).await?;
        let target = as_entity_id(&values[1])?;
        let name = as_str(&values[2])?.to_string();

        if name == "id" || name == "prototype_id" {
            return Err(ScriptError::ReservedField(name));
        }
        require_control(ctx, &values[0], target).await?;

        let mut partial = serde_json::Map::new();
        partial.insert(name, values[3].clone());
        let store = ctx.store.lock().await;
        store.update_entity(target, Value::Object(partial)).await?;
        Ok(values[3].clone())
    })
}

fn op_update<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("entity.update", args, 3)?;
        let values = eval_args(args, ctx).await?;
        let target = as_entity_id(&values[1])?;
        let partial = match &values[2] {
            Value::Object(map) => map.clone(),
            other => {
                return Err(ScriptError::Type(format!(
                    "entity.update expects a map, got {}",
                    kind_of(other)
                )));
            }
        };

        reject_reserved(&partial)?;
        require_control(ctx, &values[0], target).await?;

        let store = ctx.store.lock().await;
        if store.get_entity(target).await?.is_none() {
            return Err(ScriptError::EntityNotFound(target));
        }
        store.update_entity(target, Value::Object(partial)).await?;
        Ok(Value::Null)
    })
}

fn op_create<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_min_arity("create", args, 1)?;
        let values = eval_args(args, ctx).await?;
        let props = match &values[0] {
            Value::Object(map) => {
                reject_reserved(map)?;
                values[0].clone()
            }
            Value::Null => json!({}),
            other => {
                return Err(ScriptError::Type(format!(
                    "create expects a props map, got {}",
                    kind_of(other)
                )));
            }
        };
        let prototype = match values.get(1) {
            None | Some(Value::Null) => None,
            Some(value) => Some(as_entity_id(value)?),
        };

        let store = ctx.store.lock().await;
        if let Some(proto) = prototype {
            if store.get_entity(proto).await?.is_none() {
                return Err(ScriptError::EntityNotFound(proto));
            }
        }
        let id = store.create_entity(props, prototype).await?;
        // The creator gets control of what it made. This is the trusted mint
        // path; no sys.mint authority involved.
        store
            .create_capability(ctx.this.id, cap_types::ENTITY_CONTROL, json!({"target_id": id}))
            .await?;
        Ok(json!(id))
    })
}

fn op_move<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("move", args, 3)?;
        let values = eval_args(args, ctx).await?;
        let target = as_entity_id(&values[1])?;
        let destination = as_entity_id(&values[2])?;

        require_control(ctx, &values[0], target).await?;

        let store = ctx.store.lock().await;
        if store.get_entity(destination).await?.is_none() {
            return Err(ScriptError::EntityNotFound(destination));
        }

        // Walk the destination's containment chain before writing anything.
        // If the target appears on it (or is the destination), the move
        // would place the target inside itself.
        let mut current = Some(destination);
        let mut depth = 0;
        while let Some(id) = current {
            if id == target {
                return Err(ScriptError::ContainmentCycle(target, destination));
            }
            depth += 1;
            if depth > MAX_CONTAINMENT_DEPTH {
                break;
            }
            current = match store.get_entity(id).await? {
                Some(entity) => entity.location(),
                None => None,
            };
        }

        store
            .update_entity(target, json!({"location": destination}))
            .await?;
        Ok(Value::Null)
    })
}

fn op_destroy<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("destroy", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let target = as_entity_id(&values[1])?;

        // No null shortcut here: destruction always presents the capability.
        let store = ctx.store.lock().await;
        check_capability(
            &store,
            &values[0],
            &[ctx.this.id],
            cap_types::ENTITY_CONTROL,
            Some(&move |params: &Value| {
                params.get("target_id").and_then(Value::as_i64) == Some(target)
            }),
        )
        .await?;

        if store.get_entity(target).await?.is_none() {
            return Err(ScriptError::EntityNotFound(target));
        }
        store.delete_entity(target).await?;
        Ok(Value::Null)
    })
}

fn op_tell<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("tell", args, 2)?;
        let values = eval_args(args, ctx).await?;
        let target = as_entity_id(&values[0])?;
        ctx.emit(
            "tell",
            &json!({
                "from": ctx.this.id,
                "target": target,
                "message": values[1],
            }),
        );
        Ok(Value::Null)
    })
}

fn op_schedule<'a>(args: &'a [Expr], ctx: &'a mut ScriptContext) -> OpFuture<'a> {
    Box::pin(async move {
        expect_arity("schedule", args, 3)?;
        let values = eval_args(args, ctx).await?;
        let verb = as_str(&values[0])?;
        let delay = crate::eval::as_number(&values[2])?;
        if delay < 0.0 {
            return Err(ScriptError::Type("schedule: negative delay".to_string()));
        }
        // An entity schedules on itself only; deferred work runs with the
        // same authority it had when scheduling.
        let task_id = ctx
            .scheduler
            .schedule(ctx.this.id, verb, values[1].clone(), delay as u64)
            .await?;
        Ok(json!(task_id))
    })
}
