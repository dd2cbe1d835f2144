//! Per-invocation script context.

use crate::error::ScriptError;
use crate::registry::OpcodeRegistry;
use loam_core::{Entity, EntityId, Scheduler, WorldStore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Gas allowance for a dynamic getter run. Getters execute in their own
/// isolated context rather than drawing down the caller's budget.
pub const GETTER_GAS: u64 = 10_000;

/// Host-supplied notification callback. Fire and forget; delivery is never
/// assumed and a missing callback is a no-op.
pub type SendFn = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Everything one top-level evaluation needs: who is calling, which entity
/// the verb belongs to, the gas budget, lexical scopes, and the shared
/// handles to store, registry, and scheduler. Created fresh per verb call,
/// never persisted.
pub struct ScriptContext {
    /// The verb owner, with props merged through its prototype chain.
    pub this: Entity,
    /// The entity that initiated this call.
    pub caller_id: EntityId,
    pub args: Vec<Value>,
    /// Remaining evaluation budget. Shared with nested verb calls by
    /// threading: a child starts with the parent's remainder and hands back
    /// what it did not consume.
    pub gas: u64,
    pub store: Arc<Mutex<WorldStore>>,
    pub registry: Arc<OpcodeRegistry>,
    pub scheduler: Arc<Scheduler>,
    /// Non-fatal diagnostics (swallowed getter errors, `warn` opcode).
    pub warnings: Vec<Value>,
    send: Option<SendFn>,
    scopes: Vec<HashMap<String, Value>>,
}

impl ScriptContext {
    pub fn new(
        this: Entity,
        caller_id: EntityId,
        args: Vec<Value>,
        gas: u64,
        store: Arc<Mutex<WorldStore>>,
        registry: Arc<OpcodeRegistry>,
        scheduler: Arc<Scheduler>,
        send: Option<SendFn>,
    ) -> Self {
        Self {
            this,
            caller_id,
            args,
            gas,
            store,
            registry,
            scheduler,
            warnings: Vec::new(),
            send,
            scopes: vec![HashMap::new()],
        }
    }

    /// Charge one unit of gas for an opcode dispatch. Exhaustion is the only
    /// cancellation mechanism, so this is checked before every dispatch.
    pub fn charge_gas(&mut self) -> Result<(), ScriptError> {
        if self.gas == 0 {
            return Err(ScriptError::GasExhausted);
        }
        self.gas -= 1;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Lexical scopes
    // -------------------------------------------------------------------

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// `let` semantics: assign the innermost existing binding, or define a
    /// new one in the current scope. This lets loop bodies update
    /// accumulators in the enclosing frame.
    pub fn set_var(&mut self, name: &str, value: Value) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return;
            }
        }
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_string(), value);
    }

    /// Define in the current scope unconditionally (loop variables).
    pub fn define_var(&mut self, name: &str, value: Value) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.to_string(), value);
    }

    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    // -------------------------------------------------------------------
    // Side channels
    // -------------------------------------------------------------------

    /// Notify the invoking session. No-op when the host supplied nothing.
    pub fn emit(&self, kind: &str, payload: &Value) {
        if let Some(send) = &self.send {
            send(kind, payload);
        }
    }

    pub fn warn(&mut self, value: Value) {
        self.warnings.push(value);
    }

    // -------------------------------------------------------------------
    // Derived contexts
    // -------------------------------------------------------------------

    /// Context for a cross-entity verb call: the callee sees this context's
    /// `this` as its caller, and inherits the remaining gas budget.
    pub fn child_for_call(&self, target: Entity, args: Vec<Value>) -> ScriptContext {
        ScriptContext::new(
            target,
            self.this.id,
            args,
            self.gas,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.scheduler),
            self.send.clone(),
        )
    }

    /// Fresh, isolated context for a dynamic getter: the entity is both
    /// caller and `this`, with its own fixed gas allowance and no send
    /// channel.
    pub fn child_for_getter(&self, entity: Entity) -> ScriptContext {
        ScriptContext::new(
            entity.clone(),
            entity.id,
            Vec::new(),
            GETTER_GAS,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.scheduler),
            None,
        )
    }

    /// Fold a finished child call back in: gas is threaded, warnings are
    /// surfaced to the outer invocation.
    pub fn absorb_child(&mut self, child: ScriptContext) {
        self.gas = child.gas;
        self.warnings.extend(child.warnings);
    }
}

/// The script-facing shape of an entity: `{id, prototype_id, ...props}`.
pub fn flatten_entity(entity: &Entity) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("id".to_string(), serde_json::json!(entity.id));
    map.insert(
        "prototype_id".to_string(),
        serde_json::json!(entity.prototype_id),
    );
    if let Value::Object(props) = &entity.props {
        for (key, value) in props {
            map.insert(key.clone(), value.clone());
        }
    }
    Value::Object(map)
}

/// Resolve an entity "with properties": merged props through the prototype
/// chain, plus every `get_<prop>` verb evaluated as a computed property in
/// an isolated context. Getter errors are recorded as warnings on the
/// calling context and never propagate.
pub async fn resolve_entity_view(
    ctx: &mut ScriptContext,
    id: EntityId,
) -> Result<Value, ScriptError> {
    let (entity, getters) = {
        let store = ctx.store.lock().await;
        let entity = store
            .get_entity_merged(id)
            .await?
            .ok_or(ScriptError::EntityNotFound(id))?;
        let getters: Vec<_> = store
            .get_verbs(id)
            .await?
            .into_iter()
            .filter(|v| v.name.starts_with("get_") && v.name.len() > 4)
            .collect();
        (entity, getters)
    };

    let mut view = match flatten_entity(&entity) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };

    for verb in getters {
        let prop_name = verb.name["get_".len()..].to_string();
        let mut getter_ctx = ctx.child_for_getter(entity.clone());
        match crate::eval::evaluate(&verb.code, &mut getter_ctx).await {
            Ok(value) => {
                view.insert(prop_name, value);
            }
            Err(e) => {
                tracing::warn!(entity_id = id, getter = %verb.name, error = %e, "getter failed");
                ctx.warn(serde_json::json!({
                    "getter": verb.name,
                    "entity_id": id,
                    "error": e.to_string(),
                }));
            }
        }
    }

    Ok(Value::Object(view))
}
