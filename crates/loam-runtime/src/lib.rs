//! Script runtime for Loam: a gas-limited, capability-checked interpreter
//! over the entity store.
//!
//! [`Runtime`] is the host-facing entry point: open a store, then
//! [`Runtime::call_verb`] to evaluate an entity's verb with a caller, args,
//! and a gas budget. Everything a script can do flows through opcodes in the
//! [`OpcodeRegistry`]; privileged ones check capabilities before acting.

pub mod context;
pub mod error;
pub mod eval;
pub mod kernel;
pub mod ops;
pub mod registry;

pub use context::{GETTER_GAS, ScriptContext, SendFn, flatten_entity};
pub use error::ScriptError;
pub use eval::evaluate;
pub use registry::{OpFuture, OpHandler, OpcodeRegistry, RegistryError};

use loam_core::{EntityId, Scheduler, StoreError, WorldStore};
use loam_ir::Expr;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Default gas budget for a host-initiated verb call.
pub const DEFAULT_GAS: u64 = 100_000;

/// How often the scheduler loop scans for due tasks.
const SCHEDULER_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] loam_core::SchedulerError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// The outcome of a successful evaluation.
#[derive(Debug)]
pub struct Evaluation {
    pub value: Value,
    /// Non-fatal diagnostics accumulated during the run.
    pub warnings: Vec<Value>,
    pub gas_remaining: u64,
}

/// A store plus a registry plus a scheduler: everything needed to run verbs.
pub struct Runtime {
    store: Arc<Mutex<WorldStore>>,
    registry: Arc<OpcodeRegistry>,
    scheduler: Arc<Scheduler>,
}

impl Runtime {
    /// Open (or create) a database at `path` with the built-in opcodes.
    pub async fn open(path: &str) -> Result<Self, RuntimeError> {
        let registry = OpcodeRegistry::with_builtins()?;
        Ok(Self::with_store(WorldStore::open(path).await?, registry))
    }

    /// In-memory runtime, mainly for tests and scratch worlds.
    pub async fn in_memory() -> Result<Self, RuntimeError> {
        let registry = OpcodeRegistry::with_builtins()?;
        Ok(Self::with_store(WorldStore::in_memory().await?, registry))
    }

    /// Open with a caller-assembled registry (builtins plus external
    /// libraries such as fs or net).
    pub async fn open_with_registry(
        path: &str,
        registry: OpcodeRegistry,
    ) -> Result<Self, RuntimeError> {
        Ok(Self::with_store(WorldStore::open(path).await?, registry))
    }

    pub async fn in_memory_with_registry(registry: OpcodeRegistry) -> Result<Self, RuntimeError> {
        Ok(Self::with_store(WorldStore::in_memory().await?, registry))
    }

    pub fn with_store(store: WorldStore, registry: OpcodeRegistry) -> Self {
        let store = Arc::new(Mutex::new(store));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&store), SCHEDULER_INTERVAL_MS));
        Self {
            store,
            registry: Arc::new(registry),
            scheduler,
        }
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> Arc<Mutex<WorldStore>> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> Arc<OpcodeRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Evaluate `entity_id`'s verb `verb` on behalf of `caller_id` with the
    /// default gas budget and no notification channel.
    pub async fn call_verb(
        &self,
        caller_id: EntityId,
        entity_id: EntityId,
        verb: &str,
        args: Vec<Value>,
    ) -> Result<Evaluation, RuntimeError> {
        self.call_verb_with(caller_id, entity_id, verb, args, DEFAULT_GAS, None)
            .await
    }

    /// Full-control variant: explicit gas budget and optional send callback.
    pub async fn call_verb_with(
        &self,
        caller_id: EntityId,
        entity_id: EntityId,
        verb: &str,
        args: Vec<Value>,
        gas: u64,
        send: Option<SendFn>,
    ) -> Result<Evaluation, RuntimeError> {
        let (entity, verb) = {
            let store = self.store.lock().await;
            let entity = store
                .get_entity_merged(entity_id)
                .await?
                .ok_or(ScriptError::EntityNotFound(entity_id))?;
            let verb = store
                .get_verb(entity_id, verb)
                .await?
                .ok_or_else(|| ScriptError::VerbNotFound(entity_id, verb.to_string()))?;
            (entity, verb)
        };

        tracing::debug!(caller = caller_id, entity = entity_id, verb = %verb.name, gas, "call");

        let mut ctx = ScriptContext::new(
            entity,
            caller_id,
            args,
            gas,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.scheduler),
            send,
        );
        let value = evaluate(&verb.code, &mut ctx).await?;
        Ok(Evaluation {
            value,
            warnings: ctx.warnings,
            gas_remaining: ctx.gas,
        })
    }

    /// Evaluate a bare expression as `entity_id` (caller = the entity
    /// itself). Used by hosts for command lines and by tests.
    pub async fn eval(
        &self,
        entity_id: EntityId,
        code: &Expr,
        gas: u64,
    ) -> Result<Evaluation, RuntimeError> {
        let entity = {
            let store = self.store.lock().await;
            store
                .get_entity_merged(entity_id)
                .await?
                .ok_or(ScriptError::EntityNotFound(entity_id))?
        };
        let mut ctx = ScriptContext::new(
            entity,
            entity_id,
            Vec::new(),
            gas,
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.scheduler),
            None,
        );
        let value = evaluate(code, &mut ctx).await?;
        Ok(Evaluation {
            value,
            warnings: ctx.warnings,
            gas_remaining: ctx.gas,
        })
    }

    /// One scheduler pass: run every due task through the interpreter. Task
    /// errors are logged by the scheduler and never abort the pass.
    pub async fn process_scheduled(&self) -> Result<(), RuntimeError> {
        self.scheduler
            .process(|task| async move {
                let args = match task.args.clone() {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => vec![other],
                };
                self.call_verb(task.entity_id, task.entity_id, &task.verb, args)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .await?;
        Ok(())
    }
}
