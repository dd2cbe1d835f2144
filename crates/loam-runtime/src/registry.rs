//! Opcode registry.
//!
//! The registry is built once at startup and threaded through every
//! evaluation via the context; there is no ambient global table. Opcode
//! handlers are plain functions returning boxed futures, so suspension
//! points exist only where a handler performs I/O.

use crate::context::ScriptContext;
use crate::error::ScriptError;
use futures_util::future::BoxFuture;
use loam_ir::{Expr, OpcodeSchema, OpcodeSpec};
use std::collections::HashMap;
use thiserror::Error;

/// Future returned by an opcode handler.
pub type OpFuture<'a> = BoxFuture<'a, Result<serde_json::Value, ScriptError>>;

/// An opcode handler: unevaluated argument nodes plus the live context.
/// Argument strictness is the handler's own business (`if`, `and`, `try`
/// evaluate lazily; most handlers evaluate eagerly, left to right).
pub type OpHandler = for<'a> fn(&'a [Expr], &'a mut ScriptContext) -> OpFuture<'a>;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two libraries defining the same opcode is a configuration bug, not a
    /// runtime event, so registration fails loudly instead of overriding.
    #[error("opcode already registered: {0}")]
    Duplicate(String),
}

#[derive(Default)]
pub struct OpcodeRegistry {
    handlers: HashMap<String, OpHandler>,
    specs: Vec<OpcodeSpec>,
}

impl OpcodeRegistry {
    /// An empty registry. Most hosts want [`OpcodeRegistry::with_builtins`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with every built-in library.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        crate::ops::register_builtins(&mut registry)?;
        crate::kernel::register(&mut registry)?;
        Ok(registry)
    }

    pub fn register(&mut self, spec: OpcodeSpec, handler: OpHandler) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&spec.name) {
            return Err(RegistryError::Duplicate(spec.name.clone()));
        }
        tracing::debug!(opcode = %spec.name, category = %spec.category, "registered opcode");
        self.handlers.insert(spec.name.clone(), handler);
        self.specs.push(spec);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<OpHandler> {
        self.handlers.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Metadata snapshot for external tooling.
    pub fn schema(&self) -> OpcodeSchema {
        OpcodeSchema {
            opcode: self.specs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_ir::ValueKind;

    fn noop<'a>(_args: &'a [Expr], _ctx: &'a mut ScriptContext) -> OpFuture<'a> {
        Box::pin(async { Ok(serde_json::Value::Null) })
    }

    #[test]
    fn duplicate_registration_fails_loudly() {
        let mut registry = OpcodeRegistry::new();
        let spec = || OpcodeSpec::new("x.test", "Test", "x", ValueKind::Null);

        registry.register(spec(), noop).unwrap();
        let err = registry.register(spec(), noop).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "x.test"));
    }

    #[test]
    fn builtins_cover_the_core_libraries() {
        let registry = OpcodeRegistry::with_builtins().unwrap();
        for name in [
            "seq", "let", "var", "if", "for", "try", "throw", "warn", "+", "==", "and",
            "list.len", "obj.get", "str.concat", "time.now", "entity", "call", "prop",
            "create", "move", "mint", "delegate", "give_capability", "get_capability",
        ] {
            assert!(registry.contains(name), "missing builtin '{}'", name);
        }
    }

    #[test]
    fn schema_reflects_registrations() {
        let registry = OpcodeRegistry::with_builtins().unwrap();
        let schema = registry.schema();
        assert_eq!(schema.opcode.len(), registry.len());
        assert!(schema.find("if").unwrap().lazy);
    }
}
