//! Entity and verb records.

use loam_ir::Expr;
use serde::{Deserialize, Serialize};

/// Entity ID. Monotonic, assigned by the store.
pub type EntityId = i64;

/// A persisted object: an optional prototype reference plus an open,
/// schema-less property bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Forwarding reference used for verb/property fallback. Never copied.
    pub prototype_id: Option<EntityId>,
    /// Arbitrary string-keyed properties. Scripts add fields freely.
    pub props: serde_json::Value,
}

impl Entity {
    pub fn prop(&self, key: &str) -> Option<&serde_json::Value> {
        self.props.get(key)
    }

    pub fn name(&self) -> Option<&str> {
        self.prop("name").and_then(|v| v.as_str())
    }

    /// Containing entity, if this entity has a location.
    pub fn location(&self) -> Option<EntityId> {
        self.prop("location").and_then(|v| v.as_i64())
    }
}

/// A named script attached to an entity. `(entity_id, name)` is unique;
/// a local verb shadows any inherited verb of the same name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verb {
    pub id: i64,
    pub entity_id: EntityId,
    pub name: String,
    pub code: Expr,
    /// Advisory invocation policy (e.g. "public", "admin"). Consumed by
    /// callers; the interpreter does not enforce it.
    pub permissions: Option<String>,
}
