//! Capability tokens and the single check primitive.
//!
//! A capability is an unforgeable, persisted record binding an owner entity
//! to a namespaced type and a restriction object. Every privileged opcode
//! funnels through [`check_capability`], which re-validates the presented
//! reference against the persisted record — a capability value's shape is
//! never trusted on its own.

use crate::entity::EntityId;
use crate::store::{StoreError, WorldStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A capability token granting a specific class of operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Entity holding this capability.
    pub owner_id: EntityId,
    /// Dot-namespaced type (e.g. "entity.control", "fs.read", "sys.mint").
    pub cap_type: String,
    /// Restriction parameters. `{"*": true}` is the universal override.
    pub params: serde_json::Value,
}

impl Capability {
    /// True if `params` carries the universal override.
    pub fn is_wildcard(&self) -> bool {
        self.params.get("*").and_then(|v| v.as_bool()) == Some(true)
    }

    /// Field-by-field filter match, used when searching an entity's held
    /// capabilities. A wildcard capability matches any filter.
    pub fn matches_filter(&self, filter: &serde_json::Value) -> bool {
        if self.is_wildcard() {
            return true;
        }
        match filter {
            serde_json::Value::Object(wanted) => wanted
                .iter()
                .all(|(key, value)| self.params.get(key) == Some(value)),
            serde_json::Value::Null => true,
            _ => false,
        }
    }
}

/// Well-known capability types.
pub mod cap_types {
    /// Authority to mint capabilities inside a namespace.
    pub const SYS_MINT: &str = "sys.mint";
    /// Control an entity: update props, move, destroy.
    pub const ENTITY_CONTROL: &str = "entity.control";
    /// Read files under a sandbox path.
    pub const FS_READ: &str = "fs.read";
    /// Write files under a sandbox path.
    pub const FS_WRITE: &str = "fs.write";
    /// Issue HTTP requests.
    pub const NET_HTTP: &str = "net.http";
    /// Call text-generation providers.
    pub const AI_GENERATE: &str = "ai.generate";
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("malformed capability reference")]
    MalformedRef,

    #[error("capability not found: {0}")]
    NotFound(String),

    #[error("capability {id} does not belong to the requesting entity")]
    NotOwner { id: String },

    #[error("capability type mismatch: required '{required}', held '{held}'")]
    TypeMismatch { required: String, held: String },

    #[error("capability params do not permit this operation")]
    ParamsRejected,

    #[error("mint authority namespace '{namespace}' does not cover type '{cap_type}'")]
    NamespaceMismatch { namespace: String, cap_type: String },

    #[error("restriction for '{key}' does not narrow the parent capability")]
    NotNarrowing { key: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Predicate applied to a capability's persisted params.
pub type ParamsPredicate<'a> = &'a (dyn Fn(&serde_json::Value) -> bool + Send + Sync);

/// The enforcement point for every privileged operation.
///
/// `cap_ref` is whatever a script presented: either a bare id string or a
/// map carrying an `id` field. The persisted record must exist, be owned by
/// one of `allowed_owners`, have exactly `required_type`, and either carry
/// the universal override or satisfy `predicate`. Returns the persisted
/// record so callers act on checked state, never on the presented value.
pub async fn check_capability(
    store: &WorldStore,
    cap_ref: &serde_json::Value,
    allowed_owners: &[EntityId],
    required_type: &str,
    predicate: Option<ParamsPredicate<'_>>,
) -> Result<Capability, CapabilityError> {
    let id = capability_id(cap_ref)?;

    let cap = store
        .get_capability(id)
        .await?
        .ok_or_else(|| CapabilityError::NotFound(id.to_string()))?;

    if !allowed_owners.contains(&cap.owner_id) {
        return Err(CapabilityError::NotOwner { id: cap.id });
    }

    if cap.cap_type != required_type {
        return Err(CapabilityError::TypeMismatch {
            required: required_type.to_string(),
            held: cap.cap_type,
        });
    }

    if let Some(pred) = predicate {
        if !cap.is_wildcard() && !pred(&cap.params) {
            return Err(CapabilityError::ParamsRejected);
        }
    }

    Ok(cap)
}

/// Extracts the capability id from a script-supplied reference.
pub fn capability_id(cap_ref: &serde_json::Value) -> Result<&str, CapabilityError> {
    match cap_ref {
        serde_json::Value::String(id) => Ok(id),
        serde_json::Value::Object(map) => map
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or(CapabilityError::MalformedRef),
        _ => Err(CapabilityError::MalformedRef),
    }
}
