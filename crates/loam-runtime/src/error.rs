//! Interpreter error taxonomy.

use loam_core::{CapabilityError, EntityId, SchedulerError, StoreError};
use thiserror::Error;

/// Everything a script evaluation can fail with. All variants are catchable
/// from inside a script via `try`; none are swallowed by the evaluator.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),

    /// The gas budget ran out. Raised before dispatch, so a recovery branch
    /// can only do literal work; the budget stays exhausted.
    #[error("gas exhausted")]
    GasExhausted,

    #[error("type error: {0}")]
    Type(String),

    /// Raised by the `throw` opcode with a script-supplied message.
    #[error("{0}")]
    Thrown(String),

    #[error("permission denied: {0}")]
    Permission(#[from] CapabilityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("verb '{1}' not found on entity {0}")]
    VerbNotFound(EntityId, String),

    /// Reserved fields are rejected before any write happens.
    #[error("cannot update '{0}'")]
    ReservedField(String),

    /// Checked before the write; the entity's location is left untouched.
    #[error("cannot move entity {0} into {1}: it would contain itself")]
    ContainmentCycle(EntityId, EntityId),
}
