//! Entity repository, capability store, and scheduler for Loam.

pub mod capability;
pub mod entity;
pub mod restriction;
pub mod scheduler;
pub mod store;

pub use capability::{Capability, CapabilityError, cap_types, capability_id, check_capability};
pub use entity::{Entity, EntityId, Verb};
pub use restriction::is_narrowing;
pub use scheduler::{Scheduler, SchedulerError};
pub use store::{ScheduledTask, StoreError, WorldStore};
