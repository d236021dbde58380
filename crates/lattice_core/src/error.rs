//! # ECS Error Types
//!
//! Recoverable failures of structural operations. Invariant violations that
//! indicate a programming error (an archetype with too many components, a
//! slot index out of range) panic instead.

use thiserror::Error;

use crate::ecs::{EntityId, TransientEntity};

/// Errors returned by the entity manager, command buffers, the transform
/// graph and the job scheduler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EcsError {
    /// The entity id is not registered with the manager.
    #[error("{0} does not exist")]
    EntityNotFound(EntityId),

    /// Attempted to remove a component the entity does not have.
    #[error("{entity} has no {component} component")]
    ComponentMissing {
        /// The entity that was targeted.
        entity: EntityId,
        /// Type name of the missing component.
        component: &'static str,
    },

    /// Attempted to remove a component every entity must keep.
    #[error("{0} is reserved and cannot be removed")]
    ReservedComponent(&'static str),

    /// A deferred command referenced a transient entity that was not created
    /// by the flushing buffer.
    #[error("transient entity {0} was not created by this command buffer")]
    UnresolvedTransient(TransientEntity),

    /// A static component required by the operation was never registered.
    #[error("static component {0} is not registered")]
    StaticMissing(&'static str),

    /// `child` is not attached to `parent`.
    #[error("{child} is not a child of {parent}")]
    NotAChild {
        /// The expected parent.
        parent: EntityId,
        /// The entity that was expected to be a child.
        child: EntityId,
    },

    /// Attaching `child` under `parent` would create a cycle.
    #[error("attaching {child} under {parent} would create a cycle")]
    HierarchyCycle {
        /// The requested parent.
        parent: EntityId,
        /// The requested child.
        child: EntityId,
    },

    /// A job was submitted after the scheduler shut down.
    #[error("job scheduler has been shut down")]
    SchedulerStopped,

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for ECS operations.
pub type EcsResult<T> = Result<T, EcsError>;
