//! # Lattice Core
//!
//! Archetype-based Entity Component System (ECS) with:
//! - struct-of-arrays chunk storage with type-erased components
//! - archetype migration on component add/remove
//! - deferred structural changes through command buffers
//! - a parent/child transform index
//!
//! ## Architecture Rules
//!
//! 1. **Entity ids are never reused** - an id is only a key into the address map
//! 2. **Data-oriented design** - components live in contiguous per-chunk arrays
//! 3. **No internal locking** - structural changes need exclusive access
//!
//! ## Example
//!
//! ```rust,ignore
//! use lattice_core::{CommandBuffer, EntityManager, TransformGraph};
//!
//! let mut entities = EntityManager::new();
//! TransformGraph::install(&mut entities);
//!
//! let ship = entities.create_entity();
//! entities.insert_component(ship, Velocity { x: 1.0, y: 0.0 })?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod jobs;
pub mod memory;

pub use config::EcsConfig;
pub use ecs::{
    ArchetypeId, Chunk, ChunkList, ChildTransform, Command, CommandBuffer, Component,
    ComponentDescriptor, ComponentId, ComponentLayout, EntityAddress, EntityData, EntityId,
    EntityManager, EntityRef, RootTransform, System, TransformGraph, TransientEntity,
};
pub use error::{EcsError, EcsResult};
pub use jobs::{JobScheduler, Priority};
pub use memory::{MemoryStats, MemoryTag, MemoryTracker};
