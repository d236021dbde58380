//! # Entity Component System
//!
//! Archetype-based storage: entities with the same component set share a
//! [`ChunkList`], and each [`Chunk`] stores its components as contiguous
//! sub-arrays.
//!
//! ## Design Philosophy
//!
//! - Component types are type-erased through [`ComponentDescriptor`]s, so
//!   chunks need no per-archetype code generation
//! - Adding or removing a component migrates the entity between archetypes
//! - Structural changes during iteration go through a [`CommandBuffer`]
//! - Hierarchies are an index on top of storage, not part of it

mod chunk;
mod commands;
mod component;
mod entity;
mod layout;
mod manager;
mod system;
mod transform;

pub use chunk::{Chunk, ChunkList};
pub use commands::{Command, CommandBuffer, EntityRef, FlushContext, TransientEntity};
pub use component::{Component, ComponentDescriptor, ComponentId};
pub use entity::{EntityAddress, EntityData, EntityId};
pub use layout::{ArchetypeId, ComponentLayout, MAX_COMPONENTS_PER_ARCHETYPE};
pub use manager::{DestroyCallback, EntityManager};
pub use system::System;
pub use transform::{ChildTransform, RootTransform, TransformGraph};
