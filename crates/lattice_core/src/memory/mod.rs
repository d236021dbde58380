//! # Memory Management
//!
//! Chunk memory is allocated in fixed-size, aligned blocks through a shared
//! [`MemoryTracker`] so every byte the ECS holds can be attributed to a tag.
//!
//! ## Design Philosophy
//!
//! - Blocks are allocated once per chunk and never reallocated
//! - Allocation failure is fatal; there is no degraded mode
//! - Counters are cheap relaxed atomics, readable from any thread

mod tracker;

pub use tracker::{MemoryStats, MemoryTag, MemoryTracker};
