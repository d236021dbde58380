//! # Job Scheduling
//!
//! A fixed-size worker pool fed by two priority queues.
//!
//! ## Design Philosophy
//!
//! - Jobs are plain `FnOnce` closures; no isolation, no message passing
//! - The high-priority queue is always drained before the low one
//! - Waiting is a busy-yield loop; there is no cancellation or timeout
//!
//! The ECS core never schedules jobs itself. Callers use
//! [`System::supports_multithreading`](crate::ecs::System::supports_multithreading)
//! to decide which chunk lists can be handed to workers.

mod scheduler;

pub use scheduler::{Job, JobScheduler, Priority};
