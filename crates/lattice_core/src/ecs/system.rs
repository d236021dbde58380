//! # Systems
//!
//! A [`System`] is a per-chunk processing routine. The harness only walks
//! chunk lists and chunks; selecting which lists to visit is the caller's
//! job, usually through
//! [`EntityManager::chunk_lists_with_mut`](super::EntityManager::chunk_lists_with_mut).
//!
//! Inside [`System::process`], pull whole columns with
//! [`Chunk::column_mut`] or [`Chunk::columns_mut`]: the component offset is
//! resolved once per chunk and entities are then plain slice indices.

use super::chunk::{Chunk, ChunkList};
use crate::error::EcsResult;

/// Per-chunk processing routine.
///
/// # Example
///
/// ```rust,ignore
/// struct Integrate { dt: f32 }
///
/// impl System for Integrate {
///     fn process(&mut self, chunk: &mut Chunk) -> EcsResult<()> {
///         if let Some((positions, velocities)) = chunk.columns_mut::<Position, Velocity>() {
///             for (p, v) in positions.iter_mut().zip(velocities.iter()) {
///                 p.x += v.x * self.dt;
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait System {
    /// Processes every entity stored in `chunk`.
    ///
    /// # Errors
    ///
    /// Any error aborts the current [`process_chunks`](Self::process_chunks)
    /// call.
    fn process(&mut self, chunk: &mut Chunk) -> EcsResult<()>;

    /// Advisory flag: `true` if disjoint chunk lists may be processed by
    /// concurrent instances of this system.
    ///
    /// The harness never locks. A scheduler reads this flag to decide
    /// whether to fan the work out.
    fn supports_multithreading(&self) -> bool {
        false
    }

    /// Human-readable name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Calls [`process`](Self::process) once for every chunk of every list,
    /// in order.
    ///
    /// Empty chunks are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by `process`. Chunks after the
    /// failing one are not visited.
    fn process_chunks(&mut self, lists: &mut [&mut ChunkList]) -> EcsResult<()> {
        for list in lists.iter_mut() {
            for chunk in list.chunks_mut() {
                if chunk.is_empty() {
                    continue;
                }
                if let Err(error) = self.process(chunk) {
                    tracing::debug!(system = self.name(), %error, "system aborted");
                    return Err(error);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EcsConfig;
    use crate::ecs::{ComponentId, EntityId, EntityManager};
    use crate::error::EcsError;

    #[derive(Default, Debug, Clone, Copy, PartialEq)]
    struct Position(f32);

    #[derive(Default, Debug, Clone, Copy, PartialEq)]
    struct Velocity(f32);

    struct Integrate {
        dt: f32,
        chunks_seen: usize,
    }

    impl System for Integrate {
        fn process(&mut self, chunk: &mut Chunk) -> EcsResult<()> {
            self.chunks_seen += 1;
            if let Some((positions, velocities)) = chunk.columns_mut::<Position, Velocity>() {
                for (p, v) in positions.iter_mut().zip(velocities.iter()) {
                    p.0 += v.0 * self.dt;
                }
            }
            Ok(())
        }
    }

    struct FailOn(EntityId);

    impl System for FailOn {
        fn process(&mut self, chunk: &mut Chunk) -> EcsResult<()> {
            if chunk.entity_ids().any(|id| id == self.0) {
                return Err(EcsError::EntityNotFound(self.0));
            }
            Ok(())
        }
    }

    fn spawn_moving(entities: &mut EntityManager, speed: f32) -> EntityId {
        let id = entities.create_entity();
        entities.add_component::<Position>(id).unwrap();
        entities.insert_component(id, Velocity(speed)).unwrap();
        id
    }

    #[test]
    fn test_process_visits_matching_chunks() {
        let mut entities = EntityManager::new();
        let a = spawn_moving(&mut entities, 1.0);
        let b = spawn_moving(&mut entities, -2.0);
        let idle = entities.create_entity();
        entities.add_component::<Position>(idle).unwrap();

        let mut system = Integrate {
            dt: 0.5,
            chunks_seen: 0,
        };
        let mut lists = entities.chunk_lists_with_mut(&[
            ComponentId::of::<Position>(),
            ComponentId::of::<Velocity>(),
        ]);
        system.process_chunks(&mut lists).unwrap();

        assert_eq!(system.chunks_seen, 1);
        assert_eq!(entities.get_component::<Position>(a), Some(&Position(0.5)));
        assert_eq!(entities.get_component::<Position>(b), Some(&Position(-1.0)));
        assert_eq!(entities.get_component::<Position>(idle), Some(&Position(0.0)));
    }

    #[test]
    fn test_addresses_survive_a_system_pass() {
        let config = EcsConfig {
            chunk_size_bytes: 1024,
            ..EcsConfig::default()
        };
        let mut entities = EntityManager::with_config(config).unwrap();
        let ids: Vec<_> = (0..200)
            .map(|n| spawn_moving(&mut entities, n as f32))
            .collect();

        let mut system = Integrate {
            dt: 1.0,
            chunks_seen: 0,
        };
        let mut lists = entities.chunk_lists_with_mut(&[ComponentId::of::<Velocity>()]);
        system.process_chunks(&mut lists).unwrap();
        assert!(system.chunks_seen > 1);

        assert_eq!(entities.entity_count(), ids.len());
        for (n, &id) in ids.iter().enumerate() {
            let address = entities.address_of(id).unwrap();
            let chunk = entities.chunk_lists()[address.archetype].chunk(address.chunk);
            assert_eq!(chunk.entity_id(address.index), id);
            assert_eq!(entities.get_component::<Position>(id), Some(&Position(n as f32)));
        }
        for &id in &ids {
            entities.destroy_entity(id).unwrap();
        }
        assert_eq!(entities.entity_count(), 0);
    }

    #[test]
    fn test_error_aborts_iteration() {
        let mut entities = EntityManager::new();
        let target = entities.create_entity();

        let mut system = FailOn(target);
        let mut lists = entities.chunk_lists_with_mut(&[]);
        assert_eq!(
            system.process_chunks(&mut lists),
            Err(EcsError::EntityNotFound(target))
        );
        assert!(!system.supports_multithreading());
    }
}
