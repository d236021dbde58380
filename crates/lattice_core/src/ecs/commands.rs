//! # Deferred Commands
//!
//! Structural changes (create, destroy, add, remove) invalidate chunk slices
//! and addresses, so they cannot run while a [`System`](super::System) is
//! iterating. Systems record them into a [`CommandBuffer`] instead, and the
//! buffer is flushed against the [`EntityManager`] at a sync point.
//!
//! ## Transient entities
//!
//! [`CommandBuffer::create_entity`] returns a [`TransientEntity`] before any
//! real id exists. Later commands in the same buffer may target it; at flush
//! time the create command runs first and publishes the real id.
//!
//! Every buffer carries a unique id that is renewed on each flush. A
//! transient handle from another buffer, or from before the last flush,
//! fails with [`EcsError::UnresolvedTransient`].
//!
//! ## Invariants
//! - Commands execute in recording order.
//! - After a flush, successful or not, the buffer is empty.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use super::component::Component;
use super::entity::EntityId;
use super::manager::EntityManager;
use crate::error::{EcsError, EcsResult};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

fn next_buffer_id() -> u64 {
    NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Placeholder for an entity whose creation is still queued in a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransientEntity {
    buffer: u64,
    index: u32,
}

impl TransientEntity {
    /// Position of the create command among the buffer's transients.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Display for TransientEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transient({}@buffer{})", self.index, self.buffer)
    }
}

/// Target of a recorded command: a live entity or a transient one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityRef {
    /// An entity that already exists.
    Live(EntityId),
    /// An entity created earlier in the same buffer.
    Transient(TransientEntity),
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        Self::Live(id)
    }
}

impl From<TransientEntity> for EntityRef {
    fn from(handle: TransientEntity) -> Self {
        Self::Transient(handle)
    }
}

/// State shared by the commands of one flush.
pub struct FlushContext<'a> {
    entities: &'a mut EntityManager,
    buffer: u64,
    transients: HashMap<u32, EntityId>,
    created: Vec<EntityId>,
}

impl FlushContext<'_> {
    /// The manager the buffer is being flushed into.
    #[inline]
    pub fn entities(&mut self) -> &mut EntityManager {
        &mut *self.entities
    }

    /// Maps a command target to a real entity id.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::UnresolvedTransient`] if the handle belongs to
    /// another buffer, to an earlier flush, or its create command has not
    /// run yet.
    pub fn resolve(&self, target: EntityRef) -> EcsResult<EntityId> {
        match target {
            EntityRef::Live(id) => Ok(id),
            EntityRef::Transient(handle) if handle.buffer == self.buffer => self
                .transients
                .get(&handle.index)
                .copied()
                .ok_or(EcsError::UnresolvedTransient(handle)),
            EntityRef::Transient(handle) => Err(EcsError::UnresolvedTransient(handle)),
        }
    }

    fn publish(&mut self, handle: TransientEntity, id: EntityId) {
        self.transients.insert(handle.index, id);
        self.created.push(id);
    }
}

/// A recorded structural change.
///
/// The built-in commands cover create, destroy, add and remove; custom
/// commands can be queued with [`CommandBuffer::push`].
pub trait Command: Send {
    /// Applies the change.
    ///
    /// # Errors
    ///
    /// Any error aborts the flush.
    fn execute(self: Box<Self>, context: &mut FlushContext<'_>) -> EcsResult<()>;
}

struct CreateEntity {
    handle: TransientEntity,
}

impl Command for CreateEntity {
    fn execute(self: Box<Self>, context: &mut FlushContext<'_>) -> EcsResult<()> {
        let id = context.entities().create_entity();
        context.publish(self.handle, id);
        Ok(())
    }
}

struct DestroyEntity {
    target: EntityRef,
}

impl Command for DestroyEntity {
    fn execute(self: Box<Self>, context: &mut FlushContext<'_>) -> EcsResult<()> {
        let id = context.resolve(self.target)?;
        context.entities().destroy_entity(id)
    }
}

struct AddComponent<T> {
    target: EntityRef,
    value: Option<T>,
}

impl<T: Component> Command for AddComponent<T> {
    fn execute(self: Box<Self>, context: &mut FlushContext<'_>) -> EcsResult<()> {
        let id = context.resolve(self.target)?;
        match self.value {
            Some(value) => {
                context.entities().insert_component(id, value)?;
            }
            None => {
                context.entities().add_component::<T>(id)?;
            }
        }
        Ok(())
    }
}

struct RemoveComponent<T> {
    target: EntityRef,
    _component: PhantomData<fn() -> T>,
}

impl<T: Component> Command for RemoveComponent<T> {
    fn execute(self: Box<Self>, context: &mut FlushContext<'_>) -> EcsResult<()> {
        let id = context.resolve(self.target)?;
        context.entities().remove_component::<T>(id)
    }
}

/// FIFO queue of deferred structural changes.
///
/// # Example
///
/// ```rust,ignore
/// let mut commands = CommandBuffer::new();
/// let bullet = commands.create_entity();
/// commands.insert_component(bullet, Velocity { x: 40.0, y: 0.0 });
/// commands.destroy_entity(expired);
///
/// let spawned = commands.flush(&mut entities)?;
/// ```
pub struct CommandBuffer {
    id: u64,
    commands: Vec<Box<dyn Command>>,
    next_transient: u32,
    /// Entities created by the last flush before it failed.
    aborted_creations: Vec<EntityId>,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("id", &self.id)
            .field("commands", &self.commands.len())
            .field("transients", &self.next_transient)
            .field("aborted_creations", &self.aborted_creations)
            .finish()
    }
}

impl CommandBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: next_buffer_id(),
            commands: Vec::new(),
            next_transient: 0,
            aborted_creations: Vec::new(),
        }
    }

    /// Queues the creation of an entity and returns its transient handle.
    pub fn create_entity(&mut self) -> TransientEntity {
        let handle = TransientEntity {
            buffer: self.id,
            index: self.next_transient,
        };
        self.next_transient += 1;
        self.commands.push(Box::new(CreateEntity { handle }));
        handle
    }

    /// Queues the destruction of an entity.
    pub fn destroy_entity(&mut self, target: impl Into<EntityRef>) {
        self.commands.push(Box::new(DestroyEntity {
            target: target.into(),
        }));
    }

    /// Queues adding a default-constructed `T`. A no-op at flush time if the
    /// entity already has `T`.
    pub fn add_component<T: Component>(&mut self, target: impl Into<EntityRef>) {
        self.commands.push(Box::new(AddComponent::<T> {
            target: target.into(),
            value: None,
        }));
    }

    /// Queues setting `T` to `value`, adding the component if missing.
    pub fn insert_component<T: Component>(&mut self, target: impl Into<EntityRef>, value: T) {
        self.commands.push(Box::new(AddComponent {
            target: target.into(),
            value: Some(value),
        }));
    }

    /// Queues removing `T`. Flushing fails if the entity has no `T`.
    pub fn remove_component<T: Component>(&mut self, target: impl Into<EntityRef>) {
        self.commands.push(Box::new(RemoveComponent::<T> {
            target: target.into(),
            _component: PhantomData,
        }));
    }

    /// Queues a custom command.
    pub fn push(&mut self, command: impl Command + 'static) {
        self.commands.push(Box::new(command));
    }

    /// Number of queued commands.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Checks if no command is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drops every queued command. Outstanding transient handles become
    /// unresolvable.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.aborted_creations.clear();
        self.renew();
    }

    /// Executes every queued command in recording order.
    ///
    /// Returns the ids of the entities created, in recording order.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a command. Commands after it are
    /// dropped without running; the ones before it stay applied. Entities
    /// created before the failure stay alive and are reported by
    /// [`aborted_creations`](Self::aborted_creations).
    pub fn flush(&mut self, entities: &mut EntityManager) -> EcsResult<Vec<EntityId>> {
        self.aborted_creations.clear();
        let commands = std::mem::take(&mut self.commands);
        let mut context = FlushContext {
            entities,
            buffer: self.id,
            transients: HashMap::with_capacity(self.next_transient as usize),
            created: Vec::with_capacity(self.next_transient as usize),
        };
        self.renew();

        let total = commands.len();
        for (executed, command) in commands.into_iter().enumerate() {
            if let Err(error) = command.execute(&mut context) {
                tracing::warn!(
                    executed,
                    total,
                    %error,
                    created = ?context.created,
                    "command buffer flush aborted"
                );
                self.aborted_creations = context.created;
                return Err(error);
            }
        }

        tracing::debug!(
            commands = total,
            created = context.created.len(),
            "flushed command buffer"
        );
        Ok(context.created)
    }

    /// Entities the last failed [`flush`](Self::flush) created before it
    /// stopped. Empty after a successful flush.
    #[must_use]
    pub fn aborted_creations(&self) -> &[EntityId] {
        &self.aborted_creations
    }

    fn renew(&mut self) {
        self.id = next_buffer_id();
        self.next_transient = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, Clone, PartialEq)]
    struct Health(u32);

    #[derive(Default, Debug, Clone, PartialEq)]
    struct Burning;

    #[test]
    fn test_transient_resolves_within_buffer() {
        let mut entities = EntityManager::new();
        let mut commands = CommandBuffer::new();

        let spawned = commands.create_entity();
        commands.insert_component(spawned, Health(30));
        commands.add_component::<Burning>(spawned);
        commands.remove_component::<Burning>(spawned);
        assert_eq!(commands.len(), 4);

        let created = commands.flush(&mut entities).unwrap();
        assert_eq!(created.len(), 1);
        assert!(commands.is_empty());

        let id = created[0];
        assert_eq!(entities.get_component::<Health>(id), Some(&Health(30)));
        assert!(!entities.has_component::<Burning>(id));
    }

    #[test]
    fn test_commands_run_in_recording_order() {
        let mut entities = EntityManager::new();
        let live = entities.create_entity();

        let mut commands = CommandBuffer::new();
        commands.insert_component(live, Health(1));
        commands.insert_component(live, Health(2));
        commands.flush(&mut entities).unwrap();

        assert_eq!(entities.get_component::<Health>(live), Some(&Health(2)));
    }

    #[test]
    fn test_foreign_transient_is_rejected() {
        let mut entities = EntityManager::new();
        let mut other = CommandBuffer::new();
        let foreign = other.create_entity();

        let mut commands = CommandBuffer::new();
        commands.add_component::<Health>(foreign);

        assert_eq!(
            commands.flush(&mut entities),
            Err(EcsError::UnresolvedTransient(foreign))
        );
        assert!(commands.is_empty());
    }

    #[test]
    fn test_flushed_transient_is_stale() {
        let mut entities = EntityManager::new();
        let mut commands = CommandBuffer::new();

        let handle = commands.create_entity();
        commands.flush(&mut entities).unwrap();

        commands.destroy_entity(handle);
        assert_eq!(
            commands.flush(&mut entities),
            Err(EcsError::UnresolvedTransient(handle))
        );
        assert_eq!(entities.entity_count(), 1);
    }

    #[test]
    fn test_error_drops_remaining_commands() {
        let mut entities = EntityManager::new();
        let live = entities.create_entity();

        let mut commands = CommandBuffer::new();
        commands.insert_component(live, Health(5));
        commands.remove_component::<Burning>(live);
        commands.destroy_entity(live);

        assert!(matches!(
            commands.flush(&mut entities),
            Err(EcsError::ComponentMissing { .. })
        ));
        assert!(commands.is_empty());
        assert!(entities.is_alive(live));
        assert_eq!(entities.get_component::<Health>(live), Some(&Health(5)));
    }

    #[test]
    fn test_failed_flush_reports_created_entities() {
        let mut entities = EntityManager::new();
        let mut commands = CommandBuffer::new();

        let spawned = commands.create_entity();
        commands.insert_component(spawned, Health(3));
        commands.remove_component::<Burning>(spawned);
        commands.create_entity();

        assert!(matches!(
            commands.flush(&mut entities),
            Err(EcsError::ComponentMissing { .. })
        ));
        let orphans = commands.aborted_creations().to_vec();
        assert_eq!(orphans.len(), 1);
        assert!(entities.is_alive(orphans[0]));
        assert_eq!(entities.get_component::<Health>(orphans[0]), Some(&Health(3)));

        commands.create_entity();
        commands.flush(&mut entities).unwrap();
        assert!(commands.aborted_creations().is_empty());
        assert_eq!(entities.entity_count(), 2);
    }

    #[test]
    fn test_clear_invalidates_transients() {
        let mut commands = CommandBuffer::new();
        let before = commands.create_entity();
        commands.clear();
        let after = commands.create_entity();

        assert_eq!(commands.len(), 1);
        assert_ne!(before, after);
        assert_eq!(after.index(), 0);
    }

    #[test]
    fn test_custom_command() {
        struct Rename(EntityId, u32);

        impl Command for Rename {
            fn execute(self: Box<Self>, context: &mut FlushContext<'_>) -> EcsResult<()> {
                context.entities().insert_component(self.0, Health(self.1))?;
                Ok(())
            }
        }

        let mut entities = EntityManager::new();
        let id = entities.create_entity();
        let mut commands = CommandBuffer::new();
        commands.push(Rename(id, 9));
        commands.flush(&mut entities).unwrap();

        assert_eq!(entities.get_component::<Health>(id), Some(&Health(9)));
    }
}
