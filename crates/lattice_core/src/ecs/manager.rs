//! # Entity Manager
//!
//! The central container for all entities and components.
//!
//! The manager owns:
//! - the archetype registry (`ArchetypeId -> ChunkList`),
//! - the address map (`EntityId -> EntityAddress`), the single source of
//!   truth for where an entity's data lives,
//! - static components: singletons attached to the manager instead of an
//!   entity (physics world, frame time, transform graph...).
//!
//! Adding or removing a component migrates the entity to the chunk list of
//! its new archetype. Structural operations are not synchronised; callers
//! that share a manager across threads must lock around them.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use super::chunk::ChunkList;
use super::component::{Component, ComponentId};
use super::entity::{EntityAddress, EntityData, EntityId};
use super::layout::{ArchetypeId, ComponentLayout};
use crate::config::EcsConfig;
use crate::error::{EcsError, EcsResult};
use crate::memory::{MemoryStats, MemoryTag, MemoryTracker};

/// Hook run by [`EntityManager::destroy_entity`] before the entity's slot is
/// freed. The entity is still alive while the hook runs.
pub type DestroyCallback = fn(&mut EntityManager, EntityId);

/// Owner of every entity, archetype and static component.
///
/// # Example
///
/// ```rust,ignore
/// let mut entities = EntityManager::new();
///
/// let ship = entities.create_entity();
/// entities.add_component::<Velocity>(ship)?.unwrap().x = 2.0;
/// entities.add_static_component(FrameTime(1.0 / 60.0));
/// ```
pub struct EntityManager {
    config: EcsConfig,
    base_layout: ComponentLayout,
    /// Chunk lists, indexed by `EntityAddress::archetype`. Never shrinks.
    archetypes: Vec<ChunkList>,
    archetype_lookup: HashMap<ArchetypeId, usize>,
    addresses: HashMap<EntityId, EntityAddress>,
    next_id: u64,
    statics: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    destroy_callbacks: Vec<DestroyCallback>,
    memory: Arc<MemoryTracker>,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityManager {
    /// Creates a manager with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(EcsConfig::default())
    }

    /// Creates a manager from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::InvalidConfig`] if the configuration fails
    /// validation.
    pub fn with_config(config: EcsConfig) -> EcsResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EcsConfig) -> Self {
        Self {
            base_layout: ComponentLayout::new(config.chunk_size_bytes),
            archetypes: Vec::new(),
            archetype_lookup: HashMap::new(),
            addresses: HashMap::with_capacity(config.initial_entity_capacity),
            next_id: 0,
            statics: HashMap::new(),
            destroy_callbacks: Vec::new(),
            memory: Arc::new(MemoryTracker::new()),
            config,
        }
    }

    /// The configuration this manager was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EcsConfig {
        &self.config
    }

    // ========================================================================
    // ENTITY LIFECYCLE
    // ========================================================================

    /// Creates an entity holding only [`EntityData`].
    ///
    /// The returned id is valid immediately and is never handed out again.
    pub fn create_entity(&mut self) -> EntityId {
        let id = EntityId::from_raw(self.next_id);
        self.next_id += 1;

        let archetype = self.fetch_or_create(self.base_layout.clone());
        let list = &mut self.archetypes[archetype];
        let chunk = list.allocate_address();
        let index = list.chunk_mut(chunk).push_entity(id);

        self.addresses.insert(
            id,
            EntityAddress {
                archetype,
                chunk,
                index,
            },
        );
        id
    }

    /// Destroys an entity.
    ///
    /// Registered destroy callbacks run first, in registration order, while
    /// the entity is still alive. Its slot is then freed with a swap-remove.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if `id` is not alive.
    pub fn destroy_entity(&mut self, id: EntityId) -> EcsResult<()> {
        if !self.is_alive(id) {
            return Err(EcsError::EntityNotFound(id));
        }

        let callbacks = self.destroy_callbacks.clone();
        for callback in callbacks {
            callback(self, id);
        }

        // A callback may already have destroyed the entity.
        let Some(address) = self.addresses.remove(&id) else {
            return Ok(());
        };

        let moved = self.archetypes[address.archetype]
            .chunk_mut(address.chunk)
            .remove_entity(address.index);
        if let Some(moved) = moved {
            self.relocate(moved, address);
        }

        tracing::trace!(%id, "destroyed entity");
        Ok(())
    }

    /// Registers a hook to run before every entity destruction.
    pub fn register_destroy_callback(&mut self, callback: DestroyCallback) {
        self.destroy_callbacks.push(callback);
    }

    /// Checks if an entity is alive.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, id: EntityId) -> bool {
        self.addresses.contains_key(&id)
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.addresses.len()
    }

    /// Current location of an entity's data.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if `id` is not alive.
    #[inline]
    pub fn address_of(&self, id: EntityId) -> EcsResult<EntityAddress> {
        self.addresses
            .get(&id)
            .copied()
            .ok_or(EcsError::EntityNotFound(id))
    }

    /// The archetype an entity currently belongs to.
    #[must_use]
    pub fn layout_of(&self, id: EntityId) -> Option<&ComponentLayout> {
        let address = self.addresses.get(&id)?;
        Some(self.archetypes[address.archetype].layout())
    }

    // ========================================================================
    // COMPONENTS
    // ========================================================================

    /// Adds a default-constructed `T` to an entity, migrating it to the
    /// archetype that includes `T`.
    ///
    /// Returns `Ok(None)` without touching the entity if it already has `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if `id` is not alive.
    pub fn add_component<T: Component>(&mut self, id: EntityId) -> EcsResult<Option<&mut T>> {
        let address = self.address_of(id)?;
        let current = self.archetypes[address.archetype].layout();
        let candidate = current.with_component::<T>();
        if candidate.hash() == current.hash() {
            return Ok(None);
        }

        let destination = self.fetch_or_create(candidate);
        let moved_to = self.migrate(id, address, destination);
        Ok(self.archetypes[moved_to.archetype]
            .chunk_mut(moved_to.chunk)
            .get_mut::<T>(moved_to.index))
    }

    /// Sets `T` on an entity, adding the component first if it is missing.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EntityNotFound`] if `id` is not alive.
    pub fn insert_component<T: Component>(&mut self, id: EntityId, value: T) -> EcsResult<&mut T> {
        if !self.has_component::<T>(id) {
            self.add_component::<T>(id)?;
        }
        let slot = self
            .get_component_mut::<T>(id)
            .ok_or(EcsError::EntityNotFound(id))?;
        *slot = value;
        Ok(slot)
    }

    /// Removes `T` from an entity, dropping the value and migrating the
    /// entity to the archetype without `T`.
    ///
    /// # Errors
    ///
    /// - [`EcsError::EntityNotFound`] if `id` is not alive
    /// - [`EcsError::ComponentMissing`] if the entity has no `T`
    /// - [`EcsError::ReservedComponent`] if `T` is [`EntityData`]
    pub fn remove_component<T: Component>(&mut self, id: EntityId) -> EcsResult<()> {
        let component = ComponentId::of::<T>();
        if component == ComponentId::of::<EntityData>() {
            return Err(EcsError::ReservedComponent(type_name::<T>()));
        }

        let address = self.address_of(id)?;
        let current = self.archetypes[address.archetype].layout();
        if !current.contains(component) {
            return Err(EcsError::ComponentMissing {
                entity: id,
                component: type_name::<T>(),
            });
        }

        let candidate = current.without_component(component);
        let destination = self.fetch_or_create(candidate);
        self.migrate(id, address, destination);
        Ok(())
    }

    /// Component `T` of an entity, or `None` if the entity is dead or lacks it.
    #[must_use]
    pub fn get_component<T: Component>(&self, id: EntityId) -> Option<&T> {
        let address = self.addresses.get(&id)?;
        self.archetypes[address.archetype]
            .chunk(address.chunk)
            .get::<T>(address.index)
    }

    /// Mutable variant of [`get_component`](Self::get_component).
    pub fn get_component_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        let address = *self.addresses.get(&id)?;
        self.archetypes[address.archetype]
            .chunk_mut(address.chunk)
            .get_mut::<T>(address.index)
    }

    /// Checks if an entity has component `T`.
    #[must_use]
    pub fn has_component<T: Component>(&self, id: EntityId) -> bool {
        self.layout_of(id).is_some_and(ComponentLayout::has::<T>)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Every registered chunk list, in registration order.
    #[inline]
    #[must_use]
    pub fn chunk_lists(&self) -> &[ChunkList] {
        &self.archetypes
    }

    /// Number of registered archetypes.
    #[inline]
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Chunk lists whose archetype has every component in `with`.
    #[must_use]
    pub fn chunk_lists_with(&self, with: &[ComponentId]) -> Vec<&ChunkList> {
        self.chunk_lists_matching(with, &[])
    }

    /// Chunk lists whose archetype has none of the components in `without`.
    #[must_use]
    pub fn chunk_lists_without(&self, without: &[ComponentId]) -> Vec<&ChunkList> {
        self.chunk_lists_matching(&[], without)
    }

    /// Chunk lists having all of `with` and none of `without`.
    #[must_use]
    pub fn chunk_lists_matching(
        &self,
        with: &[ComponentId],
        without: &[ComponentId],
    ) -> Vec<&ChunkList> {
        self.archetypes
            .iter()
            .filter(|list| matches(list, with, without))
            .collect()
    }

    /// Mutable variant of [`chunk_lists_with`](Self::chunk_lists_with).
    ///
    /// The lists grant mutable access to component values only. Do not
    /// `mem::swap` them; the address map would keep pointing at the old
    /// archetype indices.
    pub fn chunk_lists_with_mut(&mut self, with: &[ComponentId]) -> Vec<&mut ChunkList> {
        self.chunk_lists_matching_mut(with, &[])
    }

    /// Mutable variant of [`chunk_lists_matching`](Self::chunk_lists_matching).
    pub fn chunk_lists_matching_mut(
        &mut self,
        with: &[ComponentId],
        without: &[ComponentId],
    ) -> Vec<&mut ChunkList> {
        self.archetypes
            .iter_mut()
            .filter(|list| matches(list, with, without))
            .collect()
    }

    // ========================================================================
    // STATIC COMPONENTS
    // ========================================================================

    /// Attaches a singleton of type `T` to the manager, returning the
    /// previous value if one was registered.
    pub fn add_static_component<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.statics
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    /// The singleton of type `T`, if registered.
    #[must_use]
    pub fn static_component<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.statics.get(&TypeId::of::<T>())?.downcast_ref::<T>()
    }

    /// Mutable singleton of type `T`, if registered.
    pub fn static_component_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.statics.get_mut(&TypeId::of::<T>())?.downcast_mut::<T>()
    }

    /// Detaches and returns the singleton of type `T`.
    pub fn take_static_component<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        let boxed = self.statics.remove(&TypeId::of::<T>())?;
        boxed.downcast::<T>().ok().map(|value| *value)
    }

    // ========================================================================
    // MEMORY
    // ========================================================================

    /// Allocation counters for chunk memory.
    #[must_use]
    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats(MemoryTag::Chunk)
    }

    /// The tracker shared by every chunk of this manager.
    #[inline]
    #[must_use]
    pub fn memory(&self) -> &Arc<MemoryTracker> {
        &self.memory
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Returns the registry index for `layout`, registering a new chunk
    /// list if the archetype is unknown.
    fn fetch_or_create(&mut self, layout: ComponentLayout) -> usize {
        let hash = layout.hash();
        if let Some(&index) = self.archetype_lookup.get(&hash) {
            return index;
        }

        tracing::debug!(
            archetype = %hash,
            components = layout.len(),
            per_chunk = layout.max_entity_count(),
            "registered archetype"
        );

        let index = self.archetypes.len();
        self.archetypes.push(ChunkList::new(
            layout,
            self.config.chunk_alignment,
            Arc::clone(&self.memory),
        ));
        self.archetype_lookup.insert(hash, index);
        index
    }

    /// Moves an entity from `from` into archetype `destination`.
    fn migrate(&mut self, id: EntityId, from: EntityAddress, destination: usize) -> EntityAddress {
        let chunk = self.archetypes[destination].allocate_address();
        let (source, target) = pair_mut(&mut self.archetypes, from.archetype, destination);
        let (index, moved) = target
            .chunk_mut(chunk)
            .migrate_entity(source.chunk_mut(from.chunk), from.index);

        if let Some(moved) = moved {
            self.relocate(moved, from);
        }

        let to = EntityAddress {
            archetype: destination,
            chunk,
            index,
        };
        self.addresses.insert(id, to);
        tracing::trace!(%id, from = from.archetype, to = destination, "migrated entity");
        to
    }

    fn relocate(&mut self, id: EntityId, address: EntityAddress) {
        if let Some(slot) = self.addresses.get_mut(&id) {
            *slot = address;
        }
    }
}

fn matches(list: &ChunkList, with: &[ComponentId], without: &[ComponentId]) -> bool {
    with.iter().all(|&id| list.contains(id)) && !without.iter().any(|&id| list.contains(id))
}

/// Borrows two distinct elements of a slice mutably.
fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    assert_ne!(a, b, "pair_mut needs two distinct indices");
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Default, Debug, Clone, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[derive(Default, Debug, PartialEq)]
    struct Name(String);

    #[derive(Debug, PartialEq)]
    struct FrameTime(f32);

    #[test]
    fn test_created_entity_has_only_entity_data() {
        let mut entities = EntityManager::new();
        let id = entities.create_entity();

        assert_eq!(entities.get_component::<EntityData>(id).unwrap().id(), id);
        assert_eq!(entities.layout_of(id).unwrap().len(), 1);
        assert_eq!(entities.entity_count(), 1);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut entities = EntityManager::new();
        let a = entities.create_entity();
        entities.destroy_entity(a).unwrap();
        let b = entities.create_entity();
        assert!(b > a);
        assert!(!entities.is_alive(a));
    }

    #[test]
    fn test_add_component_twice_is_noop() {
        let mut entities = EntityManager::new();
        let id = entities.create_entity();

        entities.add_component::<Position>(id).unwrap().unwrap().x = 3.0;
        let hash = entities.layout_of(id).unwrap().hash();

        assert!(entities.add_component::<Position>(id).unwrap().is_none());
        assert_eq!(entities.layout_of(id).unwrap().hash(), hash);
        assert_eq!(entities.get_component::<Position>(id).unwrap().x, 3.0);
    }

    #[test]
    fn test_migration_keeps_existing_values() {
        let mut entities = EntityManager::new();
        let id = entities.create_entity();
        *entities.add_component::<Name>(id).unwrap().unwrap() = Name("probe".into());
        entities.add_component::<Position>(id).unwrap().unwrap().y = 8.0;

        entities.add_component::<Velocity>(id).unwrap();

        assert_eq!(entities.get_component::<Name>(id).unwrap().0, "probe");
        assert_eq!(entities.get_component::<Position>(id).unwrap().y, 8.0);
        assert_eq!(entities.get_component::<Velocity>(id), Some(&Velocity::default()));
    }

    #[test]
    fn test_remove_component() {
        let mut entities = EntityManager::new();
        let id = entities.create_entity();
        let base = entities.layout_of(id).unwrap().hash();

        entities.add_component::<Velocity>(id).unwrap();
        entities.remove_component::<Velocity>(id).unwrap();

        assert_eq!(entities.layout_of(id).unwrap().hash(), base);
        assert!(!entities.has_component::<Velocity>(id));
        assert_eq!(
            entities.remove_component::<Velocity>(id),
            Err(EcsError::ComponentMissing {
                entity: id,
                component: type_name::<Velocity>(),
            })
        );
        assert!(matches!(
            entities.remove_component::<EntityData>(id),
            Err(EcsError::ReservedComponent(_))
        ));
    }

    #[test]
    fn test_swap_remove_updates_moved_address() {
        let mut entities = EntityManager::new();
        let ids: Vec<_> = (0..4).map(|_| entities.create_entity()).collect();
        for (n, &id) in ids.iter().enumerate() {
            entities.insert_component(id, Position { x: n as f32, y: 0.0 }).unwrap();
        }

        entities.destroy_entity(ids[0]).unwrap();

        for (n, &id) in ids.iter().enumerate().skip(1) {
            assert_eq!(entities.get_component::<Position>(id).unwrap().x, n as f32);
            assert_eq!(entities.get_component::<EntityData>(id).unwrap().id(), id);
        }
        assert_eq!(entities.address_of(ids[3]).unwrap().index, 0);
    }

    #[test]
    fn test_unknown_entity_errors() {
        let mut entities = EntityManager::new();
        let ghost = EntityId::from_raw(99);
        assert_eq!(
            entities.destroy_entity(ghost),
            Err(EcsError::EntityNotFound(ghost))
        );
        assert!(entities.add_component::<Position>(ghost).is_err());
        assert!(entities.get_component::<Position>(ghost).is_none());
    }

    #[test]
    fn test_queries_filter_archetypes() {
        let mut entities = EntityManager::new();
        let moving = entities.create_entity();
        entities.add_component::<Position>(moving).unwrap();
        entities.add_component::<Velocity>(moving).unwrap();
        let still = entities.create_entity();
        entities.add_component::<Position>(still).unwrap();

        let position = ComponentId::of::<Position>();
        let velocity = ComponentId::of::<Velocity>();

        let with_position: usize = entities
            .chunk_lists_with(&[position])
            .iter()
            .map(|list| list.entity_count())
            .sum();
        assert_eq!(with_position, 2);

        let static_only = entities.chunk_lists_matching(&[position], &[velocity]);
        assert!(static_only.iter().all(|list| !list.contains(velocity)));
        assert_eq!(static_only.iter().map(|l| l.entity_count()).sum::<usize>(), 1);

        assert!(entities
            .chunk_lists_without(&[position])
            .iter()
            .all(|list| !list.contains(position)));
    }

    #[test]
    fn test_static_components() {
        let mut entities = EntityManager::new();
        assert!(entities.static_component::<FrameTime>().is_none());

        assert!(entities.add_static_component(FrameTime(0.016)).is_none());
        entities.static_component_mut::<FrameTime>().unwrap().0 = 0.033;
        assert_eq!(entities.static_component::<FrameTime>(), Some(&FrameTime(0.033)));

        assert_eq!(
            entities.add_static_component(FrameTime(0.5)),
            Some(FrameTime(0.033))
        );
        assert_eq!(entities.take_static_component::<FrameTime>(), Some(FrameTime(0.5)));
        assert!(entities.static_component::<FrameTime>().is_none());
    }

    #[test]
    fn test_destroy_callback_sees_live_entity() {
        #[derive(Default)]
        struct Graveyard(Vec<EntityId>);

        fn record(entities: &mut EntityManager, id: EntityId) {
            assert!(entities.is_alive(id));
            entities.static_component_mut::<Graveyard>().unwrap().0.push(id);
        }

        let mut entities = EntityManager::new();
        entities.add_static_component(Graveyard::default());
        entities.register_destroy_callback(record);

        let id = entities.create_entity();
        entities.destroy_entity(id).unwrap();

        assert_eq!(entities.static_component::<Graveyard>().unwrap().0, vec![id]);
    }

    #[test]
    fn test_chunk_memory_is_tracked() {
        let mut entities = EntityManager::new();
        let id = entities.create_entity();
        entities.add_component::<Position>(id).unwrap();

        let stats = entities.memory_stats();
        assert_eq!(stats.outstanding(), entities.archetype_count());
        assert_eq!(
            stats.live_bytes,
            entities.archetype_count() * entities.config().chunk_size_bytes
        );
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EcsConfig {
            chunk_size_bytes: 10,
            ..EcsConfig::default()
        };
        assert!(EntityManager::with_config(config).is_err());
    }
}
