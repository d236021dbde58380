//! # Chunk Storage
//!
//! A [`Chunk`] is one fixed-size, aligned memory block holding up to
//! `max_entity_count` entities of a single archetype, one contiguous
//! sub-array per component type:
//!
//! ```text
//! | EntityData[0..N] | Position[0..N] | Velocity[0..N] |
//! ```
//!
//! A [`ChunkList`] owns every chunk of one archetype. It only ever appends
//! chunks, so a chunk's block never moves once entities live in it.
//!
//! Slots `0..len` are always initialised; everything past `len` is raw
//! memory. Removal back-fills the hole with the last slot (swap-remove) and
//! reports which entity moved so the manager can rewrite its address.

// SAFETY: This module manages raw, type-erased component memory.
// Every unsafe block relies on the slot invariant documented above.
#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

use super::component::{Component, ComponentDescriptor, ComponentId};
use super::entity::{EntityData, EntityId};
use super::layout::{ArchetypeId, ComponentLayout};
use crate::memory::{MemoryTag, MemoryTracker};

/// A fixed-capacity block of component data for one archetype.
///
/// Outside the crate a `&mut Chunk` only grants access to component values.
/// Slots are added and removed by the [`EntityManager`](super::EntityManager),
/// which keeps entity addresses in step:
///
/// ```compile_fail
/// fn evict(chunk: &mut lattice_core::Chunk) {
///     chunk.remove_entity(0);
/// }
/// ```
pub struct Chunk {
    block: NonNull<u8>,
    block_layout: Layout,
    layout: Arc<ComponentLayout>,
    memory: Arc<MemoryTracker>,
    len: usize,
}

impl Chunk {
    /// Allocates an empty chunk for `layout`.
    ///
    /// The block is aligned to the larger of `alignment` and the layout's
    /// strictest component alignment.
    pub(crate) fn new(
        layout: Arc<ComponentLayout>,
        alignment: usize,
        memory: Arc<MemoryTracker>,
    ) -> Self {
        let align = alignment.max(layout.max_align());
        let block_layout =
            Layout::from_size_align(layout.chunk_size(), align).expect("Invalid chunk layout");
        let block = memory.allocate(block_layout, MemoryTag::Chunk);

        Self {
            block,
            block_layout,
            layout,
            memory,
            len: 0,
        }
    }

    /// The archetype stored in this chunk.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &ComponentLayout {
        &self.layout
    }

    /// Number of entities currently stored.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of entities this chunk can hold.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.layout.max_entity_count()
    }

    /// Checks if every slot is occupied.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity()
    }

    /// Returns the pointer to `index` within a component's sub-array.
    ///
    /// Pointer arithmetic only; the slot may be uninitialised.
    #[inline]
    fn slot_ptr(&self, descriptor: &ComponentDescriptor, index: usize) -> *mut u8 {
        debug_assert!(index < self.capacity());
        // SAFETY: offset + size * index stays inside the block for any index
        // below max_entity_count, which the layout guarantees fits.
        unsafe {
            self.block
                .as_ptr()
                .add(descriptor.offset() + descriptor.size() * index)
        }
    }

    fn descriptor_of<T: Component>(&self) -> Option<&ComponentDescriptor> {
        self.layout.get_component_data(ComponentId::of::<T>())
    }

    /// Appends a new entity with every component default-constructed.
    ///
    /// Returns the slot index.
    pub(crate) fn push_entity(&mut self, id: EntityId) -> usize {
        assert!(!self.is_full(), "push into a full chunk");

        let index = self.len;
        for descriptor in self.layout.descriptors() {
            // SAFETY: index == len < capacity, so the slot is uninitialised
            // and in bounds.
            unsafe { descriptor.write_default(self.slot_ptr(descriptor, index)) };
        }
        self.len += 1;
        self.set_entity_id(index, id);
        index
    }

    /// Moves the entity at `source_index` of `source` into a new slot here.
    ///
    /// Components present in both layouts are moved with their descriptor's
    /// move function; components only this layout has are default
    /// constructed. The source slot is then vacated: components only the
    /// source layout had are dropped, and the source chunk swap-removes.
    ///
    /// Returns the new slot index and the id of the entity the source chunk
    /// moved into `source_index`, if any.
    pub(crate) fn migrate_entity(
        &mut self,
        source: &mut Chunk,
        source_index: usize,
    ) -> (usize, Option<EntityId>) {
        assert!(!self.is_full(), "migrate into a full chunk");
        assert!(
            source_index < source.len,
            "slot {source_index} out of range for chunk of {}",
            source.len
        );

        let index = self.len;
        for descriptor in self.layout.descriptors() {
            let dst = self.slot_ptr(descriptor, index);
            match source.layout.get_component_data(descriptor.id()) {
                // SAFETY: the source slot is initialised, the destination
                // slot is not, and the two blocks are distinct allocations.
                Some(from) => unsafe {
                    descriptor.move_to(source.slot_ptr(from, source_index), dst);
                },
                // SAFETY: destination slot is uninitialised and in bounds.
                None => unsafe { descriptor.write_default(dst) },
            }
        }
        self.len += 1;

        let destination = Arc::clone(&self.layout);
        let moved = source.vacate(source_index, |id| !destination.contains(id));
        (index, moved)
    }

    /// Destroys the entity at `index`, swap-removing the last slot into it.
    ///
    /// Returns the id of the entity that moved into `index`, or `None` if
    /// `index` was the last occupied slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub(crate) fn remove_entity(&mut self, index: usize) -> Option<EntityId> {
        self.vacate(index, |_| true)
    }

    /// Drops the components selected by `should_drop` at `index`, then fills
    /// the hole from the last slot.
    fn vacate(&mut self, index: usize, should_drop: impl Fn(ComponentId) -> bool) -> Option<EntityId> {
        assert!(
            index < self.len,
            "slot {index} out of range for chunk of {}",
            self.len
        );

        let last = self.len - 1;
        for descriptor in self.layout.descriptors() {
            if should_drop(descriptor.id()) {
                // SAFETY: index < len, so the slot is initialised. Components
                // not dropped here were already moved out by the caller.
                unsafe { descriptor.drop_in_place(self.slot_ptr(descriptor, index)) };
            }
        }

        let moved = if index == last {
            None
        } else {
            for descriptor in self.layout.descriptors() {
                // SAFETY: `last` is initialised, `index` was just vacated,
                // and they are distinct slots of the same sub-array.
                unsafe {
                    descriptor.move_to(
                        self.slot_ptr(descriptor, last),
                        self.slot_ptr(descriptor, index),
                    );
                }
            }
            Some(self.entity_id(index))
        };

        self.len = last;
        moved
    }

    /// The id of the entity stored at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn entity_id(&self, index: usize) -> EntityId {
        self.entity_data()[index].id()
    }

    fn set_entity_id(&mut self, index: usize, id: EntityId) {
        let data = self
            .column_mut::<EntityData>()
            .expect("every layout holds EntityData");
        data[index] = EntityData::new(id);
    }

    fn entity_data(&self) -> &[EntityData] {
        self.column::<EntityData>()
            .expect("every layout holds EntityData")
    }

    /// Iterates over the ids of the entities in slot order.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entity_data().iter().map(EntityData::id)
    }

    /// Returns the whole sub-array of `T`, or `None` if the archetype lacks it.
    ///
    /// Resolves the component offset once; indexing the slice afterwards is
    /// plain pointer arithmetic.
    #[must_use]
    pub fn column<T: Component>(&self) -> Option<&[T]> {
        let descriptor = self.descriptor_of::<T>()?;
        let ptr = self.block_column_ptr(descriptor).cast::<T>();
        // SAFETY: the sub-array is aligned for T and slots 0..len are
        // initialised values of T.
        Some(unsafe { std::slice::from_raw_parts(ptr, self.len) })
    }

    /// Mutable variant of [`column`](Self::column).
    pub fn column_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        let descriptor = self.descriptor_of::<T>()?;
        let ptr = self.block_column_ptr(descriptor).cast::<T>();
        // SAFETY: as in `column`, and `&mut self` guarantees exclusivity.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, self.len) })
    }

    /// Borrows two different component sub-arrays mutably at once.
    ///
    /// # Panics
    ///
    /// Panics if `A` and `B` are the same type.
    pub fn columns_mut<A: Component, B: Component>(&mut self) -> Option<(&mut [A], &mut [B])> {
        let a = ComponentId::of::<A>();
        let b = ComponentId::of::<B>();
        assert_ne!(a, b, "columns_mut requires two distinct component types");

        let a = self.block_column_ptr(self.layout.get_component_data(a)?).cast::<A>();
        let b = self.block_column_ptr(self.layout.get_component_data(b)?).cast::<B>();
        // SAFETY: distinct components occupy disjoint sub-arrays.
        unsafe {
            Some((
                std::slice::from_raw_parts_mut(a, self.len),
                std::slice::from_raw_parts_mut(b, self.len),
            ))
        }
    }

    /// Component `T` of the entity at `index`.
    #[must_use]
    pub fn get<T: Component>(&self, index: usize) -> Option<&T> {
        self.column::<T>()?.get(index)
    }

    /// Mutable component `T` of the entity at `index`.
    pub fn get_mut<T: Component>(&mut self, index: usize) -> Option<&mut T> {
        self.column_mut::<T>()?.get_mut(index)
    }

    #[inline]
    fn block_column_ptr(&self, descriptor: &ComponentDescriptor) -> *mut u8 {
        // SAFETY: the offset lies inside the block.
        unsafe { self.block.as_ptr().add(descriptor.offset()) }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        for descriptor in self.layout.descriptors() {
            for index in 0..self.len {
                // SAFETY: slots 0..len are initialised and dropped once.
                unsafe { descriptor.drop_in_place(self.slot_ptr(descriptor, index)) };
            }
        }
        // SAFETY: the block came from this tracker with this layout.
        unsafe {
            self.memory
                .deallocate(self.block, self.block_layout, MemoryTag::Chunk);
        }
    }
}

// SAFETY: Chunk owns its block exclusively and components are Send + Sync.
unsafe impl Send for Chunk {}
// SAFETY: Shared access only hands out shared references to components.
unsafe impl Sync for Chunk {}

/// Every chunk belonging to one archetype, in allocation order.
pub struct ChunkList {
    layout: Arc<ComponentLayout>,
    chunks: Vec<Chunk>,
    alignment: usize,
    memory: Arc<MemoryTracker>,
}

impl ChunkList {
    /// Creates a chunk list with its head chunk allocated.
    pub(crate) fn new(layout: ComponentLayout, alignment: usize, memory: Arc<MemoryTracker>) -> Self {
        let layout = Arc::new(layout);
        let head = Chunk::new(Arc::clone(&layout), alignment, Arc::clone(&memory));
        Self {
            layout,
            chunks: vec![head],
            alignment,
            memory,
        }
    }

    /// Returns the index of the first chunk with a free slot, appending a
    /// new chunk when every existing one is full.
    ///
    /// Existing chunks are never reallocated.
    pub(crate) fn allocate_address(&mut self) -> usize {
        if let Some(index) = self.chunks.iter().position(|chunk| !chunk.is_full()) {
            return index;
        }

        self.chunks.push(Chunk::new(
            Arc::clone(&self.layout),
            self.alignment,
            Arc::clone(&self.memory),
        ));
        tracing::debug!(
            archetype = %self.layout.hash(),
            chunks = self.chunks.len(),
            "appended chunk"
        );
        self.chunks.len() - 1
    }

    /// The archetype of every chunk in this list.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &ComponentLayout {
        &self.layout
    }

    /// Archetype identity hash.
    #[inline]
    #[must_use]
    pub fn hash(&self) -> ArchetypeId {
        self.layout.hash()
    }

    /// Checks if the archetype contains the component with the given id.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.layout.contains(id)
    }

    /// Chunks in chain order.
    #[inline]
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Mutable chunks in chain order.
    #[inline]
    pub(crate) fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    /// Chunk at `index` in the chain.
    #[inline]
    #[must_use]
    pub fn chunk(&self, index: usize) -> &Chunk {
        &self.chunks[index]
    }

    /// Mutable chunk at `index` in the chain.
    #[inline]
    pub(crate) fn chunk_mut(&mut self, index: usize) -> &mut Chunk {
        &mut self.chunks[index]
    }

    /// Number of chunks allocated.
    #[inline]
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total entities across every chunk.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.chunks.iter().map(Chunk::len).sum()
    }
}
