//! # Component Layouts
//!
//! A [`ComponentLayout`] is an archetype: the ordered set of component
//! descriptors an entity holds, together with the way those components are
//! laid out inside one fixed-size chunk.
//!
//! ```text
//! chunk block (chunk_size bytes)
//! | EntityData x N | Position x N | Velocity x N | padding |
//!   ^ offset 0       ^ aligned      ^ aligned
//! ```
//!
//! Descriptors are kept sorted by [`ComponentId`], so two layouts with the
//! same member set always produce the same offsets and the same
//! [`ArchetypeId`].

use std::fmt;

use super::component::{Component, ComponentDescriptor, ComponentId};
use super::entity::EntityData;

/// Hard limit on the number of component types in one archetype.
pub const MAX_COMPONENTS_PER_ARCHETYPE: usize = 32;

/// Identity of an archetype: a rolling hash of its sorted component ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ArchetypeId(u64);

impl ArchetypeId {
    /// Returns the raw hash value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Ordered component set plus its chunk memory layout.
#[derive(Clone, Debug)]
pub struct ComponentLayout {
    /// Sorted by id, unique.
    descriptors: Vec<ComponentDescriptor>,
    hash: ArchetypeId,
    chunk_size: usize,
    max_entity_count: usize,
    max_align: usize,
}

impl ComponentLayout {
    /// Creates the base layout holding only [`EntityData`].
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` cannot hold a single entity.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        let mut layout = Self {
            descriptors: Vec::with_capacity(4),
            hash: ArchetypeId(0),
            chunk_size,
            max_entity_count: 0,
            max_align: 1,
        };
        layout.add_descriptor(ComponentDescriptor::of::<EntityData>());
        layout
    }

    /// Adds component `T`. Returns `false` if it was already present.
    ///
    /// # Panics
    ///
    /// Panics if the layout would exceed [`MAX_COMPONENTS_PER_ARCHETYPE`] or
    /// if one entity's worth of components no longer fits in a chunk.
    pub fn add_component<T: Component>(&mut self) -> bool {
        self.add_descriptor(ComponentDescriptor::of::<T>())
    }

    /// Adds a type-erased descriptor. Returns `false` if it was already present.
    ///
    /// # Panics
    ///
    /// Same conditions as [`add_component`](Self::add_component).
    pub fn add_descriptor(&mut self, descriptor: ComponentDescriptor) -> bool {
        let Err(slot) = self.search(descriptor.id()) else {
            return false;
        };

        assert!(
            self.descriptors.len() < MAX_COMPONENTS_PER_ARCHETYPE,
            "archetype exceeds {MAX_COMPONENTS_PER_ARCHETYPE} components while adding {}",
            descriptor.name()
        );

        self.descriptors.insert(slot, descriptor);
        self.recalculate_offsets();
        true
    }

    /// Removes the component with the given id. Returns `false` if absent.
    pub fn remove_component(&mut self, id: ComponentId) -> bool {
        match self.search(id) {
            Ok(slot) => {
                self.descriptors.remove(slot);
                self.recalculate_offsets();
                true
            }
            Err(_) => false,
        }
    }

    /// Looks up a component's descriptor by binary search.
    #[inline]
    #[must_use]
    pub fn get_component_data(&self, id: ComponentId) -> Option<&ComponentDescriptor> {
        self.search(id).ok().map(|slot| &self.descriptors[slot])
    }

    /// Checks if the layout contains the component with the given id.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.search(id).is_ok()
    }

    /// Checks if the layout contains component `T`.
    #[inline]
    #[must_use]
    pub fn has<T: Component>(&self) -> bool {
        self.contains(ComponentId::of::<T>())
    }

    /// Returns a copy of this layout extended with `T`.
    #[must_use]
    pub fn with_component<T: Component>(&self) -> Self {
        let mut layout = self.clone();
        layout.add_component::<T>();
        layout
    }

    /// Returns a copy of this layout without the component `id`.
    #[must_use]
    pub fn without_component(&self, id: ComponentId) -> Self {
        let mut layout = self.clone();
        layout.remove_component(id);
        layout
    }

    /// Archetype identity hash.
    #[inline]
    #[must_use]
    pub const fn hash(&self) -> ArchetypeId {
        self.hash
    }

    /// All descriptors, sorted by id.
    #[inline]
    #[must_use]
    pub fn descriptors(&self) -> &[ComponentDescriptor] {
        &self.descriptors
    }

    /// Iterates over the component ids in order.
    pub fn component_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.descriptors.iter().map(ComponentDescriptor::id)
    }

    /// Number of component types, including [`EntityData`].
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Always `false` for layouts built by [`ComponentLayout::new`].
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Size of a chunk block in bytes.
    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of entities that fit in one chunk.
    #[inline]
    #[must_use]
    pub const fn max_entity_count(&self) -> usize {
        self.max_entity_count
    }

    /// Largest alignment required by any component.
    #[inline]
    #[must_use]
    pub const fn max_align(&self) -> usize {
        self.max_align
    }

    /// Bytes one entity occupies across all sub-arrays, without padding.
    #[must_use]
    pub fn entity_size(&self) -> usize {
        self.descriptors.iter().map(ComponentDescriptor::size).sum()
    }

    /// Recomputes `max_entity_count`, the sub-array offsets and the hash.
    ///
    /// The entity count starts at `chunk_size / entity_size` and shrinks
    /// until the aligned sub-arrays fit inside the block.
    fn recalculate_offsets(&mut self) {
        self.hash = rolling_hash(&self.descriptors);
        self.max_align = self
            .descriptors
            .iter()
            .map(ComponentDescriptor::align)
            .max()
            .unwrap_or(1);

        let entity_size = self.entity_size();
        let mut count = if entity_size == 0 {
            0
        } else {
            self.chunk_size / entity_size
        };
        while count > 0 && self.place_sub_arrays(count) > self.chunk_size {
            count -= 1;
        }

        assert!(
            count > 0,
            "component set of {entity_size} bytes per entity does not fit in a {} byte chunk",
            self.chunk_size
        );

        self.place_sub_arrays(count);
        self.max_entity_count = count;
    }

    /// Assigns offsets for `count` entities and returns the end offset.
    fn place_sub_arrays(&mut self, count: usize) -> usize {
        let mut offset = 0;
        for descriptor in &mut self.descriptors {
            offset = align_up(offset, descriptor.align());
            descriptor.offset = offset;
            offset += descriptor.size() * count;
        }
        offset
    }

    #[inline]
    fn search(&self, id: ComponentId) -> Result<usize, usize> {
        self.descriptors.binary_search_by_key(&id, ComponentDescriptor::id)
    }
}

#[inline]
const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

fn rolling_hash(descriptors: &[ComponentDescriptor]) -> ArchetypeId {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = descriptors.iter().fold(FNV_OFFSET, |hash, descriptor| {
        (hash ^ descriptor.id().raw()).wrapping_mul(FNV_PRIME)
    });
    ArchetypeId(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 16 * 1024;

    #[allow(dead_code)]
    #[derive(Default)]
    struct Position([f32; 3]);

    #[allow(dead_code)]
    #[derive(Default)]
    struct Velocity([f32; 3]);

    #[allow(dead_code)]
    #[derive(Default)]
    struct Mass(f64);

    #[derive(Default)]
    struct Frozen;

    #[test]
    fn test_base_layout_holds_entity_data() {
        let layout = ComponentLayout::new(CHUNK);
        assert_eq!(layout.len(), 1);
        assert!(layout.has::<EntityData>());
        assert_eq!(
            layout.max_entity_count(),
            CHUNK / std::mem::size_of::<EntityData>()
        );
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut layout = ComponentLayout::new(CHUNK);
        assert!(layout.add_component::<Position>());
        let hash = layout.hash();
        assert!(!layout.add_component::<Position>());
        assert_eq!(layout.hash(), hash);
        assert_eq!(layout.len(), 2);
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let mut a = ComponentLayout::new(CHUNK);
        a.add_component::<Position>();
        a.add_component::<Velocity>();
        a.add_component::<Mass>();

        let mut b = ComponentLayout::new(CHUNK);
        b.add_component::<Mass>();
        b.add_component::<Position>();
        b.add_component::<Velocity>();

        assert_eq!(a.hash(), b.hash());
        for (x, y) in a.descriptors().iter().zip(b.descriptors()) {
            assert_eq!(x.id(), y.id());
            assert_eq!(x.offset(), y.offset());
        }
    }

    #[test]
    fn test_remove_restores_previous_hash() {
        let base = ComponentLayout::new(CHUNK);
        let mut layout = base.with_component::<Velocity>();
        assert_ne!(layout.hash(), base.hash());

        assert!(layout.remove_component(ComponentId::of::<Velocity>()));
        assert_eq!(layout.hash(), base.hash());
        assert!(layout.get_component_data(ComponentId::of::<Velocity>()).is_none());
        assert!(!layout.remove_component(ComponentId::of::<Velocity>()));
    }

    #[test]
    fn test_sub_arrays_fit_and_do_not_overlap() {
        let mut layout = ComponentLayout::new(1000);
        layout.add_component::<Position>();
        layout.add_component::<Mass>();
        layout.add_component::<Frozen>();

        let count = layout.max_entity_count();
        assert!(count > 0);

        let mut spans: Vec<(usize, usize)> = layout
            .descriptors()
            .iter()
            .map(|d| {
                assert_eq!(d.offset() % d.align(), 0);
                (d.offset(), d.offset() + d.size() * count)
            })
            .collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0);
        }
        assert!(spans.last().unwrap().1 <= 1000);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn test_oversized_component_is_fatal() {
        #[allow(dead_code)]
        struct Huge([u64; 512]);

        impl Default for Huge {
            fn default() -> Self {
                Self([0; 512])
            }
        }

        let mut layout = ComponentLayout::new(1024);
        layout.add_component::<Huge>();
    }
}
