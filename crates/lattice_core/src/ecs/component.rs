//! # Component Descriptors
//!
//! Components are plain Rust values stored type-erased inside chunks.
//! Chunk code never becomes generic over a component type: everything it
//! needs (size, alignment, how to default-construct, move and drop a value)
//! lives in a [`ComponentDescriptor`] built once per type.

// SAFETY: Descriptors carry raw `unsafe fn` pointers that operate on chunk
// memory. Their contracts are documented on each function.
#![allow(unsafe_code)]

use std::any::{type_name, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Marker trait for ECS components.
///
/// Any `Default + Send + Sync + 'static` type is a component. `Default` is
/// required because adding a component to an entity constructs it in place
/// before the caller fills it in.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// let mut entities = EntityManager::new();
/// let id = entities.create_entity();
/// entities.add_component::<Health>(id)?.unwrap().max = 100.0;
/// ```
pub trait Component: Default + Send + Sync + 'static {}

impl<T: Default + Send + Sync + 'static> Component for T {}

/// Stable (per process) hash identifying a component type.
///
/// Layouts are ordered by this value and archetype hashes are derived from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ComponentId(u64);

impl ComponentId {
    /// Returns the id of component type `T`.
    #[inline]
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        let mut hasher = DefaultHasher::new();
        TypeId::of::<T>().hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Returns the raw hash value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Type-erased description of one component column.
///
/// `offset` is the byte offset of the component's sub-array inside a chunk
/// block. It is zero until the owning layout recalculates offsets.
#[derive(Clone, Copy, Debug)]
pub struct ComponentDescriptor {
    id: ComponentId,
    name: &'static str,
    size: usize,
    align: usize,
    pub(crate) offset: usize,
    drop_fn: unsafe fn(*mut u8),
    move_fn: unsafe fn(*mut u8, *mut u8),
    default_fn: unsafe fn(*mut u8),
}

impl ComponentDescriptor {
    /// Builds the descriptor for component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            id: ComponentId::of::<T>(),
            name: type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            offset: 0,
            drop_fn: drop_value::<T>,
            move_fn: move_value::<T>,
            default_fn: default_value::<T>,
        }
    }

    /// The component's type hash.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// The component's Rust type name, for diagnostics.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Size of one value in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Alignment of one value in bytes.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    /// Byte offset of this component's sub-array inside a chunk block.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Drops the value at `ptr` in place.
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialised value of this descriptor's type.
    /// The value must not be used afterwards.
    #[inline]
    pub(crate) unsafe fn drop_in_place(&self, ptr: *mut u8) {
        (self.drop_fn)(ptr);
    }

    /// Moves the value at `src` into the uninitialised slot at `dst`.
    ///
    /// # Safety
    ///
    /// `src` must hold an initialised value of this type, `dst` must be valid
    /// for writes and must not overlap `src`. After the call `src` is
    /// logically uninitialised and must not be dropped.
    #[inline]
    pub(crate) unsafe fn move_to(&self, src: *mut u8, dst: *mut u8) {
        (self.move_fn)(src, dst);
    }

    /// Writes `T::default()` into the uninitialised slot at `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes and suitably aligned for this type.
    #[inline]
    pub(crate) unsafe fn write_default(&self, dst: *mut u8) {
        (self.default_fn)(dst);
    }
}

unsafe fn drop_value<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr.cast::<T>());
}

unsafe fn move_value<T>(src: *mut u8, dst: *mut u8) {
    std::ptr::copy_nonoverlapping(src.cast::<T>(), dst.cast::<T>(), 1);
}

unsafe fn default_value<T: Default>(dst: *mut u8) {
    std::ptr::write(dst.cast::<T>(), T::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Position {
        _x: f32,
        _y: f32,
        _z: f32,
    }

    #[derive(Default)]
    struct Name(String);

    #[test]
    fn test_component_id_is_stable_per_type() {
        assert_eq!(ComponentId::of::<Position>(), ComponentId::of::<Position>());
        assert_ne!(ComponentId::of::<Position>(), ComponentId::of::<Name>());
    }

    #[test]
    fn test_descriptor_records_type_shape() {
        let desc = ComponentDescriptor::of::<Position>();
        assert_eq!(desc.size(), 12);
        assert_eq!(desc.align(), 4);
        assert_eq!(desc.offset(), 0);
        assert!(desc.name().ends_with("Position"));
    }

    #[test]
    fn test_descriptor_moves_and_drops_owned_values() {
        let desc = ComponentDescriptor::of::<Name>();
        let mut src = std::mem::MaybeUninit::<Name>::new(Name("ship".to_string()));
        let mut dst = std::mem::MaybeUninit::<Name>::uninit();

        unsafe {
            desc.move_to(src.as_mut_ptr().cast(), dst.as_mut_ptr().cast());
            assert_eq!(dst.assume_init_ref().0, "ship");
            desc.drop_in_place(dst.as_mut_ptr().cast());
        }
    }
}
