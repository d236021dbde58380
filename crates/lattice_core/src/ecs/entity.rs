//! # Entity Identity
//!
//! Entities are opaque 64-bit ids handed out in increasing order and never
//! reused. Where an entity's data lives is tracked separately by the
//! [`EntityManager`](super::EntityManager) through an [`EntityAddress`].

use std::fmt;

/// Unique identifier for an entity.
///
/// Ids are allocated from a monotonically increasing counter. They carry no
/// embedded index or generation: the id is only a key into the manager's
/// address map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Wraps a raw id value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("entity(null)")
        } else {
            write!(f, "entity({})", self.0)
        }
    }
}

/// Reserved component present on every live entity.
///
/// Stores the owning entity's id so a chunk can report which entity moved
/// when a slot is back-filled during swap-remove. The id is only written by
/// the storage layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityData {
    id: EntityId,
}

impl EntityData {
    pub(crate) const fn new(id: EntityId) -> Self {
        Self { id }
    }

    /// The id of the entity owning this slot.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }
}

/// Location of an entity's component data.
///
/// Addresses are owned by the entity manager and rewritten whenever the
/// entity migrates to another archetype or is moved by a swap-remove. Do not
/// hold on to one across a structural change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityAddress {
    /// Index of the archetype's chunk list in the manager's registry.
    pub archetype: usize,
    /// Index of the chunk within the chunk list.
    pub chunk: usize,
    /// Slot within the chunk.
    pub index: usize,
}
