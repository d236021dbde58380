//! # Transform Hierarchy
//!
//! Parent/child relationships between entities, stored as two marker
//! components plus an adjacency index:
//!
//! - [`RootTransform`]: the entity has no parent and at least one child.
//! - [`ChildTransform`]: the entity has a parent.
//! - [`TransformGraph`]: a static component mapping each parent to the
//!   ordered set of its children, so children are enumerated without
//!   scanning chunks.
//!
//! An entity carries at most one of the two markers. Entities outside any
//! hierarchy carry neither.
//!
//! ## Destruction
//!
//! [`TransformGraph::install`] registers a destroy callback. Destroying an
//! entity detaches it from its parent and detaches each of its children;
//! the children survive, and those that have children of their own become
//! roots. Use [`TransformGraph::destroy_recursive`] to destroy a whole
//! subtree.

use std::any::type_name;
use std::collections::{BTreeSet, HashMap};

use super::entity::EntityId;
use super::manager::EntityManager;
use crate::error::{EcsError, EcsResult};

/// Marker for a parentless entity that has children.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RootTransform;

/// Marker for an entity attached to a parent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChildTransform {
    parent: EntityId,
}

impl ChildTransform {
    /// The parent entity. [`EntityId::NULL`] until attached.
    #[inline]
    #[must_use]
    pub const fn parent(&self) -> EntityId {
        self.parent
    }
}

/// Adjacency index `parent -> children`, stored as a static component.
///
/// Read it through
/// [`EntityManager::static_component`](super::EntityManager::static_component);
/// mutate the hierarchy only through the associated functions, which keep
/// the markers and the index in sync.
#[derive(Debug, Default)]
pub struct TransformGraph {
    children: HashMap<EntityId, BTreeSet<EntityId>>,
}

impl TransformGraph {
    /// Registers the graph and its destroy hook on `entities`.
    ///
    /// Calling it again is a no-op.
    pub fn install(entities: &mut EntityManager) {
        if entities.static_component::<Self>().is_some() {
            return;
        }
        entities.add_static_component(Self::default());
        entities.register_destroy_callback(Self::on_destroy);
        tracing::debug!("transform graph installed");
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Direct children of `parent`, in id order.
    pub fn children(&self, parent: EntityId) -> impl DoubleEndedIterator<Item = EntityId> + '_ {
        self.children.get(&parent).into_iter().flatten().copied()
    }

    /// Number of direct children of `parent`.
    #[must_use]
    pub fn child_count(&self, parent: EntityId) -> usize {
        self.children.get(&parent).map_or(0, BTreeSet::len)
    }

    /// Every descendant of `root`, children before their parents.
    ///
    /// `root` itself is not included.
    #[must_use]
    pub fn descendants(&self, root: EntityId) -> Vec<EntityId> {
        let mut order = Vec::new();
        let mut stack = vec![(root, false)];

        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                if node != root {
                    order.push(node);
                }
                continue;
            }
            stack.push((node, true));
            for child in self.children(node).rev() {
                stack.push((child, false));
            }
        }
        order
    }

    /// The parent of `child`, read from its [`ChildTransform`].
    ///
    /// A default-constructed `ChildTransform` points at [`EntityId::NULL`]
    /// and counts as no parent.
    #[must_use]
    pub fn parent_of(entities: &EntityManager, child: EntityId) -> Option<EntityId> {
        entities
            .get_component::<ChildTransform>(child)
            .map(ChildTransform::parent)
            .filter(|parent| !parent.is_null())
    }

    // ========================================================================
    // STRUCTURE
    // ========================================================================

    /// Attaches `child` to `parent`, detaching it from any previous parent.
    ///
    /// # Errors
    ///
    /// - [`EcsError::StaticMissing`] if the graph is not installed
    /// - [`EcsError::EntityNotFound`] if either entity is dead
    /// - [`EcsError::HierarchyCycle`] if `child` is `parent` or one of its
    ///   ancestors
    pub fn add_child(entities: &mut EntityManager, parent: EntityId, child: EntityId) -> EcsResult<()> {
        Self::graph_mut(entities)?;
        entities.address_of(parent)?;
        entities.address_of(child)?;

        if parent == child || Self::is_ancestor(entities, child, parent) {
            return Err(EcsError::HierarchyCycle { parent, child });
        }

        if let Some(previous) = Self::parent_of(entities, child) {
            if previous == parent {
                return Ok(());
            }
            Self::remove_child(entities, previous, child)?;
        }

        if Self::parent_of(entities, parent).is_none() {
            if entities.has_component::<ChildTransform>(parent) {
                entities.remove_component::<ChildTransform>(parent)?;
            }
            entities.add_component::<RootTransform>(parent)?;
        }
        if entities.has_component::<RootTransform>(child) {
            entities.remove_component::<RootTransform>(child)?;
        }
        entities.insert_component(child, ChildTransform { parent })?;

        Self::graph_mut(entities)?
            .children
            .entry(parent)
            .or_default()
            .insert(child);
        Ok(())
    }

    /// Detaches `child` from `parent`.
    ///
    /// `parent` loses [`RootTransform`] once it has no children left. The
    /// detached child becomes a root if it has children of its own.
    ///
    /// # Errors
    ///
    /// - [`EcsError::StaticMissing`] if the graph is not installed
    /// - [`EcsError::NotAChild`] if `child` is not attached to `parent`
    pub fn remove_child(entities: &mut EntityManager, parent: EntityId, child: EntityId) -> EcsResult<()> {
        let graph = Self::graph_mut(entities)?;
        let Some(siblings) = graph.children.get_mut(&parent) else {
            return Err(EcsError::NotAChild { parent, child });
        };
        if !siblings.remove(&child) {
            return Err(EcsError::NotAChild { parent, child });
        }
        let remaining = siblings.len();
        if remaining == 0 {
            graph.children.remove(&parent);
        }
        let grandchildren = graph.child_count(child);

        if remaining == 0 && entities.has_component::<RootTransform>(parent) {
            entities.remove_component::<RootTransform>(parent)?;
        }
        if entities.has_component::<ChildTransform>(child) {
            entities.remove_component::<ChildTransform>(child)?;
        }
        if grandchildren > 0 {
            entities.add_component::<RootTransform>(child)?;
        }
        Ok(())
    }

    /// Destroys `root` and all of its descendants, deepest first.
    ///
    /// # Errors
    ///
    /// - [`EcsError::StaticMissing`] if the graph is not installed
    /// - [`EcsError::EntityNotFound`] if `root` is dead
    pub fn destroy_recursive(entities: &mut EntityManager, root: EntityId) -> EcsResult<()> {
        entities.address_of(root)?;
        let doomed = Self::graph_mut(entities)?.descendants(root);
        for id in doomed {
            entities.destroy_entity(id)?;
        }
        entities.destroy_entity(root)
    }

    fn graph_mut(entities: &mut EntityManager) -> EcsResult<&mut Self> {
        entities
            .static_component_mut::<Self>()
            .ok_or(EcsError::StaticMissing(type_name::<Self>()))
    }

    /// Checks if `ancestor` appears on the parent chain of `id`.
    fn is_ancestor(entities: &EntityManager, ancestor: EntityId, id: EntityId) -> bool {
        let mut current = id;
        while let Some(parent) = Self::parent_of(entities, current) {
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    fn on_destroy(entities: &mut EntityManager, id: EntityId) {
        let Some(graph) = entities.static_component::<Self>() else {
            return;
        };
        let children: Vec<_> = graph.children(id).collect();

        if let Some(parent) = Self::parent_of(entities, id) {
            if let Err(error) = Self::remove_child(entities, parent, id) {
                tracing::warn!(%id, %parent, %error, "failed to detach destroyed entity");
            }
        }
        for child in children {
            if let Err(error) = Self::remove_child(entities, id, child) {
                tracing::warn!(%id, %child, %error, "failed to detach child of destroyed entity");
            }
        }
    }
}
