//! Relationships - hierarchy, inheritance and upward traversal.
//!
//! A pair `(Relationship, Target)` is an ordinary id. Relationships marked
//! traversable (`ChildOf`, `IsA`, plus any made so with
//! [`World::make_traversable`]) can be followed upwards by queries, and
//! adding an edge that would close a cycle along them is rejected.
//!
//! ```ignore
//! let parent = world.spawn();
//! let child = world.spawn();
//! world.child_of(child, parent)?;
//! assert_eq!(world.parent(child), Some(parent));
//!
//! let prefab = world.spawn();
//! world.set(prefab, Health(100))?;
//! let orc = world.instantiate(prefab)?;
//! assert_eq!(world.get::<Health>(orc), Some(Health(100)));
//! ```

use hashbrown::HashSet;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use tracing::warn;

use crate::{
    World,
    error::EcsResult,
    id::{CHILD_OF, Entity, EntityId, IS_A, Id, MAX_RELATIONSHIP_INDEX, pair},
    table::{Table, TableId},
};

/// Where an id was found by upward traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct UpMatch {
    /// Concrete id on the ancestor.
    pub id: Id,
    /// Ancestor that has the id.
    pub src: Entity,
    pub table: TableId,
    pub column: Option<usize>,
    pub row: usize,
}

impl World {
    // ==================== Traversable Relationships ====================

    /// Let queries traverse `relationship` with `up`, and reject edges that
    /// would form a cycle along it.
    pub fn make_traversable(&mut self, relationship: Entity) -> bool {
        if relationship.index() > MAX_RELATIONSHIP_INDEX || !self.is_alive(relationship) {
            return false;
        }
        self.traversable.insert(relationship.index());
        true
    }

    #[must_use]
    pub fn is_traversable(&self, relationship: Entity) -> bool {
        self.traversable.contains(&relationship.index())
    }

    // ==================== Hierarchy ====================

    /// Make `child` a child of `parent`, replacing any previous parent.
    pub fn child_of(&mut self, child: Entity, parent: Entity) -> EcsResult<bool> {
        self.add_id(child, pair(CHILD_OF, parent))
    }

    /// Detach `child` from its parent.
    pub fn remove_parent(&mut self, child: Entity) -> EcsResult<bool> {
        self.remove_id(child, pair(CHILD_OF, crate::id::WILDCARD))
    }

    #[must_use]
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.target(entity, CHILD_OF, 0)
    }

    /// Direct children of `parent`.
    #[must_use]
    pub fn children(&self, parent: Entity) -> Vec<Entity> {
        if !self.is_alive(parent) {
            return Vec::new();
        }
        self.id_index()
            .tables_for(pair(CHILD_OF, parent))
            .iter()
            .filter_map(|r| self.table(r.table))
            .flat_map(|t| t.entities().iter().copied())
            .collect()
    }

    /// Number of `relationship` hops from `entity` to a root.
    #[must_use]
    pub fn depth(&self, entity: Entity, relationship: Entity) -> usize {
        self.locate(entity)
            .map_or(0, |(table, _)| self.table_depth(table, relationship))
    }

    // ==================== Targets ====================

    /// Every target of `relationship` on `entity`.
    #[must_use]
    pub fn targets(&self, entity: Entity, relationship: Entity) -> Vec<Entity> {
        self.locate(entity)
            .map(|(table, _)| self.live_targets(table, relationship).collect())
            .unwrap_or_default()
    }

    /// The `index`-th target of `relationship` on `entity`.
    #[must_use]
    pub fn target(&self, entity: Entity, relationship: Entity, index: usize) -> Option<Entity> {
        let (table, _) = self.locate(entity)?;
        self.live_targets(table, relationship).nth(index)
    }

    /// Targets of `relationship` in a table's type, resolved to live entities.
    fn live_targets<'a>(
        &'a self,
        table: &'a Table,
        relationship: Entity,
    ) -> impl Iterator<Item = Entity> + 'a {
        table
            .targets(relationship)
            .filter_map(|t| self.get_alive(t))
    }

    // ==================== Inheritance ====================

    /// Make `instance` inherit the ids of `base`.
    pub fn is_a(&mut self, instance: Entity, base: Entity) -> EcsResult<bool> {
        self.add_id(instance, pair(IS_A, base))
    }

    /// Create a new entity inheriting from `base`.
    pub fn instantiate(&mut self, base: Entity) -> EcsResult<Entity> {
        let instance = self.spawn();
        if let Err(error) = self.is_a(instance, base) {
            self.delete(instance)?;
            return Err(error);
        }
        Ok(instance)
    }

    // ==================== Traversal ====================

    /// Search the ancestors of a table's entities along `relationship`,
    /// breadth-first, for an id matching `id`.
    pub(crate) fn find_up(&self, table: &Table, id: Id, relationship: Entity) -> Option<UpMatch> {
        let max_depth = self.config.max_traversal_depth;
        let mut visited: HashSet<EntityId, FxBuildHasher> = HashSet::default();
        let mut frontier: SmallVec<[Entity; 4]> = self.live_targets(table, relationship).collect();
        let mut depth = 0;

        while !frontier.is_empty() {
            if depth >= max_depth {
                warn!(?id, %relationship, depth, "traversal depth limit reached");
                return None;
            }
            let mut next: SmallVec<[Entity; 4]> = SmallVec::new();
            for ancestor in frontier {
                if !visited.insert(ancestor.index()) {
                    continue;
                }
                let Some((t, row)) = self.locate(ancestor) else {
                    continue;
                };
                if let Some(index) = t.search(id, 0) {
                    return Some(UpMatch {
                        id: t.ids()[index],
                        src: ancestor,
                        table: t.id(),
                        column: t.column_of(index),
                        row,
                    });
                }
                next.extend(self.live_targets(t, relationship));
            }
            frontier = next;
            depth += 1;
        }
        None
    }

    /// Hops from a table's entities to a root along the first target of
    /// `relationship`.
    pub(crate) fn table_depth(&self, table: &Table, relationship: Entity) -> usize {
        let max_depth = self.config.max_traversal_depth;
        let mut depth = 0;
        let mut current = self.live_targets(table, relationship).next();
        while let Some(ancestor) = current {
            depth += 1;
            if depth >= max_depth {
                warn!(%relationship, depth, "traversal depth limit reached");
                break;
            }
            current = self
                .locate(ancestor)
                .and_then(|(t, _)| self.live_targets(t, relationship).next());
        }
        depth
    }

    /// Whether adding `(relationship, target)` to `entity` closes a cycle.
    pub(crate) fn would_cycle(&self, entity: Entity, relationship: Entity, target: Entity) -> bool {
        if target.index() == entity.index() {
            return true;
        }
        let mut visited: HashSet<EntityId, FxBuildHasher> = HashSet::default();
        let mut stack: SmallVec<[Entity; 8]> = SmallVec::new();
        stack.push(target);
        while let Some(current) = stack.pop() {
            if current.index() == entity.index() {
                return true;
            }
            if !visited.insert(current.index()) || visited.len() > self.config.max_traversal_depth * 64 {
                continue;
            }
            if let Some((table, _)) = self.locate(current) {
                stack.extend(self.live_targets(table, relationship));
            }
        }
        false
    }
}
