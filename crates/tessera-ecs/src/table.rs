//! Tables - storage for entities with identical types.
//!
//! A table holds every entity whose sorted id set ("type") is exactly the
//! table's type. Ids that carry data get a column; tags, flagged ids and
//! data-less pairs only live in the type. Tables cache add/remove edges to
//! neighbouring tables so repeated migrations skip the type lookup.

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

use bitflags::bitflags;
use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use tracing::trace;

use crate::{
    component::{TypeFlags, TypeRegistry},
    error::{EcsResult, HookKind},
    id::{CHILD_OF, Entity, IS_A, Id, IdFlags},
    storage::{Bitset, Column},
};

/// Sorted, deduplicated id set of a table.
pub type TableType = SmallVec<[Id; 8]>;

/// Unique identifier for a table. Never reused within a world.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(u32);

impl TableId {
    /// The root table (empty type).
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

bitflags! {
    /// Summary of a table's type.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct TableFlags: u32 {
        const HAS_PAIRS = 1 << 0;
        const HAS_CHILD_OF = 1 << 1;
        const HAS_IS_A = 1 << 2;
        const HAS_TOGGLE = 1 << 3;
        const HAS_DTORS = 1 << 4;
        const HAS_OVERRIDES = 1 << 5;
    }
}

/// Cached neighbours of a table for one id.
#[derive(Clone, Copy, Debug, Default)]
pub struct TableEdge {
    /// Table reached by adding the id.
    pub add: Option<TableId>,
    /// Table reached by removing the id.
    pub remove: Option<TableId>,
}

/// A table storing entities with the same type.
pub struct Table {
    id: TableId,
    /// Sorted ids of the table's type.
    ids: TableType,
    /// Data columns, in type order.
    columns: Vec<Column>,
    /// For each type index, the column holding its data.
    column_map: SmallVec<[Option<usize>; 8]>,
    /// For each column, its type index.
    column_types: SmallVec<[usize; 8]>,
    /// Enabled bits, keyed by the toggled id without its flag.
    toggles: SmallVec<[(Id, Bitset); 1]>,
    entities: Vec<Entity>,
    edges: HashMap<Id, TableEdge, FxBuildHasher>,
    flags: TableFlags,
    /// Number of active iterators reading the table.
    lock: AtomicU32,
}

impl Table {
    /// Create a table for a sorted, deduplicated type.
    #[must_use]
    pub fn new(id: TableId, ids: TableType, registry: &TypeRegistry) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "table type must be sorted");

        let mut columns = Vec::new();
        let mut column_map = SmallVec::with_capacity(ids.len());
        let mut column_types = SmallVec::new();
        let mut toggles = SmallVec::new();
        let mut flags = TableFlags::empty();

        for (index, &type_id) in ids.iter().enumerate() {
            if type_id.is_pair() {
                flags |= TableFlags::HAS_PAIRS;
                if type_id.first().index() == CHILD_OF.index() {
                    flags |= TableFlags::HAS_CHILD_OF;
                }
                if type_id.first().index() == IS_A.index() {
                    flags |= TableFlags::HAS_IS_A;
                }
            }
            if type_id.has_flags(IdFlags::TOGGLE) {
                flags |= TableFlags::HAS_TOGGLE;
                toggles.push((type_id.strip_flags(), Bitset::new()));
            }
            if type_id.has_flags(IdFlags::AUTO_OVERRIDE) {
                flags |= TableFlags::HAS_OVERRIDES;
            }

            if let Some(info) = registry.for_id(type_id) {
                if info.flags().contains(TypeFlags::HAS_DTOR) {
                    flags |= TableFlags::HAS_DTORS;
                }
                column_map.push(Some(columns.len()));
                column_types.push(index);
                columns.push(Column::new(info.clone()));
            } else {
                column_map.push(None);
            }
        }

        Self {
            id,
            ids,
            columns,
            column_map,
            column_types,
            toggles,
            entities: Vec::new(),
            edges: HashMap::default(),
            flags,
            lock: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub const fn id(&self) -> TableId {
        self.id
    }

    /// The table's sorted type.
    #[must_use]
    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    #[must_use]
    pub const fn flags(&self) -> TableFlags {
        self.flags
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Position of `id` in the type.
    #[must_use]
    pub fn type_index(&self, id: Id) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    #[must_use]
    pub fn has(&self, id: Id) -> bool {
        self.type_index(id).is_some()
    }

    /// First type index at or after `start` whose id matches `pattern`.
    #[must_use]
    pub fn search(&self, pattern: Id, start: usize) -> Option<usize> {
        if !pattern.is_wildcard() {
            return self.type_index(pattern).filter(|&i| i >= start);
        }
        self.ids
            .iter()
            .skip(start)
            .position(|id| id.matches(pattern))
            .map(|offset| start + offset)
    }

    /// Targets of every `(relationship, *)` pair in the type, at generation 0.
    pub fn targets(&self, relationship: Entity) -> impl Iterator<Item = Entity> + '_ {
        self.ids
            .iter()
            .filter(move |id| {
                id.is_pair()
                    && id.flags() == IdFlags::PAIR
                    && id.first().index() == relationship.index()
            })
            .map(|id| id.second())
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    #[must_use]
    pub fn column_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }

    /// Column holding the data of `id`.
    #[must_use]
    pub fn column_index(&self, id: Id) -> Option<usize> {
        self.type_index(id).and_then(|i| self.column_map[i])
    }

    /// Column holding the data of the id at `type_index`.
    #[must_use]
    pub fn column_of(&self, type_index: usize) -> Option<usize> {
        self.column_map.get(type_index).copied().flatten()
    }

    /// Id stored in column `index`.
    #[must_use]
    pub fn column_id(&self, index: usize) -> Id {
        self.ids[self.column_types[index]]
    }

    /// Raw pointer to the value of `id` at `row`.
    #[must_use]
    pub fn get_ptr(&self, id: Id, row: usize) -> Option<*mut u8> {
        let column = self.column_index(id)?;
        self.columns[column].get_raw(row)
    }

    /// Whether `id` is enabled for `row`. Ids without a toggle are enabled.
    #[must_use]
    pub fn is_enabled(&self, row: usize, id: Id) -> bool {
        self.toggle(id).is_none_or(|bits| bits.get(row))
    }

    /// Enabled bits of a toggled id.
    #[must_use]
    pub fn toggle(&self, id: Id) -> Option<&Bitset> {
        self.toggles
            .iter()
            .find(|(toggled, _)| *toggled == id)
            .map(|(_, bits)| bits)
    }

    /// Set the enabled bit of `id` at `row`. Returns false if the table has no
    /// toggle for `id`.
    pub fn set_enabled(&mut self, row: usize, id: Id, enabled: bool) -> bool {
        match self.toggles.iter_mut().find(|(toggled, _)| *toggled == id) {
            Some((_, bits)) => {
                bits.set(row, enabled);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_toggles(&self) -> bool {
        !self.toggles.is_empty()
    }

    /// Copy the enabled bits of row `from` to row `to`.
    pub(crate) fn copy_toggles(&mut self, from: usize, to: usize) {
        for (_, bits) in &mut self.toggles {
            let enabled = bits.get(from);
            bits.set(to, enabled);
        }
    }

    /// Take a read lock for an iterator.
    pub fn lock(&self) {
        self.lock.fetch_add(1, Ordering::AcqRel);
    }

    /// Release a read lock taken with [`Table::lock`].
    pub fn unlock(&self) {
        let previous = self.lock.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "unlocked a table that was not locked");
    }

    /// Whether an iterator is currently reading the table.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Acquire) > 0
    }

    /// Append a row with uninitialized column slots.
    ///
    /// # Safety
    ///
    /// Every column slot of the new row must be initialized before the table
    /// is read, has rows removed, or is dropped.
    pub unsafe fn append_uninit(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        for column in &mut self.columns {
            column.push_uninit();
        }
        for (_, bits) in &mut self.toggles {
            bits.push(true);
        }
        row
    }

    /// Append a row with default-constructed values.
    ///
    /// Fails without touching the table if a column type has no constructor.
    pub fn append(&mut self, entity: Entity) -> EcsResult<usize> {
        for column in &self.columns {
            column.info().require(HookKind::Construct)?;
        }
        // SAFETY: every slot is constructed right after
        let row = unsafe { self.append_uninit(entity) };
        for column in &mut self.columns {
            // SAFETY: the slot at row was just pushed
            unsafe {
                let ptr = column.get_unchecked_raw(row);
                column.info().construct(ptr, 1);
            }
        }
        Ok(row)
    }

    /// Destroy the values at `row` and swap-remove it.
    ///
    /// Returns the entity that was moved into `row`, if any.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn delete_row(&mut self, row: usize) -> Option<Entity> {
        assert!(row < self.entities.len(), "row out of bounds");
        for column in &mut self.columns {
            // SAFETY: row is in bounds and initialized
            unsafe { column.swap_remove_drop(row) };
        }
        self.remove_entity(row)
    }

    /// Swap-remove `row` after its values were moved out or destroyed.
    ///
    /// # Safety
    ///
    /// Every column value at `row` must already be moved out or destroyed.
    pub unsafe fn remove_row_uninit(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            // SAFETY: guaranteed by caller
            unsafe { column.swap_remove_uninit(row) };
        }
        self.remove_entity(row)
    }

    fn remove_entity(&mut self, row: usize) -> Option<Entity> {
        for (_, bits) in &mut self.toggles {
            bits.swap_remove(row);
        }
        let last = self.entities.len() - 1;
        self.entities.swap_remove(row);
        (row < last).then(|| self.entities[row])
    }

    /// Destroy every row.
    pub fn clear(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
        for (_, bits) in &mut self.toggles {
            *bits = Bitset::new();
        }
        self.entities.clear();
    }

    /// Reserve capacity in all columns.
    pub fn reserve(&mut self, additional: usize) {
        self.entities.reserve(additional);
        for column in &mut self.columns {
            column.reserve(additional);
        }
    }

    #[must_use]
    pub fn edge(&self, id: Id) -> Option<&TableEdge> {
        self.edges.get(&id)
    }

    fn set_add_edge(&mut self, id: Id, to: TableId) {
        self.edges.entry(id).or_default().add = Some(to);
    }

    fn set_remove_edge(&mut self, id: Id, to: TableId) {
        self.edges.entry(id).or_default().remove = Some(to);
    }

    fn forget_edges_to(&mut self, table: TableId) {
        for edge in self.edges.values_mut() {
            if edge.add == Some(table) {
                edge.add = None;
            }
            if edge.remove == Some(table) {
                edge.remove = None;
            }
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("ids", &self.ids)
            .field("entity_count", &self.entities.len())
            .finish()
    }
}

/// Value placed into a column during a migration instead of constructing it.
#[derive(Clone, Copy, Debug)]
pub struct Emplace {
    pub id: Id,
    /// Initialized value, moved out by the migration.
    pub src: *mut u8,
}

/// Move the row of `entity` from `src` to the end of `dst`.
///
/// Shared columns are moved, columns only in `dst` are constructed (or
/// filled from `emplace`), columns only in `src` are destroyed. Returns the
/// new row and the entity that was swapped into the old row.
///
/// # Safety
///
/// - `src_row` must be in bounds of `src`.
/// - Every column only in `dst` other than the emplaced one must have a
///   constructor.
/// - `emplace.src` must point to an initialized value of the emplaced id's
///   type, which is moved from.
pub unsafe fn migrate_row(
    src: &mut Table,
    src_row: usize,
    dst: &mut Table,
    emplace: Option<Emplace>,
) -> (usize, Option<Entity>) {
    let entity = src.entities[src_row];
    let dst_row = dst.entities.len();
    dst.entities.push(entity);

    for (column_index, column) in dst.columns.iter_mut().enumerate() {
        let id = dst.ids[dst.column_types[column_index]];
        let slot = column.push_uninit();
        // SAFETY: slots are fresh; source values are initialized and moved once
        unsafe {
            match emplace {
                Some(value) if value.id == id => column.info().move_construct(slot, value.src, 1),
                _ => match src.column_index(id) {
                    Some(src_column) => {
                        let from = src.columns[src_column].get_unchecked_raw(src_row);
                        column.info().move_construct(slot, from, 1);
                    }
                    None => column.info().construct(slot, 1),
                },
            }
        }
    }

    for (column_index, column) in src.columns.iter_mut().enumerate() {
        let id = src.ids[src.column_types[column_index]];
        if dst.column_index(id).is_none() {
            // SAFETY: the value was not moved, so it is still initialized
            unsafe { column.info().destruct(column.get_unchecked_raw(src_row), 1) };
        }
    }

    for (toggled, bits) in &mut dst.toggles {
        bits.push(src.toggle(*toggled).is_none_or(|src_bits| src_bits.get(src_row)));
    }

    trace!(?entity, from = ?src.id, to = ?dst.id, "migrated row");
    // SAFETY: every value at src_row was moved or destroyed above
    let moved = unsafe { src.remove_row_uninit(src_row) };
    (dst_row, moved)
}

/// Storage for all tables in a world.
pub struct TableStore {
    /// Slots are never reused, so a `TableId` stays unique.
    tables: Vec<Option<Table>>,
    by_type: HashMap<TableType, TableId, FxBuildHasher>,
}

impl Default for TableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TableStore {
    /// Create table storage with the root table.
    #[must_use]
    pub fn new() -> Self {
        let mut by_type = HashMap::default();
        by_type.insert(TableType::new(), TableId::ROOT);
        Self {
            tables: vec![Some(Table::new(
                TableId::ROOT,
                TableType::new(),
                &TypeRegistry::new(),
            ))],
            by_type,
        }
    }

    /// Find the table for a type, if it exists.
    #[must_use]
    pub fn find(&self, ids: &[Id]) -> Option<TableId> {
        self.by_type.get(ids).copied()
    }

    /// Find or create the table for a sorted, deduplicated type.
    ///
    /// Returns the table and whether it was created.
    pub fn find_or_create(&mut self, ids: TableType, registry: &TypeRegistry) -> (TableId, bool) {
        if let Some(&id) = self.by_type.get(&ids) {
            return (id, false);
        }
        let id = TableId::from_raw(self.tables.len() as u32);
        self.by_type.insert(ids.clone(), id);
        self.tables.push(Some(Table::new(id, ids, registry)));
        (id, true)
    }

    /// Table reached from `from` by adding `add` and removing `remove`.
    ///
    /// Single-id changes go through the edge cache. Returns the table and
    /// whether it was created.
    ///
    /// # Panics
    ///
    /// Panics if `from` does not exist.
    pub fn traverse(
        &mut self,
        from: TableId,
        add: &[Id],
        remove: &[Id],
        registry: &TypeRegistry,
    ) -> (TableId, bool) {
        let cached = match (add, remove) {
            ([id], []) => self.get(from).and_then(|t| t.edge(*id)).and_then(|e| e.add),
            ([], [id]) => self.get(from).and_then(|t| t.edge(*id)).and_then(|e| e.remove),
            _ => None,
        };
        if let Some(to) = cached {
            return (to, false);
        }

        let Some(base) = self.get(from) else {
            panic!("traverse from missing table {from:?}");
        };
        let mut ids: TableType = base
            .ids()
            .iter()
            .copied()
            .filter(|id| !remove.contains(id))
            .collect();
        for &id in add {
            if let Err(pos) = ids.binary_search(&id) {
                ids.insert(pos, id);
            }
        }
        let (to, created) = self.find_or_create(ids, registry);

        match (add, remove) {
            ([id], []) if to != from => self.link(from, *id, to),
            ([], [id]) if to != from => self.link(to, *id, from),
            _ => {}
        }
        (to, created)
    }

    /// Record that adding `id` to `from` leads to `to`, and back.
    fn link(&mut self, from: TableId, id: Id, to: TableId) {
        if let Some(table) = self.get_mut(from) {
            table.set_add_edge(id, to);
        }
        if let Some(table) = self.get_mut(to) {
            table.set_remove_edge(id, from);
        }
    }

    #[must_use]
    pub fn get(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id.0 as usize).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Borrow two distinct tables mutably.
    ///
    /// # Panics
    ///
    /// Panics if `a == b` or either table does not exist.
    pub fn pair_mut(&mut self, a: TableId, b: TableId) -> (&mut Table, &mut Table) {
        assert_ne!(a, b, "pair_mut needs two distinct tables");
        let (ai, bi) = (a.0 as usize, b.0 as usize);
        let (left, right, swapped) = if ai < bi {
            let (lo, hi) = self.tables.split_at_mut(bi);
            (&mut lo[ai], &mut hi[0], false)
        } else {
            let (lo, hi) = self.tables.split_at_mut(ai);
            (&mut lo[bi], &mut hi[0], true)
        };
        let (Some(left), Some(right)) = (left.as_mut(), right.as_mut()) else {
            panic!("pair_mut on a deleted table");
        };
        if swapped { (right, left) } else { (left, right) }
    }

    /// Delete a table. The root table cannot be deleted.
    pub fn remove(&mut self, id: TableId) -> Option<Table> {
        if id == TableId::ROOT {
            return None;
        }
        let table = self.tables.get_mut(id.0 as usize)?.take()?;
        self.by_type.remove(table.ids());
        for other in self.tables.iter_mut().flatten() {
            other.forget_edges_to(id);
        }
        Some(table)
    }

    /// Number of live tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.len() <= 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter().flatten()
    }
}

impl fmt::Debug for TableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableStore")
            .field("table_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        component::{ComponentDesc, TypeHooks},
        id::pair,
    };

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    fn registry() -> (TypeRegistry, Id, Id, Id) {
        let mut registry = TypeRegistry::new();
        let pos = Entity::from_index(40);
        let vel = Entity::from_index(41);
        let tag = Entity::from_index(42);
        registry
            .register_typed::<Position>(pos, TypeHooks::of::<Position>().with_default::<Position>())
            .unwrap();
        registry
            .register_typed::<Velocity>(vel, TypeHooks::of::<Velocity>().with_default::<Velocity>())
            .unwrap();
        registry.register(tag.id(), ComponentDesc::tag("Tag")).unwrap();
        (registry, pos.id(), vel.id(), tag.id())
    }

    #[test]
    fn test_tags_have_no_column() {
        let (registry, pos, _, tag) = registry();
        let mut ids: TableType = [pos, tag].into_iter().collect();
        ids.sort_unstable();
        let table = Table::new(TableId::from_raw(1), ids, &registry);
        assert_eq!(table.columns().len(), 1);
        assert!(table.column_index(pos).is_some());
        assert!(table.column_index(tag).is_none());
        assert!(table.has(tag));
    }

    #[test]
    fn test_find_or_create_dedupes() {
        let (registry, pos, vel, _) = registry();
        let mut store = TableStore::new();
        let mut ids: TableType = [pos, vel].into_iter().collect();
        ids.sort_unstable();
        let (a, created_a) = store.find_or_create(ids.clone(), &registry);
        let (b, created_b) = store.find_or_create(ids, &registry);
        assert_eq!(a, b);
        assert!(created_a);
        assert!(!created_b);
    }

    #[test]
    fn test_traverse_caches_edges() {
        let (registry, pos, vel, _) = registry();
        let mut store = TableStore::new();
        let (with_pos, _) = store.traverse(TableId::ROOT, &[pos], &[], &registry);
        let (with_both, created) = store.traverse(with_pos, &[vel], &[], &registry);
        assert!(created);
        assert_eq!(store.get(with_pos).unwrap().edge(vel).unwrap().add, Some(with_both));
        assert_eq!(store.get(with_both).unwrap().edge(vel).unwrap().remove, Some(with_pos));
        let (back, created) = store.traverse(with_both, &[], &[vel], &registry);
        assert_eq!(back, with_pos);
        assert!(!created);
    }

    #[test]
    fn test_migrate_moves_values() {
        let (registry, pos, vel, _) = registry();
        let mut store = TableStore::new();
        let (with_pos, _) = store.traverse(TableId::ROOT, &[pos], &[], &registry);
        let (with_both, _) = store.traverse(with_pos, &[vel], &[], &registry);

        let a = Entity::from_index(50);
        let b = Entity::from_index(51);
        {
            let table = store.get_mut(with_pos).unwrap();
            for (e, x) in [(a, 1.0), (b, 2.0)] {
                let row = table.append(e).unwrap();
                let ptr = table.get_ptr(pos, row).unwrap();
                // SAFETY: the column stores Position
                unsafe { *ptr.cast::<Position>() = Position { x, y: 0.0 } };
            }
        }

        let (src, dst) = store.pair_mut(with_pos, with_both);
        // SAFETY: row 0 exists and Velocity has a ctor
        let (row, moved) = unsafe { migrate_row(src, 0, dst, None) };
        assert_eq!(row, 0);
        assert_eq!(moved, Some(b));
        assert_eq!(src.entities(), &[b]);
        // SAFETY: the column stores Position
        unsafe {
            assert_eq!(*dst.get_ptr(pos, 0).unwrap().cast::<Position>(), Position { x: 1.0, y: 0.0 });
            assert_eq!(*src.get_ptr(pos, 0).unwrap().cast::<Position>(), Position { x: 2.0, y: 0.0 });
            assert_eq!(*dst.get_ptr(vel, 0).unwrap().cast::<Velocity>(), Velocity::default());
        }
    }

    #[test]
    fn test_append_requires_ctor() {
        let mut registry = TypeRegistry::new();
        let name = Entity::from_index(40);
        registry.register_typed::<String>(name, TypeHooks::default()).unwrap();
        let mut table = Table::new(TableId::from_raw(1), [name.id()].into_iter().collect(), &registry);
        assert!(table.append(Entity::from_index(50)).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_pair_targets() {
        let registry = TypeRegistry::new();
        let rel = Entity::from_index(40);
        let t1 = Entity::from_index(41);
        let t2 = Entity::from_index(42);
        let mut ids: TableType = [pair(rel, t1), pair(rel, t2), pair(CHILD_OF, t1)].into_iter().collect();
        ids.sort_unstable();
        let table = Table::new(TableId::from_raw(1), ids, &registry);
        let targets: Vec<_> = table.targets(rel).collect();
        assert_eq!(targets, vec![t1, t2]);
        assert!(table.flags().contains(TableFlags::HAS_CHILD_OF));
        assert_eq!(table.search(pair(rel, crate::id::WILDCARD), 0), Some(1));
        assert_eq!(table.search(pair(rel, crate::id::WILDCARD), 2), Some(2));
    }
}
