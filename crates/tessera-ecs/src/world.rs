//! World - the main container for all ECS data.
//!
//! The world owns the entity index, the component registry, every table and
//! the index from ids to tables. Structural operations (add, remove, set,
//! delete, clear, enable, clone) run immediately when the world is not
//! deferred, and are recorded for later otherwise; see [`crate::defer`].
//!
//! Built-in entities (`Wildcard`, `Any`, `ChildOf`, `IsA`, `OnAdd`,
//! `OnRemove`, `OnSet`) are alive from construction and cannot be deleted.

use std::{
    collections::BTreeMap,
    fmt,
    mem::ManuallyDrop,
    sync::{Arc, atomic::AtomicU32},
};

use bumpalo::Bump;
use hashbrown::HashSet;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    command::{Command, CommandQueue},
    component::{Component, ComponentDesc, TypeHooks, TypeInfo, TypeRegistry},
    config::WorldConfig,
    entity_index::{EntityIndex, EntityRecord},
    error::{EcsError, EcsResult, HookKind},
    event::EventQueue,
    id::{
        BUILTINS, CHILD_OF, Entity, EntityId, FIRST_USER_INDEX, IS_A, Id, IdFlags,
        MAX_RELATIONSHIP_INDEX, ON_ADD, ON_REMOVE, ON_SET, WILDCARD, pair,
    },
    id_index::IdIndex,
    observer::{Observer, ObserverId},
    query::{Query, QueryBuilder, QueryCache, QueryCacheId},
    table::{Emplace, Table, TableFlags, TableId, TableStore, migrate_row},
};

const BUILTIN_NAMES: [&[u8]; 7] = [
    b"Wildcard", b"Any", b"ChildOf", b"IsA", b"OnAdd", b"OnRemove", b"OnSet",
];

/// The ECS world - container for all entities, components and tables.
pub struct World {
    pub(crate) config: WorldConfig,
    pub(crate) entities: EntityIndex,
    pub(crate) types: TypeRegistry,
    pub(crate) tables: TableStore,
    pub(crate) id_index: IdIndex,
    /// Commands recorded while deferred. Shared with [`crate::Commands`]
    /// handles that only hold `&World`.
    pub(crate) deferred: Mutex<CommandQueue>,
    pub(crate) defer_depth: u32,
    pub(crate) flushing: bool,
    pub(crate) observers: Vec<(ObserverId, Observer)>,
    pub(crate) next_observer: AtomicU32,
    pub(crate) events: Mutex<EventQueue>,
    query_caches: Vec<Option<QueryCache>>,
    /// Relationships followed by `up` traversal and checked for cycles.
    pub(crate) traversable: HashSet<EntityId, FxBuildHasher>,
    /// Named entity index: name bytes -> Entity.
    name_index: BTreeMap<Vec<u8>, Entity>,
    /// Reverse index: entity index -> name bytes (for cleanup on delete).
    entity_names: Vec<Option<Vec<u8>>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new world with the built-in entities.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create a world with pre-allocated entity capacity.
    #[must_use]
    pub fn with_capacity(entity_capacity: usize) -> Self {
        Self::with_config(WorldConfig::default().with_entity_capacity(entity_capacity))
    }

    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        let mut traversable = HashSet::default();
        traversable.insert(CHILD_OF.index());
        traversable.insert(IS_A.index());

        let mut world = Self {
            entities: EntityIndex::new(FIRST_USER_INDEX, config.entity_capacity),
            types: TypeRegistry::new(),
            tables: TableStore::new(),
            id_index: IdIndex::new(),
            deferred: Mutex::new(CommandQueue::new()),
            defer_depth: 0,
            flushing: false,
            observers: Vec::new(),
            next_observer: AtomicU32::new(1),
            events: Mutex::new(EventQueue::default()),
            query_caches: Vec::new(),
            traversable,
            name_index: BTreeMap::new(),
            entity_names: Vec::with_capacity(config.entity_capacity),
            config,
        };

        for (builtin, name) in BUILTINS.into_iter().zip(BUILTIN_NAMES) {
            world.materialize(builtin);
            world.set_name(builtin, name);
        }
        world
    }

    #[must_use]
    pub const fn config(&self) -> &WorldConfig {
        &self.config
    }

    // ==================== Entity Operations ====================

    /// Spawn a new empty entity.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.entities.create();
        self.place_in_root(entity);
        entity
    }

    /// Make a reserved entity alive in the root table.
    pub(crate) fn materialize(&mut self, entity: Entity) -> bool {
        if !self.entities.materialize(entity) {
            return false;
        }
        self.place_in_root(entity);
        true
    }

    fn place_in_root(&mut self, entity: Entity) {
        let Some(root) = self.tables.get_mut(TableId::ROOT) else {
            return;
        };
        // SAFETY: the root table has no columns
        let row = unsafe { root.append_uninit(entity) };
        self.entities.set(entity, EntityRecord {
            table: TableId::ROOT,
            row,
        });
    }

    /// Check if an entity is alive.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// The live entity in `entity`'s slot, whatever its generation.
    #[must_use]
    pub fn get_alive(&self, entity: Entity) -> Option<Entity> {
        self.entities.current(entity.index())
    }

    /// Get the number of alive entities, built-ins included.
    #[must_use]
    pub const fn entity_count(&self) -> u32 {
        self.entities.alive_count()
    }

    pub(crate) fn record(&self, entity: Entity) -> Option<EntityRecord> {
        self.entities.get(entity)
    }

    // ==================== Named Entity Operations ====================

    /// Get or create an entity by name.
    pub fn entity_named(&mut self, name: &[u8]) -> Entity {
        if let Some(entity) = self.lookup(name) {
            return entity;
        }
        let entity = self.spawn();
        self.set_name(entity, name);
        entity
    }

    /// Lookup an entity by name without creating it.
    #[must_use]
    pub fn lookup(&self, name: &[u8]) -> Option<Entity> {
        let &entity = self.name_index.get(name)?;
        self.is_alive(entity).then_some(entity)
    }

    /// Get the name of an entity, if it has one.
    #[must_use]
    pub fn name(&self, entity: Entity) -> Option<&[u8]> {
        if !self.is_alive(entity) {
            return None;
        }
        self.entity_names.get(entity.index() as usize)?.as_deref()
    }

    /// Set or replace the name of an entity. Returns false if the entity is
    /// dead or another entity has the name.
    pub fn set_name(&mut self, entity: Entity, name: &[u8]) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        if self.lookup(name).is_some_and(|existing| existing != entity) {
            return false;
        }

        let index = entity.index() as usize;
        if index >= self.entity_names.len() {
            self.entity_names.resize(index + 1, None);
        }
        if let Some(old) = self.entity_names[index].take() {
            self.name_index.remove(&old);
        }
        self.name_index.insert(name.to_vec(), entity);
        self.entity_names[index] = Some(name.to_vec());
        true
    }

    fn forget_name(&mut self, entity: Entity) {
        if let Some(name) = self
            .entity_names
            .get_mut(entity.index() as usize)
            .and_then(Option::take)
        {
            self.name_index.remove(&name);
        }
    }

    // ==================== Component Registration ====================

    /// Entity registered for Rust type `T`, registering it on first use.
    pub fn component<T: Component>(&mut self) -> EcsResult<Entity> {
        match self.types.entity_of::<T>() {
            Some(entity) => Ok(entity),
            None => self.component_with::<T>(TypeHooks::default()),
        }
    }

    /// Register `T` with extra hooks, e.g. `TypeHooks::default().with_clone::<T>()`.
    /// Hooks merge into an existing registration.
    pub fn component_with<T: Component>(&mut self, hooks: TypeHooks) -> EcsResult<Entity> {
        let entity = match self.types.entity_of::<T>() {
            Some(entity) => entity,
            None => {
                let entity = self.spawn();
                self.set_name(entity, std::any::type_name::<T>().as_bytes());
                entity
            }
        };
        self.types.register_typed::<T>(entity, hooks)?;
        Ok(entity)
    }

    /// Register an untyped component for `entity`.
    ///
    /// Fails if the id is already stored in tables without a registration,
    /// since those tables have no column for it.
    pub fn register(&mut self, entity: Entity, desc: ComponentDesc) -> EcsResult<&TypeInfo> {
        let id = entity.id();
        if !self.is_alive(entity) {
            return Err(EcsError::InvalidId {
                id,
                reason: "component entity is not alive",
            });
        }
        if self.types.get(id).is_none() {
            if self.id_index.contains(id) {
                return Err(EcsError::InvalidComponent {
                    id,
                    reason: "id is already in use without a type",
                });
            }
            let as_relationship = entity.index() <= MAX_RELATIONSHIP_INDEX
                && self.id_index.contains(pair(entity, WILDCARD));
            if as_relationship || self.id_index.contains(pair(WILDCARD, entity)) {
                return Err(EcsError::InvalidComponent {
                    id,
                    reason: "id is already used in pairs without a type",
                });
            }
        }
        self.types.register(id, desc)
    }

    /// Register the type carried by a deferred value that named no id.
    pub(crate) fn register_payload_type(&mut self, info: &TypeInfo) -> EcsResult<Entity> {
        if let Some(entity) = info
            .type_id()
            .and_then(|t| self.types.entity_of_type_id(t))
        {
            return Ok(entity);
        }
        let entity = self.spawn();
        self.set_name(entity, info.name().as_bytes());
        self.types.register_info(entity, info)?;
        Ok(entity)
    }

    /// Entity registered for `T`, if any.
    #[must_use]
    pub fn type_entity<T: 'static>(&self) -> Option<Entity> {
        self.types.entity_of::<T>()
    }

    #[must_use]
    pub const fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Type info of the data stored for `id`.
    #[must_use]
    pub fn type_info(&self, id: impl Into<Id>) -> Option<&TypeInfo> {
        let id = id.into();
        self.types.get(id).or_else(|| self.types.for_id(id))
    }

    // ==================== Structural Operations ====================

    /// Add an id (component, tag or pair) to an entity.
    ///
    /// Returns `Ok(false)` if the entity is dead; `Ok(true)` when the change
    /// was applied or recorded.
    pub fn add_id(&mut self, entity: Entity, id: impl Into<Id>) -> EcsResult<bool> {
        let id = id.into();
        if self.is_deferred() {
            self.deferred.get_mut().push(Command::Add { entity, id });
            return Ok(true);
        }
        self.defer(|world| world.add_now(entity, id))
    }

    /// Add component `T`, default-constructed.
    pub fn add<T: Component>(&mut self, entity: Entity) -> EcsResult<bool> {
        let component = self.component::<T>()?;
        self.add_id(entity, component)
    }

    pub fn add_pair(&mut self, entity: Entity, relationship: Entity, target: Entity) -> EcsResult<bool> {
        self.add_id(entity, pair(relationship, target))
    }

    /// Remove an id from an entity. A wildcard removes every matching id.
    pub fn remove_id(&mut self, entity: Entity, id: impl Into<Id>) -> EcsResult<bool> {
        let id = id.into();
        if self.is_deferred() {
            self.deferred.get_mut().push(Command::Remove { entity, id });
            return Ok(true);
        }
        self.defer(|world| world.remove_now(entity, id))
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> EcsResult<bool> {
        match self.type_entity::<T>() {
            Some(component) => self.remove_id(entity, component),
            None => Ok(self.is_alive(entity)),
        }
    }

    pub fn remove_pair(&mut self, entity: Entity, relationship: Entity, target: Entity) -> EcsResult<bool> {
        self.remove_id(entity, pair(relationship, target))
    }

    /// Assign component `T`, adding it if missing. Emits `OnSet`.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> EcsResult<bool> {
        let component = self.component::<T>()?;
        self.set_id(entity, component, value)
    }

    /// Assign a value of type `T` to `id`, which must store `T` (for example
    /// a pair whose relationship is `T`'s component).
    pub fn set_id<T: Component>(&mut self, entity: Entity, id: impl Into<Id>, value: T) -> EcsResult<bool> {
        let id = id.into();
        if size_of::<T>() == 0 {
            return self.add_id(entity, id);
        }
        if self.is_deferred() {
            self.deferred.get_mut().push_set(entity, Some(id), value);
            return Ok(true);
        }
        let info = TypeInfo::of::<T>(id);
        let mut value = ManuallyDrop::new(value);
        let src = std::ptr::from_mut::<T>(&mut value).cast::<u8>();
        // SAFETY: `src` holds an initialized `T` matching `info`
        let result = self.defer(|world| unsafe { world.set_now(entity, id, src, &info) });
        if !matches!(result, Ok(true)) {
            // SAFETY: the value was not moved out
            unsafe { ManuallyDrop::drop(&mut value) };
        }
        result
    }

    /// Assign `(T, target)` with a value of `T`.
    pub fn set_pair<T: Component>(&mut self, entity: Entity, target: Entity, value: T) -> EcsResult<bool> {
        let component = self.component::<T>()?;
        self.set_id(entity, pair(component, target), value)
    }

    /// Assign raw bytes to an untyped component.
    pub fn set_raw(&mut self, entity: Entity, id: impl Into<Id>, bytes: &[u8]) -> EcsResult<bool> {
        let id = id.into();
        let info = self.raw_target(id, bytes.len())?.clone();
        if self.is_deferred() {
            // SAFETY: the bytes fill the whole value of a bitwise type
            unsafe {
                self.deferred.get_mut().push_set_with(entity, id, &info, |dst| {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
                });
            }
            return Ok(true);
        }
        let scratch = Bump::new();
        let tmp = scratch.alloc_layout(info.layout()).as_ptr();
        // SAFETY: `tmp` is sized and aligned for the value
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), tmp, bytes.len()) };
        // SAFETY: bitwise types need no destructor if the value is not consumed
        self.defer(|world| unsafe { world.set_now(entity, id, tmp, &info) })
    }

    /// Type info of an untyped id that `len` raw bytes can be written to.
    pub(crate) fn raw_target(&self, id: Id, len: usize) -> EcsResult<&TypeInfo> {
        let Some(info) = self.types.for_id(id) else {
            return Err(EcsError::InvalidComponent {
                id,
                reason: "id carries no data",
            });
        };
        if info.type_id().is_some() {
            return Err(EcsError::TypeMismatch {
                id,
                expected: info.name(),
            });
        }
        if info.size() != len {
            return Err(EcsError::SizeMismatch {
                id,
                expected: info.size(),
                actual: len,
            });
        }
        Ok(info)
    }

    /// Emit `OnSet` for a value written in place (e.g. through
    /// [`World::get_mut`]).
    pub fn modified(&mut self, entity: Entity, id: impl Into<Id>) -> EcsResult<bool> {
        let id = id.into();
        if self.is_deferred() {
            self.deferred.get_mut().push(Command::Modified { entity, id });
            return Ok(true);
        }
        self.defer(|world| world.modified_now(entity, id))
    }

    /// Delete an entity, its `ChildOf` descendants, and every id that refers
    /// to it.
    pub fn delete(&mut self, entity: Entity) -> EcsResult<bool> {
        if self.is_deferred() {
            self.deferred.get_mut().push(Command::Delete { entity });
            return Ok(true);
        }
        self.defer(|world| world.delete_now(entity))
    }

    /// Remove every id from an entity, keeping it alive.
    pub fn clear(&mut self, entity: Entity) -> EcsResult<bool> {
        if self.is_deferred() {
            self.deferred.get_mut().push(Command::Clear { entity });
            return Ok(true);
        }
        self.defer(|world| world.clear_now(entity))
    }

    /// Enable or disable `id` for one entity. The id gains a toggle on first
    /// use; disabled rows are skipped by queries that require the id.
    pub fn enable(&mut self, entity: Entity, id: impl Into<Id>, enabled: bool) -> EcsResult<bool> {
        let id = id.into();
        if self.is_deferred() {
            self.deferred.get_mut().push(Command::Enable {
                entity,
                id,
                enabled,
            });
            return Ok(true);
        }
        self.defer(|world| world.enable_now(entity, id, enabled))
    }

    /// Whether `id` is present and enabled on `entity`.
    #[must_use]
    pub fn is_enabled(&self, entity: Entity, id: impl Into<Id>) -> bool {
        let id = id.into();
        let Some((table, row)) = self.locate(entity) else {
            return false;
        };
        table.has(id) && table.is_enabled(row, id)
    }

    /// Create a new entity with the same ids as `src`, copying values if
    /// `copy_values` is set and default-constructing them otherwise.
    ///
    /// Returns `None` if `src` is dead.
    pub fn clone_entity(&mut self, src: Entity, copy_values: bool) -> EcsResult<Option<Entity>> {
        if self.is_deferred() {
            let dst = self.entities.reserve();
            let queue = self.deferred.get_mut();
            queue.push(Command::Spawn { entity: dst });
            queue.push(Command::Clone {
                src,
                dst,
                copy_values,
            });
            return Ok(Some(dst));
        }
        if !self.is_alive(src) {
            return Ok(None);
        }
        let dst = self.spawn();
        match self.defer(|world| world.clone_now(src, dst, copy_values)) {
            Ok(true) => Ok(Some(dst)),
            Ok(false) => {
                self.delete(dst)?;
                Ok(None)
            }
            Err(error) => {
                self.delete(dst)?;
                Err(error)
            }
        }
    }

    // ==================== Immediate Implementations ====================

    pub(crate) fn add_now(&mut self, entity: Entity, id: Id) -> EcsResult<bool> {
        if id.is_pair() && id.flags() == IdFlags::PAIR && id.first().index() == IS_A.index() {
            return self.add_is_a_now(entity, id);
        }
        self.commit(entity, &[id], &[], None)
    }

    /// Add `(IsA, base)`, then copy every `AUTO_OVERRIDE` value of the base
    /// that the entity does not own yet.
    fn add_is_a_now(&mut self, entity: Entity, id: Id) -> EcsResult<bool> {
        if !self.is_alive(entity) {
            return Ok(false);
        }
        let base = self.entities.current(id.second().index());
        let overrides: SmallVec<[Id; 4]> = base
            .and_then(|b| self.locate(b))
            .map(|(table, _)| {
                table
                    .ids()
                    .iter()
                    .filter(|i| i.has_flags(IdFlags::AUTO_OVERRIDE))
                    .map(|i| i.strip_flags())
                    .collect()
            })
            .unwrap_or_default();
        let overrides: SmallVec<[Id; 4]> = overrides
            .into_iter()
            .filter(|&c| !self.owns_id(entity, c))
            .collect();
        for &component in &overrides {
            if let Some(info) = self.types.for_id(component) {
                info.require(HookKind::CopyConstruct)?;
            }
        }

        if !self.commit(entity, &[id], &[], None)? {
            return Ok(false);
        }
        let Some(base) = base else {
            return Ok(true);
        };

        for component in overrides {
            let Some(info) = self.types.for_id(component).cloned() else {
                self.commit(entity, &[component], &[], None)?;
                continue;
            };
            let Some(src) = self.get_ptr(base, component) else {
                continue;
            };
            let scratch = Bump::new();
            let tmp = scratch.alloc_layout(info.layout()).as_ptr();
            // SAFETY: `src` points to an initialized value of `info`'s type
            unsafe { info.copy_construct(tmp, src, 1) };
            // SAFETY: `tmp` holds the copy constructed above
            let result = unsafe { self.set_now(entity, component, tmp, &info) };
            if !matches!(result, Ok(true)) {
                // SAFETY: the copy was not consumed
                unsafe { info.destruct(tmp, 1) };
            }
            result?;
        }
        Ok(true)
    }

    pub(crate) fn remove_now(&mut self, entity: Entity, id: Id) -> EcsResult<bool> {
        let Some((table, _)) = self.locate(entity) else {
            return Ok(false);
        };
        let mut remove: SmallVec<[Id; 4]> = SmallVec::new();
        if id.is_wildcard() {
            let mut start = 0;
            while let Some(index) = table.search(id, start) {
                remove.push(table.ids()[index]);
                start = index + 1;
            }
        } else {
            remove.push(id);
        }
        let toggled: SmallVec<[Id; 4]> = remove
            .iter()
            .map(|i| i.with_flags(IdFlags::TOGGLE))
            .filter(|t| table.has(*t))
            .collect();
        remove.extend(toggled);
        self.commit(entity, &[], &remove, None)
    }

    pub(crate) fn clear_now(&mut self, entity: Entity) -> EcsResult<bool> {
        let Some((table, _)) = self.locate(entity) else {
            return Ok(false);
        };
        let all: SmallVec<[Id; 8]> = table.ids().iter().copied().collect();
        self.commit(entity, &[], &all, None)
    }

    pub(crate) fn enable_now(&mut self, entity: Entity, id: Id, enabled: bool) -> EcsResult<bool> {
        let toggle = id.with_flags(IdFlags::TOGGLE);
        if !self.commit(entity, &[toggle], &[], None)? {
            return Ok(false);
        }
        let Some(record) = self.entities.get(entity) else {
            return Ok(false);
        };
        if let Some(table) = self.tables.get_mut(record.table) {
            table.set_enabled(record.row, id, enabled);
        }
        Ok(true)
    }

    pub(crate) fn modified_now(&mut self, entity: Entity, id: Id) -> EcsResult<bool> {
        let Some(record) = self.entities.get(entity) else {
            return Ok(false);
        };
        if self.tables.get(record.table).is_some_and(|t| t.has(id)) {
            self.notify(ON_SET, &[id], record.table, record.row, 1, None);
        }
        Ok(true)
    }

    /// Move `src` into `id` of `entity`, adding the id if needed.
    ///
    /// Returns `Ok(true)` when the value was consumed; otherwise the caller
    /// still owns it.
    ///
    /// # Safety
    ///
    /// `src` must point to an initialized value described by `info`.
    pub(crate) unsafe fn set_now(
        &mut self,
        entity: Entity,
        id: Id,
        src: *mut u8,
        info: &TypeInfo,
    ) -> EcsResult<bool> {
        if !self.is_alive(entity) {
            return Ok(false);
        }
        self.validate_id(id)?;
        let Some(target) = self.types.for_id(id) else {
            return Err(EcsError::InvalidComponent {
                id,
                reason: "id carries no data",
            });
        };
        if let (Some(expected), Some(actual)) = (target.type_id(), info.type_id()) {
            if expected != actual {
                return Err(EcsError::TypeMismatch {
                    id,
                    expected: target.name(),
                });
            }
        }
        if target.size() != info.size() {
            return Err(EcsError::SizeMismatch {
                id,
                expected: target.size(),
                actual: info.size(),
            });
        }

        let Some(record) = self.entities.get(entity) else {
            return Ok(false);
        };
        let in_place = self
            .tables
            .get(record.table)
            .and_then(|t| t.get_ptr(id, record.row).zip(t.column_index(id)));
        if let Some((dst, column)) = in_place {
            if let Some(column) = self.tables.get(record.table).and_then(|t| t.column(column)) {
                // SAFETY: `dst` is an initialized value of the column's type
                unsafe { column.info().move_assign(dst, src, 1) };
            }
        } else if !self.commit(entity, &[id], &[], Some(Emplace { id, src }))? {
            return Ok(false);
        }

        if let Some(record) = self.entities.get(entity) {
            self.notify(ON_SET, &[id], record.table, record.row, 1, None);
        }
        Ok(true)
    }

    pub(crate) fn clone_now(&mut self, src: Entity, dst: Entity, copy_values: bool) -> EcsResult<bool> {
        if !self.is_alive(src) || !self.is_alive(dst) {
            return Ok(false);
        }
        self.clear_now(dst)?;
        let Some(src_record) = self.entities.get(src) else {
            return Ok(false);
        };
        let table_id = src_record.table;
        if table_id == TableId::ROOT {
            return Ok(true);
        }
        let Some(table) = self.tables.get(table_id) else {
            return Ok(false);
        };
        if table.is_locked() {
            return Err(EcsError::TableLocked { entity: dst });
        }
        for column in table.columns() {
            let hook = if copy_values {
                HookKind::CopyConstruct
            } else {
                HookKind::Construct
            };
            column.info().require(hook)?;
        }
        let ids: SmallVec<[Id; 8]> = table.ids().iter().copied().collect();
        let data_ids: SmallVec<[Id; 8]> = (0..table.columns().len())
            .map(|c| table.column_id(c))
            .collect();

        // Leave the root table
        let Some(dst_record) = self.entities.get(dst) else {
            return Ok(false);
        };
        if let Some(root) = self.tables.get_mut(dst_record.table) {
            if let Some(moved) = root.delete_row(dst_record.row) {
                self.entities.set_row(moved, dst_record.row);
            }
        }

        let Some(src_record) = self.entities.get(src) else {
            return Ok(false);
        };
        let Some(table) = self.tables.get_mut(table_id) else {
            return Ok(false);
        };
        // SAFETY: every column is initialized right below
        let row = unsafe { table.append_uninit(dst) };
        for column in table.columns() {
            // SAFETY: both rows are in bounds; the new slot is uninitialized
            unsafe {
                let to = column.get_unchecked_raw(row);
                if copy_values {
                    let from = column.get_unchecked_raw(src_record.row);
                    column.info().copy_construct(to, from, 1);
                } else {
                    column.info().construct(to, 1);
                }
            }
        }
        table.copy_toggles(src_record.row, row);
        self.entities.set(dst, EntityRecord {
            table: table_id,
            row,
        });

        self.notify(ON_ADD, &ids, table_id, row, 1, None);
        if copy_values && !data_ids.is_empty() {
            self.notify(ON_SET, &data_ids, table_id, row, 1, None);
        }
        Ok(true)
    }

    pub(crate) fn delete_now(&mut self, entity: Entity) -> EcsResult<bool> {
        let Some(record) = self.entities.get(entity) else {
            return Ok(false);
        };
        if BUILTINS.contains(&entity) {
            return Err(EcsError::InvalidId {
                id: entity.id(),
                reason: "built-in entities cannot be deleted",
            });
        }
        self.check_deletable(entity, record.table)?;

        for child in self.children(entity) {
            self.delete_now(child)?;
        }

        let Some(record) = self.entities.get(entity) else {
            return Ok(false);
        };
        let ids: SmallVec<[Id; 8]> = self
            .tables
            .get(record.table)
            .map(|t| t.ids().iter().copied().collect())
            .unwrap_or_default();
        if !ids.is_empty() {
            self.notify(ON_REMOVE, &ids, record.table, record.row, 1, None);
        }

        if let Some(table) = self.tables.get_mut(record.table) {
            if let Some(moved) = table.delete_row(record.row) {
                self.entities.set_row(moved, record.row);
            }
        }
        self.forget_name(entity);
        self.entities.delete(entity);
        debug!(%entity, "deleted entity");

        self.remove_references(entity)?;
        self.types.unregister(entity.id());
        Ok(true)
    }

    /// Fail before anything is deleted if `entity`, a descendant, or an
    /// entity referring to one of them sits in a locked table.
    fn check_deletable(&self, entity: Entity, table: TableId) -> EcsResult<()> {
        if self.tables.get(table).is_some_and(Table::is_locked) {
            return Err(EcsError::TableLocked { entity });
        }
        let (_, tables) = self.reference_tables(entity);
        for table_id in tables {
            if let Some(table) = self.tables.get(table_id).filter(|t| t.is_locked()) {
                let other = table.entities().first().copied().unwrap_or(entity);
                return Err(EcsError::TableLocked { entity: other });
            }
        }
        for child in self.children(entity) {
            if let Some(record) = self.entities.get(child) {
                self.check_deletable(child, record.table)?;
            }
        }
        Ok(())
    }

    /// Id patterns that refer to `entity`, and the tables holding them.
    fn reference_tables(&self, entity: Entity) -> (SmallVec<[Id; 6]>, SmallVec<[TableId; 8]>) {
        let mut patterns: SmallVec<[Id; 6]> = SmallVec::new();
        patterns.push(entity.id());
        patterns.push(entity.id().with_flags(IdFlags::TOGGLE));
        patterns.push(entity.id().with_flags(IdFlags::AUTO_OVERRIDE));
        patterns.push(pair(WILDCARD, entity));
        if entity.index() <= MAX_RELATIONSHIP_INDEX {
            patterns.push(pair(entity, WILDCARD));
        }

        let mut tables: SmallVec<[TableId; 8]> = patterns
            .iter()
            .flat_map(|&p| self.id_index.tables_for(p).iter().map(|r| r.table))
            .collect();
        tables.sort_unstable();
        tables.dedup();
        (patterns, tables)
    }

    /// Strip every id referring to a deleted entity from the entities that
    /// have it.
    fn remove_references(&mut self, entity: Entity) -> EcsResult<()> {
        let (patterns, tables) = self.reference_tables(entity);
        for table_id in tables {
            let Some(table) = self.tables.get(table_id) else {
                continue;
            };
            let ids: SmallVec<[Id; 4]> = table
                .ids()
                .iter()
                .copied()
                .filter(|&id| patterns.iter().any(|&p| id.matches(p)))
                .collect();
            let affected = table.entities().to_vec();
            for other in affected {
                self.commit(other, &[], &ids, None)?;
            }
            if self.config.delete_empty_tables_on_cleanup {
                self.delete_table(table_id);
            }
        }
        Ok(())
    }

    // ==================== Structural Commit ====================

    /// Check that `id` can be added to an entity.
    fn validate_id(&self, id: Id) -> EcsResult<()> {
        if id == Id::NULL {
            return Err(EcsError::InvalidId {
                id,
                reason: "null id",
            });
        }
        if id.is_wildcard() || id.is_any() {
            return Err(EcsError::InvalidId {
                id,
                reason: "wildcards cannot be added",
            });
        }
        let alive = if id.is_pair() {
            self.entities.current(id.first().index()).is_some()
                && self.entities.current(id.second().index()).is_some()
        } else {
            self.is_alive(Entity::from_bits(id.strip_flags().raw()))
        };
        if alive {
            Ok(())
        } else {
            Err(EcsError::InvalidId {
                id,
                reason: "id refers to a dead entity",
            })
        }
    }

    /// Move `entity` to the table with `add` added and `remove` removed.
    ///
    /// Every failure is reported before anything changes. `OnRemove` runs
    /// while removed values are still readable; `OnAdd` after the move.
    pub(crate) fn commit(
        &mut self,
        entity: Entity,
        add: &[Id],
        remove: &[Id],
        emplace: Option<Emplace>,
    ) -> EcsResult<bool> {
        let Some(record) = self.entities.get(entity) else {
            return Ok(false);
        };
        let src_id = record.table;
        let Some(src) = self.tables.get(src_id) else {
            return Ok(false);
        };

        let mut to_add: SmallVec<[Id; 4]> = SmallVec::new();
        for &id in add {
            if src.has(id) || to_add.contains(&id) {
                continue;
            }
            self.validate_id(id)?;
            to_add.push(id);
        }
        let mut to_remove: SmallVec<[Id; 4]> = remove
            .iter()
            .copied()
            .filter(|&id| src.has(id) && !to_add.contains(&id))
            .collect();

        for &id in &to_add {
            if !id.is_pair() || id.flags() != IdFlags::PAIR {
                continue;
            }
            let relationship = id.first();
            if self.traversable.contains(&relationship.index()) {
                if let Some(target) = self.entities.current(id.second().index()) {
                    if self.would_cycle(entity, relationship, target) {
                        return Err(EcsError::CycleDetected {
                            entity,
                            relationship: self.get_alive(relationship).unwrap_or(relationship),
                            target,
                        });
                    }
                }
            }
            // An entity has at most one parent
            if relationship.index() == CHILD_OF.index() {
                to_remove.extend(src.ids().iter().copied().filter(|&old| {
                    old != id
                        && old.is_pair()
                        && old.flags() == IdFlags::PAIR
                        && old.first().index() == CHILD_OF.index()
                }));
            }
        }

        to_remove.sort_unstable();
        to_remove.dedup();
        if to_add.is_empty() && to_remove.is_empty() {
            return Ok(true);
        }

        for &id in &to_add {
            if emplace.is_some_and(|e| e.id == id) {
                continue;
            }
            if let Some(info) = self.types.for_id(id) {
                info.require(HookKind::Construct)?;
            }
        }
        if src.is_locked() {
            return Err(EcsError::TableLocked { entity });
        }

        let (dst_id, created) = self.tables.traverse(src_id, &to_add, &to_remove, &self.types);
        if created {
            self.table_created(dst_id);
        }
        if self.tables.get(dst_id).is_some_and(Table::is_locked) {
            return Err(EcsError::TableLocked { entity });
        }

        if !to_remove.is_empty() {
            self.notify(ON_REMOVE, &to_remove, src_id, record.row, 1, None);
        }

        let (src, dst) = self.tables.pair_mut(src_id, dst_id);
        // SAFETY: the row is in bounds, constructors were checked above and
        // the emplaced value is initialized
        let (row, moved) = unsafe { migrate_row(src, record.row, dst, emplace) };
        if let Some(moved) = moved {
            self.entities.set_row(moved, record.row);
        }
        self.entities.set(entity, EntityRecord { table: dst_id, row });

        if !to_add.is_empty() {
            self.notify(ON_ADD, &to_add, dst_id, row, 1, None);
        }
        Ok(true)
    }

    // ==================== Component Access ====================

    /// Table and row of a live entity.
    pub(crate) fn locate(&self, entity: Entity) -> Option<(&Table, usize)> {
        let record = self.entities.get(entity)?;
        Some((self.tables.get(record.table)?, record.row))
    }

    /// Pointer to the value of `id` for `entity`, owned or inherited through
    /// `IsA`.
    #[must_use]
    pub fn get_ptr(&self, entity: Entity, id: impl Into<Id>) -> Option<*const u8> {
        let id = id.into();
        let (table, row) = self.locate(entity)?;
        if let Some(ptr) = table.get_ptr(id, row) {
            return Some(ptr.cast_const());
        }
        if !table.flags().contains(TableFlags::HAS_IS_A) {
            return None;
        }
        let up = self.find_up(table, id, IS_A)?;
        self.tables
            .get(up.table)?
            .get_ptr(up.id, up.row)
            .map(<*mut u8>::cast_const)
    }

    /// Borrow component `T` of an entity, owned or inherited.
    #[must_use]
    pub fn get_ref<T: Component>(&self, entity: Entity) -> Option<&T> {
        let component = self.type_entity::<T>()?;
        let ptr = self.get_ptr(entity, component)?;
        // SAFETY: the registry maps `T` to this component, so the column
        // stores `T`
        Some(unsafe { &*ptr.cast::<T>() })
    }

    /// Get a copy of component `T`.
    #[must_use]
    pub fn get<T: Component + Clone>(&self, entity: Entity) -> Option<T> {
        self.get_ref::<T>(entity).cloned()
    }

    /// Get a copy of the value stored for `id` as a `T`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not store a `T`.
    #[must_use]
    pub fn get_id<T: Component + Clone>(&self, entity: Entity, id: impl Into<Id>) -> Option<T> {
        let id = id.into();
        let info = self.types.for_id(id)?;
        assert!(
            info.is::<T>(),
            "{id:?} stores {}, not {}",
            info.name(),
            std::any::type_name::<T>()
        );
        let ptr = self.get_ptr(entity, id)?;
        // SAFETY: checked above that the column stores `T`
        Some(unsafe { &*ptr.cast::<T>() }.clone())
    }

    /// Mutably borrow an owned component. Call [`World::modified`] to notify
    /// `OnSet` observers.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let component = self.type_entity::<T>()?;
        let (table, row) = self.locate(entity)?;
        let ptr = table.get_ptr(component.id(), row)?;
        // SAFETY: `&mut self` guarantees exclusive access to the column
        Some(unsafe { &mut *ptr.cast::<T>() })
    }

    /// Whether the entity has `id` (a pattern is allowed), owned or
    /// inherited through `IsA`.
    #[must_use]
    pub fn has_id(&self, entity: Entity, id: impl Into<Id>) -> bool {
        let id = id.into();
        let Some((table, _)) = self.locate(entity) else {
            return false;
        };
        table.search(id, 0).is_some()
            || (table.flags().contains(TableFlags::HAS_IS_A) && self.find_up(table, id, IS_A).is_some())
    }

    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.type_entity::<T>()
            .is_some_and(|component| self.has_id(entity, component))
    }

    /// Whether the entity itself has `id`, ignoring inheritance.
    #[must_use]
    pub fn owns_id(&self, entity: Entity, id: impl Into<Id>) -> bool {
        let id = id.into();
        self.locate(entity)
            .is_some_and(|(table, _)| table.search(id, 0).is_some())
    }

    /// Compare the values of `id` on two entities with its equals hook.
    pub fn values_equal(&self, a: Entity, b: Entity, id: impl Into<Id>) -> EcsResult<bool> {
        let id = id.into();
        let Some(info) = self.types.for_id(id) else {
            return Err(EcsError::InvalidComponent {
                id,
                reason: "id carries no data",
            });
        };
        info.require(HookKind::Equals)?;
        match (self.get_ptr(a, id), self.get_ptr(b, id)) {
            // SAFETY: both pointers come from columns of `id`
            (Some(pa), Some(pb)) => Ok(unsafe { info.equals(pa, pb) }),
            _ => Ok(false),
        }
    }

    // ==================== Table Access ====================

    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.get(id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Table currently holding an entity.
    #[must_use]
    pub fn table_of(&self, entity: Entity) -> Option<TableId> {
        self.entities.get(entity).map(|r| r.table)
    }

    /// Sorted ids of an entity.
    #[must_use]
    pub fn type_of(&self, entity: Entity) -> Option<&[Id]> {
        self.locate(entity).map(|(table, _)| table.ids())
    }

    /// Column holding `id` in a table.
    #[must_use]
    pub fn column_index(&self, table: TableId, id: impl Into<Id>) -> Option<usize> {
        self.tables.get(table)?.column_index(id.into())
    }

    pub(crate) const fn id_index(&self) -> &IdIndex {
        &self.id_index
    }

    fn table_created(&mut self, id: TableId) {
        let Some(table) = self.tables.get(id) else {
            return;
        };
        self.id_index.register_table(table);
        debug!(table = ?id, ids = ?table.ids(), "created table");

        let mut caches = std::mem::take(&mut self.query_caches);
        for cache in caches.iter_mut().flatten() {
            cache.table_created(self, table);
        }
        self.query_caches = caches;
    }

    /// Delete an empty, unlocked table. The root table is never deleted.
    fn delete_table(&mut self, id: TableId) -> bool {
        if !self
            .tables
            .get(id)
            .is_some_and(|t| t.is_empty() && !t.is_locked())
        {
            return false;
        }
        let Some(table) = self.tables.remove(id) else {
            return false;
        };
        self.id_index.unregister_table(&table);
        for cache in self.query_caches.iter_mut().flatten() {
            cache.table_deleted(id);
        }
        debug!(table = ?id, "deleted table");
        true
    }

    /// Delete every empty table. Returns how many were deleted.
    pub fn delete_empty_tables(&mut self) -> usize {
        let empty: Vec<TableId> = self
            .tables
            .iter()
            .filter(|t| t.id() != TableId::ROOT && t.is_empty())
            .map(Table::id)
            .collect();
        empty.into_iter().filter(|&id| self.delete_table(id)).count()
    }

    // ==================== Queries ====================

    /// Start building an uncached query.
    #[must_use]
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Build a cached query. The world keeps its matched tables up to date as
    /// tables are created and deleted.
    pub fn cached_query(
        &mut self,
        build: impl FnOnce(QueryBuilder<'_>) -> QueryBuilder<'_>,
    ) -> EcsResult<Query> {
        let plan = Arc::new(build(QueryBuilder::new(self)).into_plan()?);
        let cache = QueryCache::new(self, plan.clone());
        let slot = match self.query_caches.iter().position(Option::is_none) {
            Some(slot) => {
                self.query_caches[slot] = Some(cache);
                slot
            }
            None => {
                self.query_caches.push(Some(cache));
                self.query_caches.len() - 1
            }
        };
        debug!(
            cache = slot,
            tables = self.query_caches[slot].as_ref().map_or(0, QueryCache::len),
            "created query cache"
        );
        Ok(Query::new(plan, Some(QueryCacheId(slot as u32))))
    }

    /// Drop the cache of a cached query. The query keeps working uncached.
    pub fn destroy_query(&mut self, query: &Query) -> bool {
        let Some(id) = query.cache_id() else {
            return false;
        };
        self.query_caches
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .is_some()
    }

    pub(crate) fn query_cache(&self, id: QueryCacheId) -> Option<&QueryCache> {
        self.query_caches.get(id.0 as usize)?.as_ref()
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entities.alive_count())
            .field("component_types", &self.types.len())
            .field("table_count", &self.tables.len())
            .field("observers", &self.observers.len())
            .field("defer_depth", &self.defer_depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, Default)]
    struct Frozen;

    #[test]
    fn test_builtins_alive_and_named() {
        let world = World::new();
        for builtin in BUILTINS {
            assert!(world.is_alive(builtin));
        }
        assert_eq!(world.lookup(b"ChildOf"), Some(CHILD_OF));
        assert_eq!(world.name(IS_A), Some(&b"IsA"[..]));
    }

    #[test]
    fn test_set_and_get() {
        let mut world = World::new();
        let e = world.spawn();
        assert!(world.set(e, Position { x: 1.0, y: 2.0 }).unwrap());
        assert_eq!(world.get::<Position>(e), Some(Position { x: 1.0, y: 2.0 }));

        world.set(e, Position { x: 3.0, y: 4.0 }).unwrap();
        assert_eq!(world.get::<Position>(e).unwrap().x, 3.0);
        assert_eq!(world.type_of(e).unwrap().len(), 1);
    }

    #[test]
    fn test_add_without_default_fails() {
        let mut world = World::new();
        let e = world.spawn();
        let err = world.add::<Position>(e).unwrap_err();
        assert!(matches!(err, EcsError::MissingHook { hook: HookKind::Construct, .. }));
        assert!(!world.has::<Position>(e));

        world
            .component_with::<Position>(TypeHooks::default().with_default::<Position>())
            .unwrap();
        assert!(world.add::<Position>(e).unwrap());
        assert_eq!(world.get::<Position>(e), Some(Position::default()));
    }

    #[test]
    fn test_tag_has_no_column() {
        let mut world = World::new();
        let e = world.spawn();
        world.add::<Frozen>(e).unwrap();
        assert!(world.has::<Frozen>(e));
        let table = world.table_of(e).unwrap();
        assert!(world.table(table).unwrap().columns().is_empty());
    }

    #[test]
    fn test_remove_moves_back_and_keeps_others() {
        let mut world = World::new();
        let e = world.spawn();
        let other = world.spawn();
        world.set(e, Position { x: 1.0, y: 0.0 }).unwrap();
        world.set(e, Velocity { x: 5.0, y: 0.0 }).unwrap();
        world.set(other, Position { x: 9.0, y: 0.0 }).unwrap();
        world.set(other, Velocity { x: 9.0, y: 0.0 }).unwrap();

        world.remove::<Velocity>(e).unwrap();
        assert!(!world.has::<Velocity>(e));
        assert_eq!(world.get::<Position>(e).unwrap().x, 1.0);
        assert_eq!(world.get::<Velocity>(other).unwrap().x, 9.0);
    }

    #[test]
    fn test_dead_entity_is_noop() {
        let mut world = World::new();
        let e = world.spawn();
        world.delete(e).unwrap();
        assert!(!world.set(e, Position::default()).unwrap());
        assert!(!world.add::<Frozen>(e).unwrap());
        assert!(!world.delete(e).unwrap());
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let mut world = World::new();
        let e = world.spawn();
        assert!(matches!(world.add_id(e, Id::NULL), Err(EcsError::InvalidId { .. })));
        assert!(matches!(world.add_id(e, WILDCARD), Err(EcsError::InvalidId { .. })));
        assert!(matches!(
            world.add_id(e, pair(CHILD_OF, WILDCARD)),
            Err(EcsError::InvalidId { .. })
        ));
        let dead = world.spawn();
        world.delete(dead).unwrap();
        assert!(matches!(world.add_id(e, dead), Err(EcsError::InvalidId { .. })));
    }

    #[test]
    fn test_builtins_cannot_be_deleted() {
        let mut world = World::new();
        assert!(world.delete(CHILD_OF).is_err());
        assert!(world.is_alive(CHILD_OF));
    }

    #[test]
    fn test_names() {
        let mut world = World::new();
        let a = world.entity_named(b"player");
        assert_eq!(world.entity_named(b"player"), a);
        let b = world.spawn();
        assert!(!world.set_name(b, b"player"));
        assert!(world.set_name(a, b"hero"));
        assert_eq!(world.lookup(b"player"), None);
        world.delete(a).unwrap();
        assert_eq!(world.lookup(b"hero"), None);
    }

    #[test]
    fn test_set_raw_untyped() {
        let mut world = World::new();
        let c = world.spawn();
        world.register(c, ComponentDesc::new("Pod", 8, 4)).unwrap();
        let e = world.spawn();
        let bytes = 7u64.to_le_bytes();
        assert!(world.set_raw(e, c, &bytes).unwrap());
        let ptr = world.get_ptr(e, c).unwrap();
        // SAFETY: 8 initialized bytes
        let stored = unsafe { std::slice::from_raw_parts(ptr, 8) };
        assert_eq!(stored, &bytes);

        let err = world.set_raw(e, c, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, EcsError::SizeMismatch { expected: 8, actual: 4, .. }));
    }

    #[test]
    fn test_register_in_use_id_rejected() {
        let mut world = World::new();
        let tag = world.spawn();
        let e = world.spawn();
        world.add_id(e, tag).unwrap();
        let err = world.register(tag, ComponentDesc::new("Late", 4, 4)).unwrap_err();
        assert!(matches!(err, EcsError::InvalidComponent { .. }));
    }

    #[test]
    fn test_delete_strips_references() {
        let mut world = World::new();
        let likes = world.spawn();
        let bob = world.spawn();
        let alice = world.spawn();
        world.add_pair(alice, likes, bob).unwrap();
        world.add_id(alice, bob).unwrap();
        world.delete(bob).unwrap();
        assert_eq!(world.type_of(alice), Some(&[][..]));

        let carol = world.spawn();
        world.add_pair(carol, likes, alice).unwrap();
        world.delete(likes).unwrap();
        assert_eq!(world.type_of(carol), Some(&[][..]));
    }

    #[test]
    fn test_toggle() {
        let mut world = World::new();
        let e = world.spawn();
        world.set(e, Position::default()).unwrap();
        let position = world.type_entity::<Position>().unwrap();
        assert!(world.is_enabled(e, position));
        world.enable(e, position, false).unwrap();
        assert!(!world.is_enabled(e, position));
        assert!(world.has::<Position>(e));
        world.enable(e, position, true).unwrap();
        assert!(world.is_enabled(e, position));
    }

    #[test]
    fn test_clone_entity() {
        let mut world = World::new();
        world
            .component_with::<Position>(
                TypeHooks::default()
                    .with_clone::<Position>()
                    .with_default::<Position>(),
            )
            .unwrap();
        let src = world.spawn();
        world.set(src, Position { x: 4.0, y: 2.0 }).unwrap();
        world.add::<Frozen>(src).unwrap();

        let copy = world.clone_entity(src, true).unwrap().unwrap();
        assert_eq!(world.get::<Position>(copy), Some(Position { x: 4.0, y: 2.0 }));
        assert!(world.has::<Frozen>(copy));

        let blank = world.clone_entity(src, false).unwrap().unwrap();
        assert_eq!(world.get::<Position>(blank), Some(Position::default()));
        assert_eq!(world.get::<Position>(src), Some(Position { x: 4.0, y: 2.0 }));
    }

    #[test]
    fn test_clone_without_copy_hook_fails() {
        let mut world = World::new();
        let src = world.spawn();
        world.set(src, String::from("x")).unwrap();
        let before = world.entity_count();
        let err = world.clone_entity(src, true).unwrap_err();
        assert!(matches!(err, EcsError::MissingHook { hook: HookKind::CopyConstruct, .. }));
        assert_eq!(world.entity_count(), before);
    }

    #[test]
    fn test_delete_empty_tables() {
        let mut world = World::new();
        let e = world.spawn();
        world.add::<Frozen>(e).unwrap();
        world.remove::<Frozen>(e).unwrap();
        assert!(world.table_count() >= 2);
        assert_eq!(world.delete_empty_tables(), 1);
        assert_eq!(world.table_count(), 1);
        world.add::<Frozen>(e).unwrap();
        assert!(world.has::<Frozen>(e));
    }
}
