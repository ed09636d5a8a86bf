//! Entity index with generation tracking.
//!
//! Maps each entity slot to its current generation and its location
//! (table and row). Slots are recycled through a free list; recycling bumps
//! the generation so stale handles stop resolving.
//!
//! Ids can also be reserved through `&self`. A reserved slot stays pending
//! until the deferred spawn that reserved it is applied, or until the queue
//! holding that spawn is dropped and the slot is handed back through
//! [`ReleasedIds`].

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::{
    id::{Entity, EntityId, Generation},
    table::TableId,
};

/// Location of an entity's row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityRecord {
    pub table: TableId,
    pub row: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Reserved, not yet alive.
    Pending,
    Alive(EntityRecord),
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    generation: Generation,
    state: SlotState,
}

/// Reserved ids whose spawn will never be applied.
#[derive(Debug, Default)]
pub struct ReleasedIds {
    len: AtomicUsize,
    ids: Mutex<Vec<Entity>>,
}

impl ReleasedIds {
    pub fn push(&self, entity: Entity) {
        self.ids.lock().push(entity);
        self.len.fetch_add(1, Ordering::Release);
    }

    fn take(&self) -> Vec<Entity> {
        if self.len.load(Ordering::Acquire) == 0 {
            return Vec::new();
        }
        let ids = std::mem::take(&mut *self.ids.lock());
        self.len.fetch_sub(ids.len(), Ordering::Release);
        ids
    }
}

/// Entity index: slot generations, locations and the free list.
#[derive(Debug)]
pub struct EntityIndex {
    slots: Vec<Slot>,
    free_list: Vec<EntityId>,
    /// Next never-used slot. Shared with `reserve`.
    next_fresh: AtomicU32,
    released: Arc<ReleasedIds>,
    alive_count: u32,
}

impl EntityIndex {
    /// Create an index whose first `reserved` slots are held back for
    /// built-in entities.
    #[must_use]
    pub fn new(reserved: EntityId, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.max(reserved as usize));
        slots.resize(
            reserved as usize,
            Slot {
                generation: Generation::new(),
                state: SlotState::Pending,
            },
        );
        Self {
            slots,
            free_list: Vec::new(),
            next_fresh: AtomicU32::new(reserved),
            released: Arc::default(),
            alive_count: 0,
        }
    }

    /// Allocate a new entity. Its record must be set before it is read.
    pub fn create(&mut self) -> Entity {
        self.reclaim();
        self.alive_count += 1;
        if let Some(index) = self.free_list.pop() {
            // Reuse a recycled slot
            let slot = &mut self.slots[index as usize];
            slot.state = SlotState::Alive(EntityRecord {
                table: TableId::ROOT,
                row: usize::MAX,
            });
            return Entity::new(index, slot.generation);
        }
        let index = self.next_fresh.fetch_add(1, Ordering::Relaxed);
        self.ensure_slot(index);
        self.slots[index as usize].state = SlotState::Alive(EntityRecord {
            table: TableId::ROOT,
            row: usize::MAX,
        });
        Entity::new(index, Generation::new())
    }

    /// Reserve an entity id without making it alive.
    pub fn reserve(&self) -> Entity {
        let index = self.next_fresh.fetch_add(1, Ordering::Relaxed);
        Entity::new(index, Generation::new())
    }

    /// Make a reserved (or built-in) entity alive. Returns false if it is
    /// already alive or the slot was recycled.
    pub fn materialize(&mut self, entity: Entity) -> bool {
        self.ensure_slot(entity.index());
        let slot = &mut self.slots[entity.index() as usize];
        if slot.generation != entity.generation() || slot.state != SlotState::Pending {
            return false;
        }
        slot.state = SlotState::Alive(EntityRecord {
            table: TableId::ROOT,
            row: usize::MAX,
        });
        self.alive_count += 1;
        true
    }

    /// Where dropped queues hand back the ids they reserved.
    #[must_use]
    pub const fn released(&self) -> &Arc<ReleasedIds> {
        &self.released
    }

    /// Free reserved slots whose spawn was dropped. Their generation moves
    /// on, so the abandoned handles never become alive.
    pub fn reclaim(&mut self) -> usize {
        let released = self.released.take();
        let mut freed = 0;
        for entity in released {
            self.ensure_slot(entity.index());
            let slot = &mut self.slots[entity.index() as usize];
            if slot.generation != entity.generation() || slot.state != SlotState::Pending {
                continue;
            }
            slot.generation = slot.generation.next();
            slot.state = SlotState::Free;
            self.free_list.push(entity.index());
            freed += 1;
        }
        freed
    }

    fn ensure_slot(&mut self, index: EntityId) {
        let index = index as usize;
        if index >= self.slots.len() {
            // Slots skipped over were reserved by someone else
            self.slots.resize(
                index + 1,
                Slot {
                    generation: Generation::new(),
                    state: SlotState::Pending,
                },
            );
        }
    }

    /// Free an entity's slot. Returns its last record if it was alive.
    pub fn delete(&mut self, entity: Entity) -> Option<EntityRecord> {
        let record = self.get(entity)?;
        let slot = &mut self.slots[entity.index() as usize];
        // Increment generation to invalidate existing references
        slot.generation = slot.generation.next();
        slot.state = SlotState::Free;
        self.free_list.push(entity.index());
        self.alive_count -= 1;
        Some(record)
    }

    /// Location of a live entity.
    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<EntityRecord> {
        let slot = self.slots.get(entity.index() as usize)?;
        match slot.state {
            SlotState::Alive(record) if slot.generation == entity.generation() => Some(record),
            _ => None,
        }
    }

    /// Update the location of a live entity.
    ///
    /// # Panics
    ///
    /// Panics if the entity is not alive.
    pub fn set(&mut self, entity: Entity, record: EntityRecord) {
        let slot = &mut self.slots[entity.index() as usize];
        assert!(
            slot.generation == entity.generation() && matches!(slot.state, SlotState::Alive(_)),
            "set_record on dead entity {entity}"
        );
        slot.state = SlotState::Alive(record);
    }

    /// Update only the row of a live entity.
    pub fn set_row(&mut self, entity: Entity, row: usize) {
        if let Some(record) = self.get(entity) {
            self.set(entity, EntityRecord { row, ..record });
        }
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// The live entity currently occupying slot `index`, if any.
    #[must_use]
    pub fn current(&self, index: EntityId) -> Option<Entity> {
        let slot = self.slots.get(index as usize)?;
        matches!(slot.state, SlotState::Alive(_)).then(|| Entity::new(index, slot.generation))
    }

    /// Get the number of currently alive entities.
    #[must_use]
    pub const fn alive_count(&self) -> u32 {
        self.alive_count
    }

    /// Get the total number of slots (including recycled ones).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_allocation() {
        let mut index = EntityIndex::new(0, 0);

        let e1 = index.create();
        let e2 = index.create();

        assert_eq!(e1.index(), 0);
        assert_eq!(e2.index(), 1);
        assert!(index.is_alive(e1));
        assert!(index.is_alive(e2));
        assert_eq!(index.alive_count(), 2);
    }

    #[test]
    fn test_entity_deletion_recycles() {
        let mut index = EntityIndex::new(8, 0);

        let e1 = index.create();
        assert_eq!(e1.index(), 8);
        assert!(index.delete(e1).is_some());
        assert!(!index.is_alive(e1));
        assert!(index.delete(e1).is_none());
        assert_eq!(index.alive_count(), 0);

        // New allocation reuses the slot but with incremented generation
        let e2 = index.create();
        assert_eq!(e2.index(), e1.index());
        assert_ne!(e2.generation(), e1.generation());
        assert_eq!(index.current(e1.index()), Some(e2));
    }

    #[test]
    fn test_reserve_then_materialize() {
        let mut index = EntityIndex::new(0, 0);
        let reserved = index.reserve();
        assert!(!index.is_alive(reserved));

        let created = index.create();
        assert_ne!(created.index(), reserved.index());

        assert!(index.materialize(reserved));
        assert!(!index.materialize(reserved));
        assert!(index.is_alive(reserved));
        assert_eq!(index.alive_count(), 2);
    }

    #[test]
    fn test_released_reservation_is_recycled() {
        let mut index = EntityIndex::new(0, 0);
        let reserved = index.reserve();
        index.released().push(reserved);
        assert_eq!(index.reclaim(), 1);
        assert_eq!(index.reclaim(), 0);

        let created = index.create();
        assert_eq!(created.index(), reserved.index());
        assert_ne!(created.generation(), reserved.generation());
        assert!(!index.materialize(reserved));
        assert!(!index.is_alive(reserved));
    }

    #[test]
    fn test_released_after_materialize_is_ignored() {
        let mut index = EntityIndex::new(0, 0);
        let reserved = index.reserve();
        assert!(index.materialize(reserved));
        index.released().push(reserved);
        assert_eq!(index.reclaim(), 0);
        assert!(index.is_alive(reserved));
    }

    #[test]
    fn test_records() {
        let mut index = EntityIndex::new(0, 0);
        let e = index.create();
        let record = EntityRecord {
            table: TableId::from_raw(3),
            row: 7,
        };
        index.set(e, record);
        assert_eq!(index.get(e), Some(record));
        index.set_row(e, 2);
        assert_eq!(index.get(e).unwrap().row, 2);
    }
}
