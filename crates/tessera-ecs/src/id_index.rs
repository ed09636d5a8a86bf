//! Reverse index from ids to the tables that contain them.
//!
//! Every table is registered under each id of its type and under the
//! wildcard patterns that id matches, so a query can find its candidate
//! tables with one lookup: `(R, T)` is reachable through `(R, T)`, `(R, *)`,
//! `(*, T)` and `(*, *)`, a plain id through itself and `*`.

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::{
    id::{ANY, Id, IdFlags, WILDCARD, pair},
    table::{Table, TableId},
};

/// Where an id (or pattern) occurs in one table's type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableRecord {
    pub table: TableId,
    /// First matching position in the table's type.
    pub index: usize,
    /// Number of matching ids in the table's type.
    pub count: usize,
}

/// All tables containing one id.
#[derive(Debug, Default)]
pub struct IdRecord {
    tables: Vec<TableRecord>,
    positions: HashMap<TableId, usize, FxBuildHasher>,
}

impl IdRecord {
    #[must_use]
    pub fn tables(&self) -> &[TableRecord] {
        &self.tables
    }

    #[must_use]
    pub fn get(&self, table: TableId) -> Option<&TableRecord> {
        self.positions.get(&table).map(|&i| &self.tables[i])
    }

    fn insert(&mut self, table: TableId, index: usize) {
        if let Some(&pos) = self.positions.get(&table) {
            self.tables[pos].count += 1;
        } else {
            self.positions.insert(table, self.tables.len());
            self.tables.push(TableRecord {
                table,
                index,
                count: 1,
            });
        }
    }

    fn remove(&mut self, table: TableId) {
        let Some(pos) = self.positions.remove(&table) else {
            return;
        };
        self.tables.swap_remove(pos);
        if let Some(moved) = self.tables.get(pos) {
            self.positions.insert(moved.table, pos);
        }
    }
}

/// Index from ids and patterns to tables.
#[derive(Debug, Default)]
pub struct IdIndex {
    records: HashMap<Id, IdRecord, FxBuildHasher>,
}

/// Keys a concrete id is registered under.
fn patterns(id: Id) -> SmallVec<[Id; 4]> {
    if id.flags().intersects(IdFlags::TOGGLE | IdFlags::AUTO_OVERRIDE) {
        return SmallVec::from_slice(&[id]);
    }
    if id.is_pair() {
        let (first, second) = (id.first(), id.second());
        SmallVec::from_slice(&[
            id,
            pair(first, WILDCARD),
            pair(WILDCARD, second),
            pair(WILDCARD, WILDCARD),
        ])
    } else {
        SmallVec::from_slice(&[id, WILDCARD.id()])
    }
}

/// `_` is stored under the `*` key.
fn normalize(id: Id) -> Id {
    if !id.is_any() {
        return id;
    }
    if id.is_pair() {
        let half = |e: crate::id::Entity| if e.index() == ANY.index() { WILDCARD } else { e };
        pair(half(id.first()), half(id.second()))
    } else {
        WILDCARD.id()
    }
}

impl IdIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly created table.
    pub fn register_table(&mut self, table: &Table) {
        for (index, &id) in table.ids().iter().enumerate() {
            for key in patterns(id) {
                self.records.entry(key).or_default().insert(table.id(), index);
            }
        }
    }

    /// Remove a deleted table.
    pub fn unregister_table(&mut self, table: &Table) {
        for &id in table.ids() {
            for key in patterns(id) {
                if let Some(record) = self.records.get_mut(&key) {
                    record.remove(table.id());
                    if record.tables.is_empty() {
                        self.records.remove(&key);
                    }
                }
            }
        }
    }

    /// Record for an id or pattern.
    #[must_use]
    pub fn get(&self, id: Id) -> Option<&IdRecord> {
        self.records.get(&normalize(id))
    }

    /// Tables whose type contains an id matching `id`.
    #[must_use]
    pub fn tables_for(&self, id: Id) -> &[TableRecord] {
        self.get(id).map_or(&[], IdRecord::tables)
    }

    /// Whether any table uses `id`.
    #[must_use]
    pub fn contains(&self, id: Id) -> bool {
        self.get(id).is_some()
    }
}
