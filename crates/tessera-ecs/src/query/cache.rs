//! Cached queries.
//!
//! A cache keeps the static part of a query's match for every table, so
//! iteration skips the table scan. Table types never change, so the cache
//! only has to react to tables being created and deleted.

use std::sync::Arc;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use super::{
    QueryPlan,
    matcher::{self, TableMatch},
};
use crate::{
    World,
    table::{Table, TableId},
};

/// Handle of a query cache stored in a world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct QueryCacheId(pub(crate) u32);

/// Matched tables of one cached query.
#[derive(Debug)]
pub(crate) struct QueryCache {
    plan: Arc<QueryPlan>,
    entries: Vec<TableMatch>,
    /// Position of each table in `entries`.
    index: HashMap<TableId, usize, FxBuildHasher>,
}

impl QueryCache {
    /// Build a cache by matching every existing table.
    pub(crate) fn new(world: &World, plan: Arc<QueryPlan>) -> Self {
        let mut cache = Self {
            plan,
            entries: Vec::new(),
            index: HashMap::default(),
        };
        for table in world.tables() {
            cache.table_created(world, table);
        }
        cache
    }

    pub(crate) fn plan(&self) -> &Arc<QueryPlan> {
        &self.plan
    }

    pub(crate) fn entries(&self) -> &[TableMatch] {
        &self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn table_created(&mut self, world: &World, table: &Table) {
        if !self.plan.has_this || self.index.contains_key(&table.id()) {
            return;
        }
        if let Some(m) = matcher::match_static(world, &self.plan, Some(table)) {
            self.index.insert(table.id(), self.entries.len());
            self.entries.push(m);
        }
    }

    pub(crate) fn table_deleted(&mut self, table: TableId) {
        let Some(pos) = self.index.remove(&table) else {
            return;
        };
        self.entries.swap_remove(pos);
        if let Some(moved) = self.entries.get(pos).and_then(|m| m.table) {
            self.index.insert(moved, pos);
        }
    }
}
