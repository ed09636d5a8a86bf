//! Query iteration.
//!
//! An iterator walks batches: contiguous row ranges of one table for one
//! combination of matched ids. The table of the current batch is locked
//! against structural changes until the iterator moves on, finishes or is
//! dropped.

use std::{any::Any, cmp::Ordering, fmt, sync::Arc};

use smallvec::SmallVec;

use super::{
    Field, FieldMut, InOut, OrderBy, QueryCacheId, QueryPlan, RawField, TermOper, Traversal,
    matcher::{self, FieldMatch, TableMatch},
};
use crate::{
    World,
    component::TypeInfo,
    defer::Commands,
    id::{Entity, Id},
    storage::{Bitset, Column},
    table::{Table, TableId},
};

/// A row range of one table with one combination of field matches.
#[derive(Clone, Debug)]
pub(crate) struct Batch {
    pub table: Option<TableId>,
    pub offset: usize,
    pub count: usize,
    pub fields: SmallVec<[FieldMatch; 8]>,
    pub group: u64,
}

/// Event an observer is invoked for.
#[derive(Clone, Copy)]
pub(crate) struct EventContext<'a> {
    pub event: Entity,
    pub id: Id,
    pub param: Option<&'a (dyn Any + Send + Sync)>,
}

/// Iterator over the batches of a query.
///
/// Call [`QueryIter::next`] to advance; it returns `false` when done. Field
/// accessors refer to the current batch.
pub struct QueryIter<'w> {
    world: &'w World,
    plan: Arc<QueryPlan>,
    cache: Option<QueryCacheId>,
    batches: Option<std::vec::IntoIter<Batch>>,
    current: Option<Batch>,
    locked: Option<TableId>,
    page: Option<(usize, usize)>,
    worker: Option<(usize, usize)>,
    group: Option<u64>,
    event: Option<EventContext<'w>>,
}

impl<'w> QueryIter<'w> {
    pub(crate) fn new(world: &'w World, plan: Arc<QueryPlan>, cache: Option<QueryCacheId>) -> Self {
        Self {
            world,
            plan,
            cache,
            batches: None,
            current: None,
            locked: None,
            page: None,
            worker: None,
            group: None,
            event: None,
        }
    }

    /// An iterator already positioned on `batch`, for observers.
    pub(crate) fn for_event(
        world: &'w World,
        plan: Arc<QueryPlan>,
        batch: Batch,
        event: EventContext<'w>,
    ) -> Self {
        let mut it = Self::new(world, plan, None);
        it.batches = Some(Vec::new().into_iter());
        it.lock(batch.table);
        it.current = Some(batch);
        it.event = Some(event);
        it
    }

    /// Only yield rows `offset..offset + limit` of the full result.
    #[must_use]
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.page = Some((offset, limit));
        self
    }

    /// Only yield the share of each table assigned to worker `index` out of
    /// `count`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= count`.
    #[must_use]
    pub fn worker(mut self, index: usize, count: usize) -> Self {
        assert!(index < count, "worker index {index} out of range for {count} workers");
        self.worker = Some((index, count));
        self
    }

    /// Only yield tables of group `group`.
    #[must_use]
    pub fn set_group(mut self, group: u64) -> Self {
        self.group = Some(group);
        self
    }

    /// Advance to the next batch.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        if self.batches.is_none() {
            self.batches = Some(self.collect().into_iter());
        }
        self.release();
        let next = self.batches.as_mut().and_then(Iterator::next);
        match next {
            Some(batch) => {
                self.lock(batch.table);
                self.current = Some(batch);
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    /// Finish iterating early, releasing the current table.
    pub fn fini(self) {}

    fn lock(&mut self, table: Option<TableId>) {
        if let Some(table) = table.and_then(|t| self.world.table(t)) {
            table.lock();
            self.locked = Some(table.id());
        }
    }

    fn release(&mut self) {
        if let Some(table) = self.locked.take().and_then(|t| self.world.table(t)) {
            table.unlock();
        }
    }

    fn batch(&self) -> &Batch {
        let Some(batch) = &self.current else {
            panic!("no current batch: call next() first");
        };
        batch
    }

    // ==================== Batch Info ====================

    /// Number of rows in the current batch.
    #[must_use]
    pub fn count(&self) -> usize {
        self.current.as_ref().map_or(0, |b| b.count)
    }

    /// Entities of the current batch.
    #[must_use]
    pub fn entities(&self) -> &'w [Entity] {
        let Some(batch) = &self.current else {
            return &[];
        };
        match batch.table.and_then(|t| self.world.table(t)) {
            Some(table) => &table.entities()[batch.offset..batch.offset + batch.count],
            None => &[],
        }
    }

    /// Entity at row `index` of the current batch.
    ///
    /// # Panics
    ///
    /// Panics if `index >= count()`.
    #[must_use]
    pub fn entity(&self, index: usize) -> Entity {
        self.entities()[index]
    }

    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        self.current.as_ref().and_then(|b| b.table)
    }

    #[must_use]
    pub fn table(&self) -> Option<&'w Table> {
        self.table_id().and_then(|t| self.world.table(t))
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.plan.field_count
    }

    fn field_match(&self, index: usize) -> &FieldMatch {
        let batch = self.batch();
        assert!(
            index < batch.fields.len(),
            "field index {index} out of range ({} fields)",
            batch.fields.len()
        );
        &batch.fields[index]
    }

    /// Id matched by field `index`. For wildcard terms this is the concrete
    /// id of the current combination.
    #[must_use]
    pub fn id(&self, index: usize) -> Id {
        self.field_match(index).id
    }

    /// Entity field `index` was matched on, `Entity::NULL` for the iterated
    /// rows themselves.
    #[must_use]
    pub fn src(&self, index: usize) -> Entity {
        self.field_match(index).src
    }

    #[must_use]
    pub fn is_self(&self, index: usize) -> bool {
        self.field_match(index).is_self()
    }

    /// Whether field `index` matched. Always true for `And` fields, false
    /// for `Not` fields and absent `Optional` fields.
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        self.field_match(index).set
    }

    /// Group of the current table, 0 without `group_by`.
    #[must_use]
    pub fn group_id(&self) -> u64 {
        self.current.as_ref().map_or(0, |b| b.group)
    }

    #[must_use]
    pub fn world(&self) -> &'w World {
        self.world
    }

    /// Commands applied when the world leaves its deferred scope.
    #[must_use]
    pub fn commands(&self) -> Commands<'w> {
        Commands::new(self.world)
    }

    // ==================== Event Info ====================

    /// Event being observed, `Entity::NULL` outside observers.
    #[must_use]
    pub fn event(&self) -> Entity {
        self.event.map_or(Entity::NULL, |e| e.event)
    }

    /// Id the event was emitted for.
    #[must_use]
    pub fn event_id(&self) -> Id {
        self.event.map_or(Id::NULL, |e| e.id)
    }

    /// Payload passed with the event.
    #[must_use]
    pub fn param<T: 'static>(&self) -> Option<&'w T> {
        self.event?.param?.downcast_ref::<T>()
    }

    // ==================== Field Access ====================

    fn field_column(&self, index: usize) -> Option<(&'w Column, *mut u8, usize, bool)> {
        let fm = *self.field_match(index);
        if !fm.set {
            return None;
        }
        let column = self.world.table(fm.table?)?.column(fm.column?)?;
        if fm.is_self() {
            let batch = self.batch();
            let ptr = column
                .as_ptr()
                .wrapping_add(batch.offset * column.info().size());
            Some((column, ptr, batch.count, false))
        } else {
            Some((column, column.get_raw(fm.row)?, 1, true))
        }
    }

    /// Shared access to field `index`.
    ///
    /// Returns `None` if the field is not set or carries no data.
    ///
    /// # Panics
    ///
    /// Panics if the field does not hold `T` or is borrowed mutably.
    #[must_use]
    pub fn field<T: 'static>(&self, index: usize) -> Option<Field<'_, T>> {
        let (column, ptr, count, shared) = self.field_column(index)?;
        check_type::<T>(column.info(), index);
        assert!(
            column.borrow().try_read(),
            "field {index} ({}) is already borrowed mutably",
            column.info().name()
        );
        // SAFETY: the column holds `count` initialized `T` from `ptr`, and
        // the borrow flag excludes writers
        let data = unsafe { std::slice::from_raw_parts(ptr.cast::<T>(), count) };
        Some(Field::new(data, column.borrow(), shared))
    }

    /// Exclusive access to field `index`.
    ///
    /// Returns `None` if the field is not set or carries no data.
    ///
    /// # Panics
    ///
    /// Panics if the field does not hold `T`, is shared, is declared `In`,
    /// or is already borrowed.
    #[must_use]
    pub fn field_mut<T: 'static>(&self, index: usize) -> Option<FieldMut<'_, T>> {
        let term = self.plan.terms[self.plan.first_term_of(index)];
        assert!(term.inout != InOut::In, "field {index} is read-only");
        let (column, ptr, count, shared) = self.field_column(index)?;
        check_type::<T>(column.info(), index);
        assert!(!shared, "field {index} is shared and cannot be borrowed mutably");
        assert!(
            column.borrow().try_write(),
            "field {index} ({}) is already borrowed",
            column.info().name()
        );
        // SAFETY: the column holds `count` initialized `T` from `ptr`, and
        // the borrow flag excludes other readers and writers
        let data = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<T>(), count) };
        Some(FieldMut::new(data, column.borrow()))
    }

    /// Untyped access to field `index`.
    #[must_use]
    pub fn field_raw(&self, index: usize) -> Option<RawField<'w>> {
        let (column, ptr, count, shared) = self.field_column(index)?;
        Some(RawField::new(ptr, count, column.info(), shared))
    }

    // ==================== Batch Collection ====================

    fn collect(&self) -> Vec<Batch> {
        let world = self.world;
        let plan = &*self.plan;

        if !plan.has_this {
            let Some(m) = matcher::match_table(world, plan, None) else {
                return Vec::new();
            };
            return (0..m.permutations())
                .map(|n| Batch {
                    table: None,
                    offset: 0,
                    count: 0,
                    fields: m.permutation(n),
                    group: 0,
                })
                .collect();
        }

        let matches: Vec<TableMatch> = match self.cache.and_then(|id| world.query_cache(id)) {
            Some(cache) => cache
                .entries()
                .iter()
                .filter_map(|m| {
                    let table = world.table(m.table?)?;
                    if table.is_empty() {
                        return None;
                    }
                    matcher::match_dynamic(world, plan, Some(table), m.clone())
                })
                .collect(),
            None => self
                .candidate_tables()
                .into_iter()
                .filter(|t| !t.is_empty())
                .filter_map(|t| matcher::match_table(world, plan, Some(t)))
                .collect(),
        };

        let mut keyed: Vec<(u64, usize, TableMatch)> = matches
            .into_iter()
            .filter_map(|m| {
                let table = world.table(m.table?)?;
                let group = plan.group_by.as_ref().map_or(0, |g| g.group_of(world, table));
                if self.group.is_some_and(|g| g != group) {
                    return None;
                }
                let depth = plan
                    .cascade
                    .map_or(0, |i| world.table_depth(table, plan.terms[i].trav_rel));
                Some((group, depth, m))
            })
            .collect();

        if plan.group_by.is_some() || plan.cascade.is_some() {
            let desc = plan
                .cascade
                .is_some_and(|i| plan.terms[i].trav.contains(Traversal::DESC));
            keyed.sort_by(|a, b| {
                let depth = if desc { b.1.cmp(&a.1) } else { a.1.cmp(&b.1) };
                a.0.cmp(&b.0).then(depth)
            });
        }

        let mut batches = Vec::new();
        for (group, _, m) in keyed {
            let Some(table) = m.table.and_then(|t| world.table(t)) else {
                continue;
            };
            for n in 0..m.permutations() {
                self.push_runs(table, m.permutation(n), group, &mut batches);
            }
        }

        if let Some(order) = &plan.order_by {
            batches = order_batches(world, batches, order);
        }
        if let Some((index, count)) = self.worker {
            batches = split_for_worker(batches, index, count);
        }
        if let Some((offset, limit)) = self.page {
            paginate(&mut batches, offset, limit);
        }
        batches
    }

    /// Tables worth matching: those holding the first static `And` id, or
    /// every table.
    fn candidate_tables(&self) -> Vec<&'w Table> {
        let world = self.world;
        let anchor = self
            .plan
            .terms
            .iter()
            .find(|t| t.is_static() && t.oper == TermOper::And);
        match anchor {
            Some(term) => world
                .id_index()
                .tables_for(term.id)
                .iter()
                .filter_map(|r| world.table(r.table))
                .collect(),
            None => world.tables().collect(),
        }
    }

    /// Split a table into runs of rows whose toggled fields are enabled.
    fn push_runs(
        &self,
        table: &Table,
        fields: SmallVec<[FieldMatch; 8]>,
        group: u64,
        out: &mut Vec<Batch>,
    ) {
        let toggles: SmallVec<[&Bitset; 4]> = if table.has_toggles() {
            fields
                .iter()
                .enumerate()
                .filter(|(f, fm)| {
                    let term = &self.plan.terms[self.plan.first_term_of(*f)];
                    matches!(term.oper, TermOper::And | TermOper::Or) && fm.set && fm.is_self()
                })
                .filter_map(|(_, fm)| table.toggle(fm.id))
                .collect()
        } else {
            SmallVec::new()
        };

        let batch = |offset, count| Batch {
            table: Some(table.id()),
            offset,
            count,
            fields: fields.clone(),
            group,
        };
        if toggles.is_empty() {
            out.push(batch(0, table.len()));
            return;
        }

        let mut start = None;
        for row in 0..table.len() {
            let enabled = toggles.iter().all(|bits| bits.get(row));
            match (enabled, start) {
                (true, None) => start = Some(row),
                (false, Some(s)) => {
                    out.push(batch(s, row - s));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            out.push(batch(s, table.len() - s));
        }
    }
}

fn check_type<T: 'static>(info: &TypeInfo, index: usize) {
    let ok = if info.type_id().is_some() {
        info.is::<T>()
    } else {
        info.size() == std::mem::size_of::<T>()
            && info.align() % std::mem::align_of::<T>() == 0
    };
    assert!(
        ok,
        "field {index} holds {}, not {}",
        info.name(),
        std::any::type_name::<T>()
    );
}

/// Reorder rows by the `order_by` component and regroup them into
/// contiguous table slices. Storage is not touched.
fn order_batches(world: &World, batches: Vec<Batch>, order: &OrderBy) -> Vec<Batch> {
    let mut rows: Vec<(usize, usize, *const u8)> = Vec::new();
    for (index, batch) in batches.iter().enumerate() {
        let table = batch.table.and_then(|t| world.table(t));
        for row in batch.offset..batch.offset + batch.count {
            let value = table
                .and_then(|t| t.get_ptr(order.id, row))
                .map_or(std::ptr::null(), |p| p.cast_const());
            rows.push((index, row, value));
        }
    }
    rows.sort_by(|a, b| match (a.2.is_null(), b.2.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => (order.cmp)(a.2, b.2),
    });

    let mut out: Vec<Batch> = Vec::new();
    let mut last: Option<(usize, usize)> = None;
    for (index, row, _) in rows {
        if let (Some((last_index, last_row)), Some(current)) = (last, out.last_mut()) {
            if last_index == index && last_row + 1 == row {
                current.count += 1;
                last = Some((index, row));
                continue;
            }
        }
        out.push(Batch {
            offset: row,
            count: 1,
            ..batches[index].clone()
        });
        last = Some((index, row));
    }
    out
}

fn split_for_worker(batches: Vec<Batch>, index: usize, count: usize) -> Vec<Batch> {
    batches
        .into_iter()
        .filter_map(|mut batch| {
            let start = batch.count * index / count;
            let end = batch.count * (index + 1) / count;
            (start < end).then(|| {
                batch.offset += start;
                batch.count = end - start;
                batch
            })
        })
        .collect()
}

fn paginate(batches: &mut Vec<Batch>, offset: usize, limit: usize) {
    let mut skip = offset;
    let mut remaining = limit;
    batches.retain_mut(|batch| {
        if remaining == 0 {
            return false;
        }
        if skip >= batch.count {
            skip -= batch.count;
            return false;
        }
        batch.offset += skip;
        batch.count -= skip;
        skip = 0;
        batch.count = batch.count.min(remaining);
        remaining -= batch.count;
        true
    });
}

impl Drop for QueryIter<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for QueryIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryIter")
            .field("table", &self.table_id())
            .field("count", &self.count())
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;

    fn batch(offset: usize, count: usize) -> Batch {
        Batch {
            table: Some(TableId::from_raw(1)),
            offset,
            count,
            fields: smallvec![],
            group: 0,
        }
    }

    #[test]
    fn test_paginate_across_batches() {
        let mut batches = vec![batch(0, 3), batch(0, 4), batch(0, 5)];
        paginate(&mut batches, 5, 4);
        let ranges: Vec<_> = batches.iter().map(|b| (b.offset, b.count)).collect();
        assert_eq!(ranges, vec![(2, 2), (0, 2)]);
    }

    #[test]
    fn test_worker_split_covers_table_once() {
        let batches = vec![batch(0, 10)];
        let mut covered = Vec::new();
        for index in 0..3 {
            for b in split_for_worker(batches.clone(), index, 3) {
                covered.extend(b.offset..b.offset + b.count);
            }
        }
        assert_eq!(covered, (0..10).collect::<Vec<_>>());
    }
}
