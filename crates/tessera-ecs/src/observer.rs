//! Observer system for handling events.
//!
//! An observer is a query bound to one or more events. When an event is
//! emitted for a table, every observer listening for it whose query matches
//! the table runs inline, in registration order, with an iterator positioned
//! on the affected rows. The table stays locked while observers run.
//!
//! ```ignore
//! let query = world.query().with::<Position>().build()?;
//! let id = world.observe(Observer::new(&query, |it| {
//!     for e in it.entities() {
//!         println!("{e} got a position");
//!     }
//! }).event(ON_ADD))?;
//! ```

use std::{
    any::Any,
    fmt,
    sync::{Arc, atomic::Ordering},
};

use smallvec::SmallVec;
use tracing::debug;

use crate::{
    World,
    command::Command,
    error::{EcsError, EcsResult},
    event::{EventDesc, EventTarget, QueuedEvent},
    id::{Entity, Id, ON_ADD, ON_REMOVE, ON_SET, WILDCARD},
    query::{Batch, EventContext, Query, QueryIter, QueryPlan, Term, TermOper, Traversal},
    table::TableId,
};

/// Unique identifier for a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u32);

impl ObserverId {
    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Type-erased observer callback.
pub type ObserverFn = Arc<dyn Fn(&mut QueryIter<'_>) + Send + Sync>;

/// An observer ready to be registered with [`World::observe`].
pub struct Observer {
    plan: Arc<QueryPlan>,
    events: SmallVec<[Entity; 2]>,
    callback: ObserverFn,
    yield_existing: bool,
}

impl Observer {
    /// Observe the rows matched by `query`. Add events with
    /// [`event`](Self::event).
    pub fn new(query: &Query, callback: impl Fn(&mut QueryIter<'_>) + Send + Sync + 'static) -> Self {
        Self {
            plan: query.plan_arc().clone(),
            events: SmallVec::new(),
            callback: Arc::new(callback),
            yield_existing: false,
        }
    }

    /// Listen for `event`. `WILDCARD` listens for every event.
    #[must_use]
    pub fn event(mut self, event: Entity) -> Self {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
        self
    }

    /// On registration, invoke the observer for rows that already match
    /// (as `OnAdd`/`OnSet`); on removal, invoke it again as `OnRemove`.
    #[must_use]
    pub const fn yield_existing(mut self) -> Self {
        self.yield_existing = true;
        self
    }

    #[must_use]
    pub fn events(&self) -> &[Entity] {
        &self.events
    }

    fn listens(&self, event: Entity) -> bool {
        self.events.iter().any(|&e| e == event || e == WILDCARD)
    }

    /// Term index that `id` triggers, if any.
    fn trigger_term(&self, id: Id) -> Option<usize> {
        self.plan.terms().iter().position(|term| triggers(term, id))
    }
}

fn triggers(term: &Term, id: Id) -> bool {
    term.is_this()
        && term.trav.contains(Traversal::SELF)
        && matches!(term.oper, TermOper::And | TermOper::Or | TermOper::Optional)
        && id.matches(term.id)
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("events", &self.events)
            .field("terms", &self.plan.terms())
            .field("yield_existing", &self.yield_existing)
            .finish_non_exhaustive()
    }
}

// ==================== World Integration ====================

impl World {
    /// Register an observer. Deferred while the world is deferred; the
    /// returned id is valid immediately.
    pub fn observe(&mut self, observer: Observer) -> EcsResult<ObserverId> {
        if observer.events.is_empty() {
            return Err(EcsError::InvalidTerm {
                index: 0,
                reason: "observer has no events",
            });
        }
        if !observer.plan.has_this {
            return Err(EcsError::InvalidTerm {
                index: 0,
                reason: "observer query needs a $this term",
            });
        }
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        if self.is_deferred() {
            self.deferred.lock().push(Command::Observe {
                id,
                observer: Box::new(observer),
            });
            return Ok(id);
        }
        self.defer_begin();
        self.register_observer(id, observer);
        self.defer_end();
        Ok(id)
    }

    /// Remove an observer.
    pub fn unobserve(&mut self, id: ObserverId) -> EcsResult<()> {
        if self.is_deferred() {
            self.deferred.lock().push(Command::Unobserve { id });
            return Ok(());
        }
        if !self.observers.iter().any(|(oid, _)| *oid == id) {
            return Err(EcsError::UnknownObserver(id.0));
        }
        self.defer_begin();
        self.unregister_observer(id);
        self.defer_end();
        Ok(())
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn register_observer(&mut self, id: ObserverId, observer: Observer) {
        debug!(observer = id.0, events = ?observer.events, "registered observer");
        let replay = observer.yield_existing;
        self.observers.push((id, observer));
        if replay {
            self.replay_existing(id, &[ON_ADD, ON_SET]);
        }
    }

    pub(crate) fn unregister_observer(&mut self, id: ObserverId) -> bool {
        let Some(pos) = self.observers.iter().position(|(oid, _)| *oid == id) else {
            return false;
        };
        if self.observers[pos].1.yield_existing {
            self.replay_existing(id, &[ON_REMOVE]);
        }
        self.observers.remove(pos);
        debug!(observer = id.0, "unregistered observer");
        true
    }

    /// Invoke observer `id` for every non-empty table it matches.
    fn replay_existing(&self, id: ObserverId, events: &[Entity]) {
        let Some((_, observer)) = self.observers.iter().find(|(oid, _)| *oid == id) else {
            return;
        };
        for &event in events.iter().filter(|&&e| observer.listens(e)) {
            for table in self.tables().filter(|t| !t.is_empty()) {
                let Some(m) = crate::query::match_table(self, &observer.plan, Some(table)) else {
                    continue;
                };
                for n in 0..m.permutations() {
                    let fields = m.permutation(n);
                    let trigger = observer
                        .plan
                        .terms()
                        .iter()
                        .position(|t| triggers(t, t.id))
                        .map_or(Id::NULL, |k| fields[observer.plan.field_of(k)].id);
                    let batch = Batch {
                        table: Some(table.id()),
                        offset: 0,
                        count: table.len(),
                        fields,
                        group: 0,
                    };
                    let context = EventContext {
                        event,
                        id: trigger,
                        param: None,
                    };
                    let mut it = QueryIter::for_event(self, observer.plan.clone(), batch, context);
                    (observer.callback)(&mut it);
                }
            }
        }
    }

    /// Invoke observers of `event` for rows `offset..offset + count` of
    /// `table`.
    pub(crate) fn notify(
        &self,
        event: Entity,
        ids: &[Id],
        table: TableId,
        offset: usize,
        count: usize,
        param: Option<&(dyn Any + Send + Sync)>,
    ) {
        if self.observers.is_empty() || count == 0 {
            return;
        }
        let Some(t) = self.table(table) else {
            return;
        };
        for (_, observer) in &self.observers {
            if !observer.listens(event) {
                continue;
            }
            let triggered: SmallVec<[(Id, Option<usize>); 4]> = if ids.is_empty() {
                SmallVec::from_slice(&[(Id::NULL, None)])
            } else {
                ids.iter()
                    .filter_map(|&id| observer.trigger_term(id).map(|k| (id, Some(k))))
                    .collect()
            };
            if triggered.is_empty() {
                continue;
            }
            let Some(m) = crate::query::match_table(self, &observer.plan, Some(t)) else {
                continue;
            };
            for (id, term) in triggered {
                let mut fields = m.permutation(0);
                if let Some(k) = term {
                    let field = observer.plan.field_of(k);
                    if let Some(exact) = m.fields[field].iter().find(|c| c.id == id) {
                        fields[field] = *exact;
                    }
                }
                let batch = Batch {
                    table: Some(table),
                    offset,
                    count,
                    fields,
                    group: 0,
                };
                let context = EventContext { event, id, param };
                let mut it = QueryIter::for_event(self, observer.plan.clone(), batch, context);
                (observer.callback)(&mut it);
            }
        }
    }

    /// Emit an event synchronously. Observers run before this returns;
    /// commands they record are applied afterwards.
    pub fn emit(&mut self, desc: EventDesc<'_>) {
        self.defer_begin();
        self.emit_now(&desc);
        self.defer_end();
    }

    pub(crate) fn emit_now(&self, desc: &EventDesc<'_>) {
        let (table, offset, count) = match desc.target {
            EventTarget::Entity(entity) => match self.record(entity) {
                Some(record) => (record.table, record.row, 1),
                None => return,
            },
            EventTarget::Table(table) => match self.table(table) {
                Some(t) => (table, 0, t.len()),
                None => return,
            },
        };
        self.notify(desc.event, desc.ids, table, offset, count, desc.param);
    }

    /// Queue an event for [`World::flush_events`].
    pub fn enqueue(&self, event: QueuedEvent) {
        self.events.lock().push(event);
    }

    /// Emit every enqueued event, including those enqueued by observers
    /// while draining. Returns the number of events emitted.
    pub fn flush_events(&mut self) -> usize {
        let mut emitted = 0;
        loop {
            // The lock is released before observers run
            let next = self.events.lock().pop();
            let Some(event) = next else {
                break;
            };
            self.emit(event.as_desc());
            emitted += 1;
        }
        emitted
    }

    /// Number of events waiting in the enqueue path.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.events.lock().len()
    }
}
