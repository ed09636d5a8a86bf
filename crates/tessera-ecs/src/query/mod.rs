//! Query engine.
//!
//! A query is a list of [`Term`]s compiled into a [`QueryPlan`]. Iteration
//! walks the tables that match the plan and yields one batch per table (or
//! per table and wildcard permutation), with typed access to each term's
//! field.
//!
//! # Basic Usage
//!
//! ```ignore
//! let query = world.query()
//!     .with::<Position>()
//!     .with::<Velocity>()
//!     .build()?;
//!
//! let mut it = query.iter(&world);
//! while it.next() {
//!     let mut pos = it.field_mut::<Position>(0).unwrap();
//!     let vel = it.field::<Velocity>(1).unwrap();
//!     for i in 0..it.count() {
//!         pos[i].x += vel[i].x;
//!     }
//! }
//! ```
//!
//! # Query Combinators
//!
//! - `.with::<T>()` - entity must have T
//! - `.optional::<T>()` - field is set when T is present
//! - `.without::<T>()` - entity must not have T
//! - `.filter::<T>()` - entity must have T, the field carries no data
//! - `.or()` - chain the next term with the previous one
//! - `.up(rel)`, `.self_up(rel)`, `.cascade(rel)` - match on ancestors
//! - `.src(entity)` - match on a fixed entity

mod builder;
mod cache;
mod field;
mod iter;
mod matcher;
mod term;

use std::{cmp::Ordering, fmt, sync::Arc};

use smallvec::SmallVec;

pub use builder::QueryBuilder;
pub(crate) use cache::{QueryCache, QueryCacheId};
pub use field::{Field, FieldMut, RawField};
pub use iter::QueryIter;
pub(crate) use iter::{Batch, EventContext};
pub(crate) use matcher::{TableMatch, match_table};
pub use term::{InOut, Term, TermOper, TermSource, Traversal};

use crate::{
    World,
    error::{EcsError, EcsResult},
    id::{Entity, Id},
    table::Table,
};

/// Maximum number of terms in one query.
pub const MAX_TERMS: usize = 32;

/// Computes the group of a table.
pub type GroupByFn = Arc<dyn Fn(&World, &Table, Entity) -> u64 + Send + Sync>;

/// Compares two component values for `order_by`.
pub type OrderByFn = Arc<dyn Fn(*const u8, *const u8) -> Ordering + Send + Sync>;

/// Grouping of matched tables.
#[derive(Clone)]
pub struct GroupBy {
    /// Relationship whose target is the default group id.
    pub relationship: Entity,
    pub callback: Option<GroupByFn>,
}

impl GroupBy {
    /// Group id of a table: the callback result, or the index of the first
    /// target of the relationship (0 if none).
    #[must_use]
    pub fn group_of(&self, world: &World, table: &Table) -> u64 {
        match &self.callback {
            Some(callback) => callback(world, table, self.relationship),
            None => table
                .targets(self.relationship)
                .next()
                .map_or(0, |target| u64::from(target.index())),
        }
    }
}

impl fmt::Debug for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBy")
            .field("relationship", &self.relationship)
            .field("custom", &self.callback.is_some())
            .finish()
    }
}

/// Ordering of results by a component value.
#[derive(Clone)]
pub struct OrderBy {
    pub id: Id,
    pub cmp: OrderByFn,
}

impl fmt::Debug for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderBy").field("id", &self.id).finish()
    }
}

/// Validated, immutable form of a query.
#[derive(Debug)]
pub struct QueryPlan {
    pub(crate) terms: Vec<Term>,
    /// Field index of each term.
    pub(crate) fields: SmallVec<[usize; 8]>,
    pub(crate) field_count: usize,
    /// Whether any term is evaluated against `$this`.
    pub(crate) has_this: bool,
    /// Whether any term must be evaluated at iteration time.
    pub(crate) has_dynamic: bool,
    pub(crate) cascade: Option<usize>,
    pub(crate) group_by: Option<GroupBy>,
    pub(crate) order_by: Option<OrderBy>,
}

impl QueryPlan {
    /// Validate terms and assign fields.
    pub fn new(
        terms: Vec<Term>,
        group_by: Option<GroupBy>,
        order_by: Option<OrderBy>,
    ) -> EcsResult<Self> {
        let invalid = |index, reason| Err(EcsError::InvalidTerm { index, reason });
        if terms.is_empty() {
            return invalid(0, "query has no terms");
        }
        if terms.len() > MAX_TERMS {
            return invalid(MAX_TERMS, "too many terms");
        }

        let mut cascade = None;
        for (index, term) in terms.iter().enumerate() {
            if term.id == Id::NULL {
                return invalid(index, "term has no id");
            }
            if let TermSource::Entity(entity) = term.src {
                if entity.is_null() {
                    return invalid(index, "term source is null");
                }
            }
            if term.trav.is_empty() {
                return invalid(index, "term has no traversal");
            }
            if term.oper.is_type_list() {
                if term.id.entity().is_none() || term.id.is_wildcard() {
                    return invalid(index, "type-list terms need an entity id");
                }
                if !term.is_this() || term.trav != Traversal::SELF {
                    return invalid(index, "type-list terms are matched on $this");
                }
            }
            if term.oper == TermOper::Or && (!term.is_this() || term.trav != Traversal::SELF) {
                return invalid(index, "or terms are matched on $this itself");
            }
            if term.trav.contains(Traversal::CASCADE) {
                if cascade.is_some() {
                    return invalid(index, "only one cascade term is allowed");
                }
                if !term.is_this() {
                    return invalid(index, "cascade terms are matched on $this");
                }
                cascade = Some(index);
            }
        }
        if let (Some(index), Some(_)) = (cascade, &order_by) {
            return invalid(index, "cascade conflicts with order_by");
        }

        let mut fields = SmallVec::with_capacity(terms.len());
        let mut field_count = 0;
        for (index, term) in terms.iter().enumerate() {
            let chained = term.oper == TermOper::Or
                && index > 0
                && terms[index - 1].oper == TermOper::Or;
            if !chained {
                field_count += 1;
            }
            fields.push(field_count - 1);
        }

        Ok(Self {
            has_this: terms.iter().any(Term::is_this),
            has_dynamic: terms.iter().any(|t| !t.is_static()),
            terms,
            fields,
            field_count,
            cascade,
            group_by,
            order_by,
        })
    }

    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    #[must_use]
    pub const fn field_count(&self) -> usize {
        self.field_count
    }

    /// Field index of term `term`.
    #[must_use]
    pub fn field_of(&self, term: usize) -> usize {
        self.fields[term]
    }

    /// First term of field `field`.
    pub(crate) fn first_term_of(&self, field: usize) -> usize {
        self.fields.iter().position(|&f| f == field).unwrap_or(0)
    }
}

/// A compiled query.
///
/// Cloning is cheap. A cached query keeps its cache in the world until
/// [`World::destroy_query`] is called.
#[derive(Clone, Debug)]
pub struct Query {
    plan: Arc<QueryPlan>,
    cache: Option<QueryCacheId>,
}

impl Query {
    pub(crate) const fn new(plan: Arc<QueryPlan>, cache: Option<QueryCacheId>) -> Self {
        Self { plan, cache }
    }

    #[must_use]
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub(crate) fn plan_arc(&self) -> &Arc<QueryPlan> {
        &self.plan
    }

    pub(crate) const fn cache_id(&self) -> Option<QueryCacheId> {
        self.cache
    }

    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.plan.field_count
    }

    /// Start iterating. The iterator yields nothing until [`QueryIter::next`]
    /// is called.
    #[must_use]
    pub fn iter<'w>(&self, world: &'w World) -> QueryIter<'w> {
        QueryIter::new(world, self.plan.clone(), self.cache)
    }

    /// Call `f` for every batch.
    pub fn each(&self, world: &World, mut f: impl FnMut(&mut QueryIter<'_>)) {
        let mut it = self.iter(world);
        while it.next() {
            f(&mut it);
        }
    }

    /// Call `f` for every batch with the world deferred, then apply the
    /// commands recorded through [`QueryIter::commands`].
    pub fn run(&self, world: &mut World, f: impl FnMut(&mut QueryIter<'_>)) {
        world.defer_begin();
        self.each(world, f);
        world.defer_end();
    }

    /// Number of matched entities (or batches, for queries without `$this`).
    #[must_use]
    pub fn count(&self, world: &World) -> usize {
        let mut total = 0;
        let mut it = self.iter(world);
        while it.next() {
            total += it.count().max(usize::from(!self.plan.has_this));
        }
        total
    }

    /// Whether `entity` is matched by the query.
    #[must_use]
    pub fn matches_entity(&self, world: &World, entity: Entity) -> bool {
        let Some(table) = world.table_of(entity).and_then(|t| world.table(t)) else {
            return false;
        };
        matcher::match_table(world, &self.plan, Some(table)).is_some()
    }

    /// Collect the matched entities.
    #[must_use]
    pub fn entities(&self, world: &World) -> Vec<Entity> {
        let mut out = Vec::new();
        self.each(world, |it| out.extend_from_slice(it.entities()));
        out
    }
}
