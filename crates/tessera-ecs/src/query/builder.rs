use std::{cmp::Ordering, sync::Arc};

use super::{GroupBy, InOut, OrderBy, Query, QueryPlan, Term, TermOper};
use crate::{
    World,
    component::Component,
    error::{EcsError, EcsResult, HookKind},
    id::{Entity, Id, pair},
    table::Table,
};

// ============================================================================
// QueryBuilder - Runtime Builder Pattern
// ============================================================================

/// Builder for constructing queries at runtime.
///
/// Terms are added with method chaining; modifiers such as [`up`](Self::up)
/// or [`src`](Self::src) apply to the last term added. Errors (an
/// unregistered type, a modifier without a term) are reported by
/// [`build`](Self::build).
pub struct QueryBuilder<'w> {
    world: &'w World,
    terms: Vec<Term>,
    group_by: Option<GroupBy>,
    order_by: Option<OrderBy>,
    /// The next term joins an `Or` chain.
    pending_or: bool,
    error: Option<EcsError>,
}

impl<'w> QueryBuilder<'w> {
    /// Create a new query builder.
    #[must_use]
    pub fn new(world: &'w World) -> Self {
        Self {
            world,
            terms: Vec::new(),
            group_by: None,
            order_by: None,
            pending_or: false,
            error: None,
        }
    }

    fn fail(&mut self, error: EcsError) {
        self.error.get_or_insert(error);
    }

    fn entity_of<T: Component>(&mut self) -> Option<Entity> {
        let entity = self.world.type_entity::<T>();
        if entity.is_none() {
            self.fail(EcsError::UnregisteredType(std::any::type_name::<T>()));
        }
        entity
    }

    fn push(&mut self, mut term: Term) {
        if std::mem::take(&mut self.pending_or) {
            term.oper = TermOper::Or;
        }
        self.terms.push(term);
    }

    fn push_typed<T: Component>(&mut self, oper: TermOper, inout: InOut) {
        if let Some(entity) = self.entity_of::<T>() {
            self.push(Term::new(entity).oper(oper).inout(inout));
        }
    }

    fn modify(&mut self, f: impl FnOnce(&mut Term)) {
        match self.terms.last_mut() {
            Some(term) => f(term),
            None => self.fail(EcsError::InvalidTerm {
                index: 0,
                reason: "modifier without a term",
            }),
        }
    }

    // ==================== Terms ====================

    /// Entity must have component `T`; the field holds its data.
    #[must_use]
    pub fn with<T: Component>(mut self) -> Self {
        self.push_typed::<T>(TermOper::And, InOut::Default);
        self
    }

    /// Add a required id or pattern.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<Id>) -> Self {
        self.push(Term::new(id));
        self
    }

    /// Add a required `(relationship, target)` pair. Either half may be a
    /// wildcard.
    #[must_use]
    pub fn with_pair(mut self, relationship: Entity, target: Entity) -> Self {
        self.push(Term::new(pair(relationship, target)));
        self
    }

    /// Field is set when the entity has `T`.
    #[must_use]
    pub fn optional<T: Component>(mut self) -> Self {
        self.push_typed::<T>(TermOper::Optional, InOut::Default);
        self
    }

    #[must_use]
    pub fn optional_id(mut self, id: impl Into<Id>) -> Self {
        self.push(Term::new(id).oper(TermOper::Optional));
        self
    }

    /// Entity must not have `T`.
    #[must_use]
    pub fn without<T: Component>(mut self) -> Self {
        self.push_typed::<T>(TermOper::Not, InOut::None);
        self
    }

    #[must_use]
    pub fn without_id(mut self, id: impl Into<Id>) -> Self {
        self.push(Term::new(id).oper(TermOper::Not).inout(InOut::None));
        self
    }

    /// Entity must have `T`; the field carries no data.
    #[must_use]
    pub fn filter<T: Component>(mut self) -> Self {
        self.push_typed::<T>(TermOper::And, InOut::None);
        self
    }

    #[must_use]
    pub fn filter_id(mut self, id: impl Into<Id>) -> Self {
        self.push(Term::new(id).inout(InOut::None));
        self
    }

    /// Add a fully specified term.
    #[must_use]
    pub fn term(mut self, term: Term) -> Self {
        self.push(term);
        self
    }

    /// Entity must have every id in the type of `entity`.
    #[must_use]
    pub fn and_from(mut self, entity: Entity) -> Self {
        self.push(Term::new(entity).oper(TermOper::AndFrom).inout(InOut::None));
        self
    }

    /// Entity must have at least one id in the type of `entity`.
    #[must_use]
    pub fn or_from(mut self, entity: Entity) -> Self {
        self.push(Term::new(entity).oper(TermOper::OrFrom).inout(InOut::None));
        self
    }

    /// Entity must have none of the ids in the type of `entity`.
    #[must_use]
    pub fn not_from(mut self, entity: Entity) -> Self {
        self.push(Term::new(entity).oper(TermOper::NotFrom).inout(InOut::None));
        self
    }

    /// Chain the last term and the next one with `Or`. The chain shares one
    /// field.
    #[must_use]
    pub fn or(mut self) -> Self {
        self.modify(|term| term.oper = TermOper::Or);
        self.pending_or = true;
        self
    }

    /// Add an `Or` chain over `ids`.
    #[must_use]
    pub fn any_of(mut self, ids: &[Id]) -> Self {
        for &id in ids {
            self.push(Term::new(id).oper(TermOper::Or));
        }
        self
    }

    // ==================== Modifiers ====================

    /// Set the operator of the last term.
    #[must_use]
    pub fn oper(mut self, oper: TermOper) -> Self {
        self.modify(|term| term.oper = oper);
        self
    }

    /// Match the last term on a fixed entity instead of the iterated rows.
    #[must_use]
    pub fn src(mut self, entity: Entity) -> Self {
        self.modify(|term| *term = term.src(entity));
        self
    }

    /// Match the last term on ancestors along `relationship` only.
    #[must_use]
    pub fn up(mut self, relationship: Entity) -> Self {
        self.modify(|term| *term = term.up(relationship));
        self
    }

    /// Match the last term on the entity, then on its ancestors.
    #[must_use]
    pub fn self_up(mut self, relationship: Entity) -> Self {
        self.modify(|term| *term = term.self_up(relationship));
        self
    }

    /// Match the last term on ancestors only, and iterate tables breadth-first
    /// by depth along `relationship`.
    #[must_use]
    pub fn cascade(mut self, relationship: Entity) -> Self {
        self.modify(|term| *term = term.cascade(relationship));
        self
    }

    /// Reverse the cascade order of the last term.
    #[must_use]
    pub fn desc(mut self) -> Self {
        self.modify(|term| *term = term.desc());
        self
    }

    #[must_use]
    pub fn inout(mut self, inout: InOut) -> Self {
        self.modify(|term| term.inout = inout);
        self
    }

    // ==================== Ordering ====================

    /// Group tables by the target of `relationship`.
    #[must_use]
    pub fn group_by(mut self, relationship: Entity) -> Self {
        self.group_by = Some(GroupBy {
            relationship,
            callback: None,
        });
        self
    }

    /// Group tables with a custom function.
    #[must_use]
    pub fn group_by_with(
        mut self,
        relationship: Entity,
        callback: impl Fn(&World, &Table, Entity) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.group_by = Some(GroupBy {
            relationship,
            callback: Some(Arc::new(callback)),
        });
        self
    }

    /// Yield rows sorted by the value of component `T`.
    #[must_use]
    pub fn order_by<T: Component>(
        mut self,
        cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        if let Some(entity) = self.entity_of::<T>() {
            self.order_by = Some(OrderBy {
                id: entity.id(),
                // SAFETY: rows are only compared through pointers into the
                // column of `T`
                cmp: Arc::new(move |a, b| unsafe { cmp(&*a.cast::<T>(), &*b.cast::<T>()) }),
            });
        }
        self
    }

    /// Yield rows sorted by the value of `id`, through its compare hook.
    #[must_use]
    pub fn order_by_id(mut self, id: impl Into<Id>) -> Self {
        let id = id.into();
        let world = self.world;
        let info = match world.types().for_id(id) {
            Some(info) => info.clone(),
            None => {
                self.fail(EcsError::InvalidTerm {
                    index: self.terms.len(),
                    reason: "order_by id carries no data",
                });
                return self;
            }
        };
        if let Err(e) = info.require(HookKind::Compare) {
            self.fail(e);
            return self;
        }
        self.order_by = Some(OrderBy {
            id,
            // SAFETY: both pointers come from the column of `id`
            cmp: Arc::new(move |a, b| unsafe { info.compare(a, b) }),
        });
        self
    }

    // ==================== Build ====================

    pub(crate) fn into_plan(self) -> EcsResult<QueryPlan> {
        if let Some(error) = self.error {
            return Err(error);
        }
        QueryPlan::new(self.terms, self.group_by, self.order_by)
    }

    /// Build an uncached query. Matching tables are found each time
    /// iteration starts.
    pub fn build(self) -> EcsResult<Query> {
        Ok(Query::new(Arc::new(self.into_plan()?), None))
    }
}

impl std::fmt::Debug for QueryBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("terms", &self.terms)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::WILDCARD;

    #[derive(Clone, Default)]
    struct Position;

    #[test]
    fn test_unregistered_type_fails_build() {
        let world = World::new();
        let err = QueryBuilder::new(&world).with::<Position>().build();
        assert!(matches!(err, Err(EcsError::UnregisteredType(_))));
    }

    #[test]
    fn test_or_chain_shares_field() {
        let world = World::new();
        let a = Entity::from_index(40);
        let b = Entity::from_index(41);
        let c = Entity::from_index(42);
        let query = QueryBuilder::new(&world)
            .with_id(a)
            .or()
            .with_id(b)
            .with_id(c)
            .build()
            .unwrap();
        let plan = query.plan();
        assert_eq!(plan.field_count(), 2);
        assert_eq!(plan.field_of(0), 0);
        assert_eq!(plan.field_of(1), 0);
        assert_eq!(plan.field_of(2), 1);
        assert_eq!(plan.terms()[2].oper, TermOper::And);
    }

    #[test]
    fn test_modifier_without_term() {
        let world = World::new();
        let err = QueryBuilder::new(&world).up(WILDCARD).with_id(Entity::from_index(40)).build();
        assert!(matches!(err, Err(EcsError::InvalidTerm { .. })));
    }

    #[test]
    fn test_or_on_fixed_source_rejected() {
        let world = World::new();
        let a = Entity::from_index(40);
        let b = Entity::from_index(41);
        let err = QueryBuilder::new(&world)
            .with_id(a)
            .src(b)
            .or()
            .with_id(b)
            .build();
        assert!(matches!(err, Err(EcsError::InvalidTerm { index: 0, .. })));
    }
}
