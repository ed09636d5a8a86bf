//! Query terms.

use bitflags::bitflags;

use crate::id::{CHILD_OF, Entity, Id};

/// How a term combines with the rest of the query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TermOper {
    /// The id must be present.
    #[default]
    And,
    /// One of a chain of consecutive `Or` terms must match. The chain
    /// shares one field.
    Or,
    /// The id must be absent.
    Not,
    /// The id may be present.
    Optional,
    /// Every id in the type of the term's entity must be present.
    AndFrom,
    /// At least one id in the type of the term's entity must be present.
    OrFrom,
    /// No id in the type of the term's entity may be present.
    NotFrom,
}

impl TermOper {
    /// Operators that read the type of the term's entity instead of
    /// matching the id itself.
    #[must_use]
    pub const fn is_type_list(self) -> bool {
        matches!(self, Self::AndFrom | Self::OrFrom | Self::NotFrom)
    }
}

/// Declared access of a term's field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InOut {
    /// Read-write for owned data, read-only for shared data.
    #[default]
    Default,
    /// Matching only. The field has no data.
    None,
    In,
    Out,
    InOut,
}

bitflags! {
    /// Where a term looks for its id.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Traversal: u8 {
        /// On the source itself.
        const SELF = 1 << 0;
        /// On ancestors of the source, following the traversal relationship.
        const UP = 1 << 1;
        /// Like `UP`, and order tables by depth (breadth-first).
        const CASCADE = 1 << 2;
        /// Reverse the `CASCADE` order.
        const DESC = 1 << 3;
    }
}

impl Default for Traversal {
    fn default() -> Self {
        Self::SELF
    }
}

/// Entity a term is evaluated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TermSource {
    /// The entity being iterated.
    #[default]
    This,
    /// A fixed entity.
    Entity(Entity),
}

/// A single term in a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Term {
    /// Id or pattern to match.
    pub id: Id,
    pub src: TermSource,
    pub trav: Traversal,
    /// Relationship followed by `UP` and `CASCADE`.
    pub trav_rel: Entity,
    pub oper: TermOper,
    pub inout: InOut,
}

impl Term {
    /// An `And` term on `$this`.
    #[must_use]
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            src: TermSource::This,
            trav: Traversal::SELF,
            trav_rel: CHILD_OF,
            oper: TermOper::And,
            inout: InOut::Default,
        }
    }

    #[must_use]
    pub fn oper(mut self, oper: TermOper) -> Self {
        self.oper = oper;
        self
    }

    #[must_use]
    pub fn src(mut self, entity: Entity) -> Self {
        self.src = TermSource::Entity(entity);
        self
    }

    #[must_use]
    pub fn inout(mut self, inout: InOut) -> Self {
        self.inout = inout;
        self
    }

    /// Only look on ancestors along `relationship`.
    #[must_use]
    pub fn up(mut self, relationship: Entity) -> Self {
        self.trav = Traversal::UP;
        self.trav_rel = relationship;
        self
    }

    /// Look on the source first, then on ancestors along `relationship`.
    #[must_use]
    pub fn self_up(mut self, relationship: Entity) -> Self {
        self.trav = Traversal::SELF | Traversal::UP;
        self.trav_rel = relationship;
        self
    }

    /// Look on ancestors only, and order results by depth along
    /// `relationship`.
    #[must_use]
    pub fn cascade(mut self, relationship: Entity) -> Self {
        self.trav = Traversal::UP | Traversal::CASCADE;
        self.trav_rel = relationship;
        self
    }

    #[must_use]
    pub fn desc(mut self) -> Self {
        self.trav |= Traversal::DESC;
        self
    }

    #[must_use]
    pub const fn is_this(&self) -> bool {
        matches!(self.src, TermSource::This)
    }

    /// Whether the term only depends on the iterated table's own type, so
    /// its result can be cached per table.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_this()
            && self.trav == Traversal::SELF
            && matches!(
                self.oper,
                TermOper::And | TermOper::Or | TermOper::Not | TermOper::Optional
            )
    }

    /// Whether the term's field can carry data.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.inout != InOut::None && !matches!(self.oper, TermOper::Not) && !self.oper.is_type_list()
    }
}

impl From<Id> for Term {
    fn from(id: Id) -> Self {
        Self::new(id)
    }
}

impl From<Entity> for Term {
    fn from(entity: Entity) -> Self {
        Self::new(entity)
    }
}
