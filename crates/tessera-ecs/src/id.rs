//! Entity and id encoding.
//!
//! Every identifier in the world fits in a single `u64`:
//!
//! ```text
//! entity: [ flags:8 | unused:8 | generation:16 | index:32 ]
//! pair:   [ PAIR|flags:8 | first:24           | second:32 ]
//! ```
//!
//! Pairs only store the index of their halves. Liveness of a half is checked
//! against the entity index, which owns the current generation of each slot.

use std::fmt;

use bitflags::bitflags;

/// Raw entity index into the entity storage.
pub type EntityId = u32;

const INDEX_MASK: u64 = 0xFFFF_FFFF;
const GENERATION_SHIFT: u32 = 32;
const GENERATION_MASK: u64 = 0xFFFF << GENERATION_SHIFT;
const FLAGS_MASK: u64 = 0xFF << 56;
const FIRST_MASK: u64 = 0x00FF_FFFF;

/// Largest entity index that can be used as the first element of a pair.
pub const MAX_RELATIONSHIP_INDEX: EntityId = FIRST_MASK as EntityId;

/// Generation counter to detect stale entity references.
/// Incremented each time an entity slot is recycled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Generation(u16);

impl Generation {
    /// Create a new generation (starts at 0).
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Increment the generation counter.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Get the raw generation value.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// A unique identifier for an entity in the world.
///
/// The low 32 bits hold the slot index, the next 16 bits hold the
/// generation of the slot at the time the entity was created.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Entity(u64);

impl Entity {
    /// The null entity. Never alive.
    pub const NULL: Entity = Entity(0);

    /// Create an entity from an index and a generation.
    #[must_use]
    pub const fn new(index: EntityId, generation: Generation) -> Self {
        Self(((generation.0 as u64) << GENERATION_SHIFT) | index as u64)
    }

    /// Create a generation-0 entity for a slot index.
    #[must_use]
    pub const fn from_index(index: EntityId) -> Self {
        Self(index as u64)
    }

    /// Get the entity's slot index.
    #[must_use]
    pub const fn index(self) -> EntityId {
        (self.0 & INDEX_MASK) as EntityId
    }

    /// Get the entity's generation.
    #[must_use]
    pub const fn generation(self) -> Generation {
        Generation(((self.0 & GENERATION_MASK) >> GENERATION_SHIFT) as u16)
    }

    /// Pack entity into a single u64.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Unpack entity from a u64. Flag bits are discarded.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & (INDEX_MASK | GENERATION_MASK))
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// This entity as a plain (non-pair) id.
    #[must_use]
    pub const fn id(self) -> Id {
        Id(self.0)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.generation().0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation().0)
    }
}

bitflags! {
    /// Role bits stored in the top byte of an [`Id`].
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct IdFlags: u64 {
        /// The id is a `(first, second)` pair.
        const PAIR = 1 << 63;
        /// The id is copied into instances when inherited through `IsA`.
        const AUTO_OVERRIDE = 1 << 62;
        /// The id carries a per-entity enabled bit.
        const TOGGLE = 1 << 61;
    }
}

/// A component, tag, pair, or flagged id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Id(u64);

impl Id {
    /// The zero id. Never a valid component.
    pub const NULL: Id = Id(0);

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Build a pair id from a relationship and a target.
    ///
    /// # Panics
    ///
    /// Panics if the relationship index does not fit in 24 bits.
    #[must_use]
    pub const fn pair(first: Entity, second: Entity) -> Self {
        assert!(
            first.index() <= MAX_RELATIONSHIP_INDEX,
            "relationship index does not fit in a pair"
        );
        Self(
            IdFlags::PAIR.bits()
                | ((first.index() as u64 & FIRST_MASK) << 32)
                | second.index() as u64,
        )
    }

    #[must_use]
    pub const fn is_pair(self) -> bool {
        self.0 & IdFlags::PAIR.bits() != 0
    }

    /// The relationship half of a pair, at generation 0.
    ///
    /// # Panics
    ///
    /// Panics if the id is not a pair.
    #[must_use]
    pub const fn first(self) -> Entity {
        assert!(self.is_pair(), "first() called on a non-pair id");
        Entity::from_index(((self.0 >> 32) & FIRST_MASK) as EntityId)
    }

    /// The target half of a pair, at generation 0.
    ///
    /// # Panics
    ///
    /// Panics if the id is not a pair.
    #[must_use]
    pub const fn second(self) -> Entity {
        assert!(self.is_pair(), "second() called on a non-pair id");
        Entity::from_index((self.0 & INDEX_MASK) as EntityId)
    }

    #[must_use]
    pub const fn flags(self) -> IdFlags {
        IdFlags::from_bits_truncate(self.0 & FLAGS_MASK)
    }

    #[must_use]
    pub const fn has_flags(self, flags: IdFlags) -> bool {
        self.0 & flags.bits() == flags.bits()
    }

    /// Add role bits to the id.
    #[must_use]
    pub const fn with_flags(self, flags: IdFlags) -> Self {
        Self(self.0 | flags.bits())
    }

    /// The id with its `TOGGLE` and `AUTO_OVERRIDE` bits cleared.
    #[must_use]
    pub const fn strip_flags(self) -> Self {
        Self(self.0 & !(IdFlags::TOGGLE.bits() | IdFlags::AUTO_OVERRIDE.bits()))
    }

    /// The id with the generation of a plain entity cleared.
    #[must_use]
    pub const fn strip_generation(self) -> Self {
        if self.is_pair() {
            self
        } else {
            Self(self.0 & !GENERATION_MASK)
        }
    }

    /// The entity this id names, if it is a plain id without role bits.
    #[must_use]
    pub const fn entity(self) -> Option<Entity> {
        if self.0 & FLAGS_MASK == 0 && self.0 != 0 {
            Some(Entity(self.0))
        } else {
            None
        }
    }

    /// Whether this id is a pattern rather than a concrete id.
    #[must_use]
    pub fn is_wildcard(self) -> bool {
        if self.is_pair() {
            is_wildcard_index(self.first().index()) || is_wildcard_index(self.second().index())
        } else {
            self.entity().is_some_and(|e| is_wildcard_index(e.index()))
        }
    }

    /// Whether the id contains `ANY` anywhere, which limits matching to a
    /// single result.
    #[must_use]
    pub fn is_any(self) -> bool {
        if self.is_pair() {
            self.first().index() == ANY.index() || self.second().index() == ANY.index()
        } else {
            self == ANY.id()
        }
    }

    /// Test a concrete id against a pattern.
    ///
    /// `*` and `_` match any plain id. In pairs each half matches
    /// independently; `(*, *)` matches every pair. Flag bits must agree.
    #[must_use]
    pub fn matches(self, pattern: Id) -> bool {
        if self == pattern {
            return true;
        }
        // Includes the pair bit, so a pair never matches a plain id
        if self.flags() != pattern.flags() {
            return false;
        }
        if !self.is_pair() {
            return is_wildcard_index((pattern.0 & INDEX_MASK) as EntityId)
                && pattern.0 & GENERATION_MASK == 0;
        }
        let first_ok = is_wildcard_index(pattern.first().index())
            || pattern.first().index() == self.first().index();
        let second_ok = is_wildcard_index(pattern.second().index())
            || pattern.second().index() == self.second().index();
        first_ok && second_ok
    }
}

const fn is_wildcard_index(index: EntityId) -> bool {
    index == WILDCARD.index() || index == ANY.index()
}

impl From<Entity> for Id {
    fn from(entity: Entity) -> Self {
        entity.id()
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_flags(IdFlags::TOGGLE) {
            f.write_str("TOGGLE|")?;
        }
        if self.has_flags(IdFlags::AUTO_OVERRIDE) {
            f.write_str("AUTO_OVERRIDE|")?;
        }
        if self.is_pair() {
            write!(f, "({}, {})", self.first().index(), self.second().index())
        } else {
            write!(f, "{}", Entity(self.0 & !FLAGS_MASK))
        }
    }
}

/// Shorthand for [`Id::pair`].
#[must_use]
pub const fn pair(first: Entity, second: Entity) -> Id {
    Id::pair(first, second)
}

/// Matches any id, yielding one result per match (`*`).
pub const WILDCARD: Entity = Entity::from_index(1);
/// Matches any id, yielding at most one result (`_`).
pub const ANY: Entity = Entity::from_index(2);
/// Hierarchy relationship. Deleting a parent deletes its children.
pub const CHILD_OF: Entity = Entity::from_index(3);
/// Inheritance relationship. Instances share the components of their base.
pub const IS_A: Entity = Entity::from_index(4);
/// Emitted after an id is added to an entity.
pub const ON_ADD: Entity = Entity::from_index(5);
/// Emitted before an id is removed from an entity.
pub const ON_REMOVE: Entity = Entity::from_index(6);
/// Emitted after a component value is assigned.
pub const ON_SET: Entity = Entity::from_index(7);

/// Built-in entities created alive with every world.
pub const BUILTINS: [Entity; 7] = [WILDCARD, ANY, CHILD_OF, IS_A, ON_ADD, ON_REMOVE, ON_SET];

/// First index handed out to user entities. Lower slots are reserved.
pub const FIRST_USER_INDEX: EntityId = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_bits() {
        let e = Entity::new(42, Generation::new().next().next());
        assert_eq!(e.index(), 42);
        assert_eq!(e.generation().get(), 2);
        assert_eq!(Entity::from_bits(e.to_bits()), e);
    }

    #[test]
    fn test_pair_halves() {
        let rel = Entity::from_index(100);
        let tgt = Entity::new(200, Generation::new().next());
        let p = pair(rel, tgt);
        assert!(p.is_pair());
        assert_eq!(p.first().index(), 100);
        assert_eq!(p.second().index(), 200);
        assert!(p.entity().is_none());
    }

    #[test]
    #[should_panic(expected = "non-pair")]
    fn test_first_of_plain_id_panics() {
        let _ = Entity::from_index(40).id().first();
    }

    #[test]
    fn test_wildcard_matching() {
        let rel = Entity::from_index(100);
        let tgt = Entity::from_index(200);
        let other = Entity::from_index(300);
        let p = pair(rel, tgt);

        assert!(p.matches(pair(rel, WILDCARD)));
        assert!(p.matches(pair(WILDCARD, tgt)));
        assert!(p.matches(pair(WILDCARD, WILDCARD)));
        assert!(p.matches(pair(rel, ANY)));
        assert!(!p.matches(pair(other, WILDCARD)));
        assert!(!p.matches(WILDCARD.id()));
        assert!(!p.matches(ANY.id()));
        assert!(!rel.id().matches(pair(WILDCARD, WILDCARD)));
        assert!(!other.id().with_flags(IdFlags::TOGGLE).matches(WILDCARD.id()));

        assert!(other.id().matches(WILDCARD.id()));
        assert!(!other.id().matches(tgt.id()));
        assert!(pair(rel, WILDCARD).is_wildcard());
        assert!(!p.is_wildcard());
    }

    #[test]
    fn test_flags() {
        let c = Entity::from_index(50).id();
        let toggled = c.with_flags(IdFlags::TOGGLE);
        assert!(toggled.has_flags(IdFlags::TOGGLE));
        assert_eq!(toggled.strip_flags(), c);
        assert!(!toggled.matches(c));
        assert!(!toggled.matches(WILDCARD.id()));
        assert!(toggled.entity().is_none());
    }
}
