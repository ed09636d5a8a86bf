//! Error types for world operations.

use std::fmt;

use thiserror::Error;

use crate::id::{Entity, Id};

/// Lifecycle hook that an operation needed but the type does not provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookKind {
    Construct,
    Destruct,
    Copy,
    CopyConstruct,
    Move,
    MoveConstruct,
    Compare,
    Equals,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Construct => "ctor",
            Self::Destruct => "dtor",
            Self::Copy => "copy",
            Self::CopyConstruct => "copy_ctor",
            Self::Move => "move",
            Self::MoveConstruct => "move_ctor",
            Self::Compare => "cmp",
            Self::Equals => "equals",
        };
        f.write_str(name)
    }
}

/// ECS error type.
///
/// Operations on dead entities are not errors: structural operations
/// return `Ok(false)` and reads return `None`.
#[derive(Debug, Error)]
pub enum EcsError {
    /// A component registration was rejected.
    #[error("invalid component {id:?}: {reason}")]
    InvalidComponent { id: Id, reason: &'static str },

    /// A type lacks a hook the operation requires.
    #[error("component {id:?} has no {hook} hook")]
    MissingHook { id: Id, hook: HookKind },

    /// A structural change hit a table that an iterator is reading.
    #[error("table of {entity} is locked by an active iterator")]
    TableLocked { entity: Entity },

    /// A typed API was used with a type that was never registered.
    #[error("type {0} is not registered as a component")]
    UnregisteredType(&'static str),

    /// A typed accessor does not match the registered type of an id.
    #[error("component {id:?} is not of type {expected}")]
    TypeMismatch { id: Id, expected: &'static str },

    /// A query term failed validation.
    #[error("invalid query term {index}: {reason}")]
    InvalidTerm { index: usize, reason: &'static str },

    /// Adding the pair would create a cycle in an acyclic relationship.
    #[error("adding ({relationship}, {target}) to {entity} creates a cycle")]
    CycleDetected {
        entity: Entity,
        relationship: Entity,
        target: Entity,
    },

    /// The id cannot be added to an entity.
    #[error("invalid id {id:?}: {reason}")]
    InvalidId { id: Id, reason: &'static str },

    /// A raw value does not match the registered size of its id.
    #[error("component {id:?} expects {expected} bytes, got {actual}")]
    SizeMismatch {
        id: Id,
        expected: usize,
        actual: usize,
    },

    /// The observer handle does not name a registered observer.
    #[error("unknown observer {0}")]
    UnknownObserver(u32),
}

/// Result type for ECS operations.
pub type EcsResult<T> = Result<T, EcsError>;
