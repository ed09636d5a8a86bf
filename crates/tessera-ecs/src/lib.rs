// Column storage and type-erased hooks work on raw pointers
#![allow(unsafe_code)]
// Allow missing docs for now
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::ptr_as_ptr)]
#![allow(clippy::ref_as_ptr)]
#![allow(clippy::cast_ptr_alignment)]

//! Tessera ECS - an archetype entity component system.
//!
//! Entities are stored in tables keyed by their sorted set of ids. Every
//! component type, tag and relationship is itself an entity, so the same
//! machinery stores them all.
//!
//! # Key Concepts
//!
//! - **Entity**: 64-bit handle with an index and a generation
//! - **Id**: an entity, a pair `(first, second)`, or either with flags
//! - **Table**: dense rows for one id set, one column per sized component
//! - **Hooks**: type-erased construct/destruct/copy/move callbacks per component
//! - **Deferral**: structural changes recorded as commands and replayed in order
//! - **Stage**: a private command queue for work off the main thread
//! - **Query**: terms compiled to a plan, iterated one table batch at a time
//! - **Observer**: callback fired for `OnAdd`, `OnRemove`, `OnSet` or custom events
//!
//! # Example
//!
//! ```ignore
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Clone, Copy, Default)]
//! struct Position { x: f32, y: f32 }
//!
//! let mut world = World::new();
//! world.component::<Position>()?;
//! let e = world.spawn();
//! world.set(e, Position { x: 1.0, y: 2.0 })?;
//!
//! let query = world.query().with::<Position>().build()?;
//! let mut it = query.iter(&world);
//! while it.next() {
//!     let positions = it.field::<Position>(0).unwrap();
//!     for p in positions.iter() {
//!         println!("{} {}", p.x, p.y);
//!     }
//! }
//! ```

mod borrow;
mod command;
mod component;
mod config;
mod defer;
mod entity_index;
mod error;
mod event;
mod id;
mod id_index;
mod observer;
mod query;
mod relation;
mod stage;
mod storage;
mod table;
mod world;

pub use command::CommandQueue;
pub use component::{
    CompareFn, Component, ComponentDesc, CopyFn, EqualsFn, MoveFn, TypeFlags, TypeHooks,
    TypeInfo, TypeRegistry, XtorFn,
};
pub use config::WorldConfig;
pub use defer::Commands;
pub use entity_index::EntityRecord;
pub use error::{EcsError, EcsResult, HookKind};
pub use event::{EventDesc, EventTarget, QueuedEvent};
pub use id::{
    ANY, BUILTINS, CHILD_OF, Entity, EntityId, FIRST_USER_INDEX, Generation, IS_A, Id, IdFlags,
    MAX_RELATIONSHIP_INDEX, ON_ADD, ON_REMOVE, ON_SET, WILDCARD, pair,
};
pub use id_index::{IdRecord, TableRecord};
pub use observer::{Observer, ObserverFn, ObserverId};
pub use query::{
    Field, FieldMut, GroupBy, GroupByFn, InOut, MAX_TERMS, OrderBy, OrderByFn, Query,
    QueryBuilder, QueryIter, QueryPlan, RawField, Term, TermOper, TermSource, Traversal,
};
pub use stage::Stage;
pub use storage::{Bitset, Column};
pub use table::{Table, TableFlags, TableId, TableType};
pub use world::World;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CHILD_OF, Commands, Component, EcsError, EcsResult, Entity, EventDesc, EventTarget, IS_A,
        Id, IdFlags, ON_ADD, ON_REMOVE, ON_SET, Observer, Query, QueryBuilder, QueryIter, Stage,
        Term, TypeHooks, WILDCARD, World, WorldConfig, pair,
    };
}
