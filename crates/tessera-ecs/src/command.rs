//! Deferred commands.
//!
//! While a world is deferred, structural operations are recorded as
//! [`Command`] values and replayed in recording order when the outermost
//! deferred scope ends. Component values travel in an arena owned by the
//! queue; values that are never applied are destroyed with the queue.

use std::{fmt, ptr::NonNull, sync::Arc};

use bumpalo::Bump;

use crate::{
    component::{Component, TypeInfo},
    entity_index::ReleasedIds,
    event::QueuedEvent,
    id::{Entity, Id},
    observer::{Observer, ObserverId},
};

/// A component value stored in a queue's arena.
pub(crate) struct Payload {
    ptr: NonNull<u8>,
    info: TypeInfo,
}

// SAFETY: payloads hold `Send` component values or plain bytes, and are only
// touched by whoever owns the queue.
unsafe impl Send for Payload {}

impl Payload {
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) const fn info(&self) -> &TypeInfo {
        &self.info
    }

    /// Destroy the value without applying it.
    pub(crate) fn discard(self) {
        // SAFETY: the payload owns an initialized value that nobody moved out
        unsafe { self.info.destruct(self.ptr.as_ptr(), 1) };
    }
}

/// A recorded structural operation.
pub(crate) enum Command {
    /// Make a reserved entity alive.
    Spawn { entity: Entity },
    Add { entity: Entity, id: Id },
    Remove { entity: Entity, id: Id },
    /// Assign a value. Without an id, the component registered for the
    /// payload's Rust type is used, registering it if needed.
    Set {
        entity: Entity,
        id: Option<Id>,
        payload: Payload,
    },
    Modified { entity: Entity, id: Id },
    Enable { entity: Entity, id: Id, enabled: bool },
    Delete { entity: Entity },
    Clear { entity: Entity },
    Clone {
        src: Entity,
        dst: Entity,
        copy_values: bool,
    },
    Observe { id: ObserverId, observer: Box<Observer> },
    Unobserve { id: ObserverId },
    Emit(QueuedEvent),
}

impl Command {
    /// Release resources of a command that will not be applied.
    pub(crate) fn discard(self) {
        if let Self::Set { payload, .. } = self {
            payload.discard();
        }
    }

    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Set { .. } => "set",
            Self::Modified { .. } => "modified",
            Self::Enable { .. } => "enable",
            Self::Delete { .. } => "delete",
            Self::Clear { .. } => "clear",
            Self::Clone { .. } => "clone",
            Self::Observe { .. } => "observe",
            Self::Unobserve { .. } => "unobserve",
            Self::Emit(_) => "emit",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered batch of deferred commands.
///
/// Obtained from a [`Stage`](crate::Stage) and applied with
/// [`World::merge`](crate::World::merge), or used internally by the world's
/// own deferred scope.
#[derive(Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
    arena: Bump,
    /// Arenas of merged queues whose payloads now live in `commands`.
    retired: Vec<Bump>,
    /// Receives the ids of spawns dropped with the queue.
    released: Option<Arc<ReleasedIds>>,
}

// SAFETY: every command is `Send`, and arena memory is only reached through
// the commands that own it.
unsafe impl Send for CommandQueue {}

impl CommandQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that hands reserved ids back to `released` if it is dropped
    /// before being applied.
    pub(crate) fn releasing_into(released: &Arc<ReleasedIds>) -> Self {
        Self {
            commands: Vec::new(),
            arena: Bump::default(),
            retired: Vec::new(),
            released: Some(released.clone()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Record a typed assignment.
    pub(crate) fn push_set<T: Component>(&mut self, entity: Entity, id: Option<Id>, value: T) {
        let ptr = NonNull::from(self.arena.alloc(value)).cast::<u8>();
        let info = TypeInfo::of::<T>(id.unwrap_or_default());
        self.commands.push(Command::Set {
            entity,
            id,
            payload: Payload { ptr, info },
        });
    }

    /// Record an assignment whose value is built by `init`.
    ///
    /// # Safety
    ///
    /// `init` must leave a fully initialized value of `info`'s type at the
    /// pointer it receives.
    pub(crate) unsafe fn push_set_with(
        &mut self,
        entity: Entity,
        id: Id,
        info: &TypeInfo,
        init: impl FnOnce(*mut u8),
    ) {
        let ptr = self.arena.alloc_layout(info.layout());
        init(ptr.as_ptr());
        self.commands.push(Command::Set {
            entity,
            id: Some(id),
            payload: Payload {
                ptr,
                info: info.clone(),
            },
        });
    }

    /// Move all commands of `other` to the end of this queue.
    pub fn append(&mut self, mut other: Self) {
        self.commands.append(&mut other.commands);
        self.retired.append(&mut other.retired);
        self.retired.push(std::mem::take(&mut other.arena));
        if self.released.is_none() {
            self.released = other.released.take();
        }
    }

    /// Take the recorded commands, leaving the arenas in place.
    pub(crate) fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        for command in self.commands.drain(..) {
            if let (Command::Spawn { entity }, Some(released)) = (&command, &self.released) {
                released.push(*entity);
            }
            command.discard();
        }
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("commands", &self.commands)
            .field("arena_bytes", &self.arena.allocated_bytes())
            .finish()
    }
}
