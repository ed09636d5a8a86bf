//! Deferred mode and command recording.
//!
//! While the world is deferred, structural operations are recorded instead
//! of applied. Every public mutating operation is itself wrapped in a
//! deferred scope, so changes made by observers it triggers are recorded
//! and applied once it returns. Recorded commands are replayed in order
//! when the outermost scope ends; commands recorded during replay are
//! applied by further passes of the same flush.
//!
//! [`Commands`] records into the world's queue (from observers and query
//! callbacks, which only hold `&World`) or into a [`Stage`](crate::Stage)'s
//! private queue.

use std::{fmt, ops::DerefMut};

use tracing::{debug, error, trace, warn};

use crate::{
    World,
    command::{Command, CommandQueue, Payload},
    component::Component,
    error::{EcsError, EcsResult},
    event::QueuedEvent,
    id::{CHILD_OF, Entity, IS_A, Id, pair},
};

impl World {
    // ==================== Deferred Scope ====================

    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        self.defer_depth > 0
    }

    /// Enter a deferred scope. Scopes nest.
    pub fn defer_begin(&mut self) {
        self.defer_depth += 1;
    }

    /// Leave a deferred scope, flushing when the outermost one ends.
    ///
    /// # Panics
    ///
    /// Panics without a matching [`World::defer_begin`].
    pub fn defer_end(&mut self) {
        assert!(self.defer_depth > 0, "defer_end without defer_begin");
        self.defer_depth -= 1;
        if self.defer_depth == 0 {
            self.flush();
        }
    }

    /// Run `f` in a deferred scope.
    pub fn defer<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.defer_begin();
        let result = f(self);
        self.defer_end();
        result
    }

    /// A handle recording into the world's deferred queue.
    #[must_use]
    pub fn commands(&self) -> Commands<'_> {
        Commands::new(self)
    }

    /// Number of commands waiting for the next flush.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.deferred.lock().len()
    }

    // ==================== Flush ====================

    /// Apply recorded commands until none are left.
    ///
    /// # Panics
    ///
    /// Panics if commands keep producing new commands for more than
    /// `max_flush_iterations` passes.
    pub fn flush(&mut self) {
        if self.flushing {
            return;
        }
        self.flushing = true;
        let mut passes = 0;
        loop {
            let commands = self.deferred.get_mut().take_commands();
            if commands.is_empty() {
                break;
            }
            passes += 1;
            if passes > self.config.max_flush_iterations {
                error!(passes, pending = commands.len(), "deferred commands keep re-queueing");
                for command in commands {
                    command.discard();
                }
                self.flushing = false;
                panic!(
                    "flush did not settle after {} passes",
                    self.config.max_flush_iterations
                );
            }
            debug!(pass = passes, commands = commands.len(), "flushing deferred commands");
            for command in commands {
                self.apply(command);
            }
        }
        // Payloads have all been consumed or discarded
        *self.deferred.get_mut() = CommandQueue::new();
        self.flushing = false;
    }

    /// Append the commands of a stage and apply them unless deferred.
    pub fn merge(&mut self, queue: CommandQueue) {
        debug!(commands = queue.len(), "merging command queue");
        self.deferred.get_mut().append(queue);
        if !self.is_deferred() {
            self.flush();
        }
    }

    fn apply(&mut self, command: Command) {
        trace!(command = command.name(), "replaying command");
        if let Some(entity) = target_of(&command) {
            if !self.is_alive(entity) {
                warn!(%entity, command = command.name(), "discarding command for dead entity");
                command.discard();
                return;
            }
        }
        let name = command.name();
        let result = match command {
            Command::Spawn { entity } => Ok(self.materialize(entity)),
            Command::Add { entity, id } => self.add_now(entity, id),
            Command::Remove { entity, id } => self.remove_now(entity, id),
            Command::Set {
                entity,
                id,
                payload,
            } => self.apply_set(entity, id, payload),
            Command::Modified { entity, id } => self.modified_now(entity, id),
            Command::Enable {
                entity,
                id,
                enabled,
            } => self.enable_now(entity, id, enabled),
            Command::Delete { entity } => self.delete_now(entity),
            Command::Clear { entity } => self.clear_now(entity),
            Command::Clone {
                src,
                dst,
                copy_values,
            } => self.clone_now(src, dst, copy_values),
            Command::Observe { id, observer } => {
                self.register_observer(id, *observer);
                Ok(true)
            }
            Command::Unobserve { id } => Ok(self.unregister_observer(id)),
            Command::Emit(event) => {
                self.emit_now(&event.as_desc());
                Ok(true)
            }
        };
        if let Err(error) = result {
            warn!(command = name, %error, "deferred command failed");
        }
    }

    fn apply_set(&mut self, entity: Entity, id: Option<Id>, payload: Payload) -> EcsResult<bool> {
        let id = match id {
            Some(id) => id,
            None => match self.register_payload_type(payload.info()) {
                Ok(component) => component.id(),
                Err(error) => {
                    payload.discard();
                    return Err(error);
                }
            },
        };
        if payload.info().size() == 0 {
            payload.discard();
            return self.add_now(entity, id);
        }
        // SAFETY: the payload holds an initialized value of its info's type
        let result = unsafe { self.set_now(entity, id, payload.as_ptr(), payload.info()) };
        if !matches!(result, Ok(true)) {
            payload.discard();
        }
        result
    }
}

/// Entity a command operates on, which must be alive when it is replayed.
const fn target_of(command: &Command) -> Option<Entity> {
    match command {
        Command::Add { entity, .. }
        | Command::Remove { entity, .. }
        | Command::Set { entity, .. }
        | Command::Modified { entity, .. }
        | Command::Enable { entity, .. }
        | Command::Delete { entity }
        | Command::Clear { entity } => Some(*entity),
        Command::Clone { src, .. } => Some(*src),
        Command::Spawn { .. }
        | Command::Observe { .. }
        | Command::Unobserve { .. }
        | Command::Emit(_) => None,
    }
}

// ==================== Commands ====================

enum Target<'a> {
    World,
    Stage(&'a mut CommandQueue),
}

/// Records structural changes for later.
///
/// Obtained from [`World::commands`], [`QueryIter::commands`] inside
/// observers and query callbacks, or [`Stage::commands`]. Entities created
/// with [`Commands::spawn`] get their id immediately and become alive when
/// the commands are applied.
///
/// [`QueryIter::commands`]: crate::QueryIter::commands
/// [`Stage::commands`]: crate::Stage::commands
pub struct Commands<'a> {
    world: &'a World,
    target: Target<'a>,
}

impl<'a> Commands<'a> {
    pub(crate) const fn new(world: &'a World) -> Self {
        Self {
            world,
            target: Target::World,
        }
    }

    pub(crate) fn for_stage(world: &'a World, queue: &'a mut CommandQueue) -> Self {
        Self {
            world,
            target: Target::Stage(queue),
        }
    }

    #[must_use]
    pub const fn world(&self) -> &'a World {
        self.world
    }

    fn record<R>(&mut self, f: impl FnOnce(&mut CommandQueue) -> R) -> R {
        match &mut self.target {
            Target::World => f(self.world.deferred.lock().deref_mut()),
            Target::Stage(queue) => f(&mut **queue),
        }
    }

    fn push(&mut self, command: Command) -> &mut Self {
        self.record(|queue| queue.push(command));
        self
    }

    /// Reserve an entity. It is alive once the commands are applied.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.world.entities.reserve();
        self.push(Command::Spawn { entity });
        entity
    }

    pub fn add_id(&mut self, entity: Entity, id: impl Into<Id>) -> &mut Self {
        self.push(Command::Add {
            entity,
            id: id.into(),
        })
    }

    /// Add component `T`, which must already be registered.
    pub fn add<T: Component>(&mut self, entity: Entity) -> EcsResult<&mut Self> {
        let component = self.registered::<T>()?;
        Ok(self.add_id(entity, component))
    }

    pub fn add_pair(&mut self, entity: Entity, relationship: Entity, target: Entity) -> &mut Self {
        self.add_id(entity, pair(relationship, target))
    }

    pub fn remove_id(&mut self, entity: Entity, id: impl Into<Id>) -> &mut Self {
        self.push(Command::Remove {
            entity,
            id: id.into(),
        })
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> &mut Self {
        match self.world.type_entity::<T>() {
            Some(component) => self.remove_id(entity, component),
            None => self,
        }
    }

    /// Assign component `T`. An unregistered `T` is registered when the
    /// command is applied.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> &mut Self {
        let id = self.world.type_entity::<T>().map(Entity::id);
        self.record(|queue| queue.push_set(entity, id, value));
        self
    }

    /// Assign a `T` value to `id`.
    pub fn set_id<T: Component>(&mut self, entity: Entity, id: impl Into<Id>, value: T) -> &mut Self {
        let id = id.into();
        self.record(|queue| queue.push_set(entity, Some(id), value));
        self
    }

    /// Assign raw bytes to an untyped component.
    pub fn set_raw(&mut self, entity: Entity, id: impl Into<Id>, bytes: &[u8]) -> EcsResult<&mut Self> {
        let id = id.into();
        let info = self.world.raw_target(id, bytes.len())?.clone();
        self.record(|queue| {
            // SAFETY: the bytes fill the whole value of a bitwise type
            unsafe {
                queue.push_set_with(entity, id, &info, |dst| {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
                });
            }
        });
        Ok(self)
    }

    pub fn modified(&mut self, entity: Entity, id: impl Into<Id>) -> &mut Self {
        self.push(Command::Modified {
            entity,
            id: id.into(),
        })
    }

    pub fn delete(&mut self, entity: Entity) -> &mut Self {
        self.push(Command::Delete { entity })
    }

    pub fn clear(&mut self, entity: Entity) -> &mut Self {
        self.push(Command::Clear { entity })
    }

    pub fn enable(&mut self, entity: Entity, id: impl Into<Id>, enabled: bool) -> &mut Self {
        self.push(Command::Enable {
            entity,
            id: id.into(),
            enabled,
        })
    }

    pub fn child_of(&mut self, child: Entity, parent: Entity) -> &mut Self {
        self.add_id(child, pair(CHILD_OF, parent))
    }

    pub fn is_a(&mut self, instance: Entity, base: Entity) -> &mut Self {
        self.add_id(instance, pair(IS_A, base))
    }

    /// Clone `src` into a new entity when applied.
    pub fn clone_entity(&mut self, src: Entity, copy_values: bool) -> Entity {
        let dst = self.spawn();
        self.push(Command::Clone {
            src,
            dst,
            copy_values,
        });
        dst
    }

    /// Emit an event when the commands are applied.
    pub fn emit(&mut self, event: QueuedEvent) -> &mut Self {
        self.push(Command::Emit(event))
    }

    fn registered<T: Component>(&self) -> EcsResult<Entity> {
        self.world
            .type_entity::<T>()
            .ok_or(EcsError::UnregisteredType(std::any::type_name::<T>()))
    }
}

impl fmt::Debug for Commands<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            Target::World => "world",
            Target::Stage(_) => "stage",
        };
        f.debug_struct("Commands").field("target", &target).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Position {
        x: f32,
    }

    #[derive(Debug, Clone, Copy, Default)]
    struct Tag;

    #[test]
    fn test_deferred_ops_apply_at_end() {
        let mut world = World::new();
        let e = world.spawn();
        world.defer_begin();
        world.set(e, Position { x: 1.0 }).unwrap();
        assert!(!world.has::<Position>(e));
        assert_eq!(world.pending_commands(), 1);
        world.defer_end();
        assert_eq!(world.get::<Position>(e), Some(Position { x: 1.0 }));
    }

    #[test]
    fn test_nested_scopes_flush_once() {
        let mut world = World::new();
        let e = world.spawn();
        world.defer_begin();
        world.defer_begin();
        world.add::<Tag>(e).unwrap();
        world.defer_end();
        assert!(!world.has::<Tag>(e));
        world.defer_end();
        assert!(world.has::<Tag>(e));
    }

    #[test]
    fn test_last_set_wins() {
        let mut world = World::new();
        let e = world.spawn();
        world.defer(|w| {
            w.set(e, Position { x: 1.0 }).unwrap();
            w.set(e, Position { x: 2.0 }).unwrap();
        });
        assert_eq!(world.get::<Position>(e), Some(Position { x: 2.0 }));
    }

    #[test]
    fn test_commands_on_dead_entity_are_discarded() {
        let mut world = World::new();
        let e = world.spawn();
        world.defer(|w| {
            w.delete(e).unwrap();
            w.set(e, String::from("dropped")).unwrap();
        });
        assert!(!world.is_alive(e));
        assert_eq!(world.pending_commands(), 0);
    }

    #[test]
    fn test_reserved_entity_usable_before_flush() {
        let mut world = World::new();
        let e = {
            let mut commands = world.commands();
            let e = commands.spawn();
            commands.set(e, Position { x: 3.0 });
            e
        };
        assert!(!world.is_alive(e));
        world.flush();
        assert!(world.is_alive(e));
        assert_eq!(world.get::<Position>(e), Some(Position { x: 3.0 }));
    }

    #[test]
    fn test_commands_add_requires_registration() {
        let world = World::new();
        let e = Entity::from_index(40);
        assert!(matches!(
            world.commands().add::<Tag>(e),
            Err(EcsError::UnregisteredType(_))
        ));
    }
}
