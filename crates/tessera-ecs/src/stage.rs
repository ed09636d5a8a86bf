//! Stages - per-thread command recording.
//!
//! A stage pairs a shared borrow of the world with a private command queue.
//! Worker threads read the world through their stage and record changes
//! into it; the queues are merged back on the main thread in a fixed order,
//! which keeps the result independent of thread scheduling.
//!
//! ```ignore
//! let queues: Vec<CommandQueue> = std::thread::scope(|s| {
//!     let handles: Vec<_> = (0..4)
//!         .map(|i| {
//!             let mut stage = world.stage();
//!             s.spawn(move || {
//!                 let mut it = query.iter(stage.world()).worker(i, 4);
//!                 while it.next() { /* stage.commands().set(...) */ }
//!                 stage.into_queue()
//!             })
//!         })
//!         .collect();
//!     handles.into_iter().map(|h| h.join().unwrap()).collect()
//! });
//! for queue in queues {
//!     world.merge(queue);
//! }
//! ```

use crate::{World, command::CommandQueue, component::Component, defer::Commands, id::Entity};

/// A private command queue over a shared world.
///
/// Entities spawned through a stage that is dropped, or whose queue is
/// dropped without [`World::merge`], are returned to the world and their
/// handles never become alive.
pub struct Stage<'w> {
    world: &'w World,
    queue: CommandQueue,
}

impl<'w> Stage<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            queue: CommandQueue::releasing_into(world.entities.released()),
        }
    }

    #[must_use]
    pub const fn world(&self) -> &'w World {
        self.world
    }

    /// Record commands into this stage.
    pub fn commands(&mut self) -> Commands<'_> {
        Commands::for_stage(self.world, &mut self.queue)
    }

    /// Read a component as the world currently stores it. Changes recorded
    /// in this stage are not visible until merged.
    #[must_use]
    pub fn get<T: Component + Clone>(&self, entity: Entity) -> Option<T> {
        self.world.get::<T>(entity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Give up the world borrow and keep the recorded commands, ready for
    /// [`World::merge`].
    #[must_use]
    pub fn into_queue(self) -> CommandQueue {
        self.queue
    }
}

impl std::fmt::Debug for Stage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("commands", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl World {
    /// Create a stage for recording commands off the main thread.
    #[must_use]
    pub fn stage(&self) -> Stage<'_> {
        Stage::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Score(u32);

    #[test]
    fn test_stage_changes_invisible_until_merge() {
        let mut world = World::new();
        world.component::<Score>().unwrap();
        let e = world.spawn();
        world.set(e, Score(1)).unwrap();

        let queue = {
            let mut stage = world.stage();
            stage.commands().set(e, Score(2));
            assert_eq!(stage.get::<Score>(e), Some(Score(1)));
            assert_eq!(stage.len(), 1);
            stage.into_queue()
        };
        assert_eq!(world.get::<Score>(e), Some(Score(1)));
        world.merge(queue);
        assert_eq!(world.get::<Score>(e), Some(Score(2)));
    }

    #[test]
    fn test_merge_order_decides_last_writer() {
        let mut world = World::new();
        world.component::<Score>().unwrap();
        let e = world.spawn();

        let (first, second) = {
            let mut a = world.stage();
            let mut b = world.stage();
            a.commands().set(e, Score(10));
            b.commands().set(e, Score(20));
            (a.into_queue(), b.into_queue())
        };
        world.merge(second);
        world.merge(first);
        assert_eq!(world.get::<Score>(e), Some(Score(10)));
    }

    #[test]
    fn test_dropped_stage_returns_reserved_entities() {
        let mut world = World::new();
        let abandoned = {
            let mut stage = world.stage();
            let mut commands = stage.commands();
            let e = commands.spawn();
            commands.set(e, Score(1));
            e
        };
        let mut stage = world.stage();
        let unmerged = stage.commands().spawn();
        let queue = stage.into_queue();
        assert_eq!(queue.len(), 1);
        drop(queue);
        assert!(!world.is_alive(abandoned));
        assert!(!world.is_alive(unmerged));

        let reused: Vec<Entity> = (0..2).map(|_| world.spawn()).collect();
        let mut indexes: Vec<_> = reused.iter().map(|e| e.index()).collect();
        indexes.sort_unstable();
        let mut expected = vec![abandoned.index(), unmerged.index()];
        expected.sort_unstable();
        assert_eq!(indexes, expected);
        assert!(!world.is_alive(abandoned));
        assert!(!world.is_alive(unmerged));
    }

    #[test]
    fn test_stages_on_threads() {
        let mut world = World::new();
        world.component::<Score>().unwrap();
        let entities: Vec<Entity> = (0..8).map(|_| world.spawn()).collect();

        let queues: Vec<CommandQueue> = std::thread::scope(|s| {
            let world = &world;
            let handles: Vec<_> = entities
                .chunks(4)
                .enumerate()
                .map(|(i, chunk)| {
                    s.spawn(move || {
                        let mut stage = world.stage();
                        for &e in chunk {
                            stage.commands().set(e, Score(u32::try_from(i).unwrap() + 1));
                        }
                        stage.into_queue()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for queue in queues {
            world.merge(queue);
        }
        assert_eq!(world.get::<Score>(entities[0]), Some(Score(1)));
        assert_eq!(world.get::<Score>(entities[7]), Some(Score(2)));
    }
}
