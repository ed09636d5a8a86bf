//! Events and the enqueued event queue.
//!
//! Events are entities. The built-in [`ON_ADD`](crate::id::ON_ADD),
//! [`ON_REMOVE`](crate::id::ON_REMOVE) and [`ON_SET`](crate::id::ON_SET) are
//! emitted by structural changes; any other entity can be emitted as a
//! custom event with [`World::emit`](crate::World::emit) (synchronous) or
//! [`World::enqueue`](crate::World::enqueue) (drained later by
//! [`World::flush_events`](crate::World::flush_events)).

use std::{any::Any, collections::VecDeque, fmt};

use smallvec::SmallVec;

use crate::{
    id::{Entity, Id},
    table::TableId,
};

/// What an event is emitted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventTarget {
    /// One entity's row.
    Entity(Entity),
    /// Every row of a table.
    Table(TableId),
}

/// A synchronous event.
#[derive(Clone, Copy)]
pub struct EventDesc<'a> {
    pub event: Entity,
    /// Ids the event is about. Empty means every observer of the event whose
    /// query matches the target is invoked.
    pub ids: &'a [Id],
    pub target: EventTarget,
    pub param: Option<&'a (dyn Any + Send + Sync)>,
}

impl<'a> EventDesc<'a> {
    #[must_use]
    pub const fn new(event: Entity, target: EventTarget) -> Self {
        Self {
            event,
            ids: &[],
            target,
            param: None,
        }
    }

    #[must_use]
    pub const fn ids(mut self, ids: &'a [Id]) -> Self {
        self.ids = ids;
        self
    }

    #[must_use]
    pub const fn param(mut self, param: &'a (dyn Any + Send + Sync)) -> Self {
        self.param = Some(param);
        self
    }
}

impl fmt::Debug for EventDesc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDesc")
            .field("event", &self.event)
            .field("ids", &self.ids)
            .field("target", &self.target)
            .field("has_param", &self.param.is_some())
            .finish()
    }
}

/// An owned event waiting to be emitted.
pub struct QueuedEvent {
    pub event: Entity,
    pub ids: SmallVec<[Id; 2]>,
    pub target: EventTarget,
    pub param: Option<Box<dyn Any + Send + Sync>>,
}

impl QueuedEvent {
    #[must_use]
    pub fn new(event: Entity, target: EventTarget) -> Self {
        Self {
            event,
            ids: SmallVec::new(),
            target,
            param: None,
        }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<Id>) -> Self {
        self.ids.push(id.into());
        self
    }

    #[must_use]
    pub fn param<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.param = Some(Box::new(value));
        self
    }

    /// Borrow as a synchronous event.
    #[must_use]
    pub fn as_desc(&self) -> EventDesc<'_> {
        EventDesc {
            event: self.event,
            ids: &self.ids,
            target: self.target,
            param: self.param.as_deref(),
        }
    }
}

impl fmt::Debug for QueuedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedEvent")
            .field("event", &self.event)
            .field("ids", &self.ids)
            .field("target", &self.target)
            .finish()
    }
}

/// FIFO of enqueued events.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: VecDeque<QueuedEvent>,
}

impl EventQueue {
    pub(crate) fn push(&mut self, event: QueuedEvent) {
        self.events.push_back(event);
    }

    pub(crate) fn pop(&mut self) -> Option<QueuedEvent> {
        self.events.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Damage {
        amount: f32,
    }

    #[test]
    fn test_queue_is_fifo() {
        let target = EventTarget::Entity(Entity::from_index(40));
        let mut queue = EventQueue::default();
        queue.push(QueuedEvent::new(Entity::from_index(50), target));
        queue.push(QueuedEvent::new(Entity::from_index(51), target));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().event, Entity::from_index(50));
        assert_eq!(queue.pop().unwrap().event, Entity::from_index(51));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_param_round_trips_through_desc() {
        let event = QueuedEvent::new(Entity::from_index(50), EventTarget::Table(TableId::ROOT))
            .id(Entity::from_index(41))
            .param(Damage { amount: 2.5 });
        let desc = event.as_desc();
        assert_eq!(desc.ids.len(), 1);
        let damage = desc.param.and_then(|p| p.downcast_ref::<Damage>()).unwrap();
        assert!((damage.amount - 2.5).abs() < f32::EPSILON);
    }
}
