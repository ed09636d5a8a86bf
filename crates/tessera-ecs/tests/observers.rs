//! Observers for lifecycle and custom events.

use std::sync::Arc;

use parking_lot::Mutex;
use tessera_ecs::{
    EcsError, Entity, EventDesc, EventTarget, Id, ON_ADD, ON_REMOVE, ON_SET, Observer,
    QueuedEvent, World,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Health(u32);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Armor(u32);

type Log = Arc<Mutex<Vec<(Entity, Entity, Id)>>>;

/// Observer that records `(event, entity, id)` for every row it sees.
fn recorder(world: &World, log: &Log, events: &[Entity]) -> Observer {
    let query = world.query().with::<Health>().build().unwrap();
    let log = log.clone();
    let mut observer = Observer::new(&query, move |it| {
        let mut log = log.lock();
        for &e in it.entities() {
            log.push((it.event(), e, it.event_id()));
        }
    });
    for &event in events {
        observer = observer.event(event);
    }
    observer
}

#[test]
fn test_lifecycle_events() {
    init_tracing();
    let mut world = World::new();
    let health = world.component::<Health>().unwrap();
    let log: Log = Arc::default();
    world
        .observe(recorder(&world, &log, &[ON_ADD, ON_REMOVE, ON_SET]))
        .unwrap();

    let e = world.spawn();
    world.set(e, Health(10)).unwrap();
    world.set(e, Health(20)).unwrap();
    world.set(e, Armor(1)).unwrap();
    world.remove::<Health>(e).unwrap();

    let log = log.lock().clone();
    assert_eq!(log, vec![
        (ON_ADD, e, health.id()),
        (ON_SET, e, health.id()),
        (ON_SET, e, health.id()),
        (ON_REMOVE, e, health.id()),
    ]);
}

#[test]
fn test_observer_sees_value_on_set_and_before_remove() {
    init_tracing();
    let mut world = World::new();
    world.component::<Health>().unwrap();
    let seen: Arc<Mutex<Vec<(Entity, u32)>>> = Arc::default();

    let query = world.query().with::<Health>().build().unwrap();
    let sink = seen.clone();
    world
        .observe(
            Observer::new(&query, move |it| {
                let values = it.field::<Health>(0).unwrap();
                let mut sink = sink.lock();
                for value in values.iter() {
                    sink.push((it.event(), value.0));
                }
            })
            .event(ON_SET)
            .event(ON_REMOVE),
        )
        .unwrap();

    let e = world.spawn();
    world.set(e, Health(5)).unwrap();
    world.delete(e).unwrap();
    assert_eq!(*seen.lock(), vec![(ON_SET, 5), (ON_REMOVE, 5)]);
}

#[test]
fn test_delete_emits_remove() {
    init_tracing();
    let mut world = World::new();
    world.component::<Health>().unwrap();
    let log: Log = Arc::default();
    world.observe(recorder(&world, &log, &[ON_REMOVE])).unwrap();

    let parent = world.spawn();
    world.set(parent, Health(1)).unwrap();
    let child = world.spawn();
    world.set(child, Health(2)).unwrap();
    world.child_of(child, parent).unwrap();
    world.delete(parent).unwrap();

    let mut removed: Vec<Entity> = log.lock().iter().map(|(_, e, _)| *e).collect();
    removed.sort();
    let mut expected = vec![parent, child];
    expected.sort();
    assert_eq!(removed, expected);
}

#[test]
fn test_observer_commands_are_deferred() {
    init_tracing();
    let mut world = World::new();
    world.component::<Health>().unwrap();
    world.component::<Armor>().unwrap();

    let query = world.query().with::<Health>().build().unwrap();
    world
        .observe(
            Observer::new(&query, |it| {
                let mut commands = it.commands();
                for &e in it.entities() {
                    commands.set(e, Armor(3));
                }
            })
            .event(ON_ADD),
        )
        .unwrap();

    let e = world.spawn();
    world.set(e, Health(1)).unwrap();
    assert_eq!(world.get::<Armor>(e), Some(Armor(3)));
    assert_eq!(world.pending_commands(), 0);
}

#[test]
fn test_custom_event_with_param() {
    init_tracing();
    let mut world = World::new();
    world.component::<Health>().unwrap();
    let damage = world.entity_named(b"Damage");
    let hits: Arc<Mutex<Vec<(Entity, u32)>>> = Arc::default();

    let query = world.query().with::<Health>().build().unwrap();
    let sink = hits.clone();
    world
        .observe(
            Observer::new(&query, move |it| {
                let amount = *it.param::<u32>().unwrap();
                for &e in it.entities() {
                    sink.lock().push((e, amount));
                }
            })
            .event(damage),
        )
        .unwrap();

    let target = world.spawn();
    world.set(target, Health(100)).unwrap();
    let bystander = world.spawn();
    world.set(bystander, Armor(1)).unwrap();

    world.emit(EventDesc::new(damage, EventTarget::Entity(target)).param(&7u32));
    world.emit(EventDesc::new(damage, EventTarget::Entity(bystander)).param(&9u32));
    assert_eq!(*hits.lock(), vec![(target, 7)]);

    world.enqueue(QueuedEvent::new(damage, EventTarget::Entity(target)).param(11u32));
    world.enqueue(QueuedEvent::new(damage, EventTarget::Entity(target)).param(12u32));
    assert_eq!(world.pending_events(), 2);
    assert_eq!(hits.lock().len(), 1);
    assert_eq!(world.flush_events(), 2);
    assert_eq!(*hits.lock(), vec![(target, 7), (target, 11), (target, 12)]);
}

#[test]
fn test_yield_existing_and_unobserve() {
    init_tracing();
    let mut world = World::new();
    world.component::<Health>().unwrap();
    let a = world.spawn();
    world.set(a, Health(1)).unwrap();
    let b = world.spawn();
    world.set(b, Health(2)).unwrap();

    let log: Log = Arc::default();
    let id = world
        .observe(recorder(&world, &log, &[ON_ADD, ON_REMOVE]).yield_existing())
        .unwrap();
    let added = log.lock().iter().filter(|(ev, ..)| *ev == ON_ADD).count();
    assert_eq!(added, 2);

    world.unobserve(id).unwrap();
    let removed = log.lock().iter().filter(|(ev, ..)| *ev == ON_REMOVE).count();
    assert_eq!(removed, 2);
    assert_eq!(world.observer_count(), 0);
    assert!(matches!(world.unobserve(id), Err(EcsError::UnknownObserver(_))));

    let late = world.spawn();
    world.set(late, Health(3)).unwrap();
    assert_eq!(log.lock().len(), 4);
}

#[test]
fn test_observer_without_events_rejected() {
    init_tracing();
    let mut world = World::new();
    world.component::<Health>().unwrap();
    let query = world.query().with::<Health>().build().unwrap();
    let observer = Observer::new(&query, |_| {});
    assert!(matches!(
        world.observe(observer),
        Err(EcsError::InvalidTerm { .. })
    ));
}
