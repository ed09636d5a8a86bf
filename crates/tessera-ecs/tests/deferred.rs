//! Deferred commands, stages and the deferred iteration scenario.

use tessera_ecs::{CHILD_OF, EcsResult, Entity, TypeHooks, World};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Mass(u32);

#[derive(Debug, Clone, Copy, Default)]
struct Sleeping;

fn setup() -> (World, Vec<Entity>) {
    let mut world = World::new();
    world
        .component_with::<Position>(TypeHooks::default().with_default::<Position>())
        .unwrap();
    world.component::<Velocity>().unwrap();
    world.component::<Mass>().unwrap();
    world.component::<Sleeping>().unwrap();
    let entities = (0..6).map(|_| world.spawn()).collect();
    (world, entities)
}

fn apply_ops(world: &mut World, e: &[Entity]) -> EcsResult<()> {
    world.set(e[0], Position { x: 1.0, y: 1.0 })?;
    world.set(e[0], Velocity { x: 2.0, y: 0.0 })?;
    world.add::<Position>(e[1])?;
    world.add::<Sleeping>(e[1])?;
    world.set(e[2], Mass(3))?;
    world.set(e[2], Mass(4))?;
    world.remove::<Mass>(e[2])?;
    world.set(e[2], Mass(5))?;
    world.child_of(e[3], e[0])?;
    world.set(e[3], Velocity { x: -1.0, y: 0.5 })?;
    world.delete(e[4])?;
    world.set(e[5], Position { x: 9.0, y: 9.0 })?;
    world.clear(e[5])?;
    world.set(e[5], Mass(1))?;
    world.remove::<Sleeping>(e[1])?;
    Ok(())
}

fn snapshot(world: &World, entities: &[Entity]) -> Vec<String> {
    entities
        .iter()
        .map(|&e| {
            format!(
                "{:?} {:?} {:?} {:?} {:?} {} {:?}",
                world.type_of(e),
                world.get::<Position>(e),
                world.get::<Velocity>(e),
                world.get::<Mass>(e),
                world.parent(e),
                world.has::<Sleeping>(e),
                world.is_alive(e),
            )
        })
        .collect()
}

#[test]
fn test_deferred_matches_immediate() {
    init_tracing();
    let (mut immediate, a) = setup();
    apply_ops(&mut immediate, &a).unwrap();

    let (mut deferred, b) = setup();
    assert_eq!(a, b);
    deferred.defer_begin();
    apply_ops(&mut deferred, &b).unwrap();
    assert!(deferred.pending_commands() > 0);
    assert_eq!(deferred.get::<Mass>(b[2]), None);
    deferred.defer_end();

    assert_eq!(deferred.pending_commands(), 0);
    assert_eq!(snapshot(&immediate, &a), snapshot(&deferred, &b));
    assert_eq!(immediate.get::<Mass>(a[2]), Some(Mass(5)));
    assert_eq!(immediate.type_of(a[5]).map(<[_]>::len), Some(1));
}

#[test]
fn test_optional_field_and_deferred_add() {
    init_tracing();
    let mut world = World::new();
    world.component::<Position>().unwrap();
    world.component::<Velocity>().unwrap();
    let e1 = world.spawn();
    world.set(e1, Position { x: 0.0, y: 0.0 }).unwrap();
    world.set(e1, Velocity { x: 1.0, y: 1.0 }).unwrap();
    let e2 = world.spawn();
    world.set(e2, Position { x: 5.0, y: 5.0 }).unwrap();

    let query = world
        .query()
        .with::<Position>()
        .optional::<Velocity>()
        .build()
        .unwrap();

    let mut rows = Vec::new();
    query.run(&mut world, |it| {
        let positions = it.field::<Position>(0).unwrap();
        let velocities = it.field::<Velocity>(1);
        assert_eq!(velocities.is_some(), it.is_set(1));
        for (i, &e) in it.entities().iter().enumerate() {
            rows.push((e, velocities.as_ref().map(|v| v[i])));
            if velocities.is_none() {
                it.commands().set(e, Velocity { x: -1.0, y: 0.0 });
            }
            assert_eq!(positions[i], it.world().get::<Position>(e).unwrap());
        }
    });
    rows.sort_by_key(|(e, _)| *e);
    assert_eq!(rows, vec![
        (e1, Some(Velocity { x: 1.0, y: 1.0 })),
        (e2, None)
    ]);

    // The deferred set landed after the frame
    let mut next = Vec::new();
    query.each(&world, |it| {
        let velocities = it.field::<Velocity>(1).unwrap();
        for (i, &e) in it.entities().iter().enumerate() {
            next.push((e, velocities[i]));
        }
    });
    next.sort_by_key(|(e, _)| *e);
    assert_eq!(next, vec![
        (e1, Velocity { x: 1.0, y: 1.0 }),
        (e2, Velocity { x: -1.0, y: 0.0 })
    ]);
}

#[test]
fn test_commands_spawn_and_hierarchy() {
    init_tracing();
    let mut world = World::new();
    world.component::<Mass>().unwrap();
    let parent = world.spawn();

    world.defer_begin();
    let child = {
        let mut commands = world.commands();
        let child = commands.spawn();
        commands.set(child, Mass(2)).child_of(child, parent);
        child
    };
    assert!(!world.is_alive(child));
    world.defer_end();

    assert!(world.is_alive(child));
    assert_eq!(world.get::<Mass>(child), Some(Mass(2)));
    assert_eq!(world.children(parent), vec![child]);
    assert_eq!(world.parent(child), Some(parent));
    assert!(world.has_id(child, tessera_ecs::pair(CHILD_OF, parent)));
}

#[test]
fn test_deferred_clone_and_delete() {
    init_tracing();
    let mut world = World::new();
    world
        .component_with::<Mass>(TypeHooks::default().with_clone::<Mass>())
        .unwrap();
    let src = world.spawn();
    world.set(src, Mass(8)).unwrap();

    let copy = world.defer(|w| {
        let copy = w.clone_entity(src, true).unwrap().unwrap();
        w.delete(src).unwrap();
        copy
    });
    assert!(!world.is_alive(src));
    assert_eq!(world.get::<Mass>(copy), Some(Mass(8)));
}

#[test]
fn test_stages_merge_in_order() {
    init_tracing();
    let mut world = World::new();
    world.component::<Mass>().unwrap();
    let entities: Vec<Entity> = (0..16).map(|_| world.spawn()).collect();
    for &e in &entities {
        world.set(e, Mass(0)).unwrap();
    }
    let query = world.query().with::<Mass>().build().unwrap();

    let queues: Vec<_> = std::thread::scope(|s| {
        let world = &world;
        let query = &query;
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                s.spawn(move || {
                    let mut stage = world.stage();
                    let mut it = query.iter(world).worker(worker, 4);
                    while it.next() {
                        for &e in it.entities() {
                            stage.commands().set(e, Mass(u32::try_from(worker).unwrap() + 1));
                        }
                    }
                    drop(it);
                    stage.into_queue()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let recorded: usize = queues.iter().map(tessera_ecs::CommandQueue::len).sum();
    assert_eq!(recorded, entities.len());
    for queue in queues {
        world.merge(queue);
    }
    for &e in &entities {
        assert!(world.get::<Mass>(e).unwrap().0 >= 1);
    }
}
