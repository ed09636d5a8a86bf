//! Storage properties: dense tables, generations, migration and locking.

use std::sync::atomic::{AtomicUsize, Ordering};

use tessera_ecs::{ComponentDesc, EcsError, Entity, TypeHooks, World, pair};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct A(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
struct C([u8; 3]);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct D(f32);

static B_DROPS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
struct B(String);

impl Drop for B {
    fn drop(&mut self) {
        B_DROPS.fetch_add(1, Ordering::SeqCst);
    }
}

/// Every table holds exactly the live entities whose type equals the table's.
fn assert_dense(world: &World, live: &[Entity]) {
    let mut seen = 0;
    for table in world.tables() {
        for (row, &entity) in table.entities().iter().enumerate() {
            assert!(world.is_alive(entity), "dead entity {entity} left in a table");
            assert_eq!(world.table_of(entity), Some(table.id()));
            assert_eq!(world.type_of(entity), Some(table.ids()));
            for column in table.columns() {
                assert_eq!(column.len(), table.len());
                assert!(column.get_raw(row).is_some());
            }
            if live.contains(&entity) {
                seen += 1;
            }
        }
    }
    assert_eq!(seen, live.len());
}

#[test]
fn test_tables_stay_dense() {
    init_tracing();
    let mut world = World::new();
    let mut live = Vec::new();
    for i in 0..64u64 {
        let e = world.spawn();
        world.set(e, A(i)).unwrap();
        if i % 2 == 0 {
            world.set(e, D(i as f32)).unwrap();
        }
        if i % 3 == 0 {
            world.set(e, C([1, 2, 3])).unwrap();
        }
        live.push(e);
    }
    assert_dense(&world, &live);

    for (i, &e) in live.iter().enumerate() {
        match i % 4 {
            0 => {
                world.remove::<A>(e).unwrap();
            }
            1 => {
                world.set(e, D(0.5)).unwrap();
            }
            2 => {
                world.delete(e).unwrap();
            }
            _ => {
                world.clear(e).unwrap();
            }
        }
    }
    live.retain(|&e| world.is_alive(e));
    assert_dense(&world, &live);

    for (i, &e) in live.iter().enumerate() {
        if i % 4 == 1 {
            assert_eq!(world.get::<D>(e), Some(D(0.5)));
        }
    }
}

#[test]
fn test_generation_safety() {
    init_tracing();
    let mut world = World::new();
    let e = world.spawn();
    world.set(e, A(1)).unwrap();
    world.delete(e).unwrap();
    assert!(!world.is_alive(e));

    let reused = world.spawn();
    assert_eq!(reused.index(), e.index());
    assert_ne!(reused, e);
    assert!(world.is_alive(reused));
    assert!(!world.is_alive(e));
    assert_eq!(world.get_alive(e), Some(reused));

    assert_eq!(world.get::<A>(e), None);
    assert!(!world.set(e, A(2)).unwrap());
    assert!(!world.has::<A>(reused));
}

#[test]
fn test_migration_preserves_values_and_drops_once() {
    init_tracing();
    let mut world = World::new();
    world
        .component_with::<D>(TypeHooks::default().with_default::<D>())
        .unwrap();
    let a = world.component::<A>().unwrap();
    let c = world.component::<C>().unwrap();
    let d = world.type_entity::<D>().unwrap();

    let e = world.spawn();
    world.set(e, A(0xDEAD_BEEF)).unwrap();
    world.set(e, B("payload".to_owned())).unwrap();
    world.set(e, C([7, 8, 9])).unwrap();
    let before = B_DROPS.load(Ordering::SeqCst);

    world.add::<D>(e).unwrap();
    assert_eq!(B_DROPS.load(Ordering::SeqCst), before);
    world.remove::<B>(e).unwrap();
    assert_eq!(B_DROPS.load(Ordering::SeqCst), before + 1);

    let mut expected = vec![a.id(), c.id(), d.id()];
    expected.sort();
    assert_eq!(world.type_of(e).unwrap(), expected.as_slice());
    assert_eq!(world.get::<A>(e), Some(A(0xDEAD_BEEF)));
    assert_eq!(world.get::<C>(e), Some(C([7, 8, 9])));
    assert_eq!(world.get::<D>(e), Some(D::default()));

    world.delete(e).unwrap();
    assert_eq!(B_DROPS.load(Ordering::SeqCst), before + 1);
}

#[test]
fn test_values_dropped_with_world() {
    init_tracing();
    static DROPS: AtomicUsize = AtomicUsize::new(0);
    struct Tracked(u8);
    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    {
        let mut world = World::new();
        for _ in 0..5 {
            let e = world.spawn();
            world.set(e, Tracked(0)).unwrap();
        }
        // A set over an existing value drops the old one
        let e = world.spawn();
        world.set(e, Tracked(0)).unwrap();
        world.set(e, Tracked(0)).unwrap();
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }
    assert_eq!(DROPS.load(Ordering::SeqCst), 7);
}

#[test]
fn test_locked_table_rejects_structural_change() {
    init_tracing();
    let mut world = World::new();
    let e = world.spawn();
    world.set(e, A(1)).unwrap();

    let query = world.query().with::<A>().build().unwrap();
    let mut it = query.iter(&world);
    assert!(it.next());
    // Leak the iterator so its table stays locked
    std::mem::forget(it);

    let err = world.set(e, D(1.0)).unwrap_err();
    assert!(matches!(err, EcsError::TableLocked { entity } if entity == e));
    assert!(matches!(world.delete(e), Err(EcsError::TableLocked { .. })));
    assert!(world.is_alive(e));
    assert_eq!(world.get::<A>(e), Some(A(1)));

    // Writing in place is not structural
    assert!(world.set(e, A(2)).unwrap());
    assert_eq!(world.get::<A>(e), Some(A(2)));
}

#[test]
fn test_delete_fails_while_a_referrer_is_locked() {
    init_tracing();
    let mut world = World::new();
    let likes = world.spawn();
    let target = world.spawn();
    let holder = world.spawn();
    world.set(holder, A(1)).unwrap();
    world.add_pair(holder, likes, target).unwrap();
    let parent = world.spawn();
    let child = world.spawn();
    world.set(child, A(2)).unwrap();
    world.child_of(child, parent).unwrap();

    let query = world.query().with::<A>().build().unwrap();
    let mut it = query.iter(&world);
    while it.next() {
        if it.entities().contains(&holder) {
            break;
        }
    }
    std::mem::forget(it);

    assert!(matches!(
        world.delete(target),
        Err(EcsError::TableLocked { entity }) if entity == holder
    ));
    assert!(world.is_alive(target));
    assert!(world.has_id(holder, pair(likes, target)));

    // Nothing is deleted when a descendant cannot be
    let mut it = query.iter(&world);
    while it.next() {
        if it.entities().contains(&child) {
            break;
        }
    }
    std::mem::forget(it);
    assert!(matches!(world.delete(parent), Err(EcsError::TableLocked { .. })));
    assert!(world.is_alive(parent));
    assert!(world.is_alive(child));
}

#[test]
fn test_lock_released_after_iteration() {
    init_tracing();
    let mut world = World::new();
    let e = world.spawn();
    world.set(e, A(1)).unwrap();

    let query = world.query().with::<A>().build().unwrap();
    let mut it = query.iter(&world);
    while it.next() {}
    drop(it);
    assert!(world.set(e, D(1.0)).unwrap());

    let mut it = query.iter(&world);
    assert!(it.next());
    it.fini();
    assert!(world.remove::<D>(e).unwrap());
}

#[test]
fn test_introspection() {
    init_tracing();
    let mut world = World::new();
    let a = world.component::<A>().unwrap();
    let e = world.spawn();
    world.set(e, A(3)).unwrap();

    let info = world.type_info(a).unwrap();
    assert_eq!(info.size(), std::mem::size_of::<A>());
    assert!(info.is::<A>());

    let table = world.table_of(e).unwrap();
    assert_eq!(world.column_index(table, a), Some(0));
    assert_eq!(world.type_of(e), Some(&[a.id()][..]));
    let unrelated = world.spawn();
    assert_eq!(world.column_index(table, unrelated), None);
}

#[test]
fn test_register_rejects_ids_already_used_in_pairs() {
    init_tracing();
    let mut world = World::new();
    let rel = world.spawn();
    let tgt = world.spawn();
    let e = world.spawn();
    world.add_pair(e, rel, tgt).unwrap();

    for id in [rel, tgt] {
        assert!(matches!(
            world.register(id, ComponentDesc::new("Rel", 4, 4)),
            Err(EcsError::InvalidComponent { .. })
        ));
    }
    assert!(world.type_info(pair(rel, tgt)).is_none());
    assert!(world.get_ptr(e, pair(rel, tgt)).is_none());
    assert!(world.has_id(e, pair(rel, tgt)));

    // An id never used in a table can still be given a type
    let fresh = world.spawn();
    assert!(world.register(fresh, ComponentDesc::new("Rel", 4, 4)).is_ok());
    assert!(world.set_raw(e, pair(fresh, tgt), &7u32.to_le_bytes()).unwrap());
    assert!(world.get_ptr(e, pair(fresh, tgt)).is_some());
}
