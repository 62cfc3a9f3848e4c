use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use super::*;
use crate::test_util::*;
use crate::Error;

lazy_static::lazy_static! {
    /// Number of entities created by stress tests. Configurable through `DYNARCH_STRESS_ENTITIES`.
    static ref STRESS_ENTITIES: usize = std::env::var("DYNARCH_STRESS_ENTITIES")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1000);
}

#[test]
fn test_create_destroy_reuse() {
    init();

    let mut world = World::new();
    let a = world.create();
    let b = world.create();
    assert_eq!(world.len(), 2);

    assert!(world.destroy(a));
    assert!(!world.destroy(a), "destroying twice is a no-op");
    assert!(!world.is_alive(a));
    assert_eq!(world.len(), 1);

    let c = world.create();
    assert_eq!(c.index(), a.index());
    assert_ne!(c, a);
    assert!(world.is_alive(b));
    assert!(world.is_alive(c));
    assert_eq!(world.archetype_of(c).map(Archetype::id), Some(ArchetypeId::EMPTY));
}

#[test]
fn test_edit_migrates_once() {
    let mut world = World::new();
    let entity = world.entity().add(Foo(1)).apply();
    let other = world.entity().add(Foo(5)).add(Bar(6)).apply();

    world.edit(entity).add(Bar(2)).apply();
    assert!(world.has_all::<(Foo, Bar)>(entity));
    assert_eq!(world.get::<Foo>(entity), Some(&Foo(1)));
    assert_eq!(world.get::<Bar>(entity), Some(&Bar(2)));
    assert_eq!(world.archetype_of(entity).map(Archetype::id), world.archetype_of(other).map(Archetype::id));

    world.edit(entity).remove::<Foo>().add(Marker).apply();
    assert!(!world.has::<Foo>(entity));
    assert!(world.has_all::<(Bar, Marker)>(entity));
    assert_eq!(world.get::<Bar>(entity), Some(&Bar(2)));
    assert_eq!(world.get::<Foo>(other), Some(&Foo(5)), "other rows are untouched");

    if let Some(bar) = world.get_mut::<Bar>(entity) {
        bar.0 = 9;
    }
    assert_eq!(world.get::<Bar>(entity), Some(&Bar(9)));
}

#[test]
fn test_edit_reuses_transitions() {
    let mut world = World::new();
    let a = world.entity().add(Foo(1)).apply();
    let b = world.entity().add(Foo(2)).apply();

    world.edit(a).add(Bar(1)).apply();
    let transitions = world.transition_count();
    let archetypes = world.archetypes().count();

    world.edit(b).add(Bar(2)).apply();
    assert_eq!(world.transition_count(), transitions);
    assert_eq!(world.archetypes().count(), archetypes);
}

#[test]
fn test_empty_edit() {
    let mut world = World::new();
    let entity = world.entity().add(Foo(1)).apply();
    let transitions = world.transition_count();

    assert_eq!(world.edit(entity).apply(), entity);
    assert_eq!(world.transition_count(), transitions);
}

#[test]
fn test_edit_dead_entity() {
    let mut world = World::new();
    let entity = world.entity().add(Foo(1)).apply();
    world.destroy(entity);

    let log = OpLog::new();
    world.edit(entity).add(Traced::new(1, &log)).apply();
    assert!(!world.is_alive(entity));
    assert_eq!(log.take(), vec![Op::Construct(1), Op::Drop(1)]);
}

#[test]
#[should_panic = "only new components can be added"]
fn test_add_present() {
    let mut world = World::new();
    let entity = world.entity().add(Foo(1)).apply();
    world.edit(entity).add(Foo(2)).apply();
}

#[test]
#[should_panic = "only new components can be added"]
fn test_add_twice() {
    let mut world = World::new();
    world.entity().add(Foo(1)).add(Foo(2)).apply();
}

#[test]
#[should_panic = "Cannot remove component dynarch::test_util::Bar: not present"]
fn test_remove_absent() {
    let mut world = World::new();
    let entity = world.entity().add(Foo(1)).apply();
    world.edit(entity).remove::<Bar>().apply();
}

#[test]
#[should_panic = "Cannot add and remove the same components in one edit"]
fn test_add_and_remove() {
    let mut world = World::new();
    let entity = world.entity().add(Foo(1)).apply();
    world.edit(entity).remove::<Bar>().add(Bar(1)).apply();
}

#[test]
fn test_component_lifecycle() {
    let log = OpLog::new();
    let mut world = World::new();

    let a = world.entity().add(Traced::new(1, &log)).apply();
    let b = world.entity().add(Traced::new(2, &log)).apply();
    let c = world.entity().add(Traced::new(3, &log)).add(Foo(0)).apply();

    world.edit(a).add(Foo(1)).apply();
    world.edit(c).remove::<Traced>().apply();
    world.destroy(b);
    assert_eq!(
        log.take(),
        vec![Op::Construct(1), Op::Construct(2), Op::Construct(3), Op::Drop(3), Op::Drop(2)],
        "migration moves values without cloning or dropping them",
    );

    assert_eq!(world.get::<Traced>(a).map(|traced| traced.value), Some(1));
    drop(world);
    assert_eq!(log.take(), vec![Op::Drop(1)]);
    assert_eq!(log.count(|op| matches!(op, Op::Clone(_))), 0);
}

#[test]
fn test_locations_after_migration() {
    let mut world = World::new();
    let entities: Vec<_> = (0..4).map(|value| world.entity().add(Foo(value)).apply()).collect();

    world.edit(entities[0]).add(Marker).apply();

    let source = world.archetype_of(entities[1]).expect("entity is alive");
    assert_eq!(source.entities().collect::<Vec<_>>(), vec![entities[3], entities[1], entities[2]]);
    for (value, &entity) in entities.iter().enumerate() {
        assert_eq!(world.get::<Foo>(entity), Some(&Foo(value as i32)));
    }
}

#[test]
fn test_deferred_commands_fifo() {
    let mut world = World::new();
    let entity = world.entity().add(Foo(1)).apply();

    let mut reserved = None;
    View::new().for_each(&mut world, |id: EntityId, deferred: Deferred| {
        deferred.edit(id).add(Bar(2)).apply();
        deferred.edit(id).remove::<Foo>().apply();
        let child = deferred.entity().add(Foo(3)).apply();
        assert!(!deferred.is_alive(child));
        reserved = Some(child);
    });

    let child = reserved.expect("callback ran once");
    assert!(world.has::<Bar>(entity));
    assert!(!world.has::<Foo>(entity));
    assert_eq!(world.get::<Foo>(child), Some(&Foo(3)));
    assert_ne!(child.index(), entity.index());
}

#[test]
fn test_reserved_ids_do_not_collide() {
    let mut world = World::new();
    let first = world.create();
    world.destroy(first);

    let mut reserved = Vec::new();
    let parent = world.entity().add(Marker).apply();
    View::new().with::<Marker>().for_each(&mut world, |deferred: Deferred| {
        reserved.push(deferred.entity().add(Foo(1)).apply());
        reserved.push(deferred.entity().apply());
    });

    assert_eq!(parent.index(), first.index(), "immediate creation reuses the freed slot");
    let created = world.create();
    let mut indices: Vec<_> = reserved.iter().chain([&parent, &created]).map(|id| id.index()).collect();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), 4);
    assert!(reserved.iter().all(|&id| world.is_alive(id)));
}

#[test]
fn test_commands_discarded_on_panic() {
    let mut world = World::new();
    let victim = world.entity().add(Foo(1)).apply();
    let reserved = Cell::new(None);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        View::new().for_each(&mut world, |id: EntityId, _: &Foo, deferred: Deferred| {
            deferred.destroy(id);
            reserved.set(Some(deferred.entity().add(Bar(1)).apply()));
            panic!("callback failed");
        })
    }));
    assert!(result.is_err());
    assert!(world.is_alive(victim));

    let reserved = reserved.get().expect("callback was invoked");
    let created = world.create();
    assert!(world.is_alive(victim), "unrelated operations must not apply discarded commands");
    assert!(!world.is_alive(reserved));
    assert_ne!(created.index(), reserved.index());
    assert_eq!(world.len(), 2);

    // the discarded reservation is returned to the free list with a new generation
    let reused = world.create();
    assert_eq!(reused.index(), reserved.index());
    assert_ne!(reused, reserved);
}

#[test]
fn test_dispatch_commands_discarded_on_panic() {
    #[derive(crate::Event)]
    #[dynarch(dynarch_as(crate))]
    struct Explode;

    let mut world = World::new();
    let victim = world.entity().add(Marker).apply();
    world.system("explode").with::<Marker>().on_event::<Explode>().for_each(
        |id: EntityId, deferred: Deferred| {
            deferred.destroy(id);
            deferred.emit(Explode);
            panic!("callback failed");
        },
    );
    world.order_systems();

    let result = panic::catch_unwind(AssertUnwindSafe(|| world.emit_immediately(Explode)));
    assert!(result.is_err());

    world.entity().add(Foo(0)).apply();
    assert!(world.is_alive(victim));
    assert_eq!(world.pending_events(), 0);
}

#[test]
fn test_appear_disappear() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut world = World::new();

    let appear = Rc::clone(&seen);
    world
        .system("foo-appear")
        .on_event::<OnAppear>()
        .for_each(move |_: &Foo, id: EntityId| appear.borrow_mut().push(("appear", id)));
    let disappear = Rc::clone(&seen);
    world.system("foo-disappear").on_event::<OnDisappear>().for_each(
        move |foo: &Foo, id: EntityId| {
            assert_eq!(foo.0, 7, "components are still readable");
            disappear.borrow_mut().push(("disappear", id));
        },
    );
    world.order_systems();

    let entity = world.entity().add(Foo(7)).apply();
    assert_eq!(seen.take(), vec![("appear", entity)]);

    // still matched on both sides of the migration
    world.edit(entity).add(Bar(1)).apply();
    assert!(seen.take().is_empty());

    world.edit(entity).remove::<Foo>().apply();
    assert_eq!(seen.take(), vec![("disappear", entity)]);

    world.edit(entity).add(Foo(7)).apply();
    assert_eq!(seen.take(), vec![("appear", entity)]);

    world.destroy(entity);
    assert_eq!(seen.take(), vec![("disappear", entity)]);

    let bare = world.create();
    world.destroy(bare);
    assert!(seen.take().is_empty());
}

#[test]
fn test_disappear_callbacks_can_defer() {
    let mut world = World::new();
    world.system("cleanup").on_event::<OnDisappear>().for_each(|foo: &Foo, deferred: Deferred| {
        deferred.entity().add(Bar(foo.0)).apply();
    });
    world.order_systems();

    let entity = world.entity().add(Foo(4)).apply();
    world.destroy(entity);

    let mut bars = Vec::new();
    View::new().for_each(&mut world, |bar: &Bar| bars.push(bar.0));
    assert_eq!(bars, vec![4]);
}

#[test]
fn test_allocation_failure_is_atomic() {
    init();

    let allocator = FailingAllocator::new(1);
    let mut world = World::with_allocator(allocator.clone());
    let entity = world.entity().add(Foo(1)).apply();

    let log = OpLog::new();
    let err = world.edit(entity).add(Traced::new(2, &log)).try_apply().expect_err("no chunk left");
    assert!(matches!(err, Error::ChunkAlloc { .. }));
    assert!(err.to_string().starts_with("cannot allocate a chunk of"));
    assert_eq!(log.take(), vec![Op::Construct(2), Op::Drop(2)]);
    assert!(world.has::<Foo>(entity));
    assert!(!world.has::<Traced>(entity));
    assert_eq!(world.get::<Foo>(entity), Some(&Foo(1)));

    assert!(world.entity().add(Bar(1)).try_apply().is_err());
    assert_eq!(world.len(), 1);

    allocator.refill(1);
    world.edit(entity).add(Bar(2)).apply();
    assert_eq!(world.get::<Bar>(entity), Some(&Bar(2)));
    assert_eq!(world.get::<Foo>(entity), Some(&Foo(1)));
}

#[test]
fn test_failed_creation_reuses_id() {
    let allocator = FailingAllocator::new(0);
    let mut world = World::with_allocator(allocator.clone());
    assert!(world.try_create().is_err());
    assert!(world.is_empty());

    allocator.refill(1);
    let entity = world.try_create().expect("allocator was refilled");
    assert_eq!((entity.index(), entity.generation()), (0, 0));
}

#[test]
fn test_clone_entity() {
    comp::register_cloneable::<Traced>();
    comp::register_cloneable::<Foo>();

    let log = OpLog::new();
    let mut world = World::new();
    let original = world.entity().add(Traced::new(1, &log)).add(Foo(5)).apply();

    let copy = world.clone_entity(original).expect("entity is alive");
    assert_ne!(copy, original);
    assert_eq!(world.get::<Foo>(copy), Some(&Foo(5)));
    assert_eq!(world.get::<Traced>(copy).map(|traced| traced.value), Some(1));
    assert_eq!(log.take(), vec![Op::Construct(1), Op::Clone(1)]);

    world.destroy(original);
    assert_eq!(world.clone_entity(original), None);
}

#[test]
#[should_panic = "is not cloneable, register it with `comp::register_cloneable`"]
fn test_clone_uncloneable() {
    struct Opaque;

    let mut world = World::new();
    let entity = world.entity().add(Opaque).apply();
    world.clone_entity(entity);
}

#[test]
fn test_config() {
    let config = Config { entity_capacity: 64, ..Config::default() };
    assert!(format!("{config:?}").contains("entity_capacity: 64"));

    let mut world = World::with_config(config);
    world.create();
    assert!(format!("{world:?}").contains("entities: 1"));
}

#[test]
fn test_stress() {
    init();

    let count = *STRESS_ENTITIES;
    let mut world = World::new();
    let mut alive = Vec::new();
    for index in 0..count {
        let entity = match index % 3 {
            0 => world.entity().add(Foo(index as i32)).apply(),
            1 => world.entity().add(Foo(index as i32)).add(Bar(0)).apply(),
            _ => world.entity().add(Bar(0)).add(Light(0)).apply(),
        };
        alive.push(entity);
    }

    for entity in alive.drain(..).step_by(2) {
        world.destroy(entity);
    }
    assert_eq!(world.len(), count / 2);

    let mut total = 0;
    let mut expected = 0;
    for entity in world.entities().iter() {
        if let Some(foo) = world.get::<Foo>(entity) {
            expected += i64::from(foo.0);
        }
    }
    View::new().for_each(&mut world, |foo: &Foo| total += i64::from(foo.0));
    assert_eq!(total, expected);
}
