use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use super::*;
use crate::test_util::*;
use crate::{EntityId, OnAppear};

#[derive(crate::Event)]
#[dynarch(dynarch_as(crate))]
struct Tick;

type Trace = Rc<RefCell<Vec<&'static str>>>;

/// Registers a system named `name` that records its name on every tick.
fn recorder<'w>(world: &'w mut World, name: &'static str) -> SystemBuilder<'w> {
    world.system(name).with::<Marker>().on_event::<Tick>()
}

fn record(builder: SystemBuilder<'_>, name: &'static str, trace: &Trace) -> SystemId {
    let trace = Rc::clone(trace);
    builder.for_each(move |_: EntityId| trace.borrow_mut().push(name))
}

fn world_with_marker() -> World {
    let mut world = World::new();
    world.entity().add(Marker).apply();
    world
}

fn names(world: &World) -> Vec<&str> {
    world.system_order().iter().map(|&id| world.system_name(id).expect("ordered systems are registered")).collect()
}

#[test]
fn test_registration_order() {
    init();

    let trace = Trace::default();
    let mut world = world_with_marker();
    for name in ["c", "a", "b"] {
        record(recorder(&mut world, name), name, &trace);
    }
    world.order_systems();

    assert_eq!(names(&world), ["c", "a", "b"]);
    world.emit_immediately(Tick);
    assert_eq!(*trace.borrow(), ["c", "a", "b"]);
}

#[test]
fn test_before_after() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    record(recorder(&mut world, "render").after("physics"), "render", &trace);
    record(recorder(&mut world, "physics"), "physics", &trace);
    record(recorder(&mut world, "input").before("physics"), "input", &trace);
    world.order_systems();

    assert_eq!(names(&world), ["input", "physics", "render"]);
    world.emit_immediately(Tick);
    assert_eq!(*trace.borrow(), ["input", "physics", "render"]);
}

#[test]
fn test_tokens() {
    struct Collided;

    let trace = Trace::default();
    let mut world = world_with_marker();
    record(recorder(&mut world, "react").require::<Collided>(), "react", &trace);
    record(recorder(&mut world, "unrelated"), "unrelated", &trace);
    record(recorder(&mut world, "detect").produce::<Collided>(), "detect", &trace);
    world.order_systems();

    assert_eq!(names(&world), ["unrelated", "detect", "react"]);
}

#[test]
fn test_self_produced_token_needs_other_producer() {
    struct Token;

    let mut world = world_with_marker();
    let trace = Trace::default();
    record(recorder(&mut world, "a").produce::<Token>().require::<Token>(), "a", &trace);
    record(recorder(&mut world, "b").produce::<Token>(), "b", &trace);
    world.order_systems();

    assert_eq!(names(&world), ["b", "a"]);
}

#[test]
#[should_panic = "Systems have a cyclic dependency: a -> b -> a"]
fn test_cycle() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    record(recorder(&mut world, "a").before("b"), "a", &trace);
    record(recorder(&mut world, "b").before("a"), "b", &trace);
    world.order_systems();
}

#[test]
#[should_panic = "System `lonely` requires token"]
fn test_missing_token() {
    struct Never;

    let trace = Trace::default();
    let mut world = world_with_marker();
    record(recorder(&mut world, "lonely").require::<Never>(), "lonely", &trace);
    world.order_systems();
}

#[test]
fn test_unknown_name_ignored() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    record(recorder(&mut world, "a").after("missing"), "a", &trace);
    record(recorder(&mut world, "b").before("missing"), "b", &trace);
    world.order_systems();

    assert_eq!(names(&world), ["a", "b"]);
}

#[test]
#[should_panic = "A system named `twice` is already registered"]
fn test_duplicate_name() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    record(recorder(&mut world, "twice"), "twice", &trace);
    record(recorder(&mut world, "twice"), "twice", &trace);
}

#[test]
fn test_anonymous_names() {
    let mut world = World::new();
    let first = world.anonymous_system().for_each(|_: EntityId| {});
    let second = world.anonymous_system().for_each(|_: EntityId| {});

    assert_eq!(world.system_name(first), Some("system#1"));
    assert_eq!(world.system_name(second), Some("system#2"));
    assert_eq!(world.system_id("system#2"), Some(second));
}

#[test]
fn test_states() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    let id = record(recorder(&mut world, "a"), "a", &trace);
    assert_eq!(world.system_state(id), Some(SystemState::Unordered));

    world.order_systems();
    assert_eq!(world.system_state(id), Some(SystemState::Ordered));

    world.emit_immediately(Tick);
    assert_eq!(world.system_state(id), Some(SystemState::Active));
}

#[test]
#[should_panic = "System `late` subscribes to"]
fn test_unordered_dispatch() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    record(recorder(&mut world, "early"), "early", &trace);
    world.order_systems();
    record(recorder(&mut world, "late"), "late", &trace);

    world.emit_immediately(Tick);
}

#[test]
fn test_late_system_without_dispatch() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    record(recorder(&mut world, "early"), "early", &trace);
    world.order_systems();
    let late = world.system("late").on_event::<OnAppear>().for_each(|_: EntityId| {});

    // a late subscriber of another event does not affect Tick
    world.emit_immediately(Tick);
    assert_eq!(*trace.borrow(), ["early"]);
    assert_eq!(world.system_state(late), Some(SystemState::Unordered));
    assert!(!world.system_order().contains(&late));
}

#[test]
fn test_run_system() {
    let mut world = World::new();
    let a = world.entity().add(Foo(1)).apply();
    let b = world.entity().add(Foo(2)).add(Marker).apply();

    let id = world.system("double").without::<Marker>().for_each(|foo: &mut Foo| foo.0 *= 2);
    assert!(world.run_system(id));
    assert_eq!(world.get::<Foo>(a), Some(&Foo(2)));
    assert_eq!(world.get::<Foo>(b), Some(&Foo(2)));
}

#[test]
fn test_system_without_entities() {
    let trace = Trace::default();
    let mut world = World::new();
    let id = record(recorder(&mut world, "idle"), "idle", &trace);
    world.order_systems();

    world.emit_immediately(Tick);
    assert!(trace.borrow().is_empty());
    assert_eq!(world.system_state(id), Some(SystemState::Active));
}

#[test]
fn test_unregister() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    let a = record(recorder(&mut world, "a"), "a", &trace);
    let b = record(recorder(&mut world, "b"), "b", &trace);
    world.order_systems();

    assert!(world.unregister_system(a));
    assert!(!world.unregister_system(a));
    assert!(!world.run_system(a));
    assert_eq!(world.system_id("a"), None);
    assert_eq!(world.system_order(), [b]);

    world.emit_immediately(Tick);
    assert_eq!(*trace.borrow(), ["b"]);

    // the name can be reused, and ids are not
    let again = record(recorder(&mut world, "a"), "a", &trace);
    assert!(again > b);
}

#[test]
fn test_subscribe_once() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    record(recorder(&mut world, "a").on_event::<Tick>(), "a", &trace);
    world.order_systems();

    world.emit_immediately(Tick);
    assert_eq!(*trace.borrow(), ["a"]);
}

#[test]
#[should_panic = "already in without"]
fn test_required_param_excluded() {
    let mut world = World::new();
    world.system("conflict").without::<Foo>().for_each(|_: &Foo| {});
}

#[test]
#[should_panic = "cannot be registered or unregistered while an event is being dispatched"]
fn test_unregister_while_dispatching() {
    let mut registry = Registry::default();
    registry.dispatching.set(true);
    registry.unregister(SystemId(0));
}

#[test]
fn test_dispatch_flag_reset_on_panic() {
    let trace = Trace::default();
    let mut world = world_with_marker();
    world.system("boom").with::<Marker>().on_event::<Tick>().for_each(|_: EntityId| panic!("boom"));
    world.order_systems();

    let result = panic::catch_unwind(AssertUnwindSafe(|| world.emit_immediately(Tick)));
    assert!(result.is_err());
    assert!(!world.systems.dispatching.get());

    // registration works again after the panic
    record(recorder(&mut world, "after"), "after", &trace);
}

#[test]
#[should_panic = "Events cannot be dispatched recursively"]
fn test_recursive_dispatch_guard() {
    let flag = Cell::new(false);
    let _outer = DispatchGuard::new(&flag);
    let _inner = DispatchGuard::new(&flag);
}
