//! Systems are callbacks over a filtered set of entities, triggered by events.
//!
//! A system is registered through [`World::system`] or [`World::anonymous_system`].
//! It subscribes to event types with [`SystemBuilder::on_event`],
//! and runs once per subscribed event,
//! over every matching entity for broadcast events
//! or over the target entity for unicast events.
//!
//! Subscribers of an event run in the order computed by [`World::order_systems`],
//! which respects `before`/`after` constraints between names
//! and `produce`/`require` constraints between token types.
//! Independent systems keep their registration order.

use std::any::{self, Any, TypeId};
use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use xias::Xias;

use crate::archetype::{Archetype, ArchetypeId};
use crate::comp::{self, Component, ComponentId, Signature};
use crate::entity::Location;
use crate::event::{self, Event, EventId, OnChange};
use crate::query::{self, param, Each, Filter, QueryId, Scope};
use crate::tracking::Tracker;
use crate::world::World;

mod order;

#[cfg(test)]
mod tests;

/// Identifies a registered system.
///
/// Ids are assigned in registration order and are not reused after unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemId(u32);

impl SystemId {
    /// Returns the raw integer value of this id.
    pub fn to_u32(self) -> u32 { self.0 }

    fn index(self) -> usize { self.0.small_int() }
}

/// The scheduling state of a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    /// Registered after the last call to [`World::order_systems`].
    /// Dispatching an event it subscribes to panics.
    Unordered,
    /// Placed in the schedule but never dispatched yet.
    Ordered,
    /// Dispatched at least once.
    Active,
}

/// A type used as an ordering token between systems.
#[derive(Clone, Copy)]
pub(crate) struct Token {
    type_id: TypeId,
    name:    &'static str,
}

impl Token {
    fn of<T: 'static>() -> Self { Self { type_id: TypeId::of::<T>(), name: any::type_name::<T>() } }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool { self.type_id == other.type_id }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name) }
}

/// The rows a system callback is invoked for.
#[derive(Clone, Copy)]
pub(crate) enum Target<'w> {
    /// Every entity in the listed archetypes.
    All(&'w [ArchetypeId]),
    /// A single row.
    One(Location),
}

/// The arguments of one invocation of a system callback.
pub(crate) struct Batch<'w> {
    pub(crate) archetypes: &'w [Archetype],
    pub(crate) target:     Target<'w>,
    pub(crate) scope:      Scope<'w>,
}

type Callback = Box<dyn FnMut(&Batch<'_>)>;

/// The ordering constraints of a system.
#[derive(Debug, Default)]
pub(crate) struct Constraints {
    pub(crate) before:   Vec<String>,
    pub(crate) after:    Vec<String>,
    pub(crate) produces: Vec<Token>,
    pub(crate) requires: Vec<Token>,
}

/// A registered system.
pub(crate) struct System {
    name:        String,
    filter:      Filter,
    events:      Vec<EventId>,
    tracked:     Signature,
    constraints: Constraints,
    state:       SystemState,
    query:       QueryId,
    callback:    Callback,
}

impl System {
    pub(crate) fn name(&self) -> &str { &self.name }

    pub(crate) fn filter(&self) -> &Filter { &self.filter }

    pub(crate) fn query(&self) -> QueryId { self.query }

    pub(crate) fn state(&self) -> SystemState { self.state }

    /// Invokes the callback and marks tracked components on the visited rows.
    pub(crate) fn run(&mut self, batch: &Batch<'_>, tracker: &mut Tracker) {
        (self.callback)(batch);

        if self.tracked.is_empty() {
            return;
        }
        match batch.target {
            Target::All(ids) => {
                for &id in ids {
                    let archetype = &batch.archetypes[id.index()];
                    for component in self.tracked.iter().filter(|&c| archetype.has(c)) {
                        archetype.entities().for_each(|entity| tracker.mark(component, entity));
                    }
                }
            }
            Target::One(location) => {
                let archetype = &batch.archetypes[location.archetype.index()];
                let entity = archetype.entity_at(location.chunk(), location.slot());
                for component in self.tracked.iter().filter(|&c| archetype.has(c)) {
                    tracker.mark(component, entity);
                }
            }
        }
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("events", &self.events)
            .field("tracked", &self.tracked)
            .field("constraints", &self.constraints)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Resets the dispatch flag when dropped, including during unwinding.
struct DispatchGuard<'a>(&'a Cell<bool>);

impl<'a> DispatchGuard<'a> {
    fn new(flag: &'a Cell<bool>) -> Self {
        assert!(!flag.replace(true), "Events cannot be dispatched recursively");
        Self(flag)
    }
}

impl<'a> Drop for DispatchGuard<'a> {
    fn drop(&mut self) { self.0.set(false) }
}

/// All systems of a world, their schedule and their event subscriptions.
#[derive(Default)]
pub(crate) struct Registry {
    systems:     Vec<Option<System>>,
    names:       IndexMap<String, SystemId>,
    order:       Vec<SystemId>,
    subscribers: HashMap<EventId, Vec<SystemId>>,
    anonymous:   usize,
    dispatching: Cell<bool>,
}

impl Registry {
    /// The name for the next anonymous system.
    pub(crate) fn anonymous_name(&mut self) -> String {
        self.anonymous += 1;
        format!("system#{}", self.anonymous)
    }

    /// # Panics
    /// Panics if a system named `name` is already registered.
    pub(crate) fn check_name(&self, name: &str) {
        assert!(!self.names.contains_key(name), "A system named `{name}` is already registered");
    }

    fn assert_not_dispatching(&self) {
        assert!(
            !self.dispatching.get(),
            "Systems cannot be registered or unregistered while an event is being dispatched"
        );
    }

    fn register(&mut self, system: System) -> SystemId {
        self.assert_not_dispatching();
        self.check_name(&system.name);

        let id = SystemId(self.systems.len().small_int());
        for &event in &system.events {
            self.subscribers.entry(event).or_default().push(id);
        }
        self.names.insert(system.name.clone(), id);
        log::debug!("Registered system `{}` as {id:?}", system.name);
        self.systems.push(Some(system));
        id
    }

    /// Removes a system and returns it.
    pub(crate) fn unregister(&mut self, id: SystemId) -> Option<System> {
        self.assert_not_dispatching();

        let system = self.systems.get_mut(id.index())?.take()?;
        self.names.shift_remove(&system.name);
        self.order.retain(|&other| other != id);
        for &event in &system.events {
            if let Some(subscribers) = self.subscribers.get_mut(&event) {
                subscribers.retain(|&other| other != id);
            }
        }
        log::debug!("Unregistered system `{}`", system.name);
        Some(system)
    }

    pub(crate) fn get(&self, id: SystemId) -> Option<&System> {
        self.systems.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: SystemId) -> Option<&mut System> {
        self.systems.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub(crate) fn id_of(&self, name: &str) -> Option<SystemId> { self.names.get(name).copied() }

    pub(crate) fn order(&self) -> &[SystemId] { &self.order }

    /// Recomputes the schedule over all registered systems.
    pub(crate) fn order_systems(&mut self) {
        self.order = order::compute(&self.systems, &self.names);

        let positions: HashMap<SystemId, usize> =
            self.order.iter().enumerate().map(|(position, &id)| (id, position)).collect();
        for subscribers in self.subscribers.values_mut() {
            subscribers.sort_by_key(|id| positions[id]);
        }

        for system in self.systems.iter_mut().flatten() {
            if system.state == SystemState::Unordered {
                system.state = SystemState::Ordered;
            }
        }
    }

    /// Visits each subscriber of `event` in schedule order.
    ///
    /// # Panics
    /// Panics if a subscriber was registered after the last ordering.
    pub(crate) fn dispatch(&mut self, event: EventId, mut visit: impl FnMut(&mut System)) {
        let Some(subscribers) = self.subscribers.get(&event) else { return };
        let _guard = DispatchGuard::new(&self.dispatching);

        for &id in subscribers {
            let system = self.systems[id.index()].as_mut().expect("unregistered system is still subscribed");
            assert!(
                system.state != SystemState::Unordered,
                "System `{}` subscribes to {} but was registered after ordering; call \
                 `World::order_systems` first",
                system.name,
                event::info(event).name(),
            );

            visit(system);
            system.state = SystemState::Active;
        }
    }
}

/// Configures and registers a system, obtained from [`World::system`].
///
/// ```
/// use dynarch::{Event, World};
///
/// #[derive(Event)]
/// struct Tick;
///
/// struct Position(i32);
/// struct Velocity(i32);
///
/// let mut world = World::new();
/// let entity = world.entity().add(Position(0)).add(Velocity(3)).apply();
///
/// world
///     .system("integrate")
///     .on_event::<Tick>()
///     .for_each(|pos: &mut Position, vel: &Velocity| pos.0 += vel.0);
/// world.order_systems();
///
/// world.emit_immediately(Tick);
/// world.emit_immediately(Tick);
/// assert_eq!(world.get::<Position>(entity).map(|pos| pos.0), Some(6));
/// ```
#[must_use = "the system is only registered by `for_each`"]
pub struct SystemBuilder<'w> {
    world:       &'w mut World,
    name:        String,
    filter:      Filter,
    events:      Vec<EventId>,
    tracked:     Vec<(ComponentId, EventId, &'static dyn Any)>,
    constraints: Constraints,
}

impl<'w> SystemBuilder<'w> {
    pub(crate) fn new(world: &'w mut World, name: String) -> Self {
        Self {
            world,
            name,
            filter: Filter::default(),
            events: Vec::new(),
            tracked: Vec::new(),
            constraints: Constraints::default(),
        }
    }

    /// Only visits entities with the component `T`.
    pub fn with<T: Component>(mut self) -> Self {
        self.filter.require(comp::id::<T>());
        self
    }

    /// Only visits entities without the component `T`.
    pub fn without<T: Component>(mut self) -> Self {
        self.filter.exclude(comp::id::<T>());
        self
    }

    /// Subscribes to events of type `E`.
    pub fn on_event<E: Event>(mut self) -> Self {
        let id = event::id::<E>();
        if !self.events.contains(&id) {
            self.events.push(id);
        }
        self
    }

    /// Marks every visited entity holding `T` as changed.
    pub fn track<T: Component>(mut self) -> Self {
        let component = comp::id::<T>();
        if self.tracked.iter().all(|&(other, _, _)| other != component) {
            let payload: &'static dyn Any = Box::leak(Box::new(OnChange::<T>::new()));
            self.tracked.push((component, event::id::<OnChange<T>>(), payload));
        }
        self
    }

    /// Runs before the system named `name` if it exists.
    pub fn before(mut self, name: impl Into<String>) -> Self {
        self.constraints.before.push(name.into());
        self
    }

    /// Runs after the system named `name` if it exists.
    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.constraints.after.push(name.into());
        self
    }

    /// Declares that this system produces the token type `T`.
    /// Systems requiring `T` run after it.
    pub fn produce<T: 'static>(mut self) -> Self {
        self.constraints.produces.push(Token::of::<T>());
        self
    }

    /// Declares that this system requires the token type `T`,
    /// which must be produced by at least one system.
    pub fn require<T: 'static>(mut self) -> Self {
        self.constraints.requires.push(Token::of::<T>());
        self
    }

    /// Registers the system with `f` as its per-entity callback.
    ///
    /// Components that `f` takes by (non-optional) reference are added to the filter.
    ///
    /// # Panics
    /// - if the name is already registered
    /// - if the callback parameters conflict
    /// - if the callback requires a component excluded with [`without`](Self::without)
    pub fn for_each<M: 'static, F: Each<M> + 'static>(self, mut f: F) -> SystemId {
        let Self { world, name, mut filter, events, tracked, constraints } = self;
        world.systems.check_name(&name);

        let access = param::access_of::<M, F>();
        for &component in access.required() {
            filter.require(component);
        }

        let callback: Callback = Box::new(move |batch: &Batch<'_>| match batch.target {
            Target::All(ids) => {
                for &id in ids {
                    query::run_archetype::<M, F>(&mut f, &batch.archetypes[id.index()], &batch.scope);
                }
            }
            Target::One(location) => {
                let archetype = &batch.archetypes[location.archetype.index()];
                query::run_location::<M, F>(&mut f, archetype, location, &batch.scope);
            }
        });

        for &(component, event, payload) in &tracked {
            world.tracker.watch(component, event, payload);
        }
        let query = world.register_query(filter.clone());

        world.systems.register(System {
            name,
            filter,
            events,
            tracked: tracked.iter().map(|&(component, _, _)| component).collect(),
            constraints,
            state: SystemState::Unordered,
            query,
            callback,
        })
    }
}
