//! The world owns all entities, archetypes, queries, systems and pending events.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::archetype::{Archetype, ArchetypeId, ChunkAllocator, GlobalChunkAllocator, Storage};
use crate::comp::{self, Component, ComponentId, Components};
use crate::entity::{EntityId, EntityIndex, Location};
use crate::event::{self, AnyEvent, Event, EventBuilder, EventId, OnAppear, OnDisappear, Pending};
use crate::query::{self, Filter, QueryBuilder, QueryId, Scope, View};
use crate::system::{self, Batch, SystemBuilder, SystemId, SystemState, Target};
use crate::tracking::Tracker;

mod commands;
pub use commands::{Deferred, DeferredBuilder, DeferredEdit};
use commands::{Command, CommandBuffer, UnwindGuard};

mod edit;
pub use edit::{Edit, EntityBuilder};

#[cfg(test)]
mod tests;

/// Distinguishes worlds so that query handles cannot be used across them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorldId(u64);

impl WorldId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Construction options of a [`World`].
#[derive(Clone)]
pub struct Config {
    /// The memory provider for all chunks of the world.
    pub allocator:       Arc<dyn ChunkAllocator>,
    /// The number of entity records to preallocate.
    pub entity_capacity: usize,
}

impl Default for Config {
    fn default() -> Self { Self { allocator: Arc::new(GlobalChunkAllocator), entity_capacity: 0 } }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config").field("entity_capacity", &self.entity_capacity).finish_non_exhaustive()
    }
}

/// The container of all ECS state.
///
/// All operations are synchronous.
/// Callbacks invoked by the world cannot access it directly;
/// structural changes requested through [`Deferred`] are applied
/// before the outermost operation returns.
pub struct World {
    id:                  WorldId,
    pub(crate) entities: EntityIndex,
    pub(crate) storage:  Storage,
    pub(crate) queries:  query::Caches,
    pub(crate) systems:  system::Registry,
    pub(crate) events:   event::Queue,
    pub(crate) tracker:  Tracker,
    commands:            RefCell<CommandBuffer>,
}

impl Default for World {
    fn default() -> Self { Self::new() }
}

impl World {
    /// Creates an empty world backed by the global allocator.
    pub fn new() -> Self { Self::with_config(Config::default()) }

    /// Creates an empty world obtaining its chunks from `allocator`.
    pub fn with_allocator(allocator: Arc<dyn ChunkAllocator>) -> Self {
        Self::with_config(Config { allocator, ..Config::default() })
    }

    /// Creates an empty world with the given options.
    pub fn with_config(config: Config) -> Self {
        let id = WorldId::next();
        log::debug!("Creating world {id:?} with {config:?}");

        Self {
            id,
            entities: EntityIndex::with_capacity(config.entity_capacity),
            storage: Storage::new(config.allocator),
            queries: query::Caches::default(),
            systems: system::Registry::default(),
            events: event::Queue::default(),
            tracker: Tracker::default(),
            commands: RefCell::default(),
        }
    }

    pub(crate) fn id(&self) -> WorldId { self.id }

    // entities

    /// Creates an entity without components.
    ///
    /// # Panics
    /// Panics if the chunk allocator fails.
    pub fn create(&mut self) -> EntityId { self.entity().apply() }

    /// Creates an entity without components, returning an error if the chunk allocator fails.
    pub fn try_create(&mut self) -> Result<EntityId, crate::Error> { self.entity().try_apply() }

    /// Starts building an entity with components.
    pub fn entity(&mut self) -> EntityBuilder<'_, ()> { EntityBuilder::new(self) }

    /// Starts a structural edit of `entity`.
    ///
    /// Edits of dead entities are ignored.
    pub fn edit(&mut self, entity: EntityId) -> Edit<'_, ()> { Edit::new(self, entity) }

    /// Destroys an entity, dropping all its components.
    ///
    /// Returns `false` if the entity was already dead.
    pub fn destroy(&mut self, entity: EntityId) -> bool {
        let destroyed = self.despawn(entity);
        self.flush_commands();
        destroyed
    }

    /// Whether `entity` is alive.
    pub fn is_alive(&self, entity: EntityId) -> bool { self.entities.is_alive(entity) }

    /// The number of live entities.
    pub fn len(&self) -> usize { self.entities.len() }

    /// Whether there are no live entities.
    pub fn is_empty(&self) -> bool { self.entities.is_empty() }

    /// The entity index, resolving ids to storage locations.
    pub fn entities(&self) -> &EntityIndex { &self.entities }

    /// Whether `entity` is alive and has the component `T`.
    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.archetype_of(entity).map_or(false, |archetype| archetype.has(comp::id::<T>()))
    }

    /// Whether `entity` is alive and has all components in the tuple `C`.
    pub fn has_all<C: Components>(&self, entity: EntityId) -> bool {
        let Some(archetype) = self.archetype_of(entity) else { return false };
        let mut ids = Vec::new();
        C::ids(&mut ids);
        ids.into_iter().all(|id| archetype.has(id))
    }

    /// Borrows the component `T` of `entity`.
    ///
    /// Returns `None` if the entity is dead or lacks the component.
    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        let ptr = self.component_ptr(entity, comp::id::<T>())?;
        // Safety: the column holds values of type `T`, borrowed through `&self`.
        Some(unsafe { &*ptr.cast::<T>() })
    }

    /// Mutably borrows the component `T` of `entity`.
    ///
    /// Returns `None` if the entity is dead or lacks the component.
    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let ptr = self.component_ptr(entity, comp::id::<T>())?;
        // Safety: the column holds values of type `T`, borrowed exclusively through `&mut self`.
        Some(unsafe { &mut *ptr.cast::<T>() })
    }

    fn component_ptr(&self, entity: EntityId, component: ComponentId) -> Option<*mut u8> {
        let location = self.entities.location(entity)?;
        let archetype = self.storage.get(location.archetype);
        let column = archetype.component_index(component)?;
        Some(archetype.column_ptr(column, location.chunk(), location.slot()))
    }

    /// Duplicates an entity with all its components.
    ///
    /// Returns `None` if the entity is dead.
    ///
    /// # Panics
    /// Panics if a component of the entity was not registered
    /// with [`comp::register_cloneable`], or if the chunk allocator fails.
    pub fn clone_entity(&mut self, entity: EntityId) -> Option<EntityId> {
        let location = self.entities.location(entity)?;
        let archetype = self.storage.get_mut(location.archetype);

        let infos: Vec<_> = archetype.signature().iter().map(comp::info).collect();
        if let Some(info) = infos.iter().find(|info| !info.is_cloneable()) {
            panic!(
                "Cannot clone entity {entity:?}: component {} is not cloneable, register it with \
                 `comp::register_cloneable`",
                info.name()
            );
        }

        archetype.reserve().unwrap_or_else(|err| panic!("{err}"));
        let cloned = self.entities.next_id();
        let target = archetype.location_of(archetype.len());
        for (column, info) in infos.iter().enumerate() {
            let src = archetype.column_ptr(column, location.chunk(), location.slot());
            let dst = archetype.column_ptr(column, target.chunk(), target.slot());
            // Safety: the source row is occupied and the target slot is reserved but unoccupied.
            // A panicking clone leaves the target slot unoccupied, leaking the values cloned so far.
            unsafe { info.clone_into(dst, src) };
        }
        let pushed = archetype.push(cloned).expect("slot was reserved");
        debug_assert_eq!(pushed, target);
        self.entities.insert(cloned, target);
        log::trace!("Cloned {entity:?} into {cloned:?}");

        self.dispatch(event::id::<OnAppear>(), Some(cloned), &OnAppear, |_| true);
        self.flush_commands();
        Some(cloned)
    }

    // archetypes

    /// The archetype holding `entity`, if it is alive.
    pub fn archetype_of(&self, entity: EntityId) -> Option<&Archetype> {
        let location = self.entities.location(entity)?;
        Some(self.storage.get(location.archetype))
    }

    /// Looks up an archetype.
    ///
    /// # Panics
    /// Panics if the archetype was not created by this world.
    pub fn archetype(&self, id: ArchetypeId) -> &Archetype { self.storage.get(id) }

    /// Iterates over all archetypes in creation order.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> + '_ { self.storage.all().iter() }

    /// The number of cached archetype transitions.
    pub fn transition_count(&self) -> usize { self.storage.edge_count() }

    /// Frees trailing empty chunks of every archetype and returns how many were freed.
    pub fn compact(&mut self) -> usize { self.storage.compact() }

    // queries

    /// Starts an uncached view. Equivalent to [`View::new`].
    pub fn view(&self) -> View { View::new() }

    /// Starts building a cached query.
    pub fn query(&mut self) -> QueryBuilder<'_> { QueryBuilder::new(self) }

    pub(crate) fn register_query(&mut self, filter: Filter) -> QueryId {
        self.queries.register(filter, self.storage.all().iter())
    }

    pub(crate) fn query_cache(&self, id: QueryId) -> &query::QueryCache { self.queries.get(id) }

    /// Borrows the archetypes together with a callback scope without event.
    ///
    /// The returned guard must be held while callbacks run.
    pub(crate) fn iteration_scope(&self) -> (&[Archetype], Scope<'_>, UnwindGuard<'_>) {
        let scope = Scope { event: None, deferred: Deferred::new(&self.commands, &self.entities) };
        (self.storage.all(), scope, UnwindGuard::new(&self.commands))
    }

    // systems

    /// Starts registering a system named `name`.
    ///
    /// # Panics
    /// [`SystemBuilder::for_each`] panics if the name is already registered.
    pub fn system(&mut self, name: impl Into<String>) -> SystemBuilder<'_> {
        SystemBuilder::new(self, name.into())
    }

    /// Starts registering a system with a generated name.
    pub fn anonymous_system(&mut self) -> SystemBuilder<'_> {
        let name = self.systems.anonymous_name();
        SystemBuilder::new(self, name)
    }

    /// Computes the dispatch order of all registered systems.
    ///
    /// # Panics
    /// Panics if the ordering constraints are cyclic
    /// or if a required token is not produced by any system.
    pub fn order_systems(&mut self) { self.systems.order_systems() }

    /// The system ids in dispatch order, as of the last [`order_systems`](Self::order_systems).
    pub fn system_order(&self) -> &[SystemId] { self.systems.order() }

    /// Looks up a system by name.
    pub fn system_id(&self, name: &str) -> Option<SystemId> { self.systems.id_of(name) }

    /// The name of a registered system.
    pub fn system_name(&self, id: SystemId) -> Option<&str> { self.systems.get(id).map(|system| system.name()) }

    /// The scheduling state of a registered system.
    pub fn system_state(&self, id: SystemId) -> Option<SystemState> {
        self.systems.get(id).map(|system| system.state())
    }

    /// Runs a system over all its matching entities without an event.
    ///
    /// Returns `false` if the system is not registered.
    pub fn run_system(&mut self, id: SystemId) -> bool {
        let Self { storage, queries, systems, tracker, commands, entities, .. } = self;
        let Some(system) = systems.get_mut(id) else { return false };

        let batch = Batch {
            archetypes: storage.all(),
            target:     Target::All(queries.get(system.query()).archetypes()),
            scope:      Scope { event: None, deferred: Deferred::new(commands, entities) },
        };
        log::trace!("Running system `{}`", system.name());
        let guard = UnwindGuard::new(commands);
        system.run(&batch, tracker);
        drop(guard);

        self.flush_commands();
        true
    }

    /// Removes a system.
    ///
    /// Returns `false` if the system is not registered.
    pub fn unregister_system(&mut self, id: SystemId) -> bool {
        match self.systems.unregister(id) {
            Some(system) => {
                self.queries.retire(system.query());
                true
            }
            None => false,
        }
    }

    // events

    /// Starts emitting an event.
    pub fn event<E: Event>(&mut self) -> EventBuilder<'_, E> { EventBuilder::new(self) }

    /// Appends a broadcast event to the deferred queue.
    pub fn emit<E: Event>(&mut self, payload: E) { self.event::<E>().emit(payload) }

    /// Dispatches a broadcast event before returning.
    pub fn emit_immediately<E: Event>(&mut self, payload: E) { self.event::<E>().emit_immediately(payload) }

    /// The number of events in the deferred queue.
    pub fn pending_events(&self) -> usize { self.events.len() }

    /// Dispatches queued events in FIFO order until the queue is empty,
    /// including events queued while processing.
    ///
    /// Returns the number of events processed.
    pub fn process_deferred_events(&mut self) -> usize {
        let mut processed = 0;
        while let Some(Pending { id, target, payload }) = self.events.pop() {
            self.dispatch(id, target, &*payload, |_| true);
            self.flush_commands();
            processed += 1;
        }
        processed
    }

    pub(crate) fn enqueue_event(&mut self, pending: Pending) {
        log::trace!("Queued {pending:?}");
        self.events.push(pending);
    }

    pub(crate) fn dispatch_now(&mut self, event: EventId, target: Option<EntityId>, payload: &dyn Any) {
        self.dispatch(event, target, payload, |_| true);
        self.flush_commands();
    }

    /// Dispatches an event to its subscribers in schedule order.
    ///
    /// For a unicast event, subscribers are only invoked if their filter matches
    /// the target entity and `accept` returns `true` for the filter.
    /// Nothing happens if the target is dead.
    fn dispatch(
        &mut self,
        event: EventId,
        target: Option<EntityId>,
        payload: &dyn Any,
        accept: impl Fn(&Filter) -> bool,
    ) {
        let location = match target {
            None => None,
            Some(entity) => match self.entities.location(entity) {
                Some(location) => Some(location),
                None => {
                    log::trace!("Skipping {} for dead entity {entity:?}", event::info(event).name());
                    return;
                }
            },
        };
        log::trace!("Dispatching {} to {target:?}", event::info(event).name());

        let Self { storage, queries, systems, tracker, commands, entities, .. } = self;
        let archetypes = storage.all();
        let scope = Scope {
            event:    Some(AnyEvent::new(event, payload)),
            deferred: Deferred::new(commands, entities),
        };
        let _guard = UnwindGuard::new(commands);

        systems.dispatch(event, |system| {
            let target = match location {
                Some(location) => {
                    let archetype = &archetypes[location.archetype.index()];
                    if !system.filter().matches(archetype.signature()) || !accept(system.filter()) {
                        return;
                    }
                    Target::One(location)
                }
                None => Target::All(queries.get(system.query()).archetypes()),
            };
            system.run(&Batch { archetypes, target, scope }, tracker);
        });
    }

    // change tracking

    /// Whether `entity` is alive and marked changed for `T` since the last
    /// [`process_tracked_changes`](Self::process_tracked_changes).
    pub fn is_dirty<T: Component>(&self, entity: EntityId) -> bool {
        self.is_alive(entity) && self.tracker.is_dirty(comp::id::<T>(), entity)
    }

    /// Dispatches [`OnChange<T>`](event::OnChange) to every entity marked for a tracked component `T`,
    /// then clears all marks.
    ///
    /// Components are processed in [`ComponentId`] order
    /// and entities in the order they were first marked.
    /// Entities that were destroyed or lost the component are skipped.
    ///
    /// Returns the number of events dispatched.
    pub fn process_tracked_changes(&mut self) -> usize {
        let mut dispatched = 0;
        for changes in self.tracker.take() {
            for entity in changes.entities {
                let holds = self
                    .archetype_of(entity)
                    .map_or(false, |archetype| archetype.has(changes.component));
                if holds {
                    self.dispatch(changes.event, Some(entity), changes.payload, |_| true);
                    dispatched += 1;
                }
            }
        }
        self.flush_commands();
        dispatched
    }

    // commands

    /// Applies all queued commands in FIFO order,
    /// including commands queued by callbacks run during application.
    pub(crate) fn flush_commands(&mut self) {
        for entity in self.commands.get_mut().take_abandoned() {
            self.entities.release_reserved(entity);
        }

        while let Some(command) = self.commands.get_mut().pop() {
            log::trace!("Applying {command:?}");
            match command {
                Command::Spawn { entity, bundle } => {
                    if let Err(err) = self.spawn(Some(entity), bundle) {
                        panic!("Cannot create deferred entity {entity:?}: {err}");
                    }
                }
                Command::Edit { entity, bundle, remove } => {
                    if let Err(err) = self.modify(entity, bundle, &remove) {
                        panic!("Cannot apply deferred edit of {entity:?}: {err}");
                    }
                }
                Command::Destroy(entity) => {
                    self.despawn(entity);
                }
                Command::Emit(pending) => self.enqueue_event(pending),
            }
        }
    }

    fn dispatch_appear(&mut self, entity: EntityId, previous: Option<ArchetypeId>) {
        let previous = previous.map(|id| self.storage.get(id).signature().clone());
        self.dispatch(event::id::<OnAppear>(), Some(entity), &OnAppear, |filter| {
            previous.as_ref().map_or(true, |signature| !filter.matches(signature))
        });
    }

    fn dispatch_disappear(&mut self, entity: EntityId, next: Option<ArchetypeId>) {
        let next = next.map(|id| self.storage.get(id).signature().clone());
        self.dispatch(event::id::<OnDisappear>(), Some(entity), &OnDisappear, |filter| {
            next.as_ref().map_or(true, |signature| !filter.matches(signature))
        });
    }

    fn on_archetype_created(&mut self, id: ArchetypeId) {
        self.queries.on_archetype_created(self.storage.get(id));
    }

    fn relocated(&mut self, entity: EntityId, location: Location, moved: Option<EntityId>, vacated: Location) {
        self.entities.set_location(entity, location);
        if let Some(moved) = moved {
            self.entities.set_location(moved, vacated);
        }
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("id", &self.id)
            .field("entities", &self.entities.len())
            .field("archetypes", &self.storage.all().len())
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

static_assertions::assert_not_impl_any!(World: Sync);
