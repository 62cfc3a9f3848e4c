//! Views and queries select archetypes by their signature and visit their entities.
//!
//! A [`View`] is an uncached predicate, evaluated against every archetype each time it is used.
//! A [`Query`] caches the list of matching archetypes inside the world.
//! The cache is extended whenever the world creates a matching archetype
//! and never rescanned, while entities entering already-matching archetypes
//! are picked up automatically because chunks are read at call time.

use crate::archetype::{Archetype, ArchetypeId};
use crate::comp::{self, Component, ComponentId, Signature};
use crate::entity::{EntityId, Location};
use crate::event::AnyEvent;
use crate::world::{Deferred, World, WorldId};

pub mod param;
pub use param::{Access, Each, Param, Row};


/// A require/exclude predicate over archetype signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Filter {
    require: Signature,
    exclude: Signature,
}

impl Filter {
    /// Adds a required component.
    ///
    /// # Panics
    /// Panics if the component is already excluded.
    pub fn require(&mut self, id: ComponentId) {
        assert!(
            !self.exclude.contains(id),
            "Component {} is already in without",
            comp::info(id).name()
        );
        self.require = Signature::new(self.require.iter().chain([id]));
    }

    /// Adds an excluded component.
    ///
    /// # Panics
    /// Panics if the component is already required.
    pub fn exclude(&mut self, id: ComponentId) {
        assert!(
            !self.require.contains(id),
            "Component {} is already in with",
            comp::info(id).name()
        );
        self.exclude = Signature::new(self.exclude.iter().chain([id]));
    }

    /// The required components.
    pub fn required(&self) -> &Signature { &self.require }

    /// The excluded components.
    pub fn excluded(&self) -> &Signature { &self.exclude }

    /// Whether an archetype with `signature` satisfies the filter.
    pub fn matches(&self, signature: &Signature) -> bool {
        signature.is_superset_of(&self.require) && signature.is_disjoint(&self.exclude)
    }
}

/// An uncached archetype predicate.
///
/// ```
/// # use dynarch::{World, View, EntityId};
/// struct Position(f32);
/// struct Frozen;
///
/// let mut world = World::new();
/// world.entity().add(Position(1.0)).apply();
/// world.entity().add(Position(2.0)).add(Frozen).apply();
///
/// let mut sum = 0.0;
/// View::new().without::<Frozen>().for_each(&mut world, |pos: &Position| sum += pos.0);
/// assert_eq!(sum, 1.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct View {
    filter: Filter,
}

impl View {
    /// A view matching every archetype.
    pub fn new() -> Self { Self::default() }

    /// Requires the component `T`.
    #[must_use]
    pub fn with<T: Component>(mut self) -> Self {
        self.filter.require(comp::id::<T>());
        self
    }

    /// Excludes the component `T`.
    #[must_use]
    pub fn without<T: Component>(mut self) -> Self {
        self.filter.exclude(comp::id::<T>());
        self
    }

    /// The predicate of this view.
    pub fn filter(&self) -> &Filter { &self.filter }

    /// The archetypes currently matching this view, in creation order.
    pub fn archetypes<'w>(&'w self, world: &'w World) -> impl Iterator<Item = &'w Archetype> + 'w {
        world.archetypes().filter(|archetype| self.filter.matches(archetype.signature()))
    }

    /// Invokes `f` for every entity matching the view
    /// and holding the components `f` requires.
    ///
    /// Archetypes are visited in creation order,
    /// and entities within an archetype in row order.
    pub fn for_each<M, F: Each<M>>(&self, world: &mut World, mut f: F) {
        param::access_of::<M, F>();

        {
            let (archetypes, scope, _guard) = world.iteration_scope();
            for archetype in archetypes {
                if self.filter.matches(archetype.signature()) {
                    run_archetype(&mut f, archetype, &scope);
                }
            }
        }

        world.flush_commands();
    }

    /// Invokes `f` for `entity` if it is alive and matches the view.
    ///
    /// Returns whether `f` was invoked.
    pub fn for_entity<M, F: Each<M>>(&self, world: &mut World, entity: EntityId, f: F) -> bool {
        let filter = &self.filter;
        run_entity(world, entity, |archetype| filter.matches(archetype.signature()), f)
    }
}

/// Identifies a query cache within a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct QueryId(usize);

/// The cached archetype list of a query.
#[derive(Debug)]
pub(crate) struct QueryCache {
    filter:     Filter,
    archetypes: Vec<ArchetypeId>,
    retired:    bool,
}

impl QueryCache {
    pub(crate) fn archetypes(&self) -> &[ArchetypeId] { &self.archetypes }
}

/// The query caches of a world.
#[derive(Debug, Default)]
pub(crate) struct Caches {
    caches: Vec<QueryCache>,
}

impl Caches {
    /// Registers a new cache, scanning the existing archetypes once.
    pub(crate) fn register<'a>(
        &mut self,
        filter: Filter,
        archetypes: impl Iterator<Item = &'a Archetype>,
    ) -> QueryId {
        let matched = archetypes
            .filter(|archetype| filter.matches(archetype.signature()))
            .map(Archetype::id)
            .collect();
        self.caches.push(QueryCache { filter, archetypes: matched, retired: false });
        QueryId(self.caches.len() - 1)
    }

    /// Appends a newly created archetype to every cache it matches.
    pub(crate) fn on_archetype_created(&mut self, archetype: &Archetype) {
        for cache in &mut self.caches {
            if !cache.retired && cache.filter.matches(archetype.signature()) {
                cache.archetypes.push(archetype.id());
            }
        }
    }

    pub(crate) fn get(&self, id: QueryId) -> &QueryCache { &self.caches[id.0] }

    /// Stops maintaining a cache whose owner is gone.
    pub(crate) fn retire(&mut self, id: QueryId) {
        let cache = &mut self.caches[id.0];
        cache.retired = true;
        cache.archetypes = Vec::new();
    }
}

/// Builds a [`Query`], obtained from [`World::query`].
pub struct QueryBuilder<'w> {
    world:  &'w mut World,
    filter: Filter,
}

impl<'w> QueryBuilder<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self { Self { world, filter: Filter::default() } }

    /// Requires the component `T`.
    #[must_use]
    pub fn with<T: Component>(mut self) -> Self {
        self.filter.require(comp::id::<T>());
        self
    }

    /// Excludes the component `T`.
    #[must_use]
    pub fn without<T: Component>(mut self) -> Self {
        self.filter.exclude(comp::id::<T>());
        self
    }

    /// Starts from the predicate of an existing view.
    #[must_use]
    pub fn from_view(mut self, view: &View) -> Self {
        self.filter = view.filter.clone();
        self
    }

    /// Materializes the query, caching the archetypes matching it so far.
    pub fn build(self) -> Query {
        let id = self.world.register_query(self.filter);
        Query { world: self.world.id(), id }
    }
}

/// A cached view, created by [`World::query`].
///
/// The handle is only valid for the world that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Query {
    world: WorldId,
    id:    QueryId,
}

impl Query {
    fn cache<'w>(&self, world: &'w World) -> &'w QueryCache {
        assert_eq!(self.world, world.id(), "Query is used with a world that did not create it");
        world.query_cache(self.id)
    }

    /// The number of archetypes matched so far.
    pub fn archetype_count(&self, world: &World) -> usize { self.cache(world).archetypes.len() }

    /// Iterates over the matched archetypes in creation order.
    pub fn archetypes<'w>(&self, world: &'w World) -> impl Iterator<Item = &'w Archetype> + 'w {
        self.cache(world).archetypes.iter().map(|&id| world.archetype(id))
    }

    /// Invokes `f` for every entity in the cached archetypes
    /// that holds the components `f` requires.
    pub fn for_each<M, F: Each<M>>(&self, world: &mut World, mut f: F) {
        param::access_of::<M, F>();
        let cache = self.cache(world);

        {
            let (archetypes, scope, _guard) = world.iteration_scope();
            for &id in cache.archetypes() {
                run_archetype(&mut f, &archetypes[id.index()], &scope);
            }
        }

        world.flush_commands();
    }

    /// Invokes `f` for `entity` if it is alive and its archetype is matched by the query.
    ///
    /// Returns whether `f` was invoked.
    pub fn for_entity<M, F: Each<M>>(&self, world: &mut World, entity: EntityId, f: F) -> bool {
        let filter = self.cache(world).filter.clone();
        run_entity(world, entity, |archetype| filter.matches(archetype.signature()), f)
    }
}

/// The context shared by every row of one iteration or dispatch.
#[derive(Clone, Copy)]
pub(crate) struct Scope<'w> {
    pub(crate) event:    Option<AnyEvent<'w>>,
    pub(crate) deferred: Deferred<'w>,
}

/// Runs `f` on every row of `archetype`.
/// Does nothing if the archetype lacks a component required by `f`.
pub(crate) fn run_archetype<M, F: Each<M>>(f: &mut F, archetype: &Archetype, scope: &Scope<'_>) {
    let Some(state) = F::resolve(archetype) else { return };

    for (chunk, data) in archetype.chunks().iter().enumerate() {
        for slot in 0..data.len() {
            let row = Row {
                archetype,
                chunk,
                slot,
                entity: archetype.entity_at(chunk, slot),
                event: scope.event,
                deferred: scope.deferred,
            };
            // Safety: accesses were validated by `access_of`,
            // and each row is visited once, so mutable borrows never alias.
            unsafe { f.call(state, &row) };
        }
    }
}

/// Runs `f` on the row at `location`. Returns whether `f` was invoked.
pub(crate) fn run_location<M, F: Each<M>>(
    f: &mut F,
    archetype: &Archetype,
    location: Location,
    scope: &Scope<'_>,
) -> bool {
    let Some(state) = F::resolve(archetype) else { return false };

    let row = Row {
        archetype,
        chunk: location.chunk(),
        slot: location.slot(),
        entity: archetype.entity_at(location.chunk(), location.slot()),
        event: scope.event,
        deferred: scope.deferred,
    };
    // Safety: accesses were validated by `access_of`.
    unsafe { f.call(state, &row) };
    true
}

fn run_entity<M, F: Each<M>>(
    world: &mut World,
    entity: EntityId,
    matches: impl FnOnce(&Archetype) -> bool,
    mut f: F,
) -> bool {
    param::access_of::<M, F>();
    let Some(location) = world.entities().location(entity) else { return false };

    let invoked = {
        let (archetypes, scope, _guard) = world.iteration_scope();
        let archetype = &archetypes[location.archetype.index()];
        matches(archetype) && run_location(&mut f, archetype, location, &scope)
    };

    world.flush_commands();
    invoked
}
