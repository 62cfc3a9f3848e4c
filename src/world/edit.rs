//! Structural edits: creating entities and adding or removing components.
//!
//! An edit accumulates all changes and migrates the entity once on `apply`,
//! resolving the target archetype through the cached transition graph.

use super::World;
use crate::archetype::{ArchetypeId, EditSet};
use crate::comp::{self, Bundle, Component, ComponentId, Signature};
use crate::entity::EntityId;
use crate::Error;

/// Builds a new entity, obtained from [`World::entity`].
///
/// ```
/// # use dynarch::World;
/// struct Name(&'static str);
/// struct Player;
///
/// let mut world = World::new();
/// let entity = world.entity().add(Name("alice")).add(Player).apply();
/// assert!(world.has::<Player>(entity));
/// ```
#[must_use = "the entity is only created by `apply`"]
pub struct EntityBuilder<'w, B> {
    world:  &'w mut World,
    bundle: B,
}

impl<'w> EntityBuilder<'w, ()> {
    pub(crate) fn new(world: &'w mut World) -> Self { Self { world, bundle: () } }
}

impl<'w, B: Bundle> EntityBuilder<'w, B> {
    /// Adds a component to the entity.
    pub fn add<T: Component>(self, value: T) -> EntityBuilder<'w, (B, T)> {
        EntityBuilder { world: self.world, bundle: (self.bundle, value) }
    }

    /// Creates the entity.
    ///
    /// # Panics
    /// Panics if the same component type was added twice, or if the chunk allocator fails.
    pub fn apply(self) -> EntityId { self.try_apply().unwrap_or_else(|err| panic!("{err}")) }

    /// Creates the entity, returning an error if the chunk allocator fails.
    ///
    /// On error, the added values are dropped and no entity is created.
    pub fn try_apply(self) -> Result<EntityId, Error> {
        let result = self.world.spawn(None, self.bundle);
        self.world.flush_commands();
        result
    }
}

/// Edits an existing entity, obtained from [`World::edit`].
///
/// ```
/// # use dynarch::World;
/// struct Foo(i32);
/// struct Bar(i32);
///
/// let mut world = World::new();
/// let entity = world.entity().add(Foo(1)).apply();
/// world.edit(entity).add(Bar(2)).remove::<Foo>().apply();
/// assert!(!world.has::<Foo>(entity));
/// assert_eq!(world.get::<Bar>(entity).map(|bar| bar.0), Some(2));
/// ```
#[must_use = "the edit is only performed by `apply`"]
pub struct Edit<'w, B> {
    world:  &'w mut World,
    entity: EntityId,
    bundle: B,
    remove: Vec<ComponentId>,
}

impl<'w> Edit<'w, ()> {
    pub(crate) fn new(world: &'w mut World, entity: EntityId) -> Self {
        Self { world, entity, bundle: (), remove: Vec::new() }
    }
}

impl<'w, B: Bundle> Edit<'w, B> {
    /// Adds a component, which must not be present on the entity yet.
    pub fn add<T: Component>(self, value: T) -> Edit<'w, (B, T)> {
        Edit { world: self.world, entity: self.entity, bundle: (self.bundle, value), remove: self.remove }
    }

    /// Removes a component, which must be present on the entity.
    pub fn remove<T: Component>(mut self) -> Self {
        self.remove.push(comp::id::<T>());
        self
    }

    /// Performs the edit and returns the entity id.
    ///
    /// Does nothing if the entity is dead.
    ///
    /// # Panics
    /// - if an added component is already present or added twice
    /// - if a removed component is not present
    /// - if a component is both added and removed
    /// - if the chunk allocator fails
    pub fn apply(self) -> EntityId { self.try_apply().unwrap_or_else(|err| panic!("{err}")) }

    /// Performs the edit, returning an error if the chunk allocator fails.
    ///
    /// On error, the entity keeps its previous components and the added values are dropped.
    pub fn try_apply(self) -> Result<EntityId, Error> {
        let result = self.world.modify(self.entity, self.bundle, &self.remove);
        self.world.flush_commands();
        result
    }
}

/// Collects the component ids of a bundle, panicking on duplicates.
fn added_ids(bundle: &impl Bundle) -> Signature {
    let mut ids = Vec::new();
    bundle.collect_ids(&mut ids);
    let signature = Signature::new(ids.iter().copied());
    if signature.len() != ids.len() {
        let duplicate = ids
            .iter()
            .enumerate()
            .find(|&(index, id)| ids[..index].contains(id))
            .map(|(_, &id)| id)
            .expect("length mismatch implies a duplicate");
        panic!(
            "Cannot add component {}: only new components can be added",
            comp::info(duplicate).name()
        );
    }
    signature
}

impl World {
    /// Creates an entity holding the components of `bundle`,
    /// using `reserved` if the id was reserved by a deferred builder.
    pub(super) fn spawn(&mut self, reserved: Option<EntityId>, bundle: impl Bundle) -> Result<EntityId, Error> {
        let edit = EditSet::new(added_ids(&bundle), Signature::empty());
        let (target, created) = self.storage.resolve(ArchetypeId::EMPTY, &edit);
        if created {
            self.on_archetype_created(target);
        }

        let entity = reserved.unwrap_or_else(|| self.entities.next_id());
        let archetype = self.storage.get_mut(target);
        let location = match archetype.push(entity) {
            Ok(location) => location,
            Err(err) => {
                if reserved.is_some() {
                    self.entities.release_reserved(entity);
                }
                return Err(err);
            }
        };

        bundle.take(&mut |component, ptr| {
            let column = archetype.component_index(component).expect("target signature contains added components");
            // Safety: the row was just pushed and `ptr` is handed over by the bundle.
            unsafe { archetype.write(location, column, ptr) };
        });
        self.entities.insert(entity, location);
        log::trace!("Created {entity:?} in {target:?}");

        self.dispatch_appear(entity, None);
        Ok(entity)
    }

    /// Adds the components of `bundle` to `entity` and removes `remove` in a single migration.
    pub(super) fn modify(
        &mut self,
        entity: EntityId,
        bundle: impl Bundle,
        remove: &[ComponentId],
    ) -> Result<EntityId, Error> {
        let Some(location) = self.entities.location(entity) else {
            log::trace!("Ignoring edit of dead entity {entity:?}");
            return Ok(entity);
        };
        let source = location.archetype;

        let edit = EditSet::new(added_ids(&bundle), Signature::new(remove.iter().copied()));
        let signature = self.storage.get(source).signature();
        if let Some(present) = edit.add().iter().find(|&id| signature.contains(id)) {
            panic!("Cannot add component {}: only new components can be added", comp::info(present).name());
        }
        if let Some(absent) = edit.remove().iter().find(|&id| !signature.contains(id)) {
            panic!("Cannot remove component {}: not present", comp::info(absent).name());
        }
        if edit.is_empty() {
            return Ok(entity);
        }

        let (target, created) = self.storage.resolve(source, &edit);
        if created {
            self.on_archetype_created(target);
        }
        self.storage.get_mut(target).reserve()?;

        self.dispatch_disappear(entity, Some(target));
        // callbacks can only queue structural changes, so the location is still valid
        debug_assert_eq!(self.entities.location(entity), Some(location));

        let (src, dst) = self.storage.pair_mut(source, target);
        let new_location = dst.push(entity).expect("slot was reserved");
        for column in 0..src.signature().len() {
            let component = src.component_info(column).id();
            if let Some(dst_column) = dst.component_index(component) {
                let ptr = src.column_ptr(column, location.chunk(), location.slot());
                // Safety: the source row is occupied; the value is not dropped by swap_remove below.
                unsafe { dst.write(new_location, dst_column, ptr) };
            }
        }
        bundle.take(&mut |component, ptr| {
            let column = dst.component_index(component).expect("target signature contains added components");
            // Safety: the row was just pushed and `ptr` is handed over by the bundle.
            unsafe { dst.write(new_location, column, ptr) };
        });
        let moved = src.swap_remove(location, |info| !dst.has(info.id()));
        self.relocated(entity, new_location, moved, location);
        log::trace!("Moved {entity:?} from {source:?} to {target:?}");

        self.dispatch_appear(entity, Some(source));
        Ok(entity)
    }

    /// Destroys `entity`, returning whether it was alive.
    pub(super) fn despawn(&mut self, entity: EntityId) -> bool {
        if !self.entities.is_alive(entity) {
            return false;
        }

        self.dispatch_disappear(entity, None);

        let location = self.entities.remove(entity).expect("entity was alive before dispatch");
        self.tracker.forget(entity);
        let moved = self.storage.get_mut(location.archetype).swap_remove(location, |_| true);
        if let Some(moved) = moved {
            self.entities.set_location(moved, location);
        }
        log::trace!("Destroyed {entity:?}");
        true
    }
}
