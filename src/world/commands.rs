use std::cell::RefCell;
use std::collections::VecDeque;
use std::{fmt, mem, thread};

use crate::comp::{self, Bundle, Component, ComponentId, ErasedBundle};
use crate::entity::{EntityId, EntityIndex};
use crate::event::{Event, Pending};

/// A structural change queued from inside a callback.
pub(crate) enum Command {
    Spawn { entity: EntityId, bundle: Box<dyn ErasedBundle> },
    Edit { entity: EntityId, bundle: Box<dyn ErasedBundle>, remove: Vec<ComponentId> },
    Destroy(EntityId),
    Emit(Pending),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |bundle: &dyn ErasedBundle| {
            let mut ids = Vec::new();
            bundle.collect_ids(&mut ids);
            ids
        };

        match self {
            Self::Spawn { entity, bundle } => {
                f.debug_struct("Spawn").field("entity", entity).field("add", &ids(&**bundle)).finish()
            }
            Self::Edit { entity, bundle, remove } => f
                .debug_struct("Edit")
                .field("entity", entity)
                .field("add", &ids(&**bundle))
                .field("remove", remove)
                .finish(),
            Self::Destroy(entity) => f.debug_tuple("Destroy").field(entity).finish(),
            Self::Emit(pending) => f.debug_tuple("Emit").field(pending).finish(),
        }
    }
}

/// The FIFO queue of commands.
#[derive(Debug, Default)]
pub(crate) struct CommandBuffer {
    commands:  VecDeque<Command>,
    /// Reserved ids of spawn commands discarded by [`abandon`](Self::abandon),
    /// to be returned to the entity index.
    abandoned: Vec<EntityId>,
}

impl CommandBuffer {
    pub(crate) fn push(&mut self, command: Command) { self.commands.push_back(command) }

    pub(crate) fn pop(&mut self) -> Option<Command> { self.commands.pop_front() }

    /// Drops all queued commands without applying them.
    fn abandon(&mut self) {
        if self.commands.is_empty() {
            return;
        }
        log::debug!("Discarding {} queued commands after a panicking callback", self.commands.len());

        for command in self.commands.drain(..) {
            if let Command::Spawn { entity, .. } = command {
                self.abandoned.push(entity);
            }
        }
    }

    /// Takes the reserved ids of discarded spawn commands.
    pub(crate) fn take_abandoned(&mut self) -> Vec<EntityId> { mem::take(&mut self.abandoned) }
}

/// Discards the commands queued by callbacks if a callback unwinds through it.
pub(crate) struct UnwindGuard<'w>(&'w RefCell<CommandBuffer>);

impl<'w> UnwindGuard<'w> {
    pub(crate) fn new(commands: &'w RefCell<CommandBuffer>) -> Self { Self(commands) }
}

impl<'w> Drop for UnwindGuard<'w> {
    fn drop(&mut self) {
        if thread::panicking() {
            if let Ok(mut commands) = self.0.try_borrow_mut() {
                commands.abandon();
            }
        }
    }
}

/// Queues structural changes and events from inside a callback.
///
/// Commands are applied in the order they were queued,
/// after the outermost iteration or dispatch returns.
/// Callbacks triggered while applying them may queue further commands,
/// which are applied in the same pass.
/// If a callback panics, all commands queued so far are discarded
/// and the ids reserved by them are released.
///
/// ```
/// use dynarch::{Deferred, EntityId, View, World};
///
/// struct Health(i32);
///
/// let mut world = World::new();
/// let alive = world.entity().add(Health(3)).apply();
/// let dead = world.entity().add(Health(0)).apply();
///
/// View::new().for_each(&mut world, |id: EntityId, health: &Health, deferred: Deferred| {
///     if health.0 <= 0 {
///         deferred.destroy(id);
///     }
/// });
///
/// assert!(world.is_alive(alive));
/// assert!(!world.is_alive(dead));
/// ```
#[derive(Clone, Copy)]
pub struct Deferred<'w> {
    commands: &'w RefCell<CommandBuffer>,
    entities: &'w EntityIndex,
}

impl<'w> Deferred<'w> {
    pub(crate) fn new(commands: &'w RefCell<CommandBuffer>, entities: &'w EntityIndex) -> Self {
        Self { commands, entities }
    }

    fn push(&self, command: Command) { self.commands.borrow_mut().push(command) }

    /// Queues the creation of an entity.
    ///
    /// The id is reserved immediately and becomes alive when the command is applied.
    pub fn entity(self) -> DeferredBuilder<'w, ()> { DeferredBuilder { deferred: self, bundle: () } }

    /// Queues a structural edit of `entity`.
    pub fn edit(self, entity: EntityId) -> DeferredEdit<'w, ()> {
        DeferredEdit { deferred: self, entity, bundle: (), remove: Vec::new() }
    }

    /// Queues the destruction of `entity`.
    pub fn destroy(self, entity: EntityId) { self.push(Command::Destroy(entity)) }

    /// Queues a broadcast event,
    /// which is appended to the world's event queue when the command is applied.
    pub fn emit<E: Event>(self, payload: E) { self.push(Command::Emit(Pending::new(None, payload))) }

    /// Queues a unicast event to `entity`.
    pub fn emit_to<E: Event>(self, entity: EntityId, payload: E) {
        self.push(Command::Emit(Pending::new(Some(entity), payload)))
    }

    /// Whether `entity` is alive now.
    ///
    /// Entities created through this handle are not alive until applied.
    pub fn is_alive(self, entity: EntityId) -> bool { self.entities.is_alive(entity) }
}

impl<'w> fmt::Debug for Deferred<'w> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_struct("Deferred").finish_non_exhaustive() }
}

/// Builds a deferred entity, obtained from [`Deferred::entity`].
#[must_use = "the entity is only queued by `apply`"]
pub struct DeferredBuilder<'w, B> {
    deferred: Deferred<'w>,
    bundle:   B,
}

impl<'w, B: Bundle> DeferredBuilder<'w, B> {
    /// Adds a component to the entity.
    pub fn add<T: Component>(self, value: T) -> DeferredBuilder<'w, (B, T)> {
        DeferredBuilder { deferred: self.deferred, bundle: (self.bundle, value) }
    }

    /// Queues the creation and returns the reserved id.
    pub fn apply(self) -> EntityId {
        let entity = self.deferred.entities.reserve();
        self.deferred.push(Command::Spawn { entity, bundle: Box::new(self.bundle) });
        entity
    }
}

/// Builds a deferred edit, obtained from [`Deferred::edit`].
#[must_use = "the edit is only queued by `apply`"]
pub struct DeferredEdit<'w, B> {
    deferred: Deferred<'w>,
    entity:   EntityId,
    bundle:   B,
    remove:   Vec<ComponentId>,
}

impl<'w, B: Bundle> DeferredEdit<'w, B> {
    /// Adds a component.
    pub fn add<T: Component>(self, value: T) -> DeferredEdit<'w, (B, T)> {
        DeferredEdit {
            deferred: self.deferred,
            entity:   self.entity,
            bundle:   (self.bundle, value),
            remove:   self.remove,
        }
    }

    /// Removes a component.
    pub fn remove<T: Component>(mut self) -> Self {
        self.remove.push(comp::id::<T>());
        self
    }

    /// Queues the edit.
    ///
    /// The same validation as [`Edit::apply`](super::Edit::apply) happens when the edit is applied.
    pub fn apply(self) {
        self.deferred.push(Command::Edit {
            entity: self.entity,
            bundle: Box::new(self.bundle),
            remove: self.remove,
        })
    }
}
