//! Events are values dispatched to the systems subscribed to their type.
//!
//! An event is either delivered immediately, running every subscriber in schedule order
//! before [`EventBuilder::emit_immediately`] returns,
//! or appended to the world's FIFO queue by [`EventBuilder::emit`]
//! and delivered by [`World::process_deferred_events`](crate::World::process_deferred_events).
//!
//! An event without a target is broadcast:
//! each subscriber visits every entity matching its filter.
//! An event with a target entity is unicast:
//! only subscribers whose filter matches that entity run, and only for that entity.

use std::any::{self, Any, TypeId};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::{fmt, mem, ops};

use crate::comp::Component;
use crate::entity::EntityId;
use crate::registry::Registry;
use crate::world::World;


/// A value that can be emitted to systems.
///
/// This trait is usually implemented through `#[derive(Event)]`:
///
/// ```
/// #[derive(dynarch::Event)]
/// struct Damage(u32);
///
/// #[derive(dynarch::Event)]
/// #[dynarch(name = "heal")]
/// struct Heal(u32);
///
/// use dynarch::Event;
/// assert_eq!(Heal::name(), "heal");
/// ```
pub trait Event: 'static {
    /// A human-readable name for diagnostics. Defaults to the Rust type name.
    fn name() -> &'static str { any::type_name::<Self>() }
}

/// A process-wide identifier for an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u32);

impl EventId {
    /// Returns the raw integer value of this id.
    pub fn to_u32(self) -> u32 { self.0 }
}

/// The descriptor of an event type.
#[derive(Debug, Clone, Copy)]
pub struct EventInfo {
    id:   EventId,
    name: &'static str,
    size: usize,
}

impl EventInfo {
    /// The id of the event type.
    pub fn id(&self) -> EventId { self.id }

    /// The name reported by [`Event::name`].
    pub fn name(&self) -> &'static str { self.name }

    /// The size of a payload in bytes.
    pub fn size(&self) -> usize { self.size }
}

static REGISTRY: Registry<EventInfo> = Registry::new();

/// Returns the id of the event type `E`, registering it on first use.
pub fn id<E: Event>() -> EventId {
    REGISTRY
        .get_or_insert(TypeId::of::<E>(), |index| EventInfo {
            id:   EventId(index),
            name: E::name(),
            size: mem::size_of::<E>(),
        })
        .id
}

/// Returns the descriptor of a registered event type.
///
/// # Panics
/// Panics if `id` was not created by this process.
pub fn info(id: EventId) -> EventInfo { REGISTRY.get(id.0) }

/// The event being dispatched, with its type erased.
#[derive(Clone, Copy)]
pub struct AnyEvent<'w> {
    id:      EventId,
    payload: &'w dyn Any,
}

impl<'w> AnyEvent<'w> {
    pub(crate) fn new(id: EventId, payload: &'w dyn Any) -> Self { Self { id, payload } }

    /// The id of the event type.
    pub fn id(&self) -> EventId { self.id }

    /// The name of the event type.
    pub fn name(&self) -> &'static str { info(self.id).name }

    /// Whether the event is of type `E`.
    pub fn is<E: Event>(&self) -> bool { self.payload.is::<E>() }

    /// Downcasts the payload.
    pub fn get<E: Event>(&self) -> Option<&'w E> { self.payload.downcast_ref() }
}

impl<'w> fmt::Debug for AnyEvent<'w> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnyEvent").field(&self.name()).finish()
    }
}

/// The event being dispatched, as a callback parameter.
///
/// Invoking the callback for any other event type panics.
pub struct On<'w, E>(&'w E);

impl<'w, E> On<'w, E> {
    /// Wraps a payload reference.
    pub fn new(payload: &'w E) -> Self { Self(payload) }

    /// The payload, with the full dispatch lifetime.
    pub fn get(&self) -> &'w E { self.0 }
}

impl<'w, E> Clone for On<'w, E> {
    fn clone(&self) -> Self { *self }
}

impl<'w, E> Copy for On<'w, E> {}

impl<'w, E> ops::Deref for On<'w, E> {
    type Target = E;

    fn deref(&self) -> &E { self.0 }
}

impl<'w, E: fmt::Debug> fmt::Debug for On<'w, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_tuple("On").field(self.0).finish() }
}

/// Dispatched to an entity when it starts matching a subscribed system,
/// either because it was created or because an edit changed its archetype.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnAppear;

impl Event for OnAppear {}

/// Dispatched to an entity before it stops matching a subscribed system,
/// either because it is destroyed or because an edit changes its archetype.
///
/// The entity still holds all its components when subscribers run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OnDisappear;

impl Event for OnDisappear {}

/// Dispatched to each entity marked dirty for `T` by a tracking system,
/// when [`World::process_tracked_changes`](crate::World::process_tracked_changes) runs.
pub struct OnChange<T>(PhantomData<fn() -> T>);

impl<T> OnChange<T> {
    /// Creates the payload value.
    pub fn new() -> Self { Self(PhantomData) }
}

impl<T> Default for OnChange<T> {
    fn default() -> Self { Self::new() }
}

impl<T> fmt::Debug for OnChange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnChange<{}>", any::type_name::<T>())
    }
}

impl<T: Component> Event for OnChange<T> {}

/// An event waiting in the deferred queue.
pub(crate) struct Pending {
    pub(crate) id:      EventId,
    pub(crate) target:  Option<EntityId>,
    pub(crate) payload: Box<dyn Any>,
}

impl Pending {
    pub(crate) fn new<E: Event>(target: Option<EntityId>, payload: E) -> Self {
        Self { id: id::<E>(), target, payload: Box::new(payload) }
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("event", &info(self.id).name)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// The FIFO queue of deferred events.
#[derive(Debug, Default)]
pub(crate) struct Queue {
    pending: VecDeque<Pending>,
}

impl Queue {
    pub(crate) fn push(&mut self, pending: Pending) { self.pending.push_back(pending) }

    pub(crate) fn pop(&mut self) -> Option<Pending> { self.pending.pop_front() }

    pub(crate) fn len(&self) -> usize { self.pending.len() }
}

/// Emits an event of type `E`, obtained from [`World::event`].
#[must_use = "the event is only sent by `emit` or `emit_immediately`"]
pub struct EventBuilder<'w, E> {
    world:  &'w mut World,
    target: Option<EntityId>,
    _ph:    PhantomData<fn(E)>,
}

impl<'w, E: Event> EventBuilder<'w, E> {
    pub(crate) fn new(world: &'w mut World) -> Self { Self { world, target: None, _ph: PhantomData } }

    /// Restricts delivery to `entity`.
    ///
    /// Subscribers whose filter does not match the entity are skipped,
    /// and nothing is dispatched if the entity is dead at delivery time.
    pub fn entity(mut self, entity: EntityId) -> Self {
        self.target = Some(entity);
        self
    }

    /// Appends the event to the deferred queue.
    pub fn emit(self, payload: E) { self.world.enqueue_event(Pending::new(self.target, payload)) }

    /// Dispatches the event to all subscribers before returning.
    pub fn emit_immediately(self, payload: E) {
        self.world.dispatch_now(id::<E>(), self.target, &payload)
    }
}
