//! Callback parameters resolved per archetype and fetched per row.
//!
//! A callback passed to [`View::for_each`](super::View::for_each),
//! [`Query::for_each`](super::Query::for_each)
//! or [`SystemBuilder::for_each`](crate::system::SystemBuilder::for_each)
//! declares what it needs through the types of its parameters.
//! The parameters may appear in any order:
//!
//! | Parameter | Meaning |
//! | --- | --- |
//! | `EntityId` | the entity being visited |
//! | `&T` / `&mut T` | a required component |
//! | `Option<&T>` / `Option<&mut T>` | an optional component |
//! | [`On<E>`] | the event being dispatched, which must be of type `E` |
//! | [`AnyEvent`] | the event being dispatched, type-erased |
//! | [`Deferred`] | a handle to queue structural changes |
//!
//! Parameter types must be spelled out in the closure,
//! e.g. `|id: EntityId, pos: &mut Position|`.

use crate::archetype::Archetype;
use crate::comp::{self, Component, ComponentId};
use crate::entity::EntityId;
use crate::event::{AnyEvent, Event, On};
use crate::world::Deferred;

/// The row a callback is invoked for.
pub struct Row<'w> {
    pub(crate) archetype: &'w Archetype,
    pub(crate) chunk:     usize,
    pub(crate) slot:      usize,
    pub(crate) entity:    EntityId,
    pub(crate) event:     Option<AnyEvent<'w>>,
    pub(crate) deferred:  Deferred<'w>,
}

impl<'w> Row<'w> {
    /// The entity being visited.
    pub fn entity(&self) -> EntityId { self.entity }

    fn component_ptr(&self, column: usize) -> *mut u8 {
        self.archetype.column_ptr(column, self.chunk, self.slot)
    }
}

/// The component accesses declared by a callback.
#[derive(Debug, Default)]
pub struct Access {
    reads:    Vec<ComponentId>,
    writes:   Vec<ComponentId>,
    required: Vec<ComponentId>,
}

impl Access {
    /// Declares a shared access to `id`.
    ///
    /// # Panics
    /// Panics if `id` is also accessed mutably.
    pub fn read(&mut self, id: ComponentId, required: bool) {
        assert!(
            !self.writes.contains(&id),
            "Component {} is requested both mutably and immutably in the same callback",
            comp::info(id).name(),
        );
        self.reads.push(id);
        if required {
            self.required.push(id);
        }
    }

    /// Declares an exclusive access to `id`.
    ///
    /// # Panics
    /// Panics if `id` is accessed by any other parameter.
    pub fn write(&mut self, id: ComponentId, required: bool) {
        assert!(
            !self.writes.contains(&id) && !self.reads.contains(&id),
            "Component {} is requested mutably more than once in the same callback",
            comp::info(id).name(),
        );
        self.writes.push(id);
        if required {
            self.required.push(id);
        }
    }

    /// The components that must be present for the callback to run on an entity.
    pub fn required(&self) -> &[ComponentId] { &self.required }
}

/// A callback parameter.
///
/// # Safety
/// `access` must declare every component `fetch` reads or writes,
/// so that conflicting mutable borrows are rejected before any row is fetched.
pub unsafe trait Param {
    /// The value passed to the callback.
    type Item<'w>;

    /// The per-archetype resolution result, e.g. a column index.
    type State: Copy;

    /// Declares the components accessed by this parameter.
    fn access(access: &mut Access);

    /// Resolves the parameter against an archetype.
    /// Returns `None` if the archetype lacks a required component.
    fn resolve(archetype: &Archetype) -> Option<Self::State>;

    /// Fetches the value for a row.
    ///
    /// # Safety
    /// `state` must have been resolved from `row.archetype`,
    /// and no other live reference may alias a component this parameter borrows mutably.
    unsafe fn fetch<'w>(state: Self::State, row: &Row<'w>) -> Self::Item<'w>;
}

unsafe impl Param for EntityId {
    type Item<'w> = EntityId;
    type State = ();

    fn access(_: &mut Access) {}

    fn resolve(_: &Archetype) -> Option<()> { Some(()) }

    unsafe fn fetch<'w>(_: (), row: &Row<'w>) -> EntityId { row.entity }
}

unsafe impl<'a, T: Component> Param for &'a T {
    type Item<'w> = &'w T;
    type State = usize;

    fn access(access: &mut Access) { access.read(comp::id::<T>(), true) }

    fn resolve(archetype: &Archetype) -> Option<usize> {
        archetype.component_index(comp::id::<T>())
    }

    unsafe fn fetch<'w>(column: usize, row: &Row<'w>) -> &'w T {
        &*row.component_ptr(column).cast::<T>()
    }
}

unsafe impl<'a, T: Component> Param for &'a mut T {
    type Item<'w> = &'w mut T;
    type State = usize;

    fn access(access: &mut Access) { access.write(comp::id::<T>(), true) }

    fn resolve(archetype: &Archetype) -> Option<usize> {
        archetype.component_index(comp::id::<T>())
    }

    unsafe fn fetch<'w>(column: usize, row: &Row<'w>) -> &'w mut T {
        &mut *row.component_ptr(column).cast::<T>()
    }
}

unsafe impl<'a, T: Component> Param for Option<&'a T> {
    type Item<'w> = Option<&'w T>;
    type State = Option<usize>;

    fn access(access: &mut Access) { access.read(comp::id::<T>(), false) }

    fn resolve(archetype: &Archetype) -> Option<Option<usize>> {
        Some(archetype.component_index(comp::id::<T>()))
    }

    unsafe fn fetch<'w>(column: Option<usize>, row: &Row<'w>) -> Option<&'w T> {
        column.map(|column| &*row.component_ptr(column).cast::<T>())
    }
}

unsafe impl<'a, T: Component> Param for Option<&'a mut T> {
    type Item<'w> = Option<&'w mut T>;
    type State = Option<usize>;

    fn access(access: &mut Access) { access.write(comp::id::<T>(), false) }

    fn resolve(archetype: &Archetype) -> Option<Option<usize>> {
        Some(archetype.component_index(comp::id::<T>()))
    }

    unsafe fn fetch<'w>(column: Option<usize>, row: &Row<'w>) -> Option<&'w mut T> {
        column.map(|column| &mut *row.component_ptr(column).cast::<T>())
    }
}

unsafe impl<'a, E: Event> Param for On<'a, E> {
    type Item<'w> = On<'w, E>;
    type State = ();

    fn access(_: &mut Access) {}

    fn resolve(_: &Archetype) -> Option<()> { Some(()) }

    unsafe fn fetch<'w>(_: (), row: &Row<'w>) -> On<'w, E> {
        match row.event {
            Some(event) => event.get::<E>().map(On::new).unwrap_or_else(|| {
                panic!("Callback expects event {} but received {}", E::name(), event.name())
            }),
            None => panic!("Callback expects event {} but was not invoked by an event", E::name()),
        }
    }
}

unsafe impl<'a> Param for AnyEvent<'a> {
    type Item<'w> = AnyEvent<'w>;
    type State = ();

    fn access(_: &mut Access) {}

    fn resolve(_: &Archetype) -> Option<()> { Some(()) }

    unsafe fn fetch<'w>(_: (), row: &Row<'w>) -> AnyEvent<'w> {
        row.event.unwrap_or_else(|| panic!("Callback expects an event but was not invoked by one"))
    }
}

unsafe impl<'a> Param for Deferred<'a> {
    type Item<'w> = Deferred<'w>;
    type State = ();

    fn access(_: &mut Access) {}

    fn resolve(_: &Archetype) -> Option<()> { Some(()) }

    unsafe fn fetch<'w>(_: (), row: &Row<'w>) -> Deferred<'w> { row.deferred }
}

/// A callback taking [`Param`]s, implemented for closures of up to 8 parameters
/// (12 with the `tuple-impl-12` feature).
///
/// `Marker` is the function pointer type of the callback signature
/// and is always inferred.
pub trait Each<Marker> {
    /// The resolved states of all parameters.
    type State: Copy;

    /// Declares the component accesses of all parameters.
    fn access(access: &mut Access);

    /// Resolves all parameters against an archetype.
    fn resolve(archetype: &Archetype) -> Option<Self::State>;

    /// Invokes the callback for a row.
    ///
    /// # Safety
    /// Same as [`Param::fetch`], for every parameter.
    unsafe fn call(&mut self, state: Self::State, row: &Row<'_>);
}

/// Validates the parameter accesses of `F` and returns them.
pub(crate) fn access_of<M, F: Each<M>>() -> Access {
    let mut access = Access::default();
    F::access(&mut access);
    access
}

macro_rules! impl_each {
    ($($param:ident),*) => {
        impl<Func, $($param: Param),*> Each<fn($($param,)*)> for Func
        where
            for<'a, 'w> &'a mut Func: FnMut($($param),*) + FnMut($(<$param as Param>::Item<'w>),*),
        {
            type State = ($($param::State,)*);

            #[allow(unused_variables)]
            fn access(access: &mut Access) { $($param::access(access);)* }

            #[allow(unused_variables)]
            fn resolve(archetype: &Archetype) -> Option<Self::State> {
                Some(($($param::resolve(archetype)?,)*))
            }

            #[allow(non_snake_case, unused_variables, clippy::unused_unit)]
            unsafe fn call(&mut self, state: Self::State, row: &Row<'_>) {
                // pins the argument types so that the callback is called with fetched items
                fn call_inner<$($param),*>(mut f: impl FnMut($($param),*), $($param: $param),*) {
                    f($($param),*)
                }

                let ($($param,)*) = state;
                call_inner(self, $($param::fetch($param, row)),*)
            }
        }
    }
}

impl_each!();
impl_each!(A);
impl_each!(A, B);
impl_each!(A, B, C);
impl_each!(A, B, C, D);
impl_each!(A, B, C, D, E);
impl_each!(A, B, C, D, E, F);
impl_each!(A, B, C, D, E, F, G);
impl_each!(A, B, C, D, E, F, G, H);

cfg_if::cfg_if! {
    if #[cfg(feature = "tuple-impl-12")] {
        impl_each!(A, B, C, D, E, F, G, H, I);
        impl_each!(A, B, C, D, E, F, G, H, I, J);
        impl_each!(A, B, C, D, E, F, G, H, I, J, K);
        impl_each!(A, B, C, D, E, F, G, H, I, J, K, L);
    }
}
