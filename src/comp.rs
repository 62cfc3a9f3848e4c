//! Components are the values stored on entities.
//!
//! Every `'static` type can be used as a component.
//! The first time a type is used, it is assigned a [`ComponentId`]
//! and a [`ComponentInfo`] describing how to move, clone and drop its values
//! through type-erased pointers.
//! Chunk storage only ever manipulates component values through this descriptor.

use std::any::{self, TypeId};
use std::{fmt, mem, ptr};

use crate::registry::Registry;

mod bundle;
pub use bundle::Bundle;
pub(crate) use bundle::ErasedBundle;

mod signature;
pub use signature::Signature;

#[cfg(test)]
mod tests;

/// A value type that can be stored on an entity.
///
/// This trait is implemented for all `'static` types.
pub trait Component: 'static {}

impl<T: 'static> Component for T {}

/// A process-wide identifier for a component type.
///
/// Ids are assigned in the order component types are first used
/// and are shared by all worlds in the process.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Returns the raw integer value of this id.
    pub fn to_u32(self) -> u32 { self.0 }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", info(*self).name(), self.0)
    }
}

/// Moves a value from `src` to `dst`, leaving `src` logically uninitialized.
pub type MoveFn = unsafe fn(dst: *mut u8, src: *const u8);
/// Writes a clone of the value at `src` into `dst`.
pub type CloneFn = unsafe fn(dst: *mut u8, src: *const u8);
/// Drops the value at `ptr` in place.
pub type DropFn = unsafe fn(ptr: *mut u8);

/// The type-erased descriptor of a component type.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    id:       ComponentId,
    name:     &'static str,
    type_id:  TypeId,
    size:     usize,
    align:    usize,
    move_fn:  MoveFn,
    clone_fn: Option<CloneFn>,
    drop_fn:  Option<DropFn>,
}

impl ComponentInfo {
    fn of<T: Component>(id: ComponentId) -> Self {
        Self {
            id,
            name: any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
            move_fn: move_erased::<T>,
            clone_fn: None,
            drop_fn: mem::needs_drop::<T>().then_some(drop_erased::<T> as DropFn),
        }
    }

    /// The id of the component type.
    pub fn id(&self) -> ComponentId { self.id }

    /// The Rust type name of the component type.
    pub fn name(&self) -> &'static str { self.name }

    /// The [`TypeId`] of the component type.
    pub fn type_id(&self) -> TypeId { self.type_id }

    /// The size of a single value in bytes.
    pub fn size(&self) -> usize { self.size }

    /// The alignment of the component type.
    pub fn align(&self) -> usize { self.align }

    /// Whether the component is zero-sized and takes no chunk storage.
    pub fn is_tag(&self) -> bool { self.size == 0 }

    /// Whether values of this type can be cloned through [`register_cloneable`].
    pub fn is_cloneable(&self) -> bool { self.clone_fn.is_some() }

    /// Moves a value from `src` to `dst`.
    ///
    /// # Safety
    /// `src` must point to an initialized value of this component type,
    /// `dst` must be valid for writes of this type,
    /// and the value at `src` must not be used or dropped afterwards.
    pub(crate) unsafe fn relocate(&self, dst: *mut u8, src: *const u8) { (self.move_fn)(dst, src) }

    /// Clones the value at `src` into `dst`.
    ///
    /// # Safety
    /// Same as [`relocate`](Self::relocate), except that `src` stays initialized.
    ///
    /// # Panics
    /// Panics if the component type was not registered as cloneable.
    pub(crate) unsafe fn clone_into(&self, dst: *mut u8, src: *const u8) {
        let clone_fn = self.clone_fn.unwrap_or_else(|| {
            panic!(
                "Component {} is not cloneable, register it with `comp::register_cloneable`",
                self.name
            )
        });
        clone_fn(dst, src)
    }

    /// Drops the value at `ptr`.
    ///
    /// # Safety
    /// `ptr` must point to an initialized value of this component type,
    /// which must not be used afterwards.
    pub(crate) unsafe fn drop_in_place(&self, ptr: *mut u8) {
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(ptr);
        }
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id.0)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("cloneable", &self.clone_fn.is_some())
            .field("needs_drop", &self.drop_fn.is_some())
            .finish()
    }
}

unsafe fn move_erased<T>(dst: *mut u8, src: *const u8) {
    ptr::copy_nonoverlapping(src.cast::<T>(), dst.cast::<T>(), 1);
}

unsafe fn clone_erased<T: Clone>(dst: *mut u8, src: *const u8) {
    let value = (*src.cast::<T>()).clone();
    ptr::write(dst.cast::<T>(), value);
}

unsafe fn drop_erased<T>(ptr: *mut u8) { ptr::drop_in_place(ptr.cast::<T>()) }

static REGISTRY: Registry<ComponentInfo> = Registry::new();

/// Returns the id of the component type `T`, registering it on first use.
pub fn id<T: Component>() -> ComponentId { info_of::<T>().id }

/// Returns the descriptor of the component type `T`, registering it on first use.
pub fn info_of<T: Component>() -> ComponentInfo {
    REGISTRY.get_or_insert(TypeId::of::<T>(), |index| ComponentInfo::of::<T>(ComponentId(index)))
}

/// Returns the descriptor of a registered component type.
///
/// # Panics
/// Panics if `id` was not created by this process.
pub fn info(id: ComponentId) -> ComponentInfo { REGISTRY.get(id.0) }

/// Registers `T` as a cloneable component type, enabling [`World::clone_entity`](crate::World::clone_entity)
/// on entities holding it.
///
/// Archetypes keep their own copy of the descriptor,
/// so cloning always consults the registry for the clone function.
pub fn register_cloneable<T: Component + Clone>() -> ComponentId {
    let id = id::<T>();
    REGISTRY.update(id.0, |info| info.clone_fn = Some(clone_erased::<T>));
    id
}

/// The number of component types registered in this process so far.
pub fn registered_count() -> usize { REGISTRY.len() }

/// A statically known set of component types, implemented for tuples.
pub trait Components {
    /// Appends the ids of the component types in this set.
    fn ids(out: &mut Vec<ComponentId>);
}

macro_rules! impl_components {
    ($($ty:ident),*) => {
        impl<$($ty: Component),*> Components for ($($ty,)*) {
            #[allow(unused_variables)]
            fn ids(out: &mut Vec<ComponentId>) {
                $(out.push(id::<$ty>());)*
            }
        }
    }
}

impl_components!();
impl_components!(A);
impl_components!(A, B);
impl_components!(A, B, C);
impl_components!(A, B, C, D);
impl_components!(A, B, C, D, E);
impl_components!(A, B, C, D, E, F);
impl_components!(A, B, C, D, E, F, G);
impl_components!(A, B, C, D, E, F, G, H);

cfg_if::cfg_if! {
    if #[cfg(feature = "tuple-impl-12")] {
        impl_components!(A, B, C, D, E, F, G, H, I);
        impl_components!(A, B, C, D, E, F, G, H, I, J);
        impl_components!(A, B, C, D, E, F, G, H, I, J, K);
        impl_components!(A, B, C, D, E, F, G, H, I, J, K, L);
    }
}

static_assertions::assert_impl_all!(ComponentId: Send, Sync, Copy);
static_assertions::assert_impl_all!(ComponentInfo: Send, Sync, Copy);
