use std::mem::ManuallyDrop;

use super::{Component, ComponentId};

/// A list of component values accumulated by an entity builder or edit.
///
/// Bundles are built as nested pairs, `(((), A), B)`,
/// by [`EntityBuilder::add`](crate::world::EntityBuilder::add)
/// and [`Edit::add`](crate::world::Edit::add).
pub trait Bundle: 'static {
    /// Appends the component ids of the values in the order they were added.
    fn collect_ids(&self, out: &mut Vec<ComponentId>);

    /// Hands each value to `sink` as a pointer to its bytes.
    ///
    /// The sink takes ownership of the pointed value and must move it out before returning.
    /// Values are never dropped by the bundle once passed to the sink.
    fn take(self, sink: &mut dyn FnMut(ComponentId, *mut u8));
}

impl Bundle for () {
    fn collect_ids(&self, _: &mut Vec<ComponentId>) {}

    fn take(self, _: &mut dyn FnMut(ComponentId, *mut u8)) {}
}

impl<B: Bundle, T: Component> Bundle for (B, T) {
    fn collect_ids(&self, out: &mut Vec<ComponentId>) {
        Bundle::collect_ids(&self.0, out);
        out.push(super::id::<T>());
    }

    fn take(self, sink: &mut dyn FnMut(ComponentId, *mut u8)) {
        let (rest, value) = self;
        Bundle::take(rest, sink);
        let mut value = ManuallyDrop::new(value);
        sink(super::id::<T>(), (&mut *value as *mut T).cast());
    }
}

/// An object-safe [`Bundle`] stored in the command buffer.
pub(crate) trait ErasedBundle {
    fn collect_ids(&self, out: &mut Vec<ComponentId>);

    fn take_boxed(self: Box<Self>, sink: &mut dyn FnMut(ComponentId, *mut u8));
}

impl<B: Bundle> ErasedBundle for B {
    fn collect_ids(&self, out: &mut Vec<ComponentId>) { Bundle::collect_ids(self, out) }

    fn take_boxed(self: Box<Self>, sink: &mut dyn FnMut(ComponentId, *mut u8)) { Bundle::take(*self, sink) }
}

impl Bundle for Box<dyn ErasedBundle> {
    fn collect_ids(&self, out: &mut Vec<ComponentId>) {
        <dyn ErasedBundle>::collect_ids(&**self, out)
    }

    fn take(self, sink: &mut dyn FnMut(ComponentId, *mut u8)) {
        <dyn ErasedBundle>::take_boxed(self, sink)
    }
}
