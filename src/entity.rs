//! Entity handles and the index resolving them to storage locations.
//!
//! An [`EntityId`] never points into chunk memory directly.
//! It is always resolved through the [`EntityIndex`],
//! so moving rows around during swap-remove never invalidates a live handle.

use std::fmt;

use xias::Xias;

mod index;
pub use index::{EntityIndex, Location};

#[cfg(test)]
mod tests;

/// A generational handle to an entity.
///
/// The lower 32 bits are the slot index, which is reused after the entity is destroyed.
/// The upper 32 bits are the generation of the slot,
/// which is incremented on every reuse so that stale handles stop resolving.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(u64);

impl EntityId {
    /// A handle that never refers to a live entity.
    pub const NULL: Self = Self(u64::MAX);

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    /// The slot index of the entity.
    pub fn index(self) -> u32 { self.0 as u32 }

    /// The number of times the slot had been reused when this handle was created.
    pub fn generation(self) -> u32 { (self.0 >> 32) as u32 }

    /// The packed integer representation of this handle.
    pub fn to_bits(self) -> u64 { self.0 }

    /// Reconstructs a handle from [`to_bits`](Self::to_bits).
    pub fn from_bits(bits: u64) -> Self { Self(bits) }

    pub(crate) fn slot(self) -> usize { self.index().small_int() }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NULL {
            write!(f, "EntityId(null)")
        } else {
            write!(f, "EntityId({}v{})", self.index(), self.generation())
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Debug::fmt(self, f) }
}

static_assertions::assert_eq_size!(EntityId, u64);
static_assertions::assert_impl_all!(EntityId: Send, Sync, Copy);
