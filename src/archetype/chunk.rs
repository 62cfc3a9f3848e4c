//! Raw chunk buffers and the allocator interface they are obtained from.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// The memory provider for chunk buffers.
///
/// All chunks of a world are allocated and freed through the same provider,
/// so implementations may pool or limit chunk memory.
pub trait ChunkAllocator {
    /// Allocates an uninitialized buffer for `layout`.
    ///
    /// Returns `None` if the memory cannot be provided.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Frees a buffer.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on the same allocator
    /// with the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Allocates chunks from the global Rust allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalChunkAllocator;

impl ChunkAllocator for GlobalChunkAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0, "chunks always hold the entity id array");
        // Safety: layout size is nonzero.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout)
    }
}

/// A fixed-size buffer holding up to `capacity` rows of one archetype.
///
/// The chunk does not know its own layout;
/// the owning archetype computes pointers and releases the buffer.
#[derive(Debug)]
pub(crate) struct Chunk {
    ptr: NonNull<u8>,
    len: usize,
}

impl Chunk {
    pub(crate) fn new(ptr: NonNull<u8>) -> Self { Self { ptr, len: 0 } }

    /// The number of occupied slots, which always form the prefix `0..len`.
    pub(crate) fn len(&self) -> usize { self.len }

    pub(crate) fn set_len(&mut self, len: usize) { self.len = len }

    pub(crate) fn base(&self) -> *mut u8 { self.ptr.as_ptr() }

    pub(crate) fn into_raw(self) -> NonNull<u8> { self.ptr }
}
