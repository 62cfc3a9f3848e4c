//! Utilities shared by unit tests and benchmarks.

#![allow(missing_docs)]

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, Once};

use crate::archetype::{ChunkAllocator, GlobalChunkAllocator};

/// Initializes logging once per test binary. Respects `RUST_LOG`.
pub fn init() {
    static SET_LOGGER_ONCE: Once = Once::new();
    SET_LOGGER_ONCE.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A distinct component type for every `N`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompN<const N: usize>(pub i32);

/// A small component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Foo(pub i32);

/// Another small component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bar(pub i32);

/// A zero-sized component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker;

/// A one-byte component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Light(pub u8);

/// A 1 KiB component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heavy(pub [u64; 128]);

impl Default for Heavy {
    fn default() -> Self { Self([0; 128]) }
}

/// A lifecycle operation observed on a [`Traced`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Construct(u32),
    Clone(u32),
    Drop(u32),
}

/// Records the lifecycle operations of [`Traced`] values.
#[derive(Debug, Default, Clone)]
pub struct OpLog(Arc<Mutex<Vec<Op>>>);

impl OpLog {
    pub fn new() -> Self { Self::default() }

    fn push(&self, op: Op) { self.0.lock().push(op) }

    /// Returns the recorded operations and clears the log.
    pub fn take(&self) -> Vec<Op> { std::mem::take(&mut *self.0.lock()) }

    /// The number of recorded operations matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Op) -> bool) -> usize {
        self.0.lock().iter().filter(|op| predicate(op)).count()
    }
}

/// A component that logs when it is constructed, cloned and dropped.
#[derive(Debug)]
pub struct Traced {
    pub value: u32,
    log:       OpLog,
}

impl Traced {
    pub fn new(value: u32, log: &OpLog) -> Self {
        log.push(Op::Construct(value));
        Self { value, log: log.clone() }
    }
}

impl Clone for Traced {
    fn clone(&self) -> Self {
        self.log.push(Op::Clone(self.value));
        Self { value: self.value, log: self.log.clone() }
    }
}

impl Drop for Traced {
    fn drop(&mut self) { self.log.push(Op::Drop(self.value)) }
}

/// A chunk allocator that fails after a fixed number of allocations
/// and counts the chunks currently allocated.
#[derive(Debug)]
pub struct FailingAllocator {
    remaining: AtomicUsize,
    live:      AtomicUsize,
}

impl FailingAllocator {
    /// Creates an allocator that succeeds `budget` times.
    pub fn new(budget: usize) -> Arc<Self> {
        Arc::new(Self { remaining: AtomicUsize::new(budget), live: AtomicUsize::new(0) })
    }

    /// Allows `count` more allocations.
    pub fn refill(&self, count: usize) { self.remaining.fetch_add(count, Ordering::SeqCst); }

    /// The number of chunks allocated and not yet freed.
    pub fn live(&self) -> usize { self.live.load(Ordering::SeqCst) }
}

impl ChunkAllocator for FailingAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let granted = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok();
        if !granted {
            log::trace!("FailingAllocator refused {layout:?}");
            return None;
        }

        let ptr = GlobalChunkAllocator.allocate(layout)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        GlobalChunkAllocator.deallocate(ptr, layout)
    }
}
