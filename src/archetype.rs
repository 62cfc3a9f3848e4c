//! Archetypes store all entities sharing one component signature.
//!
//! Rows of an archetype are laid out in fixed-size [chunks](chunk),
//! each holding an entity id array followed by one array per sized component
//! ("structure of arrays").
//! Occupied rows always form a contiguous prefix over the chunk list:
//! every chunk before the last occupied one is full,
//! and removing a row moves the last row into its place.

use std::alloc::Layout;
use std::sync::Arc;
use std::{fmt, mem, ptr};

use xias::Xias;

use crate::comp::{self, ComponentId, ComponentInfo, Signature};
use crate::entity::{EntityId, Location};
use crate::Error;

pub mod chunk;
use chunk::Chunk;
pub use chunk::{ChunkAllocator, GlobalChunkAllocator};

mod graph;
pub use graph::EditSet;
use graph::Graph;


/// The granularity of chunk sizes in bytes.
pub const CHUNK_BYTE_BUDGET: usize = 16 * 1024;

/// The minimum number of entities a chunk is sized for.
pub const CHUNK_TARGET_ENTITIES: usize = 100;

/// Identifies an archetype within a world.
///
/// Archetype ids are assigned in creation order and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// The archetype with the empty signature, which exists in every world.
    pub const EMPTY: Self = Self(0);

    /// Returns the raw integer value of this id.
    pub fn to_u32(self) -> u32 { self.0 }

    pub(crate) fn index(self) -> usize { self.0.small_int() }

    fn from_index(index: usize) -> Self { Self(index.small_int()) }
}

/// The per-chunk memory layout of an archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    entity_size:    usize,
    chunk_size:     usize,
    chunk_capacity: usize,
    align:          usize,
}

impl ChunkLayout {
    /// Computes the layout for the given columns and returns the byte offset of each column array.
    ///
    /// The chunk size is the smallest multiple of [`CHUNK_BYTE_BUDGET`]
    /// that fits [`CHUNK_TARGET_ENTITIES`] unpadded rows.
    /// The capacity starts at `chunk_size / entity_size`
    /// and shrinks until the aligned arrays fit.
    fn compute(infos: &[ComponentInfo]) -> (Self, Vec<usize>) {
        let entity_size =
            mem::size_of::<EntityId>() + infos.iter().map(|info| info.size()).sum::<usize>();
        let chunk_size =
            ((entity_size * CHUNK_TARGET_ENTITIES) / CHUNK_BYTE_BUDGET + 1) * CHUNK_BYTE_BUDGET;
        let align =
            infos.iter().map(|info| info.align()).fold(mem::align_of::<EntityId>(), usize::max);

        let mut chunk_capacity = chunk_size / entity_size;
        loop {
            assert!(
                chunk_capacity > 0,
                "Components {:?} cannot fit in a chunk of {chunk_size} bytes",
                infos.iter().map(|info| info.name()).collect::<Vec<_>>(),
            );

            if let Some(offsets) = column_offsets(infos, chunk_capacity, chunk_size) {
                return (Self { entity_size, chunk_size, chunk_capacity, align }, offsets);
            }

            chunk_capacity -= 1;
        }
    }

    /// The number of bytes a row occupies, including its entity id.
    pub fn entity_size(&self) -> usize { self.entity_size }

    /// The size of a chunk buffer in bytes.
    pub fn chunk_size(&self) -> usize { self.chunk_size }

    /// The number of rows a chunk can hold.
    pub fn chunk_capacity(&self) -> usize { self.chunk_capacity }

    /// The alignment of a chunk buffer.
    pub fn align(&self) -> usize { self.align }

    fn buffer_layout(&self) -> Layout {
        Layout::from_size_align(self.chunk_size, self.align)
            .expect("component alignments are powers of two")
    }
}

fn column_offsets(infos: &[ComponentInfo], capacity: usize, chunk_size: usize) -> Option<Vec<usize>> {
    let mut offset = mem::size_of::<EntityId>() * capacity;
    let mut offsets = Vec::with_capacity(infos.len());

    for info in infos {
        if info.is_tag() {
            offsets.push(0);
            continue;
        }

        offset = (offset + info.align() - 1) / info.align() * info.align();
        offsets.push(offset);
        offset += info.size() * capacity;
    }

    (offset <= chunk_size).then_some(offsets)
}

#[derive(Debug, Clone, Copy)]
struct Column {
    info:   ComponentInfo,
    offset: usize,
}

/// The storage of all entities with the same signature.
pub struct Archetype {
    id:        ArchetypeId,
    signature: Signature,
    columns:   Vec<Column>,
    layout:    ChunkLayout,
    chunks:    Vec<Chunk>,
    len:       usize,
    allocator: Arc<dyn ChunkAllocator>,
}

impl Archetype {
    fn new(id: ArchetypeId, signature: Signature, allocator: Arc<dyn ChunkAllocator>) -> Self {
        let infos: Vec<ComponentInfo> = signature.iter().map(comp::info).collect();
        let (layout, offsets) = ChunkLayout::compute(&infos);
        let columns =
            infos.into_iter().zip(offsets).map(|(info, offset)| Column { info, offset }).collect();

        log::debug!(
            "Created archetype {id:?} {signature:?} with {} rows per {}-byte chunk",
            layout.chunk_capacity,
            layout.chunk_size,
        );

        Self { id, signature, columns, layout, chunks: Vec::new(), len: 0, allocator }
    }

    /// The id of this archetype.
    pub fn id(&self) -> ArchetypeId { self.id }

    /// The component types of entities in this archetype.
    pub fn signature(&self) -> &Signature { &self.signature }

    /// Whether entities in this archetype have the component `id`.
    pub fn has(&self, id: ComponentId) -> bool { self.signature.contains(id) }

    /// The number of entities in this archetype.
    pub fn len(&self) -> usize { self.len }

    /// Whether the archetype holds no entities.
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// The number of allocated chunks, including empty ones retained for reuse.
    pub fn chunk_count(&self) -> usize { self.chunks.len() }

    /// The chunk memory layout.
    pub fn layout(&self) -> &ChunkLayout { &self.layout }

    /// The number of rows a chunk can hold.
    pub fn chunk_capacity(&self) -> usize { self.layout.chunk_capacity }

    /// The number of bytes a row occupies, including its entity id.
    pub fn entity_size(&self) -> usize { self.layout.entity_size }

    /// The size of a chunk buffer in bytes.
    pub fn chunk_size(&self) -> usize { self.layout.chunk_size }

    /// The column index of the component `id`, in signature order.
    pub fn component_index(&self, id: ComponentId) -> Option<usize> { self.signature.position(id) }

    /// The descriptor of the component at column `index`.
    ///
    /// # Panics
    /// Panics if `index` is not less than the signature length.
    pub fn component_info(&self, index: usize) -> &ComponentInfo { &self.columns[index].info }

    /// Iterates over the entities in row order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.chunks
            .iter()
            .enumerate()
            .flat_map(move |(chunk, data)| (0..data.len()).map(move |slot| self.entity_at(chunk, slot)))
    }

    pub(crate) fn chunks(&self) -> &[Chunk] { &self.chunks }

    pub(crate) fn location_of(&self, row: usize) -> Location {
        Location {
            archetype: self.id,
            chunk:     (row / self.layout.chunk_capacity).small_int(),
            slot:      (row % self.layout.chunk_capacity).small_int(),
        }
    }

    /// Makes sure a slot is available for one more row, allocating a chunk if needed.
    pub(crate) fn reserve(&mut self) -> Result<(), Error> {
        if self.len / self.layout.chunk_capacity < self.chunks.len() {
            return Ok(());
        }

        let layout = self.layout.buffer_layout();
        let ptr = self.allocator.allocate(layout).ok_or(Error::ChunkAlloc {
            archetype: self.id,
            size:      layout.size(),
            align:     layout.align(),
        })?;
        log::trace!("Allocated chunk #{} for archetype {:?}", self.chunks.len(), self.id);
        self.chunks.push(Chunk::new(ptr));
        Ok(())
    }

    /// Appends a row for `entity`.
    ///
    /// The component columns of the new row are uninitialized;
    /// the caller must write every column before the archetype is used again.
    pub(crate) fn push(&mut self, entity: EntityId) -> Result<Location, Error> {
        self.reserve()?;

        let location = self.location_of(self.len);
        let chunk = &mut self.chunks[location.chunk()];
        debug_assert_eq!(chunk.len(), location.slot(), "rows must form a contiguous prefix");
        // Safety: the slot is within capacity of a live chunk.
        unsafe { ptr::write(chunk.base().cast::<EntityId>().add(location.slot()), entity) };
        chunk.set_len(location.slot() + 1);
        self.len += 1;

        Ok(location)
    }

    pub(crate) fn entity_at(&self, chunk: usize, slot: usize) -> EntityId {
        debug_assert!(slot < self.chunks[chunk].len());
        // Safety: occupied slots always hold an entity id.
        unsafe { *self.chunks[chunk].base().cast::<EntityId>().add(slot) }
    }

    /// Returns a pointer to the value of column `column` in the given row.
    ///
    /// Tag columns yield a dangling, well-aligned pointer.
    pub(crate) fn column_ptr(&self, column: usize, chunk: usize, slot: usize) -> *mut u8 {
        let Column { info, offset } = self.columns[column];
        if info.is_tag() {
            return ptr::null_mut::<u8>().wrapping_add(info.align());
        }
        // Safety: the offset of a column array plus a slot within capacity stays in the buffer.
        unsafe { self.chunks[chunk].base().add(offset + slot * info.size()) }
    }

    /// Moves `src` into column `column` of `location`.
    ///
    /// # Safety
    /// `src` must point to a value of the column's component type, which is moved out.
    pub(crate) unsafe fn write(&mut self, location: Location, column: usize, src: *const u8) {
        let dst = self.column_ptr(column, location.chunk(), location.slot());
        self.columns[column].info.relocate(dst, src);
    }

    /// Removes the row at `location` by moving the last row into it.
    ///
    /// Columns for which `should_drop` returns `false`
    /// are assumed to have been moved out already.
    /// Returns the entity that now occupies `location`, if a row was moved.
    pub(crate) fn swap_remove(
        &mut self,
        location: Location,
        mut should_drop: impl FnMut(&ComponentInfo) -> bool,
    ) -> Option<EntityId> {
        debug_assert_eq!(location.archetype, self.id);
        let last = self.location_of(self.len - 1);
        let moving = (location.chunk, location.slot) != (last.chunk, last.slot);

        for column in 0..self.columns.len() {
            let info = self.columns[column].info;
            let dst = self.column_ptr(column, location.chunk(), location.slot());
            if should_drop(&info) {
                // Safety: the row is occupied and the value was not moved out.
                unsafe { info.drop_in_place(dst) };
            }
            if moving {
                let src = self.column_ptr(column, last.chunk(), last.slot());
                // Safety: the last row is occupied and is vacated below.
                unsafe { info.relocate(dst, src) };
            }
        }

        let moved = moving.then(|| {
            let entity = self.entity_at(last.chunk(), last.slot());
            let base = self.chunks[location.chunk()].base().cast::<EntityId>();
            // Safety: the slot is occupied.
            unsafe { ptr::write(base.add(location.slot()), entity) };
            entity
        });

        self.chunks[last.chunk()].set_len(last.slot());
        self.len -= 1;

        moved
    }

    /// Frees trailing chunks that hold no rows and returns how many were freed.
    pub fn compact(&mut self) -> usize {
        let in_use = (self.len + self.layout.chunk_capacity - 1) / self.layout.chunk_capacity;
        let layout = self.layout.buffer_layout();

        let mut freed = 0;
        while self.chunks.len() > in_use {
            let chunk = self.chunks.pop().expect("chunks.len() > in_use >= 0");
            debug_assert_eq!(chunk.len(), 0);
            // Safety: the chunk was allocated by this allocator with this layout.
            unsafe { self.allocator.deallocate(chunk.into_raw(), layout) };
            freed += 1;
        }
        freed
    }
}

impl Drop for Archetype {
    fn drop(&mut self) {
        for column in 0..self.columns.len() {
            let info = self.columns[column].info;
            for chunk in 0..self.chunks.len() {
                for slot in 0..self.chunks[chunk].len() {
                    // Safety: every occupied slot holds an initialized value.
                    unsafe { info.drop_in_place(self.column_ptr(column, chunk, slot)) };
                }
            }
        }

        let layout = self.layout.buffer_layout();
        for chunk in self.chunks.drain(..) {
            // Safety: the chunk was allocated by this allocator with this layout.
            unsafe { self.allocator.deallocate(chunk.into_raw(), layout) };
        }
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .field("layout", &self.layout)
            .finish()
    }
}

/// All archetypes of a world together with the transition graph between them.
pub(crate) struct Storage {
    archetypes: Vec<Archetype>,
    graph:      Graph,
    allocator:  Arc<dyn ChunkAllocator>,
}

impl Storage {
    pub(crate) fn new(allocator: Arc<dyn ChunkAllocator>) -> Self {
        let mut storage = Self { archetypes: Vec::new(), graph: Graph::default(), allocator };
        let (empty, _) = storage.get_or_create(Signature::empty());
        debug_assert_eq!(empty, ArchetypeId::EMPTY);
        storage
    }

    pub(crate) fn get(&self, id: ArchetypeId) -> &Archetype { &self.archetypes[id.index()] }

    pub(crate) fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.index()]
    }

    pub(crate) fn all(&self) -> &[Archetype] { &self.archetypes }

    /// Returns the archetype for `signature` and whether it was just created.
    pub(crate) fn get_or_create(&mut self, signature: Signature) -> (ArchetypeId, bool) {
        if let Some(id) = self.graph.find(&signature) {
            return (id, false);
        }

        let id = ArchetypeId::from_index(self.archetypes.len());
        self.graph.insert_archetype(signature.clone(), id);
        self.archetypes.push(Archetype::new(id, signature, Arc::clone(&self.allocator)));
        (id, true)
    }

    /// Resolves the archetype reached by applying `edit` to `source`,
    /// and whether it was just created.
    pub(crate) fn resolve(&mut self, source: ArchetypeId, edit: &EditSet) -> (ArchetypeId, bool) {
        if let Some(target) = self.graph.edge(source, edit) {
            return (target, false);
        }

        let signature = self.get(source).signature().edited(edit.add(), edit.remove());
        let (target, created) = self.get_or_create(signature);
        self.graph.insert_edge(source, edit.clone(), target);
        (target, created)
    }

    /// Borrows two distinct archetypes mutably.
    pub(crate) fn pair_mut(
        &mut self,
        a: ArchetypeId,
        b: ArchetypeId,
    ) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "cannot borrow the same archetype twice");
        if a.index() < b.index() {
            let (left, right) = self.archetypes.split_at_mut(b.index());
            (&mut left[a.index()], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a.index());
            (&mut right[0], &mut left[b.index()])
        }
    }

    pub(crate) fn edge_count(&self) -> usize { self.graph.edge_count() }

    pub(crate) fn compact(&mut self) -> usize {
        let freed: usize = self.archetypes.iter_mut().map(Archetype::compact).sum();
        log::debug!("Compaction freed {freed} chunks");
        freed
    }
}
