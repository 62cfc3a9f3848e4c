use std::cell::Cell;

use xias::Xias;

use super::EntityId;
use crate::archetype::ArchetypeId;

/// Where the row of a live entity is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    /// The archetype holding the entity.
    pub archetype: ArchetypeId,
    /// The chunk index within the archetype.
    pub chunk:     u32,
    /// The slot index within the chunk.
    pub slot:      u32,
}

impl Location {
    pub(crate) fn chunk(&self) -> usize { self.chunk.small_int() }

    pub(crate) fn slot(&self) -> usize { self.slot.small_int() }
}

#[derive(Debug, Clone, Copy)]
struct Record {
    generation: u32,
    location:   Option<Location>,
}

/// Maps entity slots to their storage location and generation.
///
/// Freed slots are recycled in LIFO order.
/// A slot whose generation cannot be incremented any further is retired permanently.
#[derive(Debug, Default)]
pub struct EntityIndex {
    records:  Vec<Record>,
    free:     Vec<u32>,
    /// Number of fresh slots handed out by [`reserve`](Self::reserve) but not yet materialized.
    reserved: Cell<u32>,
    alive:    usize,
}

impl EntityIndex {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { records: Vec::with_capacity(capacity), ..Self::default() }
    }

    /// The id that the next call to [`insert`](Self::insert) should use.
    pub(crate) fn next_id(&self) -> EntityId {
        match self.free.last() {
            Some(&index) => {
                let record = &self.records[index.small_int::<usize>()];
                EntityId::new(index, record.generation + 1)
            }
            None => {
                let index: u32 = self.records.len().small_int();
                EntityId::new(index + self.reserved.get(), 0)
            }
        }
    }

    /// Commits an id obtained from [`next_id`](Self::next_id).
    pub(crate) fn insert(&mut self, id: EntityId, location: Location) {
        if self.free.last() == Some(&id.index()) {
            self.free.pop();
        } else if id.slot() >= self.records.len() {
            self.materialize(id);
        } else {
            // a reserved slot padded by an earlier insertion
            debug_assert!(
                self.records[id.slot()].location.is_none() && id.generation() == 0,
                "id was not obtained from next_id or reserve"
            );
        }

        let record = &mut self.records[id.slot()];
        record.generation = id.generation();
        record.location = Some(location);
        self.alive += 1;
    }

    /// Hands out a fresh slot without touching the free list.
    ///
    /// Reserved ids become alive when [`insert`](Self::insert)ed,
    /// which typically happens when the command buffer is applied.
    pub(crate) fn reserve(&self) -> EntityId {
        let offset = self.reserved.get();
        self.reserved.set(offset + 1);
        let len: u32 = self.records.len().small_int();
        EntityId::new(len + offset, 0)
    }

    /// Whether `id` was handed out by [`reserve`](Self::reserve) and not yet inserted.
    #[cfg(test)]
    pub(crate) fn is_reserved(&self, id: EntityId) -> bool {
        let len: u32 = self.records.len().small_int();
        id.generation() == 0 && id.index() >= len && id.index() < len + self.reserved.get()
    }

    /// Pads the record table so that the slot of `id` exists.
    fn materialize(&mut self, id: EntityId) {
        while self.records.len() <= id.slot() {
            self.records.push(Record { generation: 0, location: None });
            self.reserved.set(self.reserved.get().saturating_sub(1));
        }
    }

    /// Returns a reserved slot that could not be materialized to the free list.
    pub(crate) fn release_reserved(&mut self, id: EntityId) {
        self.materialize(id);
        self.free.push(id.index());
    }

    /// Whether `id` refers to a live entity.
    pub fn is_alive(&self, id: EntityId) -> bool { self.location(id).is_some() }

    /// The current location of `id`, or `None` if it is not alive.
    pub fn location(&self, id: EntityId) -> Option<Location> {
        let record = self.records.get(id.slot())?;
        if record.generation != id.generation() {
            return None;
        }
        record.location
    }

    /// Moves the record of a live entity to a new location.
    pub(crate) fn set_location(&mut self, id: EntityId, location: Location) {
        let record = self.records.get_mut(id.slot()).expect("entity index out of bounds");
        debug_assert_eq!(record.generation, id.generation(), "stale entity in storage");
        record.location = Some(location);
    }

    /// Marks `id` as dead and returns its last location.
    ///
    /// Returns `None` without side effects if `id` is already dead.
    pub(crate) fn remove(&mut self, id: EntityId) -> Option<Location> {
        let record = self.records.get_mut(id.slot())?;
        if record.generation != id.generation() {
            return None;
        }
        let location = record.location.take()?;
        self.alive -= 1;

        if record.generation == u32::MAX {
            log::debug!("Retiring entity slot {} after exhausting its generations", id.index());
        } else {
            self.free.push(id.index());
        }

        Some(location)
    }

    /// The number of live entities.
    pub fn len(&self) -> usize { self.alive }

    /// Whether there are no live entities.
    pub fn is_empty(&self) -> bool { self.alive == 0 }

    /// Iterates over all live entities in slot order.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.records.iter().enumerate().filter_map(|(index, record)| {
            record.location.map(|_| EntityId::new(index.small_int(), record.generation))
        })
    }
}
