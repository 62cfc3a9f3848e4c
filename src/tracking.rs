//! Dirty marks for components written by tracking systems.
//!
//! A system declared with [`track::<T>()`](crate::system::SystemBuilder::track)
//! marks every entity it visits that holds `T`.
//! Marks accumulate until [`World::process_tracked_changes`](crate::World::process_tracked_changes)
//! turns them into [`OnChange<T>`](crate::event::OnChange) events.

use std::any::Any;
use std::collections::BTreeMap;
use std::mem;

use bitvec::prelude::BitVec;

use crate::comp::ComponentId;
use crate::entity::EntityId;
use crate::event::EventId;


struct Entry {
    event:   EventId,
    payload: &'static dyn Any,
    /// Indexed by entity slot.
    dirty:   BitVec,
    /// Marked entities in first-marked order.
    order:   Vec<EntityId>,
}

impl Entry {
    fn bit(&self, slot: usize) -> bool {
        match self.dirty.get(slot) {
            Some(bit) => *bit,
            None => false,
        }
    }
}

/// The dirty entities of one tracked component, taken out of the tracker.
pub(crate) struct Changes {
    pub(crate) component: ComponentId,
    pub(crate) event:     EventId,
    pub(crate) payload:   &'static dyn Any,
    pub(crate) entities:  Vec<EntityId>,
}

/// Per-component dirty sets.
#[derive(Default)]
pub(crate) struct Tracker {
    entries: BTreeMap<ComponentId, Entry>,
}

impl Tracker {
    /// Starts tracking `component`, reporting changes with the `event` carrying `payload`.
    pub(crate) fn watch(&mut self, component: ComponentId, event: EventId, payload: &'static dyn Any) {
        self.entries.entry(component).or_insert_with(|| Entry {
            event,
            payload,
            dirty: BitVec::new(),
            order: Vec::new(),
        });
    }

    #[cfg(test)]
    pub(crate) fn is_tracked(&self, component: ComponentId) -> bool {
        self.entries.contains_key(&component)
    }

    /// Marks `entity` dirty for `component`. Marking twice has no further effect.
    ///
    /// # Panics
    /// Panics if `component` is not watched.
    pub(crate) fn mark(&mut self, component: ComponentId, entity: EntityId) {
        let entry = self.entries.get_mut(&component).expect("marked component is not tracked");
        let slot = entity.slot();
        if entry.bit(slot) {
            return;
        }

        if entry.dirty.len() <= slot {
            entry.dirty.resize(slot + 1, false);
        }
        entry.dirty.set(slot, true);
        entry.order.push(entity);
    }

    /// Whether the slot of `entity` is marked dirty for `component`.
    ///
    /// The caller is responsible for checking that `entity` is alive.
    pub(crate) fn is_dirty(&self, component: ComponentId, entity: EntityId) -> bool {
        match self.entries.get(&component) {
            Some(entry) => entry.bit(entity.slot()),
            None => false,
        }
    }

    /// Clears the marks of a destroyed entity so that its slot can be reused clean.
    pub(crate) fn forget(&mut self, entity: EntityId) {
        let slot = entity.slot();
        for entry in self.entries.values_mut() {
            if entry.bit(slot) {
                entry.dirty.set(slot, false);
            }
        }
    }

    /// Takes all marks in component id order, leaving the tracker clean.
    ///
    /// Entities that were marked and later destroyed are still listed;
    /// the caller filters them out.
    pub(crate) fn take(&mut self) -> Vec<Changes> {
        self.entries
            .iter_mut()
            .filter(|(_, entry)| !entry.order.is_empty())
            .map(|(&component, entry)| {
                entry.dirty.clear();
                Changes {
                    component,
                    event: entry.event,
                    payload: entry.payload,
                    entities: mem::take(&mut entry.order),
                }
            })
            .collect()
    }
}
