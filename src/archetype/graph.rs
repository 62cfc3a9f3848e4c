use std::collections::HashMap;

use super::ArchetypeId;
use crate::comp::Signature;

/// The component types added and removed by one structural edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EditSet {
    add:    Signature,
    remove: Signature,
}

impl EditSet {
    /// Creates an edit set.
    ///
    /// # Panics
    /// Panics if a component type is both added and removed.
    pub fn new(add: Signature, remove: Signature) -> Self {
        assert!(
            add.is_disjoint(&remove),
            "Cannot add and remove the same components in one edit: {:?}",
            add.iter().filter(|&id| remove.contains(id)).collect::<Vec<_>>(),
        );
        Self { add, remove }
    }

    /// The component types added by the edit.
    pub fn add(&self) -> &Signature { &self.add }

    /// The component types removed by the edit.
    pub fn remove(&self) -> &Signature { &self.remove }

    /// Whether the edit changes nothing.
    pub fn is_empty(&self) -> bool { self.add.is_empty() && self.remove.is_empty() }
}

/// Caches archetype lookups by signature and by transition.
#[derive(Default)]
pub(super) struct Graph {
    by_signature: HashMap<Signature, ArchetypeId>,
    edges:        HashMap<ArchetypeId, HashMap<EditSet, ArchetypeId>>,
}

impl Graph {
    pub(super) fn find(&self, signature: &Signature) -> Option<ArchetypeId> {
        self.by_signature.get(signature).copied()
    }

    pub(super) fn insert_archetype(&mut self, signature: Signature, id: ArchetypeId) {
        let old = self.by_signature.insert(signature, id);
        debug_assert!(old.is_none(), "archetype signature registered twice");
    }

    pub(super) fn edge(&self, source: ArchetypeId, edit: &EditSet) -> Option<ArchetypeId> {
        self.edges.get(&source)?.get(edit).copied()
    }

    pub(super) fn insert_edge(&mut self, source: ArchetypeId, edit: EditSet, target: ArchetypeId) {
        self.edges.entry(source).or_default().insert(edit, target);
    }

    pub(super) fn edge_count(&self) -> usize { self.edges.values().map(HashMap::len).sum() }
}
