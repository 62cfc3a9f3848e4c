//! Process-wide tables assigning dense numeric ids to Rust types.
//!
//! Ids are handed out in first-use order and never recycled,
//! so an id obtained from one [`World`](crate::World) is valid in every other world.

use std::any::TypeId;
use std::collections::BTreeMap;

use parking_lot::RwLock;
use xias::Xias;

struct Table<I> {
    ids:   BTreeMap<TypeId, u32>,
    infos: Vec<I>,
}

/// An append-only table of type descriptors of kind `I`.
pub(crate) struct Registry<I> {
    table: RwLock<Table<I>>,
}

impl<I: Copy> Registry<I> {
    pub(crate) const fn new() -> Self {
        Self { table: parking_lot::const_rwlock(Table { ids: BTreeMap::new(), infos: Vec::new() }) }
    }

    /// Returns the descriptor of `type_id`, creating it with `init` on first use.
    pub(crate) fn get_or_insert(&self, type_id: TypeId, init: impl FnOnce(u32) -> I) -> I {
        {
            let table = self.table.read();
            if let Some(&index) = table.ids.get(&type_id) {
                return table.infos[index.small_int::<usize>()];
            }
        }

        let mut table = self.table.write();
        // another thread may have inserted it between the two locks
        if let Some(&index) = table.ids.get(&type_id) {
            return table.infos[index.small_int::<usize>()];
        }

        let index: u32 = table.infos.len().small_int();
        let info = init(index);
        table.infos.push(info);
        table.ids.insert(type_id, index);
        info
    }

    /// Looks up a descriptor by the index assigned to it.
    ///
    /// # Panics
    /// Panics if `index` was not assigned by this registry.
    pub(crate) fn get(&self, index: u32) -> I {
        let table = self.table.read();
        *table.infos.get(index.small_int::<usize>()).expect("index was not assigned by this registry")
    }

    /// Modifies the descriptor of an already registered type.
    pub(crate) fn update(&self, index: u32, f: impl FnOnce(&mut I)) {
        let mut table = self.table.write();
        f(table.infos.get_mut(index.small_int::<usize>()).expect("index was not assigned by this registry"));
    }

    pub(crate) fn len(&self) -> usize { self.table.read().infos.len() }
}
