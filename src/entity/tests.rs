use super::*;
use crate::archetype::ArchetypeId;

fn location(slot: u32) -> Location { Location { archetype: ArchetypeId::EMPTY, chunk: 0, slot } }

fn insert(index: &mut EntityIndex, slot: u32) -> EntityId {
    let id = index.next_id();
    index.insert(id, location(slot));
    id
}

#[test]
fn test_id_packing() {
    let id = EntityId::new(5, 3);
    assert_eq!(id.index(), 5);
    assert_eq!(id.generation(), 3);
    assert_eq!(id.to_bits(), (3 << 32) | 5);
    assert_eq!(EntityId::from_bits(id.to_bits()), id);
    assert_eq!(format!("{id:?}"), "EntityId(5v3)");
    assert_eq!(format!("{:?}", EntityId::NULL), "EntityId(null)");
}

#[test]
fn test_reuse_lifo() {
    let mut index = EntityIndex::default();
    let a = insert(&mut index, 0);
    let b = insert(&mut index, 1);
    let c = insert(&mut index, 2);
    assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));

    index.remove(a);
    index.remove(c);

    let d = insert(&mut index, 3);
    assert_eq!(d.index(), 2);
    assert_eq!(d.generation(), 1);
    let e = insert(&mut index, 4);
    assert_eq!(e.index(), 0);
    assert_eq!(e.generation(), 1);
    let f = insert(&mut index, 5);
    assert_eq!(f.index(), 3);
    assert_eq!(f.generation(), 0);

    assert!(!index.is_alive(a));
    assert!(!index.is_alive(c));
    assert!(index.is_alive(d));
    assert_eq!(index.len(), 4);
}

#[test]
fn test_remove_dead_is_noop() {
    let mut index = EntityIndex::default();
    let a = insert(&mut index, 0);
    assert_eq!(index.remove(a), Some(location(0)));
    assert_eq!(index.remove(a), None);
    assert!(index.is_empty());
    assert!(!index.is_alive(EntityId::NULL));
}

#[test]
fn test_exhausted_generation_retired() {
    let mut index = EntityIndex::default();
    let id = EntityId::new(0, u32::MAX);
    index.insert(id, location(0));
    assert!(index.is_alive(id));

    index.remove(id);
    let next = index.next_id();
    assert_eq!(next.index(), 1, "slot 0 must be retired");
    assert_eq!(next.generation(), 0);
}

#[test]
fn test_reserve_skips_free_list() {
    let mut index = EntityIndex::default();
    let a = insert(&mut index, 0);
    index.remove(a);

    let reserved = index.reserve();
    assert_eq!(reserved.index(), 1);
    assert!(index.is_reserved(reserved));
    assert!(!index.is_alive(reserved));

    let reused = insert(&mut index, 1);
    assert_eq!(reused.index(), 0);

    let fresh = index.next_id();
    assert_eq!(fresh.index(), 2, "next_id must not hand out reserved slots");

    index.insert(reserved, location(2));
    assert!(index.is_alive(reserved));
    assert!(!index.is_reserved(reserved));
    assert_eq!(index.next_id().index(), 2);
}

#[test]
fn test_reserved_out_of_order() {
    let mut index = EntityIndex::default();
    let first = index.reserve();
    let second = index.reserve();

    index.insert(second, location(0));
    index.insert(first, location(1));
    assert_eq!(index.iter().collect::<Vec<_>>(), vec![first, second]);
    assert_eq!(index.next_id().index(), 2);
}

#[test]
fn test_release_reserved() {
    let mut index = EntityIndex::default();
    let reserved = index.reserve();
    index.release_reserved(reserved);
    assert!(!index.is_alive(reserved));

    let next = index.next_id();
    assert_eq!(next.index(), reserved.index());
    assert_eq!(next.generation(), 1);
}

static_assertions::assert_impl_all!(EntityId: Ord, std::hash::Hash);
