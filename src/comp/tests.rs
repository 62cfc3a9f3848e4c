use std::mem;

use xias::Xias;

use super::*;
use crate::test_util::*;

#[test]
fn test_registry_ids_stable() {
    struct Local1;
    struct Local2;

    let first = id::<Local1>();
    let second = id::<Local2>();
    assert_ne!(first, second);
    assert_eq!(id::<Local1>(), first);
    assert_eq!(id::<Local2>(), second);
    assert!(registered_count() > first.to_u32().max(second.to_u32()).small_int::<usize>());
}

#[test]
fn test_info_describes_type() {
    let heavy = info_of::<Heavy>();
    assert_eq!(heavy.size(), mem::size_of::<Heavy>());
    assert_eq!(heavy.align(), mem::align_of::<Heavy>());
    assert_eq!(heavy.type_id(), TypeId::of::<Heavy>());
    assert!(heavy.name().ends_with("Heavy"));
    assert!(!heavy.is_tag());

    assert!(info_of::<Marker>().is_tag());
    assert_eq!(info(heavy.id()).id(), heavy.id());
}

#[test]
fn test_cloneable_registration() {
    #[derive(Clone)]
    struct Cloneable(i32);

    assert!(!info_of::<Cloneable>().is_cloneable());
    let cloneable = register_cloneable::<Cloneable>();
    assert!(info(cloneable).is_cloneable());
    assert_eq!(cloneable, id::<Cloneable>());
}

#[test]
fn test_erased_drop_and_relocate() {
    let log = OpLog::new();
    let traced = info_of::<Traced>();

    let src = mem::MaybeUninit::new(Traced::new(7, &log));
    let mut dst = mem::MaybeUninit::<Traced>::uninit();
    unsafe {
        traced.relocate(dst.as_mut_ptr().cast(), src.as_ptr().cast());
        assert_eq!((*dst.as_ptr()).value, 7);
        traced.drop_in_place(dst.as_mut_ptr().cast());
    }

    assert_eq!(log.take(), vec![Op::Construct(7), Op::Drop(7)]);
}

#[test]
fn test_components_tuple_ids() {
    let mut ids = Vec::new();
    <(Foo, Bar, Marker)>::ids(&mut ids);
    assert_eq!(ids, vec![id::<Foo>(), id::<Bar>(), id::<Marker>()]);
}

#[test]
fn test_signature_canonical() {
    let a = Signature::new([id::<Bar>(), id::<Foo>(), id::<Bar>()]);
    let b = Signature::new([id::<Foo>(), id::<Bar>()]);
    assert_eq!(a, b);
    assert_eq!(a.len(), 2);
    assert!(a.ids().windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_signature_set_operations() {
    let foo_bar = Signature::new([id::<Foo>(), id::<Bar>()]);
    let foo = Signature::new([id::<Foo>()]);
    let marker = Signature::new([id::<Marker>()]);

    assert!(foo_bar.is_superset_of(&foo));
    assert!(!foo.is_superset_of(&foo_bar));
    assert!(foo.is_superset_of(&Signature::empty()));
    assert!(foo_bar.is_disjoint(&marker));
    assert!(!foo_bar.is_disjoint(&foo));

    let edited = foo_bar.edited(&marker, &foo);
    assert_eq!(edited, Signature::new([id::<Bar>(), id::<Marker>()]));
    assert_eq!(edited.position(id::<Bar>()), edited.ids().iter().position(|&c| c == id::<Bar>()));
}

#[test]
fn test_bundle_take_order() {
    let log = OpLog::new();
    let bundle = (((), Foo(1)), Traced::new(2, &log));

    let mut ids = Vec::new();
    Bundle::collect_ids(&bundle, &mut ids);
    assert_eq!(ids, vec![id::<Foo>(), id::<Traced>()]);

    let mut seen = Vec::new();
    Bundle::take(bundle, &mut |component, ptr| {
        seen.push(component);
        // Safety: the sink owns the value.
        unsafe { info(component).drop_in_place(ptr) };
    });
    assert_eq!(seen, ids);
    assert_eq!(log.take(), vec![Op::Construct(2), Op::Drop(2)]);
}
