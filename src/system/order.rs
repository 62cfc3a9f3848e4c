use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use xias::Xias;

use super::{System, SystemId};

/// Computes a topological order of the registered systems.
///
/// Among systems whose dependencies are all satisfied,
/// the one registered first is placed first.
///
/// # Panics
/// - if the constraints form a cycle
/// - if a system requires a token that no system produces
pub(super) fn compute(systems: &[Option<System>], names: &IndexMap<String, SystemId>) -> Vec<SystemId> {
    let live = || {
        systems
            .iter()
            .enumerate()
            .filter_map(|(index, system)| Some((SystemId(index.small_int()), system.as_ref()?)))
    };

    let mut dependents: HashMap<SystemId, Vec<SystemId>> = live().map(|(id, _)| (id, Vec::new())).collect();
    let mut add_edge = |before: SystemId, after: SystemId| {
        dependents.get_mut(&before).expect("edges only connect live systems").push(after);
    };

    for (id, system) in live() {
        for name in &system.constraints.after {
            match names.get(name) {
                Some(&other) => add_edge(other, id),
                None => log::error!(
                    "System `{}` is ordered after unknown system `{name}`, ignoring the constraint",
                    system.name
                ),
            }
        }
        for name in &system.constraints.before {
            match names.get(name) {
                Some(&other) => add_edge(id, other),
                None => log::error!(
                    "System `{}` is ordered before unknown system `{name}`, ignoring the constraint",
                    system.name
                ),
            }
        }

        for token in &system.constraints.requires {
            let mut producers = live()
                .filter(|(other, producer)| *other != id && producer.constraints.produces.contains(token))
                .peekable();
            assert!(
                producers.peek().is_some(),
                "System `{}` requires token `{token:?}` that is never produced by any system",
                system.name,
            );
            for (producer, _) in producers {
                add_edge(producer, id);
            }
        }
    }

    let describe = |id: SystemId| {
        systems[id.index()].as_ref().map_or_else(|| format!("{id:?}"), |system| system.name.clone())
    };
    scan_cycles(&dependents, describe);

    let mut in_degrees: HashMap<SystemId, usize> = dependents.keys().map(|&id| (id, 0)).collect();
    for &dependent in dependents.values().flatten() {
        *in_degrees.get_mut(&dependent).expect("edges only connect live systems") += 1;
    }

    let mut ready: BinaryHeap<Reverse<SystemId>> =
        in_degrees.iter().filter(|&(_, &degree)| degree == 0).map(|(&id, _)| Reverse(id)).collect();
    let mut order = Vec::with_capacity(dependents.len());

    while let Some(Reverse(id)) = ready.pop() {
        order.push(id);
        for &dependent in &dependents[&id] {
            let degree = in_degrees.get_mut(&dependent).expect("edges only connect live systems");
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }
    debug_assert_eq!(order.len(), dependents.len(), "cycles were scanned before sorting");

    log::debug!("System order: {}", order.iter().map(|&id| describe(id)).join(" -> "));
    order
}

fn scan_cycles(map: &HashMap<SystemId, Vec<SystemId>>, describe: impl Fn(SystemId) -> String) {
    let mut remaining: BTreeSet<SystemId> = map.keys().copied().collect();
    let mut exited = HashSet::new();
    let mut stack = Vec::new();

    while let Some(&node) = remaining.iter().next() {
        scan_cycles_from(map, node, &mut remaining, &mut exited, &mut stack, &describe);
    }
}

fn scan_cycles_from(
    map: &HashMap<SystemId, Vec<SystemId>>,
    node: SystemId,
    remaining: &mut BTreeSet<SystemId>,
    exited: &mut HashSet<SystemId>,
    stack: &mut Vec<SystemId>,
    describe: &impl Fn(SystemId) -> String,
) {
    if exited.contains(&node) {
        return;
    }

    if !remaining.remove(&node) {
        use fmt::Write;

        let mut path = String::new();
        for &ancestor in stack.iter().skip_while(|&&ancestor| ancestor != node) {
            write!(path, "{} -> ", describe(ancestor)).expect("String write is infallible");
        }
        write!(path, "{}", describe(node)).expect("String write is infallible");

        panic!("Systems have a cyclic dependency: {path}");
    }

    stack.push(node);
    for &dependent in &map[&node] {
        scan_cycles_from(map, dependent, remaining, exited, stack, describe);
    }
    let popped = stack.pop();
    debug_assert_eq!(Some(node), popped);

    exited.insert(node);
}
