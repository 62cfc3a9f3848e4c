use std::fmt;

use itertools::Itertools;

use super::ComponentId;

/// A canonical set of component types.
///
/// Ids are kept sorted and deduplicated,
/// so two signatures are equal if and only if they contain the same component types,
/// regardless of the order they were specified in.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature(Box<[ComponentId]>);

impl Signature {
    /// The signature without any components.
    pub fn empty() -> Self { Self::default() }

    /// Creates a signature from component ids in any order.
    /// Duplicate ids are merged.
    pub fn new(ids: impl IntoIterator<Item = ComponentId>) -> Self {
        Self(ids.into_iter().sorted().dedup().collect())
    }

    /// The sorted component ids in this signature.
    pub fn ids(&self) -> &[ComponentId] { &self.0 }

    /// The number of component types in this signature.
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether this is the empty signature.
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Whether the signature contains `id`.
    pub fn contains(&self, id: ComponentId) -> bool { self.0.binary_search(&id).is_ok() }

    /// The position of `id` in the sorted id list.
    pub fn position(&self, id: ComponentId) -> Option<usize> { self.0.binary_search(&id).ok() }

    /// Whether every component in `other` is also in `self`.
    pub fn is_superset_of(&self, other: &Signature) -> bool {
        let mut mine = self.0.iter().peekable();
        'outer: for &id in other.0.iter() {
            while let Some(&&candidate) = mine.peek() {
                mine.next();
                match candidate.cmp(&id) {
                    std::cmp::Ordering::Less => continue,
                    std::cmp::Ordering::Equal => continue 'outer,
                    std::cmp::Ordering::Greater => return false,
                }
            }
            return false;
        }
        true
    }

    /// Whether `self` and `other` share no component.
    pub fn is_disjoint(&self, other: &Signature) -> bool {
        self.0.iter().merge_join_by(other.0.iter(), |a, b| a.cmp(b)).all(|item| !item.is_both())
    }

    /// Returns the signature with `add` inserted and `remove` taken out.
    pub fn edited(&self, add: &Signature, remove: &Signature) -> Signature {
        Self(
            self.0
                .iter()
                .merge(add.0.iter())
                .dedup()
                .filter(|id| !remove.contains(**id))
                .copied()
                .collect(),
        )
    }

    /// Iterates over the component ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentId> + '_ { self.0.iter().copied() }
}

impl FromIterator<ComponentId> for Signature {
    fn from_iter<I: IntoIterator<Item = ComponentId>>(iter: I) -> Self { Self::new(iter) }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter().map(|&id| super::info(id).name())).finish()
    }
}
