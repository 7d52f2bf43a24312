//! Leafsets: sets of present-day chromosomes ("leaves") carried by an
//! ancestral segment.
//!
//! Two representations are supported behind one type, selected once per
//! simulation by a runtime `LeafsetMode` flag (spec.md §9's open question
//! on tree-vs-counts-only is resolved here as a runtime choice rather than
//! a compile-time one, so a single binary can do either):
//!
//! - `Tree`: a persistent, reference-counted DAG. Singleton leaves are
//!   unique per leaf id; a union node holds `Rc` pointers to its two
//!   children plus a precomputed per-population count vector, mirroring
//!   `cosi/leafset-counts.h`'s `leafset_struct`. Unions are O(1); recovering
//!   leaf identity (for mutation output, or for the algebraic tests in
//!   spec.md §8) walks the tree once and caches the result, exactly as
//!   `leafset_struct::computeLeaves` does in the original.
//! - `CountOnly`: drops leaf identity entirely and keeps only a
//!   cardinality and per-population counts, for runs where nothing reads
//!   back which individual leaves survived (faster, less memory).

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

pub type LeafId = u32;
pub type PopIdx = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafsetMode {
    Tree,
    CountOnly,
}

#[derive(Debug)]
enum TreeNode {
    Singleton(LeafId),
    Union(Leafset, Leafset),
}

#[derive(Debug)]
struct TreeInner {
    node: TreeNode,
    pop_counts: Vec<u32>,
    cardinality: u32,
    // Lazily computed, like `leafset_struct::leaves` in the original.
    leaves_cache: RefCell<Option<Rc<Vec<LeafId>>>>,
}

#[derive(Debug)]
struct CountOnlyInner {
    pop_counts: Vec<u32>,
    cardinality: u32,
}

/// A set of present-day chromosomes. Cheaply cloneable (reference
/// counted); `Empty` is the distinguished sentinel for the empty set.
#[derive(Debug, Clone)]
pub enum Leafset {
    Empty,
    Tree(Rc<TreeInner>),
    CountOnly(Rc<CountOnlyInner>),
}

impl Leafset {
    pub fn empty() -> Leafset {
        Leafset::Empty
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Leafset::Empty)
    }

    pub fn singleton(mode: LeafsetMode, leaf: LeafId, pop: PopIdx, num_pops: usize) -> Leafset {
        let mut counts = vec![0u32; num_pops];
        counts[pop] = 1;
        match mode {
            LeafsetMode::Tree => Leafset::Tree(Rc::new(TreeInner {
                node: TreeNode::Singleton(leaf),
                pop_counts: counts,
                cardinality: 1,
                leaves_cache: RefCell::new(None),
            })),
            LeafsetMode::CountOnly => Leafset::CountOnly(Rc::new(CountOnlyInner {
                pop_counts: counts,
                cardinality: 1,
            })),
        }
    }

    pub fn cardinality(&self) -> u32 {
        match self {
            Leafset::Empty => 0,
            Leafset::Tree(t) => t.cardinality,
            Leafset::CountOnly(c) => c.cardinality,
        }
    }

    pub fn pop_counts(&self) -> Vec<u32> {
        match self {
            Leafset::Empty => Vec::new(),
            Leafset::Tree(t) => t.pop_counts.clone(),
            Leafset::CountOnly(c) => c.pop_counts.clone(),
        }
    }

    pub fn pop_count(&self, pop: PopIdx) -> u32 {
        match self {
            Leafset::Empty => 0,
            Leafset::Tree(t) => t.pop_counts.get(pop).copied().unwrap_or(0),
            Leafset::CountOnly(c) => c.pop_counts.get(pop).copied().unwrap_or(0),
        }
    }

    pub fn is_full(&self, total_leaves: u32) -> bool {
        self.cardinality() == total_leaves
    }

    /// Structural union: `O(1)` for the tree form (a new union node
    /// pointing at both children), and a vector add for count-only.
    /// Mirrors `leafset_union` in `cosi/leafset-counts.h`.
    pub fn union(a: &Leafset, b: &Leafset) -> Leafset {
        match (a, b) {
            (Leafset::Empty, _) => b.clone(),
            (_, Leafset::Empty) => a.clone(),
            (Leafset::Tree(ta), Leafset::Tree(tb)) => {
                let mut counts = ta.pop_counts.clone();
                for (i, c) in tb.pop_counts.iter().enumerate() {
                    counts[i] += c;
                }
                let cardinality = ta.cardinality + tb.cardinality;
                Leafset::Tree(Rc::new(TreeInner {
                    node: TreeNode::Union(a.clone(), b.clone()),
                    pop_counts: counts,
                    cardinality,
                    leaves_cache: RefCell::new(None),
                }))
            }
            (Leafset::CountOnly(ca), Leafset::CountOnly(cb)) => {
                let mut counts = ca.pop_counts.clone();
                for (i, c) in cb.pop_counts.iter().enumerate() {
                    counts[i] += c;
                }
                Leafset::CountOnly(Rc::new(CountOnlyInner {
                    pop_counts: counts,
                    cardinality: ca.cardinality + cb.cardinality,
                }))
            }
            _ => panic!("leafset union: mismatched representations (Tree vs CountOnly)"),
        }
    }

    /// Conservative "might these differ" test: pointer identity plus a
    /// per-population count comparison, matching §4.1's equality rule.
    /// Two distinct leafsets that happen to contain the same leaves are
    /// *not* required to compare equal under this check -- it exists for
    /// fast-path short-circuiting, not for algebraic verification (use
    /// `leaves()` and compare sets for that).
    pub fn quick_eq(a: &Leafset, b: &Leafset) -> bool {
        match (a, b) {
            (Leafset::Empty, Leafset::Empty) => true,
            (Leafset::Tree(ta), Leafset::Tree(tb)) => {
                Rc::ptr_eq(ta, tb) || ta.pop_counts == tb.pop_counts
            }
            (Leafset::CountOnly(ca), Leafset::CountOnly(cb)) => {
                Rc::ptr_eq(ca, cb) || ca.pop_counts == cb.pop_counts
            }
            _ => false,
        }
    }

    /// Materializes the set of leaf ids this leafset contains. Only
    /// meaningful for the `Tree` representation; `CountOnly` has
    /// discarded leaf identity and returns `None`.
    pub fn leaves(&self) -> Option<Rc<Vec<LeafId>>> {
        match self {
            Leafset::Empty => Some(Rc::new(Vec::new())),
            Leafset::CountOnly(_) => None,
            Leafset::Tree(t) => {
                if let Some(cached) = t.leaves_cache.borrow().as_ref() {
                    return Some(cached.clone());
                }
                let mut set = BTreeSet::new();
                collect_leaves(self, &mut set);
                let v = Rc::new(set.into_iter().collect::<Vec<_>>());
                *t.leaves_cache.borrow_mut() = Some(v.clone());
                Some(v)
            }
        }
    }

    /// True set intersection, computed by materializing leaves (tree form
    /// only). `leaf_pop` maps a leaf id back to its population, needed to
    /// rebuild per-population counts on the result; callers typically pass
    /// the sample's fixed `LeafId -> PopIdx` table. Used by tests verifying
    /// the leafset algebra of spec.md §8.
    pub fn intersection(
        mode: LeafsetMode,
        a: &Leafset,
        b: &Leafset,
        num_pops: usize,
        leaf_pop: impl Fn(LeafId) -> PopIdx,
    ) -> Leafset {
        let (la, lb) = match (a.leaves(), b.leaves()) {
            (Some(la), Some(lb)) => (la, lb),
            _ => panic!("intersection requires the Tree leafset representation"),
        };
        let set_b: BTreeSet<LeafId> = lb.iter().copied().collect();
        build_from_leaves(mode, la.iter().copied().filter(|l| set_b.contains(l)), num_pops, leaf_pop)
    }

    pub fn difference(
        mode: LeafsetMode,
        a: &Leafset,
        b: &Leafset,
        num_pops: usize,
        leaf_pop: impl Fn(LeafId) -> PopIdx,
    ) -> Leafset {
        let (la, lb) = match (a.leaves(), b.leaves()) {
            (Some(la), Some(lb)) => (la, lb),
            _ => panic!("difference requires the Tree leafset representation"),
        };
        let set_b: BTreeSet<LeafId> = lb.iter().copied().collect();
        build_from_leaves(mode, la.iter().copied().filter(|l| !set_b.contains(l)), num_pops, leaf_pop)
    }
}

fn collect_leaves(ls: &Leafset, out: &mut BTreeSet<LeafId>) {
    if let Leafset::Tree(t) = ls {
        match &t.node {
            TreeNode::Singleton(l) => {
                out.insert(*l);
            }
            TreeNode::Union(a, b) => {
                collect_leaves(a, out);
                collect_leaves(b, out);
            }
        }
    }
}

fn build_from_leaves(
    mode: LeafsetMode,
    leaves: impl Iterator<Item = LeafId>,
    num_pops: usize,
    leaf_pop: impl Fn(LeafId) -> PopIdx,
) -> Leafset {
    let mut acc = Leafset::empty();
    for leaf in leaves {
        let pop = leaf_pop(leaf);
        acc = Leafset::union(&acc, &Leafset::singleton(mode, leaf, pop, num_pops));
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(i: LeafId) -> Leafset {
        Leafset::singleton(LeafsetMode::Tree, i, 0, 1)
    }

    #[test]
    fn union_cardinality_is_additive() {
        let a = s(0);
        let b = s(1);
        let u = Leafset::union(&a, &b);
        assert_eq!(u.cardinality(), 2);
    }

    #[test]
    fn union_of_empty_is_identity() {
        let a = s(0);
        assert_eq!(Leafset::union(&a, &Leafset::empty()).cardinality(), 1);
        assert_eq!(Leafset::union(&Leafset::empty(), &a).cardinality(), 1);
    }

    #[test]
    fn leaves_materializes_all_members() {
        let u = Leafset::union(&s(0), &Leafset::union(&s(1), &s(2)));
        let leaves = u.leaves().unwrap();
        assert_eq!(&**leaves, &vec![0, 1, 2]);
    }

    #[test]
    fn inclusion_exclusion_holds() {
        let a = Leafset::union(&s(0), &s(1));
        let b = Leafset::union(&s(1), &s(2));
        let union = Leafset::union(&a, &b);
        let union_card = union.leaves().unwrap().len();
        let inter = Leafset::intersection(LeafsetMode::Tree, &a, &b, 1, |_| 0);
        let inter_card = inter.leaves().unwrap().len();
        assert_eq!(union_card, a.leaves().unwrap().len() + b.leaves().unwrap().len() - inter_card);
    }

    #[test]
    fn per_population_counts_sum_on_union() {
        let a = Leafset::singleton(LeafsetMode::Tree, 0, 0, 2);
        let b = Leafset::singleton(LeafsetMode::Tree, 1, 1, 2);
        let u = Leafset::union(&a, &b);
        assert_eq!(u.pop_counts(), vec![1, 1]);
    }

    #[test]
    fn count_only_tracks_cardinality_without_identity() {
        let a = Leafset::singleton(LeafsetMode::CountOnly, 0, 0, 1);
        let b = Leafset::singleton(LeafsetMode::CountOnly, 1, 0, 1);
        let u = Leafset::union(&a, &b);
        assert_eq!(u.cardinality(), 2);
        assert!(u.leaves().is_none());
    }
}
