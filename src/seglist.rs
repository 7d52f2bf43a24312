//! Segment lists ("seglists"): the sorted, non-overlapping interval lists
//! each live ancestor carries, annotated per segment with a leafset.
//!
//! Grounded in `cosi/segsumm.h` (the coarse bitmask summary) and the
//! general seglist contract of spec.md §4.1. The actual segment storage
//! here is a plain sorted `Vec<Segment>` rather than cosi's reference-
//! counted `LSeglist` tree of lazy unions (spec.md §9 calls either
//! acceptable); this is the arena-with-handles-free option, simplest to
//! keep correct in safe Rust.

use crate::leafset::{Leafset, LeafsetMode};
use crate::units::{PhysLen, PhysPos};

/// Number of equal sub-intervals used by the coarse disjointness summary.
/// `cosi/segsumm.h` fixes this at 64 so the bitmask fits one machine word.
pub const NUM_SEGLETS: u32 = 64;

/// A coarse, conservative summary of which seglets (of `NUM_SEGLETS` equal
/// subdivisions of `[0,1)`) a seglist enters. A zero bit means the seglist
/// definitely does not reach that seglet; a one bit says nothing. Bitwise
/// AND between two summaries gives an O(1) early-out disjointness test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegSumm(pub u64);

impl SegSumm {
    pub fn empty() -> SegSumm {
        SegSumm(0)
    }

    fn seglet_of(ploc: f64) -> u32 {
        ((ploc * NUM_SEGLETS as f64) as u32).min(NUM_SEGLETS - 1)
    }

    fn mask_for_range(beg: f64, end: f64) -> u64 {
        let first = Self::seglet_of(beg);
        // `end` is exclusive; a segment ending exactly on a seglet boundary
        // does not reach into that seglet.
        let last = if end >= 1.0 {
            NUM_SEGLETS - 1
        } else {
            let l = Self::seglet_of(end);
            if (end * NUM_SEGLETS as f64).fract() == 0.0 && l > first {
                l - 1
            } else {
                l
            }
        };
        let mut mask = 0u64;
        for i in first..=last {
            mask |= 1u64 << i;
        }
        mask
    }

    pub fn add_range(&mut self, beg: f64, end: f64) {
        if end > beg {
            self.0 |= Self::mask_for_range(beg, end);
        }
    }

    /// Conservative test: `false` guarantees the underlying seglists are
    /// disjoint; `true` means they might overlap.
    pub fn may_intersect(a: SegSumm, b: SegSumm) -> bool {
        (a.0 & b.0) != 0
    }
}

/// A half-open physical interval `[beg, end)` annotated with the leafset
/// that inherits it.
#[derive(Debug, Clone)]
pub struct Segment {
    pub beg: PhysPos,
    pub end: PhysPos,
    pub leafset: Leafset,
}

impl Segment {
    pub fn len(&self) -> PhysLen {
        PhysLen(self.end.get() - self.beg.get())
    }
}

/// A sorted, pairwise non-overlapping sequence of segments, plus a cached
/// coarse summary for fast disjointness checks.
#[derive(Debug, Clone, Default)]
pub struct Seglist {
    segments: Vec<Segment>,
    summary: SegSumm,
}

impl Seglist {
    pub fn empty() -> Seglist {
        Seglist {
            segments: Vec::new(),
            summary: SegSumm::empty(),
        }
    }

    /// The seglist for a freshly sampled leaf: one segment spanning the
    /// whole region.
    pub fn whole_region(mode: LeafsetMode, leaf: crate::leafset::LeafId, pop: crate::leafset::PopIdx, num_pops: usize) -> Seglist {
        let leafset = Leafset::singleton(mode, leaf, pop, num_pops);
        let mut s = Seglist::empty();
        s.push_raw(Segment {
            beg: PhysPos(0.0),
            end: PhysPos(1.0),
            leafset,
        });
        s
    }

    fn push_raw(&mut self, seg: Segment) {
        self.summary.add_range(seg.beg.get(), seg.end.get());
        self.segments.push(seg);
    }

    /// Appends a segment assumed to sort after every segment already
    /// present (callers iterate their source intervals in increasing
    /// order). Used to assemble a seglist from intervals computed
    /// elsewhere, e.g. the fully-coalesced sub-intervals `Seglist::union`
    /// reports back to the coalescence executor.
    pub fn add_segment(&mut self, beg: PhysPos, end: PhysPos, leafset: Leafset) {
        self.push_raw(Segment { beg, end, leafset });
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn summary(&self) -> SegSumm {
        self.summary
    }

    /// Whether any segment in this seglist covers the physical point `pos`.
    /// Used by the selective-sweep driver to find which live chromosomes
    /// carry material at the selected site (spec.md §4.7).
    pub fn covers(&self, pos: PhysPos) -> bool {
        let x = pos.get();
        self.segments.iter().any(|s| s.beg.get() <= x && x < s.end.get())
    }

    pub fn total_length(&self) -> PhysLen {
        PhysLen(self.segments.iter().map(|s| s.len().get()).sum())
    }

    fn recompute_summary(&mut self) {
        let mut summ = SegSumm::empty();
        for s in &self.segments {
            summ.add_range(s.beg.get(), s.end.get());
        }
        self.summary = summ;
    }

    /// Splits into `(left, right)` at `loc`: segments entirely left of
    /// `loc` go to `left`, entirely right go to `right`, and a segment
    /// straddling `loc` is cut into two pieces carrying the same leafset
    /// (physical sub-intervals of a segment inherit the whole segment's
    /// leafset unchanged). `O(#segments crossing loc)` work beyond the
    /// initial linear scan, matching spec.md §4.1.
    pub fn split(&self, loc: PhysPos) -> (Seglist, Seglist) {
        let x = loc.get();
        let mut left = Seglist::empty();
        let mut right = Seglist::empty();
        for seg in &self.segments {
            if seg.end.get() <= x {
                left.push_raw(seg.clone());
            } else if seg.beg.get() >= x {
                right.push_raw(seg.clone());
            } else {
                left.push_raw(Segment {
                    beg: seg.beg,
                    end: loc,
                    leafset: seg.leafset.clone(),
                });
                right.push_raw(Segment {
                    beg: loc,
                    end: seg.end,
                    leafset: seg.leafset.clone(),
                });
            }
        }
        (left, right)
    }

    /// Restricts to the portion of the seglist inside `[lo, hi)`.
    pub fn restrict_to(&self, lo: PhysPos, hi: PhysPos) -> Seglist {
        let mut out = Seglist::empty();
        for seg in &self.segments {
            let b = seg.beg.get().max(lo.get());
            let e = seg.end.get().min(hi.get());
            if e > b {
                out.push_raw(Segment {
                    beg: PhysPos(b),
                    end: PhysPos(e),
                    leafset: seg.leafset.clone(),
                });
            }
        }
        out
    }

    /// Structural union of two seglists: wherever only one seglist covers
    /// a point, the result carries that seglist's leafset unchanged;
    /// wherever both cover it, leafsets are unioned. Returns the merged
    /// seglist and the list of sub-intervals where the union's leafset
    /// became the full leaf set (material that has now fully coalesced
    /// and should be retired, per spec.md §4.1/§4.5).
    pub fn union(a: &Seglist, b: &Seglist, total_leaves: u32) -> (Seglist, Vec<(PhysPos, PhysPos)>) {
        if !SegSumm::may_intersect(a.summary, b.summary) {
            // Definitely disjoint: simple merge-by-beg, no leafset work.
            let mut merged = Seglist::empty();
            let mut segs: Vec<Segment> = a
                .segments
                .iter()
                .chain(b.segments.iter())
                .cloned()
                .collect();
            segs.sort_by(|x, y| x.beg.get().partial_cmp(&y.beg.get()).unwrap());
            for s in segs {
                merged.push_raw(s);
            }
            return (merged, Vec::new());
        }

        let mut breakpoints: Vec<f64> = Vec::new();
        for s in a.segments.iter().chain(b.segments.iter()) {
            breakpoints.push(s.beg.get());
            breakpoints.push(s.end.get());
        }
        breakpoints.sort_by(|x, y| x.partial_cmp(y).unwrap());
        breakpoints.dedup_by(|x, y| (*x - *y).abs() < 1e-15);

        let mut merged = Seglist::empty();
        let mut full_intervals = Vec::new();
        let mut full_run_start: Option<f64> = None;

        for w in breakpoints.windows(2) {
            let (lo, hi) = (w[0], w[1]);
            if hi <= lo {
                continue;
            }
            let mid = 0.5 * (lo + hi);
            let in_a = a.segments.iter().find(|s| s.beg.get() <= mid && mid < s.end.get());
            let in_b = b.segments.iter().find(|s| s.beg.get() <= mid && mid < s.end.get());
            let leafset = match (in_a, in_b) {
                (Some(sa), Some(sb)) => Leafset::union(&sa.leafset, &sb.leafset),
                (Some(sa), None) => sa.leafset.clone(),
                (None, Some(sb)) => sb.leafset.clone(),
                (None, None) => {
                    full_run_start = close_full_run(full_run_start, lo, &mut full_intervals);
                    continue;
                }
            };
            let is_full = leafset.is_full(total_leaves);
            if is_full {
                if full_run_start.is_none() {
                    full_run_start = Some(lo);
                }
            } else {
                full_run_start = close_full_run(full_run_start, lo, &mut full_intervals);
                merged.push_raw(Segment {
                    beg: PhysPos(lo),
                    end: PhysPos(hi),
                    leafset,
                });
            }
        }
        let _ = close_full_run(full_run_start, breakpoints.last().copied().unwrap_or(0.0), &mut full_intervals);

        merged.recompute_summary();
        (merged, full_intervals)
    }

    /// Removes the given physical sub-intervals (assumed disjoint) from the
    /// seglist, leaving the leafsets of the remaining material unchanged.
    /// Used by coalescence to drop the fully-coalesced portion of a merged
    /// seglist (spec.md §4.5) before handing the rest to the parent node.
    pub fn subtract_intervals(&self, cuts: &[(PhysPos, PhysPos)]) -> Seglist {
        let mut result = self.clone();
        for &(lo, hi) in cuts {
            let (left, rest) = result.split(lo);
            let (_mid, right) = rest.split(hi);
            let mut combined = Seglist::empty();
            for s in left.segments() {
                combined.push_raw(s.clone());
            }
            for s in right.segments() {
                combined.push_raw(s.clone());
            }
            result = combined;
        }
        result
    }

    /// A forward cursor used to walk the seglist while accumulating
    /// physical length, as required by mutation placement (spec.md §4.1,
    /// §4.6). `advance_by_length` consumes `len_left` of physical length
    /// from the current position; if it runs out before reaching the end
    /// of the seglist it returns the landing `(loc, leafset)` and resets
    /// `len_left` to zero, otherwise it returns `None` with `len_left`
    /// holding however much length was left unconsumed (so the caller can
    /// carry it over to the next edge).
    pub fn advance_by_length(&self, finger: &mut Finger, len_left: &mut f64) -> Option<(PhysPos, Leafset)> {
        loop {
            if finger.seg_idx >= self.segments.len() {
                return None;
            }
            let seg = &self.segments[finger.seg_idx];
            let seg_total = seg.end.get() - seg.beg.get();
            let remaining_in_seg = seg_total - finger.offset_into_seg;
            if *len_left < remaining_in_seg {
                let loc = seg.beg.get() + finger.offset_into_seg + *len_left;
                finger.offset_into_seg += *len_left;
                *len_left = 0.0;
                return Some((PhysPos(loc), seg.leafset.clone()));
            } else {
                *len_left -= remaining_in_seg;
                finger.seg_idx += 1;
                finger.offset_into_seg = 0.0;
            }
        }
    }
}

fn close_full_run(start: Option<f64>, end: f64, out: &mut Vec<(PhysPos, PhysPos)>) -> Option<f64> {
    if let Some(s) = start {
        if end > s {
            out.push((PhysPos(s), PhysPos(end)));
        }
    }
    None
}

/// Linear-traversal cursor over a seglist's segments, used by
/// `Seglist::advance_by_length`.
#[derive(Debug, Clone, Default)]
pub struct Finger {
    seg_idx: usize,
    offset_into_seg: f64,
}

impl Finger {
    pub fn new() -> Finger {
        Finger {
            seg_idx: 0,
            offset_into_seg: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leafset::LeafsetMode;

    fn seg(beg: f64, end: f64, leaf: u32) -> Segment {
        Segment {
            beg: PhysPos(beg),
            end: PhysPos(end),
            leafset: Leafset::singleton(LeafsetMode::Tree, leaf, 0, 1),
        }
    }

    #[test]
    fn split_preserves_total_length() {
        let mut sl = Seglist::empty();
        sl.push_raw(seg(0.0, 0.5, 0));
        sl.push_raw(seg(0.5, 1.0, 1));
        let (left, right) = sl.split(PhysPos(0.3));
        assert!((left.total_length().get() + right.total_length().get() - sl.total_length().get()).abs() < 1e-12);
        assert_eq!(left.segments().len(), 1);
        assert_eq!(right.segments().len(), 2);
    }

    #[test]
    fn union_of_disjoint_seglists_preserves_each_leafset() {
        let mut a = Seglist::empty();
        a.push_raw(seg(0.0, 0.5, 0));
        let mut b = Seglist::empty();
        b.push_raw(seg(0.5, 1.0, 1));
        let (merged, full) = Seglist::union(&a, &b, 2);
        assert_eq!(merged.segments().len(), 2);
        assert!(full.is_empty());
    }

    #[test]
    fn union_detects_full_coverage() {
        let mut a = Seglist::empty();
        a.push_raw(seg(0.0, 1.0, 0));
        let mut b = Seglist::empty();
        b.push_raw(seg(0.0, 1.0, 1));
        let (merged, full) = Seglist::union(&a, &b, 2);
        assert!(merged.is_empty());
        assert_eq!(full, vec![(PhysPos(0.0), PhysPos(1.0))]);
    }

    #[test]
    fn union_partial_overlap_only_middle_is_full() {
        let mut a = Seglist::empty();
        a.push_raw(seg(0.0, 0.6, 0));
        let mut b = Seglist::empty();
        b.push_raw(seg(0.4, 1.0, 1));
        let (merged, full) = Seglist::union(&a, &b, 2);
        // [0,0.4) has only leaf 0, [0.6,1.0) only leaf 1, [0.4,0.6) has both
        // and is "full" for a 2-leaf total.
        assert_eq!(full.len(), 1);
        assert!((full[0].0.get() - 0.4).abs() < 1e-9);
        assert!((full[0].1.get() - 0.6).abs() < 1e-9);
        let total_remaining: f64 = merged.segments().iter().map(|s| s.len().get()).sum();
        assert!((total_remaining - 0.6).abs() < 1e-9);
    }

    #[test]
    fn subtract_intervals_removes_requested_range() {
        let mut sl = Seglist::empty();
        sl.push_raw(seg(0.0, 1.0, 0));
        let remaining = sl.subtract_intervals(&[(PhysPos(0.4), PhysPos(0.6))]);
        assert!((remaining.total_length().get() - 0.8).abs() < 1e-9);
        assert_eq!(remaining.segments().len(), 2);
    }

    #[test]
    fn advance_by_length_walks_segments_and_carries_remainder() {
        let mut sl = Seglist::empty();
        sl.push_raw(seg(0.0, 0.3, 0));
        sl.push_raw(seg(0.3, 1.0, 1));
        let mut finger = Finger::new();
        let mut len_left = 0.2;
        let hit = sl.advance_by_length(&mut finger, &mut len_left);
        assert!(hit.is_some());
        assert!((hit.unwrap().0.get() - 0.2).abs() < 1e-9);

        let mut len_left2 = 2.0; // longer than what remains in the seglist
        let miss = sl.advance_by_length(&mut finger, &mut len_left2);
        assert!(miss.is_none());
        assert!(len_left2 < 2.0); // some length was consumed before running out
    }
}
