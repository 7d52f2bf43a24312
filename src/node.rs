//! The node pool: the live frontier of ancestors, partitioned by
//! population, with the per-population recombination-rate index spec.md
//! §4.2 requires (`find_recomb(frac) -> (node, loc)`), and the optional
//! convex-hull coalescence restriction.

use crate::genmap::GeneticMap;
use crate::leafset::PopIdx;
use crate::seglist::Seglist;
use crate::units::{GenLen, GenPos, Gens, PhysPos};

pub type NodeId = u32;

/// A live ancestor: one owned seglist, a current population, and the
/// generation at which it was created (needed to compute ARG edge
/// lengths when it is later consumed by a coalescence or retirement).
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub pop: PopIdx,
    pub seglist: Seglist,
    pub created_gen: Gens,
}

impl Node {
    /// Total genetic length spanned by this node's segments, used both for
    /// the per-population recombination rate total and to locate a
    /// recombination breakpoint within the node (spec.md §4.2).
    pub fn genetic_length(&self, genmap: &GeneticMap) -> GenLen {
        let mut total = 0.0;
        for seg in self.seglist.segments() {
            total += genmap.genetic_pos(seg.end).get() - genmap.genetic_pos(seg.beg).get();
        }
        GenLen(total)
    }

    /// Physical location corresponding to `offset` centimorgans into this
    /// node's own genetic length (not the whole region's). Used once
    /// `find_recomb` has chosen this node.
    pub fn locate_genetic_offset(&self, genmap: &GeneticMap, mut offset: f64) -> PhysPos {
        for seg in self.seglist.segments() {
            let g0 = genmap.genetic_pos(seg.beg).get();
            let g1 = genmap.genetic_pos(seg.end).get();
            let glen = g1 - g0;
            if offset < glen {
                return genmap.physical_pos(GenPos(g0 + offset));
            }
            offset -= glen;
        }
        self.seglist
            .segments()
            .last()
            .map(|s| s.end)
            .unwrap_or(PhysPos(0.0))
    }

    /// The "hull" `[min beg, max end]` of this node's seglist, used by the
    /// optional convex-hull coalescence restriction (spec.md §4.2).
    pub fn hull(&self) -> Option<(PhysPos, PhysPos)> {
        let segs = self.seglist.segments();
        if segs.is_empty() {
            return None;
        }
        let min_beg = segs.iter().map(|s| s.beg.get()).fold(f64::INFINITY, f64::min);
        let max_end = segs.iter().map(|s| s.end.get()).fold(f64::NEG_INFINITY, f64::max);
        Some((PhysPos(min_beg), PhysPos(max_end)))
    }
}

/// Cumulative-genetic-length index over a population's nodes, giving
/// `find_recomb(frac)` in `O(log n)`. Rebuilt whenever a node in the
/// population is added, removed, or has its seglist rewritten -- recomb
/// and gene-conversion events are exactly the events that invalidate it,
/// so the pool marks it dirty on every seglist-mutating operation and
/// rebuilds lazily before the next read.
#[derive(Debug, Clone, Default)]
struct RecombIndex {
    // Cumulative genetic length up to and including each node, in the same
    // order as the population's node id list.
    cumulative: Vec<f64>,
    total: f64,
    dirty: bool,
}

impl RecombIndex {
    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn rebuild(&mut self, node_ids: &[NodeId], nodes: &std::collections::HashMap<NodeId, Node>, genmap: &GeneticMap) {
        self.cumulative.clear();
        let mut running = 0.0;
        for &id in node_ids {
            running += nodes[&id].genetic_length(genmap).get();
            self.cumulative.push(running);
        }
        self.total = running;
        self.dirty = false;
    }

    fn ensure_fresh(&mut self, node_ids: &[NodeId], nodes: &std::collections::HashMap<NodeId, Node>, genmap: &GeneticMap) {
        if self.dirty || self.cumulative.len() != node_ids.len() {
            self.rebuild(node_ids, nodes, genmap);
        }
    }
}

/// Per-population bookkeeping: the live node id list plus its recomb index.
#[derive(Debug, Clone, Default)]
struct PopBucket {
    node_ids: Vec<NodeId>,
    recomb_index: RecombIndex,
}

/// The live frontier of ancestors, partitioned by population.
#[derive(Debug, Clone)]
pub struct NodePool {
    nodes: std::collections::HashMap<NodeId, Node>,
    buckets: Vec<PopBucket>,
    next_id: NodeId,
}

impl NodePool {
    pub fn new(num_pops: usize) -> Self {
        NodePool {
            nodes: std::collections::HashMap::new(),
            buckets: (0..num_pops).map(|_| PopBucket::default()).collect(),
            next_id: 0,
        }
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Inserts a brand-new node (e.g. a sampled leaf) and returns its id.
    pub fn insert_new(&mut self, pop: PopIdx, seglist: Seglist, created_gen: Gens) -> NodeId {
        let id = self.fresh_id();
        self.buckets[pop].node_ids.push(id);
        self.buckets[pop].recomb_index.mark_dirty();
        self.nodes.insert(
            id,
            Node {
                id,
                pop,
                seglist,
                created_gen,
            },
        );
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[&id]
    }

    pub fn remove(&mut self, id: NodeId) -> Node {
        let node = self.nodes.remove(&id).expect("remove: unknown node id");
        let bucket = &mut self.buckets[node.pop];
        bucket.node_ids.retain(|&x| x != id);
        bucket.recomb_index.mark_dirty();
        node
    }

    pub fn replace_seglist(&mut self, id: NodeId, seglist: Seglist) {
        let pop = self.nodes[&id].pop;
        self.nodes.get_mut(&id).unwrap().seglist = seglist;
        self.buckets[pop].recomb_index.mark_dirty();
    }

    pub fn move_to_population(&mut self, id: NodeId, new_pop: PopIdx) {
        let old_pop = self.nodes[&id].pop;
        if old_pop == new_pop {
            return;
        }
        self.buckets[old_pop].node_ids.retain(|&x| x != id);
        self.buckets[old_pop].recomb_index.mark_dirty();
        self.buckets[new_pop].node_ids.push(id);
        self.buckets[new_pop].recomb_index.mark_dirty();
        self.nodes.get_mut(&id).unwrap().pop = new_pop;
    }

    pub fn node_count(&self, pop: PopIdx) -> usize {
        self.buckets[pop].node_ids.len()
    }

    pub fn node_ids(&self, pop: PopIdx) -> &[NodeId] {
        &self.buckets[pop].node_ids
    }

    pub fn total_live_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// True once every physical point has at most one live segment
    /// covering it overall, i.e. no population has two-or-more nodes with
    /// non-empty seglists left to coalesce (spec.md §4.4 termination).
    pub fn fully_coalesced(&self) -> bool {
        self.buckets
            .iter()
            .all(|b| b.node_ids.iter().filter(|&&id| !self.nodes[&id].seglist.is_empty()).count() <= 1)
    }

    /// Total recombination/gene-conversion rate across all populations:
    /// the sum of every live node's genetic length (spec.md §4.3).
    pub fn total_recomb_rate(&mut self, genmap: &GeneticMap) -> f64 {
        let mut total = 0.0;
        for pop in 0..self.buckets.len() {
            self.ensure_bucket_fresh(pop, genmap);
            total += self.buckets[pop].recomb_index.total;
        }
        total
    }

    fn ensure_bucket_fresh(&mut self, pop: PopIdx, genmap: &GeneticMap) {
        let ids = self.buckets[pop].node_ids.clone();
        self.buckets[pop].recomb_index.ensure_fresh(&ids, &self.nodes, genmap);
    }

    /// Maps a uniform draw `frac` in `[0, total_recomb_rate)` to a node and
    /// a physical breakpoint location, per spec.md §4.2's `find_recomb`.
    pub fn find_recomb(&mut self, mut frac: f64, genmap: &GeneticMap) -> Option<(NodeId, PhysPos)> {
        for pop in 0..self.buckets.len() {
            self.ensure_bucket_fresh(pop, genmap);
            let bucket = &self.buckets[pop];
            if frac < bucket.recomb_index.total {
                let idx = match bucket
                    .recomb_index
                    .cumulative
                    .binary_search_by(|c| c.partial_cmp(&frac).unwrap())
                {
                    Ok(i) => i,
                    Err(i) => i,
                };
                let idx = idx.min(bucket.node_ids.len() - 1);
                let prior = if idx == 0 { 0.0 } else { bucket.recomb_index.cumulative[idx - 1] };
                let id = bucket.node_ids[idx];
                let loc = self.nodes[&id].locate_genetic_offset(genmap, frac - prior);
                return Some((id, loc));
            }
            frac -= bucket.recomb_index.total;
        }
        None
    }

    /// Node-pair hulls within `max_dist` of each other for the convex-hull
    /// coalescence restriction (spec.md §4.2): a sweep over begin
    /// endpoints, `O(n log n)`.
    pub fn restricted_pair_count(&self, pop: PopIdx, max_dist: f64) -> u64 {
        let mut hulls: Vec<(f64, f64)> = self.buckets[pop]
            .node_ids
            .iter()
            .filter_map(|&id| self.nodes[&id].hull())
            .map(|(lo, hi)| (lo.get(), hi.get()))
            .collect();
        hulls.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let mut count = 0u64;
        for i in 0..hulls.len() {
            for j in (i + 1)..hulls.len() {
                if hulls[j].0 - hulls[i].0 > max_dist {
                    break;
                }
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leafset::LeafsetMode;

    fn whole(mode: LeafsetMode, leaf: u32) -> Seglist {
        Seglist::whole_region(mode, leaf, 0, 1)
    }

    #[test]
    fn insert_and_remove_update_node_count() {
        let mut pool = NodePool::new(1);
        let a = pool.insert_new(0, whole(LeafsetMode::Tree, 0), Gens(0.0));
        let _b = pool.insert_new(0, whole(LeafsetMode::Tree, 1), Gens(0.0));
        assert_eq!(pool.node_count(0), 2);
        pool.remove(a);
        assert_eq!(pool.node_count(0), 1);
    }

    #[test]
    fn find_recomb_locates_within_uniform_map() {
        let map = GeneticMap::uniform(1_000_000.0, 100.0);
        let mut pool = NodePool::new(1);
        pool.insert_new(0, whole(LeafsetMode::Tree, 0), Gens(0.0));
        pool.insert_new(0, whole(LeafsetMode::Tree, 1), Gens(0.0));
        let total = pool.total_recomb_rate(&map);
        assert!((total - 200.0).abs() < 1e-6);
        let (node_id, loc) = pool.find_recomb(50.0, &map).unwrap();
        assert!(pool.node_count(0) > 0);
        let _ = node_id;
        assert!(loc.get() >= 0.0 && loc.get() <= 1.0);
    }

    #[test]
    fn fully_coalesced_when_each_population_has_one_or_zero_nodes() {
        let mut pool = NodePool::new(1);
        assert!(pool.fully_coalesced());
        pool.insert_new(0, whole(LeafsetMode::Tree, 0), Gens(0.0));
        assert!(pool.fully_coalesced());
        pool.insert_new(0, whole(LeafsetMode::Tree, 1), Gens(0.0));
        assert!(!pool.fully_coalesced());
    }
}
