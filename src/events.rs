//! Stochastic event executors (spec.md §4.5): coalescence, recombination,
//! gene conversion, and migration. Each mutates the node pool and emits
//! the corresponding ARG edges.

use crate::arg::{ArgEdge, ArgGraph, EdgeKind};
use crate::error::CoalError;
use crate::leafset::PopIdx;
use crate::node::{NodeId, NodePool};
use crate::rng::RandSource;
use crate::seglist::Seglist;
use crate::units::{Gens, PhysPos};

/// A retired region: physical interval that fully coalesced at `gen`,
/// kept for tree-statistics output (spec.md §6's `--tree-stats`).
#[derive(Debug, Clone)]
pub struct RetiredRegion {
    pub lo: PhysPos,
    pub hi: PhysPos,
    pub gen: Gens,
}

pub fn execute_coalescence(
    pop: PopIdx,
    gen: Gens,
    total_leaves: u32,
    pool: &mut NodePool,
    arg: &mut ArgGraph,
    rng: &mut RandSource,
) -> Result<Vec<RetiredRegion>, CoalError> {
    let n = pool.node_count(pop);
    if n < 2 {
        return Err(CoalError::invariant(format!(
            "coalescence requested in population {} with fewer than 2 nodes",
            pop
        )));
    }
    let ids = pool.node_ids(pop).to_vec();
    let (i, j) = rng.choose_two_distinct(ids.len());
    let (id_a, id_b) = (ids[i], ids[j]);

    let (seglist_a, seglist_b) = {
        let node_a = pool.get(id_a);
        let node_b = pool.get(id_b);
        (node_a.seglist.clone(), node_b.seglist.clone())
    };

    let (merged, full_intervals) = Seglist::union(&seglist_a, &seglist_b, total_leaves);

    let child_a = pool.remove(id_a);
    let child_b = pool.remove(id_b);

    let segregating = merged.subtract_intervals(&full_intervals);
    let mut retired = Vec::new();
    for (lo, hi) in &full_intervals {
        retired.push(RetiredRegion { lo: *lo, hi: *hi, gen });
    }

    let parent_id = if !segregating.is_empty() {
        let parent_id = pool.insert_new(pop, segregating, gen);
        push_coalescence_edges(arg, &child_a, &child_b, parent_id, gen, pop);
        parent_id
    } else {
        // The whole union fully coalesced: synthesize a terminal id purely
        // to record the two edges into the ARG (it carries no live node).
        let parent_id = pool_peek_next_id(pool);
        push_coalescence_edges(arg, &child_a, &child_b, parent_id, gen, pop);
        parent_id
    };

    if !full_intervals.is_empty() {
        push_retire_edge(arg, &child_a, &child_b, parent_id, gen, pop, &full_intervals);
    }

    Ok(retired)
}

fn push_coalescence_edges(
    arg: &mut ArgGraph,
    child_a: &crate::node::Node,
    child_b: &crate::node::Node,
    parent_id: NodeId,
    gen: Gens,
    pop: PopIdx,
) {
    arg.push_edge(ArgEdge {
        child: child_a.id,
        parent: parent_id,
        child_gen: child_a.created_gen,
        parent_gen: gen,
        seglist: child_a.seglist.clone(),
        kind: EdgeKind::Coalescence,
        pop,
    });
    arg.push_edge(ArgEdge {
        child: child_b.id,
        parent: parent_id,
        child_gen: child_b.created_gen,
        parent_gen: gen,
        seglist: child_b.seglist.clone(),
        kind: EdgeKind::Coalescence,
        pop,
    });
}

/// Emits the "retire" edge spec.md §4.5 requires whenever a coalescence's
/// union produces material that has fully coalesced: a zero-duration,
/// self-looped edge on `parent_id` annotated with the dropped sub-
/// interval(s), so the retirement is visible on the ARG itself (for
/// `--tree-stats`/`--output-arg-edges`) without handing mutation placement
/// a second copy of material already covered by the ordinary coalescence
/// edges above (those carry `child_a`/`child_b`'s full original seglists,
/// full intervals included).
fn push_retire_edge(
    arg: &mut ArgGraph,
    child_a: &crate::node::Node,
    child_b: &crate::node::Node,
    parent_id: NodeId,
    gen: Gens,
    pop: PopIdx,
    full_intervals: &[(PhysPos, PhysPos)],
) {
    let mut retired_seglist = Seglist::empty();
    for &(lo, hi) in full_intervals {
        let mid = PhysPos(0.5 * (lo.get() + hi.get()));
        let from_a = segment_leafset_at(&child_a.seglist, mid);
        let from_b = segment_leafset_at(&child_b.seglist, mid);
        let leafset = match (from_a, from_b) {
            (Some(a), Some(b)) => crate::leafset::Leafset::union(&a, &b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => continue,
        };
        retired_seglist.add_segment(lo, hi, leafset);
    }
    if retired_seglist.is_empty() {
        return;
    }
    arg.push_edge(ArgEdge {
        child: parent_id,
        parent: parent_id,
        child_gen: gen,
        parent_gen: gen,
        seglist: retired_seglist,
        kind: EdgeKind::Retire,
        pop,
    });
}

fn segment_leafset_at(seglist: &Seglist, pos: PhysPos) -> Option<crate::leafset::Leafset> {
    seglist
        .segments()
        .iter()
        .find(|s| s.beg.get() <= pos.get() && pos.get() < s.end.get())
        .map(|s| s.leafset.clone())
}

/// Peeks the id the pool would assign next, without creating a node, for
/// the case where a coalescence fully retires (no live parent to insert).
/// `NodePool` hands out ids monotonically, so the ARG's bookkeeping stays
/// consistent even though this id is never inserted as a node.
fn pool_peek_next_id(pool: &mut NodePool) -> NodeId {
    let dummy = pool.insert_new(0, Seglist::empty(), Gens(0.0));
    pool.remove(dummy);
    dummy
}

pub fn execute_recombination(
    node_id: NodeId,
    loc: PhysPos,
    gen: Gens,
    pool: &mut NodePool,
    arg: &mut ArgGraph,
) -> Result<(), CoalError> {
    let (pop, seglist, created_gen) = {
        let node = pool.get(node_id);
        (node.pop, node.seglist.clone(), node.created_gen)
    };
    let (left, right) = seglist.split(loc);
    if left.is_empty() || right.is_empty() {
        return Err(CoalError::invariant(
            "recombination breakpoint fell outside the node's material",
        ));
    }
    let removed = pool.remove(node_id);
    let left_id = pool.insert_new(pop, left, gen);
    let right_id = pool.insert_new(pop, right, gen);
    arg.push_edge(ArgEdge {
        child: removed.id,
        parent: left_id,
        child_gen: created_gen,
        parent_gen: gen,
        seglist: pool.get(left_id).seglist.clone(),
        kind: EdgeKind::Recombination,
        pop,
    });
    arg.push_edge(ArgEdge {
        child: removed.id,
        parent: right_id,
        child_gen: created_gen,
        parent_gen: gen,
        seglist: pool.get(right_id).seglist.clone(),
        kind: EdgeKind::Recombination,
        pop,
    });
    Ok(())
}

pub fn execute_gene_conversion(
    node_id: NodeId,
    loc1: PhysPos,
    loc2: PhysPos,
    gen: Gens,
    pool: &mut NodePool,
    arg: &mut ArgGraph,
) -> Result<(), CoalError> {
    let (lo, hi) = if loc1.get() <= loc2.get() {
        (loc1, loc2)
    } else {
        (loc2, loc1)
    };
    let (pop, seglist, created_gen) = {
        let node = pool.get(node_id);
        (node.pop, node.seglist.clone(), node.created_gen)
    };
    let (left, rest) = seglist.split(lo);
    let (mid, right) = rest.split(hi);
    let removed = pool.remove(node_id);

    let mut new_ids = Vec::new();
    for piece in [left, mid, right] {
        if !piece.is_empty() {
            new_ids.push(pool.insert_new(pop, piece, gen));
        }
    }
    if new_ids.is_empty() {
        return Err(CoalError::invariant("gene conversion produced no material"));
    }
    for id in new_ids {
        arg.push_edge(ArgEdge {
            child: removed.id,
            parent: id,
            child_gen: created_gen,
            parent_gen: gen,
            seglist: pool.get(id).seglist.clone(),
            kind: EdgeKind::GeneConversion,
            pop,
        });
    }
    Ok(())
}

/// Migration does not create a new node; it moves one uniformly-chosen
/// node from `from` to `to` and records the event as an annotated edge
/// boundary (spec.md §4.5) rather than a DAG split.
pub fn execute_migration(
    from: PopIdx,
    to: PopIdx,
    gen: Gens,
    pool: &mut NodePool,
    arg: &mut ArgGraph,
    rng: &mut RandSource,
) -> Result<(), CoalError> {
    let n = pool.node_count(from);
    if n == 0 {
        return Err(CoalError::invariant(format!(
            "migration requested from empty population {}",
            from
        )));
    }
    let ids = pool.node_ids(from).to_vec();
    let idx = rng.uniform_usize(ids.len());
    let id = ids[idx];
    let (seglist, created_gen) = {
        let node = pool.get(id);
        (node.seglist.clone(), node.created_gen)
    };
    pool.move_to_population(id, to);
    arg.push_edge(ArgEdge {
        child: id,
        parent: id,
        child_gen: created_gen,
        parent_gen: gen,
        seglist,
        kind: EdgeKind::Migration,
        pop: to,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leafset::LeafsetMode;

    fn make_pool_with_two_leaves() -> NodePool {
        let mut pool = NodePool::new(1);
        pool.insert_new(0, Seglist::whole_region(LeafsetMode::Tree, 0, 0, 2), Gens(0.0));
        pool.insert_new(0, Seglist::whole_region(LeafsetMode::Tree, 1, 0, 2), Gens(0.0));
        pool
    }

    #[test]
    fn coalescence_of_the_full_sample_retires_and_leaves_no_node() {
        let mut pool = make_pool_with_two_leaves();
        let mut arg = ArgGraph::new();
        let mut rng = RandSource::from_seed(5);
        let retired = execute_coalescence(0, Gens(10.0), 2, &mut pool, &mut arg, &mut rng).unwrap();
        assert_eq!(pool.node_count(0), 0);
        assert_eq!(retired.len(), 1);
        // Two ordinary coalescence edges (one per child) plus the retire
        // edge recording the fully-coalesced interval.
        assert_eq!(arg.edge_count(), 3);
        let retire_edges: Vec<_> = arg.edges().filter(|e| e.kind == EdgeKind::Retire).collect();
        assert_eq!(retire_edges.len(), 1);
        assert!((retire_edges[0].seglist.total_length().get() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn recombination_splits_node_into_two_children() {
        let mut pool = NodePool::new(1);
        let id = pool.insert_new(0, Seglist::whole_region(LeafsetMode::Tree, 0, 0, 1), Gens(0.0));
        let mut arg = ArgGraph::new();
        execute_recombination(id, PhysPos(0.5), Gens(3.0), &mut pool, &mut arg).unwrap();
        assert_eq!(pool.node_count(0), 2);
        assert_eq!(arg.edge_count(), 2);
    }

    #[test]
    fn migration_moves_node_without_creating_new_one() {
        let mut pool = NodePool::new(2);
        let id = pool.insert_new(0, Seglist::whole_region(LeafsetMode::Tree, 0, 0, 1), Gens(0.0));
        let mut arg = ArgGraph::new();
        let mut rng = RandSource::from_seed(9);
        execute_migration(0, 1, Gens(2.0), &mut pool, &mut arg, &mut rng).unwrap();
        assert_eq!(pool.node_count(0), 0);
        assert_eq!(pool.node_count(1), 1);
        assert_eq!(pool.get(id).pop, 1);
    }
}
