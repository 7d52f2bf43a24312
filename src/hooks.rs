//! Observer hooks for recombination, coalescence, migration, and ARG-edge
//! emission (spec.md §9's "Hook system" design note): an explicit list of
//! observers passed into the scheduler, each receiving a strongly-typed
//! event record, rather than the source's dynamic-subscription hook
//! registry. Used by the CLI driver to implement the `--output-recomb-locs`,
//! `--output-mut-gens`, and `--tree-stats` diagnostics toggles of spec.md §6
//! without coupling the scheduler itself to any particular output format.

use crate::arg::ArgEdge;
use crate::leafset::PopIdx;
use crate::node::NodeId;
use crate::units::{Gens, PhysPos};
use std::cell::RefCell;
use std::rc::Rc;

/// An observer of scheduler events. Every method has a no-op default so an
/// observer only needs to implement the events it cares about.
pub trait EventObserver {
    fn on_coalescence(&mut self, _gen: Gens, _pop: PopIdx) {}
    fn on_recombination(&mut self, _gen: Gens, _node: NodeId, _loc: PhysPos) {}
    fn on_gene_conversion(&mut self, _gen: Gens, _node: NodeId, _loc1: PhysPos, _loc2: PhysPos) {}
    fn on_migration(&mut self, _gen: Gens, _from: PopIdx, _to: PopIdx) {}
    fn on_edge(&mut self, _edge: &ArgEdge) {}
}

/// Lets a caller keep a handle on an observer's accumulated state after
/// handing it to `Simulation::add_observer` (which takes ownership of a
/// boxed trait object): wrap the concrete recorder in `Rc<RefCell<_>>`,
/// register a clone of the `Rc`, and read the original back once the run
/// finishes.
impl<T: EventObserver> EventObserver for Rc<RefCell<T>> {
    fn on_coalescence(&mut self, gen: Gens, pop: PopIdx) {
        self.borrow_mut().on_coalescence(gen, pop)
    }
    fn on_recombination(&mut self, gen: Gens, node: NodeId, loc: PhysPos) {
        self.borrow_mut().on_recombination(gen, node, loc)
    }
    fn on_gene_conversion(&mut self, gen: Gens, node: NodeId, loc1: PhysPos, loc2: PhysPos) {
        self.borrow_mut().on_gene_conversion(gen, node, loc1, loc2)
    }
    fn on_migration(&mut self, gen: Gens, from: PopIdx, to: PopIdx) {
        self.borrow_mut().on_migration(gen, from, to)
    }
    fn on_edge(&mut self, edge: &ArgEdge) {
        self.borrow_mut().on_edge(edge)
    }
}

/// Records every recombination and gene-conversion breakpoint, for
/// `--output-recomb-locs`.
#[derive(Debug, Default)]
pub struct RecombLocRecorder {
    pub locs: Vec<(Gens, PhysPos)>,
}

impl EventObserver for RecombLocRecorder {
    fn on_recombination(&mut self, gen: Gens, _node: NodeId, loc: PhysPos) {
        self.locs.push((gen, loc));
    }
    fn on_gene_conversion(&mut self, gen: Gens, _node: NodeId, loc1: PhysPos, _loc2: PhysPos) {
        self.locs.push((gen, loc1));
    }
}

/// Accumulates total ARG edge length (physical length x time span, summed
/// over edges) and a per-kind edge count, for `--tree-stats`.
#[derive(Debug, Default)]
pub struct TreeStatsRecorder {
    pub total_edge_length: f64,
    pub coalescence_edges: u64,
    pub recombination_edges: u64,
    pub gene_conversion_edges: u64,
    pub migration_edges: u64,
}

impl EventObserver for TreeStatsRecorder {
    fn on_edge(&mut self, edge: &ArgEdge) {
        let duration = (edge.parent_gen.get() - edge.child_gen.get()).max(0.0);
        self.total_edge_length += duration * edge.seglist.total_length().get();
        match edge.kind {
            crate::arg::EdgeKind::Coalescence | crate::arg::EdgeKind::Retire => self.coalescence_edges += 1,
            crate::arg::EdgeKind::Recombination => self.recombination_edges += 1,
            crate::arg::EdgeKind::GeneConversion => self.gene_conversion_edges += 1,
            crate::arg::EdgeKind::Migration => self.migration_edges += 1,
        }
    }
}

/// Captures every emitted ARG edge verbatim, for `--output-arg-edges`.
#[derive(Debug, Default)]
pub struct ArgEdgeRecorder {
    pub edges: Vec<ArgEdge>,
}

impl EventObserver for ArgEdgeRecorder {
    fn on_edge(&mut self, edge: &ArgEdge) {
        self.edges.push(edge.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::EdgeKind;
    use crate::leafset::{Leafset, LeafsetMode};
    use crate::seglist::Seglist;

    fn edge(kind: EdgeKind, child_gen: f64, parent_gen: f64) -> ArgEdge {
        ArgEdge {
            child: 0,
            parent: 1,
            child_gen: Gens(child_gen),
            parent_gen: Gens(parent_gen),
            seglist: Seglist::whole_region(LeafsetMode::Tree, 0, 0, 1),
            kind,
            pop: 0,
        }
    }

    #[test]
    fn recomb_recorder_collects_locations() {
        let mut rec = RecombLocRecorder::default();
        rec.on_recombination(Gens(10.0), 3, PhysPos(0.4));
        rec.on_gene_conversion(Gens(12.0), 4, PhysPos(0.2), PhysPos(0.3));
        assert_eq!(rec.locs.len(), 2);
    }

    #[test]
    fn tree_stats_accumulates_length_and_counts() {
        let mut stats = TreeStatsRecorder::default();
        stats.on_edge(&edge(EdgeKind::Coalescence, 0.0, 10.0));
        stats.on_edge(&edge(EdgeKind::Recombination, 0.0, 5.0));
        assert!((stats.total_edge_length - 15.0).abs() < 1e-9);
        assert_eq!(stats.coalescence_edges, 1);
        assert_eq!(stats.recombination_edges, 1);
        let _ = Leafset::empty();
    }
}
