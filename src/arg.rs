//! The ancestral recombination graph itself: the DAG of edges emitted as a
//! side effect of every scheduler event, later consumed by mutation
//! placement. Built on `petgraph`, following the teacher's own genealogy
//! module's choice of a typed graph over hand-rolled adjacency lists.

use crate::leafset::PopIdx;
use crate::node::NodeId;
use crate::seglist::Seglist;
use crate::units::Gens;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Coalescence,
    Recombination,
    GeneConversion,
    Migration,
    /// Material that fully coalesced and was split off and dropped
    /// (spec.md §4.5's "retire edge").
    Retire,
}

#[derive(Debug, Clone)]
pub struct ArgEdge {
    pub child: NodeId,
    pub parent: NodeId,
    pub child_gen: Gens,
    pub parent_gen: Gens,
    pub seglist: Seglist,
    pub kind: EdgeKind,
    pub pop: PopIdx,
}

/// The ARG under construction: a directed graph from child to parent,
/// edge-weighted by the full `ArgEdge` record.
#[derive(Debug, Default)]
pub struct ArgGraph {
    graph: DiGraph<NodeId, ArgEdge>,
    index_of: HashMap<NodeId, NodeIndex>,
}

impl ArgGraph {
    pub fn new() -> Self {
        ArgGraph {
            graph: DiGraph::new(),
            index_of: HashMap::new(),
        }
    }

    fn ensure_node(&mut self, id: NodeId) -> NodeIndex {
        if let Some(&idx) = self.index_of.get(&id) {
            return idx;
        }
        let idx = self.graph.add_node(id);
        self.index_of.insert(id, idx);
        idx
    }

    pub fn push_edge(&mut self, edge: ArgEdge) {
        let child_idx = self.ensure_node(edge.child);
        let parent_idx = self.ensure_node(edge.parent);
        self.graph.add_edge(child_idx, parent_idx, edge);
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edges(&self) -> impl Iterator<Item = &ArgEdge> {
        self.graph.edge_weights()
    }

    /// Nodes with no outgoing edge other than their own retire self-loop
    /// (see `EdgeKind::Retire`): the final common ancestors of the sample
    /// (or of each physical point still segregating at the end of a
    /// truncated run).
    pub fn roots(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .all(|other| other == idx)
            })
            .map(|idx| self.graph[idx])
            .collect()
    }

    /// Nodes with no incoming edge other than their own retire self-loop:
    /// the sampled leaves.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .all(|other| other == idx)
            })
            .map(|idx| self.graph[idx])
            .collect()
    }

    pub fn is_weakly_connected(&self) -> bool {
        petgraph::algo::connected_components(&self.graph) <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leafset::{Leafset, LeafsetMode};
    use crate::seglist::Seglist;

    fn dummy_seglist() -> Seglist {
        Seglist::whole_region(LeafsetMode::Tree, 0, 0, 1)
    }

    #[test]
    fn coalescence_of_two_leaves_has_one_root_two_leaves() {
        let mut arg = ArgGraph::new();
        arg.push_edge(ArgEdge {
            child: 0,
            parent: 2,
            child_gen: Gens(0.0),
            parent_gen: Gens(5.0),
            seglist: dummy_seglist(),
            kind: EdgeKind::Coalescence,
            pop: 0,
        });
        arg.push_edge(ArgEdge {
            child: 1,
            parent: 2,
            child_gen: Gens(0.0),
            parent_gen: Gens(5.0),
            seglist: dummy_seglist(),
            kind: EdgeKind::Coalescence,
            pop: 0,
        });
        assert_eq!(arg.roots(), vec![2]);
        let mut leaves = arg.leaves();
        leaves.sort();
        assert_eq!(leaves, vec![0, 1]);
        assert!(arg.is_weakly_connected());
        assert_eq!(arg.edge_count(), 2);
        let _ = Leafset::empty();
    }

    #[test]
    fn retire_self_loop_does_not_hide_root_or_leaf_status() {
        let mut arg = ArgGraph::new();
        arg.push_edge(ArgEdge {
            child: 0,
            parent: 2,
            child_gen: Gens(0.0),
            parent_gen: Gens(5.0),
            seglist: dummy_seglist(),
            kind: EdgeKind::Coalescence,
            pop: 0,
        });
        arg.push_edge(ArgEdge {
            child: 1,
            parent: 2,
            child_gen: Gens(0.0),
            parent_gen: Gens(5.0),
            seglist: dummy_seglist(),
            kind: EdgeKind::Coalescence,
            pop: 0,
        });
        // A fully-coalesced node records its own retire edge as a
        // self-loop; that must not make it look like it has descendants.
        arg.push_edge(ArgEdge {
            child: 2,
            parent: 2,
            child_gen: Gens(5.0),
            parent_gen: Gens(5.0),
            seglist: dummy_seglist(),
            kind: EdgeKind::Retire,
            pop: 0,
        });
        assert_eq!(arg.roots(), vec![2]);
        let mut leaves = arg.leaves();
        leaves.sort();
        assert_eq!(leaves, vec![0, 1]);
        assert_eq!(arg.edge_count(), 3);
    }
}
