//! Mutation placement (spec.md §4.6): after the scheduler terminates, walk
//! every emitted ARG edge and drop Poisson-distributed neutral mutations
//! along it, positioned by an exponential-gap cursor over the edge's
//! seglist. Within one edge's seglist the cursor in `crate::seglist`
//! already carries a leftover gap fraction across segment boundaries, so
//! a multi-segment seglist (the common case once recombination has
//! fragmented a lineage) still sees a single coherent exponential process
//! rather than one reset per segment.

use crate::arg::ArgGraph;
use crate::leafset::{Leafset, PopIdx};
use crate::rng::RandSource;
use crate::seglist::Finger;
use crate::units::Gens;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteModel {
    InfiniteSites,
    FiniteSites,
}

#[derive(Debug, Clone)]
pub struct Mutation {
    /// Physical position in `[0, length)`; an integer value (stored as
    /// `f64` for uniformity) when `SiteModel::FiniteSites` is in effect.
    pub position: f64,
    pub leafset: Leafset,
    pub generation: Gens,
    pub population: PopIdx,
}

pub struct MutationParams {
    pub mutation_rate: f64,
    pub region_length_bp: f64,
    pub site_model: SiteModel,
}

/// Walks every ARG edge and returns the placed mutations, deduplicated by
/// integer position when `site_model` is `FiniteSites` (spec.md §4.6;
/// first occurrence at a position wins).
pub fn place_mutations(arg: &ArgGraph, params: &MutationParams, rng: &mut RandSource) -> Vec<Mutation> {
    let mut mutations = Vec::new();
    let mut seen_finite_sites: HashSet<u64> = HashSet::new();

    for edge in arg.edges() {
        let duration = (edge.parent_gen.get() - edge.child_gen.get()).max(0.0);
        if duration <= 0.0 || params.mutation_rate <= 0.0 {
            continue;
        }
        let rate = params.mutation_rate * params.region_length_bp * duration;
        let mut finger = Finger::new();
        let mut len_left = rng.exponential(rate);
        while let Some((loc, leafset)) = edge.seglist.advance_by_length(&mut finger, &mut len_left) {
            let position = match params.site_model {
                SiteModel::InfiniteSites => loc.get(),
                SiteModel::FiniteSites => {
                    let bp = (loc.get() * params.region_length_bp).floor().max(0.0);
                    let bp_key = bp as u64;
                    if !seen_finite_sites.insert(bp_key) {
                        len_left = rng.exponential(rate);
                        continue;
                    }
                    bp
                }
            };
            let generation = Gens(edge.child_gen.get() + rng.uniform_f64() * duration);
            mutations.push(Mutation {
                position,
                leafset,
                generation,
                population: edge.pop,
            });
            len_left = rng.exponential(rate);
        }
    }
    mutations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::{ArgEdge, EdgeKind};
    use crate::leafset::LeafsetMode;
    use crate::seglist::Seglist;

    fn edge(child_gen: f64, parent_gen: f64) -> ArgEdge {
        ArgEdge {
            child: 0,
            parent: 1,
            child_gen: Gens(child_gen),
            parent_gen: Gens(parent_gen),
            seglist: Seglist::whole_region(LeafsetMode::Tree, 0, 0, 1),
            kind: EdgeKind::Coalescence,
            pop: 0,
        }
    }

    #[test]
    fn positions_stay_within_region_bounds() {
        let mut arg = ArgGraph::new();
        arg.push_edge(edge(0.0, 5000.0));
        let params = MutationParams {
            mutation_rate: 1e-10,
            region_length_bp: 1_000_000.0,
            site_model: SiteModel::InfiniteSites,
        };
        let mut rng = RandSource::from_seed(11);
        let muts = place_mutations(&arg, &params, &mut rng);
        for m in &muts {
            assert!(m.position >= 0.0 && m.position < 1.0);
            assert!(m.generation.get() >= 0.0 && m.generation.get() <= 5000.0);
        }
    }

    #[test]
    fn finite_sites_positions_are_distinct_integers() {
        let mut arg = ArgGraph::new();
        arg.push_edge(edge(0.0, 5000.0));
        arg.push_edge(edge(0.0, 5000.0));
        let params = MutationParams {
            mutation_rate: 5e-7,
            region_length_bp: 1000.0,
            site_model: SiteModel::FiniteSites,
        };
        let mut rng = RandSource::from_seed(22);
        let muts = place_mutations(&arg, &params, &mut rng);
        let mut seen = HashSet::new();
        for m in &muts {
            assert_eq!(m.position.fract(), 0.0);
            assert!(seen.insert(m.position as u64));
        }
    }

    #[test]
    fn zero_mutation_rate_places_nothing() {
        let mut arg = ArgGraph::new();
        arg.push_edge(edge(0.0, 100.0));
        let params = MutationParams {
            mutation_rate: 0.0,
            region_length_bp: 1000.0,
            site_model: SiteModel::InfiniteSites,
        };
        let mut rng = RandSource::from_seed(1);
        assert!(place_mutations(&arg, &params, &mut rng).is_empty());
    }
}
