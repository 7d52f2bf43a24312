//! Event rate aggregators (spec.md §4.3): coalescence, migration,
//! recombination, and gene-conversion rates, built fresh at each scheduler
//! step from the current node counts and the demographic model.

use crate::demography::DemographicModel;
use crate::genmap::GeneticMap;
use crate::leafset::PopIdx;
use crate::node::NodePool;
use crate::units::{Gens, PiecewiseFn};

/// The tract-length distribution shape selected by `gene_conversion_model`
/// (spec.md §6): `Geometric` matches a standard IBD-tract model; `Uniform`
/// draws a tract length uniformly over `[min, 2*mean - min]`, the simplest
/// distribution with the configured mean and floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcTractModel {
    Uniform,
    Geometric,
}

/// Gene-conversion rate as a ratio of the recombination rate, plus the
/// tract-length parameters from `gene_conversion_mean_tract_length` /
/// `gene_conversion_min_tract_length` / `gene_conversion_model`.
#[derive(Debug, Clone, Copy)]
pub struct GeneConversionParams {
    pub ratio: f64,
    pub mean_tract_len: f64,
    pub min_tract_len: f64,
    pub model: GcTractModel,
}

impl Default for GeneConversionParams {
    fn default() -> Self {
        GeneConversionParams {
            ratio: 0.0,
            mean_tract_len: 0.0,
            min_tract_len: 0.0,
            model: GcTractModel::Geometric,
        }
    }
}

/// Coalescent pair count for a population: either the naive `n(n-1)/2`, or
/// the convex-hull-restricted count when `hull_dist` is configured
/// (spec.md §4.2).
pub fn coalescent_pairs(pool: &NodePool, pop: PopIdx, hull_dist: Option<f64>) -> u64 {
    match hull_dist {
        None => {
            let n = pool.node_count(pop) as u64;
            n * n.saturating_sub(1) / 2
        }
        Some(d) => pool.restricted_pair_count(pop, d),
    }
}

/// Builds the piecewise coalescence-rate function `pairs(p) / (2 N(p, g))`
/// for population `p` over `[from, horizon)`, holding `pairs(p)` fixed
/// (valid only until the next node-count-changing event, which is exactly
/// why the scheduler rebuilds this every step). Exact for piecewise-
/// constant size schedules; for piecewise-linear ones this samples the
/// size at each breakpoint and holds it constant across the following
/// piece, a documented approximation (the reciprocal of a linear function
/// has no closed-form piecewise-linear exact integral/inverse).
pub fn coalescence_rate_fn(demog: &DemographicModel, pop: PopIdx, pairs: u64, from: f64, horizon: f64) -> PiecewiseFn {
    if pairs == 0 {
        return PiecewiseFn::constant(0.0);
    }
    let size_fn = demog.size_fn(pop);
    let mut points = Vec::new();
    let mut t = from;
    loop {
        let (size, _) = size_fn.value_and_slope_at(t);
        points.push((t, pairs as f64 / (2.0 * size.max(1.0))));
        match size_fn.next_breakpoint_after(t) {
            Some(bp) if bp < horizon => t = bp,
            _ => break,
        }
    }
    PiecewiseFn::piecewise_constant(&points)
}

/// Builds the piecewise migration-rate function `n(p) * m(p -> q, g)` for
/// one ordered population pair over `[from, horizon)`, same fixed-`n`
/// caveat as `coalescence_rate_fn`.
pub fn migration_rate_fn(demog: &DemographicModel, n_from: u64, from_pop: PopIdx, to_pop: PopIdx, from: f64, horizon: f64) -> PiecewiseFn {
    if n_from == 0 {
        return PiecewiseFn::constant(0.0);
    }
    let migr_fn = match demog.migration_fn(from_pop, to_pop) {
        Some(f) => f,
        None => return PiecewiseFn::constant(0.0),
    };
    let mut points = Vec::new();
    let mut t = from;
    loop {
        let (rate, _) = migr_fn.value_and_slope_at(t);
        points.push((t, n_from as f64 * rate));
        match migr_fn.next_breakpoint_after(t) {
            Some(bp) if bp < horizon => t = bp,
            _ => break,
        }
    }
    PiecewiseFn::piecewise_constant(&points)
}

/// Instantaneous recombination rate at the current generation: the sum of
/// every live node's genetic length (spec.md §4.3). Homogeneous-Poisson
/// draws use this directly rather than a piecewise function, since it
/// only needs to hold between consecutive re-draws.
pub fn recombination_rate(pool: &mut NodePool, genmap: &GeneticMap) -> f64 {
    pool.total_recomb_rate(genmap)
}

pub fn gene_conversion_rate(recomb_rate: f64, gc: &GeneConversionParams) -> f64 {
    recomb_rate * gc.ratio
}

/// Sum of every ordered migration pair's instantaneous rate, used for the
/// homogeneous "total migration" early-out when no piecewise inversion is
/// warranted (all pairs currently zero).
pub fn total_instantaneous_migration_rate(demog: &DemographicModel, pool: &NodePool, gen: Gens) -> f64 {
    let mut total = 0.0;
    for ((from, to), _) in demog.migration_pairs() {
        let n = pool.node_count(*from) as f64;
        total += n * demog.migration_rate_at(*from, *to, gen).get();
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demography::DemographicModel;

    #[test]
    fn coalescence_rate_fn_matches_closed_form_for_constant_size() {
        let demog = DemographicModel::new(1, &[10000.0]);
        let f = coalescence_rate_fn(&demog, 0, 10, 0.0, 1000.0);
        let expected = 10.0 / (2.0 * 10000.0);
        assert!((f.eval(500.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn zero_pairs_gives_zero_rate() {
        let demog = DemographicModel::new(1, &[10000.0]);
        let f = coalescence_rate_fn(&demog, 0, 0, 0.0, 1000.0);
        assert_eq!(f.eval(10.0), 0.0);
    }
}
