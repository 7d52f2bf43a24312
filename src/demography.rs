//! The demographic model: per-population size-over-time and pairwise
//! migration-rate-over-time functions, piecewise-constant in generations
//! into the past with arbitrary breakpoints (spec.md §3, §4.3).
//!
//! Size and migration schedules are fixed once at configuration time from
//! the parameter file's `pop_size`/`pop_event change_size`/`pop_event
//! migration_rate` directives (cosi2 builds its `HistEvents` the same
//! way -- a flat list of scheduled changes compiled into piecewise
//! functions before the run starts). Population *structure* changes
//! (merge, split, admix, sweep) are not representable as plain piecewise
//! functions; those remain discrete events dispatched by the scheduler
//! (see `crate::historical`).

use crate::leafset::PopIdx;
use crate::units::{Gens, PiecewiseFn, PopSize, Rate};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct DemographicModel {
    size_fns: Vec<PiecewiseFn>,
    migr_fns: BTreeMap<(PopIdx, PopIdx), PiecewiseFn>,
    num_pops: usize,
}

impl DemographicModel {
    pub fn new(num_pops: usize, initial_sizes: &[f64]) -> Self {
        assert_eq!(initial_sizes.len(), num_pops);
        DemographicModel {
            size_fns: initial_sizes.iter().map(|&s| PiecewiseFn::constant(s)).collect(),
            migr_fns: BTreeMap::new(),
            num_pops,
        }
    }

    pub fn num_pops(&self) -> usize {
        self.num_pops
    }

    /// Replaces population `pop`'s size schedule wholesale, e.g. once all
    /// `pop_event change_size` directives for it have been collected into
    /// a sorted `(gen, size)` list.
    pub fn set_size_schedule(&mut self, pop: PopIdx, points: &[(f64, f64)]) {
        self.size_fns[pop] = PiecewiseFn::piecewise_constant(points);
    }

    /// Replaces population `pop`'s size function wholesale with an
    /// already-built `PiecewiseFn`, e.g. the sweep driver's `N(g)*f(g)`
    /// override or restoring the pre-sweep schedule afterward.
    pub fn set_size_fn(&mut self, pop: PopIdx, f: PiecewiseFn) {
        self.size_fns[pop] = f;
    }

    pub fn set_migration_schedule(&mut self, from: PopIdx, to: PopIdx, points: &[(f64, f64)]) {
        self.migr_fns.insert((from, to), PiecewiseFn::piecewise_constant(points));
    }

    pub fn size_at(&self, pop: PopIdx, gen: Gens) -> PopSize {
        PopSize(self.size_fns[pop].eval(gen.get()).max(1.0))
    }

    pub fn migration_rate_at(&self, from: PopIdx, to: PopIdx, gen: Gens) -> Rate {
        match self.migr_fns.get(&(from, to)) {
            Some(f) => Rate(f.eval(gen.get()).max(0.0)),
            None => Rate(0.0),
        }
    }

    pub fn size_fn(&self, pop: PopIdx) -> &PiecewiseFn {
        &self.size_fns[pop]
    }

    pub fn migration_fn(&self, from: PopIdx, to: PopIdx) -> Option<&PiecewiseFn> {
        self.migr_fns.get(&(from, to))
    }

    pub fn migration_pairs(&self) -> impl Iterator<Item = (&(PopIdx, PopIdx), &PiecewiseFn)> {
        self.migr_fns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_schedule_steps_at_breakpoints() {
        let mut model = DemographicModel::new(1, &[10000.0]);
        model.set_size_schedule(0, &[(0.0, 10000.0), (1000.0, 500.0)]);
        assert!((model.size_at(0, Gens(500.0)).get() - 10000.0).abs() < 1e-9);
        assert!((model.size_at(0, Gens(1500.0)).get() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn missing_migration_pair_defaults_to_zero() {
        let model = DemographicModel::new(2, &[1000.0, 1000.0]);
        assert_eq!(model.migration_rate_at(0, 1, Gens(0.0)).get(), 0.0);
    }
}
