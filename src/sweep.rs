//! Selective-sweep driver (spec.md §4.7): partitions the selected
//! population's chromosomes into derived/ancestral sub-populations by the
//! trajectory's entry frequency, substitutes a two-sub-population
//! demographic override for the sweep window, runs the ordinary scheduler
//! machinery inside that window, and merges the two sub-populations back
//! together once the trajectory reaches its origin.
//!
//! Simplification relative to `cosi/sweep*.h`: the source models explicit
//! migration between the derived/ancestral backgrounds to mimic the
//! stochastic trajectory's diffusion around the deterministic curve. This
//! implementation runs the two backgrounds as ordinary non-migrating
//! populations for the window's duration -- exchange between them happens
//! only through the ordinary recombination/gene-conversion machinery at
//! the selected site, not through an explicit diffusion term. Noted as an
//! open simplification in `DESIGN.md`.

use crate::error::CoalError;
use crate::leafset::PopIdx;
use crate::scheduler::Simulation;
use crate::trajectory::FreqTraj;
use crate::units::{Gens, GensDelta, PhysPos, PiecewiseFn};

pub struct SweepConfig<'a> {
    pub selected_pop: PopIdx,
    pub derived_pop: PopIdx,
    pub locus: PhysPos,
    pub start_gen: Gens,
    pub max_duration: GensDelta,
    pub trajectory: &'a dyn FreqTraj,
}

const SWEEP_OVERRIDE_SAMPLES: usize = 200;

/// Runs one sweep window to completion: partition, demographic override,
/// inner event loop, merge, schedule restoration.
pub fn run_sweep(sim: &mut Simulation, config: &SweepConfig) -> Result<(), CoalError> {
    let f_entry = config
        .trajectory
        .freq_at(0.0)
        .ok_or_else(|| CoalError::numerical("sweep trajectory has no frequency at entry"))?
        .get();

    partition_at_entry(sim, config, f_entry)?;

    let orig_selected_fn = sim.demog.size_fn(config.selected_pop).clone();
    let orig_derived_fn = sim.demog.size_fn(config.derived_pop).clone();

    let (derived_points, ancestral_points) = build_override_points(sim, config, &orig_selected_fn)?;
    sim.demog.set_size_fn(config.derived_pop, PiecewiseFn::piecewise_linear(&derived_points));
    sim.demog.set_size_fn(config.selected_pop, PiecewiseFn::piecewise_linear(&ancestral_points));

    let end_gen = config.start_gen.get() + config.max_duration.get();
    loop {
        let elapsed = sim.gen.get() - config.start_gen.get();
        let combined_live = sim.pool.node_count(config.selected_pop) + sim.pool.node_count(config.derived_pop);
        if config.trajectory.freq_at(elapsed).is_none() || sim.gen.get() >= end_gen || combined_live <= 1 {
            break;
        }
        sim.step_once()?;
        if sim.take_pending_sweep().is_some() {
            return Err(CoalError::invariant("nested sweep events are not supported"));
        }
    }

    sim.merge_populations(config.derived_pop, config.selected_pop)?;
    sim.demog.set_size_fn(config.selected_pop, orig_selected_fn);
    sim.demog.set_size_fn(config.derived_pop, orig_derived_fn);
    Ok(())
}

/// Step 1 of spec.md §4.7: every chromosome in `selected_pop` carrying
/// material at the selected site is assigned to `derived_pop` with
/// probability `f_entry`; chromosomes without material there are
/// unaffected (they are not linked to the selected site).
fn partition_at_entry(sim: &mut Simulation, config: &SweepConfig, f_entry: f64) -> Result<(), CoalError> {
    let carriers: Vec<_> = sim
        .pool
        .node_ids(config.selected_pop)
        .iter()
        .copied()
        .filter(|&id| sim.pool.get(id).seglist.covers(config.locus))
        .collect();
    for id in carriers {
        if sim.rng_for_sweep_choice().bernoulli(f_entry) {
            sim.pool.move_to_population(id, config.derived_pop);
        }
    }
    Ok(())
}

/// Samples the trajectory at `SWEEP_OVERRIDE_SAMPLES` points across the
/// window and builds `(gen, size)` knot lists for `N(g)*f(g)` (derived)
/// and `N(g)*(1-f(g))` (ancestral), where `N(g)` is read from the
/// pre-sweep background schedule. Stops early (but keeps at least two
/// points) if the trajectory is exhausted before the window ends.
fn build_override_points(_sim: &Simulation, config: &SweepConfig, background: &PiecewiseFn) -> Result<(Vec<(f64, f64)>, Vec<(f64, f64)>), CoalError> {
    let mut derived = Vec::new();
    let mut ancestral = Vec::new();
    for i in 0..=SWEEP_OVERRIDE_SAMPLES {
        let t = (i as f64 / SWEEP_OVERRIDE_SAMPLES as f64) * config.max_duration.get();
        let gen = config.start_gen.get() + t;
        let freq = match config.trajectory.freq_at(t) {
            Some(f) => f.get(),
            None => break,
        };
        let bg_size = background.eval(gen).max(1.0);
        derived.push((gen, (bg_size * freq).max(1.0)));
        ancestral.push((gen, (bg_size * (1.0 - freq)).max(1.0)));
    }
    if derived.len() < 2 {
        return Err(CoalError::numerical(
            "sweep trajectory too short to build a demographic override (need >= 2 samples)",
        ));
    }
    Ok((derived, ancestral))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demography::DemographicModel;
    use crate::genmap::GeneticMap;
    use crate::historical::HistoricalQueue;
    use crate::leafset::LeafsetMode;
    use crate::node::NodePool;
    use crate::rng::RandSource;
    use crate::scheduler::SchedulerConfig;
    use crate::seglist::Seglist;
    use crate::trajectory::DeterministicSweepTraj;

    #[test]
    fn sweep_partitions_all_carriers_when_frequency_is_one() {
        let mut pool = NodePool::new(2);
        for i in 0..10u32 {
            pool.insert_new(0, Seglist::whole_region(LeafsetMode::Tree, i, 0, 10), Gens(0.0));
        }
        let demog = DemographicModel::new(2, &[1000.0, 1.0]);
        let genmap = GeneticMap::uniform(1000.0, 0.001);
        let historical = HistoricalQueue::new(Vec::new());
        let rng = RandSource::from_seed(42);
        let mut sim = Simulation::new(pool, demog, genmap, historical, 10, SchedulerConfig::default(), rng);

        let traj = DeterministicSweepTraj {
            selection_coeff: 0.1,
            final_freq: 1.0 - 1e-9,
            pop_size_at_entry: 1000.0,
        };
        let config = SweepConfig {
            selected_pop: 0,
            derived_pop: 1,
            locus: PhysPos(0.5),
            start_gen: Gens(0.0),
            max_duration: GensDelta(5.0),
            trajectory: &traj,
        };
        run_sweep(&mut sim, &config).unwrap();
        // frequency ~1 at entry: essentially every carrier should have
        // moved to the derived population before merging back.
        assert_eq!(sim.pool.node_count(1), 0); // merged back into pop 0
        assert!(sim.pool.node_count(0) <= 10);
    }
}
