//! The main event loop (spec.md §4.4): at each step, compute competing
//! rates, draw the next event time and kind by inhomogeneous/homogeneous
//! Poisson sampling, dispatch to an executor, and repeat until every
//! physical point has fully coalesced or a time cap is hit.

use crate::arg::ArgGraph;
use crate::demography::DemographicModel;
use crate::error::CoalError;
use crate::events::{self, RetiredRegion};
use crate::genmap::GeneticMap;
use crate::historical::{self, HistoricalEventKind, HistoricalQueue};
use crate::hooks::EventObserver;
use crate::leafset::PopIdx;
use crate::node::NodePool;
use crate::rates::{self, GeneConversionParams};
use crate::rng::RandSource;
use crate::units::{Gens, PhysPos};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Convex-hull coalescence restriction distance (spec.md §4.2); `None`
    /// uses the naive `n(n-1)/2` pair count.
    pub hull_dist: Option<f64>,
    pub gene_conversion: GeneConversionParams,
    pub poisson_precision: f64,
    pub poisson_max_steps: u32,
    pub time_cap: Option<Gens>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            hull_dist: None,
            gene_conversion: GeneConversionParams::default(),
            poisson_precision: 1e-9,
            poisson_max_steps: 1000,
            time_cap: None,
        }
    }
}

/// Final disposition of a run, distinguishing a clean finish from one cut
/// short by a configured wall/generation cap (spec.md §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    FullyCoalesced,
    Truncated,
    /// A `SweepStart` historical event came due; the caller must drive
    /// `crate::sweep::run_sweep` and then call `run` again to resume.
    SweepPending,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum StepPriority {
    Coalescence = 0,
    Recombination = 1,
    GeneConversion = 2,
    Migration = 3,
}

enum StepKind {
    Coalescence { pop: PopIdx },
    Migration { from: PopIdx, to: PopIdx },
    Recombination { node: crate::node::NodeId, loc: PhysPos },
    GeneConversion {
        node: crate::node::NodeId,
        loc1: PhysPos,
        loc2: PhysPos,
    },
}

/// Everything one simulation owns; single-threaded, no shared mutable
/// state with any other simulation (spec.md §5).
pub struct Simulation {
    pub pool: NodePool,
    pub arg: ArgGraph,
    pub demog: DemographicModel,
    pub genmap: GeneticMap,
    pub historical: HistoricalQueue,
    pub gen: Gens,
    pub total_leaves: u32,
    pub retired: Vec<RetiredRegion>,
    pub config: SchedulerConfig,

    pending_sweep: Option<(PopIdx, PopIdx, PhysPos, crate::units::GensDelta)>,
    observers: Vec<Box<dyn EventObserver>>,

    rng_coal: RandSource,
    rng_migr: RandSource,
    rng_rg: RandSource,
    rng_choice: RandSource,
    rng_hist: RandSource,
}

impl Simulation {
    pub fn new(
        pool: NodePool,
        demog: DemographicModel,
        genmap: GeneticMap,
        historical: HistoricalQueue,
        total_leaves: u32,
        config: SchedulerConfig,
        mut rng: RandSource,
    ) -> Self {
        Simulation {
            pool,
            arg: ArgGraph::new(),
            demog,
            genmap,
            historical,
            gen: Gens(0.0),
            total_leaves,
            retired: Vec::new(),
            config,
            pending_sweep: None,
            observers: Vec::new(),
            rng_coal: rng.substream(1),
            rng_migr: rng.substream(2),
            rng_rg: rng.substream(3),
            rng_choice: rng.substream(4),
            rng_hist: rng.substream(5),
        }
    }

    pub fn run(&mut self) -> Result<RunOutcome, CoalError> {
        loop {
            if self.pool.fully_coalesced() {
                return Ok(RunOutcome::FullyCoalesced);
            }
            if let Some(cap) = self.config.time_cap {
                if self.gen.get() >= cap.get() {
                    return Ok(RunOutcome::Truncated);
                }
            }
            self.step()?;
            if self.pending_sweep.is_some() {
                return Ok(RunOutcome::SweepPending);
            }
        }
    }

    /// Takes the pending sweep hand-off set by a `SweepStart` historical
    /// event, if any. The caller is expected to drive
    /// `crate::sweep::run_sweep` with it and then call `run` again.
    pub fn take_pending_sweep(&mut self) -> Option<(PopIdx, PopIdx, PhysPos, crate::units::GensDelta)> {
        self.pending_sweep.take()
    }

    /// Advances exactly one scheduler step; exposed so the sweep driver
    /// can keep running the ordinary event loop machinery (coalescence,
    /// recombination, migration) inside the sweep window.
    pub fn step_once(&mut self) -> Result<(), CoalError> {
        self.step()
    }

    /// Concatenates `src`'s live nodes onto `dst`, used by the sweep
    /// driver to recombine the derived/ancestral sub-populations once the
    /// trajectory reaches its origin.
    pub fn merge_populations(&mut self, src: PopIdx, dst: PopIdx) -> Result<(), CoalError> {
        historical::execute(&HistoricalEventKind::Merge { src, dst }, &mut self.pool, &mut self.rng_hist)
    }

    /// The substream used for the sweep driver's entry-partition coin
    /// flips (spec.md §4.7 step 1), kept independent of the ordinary
    /// event-choice substream.
    pub fn rng_for_sweep_choice(&mut self) -> &mut RandSource {
        &mut self.rng_hist
    }

    /// Registers an observer to be notified of every recombination,
    /// coalescence, gene-conversion, migration, and ARG-edge emission
    /// (spec.md §9's "Hook system" design note).
    pub fn add_observer(&mut self, observer: Box<dyn EventObserver>) {
        self.observers.push(observer);
    }

    fn step(&mut self) -> Result<(), CoalError> {
        let g_next_hist = self.historical.next_gen();
        let horizon = match self.config.time_cap {
            Some(cap) => g_next_hist.get().min(cap.get()),
            None => g_next_hist.get(),
        };

        let mut best_time = f64::INFINITY;
        let mut best_priority = StepPriority::Migration;
        let mut best_kind: Option<StepKind> = None;

        for pop in 0..self.demog.num_pops() {
            let pairs = rates::coalescent_pairs(&self.pool, pop, self.config.hull_dist);
            if pairs == 0 {
                continue;
            }
            let rate_fn = rates::coalescence_rate_fn(&self.demog, pop, pairs, self.gen.get(), horizon);
            let target = self.rng_coal.exponential(1.0);
            if let Some(t) = rate_fn.invert_integral(
                self.gen.get(),
                target,
                horizon,
                self.config.poisson_precision,
                self.config.poisson_max_steps,
            ) {
                if better(t, StepPriority::Coalescence, best_time, best_priority) {
                    best_time = t;
                    best_priority = StepPriority::Coalescence;
                    best_kind = Some(StepKind::Coalescence { pop });
                }
            }
        }

        for ((from, to), _) in self.demog.migration_pairs().map(|(k, v)| (*k, v)).collect::<Vec<_>>() {
            let n_from = self.pool.node_count(from) as u64;
            if n_from == 0 {
                continue;
            }
            let rate_fn = rates::migration_rate_fn(&self.demog, n_from, from, to, self.gen.get(), horizon);
            let target = self.rng_migr.exponential(1.0);
            if let Some(t) = rate_fn.invert_integral(
                self.gen.get(),
                target,
                horizon,
                self.config.poisson_precision,
                self.config.poisson_max_steps,
            ) {
                if better(t, StepPriority::Migration, best_time, best_priority) {
                    best_time = t;
                    best_priority = StepPriority::Migration;
                    best_kind = Some(StepKind::Migration { from, to });
                }
            }
        }

        let total_rec = rates::recombination_rate(&mut self.pool, &self.genmap);
        let gc_rate = rates::gene_conversion_rate(total_rec, &self.config.gene_conversion);
        let total_rg = total_rec + gc_rate;
        if total_rg > 0.0 {
            let dt = self.rng_rg.exponential(total_rg);
            let t = self.gen.get() + dt;
            if t <= horizon {
                let is_gc = gc_rate > 0.0 && self.rng_choice.categorical(&[total_rec, gc_rate]) == 1;
                let priority = if is_gc {
                    StepPriority::GeneConversion
                } else {
                    StepPriority::Recombination
                };
                if better(t, priority, best_time, best_priority) {
                    let frac = self.rng_choice.uniform_f64() * total_rec;
                    if let Some((node, loc1)) = self.pool.find_recomb(frac, &self.genmap) {
                        best_time = t;
                        best_priority = priority;
                        best_kind = Some(if is_gc {
                            let gc = &self.config.gene_conversion;
                            let tract = match gc.model {
                                rates::GcTractModel::Geometric => self.rng_choice.geometric_with_mean(gc.mean_tract_len, gc.min_tract_len),
                                rates::GcTractModel::Uniform => self.rng_choice.uniform_tract_length(gc.mean_tract_len, gc.min_tract_len),
                            };
                            let loc2 = PhysPos((loc1.get() + tract).min(1.0));
                            StepKind::GeneConversion { node, loc1, loc2 }
                        } else {
                            StepKind::Recombination { node, loc: loc1 }
                        });
                    }
                }
            }
        }

        // Historical events win ties and fire whenever nothing stochastic
        // beats their generation.
        if g_next_hist.get() <= best_time {
            return self.dispatch_historical(g_next_hist);
        }

        match best_kind {
            None => Err(CoalError::invariant(
                "no event found before horizon; the sample should already have been detected as fully coalesced",
            )),
            Some(kind) => {
                self.gen = Gens(best_time);
                self.dispatch(kind)
            }
        }
    }

    fn dispatch(&mut self, kind: StepKind) -> Result<(), CoalError> {
        let gen = self.gen;
        for obs in &mut self.observers {
            match &kind {
                StepKind::Coalescence { pop } => obs.on_coalescence(gen, *pop),
                StepKind::Migration { from, to } => obs.on_migration(gen, *from, *to),
                StepKind::Recombination { node, loc } => obs.on_recombination(gen, *node, *loc),
                StepKind::GeneConversion { node, loc1, loc2 } => obs.on_gene_conversion(gen, *node, *loc1, *loc2),
            }
        }

        let edges_before = self.arg.edge_count();
        let result = match kind {
            StepKind::Coalescence { pop } => {
                let mut retired = events::execute_coalescence(pop, self.gen, self.total_leaves, &mut self.pool, &mut self.arg, &mut self.rng_choice)?;
                self.retired.append(&mut retired);
                Ok(())
            }
            StepKind::Migration { from, to } => events::execute_migration(from, to, self.gen, &mut self.pool, &mut self.arg, &mut self.rng_choice),
            StepKind::Recombination { node, loc } => events::execute_recombination(node, loc, self.gen, &mut self.pool, &mut self.arg),
            StepKind::GeneConversion { node, loc1, loc2 } => events::execute_gene_conversion(node, loc1, loc2, self.gen, &mut self.pool, &mut self.arg),
        };

        if !self.observers.is_empty() {
            let new_edges: Vec<crate::arg::ArgEdge> = self.arg.edges().skip(edges_before).cloned().collect();
            for obs in &mut self.observers {
                for edge in &new_edges {
                    obs.on_edge(edge);
                }
            }
        }

        result
    }

    fn dispatch_historical(&mut self, gen: Gens) -> Result<(), CoalError> {
        self.gen = gen;
        let event = self
            .historical
            .take_due(gen)
            .ok_or_else(|| CoalError::invariant("historical event disappeared between peek and dispatch"))?;
        if let HistoricalEventKind::SweepStart { pop, derived_pop, locus, duration } = &event.kind {
            self.pending_sweep = Some((*pop, *derived_pop, *locus, *duration));
            return Ok(());
        }
        historical::execute(&event.kind, &mut self.pool, &mut self.rng_hist)
    }
}

fn better(t: f64, priority: StepPriority, best_t: f64, best_priority: StepPriority) -> bool {
    t < best_t || (t == best_t && (priority as u8) < (best_priority as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genmap::GeneticMap;
    use crate::historical::HistoricalQueue;
    use crate::leafset::LeafsetMode;
    use crate::seglist::Seglist;

    fn small_simulation(n: u32) -> Simulation {
        let mut pool = NodePool::new(1);
        for i in 0..n {
            pool.insert_new(0, Seglist::whole_region(LeafsetMode::Tree, i, 0, n as usize), Gens(0.0));
        }
        let demog = DemographicModel::new(1, &[1000.0]);
        let genmap = GeneticMap::uniform(1000.0, 0.001);
        let historical = HistoricalQueue::new(Vec::new());
        let rng = RandSource::from_seed(123);
        Simulation::new(pool, demog, genmap, historical, n, SchedulerConfig::default(), rng)
    }

    #[test]
    fn small_sample_fully_coalesces() {
        let mut sim = small_simulation(5);
        let outcome = sim.run().unwrap();
        assert_eq!(outcome, RunOutcome::FullyCoalesced);
        assert!(sim.pool.fully_coalesced());
        assert!(sim.arg.edge_count() > 0);
    }

    #[test]
    fn time_cap_truncates_run() {
        let mut sim = small_simulation(20);
        sim.config.time_cap = Some(Gens(1e-9));
        let outcome = sim.run().unwrap();
        assert_eq!(outcome, RunOutcome::Truncated);
    }
}
