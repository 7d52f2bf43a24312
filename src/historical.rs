//! User-scheduled historical events (spec.md §4.5, §6's `pop_event`
//! directives): size and migration-rate changes are already baked into
//! the `DemographicModel`'s piecewise functions at configuration time
//! (cosi2 compiles its `HistEvents` the same way), so dispatching them
//! here is purely a boundary marker that forces the scheduler to rebuild
//! its rate functions exactly at the breakpoint. Merge, split, admix, and
//! sweep genuinely mutate the live node pool and are executed here.

use crate::error::CoalError;
use crate::leafset::PopIdx;
use crate::node::NodePool;
use crate::rng::RandSource;
use crate::units::{Gens, GensDelta, PhysPos};

#[derive(Debug, Clone)]
pub enum HistoricalEventKind {
    /// Marker only: `DemographicModel::size_fn` already reflects the new
    /// value from this generation onward.
    ChangeSize { pop: PopIdx },
    /// Marker only, same reasoning as `ChangeSize`.
    MigrationRateChange { from: PopIdx, to: PopIdx },
    /// Concatenates `src`'s node list onto `dst` and empties `src`.
    Merge { src: PopIdx, dst: PopIdx },
    /// Moves exactly `round(fraction * n)` of `src`'s nodes, chosen
    /// uniformly without replacement, into `dst` ("deterministic
    /// sampling", spec.md §4.5, as opposed to admix's per-node coin flip).
    Split { src: PopIdx, dst: PopIdx, fraction: f64 },
    /// Each of `src`'s nodes independently migrates to `dst` with
    /// probability `prob`.
    Admix { src: PopIdx, dst: PopIdx, prob: f64 },
    /// Hands control to the sweep driver (§4.7) for `duration` generations.
    SweepStart {
        pop: PopIdx,
        derived_pop: PopIdx,
        locus: PhysPos,
        duration: GensDelta,
    },
}

#[derive(Debug, Clone)]
pub struct HistoricalEvent {
    pub gen: Gens,
    pub kind: HistoricalEventKind,
}

/// The queue of historical events declared in the parameter file, sorted
/// ascending by generation (spec.md §4.4's "queue of future historical
/// events sorted by generation").
#[derive(Debug, Clone, Default)]
pub struct HistoricalQueue {
    events: Vec<HistoricalEvent>,
    next: usize,
}

impl HistoricalQueue {
    pub fn new(mut events: Vec<HistoricalEvent>) -> Self {
        events.sort_by(|a, b| a.gen.get().partial_cmp(&b.gen.get()).unwrap());
        HistoricalQueue { events, next: 0 }
    }

    /// Generation of the next undispatched event, or `+inf` if none remain.
    pub fn next_gen(&self) -> Gens {
        self.events.get(self.next).map(|e| e.gen).unwrap_or_else(Gens::infinity)
    }

    /// Pops the next event if it is due at exactly `gen`.
    pub fn take_due(&mut self, gen: Gens) -> Option<HistoricalEvent> {
        if self.events.get(self.next).map(|e| e.gen.get()) == Some(gen.get()) {
            let e = self.events[self.next].clone();
            self.next += 1;
            Some(e)
        } else {
            None
        }
    }
}

/// Runs the structural effect of a historical event on the node pool.
/// `ChangeSize`/`MigrationRateChange` are no-ops here (see module doc);
/// `SweepStart` is handled by the caller (the scheduler hands off to
/// `crate::sweep` rather than executing it inline).
pub fn execute(kind: &HistoricalEventKind, pool: &mut NodePool, rng: &mut RandSource) -> Result<(), CoalError> {
    match kind {
        HistoricalEventKind::ChangeSize { .. } | HistoricalEventKind::MigrationRateChange { .. } => Ok(()),
        HistoricalEventKind::Merge { src, dst } => {
            let ids: Vec<_> = pool.node_ids(*src).to_vec();
            for id in ids {
                pool.move_to_population(id, *dst);
            }
            Ok(())
        }
        HistoricalEventKind::Split { src, dst, fraction } => {
            let ids: Vec<_> = pool.node_ids(*src).to_vec();
            let n = ids.len();
            let target = ((n as f64) * fraction).round() as usize;
            let target = target.min(n);
            let mut pool_ids = ids;
            let mut chosen = Vec::with_capacity(target);
            for _ in 0..target {
                let i = rng.uniform_usize(pool_ids.len());
                chosen.push(pool_ids.swap_remove(i));
            }
            for id in chosen {
                pool.move_to_population(id, *dst);
            }
            Ok(())
        }
        HistoricalEventKind::Admix { src, dst, prob } => {
            let ids: Vec<_> = pool.node_ids(*src).to_vec();
            for id in ids {
                if rng.bernoulli(*prob) {
                    pool.move_to_population(id, *dst);
                }
            }
            Ok(())
        }
        HistoricalEventKind::SweepStart { .. } => Err(CoalError::invariant(
            "SweepStart must be handled by the scheduler's sweep hand-off, not executed directly",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leafset::LeafsetMode;
    use crate::seglist::Seglist;
    use crate::units::Gens as G;

    fn make_pool() -> NodePool {
        let mut pool = NodePool::new(2);
        for i in 0..4u32 {
            pool.insert_new(0, Seglist::whole_region(LeafsetMode::Tree, i, 0, 4), G(0.0));
        }
        pool
    }

    #[test]
    fn merge_moves_all_nodes() {
        let mut pool = make_pool();
        let mut rng = RandSource::from_seed(1);
        execute(&HistoricalEventKind::Merge { src: 0, dst: 1 }, &mut pool, &mut rng).unwrap();
        assert_eq!(pool.node_count(0), 0);
        assert_eq!(pool.node_count(1), 4);
    }

    #[test]
    fn split_moves_exact_fraction() {
        let mut pool = make_pool();
        let mut rng = RandSource::from_seed(2);
        execute(&HistoricalEventKind::Split { src: 0, dst: 1, fraction: 0.5 }, &mut pool, &mut rng).unwrap();
        assert_eq!(pool.node_count(0), 2);
        assert_eq!(pool.node_count(1), 2);
    }

    #[test]
    fn queue_dispatches_in_ascending_order() {
        let mut q = HistoricalQueue::new(vec![
            HistoricalEvent {
                gen: G(100.0),
                kind: HistoricalEventKind::ChangeSize { pop: 0 },
            },
            HistoricalEvent {
                gen: G(10.0),
                kind: HistoricalEventKind::ChangeSize { pop: 1 },
            },
        ]);
        assert_eq!(q.next_gen().get(), 10.0);
        assert!(q.take_due(G(10.0)).is_some());
        assert_eq!(q.next_gen().get(), 100.0);
    }
}
