//! Command-line driver (spec.md §6): reads a parameter file, runs one or
//! more independent simulations (optionally in parallel, spec.md §5), and
//! writes haplotype output plus any requested diagnostics.

use clap::Parser;
use coalescent_arg::error::{CoalError, CoalErrorKind};
use coalescent_arg::genmap::GeneticMap;
use coalescent_arg::hooks::{ArgEdgeRecorder, EventObserver, RecombLocRecorder, TreeStatsRecorder};
use coalescent_arg::leafset::LeafsetMode;
use coalescent_arg::mutation::{self, MutationParams};
use coalescent_arg::node::NodePool;
use coalescent_arg::output::{self, SampleLayout};
use coalescent_arg::params::{seed_for_simulation, ParsedParams};
use coalescent_arg::rng::RandSource;
use coalescent_arg::scheduler::{RunOutcome, SchedulerConfig, Simulation};
use coalescent_arg::seglist::Seglist;
use coalescent_arg::sweep::{self, SweepConfig};
use coalescent_arg::units::Gens;
use rayon::prelude::*;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

/// Default matrix-output position precision (spec.md §6: "Position
/// precision is configurable", but no CLI flag for it is listed).
const MATRIX_PRECISION: usize = 6;

/// Mixing constant for deriving a simulation's mutation-placement RNG from
/// its event-loop seed; distinct from the substream tags used inside
/// `Simulation` so the two draw streams never collide.
const MUTATION_RNG_MIX: u64 = 0x4D55_5441_5449_4F4E;

#[derive(Parser, Debug)]
#[command(name = "coalescent-arg", author, version, about = "Backward-time coalescent ARG simulator", long_about = None)]
struct Cli {
    /// Parameter file (required).
    #[arg(long)]
    params: PathBuf,

    /// Prefix for output files.
    #[arg(long, default_value = "out")]
    output_base: String,

    /// Number of independent simulations to run.
    #[arg(long, default_value_t = 1)]
    simulations: u64,

    /// Master seed; overrides `random_seed` in the parameter file.
    #[arg(long)]
    seed: Option<u64>,

    /// Write the compatibility haplotype-matrix format instead of the
    /// native `.pos-<p>`/`.hap-<p>` pair.
    #[arg(long)]
    matrix_output: bool,

    /// Write `<base>.mutgens`: each mutation's generation.
    #[arg(long)]
    output_mut_gens: bool,

    /// Write `<base>.recombs`: every recombination/gene-conversion
    /// breakpoint.
    #[arg(long)]
    output_recomb_locs: bool,

    /// Write `<base>.treestats`: total ARG edge length and per-kind edge
    /// counts.
    #[arg(long)]
    tree_stats: bool,

    /// Write `<base>.argedges`: every emitted ARG edge.
    #[arg(long)]
    output_arg_edges: bool,
}

fn main() {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(failures) if failures == 0 => std::process::exit(0),
        Ok(_) => std::process::exit(2),
        Err(e) => {
            eprintln!("{}", e);
            let code = if matches!(e.kind, CoalErrorKind::Configuration(_)) { 1 } else { 2 };
            std::process::exit(code);
        }
    }
}

/// Top-level driver, returning the number of simulations that failed
/// (numerical non-convergence aborts only that simulation per spec.md §7;
/// I/O and invariant failures are fatal to the whole batch and surface as
/// `Err`).
fn run(cli: &Cli) -> Result<u64, CoalError> {
    let text = std::fs::read_to_string(&cli.params).map_err(|e| CoalError::configuration(format!("reading parameter file {:?}: {}", cli.params, e)))?;
    let params = ParsedParams::parse(&text)?;

    let recomb_file = params
        .recomb_file
        .as_ref()
        .ok_or_else(|| CoalError::configuration("recomb_file is required (zero recombination rate is a degenerate input, spec.md §4.8)"))?;
    let genmap = GeneticMap::from_file(recomb_file, params.length_bp)?;
    if genmap.total_genetic_length().get() <= 0.0 {
        return Err(CoalError::configuration("genetic map has zero total genetic length (degenerate input)"));
    }

    let master_seed = cli.seed.or(params.random_seed).unwrap_or(0);
    let poisson_precision = env_f64("POISSON_PRECISION", 1e-9);
    let poisson_max_steps = env_u32("POISSON_MAX_STEPS", 1000);

    let (pool_template, layout) = build_initial_pool(&params);
    let total_leaves = layout.total_leaves();

    let failures: Vec<bool> = (0..cli.simulations.max(1))
        .into_par_iter()
        .map(|sim_index| {
            let output_base = if cli.simulations <= 1 {
                cli.output_base.clone()
            } else {
                format!("{}.{}", cli.output_base, sim_index)
            };
            match run_one_simulation(
                cli,
                &params,
                &genmap,
                &pool_template,
                &layout,
                total_leaves,
                master_seed,
                sim_index,
                poisson_precision,
                poisson_max_steps,
                &output_base,
            ) {
                Ok(()) => false,
                Err(e) if e.is_numerical() => {
                    eprintln!("simulation {} aborted: {}", sim_index, e);
                    true
                }
                Err(e) => {
                    eprintln!("simulation {} failed fatally: {}", sim_index, e);
                    true
                }
            }
        })
        .collect();

    Ok(failures.iter().filter(|&&f| f).count() as u64)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Builds the leaf-id layout and an (unused, per-population-size-only)
/// pool template that each simulation clones fresh nodes from; leaves are
/// assigned contiguously per population in declaration order, matching
/// `output::SampleLayout`.
fn build_initial_pool(params: &ParsedParams) -> (Vec<u32>, SampleLayout) {
    let sample_sizes: Vec<u32> = params.populations.iter().map(|p| p.sample_size).collect();
    (sample_sizes, SampleLayout::from_sample_sizes(&sample_sizes))
}

#[allow(clippy::too_many_arguments)]
fn run_one_simulation(
    cli: &Cli,
    params: &ParsedParams,
    genmap: &GeneticMap,
    sample_sizes: &[u32],
    layout: &SampleLayout,
    total_leaves: u32,
    master_seed: u64,
    sim_index: u64,
    poisson_precision: f64,
    poisson_max_steps: u32,
    output_base: &str,
) -> Result<(), CoalError> {
    let seed = seed_for_simulation(master_seed, sim_index);
    let num_pops = sample_sizes.len();

    let mut pool = NodePool::new(num_pops);
    let mut leaf_id = 0u32;
    for (pop, &n) in sample_sizes.iter().enumerate() {
        for _ in 0..n {
            pool.insert_new(pop, Seglist::whole_region(LeafsetMode::Tree, leaf_id, pop, num_pops), Gens(0.0));
            leaf_id += 1;
        }
    }

    let (demog, historical, sweeps) = params.compile_demography();
    let config = SchedulerConfig {
        hull_dist: None,
        gene_conversion: params.gene_conversion_params(),
        poisson_precision,
        poisson_max_steps,
        time_cap: None,
    };
    let rng = RandSource::from_seed(seed);
    let mut sim = Simulation::new(pool, demog, genmap.clone(), historical, total_leaves, config, rng);

    let recomb_recorder = Rc::new(RefCell::new(RecombLocRecorder::default()));
    let tree_stats_recorder = Rc::new(RefCell::new(TreeStatsRecorder::default()));
    let arg_edge_recorder = Rc::new(RefCell::new(ArgEdgeRecorder::default()));
    if cli.output_recomb_locs {
        sim.add_observer(Box::new(recomb_recorder.clone()) as Box<dyn EventObserver>);
    }
    if cli.tree_stats {
        sim.add_observer(Box::new(tree_stats_recorder.clone()) as Box<dyn EventObserver>);
    }
    if cli.output_arg_edges {
        sim.add_observer(Box::new(arg_edge_recorder.clone()) as Box<dyn EventObserver>);
    }

    loop {
        match sim.run()? {
            RunOutcome::FullyCoalesced => break,
            RunOutcome::Truncated => {
                return Err(CoalError::numerical("simulation truncated by a time cap before full coalescence"));
            }
            RunOutcome::SweepPending => {
                let (selected_pop, derived_pop, locus, duration) = sim
                    .take_pending_sweep()
                    .ok_or_else(|| CoalError::invariant("RunOutcome::SweepPending but no pending sweep was recorded"))?;
                let directive = sweeps
                    .get(&selected_pop)
                    .ok_or_else(|| CoalError::invariant(format!("sweep pending for population {} with no configured directive", selected_pop)))?;
                let pop_size_at_entry = sim.demog.size_at(selected_pop, sim.gen).get();
                let trajectory = params.sweep_trajectory(directive, pop_size_at_entry);
                let sweep_config = SweepConfig {
                    selected_pop,
                    derived_pop,
                    locus,
                    start_gen: sim.gen,
                    max_duration: duration,
                    trajectory: &trajectory,
                };
                sweep::run_sweep(&mut sim, &sweep_config)?;
            }
        }
    }

    let mut mutation_rng = RandSource::from_seed(seed ^ MUTATION_RNG_MIX);
    let mutation_params = MutationParams {
        mutation_rate: params.mutation_rate,
        region_length_bp: params.length_bp,
        site_model: params.site_model,
    };
    let mutations = mutation::place_mutations(&sim.arg, &mutation_params, &mut mutation_rng);

    if cli.matrix_output {
        let path = format!("{}.matrix", output_base);
        let mut file = std::fs::File::create(&path).map_err(|e| CoalError::io(format!("creating {}: {}", path, e)))?;
        output::write_matrix(&mut file, layout, &mutations, MATRIX_PRECISION, params.length_bp, params.site_model)?;
    } else {
        output::write_native(output_base, layout, &mutations, params.length_bp, params.site_model)?;
    }

    if cli.output_mut_gens {
        output::write_mutation_generations(output_base, &mutations)?;
    }
    if cli.output_recomb_locs {
        write_recomb_locs(output_base, &recomb_recorder.borrow())?;
    }
    if cli.tree_stats {
        write_tree_stats(output_base, &tree_stats_recorder.borrow())?;
    }
    if cli.output_arg_edges {
        write_arg_edges(output_base, &arg_edge_recorder.borrow())?;
    }

    Ok(())
}

fn write_recomb_locs(base: &str, recorder: &RecombLocRecorder) -> Result<(), CoalError> {
    use std::io::Write;
    let path = format!("{}.recombs", base);
    let mut out = std::fs::File::create(&path).map_err(|e| CoalError::io(format!("creating {}: {}", path, e)))?;
    for (gen, loc) in &recorder.locs {
        writeln!(out, "{:.6} {:.6}", gen.get(), loc.get()).map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    }
    Ok(())
}

fn write_tree_stats(base: &str, stats: &TreeStatsRecorder) -> Result<(), CoalError> {
    use std::io::Write;
    let path = format!("{}.treestats", base);
    let mut out = std::fs::File::create(&path).map_err(|e| CoalError::io(format!("creating {}: {}", path, e)))?;
    writeln!(out, "total_edge_length {:.6}", stats.total_edge_length).map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    writeln!(out, "coalescence_edges {}", stats.coalescence_edges).map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    writeln!(out, "recombination_edges {}", stats.recombination_edges).map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    writeln!(out, "gene_conversion_edges {}", stats.gene_conversion_edges).map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    writeln!(out, "migration_edges {}", stats.migration_edges).map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    Ok(())
}

fn write_arg_edges(base: &str, recorder: &ArgEdgeRecorder) -> Result<(), CoalError> {
    use std::io::Write;
    let path = format!("{}.argedges", base);
    let mut out = std::fs::File::create(&path).map_err(|e| CoalError::io(format!("creating {}: {}", path, e)))?;
    for edge in &recorder.edges {
        writeln!(out, "{} {} {:.6} {:.6} {:?} {}", edge.child, edge.parent, edge.child_gen.get(), edge.parent_gen.get(), edge.kind, edge.pop)
            .map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    }
    Ok(())
}
