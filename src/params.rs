//! Parameter file parsing (spec.md §6): a line-oriented key/value format.
//! Unrecognised directives fail with the offending line number, matching
//! the error-context convention of `crate::error`.

use crate::demography::DemographicModel;
use crate::error::CoalError;
use crate::historical::{HistoricalEvent, HistoricalEventKind, HistoricalQueue};
use crate::leafset::PopIdx;
use crate::mutation::SiteModel;
use crate::population::{PopulationDef, PopulationTable};
use crate::rates::GeneConversionParams;
use crate::trajectory::DeterministicSweepTraj;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneConversionModel {
    Uniform,
    Geometric,
}

#[derive(Debug, Clone)]
pub struct SweepDirective {
    pub selected_pop: PopIdx,
    pub derived_pop: PopIdx,
    pub gen: f64,
    pub duration: f64,
    pub selection_coeff: f64,
    pub final_freq: f64,
    pub locus_bp: f64,
}

#[derive(Debug, Clone)]
enum Directive {
    ChangeSize { pop: PopIdx, gen: f64, size: f64 },
    MigrationRate { from: PopIdx, to: PopIdx, gen: f64, rate: f64 },
    Merge { src: PopIdx, dst: PopIdx, gen: f64 },
    Split { src: PopIdx, dst: PopIdx, gen: f64, fraction: f64 },
    Admix { src: PopIdx, dst: PopIdx, gen: f64, prob: f64 },
    Bottleneck { pop: PopIdx, gen: f64, size: f64, duration: f64, restore_size: f64 },
    Sweep(SweepDirective),
}

#[derive(Debug, Clone)]
pub struct ParsedParams {
    pub length_bp: f64,
    pub mutation_rate: f64,
    pub recomb_file: Option<PathBuf>,
    pub gc_ratio: f64,
    pub gc_mean_tract_bp: f64,
    pub gc_min_tract_bp: f64,
    pub gc_model: GeneConversionModel,
    pub site_model: SiteModel,
    pub random_seed: Option<u64>,
    pub populations: PopulationTable,
    directives: Vec<(f64, Directive)>,
}

impl Default for ParsedParams {
    fn default() -> Self {
        ParsedParams {
            length_bp: 0.0,
            mutation_rate: 0.0,
            recomb_file: None,
            gc_ratio: 0.0,
            gc_mean_tract_bp: 0.0,
            gc_min_tract_bp: 0.0,
            gc_model: GeneConversionModel::Uniform,
            site_model: SiteModel::InfiniteSites,
            random_seed: None,
            populations: PopulationTable::new(),
            directives: Vec::new(),
        }
    }
}

impl ParsedParams {
    pub fn parse(text: &str) -> Result<Self, CoalError> {
        let mut p = ParsedParams::default();
        let mut next_pop_idx: PopIdx = 0;
        let mut pop_labels: HashMap<String, PopIdx> = HashMap::new();

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let directive = fields.next().unwrap();
            let rest: Vec<&str> = fields.collect();
            let err_here = |msg: String| CoalError::configuration(format!("parameter file line {}: {}", lineno + 1, msg));

            match directive {
                "length" => p.length_bp = parse_f64(&rest, 0, &err_here)?,
                "mutation_rate" => p.mutation_rate = parse_f64(&rest, 0, &err_here)?,
                "recomb_file" => {
                    p.recomb_file = Some(PathBuf::from(rest.get(0).ok_or_else(|| err_here("recomb_file requires a path".into()))?));
                }
                "gene_conversion_rate" => p.gc_ratio = parse_f64(&rest, 0, &err_here)?,
                "gene_conversion_mean_tract_length" => p.gc_mean_tract_bp = parse_f64(&rest, 0, &err_here)?,
                "gene_conversion_min_tract_length" => p.gc_min_tract_bp = parse_f64(&rest, 0, &err_here)?,
                "gene_conversion_model" => {
                    p.gc_model = match rest.get(0).map(|s| *s) {
                        Some("uniform") => GeneConversionModel::Uniform,
                        Some("geometric") => GeneConversionModel::Geometric,
                        _ => return Err(err_here("gene_conversion_model must be 'uniform' or 'geometric'".into())),
                    };
                }
                "infinite_sites" => {
                    let v = parse_f64(&rest, 0, &err_here)?;
                    p.site_model = if v != 0.0 { SiteModel::InfiniteSites } else { SiteModel::FiniteSites };
                }
                "random_seed" => p.random_seed = Some(parse_f64(&rest, 0, &err_here)? as u64),
                "pop_define" => {
                    let label = rest.get(1).ok_or_else(|| err_here("pop_define requires '<id> <label>'".into()))?;
                    let idx = next_pop_idx;
                    next_pop_idx += 1;
                    pop_labels.insert(label.to_string(), idx);
                    p.populations.push(PopulationDef {
                        index: idx,
                        label: label.to_string(),
                        initial_size: 0.0,
                        sample_size: 0,
                    });
                }
                "pop_size" => {
                    let (idx, size) = parse_pop_and_value(&rest, &pop_labels, &err_here)?;
                    if let Some(def) = p.populations_mut_get(idx) {
                        def.initial_size = size;
                    }
                }
                "sample_size" => {
                    let (idx, n) = parse_pop_and_value(&rest, &pop_labels, &err_here)?;
                    if let Some(def) = p.populations_mut_get(idx) {
                        def.sample_size = n as u32;
                    }
                }
                "pop_event" => {
                    let kind = rest.get(0).ok_or_else(|| err_here("pop_event requires a sub-kind".into()))?;
                    let d = parse_pop_event(kind, &rest[1..], &pop_labels, &err_here)?;
                    let gen = directive_gen(&d);
                    p.directives.push((gen, d));
                }
                other => return Err(err_here(format!("unrecognised directive '{}'", other))),
            }
        }

        if p.length_bp <= 0.0 {
            return Err(CoalError::configuration("length must be > 0"));
        }
        if p.populations.is_empty() {
            return Err(CoalError::configuration("no populations declared (need at least one pop_define)"));
        }
        if p.populations.total_sample_size() == 0 {
            return Err(CoalError::configuration("total sample size is zero"));
        }
        Ok(p)
    }

    fn populations_mut_get(&mut self, idx: PopIdx) -> Option<&mut PopulationDef> {
        // PopulationTable doesn't expose a mutable getter by design (it's
        // meant to be append-only after construction); directly poke the
        // one field we need to update during parsing via a narrow path.
        self.populations.get_mut(idx)
    }

    /// Builds the runtime `DemographicModel` and `HistoricalQueue` from the
    /// accumulated directives, plus the registry of sweep configurations
    /// keyed by selected-population index (spec.md §4.7).
    pub fn compile_demography(&self) -> (DemographicModel, HistoricalQueue, HashMap<PopIdx, SweepDirective>) {
        let num_pops = self.populations.len();
        let initial_sizes: Vec<f64> = self.populations.iter().map(|p| p.initial_size.max(1.0)).collect();
        let mut demog = DemographicModel::new(num_pops, &initial_sizes);

        let mut size_points: HashMap<PopIdx, Vec<(f64, f64)>> = HashMap::new();
        let mut migr_points: HashMap<(PopIdx, PopIdx), Vec<(f64, f64)>> = HashMap::new();
        for (pop, size) in self.populations.iter().map(|p| (p.index, p.initial_size.max(1.0))) {
            size_points.entry(pop).or_insert_with(Vec::new).push((0.0, size));
        }

        let mut events = Vec::new();
        let mut sweeps = HashMap::new();

        for (gen, d) in &self.directives {
            match d {
                Directive::ChangeSize { pop, gen, size } => {
                    size_points.entry(*pop).or_insert_with(Vec::new).push((*gen, *size));
                    events.push(HistoricalEvent {
                        gen: crate::units::Gens(*gen),
                        kind: HistoricalEventKind::ChangeSize { pop: *pop },
                    });
                }
                Directive::Bottleneck { pop, gen, size, duration, restore_size } => {
                    size_points.entry(*pop).or_insert_with(Vec::new).push((*gen, *size));
                    size_points.entry(*pop).or_insert_with(Vec::new).push((*gen + *duration, *restore_size));
                    events.push(HistoricalEvent {
                        gen: crate::units::Gens(*gen),
                        kind: HistoricalEventKind::ChangeSize { pop: *pop },
                    });
                    events.push(HistoricalEvent {
                        gen: crate::units::Gens(*gen + *duration),
                        kind: HistoricalEventKind::ChangeSize { pop: *pop },
                    });
                }
                Directive::MigrationRate { from, to, gen, rate } => {
                    migr_points.entry((*from, *to)).or_insert_with(Vec::new).push((*gen, *rate));
                    events.push(HistoricalEvent {
                        gen: crate::units::Gens(*gen),
                        kind: HistoricalEventKind::MigrationRateChange { from: *from, to: *to },
                    });
                }
                Directive::Merge { src, dst, gen } => {
                    events.push(HistoricalEvent {
                        gen: crate::units::Gens(*gen),
                        kind: HistoricalEventKind::Merge { src: *src, dst: *dst },
                    });
                }
                Directive::Split { src, dst, gen, fraction } => {
                    events.push(HistoricalEvent {
                        gen: crate::units::Gens(*gen),
                        kind: HistoricalEventKind::Split { src: *src, dst: *dst, fraction: *fraction },
                    });
                }
                Directive::Admix { src, dst, gen, prob } => {
                    events.push(HistoricalEvent {
                        gen: crate::units::Gens(*gen),
                        kind: HistoricalEventKind::Admix { src: *src, dst: *dst, prob: *prob },
                    });
                }
                Directive::Sweep(sweep) => {
                    sweeps.insert(sweep.selected_pop, sweep.clone());
                    events.push(HistoricalEvent {
                        gen: crate::units::Gens(sweep.gen),
                        kind: HistoricalEventKind::SweepStart {
                            pop: sweep.selected_pop,
                            derived_pop: sweep.derived_pop,
                            locus: crate::units::PhysPos(sweep.locus_bp / self.length_bp),
                            duration: crate::units::GensDelta(sweep.duration),
                        },
                    });
                }
            }
        }

        for (pop, mut points) in size_points {
            points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            demog.set_size_schedule(pop, &points);
        }
        for ((from, to), mut points) in migr_points {
            points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            demog.set_migration_schedule(from, to, &points);
        }

        (demog, HistoricalQueue::new(events), sweeps)
    }

    pub fn gene_conversion_params(&self) -> GeneConversionParams {
        GeneConversionParams {
            ratio: self.gc_ratio,
            mean_tract_len: self.gc_mean_tract_bp / self.length_bp,
            min_tract_len: self.gc_min_tract_bp / self.length_bp,
            model: match self.gc_model {
                GeneConversionModel::Uniform => crate::rates::GcTractModel::Uniform,
                GeneConversionModel::Geometric => crate::rates::GcTractModel::Geometric,
            },
        }
    }

    pub fn sweep_trajectory(&self, directive: &SweepDirective, pop_size_at_entry: f64) -> DeterministicSweepTraj {
        DeterministicSweepTraj {
            selection_coeff: directive.selection_coeff,
            final_freq: directive.final_freq,
            pop_size_at_entry,
        }
    }
}

/// Derives a simulation's seed from the configured master seed and its
/// index in the batch, so that each of `--simulations N` independent runs
/// gets its own RNG stream without the batch's overall randomness
/// depending on how many simulations came before it (spec.md §7: "each
/// simulation uses an independent seed derived deterministically from the
/// configured master seed and the simulation index").
pub fn seed_for_simulation(master_seed: u64, sim_index: u64) -> u64 {
    let mut x = master_seed ^ sim_index.wrapping_mul(0xD6E8_FEB8_6659_FD93);
    x ^= x >> 32;
    x = x.wrapping_mul(0xD6E8_FEB8_6659_FD93);
    x ^= x >> 32;
    x
}

#[cfg(test)]
mod seed_tests {
    use super::seed_for_simulation;

    #[test]
    fn distinct_indices_give_distinct_seeds() {
        let a = seed_for_simulation(42, 0);
        let b = seed_for_simulation(42, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn same_inputs_are_deterministic() {
        assert_eq!(seed_for_simulation(7, 3), seed_for_simulation(7, 3));
    }
}

fn directive_gen(d: &Directive) -> f64 {
    match d {
        Directive::ChangeSize { gen, .. } => *gen,
        Directive::MigrationRate { gen, .. } => *gen,
        Directive::Merge { gen, .. } => *gen,
        Directive::Split { gen, .. } => *gen,
        Directive::Admix { gen, .. } => *gen,
        Directive::Bottleneck { gen, .. } => *gen,
        Directive::Sweep(s) => s.gen,
    }
}

fn parse_f64(fields: &[&str], idx: usize, err: &impl Fn(String) -> CoalError) -> Result<f64, CoalError> {
    fields
        .get(idx)
        .ok_or_else(|| err("missing numeric field".into()))?
        .parse::<f64>()
        .map_err(|_| err("expected a number".into()))
}

fn resolve_pop(label: &str, pop_labels: &HashMap<String, PopIdx>, err: &impl Fn(String) -> CoalError) -> Result<PopIdx, CoalError> {
    pop_labels.get(label).copied().ok_or_else(|| err(format!("unknown population '{}'", label)))
}

fn parse_pop_and_value(rest: &[&str], pop_labels: &HashMap<String, PopIdx>, err: &impl Fn(String) -> CoalError) -> Result<(PopIdx, f64), CoalError> {
    let label = rest.get(0).ok_or_else(|| err("expected '<id> <value>'".into()))?;
    let idx = resolve_pop(label, pop_labels, err)?;
    let value = parse_f64(rest, 1, err)?;
    Ok((idx, value))
}

fn parse_pop_event(kind: &str, rest: &[&str], pop_labels: &HashMap<String, PopIdx>, err: &impl Fn(String) -> CoalError) -> Result<Directive, CoalError> {
    match kind {
        "change_size" => {
            let (pop, gen) = parse_pop_and_value(rest, pop_labels, err)?;
            let size = parse_f64(rest, 2, err)?;
            Ok(Directive::ChangeSize { pop, gen, size })
        }
        "migration_rate" => {
            let from = resolve_pop(rest.get(0).ok_or_else(|| err("missing from population".into()))?, pop_labels, err)?;
            let to = resolve_pop(rest.get(1).ok_or_else(|| err("missing to population".into()))?, pop_labels, err)?;
            let gen = parse_f64(rest, 2, err)?;
            let rate = parse_f64(rest, 3, err)?;
            Ok(Directive::MigrationRate { from, to, gen, rate })
        }
        "merge" => {
            let src = resolve_pop(rest.get(0).ok_or_else(|| err("missing source population".into()))?, pop_labels, err)?;
            let dst = resolve_pop(rest.get(1).ok_or_else(|| err("missing destination population".into()))?, pop_labels, err)?;
            let gen = parse_f64(rest, 2, err)?;
            Ok(Directive::Merge { src, dst, gen })
        }
        "split" => {
            let src = resolve_pop(rest.get(0).ok_or_else(|| err("missing source population".into()))?, pop_labels, err)?;
            let dst = resolve_pop(rest.get(1).ok_or_else(|| err("missing destination population".into()))?, pop_labels, err)?;
            let gen = parse_f64(rest, 2, err)?;
            let fraction = parse_f64(rest, 3, err)?;
            Ok(Directive::Split { src, dst, gen, fraction })
        }
        "admix" => {
            let src = resolve_pop(rest.get(0).ok_or_else(|| err("missing source population".into()))?, pop_labels, err)?;
            let dst = resolve_pop(rest.get(1).ok_or_else(|| err("missing destination population".into()))?, pop_labels, err)?;
            let gen = parse_f64(rest, 2, err)?;
            let prob = parse_f64(rest, 3, err)?;
            Ok(Directive::Admix { src, dst, gen, prob })
        }
        "bottleneck" => {
            let (pop, gen) = parse_pop_and_value(rest, pop_labels, err)?;
            let size = parse_f64(rest, 2, err)?;
            let duration = parse_f64(rest, 3, err)?;
            let restore_size = parse_f64(rest, 4, err)?;
            Ok(Directive::Bottleneck { pop, gen, size, duration, restore_size })
        }
        "sweep" => {
            let selected_pop = resolve_pop(rest.get(0).ok_or_else(|| err("missing selected population".into()))?, pop_labels, err)?;
            let derived_pop = resolve_pop(rest.get(1).ok_or_else(|| err("missing derived population".into()))?, pop_labels, err)?;
            let gen = parse_f64(rest, 2, err)?;
            let duration = parse_f64(rest, 3, err)?;
            let selection_coeff = parse_f64(rest, 4, err)?;
            let final_freq = parse_f64(rest, 5, err)?;
            let locus_bp = parse_f64(rest, 6, err)?;
            Ok(Directive::Sweep(SweepDirective {
                selected_pop,
                derived_pop,
                gen,
                duration,
                selection_coeff,
                final_freq,
                locus_bp,
            }))
        }
        other => Err(err(format!("unrecognised pop_event sub-kind '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_single_population_file() {
        let text = "length 1000000\nmutation_rate 1.5e-8\npop_define 0 pop1\npop_size 0 10000\nsample_size 0 100\n";
        let params = ParsedParams::parse(text).unwrap();
        assert_eq!(params.populations.total_sample_size(), 100);
        assert!((params.length_bp - 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn empty_file_is_a_configuration_error() {
        assert!(ParsedParams::parse("").is_err());
    }

    #[test]
    fn unrecognised_directive_reports_line_number() {
        let text = "length 100\nbogus_directive 1 2 3\n";
        let err = ParsedParams::parse(text).unwrap_err();
        assert!(format!("{}", err).contains("line 2"));
    }

    #[test]
    fn compiles_change_size_into_piecewise_schedule() {
        let text = "length 1000\npop_define 0 pop1\npop_size 0 10000\nsample_size 0 10\npop_event change_size pop1 500 2000\n";
        let params = ParsedParams::parse(text).unwrap();
        let (demog, queue, _sweeps) = params.compile_demography();
        assert!((demog.size_at(0, crate::units::Gens(100.0)).get() - 10000.0).abs() < 1e-6);
        assert!((demog.size_at(0, crate::units::Gens(600.0)).get() - 2000.0).abs() < 1e-6);
        assert_eq!(queue.next_gen().get(), 500.0);
    }
}
