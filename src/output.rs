//! Output adapters (spec.md §6): the native per-population `.pos-<p>` /
//! `.hap-<p>` file pair, and the single-stream compatibility haplotype-matrix
//! format. Both are pure serializers over an already-placed mutation list;
//! they own no simulation state.

use crate::error::CoalError;
use crate::leafset::{LeafId, PopIdx};
use crate::mutation::{Mutation, SiteModel};
use std::io::Write;

/// Maps dense leaf ids to the population they were sampled from, and gives
/// each population's contiguous leaf-id range. Leaves are assigned
/// contiguously by population in declaration order (population 0 gets ids
/// `[0, sample_size(0))`, population 1 the next block, and so on), matching
/// how `crate::params` builds the initial node pool.
#[derive(Debug, Clone)]
pub struct SampleLayout {
    pop_ranges: Vec<(LeafId, LeafId)>,
}

impl SampleLayout {
    pub fn from_sample_sizes(sample_sizes: &[u32]) -> Self {
        let mut pop_ranges = Vec::with_capacity(sample_sizes.len());
        let mut next = 0u32;
        for &n in sample_sizes {
            pop_ranges.push((next, next + n));
            next += n;
        }
        SampleLayout { pop_ranges }
    }

    pub fn total_leaves(&self) -> u32 {
        self.pop_ranges.last().map(|&(_, hi)| hi).unwrap_or(0)
    }

    pub fn num_pops(&self) -> usize {
        self.pop_ranges.len()
    }

    pub fn leaves_of(&self, pop: PopIdx) -> std::ops::Range<LeafId> {
        let (lo, hi) = self.pop_ranges[pop];
        lo..hi
    }
}

/// Mutations sorted by physical position, each carrying the dense `snp_id`
/// assigned by that order; stable across every file written for one
/// simulation, per spec.md §6.
fn sorted_with_ids(mutations: &[Mutation]) -> Vec<(usize, &Mutation)> {
    let mut indexed: Vec<&Mutation> = mutations.iter().collect();
    indexed.sort_by(|a, b| a.position.partial_cmp(&b.position).unwrap());
    indexed.into_iter().enumerate().collect()
}

/// Writes `<base>.pos-<p>` / `<base>.hap-<p>` for every population, per
/// spec.md §6's native output format. `site_model` tells `write_pos_file`
/// how to recover an integer basepair position from `m.position`: already
/// an integer basepair under `FiniteSites`, a `[0,1)` fraction under
/// `InfiniteSites` (spec.md §4.6).
pub fn write_native(base: &str, layout: &SampleLayout, mutations: &[Mutation], length_bp: f64, site_model: SiteModel) -> Result<(), CoalError> {
    let sites = sorted_with_ids(mutations);
    for pop in 0..layout.num_pops() {
        write_pos_file(base, pop, &sites, length_bp, site_model)?;
        write_hap_file(base, pop, layout, &sites)?;
    }
    Ok(())
}

fn write_pos_file(base: &str, pop: PopIdx, sites: &[(usize, &Mutation)], length_bp: f64, site_model: SiteModel) -> Result<(), CoalError> {
    let path = format!("{}.pos-{}", base, pop);
    let mut out = std::fs::File::create(&path).map_err(|e| CoalError::io(format!("creating {}: {}", path, e)))?;
    for &(snp_id, m) in sites {
        let chrom_pos = match site_model {
            SiteModel::InfiniteSites => (m.position * length_bp).round() as u64,
            SiteModel::FiniteSites => m.position as u64,
        };
        writeln!(out, "{} {} A T", snp_id, chrom_pos).map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    }
    Ok(())
}

fn write_hap_file(base: &str, pop: PopIdx, layout: &SampleLayout, sites: &[(usize, &Mutation)]) -> Result<(), CoalError> {
    let path = format!("{}.hap-{}", base, pop);
    let mut out = std::fs::File::create(&path).map_err(|e| CoalError::io(format!("creating {}: {}", path, e)))?;
    for leaf in layout.leaves_of(pop) {
        let mut line = String::with_capacity(sites.len());
        for &(_, m) in sites {
            let carries = m.leafset.leaves().map(|ls| ls.contains(&leaf)).unwrap_or(false);
            line.push(if carries { '1' } else { '0' });
        }
        writeln!(out, "{}", line).map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    }
    Ok(())
}

/// Writes the compatibility haplotype-matrix format (spec.md §6) to a
/// single stream: a header block with segment count and `[0,1)` physical
/// positions at `precision` decimal digits, then one `0`/`1` row per
/// sampled chromosome across every population, in leaf-id order. Under
/// `SiteModel::FiniteSites`, `m.position` is already an integer basepair,
/// so it is normalised back to `[0,1)` by dividing by `length_bp` before
/// formatting, matching this format's documented position convention.
pub fn write_matrix(
    writer: &mut dyn Write,
    layout: &SampleLayout,
    mutations: &[Mutation],
    precision: usize,
    length_bp: f64,
    site_model: SiteModel,
) -> Result<(), CoalError> {
    let sites = sorted_with_ids(mutations);
    writeln!(writer, "{}", sites.len()).map_err(|e| CoalError::io(e.to_string()))?;
    let positions: Vec<String> = sites
        .iter()
        .map(|&(_, m)| {
            let frac = match site_model {
                SiteModel::InfiniteSites => m.position,
                SiteModel::FiniteSites => m.position / length_bp,
            };
            format!("{:.*}", precision, frac)
        })
        .collect();
    writeln!(writer, "{}", positions.join(" ")).map_err(|e| CoalError::io(e.to_string()))?;
    for leaf in 0..layout.total_leaves() {
        let mut line = String::with_capacity(sites.len());
        for &(_, m) in &sites {
            let carries = m.leafset.leaves().map(|ls| ls.contains(&leaf)).unwrap_or(false);
            line.push(if carries { '1' } else { '0' });
        }
        writeln!(writer, "{}", line).map_err(|e| CoalError::io(e.to_string()))?;
    }
    Ok(())
}

/// Writes `<base>.mutgens`: one `<snp_id> <generation>` line per mutation
/// in the same order/ids as the native and matrix outputs, for the
/// `--output-mut-gens` diagnostic toggle (spec.md §6).
pub fn write_mutation_generations(base: &str, mutations: &[Mutation]) -> Result<(), CoalError> {
    let sites = sorted_with_ids(mutations);
    let path = format!("{}.mutgens", base);
    let mut out = std::fs::File::create(&path).map_err(|e| CoalError::io(format!("creating {}: {}", path, e)))?;
    for (snp_id, m) in sites {
        writeln!(out, "{} {:.6}", snp_id, m.generation.get()).map_err(|e| CoalError::io(format!("writing {}: {}", path, e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leafset::{Leafset, LeafsetMode};
    use crate::units::Gens;

    fn mutation(pos: f64, carriers: &[LeafId]) -> Mutation {
        let mut ls = Leafset::empty();
        for &c in carriers {
            ls = Leafset::union(&ls, &Leafset::singleton(LeafsetMode::Tree, c, 0, 1));
        }
        Mutation {
            position: pos,
            leafset: ls,
            generation: Gens(10.0),
            population: 0,
        }
    }

    #[test]
    fn matrix_output_normalises_finite_site_positions_back_to_unit_interval() {
        let layout = SampleLayout::from_sample_sizes(&[1]);
        let muts = vec![mutation(250_000.0, &[0])];
        let mut buf: Vec<u8> = Vec::new();
        write_matrix(&mut buf, &layout, &muts, 2, 1_000_000.0, SiteModel::FiniteSites).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let positions_line = text.lines().nth(1).unwrap();
        assert_eq!(positions_line, "0.25");
    }

    #[test]
    fn layout_assigns_contiguous_ranges_per_population() {
        let layout = SampleLayout::from_sample_sizes(&[3, 2]);
        assert_eq!(layout.leaves_of(0), 0..3);
        assert_eq!(layout.leaves_of(1), 3..5);
        assert_eq!(layout.total_leaves(), 5);
    }

    #[test]
    fn matrix_output_has_one_row_per_leaf_and_correct_bits() {
        let layout = SampleLayout::from_sample_sizes(&[2]);
        let muts = vec![mutation(0.25, &[0]), mutation(0.75, &[1])];
        let mut buf: Vec<u8> = Vec::new();
        write_matrix(&mut buf, &layout, &muts, 6, 1_000_000.0, SiteModel::InfiniteSites).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "2");
        lines.next().unwrap(); // positions line
        assert_eq!(lines.next().unwrap(), "10");
        assert_eq!(lines.next().unwrap(), "01");
    }
}
