//! Genetic map: physical <-> genetic coordinate conversion by monotone
//! interpolation over a user-supplied table, following `cosi/genmap.cc`'s
//! convention that the first table entry also sets the rate to its left,
//! and the last entry extends the rate to the end of the region.

use crate::error::CoalError;
use crate::units::{GenLen, GenPos, PhysLen, PhysPos};
use std::fs;
use std::path::Path;

/// One physical<->genetic breakpoint: `pos_bp` is the physical position in
/// basepairs, `rate_cm_per_bp` the recombination rate (cM/bp) applying from
/// the previous breakpoint up to this one.
#[derive(Debug, Clone, Copy)]
struct MapPoint {
    ploc: f64, // in [0,1]
    cum_gen: f64, // cumulative genetic distance in cM from the region start
}

/// Maps physical positions in `[0, 1)` to genetic positions in centimorgans
/// and back, by piecewise-linear interpolation between table breakpoints.
#[derive(Debug, Clone)]
pub struct GeneticMap {
    points: Vec<MapPoint>,
    length_bp: f64,
    total_genlen_cm: f64,
}

impl GeneticMap {
    /// A uniform map: one centimorgan per unit physical length, total
    /// length `length_bp` basepairs, constant rate.
    pub fn uniform(length_bp: f64, genlen_cm: f64) -> Self {
        GeneticMap {
            points: vec![
                MapPoint {
                    ploc: 0.0,
                    cum_gen: 0.0,
                },
                MapPoint {
                    ploc: 1.0,
                    cum_gen: genlen_cm,
                },
            ],
            length_bp,
            total_genlen_cm: genlen_cm,
        }
    }

    pub fn from_file(path: &Path, length_bp: f64) -> Result<Self, CoalError> {
        let text = fs::read_to_string(path).map_err(|e| {
            CoalError::io(format!("reading genetic map file {:?}: {}", path, e))
        })?;
        Self::parse(&text, length_bp)
    }

    /// Parses whitespace-separated `<position_bp> <rate_per_bp>` lines,
    /// strictly increasing in position. The first entry's rate extends to
    /// the region start; the last entry's rate extends to the region end,
    /// matching the cosi2 convention.
    pub fn parse(text: &str, length_bp: f64) -> Result<Self, CoalError> {
        let mut raw: Vec<(f64, f64)> = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let pos: f64 = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    CoalError::configuration(format!(
                        "genetic map line {}: expected '<position> <rate>'",
                        lineno + 1
                    ))
                })?;
            let rate: f64 = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    CoalError::configuration(format!(
                        "genetic map line {}: expected '<position> <rate>'",
                        lineno + 1
                    ))
                })?;
            if rate <= 0.0 {
                return Err(CoalError::configuration(format!(
                    "genetic map line {}: rate must be > 0",
                    lineno + 1
                )));
            }
            if let Some(&(last_pos, _)) = raw.last() {
                if pos <= last_pos {
                    return Err(CoalError::configuration(format!(
                        "genetic map line {}: positions must be strictly increasing",
                        lineno + 1
                    )));
                }
            }
            raw.push((pos, rate));
        }
        if raw.is_empty() {
            return Err(CoalError::configuration("genetic map file has no entries"));
        }

        let mut points = Vec::with_capacity(raw.len() + 2);
        let mut cum = 0.0;
        let mut last_pos = 0.0;
        // The first entry's rate also governs [0, first_pos).
        let first_rate = raw[0].1;
        let mut last_rate = first_rate;
        points.push(MapPoint {
            ploc: 0.0,
            cum_gen: 0.0,
        });
        for &(pos, rate) in &raw {
            if pos > length_bp {
                break;
            }
            cum += (pos - last_pos) * last_rate;
            points.push(MapPoint {
                ploc: pos / length_bp,
                cum_gen: cum,
            });
            last_pos = pos;
            last_rate = rate;
        }
        cum += (length_bp - last_pos) * last_rate;
        points.push(MapPoint {
            ploc: 1.0,
            cum_gen: cum,
        });

        Ok(GeneticMap {
            points,
            length_bp,
            total_genlen_cm: cum,
        })
    }

    pub fn length_bp(&self) -> f64 {
        self.length_bp
    }

    pub fn total_genetic_length(&self) -> GenLen {
        GenLen(self.total_genlen_cm)
    }

    /// Genetic position (cM) corresponding to a physical position.
    pub fn genetic_pos(&self, ploc: PhysPos) -> GenPos {
        let x = ploc.get();
        GenPos(interp(&self.points, x, |p| p.ploc, |p| p.cum_gen))
    }

    /// Physical position corresponding to a genetic position (inverse of
    /// `genetic_pos`); used to place a recombination breakpoint uniformly
    /// in genetic-map space.
    pub fn physical_pos(&self, gloc: GenPos) -> PhysPos {
        let y = gloc.get();
        PhysPos(interp(&self.points, y, |p| p.cum_gen, |p| p.ploc))
    }

    /// Draws a physical location for a recombination breakpoint uniform in
    /// genetic-map space, as required by spec.md §4.5 ("`loc` is uniformly
    /// distributed in genetic-map space").
    pub fn sample_breakpoint(&self, unit_uniform: f64) -> PhysPos {
        self.physical_pos(GenPos(unit_uniform * self.total_genlen_cm))
    }
}

/// Linear interpolation/extrapolation-free lookup: `x` must lie within the
/// range spanned by `key(points[0])..key(points[last])`; values outside are
/// clamped to the endpoints.
fn interp(points: &[MapPoint], x: f64, key: impl Fn(&MapPoint) -> f64, val: impl Fn(&MapPoint) -> f64) -> f64 {
    if x <= key(&points[0]) {
        return val(&points[0]);
    }
    let last = points.len() - 1;
    if x >= key(&points[last]) {
        return val(&points[last]);
    }
    // Binary search for the bracketing pair.
    let mut lo = 0;
    let mut hi = last;
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        if key(&points[mid]) <= x {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let (x0, y0) = (key(&points[lo]), val(&points[lo]));
    let (x1, y1) = (key(&points[hi]), val(&points[hi]));
    if x1 > x0 {
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    } else {
        y0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_map_roundtrips() {
        let map = GeneticMap::uniform(1_000_000.0, 100.0);
        let phys = PhysPos(0.37);
        let gen = map.genetic_pos(phys);
        assert!((gen.get() - 37.0).abs() < 1e-9);
        let back = map.physical_pos(gen);
        assert!((back.get() - 0.37).abs() < 1e-9);
    }

    #[test]
    fn parsed_map_extends_first_and_last_rate() {
        let text = "1000 1e-8\n2000 2e-8\n";
        let map = GeneticMap::parse(text, 3000.0).unwrap();
        // Left of the first entry uses the first entry's rate (1e-8 cM/bp
        // after scaling by 1e6 in the file's convention -- here we treat
        // rate units directly as cM/bp for simplicity of the test).
        assert!(map.genetic_pos(PhysPos(0.0)).get() == 0.0);
        assert!(map.total_genetic_length().0 > 0.0);
    }

    #[test]
    fn rejects_non_increasing_positions() {
        let text = "1000 1e-8\n500 2e-8\n";
        assert!(GeneticMap::parse(text, 3000.0).is_err());
    }

    #[test]
    fn rejects_zero_rate() {
        let text = "1000 0.0\n";
        assert!(GeneticMap::parse(text, 3000.0).is_err());
    }
}
