//! Allele-frequency trajectories for the selective-sweep driver (spec.md
//! §4.7): either read from a file of `(generation, frequency)` pairs, or
//! generated deterministically by solving the logistic
//! `f' = s f (1 - f)` backward from a final frequency, following
//! `cosi/traj.cc`'s `DeterministicSweepTraj`.

use crate::error::CoalError;
use crate::units::Freq;
use std::fs;
use std::path::Path;

/// A frequency trajectory for the selected allele, indexed by generations
/// elapsed *since entering the sweep* (`t = 0` at entry, increasing as the
/// simulation moves further into the past).
pub trait FreqTraj {
    /// Frequency of the derived allele at `t` generations since entry.
    /// Returns `None` once the trajectory has nothing left to say (table
    /// exhausted, or past the deterministic origin) -- spec.md §4.8's
    /// "trajectory exhausted" failure case.
    fn freq_at(&self, t: f64) -> Option<Freq>;
}

/// A trajectory read from an external file: whitespace-separated
/// `<t_since_entry> <frequency>` pairs, strictly increasing in `t`,
/// linearly interpolated between knots.
#[derive(Debug, Clone)]
pub struct TrajFromFile {
    points: Vec<(f64, f64)>,
}

impl TrajFromFile {
    pub fn from_file(path: &Path) -> Result<Self, CoalError> {
        let text = fs::read_to_string(path).map_err(|e| CoalError::io(format!("reading trajectory file {:?}: {}", path, e)))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, CoalError> {
        let mut points = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let t: f64 = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| CoalError::configuration(format!("trajectory line {}: expected '<t> <freq>'", lineno + 1)))?;
            let f: f64 = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| CoalError::configuration(format!("trajectory line {}: expected '<t> <freq>'", lineno + 1)))?;
            if !(0.0..=1.0).contains(&f) {
                return Err(CoalError::configuration(format!("trajectory line {}: frequency must be in [0,1]", lineno + 1)));
            }
            if let Some(&(last_t, _)) = points.last() {
                if t <= last_t {
                    return Err(CoalError::configuration(format!("trajectory line {}: t must be strictly increasing", lineno + 1)));
                }
            }
            points.push((t, f));
        }
        if points.is_empty() {
            return Err(CoalError::configuration("trajectory file has no entries"));
        }
        Ok(TrajFromFile { points })
    }
}

impl FreqTraj for TrajFromFile {
    fn freq_at(&self, t: f64) -> Option<Freq> {
        let last = self.points.len() - 1;
        if t > self.points[last].0 {
            return None;
        }
        if t <= self.points[0].0 {
            return Some(Freq(self.points[0].1));
        }
        let mut lo = 0;
        let mut hi = last;
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.points[mid].0 <= t {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        let (t0, f0) = self.points[lo];
        let (t1, f1) = self.points[hi];
        let frac = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
        Some(Freq(f0 + (f1 - f0) * frac))
    }
}

/// The deterministic backward logistic solve of `cosi/traj.cc`:
/// frequency at entry (`t=0`) is `final_freq`, decaying toward the origin
/// as `t` grows, until it reaches `1/(2N)`.
#[derive(Debug, Clone, Copy)]
pub struct DeterministicSweepTraj {
    pub selection_coeff: f64,
    pub final_freq: f64,
    pub pop_size_at_entry: f64,
}

impl DeterministicSweepTraj {
    /// `t`, measured backward from entry, at which the logistic curve
    /// reaches the origin frequency `1/(2N)`.
    pub fn origin_time(&self) -> f64 {
        let origin_freq = 1.0 / (2.0 * self.pop_size_at_entry);
        let c = (1.0 - self.final_freq) / self.final_freq.max(1e-300);
        ((1.0 / origin_freq - 1.0) / c).max(1e-300).ln() / self.selection_coeff
    }
}

impl FreqTraj for DeterministicSweepTraj {
    fn freq_at(&self, t: f64) -> Option<Freq> {
        if t < 0.0 {
            return None;
        }
        let origin_freq = 1.0 / (2.0 * self.pop_size_at_entry);
        let c = (1.0 - self.final_freq) / self.final_freq.max(1e-300);
        let f = 1.0 / (1.0 + c * (self.selection_coeff * t).exp());
        if f <= origin_freq {
            None
        } else {
            Some(Freq(f))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_trajectory_decreases_from_final_freq_at_entry() {
        let traj = DeterministicSweepTraj {
            selection_coeff: 0.01,
            final_freq: 1.0 - 1e-6,
            pop_size_at_entry: 10000.0,
        };
        let f0 = traj.freq_at(0.0).unwrap().get();
        let f_later = traj.freq_at(100.0).unwrap().get();
        assert!(f_later < f0);
        assert!(f0 <= 1.0);
    }

    #[test]
    fn deterministic_trajectory_reaches_origin_eventually() {
        let traj = DeterministicSweepTraj {
            selection_coeff: 0.05,
            final_freq: 0.999,
            pop_size_at_entry: 1000.0,
        };
        let t_origin = traj.origin_time();
        assert!(traj.freq_at(t_origin + 10.0).is_none());
    }

    #[test]
    fn file_trajectory_interpolates_and_reports_exhaustion() {
        let text = "0 1.0\n10 0.5\n20 0.001\n";
        let traj = TrajFromFile::parse(text).unwrap();
        assert!((traj.freq_at(5.0).unwrap().get() - 0.75).abs() < 1e-9);
        assert!(traj.freq_at(25.0).is_none());
    }
}
