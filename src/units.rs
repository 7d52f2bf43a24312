//! Strong physical-unit scalars and piecewise-function utilities.
//!
//! The simulation moves backward in time, measuring everything in
//! generations, and positions are tracked both in physical space `[0, 1)`
//! and in genetic (centimorgan) space. Wrapping these in newtypes keeps a
//! stray physical/genetic mixup from compiling.

use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Div, Mul, Sub};

macro_rules! scalar_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
        pub struct $name(pub f64);

        impl $name {
            pub fn get(self) -> f64 {
                self.0
            }
        }

        impl From<f64> for $name {
            fn from(v: f64) -> Self {
                $name(v)
            }
        }

        impl Add for $name {
            type Output = $name;
            fn add(self, rhs: $name) -> $name {
                $name(self.0 + rhs.0)
            }
        }

        impl AddAssign for $name {
            fn add_assign(&mut self, rhs: $name) {
                self.0 += rhs.0;
            }
        }

        impl Sub for $name {
            type Output = $name;
            fn sub(self, rhs: $name) -> $name {
                $name(self.0 - rhs.0)
            }
        }

        impl Mul<f64> for $name {
            type Output = $name;
            fn mul(self, rhs: f64) -> $name {
                $name(self.0 * rhs)
            }
        }

        impl Div<f64> for $name {
            type Output = $name;
            fn div(self, rhs: f64) -> $name {
                $name(self.0 / rhs)
            }
        }
    };
}

/// Generations into the past. Monotonically non-decreasing over a run.
scalar_newtype!(Gens);
/// A difference of two `Gens`; same representation, kept distinct for clarity.
scalar_newtype!(GensDelta);
/// Population size, in chromosomes.
scalar_newtype!(PopSize);
/// A rate, per generation.
scalar_newtype!(Rate);
/// A physical position in `[0, 1)`.
scalar_newtype!(PhysPos);
/// A physical length (difference of two `PhysPos`).
scalar_newtype!(PhysLen);
/// A genetic map position, in centimorgans.
scalar_newtype!(GenPos);
/// A genetic length, in centimorgans.
scalar_newtype!(GenLen);
/// An allele frequency in `[0, 1]`.
scalar_newtype!(Freq);

pub const ZERO_GENS: Gens = Gens(0.0);
pub const MIN_PHYS_POS: PhysPos = PhysPos(0.0);
pub const MAX_PHYS_POS: PhysPos = PhysPos(1.0);

impl Gens {
    pub fn infinity() -> Gens {
        Gens(f64::INFINITY)
    }
}

impl PartialEq<PhysPos> for PhysPos {
    fn eq(&self, other: &PhysPos) -> bool {
        self.0 == other.0
    }
}

/// A single piece of a piecewise-constant or piecewise-linear function of
/// generations-into-the-past. `start` is the generation where the piece
/// begins (inclusive); the piece ends where the next one starts, or at
/// infinity for the last piece.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Piece {
    pub start: f64,
    /// Value of the function at `start`.
    pub value_at_start: f64,
    /// Slope for piecewise-linear pieces; zero for piecewise-constant ones.
    pub slope: f64,
}

/// A piecewise function of time, used for population sizes and migration
/// rates. Breakpoints are arbitrary (not required to be evenly spaced).
#[derive(Debug, Clone, Default)]
pub struct PiecewiseFn {
    /// Sorted ascending by `start`; `pieces[0].start` is normally 0.
    pieces: Vec<Piece>,
}

impl PiecewiseFn {
    pub fn constant(value: f64) -> Self {
        PiecewiseFn {
            pieces: vec![Piece {
                start: 0.0,
                value_at_start: value,
                slope: 0.0,
            }],
        }
    }

    /// Builds a piecewise-constant function from `(start_gen, value)` pairs,
    /// sorted ascending by generation. The value at `t` is that of the last
    /// breakpoint with `start <= t`.
    pub fn piecewise_constant(points: &[(f64, f64)]) -> Self {
        assert!(!points.is_empty(), "piecewise function needs >=1 point");
        let mut pieces: Vec<Piece> = points
            .iter()
            .map(|&(start, value)| Piece {
                start,
                value_at_start: value,
                slope: 0.0,
            })
            .collect();
        pieces.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
        PiecewiseFn { pieces }
    }

    /// Builds a piecewise-linear function that interpolates linearly
    /// between consecutive `(gen, value)` knots and is constant beyond the
    /// last knot.
    pub fn piecewise_linear(points: &[(f64, f64)]) -> Self {
        assert!(points.len() >= 1, "piecewise function needs >=1 point");
        let mut pts = points.to_vec();
        pts.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        let mut pieces = Vec::with_capacity(pts.len());
        for i in 0..pts.len() {
            let (start, value) = pts[i];
            let slope = if i + 1 < pts.len() {
                let (next_start, next_value) = pts[i + 1];
                if next_start > start {
                    (next_value - value) / (next_start - start)
                } else {
                    0.0
                }
            } else {
                0.0
            };
            pieces.push(Piece {
                start,
                value_at_start: value,
                slope,
            });
        }
        PiecewiseFn { pieces }
    }

    /// The generation at which the piece following `t` begins, or `None`
    /// if `t` falls in the last piece. Used by the scheduler to bound an
    /// inversion window at the next demographic breakpoint (spec.md §4.4).
    pub fn next_breakpoint_after(&self, t: f64) -> Option<f64> {
        let i = self.piece_index_at(t);
        self.pieces.get(i + 1).map(|p| p.start)
    }

    /// The constant/linear value of the piece covering `t`, exposed so
    /// callers can build a derived piecewise function (e.g. a coalescence
    /// rate from a population size) without re-deriving piece lookup.
    pub fn value_and_slope_at(&self, t: f64) -> (f64, f64) {
        let i = self.piece_index_at(t);
        let p = &self.pieces[i];
        (p.value_at_start + p.slope * (t - p.start), p.slope)
    }

    fn piece_index_at(&self, t: f64) -> usize {
        match self
            .pieces
            .binary_search_by(|p| p.start.partial_cmp(&t).unwrap_or(Ordering::Less))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        }
    }

    pub fn eval(&self, t: f64) -> f64 {
        let i = self.piece_index_at(t);
        let p = &self.pieces[i];
        p.value_at_start + p.slope * (t - p.start)
    }

    /// The piece covering generation `t`, and the generation at which the
    /// *next* piece begins (`+inf` if `t` falls in the last piece).
    fn piece_and_horizon(&self, t: f64) -> (&Piece, f64) {
        let i = self.piece_index_at(t);
        let horizon = if i + 1 < self.pieces.len() {
            self.pieces[i + 1].start
        } else {
            f64::INFINITY
        };
        (&self.pieces[i], horizon)
    }

    /// Integral of the function from `from` to `to` (`to >= from`).
    pub fn integrate(&self, from: f64, to: f64) -> f64 {
        assert!(to >= from);
        let mut t = from;
        let mut total = 0.0;
        while t < to {
            let (p, horizon) = self.piece_and_horizon(t);
            let seg_end = horizon.min(to);
            let dt = seg_end - t;
            let v0 = p.value_at_start + p.slope * (t - p.start);
            let v1 = p.value_at_start + p.slope * (seg_end - p.start);
            total += 0.5 * (v0 + v1) * dt;
            t = seg_end;
        }
        total
    }

    /// Finds `to >= from` such that `integrate(from, to) == target`, by
    /// walking pieces and solving each (closed form for constant pieces,
    /// quadratic formula for linear ones) before falling back to bisection
    /// bounded by `max_steps` and precision `eps`. Returns `None` if the
    /// integral never reaches `target` (function hits zero forever, or the
    /// search exceeds `horizon`).
    pub fn invert_integral(
        &self,
        from: f64,
        target: f64,
        horizon: f64,
        eps: f64,
        max_steps: u32,
    ) -> Option<f64> {
        if target <= 0.0 {
            return Some(from);
        }
        let mut t = from;
        let mut remaining = target;
        loop {
            if t >= horizon {
                return None;
            }
            let (p, piece_horizon) = self.piece_and_horizon(t);
            let seg_end = piece_horizon.min(horizon);
            let dt_max = seg_end - t;
            let v0 = p.value_at_start + p.slope * (t - p.start);
            let full = if p.slope.abs() < 1e-300 {
                v0 * dt_max
            } else {
                let v1 = v0 + p.slope * dt_max;
                0.5 * (v0 + v1) * dt_max
            };
            if full >= remaining {
                if p.slope.abs() < 1e-300 {
                    if v0 <= 0.0 {
                        return None;
                    }
                    return Some(t + remaining / v0);
                }
                return Some(solve_quadratic_piece(
                    v0, p.slope, remaining, dt_max, eps, max_steps,
                ) + t);
            }
            remaining -= full;
            t = seg_end;
        }
    }
}

/// Solves for `dt` in `integral_0^dt (v0 + slope*s) ds == target`, i.e.
/// `0.5*slope*dt^2 + v0*dt - target == 0`, returning the smallest
/// non-negative root in `[0, dt_max]`. Falls back to bisection if the
/// closed form is numerically degenerate.
fn solve_quadratic_piece(v0: f64, slope: f64, target: f64, dt_max: f64, eps: f64, max_steps: u32) -> f64 {
    let a = 0.5 * slope;
    let b = v0;
    let c = -target;
    let disc = b * b - 4.0 * a * c;
    if disc >= 0.0 {
        let sqrt_disc = disc.sqrt();
        let r1 = (-b + sqrt_disc) / (2.0 * a);
        let r2 = (-b - sqrt_disc) / (2.0 * a);
        let mut candidates: Vec<f64> = vec![r1, r2]
            .into_iter()
            .filter(|&r| r >= -eps && r <= dt_max + eps)
            .collect();
        if !candidates.is_empty() {
            candidates.sort_by(|x, y| x.partial_cmp(y).unwrap());
            return candidates[0].max(0.0).min(dt_max);
        }
    }
    // Bisection fallback.
    let f = |dt: f64| a * dt * dt + b * dt + c;
    let mut lo = 0.0;
    let mut hi = dt_max;
    for _ in 0..max_steps {
        let mid = 0.5 * (lo + hi);
        if (hi - lo) < eps {
            return mid;
        }
        if f(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_integral_matches_rate_times_time() {
        let f = PiecewiseFn::constant(2.0);
        assert!((f.integrate(0.0, 10.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn piecewise_constant_steps() {
        let f = PiecewiseFn::piecewise_constant(&[(0.0, 1.0), (5.0, 2.0)]);
        assert!((f.eval(1.0) - 1.0).abs() < 1e-12);
        assert!((f.eval(5.0) - 2.0).abs() < 1e-12);
        assert!((f.integrate(0.0, 10.0) - (5.0 * 1.0 + 5.0 * 2.0)).abs() < 1e-9);
    }

    #[test]
    fn invert_integral_recovers_original_time_constant_rate() {
        let f = PiecewiseFn::constant(0.5);
        let target_t = 7.3;
        let target = f.integrate(0.0, target_t);
        let recovered = f
            .invert_integral(0.0, target, f64::INFINITY, 1e-9, 1000)
            .unwrap();
        assert!((recovered - target_t).abs() < 1e-6);
    }

    #[test]
    fn invert_integral_none_when_rate_is_zero() {
        let f = PiecewiseFn::constant(0.0);
        assert!(f.invert_integral(0.0, 1.0, 1000.0, 1e-9, 100).is_none());
    }

    #[test]
    fn invert_integral_piecewise_matches_forward_integral() {
        let f = PiecewiseFn::piecewise_constant(&[(0.0, 0.001), (5000.0, 0.002), (100000.0, 0.002)]);
        let t = f.invert_integral(0.0, 10.0, 200000.0, 1e-9, 1000).unwrap();
        let back = f.integrate(0.0, t);
        assert!((back - 10.0).abs() < 1e-6);
    }
}
