//! Backward-time coalescent ARG simulator: builds an ancestral
//! recombination graph for a sample of present-day chromosomes under a
//! user-specified demographic history, overlaying neutral mutations on the
//! finished graph. See `SPEC_FULL.md` for the full module map.

pub mod arg;
pub mod demography;
pub mod error;
pub mod events;
pub mod genmap;
pub mod historical;
pub mod hooks;
pub mod leafset;
pub mod mutation;
pub mod node;
pub mod output;
pub mod params;
pub mod population;
pub mod rates;
pub mod rng;
pub mod scheduler;
pub mod seglist;
pub mod sweep;
pub mod trajectory;
pub mod units;

pub use error::{CoalError, CoalResult};
