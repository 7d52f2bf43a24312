//! Error handling.
//!
//! Follows `tskit-rust`'s use of `thiserror` for a flat error enum. Per
//! spec.md §7, every error carries a context stack (operation, population,
//! generation, event kind) assembled as the error propagates, so the final
//! diagnostic names where and when things went wrong without a backtrace.

use crate::units::Gens;
use thiserror::Error;

/// One frame of context attached to an error as it is handled.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextFrame {
    pub operation: String,
    pub population: Option<String>,
    pub generation: Option<f64>,
    pub event_kind: Option<String>,
}

impl std::fmt::Display for ContextFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(pop) = &self.population {
            write!(f, " (pop={})", pop)?;
        }
        if let Some(gen) = self.generation {
            write!(f, " (gen={:.3})", gen)?;
        }
        if let Some(kind) = &self.event_kind {
            write!(f, " (event={})", kind)?;
        }
        Ok(())
    }
}

/// The four error kinds of spec.md §7.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoalErrorKind {
    /// Invalid parameter values, inconsistent populations, malformed files.
    /// Reported at setup; the program exits before any simulation starts.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Non-convergent inversion, overflow in rate aggregation, non-finite
    /// piecewise-function evaluation. The current simulation is aborted;
    /// the batch continues with the next seed.
    #[error("numerical error: {0}")]
    Numerical(String),
    /// Failure to read the map or write output. Fatal for the batch.
    #[error("I/O error: {0}")]
    Io(String),
    /// Assertion on seglist ordering, leafset counts, or node-population
    /// membership. Fatal; indicates a bug.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

/// An error together with the context stack assembled while handling it.
#[derive(Debug, Clone, PartialEq)]
pub struct CoalError {
    pub kind: CoalErrorKind,
    pub context: Vec<ContextFrame>,
}

impl std::error::Error for CoalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl std::fmt::Display for CoalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in self.context.iter().rev() {
            write!(f, "\n  while {}", frame)?;
        }
        Ok(())
    }
}

impl CoalError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        CoalError {
            kind: CoalErrorKind::Configuration(msg.into()),
            context: Vec::new(),
        }
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        CoalError {
            kind: CoalErrorKind::Numerical(msg.into()),
            context: Vec::new(),
        }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        CoalError {
            kind: CoalErrorKind::Io(msg.into()),
            context: Vec::new(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        CoalError {
            kind: CoalErrorKind::Invariant(msg.into()),
            context: Vec::new(),
        }
    }

    pub fn is_numerical(&self) -> bool {
        matches!(self.kind, CoalErrorKind::Numerical(_))
    }

    /// Appends a context frame; called by handlers as the error
    /// propagates up through the scheduler and executors.
    pub fn with_context(mut self, frame: ContextFrame) -> Self {
        self.context.push(frame);
        self
    }

    pub fn context_op(self, operation: impl Into<String>) -> Self {
        self.with_context(ContextFrame {
            operation: operation.into(),
            population: None,
            generation: None,
            event_kind: None,
        })
    }

    pub fn context_at(self, operation: impl Into<String>, gen: Gens) -> Self {
        self.with_context(ContextFrame {
            operation: operation.into(),
            population: None,
            generation: Some(gen.get()),
            event_kind: None,
        })
    }
}

pub type CoalResult<T> = Result<T, CoalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_frames_render_in_reverse_order() {
        let err = CoalError::numerical("inversion did not converge")
            .context_op("coalesce_get_wait_time")
            .context_at("scheduler step", Gens(123.0));
        let s = format!("{}", err);
        assert!(s.contains("numerical error"));
        assert!(s.contains("scheduler step"));
        assert!(s.contains("coalesce_get_wait_time"));
    }
}
