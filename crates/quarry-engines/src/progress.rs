//! Progress sinks.

use crate::error::EngineError;

/// Receives progress from a running engine, in percent (0..=100).
///
/// Returning `Err` aborts the computation; hosts use this to surface
/// cancellation at every checkpoint.
pub trait Progress {
    /// Phase boundary. Always reported to the caller.
    fn checkpoint(&mut self, percent: f64) -> Result<(), EngineError>;

    /// Intermediate step inside a phase, such as one optimization pass.
    /// A host may decline to forward these for small inputs, but must still
    /// honor cancellation here.
    fn step(&mut self, percent: f64) -> Result<(), EngineError> {
        self.checkpoint(percent)
    }
}

/// Discards progress. For direct, synchronous engine calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn checkpoint(&mut self, _percent: f64) -> Result<(), EngineError> {
        Ok(())
    }
}
