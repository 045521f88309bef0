//! Error taxonomy shared across the simulation engine.

use thiserror::Error;

/// Errors surfaced by simulation setup, queries, and run loops.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    /// Invalid setup or invocation: duplicate mutant, reserved name,
    /// resize after placement, malformed rectangle, empty tissue at run
    /// start, incompatible rate lists, and the like.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// A species, mutant, sample, or satisfying region does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The host's cancellation hook requested a stop. The simulation
    /// state is preserved and another run call resumes it.
    #[error("run cancelled by host")]
    Cancelled,

    /// A broken internal invariant; always a bug, never user input.
    #[error("internal invariant broken: {0}")]
    Internal(String),
}

impl SimulationError {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolation(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
