// src/error.rs
//
// Library error surface. Recoverable degradations (metrics gaps, detector
// stream interruptions) are NOT errors: they are logged and published as
// pipeline events. Only fatal configuration problems and internal invariant
// faults surface here.

use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid static configuration. Fatal, raised at startup or when a
    /// layout swap is requested, never mid-tick.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An internal invariant was broken. The affected orchestrator halts;
    /// `dump` carries the full JSON state for diagnosis.
    #[error("invariant violation at tick {tick}: {detail}")]
    InvariantViolation {
        tick: u64,
        detail: String,
        dump: String,
    },

    #[error("pipeline halted after an invariant violation")]
    Halted,
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }
}
