use thiserror::Error;

/// Validation failures raised at the boundary of every public estimator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    #[error("Invalid probability: {0} (must be between 0 and 1)")]
    InvalidProbability(f64),

    #[error("Invalid attempt count: {0} (must be a whole number >= 0)")]
    InvalidAttemptCount(f64),

    #[error("Invalid confidence level: {0} (must be strictly between 0 and 1)")]
    InvalidConfidenceLevel(f64),

    #[error("{feature} did not exist prior to gen {introduced} (requested gen {generation})")]
    DomainIncompatibility {
        feature: &'static str,
        generation: u8,
        introduced: u8,
    },

    #[error("Unknown generation: {0} (must be 1-9)")]
    UnknownGeneration(u8),

    #[error("Invalid encounter rate: {0} (must be in (0, 1])")]
    InvalidEncounterRate(f64),

    #[error("Invalid duration: {0}s (must be finite and >= 0)")]
    InvalidDuration(f64),

    #[error("Attempt count overflow: {0:e} attempts exceeds the supported maximum of 2^53")]
    AttemptCountOverflow(f64),
}
