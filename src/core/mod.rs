mod convergence;
mod error;
mod solver;
mod tail;
mod types;

pub use convergence::{NextItemOdds, check_convergence, completion_probability, next_item_odds};
pub use error::EstimateError;
pub use solver::{MAX_ATTEMPTS, plan_hunt, solve_attempts};
pub use tail::{CumulativeCurve, attempts_from_f64, cumulative_curve, tail_prob};
pub use types::{
    AttemptRounding, Completion, ConfidenceLevel, Convergence, ConvergenceConfig,
    EstimatorConfig, HuntRequest, NonConvergence, OddsModifiers, ProbabilityModifier,
    QuantileEntry, QuantileResult, SolverConfig,
};
