use tracing::debug;

use super::tail::{round_to, tail_prob_unchecked};
use super::{
    AttemptRounding, ConfidenceLevel, EstimateError, HuntRequest, OddsModifiers,
    ProbabilityModifier, QuantileEntry, QuantileResult, SolverConfig,
};

const FULL_ODDS_DENOMINATOR: f64 = 8192.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Largest attempt count reported; every integer up to it is exact as `f64`.
pub const MAX_ATTEMPTS: u64 = 1 << 53;

const CHARM_INTRODUCED: u8 = 5;
const MASUDA_INTRODUCED: u8 = 4;

impl OddsModifiers {
    /// Base rate 1/8192, doubled from gen 6. The charm adds two base rates and
    /// the masuda method four, plus one more from gen 5.
    pub fn probability_modifier(self) -> Result<ProbabilityModifier, EstimateError> {
        if !(1..=9).contains(&self.generation) {
            return Err(EstimateError::UnknownGeneration(self.generation));
        }
        if self.charm && self.generation < CHARM_INTRODUCED {
            return Err(EstimateError::DomainIncompatibility {
                feature: "Shiny charm",
                generation: self.generation,
                introduced: CHARM_INTRODUCED,
            });
        }
        if self.masuda && self.generation < MASUDA_INTRODUCED {
            return Err(EstimateError::DomainIncompatibility {
                feature: "Masuda method",
                generation: self.generation,
                introduced: MASUDA_INTRODUCED,
            });
        }

        let mut base_rate = 1.0 / FULL_ODDS_DENOMINATOR;
        if self.generation > 5 {
            base_rate *= 2.0;
        }

        let mut modifier = ProbabilityModifier::new(base_rate);
        if self.charm {
            modifier = modifier.with_bonus(2.0);
        }
        if self.masuda {
            modifier = modifier.with_bonus(4.0);
            if self.generation > 4 {
                modifier = modifier.with_bonus(1.0);
            }
        }
        Ok(modifier)
    }

    pub fn probability(self) -> Result<f64, EstimateError> {
        self.probability_modifier()?.compose()
    }
}

/// Attempts needed to reach every configured confidence level at per-trial
/// probability `p`.
pub fn solve_attempts(p: f64, config: &SolverConfig) -> Result<QuantileResult, EstimateError> {
    validate_config(p, config)?;

    let encounter_scale = match config.encounter_rate {
        Some(rate) if rate < 1.0 => actions_per_trial(rate, config.encounter_confidence)?,
        _ => 1,
    };

    let entries = config
        .confidence_levels
        .iter()
        .map(|&level| {
            let trials = attempts_for_level(p, level, config.rounding)?;
            let attempts = trials
                .checked_mul(encounter_scale)
                .filter(|&attempts| attempts <= MAX_ATTEMPTS)
                .ok_or(EstimateError::AttemptCountOverflow(
                    trials as f64 * encounter_scale as f64,
                ))?;
            let hours = config
                .attempt_seconds
                .map(|seconds| round_to(attempts as f64 * seconds / SECONDS_PER_HOUR, 2));
            Ok(QuantileEntry {
                level,
                attempts,
                hours,
            })
        })
        .collect::<Result<Vec<_>, EstimateError>>()?;

    debug!(
        probability = p,
        encounter_scale,
        levels = entries.len(),
        "solved attempt quantiles"
    );

    Ok(QuantileResult {
        probability: p,
        encounter_scale,
        entries,
    })
}

/// Attempt quantiles for a hunt described by odds flags and timings.
///
/// Masuda hunts count egg hatches: hours are reported only when a hatch time
/// is known, and the encounter rate does not apply. Every other hunt counts
/// encounters at `attempt_seconds`, scaled by the encounter rate.
pub fn plan_hunt(request: &HuntRequest, config: &SolverConfig) -> Result<QuantileResult, EstimateError> {
    let p = request.modifiers.probability()?;

    let rate_percent = request.encounter_rate_percent;
    if !rate_percent.is_finite() || rate_percent <= 0.0 || rate_percent > 100.0 {
        return Err(EstimateError::InvalidEncounterRate(rate_percent / 100.0));
    }

    let hunt_config = if request.modifiers.masuda {
        SolverConfig {
            attempt_seconds: request.hatch_seconds,
            encounter_rate: None,
            ..config.clone()
        }
    } else {
        SolverConfig {
            attempt_seconds: Some(request.attempt_seconds),
            encounter_rate: Some(rate_percent / 100.0),
            ..config.clone()
        }
    };
    solve_attempts(p, &hunt_config)
}

fn attempts_for_level(
    p: f64,
    level: ConfidenceLevel,
    rounding: AttemptRounding,
) -> Result<u64, EstimateError> {
    let c = level.value();
    let raw = (-c).ln_1p() / (-p).ln_1p();
    match rounding {
        AttemptRounding::Nearest => Ok(bounded_count(raw.round())?.max(1)),
        AttemptRounding::Ceiling => {
            let mut n = bounded_count(raw.ceil())?.max(1);
            // Float error in `raw` can land one step off either way.
            while n > 1 && tail_prob_unchecked(p, n - 1) >= c {
                n -= 1;
            }
            while tail_prob_unchecked(p, n) < c {
                n = n
                    .checked_add(1)
                    .filter(|&next| next <= MAX_ATTEMPTS)
                    .ok_or(EstimateError::AttemptCountOverflow(raw))?;
            }
            Ok(n)
        }
    }
}

fn actions_per_trial(rate: f64, confidence: f64) -> Result<u64, EstimateError> {
    let actions = (-confidence).ln_1p() / (-rate).ln_1p();
    Ok(bounded_count(actions.round())?.max(1))
}

/// Casts a whole, non-negative count, rejecting anything past `MAX_ATTEMPTS`
/// instead of saturating.
fn bounded_count(value: f64) -> Result<u64, EstimateError> {
    if !value.is_finite() || value > MAX_ATTEMPTS as f64 {
        return Err(EstimateError::AttemptCountOverflow(value));
    }
    Ok(value as u64)
}

fn validate_config(p: f64, config: &SolverConfig) -> Result<(), EstimateError> {
    if !p.is_finite() || p <= 0.0 || p > 1.0 {
        return Err(EstimateError::InvalidProbability(p));
    }
    ConfidenceLevel::new(config.encounter_confidence)?;
    if let Some(rate) = config.encounter_rate {
        if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
            return Err(EstimateError::InvalidEncounterRate(rate));
        }
    }
    if let Some(seconds) = config.attempt_seconds {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(EstimateError::InvalidDuration(seconds));
        }
    }
    Ok(())
}
