use tracing::{debug, trace};

use super::tail::{round_to, tail_prob_unchecked};
use super::{Completion, Convergence, ConvergenceConfig, NonConvergence};

/// Hard ceiling on `ConvergenceConfig::max_items`: subset tables hold
/// `2^items` entries.
const SUBSET_LIMIT: usize = 16;

/// Conditional odds of which unresolved item resolves next.
#[derive(Debug, Clone, PartialEq)]
pub struct NextItemOdds {
    /// Rate mass still carried by unresolved items.
    pub remaining_mass: f64,
    /// `(item index, probability it is the next one resolved)`.
    pub odds: Vec<(usize, f64)>,
}

impl NextItemOdds {
    /// Expected attempts until any unresolved item drops, given the chance
    /// that an attempt drops anything at all.
    pub fn expected_wait(&self, drop_rate: f64) -> f64 {
        1.0 / (drop_rate * self.remaining_mass)
    }
}

/// Renormalizes `rates` over the items whose bit is clear in `resolved`.
pub fn next_item_odds(rates: &[f64], resolved: usize) -> NextItemOdds {
    let remaining_mass: f64 = rates
        .iter()
        .enumerate()
        .filter(|(item, _)| resolved & (1usize << item) == 0)
        .map(|(_, rate)| rate)
        .sum();

    let odds = rates
        .iter()
        .enumerate()
        .filter(|(item, _)| resolved & (1usize << item) == 0)
        .map(|(item, &rate)| {
            let share = if remaining_mass > 0.0 {
                rate / remaining_mass
            } else {
                0.0
            };
            (item, share)
        })
        .collect();

    NextItemOdds {
        remaining_mass,
        odds,
    }
}

/// Decides whether collecting every item in `rates` converges and how many
/// attempts it takes.
///
/// Each attempt first drops anything at all with `floor_rate` (always, when
/// absent), then picks the item by `rates`. Without a floor the reported count
/// is expected drops; with one it is expected attempts. A budget reports the
/// completion chance at exactly that many attempts, as a percentage, and skips
/// the threshold search.
pub fn check_convergence(
    rates: &[f64],
    floor_rate: Option<f64>,
    attempt_budget: Option<u64>,
    config: &ConvergenceConfig,
) -> Convergence {
    let validated =
        validate_config(config).and_then(|()| validate_rates(rates, floor_rate, config));
    if let Err(reason) = validated {
        debug!(?reason, items = rates.len(), "rate vector rejected");
        return Convergence::NonConvergent(reason);
    }

    let drop_rate = floor_rate.unwrap_or(1.0);
    let masses = SubsetMasses::new(rates);

    let expected = masses.expected_attempts(drop_rate);
    let attempts = (expected + 1e-9).floor() as u64;

    let (probability_at_budget, threshold_attempts) = match attempt_budget {
        Some(budget) => {
            let probability = if budget < rates.len() as u64 || attempts == 0 {
                0.0
            } else {
                round_to(100.0 * tail_prob_unchecked(1.0 / attempts as f64, budget), 2)
            };
            (Some(probability), None)
        }
        None => {
            let Some(threshold_attempts) =
                attempts_to_threshold(&masses, drop_rate, config.threshold, config.max_attempts)
            else {
                debug!(
                    max_attempts = config.max_attempts,
                    threshold = config.threshold,
                    "completion never reached threshold"
                );
                return Convergence::NonConvergent(NonConvergence::AttemptCap {
                    max_attempts: config.max_attempts,
                });
            };
            (None, Some(threshold_attempts))
        }
    };

    debug!(
        expected,
        attempts, ?threshold_attempts, ?probability_at_budget, "completion converged"
    );

    Convergence::Converged(Completion {
        converged: true,
        attempts,
        probability_at_budget,
        threshold_attempts,
    })
}

/// Exact chance that every item has dropped within `attempts`.
pub fn completion_probability(rates: &[f64], drop_rate: f64, attempts: u64) -> f64 {
    SubsetMasses::new(rates).completion_probability(drop_rate, attempts)
}

fn validate_config(config: &ConvergenceConfig) -> Result<(), NonConvergence> {
    if !(config.threshold > 0.0 && config.threshold < 1.0) {
        return Err(NonConvergence::InvalidThreshold {
            threshold: config.threshold,
        });
    }
    if !(config.mass_tolerance.is_finite() && config.mass_tolerance >= 0.0) {
        return Err(NonConvergence::InvalidMassTolerance {
            tolerance: config.mass_tolerance,
        });
    }
    Ok(())
}

fn validate_rates(
    rates: &[f64],
    floor_rate: Option<f64>,
    config: &ConvergenceConfig,
) -> Result<(), NonConvergence> {
    if rates.is_empty() {
        return Err(NonConvergence::NoItems);
    }
    if let Some((index, &rate)) = rates
        .iter()
        .enumerate()
        .find(|(_, rate)| !(0.0..=1.0).contains(*rate))
    {
        return Err(NonConvergence::RateOutOfRange { index, rate });
    }
    if let Some(rate) = floor_rate {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(NonConvergence::FloorRateOutOfRange { rate });
        }
    }

    let mass: f64 = rates.iter().sum();
    if mass > 1.0 + config.mass_tolerance {
        return Err(NonConvergence::MassExceedsOne { mass });
    }

    let max_items = config.max_items.min(SUBSET_LIMIT);
    if rates.len() > max_items {
        return Err(NonConvergence::TooManyItems {
            items: rates.len(),
            max_items,
        });
    }

    // The expectation is bounded by the sum of per-item waits, so finite
    // waits keep it finite.
    let drop_rate = floor_rate.unwrap_or(1.0);
    let items = rates.len() as f64;
    if let Some(index) = rates
        .iter()
        .position(|&rate| !(items / (rate * drop_rate)).is_finite())
    {
        return Err(NonConvergence::UnreachableItem { index });
    }
    Ok(())
}

/// Rate mass of every item subset, indexed by bitmask.
struct SubsetMasses {
    masses: Vec<f64>,
}

impl SubsetMasses {
    fn new(rates: &[f64]) -> Self {
        let mut masses = vec![0.0; 1 << rates.len()];
        for mask in 1..masses.len() {
            let lowest = mask.trailing_zeros() as usize;
            masses[mask] = masses[mask & (mask - 1)] + rates[lowest];
        }
        Self { masses }
    }

    /// Inclusion-exclusion over the subsets still missing after `attempts`.
    fn completion_probability(&self, drop_rate: f64, attempts: u64) -> f64 {
        if attempts == 0 {
            return 0.0;
        }
        let n = attempts as f64;
        let total: f64 = self
            .masses
            .iter()
            .enumerate()
            .map(|(mask, &mass)| {
                let q = (drop_rate * mass).clamp(0.0, 1.0);
                let none_dropped = (n * (-q).ln_1p()).exp();
                if mask.count_ones() % 2 == 0 {
                    none_dropped
                } else {
                    -none_dropped
                }
            })
            .sum();
        total.clamp(0.0, 1.0)
    }

    /// Expected attempts to resolve every item, by dynamic programming over
    /// the set of resolved items: from each set, wait for any unresolved
    /// drop, then move to the set extended by the renormalized choice of item.
    /// Item rates and remaining mass come straight from the table.
    fn expected_attempts(&self, drop_rate: f64) -> f64 {
        let full = self.masses.len() - 1;
        let mut expected = vec![0.0; full + 1];
        for resolved in (0..full).rev() {
            let unresolved = full ^ resolved;
            let remaining_mass = self.masses[unresolved];
            let mut value = 1.0 / (drop_rate * remaining_mass);
            let mut pending = unresolved;
            while pending != 0 {
                let item = 1usize << pending.trailing_zeros();
                value += self.masses[item] / remaining_mass * expected[resolved | item];
                pending &= pending - 1;
            }
            expected[resolved] = value;
        }
        expected[0]
    }
}

/// Smallest attempt count whose completion probability meets `threshold`,
/// found by doubling then bisecting below `max_attempts`.
fn attempts_to_threshold(
    masses: &SubsetMasses,
    drop_rate: f64,
    threshold: f64,
    max_attempts: u64,
) -> Option<u64> {
    if max_attempts == 0 || masses.completion_probability(drop_rate, max_attempts) < threshold {
        return None;
    }

    let mut hi = 1u64;
    while hi < max_attempts && masses.completion_probability(drop_rate, hi) < threshold {
        hi = hi.saturating_mul(2).min(max_attempts);
    }
    let mut lo = hi / 2;
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        let probability = masses.completion_probability(drop_rate, mid);
        trace!(lo, hi, mid, probability, "bisecting completion threshold");
        if probability >= threshold {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Some(hi)
}
