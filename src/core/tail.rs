use serde::Serialize;

use super::EstimateError;

/// Probability of at least one success in `attempts` independent trials.
///
/// Only the zero-success term of the binomial is needed, so this evaluates
/// `1 - (1 - p)^n` directly as `-expm1(n * ln(1 - p))`, which stays accurate
/// for tiny `p` and arbitrarily large `n`.
pub fn tail_prob(p: f64, attempts: u64) -> Result<f64, EstimateError> {
    let p = validate_probability(p)?;
    Ok(tail_prob_unchecked(p, attempts))
}

/// Converts a real-valued attempt count into whole attempts.
pub fn attempts_from_f64(value: f64) -> Result<u64, EstimateError> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return Err(EstimateError::InvalidAttemptCount(value));
    }
    Ok(value as u64)
}

pub(crate) fn validate_probability(p: f64) -> Result<f64, EstimateError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(EstimateError::InvalidProbability(p));
    }
    Ok(p)
}

pub(crate) fn tail_prob_unchecked(p: f64, attempts: u64) -> f64 {
    if attempts == 0 {
        return 0.0;
    }
    let tail = -(attempts as f64 * (-p).ln_1p()).exp_m1();
    tail.clamp(0.0, 1.0)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Plot data for the dry-streak chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeCurve {
    pub attempts: Vec<u64>,
    pub probabilities: Vec<f64>,
    pub marked_attempts: u64,
    pub marked_probability: f64,
    /// Set when `max_points` stopped the curve before it passed 0.99.
    pub truncated: bool,
}

const CURVE_CEILING: f64 = 0.99;

/// Tail probabilities at `0, 1, 2, ...` attempts until the curve exceeds 0.99.
pub fn cumulative_curve(p: f64, mark: u64, max_points: usize) -> Result<CumulativeCurve, EstimateError> {
    let p = validate_probability(p)?;
    if p == 0.0 {
        return Err(EstimateError::InvalidProbability(p));
    }

    let mut attempts = Vec::new();
    let mut probabilities = Vec::new();
    let mut n = 0u64;
    let mut truncated = false;
    loop {
        let pp = tail_prob_unchecked(p, n);
        attempts.push(n);
        probabilities.push(pp);
        if pp > CURVE_CEILING {
            break;
        }
        if attempts.len() >= max_points {
            truncated = true;
            break;
        }
        n += 1;
    }

    Ok(CumulativeCurve {
        attempts,
        probabilities,
        marked_attempts: mark,
        marked_probability: tail_prob_unchecked(p, mark),
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-12;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn tail_prob_matches_binomial_zero_term() {
        assert_approx(tail_prob(0.2, 5).expect("valid"), 1.0 - 0.32768);
        assert_approx(tail_prob(0.5, 10).expect("valid"), 1.0 - 0.0009765625);
        assert_approx(tail_prob(0.4, 15).expect("valid"), 1.0 - 0.6f64.powi(15));
    }

    #[test]
    fn tail_prob_handles_edge_probabilities() {
        assert_approx(tail_prob(0.0, 1_000).expect("valid"), 0.0);
        assert_approx(tail_prob(1.0, 1).expect("valid"), 1.0);
        assert_approx(tail_prob(1.0, 0).expect("valid"), 0.0);
    }

    #[test]
    fn tail_prob_stays_finite_beyond_factorial_range() {
        let value = tail_prob(1.0 / 8192.0, 1_000_000).expect("valid");
        assert!(value.is_finite());
        assert!(value > 0.99);

        let small = tail_prob(1e-12, 200).expect("valid");
        assert!((small - 2e-10).abs() < 1e-15);
    }

    #[test]
    fn tail_prob_rejects_out_of_range_probability() {
        assert_eq!(
            tail_prob(1.5, 3),
            Err(EstimateError::InvalidProbability(1.5))
        );
        assert_eq!(
            tail_prob(-0.1, 3),
            Err(EstimateError::InvalidProbability(-0.1))
        );
        assert!(matches!(
            tail_prob(f64::NAN, 3),
            Err(EstimateError::InvalidProbability(_))
        ));
    }

    #[test]
    fn attempts_from_f64_rejects_negative_and_fractional_counts() {
        assert_eq!(attempts_from_f64(5.0), Ok(5));
        assert_eq!(attempts_from_f64(0.0), Ok(0));
        assert_eq!(
            attempts_from_f64(-1.0),
            Err(EstimateError::InvalidAttemptCount(-1.0))
        );
        assert_eq!(
            attempts_from_f64(2.5),
            Err(EstimateError::InvalidAttemptCount(2.5))
        );
        assert!(attempts_from_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn cumulative_curve_stops_after_crossing_ceiling() {
        let curve = cumulative_curve(0.5, 3, 1_000).expect("valid");
        // 1 - 0.5^7 = 0.9921875 is the first value above 0.99.
        assert_eq!(curve.attempts, (0..=7).collect::<Vec<_>>());
        assert_eq!(curve.probabilities.len(), curve.attempts.len());
        assert_approx(curve.probabilities[0], 0.0);
        assert_approx(curve.probabilities[7], 0.9921875);
        assert_approx(curve.marked_probability, 0.875);
        assert!(!curve.truncated);
    }

    #[test]
    fn cumulative_curve_truncates_at_point_limit() {
        let curve = cumulative_curve(1e-6, 10, 50).expect("valid");
        assert_eq!(curve.attempts.len(), 50);
        assert!(curve.truncated);
        assert_eq!(
            cumulative_curve(0.0, 1, 50),
            Err(EstimateError::InvalidProbability(0.0))
        );
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_tail_prob_is_bounded_monotone_and_zero_at_origin(
            p_bp in 1u32..10_000,
            n in 0u64..100_000,
            step in 1u64..5_000
        ) {
            let p = p_bp as f64 / 10_000.0;
            let here = tail_prob(p, n).expect("valid");
            let later = tail_prob(p, n + step).expect("valid");
            prop_assert!((0.0..=1.0).contains(&here));
            prop_assert!(later + 1e-15 >= here);
            prop_assert_eq!(tail_prob(p, 0).expect("valid"), 0.0);
        }
    }
}
