use serde::{Deserialize, Serialize};

use super::EstimateError;

/// Target cumulative probability, strictly inside (0, 1).
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ConfidenceLevel(f64);

impl ConfidenceLevel {
    pub fn new(value: f64) -> Result<Self, EstimateError> {
        if !value.is_finite() || value <= 0.0 || value >= 1.0 {
            return Err(EstimateError::InvalidConfidenceLevel(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Percentage label such as `"25%"` or `"99.9%"`.
    pub fn label(self) -> String {
        let percent = (self.0 * 100.0 * 1e6).round() / 1e6;
        format!("{percent}%")
    }

    pub fn standard_levels() -> Vec<Self> {
        [0.25, 0.5, 0.75, 0.9, 0.99]
            .into_iter()
            .map(Self)
            .collect()
    }
}

impl TryFrom<f64> for ConfidenceLevel {
    type Error = EstimateError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConfidenceLevel> for f64 {
    fn from(value: ConfidenceLevel) -> Self {
        value.0
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptRounding {
    /// Nearest whole attempt to the closed-form inversion.
    #[default]
    Nearest,
    /// Smallest attempt count whose tail probability meets the level.
    Ceiling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SolverConfig {
    pub confidence_levels: Vec<ConfidenceLevel>,
    pub rounding: AttemptRounding,
    /// Real-world duration of one attempt; enables the hours column.
    pub attempt_seconds: Option<f64>,
    /// Chance that a unit action produces a trial at all.
    pub encounter_rate: Option<f64>,
    /// Quantile of the nested encounter wait used to scale attempt counts.
    pub encounter_confidence: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            confidence_levels: ConfidenceLevel::standard_levels(),
            rounding: AttemptRounding::Nearest,
            attempt_seconds: None,
            encounter_rate: None,
            encounter_confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConvergenceConfig {
    pub threshold: f64,
    /// Hard cap on the attempt search.
    pub max_attempts: u64,
    /// Subset tables grow as 2^items; values above 16 are capped at 16.
    pub max_items: usize,
    pub mass_tolerance: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.99,
            max_attempts: 10_000_000,
            max_items: 16,
            mass_tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EstimatorConfig {
    pub solver: SolverConfig,
    pub convergence: ConvergenceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantileEntry {
    pub level: ConfidenceLevel,
    pub attempts: u64,
    pub hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantileResult {
    pub probability: f64,
    /// Unit actions per trial applied to every attempt count.
    pub encounter_scale: u64,
    pub entries: Vec<QuantileEntry>,
}

impl QuantileResult {
    pub fn attempts_for(&self, level: f64) -> Option<u64> {
        self.entries
            .iter()
            .find(|entry| (entry.level.value() - level).abs() < 1e-12)
            .map(|entry| entry.attempts)
    }

    pub fn attempt_counts(&self) -> Vec<u64> {
        self.entries.iter().map(|entry| entry.attempts).collect()
    }

    pub fn hours(&self) -> Vec<Option<f64>> {
        self.entries.iter().map(|entry| entry.hours).collect()
    }
}

/// A base rate plus additive bonuses expressed as multiples of that base rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityModifier {
    pub base_rate: f64,
    pub bonus_multiple: f64,
}

impl ProbabilityModifier {
    pub fn new(base_rate: f64) -> Self {
        Self {
            base_rate,
            bonus_multiple: 0.0,
        }
    }

    pub fn with_bonus(mut self, multiple: f64) -> Self {
        self.bonus_multiple += multiple;
        self
    }

    pub fn compose(self) -> Result<f64, EstimateError> {
        let p = self.base_rate * (1.0 + self.bonus_multiple);
        if !p.is_finite() || p <= 0.0 || p > 1.0 {
            return Err(EstimateError::InvalidProbability(p));
        }
        Ok(p)
    }
}

/// Odds flags of the documented hunting scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OddsModifiers {
    pub generation: u8,
    pub charm: bool,
    pub masuda: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HuntRequest {
    pub modifiers: OddsModifiers,
    /// Percent chance in (0, 100] that an action yields an encounter.
    pub encounter_rate_percent: f64,
    pub attempt_seconds: f64,
    pub hatch_seconds: Option<f64>,
}

impl Default for HuntRequest {
    fn default() -> Self {
        Self {
            modifiers: OddsModifiers {
                generation: 9,
                charm: false,
                masuda: false,
            },
            encounter_rate_percent: 100.0,
            attempt_seconds: 15.0,
            hatch_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub converged: bool,
    /// Expected attempts (drops when no floor rate) to resolve every item.
    pub attempts: u64,
    /// Percent, rounded to 2 decimals.
    pub probability_at_budget: Option<f64>,
    /// First attempt count at which completion crosses the threshold. Budget
    /// calls skip the search and leave this empty.
    pub threshold_attempts: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NonConvergence {
    InvalidThreshold { threshold: f64 },
    InvalidMassTolerance { tolerance: f64 },
    NoItems,
    RateOutOfRange { index: usize, rate: f64 },
    FloorRateOutOfRange { rate: f64 },
    /// The item can never drop: its rate, times the floor rate, is zero.
    UnreachableItem { index: usize },
    MassExceedsOne { mass: f64 },
    TooManyItems { items: usize, max_items: usize },
    AttemptCap { max_attempts: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Convergence {
    Converged(Completion),
    NonConvergent(NonConvergence),
}

impl Convergence {
    pub fn is_converged(&self) -> bool {
        matches!(self, Convergence::Converged(_))
    }

    pub fn completion(&self) -> Option<&Completion> {
        match self {
            Convergence::Converged(completion) => Some(completion),
            Convergence::NonConvergent(_) => None,
        }
    }
}
