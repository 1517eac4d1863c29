use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::core::{
    AttemptRounding, ConfidenceLevel, Convergence, CumulativeCurve, EstimatorConfig,
    HuntRequest, NonConvergence, OddsModifiers, QuantileResult, SolverConfig, attempts_from_f64,
    check_convergence, cumulative_curve, plan_hunt, tail_prob,
};

const SEPARATOR: &str = "================================";
const PLOT_ROWS: usize = 30;
const PLOT_WIDTH: usize = 40;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliRounding {
    Nearest,
    Ceiling,
}

impl From<CliRounding> for AttemptRounding {
    fn from(value: CliRounding) -> Self {
        match value {
            CliRounding::Nearest => AttemptRounding::Nearest,
            CliRounding::Ceiling => AttemptRounding::Ceiling,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "compassist",
    about = "Attempt and completion estimators for repeated independent trials"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,
    #[arg(
        long,
        global = true,
        help = "JSON file with solver and convergence settings"
    )]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chance of at least one success after a number of attempts
    Dry(DryArgs),
    /// Attempts (and hours) needed to find a shiny at each confidence level
    Hunt(HuntArgs),
    /// Whether collecting every item converges, and after how many attempts
    Completion(CompletionArgs),
}

#[derive(Args, Debug)]
struct DryArgs {
    #[arg(help = "Chance per attempt, as a fraction like 1/128 or a decimal")]
    probability: String,
    #[arg(allow_negative_numbers = true, help = "Attempts played so far")]
    attempts: f64,
    #[arg(long, help = "Draw the cumulative curve up to 99%")]
    plot: bool,
    #[arg(long, default_value_t = 100_000, help = "Maximum points on the curve")]
    plot_points: usize,
}

#[derive(Args, Debug)]
struct HuntArgs {
    #[arg(long = "gen", help = "Game generation, 1-9")]
    generation: u8,
    #[arg(long)]
    masuda: bool,
    #[arg(long)]
    charm: bool,
    #[arg(
        long,
        default_value_t = 100.0,
        help = "Chance in percent that an action yields an encounter"
    )]
    encounter_rate: f64,
    #[arg(long, default_value_t = 15.0, help = "Seconds per encounter or reset")]
    attempt_time: f64,
    #[arg(long, help = "Seconds to hatch one egg (masuda hunts)")]
    hatch_time: Option<f64>,
    #[arg(long, value_enum)]
    rounding: Option<CliRounding>,
    #[arg(
        long = "level",
        help = "Confidence level in percent; repeat to replace the default set"
    )]
    levels: Vec<f64>,
}

#[derive(Args, Debug)]
struct CompletionArgs {
    #[arg(
        required = true,
        num_args = 1..,
        allow_negative_numbers = true,
        help = "Per-item drop rates, as fractions like 7/24 or decimals"
    )]
    rates: Vec<String>,
    #[arg(long, help = "Chance that an attempt drops any item at all")]
    floor_rate: Option<String>,
    #[arg(
        long,
        allow_negative_numbers = true,
        help = "Attempt budget to report completion chance for"
    )]
    attempts: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DryResponse {
    probability: f64,
    attempts: u64,
    chance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    curve: Option<CumulativeCurve>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HuntLevelResponse {
    label: String,
    attempts: u64,
    hours: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HuntResponse {
    probability: f64,
    masuda: bool,
    encounter_scale: u64,
    levels: Vec<HuntLevelResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionResponse {
    converged: bool,
    per_attempt: bool,
    attempts: Option<u64>,
    probability_at_budget: Option<f64>,
    threshold_attempts: Option<u64>,
    non_convergence: Option<NonConvergence>,
}

/// Runs one command and returns the text to print on stdout.
pub fn run(cli: Cli) -> Result<String, String> {
    let config = match cli.config.as_deref() {
        Some(path) => load_config(path)?,
        None => EstimatorConfig::default(),
    };

    match cli.command {
        Command::Dry(args) => {
            let response = build_dry_response(&args)?;
            if cli.json {
                to_json(&response)
            } else {
                Ok(render_dry(&response))
            }
        }
        Command::Hunt(args) => {
            let (request, solver) = build_hunt_request(&args, &config.solver)?;
            let result = plan_hunt(&request, &solver).map_err(|e| e.to_string())?;
            let response = build_hunt_response(&result, request.modifiers.masuda);
            if cli.json {
                to_json(&response)
            } else {
                Ok(render_hunt(&response))
            }
        }
        Command::Completion(args) => {
            let rates = args
                .rates
                .iter()
                .map(|rate| parse_probability(rate))
                .collect::<Result<Vec<_>, _>>()?;
            let floor_rate = args
                .floor_rate
                .as_deref()
                .map(parse_probability)
                .transpose()
                .map_err(|e| format!("--floor-rate: {e}"))?;
            let budget = args
                .attempts
                .map(attempts_from_f64)
                .transpose()
                .map_err(|e| format!("--attempts: {e}"))?;

            let outcome = check_convergence(&rates, floor_rate, budget, &config.convergence);
            let response = build_completion_response(outcome, floor_rate.is_some());
            if cli.json {
                to_json(&response)
            } else {
                Ok(render_completion(&response, budget))
            }
        }
    }
}

fn load_config(path: &Path) -> Result<EstimatorConfig, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("--config: cannot read {}: {e}", path.display()))?;
    config_from_json(&raw)
}

fn config_from_json(json: &str) -> Result<EstimatorConfig, String> {
    serde_json::from_str(json).map_err(|e| format!("--config: invalid settings: {e}"))
}

/// Accepts `1/128` style fractions or plain decimals.
fn parse_probability(input: &str) -> Result<f64, String> {
    let value = if let Some((num, den)) = input.split_once('/') {
        let num: f64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid numerator in {input:?}"))?;
        let den: f64 = den
            .trim()
            .parse()
            .map_err(|_| format!("invalid denominator in {input:?}"))?;
        if den == 0.0 {
            return Err(format!("zero denominator in {input:?}"));
        }
        num / den
    } else {
        input
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid probability {input:?}"))?
    };
    Ok(value)
}

fn build_dry_response(args: &DryArgs) -> Result<DryResponse, String> {
    let probability = parse_probability(&args.probability)?;
    let attempts = attempts_from_f64(args.attempts).map_err(|e| e.to_string())?;
    let chance = tail_prob(probability, attempts).map_err(|e| e.to_string())?;
    let curve = if args.plot {
        Some(cumulative_curve(probability, attempts, args.plot_points).map_err(|e| e.to_string())?)
    } else {
        None
    };
    Ok(DryResponse {
        probability,
        attempts,
        chance,
        curve,
    })
}

fn build_hunt_request(
    args: &HuntArgs,
    base: &SolverConfig,
) -> Result<(HuntRequest, SolverConfig), String> {
    let mut solver = base.clone();
    if let Some(rounding) = args.rounding {
        solver.rounding = rounding.into();
    }
    if !args.levels.is_empty() {
        solver.confidence_levels = args
            .levels
            .iter()
            .map(|percent| ConfidenceLevel::new(percent / 100.0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("--level: {e}"))?;
    }
    if !args.attempt_time.is_finite() || args.attempt_time < 0.0 {
        return Err("--attempt-time must be a non-negative number of seconds".to_string());
    }
    if let Some(hatch) = args.hatch_time {
        if !hatch.is_finite() || hatch < 0.0 {
            return Err("--hatch-time must be a non-negative number of seconds".to_string());
        }
    }

    let request = HuntRequest {
        modifiers: OddsModifiers {
            generation: args.generation,
            charm: args.charm,
            masuda: args.masuda,
        },
        encounter_rate_percent: args.encounter_rate,
        attempt_seconds: args.attempt_time,
        hatch_seconds: args.hatch_time,
    };
    Ok((request, solver))
}

fn build_hunt_response(result: &QuantileResult, masuda: bool) -> HuntResponse {
    HuntResponse {
        probability: result.probability,
        masuda,
        encounter_scale: result.encounter_scale,
        levels: result
            .entries
            .iter()
            .map(|entry| HuntLevelResponse {
                label: entry.level.label(),
                attempts: entry.attempts,
                hours: entry.hours,
            })
            .collect(),
    }
}

fn build_completion_response(outcome: Convergence, per_attempt: bool) -> CompletionResponse {
    match outcome {
        Convergence::Converged(completion) => CompletionResponse {
            converged: completion.converged,
            per_attempt,
            attempts: Some(completion.attempts),
            probability_at_budget: completion.probability_at_budget,
            threshold_attempts: completion.threshold_attempts,
            non_convergence: None,
        },
        Convergence::NonConvergent(reason) => CompletionResponse {
            converged: false,
            per_attempt,
            attempts: None,
            probability_at_budget: None,
            threshold_attempts: None,
            non_convergence: Some(reason),
        },
    }
}

fn to_json<T: Serialize>(body: &T) -> Result<String, String> {
    serde_json::to_string_pretty(body).map_err(|e| format!("failed to encode JSON: {e}"))
}

fn render_dry(response: &DryResponse) -> String {
    let mut out = format!(
        "There is a {:.1}% chance of the event occurring at least once after you play {} attempts.",
        response.chance * 100.0,
        response.attempts
    );
    if let Some(curve) = &response.curve {
        out.push('\n');
        out.push_str(&render_curve(curve));
    }
    out
}

/// Text bar chart of the cumulative curve, sampled down to a readable height.
fn render_curve(curve: &CumulativeCurve) -> String {
    let step = curve.attempts.len().div_ceil(PLOT_ROWS).max(1);
    let mut out = String::new();
    let mut marked = false;
    for (index, (&n, &p)) in curve
        .attempts
        .iter()
        .zip(&curve.probabilities)
        .enumerate()
    {
        let is_last = index + 1 == curve.attempts.len();
        if index % step != 0 && !is_last {
            continue;
        }
        if !marked && n >= curve.marked_attempts {
            if n > curve.marked_attempts {
                push_bar(&mut out, curve.marked_attempts, curve.marked_probability, true);
            }
            marked = true;
            push_bar(&mut out, n, p, n == curve.marked_attempts);
            continue;
        }
        push_bar(&mut out, n, p, false);
    }
    if !marked {
        push_bar(&mut out, curve.marked_attempts, curve.marked_probability, true);
    }
    if curve.truncated {
        out.push_str("(curve truncated before reaching 99%)\n");
    }
    out.trim_end().to_string()
}

fn push_bar(out: &mut String, attempts: u64, probability: f64, marked: bool) {
    let filled = (probability * PLOT_WIDTH as f64).round() as usize;
    let bar = "#".repeat(filled.min(PLOT_WIDTH));
    let marker = if marked { " X" } else { "" };
    let _ = writeln!(
        out,
        "{attempts:>8} | {bar:<width$} {probability:.3}{marker}",
        width = PLOT_WIDTH
    );
}

fn render_hunt(response: &HuntResponse) -> String {
    let mut out = String::new();
    for level in &response.levels {
        if response.masuda {
            let _ = writeln!(
                out,
                "There is a {} chance to hatch a shiny in {} attempts",
                level.label, level.attempts
            );
        } else {
            let _ = writeln!(
                out,
                "There is a {} chance to get a shiny encounter in {} encounters",
                level.label, level.attempts
            );
        }
        if let Some(hours) = level.hours {
            let _ = writeln!(out, "This would take an approximate of {hours} hours.");
        }
        let _ = writeln!(out, "{SEPARATOR}");
    }
    out.trim_end().to_string()
}

fn render_completion(response: &CompletionResponse, budget: Option<u64>) -> String {
    if let Some(reason) = &response.non_convergence {
        return format!("Completion does not converge: {}.", describe_non_convergence(reason));
    }

    let unit = if response.per_attempt { "attempts" } else { "drops" };
    let mut out = format!(
        "Collecting every item takes an expected {} {unit}.",
        response.attempts.unwrap_or_default()
    );
    if let Some(threshold) = response.threshold_attempts {
        let _ = write!(
            out,
            "\nCompletion reaches the convergence threshold within {threshold} {unit}."
        );
    }
    if let (Some(probability), Some(budget)) = (response.probability_at_budget, budget) {
        let _ = write!(
            out,
            "\nThere is a {probability}% chance of completing after {budget} {unit}."
        );
    }
    out
}

fn describe_non_convergence(reason: &NonConvergence) -> String {
    match reason {
        NonConvergence::InvalidThreshold { threshold } => {
            format!("convergence threshold {threshold} is outside (0, 1)")
        }
        NonConvergence::InvalidMassTolerance { tolerance } => {
            format!("mass tolerance {tolerance} must be finite and >= 0")
        }
        NonConvergence::NoItems => "no item rates were given".to_string(),
        NonConvergence::RateOutOfRange { index, rate } => {
            format!("rate #{} ({rate}) is outside [0, 1]", index + 1)
        }
        NonConvergence::FloorRateOutOfRange { rate } => {
            format!("floor rate {rate} is outside (0, 1]")
        }
        NonConvergence::UnreachableItem { index } => {
            format!("item #{} can never drop", index + 1)
        }
        NonConvergence::MassExceedsOne { mass } => {
            format!("item rates sum to {mass}, more than one drop per attempt")
        }
        NonConvergence::TooManyItems { items, max_items } => {
            format!("{items} items exceeds the limit of {max_items}")
        }
        NonConvergence::AttemptCap { max_attempts } => {
            format!("completion stays below the threshold after {max_attempts} attempts")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(args: &[&str]) -> Result<String, String> {
        let cli = Cli::try_parse_from(args).expect("valid command line");
        run(cli)
    }

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn parse_probability_accepts_fractions_and_decimals() {
        assert_approx(parse_probability("1/128").expect("fraction"), 1.0 / 128.0);
        assert_approx(parse_probability(" 7 / 24 ").expect("fraction"), 7.0 / 24.0);
        assert_approx(parse_probability("0.05").expect("decimal"), 0.05);
        assert_approx(parse_probability("-1/5").expect("negative fraction"), -0.2);
        assert!(parse_probability("1/0").is_err());
        assert!(parse_probability("one in ten").is_err());
    }

    #[test]
    fn dry_reports_statement_with_attempt_count() {
        let out = run_args(&["compassist", "dry", "0.2", "5"]).expect("must run");
        assert_eq!(
            out,
            "There is a 67.2% chance of the event occurring at least once after you play 5 attempts."
        );
    }

    #[test]
    fn dry_rejects_fractional_and_negative_attempts() {
        let err = run_args(&["compassist", "dry", "0.2", "2.5"]).expect_err("must reject");
        assert!(err.contains("Invalid attempt count"));
        let err = run_args(&["compassist", "dry", "0.2", "-1"]).expect_err("must reject");
        assert!(err.contains("Invalid attempt count"));
        let err = run_args(&["compassist", "dry", "3/2", "4"]).expect_err("must reject");
        assert!(err.contains("Invalid probability"));
    }

    #[test]
    fn dry_plot_marks_requested_attempt() {
        let out = run_args(&["compassist", "dry", "1/2", "3", "--plot"]).expect("must run");
        let marked: Vec<&str> = out.lines().filter(|line| line.ends_with(" X")).collect();
        assert_eq!(marked.len(), 1);
        assert!(marked[0].trim_start().starts_with("3 |"));
        assert!(out.contains("0.992"));
    }

    #[test]
    fn dry_json_includes_curve_when_plotting() {
        let out = run_args(&["compassist", "--json", "dry", "0.5", "2", "--plot"]).expect("must run");
        let value: serde_json::Value = serde_json::from_str(&out).expect("valid JSON");
        assert_eq!(value["attempts"], 2);
        assert_approx(value["chance"].as_f64().expect("number"), 0.75);
        assert_eq!(value["curve"]["markedAttempts"], 2);
        assert_eq!(
            value["curve"]["attempts"].as_array().expect("array").len(),
            8
        );
    }

    #[test]
    fn hunt_prints_documented_statements() {
        let out = run_args(&[
            "compassist",
            "hunt",
            "--gen",
            "7",
            "--charm",
            "--encounter-rate",
            "25",
            "--attempt-time",
            "15",
        ])
        .expect("must run");
        let mut lines = out.lines();
        assert_eq!(
            lines.next(),
            Some("There is a 25% chance to get a shiny encounter in 3144 encounters")
        );
        assert_eq!(
            lines.next(),
            Some("This would take an approximate of 13.1 hours.")
        );
        assert_eq!(lines.next(), Some(SEPARATOR));
        assert!(out.contains("in 50280 encounters"));
        assert!(out.contains("approximate of 209.5 hours."));
    }

    #[test]
    fn hunt_masuda_without_hatch_time_prints_attempts_only() {
        let out = run_args(&["compassist", "hunt", "--gen", "6", "--masuda"]).expect("must run");
        assert!(out.starts_with("There is a 25% chance to hatch a shiny in 196 attempts"));
        assert!(!out.contains("hours"));
    }

    #[test]
    fn hunt_rejects_charm_before_it_existed_and_bad_levels() {
        let err = run_args(&["compassist", "hunt", "--gen", "4", "--charm"]).expect_err("must reject");
        assert!(err.contains("Shiny charm did not exist prior to gen 5"));

        let err = run_args(&["compassist", "hunt", "--gen", "7", "--level", "100"])
            .expect_err("must reject");
        assert!(err.contains("--level"));
    }

    #[test]
    fn hunt_custom_levels_and_ceiling_rounding() {
        let out = run_args(&[
            "compassist",
            "--json",
            "hunt",
            "--gen",
            "7",
            "--charm",
            "--level",
            "50",
            "--rounding",
            "ceiling",
        ])
        .expect("must run");
        let value: serde_json::Value = serde_json::from_str(&out).expect("valid JSON");
        let levels = value["levels"].as_array().expect("array");
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0]["label"], "50%");
        assert_eq!(levels[0]["attempts"], 947);
        assert_eq!(value["encounterScale"], 1);
    }

    #[test]
    fn completion_reports_expected_attempts_and_budget_chance() {
        let out = run_args(&[
            "compassist",
            "completion",
            "7/24",
            "7/24",
            "3/24",
            "2/24",
            "2/24",
            "2/24",
            "1/24",
            "--floor-rate",
            "1/20",
            "--attempts",
            "673",
        ])
        .expect("must run");
        assert!(out.contains("expected 673 attempts"));
        assert!(!out.contains("threshold within"));
        assert!(out.contains("63.24% chance of completing after 673 attempts"));
    }

    #[test]
    fn completion_budget_ignores_attempt_cap_from_config() {
        let config = config_from_json(r#"{"convergence": {"maxAttempts": 10}}"#)
            .expect("valid settings");

        let outcome = check_convergence(&[1e-8], None, Some(5), &config.convergence);
        let value = serde_json::to_value(build_completion_response(outcome, false))
            .expect("valid JSON");
        assert_eq!(value["converged"], true);
        assert_eq!(value["attempts"], 100_000_000);
        assert_eq!(value["probabilityAtBudget"], 0.0);
        assert!(value["thresholdAttempts"].is_null());

        let outcome = check_convergence(&[0.5, 0.5], None, None, &config.convergence);
        let out = render_completion(&build_completion_response(outcome, false), None);
        assert!(out.contains("below the threshold after 10 attempts"));
    }

    #[test]
    fn completion_rejects_invalid_threshold_from_config() {
        let config = config_from_json(r#"{"convergence": {"threshold": 1.5}}"#)
            .expect("threshold is checked by the estimator");
        let outcome = check_convergence(&[0.5, 0.5], None, None, &config.convergence);
        assert_eq!(
            render_completion(&build_completion_response(outcome, false), None),
            "Completion does not converge: convergence threshold 1.5 is outside (0, 1)."
        );
    }

    #[test]
    fn completion_reports_non_convergence_as_result() {
        let out = run_args(&["compassist", "completion", "1", "1", "1", "--floor-rate", "1/2"])
            .expect("non-convergence is not an error");
        assert!(out.starts_with("Completion does not converge"));

        let out = run_args(&[
            "compassist",
            "--json",
            "completion",
            "--attempts",
            "3",
            "--",
            "-1/5",
            "1/5",
        ])
        .expect("must run");
        let value: serde_json::Value = serde_json::from_str(&out).expect("valid JSON");
        assert_eq!(value["converged"], false);
        assert_eq!(value["nonConvergence"]["reason"], "rateOutOfRange");
        assert_eq!(value["nonConvergence"]["index"], 0);
    }

    #[test]
    fn completion_without_floor_counts_drops() {
        let out = run_args(&[
            "compassist",
            "completion",
            "7/24",
            "7/24",
            "3/24",
            "2/24",
            "2/24",
            "2/24",
            "1/24",
        ])
        .expect("must run");
        assert!(out.starts_with("Collecting every item takes an expected 33 drops."));
        assert!(out.contains("threshold within 109 drops"));
    }

    #[test]
    fn config_json_overrides_defaults() {
        let config = config_from_json(
            r#"{
              "solver": { "confidenceLevels": [0.5], "rounding": "ceiling" },
              "convergence": { "threshold": 0.9, "maxItems": 4 }
            }"#,
        )
        .expect("valid settings");
        assert_eq!(config.solver.confidence_levels.len(), 1);
        assert_eq!(config.solver.rounding, AttemptRounding::Ceiling);
        assert_approx(config.solver.encounter_confidence, 0.9);
        assert_approx(config.convergence.threshold, 0.9);
        assert_eq!(config.convergence.max_items, 4);
        assert_eq!(config.convergence.max_attempts, 10_000_000);

        let err = config_from_json(r#"{"solver": {"confidenceLevels": [2.0]}}"#)
            .expect_err("must reject level");
        assert!(err.contains("--config"));
    }
}
