//! Outcome classification.
//!
//! Maps what the verifier observed onto a closed set of outcome kinds, each
//! with a persisted `error_type` string, a diagnostic and a repair hint. The
//! candidate is never judged here beyond what the harness reported.

pub mod hints;
pub mod rules;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ThresholdConfig;
use crate::error::HarnessError;
use crate::verifier::{RunOutput, VectorizationReport, VerifierOutput};

pub use hints::{HintContext, hint_for};
pub use rules::{Evidence, RULES, Rule};

pub const EXECUTION_TIMEOUT: &str = "Execution timeout";
pub const DEGENERATE_MESSAGE: &str = "Both original and vectorized versions executed in 0.000000 seconds, suggesting compiler optimization eliminated the computation";
pub const BASELINE_MESSAGE: &str =
    "Original version executed suspiciously fast, suggesting unintended compiler optimization";
pub const CHECKSUM_MESSAGE: &str = "Checksum mismatch between original and vectorized versions";

/// Whether a correct candidate was also faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedupStatus {
    Improved,
    NoImprovement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    NotVectorized,
    TsvcModificationFailed,
    CompilationFailed,
    ExecutionTimedOut,
    ExecutionDegenerate,
    BaselineSuspicious,
    CorrectnessFailed,
    ExecutionIncomplete,
    Success(SpeedupStatus),
}

impl OutcomeKind {
    /// The persisted `error_type`; `None` for successes.
    pub fn error_type(&self) -> Option<&'static str> {
        match self {
            OutcomeKind::NotVectorized => Some("not_vectorized"),
            OutcomeKind::TsvcModificationFailed => Some("tsvc_modification"),
            OutcomeKind::CompilationFailed => Some("compilation"),
            OutcomeKind::ExecutionTimedOut => Some("timeout"),
            OutcomeKind::ExecutionDegenerate => Some("execution_time_zero"),
            OutcomeKind::BaselineSuspicious => Some("baseline_too_fast"),
            OutcomeKind::CorrectnessFailed => Some("correctness"),
            OutcomeKind::ExecutionIncomplete => Some("execution_incomplete"),
            OutcomeKind::Success(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Success(_))
    }

    pub fn speedup_status(&self) -> Option<SpeedupStatus> {
        match self {
            OutcomeKind::Success(status) => Some(*status),
            _ => None,
        }
    }

    /// Outcomes caused by the setup rather than the candidate.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, OutcomeKind::TsvcModificationFailed)
    }

    /// Inverse of `error_type`, for reading persisted records back.
    pub fn from_persisted(error_type: Option<&str>, speedup: Option<SpeedupStatus>) -> Option<Self> {
        let kind = match error_type {
            None => OutcomeKind::Success(speedup.unwrap_or(SpeedupStatus::NoImprovement)),
            Some("not_vectorized") => OutcomeKind::NotVectorized,
            Some("tsvc_modification") => OutcomeKind::TsvcModificationFailed,
            Some("compilation") => OutcomeKind::CompilationFailed,
            Some("timeout") => OutcomeKind::ExecutionTimedOut,
            Some("execution_time_zero") => OutcomeKind::ExecutionDegenerate,
            Some("baseline_too_fast") => OutcomeKind::BaselineSuspicious,
            Some("correctness") => OutcomeKind::CorrectnessFailed,
            Some("execution_incomplete") => OutcomeKind::ExecutionIncomplete,
            Some(_) => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeKind::Success(SpeedupStatus::Improved) => write!(f, "success (improved)"),
            OutcomeKind::Success(SpeedupStatus::NoImprovement) => {
                write!(f, "success (no improvement)")
            }
            other => f.write_str(other.error_type().unwrap_or("unknown")),
        }
    }
}

/// Timings and checksums reported by the harness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub original_time: Option<f64>,
    pub vectorized_time: Option<f64>,
    pub original_checksum: Option<f64>,
    pub vectorized_checksum: Option<f64>,
    pub speedup: Option<f64>,
    pub checksum_diff: Option<f64>,
}

/// `t_o / t_v` when both are strictly positive.
pub fn speedup_of(original_time: Option<f64>, vectorized_time: Option<f64>) -> Option<f64> {
    match (original_time, vectorized_time) {
        (Some(o), Some(v)) if o > 0.0 && v > 0.0 => Some(o / v),
        _ => None,
    }
}

fn timing_line(stdout: &str, label: &str) -> (Option<f64>, Option<f64>) {
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some(label) {
            continue;
        }
        let time = fields.next().and_then(|f| f.parse().ok());
        let checksum = fields.next().and_then(|f| f.parse().ok());
        return (time, checksum);
    }
    (None, None)
}

fn prefixed_value(stdout: &str, prefix: &str) -> Option<f64> {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(prefix))
        .and_then(|rest| rest.trim().parse().ok())
}

impl PerformanceSample {
    pub fn from_measurements(
        original_time: Option<f64>,
        vectorized_time: Option<f64>,
        original_checksum: Option<f64>,
        vectorized_checksum: Option<f64>,
        reported_diff: Option<f64>,
    ) -> Self {
        let checksum_diff = reported_diff.or(match (original_checksum, vectorized_checksum) {
            (Some(o), Some(v)) => Some((o - v).abs()),
            _ => None,
        });
        Self {
            original_time,
            vectorized_time,
            original_checksum,
            vectorized_checksum,
            speedup: speedup_of(original_time, vectorized_time),
            checksum_diff,
        }
    }

    /// Parse the harness report for `function`. `None` if neither timing line is present.
    pub fn parse(stdout: &str, function: &str) -> Option<Self> {
        let (original_time, original_checksum) =
            timing_line(stdout, &format!("{}_orig", function));
        let (vectorized_time, vectorized_checksum) =
            timing_line(stdout, &format!("{}_vec", function));
        if original_time.is_none() && vectorized_time.is_none() {
            return None;
        }
        Some(Self::from_measurements(
            original_time,
            vectorized_time,
            original_checksum,
            vectorized_checksum,
            prefixed_value(stdout, "Checksum difference:"),
        ))
    }
}

/// The classified result of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub kind: OutcomeKind,
    /// Compiler output or a description of the failure.
    pub diagnostic: Option<String>,
    /// Harness stdout.
    pub test_output: Option<String>,
    pub hint: Option<String>,
    pub performance: Option<PerformanceSample>,
    pub vectorization: Option<VectorizationReport>,
}

impl VerificationOutcome {
    pub fn success(&self) -> bool {
        self.kind.is_success()
    }

    fn without_run(kind: OutcomeKind, diagnostic: String) -> Self {
        Self {
            hint: hint_for(&kind, &HintContext::default()),
            kind,
            diagnostic: Some(diagnostic),
            test_output: None,
            performance: None,
            vectorization: None,
        }
    }

    /// The candidate carries no SIMD markers. Decided before synthesis.
    pub fn not_vectorized(reason: &str) -> Self {
        Self::without_run(OutcomeKind::NotVectorized, reason.to_string())
    }

    /// The harness could not be built around the candidate.
    pub fn harness_failed(error: &HarnessError) -> Self {
        Self::without_run(
            OutcomeKind::TsvcModificationFailed,
            format!("Failed to create modified tsvc.c: {}", error),
        )
    }
}

/// Applies `RULES` with the configured thresholds.
#[derive(Debug, Clone, Default)]
pub struct OutcomeClassifier {
    thresholds: ThresholdConfig,
}

impl OutcomeClassifier {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub fn classify(&self, function: &str, output: &VerifierOutput) -> VerificationOutcome {
        let run = output.run.as_ref();
        let sample = run.and_then(|r| PerformanceSample::parse(&r.stdout, function));
        let evidence = Evidence {
            compile: &output.compile,
            run,
            sample: sample.as_ref(),
            thresholds: &self.thresholds,
        };
        let (rule, kind) = rules::first_match(&evidence);
        debug!(function, rule, kind = %kind, "Classified run");

        let diagnostic = match kind {
            OutcomeKind::CompilationFailed => Some(output.compile.diagnostics.clone()),
            OutcomeKind::ExecutionTimedOut => Some(EXECUTION_TIMEOUT.to_string()),
            OutcomeKind::ExecutionDegenerate => Some(DEGENERATE_MESSAGE.to_string()),
            OutcomeKind::BaselineSuspicious => Some(BASELINE_MESSAGE.to_string()),
            OutcomeKind::CorrectnessFailed => Some(CHECKSUM_MESSAGE.to_string()),
            OutcomeKind::ExecutionIncomplete => run.map(|r| incomplete_diagnostic(function, r)),
            _ => None,
        };
        let context = HintContext {
            checksum_diff: sample.and_then(|s| s.checksum_diff),
            large_diff_threshold: self.thresholds.large_diff_threshold,
            memory_fault: run.is_some_and(RunOutput::crashed_on_memory_access),
        };
        let test_output = match kind {
            OutcomeKind::CompilationFailed | OutcomeKind::ExecutionTimedOut => None,
            _ => run.map(|r| r.stdout.clone()),
        };

        VerificationOutcome {
            hint: hint_for(&kind, &context),
            kind,
            diagnostic,
            test_output,
            performance: sample,
            vectorization: output.vectorization.clone(),
        }
    }
}

fn incomplete_diagnostic(function: &str, run: &RunOutput) -> String {
    let mut message = if run.stdout.contains("Unknown function name") {
        "calc_checksum failed: function name not recognized".to_string()
    } else if !run.stdout.contains(&format!("{}_vec", function)) {
        "Vectorized function did not execute properly".to_string()
    } else {
        "Test execution completed but results unclear".to_string()
    };
    if !run.stderr.trim().is_empty() {
        message.push_str("\nSTDERR: ");
        message.push_str(run.stderr.trim());
    }
    match (run.exit_code, run.signal) {
        (Some(code), _) if code != 0 => message.push_str(&format!("\nExit code: {}", code)),
        (None, Some(signal)) => message.push_str(&format!("\nTerminated by signal {}", signal)),
        _ => {}
    }
    message
}
