//! Ordered post-run classification rules. The first matching rule wins.

use super::{OutcomeKind, PerformanceSample, SpeedupStatus};
use crate::config::ThresholdConfig;
use crate::verifier::{CompileOutput, RunOutput};

pub const CORRECTNESS_PASS: &str = "CORRECTNESS: PASS";
pub const CORRECTNESS_FAIL: &str = "CORRECTNESS: FAIL";
pub const PERFORMANCE_IMPROVED: &str = "PERFORMANCE: IMPROVED";

/// What the rules look at.
#[derive(Debug, Clone, Copy)]
pub struct Evidence<'a> {
    pub compile: &'a CompileOutput,
    pub run: Option<&'a RunOutput>,
    pub sample: Option<&'a PerformanceSample>,
    pub thresholds: &'a ThresholdConfig,
}

impl Evidence<'_> {
    fn stdout(&self) -> &str {
        self.run.map(|r| r.stdout.as_str()).unwrap_or_default()
    }

    fn times(&self) -> (Option<f64>, Option<f64>) {
        match self.sample {
            Some(s) => (s.original_time, s.vectorized_time),
            None => (None, None),
        }
    }
}

pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&Evidence<'_>) -> bool,
    pub kind: fn(&Evidence<'_>) -> OutcomeKind,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

fn compile_failed(e: &Evidence<'_>) -> bool {
    !e.compile.succeeded() || e.run.is_none()
}

fn run_timed_out(e: &Evidence<'_>) -> bool {
    e.run.is_some_and(|r| r.timed_out)
}

fn degenerate(e: &Evidence<'_>) -> bool {
    let floor = e.thresholds.degenerate_floor_secs;
    matches!(e.times(), (Some(o), Some(v)) if o <= floor && v <= floor)
}

fn baseline_suspicious(e: &Evidence<'_>) -> bool {
    let t = e.thresholds;
    let (Some(original), vectorized) = e.times() else {
        return false;
    };
    if original <= t.degenerate_floor_secs || original < t.baseline_floor_secs {
        return true;
    }
    matches!(vectorized, Some(v) if original > 0.0 && v > 0.0 && v / original > t.slowdown_ratio_cap)
}

/// Strict `diff < epsilon` on the reported difference. Absent data defers to the harness verdict.
fn within_tolerance(e: &Evidence<'_>) -> bool {
    e.sample
        .and_then(|s| s.checksum_diff)
        .is_none_or(|diff| diff < e.thresholds.checksum_epsilon)
}

fn correctness_passed(e: &Evidence<'_>) -> bool {
    e.stdout().contains(CORRECTNESS_PASS) && within_tolerance(e)
}

fn correctness_failed(e: &Evidence<'_>) -> bool {
    e.stdout().contains(CORRECTNESS_FAIL)
        || (e.stdout().contains(CORRECTNESS_PASS) && !within_tolerance(e))
}

fn always(_: &Evidence<'_>) -> bool {
    true
}

fn success(e: &Evidence<'_>) -> OutcomeKind {
    let improved = if e.stdout().contains(PERFORMANCE_IMPROVED) {
        true
    } else {
        e.sample
            .and_then(|s| s.speedup)
            .is_some_and(|speedup| speedup > 1.0)
    };
    OutcomeKind::Success(if improved {
        SpeedupStatus::Improved
    } else {
        SpeedupStatus::NoImprovement
    })
}

fn compilation(_: &Evidence<'_>) -> OutcomeKind {
    OutcomeKind::CompilationFailed
}

fn timeout(_: &Evidence<'_>) -> OutcomeKind {
    OutcomeKind::ExecutionTimedOut
}

fn degenerate_kind(_: &Evidence<'_>) -> OutcomeKind {
    OutcomeKind::ExecutionDegenerate
}

fn baseline(_: &Evidence<'_>) -> OutcomeKind {
    OutcomeKind::BaselineSuspicious
}

fn correctness(_: &Evidence<'_>) -> OutcomeKind {
    OutcomeKind::CorrectnessFailed
}

fn incomplete(_: &Evidence<'_>) -> OutcomeKind {
    OutcomeKind::ExecutionIncomplete
}

pub const RULES: &[Rule] = &[
    Rule {
        name: "compile_failed",
        applies: compile_failed,
        kind: compilation,
    },
    Rule {
        name: "run_timed_out",
        applies: run_timed_out,
        kind: timeout,
    },
    Rule {
        name: "degenerate_timing",
        applies: degenerate,
        kind: degenerate_kind,
    },
    Rule {
        name: "baseline_suspicious",
        applies: baseline_suspicious,
        kind: baseline,
    },
    Rule {
        name: "correctness_pass",
        applies: correctness_passed,
        kind: success,
    },
    Rule {
        name: "correctness_fail",
        applies: correctness_failed,
        kind: correctness,
    },
    Rule {
        name: "incomplete",
        applies: always,
        kind: incomplete,
    },
];

/// Evaluate `RULES` top to bottom.
pub fn first_match(evidence: &Evidence<'_>) -> (&'static str, OutcomeKind) {
    RULES
        .iter()
        .find(|rule| (rule.applies)(evidence))
        .map(|rule| (rule.name, (rule.kind)(evidence)))
        .unwrap_or(("incomplete", OutcomeKind::ExecutionIncomplete))
}
