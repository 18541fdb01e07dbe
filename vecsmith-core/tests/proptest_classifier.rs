//! Property tests for classification and retry backoff.

use proptest::prelude::*;
use vecsmith_core::classifier::speedup_of;
use vecsmith_core::config::{RetryConfig, ThresholdConfig};
use vecsmith_core::providers::compute_exponential_backoff;
use vecsmith_core::verifier::{CompileOutput, RunOutput};
use vecsmith_core::{OutcomeClassifier, OutcomeKind, SpeedupStatus, VerifierOutput};

fn output(exit_code: i32, stdout: String) -> VerifierOutput {
    let compiled = exit_code == 0;
    VerifierOutput {
        compile: CompileOutput {
            exit_code: Some(exit_code),
            diagnostics: if compiled { String::new() } else { "error".into() },
            timed_out: false,
        },
        run: compiled.then(|| RunOutput {
            exit_code: Some(0),
            stdout,
            ..Default::default()
        }),
        vectorization: None,
    }
}

fn report(original: f64, vectorized: f64, verdict: &str) -> String {
    format!("s000_orig\t{original}\t1.5\ns000_vec\t{vectorized}\t1.5\nCORRECTNESS: {verdict}\n")
}

proptest! {
    #[test]
    fn speedup_is_plain_ratio(o in 1e-6f64..100.0, v in 1e-6f64..100.0) {
        prop_assert_eq!(speedup_of(Some(o), Some(v)), Some(o / v));
    }

    #[test]
    fn speedup_needs_two_positive_times(o in -1.0f64..=0.0, v in 0.0f64..10.0) {
        prop_assert_eq!(speedup_of(Some(o), Some(v)), None);
        prop_assert_eq!(speedup_of(Some(v), None), None);
    }

    #[test]
    fn degenerate_iff_both_times_at_floor(o in 0.0f64..3e-6, v in 0.0f64..3e-6) {
        let thresholds = ThresholdConfig::default();
        let floor = thresholds.degenerate_floor_secs;
        let outcome = OutcomeClassifier::new(thresholds).classify("s000", &output(0, report(o, v, "PASS")));
        let degenerate = outcome.kind == OutcomeKind::ExecutionDegenerate;
        prop_assert_eq!(degenerate, o <= floor && v <= floor);
        // Sub-floor timings are never reported as success.
        prop_assert!(!outcome.success());
    }

    #[test]
    fn passing_runs_improve_iff_faster(o in 1e-3f64..10.0, v in 1e-3f64..10.0) {
        prop_assume!(v / o <= 50.0);
        let outcome = OutcomeClassifier::default().classify("s000", &output(0, report(o, v, "PASS")));
        let expected = if o / v > 1.0 { SpeedupStatus::Improved } else { SpeedupStatus::NoImprovement };
        prop_assert_eq!(outcome.kind, OutcomeKind::Success(expected));
        prop_assert_eq!(outcome.performance.and_then(|p| p.speedup), Some(o / v));
    }

    #[test]
    fn reported_diff_passes_only_strictly_below_epsilon(diff in 0.0f64..4e-6) {
        let thresholds = ThresholdConfig { checksum_epsilon: 1e-6, ..ThresholdConfig::default() };
        let stdout = format!(
            "s000_orig\t0.2\t1.5\ns000_vec\t0.1\t1.5\nChecksum difference: {diff:e}\nCORRECTNESS: PASS\n"
        );
        let outcome = OutcomeClassifier::new(thresholds).classify("s000", &output(0, stdout));
        prop_assert_eq!(outcome.success(), diff < 1e-6);
        if !outcome.success() {
            prop_assert_eq!(outcome.kind, OutcomeKind::CorrectnessFailed);
        }
    }

    #[test]
    fn failed_compilation_wins_over_any_output(stdout in ".*", code in 1i32..255) {
        let outcome = OutcomeClassifier::default().classify("s000", &output(code, stdout));
        prop_assert_eq!(outcome.kind, OutcomeKind::CompilationFailed);
        prop_assert!(outcome.test_output.is_none());
    }

    #[test]
    fn backoff_respects_cap(
        initial in 1u64..5_000,
        multiplier in 1.0f64..4.0,
        max in 1u64..60_000,
        attempt in 0u32..12,
        jitter in any::<bool>(),
    ) {
        let config = RetryConfig {
            max_retries: 12,
            initial_backoff_ms: initial,
            backoff_multiplier: multiplier,
            max_backoff_ms: max,
            jitter,
        };
        let delay = compute_exponential_backoff(&config, attempt);
        if jitter {
            prop_assert!(delay <= max + max / 4);
        } else {
            prop_assert!(delay <= max);
            prop_assert!(compute_exponential_backoff(&config, attempt + 1) >= delay);
        }
    }
}
