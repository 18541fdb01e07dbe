//! Builds and runs real harnesses with the host compiler.
//!
//! Skipped when `gcc` is missing or the host lacks AVX2.

use std::path::PathBuf;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use vecsmith_core::config::{BenchmarkConfig, CompilerConfig, ThresholdConfig};
use vecsmith_core::harness::arg_setup_for;
use vecsmith_core::{
    CandidateTransformation, CompilerVerifier, FunctionExtractor, HarnessSynthesizer,
    OutcomeClassifier, OutcomeKind, VerificationOutcome, Verify,
};

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tsvc")
}

fn host_can_build() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        let gcc = std::process::Command::new("gcc")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success());
        gcc && std::arch::is_x86_feature_detected!("avx2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

fn benchmark() -> BenchmarkConfig {
    BenchmarkConfig {
        source: fixture_dir().join("tsvc_sample.c"),
        support_dir: fixture_dir(),
        ..BenchmarkConfig::default()
    }
}

/// Timing floors off so a fast host cannot trip the baseline check.
fn thresholds() -> ThresholdConfig {
    ThresholdConfig {
        degenerate_floor_secs: 0.0,
        baseline_floor_secs: 0.0,
        slowdown_ratio_cap: 1e6,
        ..ThresholdConfig::default()
    }
}

/// The reference body renamed, with one intrinsic so it counts as vectorized.
fn identity_candidate(reference: &str, function: &str) -> CandidateTransformation {
    edited_candidate(reference, function, |body| body)
}

fn edited_candidate(
    reference: &str,
    function: &str,
    edit: impl FnOnce(String) -> String,
) -> CandidateTransformation {
    let original = FunctionExtractor::new().extract(reference, function).unwrap().source;
    let renamed = original.replacen(
        &format!("real_t {function}("),
        &format!("real_t {function}_vectorized("),
        1,
    );
    let body = edit(renamed).replacen(
        "{",
        "{\n    __m256 zero = _mm256_setzero_ps();\n    (void)zero;",
        1,
    );
    CandidateTransformation::new(function, 1, format!("```c\n{body}\n```"))
}

async fn build_and_run(
    function: &str,
    candidate: CandidateTransformation,
    thresholds: ThresholdConfig,
) -> (String, VerificationOutcome) {
    let config = benchmark();
    let reference = std::fs::read_to_string(&config.source).unwrap();
    let scratch = TempDir::new().unwrap();
    let verifier = CompilerVerifier::new(&CompilerConfig::default(), &config, scratch.path());
    verifier.preflight().await.unwrap();

    let cleaned = candidate.clean();
    assert!(cleaned.defines_expected_name);
    assert!(cleaned.missing_vectorization_reason().is_none());

    let synthesizer =
        HarnessSynthesizer::new(reference, config.support_headers.clone(), thresholds.checksum_epsilon);
    let harness = synthesizer
        .synthesize(function, &cleaned, &arg_setup_for(function))
        .unwrap();

    let output = verifier
        .compile_and_run(&harness, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(
        output.compile.succeeded(),
        "compilation failed:\n{}\n{}",
        output.compile.diagnostics,
        harness.program
    );
    let outcome = OutcomeClassifier::new(thresholds).classify(function, &output);
    (harness.program, outcome)
}

async fn roundtrip(function: &str) {
    let reference = std::fs::read_to_string(benchmark().source).unwrap();
    let (_, outcome) =
        build_and_run(function, identity_candidate(&reference, function), thresholds()).await;
    assert!(
        matches!(outcome.kind, OutcomeKind::Success(_)),
        "unexpected outcome {:?}\n{:?}",
        outcome.kind,
        outcome.test_output
    );
    let sample = outcome.performance.unwrap();
    assert_eq!(sample.checksum_diff, Some(0.0));
    assert_eq!(sample.original_checksum, sample.vectorized_checksum);
}

fn strict_thresholds() -> ThresholdConfig {
    ThresholdConfig {
        checksum_epsilon: 1e-6,
        ..thresholds()
    }
}

#[tokio::test]
async fn test_strict_epsilon_is_compiled_into_the_comparison() {
    if !host_can_build() {
        eprintln!("skipping: gcc with AVX2 unavailable");
        return;
    }
    let reference = std::fs::read_to_string(benchmark().source).unwrap();
    let (program, outcome) =
        build_and_run("s318", identity_candidate(&reference, "s318"), strict_thresholds()).await;
    assert!(program.contains("if (checksum_diff < 1e-6) {"));
    assert!(program.contains("int s318_arg = 1;"));
    assert!(outcome.success(), "unexpected outcome {:?}\n{:?}", outcome.kind, outcome.test_output);
    assert!(outcome.test_output.unwrap().contains("CORRECTNESS: PASS"));
}

#[tokio::test]
async fn test_wrong_result_fails_the_tolerance_check() {
    if !host_can_build() {
        eprintln!("skipping: gcc with AVX2 unavailable");
        return;
    }
    let reference = std::fs::read_to_string(benchmark().source).unwrap();
    let candidate = edited_candidate(&reference, "s112", |body| {
        body.replacen("a[i+1] = a[i] + b[i];", "a[i+1] = a[i] + b[i] * (real_t)1.5;", 1)
    });
    let (_, outcome) = build_and_run("s112", candidate, strict_thresholds()).await;
    assert_eq!(outcome.kind, OutcomeKind::CorrectnessFailed);
    assert!(outcome.test_output.unwrap().contains("CORRECTNESS: FAIL"));
    let diff = outcome.performance.and_then(|p| p.checksum_diff);
    assert!(diff.is_none_or(|d| !(d < 1e-6)), "diff {diff:?}");
}

#[tokio::test]
async fn test_identity_candidate_passes_for_array_benchmark() {
    if !host_can_build() {
        eprintln!("skipping: gcc with AVX2 unavailable");
        return;
    }
    roundtrip("s112").await;
}

#[tokio::test]
async fn test_identity_candidate_passes_with_copied_helper() {
    if !host_can_build() {
        eprintln!("skipping: gcc with AVX2 unavailable");
        return;
    }
    roundtrip("s31111").await;
}

#[tokio::test]
async fn test_broken_candidate_is_a_compilation_failure() {
    if !host_can_build() {
        eprintln!("skipping: gcc with AVX2 unavailable");
        return;
    }
    let config = benchmark();
    let reference = std::fs::read_to_string(&config.source).unwrap();
    let scratch = TempDir::new().unwrap();
    let verifier = CompilerVerifier::new(&CompilerConfig::default(), &config, scratch.path());

    let candidate = CandidateTransformation::new(
        "s112",
        1,
        "```c\nreal_t s112_vectorized(struct args_t * func_args)\n{\n    __m256 v = _mm256_not_a_real_intrinsic(a);\n    return v\n}\n```",
    );
    let harness = HarnessSynthesizer::new(reference, config.support_headers.clone(), 1e-5)
        .synthesize("s112", &candidate.clean(), &arg_setup_for("s112"))
        .unwrap();
    let output = verifier
        .compile_and_run(&harness, Duration::from_secs(60))
        .await
        .unwrap();

    assert!(!output.compile.succeeded());
    assert!(output.run.is_none());
    let outcome = OutcomeClassifier::new(thresholds()).classify("s112", &output);
    assert_eq!(outcome.kind, OutcomeKind::CompilationFailed);
    assert!(outcome.diagnostic.unwrap().contains("error"));
}
