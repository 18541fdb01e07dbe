//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use vecsmith_core::config::RetryConfig;
use vecsmith_core::error::{EnvironmentError, VerifierError};
use vecsmith_core::verifier::{CompileOutput, RunOutput};
use vecsmith_core::{SynthesizedHarness, Verify, VerifierOutput};

pub const SAMPLE: &str = include_str!("../fixtures/tsvc/tsvc_sample.c");

pub const HEADERS: &[&str] = &["common.h", "array_defs.h"];

pub fn headers() -> Vec<String> {
    HEADERS.iter().map(|h| h.to_string()).collect()
}

/// Retry policy that never sleeps long enough to matter.
pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 1,
        initial_backoff_ms: 1,
        backoff_multiplier: 1.0,
        max_backoff_ms: 1,
        jitter: false,
    }
}

/// A fenced AVX2 candidate for `function`.
pub fn vector_candidate(function: &str) -> String {
    format!(
        "Here is the vectorized version:\n\n```c\nreal_t {function}_vectorized(struct args_t * func_args)\n{{\n    initialise_arrays(__func__);\n    gettimeofday(&func_args->t1, NULL);\n    for (int nl = 0; nl < iterations; nl++) {{\n        __m256 zero = _mm256_setzero_ps();\n        (void)zero;\n        dummy(a, b, c, d, e, aa, bb, cc, 0.);\n    }}\n    gettimeofday(&func_args->t2, NULL);\n    return calc_checksum(__func__);\n}}\n```\n"
    )
}

/// Harness stdout for a run with the given timings and checksums.
pub fn harness_stdout(function: &str, orig: (f64, f64), vec: (f64, f64), pass: bool) -> String {
    let diff = (orig.1 - vec.1).abs();
    let speedup = if vec.0 > 0.0 {
        format!("Speedup: {:.2}x", orig.0 / vec.0)
    } else {
        "Speedup: N/A".to_string()
    };
    let mut out = format!(
        "{function}_orig\t{:10.6}\t{}\n{function}_vec\t{:10.6}\t{}\nChecksum difference: {:e}\n{speedup}\n",
        orig.0, orig.1, vec.0, vec.1, diff
    );
    out.push_str(if pass {
        "CORRECTNESS: PASS\n"
    } else {
        "CORRECTNESS: FAIL\n"
    });
    if pass {
        out.push_str(if orig.0 > vec.0 {
            "PERFORMANCE: IMPROVED\n"
        } else {
            "PERFORMANCE: NO IMPROVEMENT\n"
        });
    }
    out
}

pub fn ran(stdout: String) -> VerifierOutput {
    VerifierOutput {
        compile: CompileOutput {
            exit_code: Some(0),
            ..Default::default()
        },
        run: Some(RunOutput {
            exit_code: Some(0),
            stdout,
            ..Default::default()
        }),
        vectorization: None,
    }
}

pub fn compile_error(message: &str) -> VerifierOutput {
    VerifierOutput {
        compile: CompileOutput {
            exit_code: Some(1),
            diagnostics: message.to_string(),
            timed_out: false,
        },
        run: None,
        vectorization: None,
    }
}

pub fn passing(function: &str) -> VerifierOutput {
    ran(harness_stdout(function, (0.5, 1024.5), (0.25, 1024.5), true))
}

pub fn mismatching(function: &str) -> VerifierOutput {
    ran(harness_stdout(function, (0.5, 1024.5), (0.25, 1019.5), false))
}

/// Verifier that replays scripted outputs and records what it was asked to build.
#[derive(Default)]
pub struct ScriptedVerifier {
    outputs: Mutex<VecDeque<VerifierOutput>>,
    seen: Mutex<Vec<String>>,
    preflight_error: Option<String>,
}

impl ScriptedVerifier {
    pub fn new(outputs: Vec<VerifierOutput>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into()),
            ..Default::default()
        }
    }

    pub fn failing_preflight(message: &str) -> Self {
        Self {
            preflight_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Functions of the harnesses received, in order.
    pub fn functions(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Verify for ScriptedVerifier {
    async fn compile_and_run(
        &self,
        harness: &SynthesizedHarness,
        _run_timeout: Duration,
    ) -> Result<VerifierOutput, VerifierError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(harness.function.clone());
        }
        let next = self.outputs.lock().ok().and_then(|mut q| q.pop_front());
        next.ok_or_else(|| VerifierError::Spawn {
            program: "scripted".to_string(),
            message: "no scripted output left".to_string(),
        })
    }

    async fn preflight(&self) -> Result<(), EnvironmentError> {
        match &self.preflight_error {
            Some(message) => Err(EnvironmentError::CompilerUnavailable {
                compiler: "scripted".to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}
