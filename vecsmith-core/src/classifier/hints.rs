//! Deterministic repair hints attached to every non-success outcome.

use super::OutcomeKind;

pub const NOT_VECTORIZED: &str = "The code must use AVX2 intrinsics (_mm256_* functions) to vectorize the loop. Review the vectorization steps in the system prompt.";

pub const COMPILATION: &str = "Check syntax, missing headers, or incorrect intrinsic usage";

pub const TIMEOUT: &str = "Possible infinite loop in vectorized code. Common cause: Using _pd intrinsics instead of _ps. Remember: real_t is float, use _mm256_*_ps intrinsics.";

pub const CHECKSUM_MISMATCH: &str = "Checksum mismatch detected. The vectorized version produces different results than the original.";

pub const MEMORY_ACCESS: &str = "Memory access error. Check array bounds in vector operations.";

pub const SIGNATURE: &str =
    "Check if the vectorized function has the correct signature and return statement";

pub const DEGENERATE: &str = "The compiler likely optimized away the entire computation. Ensure the vectorized function has meaningful work that cannot be eliminated. Check that: 1) The dummy() function is called properly with the computed result, 2) The loop variable and computations are actually used, 3) Consider adding __attribute__((noinline)) or volatile keywords to prevent optimization.";

pub const BASELINE: &str = "The baseline (original) function is running too fast for the amount of work it should be doing. This suggests the compiler may have optimized it in ways that make comparison unfair. Consider using volatile variables or compiler barriers to ensure the computation actually happens.";

pub const CONFIGURATION: &str = "Check if tsvc.c and common.c files are accessible";

/// Inputs beyond the kind that select between hint variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct HintContext {
    pub checksum_diff: Option<f64>,
    pub large_diff_threshold: f64,
    pub memory_fault: bool,
}

pub fn correctness_hint(checksum_diff: Option<f64>, large_diff_threshold: f64) -> String {
    match checksum_diff {
        Some(diff) if diff > large_diff_threshold => format!(
            "Large checksum difference ({:.2e}). The vectorized version likely has a logic error.",
            diff
        ),
        Some(diff) => format!(
            "Small checksum difference ({:.2e}). May be due to floating-point precision differences.",
            diff
        ),
        None => CHECKSUM_MISMATCH.to_string(),
    }
}

/// Hint for `kind`; `None` for successes.
pub fn hint_for(kind: &OutcomeKind, context: &HintContext) -> Option<String> {
    let hint = match kind {
        OutcomeKind::Success(_) => return None,
        OutcomeKind::NotVectorized => NOT_VECTORIZED.to_string(),
        OutcomeKind::TsvcModificationFailed => CONFIGURATION.to_string(),
        OutcomeKind::CompilationFailed => COMPILATION.to_string(),
        OutcomeKind::ExecutionTimedOut => TIMEOUT.to_string(),
        OutcomeKind::ExecutionDegenerate => DEGENERATE.to_string(),
        OutcomeKind::BaselineSuspicious => BASELINE.to_string(),
        OutcomeKind::CorrectnessFailed => {
            correctness_hint(context.checksum_diff, context.large_diff_threshold)
        }
        OutcomeKind::ExecutionIncomplete if context.memory_fault => MEMORY_ACCESS.to_string(),
        OutcomeKind::ExecutionIncomplete => SIGNATURE.to_string(),
    };
    Some(hint)
}
