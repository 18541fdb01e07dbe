//! Prompt construction for the generation agent.

use crate::classifier::OutcomeKind;
use crate::extractor::TargetFunction;

use super::Feedback;

pub const INITIAL_USER_MESSAGE: &str = "Generate the vectorized version of the function.";

const METHODOLOGY: &str = r#"When doing vectorization analysis, follow these steps:
1. Simplify the case by setting the loop iterations to a small number and enumerate the process as the code written.
2. When enumerating, recognize and remove overwritten assignments and calculations that cancel each other out to make the dependencies clear.
3. For the rest of operations, identify which element is referred as its original value and which one is referred as its updated value.
   CRITICAL: If a[i] depends on a[j] and a[j] might update during the loop, you must split the vectorization into phases:
   - Phase 1: Process elements that use original values
   - Phase 2: Process elements that use updated values
4. Load original values (not updated if executing sequentially like a[i+1]) directly from memory first, then compute elements that use original values, then store these elements.
   After that, load the updated values from memory, then compute elements that use updated values, finally store these elements.
5. Make necessary unrolling, loop distribution, loop interchanging, statement reordering based on step 3 & 4. Feel free to optimize and restructure as needed.
6. Understand the pattern, then generate the actual vectorized code for the full loop range, ensuring final results match the original."#;

const DEGENERATE_FIXES: &str = r#"This suggests the compiler eliminated the entire loop because it detected no meaningful side effects. To fix this:

1. Ensure the dummy() function is called with the computed result (not a constant)
2. Make sure the loop variable and intermediate results are actually used
3. Consider adding __attribute__((noinline)) to prevent function inlining
4. Use volatile keywords for critical variables if needed
5. Ensure the return value depends on the actual computation

Generate a corrected vectorized function that cannot be optimized away by the compiler."#;

/// The per-function system prompt. Identical across iterations.
pub fn system_prompt(target: &TargetFunction) -> String {
    let vectorized = target.vectorized_name();
    let return_expression = target.return_expression.as_deref().unwrap_or("None");
    format!(
        r#"You are an expert in SIMD vectorization using AVX2 intrinsics.

Given the following original TSVC function:

```c
{code}
```

Generate a vectorized version named `{vectorized}` that:

1. **Preserves the exact same behavior** as the original function
2. **Uses AVX2 intrinsics** (_mm256_* functions) for vectorization
3. **Returns the same value**: {return_expression}
4. **Maintains the same function signature**: real_t {vectorized}(struct args_t * func_args)

**CRITICAL: Data Type and Intrinsics**
- `real_t` is defined as `float` (single precision), NOT double

Key requirements based on the original function:
- Arrays used: {arrays}
- Timing: Use gettimeofday with func_args->t1 and func_args->t2 (already declared in func_args)
- Include necessary headers like #include <immintrin.h> for AVX2
- Call dummy() the same number of times as the original (typically inside the 'nl' loop)
- Arrays are already declared globally - do NOT redeclare them

{methodology}"#,
        code = target.stripped.trim(),
        arrays = target.array_names().join(", "),
        methodology = METHODOLOGY,
    )
}

/// The user turn for a repair attempt, chosen by the previous outcome.
pub fn repair_message(feedback: &Feedback) -> String {
    let diagnostic = feedback.diagnostic.as_deref().unwrap_or("Unknown error");
    let test_output = feedback.test_output.as_deref().unwrap_or_default();

    let mut message = match feedback.kind {
        OutcomeKind::CompilationFailed => format!(
            "The previous attempt had compilation errors:\n\n{}\n\nPlease fix these errors and generate a corrected vectorized function.",
            diagnostic
        ),
        OutcomeKind::CorrectnessFailed => format!(
            "The previous attempt produced incorrect results:\n\n{}\n\nPlease analyze the issue and generate a corrected vectorized function that produces the same results as the original.",
            test_output
        ),
        OutcomeKind::NotVectorized => format!(
            "The previous attempt did not actually use vector intrinsics. You must use AVX2 intrinsics (_mm256_* functions) to vectorize the loops.\n\nPrevious incorrect attempt:\n{}\n\nGenerate a properly vectorized version using AVX2 intrinsics.",
            feedback.previous_code
        ),
        OutcomeKind::ExecutionDegenerate => format!(
            "The previous attempt had both original and vectorized versions execute in 0.000000 seconds, indicating the compiler optimized away the computation:\n\n{}\n\n{}",
            test_output, DEGENERATE_FIXES
        ),
        _ => format!(
            "The previous attempt had an error:\n{}\n\nPlease fix the issue and generate a corrected vectorized function.",
            diagnostic
        ),
    };

    if let Some(hint) = feedback.hint.as_deref().filter(|h| !h.is_empty()) {
        message.push_str("\n\nHint: ");
        message.push_str(hint);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::FunctionExtractor;

    const SOURCE: &str = r#"real_t s000(struct args_t * func_args)
{
    // linear dependence testing
    initialise_arrays(__func__);
    gettimeofday(&func_args->t1, NULL);

    for (int nl = 0; nl < 2*iterations; nl++) {
        for (int i = 0; i < LEN_1D; i++) {
            a[i] = b[i] + 1;
        }
        dummy(a, b, c, d, e, aa, bb, cc, 0.);
    }

    gettimeofday(&func_args->t2, NULL);
    return calc_checksum(__func__);
}
"#;

    fn feedback(kind: OutcomeKind) -> Feedback {
        Feedback {
            kind,
            diagnostic: Some("error: expected ';'".into()),
            test_output: Some("CORRECTNESS: FAIL".into()),
            hint: Some("Check syntax".into()),
            previous_code: "real_t s000_vectorized(struct args_t * func_args) { return 0; }".into(),
        }
    }

    #[test]
    fn test_system_prompt_embeds_function() {
        let target = FunctionExtractor::new().extract(SOURCE, "s000").unwrap();
        let prompt = system_prompt(&target);
        assert!(prompt.starts_with("You are an expert in SIMD vectorization using AVX2 intrinsics."));
        assert!(prompt.contains("Generate a vectorized version named `s000_vectorized`"));
        assert!(prompt.contains("**Returns the same value**: calc_checksum(__func__)"));
        assert!(prompt.contains("- Arrays used: a, b"));
        assert!(prompt.contains("NOT double"));
        assert!(!prompt.contains("linear dependence testing"));
        assert!(prompt.contains("6. Understand the pattern"));
    }

    #[test]
    fn test_compilation_message_carries_diagnostic_and_hint() {
        let message = repair_message(&feedback(OutcomeKind::CompilationFailed));
        assert!(message.starts_with("The previous attempt had compilation errors:\n\nerror: expected ';'"));
        assert!(message.ends_with("\n\nHint: Check syntax"));
    }

    #[test]
    fn test_correctness_message_carries_output() {
        let message = repair_message(&feedback(OutcomeKind::CorrectnessFailed));
        assert!(message.contains("produced incorrect results:\n\nCORRECTNESS: FAIL"));
    }

    #[test]
    fn test_not_vectorized_message_carries_previous_code() {
        let message = repair_message(&feedback(OutcomeKind::NotVectorized));
        assert!(message.contains("Previous incorrect attempt:\nreal_t s000_vectorized"));
    }

    #[test]
    fn test_degenerate_and_generic_messages() {
        let message = repair_message(&feedback(OutcomeKind::ExecutionDegenerate));
        assert!(message.contains("5. Ensure the return value depends on the actual computation"));

        let mut generic = feedback(OutcomeKind::ExecutionTimedOut);
        generic.hint = None;
        generic.diagnostic = Some("Execution timeout".into());
        assert_eq!(
            repair_message(&generic),
            "The previous attempt had an error:\nExecution timeout\n\nPlease fix the issue and generate a corrected vectorized function."
        );
    }
}
