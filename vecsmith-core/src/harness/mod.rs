//! Test harness synthesis.
//!
//! A harness is one self-contained C translation unit holding the reference
//! function, the candidate renamed to `<name>_vectorized`, and a `main`
//! that times and checksums both and prints a line-oriented report:
//!
//! ```text
//! s000_orig\t  0.123456\t<checksum>
//! s000_vec\t  0.045678\t<checksum>
//! Checksum difference: <%e>
//! Speedup: <%.2f>x | N/A
//! CORRECTNESS: PASS | CORRECTNESS: FAIL
//! PERFORMANCE: IMPROVED | PERFORMANCE: NO IMPROVEMENT
//! ```

pub mod args;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::CleanedFunction;
use crate::error::HarnessError;
use crate::extractor::{BraceScanner, FunctionExtractor, SourceScanner, vectorized_name, work_calls};
pub use args::{ArgSetup, arg_setup_for, fallback_helper};

const DUMMY_SINK: &str = "__attribute__((noinline))
int dummy(real_t a[LEN_1D], real_t b[LEN_1D], real_t c[LEN_1D], real_t d[LEN_1D], real_t e[LEN_1D],
          real_t aa[LEN_2D][LEN_2D], real_t bb[LEN_2D][LEN_2D], real_t cc[LEN_2D][LEN_2D], real_t s)
{
    (void)a; (void)b; (void)c; (void)d; (void)e; (void)aa; (void)bb; (void)cc; (void)s;
    __asm__ volatile(\"\" : : : \"memory\");
    return 0;
}";

const SYSTEM_INCLUDES: &[&str] = &[
    "immintrin.h",
    "stdio.h",
    "stdlib.h",
    "math.h",
    "sys/time.h",
];

/// Inclusive, 1-based line range in a rendered program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
}

impl LineSpan {
    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }
}

/// Every slot of a harness program. `render` is the only way to produce one.
#[derive(Debug, Clone)]
pub struct HarnessTemplate<'a> {
    pub function: &'a str,
    pub headers: &'a [String],
    pub globals: &'a str,
    pub helpers: &'a [String],
    pub original: &'a str,
    pub candidate: &'a str,
    pub arg_setup: &'a ArgSetup,
    pub checksum_epsilon: f64,
}

/// A rendered harness with the location of both implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedHarness {
    pub function: String,
    pub program: String,
    pub original_lines: LineSpan,
    pub candidate_lines: LineSpan,
}

struct ProgramBuilder {
    text: String,
    line: usize,
}

impl ProgramBuilder {
    fn new() -> Self {
        Self {
            text: String::new(),
            line: 1,
        }
    }

    /// Append `block` followed by a blank line, returning the lines it occupies.
    fn block(&mut self, block: &str) -> LineSpan {
        let block = block.trim_end_matches('\n');
        let start = self.line;
        let lines = block.lines().count().max(1);
        self.text.push_str(block);
        self.text.push_str("\n\n");
        self.line += lines + 1;
        LineSpan {
            start,
            end: start + lines - 1,
        }
    }
}

impl HarnessTemplate<'_> {
    pub fn render(&self) -> SynthesizedHarness {
        let name = self.function;
        let vec_name = vectorized_name(name);
        let mut program = ProgramBuilder::new();

        program.block(&format!("/* vecsmith harness for {} */", name));

        let includes: Vec<String> = self
            .headers
            .iter()
            .map(|h| format!("#include \"{}\"", h))
            .chain(SYSTEM_INCLUDES.iter().map(|h| format!("#include <{}>", h)))
            .collect();
        program.block(&includes.join("\n"));

        if !self.globals.trim().is_empty() {
            program.block(self.globals);
        }
        program.block(DUMMY_SINK);
        for helper in self.helpers {
            program.block(helper);
        }

        let original_lines = program.block(self.original);
        let candidate_lines = program.block(self.candidate);

        let main = format!(
            r#"int main(int argc, char ** argv)
{{
    (void)argc; (void)argv;
    int* ip;
    real_t s1, s2;
    init(&ip, &s1, &s2);

    struct args_t func_args_orig = {{0}};
    struct args_t func_args_vec = {{0}};
{arg_setup}

    real_t checksum_orig = {name}(&func_args_orig);
    double time_orig = (func_args_orig.t2.tv_sec - func_args_orig.t1.tv_sec) +
                       (func_args_orig.t2.tv_usec - func_args_orig.t1.tv_usec) / 1000000.0;
    printf("{name}_orig\t%10.6f\t%.9g\n", time_orig, (double)checksum_orig);

    real_t checksum_vec = {vec_name}(&func_args_vec);
    double time_vec = (func_args_vec.t2.tv_sec - func_args_vec.t1.tv_sec) +
                      (func_args_vec.t2.tv_usec - func_args_vec.t1.tv_usec) / 1000000.0;
    printf("{name}_vec\t%10.6f\t%.9g\n", time_vec, (double)checksum_vec);

    double checksum_diff = fabs((double)checksum_orig - (double)checksum_vec);
    int timed = time_orig > 0.0 && time_vec > 0.0;
    double speedup = timed ? time_orig / time_vec : 0.0;

    printf("Checksum difference: %e\n", checksum_diff);
    if (timed) {{
        printf("Speedup: %.2fx\n", speedup);
    }} else {{
        printf("Speedup: N/A\n");
    }}
    if (checksum_diff < {epsilon:e}) {{
        printf("CORRECTNESS: PASS\n");
    }} else {{
        printf("CORRECTNESS: FAIL\n");
    }}
    if (timed && speedup > 1.0) {{
        printf("PERFORMANCE: IMPROVED\n");
    }} else {{
        printf("PERFORMANCE: NO IMPROVEMENT\n");
    }}
    return EXIT_SUCCESS;
}}"#,
            arg_setup = self.arg_setup.render(name),
            epsilon = self.checksum_epsilon,
        );
        program.block(&main);

        SynthesizedHarness {
            function: name.to_string(),
            program: program.text,
            original_lines,
            candidate_lines,
        }
    }
}

/// Builds harnesses against one reference source.
pub struct HarnessSynthesizer<S: SourceScanner = BraceScanner> {
    extractor: FunctionExtractor<S>,
    reference: String,
    globals: String,
    headers: Vec<String>,
    checksum_epsilon: f64,
}

impl HarnessSynthesizer<BraceScanner> {
    pub fn new(reference: String, headers: Vec<String>, checksum_epsilon: f64) -> Self {
        Self::with_extractor(FunctionExtractor::new(), reference, headers, checksum_epsilon)
    }
}

impl<S: SourceScanner> HarnessSynthesizer<S> {
    pub fn with_extractor(
        extractor: FunctionExtractor<S>,
        reference: String,
        headers: Vec<String>,
        checksum_epsilon: f64,
    ) -> Self {
        let globals = extractor.global_definitions(&reference);
        Self {
            extractor,
            reference,
            globals,
            headers,
            checksum_epsilon,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Definitions of the non-benchmark functions `original` calls, transitively.
    fn helpers_for(&self, function: &str, original: &str) -> Vec<String> {
        let mut helpers = Vec::new();
        let mut seen = vec![function.to_string()];
        let mut pending = work_calls(original);
        while let Some(call) = pending.pop() {
            if seen.contains(&call) {
                continue;
            }
            seen.push(call.clone());
            let definition = self
                .extractor
                .locate_definition(&self.reference, &call)
                .or_else(|| fallback_helper(&call).map(str::to_string));
            if let Some(definition) = definition {
                pending.extend(work_calls(&definition));
                helpers.push(definition);
            }
        }
        // Callees must precede callers.
        helpers.reverse();
        helpers
    }

    pub fn synthesize(
        &self,
        function: &str,
        candidate: &CleanedFunction,
        special_args: &ArgSetup,
    ) -> Result<SynthesizedHarness, HarnessError> {
        let span = self
            .extractor
            .locate(&self.reference, function)
            .map_err(|_| HarnessError::OriginalNotFound {
                name: function.to_string(),
            })?;
        if candidate.code.trim().is_empty() {
            return Err(HarnessError::MissingCandidate {
                expected: vectorized_name(function),
            });
        }

        let original = &self.reference[span.start..span.end];
        let helpers = self.helpers_for(function, original);
        debug!(
            function,
            helpers = helpers.len(),
            "Synthesizing harness"
        );

        let template = HarnessTemplate {
            function,
            headers: &self.headers,
            globals: &self.globals,
            helpers: &helpers,
            original,
            candidate: &candidate.code,
            arg_setup: special_args,
            checksum_epsilon: self.checksum_epsilon,
        };
        Ok(template.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateTransformation;
    use pretty_assertions::assert_eq;

    const REFERENCE: &str = r#"#include "common.h"

__attribute__((aligned(ARRAY_ALIGNMENT))) real_t a[LEN_1D],b[LEN_1D];

real_t s000(struct args_t * func_args)
{
    initialise_arrays(__func__);
    gettimeofday(&func_args->t1, NULL);
    for (int nl = 0; nl < iterations; nl++) {
        for (int i = 0; i < LEN_1D; i++) {
            a[i] = b[i] + 1;
        }
        dummy(a, b, c, d, e, aa, bb, cc, 0.);
    }
    gettimeofday(&func_args->t2, NULL);
    return calc_checksum(__func__);
}

real_t s31111(struct args_t * func_args)
{
    real_t sum;
    for (int nl = 0; nl < iterations; nl++) {
        sum = test(a);
        dummy(a, b, c, d, e, aa, bb, cc, sum);
    }
    return sum;
}
"#;

    fn synthesizer() -> HarnessSynthesizer {
        HarnessSynthesizer::new(
            REFERENCE.to_string(),
            vec!["common.h".into(), "array_defs.h".into()],
            1e-5,
        )
    }

    fn candidate(function: &str, body: &str) -> CleanedFunction {
        CandidateTransformation::new(function, 1, format!("```c\n{}\n```", body)).clean()
    }

    fn lines(program: &str, span: LineSpan) -> String {
        program
            .lines()
            .skip(span.start - 1)
            .take(span.end - span.start + 1)
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_harness_contains_both_functions_and_report() {
        let cand = candidate(
            "s000",
            "real_t s000_vectorized(struct args_t * func_args) {\n    __m256 v;\n    return 0;\n}",
        );
        let harness = synthesizer()
            .synthesize("s000", &cand, &ArgSetup::Null)
            .unwrap();
        let p = &harness.program;
        assert!(p.contains("#include \"common.h\"\n#include \"array_defs.h\"\n#include <immintrin.h>"));
        assert!(p.contains("real_t a[LEN_1D],b[LEN_1D];"));
        assert!(p.contains("__asm__ volatile(\"\" : : : \"memory\");"));
        assert!(p.contains("init(&ip, &s1, &s2);"));
        assert!(p.contains("real_t checksum_orig = s000(&func_args_orig);"));
        assert!(p.contains("real_t checksum_vec = s000_vectorized(&func_args_vec);"));
        assert!(p.contains(r#"printf("s000_orig\t%10.6f\t%.9g\n""#));
        assert!(p.contains("if (checksum_diff < 1e-5) {"));
        assert!(p.contains("printf(\"Speedup: N/A\\n\");"));
        assert!(p.find("s000(struct args_t").unwrap() < p.find("s000_vectorized(struct").unwrap());
    }

    #[test]
    fn test_line_spans_point_at_functions() {
        let cand = candidate(
            "s000",
            "real_t s000_vectorized(struct args_t * func_args) {\n    __m256 v;\n    return 0;\n}",
        );
        let harness = synthesizer()
            .synthesize("s000", &cand, &ArgSetup::Null)
            .unwrap();
        let original = lines(&harness.program, harness.original_lines);
        assert!(original.starts_with("real_t s000(struct args_t * func_args)"));
        assert!(original.ends_with('}'));
        let vectorized = lines(&harness.program, harness.candidate_lines);
        assert_eq!(vectorized, cand.code);
        assert!(harness.original_lines.end < harness.candidate_lines.start);
    }

    #[test]
    fn test_helper_falls_back_to_table() {
        let cand = candidate("s31111", "real_t s31111_vectorized(struct args_t * func_args) { __m256 v; return 0; }");
        let harness = synthesizer()
            .synthesize("s31111", &cand, &ArgSetup::Null)
            .unwrap();
        let helper_at = harness.program.find("real_t test(real_t* A)").unwrap();
        let original_at = harness.program.find("real_t s31111(struct").unwrap();
        assert!(helper_at < original_at);
    }

    #[test]
    fn test_special_arguments_rendered_after_init() {
        let cand = candidate("s000", "real_t s000_vectorized(struct args_t * func_args) { __m256 v; return 0; }");
        let harness = synthesizer()
            .synthesize("s000", &cand, &ArgSetup::InitScalarPair)
            .unwrap();
        let init_at = harness.program.find("init(&ip, &s1, &s2);").unwrap();
        let args_at = harness.program.find("s000_args = { s1, s2 };").unwrap();
        assert!(init_at < args_at);
    }

    #[test]
    fn test_missing_original() {
        let cand = candidate("s999", "__m256 v;");
        let err = synthesizer()
            .synthesize("s999", &cand, &ArgSetup::Null)
            .unwrap_err();
        assert!(matches!(err, HarnessError::OriginalNotFound { name } if name == "s999"));
    }

    #[test]
    fn test_empty_candidate() {
        let cand = CleanedFunction {
            code: "  ".into(),
            defines_expected_name: false,
        };
        let err = synthesizer()
            .synthesize("s000", &cand, &ArgSetup::Null)
            .unwrap_err();
        assert!(matches!(err, HarnessError::MissingCandidate { .. }));
    }

    #[test]
    fn test_epsilon_is_rendered_from_config() {
        let synth = HarnessSynthesizer::new(REFERENCE.to_string(), vec![], 1e-6);
        let cand = candidate("s000", "real_t s000_vectorized(struct args_t * func_args) { __m256 v; return 0; }");
        let harness = synth.synthesize("s000", &cand, &ArgSetup::Null).unwrap();
        assert!(harness.program.contains("if (checksum_diff < 1e-6) {"));
    }

    #[test]
    fn test_line_span_contains() {
        let span = LineSpan { start: 3, end: 5 };
        assert!(span.contains(3));
        assert!(span.contains(5));
        assert!(!span.contains(6));
    }
}
