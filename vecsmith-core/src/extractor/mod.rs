//! Benchmark function extraction.
//!
//! Locates a TSVC benchmark function by name, isolates its computational
//! core and gathers the metadata the generation prompt needs. Structural
//! analysis runs on comment-masked text through a [`SourceScanner`].

pub mod categories;
pub mod declarations;
pub mod scanner;

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExtractError;
pub use categories::{UNCATEGORIZED, category_for, curated_function_names};
pub use declarations::Declaration;
use declarations::{is_instrumentation, is_keyword, synthesize_declarations};
pub use scanner::{BraceScanner, LoopSpan, SourceScanner};
use scanner::{collapse_blank_lines, line_start, reindent};

/// Core text used when the function has no loop worth transforming.
pub const NO_CORE_MARKER: &str = "// No computational loop found";

static BENCHMARK_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*real_t\s+([A-Za-z_]\w*)\s*\(\s*struct\s+args_t\s*\*\s*func_args\s*\)")
        .expect("valid signature regex")
});

static ARRAY_ACCESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+\s*\[[^\]]+\]").expect("valid array access regex"));

static CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Za-z_]\w*)\s*\(").expect("valid call regex"));

static RETURN_EXPR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"return\s+([^;]+);").expect("valid return regex"));

static DUMMY_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bdummy\s*\([^;]*\)\s*;").expect("valid dummy regex"));

static ITERATIONS_BOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\biterations\b").expect("valid iterations regex"));

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"__attribute__\s*\(\((?:[^()]|\([^()]*\))*\)\)").expect("valid attribute regex")
});

const ARRAYS_1D: &[&str] = &[
    "a", "b", "c", "d", "e", "x", "indx", "xx", "yy", "flat_2d_array",
];
const ARRAYS_2D: &[&str] = &["aa", "bb", "cc", "tt"];

/// A global array referenced by a benchmark function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayRef {
    pub name: String,
    pub dims: u8,
}

/// How the computational core was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreOrigin {
    /// One or more loops doing indexed work or calls.
    ComputationalLoops,
    /// The timing loop itself, because all work happens in called helpers.
    TimingLoopWithCalls,
    /// Nothing suitable; the core is [`NO_CORE_MARKER`].
    Missing,
}

/// A benchmark function and everything derived from it. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFunction {
    pub name: String,
    /// Definition exactly as it appears in the source.
    pub source: String,
    /// Definition with comments removed and blank lines collapsed.
    pub stripped: String,
    /// The loop text to be transformed, indented by four spaces.
    pub core: String,
    pub declarations: Vec<Declaration>,
    /// `core` preceded by the synthesized declarations.
    pub core_with_declarations: String,
    pub core_origin: CoreOrigin,
    pub arrays: Vec<ArrayRef>,
    pub return_expression: Option<String>,
    pub category: String,
}

impl TargetFunction {
    /// Whether the function returns the generic whole-array checksum.
    pub fn returns_checksum(&self) -> bool {
        self.return_expression.as_deref().map(str::trim) == Some("calc_checksum(__func__)")
    }

    /// Name the candidate implementation must use.
    pub fn vectorized_name(&self) -> String {
        vectorized_name(&self.name)
    }

    pub fn array_names(&self) -> Vec<&str> {
        self.arrays.iter().map(|a| a.name.as_str()).collect()
    }
}

/// `<name>_vectorized`.
pub fn vectorized_name(function: &str) -> String {
    format!("{}_vectorized", function)
}

/// Byte offsets of a function definition in its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpan {
    /// Start of the line holding the signature.
    pub start: usize,
    /// Offset of the opening brace of the body.
    pub body_open: usize,
    /// One past the closing brace.
    pub end: usize,
}

/// Extracts benchmark functions from TSVC-style sources.
pub struct FunctionExtractor<S: SourceScanner = BraceScanner> {
    scanner: S,
}

impl FunctionExtractor<BraceScanner> {
    pub fn new() -> Self {
        Self {
            scanner: BraceScanner,
        }
    }
}

impl Default for FunctionExtractor<BraceScanner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SourceScanner> FunctionExtractor<S> {
    pub fn with_scanner(scanner: S) -> Self {
        Self { scanner }
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }

    /// Every benchmark function defined in `source`, in file order without duplicates.
    pub fn list_functions(&self, source: &str) -> Vec<String> {
        let masked = self.scanner.mask_comments(source);
        let mut names: Vec<String> = Vec::new();
        for cap in BENCHMARK_SIGNATURE.captures_iter(&masked) {
            let name = cap[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Locate the benchmark function `name` with the fixed `struct args_t *` signature.
    pub fn locate(&self, source: &str, name: &str) -> Result<FunctionSpan, ExtractError> {
        let masked = self.scanner.mask_comments(source);
        self.locate_in_masked(&masked, name)
    }

    fn locate_in_masked(&self, masked: &str, name: &str) -> Result<FunctionSpan, ExtractError> {
        let pattern = format!(
            r"(?m)^[ \t]*real_t\s+{}\s*\(\s*struct\s+args_t\s*\*\s*func_args\s*\)\s*\{{",
            regex::escape(name)
        );
        let not_found = || ExtractError::NotFound {
            name: name.to_string(),
        };
        let re = Regex::new(&pattern).map_err(|_| not_found())?;
        let m = re.find(masked).ok_or_else(not_found)?;
        let body_open = m.end() - 1;
        let close = self
            .scanner
            .matching_close(masked, body_open)
            .ok_or_else(|| ExtractError::Unterminated {
                name: name.to_string(),
            })?;
        Ok(FunctionSpan {
            start: line_start(masked, m.start()),
            body_open,
            end: close + 1,
        })
    }

    /// Verbatim definition of any function named `name`, whatever its signature.
    ///
    /// Used to copy helpers such as `real_t test(real_t* A)` into a harness.
    pub fn locate_definition(&self, source: &str, name: &str) -> Option<String> {
        let masked = self.scanner.mask_comments(source);
        let pattern = format!(
            r"(?m)^[ \t]*(?:(?:static|inline|extern)\s+)*[A-Za-z_]\w*(?:\s+|\s*\*+\s*){}\s*\([^;{{}}]*\)\s*\{{",
            regex::escape(name)
        );
        let re = Regex::new(&pattern).ok()?;
        let m = re.find(&masked)?;
        let close = self.scanner.matching_close(&masked, m.end() - 1)?;
        Some(source[line_start(&masked, m.start())..close + 1].to_string())
    }

    /// Global definitions that precede the first benchmark function.
    ///
    /// Preprocessor lines, prototypes and function bodies are skipped.
    pub fn global_definitions(&self, source: &str) -> String {
        let masked = self.scanner.mask_comments(source);
        let prefix_end = BENCHMARK_SIGNATURE
            .find(&masked)
            .map(|m| m.start())
            .unwrap_or(masked.len());
        let prefix = &masked[..prefix_end];
        let line_end = |from: usize| prefix[from..].find('\n').map_or(prefix.len(), |n| from + n);

        let mut statements = Vec::new();
        let mut current = String::new();
        let mut i = 0;
        while let Some(ch) = prefix[i..].chars().next() {
            if current.trim().is_empty() && ch == '#' {
                i = line_end(i);
                current.clear();
                continue;
            }
            match ch {
                '{' => {
                    let Some(close) = self.scanner.matching_close(prefix, i) else {
                        break;
                    };
                    i = line_end(close + 1);
                    current.clear();
                    continue;
                }
                ';' => {
                    let statement = current.trim().to_string();
                    let without_attr = ATTRIBUTE.replace_all(&statement, "");
                    if !statement.is_empty() && !without_attr.contains('(') {
                        statements.push(format!("{};", statement));
                    }
                    current.clear();
                }
                _ => current.push(ch),
            }
            i += ch.len_utf8();
        }
        statements.join("\n\n")
    }

    /// Extract `name` from `source`.
    pub fn extract(&self, source: &str, name: &str) -> Result<TargetFunction, ExtractError> {
        let masked = self.scanner.mask_comments(source);
        let span = self.locate_in_masked(&masked, name)?;

        let verbatim = source[span.start..span.end].to_string();
        let masked_fn = &masked[span.start..span.end];
        let body_range = (span.body_open - span.start + 1)..(span.end - span.start - 1);
        let body = &masked_fn[body_range];

        let (core_range, core_origin) = self.select_core(body);
        let (core, declarations) = match &core_range {
            Some(range) => {
                let start = {
                    let ls = line_start(body, range.start);
                    if body[ls..range.start].trim().is_empty() {
                        ls
                    } else {
                        range.start
                    }
                };
                let core = reindent(&collapse_blank_lines(&body[start..range.end]), "    ");
                let context = format!("{}\n{}", &body[..range.start], &body[range.end..]);
                let decls = synthesize_declarations(&body[range.clone()], &context, masked_fn);
                (core, decls)
            }
            None => (format!("    {}", NO_CORE_MARKER), Vec::new()),
        };

        let core_with_declarations = if declarations.is_empty() {
            core.clone()
        } else {
            let decl_lines: Vec<String> = declarations.iter().map(Declaration::render).collect();
            format!("{}\n{}", decl_lines.join("\n"), core)
        };

        let stripped = collapse_blank_lines(masked_fn);
        let return_expression = RETURN_EXPR
            .captures_iter(body)
            .last()
            .map(|c| c[1].trim().to_string());

        debug!(
            function = name,
            origin = ?core_origin,
            declarations = declarations.len(),
            "Extracted benchmark function"
        );

        Ok(TargetFunction {
            name: name.to_string(),
            source: verbatim,
            arrays: arrays_used(&stripped),
            stripped,
            core,
            declarations,
            core_with_declarations,
            core_origin,
            return_expression,
            category: category_for(name).to_string(),
        })
    }

    /// Choose the span of `body` to hand to the generator.
    fn select_core(&self, body: &str) -> (Option<Range<usize>>, CoreOrigin) {
        let loops = self.scanner.find_loops(body);
        let benchmark: Vec<bool> = loops
            .iter()
            .map(|l| self.is_benchmark_loop(body, l, &loops))
            .collect();

        let computational: Vec<&LoopSpan> = loops
            .iter()
            .zip(&benchmark)
            .filter(|(l, is_bench)| {
                let loop_body = &body[l.body.clone()];
                !**is_bench && (ARRAY_ACCESS.is_match(loop_body) || has_work_call(loop_body))
            })
            .map(|(l, _)| l)
            .collect();

        let top_level: Vec<&LoopSpan> = computational
            .iter()
            .filter(|l| !computational.iter().any(|outer| outer.contains(l)))
            .copied()
            .collect();

        if let (Some(first), Some(last)) = (top_level.first(), top_level.last()) {
            return (Some(first.start..last.end), CoreOrigin::ComputationalLoops);
        }

        let fallback = loops
            .iter()
            .zip(&benchmark)
            .filter(|(l, is_bench)| **is_bench && has_work_call(&body[l.body.clone()]))
            .map(|(l, _)| l)
            .next();
        match fallback {
            Some(l) => (Some(l.start..l.end), CoreOrigin::TimingLoopWithCalls),
            None => (None, CoreOrigin::Missing),
        }
    }

    /// The repetition loop wrapped around the measured work.
    ///
    /// It is outermost, repeats for `iterations` or feeds the `dummy` sink,
    /// and never uses its induction variable as an index. Inner loops that
    /// index through another variable (`a[k]` with `k += inc`) stay computational.
    fn is_benchmark_loop(&self, body: &str, span: &LoopSpan, loops: &[LoopSpan]) -> bool {
        if loops.iter().any(|outer| outer.contains(span)) {
            return false;
        }
        let loop_body = &body[span.body.clone()];
        let header = &body[span.header.clone()];
        if !DUMMY_CALL.is_match(loop_body) && !ITERATIONS_BOUND.is_match(header) {
            return false;
        }
        let Some(var) = span.induction_var.as_deref() else {
            return true;
        };
        let ident = match Regex::new(&format!(r"\b{}\b", regex::escape(var))) {
            Ok(re) => re,
            Err(_) => return true,
        };
        for (i, ch) in loop_body.char_indices() {
            if ch != '[' {
                continue;
            }
            if let Some(close) = self.scanner.matching_close(loop_body, i) {
                if ident.is_match(&loop_body[i + 1..close]) {
                    return false;
                }
            }
        }
        true
    }
}

/// Calls to anything other than instrumentation, control keywords or macros.
pub(crate) fn work_calls(text: &str) -> Vec<String> {
    let mut calls: Vec<String> = Vec::new();
    for cap in CALL.captures_iter(text) {
        let name = &cap[1];
        if is_keyword(name)
            || is_instrumentation(name)
            || name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            continue;
        }
        if !calls.iter().any(|c| c == name) {
            calls.push(name.to_string());
        }
    }
    calls
}

fn has_work_call(text: &str) -> bool {
    !work_calls(text).is_empty()
}

/// Global arrays indexed in `text` or passed to a call other than `dummy`.
pub fn arrays_used(text: &str) -> Vec<ArrayRef> {
    let without_dummy = DUMMY_CALL.replace_all(text, "");
    let mut found = Vec::new();
    for (names, dims) in [(ARRAYS_1D, 1u8), (ARRAYS_2D, 2u8)] {
        for name in names {
            let escaped = regex::escape(name);
            let indexed = Regex::new(&format!(r"\b{}\s*\[", escaped))
                .map(|re| re.is_match(text))
                .unwrap_or(false);
            let passed = Regex::new(&format!(r"[(,]\s*&?\s*{}\s*[,)]", escaped))
                .map(|re| re.is_match(&without_dummy))
                .unwrap_or(false);
            if indexed || passed {
                found.push(ArrayRef {
                    name: name.to_string(),
                    dims,
                });
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SOURCE: &str = r#"#include "common.h"

__attribute__((aligned(ARRAY_ALIGNMENT))) real_t a[LEN_1D],b[LEN_1D];

int helper_proto(int);

real_t* __restrict__ xx;

real_t s000(struct args_t * func_args)
{
//    linear dependence testing
//    for (fake = 0; fake < 10; fake++) { a[fake] = 0; }

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

real_t test(real_t* A){
  real_t s = (real_t)0.0;
  for (int i = 0; i < 4; i++)
    s += A[i];
  return s;
}

real_t s31111(struct args_t * func_args)
{
    initialise_arrays(__func__);
    gettimeofday(&func_args->t1, NULL);

    real_t sum;
    for (int nl = 0; nl < 2000*iterations; nl++) {
        sum = (real_t)0.;
        sum += test(a);
        sum += test(&a[4]);
        dummy(a, b, c, d, e, aa, bb, cc, sum);
    }

    gettimeofday(&func_args->t2, NULL);
    return sum;
}

real_t s999(struct args_t * func_args)
{
    gettimeofday(&func_args->t1, NULL);
    gettimeofday(&func_args->t2, NULL);
    return 0;
}
"#;

    #[test]
    fn test_list_functions_in_file_order() {
        let extractor = FunctionExtractor::new();
        assert_eq!(extractor.list_functions(SOURCE), vec!["s000", "s31111", "s999"]);
    }

    #[test]
    fn test_extract_selects_inner_loop_not_timing_loop() {
        let tf = FunctionExtractor::new().extract(SOURCE, "s000").unwrap();
        assert_eq!(tf.core_origin, CoreOrigin::ComputationalLoops);
        assert!(tf.core.starts_with("    for (int i = 0;"));
        assert!(!tf.core.contains("nl"));
        assert!(!tf.core.contains("fake"));
        assert!(tf.returns_checksum());
        assert_eq!(tf.array_names(), vec!["a", "b"]);
        assert_eq!(tf.category, UNCATEGORIZED);
        assert!(tf.source.contains("//    linear dependence testing"));
        assert!(!tf.stripped.contains("linear dependence"));
    }

    #[test]
    fn test_extract_falls_back_to_timing_loop_with_calls() {
        let tf = FunctionExtractor::new().extract(SOURCE, "s31111").unwrap();
        assert_eq!(tf.core_origin, CoreOrigin::TimingLoopWithCalls);
        assert!(tf.core.contains("test(&a[4])"));
        assert_eq!(tf.return_expression.as_deref(), Some("sum"));
        assert!(!tf.returns_checksum());
        assert_eq!(tf.category, "reductions");
        let sum = tf.declarations.iter().find(|d| d.name == "sum").unwrap();
        assert_eq!(sum.ty, "real_t");
        assert!(tf.core_with_declarations.starts_with("    real_t sum = 1;"));
    }

    #[test]
    fn test_extract_without_loops_uses_marker() {
        let tf = FunctionExtractor::new().extract(SOURCE, "s999").unwrap();
        assert_eq!(tf.core_origin, CoreOrigin::Missing);
        assert_eq!(tf.core.trim(), NO_CORE_MARKER);
    }

    #[test]
    fn test_extract_missing_function() {
        let err = FunctionExtractor::new().extract(SOURCE, "s00").unwrap_err();
        assert!(matches!(err, ExtractError::NotFound { name } if name == "s00"));
    }

    #[test]
    fn test_commented_out_signature_is_not_found() {
        let src = "//real_t s1(struct args_t * func_args) {\n";
        assert!(FunctionExtractor::new().extract(src, "s1").is_err());
        assert!(FunctionExtractor::new().list_functions(src).is_empty());
    }

    #[test]
    fn test_unterminated_body() {
        let src = "real_t s1(struct args_t * func_args)\n{\n    for (;;) {\n";
        let err = FunctionExtractor::new().extract(src, "s1").unwrap_err();
        assert!(matches!(err, ExtractError::Unterminated { .. }));
    }

    #[test]
    fn test_locate_definition_of_helper() {
        let helper = FunctionExtractor::new().locate_definition(SOURCE, "test").unwrap();
        assert!(helper.starts_with("real_t test(real_t* A){"));
        assert!(helper.trim_end().ends_with('}'));
        assert!(FunctionExtractor::new().locate_definition(SOURCE, "nope").is_none());
    }

    #[test]
    fn test_global_definitions() {
        let globals = FunctionExtractor::new().global_definitions(SOURCE);
        assert!(globals.contains("real_t a[LEN_1D],b[LEN_1D];"));
        assert!(globals.contains("real_t* __restrict__ xx;"));
        assert!(!globals.contains("helper_proto"));
        assert!(!globals.contains("#include"));
    }

    #[test]
    fn test_global_definitions_keep_non_ascii_text() {
        let src = "const char* label = \"größe\";\nreal_t s1(struct args_t * func_args)\n{\n    return 0;\n}\n";
        let globals = FunctionExtractor::new().global_definitions(src);
        assert_eq!(globals, "const char* label = \"größe\";");
    }

    #[test]
    fn test_inner_loop_indexing_through_other_variable_is_computational() {
        let src = r#"real_t s318(struct args_t * func_args)
{
    int inc = *(int*)func_args->arg_info;
    int k, index;
    real_t max;
    for (int nl = 0; nl < iterations/2; nl++) {
        k = 0;
        index = 0;
        max = ABS(a[0]);
        k += inc;
        for (int i = 1; i < LEN_1D; i++) {
            if (ABS(a[k]) <= max) {
                goto L5;
            }
            index = i;
            max = ABS(a[k]);
L5:
            k += inc;
        }
        dummy(a, b, c, d, e, aa, bb, cc, max);
    }
    return max + index + 1;
}
"#;
        let tf = FunctionExtractor::new().extract(src, "s318").unwrap();
        assert_eq!(tf.core_origin, CoreOrigin::ComputationalLoops);
        assert!(tf.core.starts_with("    for (int i = 1; i < LEN_1D; i++) {"));
        assert!(!tf.core.contains("nl"));
        assert!(!tf.core.contains("dummy"));
    }

    #[test]
    fn test_timing_loop_without_dummy_is_detected_by_bound() {
        let src = "real_t s1(struct args_t * func_args)\n{\n    for (int nl = 0; nl < iterations; nl++) {\n        for (int i = 0; i < LEN_1D; i++) {\n            a[i] = b[i];\n        }\n    }\n    return 0;\n}\n";
        let tf = FunctionExtractor::new().extract(src, "s1").unwrap();
        assert_eq!(tf.core_origin, CoreOrigin::ComputationalLoops);
        assert!(tf.core.starts_with("    for (int i = 0;"));
    }

    #[test]
    fn test_arrays_used_ignores_dummy_arguments() {
        let arrays = arrays_used("for (;;) { aa[i][j] = x[i]; dummy(a, b, c, d, e, aa, bb, cc, 0.); }");
        assert_eq!(
            arrays,
            vec![
                ArrayRef { name: "x".into(), dims: 1 },
                ArrayRef { name: "aa".into(), dims: 2 },
            ]
        );
    }

    #[test]
    fn test_work_calls_skip_instrumentation_and_macros() {
        let calls = work_calls("x = ABS(a[i]); y = test(a); dummy(a); if (x) printf(\"\");");
        assert_eq!(calls, vec!["test"]);
    }
}
