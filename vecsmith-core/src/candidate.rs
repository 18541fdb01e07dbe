//! Candidate transformations returned by the generator, and their cleanup.
//!
//! Model output is untrusted text. Cleaning pulls the function out of the
//! surrounding prose and repairs the handful of mistakes that would
//! otherwise fail compilation for reasons unrelated to vectorization.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extractor::vectorized_name;

/// Substrings whose presence shows the candidate uses SIMD.
pub const VECTOR_MARKERS: &[&str] = &[
    "_mm256_", "_mm_", "_mm512_", "__m256", "__m128", "__m512", "vmovups", "vaddps",
];

static WALKTHROUGH_LINES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"^\s*i\s*=\s*\d+\s*:", r"^\s*\d+\s*:", r"^\s*-\s*i=\d+:"]
        .iter()
        .map(|p| Regex::new(p).expect("valid walkthrough regex"))
        .collect()
});

static BROKEN_INTRINSIC_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*mm256\*").expect("valid prefix regex"));

static TIMEVAL_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"struct\s+timeval\s+\w+(?:\s*,\s*\w+)*\s*;").expect("valid timeval regex")
});

static LOCAL_GETTIMEOFDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"gettimeofday\s*\(\s*&\s*(\w+)\s*,\s*NULL\s*\)").expect("valid gettimeofday regex")
});

static CHECKSUM_FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"calc_checksum\s*\(\s*__func__\s*\)").expect("valid checksum regex")
});

static INIT_FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"initialise_arrays\s*\(\s*__func__\s*\)").expect("valid init regex")
});

static UNFENCED_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^(?:void|real_t)\s+\w+_vectorized.*?^\}").expect("valid function regex")
});

/// Raw generator output for one (function, iteration) pair. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTransformation {
    pub function: String,
    pub iteration: u32,
    pub raw: String,
}

impl CandidateTransformation {
    pub fn new(function: impl Into<String>, iteration: u32, raw: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            iteration,
            raw: raw.into(),
        }
    }

    /// Derive the compilable function text.
    pub fn clean(&self) -> CleanedFunction {
        let expected = vectorized_name(&self.function);
        let selected = select_code(&self.raw, &expected);

        let kept: Vec<&str> = selected
            .lines()
            .filter(|line| !WALKTHROUGH_LINES.iter().any(|re| re.is_match(line)))
            .collect();
        let mut code = kept.join("\n");

        code = BROKEN_INTRINSIC_PREFIX
            .replace_all(&code, "_mm256_")
            .into_owned();
        code = TIMEVAL_DECL.replace_all(&code, "").into_owned();
        code = LOCAL_GETTIMEOFDAY
            .replace_all(&code, |caps: &regex::Captures| {
                let slot = match &caps[1] {
                    "start" | "t1" => "t1",
                    _ => "t2",
                };
                format!("gettimeofday(&func_args->{}, NULL)", slot)
            })
            .into_owned();

        let literal = format!("\"{}\"", self.function);
        code = CHECKSUM_FUNC
            .replace_all(&code, format!("calc_checksum({})", literal).as_str())
            .into_owned();
        code = INIT_FUNC
            .replace_all(&code, format!("initialise_arrays({})", literal).as_str())
            .into_owned();

        if !code.contains(&expected) {
            if let Ok(reuse) = Regex::new(&format!(
                r"\breal_t(\s+){}\s*\(",
                regex::escape(&self.function)
            )) {
                let replacement = format!("real_t${{1}}{}(", expected);
                code = reuse.replace_all(&code, replacement.as_str()).into_owned();
            }
        }

        CleanedFunction {
            defines_expected_name: code.contains(&expected),
            code,
        }
    }
}

/// Candidate text ready to be placed in a harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedFunction {
    pub code: String,
    pub defines_expected_name: bool,
}

impl CleanedFunction {
    pub fn has_vector_markers(&self) -> bool {
        has_vector_markers(&self.code)
    }

    /// Why the candidate does not count as vectorized, or `None` if it does.
    pub fn missing_vectorization_reason(&self) -> Option<&'static str> {
        if self.has_vector_markers() {
            None
        } else if self.code.contains("vectorized") {
            Some(
                "Function appears to be a copy of the original without actual vectorization. \
                 The LLM may have misunderstood the task.",
            )
        } else {
            Some(
                "No vector intrinsics found. The code needs to use AVX2 intrinsics like \
                 _mm256_load_ps, _mm256_add_ps, etc. Remember: real_t is float, so use _ps \
                 intrinsics, not _pd.",
            )
        }
    }
}

pub fn has_vector_markers(code: &str) -> bool {
    VECTOR_MARKERS.iter().any(|m| code.contains(m))
}

/// Fenced code blocks in order of appearance. An unclosed trailing fence still counts.
pub fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut in_block = false;
    let mut buffer: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            if in_block {
                blocks.push(buffer.join("\n"));
                buffer.clear();
                in_block = false;
            } else {
                in_block = true;
            }
            continue;
        }
        if in_block {
            buffer.push(line);
        }
    }
    if in_block && !buffer.is_empty() {
        blocks.push(buffer.join("\n"));
    }
    blocks
}

fn select_code(raw: &str, expected: &str) -> String {
    let blocks = fenced_blocks(raw);
    if !blocks.is_empty() {
        let by_name = blocks.iter().rev().find(|b| b.contains(expected));
        let by_marker = || {
            blocks
                .iter()
                .rev()
                .find(|b| b.contains("_mm256_") || b.contains("__m256"))
        };
        return by_name
            .or_else(by_marker)
            .or_else(|| blocks.last())
            .cloned()
            .unwrap_or_default();
    }
    match UNFENCED_FUNCTION.find(raw) {
        Some(m) => m.as_str().to_string(),
        None => raw.to_string(),
    }
}
