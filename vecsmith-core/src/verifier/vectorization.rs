//! Parsing of GCC `-fopt-info-vec` remarks.
//!
//! Remarks look like `harness_s000.c:23:9: optimized: loop vectorized using
//! 32 byte vectors`. They are attributed to the original or the candidate
//! by line number using the spans recorded when the harness was rendered.

use serde::{Deserialize, Serialize};

use crate::harness::SynthesizedHarness;

const NOISE: &[&str] = &[
    "statement clobbers memory",
    "no vectype",
    "basic block part vectorized",
    "include/",
    ".h:",
];

/// Which of the two implementations the host compiler vectorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorizationVerdict {
    OriginalOnly,
    CandidateOnly,
    Both,
    Neither,
}

impl VectorizationVerdict {
    pub fn interpretation(&self) -> &'static str {
        match self {
            VectorizationVerdict::OriginalOnly => {
                "Compiler auto-vectorized the original but not the candidate"
            }
            VectorizationVerdict::CandidateOnly => {
                "Compiler auto-vectorized the candidate but not the original"
            }
            VectorizationVerdict::Both => "Compiler auto-vectorized both the original and the candidate",
            VectorizationVerdict::Neither => "Compiler auto-vectorized neither function",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorizationReport {
    pub original_vectorized: bool,
    pub candidate_vectorized: bool,
    pub original_optimized: Vec<String>,
    pub candidate_optimized: Vec<String>,
    pub original_missed: Vec<String>,
    pub candidate_missed: Vec<String>,
    pub verdict: VectorizationVerdict,
    pub interpretation: String,
}

impl VectorizationReport {
    pub fn is_empty(&self) -> bool {
        self.original_optimized.is_empty()
            && self.candidate_optimized.is_empty()
            && self.original_missed.is_empty()
            && self.candidate_missed.is_empty()
    }
}

fn is_optimized(line: &str) -> bool {
    line.contains("optimized:") && line.contains("loop vectorized")
}

fn is_missed(line: &str) -> bool {
    line.contains("missed:") && line.contains("vectoriz")
}

/// Line number following `<file>:` in a remark.
fn remark_line(line: &str, file_name: &str) -> Option<usize> {
    let needle = format!("{}:", file_name);
    let at = line.find(&needle)? + needle.len();
    let digits: String = line[at..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn push_unique(list: &mut Vec<String>, line: &str) {
    if !list.iter().any(|l| l == line) {
        list.push(line.to_string());
    }
}

/// Build a report from compiler diagnostics for the harness compiled as `file_name`.
pub fn parse_vectorization_remarks(
    diagnostics: &str,
    file_name: &str,
    harness: &SynthesizedHarness,
) -> VectorizationReport {
    let mut original_optimized = Vec::new();
    let mut candidate_optimized = Vec::new();
    let mut original_missed = Vec::new();
    let mut candidate_missed = Vec::new();

    for raw in diagnostics.lines() {
        let line = raw.trim();
        if line.is_empty() || NOISE.iter().any(|n| line.contains(n)) {
            continue;
        }
        let optimized = is_optimized(line);
        if !optimized && !is_missed(line) {
            continue;
        }
        let Some(number) = remark_line(line, file_name) else {
            continue;
        };
        let target = if harness.original_lines.contains(number) {
            if optimized {
                &mut original_optimized
            } else {
                &mut original_missed
            }
        } else if harness.candidate_lines.contains(number) {
            if optimized {
                &mut candidate_optimized
            } else {
                &mut candidate_missed
            }
        } else {
            continue;
        };
        push_unique(target, line);
    }

    let original_vectorized = !original_optimized.is_empty();
    let candidate_vectorized = !candidate_optimized.is_empty();
    let verdict = match (original_vectorized, candidate_vectorized) {
        (true, true) => VectorizationVerdict::Both,
        (true, false) => VectorizationVerdict::OriginalOnly,
        (false, true) => VectorizationVerdict::CandidateOnly,
        (false, false) => VectorizationVerdict::Neither,
    };

    VectorizationReport {
        original_vectorized,
        candidate_vectorized,
        original_optimized,
        candidate_optimized,
        original_missed,
        candidate_missed,
        interpretation: verdict.interpretation().to_string(),
        verdict,
    }
}
