//! Optional Alive2 translation validation.
//!
//! The original function and the candidate are lowered to LLVM IR with clang
//! and compared by `alive-tv`. The verdict is advisory: it is persisted with
//! the attempt and never feeds the outcome classifier.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{Alive2Config, BenchmarkConfig};
use crate::extractor::vectorized_name;

pub const VERIFIED_MARKER: &str = "Transformation seems to be correct!";
const ERROR_MARKER: &str = "ERROR:";
const COUNTEREXAMPLE_LINES: usize = 20;
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);
const GRACE: Duration = Duration::from_secs(5);

const DUMMY_STUB: &str = "int dummy(real_t a[LEN_1D], real_t b[LEN_1D], real_t c[LEN_1D], real_t d[LEN_1D], real_t e[LEN_1D],
          real_t aa[LEN_2D][LEN_2D], real_t bb[LEN_2D][LEN_2D], real_t cc[LEN_2D][LEN_2D], real_t s) {
    return 0;
}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alive2Stage {
    /// Probing for the tools.
    Setup,
    CompileOriginal,
    CompileCandidate,
    Verification,
}

impl fmt::Display for Alive2Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Alive2Stage::Setup => "setup",
            Alive2Stage::CompileOriginal => "compilation_original",
            Alive2Stage::CompileCandidate => "compilation_vectorized",
            Alive2Stage::Verification => "verification",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alive2Verdict {
    Verified,
    Counterexample,
    Timeout,
    /// The check could not be carried out.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alive2Report {
    pub verdict: Alive2Verdict,
    pub stage: Alive2Stage,
    pub error: Option<String>,
    pub counterexample: Option<String>,
    pub output: String,
}

impl Alive2Report {
    fn failed(stage: Alive2Stage, error: impl Into<String>) -> Self {
        Self {
            verdict: Alive2Verdict::Error,
            stage,
            error: Some(error.into()),
            counterexample: None,
            output: String::new(),
        }
    }

    pub fn verified(&self) -> bool {
        self.verdict == Alive2Verdict::Verified
    }

    /// Text written to `alive2_verification_<i>.txt`.
    pub fn render(&self, function: &str) -> String {
        let mut text = format!(
            "Alive2 Verification Results for {function}\n{}\n\nVerified: {}\nStage: {}\n",
            "=".repeat(60),
            self.verified(),
            self.stage
        );
        if let Some(error) = &self.error {
            text.push_str(&format!("Error: {error}\n"));
        }
        if let Some(counterexample) = &self.counterexample {
            text.push_str(&format!("\nCounterexample:\n{counterexample}\n"));
        }
        if !self.output.is_empty() {
            text.push_str(&format!("\nFull Output:\n{}\n", self.output));
        }
        text
    }
}

/// Interpret `alive-tv` output.
pub fn parse_alive2_output(stdout: &str, stderr: &str) -> Alive2Report {
    let report = |verdict, error: Option<String>, counterexample| Alive2Report {
        verdict,
        stage: Alive2Stage::Verification,
        error,
        counterexample,
        output: stdout.to_string(),
    };
    if stdout.contains(VERIFIED_MARKER) {
        return report(Alive2Verdict::Verified, None, None);
    }
    if let Some(start) = stdout.lines().position(|l| l.contains(ERROR_MARKER)) {
        let counterexample = stdout
            .lines()
            .skip(start)
            .take(COUNTEREXAMPLE_LINES)
            .collect::<Vec<_>>()
            .join("\n");
        return report(
            Alive2Verdict::Counterexample,
            Some("Found counterexample".to_string()),
            Some(counterexample),
        );
    }
    let error = if stderr.trim().is_empty() {
        "Unknown verification result".to_string()
    } else {
        format!("Alive2 error: {}", stderr.trim())
    };
    report(Alive2Verdict::Error, Some(error), None)
}

/// Module-level declarations plus the definition of `@name`.
pub fn extract_function_ir(module: &str, name: &str) -> Option<String> {
    let mut lines: Vec<&str> = module
        .lines()
        .filter(|l| {
            let l = l.trim_start();
            l.starts_with("target ")
                || l.starts_with("declare ")
                || l.starts_with('!')
                || l.starts_with("attributes #")
        })
        .collect();
    lines.push("");

    let marker = format!("@{name}(");
    let start = module
        .lines()
        .position(|l| l.starts_with("define") && l.contains(&marker))?;
    let mut depth = 0i32;
    for line in module.lines().skip(start) {
        lines.push(line);
        depth += line.matches('{').count() as i32;
        depth -= line.matches('}').count() as i32;
        if depth <= 0 && line.contains('}') {
            return Some(lines.join("\n"));
        }
    }
    None
}

/// Runs clang and `alive-tv` under the workspace scratch directory.
#[derive(Debug, Clone)]
pub struct Alive2Verifier {
    config: Alive2Config,
    include_dir: PathBuf,
    headers: Vec<String>,
    globals: String,
    scratch_dir: PathBuf,
}

impl Alive2Verifier {
    /// `globals` are the reference file's global definitions, placed ahead of each function.
    pub fn new(
        config: &Alive2Config,
        benchmark: &BenchmarkConfig,
        globals: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config: config.clone(),
            include_dir: benchmark.support_dir.clone(),
            headers: benchmark.support_headers.clone(),
            globals: globals.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    fn translation_unit(&self, function_source: &str) -> String {
        let includes: String = self
            .headers
            .iter()
            .map(|h| format!("#include \"{h}\"\n"))
            .collect();
        format!(
            "{includes}#include <immintrin.h>\n#include <sys/time.h>\n\n{}\n\n{DUMMY_STUB}\n\n{function_source}\n",
            self.globals
        )
    }

    async fn check_available(&self) -> Result<(), String> {
        let status = tokio::time::timeout(AVAILABILITY_TIMEOUT, async {
            Command::new(&self.config.alive_tv)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await
        })
        .await;
        match status {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(format!("{} unavailable: {}", self.config.alive_tv, e)),
            Err(_) => Err(format!("{} did not respond", self.config.alive_tv)),
        }
    }

    async fn lower(
        &self,
        work_dir: &Path,
        stem: &str,
        function_source: &str,
        function: &str,
    ) -> Result<String, String> {
        let source = work_dir.join(format!("{stem}.c"));
        let ir = work_dir.join(format!("{stem}.ll"));
        tokio::fs::write(&source, self.translation_unit(function_source))
            .await
            .map_err(|e| format!("failed to write {}: {}", source.display(), e))?;

        let mut args = self.config.clang_flags.clone();
        args.push(format!("-I{}", self.include_dir.display()));
        args.push("-o".to_string());
        args.push(ir.display().to_string());
        args.push(source.display().to_string());
        debug!(clang = %self.config.clang, ?args, "Lowering to LLVM IR");

        let output = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs) + GRACE, async {
            Command::new(&self.config.clang)
                .args(&args)
                .current_dir(work_dir)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
        })
        .await
        .map_err(|_| format!("{} timed out", self.config.clang))?
        .map_err(|e| format!("failed to start {}: {}", self.config.clang, e))?;
        if !output.status.success() {
            return Err(format!(
                "Compilation failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let module = tokio::fs::read_to_string(&ir)
            .await
            .map_err(|e| format!("failed to read {}: {}", ir.display(), e))?;
        extract_function_ir(&module, function)
            .ok_or_else(|| format!("@{function} not found in emitted IR"))
    }

    /// Compare `candidate` (defining `<function>_vectorized`) against `original`.
    pub async fn validate(&self, function: &str, original: &str, candidate: &str) -> Alive2Report {
        if let Err(e) = self.check_available().await {
            warn!(function, error = %e, "Skipping translation validation");
            return Alive2Report::failed(Alive2Stage::Setup, e);
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.scratch_dir).await {
            return Alive2Report::failed(Alive2Stage::Setup, e.to_string());
        }
        let work_dir = match tempfile::Builder::new()
            .prefix(&format!("alive2-{function}-"))
            .tempdir_in(&self.scratch_dir)
        {
            Ok(dir) => dir,
            Err(e) => return Alive2Report::failed(Alive2Stage::Setup, e.to_string()),
        };

        let source_ir = match self.lower(work_dir.path(), "src", original, function).await {
            Ok(ir) => ir,
            Err(e) => return Alive2Report::failed(Alive2Stage::CompileOriginal, e),
        };
        let candidate_name = vectorized_name(function);
        let target_ir = match self
            .lower(work_dir.path(), "tgt", candidate, &candidate_name)
            .await
        {
            // alive-tv pairs functions by name.
            Ok(ir) => ir.replace(&format!("@{candidate_name}("), &format!("@{function}(")),
            Err(e) => return Alive2Report::failed(Alive2Stage::CompileCandidate, e),
        };

        let src = work_dir.path().join("src_fn.ll");
        let tgt = work_dir.path().join("tgt_fn.ll");
        for (path, ir) in [(&src, &source_ir), (&tgt, &target_ir)] {
            if let Err(e) = tokio::fs::write(path, ir).await {
                return Alive2Report::failed(Alive2Stage::Verification, e.to_string());
            }
        }

        let budget = Duration::from_secs(self.config.timeout_secs);
        let result = tokio::time::timeout(budget + GRACE, async {
            Command::new(&self.config.alive_tv)
                .arg(&src)
                .arg(&tgt)
                .arg("--disable-undef-input")
                .arg("--disable-poison-input")
                .arg("--smt-to")
                .arg(budget.as_millis().to_string())
                .current_dir(work_dir.path())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
        })
        .await;

        let report = match result {
            Ok(Ok(output)) => parse_alive2_output(
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            ),
            Ok(Err(e)) => Alive2Report::failed(
                Alive2Stage::Verification,
                format!("failed to start {}: {}", self.config.alive_tv, e),
            ),
            Err(_) => Alive2Report {
                verdict: Alive2Verdict::Timeout,
                ..Alive2Report::failed(Alive2Stage::Verification, "Verification timed out")
            },
        };
        info!(function, verdict = ?report.verdict, "Translation validation finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MODULE: &str = r#"; ModuleID = 'src.c'
source_filename = "src.c"
target datalayout = "e-m:e-i64:64"
target triple = "x86_64-unknown-linux-gnu"

define dso_local i32 @dummy(ptr %0) #0 {
  ret i32 0
}

define dso_local float @s000(ptr %0) #0 {
entry:
  %1 = call i32 @dummy(ptr null)
  ret float 0.000000e+00
}

declare i32 @gettimeofday(ptr, ptr) #1

attributes #0 = { noinline nounwind }
!0 = !{i32 1, !"wchar_size", i32 4}
"#;

    #[test]
    fn test_extract_function_ir_keeps_declarations() {
        let ir = extract_function_ir(MODULE, "s000").unwrap();
        assert!(ir.contains("target triple"));
        assert!(ir.contains("declare i32 @gettimeofday"));
        assert!(ir.contains("attributes #0"));
        assert!(ir.contains("define dso_local float @s000(ptr %0) #0 {"));
        assert!(ir.trim_end().ends_with('}'));
        assert!(!ir.contains("ret i32 0"));
        assert!(extract_function_ir(MODULE, "s111").is_none());
    }

    #[test]
    fn test_parse_verified() {
        let report = parse_alive2_output(
            "----------------------------------------\nTransformation seems to be correct!\n",
            "",
        );
        assert!(report.verified());
        assert_eq!(report.stage, Alive2Stage::Verification);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_parse_counterexample() {
        let stdout = "define float @s000() {\n}\nERROR: Value mismatch\n\nExample:\n%0 = 1\n";
        let report = parse_alive2_output(stdout, "");
        assert_eq!(report.verdict, Alive2Verdict::Counterexample);
        let counterexample = report.counterexample.unwrap();
        assert!(counterexample.starts_with("ERROR: Value mismatch"));
        assert!(counterexample.contains("%0 = 1"));
    }

    #[test]
    fn test_parse_unknown_and_stderr() {
        assert_eq!(
            parse_alive2_output("", "").error.as_deref(),
            Some("Unknown verification result")
        );
        let report = parse_alive2_output("", "could not parse file\n");
        assert_eq!(report.verdict, Alive2Verdict::Error);
        assert_eq!(report.error.as_deref(), Some("Alive2 error: could not parse file"));
    }

    #[test]
    fn test_render_lists_stage_and_error() {
        let report = Alive2Report::failed(Alive2Stage::CompileCandidate, "Compilation failed: x");
        let text = report.render("s000");
        assert!(text.starts_with("Alive2 Verification Results for s000\n"));
        assert!(text.contains("Verified: false\n"));
        assert!(text.contains("Stage: compilation_vectorized\n"));
        assert!(text.contains("Error: Compilation failed: x\n"));
        assert!(!text.contains("Full Output"));
    }

    #[tokio::test]
    async fn test_missing_alive_tv_is_reported_not_raised() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Alive2Config {
            enabled: true,
            alive_tv: "vecsmith-no-such-alive-tv".to_string(),
            ..Alive2Config::default()
        };
        let verifier = Alive2Verifier::new(
            &config,
            &BenchmarkConfig::default(),
            "",
            dir.path().join("scratch"),
        );
        let report = verifier.validate("s000", "real_t s000(void) { return 0; }", "").await;
        assert_eq!(report.verdict, Alive2Verdict::Error);
        assert_eq!(report.stage, Alive2Stage::Setup);
        assert!(report.error.unwrap().contains("vecsmith-no-such-alive-tv"));
        assert!(!dir.path().join("scratch").exists());
    }
}
